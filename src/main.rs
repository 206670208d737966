use std::sync::Arc;
use std::sync::atomic::Ordering;

use outreach_engine::classifier::InterestClassifier;
use outreach_engine::compose::MessageComposer;
use outreach_engine::config::EngineConfig;
use outreach_engine::dispatcher::Dispatcher;
use outreach_engine::llm::{LlmBackend, LlmConfig, create_provider};
use outreach_engine::mail::imap::{ImapConfig, ImapMailbox};
use outreach_engine::mail::smtp::{SmtpConfig, SmtpMailer};
use outreach_engine::mail::{InboundMailbox, MailTransport};
use outreach_engine::store::{LibSqlStore, Store};
use outreach_engine::sweep::SweepEngine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = EngineConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: invalid configuration: {e}");
        std::process::exit(1);
    });

    eprintln!("📨 Outreach Engine v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Policy: follow up after {}s, max {} follow-ups",
        config.policy.follow_up_delay.num_seconds(),
        config.policy.max_follow_ups
    );
    eprintln!("   Sweep: every {:?}", config.sweep_interval);

    // ── Database ─────────────────────────────────────────────────────────
    let db_path =
        std::env::var("OUTREACH_DB_PATH").unwrap_or_else(|_| "./data/outreach.db".to_string());
    let store: Arc<dyn Store> = Arc::new(
        LibSqlStore::new_local(std::path::Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {db_path}: {e}");
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {db_path}");

    // ── LLM (optional — deterministic fallbacks cover its absence) ──────
    let llm = match llm_config_from_env() {
        Some(llm_config) => match create_provider(&llm_config) {
            Ok(provider) => Some(provider),
            Err(e) => {
                eprintln!("   Warning: LLM provider unavailable ({e}), using fallbacks");
                None
            }
        },
        None => {
            eprintln!("   LLM: not configured, keyword classification + templates");
            None
        }
    };

    // ── Mail ────────────────────────────────────────────────────────────
    let transport: Option<Arc<dyn MailTransport>> = SmtpConfig::from_env(config.send_timeout)
        .map(|smtp| {
            eprintln!("   SMTP: {}:{}", smtp.host, smtp.port);
            Arc::new(SmtpMailer::new(smtp)) as Arc<dyn MailTransport>
        });
    if transport.is_none() {
        eprintln!("   SMTP: not configured, sends will be recorded as failed");
    }

    let mailbox: Option<Arc<dyn InboundMailbox>> = ImapConfig::from_env().map(|imap| {
        eprintln!("   IMAP: {}:{}", imap.host, imap.port);
        Arc::new(ImapMailbox::new(imap)) as Arc<dyn InboundMailbox>
    });
    if mailbox.is_none() {
        eprintln!("   IMAP: not configured, inbound ingestion disabled");
    }

    // ── Engine ──────────────────────────────────────────────────────────
    let classifier = InterestClassifier::new(llm.clone(), config.llm_timeout);
    let composer = MessageComposer::new(llm, config.sender.clone(), config.llm_timeout);
    let dispatcher = Dispatcher::new(
        store.clone(),
        classifier,
        composer,
        transport,
        config.policy.clone(),
    );
    let engine = SweepEngine::new(
        store,
        dispatcher,
        mailbox,
        config.policy,
        config.max_concurrency,
    );

    let cancel = engine.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested, finishing in-flight work");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    let mut ticker = tokio::time::interval(config.sweep_interval);
    loop {
        ticker.tick().await;
        if engine.cancel_flag().load(Ordering::Relaxed) {
            break;
        }
        match engine.run().await {
            Ok(report) => tracing::debug!(?report, "Sweep report"),
            Err(e) => {
                tracing::error!(error = %e, "Sweep aborted on store failure");
                return Err(e.into());
            }
        }
        if engine.cancel_flag().load(Ordering::Relaxed) {
            break;
        }
    }

    eprintln!("Goodbye.");
    Ok(())
}

/// Pick a backend from whichever API key is present. Anthropic wins when
/// both are set.
fn llm_config_from_env() -> Option<LlmConfig> {
    if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        let model = std::env::var("OUTREACH_MODEL")
            .unwrap_or_else(|_| "claude-3-5-haiku-latest".to_string());
        return Some(LlmConfig {
            backend: LlmBackend::Anthropic,
            api_key: secrecy::SecretString::from(key),
            model,
        });
    }
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        let model = std::env::var("OUTREACH_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        return Some(LlmConfig {
            backend: LlmBackend::OpenAi,
            api_key: secrecy::SecretString::from(key),
            model,
        });
    }
    None
}
