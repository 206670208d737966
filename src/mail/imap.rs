//! Inbound mail via raw IMAP over TLS.
//!
//! A minimal IMAP client: LOGIN, SELECT INBOX, SEARCH UNSEEN, FETCH, then
//! STORE \Seen. Blocking socket work runs under `spawn_blocking`; parsing is
//! done with mail-parser.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;
use uuid::Uuid;

use crate::error::TransportError;
use crate::mail::{InboundEmail, InboundMailbox};

/// IMAP configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub read_timeout: Duration,
}

impl ImapConfig {
    /// Build config from environment variables.
    /// Returns `None` if `IMAP_HOST` is not set (inbound mail disabled).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("IMAP_HOST").ok()?;

        let port: u16 = std::env::var("IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let username = std::env::var("IMAP_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("IMAP_PASSWORD").unwrap_or_default());

        Some(Self {
            host,
            port,
            username,
            password,
            read_timeout: Duration::from_secs(30),
        })
    }
}

/// Inbound mailbox polling an IMAP server.
pub struct ImapMailbox {
    config: ImapConfig,
}

impl ImapMailbox {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl InboundMailbox for ImapMailbox {
    async fn fetch_unread(&self) -> Result<Vec<InboundEmail>, TransportError> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || fetch_unseen(&config))
            .await
            .map_err(|e| TransportError::FetchFailed(format!("fetch task panicked: {e}")))?
    }
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// One tagged-command IMAP session over TLS.
struct ImapSession {
    stream: TlsStream,
    tag_counter: u32,
}

impl ImapSession {
    fn connect(config: &ImapConfig) -> Result<Self, TransportError> {
        let tcp = TcpStream::connect((&*config.host, config.port))
            .map_err(|e| TransportError::FetchFailed(format!("TCP connect failed: {e}")))?;
        tcp.set_read_timeout(Some(config.read_timeout))
            .map_err(|e| TransportError::FetchFailed(format!("set read timeout: {e}")))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name: rustls::pki_types::ServerName<'_> =
            rustls::pki_types::ServerName::try_from(config.host.clone())
                .map_err(|e| TransportError::FetchFailed(format!("invalid server name: {e}")))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| TransportError::FetchFailed(format!("TLS setup failed: {e}")))?;

        let mut session = Self {
            stream: rustls::StreamOwned::new(conn, tcp),
            tag_counter: 0,
        };

        // Server greeting arrives before the first command.
        session.read_line()?;
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, TransportError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.stream.read(&mut byte) {
                Ok(0) => {
                    return Err(TransportError::FetchFailed(
                        "IMAP connection closed".into(),
                    ));
                }
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(TransportError::FetchFailed(format!("IMAP read: {e}"))),
            }
        }
    }

    /// Send a tagged command and collect response lines through the tagged
    /// completion line.
    fn command(&mut self, cmd: &str) -> Result<Vec<String>, TransportError> {
        self.tag_counter += 1;
        let tag = format!("A{}", self.tag_counter);
        let full = format!("{tag} {cmd}\r\n");
        self.stream
            .write_all(full.as_bytes())
            .and_then(|()| self.stream.flush())
            .map_err(|e| TransportError::FetchFailed(format!("IMAP write: {e}")))?;

        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let done = line.starts_with(&tag);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }
}

/// Fetch unseen messages and mark them read (blocking).
fn fetch_unseen(config: &ImapConfig) -> Result<Vec<InboundEmail>, TransportError> {
    let mut session = ImapSession::connect(config)?;

    let login = session.command(&format!(
        "LOGIN \"{}\" \"{}\"",
        config.username,
        config.password.expose_secret()
    ))?;
    if !login.last().is_some_and(|l| l.contains("OK")) {
        return Err(TransportError::FetchFailed("IMAP login failed".into()));
    }

    session.command("SELECT \"INBOX\"")?;

    let search = session.command("SEARCH UNSEEN")?;
    let mut uids: Vec<String> = Vec::new();
    for line in &search {
        if line.starts_with("* SEARCH") {
            uids.extend(line.split_whitespace().skip(2).map(String::from));
        }
    }
    debug!(unseen = uids.len(), "IMAP search complete");

    let mut results = Vec::new();
    for uid in &uids {
        let fetch = session.command(&format!("FETCH {uid} RFC822"))?;

        // Drop the untagged FETCH header and the tagged completion line;
        // what remains is the raw message.
        let raw: String = fetch
            .iter()
            .skip(1)
            .take(fetch.len().saturating_sub(2))
            .cloned()
            .collect();

        if let Some(email) = parse_inbound(raw.as_bytes()) {
            results.push(email);
        }

        let _ = session.command(&format!("STORE {uid} +FLAGS (\\Seen)"));
    }

    let _ = session.command("LOGOUT");
    Ok(results)
}

/// Parse a raw RFC822 message into an `InboundEmail`.
fn parse_inbound(raw: &[u8]) -> Option<InboundEmail> {
    let parsed = MessageParser::default().parse(raw)?;

    let from = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())?;

    let subject = parsed.subject().unwrap_or("(no subject)").to_string();

    let body = if let Some(text) = parsed.body_text(0) {
        text.to_string()
    } else if let Some(html) = parsed.body_html(0) {
        strip_html(html.as_ref())
    } else {
        String::new()
    };

    let inbound_id = parsed
        .message_id()
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4()));

    let received_at = parsed
        .date()
        .and_then(|d| DateTime::parse_from_rfc3339(&d.to_rfc3339()).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Some(InboundEmail {
        from,
        subject,
        body,
        inbound_id,
        received_at,
    })
}

/// Strip HTML tags from content (basic).
fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
