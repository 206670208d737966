//! Outbound SMTP via lettre.

use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};

use crate::error::TransportError;
use crate::mail::MailTransport;

/// SMTP configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    pub send_timeout: Duration,
}

impl SmtpConfig {
    /// Build config from environment variables.
    /// Returns `None` if `SMTP_HOST` is not set (outbound mail disabled).
    pub fn from_env(send_timeout: Duration) -> Option<Self> {
        let host = std::env::var("SMTP_HOST").ok()?;

        let port: u16 = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("SMTP_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("SMTP_PASSWORD").unwrap_or_default());
        let from_address = std::env::var("SMTP_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        Some(Self {
            host,
            port,
            username,
            password,
            from_address,
            send_timeout,
        })
    }
}

/// Mail transport over SMTP with STARTTLS.
///
/// lettre's sync transport does the wire work; each send runs under
/// `spawn_blocking` with the configured timeout around it.
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn send_blocking(config: &SmtpConfig, to: &str, subject: &str, body: &str) -> Result<(), TransportError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| TransportError::SendFailed {
                to: to.to_string(),
                reason: format!("SMTP relay error: {e}"),
            })?
            .port(config.port)
            .credentials(creds)
            .build();

        let email = Message::builder()
            .from(
                config
                    .from_address
                    .parse()
                    .map_err(|e| TransportError::InvalidAddress {
                        address: config.from_address.clone(),
                        reason: format!("{e}"),
                    })?,
            )
            .to(to.parse().map_err(|e| TransportError::InvalidAddress {
                address: to.to_string(),
                reason: format!("{e}"),
            })?)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| TransportError::SendFailed {
                to: to.to_string(),
                reason: format!("Failed to build email: {e}"),
            })?;

        transport
            .send(&email)
            .map_err(|e| TransportError::SendFailed {
                to: to.to_string(),
                reason: format!("SMTP send failed: {e}"),
            })?;

        Ok(())
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), TransportError> {
        let config = self.config.clone();
        let to_owned = to.to_string();
        let subject = subject.to_string();
        let body = body.to_string();

        let handle = tokio::task::spawn_blocking(move || {
            Self::send_blocking(&config, &to_owned, &subject, &body)
        });

        match tokio::time::timeout(self.config.send_timeout, handle).await {
            Ok(Ok(result)) => {
                if result.is_ok() {
                    tracing::info!("Email sent to {to}");
                }
                result
            }
            Ok(Err(join_err)) => Err(TransportError::SendFailed {
                to: to.to_string(),
                reason: format!("send task panicked: {join_err}"),
            }),
            Err(_) => Err(TransportError::Timeout(self.config.send_timeout)),
        }
    }
}
