//! Mail collaborators — SMTP outbound, IMAP inbound.
//!
//! The engine talks to mail through two narrow traits so sweeps can run
//! against mocks in tests and real servers in production.

pub mod imap;
pub mod smtp;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::TransportError;

/// An unread inbound email pulled from the mailbox.
#[derive(Debug, Clone)]
pub struct InboundEmail {
    /// Sender address.
    pub from: String,
    pub subject: String,
    pub body: String,
    /// Mailbox-native message id.
    pub inbound_id: String,
    pub received_at: DateTime<Utc>,
}

/// Outbound mail transport.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Send one message. Implementations carry their own network timeouts.
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), TransportError>;
}

/// Inbound mailbox, polled once per sweep.
#[async_trait]
pub trait InboundMailbox: Send + Sync {
    /// Fetch messages that arrived since the last poll, marking them read.
    async fn fetch_unread(&self) -> Result<Vec<InboundEmail>, TransportError>;
}
