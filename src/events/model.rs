//! Event records — one immutable row per interaction.
//!
//! Each event type carries only the fields relevant to it, as a tagged
//! variant. Once appended an event is never mutated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Success,
    Failed,
}

impl SendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "failed" => Self::Failed,
            _ => Self::Success,
        }
    }
}

/// Three-way intent label for an inbound reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestLevel {
    Positive,
    Negative,
    Neutral,
}

impl InterestLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
        }
    }

    /// Parse a label, accepting only the three permitted values.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "positive" => Some(Self::Positive),
            "negative" => Some(Self::Negative),
            "neutral" => Some(Self::Neutral),
            _ => None,
        }
    }
}

/// Payload for an outbound message (initial send, follow-up, or reply).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundPayload {
    pub subject: String,
    pub body: String,
    pub status: SendStatus,
}

/// Payload for an inbound message from the contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundPayload {
    pub subject: String,
    pub body: String,
    /// Mailbox-native id of the inbound message.
    pub inbound_id: String,
}

/// The type-specific content of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Initial outreach email sent.
    Sent(OutboundPayload),
    /// Follow-up email sent.
    FollowUpSent(OutboundPayload),
    /// Inbound message received from the contact.
    Received(InboundPayload),
    /// Reply sent to a classified inbound message.
    Replied {
        interest: InterestLevel,
        payload: OutboundPayload,
        /// The inbound message this reply answers.
        inbound_id: String,
    },
    /// Contact unsubscribed (by policy or explicit request).
    Unsubscribed { reason: String },
}

impl EventKind {
    /// Stored event-type tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Sent(_) => "sent",
            Self::FollowUpSent(_) => "follow_up_sent",
            Self::Received(_) => "received",
            Self::Replied {
                interest: InterestLevel::Positive,
                ..
            } => "replied_positive",
            Self::Replied {
                interest: InterestLevel::Negative,
                ..
            } => "replied_negative",
            Self::Replied {
                interest: InterestLevel::Neutral,
                ..
            } => "replied_neutral",
            Self::Unsubscribed { .. } => "unsubscribed",
        }
    }

    /// Outbound contact attempts: `sent` and `follow_up_sent`.
    pub fn is_outbound(&self) -> bool {
        matches!(self, Self::Sent(_) | Self::FollowUpSent(_))
    }

    /// Any `replied_*` event.
    pub fn is_reply(&self) -> bool {
        matches!(self, Self::Replied { .. })
    }
}

/// An event not yet appended to the log.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub contact_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    /// Optional link to the event this one answers (outbound event id for
    /// inbound receptions).
    pub correlation_id: Option<String>,
}

impl NewEvent {
    pub fn now(contact_id: Uuid, kind: EventKind) -> Self {
        Self {
            contact_id,
            timestamp: Utc::now(),
            kind,
            correlation_id: None,
        }
    }

    pub fn at(contact_id: Uuid, timestamp: DateTime<Utc>, kind: EventKind) -> Self {
        Self {
            contact_id,
            timestamp,
            kind,
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// A stored event. `id` is the append-order row id, which breaks timestamp
/// ties in `events_for` ordering.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: i64,
    pub contact_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub correlation_id: Option<String>,
}
