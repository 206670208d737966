//! State derivation — a pure fold from event history to a lifecycle snapshot.
//!
//! Nothing here is authoritative storage: `derive` is deterministic over its
//! inputs (no clock, no randomness) and can be recomputed at any time. Any
//! cached snapshot must be discarded as soon as a new event lands for the
//! contact — the dispatcher re-derives immediately before executing.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::events::model::{Event, EventKind};

/// Lifecycle stage of a contact.
///
/// `Replied` and `Unsubscribed` are terminal: once reached, no event moves
/// the contact out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    New,
    Contacted,
    Replied,
    Unsubscribed,
}

impl LifecycleStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Replied | Self::Unsubscribed)
    }
}

/// An inbound message no reply event correlates to yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReply {
    pub inbound_id: String,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// Computed lifecycle snapshot for one contact.
#[derive(Debug, Clone)]
pub struct DerivedState {
    pub contact_id: Uuid,
    pub stage: LifecycleStage,
    /// Count of `sent` + `follow_up_sent` events, regardless of send status.
    pub outbound_count: u32,
    /// Count of `follow_up_sent` events.
    pub follow_up_count: u32,
    /// Whether any `replied_*` event exists.
    pub has_replied: bool,
    /// Latest outbound timestamp; `None` if the contact was never contacted.
    pub last_contact_at: Option<DateTime<Utc>>,
    /// Unsubscribe entry present, or an `unsubscribed` event exists.
    pub is_unsubscribed: bool,
    /// Most recent inbound message that has not been answered.
    pub pending_reply: Option<PendingReply>,
}

/// Fold a contact's event sequence into a `DerivedState`.
///
/// `events` must be in log order (chronological, append-order tiebreak), as
/// returned by `EventLog::events_for`. `unsubscribe_entry` is whether the
/// unsubscribe store holds an entry for this contact.
pub fn derive(contact_id: Uuid, events: &[Event], unsubscribe_entry: bool) -> DerivedState {
    let mut stage = LifecycleStage::New;
    let mut outbound_count = 0u32;
    let mut follow_up_count = 0u32;
    let mut has_replied = false;
    let mut last_contact_at: Option<DateTime<Utc>> = None;
    let mut unsubscribed_event = false;

    let mut inbound: Vec<&Event> = Vec::new();
    let mut answered_ids: Vec<&str> = Vec::new();

    for event in events {
        match &event.kind {
            EventKind::Sent(_) => {
                outbound_count += 1;
                if stage == LifecycleStage::New {
                    stage = LifecycleStage::Contacted;
                }
            }
            EventKind::FollowUpSent(_) => {
                outbound_count += 1;
                follow_up_count += 1;
                if stage == LifecycleStage::New {
                    stage = LifecycleStage::Contacted;
                }
            }
            EventKind::Received(_) => {
                inbound.push(event);
            }
            EventKind::Replied { inbound_id, .. } => {
                has_replied = true;
                answered_ids.push(inbound_id);
                if !stage.is_terminal() {
                    stage = LifecycleStage::Replied;
                }
            }
            EventKind::Unsubscribed { .. } => {
                unsubscribed_event = true;
                if !stage.is_terminal() {
                    stage = LifecycleStage::Unsubscribed;
                }
            }
        }

        if event.kind.is_outbound() {
            last_contact_at = Some(match last_contact_at {
                Some(prev) => prev.max(event.timestamp),
                None => event.timestamp,
            });
        }
    }

    let is_unsubscribed = unsubscribe_entry || unsubscribed_event;
    if is_unsubscribed && !stage.is_terminal() {
        stage = LifecycleStage::Unsubscribed;
    }

    // Latest inbound message with no reply event pointing at it.
    let pending_reply = inbound
        .iter()
        .rev()
        .find(|event| match &event.kind {
            EventKind::Received(payload) => {
                !answered_ids.iter().any(|id| *id == payload.inbound_id)
            }
            _ => false,
        })
        .and_then(|event| match &event.kind {
            EventKind::Received(payload) => Some(PendingReply {
                inbound_id: payload.inbound_id.clone(),
                subject: payload.subject.clone(),
                body: payload.body.clone(),
                received_at: event.timestamp,
            }),
            _ => None,
        });

    DerivedState {
        contact_id,
        stage,
        outbound_count,
        follow_up_count,
        has_replied,
        last_contact_at,
        is_unsubscribed,
        pending_reply,
    }
}
