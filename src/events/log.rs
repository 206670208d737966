//! Event log facade over the store.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::events::model::{Event, NewEvent};
use crate::store::Store;

/// Append-only, per-contact ordered log of interaction events.
///
/// Appends are atomic per call — a single INSERT, either fully visible or
/// not visible at all. Appends to different contacts are independent.
#[derive(Clone)]
pub struct EventLog {
    store: Arc<dyn Store>,
}

impl EventLog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Append an event, returning its id.
    pub async fn append(&self, event: NewEvent) -> Result<i64, StoreError> {
        let event_type = event.kind.event_type();
        let contact_id = event.contact_id;
        let id = self.store.append_event(&event).await?;
        debug!(contact_id = %contact_id, event_type, event_id = id, "Appended event");
        Ok(id)
    }

    /// All events for a contact, chronological, ties broken by append order.
    pub async fn events_for(&self, contact_id: Uuid) -> Result<Vec<Event>, StoreError> {
        self.store.events_for_contact(contact_id).await
    }
}
