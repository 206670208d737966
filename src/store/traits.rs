//! Backend-agnostic persistence trait.

use async_trait::async_trait;
use uuid::Uuid;

use crate::contacts::{CanonicalKey, Contact};
use crate::error::StoreError;
use crate::events::model::{Event, NewEvent};

/// Persistence interface covering contacts, the event log, and the
/// unsubscribe list.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), StoreError>;

    // ── Contacts ────────────────────────────────────────────────────

    /// Insert a new contact. Fails with `Constraint` if the canonical key
    /// already exists.
    async fn insert_contact(&self, contact: &Contact) -> Result<(), StoreError>;

    /// Look up a contact by canonical key.
    async fn contact_by_key(&self, key: &CanonicalKey) -> Result<Option<Contact>, StoreError>;

    /// Look up a contact by any of its email addresses (case-insensitive).
    async fn contact_by_email(&self, email: &str) -> Result<Option<Contact>, StoreError>;

    /// Replace a contact's channel lists (emails, phones) with the given
    /// contact's current lists.
    async fn update_contact_channels(&self, contact: &Contact) -> Result<(), StoreError>;

    /// All contacts, oldest first.
    async fn all_contacts(&self) -> Result<Vec<Contact>, StoreError>;

    // ── Event log ───────────────────────────────────────────────────

    /// Append one event. Returns the assigned row id.
    async fn append_event(&self, event: &NewEvent) -> Result<i64, StoreError>;

    /// Events for a contact, ordered by timestamp with row id breaking ties.
    async fn events_for_contact(&self, contact_id: Uuid) -> Result<Vec<Event>, StoreError>;

    // ── Unsubscribe list ────────────────────────────────────────────

    /// Record an unsubscribe for a canonical key. Returns `true` on first
    /// write, `false` if the key was already present (no change made).
    async fn insert_unsubscribe(
        &self,
        key: &CanonicalKey,
        reason: &str,
    ) -> Result<bool, StoreError>;

    /// Whether the key has an unsubscribe entry.
    async fn is_unsubscribed(&self, key: &CanonicalKey) -> Result<bool, StoreError>;
}
