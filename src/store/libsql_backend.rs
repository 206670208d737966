//! libSQL backend — async `Store` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::contacts::{CanonicalKey, Contact};
use crate::error::StoreError;
use crate::events::model::{
    Event, EventKind, InboundPayload, InterestLevel, NewEvent, OutboundPayload, SendStatus,
};
use crate::store::migrations;
use crate::store::traits::Store;

/// libSQL store backend.
///
/// Holds a single connection reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn load_channels(
        &self,
        contact_id: &str,
    ) -> Result<(Vec<String>, Vec<String>, Vec<String>), StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT kind, value FROM contact_channels WHERE contact_id = ?1 ORDER BY rowid",
                params![contact_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("load_channels: {e}")))?;

        let mut work = Vec::new();
        let mut personal = Vec::new();
        let mut phones = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("load_channels row: {e}")))?
        {
            let kind: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("load_channels kind: {e}")))?;
            let value: String = row
                .get(1)
                .map_err(|e| StoreError::Query(format!("load_channels value: {e}")))?;
            match kind.as_str() {
                "work_email" => work.push(value),
                "personal_email" => personal.push(value),
                "phone" => phones.push(value),
                _ => {}
            }
        }
        Ok((work, personal, phones))
    }

    async fn insert_channels(&self, contact: &Contact) -> Result<(), StoreError> {
        let id = contact.id.to_string();
        let groups = [
            ("work_email", &contact.work_emails),
            ("personal_email", &contact.personal_emails),
            ("phone", &contact.phones),
        ];
        for (kind, values) in groups {
            for value in values {
                self.conn()
                    .execute(
                        "INSERT OR IGNORE INTO contact_channels (contact_id, kind, value)
                         VALUES (?1, ?2, ?3)",
                        params![id.clone(), kind, value.clone()],
                    )
                    .await
                    .map_err(|e| StoreError::Query(format!("insert_channels: {e}")))?;
            }
        }
        Ok(())
    }

    async fn contact_from_row(&self, row: &libsql::Row) -> Result<Contact, StoreError> {
        let id_str: String = row
            .get(0)
            .map_err(|e| StoreError::Query(format!("contact id: {e}")))?;
        let key: String = row
            .get(1)
            .map_err(|e| StoreError::Query(format!("contact key: {e}")))?;
        let display_name: String = row
            .get(2)
            .map_err(|e| StoreError::Query(format!("contact name: {e}")))?;
        let domain: String = row
            .get(3)
            .map_err(|e| StoreError::Query(format!("contact domain: {e}")))?;
        let source: String = row
            .get(4)
            .map_err(|e| StoreError::Query(format!("contact source: {e}")))?;
        let first_seen_str: String = row
            .get(5)
            .map_err(|e| StoreError::Query(format!("contact first_seen: {e}")))?;

        let id = Uuid::parse_str(&id_str)
            .map_err(|e| StoreError::Serialization(format!("contact id {id_str:?}: {e}")))?;
        let (work_emails, personal_emails, phones) = self.load_channels(&id_str).await?;

        Ok(Contact {
            id,
            canonical_key: CanonicalKey::from_stored(key),
            display_name,
            domain,
            work_emails,
            personal_emails,
            phones,
            source,
            first_seen: parse_datetime(&first_seen_str),
        })
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Canonical write format. Fixed-width UTC so lexicographic order on the
/// stored column matches chronological order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn is_unique_violation(e: &libsql::Error) -> bool {
    e.to_string().contains("UNIQUE constraint failed")
}

/// Flatten an event kind into its column values:
/// (subject, body, status, interest_level, inbound_id, reason).
#[allow(clippy::type_complexity)]
fn kind_to_columns(
    kind: &EventKind,
) -> (
    Option<&str>,
    Option<&str>,
    Option<&str>,
    Option<&str>,
    Option<&str>,
    Option<&str>,
) {
    match kind {
        EventKind::Sent(p) | EventKind::FollowUpSent(p) => (
            Some(p.subject.as_str()),
            Some(p.body.as_str()),
            Some(p.status.as_str()),
            None,
            None,
            None,
        ),
        EventKind::Received(p) => (
            Some(p.subject.as_str()),
            Some(p.body.as_str()),
            None,
            None,
            Some(p.inbound_id.as_str()),
            None,
        ),
        EventKind::Replied {
            interest,
            payload,
            inbound_id,
        } => (
            Some(payload.subject.as_str()),
            Some(payload.body.as_str()),
            Some(payload.status.as_str()),
            Some(interest.as_str()),
            Some(inbound_id.as_str()),
            None,
        ),
        EventKind::Unsubscribed { reason } => {
            (None, None, None, None, None, Some(reason.as_str()))
        }
    }
}

/// Rebuild an event kind from its stored columns.
fn columns_to_kind(
    event_type: &str,
    subject: Option<String>,
    body: Option<String>,
    status: Option<String>,
    interest: Option<String>,
    inbound_id: Option<String>,
    reason: Option<String>,
) -> Result<EventKind, StoreError> {
    let outbound = || OutboundPayload {
        subject: subject.clone().unwrap_or_default(),
        body: body.clone().unwrap_or_default(),
        status: SendStatus::parse(status.as_deref().unwrap_or("success")),
    };

    match event_type {
        "sent" => Ok(EventKind::Sent(outbound())),
        "follow_up_sent" => Ok(EventKind::FollowUpSent(outbound())),
        "received" => Ok(EventKind::Received(InboundPayload {
            subject: subject.unwrap_or_default(),
            body: body.unwrap_or_default(),
            inbound_id: inbound_id.unwrap_or_default(),
        })),
        "replied_positive" | "replied_negative" | "replied_neutral" => {
            let interest = interest
                .as_deref()
                .and_then(InterestLevel::parse)
                .unwrap_or(InterestLevel::Neutral);
            Ok(EventKind::Replied {
                interest,
                payload: outbound(),
                inbound_id: inbound_id.unwrap_or_default(),
            })
        }
        "unsubscribed" => Ok(EventKind::Unsubscribed {
            reason: reason.unwrap_or_default(),
        }),
        other => Err(StoreError::Serialization(format!(
            "unknown event type {other:?}"
        ))),
    }
}

fn row_to_event(row: &libsql::Row) -> Result<Event, StoreError> {
    let id: i64 = row
        .get(0)
        .map_err(|e| StoreError::Query(format!("event id: {e}")))?;
    let contact_id_str: String = row
        .get(1)
        .map_err(|e| StoreError::Query(format!("event contact_id: {e}")))?;
    let timestamp_str: String = row
        .get(2)
        .map_err(|e| StoreError::Query(format!("event timestamp: {e}")))?;
    let event_type: String = row
        .get(3)
        .map_err(|e| StoreError::Query(format!("event type: {e}")))?;
    let subject: Option<String> = row.get(4).ok();
    let body: Option<String> = row.get(5).ok();
    let status: Option<String> = row.get(6).ok();
    let interest: Option<String> = row.get(7).ok();
    let inbound_id: Option<String> = row.get(8).ok();
    let reason: Option<String> = row.get(9).ok();
    let correlation_id: Option<String> = row.get(10).ok();

    let contact_id = Uuid::parse_str(&contact_id_str).map_err(|e| {
        StoreError::Serialization(format!("event contact id {contact_id_str:?}: {e}"))
    })?;

    Ok(Event {
        id,
        contact_id,
        timestamp: parse_datetime(&timestamp_str),
        kind: columns_to_kind(
            &event_type,
            subject,
            body,
            status,
            interest,
            inbound_id,
            reason,
        )?,
        correlation_id,
    })
}

const CONTACT_COLUMNS: &str = "id, canonical_key, display_name, domain, source, first_seen";
const EVENT_COLUMNS: &str = "id, contact_id, timestamp, event_type, subject, body, status, \
                             interest_level, inbound_id, reason, correlation_id";

#[async_trait]
impl Store for LibSqlStore {
    async fn run_migrations(&self) -> Result<(), StoreError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn insert_contact(&self, contact: &Contact) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO contacts (id, canonical_key, display_name, domain, source, first_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    contact.id.to_string(),
                    contact.canonical_key.as_str(),
                    contact.display_name.clone(),
                    contact.domain.clone(),
                    contact.source.clone(),
                    format_datetime(&contact.first_seen),
                ],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Constraint(format!(
                        "contact {} already exists",
                        contact.canonical_key
                    ))
                } else {
                    StoreError::Query(format!("insert_contact: {e}"))
                }
            })?;

        self.insert_channels(contact).await
    }

    async fn contact_by_key(&self, key: &CanonicalKey) -> Result<Option<Contact>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE canonical_key = ?1"),
                params![key.as_str()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("contact_by_key: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("contact_by_key row: {e}")))?
        {
            Some(row) => Ok(Some(self.contact_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn contact_by_email(&self, email: &str) -> Result<Option<Contact>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {cols} FROM contacts c
                     JOIN contact_channels ch ON ch.contact_id = c.id
                     WHERE ch.kind IN ('work_email', 'personal_email')
                       AND LOWER(ch.value) = LOWER(?1)
                     LIMIT 1",
                    cols = "c.id, c.canonical_key, c.display_name, c.domain, c.source, c.first_seen"
                ),
                params![email],
            )
            .await
            .map_err(|e| StoreError::Query(format!("contact_by_email: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("contact_by_email row: {e}")))?
        {
            Some(row) => Ok(Some(self.contact_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn update_contact_channels(&self, contact: &Contact) -> Result<(), StoreError> {
        // INSERT OR IGNORE keeps existing rows; the channel lists only grow.
        self.insert_channels(contact).await
    }

    async fn all_contacts(&self) -> Result<Vec<Contact>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts ORDER BY first_seen, rowid"),
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("all_contacts: {e}")))?;

        let mut contacts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("all_contacts row: {e}")))?
        {
            contacts.push(self.contact_from_row(&row).await?);
        }
        Ok(contacts)
    }

    async fn append_event(&self, event: &NewEvent) -> Result<i64, StoreError> {
        let (subject, body, status, interest, inbound_id, reason) = kind_to_columns(&event.kind);

        self.conn()
            .execute(
                "INSERT INTO events (contact_id, timestamp, event_type, subject, body, status,
                                     interest_level, inbound_id, reason, correlation_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    event.contact_id.to_string(),
                    format_datetime(&event.timestamp),
                    event.kind.event_type(),
                    subject,
                    body,
                    status,
                    interest,
                    inbound_id,
                    reason,
                    event.correlation_id.clone(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("append_event: {e}")))?;

        Ok(self.conn().last_insert_rowid())
    }

    async fn events_for_contact(&self, contact_id: Uuid) -> Result<Vec<Event>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM events
                     WHERE contact_id = ?1
                     ORDER BY timestamp, id"
                ),
                params![contact_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("events_for_contact: {e}")))?;

        let mut events = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("events_for_contact row: {e}")))?
        {
            events.push(row_to_event(&row)?);
        }
        Ok(events)
    }

    async fn insert_unsubscribe(
        &self,
        key: &CanonicalKey,
        reason: &str,
    ) -> Result<bool, StoreError> {
        let changed = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO unsubscribes (canonical_key, reason, created_at)
                 VALUES (?1, ?2, ?3)",
                params![key.as_str(), reason, format_datetime(&Utc::now())],
            )
            .await
            .map_err(|e| StoreError::Query(format!("insert_unsubscribe: {e}")))?;

        Ok(changed > 0)
    }

    async fn is_unsubscribed(&self, key: &CanonicalKey) -> Result<bool, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM unsubscribes WHERE canonical_key = ?1",
                params![key.as_str()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("is_unsubscribed: {e}")))?;

        Ok(rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("is_unsubscribed row: {e}")))?
            .is_some())
    }
}
