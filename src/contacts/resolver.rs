//! Identity resolution — raw identifiers to canonical keys, dedup on upsert.

use std::sync::{Arc, LazyLock};

use chrono::Utc;
use regex::Regex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::contacts::model::{CanonicalKey, Contact, ContactCandidate, union_into};
use crate::error::{IdentityError, StoreError};
use crate::store::Store;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9-.]+$").unwrap()
});

/// Normalize a raw identifier (source URL or email) into a canonical key.
///
/// - emails are lowercased whole
/// - URLs lose trailing slashes and get a lowercased scheme and host;
///   the path keeps its case
///
/// Fails with `IdentityError` on empty or unparseable input; no record is
/// ever created for a failed resolution.
pub fn resolve(raw: &str) -> Result<CanonicalKey, IdentityError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(IdentityError::Empty);
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(IdentityError::Unparseable(raw.to_string()));
    }

    // Email identifier
    if trimmed.contains('@') {
        if EMAIL_RE.is_match(trimmed) {
            return Ok(CanonicalKey(trimmed.to_lowercase()));
        }
        return Err(IdentityError::Unparseable(raw.to_string()));
    }

    // URL identifier
    let stripped = trimmed.trim_end_matches('/');
    if stripped.is_empty() {
        return Err(IdentityError::Unparseable(raw.to_string()));
    }

    let (scheme, rest) = match stripped.find("://") {
        Some(idx) => (Some(&stripped[..idx]), &stripped[idx + 3..]),
        None => (None, stripped),
    };

    let (host, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };

    if host.is_empty() || !host.contains('.') {
        return Err(IdentityError::Unparseable(raw.to_string()));
    }

    let mut key = String::with_capacity(stripped.len());
    if let Some(scheme) = scheme {
        key.push_str(&scheme.to_lowercase());
        key.push_str("://");
    }
    key.push_str(&host.to_lowercase());
    key.push_str(path);

    Ok(CanonicalKey(key))
}

/// Result of an upsert: whether a new contact was created, and the stored
/// record after any merge.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub is_new: bool,
    pub contact: Contact,
}

/// Resolves candidates against the store, creating or merging contacts.
pub struct IdentityResolver {
    store: Arc<dyn Store>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Insert the candidate if its canonical key is unseen, otherwise merge
    /// email/phone sets into the existing record.
    ///
    /// Name, domain and source are first-write-wins — re-resolving an
    /// existing key never overwrites them. Calling twice with the same
    /// candidate leaves exactly one stored contact.
    pub async fn upsert(&self, candidate: ContactCandidate) -> crate::error::Result<UpsertOutcome> {
        let key = resolve(&candidate.raw_identifier)?;

        if let Some(mut existing) = self.store.contact_by_key(&key).await? {
            let mut changed = union_into(&mut existing.work_emails, &candidate.work_emails);
            changed |= union_into(&mut existing.personal_emails, &candidate.personal_emails);
            changed |= union_into(&mut existing.phones, &candidate.phones);

            if changed {
                self.store.update_contact_channels(&existing).await?;
                debug!(contact = %key, "Merged contact channels");
            }

            return Ok(UpsertOutcome {
                is_new: false,
                contact: existing,
            });
        }

        let mut contact = Contact {
            id: Uuid::new_v4(),
            canonical_key: key.clone(),
            display_name: candidate.display_name.trim().to_string(),
            domain: candidate.domain.trim().to_lowercase(),
            work_emails: Vec::new(),
            personal_emails: Vec::new(),
            phones: Vec::new(),
            source: candidate.source,
            first_seen: Utc::now(),
        };
        union_into(&mut contact.work_emails, &candidate.work_emails);
        union_into(&mut contact.personal_emails, &candidate.personal_emails);
        union_into(&mut contact.phones, &candidate.phones);

        match self.store.insert_contact(&contact).await {
            Ok(()) => {
                info!(contact = %key, "Created contact");
                Ok(UpsertOutcome {
                    is_new: true,
                    contact,
                })
            }
            // Lost a race with a concurrent upsert for the same key — the
            // unique index kept the store consistent, re-read and merge.
            Err(StoreError::Constraint(_)) => {
                let existing = self
                    .store
                    .contact_by_key(&key)
                    .await?
                    .ok_or(StoreError::NotFound {
                        entity: "contact".into(),
                        id: key.to_string(),
                    })?;
                Ok(UpsertOutcome {
                    is_new: false,
                    contact: existing,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}
