//! Contact records and canonical identity keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Normalized unique identifier for a contact, derived from its source URL
/// or email address. Constructed only by `resolver::resolve`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalKey(pub(crate) String);

impl CanonicalKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rehydrate a key that was previously stored.
    ///
    /// Only for values read back from the store — new keys go through
    /// `resolver::resolve`.
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl std::fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A deduplicated contact record.
///
/// `canonical_key` is unique. Name, domain and source are first-write-wins;
/// email and phone sets are unioned across sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub canonical_key: CanonicalKey,
    pub display_name: String,
    /// Industry/domain tag (e.g. "edtech", "health").
    pub domain: String,
    pub work_emails: Vec<String>,
    pub personal_emails: Vec<String>,
    pub phones: Vec<String>,
    /// Where this contact first came from (upstream producer attribution).
    pub source: String,
    pub first_seen: DateTime<Utc>,
}

impl Contact {
    /// Preferred delivery address: first work email, then first personal.
    pub fn best_email(&self) -> Option<&str> {
        self.work_emails
            .first()
            .or_else(|| self.personal_emails.first())
            .map(String::as_str)
    }

    /// Whether `address` is one of this contact's known emails.
    pub fn has_email(&self, address: &str) -> bool {
        let needle = address.to_lowercase();
        self.work_emails
            .iter()
            .chain(self.personal_emails.iter())
            .any(|e| e.to_lowercase() == needle)
    }
}

/// Input to `IdentityResolver::upsert` — a contact as seen by an upstream
/// producer, before identity resolution.
#[derive(Debug, Clone, Default)]
pub struct ContactCandidate {
    /// Raw identifier (source URL or email) to be canonicalized.
    pub raw_identifier: String,
    pub display_name: String,
    pub domain: String,
    pub work_emails: Vec<String>,
    pub personal_emails: Vec<String>,
    pub phones: Vec<String>,
    pub source: String,
}

/// Merge `incoming` into `existing`, preserving order and dropping
/// duplicates case-insensitively.
pub(crate) fn union_into(existing: &mut Vec<String>, incoming: &[String]) -> bool {
    let mut changed = false;
    for item in incoming {
        let trimmed = item.trim();
        if trimmed.is_empty() {
            continue;
        }
        let exists = existing
            .iter()
            .any(|e| e.eq_ignore_ascii_case(trimmed));
        if !exists {
            existing.push(trimmed.to_string());
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact_with_emails(work: &[&str], personal: &[&str]) -> Contact {
        Contact {
            id: Uuid::new_v4(),
            canonical_key: CanonicalKey::from_stored("https://example.com"),
            display_name: "Example".into(),
            domain: "general".into(),
            work_emails: work.iter().map(|s| s.to_string()).collect(),
            personal_emails: personal.iter().map(|s| s.to_string()).collect(),
            phones: vec![],
            source: "test".into(),
            first_seen: Utc::now(),
        }
    }

    #[test]
    fn best_email_prefers_work() {
        let contact = contact_with_emails(&["info@example.com"], &["me@gmail.com"]);
        assert_eq!(contact.best_email(), Some("info@example.com"));
    }

    #[test]
    fn best_email_falls_back_to_personal() {
        let contact = contact_with_emails(&[], &["me@gmail.com"]);
        assert_eq!(contact.best_email(), Some("me@gmail.com"));
    }

    #[test]
    fn best_email_none_when_no_addresses() {
        let contact = contact_with_emails(&[], &[]);
        assert_eq!(contact.best_email(), None);
    }

    #[test]
    fn has_email_is_case_insensitive() {
        let contact = contact_with_emails(&["Info@Example.com"], &[]);
        assert!(contact.has_email("info@example.com"));
        assert!(!contact.has_email("other@example.com"));
    }

    #[test]
    fn union_dedups_case_insensitively() {
        let mut emails = vec!["info@example.com".to_string()];
        let changed = union_into(
            &mut emails,
            &["INFO@example.com".into(), "sales@example.com".into()],
        );
        assert!(changed);
        assert_eq!(emails, vec!["info@example.com", "sales@example.com"]);
    }

    #[test]
    fn union_skips_blank_entries() {
        let mut emails: Vec<String> = vec![];
        let changed = union_into(&mut emails, &["  ".into(), "".into()]);
        assert!(!changed);
        assert!(emails.is_empty());
    }
}
