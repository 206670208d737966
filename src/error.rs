//! Error types for the outreach engine.

use std::time::Duration;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Contact identity resolution errors.
///
/// Resolution failures never create a contact record.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("empty identifier")]
    Empty,

    #[error("unparseable identifier: {0:?}")]
    Unparseable(String),
}

/// Persistence errors.
///
/// These are fatal for the current sweep: the remaining cycle aborts
/// cleanly rather than silently skipping contacts.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mail transport errors.
///
/// A send failure is recorded as a `failed`-status event; the contact is
/// retried only through the next sweep's normal follow-up path.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to send to {to}: {reason}")]
    SendFailed { to: String, reason: String },

    #[error("Inbound fetch failed: {0}")]
    FetchFailed(String),

    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Transport call timed out after {0:?}")]
    Timeout(Duration),
}

/// LLM provider errors.
///
/// Classification failures are always caught inside the classifier and
/// substituted by the keyword fallback; they never cross the sweep boundary.
/// Composition failures likewise fall back to templates.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
