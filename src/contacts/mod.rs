//! Contact identity — canonical keys, deduplicated contact records.

pub mod model;
pub mod resolver;

pub use model::{CanonicalKey, Contact, ContactCandidate};
pub use resolver::{IdentityResolver, UpsertOutcome, resolve};
