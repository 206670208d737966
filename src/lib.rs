//! Outreach engine — event-sourced outreach campaign lifecycle.

pub mod classifier;
pub mod compose;
pub mod config;
pub mod contacts;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod llm;
pub mod mail;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod sweep;
