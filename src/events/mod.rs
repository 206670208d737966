//! Append-only interaction event log.

pub mod log;
pub mod model;

pub use log::EventLog;
pub use model::{
    Event, EventKind, InboundPayload, InterestLevel, NewEvent, OutboundPayload, SendStatus,
};
