//! The transaction event log: schema and durable emitter.

pub mod emitter;
pub mod types;

pub use emitter::{EventFlusher, EventSender};
pub use types::{Actor, BottleResult, Event, EventPayload, Hierarchy, RejectReason, Validation};
