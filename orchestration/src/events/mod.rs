//! Domain events
//!
//! Automations never call each other. They publish events to a durable log
//! and the orchestrator polls it, so no message broker is involved and an
//! event survives a restart of every consumer.

pub mod log;
pub mod types;

pub use log::{EventLog, EventLogError, EventLogResult, SharedEventLog};
pub use types::{Event, EventId, EventType};
