//! Event log boundary.
//!
//! The consumer never speaks a log's wire protocol itself; it drives the
//! [`EventLog`] trait. `InMemoryEventLog` implements it for tests and local
//! development.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventLog;
pub use r#trait::{DropCallback, DropReason, EventCallback, EventLog, EventLogError};
