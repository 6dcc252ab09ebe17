//! Identity and versioning primitives shared by the consumer crates.
//!
//! This crate has no infrastructure concerns: it only knows how an endpoint is
//! named, how its schema version is interpreted and how events are identified.

pub mod endpoint;
pub mod error;
pub mod id;

pub use endpoint::{Endpoint, SchemaVersion};
pub use error::{CoreError, CoreResult};
pub use id::EventId;
