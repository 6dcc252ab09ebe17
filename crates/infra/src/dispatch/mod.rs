//! Per-event dispatch: handler resolution, mutators, units of work and retries.

pub mod cache;
pub mod engine;
pub mod error;

pub use cache::HandlerCache;
pub use engine::{DispatchConfig, DispatchEngine, DispatchOutcome, Dispatcher};
pub use error::DispatchError;
