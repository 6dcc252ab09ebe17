//! Event envelopes and the handler-side contracts of the consumer.
//!
//! Everything here is mechanics only: no threads, no IO. The infrastructure
//! crate drives these traits from its worker lanes.

pub mod category;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod headers;
pub mod mutator;
pub mod registry;
pub mod unit_of_work;

pub use category::StreamCategory;
pub use envelope::{EventDescriptor, EventEnvelope};
pub use event::Event;
pub use handler::{EventHandler, HandlerDescriptor, HandlerFactory, HandlerResult};
pub use headers::{EVENT_HEADER_PREFIX, EVENT_ID_HEADER, EVENT_POSITION_HEADER, EVENT_STREAM_HEADER};
pub use mutator::{EventMutator, MutatorFactory};
pub use registry::{HandlerRegistry, InMemoryHandlerRegistry};
pub use unit_of_work::{UnitOfWork, UnitOfWorkFactory};
