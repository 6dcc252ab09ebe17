use std::sync::Arc;

use crate::EventEnvelope;

/// Transforms an incoming event before any handler sees it.
///
/// Typical uses are enrichment (copying headers into the payload) and
/// upcasting old schemas. Mutators run in registration order and each one
/// receives the output of the previous one. An error aborts the dispatch
/// attempt as a fatal failure.
pub trait EventMutator: Send {
    fn mutate_incoming(&mut self, event: EventEnvelope) -> anyhow::Result<EventEnvelope>;

    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Builds a mutator for one dispatch scope.
pub type MutatorFactory = Arc<dyn Fn() -> Box<dyn EventMutator> + Send + Sync>;
