//! Confirming processed events back to the log.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use eventline_events::EventEnvelope;

use crate::event_log::{EventLog, EventLogError};

#[derive(Debug, Error)]
pub enum AcknowledgeError {
    #[error(transparent)]
    Log(#[from] EventLogError),
}

/// Confirms one successfully dispatched event.
///
/// Lanes call this strictly after a successful dispatch of that exact
/// envelope and never on failure.
pub trait Acknowledger: Send + Sync {
    fn acknowledge(&self, envelope: &EventEnvelope) -> Result<(), AcknowledgeError>;
}

impl<A> Acknowledger for Arc<A>
where
    A: Acknowledger + ?Sized,
{
    fn acknowledge(&self, envelope: &EventEnvelope) -> Result<(), AcknowledgeError> {
        (**self).acknowledge(envelope)
    }
}

/// Acknowledges `(stream_id, position)` on the event log.
#[derive(Debug, Clone)]
pub struct LogAcknowledger<L> {
    log: L,
}

impl<L: EventLog> LogAcknowledger<L> {
    pub fn new(log: L) -> Self {
        Self { log }
    }
}

impl<L: EventLog> Acknowledger for LogAcknowledger<L> {
    fn acknowledge(&self, envelope: &EventEnvelope) -> Result<(), AcknowledgeError> {
        debug!(
            stream_id = envelope.stream_id(),
            position = envelope.position(),
            "acknowledging event"
        );
        self.log
            .acknowledge(envelope.stream_id(), envelope.position(), envelope)?;
        Ok(())
    }
}
