//! Where terminally failed events are reported.
//!
//! Dead-lettering is informational: the event stays unacknowledged on the log
//! and will be delivered again after a reconnect or restart.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use eventline_events::EventEnvelope;

use crate::dispatch::DispatchError;

pub trait DeadLetterSink: Send + Sync {
    fn dead_letter(&self, envelope: &EventEnvelope, error: &DispatchError, attempts: u32);
}

impl<S> DeadLetterSink for Arc<S>
where
    S: DeadLetterSink + ?Sized,
{
    fn dead_letter(&self, envelope: &EventEnvelope, error: &DispatchError, attempts: u32) {
        (**self).dead_letter(envelope, error, attempts)
    }
}

/// A terminally failed event.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub envelope: EventEnvelope,
    pub error: DispatchError,
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Keeps dead letters in memory.
///
/// Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterSink {
    letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default()
    }
}

impl DeadLetterSink for InMemoryDeadLetterSink {
    fn dead_letter(&self, envelope: &EventEnvelope, error: &DispatchError, attempts: u32) {
        if let Ok(mut letters) = self.letters.lock() {
            letters.push(DeadLetter {
                envelope: envelope.clone(),
                error: error.clone(),
                attempts,
                dead_lettered_at: Utc::now(),
            });
        }
    }
}
