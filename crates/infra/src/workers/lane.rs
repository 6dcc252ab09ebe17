use core::str::FromStr;

use crossbeam::channel::{self, Receiver, Sender, TryRecvError, TrySendError};
use crossbeam::select;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use eventline_events::EventEnvelope;

/// What to do when a bounded lane is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Ingress waits for room (or for shutdown).
    #[default]
    Block,
    /// The new event is dropped.
    Reject,
    /// The oldest queued event is dropped to make room.
    DropOldest,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown overflow policy '{0}' (expected block, reject or drop_oldest)")]
pub struct ParseOverflowPolicyError(String);

impl FromStr for OverflowPolicy {
    type Err = ParseOverflowPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "reject" => Ok(Self::Reject),
            "drop_oldest" | "drop-oldest" => Ok(Self::DropOldest),
            other => Err(ParseOverflowPolicyError(other.to_string())),
        }
    }
}

/// Lane pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneConfig {
    /// Number of lanes (and worker threads)
    pub count: usize,
    /// Per-lane queue capacity; `None` is unbounded
    pub capacity: Option<usize>,
    pub overflow: OverflowPolicy,
    /// Dispatch what is still queued after shutdown before the lane exits
    pub drain_on_shutdown: bool,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            count: 4,
            capacity: None,
            overflow: OverflowPolicy::Block,
            drain_on_shutdown: false,
        }
    }
}

impl LaneConfig {
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count.max(1);
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity.max(1));
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn with_drain_on_shutdown(mut self, drain: bool) -> Self {
        self.drain_on_shutdown = drain;
        self
    }
}

/// Result of handing an event to a lane.
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    Queued,
    /// The lane was full; the returned event was not queued.
    Rejected(EventEnvelope),
    /// The new event was queued after evicting the returned one.
    Displaced(EventEnvelope),
    /// The pool is shutting down; the event was not queued.
    Closed,
}

/// FIFO queue of one lane.
///
/// The queue keeps its own receiver so `DropOldest` can evict from the front.
#[derive(Debug, Clone)]
pub(crate) struct LaneQueue {
    tx: Sender<EventEnvelope>,
    rx: Receiver<EventEnvelope>,
    overflow: OverflowPolicy,
    shutdown: Receiver<()>,
}

impl LaneQueue {
    pub(crate) fn new(
        capacity: Option<usize>,
        overflow: OverflowPolicy,
        shutdown: Receiver<()>,
    ) -> Self {
        let (tx, rx) = match capacity {
            Some(capacity) => channel::bounded(capacity.max(1)),
            None => channel::unbounded(),
        };
        Self {
            tx,
            rx,
            overflow,
            shutdown,
        }
    }

    pub(crate) fn receiver(&self) -> Receiver<EventEnvelope> {
        self.rx.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }

    pub(crate) fn push(&self, envelope: EventEnvelope) -> EnqueueOutcome {
        if let Err(TryRecvError::Disconnected) = self.shutdown.try_recv() {
            return EnqueueOutcome::Closed;
        }

        match self.overflow {
            OverflowPolicy::Block => select! {
                send(self.tx, envelope) -> sent => match sent {
                    Ok(()) => EnqueueOutcome::Queued,
                    Err(_) => EnqueueOutcome::Closed,
                },
                recv(self.shutdown) -> _ => EnqueueOutcome::Closed,
            },
            OverflowPolicy::Reject => match self.tx.try_send(envelope) {
                Ok(()) => EnqueueOutcome::Queued,
                Err(TrySendError::Full(envelope)) => EnqueueOutcome::Rejected(envelope),
                Err(TrySendError::Disconnected(_)) => EnqueueOutcome::Closed,
            },
            OverflowPolicy::DropOldest => {
                let mut envelope = envelope;
                let mut displaced = None;
                loop {
                    match self.tx.try_send(envelope) {
                        Ok(()) => {
                            return displaced
                                .map_or(EnqueueOutcome::Queued, EnqueueOutcome::Displaced);
                        }
                        Err(TrySendError::Full(back)) => {
                            envelope = back;
                            if let Ok(oldest) = self.rx.try_recv() {
                                displaced = Some(oldest);
                            }
                        }
                        Err(TrySendError::Disconnected(_)) => return EnqueueOutcome::Closed,
                    }
                }
            }
        }
    }
}
