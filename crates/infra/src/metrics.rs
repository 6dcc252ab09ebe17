//! Metrics sink boundary.
//!
//! Emitting metrics to a backend is not this crate's job; lanes and the
//! dispatch engine only report through this trait.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub const EVENTS_QUEUED: &str = "events.queued";
pub const EVENTS_DISPATCHED: &str = "events.dispatched";
pub const EVENTS_FAILED: &str = "events.failed";
pub const EVENTS_DROPPED: &str = "events.dropped";
pub const EVENT_DURATION: &str = "event.duration";
pub const HANDLER_DURATION: &str = "event.handler.duration";

pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &'static str);

    fn decrement(&self, name: &'static str);

    fn observe(&self, name: &'static str, elapsed: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _name: &'static str) {}

    fn decrement(&self, _name: &'static str) {}

    fn observe(&self, _name: &'static str, _elapsed: Duration) {}
}

/// Counters and observation counts kept in memory (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<HashMap<&'static str, i64>>,
    observations: Mutex<HashMap<&'static str, Vec<Duration>>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> i64 {
        self.counters
            .lock()
            .map(|c| c.get(name).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn observations(&self, name: &str) -> usize {
        self.observations
            .lock()
            .map(|o| o.get(name).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    fn add(&self, name: &'static str, delta: i64) {
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry(name).or_insert(0) += delta;
        }
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment(&self, name: &'static str) {
        self.add(name, 1);
    }

    fn decrement(&self, name: &'static str) {
        self.add(name, -1);
    }

    fn observe(&self, name: &'static str, elapsed: Duration) {
        if let Ok(mut observations) = self.observations.lock() {
            observations.entry(name).or_default().push(elapsed);
        }
    }
}
