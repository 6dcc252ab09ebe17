//! Live, unacknowledged subscription to every event in the log.

use std::sync::Arc;

use tracing::debug;

use eventline_events::EventEnvelope;

use crate::dispatch::Dispatcher;
use crate::event_log::{DropCallback, DropReason, EventCallback, EventLog, EventLogError};

/// Dispatches every event appended from now on, inline on the delivering
/// thread.
///
/// Nothing is acknowledged and nothing is redelivered: events missed while
/// not subscribed are gone. Events without a payload are skipped.
#[derive(Debug, Clone)]
pub struct VolatileSubscriber<L> {
    log: L,
}

impl<L: EventLog> VolatileSubscriber<L> {
    pub fn new(log: L) -> Self {
        Self { log }
    }

    pub fn subscribe_to_all<D>(&self, dispatcher: D) -> Result<(), EventLogError>
    where
        D: Dispatcher + 'static,
    {
        let on_event: EventCallback = Arc::new(move |envelope: EventEnvelope| {
            if envelope.payload().is_null() {
                return;
            }
            dispatcher.dispatch(&envelope);
        });
        let on_drop: DropCallback = Arc::new(|reason: DropReason| {
            debug!(reason = %reason, "volatile subscription dropped");
        });

        self.log.subscribe_to_all(on_event, on_drop)?;
        debug!("live processing started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchOutcome;
    use crate::event_log::InMemoryEventLog;
    use eventline_events::StreamCategory;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<u64>>);

    impl Dispatcher for Recording {
        fn dispatch(&self, envelope: &EventEnvelope) -> DispatchOutcome {
            self.0.lock().unwrap().push(envelope.position());
            DispatchOutcome::Succeeded { attempts: 1 }
        }
    }

    #[test]
    fn dispatches_live_events_and_never_acknowledges() {
        let log = Arc::new(InMemoryEventLog::new());
        log.append("S-1", "t", StreamCategory::Domain, json!({"before": true}));

        let dispatcher = Arc::new(Recording::default());
        VolatileSubscriber::new(log.clone())
            .subscribe_to_all(dispatcher.clone())
            .unwrap();

        log.append("S-1", "t", StreamCategory::Domain, json!({"a": 1}));
        log.append("S-1", "t", StreamCategory::Oob, json!(null));
        log.append("S-1", "t", StreamCategory::Poco, json!({"b": 2}));

        assert_eq!(*dispatcher.0.lock().unwrap(), vec![1, 3]);
        assert!(log.acknowledged().is_empty());
    }

    #[test]
    fn drops_are_only_logged() {
        let log = Arc::new(InMemoryEventLog::new());
        let dispatcher = Arc::new(Recording::default());
        VolatileSubscriber::new(log.clone())
            .subscribe_to_all(dispatcher.clone())
            .unwrap();

        log.drop_subscriptions(DropReason::ConnectionClosed);
        log.append("S-1", "t", StreamCategory::Domain, json!({}));

        assert!(dispatcher.0.lock().unwrap().is_empty());
        assert_eq!(log.opens(), 0);
    }
}
