use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam::channel::Receiver;
use crossbeam::select;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use eventline_events::EventEnvelope;

use super::lane::{EnqueueOutcome, LaneConfig, LaneQueue};
use super::partition::lane_for;
use crate::ack::Acknowledger;
use crate::dead_letter::DeadLetterSink;
use crate::dispatch::{DispatchError, DispatchOutcome, Dispatcher};
use crate::metrics::{
    MetricsSink, NoopMetrics, EVENTS_DISPATCHED, EVENTS_DROPPED, EVENTS_FAILED, EVENTS_QUEUED,
};
use crate::shutdown::ShutdownSignal;

#[derive(Debug, Error)]
pub enum WorkerPoolError {
    #[error("failed to spawn lane {lane}: {source}")]
    Spawn {
        lane: usize,
        #[source]
        source: std::io::Error,
    },
}

/// Everything a lane worker needs besides its queue; injected at construction.
#[derive(Clone)]
pub struct LaneContext {
    dispatcher: Arc<dyn Dispatcher>,
    acknowledger: Arc<dyn Acknowledger>,
    metrics: Arc<dyn MetricsSink>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
}

impl LaneContext {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, acknowledger: Arc<dyn Acknowledger>) -> Self {
        Self {
            dispatcher,
            acknowledger,
            metrics: Arc::new(NoopMetrics),
            dead_letters: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_dead_letters(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }
}

/// Fixed set of lanes, each a FIFO queue drained by one dedicated thread.
///
/// Events are assigned to lanes by origin stream, so events of one stream
/// are processed one at a time and in arrival order, while different
/// streams proceed in parallel across lanes.
pub struct WorkerPool {
    lanes: Vec<LaneQueue>,
    shutdown: ShutdownSignal,
    metrics: Arc<dyn MetricsSink>,
    joins: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl core::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("lanes", &self.lanes.len())
            .field("cancelled", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Create the lanes and start one worker thread per lane.
    pub fn spawn(
        config: &LaneConfig,
        context: LaneContext,
        shutdown: ShutdownSignal,
    ) -> Result<Self, WorkerPoolError> {
        let count = config.count.max(1);
        let mut lanes = Vec::with_capacity(count);
        let mut joins = Vec::with_capacity(count);

        for index in 0..count {
            let queue = LaneQueue::new(config.capacity, config.overflow, shutdown.receiver());
            let worker = LaneWorker {
                index,
                queue: queue.receiver(),
                shutdown: shutdown.clone(),
                context: context.clone(),
                drain_on_shutdown: config.drain_on_shutdown,
            };

            let spawned = thread::Builder::new()
                .name(format!("eventline-lane-{index}"))
                .spawn(move || worker.run());

            match spawned {
                Ok(join) => joins.push(join),
                Err(source) => {
                    shutdown.cancel();
                    for join in joins {
                        let _ = join.join();
                    }
                    return Err(WorkerPoolError::Spawn { lane: index, source });
                }
            }
            lanes.push(queue);
        }

        Ok(Self {
            lanes,
            shutdown,
            metrics: context.metrics,
            joins: Mutex::new(joins),
        })
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Events waiting in each lane.
    pub fn queue_depths(&self) -> Vec<usize> {
        self.lanes.iter().map(LaneQueue::len).collect()
    }

    /// Ingress: route an event to its lane. Never runs business logic.
    pub fn on_event(&self, envelope: EventEnvelope) -> EnqueueOutcome {
        let lane = lane_for(envelope.stream_id(), self.lanes.len());
        let stream_id = envelope.stream_id().to_string();
        let position = envelope.position();

        let outcome = self.lanes[lane].push(envelope);
        match &outcome {
            EnqueueOutcome::Queued => self.metrics.increment(EVENTS_QUEUED),
            EnqueueOutcome::Rejected(_) => {
                self.metrics.increment(EVENTS_DROPPED);
                warn!(lane, stream_id = %stream_id, position, "lane is full; event rejected");
            }
            EnqueueOutcome::Displaced(oldest) => {
                self.metrics.increment(EVENTS_DROPPED);
                warn!(
                    lane,
                    stream_id = oldest.stream_id(),
                    position = oldest.position(),
                    "lane is full; oldest queued event dropped"
                );
            }
            EnqueueOutcome::Closed => {
                debug!(
                    lane,
                    stream_id = %stream_id,
                    position,
                    "worker pool is shut down; event dropped"
                );
            }
        }
        outcome
    }

    /// Signal shutdown and wait for every lane worker to exit.
    ///
    /// In-flight dispatches complete first. Safe to call more than once.
    pub fn shutdown(&self) {
        self.shutdown.cancel();

        let joins = match self.joins.lock() {
            Ok(mut joins) => std::mem::take(&mut *joins),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for join in joins {
            if join.join().is_err() {
                error!("lane worker terminated abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct LaneWorker {
    index: usize,
    queue: Receiver<EventEnvelope>,
    shutdown: ShutdownSignal,
    context: LaneContext,
    drain_on_shutdown: bool,
}

impl LaneWorker {
    fn run(self) {
        info!(lane = self.index, "lane worker started");
        let cancelled = self.shutdown.receiver();

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            select! {
                recv(self.queue) -> msg => match msg {
                    Ok(envelope) => self.process(envelope),
                    Err(_) => break,
                },
                recv(cancelled) -> _ => break,
            }
        }

        if self.drain_on_shutdown {
            let mut drained = 0usize;
            while let Ok(envelope) = self.queue.try_recv() {
                self.process(envelope);
                drained += 1;
            }
            info!(lane = self.index, drained, "lane drained after shutdown");
        }

        info!(lane = self.index, "lane worker stopped");
    }

    fn process(&self, envelope: EventEnvelope) {
        let ctx = &self.context;
        ctx.metrics.decrement(EVENTS_QUEUED);

        let envelope = envelope.with_delivery_headers();
        debug!(
            lane = self.index,
            stream_id = envelope.stream_id(),
            position = envelope.position(),
            event_type = envelope.event_type(),
            "processing event"
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| ctx.dispatcher.dispatch(&envelope)))
            .unwrap_or_else(|payload| {
                let message = DispatchError::from_panic(payload.as_ref());
                error!(lane = self.index, panic = %message, "dispatch panicked");
                DispatchOutcome::Failed {
                    attempts: 0,
                    error: DispatchError::Panicked(message),
                }
            });

        match outcome {
            DispatchOutcome::Succeeded { .. } => {
                ctx.metrics.increment(EVENTS_DISPATCHED);
                if let Err(e) = ctx.acknowledger.acknowledge(&envelope) {
                    error!(
                        lane = self.index,
                        stream_id = envelope.stream_id(),
                        position = envelope.position(),
                        error = %e,
                        "failed to acknowledge event"
                    );
                }
            }
            DispatchOutcome::Failed { attempts, error } => {
                ctx.metrics.increment(EVENTS_FAILED);
                if let Some(sink) = &ctx.dead_letters {
                    sink.dead_letter(&envelope, &error, attempts);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ack::AcknowledgeError;
    use crate::dead_letter::InMemoryDeadLetterSink;
    use crate::metrics::InMemoryMetrics;
    use crate::workers::OverflowPolicy;
    use crossbeam::channel::{self, Sender};
    use eventline_core::EventId;
    use eventline_events::EVENT_STREAM_HEADER;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn event(stream: &str, position: u64) -> EventEnvelope {
        EventEnvelope::new(EventId::new(), stream, position, "t", json!({"n": position}))
    }

    #[derive(Default)]
    struct RecordingAck {
        acked: Mutex<Vec<(String, u64)>>,
    }

    impl RecordingAck {
        fn acked(&self) -> Vec<(String, u64)> {
            self.acked.lock().unwrap().clone()
        }
    }

    impl Acknowledger for RecordingAck {
        fn acknowledge(&self, envelope: &EventEnvelope) -> Result<(), AcknowledgeError> {
            self.acked
                .lock()
                .unwrap()
                .push((envelope.stream_id().to_string(), envelope.position()));
            Ok(())
        }
    }

    /// Records processing order and overlap per stream.
    #[derive(Default)]
    struct Tracking {
        active: Mutex<HashMap<String, usize>>,
        order: Mutex<Vec<(String, u64)>>,
        overlaps: AtomicUsize,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Dispatcher for Tracking {
        fn dispatch(&self, envelope: &EventEnvelope) -> DispatchOutcome {
            {
                let mut active = self.active.lock().unwrap();
                let n = active.entry(envelope.stream_id().to_string()).or_default();
                if *n > 0 {
                    self.overlaps.fetch_add(1, Ordering::SeqCst);
                }
                *n += 1;
            }
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            thread::sleep(Duration::from_millis(10));
            self.order
                .lock()
                .unwrap()
                .push((envelope.stream_id().to_string(), envelope.position()));

            self.running.fetch_sub(1, Ordering::SeqCst);
            *self
                .active
                .lock()
                .unwrap()
                .get_mut(envelope.stream_id())
                .unwrap() -= 1;
            DispatchOutcome::Succeeded { attempts: 1 }
        }
    }

    /// Blocks every dispatch until released; reports each start.
    struct Gated {
        started: Sender<u64>,
        release: Receiver<()>,
        done: Mutex<Vec<u64>>,
    }

    impl Dispatcher for Gated {
        fn dispatch(&self, envelope: &EventEnvelope) -> DispatchOutcome {
            let _ = self.started.send(envelope.position());
            let _ = self.release.recv();
            self.done.lock().unwrap().push(envelope.position());
            DispatchOutcome::Succeeded { attempts: 1 }
        }
    }

    fn gated() -> (Arc<Gated>, Receiver<u64>, Sender<()>) {
        let (started_tx, started_rx) = channel::unbounded();
        let (release_tx, release_rx) = channel::unbounded();
        let dispatcher = Arc::new(Gated {
            started: started_tx,
            release: release_rx,
            done: Mutex::new(Vec::new()),
        });
        (dispatcher, started_rx, release_tx)
    }

    fn streams_on_distinct_lanes(lanes: usize) -> (String, String) {
        let first = "A-1".to_string();
        let second = (1..)
            .map(|i| format!("B-{i}"))
            .find(|s| lane_for(s, lanes) != lane_for(&first, lanes))
            .unwrap();
        (first, second)
    }

    #[test]
    fn preserves_per_stream_order_without_overlap() {
        let dispatcher = Arc::new(Tracking::default());
        let ack = Arc::new(RecordingAck::default());
        let pool = WorkerPool::spawn(
            &LaneConfig::default().with_count(3),
            LaneContext::new(dispatcher.clone(), ack.clone()),
            ShutdownSignal::new(),
        )
        .unwrap();

        for position in 0..10 {
            for stream in ["A-1", "B-1", "C-1", "D-1"] {
                pool.on_event(event(stream, position));
            }
        }
        pool.shutdown_after_idle();

        let order = dispatcher.order.lock().unwrap().clone();
        assert_eq!(order.len(), 40);
        for stream in ["A-1", "B-1", "C-1", "D-1"] {
            let positions: Vec<u64> = order
                .iter()
                .filter(|(s, _)| s == stream)
                .map(|(_, p)| *p)
                .collect();
            assert_eq!(positions, (0..10).collect::<Vec<_>>());
        }
        assert_eq!(dispatcher.overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(ack.acked().len(), 40);
    }

    #[test]
    fn streams_on_different_lanes_run_concurrently() {
        let (a, b) = streams_on_distinct_lanes(4);
        let dispatcher = Arc::new(Tracking::default());
        let pool = WorkerPool::spawn(
            &LaneConfig::default().with_count(4),
            LaneContext::new(dispatcher.clone(), Arc::new(RecordingAck::default())),
            ShutdownSignal::new(),
        )
        .unwrap();

        for position in 0..5 {
            pool.on_event(event(&a, position));
            pool.on_event(event(&b, position));
        }
        pool.shutdown_after_idle();

        assert_eq!(dispatcher.peak.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failures_are_dead_lettered_not_acknowledged() {
        struct FailOdd;
        impl Dispatcher for FailOdd {
            fn dispatch(&self, envelope: &EventEnvelope) -> DispatchOutcome {
                if envelope.position() % 2 == 1 {
                    DispatchOutcome::Failed {
                        attempts: 4,
                        error: DispatchError::Panicked("odd".into()),
                    }
                } else {
                    DispatchOutcome::Succeeded { attempts: 1 }
                }
            }
        }

        let ack = Arc::new(RecordingAck::default());
        let dead = Arc::new(InMemoryDeadLetterSink::new());
        let metrics = Arc::new(InMemoryMetrics::new());
        let pool = WorkerPool::spawn(
            &LaneConfig::default().with_count(2),
            LaneContext::new(Arc::new(FailOdd), ack.clone())
                .with_dead_letters(dead.clone())
                .with_metrics(metrics.clone()),
            ShutdownSignal::new(),
        )
        .unwrap();

        for position in 0..4 {
            pool.on_event(event("Order-1", position));
        }
        pool.shutdown_after_idle();

        assert_eq!(ack.acked(), vec![("Order-1".to_string(), 0), ("Order-1".to_string(), 2)]);
        let letters = dead.letters();
        assert_eq!(letters.len(), 2);
        assert_eq!(letters[0].attempts, 4);
        assert_eq!(metrics.counter(EVENTS_DISPATCHED), 2);
        assert_eq!(metrics.counter(EVENTS_FAILED), 2);
        assert_eq!(metrics.counter(EVENTS_QUEUED), 0);
    }

    #[test]
    fn dispatcher_panic_does_not_kill_the_lane() {
        struct PanicFirst;
        impl Dispatcher for PanicFirst {
            fn dispatch(&self, envelope: &EventEnvelope) -> DispatchOutcome {
                if envelope.position() == 0 {
                    panic!("first event");
                }
                DispatchOutcome::Succeeded { attempts: 1 }
            }
        }

        let ack = Arc::new(RecordingAck::default());
        let pool = WorkerPool::spawn(
            &LaneConfig::default().with_count(1),
            LaneContext::new(Arc::new(PanicFirst), ack.clone()),
            ShutdownSignal::new(),
        )
        .unwrap();

        pool.on_event(event("S-1", 0));
        pool.on_event(event("S-1", 1));
        pool.shutdown_after_idle();

        assert_eq!(ack.acked(), vec![("S-1".to_string(), 1)]);
    }

    #[test]
    fn delivery_headers_are_stamped_before_dispatch() {
        struct HeaderCheck(Mutex<Vec<Option<String>>>);
        impl Dispatcher for HeaderCheck {
            fn dispatch(&self, envelope: &EventEnvelope) -> DispatchOutcome {
                self.0
                    .lock()
                    .unwrap()
                    .push(envelope.header(EVENT_STREAM_HEADER).map(str::to_string));
                DispatchOutcome::Succeeded { attempts: 1 }
            }
        }

        let dispatcher = Arc::new(HeaderCheck(Mutex::new(Vec::new())));
        let pool = WorkerPool::spawn(
            &LaneConfig::default().with_count(1),
            LaneContext::new(dispatcher.clone(), Arc::new(RecordingAck::default())),
            ShutdownSignal::new(),
        )
        .unwrap();
        pool.on_event(event("Order-7", 0));
        pool.shutdown_after_idle();

        assert_eq!(*dispatcher.0.lock().unwrap(), vec![Some("Order-7".to_string())]);
    }

    #[test]
    fn reject_policy_drops_new_events_when_full() {
        let (dispatcher, started, release) = gated();
        let metrics = Arc::new(InMemoryMetrics::new());
        let pool = WorkerPool::spawn(
            &LaneConfig::default()
                .with_count(1)
                .with_capacity(1)
                .with_overflow(OverflowPolicy::Reject),
            LaneContext::new(dispatcher.clone(), Arc::new(RecordingAck::default()))
                .with_metrics(metrics.clone()),
            ShutdownSignal::new(),
        )
        .unwrap();

        assert_eq!(pool.on_event(event("S-1", 0)), EnqueueOutcome::Queued);
        assert_eq!(started.recv_timeout(Duration::from_secs(5)).unwrap(), 0);
        assert_eq!(pool.on_event(event("S-1", 1)), EnqueueOutcome::Queued);
        assert!(matches!(pool.on_event(event("S-1", 2)), EnqueueOutcome::Rejected(_)));

        drop(release);
        pool.shutdown_after_idle();

        assert_eq!(*dispatcher.done.lock().unwrap(), vec![0, 1]);
        assert_eq!(metrics.counter(EVENTS_DROPPED), 1);
    }

    #[test]
    fn drop_oldest_policy_keeps_the_newest() {
        let (dispatcher, started, release) = gated();
        let pool = WorkerPool::spawn(
            &LaneConfig::default()
                .with_count(1)
                .with_capacity(1)
                .with_overflow(OverflowPolicy::DropOldest),
            LaneContext::new(dispatcher.clone(), Arc::new(RecordingAck::default())),
            ShutdownSignal::new(),
        )
        .unwrap();

        pool.on_event(event("S-1", 0));
        started.recv_timeout(Duration::from_secs(5)).unwrap();
        pool.on_event(event("S-1", 1));
        assert!(matches!(
            pool.on_event(event("S-1", 2)),
            EnqueueOutcome::Displaced(e) if e.position() == 1
        ));

        drop(release);
        pool.shutdown_after_idle();

        assert_eq!(*dispatcher.done.lock().unwrap(), vec![0, 2]);
    }

    #[test]
    fn shutdown_leaves_queued_events_unless_draining() {
        for (drain, expected) in [(false, vec![0]), (true, vec![0, 1, 2])] {
            let (dispatcher, started, release) = gated();
            let signal = ShutdownSignal::new();
            let pool = WorkerPool::spawn(
                &LaneConfig::default().with_count(1).with_drain_on_shutdown(drain),
                LaneContext::new(dispatcher.clone(), Arc::new(RecordingAck::default())),
                signal.clone(),
            )
            .unwrap();

            pool.on_event(event("S-1", 0));
            started.recv_timeout(Duration::from_secs(5)).unwrap();
            pool.on_event(event("S-1", 1));
            pool.on_event(event("S-1", 2));

            signal.cancel();
            drop(release);
            pool.shutdown();

            assert_eq!(*dispatcher.done.lock().unwrap(), expected, "drain = {drain}");
            assert_eq!(pool.on_event(event("S-1", 3)), EnqueueOutcome::Closed);
        }
    }

    impl WorkerPool {
        /// Wait until every lane queue is empty and then shut down.
        fn shutdown_after_idle(&self) {
            let deadline = std::time::Instant::now() + Duration::from_secs(10);
            while self.queue_depths().iter().any(|d| *d > 0)
                && std::time::Instant::now() < deadline
            {
                thread::sleep(Duration::from_millis(5));
            }
            self.shutdown.cancel();
            // The last dequeued event may still be in flight; shutdown joins it.
            self.shutdown();
        }
    }
}
