//! One-stop consumer for an endpoint: routing setup, subscription and lanes.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::info;

use eventline_events::EventEnvelope;

use crate::ack::{Acknowledger, LogAcknowledger};
use crate::config::ConsumerConfig;
use crate::connector::{ConnectorError, SubscriptionConnector};
use crate::dead_letter::DeadLetterSink;
use crate::dispatch::DispatchEngine;
use crate::event_log::{EventCallback, EventLog, EventLogError};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::routing::{SetupOutcome, StreamRouter, SubscriptionTarget};
use crate::shutdown::ShutdownSignal;
use crate::workers::{LaneContext, WorkerPool, WorkerPoolError};

#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("routing setup failed: {0}")]
    Setup(#[from] EventLogError),

    #[error(transparent)]
    Connect(#[from] ConnectorError),

    #[error(transparent)]
    Workers(#[from] WorkerPoolError),

    #[error("event subscriber is already running")]
    AlreadyRunning,
}

struct Running<L> {
    signal: ShutdownSignal,
    pool: Arc<WorkerPool>,
    connector: SubscriptionConnector<L>,
}

/// Consumes an endpoint's routed stream through a [`DispatchEngine`].
///
/// `setup` installs the routing, `connect` starts the lanes and the durable
/// subscription, `shutdown` stops both. The dispatch settings of the
/// [`ConsumerConfig`] replace the engine's own.
pub struct EventSubscriber<L: EventLog + 'static> {
    config: ConsumerConfig,
    log: Arc<L>,
    engine: Arc<DispatchEngine>,
    acknowledger: Arc<dyn Acknowledger>,
    metrics: Arc<dyn MetricsSink>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    running: Mutex<Option<Running<L>>>,
}

impl<L: EventLog + 'static> core::fmt::Debug for EventSubscriber<L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventSubscriber")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl<L: EventLog + 'static> EventSubscriber<L> {
    pub fn new(config: ConsumerConfig, log: Arc<L>, engine: DispatchEngine) -> Self {
        let engine = Arc::new(engine.with_config(config.dispatch.clone()));
        Self {
            acknowledger: Arc::new(LogAcknowledger::new(log.clone())),
            config,
            log,
            engine,
            metrics: Arc::new(NoopMetrics),
            dead_letters: None,
            running: Mutex::new(None),
        }
    }

    pub fn with_acknowledger(mut self, acknowledger: Arc<dyn Acknowledger>) -> Self {
        self.acknowledger = acknowledger;
        self
    }

    /// Metrics for the lanes; the engine reports through its own sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_dead_letters(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn target(&self) -> SubscriptionTarget {
        SubscriptionTarget::new(self.config.endpoint.clone(), self.config.version)
    }

    /// Install routing for every event type the engine's registry knows.
    pub fn setup(&self) -> Result<SetupOutcome, SubscriberError> {
        let event_types = self.engine.registry().event_types();
        let outcome = StreamRouter::new(self.log.clone()).setup(
            &self.config.endpoint,
            self.config.version,
            &event_types,
        )?;
        Ok(outcome)
    }

    /// Start the lanes, then open the subscription feeding them.
    pub fn connect(&self) -> Result<(), SubscriberError> {
        let mut running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if running.is_some() {
            return Err(SubscriberError::AlreadyRunning);
        }

        let signal = ShutdownSignal::new();
        let mut context = LaneContext::new(self.engine.clone(), self.acknowledger.clone())
            .with_metrics(self.metrics.clone());
        if let Some(sink) = &self.dead_letters {
            context = context.with_dead_letters(sink.clone());
        }
        let pool = Arc::new(WorkerPool::spawn(&self.config.lanes, context, signal.clone())?);

        let connector = SubscriptionConnector::new(
            self.log.clone(),
            self.target(),
            self.config.reconnect.clone(),
            signal.clone(),
        );
        let ingress: EventCallback = {
            let pool = pool.clone();
            Arc::new(move |envelope: EventEnvelope| {
                pool.on_event(envelope);
            })
        };

        if let Err(e) = connector.connect(ingress) {
            pool.shutdown();
            return Err(e.into());
        }

        info!(
            endpoint = %self.config.endpoint,
            version = %self.config.version,
            lanes = pool.lane_count(),
            "event subscriber connected"
        );
        *running = Some(Running {
            signal,
            pool,
            connector,
        });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|r| r.is_some())
            .unwrap_or(false)
    }

    /// Stop consuming: close the subscription, then join every lane.
    ///
    /// In-flight events finish; queued ones are dispatched only when
    /// `drain_on_shutdown` is set. Calling it when not running is a no-op.
    pub fn shutdown(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(running) = running {
            running.signal.cancel();
            running.connector.shutdown();
            running.pool.shutdown();
            info!(endpoint = %self.config.endpoint, "event subscriber stopped");
        }
    }
}

impl<L: EventLog + 'static> Drop for EventSubscriber<L> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
