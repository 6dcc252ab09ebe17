use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use eventline_events::{
    EventEnvelope, EventHandler, EventMutator, HandlerDescriptor, HandlerRegistry, HandlerResult,
    MutatorFactory, UnitOfWork, UnitOfWorkFactory,
};

use super::cache::HandlerCache;
use super::error::DispatchError;
use crate::metrics::{MetricsSink, NoopMetrics, EVENT_DURATION, HANDLER_DURATION};
use crate::retry::RetryPolicy;

/// Dispatch engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Handlers of one event invoked concurrently (1 = one after another)
    pub handler_parallelism: usize,
    /// Extra invocations of a handler that returned `Retry`
    pub handler_retries: u32,
    /// Attempts and delay for the whole per-event dispatch
    pub retry: RetryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            handler_parallelism: 1,
            handler_retries: 3,
            retry: RetryPolicy::default(),
        }
    }
}

impl DispatchConfig {
    pub fn with_handler_parallelism(mut self, parallelism: usize) -> Self {
        self.handler_parallelism = parallelism.max(1);
        self
    }

    pub fn with_handler_retries(mut self, retries: u32) -> Self {
        self.handler_retries = retries;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Result of dispatching one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Succeeded { attempts: u32 },
    Failed { attempts: u32, error: DispatchError },
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts } | Self::Failed { attempts, .. } => *attempts,
        }
    }
}

/// Processes one event to completion; what a lane worker calls per event.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, envelope: &EventEnvelope) -> DispatchOutcome;
}

impl<D> Dispatcher for Arc<D>
where
    D: Dispatcher + ?Sized,
{
    fn dispatch(&self, envelope: &EventEnvelope) -> DispatchOutcome {
        (**self).dispatch(envelope)
    }
}

/// Resolves, mutates, brackets and invokes handlers for one event, with retries.
///
/// Each attempt starts again from the envelope as it was delivered: mutators
/// and units of work are created fresh from their factories and handlers are
/// instantiated anew. Units of work begin and end in registration order.
pub struct DispatchEngine {
    registry: Arc<dyn HandlerRegistry>,
    cache: HandlerCache,
    mutators: Vec<MutatorFactory>,
    units_of_work: Vec<UnitOfWorkFactory>,
    config: DispatchConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl core::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("cached_event_types", &self.cache.len())
            .field("mutators", &self.mutators.len())
            .field("units_of_work", &self.units_of_work.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DispatchEngine {
    pub fn new<R>(registry: R) -> Self
    where
        R: HandlerRegistry + 'static,
    {
        Self {
            registry: Arc::new(registry),
            cache: HandlerCache::new(),
            mutators: Vec::new(),
            units_of_work: Vec::new(),
            config: DispatchConfig::default(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Append an incoming mutator; mutators run in the order they were added.
    pub fn with_mutator<M, F>(mut self, factory: F) -> Self
    where
        M: EventMutator + 'static,
        F: Fn() -> M + Send + Sync + 'static,
    {
        self.mutators
            .push(Arc::new(move || Box::new(factory()) as Box<dyn EventMutator>));
        self
    }

    /// Append a unit of work; units begin and end in the order they were added.
    pub fn with_unit_of_work<U, F>(mut self, factory: F) -> Self
    where
        U: UnitOfWork + 'static,
        F: Fn() -> U + Send + Sync + 'static,
    {
        self.units_of_work
            .push(Arc::new(move || Box::new(factory()) as Box<dyn UnitOfWork>));
        self
    }

    pub fn registry(&self) -> &dyn HandlerRegistry {
        self.registry.as_ref()
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// One attempt from the delivered envelope. `mutated` receives the event
    /// the handlers see once mutation succeeded.
    fn run_attempt(
        &self,
        delivered: &EventEnvelope,
        handlers: &[HandlerDescriptor],
        mutated: &mut Option<EventEnvelope>,
    ) -> Result<(), DispatchError> {
        let event = self.mutate(delivered.clone())?;
        *mutated = Some(event.clone());

        let mut units: Vec<Box<dyn UnitOfWork>> = Vec::with_capacity(self.units_of_work.len());
        for factory in &self.units_of_work {
            let mut unit = factory();
            if let Err(message) = guarded(|| unit.begin()) {
                let failure = DispatchError::UnitOfWorkBegin {
                    unit: unit.name().to_string(),
                    message,
                };
                // Units begun so far still get their end call.
                let _ = self.end_units(&mut units, Some(&failure));
                return Err(failure);
            }
            units.push(unit);
        }

        let result = self.invoke_handlers(&event, handlers);
        let ended = self.end_units(&mut units, result.as_ref().err());
        result.and(ended)
    }

    fn mutate(&self, mut event: EventEnvelope) -> Result<EventEnvelope, DispatchError> {
        for factory in &self.mutators {
            let mut mutator = factory();
            debug!(
                mutator = mutator.name(),
                event_type = event.event_type(),
                "mutating incoming event"
            );
            event = guarded(|| mutator.mutate_incoming(event)).map_err(|message| {
                DispatchError::Mutator {
                    mutator: mutator.name().to_string(),
                    message,
                }
            })?;
        }
        Ok(event)
    }

    /// End every unit in registration order. Returns the first end failure.
    fn end_units(
        &self,
        units: &mut [Box<dyn UnitOfWork>],
        failure: Option<&DispatchError>,
    ) -> Result<(), DispatchError> {
        let mut first_error = None;
        for unit in units.iter_mut() {
            let outcome = failure.map(|e| e as &(dyn std::error::Error + 'static));
            if let Err(message) = guarded(|| unit.end(outcome)) {
                error!(unit = unit.name(), error = %message, "unit of work failed to end");
                first_error.get_or_insert(DispatchError::UnitOfWorkEnd {
                    unit: unit.name().to_string(),
                    message,
                });
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn invoke_handlers(
        &self,
        event: &EventEnvelope,
        handlers: &[HandlerDescriptor],
    ) -> Result<(), DispatchError> {
        let workers = self.config.handler_parallelism.min(handlers.len());
        if workers <= 1 {
            return handlers
                .iter()
                .try_for_each(|descriptor| self.invoke_handler(event, descriptor));
        }

        let next = AtomicUsize::new(0);
        let failed = AtomicBool::new(false);
        let errors: Mutex<Vec<(usize, DispatchError)>> = Mutex::new(Vec::new());

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    while !failed.load(Ordering::SeqCst) {
                        let idx = next.fetch_add(1, Ordering::SeqCst);
                        let Some(descriptor) = handlers.get(idx) else {
                            break;
                        };
                        if let Err(e) = self.invoke_handler(event, descriptor) {
                            failed.store(true, Ordering::SeqCst);
                            if let Ok(mut errors) = errors.lock() {
                                errors.push((idx, e));
                            }
                        }
                    }
                });
            }
        });

        let mut errors = errors.into_inner().unwrap_or_else(|p| p.into_inner());
        errors.sort_by_key(|(idx, _)| *idx);
        errors.into_iter().next().map_or(Ok(()), |(_, e)| Err(e))
    }

    fn invoke_handler(
        &self,
        event: &EventEnvelope,
        descriptor: &HandlerDescriptor,
    ) -> Result<(), DispatchError> {
        let handler_type = descriptor.handler_type();
        let panicked = |payload: Box<dyn std::any::Any + Send>| {
            let message = DispatchError::from_panic(payload.as_ref());
            error!(handler = handler_type, panic = %message, "handler panicked");
            DispatchError::HandlerPanicked {
                handler: handler_type.to_string(),
                message,
            }
        };

        let handler: Box<dyn EventHandler> =
            panic::catch_unwind(AssertUnwindSafe(|| descriptor.instantiate())).map_err(panicked)?;

        let mut invocations = 0u32;
        loop {
            invocations += 1;
            let started = Instant::now();
            let result = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event)));
            self.metrics.observe(HANDLER_DURATION, started.elapsed());

            match result.map_err(panicked)? {
                HandlerResult::Success => return Ok(()),
                HandlerResult::Retry(reason) => {
                    if invocations > self.config.handler_retries {
                        return Err(DispatchError::HandlerRetriesExhausted {
                            handler: handler_type.to_string(),
                            invocations,
                            reason,
                        });
                    }
                    info!(
                        handler = handler_type,
                        invocation = invocations,
                        reason = %reason,
                        "handler requested a retry"
                    );
                }
                HandlerResult::Fatal(e) => {
                    error!(handler = handler_type, error = %format!("{e:#}"), "handler failed");
                    return Err(DispatchError::HandlerFailed {
                        handler: handler_type.to_string(),
                        message: format!("{e:#}"),
                    });
                }
            }
        }
    }
}

/// Run a mutator or unit-of-work call, turning an error or a panic into a message.
fn guarded<T, E>(call: impl FnOnce() -> Result<T, E>) -> Result<T, String>
where
    E: core::fmt::Display,
{
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(payload) => Err(format!("panicked: {}", DispatchError::from_panic(payload.as_ref()))),
    }
}

impl Dispatcher for DispatchEngine {
    fn dispatch(&self, envelope: &EventEnvelope) -> DispatchOutcome {
        let started = Instant::now();
        let handlers = self.cache.resolve(self.registry.as_ref(), envelope.event_type());
        let policy = &self.config.retry;

        debug!(
            stream_id = envelope.stream_id(),
            position = envelope.position(),
            event_type = envelope.event_type(),
            handlers = handlers.len(),
            "dispatching event"
        );

        let mut retries = 0u32;
        let outcome = loop {
            let attempt = retries + 1;
            let mut mutated = None;
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                self.run_attempt(envelope, &handlers, &mut mutated)
            }))
            .unwrap_or_else(|payload| {
                Err(DispatchError::Panicked(DispatchError::from_panic(payload.as_ref())))
            });

            let error = match result {
                Ok(()) => break DispatchOutcome::Succeeded { attempts: attempt },
                Err(error) => error,
            };

            if error.is_retryable() {
                warn!(
                    stream_id = envelope.stream_id(),
                    position = envelope.position(),
                    event_type = envelope.event_type(),
                    attempt,
                    error = %error,
                    "dispatch attempt failed with a retryable error"
                );
            } else {
                error!(
                    stream_id = envelope.stream_id(),
                    position = envelope.position(),
                    event_type = envelope.event_type(),
                    attempt,
                    error = %error,
                    "dispatch attempt failed"
                );
            }

            if !policy.should_retry(retries) {
                let seen = mutated.as_ref().unwrap_or(envelope);
                let payload = serde_json::to_string(seen)
                    .unwrap_or_else(|e| format!("<unserializable envelope: {e}>"));
                error!(
                    stream_id = envelope.stream_id(),
                    position = envelope.position(),
                    event_type = envelope.event_type(),
                    attempts = attempt,
                    error = %error,
                    payload = %payload,
                    "event dispatch failed terminally"
                );
                break DispatchOutcome::Failed {
                    attempts: attempt,
                    error,
                };
            }

            retries += 1;
            thread::sleep(policy.delay_for_retry(retries));
        };

        self.metrics.observe(EVENT_DURATION, started.elapsed());
        outcome
    }
}
