//! Durable subscription on the routed stream, kept open across drops.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver};
use crossbeam::select;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::event_log::{DropCallback, DropReason, EventCallback, EventLog, EventLogError};
use crate::retry::RetryPolicy;
use crate::routing::SubscriptionTarget;
use crate::shutdown::ShutdownSignal;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("failed to open subscription {stream}::{group}: {source}")]
    Open {
        stream: String,
        group: String,
        #[source]
        source: EventLogError,
    },

    #[error("subscription connector is already connected")]
    AlreadyConnected,

    #[error("failed to spawn reconnect supervisor: {0}")]
    Spawn(#[source] std::io::Error),
}

/// How a dropped subscription is re-opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Attempts per drop before giving up; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Wait before reconnect attempt `attempt` (1-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        RetryPolicy::exponential(u32::MAX, self.base_delay, self.max_delay).delay_for_retry(attempt)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt > max)
    }
}

/// Opens the durable subscription for a [`SubscriptionTarget`] and re-opens
/// it under the same `(stream, group)` whenever the log drops it.
///
/// The log resumes the group after its last acknowledged event, so events
/// that were in flight during a drop are delivered again.
pub struct SubscriptionConnector<L> {
    log: Arc<L>,
    target: SubscriptionTarget,
    policy: ReconnectPolicy,
    shutdown: ShutdownSignal,
    supervisor: Mutex<Option<thread::JoinHandle<()>>>,
}

impl<L> core::fmt::Debug for SubscriptionConnector<L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SubscriptionConnector")
            .field("target", &self.target)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<L: EventLog + 'static> SubscriptionConnector<L> {
    pub fn new(
        log: Arc<L>,
        target: SubscriptionTarget,
        policy: ReconnectPolicy,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            log,
            target,
            policy,
            shutdown,
            supervisor: Mutex::new(None),
        }
    }

    pub fn target(&self) -> &SubscriptionTarget {
        &self.target
    }

    /// Open the subscription and start the reconnect supervisor.
    ///
    /// Every delivered event goes to `ingress`. A failure to open the first
    /// subscription is returned; later failures are retried.
    pub fn connect(&self, ingress: EventCallback) -> Result<(), ConnectorError> {
        let mut supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if supervisor.is_some() {
            return Err(ConnectorError::AlreadyConnected);
        }

        let (drops_tx, drops_rx) = channel::unbounded();
        let on_drop: DropCallback = Arc::new(move |reason: DropReason| {
            let _ = drops_tx.send(reason);
        });

        open(&*self.log, &self.target, ingress.clone(), on_drop.clone())?;
        info!(stream = %self.target.stream, group = %self.target.group, "subscription connected");

        let reconnect = Reconnect {
            log: self.log.clone(),
            target: self.target.clone(),
            policy: self.policy.clone(),
            shutdown: self.shutdown.clone(),
            ingress,
            on_drop,
            drops: drops_rx,
        };
        let join = thread::Builder::new()
            .name(format!("eventline-connector-{}", self.target.stream))
            .spawn(move || reconnect.run())
            .map_err(ConnectorError::Spawn)?;

        *supervisor = Some(join);
        Ok(())
    }

    /// Cancel the shared signal, close the subscription and join the supervisor.
    pub fn shutdown(&self) {
        self.shutdown.cancel();

        if let Err(e) = self
            .log
            .close_subscription(&self.target.stream, &self.target.group)
        {
            warn!(stream = %self.target.stream, error = %e, "failed to close subscription");
        }

        let join = self
            .supervisor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(join) = join {
            if join.join().is_err() {
                error!(stream = %self.target.stream, "reconnect supervisor terminated abnormally");
            }
        }
        info!(stream = %self.target.stream, "subscription connector stopped");
    }
}

fn open<L: EventLog + ?Sized>(
    log: &L,
    target: &SubscriptionTarget,
    ingress: EventCallback,
    on_drop: DropCallback,
) -> Result<(), ConnectorError> {
    log.open_durable_subscription(&target.stream, &target.group, ingress, on_drop)
        .map_err(|source| ConnectorError::Open {
            stream: target.stream.clone(),
            group: target.group.clone(),
            source,
        })
}

struct Reconnect<L> {
    log: Arc<L>,
    target: SubscriptionTarget,
    policy: ReconnectPolicy,
    shutdown: ShutdownSignal,
    ingress: EventCallback,
    on_drop: DropCallback,
    drops: Receiver<DropReason>,
}

impl<L: EventLog> Reconnect<L> {
    fn run(self) {
        let cancelled = self.shutdown.receiver();

        loop {
            let reason = select! {
                recv(self.drops) -> msg => match msg {
                    Ok(reason) => reason,
                    Err(_) => break,
                },
                recv(cancelled) -> _ => break,
            };

            if self.shutdown.is_cancelled() {
                break;
            }
            if reason == DropReason::Requested {
                info!(stream = %self.target.stream, "subscription closed on request");
                break;
            }

            warn!(
                stream = %self.target.stream,
                group = %self.target.group,
                reason = %reason,
                "subscription dropped; reconnecting"
            );
            if !self.reconnect() {
                break;
            }
        }
    }

    /// Returns `false` when the supervisor should stop.
    fn reconnect(&self) -> bool {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if self.policy.exhausted(attempt) {
                error!(
                    stream = %self.target.stream,
                    attempts = attempt - 1,
                    "giving up reconnecting subscription"
                );
                return false;
            }
            if self.shutdown.wait_timeout(self.policy.delay(attempt)) {
                return false;
            }

            match open(&*self.log, &self.target, self.ingress.clone(), self.on_drop.clone()) {
                Ok(()) => {
                    info!(stream = %self.target.stream, attempt, "subscription reconnected");
                    return true;
                }
                Err(e) => {
                    warn!(stream = %self.target.stream, attempt, error = %e, "reconnect failed")
                }
            }
        }
    }
}
