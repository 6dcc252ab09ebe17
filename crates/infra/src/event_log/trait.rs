use std::sync::Arc;

use thiserror::Error;

use eventline_events::EventEnvelope;

/// Receives every event delivered by a subscription, in log order.
pub type EventCallback = Arc<dyn Fn(EventEnvelope) + Send + Sync>;

/// Invoked once when a subscription is dropped by the log.
pub type DropCallback = Arc<dyn Fn(DropReason) + Send + Sync>;

/// Why the log dropped a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The connection to the log was lost.
    ConnectionClosed,
    /// The server shut down or restarted.
    ServerShutdown,
    /// The server dropped the subscription (e.g. group deleted, max subscribers).
    ServerError(String),
    /// The subscription was closed on request; no reconnect is expected.
    Requested,
}

impl core::fmt::Display for DropReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ConnectionClosed => f.write_str("connection closed"),
            Self::ServerShutdown => f.write_str("server shutdown"),
            Self::ServerError(e) => write!(f, "server error: {e}"),
            Self::Requested => f.write_str("requested"),
        }
    }
}

/// Event log operation error.
///
/// These are **infrastructure errors** (connectivity, routing, cursors); they
/// say nothing about the content of any event.
#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("event log connection error: {0}")]
    Connection(String),

    #[error("routing installation failed: {0}")]
    Routing(String),

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("acknowledge failed: {0}")]
    Acknowledge(String),
}

/// Durable, ordered event log as seen by the consumer.
///
/// ## Contract
///
/// - `enable_category_index` and `install_routing` are idempotent upserts keyed
///   by name. Installing an identical definition twice leaves the log in the
///   same state as installing it once.
/// - `open_durable_subscription` delivers events of `stream` for the consumer
///   group `group` in log order, starting after the group's last
///   acknowledged event. Events delivered but never acknowledged are delivered
///   again when the group reconnects (at-least-once).
/// - `on_drop` is called when the log drops the subscription for any reason
///   other than `close_subscription`.
/// - `acknowledge` confirms one event for redelivery purposes.
/// - `subscribe_to_all` is a volatile, unacknowledged subscription to every
///   event appended from now on.
pub trait EventLog: Send + Sync {
    fn enable_category_index(&self, name: &str) -> Result<(), EventLogError>;

    fn install_routing(&self, name: &str, definition: &str) -> Result<(), EventLogError>;

    fn open_durable_subscription(
        &self,
        stream: &str,
        group: &str,
        on_event: EventCallback,
        on_drop: DropCallback,
    ) -> Result<(), EventLogError>;

    fn close_subscription(&self, stream: &str, group: &str) -> Result<(), EventLogError>;

    fn acknowledge(
        &self,
        stream_id: &str,
        position: u64,
        envelope: &EventEnvelope,
    ) -> Result<(), EventLogError>;

    fn subscribe_to_all(
        &self,
        on_event: EventCallback,
        on_drop: DropCallback,
    ) -> Result<(), EventLogError>;
}

impl<L> EventLog for Arc<L>
where
    L: EventLog + ?Sized,
{
    fn enable_category_index(&self, name: &str) -> Result<(), EventLogError> {
        (**self).enable_category_index(name)
    }

    fn install_routing(&self, name: &str, definition: &str) -> Result<(), EventLogError> {
        (**self).install_routing(name, definition)
    }

    fn open_durable_subscription(
        &self,
        stream: &str,
        group: &str,
        on_event: EventCallback,
        on_drop: DropCallback,
    ) -> Result<(), EventLogError> {
        (**self).open_durable_subscription(stream, group, on_event, on_drop)
    }

    fn close_subscription(&self, stream: &str, group: &str) -> Result<(), EventLogError> {
        (**self).close_subscription(stream, group)
    }

    fn acknowledge(
        &self,
        stream_id: &str,
        position: u64,
        envelope: &EventEnvelope,
    ) -> Result<(), EventLogError> {
        (**self).acknowledge(stream_id, position, envelope)
    }

    fn subscribe_to_all(
        &self,
        on_event: EventCallback,
        on_drop: DropCallback,
    ) -> Result<(), EventLogError> {
        (**self).subscribe_to_all(on_event, on_drop)
    }
}
