use std::fmt;
use std::sync::Arc;

use crate::EventEnvelope;

/// Result of one handler invocation.
///
/// Retry policy is decided from this value alone:
///
/// - `Success`: the handler is done with the event.
/// - `Retry`: an expected, transient condition (optimistic concurrency
///   conflict, a dependency that is briefly unavailable). The handler is
///   invoked again, and once its own retries are exhausted the whole dispatch
///   attempt is retried.
/// - `Fatal`: anything else. The dispatch attempt is aborted immediately and
///   counted against the event's retry budget.
#[derive(Debug)]
pub enum HandlerResult {
    Success,
    Retry(String),
    Fatal(anyhow::Error),
}

impl HandlerResult {
    pub fn retry(reason: impl Into<String>) -> Self {
        Self::Retry(reason.into())
    }

    pub fn fatal(error: impl Into<anyhow::Error>) -> Self {
        Self::Fatal(error.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<anyhow::Result<()>> for HandlerResult {
    fn from(value: anyhow::Result<()>) -> Self {
        match value {
            Ok(()) => Self::Success,
            Err(e) => Self::Fatal(e),
        }
    }
}

/// Handles events of one or more types.
///
/// A fresh instance is created (via its [`HandlerDescriptor`]) for every
/// dispatch attempt, so implementations may keep per-attempt state. Handlers
/// of the same event can run on different threads at once, hence `Send + Sync`.
///
/// Delivery is at-least-once: an event can reach a handler again after a
/// restart or a reconnect, so handlers must be idempotent.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &EventEnvelope) -> HandlerResult;
}

impl<F> EventHandler for F
where
    F: Fn(&EventEnvelope) -> HandlerResult + Send + Sync,
{
    fn handle(&self, event: &EventEnvelope) -> HandlerResult {
        self(event)
    }
}

/// Builds a handler instance.
pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn EventHandler> + Send + Sync>;

/// Registration of one handler type for one event type.
#[derive(Clone)]
pub struct HandlerDescriptor {
    event_type: String,
    handler_type: String,
    factory: HandlerFactory,
}

impl HandlerDescriptor {
    pub fn new(
        event_type: impl Into<String>,
        handler_type: impl Into<String>,
        factory: HandlerFactory,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            handler_type: handler_type.into(),
            factory,
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn handler_type(&self) -> &str {
        &self.handler_type
    }

    /// Create a fresh handler instance.
    pub fn instantiate(&self) -> Box<dyn EventHandler> {
        (self.factory)()
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("event_type", &self.event_type)
            .field("handler_type", &self.handler_type)
            .finish_non_exhaustive()
    }
}

impl PartialEq for HandlerDescriptor {
    /// Descriptors compare by registration identity, not by factory pointer.
    fn eq(&self, other: &Self) -> bool {
        self.event_type == other.event_type && self.handler_type == other.handler_type
    }
}

impl Eq for HandlerDescriptor {}

#[cfg(test)]
mod tests {
    use super::*;
    use eventline_core::EventId;
    use serde_json::json;

    #[test]
    fn closures_are_handlers() {
        let handler = |event: &EventEnvelope| {
            if event.position() == 0 {
                HandlerResult::retry("not yet")
            } else {
                HandlerResult::Success
            }
        };

        let first = EventEnvelope::new(EventId::new(), "S-1", 0, "t", json!(null));
        let second = EventEnvelope::new(EventId::new(), "S-1", 1, "t", json!(null));

        assert!(matches!(handler.handle(&first), HandlerResult::Retry(_)));
        assert!(handler.handle(&second).is_success());
    }

    #[test]
    fn anyhow_errors_become_fatal() {
        let result: HandlerResult = Err::<(), _>(anyhow::anyhow!("boom")).into();
        assert!(matches!(result, HandlerResult::Fatal(_)));
    }

    #[test]
    fn descriptor_instantiates_fresh_handlers() {
        let descriptor = HandlerDescriptor::new(
            "orders.order_placed",
            "EmailReceipt",
            Arc::new(|| {
                Box::new(|_: &EventEnvelope| HandlerResult::Success) as Box<dyn EventHandler>
            }),
        );
        let event =
            EventEnvelope::new(EventId::new(), "Order-1", 0, "orders.order_placed", json!({}));

        assert!(descriptor.instantiate().handle(&event).is_success());
        assert!(format!("{descriptor:?}").contains("EmailReceipt"));
    }
}
