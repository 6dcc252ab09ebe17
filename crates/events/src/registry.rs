//! Handler registry: which handlers run for which event type.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::{Event, EventHandler, HandlerDescriptor};

/// Source of handler registrations.
///
/// `resolve_handlers` must be deterministic and free of side effects: the
/// dispatch engine caches its first answer per event type forever.
pub trait HandlerRegistry: Send + Sync {
    /// Handlers registered for `event_type`, in registration order.
    fn resolve_handlers(&self, event_type: &str) -> Vec<HandlerDescriptor>;

    /// Every event type known to this process, handled or not.
    ///
    /// The stream router links exactly these types into the endpoint's stream.
    fn event_types(&self) -> Vec<String>;
}

impl<R> HandlerRegistry for Arc<R>
where
    R: HandlerRegistry + ?Sized,
{
    fn resolve_handlers(&self, event_type: &str) -> Vec<HandlerDescriptor> {
        (**self).resolve_handlers(event_type)
    }

    fn event_types(&self) -> Vec<String> {
        (**self).event_types()
    }
}

/// Registry built up front in code.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHandlerRegistry {
    event_types: BTreeSet<String>,
    handlers: BTreeMap<String, Vec<HandlerDescriptor>>,
}

impl InMemoryHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an event type known without handling it.
    pub fn register_event_type(&mut self, event_type: impl Into<String>) -> &mut Self {
        self.event_types.insert(event_type.into());
        self
    }

    /// Register a handler factory for an event type.
    ///
    /// Registering the same `handler_type` twice for one event type replaces
    /// the earlier factory (keeping its position).
    pub fn register_handler<H, F>(
        &mut self,
        event_type: impl Into<String>,
        handler_type: impl Into<String>,
        factory: F,
    ) -> &mut Self
    where
        H: EventHandler + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let descriptor = HandlerDescriptor::new(
            event_type.clone(),
            handler_type,
            Arc::new(move || Box::new(factory()) as Box<dyn EventHandler>),
        );

        self.event_types.insert(event_type.clone());
        let handlers = self.handlers.entry(event_type).or_default();
        match handlers
            .iter_mut()
            .find(|d| d.handler_type() == descriptor.handler_type())
        {
            Some(existing) => *existing = descriptor,
            None => handlers.push(descriptor),
        }
        self
    }

    /// Register a handler for a typed event, named after the handler type.
    pub fn register<E, H, F>(&mut self, factory: F) -> &mut Self
    where
        E: Event,
        H: EventHandler + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.register_handler(E::EVENT_TYPE, std::any::type_name::<H>(), factory)
    }
}

impl HandlerRegistry for InMemoryHandlerRegistry {
    fn resolve_handlers(&self, event_type: &str) -> Vec<HandlerDescriptor> {
        self.handlers.get(event_type).cloned().unwrap_or_default()
    }

    fn event_types(&self) -> Vec<String> {
        self.event_types.iter().cloned().collect()
    }
}
