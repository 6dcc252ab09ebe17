use std::sync::Arc;

use dashmap::DashMap;

use eventline_events::{HandlerDescriptor, HandlerRegistry};

/// Handler descriptors per event type, resolved once and kept forever.
///
/// Concurrent first calls for the same type may each resolve, but only the
/// first insert is kept and every caller gets that one.
#[derive(Debug, Default)]
pub struct HandlerCache {
    entries: DashMap<String, Arc<[HandlerDescriptor]>>,
}

impl HandlerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve<R>(&self, registry: &R, event_type: &str) -> Arc<[HandlerDescriptor]>
    where
        R: HandlerRegistry + ?Sized,
    {
        if let Some(hit) = self.entries.get(event_type) {
            return hit.value().clone();
        }

        let resolved: Arc<[HandlerDescriptor]> = registry.resolve_handlers(event_type).into();
        self.entries
            .entry(event_type.to_string())
            .or_insert(resolved)
            .value()
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
