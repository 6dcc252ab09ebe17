use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use eventline_core::EventId;

use crate::{Event, StreamCategory};

/// Metadata written alongside an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDescriptor {
    pub category: StreamCategory,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl EventDescriptor {
    pub fn new(category: StreamCategory) -> Self {
        Self {
            category,
            occurred_at: Utc::now(),
            headers: BTreeMap::new(),
        }
    }
}

impl Default for EventDescriptor {
    fn default() -> Self {
        Self::new(StreamCategory::Domain)
    }
}

/// Envelope for an event read from the log.
///
/// This is the unit that travels from the subscription through a worker lane
/// to the handlers.
///
/// Notes:
/// - `stream_id` is the **origin** stream (e.g. `Order-1`), not the routed
///   stream the subscription reads; lanes are chosen from it.
/// - `position` is the event's number within its origin stream and is what
///   gets acknowledged.
/// - The envelope is never mutated in place; mutators return a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    event_id: EventId,
    stream_id: String,

    /// Monotonically increasing position in the origin stream.
    position: u64,

    event_type: String,
    descriptor: EventDescriptor,
    payload: JsonValue,
}

impl EventEnvelope {
    pub fn new(
        event_id: EventId,
        stream_id: impl Into<String>,
        position: u64,
        event_type: impl Into<String>,
        payload: JsonValue,
    ) -> Self {
        Self {
            event_id,
            stream_id: stream_id.into(),
            position,
            event_type: event_type.into(),
            descriptor: EventDescriptor::default(),
            payload,
        }
    }

    /// Wrap a typed event, serializing it to the JSON payload.
    pub fn from_event<E: Event>(
        event_id: EventId,
        stream_id: impl Into<String>,
        position: u64,
        event: &E,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_value(event)?;
        Ok(Self::new(event_id, stream_id, position, E::EVENT_TYPE, payload)
            .with_descriptor(EventDescriptor::new(E::CATEGORY)))
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn descriptor(&self) -> &EventDescriptor {
        &self.descriptor
    }

    pub fn category(&self) -> StreamCategory {
        self.descriptor.category
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.descriptor.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.descriptor.headers.get(name).map(String::as_str)
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn into_payload(self) -> JsonValue {
        self.payload
    }

    /// Deserialize the payload into a typed event.
    pub fn decode<E: DeserializeOwned>(&self) -> Result<E, serde_json::Error> {
        E::deserialize(&self.payload)
    }

    pub fn with_descriptor(mut self, descriptor: EventDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    pub fn with_category(mut self, category: StreamCategory) -> Self {
        self.descriptor.category = category;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.descriptor.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = payload;
        self
    }

    /// Replace the event type (upcasting mutators rename old schemas).
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    /// Re-address the envelope at another stream position (used by the log when linking).
    pub fn at(mut self, stream_id: impl Into<String>, position: u64) -> Self {
        self.stream_id = stream_id.into();
        self.position = position;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct OrderPlaced {
        order_id: String,
        total_cents: i64,
    }

    impl Event for OrderPlaced {
        const EVENT_TYPE: &'static str = "orders.order_placed";
    }

    #[test]
    fn typed_event_round_trips_through_payload() {
        let event = OrderPlaced {
            order_id: "o-1".to_string(),
            total_cents: 1250,
        };
        let env = EventEnvelope::from_event(EventId::new(), "Order-1", 0, &event).unwrap();

        assert_eq!(env.event_type(), "orders.order_placed");
        assert_eq!(env.category(), StreamCategory::Domain);
        assert_eq!(env.decode::<OrderPlaced>().unwrap(), event);
    }

    #[test]
    fn builders_do_not_touch_coordinates() {
        let id = EventId::new();
        let env = EventEnvelope::new(id, "Order-9", 3, "orders.order_placed", json!({"a": 1}))
            .with_payload(json!({"a": 2}))
            .with_header("correlation", "c-42");

        assert_eq!(env.event_id(), id);
        assert_eq!(env.stream_id(), "Order-9");
        assert_eq!(env.position(), 3);
        assert_eq!(env.payload(), &json!({"a": 2}));
        assert_eq!(env.header("correlation"), Some("c-42"));
    }
}
