use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value as JsonValue;

use eventline_core::EventId;
use eventline_events::{Event, EventEnvelope, StreamCategory};

use super::r#trait::{DropCallback, DropReason, EventCallback, EventLog, EventLogError};
use crate::routing::RoutingDefinition;

#[derive(Debug, Clone)]
struct InstalledRouting {
    script: String,
    definition: RoutingDefinition,
    revision: u64,
}

#[derive(Clone)]
struct Subscriber {
    on_event: EventCallback,
    on_drop: DropCallback,
}

#[derive(Default)]
struct State {
    category_indexes: BTreeSet<String>,
    routings: BTreeMap<String, InstalledRouting>,
    streams: HashMap<String, Vec<EventEnvelope>>,
    routed: HashMap<String, Vec<EventEnvelope>>,
    groups: HashMap<(String, String), Subscriber>,
    live: Vec<Subscriber>,
    acked: HashSet<(String, u64)>,
    ack_log: Vec<(String, u64)>,
    fail_opens: u32,
    fail_acks: u32,
    opens: u32,
}

/// In-memory event log with category indexing, routing and consumer groups.
///
/// Intended for tests/dev. Events are delivered synchronously on the
/// appending thread; deliveries never overlap, so each subscriber sees the
/// log in order. Acknowledgements are tracked per origin
/// `(stream_id, position)`.
#[derive(Default)]
pub struct InMemoryEventLog {
    state: Mutex<State>,
    delivery: Mutex<()>,
}

impl core::fmt::Debug for InMemoryEventLog {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state();
        f.debug_struct("InMemoryEventLog")
            .field("streams", &state.streams.len())
            .field("routings", &state.routings.len())
            .field("groups", &state.groups.len())
            .finish_non_exhaustive()
    }
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn delivering(&self) -> MutexGuard<'_, ()> {
        self.delivery
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a raw event to its origin stream and deliver it.
    pub fn append(
        &self,
        stream_id: &str,
        event_type: &str,
        category: StreamCategory,
        payload: JsonValue,
    ) -> EventEnvelope {
        let envelope = EventEnvelope::new(EventId::new(), stream_id, 0, event_type, payload)
            .with_category(category);
        self.append_envelope(envelope)
    }

    /// Append a typed event to `stream_id`.
    pub fn append_event<E: Event>(
        &self,
        stream_id: &str,
        event: &E,
    ) -> Result<EventEnvelope, serde_json::Error> {
        let envelope = EventEnvelope::from_event(EventId::new(), stream_id, 0, event)?;
        Ok(self.append_envelope(envelope))
    }

    /// Append an envelope at the next position of its stream.
    ///
    /// The envelope's position is overwritten. The event is linked into every
    /// routed stream whose routing selects it, then delivered to the groups
    /// subscribed to those streams and to every volatile subscriber.
    pub fn append_envelope(&self, envelope: EventEnvelope) -> EventEnvelope {
        let _delivering = self.delivering();

        let (stored, deliveries) = {
            let mut state = self.state();
            let stream_id = envelope.stream_id().to_string();
            let position = state.streams.get(&stream_id).map(Vec::len).unwrap_or(0) as u64;
            let stored = envelope.at(stream_id.clone(), position);
            state.streams.entry(stream_id).or_default().push(stored.clone());

            let mut deliveries: Vec<EventCallback> =
                state.live.iter().map(|s| s.on_event.clone()).collect();

            if !state.category_indexes.is_empty() {
                let source = stored.category().category_stream();
                let targets: Vec<String> = state
                    .routings
                    .values()
                    .filter(|r| r.definition.links(&source, stored.event_type()))
                    .map(|r| r.definition.target().to_string())
                    .collect();

                for target in targets {
                    state.routed.entry(target.clone()).or_default().push(stored.clone());
                    deliveries.extend(
                        state
                            .groups
                            .iter()
                            .filter(|((stream, _), _)| *stream == target)
                            .map(|(_, s)| s.on_event.clone()),
                    );
                }
            }

            (stored, deliveries)
        };

        for on_event in deliveries {
            on_event(stored.clone());
        }
        stored
    }

    /// Drop every open subscription, as a lost connection would.
    pub fn drop_subscriptions(&self, reason: DropReason) {
        let dropped: Vec<Subscriber> = {
            let mut state = self.state();
            let mut dropped: Vec<Subscriber> = state.groups.drain().map(|(_, s)| s).collect();
            dropped.append(&mut state.live);
            dropped
        };

        for subscriber in dropped {
            (subscriber.on_drop)(reason.clone());
        }
    }

    /// Make the next `count` subscription opens fail with a connection error.
    pub fn fail_next_opens(&self, count: u32) {
        self.state().fail_opens = count;
    }

    /// Make the next `count` acknowledgements fail.
    pub fn fail_next_acks(&self, count: u32) {
        self.state().fail_acks = count;
    }

    /// Successful durable subscription opens so far.
    pub fn opens(&self) -> u32 {
        self.state().opens
    }

    pub fn has_subscription(&self, stream: &str, group: &str) -> bool {
        self.state()
            .groups
            .contains_key(&(stream.to_string(), group.to_string()))
    }

    pub fn category_indexes(&self) -> Vec<String> {
        self.state().category_indexes.iter().cloned().collect()
    }

    /// Installed routing scripts by name.
    pub fn routings(&self) -> BTreeMap<String, String> {
        self.state()
            .routings
            .iter()
            .map(|(name, r)| (name.clone(), r.script.clone()))
            .collect()
    }

    /// How many times the routing `name` changed; identical re-installs don't count.
    pub fn routing_revision(&self, name: &str) -> Option<u64> {
        self.state().routings.get(name).map(|r| r.revision)
    }

    /// Events linked into a routed stream, in link order.
    pub fn routed_events(&self, stream: &str) -> Vec<EventEnvelope> {
        self.state().routed.get(stream).cloned().unwrap_or_default()
    }

    /// Acknowledged `(stream_id, position)` pairs in acknowledgement order, duplicates included.
    pub fn acknowledged(&self) -> Vec<(String, u64)> {
        self.state().ack_log.clone()
    }

    pub fn is_acknowledged(&self, stream_id: &str, position: u64) -> bool {
        self.state()
            .acked
            .contains(&(stream_id.to_string(), position))
    }
}

impl EventLog for InMemoryEventLog {
    fn enable_category_index(&self, name: &str) -> Result<(), EventLogError> {
        self.state().category_indexes.insert(name.to_string());
        Ok(())
    }

    fn install_routing(&self, name: &str, definition: &str) -> Result<(), EventLogError> {
        let parsed = RoutingDefinition::parse(definition).ok_or_else(|| {
            EventLogError::Routing(format!("routing '{name}' has an unrecognised definition"))
        })?;

        let mut state = self.state();
        match state.routings.get_mut(name) {
            Some(existing) if existing.script == definition => {}
            Some(existing) => {
                existing.script = definition.to_string();
                existing.definition = parsed;
                existing.revision += 1;
            }
            None => {
                state.routings.insert(
                    name.to_string(),
                    InstalledRouting {
                        script: definition.to_string(),
                        definition: parsed,
                        revision: 1,
                    },
                );
            }
        }
        Ok(())
    }

    fn open_durable_subscription(
        &self,
        stream: &str,
        group: &str,
        on_event: EventCallback,
        on_drop: DropCallback,
    ) -> Result<(), EventLogError> {
        let _delivering = self.delivering();

        let backlog = {
            let mut state = self.state();
            if state.fail_opens > 0 {
                state.fail_opens -= 1;
                return Err(EventLogError::Connection(format!(
                    "could not open subscription {stream}::{group}"
                )));
            }
            state.opens += 1;
            state.groups.insert(
                (stream.to_string(), group.to_string()),
                Subscriber {
                    on_event: on_event.clone(),
                    on_drop,
                },
            );

            let acked = &state.acked;
            state
                .routed
                .get(stream)
                .map(|events| {
                    events
                        .iter()
                        .filter(|e| !acked.contains(&(e.stream_id().to_string(), e.position())))
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };

        for event in backlog {
            on_event(event);
        }
        Ok(())
    }

    fn close_subscription(&self, stream: &str, group: &str) -> Result<(), EventLogError> {
        self.state()
            .groups
            .remove(&(stream.to_string(), group.to_string()));
        Ok(())
    }

    fn acknowledge(
        &self,
        stream_id: &str,
        position: u64,
        _envelope: &EventEnvelope,
    ) -> Result<(), EventLogError> {
        let mut state = self.state();
        if state.fail_acks > 0 {
            state.fail_acks -= 1;
            return Err(EventLogError::Acknowledge(format!(
                "{stream_id}@{position} was not acknowledged"
            )));
        }
        state.acked.insert((stream_id.to_string(), position));
        state.ack_log.push((stream_id.to_string(), position));
        Ok(())
    }

    fn subscribe_to_all(
        &self,
        on_event: EventCallback,
        on_drop: DropCallback,
    ) -> Result<(), EventLogError> {
        self.state().live.push(Subscriber { on_event, on_drop });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{routing_name, CATEGORY_INDEX};
    use serde_json::json;
    use std::sync::Arc;

    fn collector() -> (EventCallback, Arc<Mutex<Vec<EventEnvelope>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: EventCallback =
            Arc::new(move |e: EventEnvelope| sink.lock().unwrap().push(e));
        (callback, seen)
    }

    fn no_drop() -> DropCallback {
        Arc::new(|_: DropReason| {})
    }

    fn routed_log(types: &[&str]) -> InMemoryEventLog {
        let log = InMemoryEventLog::new();
        log.enable_category_index(CATEGORY_INDEX).unwrap();
        let definition = RoutingDefinition::new("orders.1.0", types.iter().copied());
        log.install_routing(&routing_name("orders.1.0"), &definition.render())
            .unwrap();
        log
    }

    #[test]
    fn positions_are_per_stream() {
        let log = InMemoryEventLog::new();
        let a0 = log.append("A-1", "t", StreamCategory::Domain, json!(null));
        let b0 = log.append("B-1", "t", StreamCategory::Domain, json!(null));
        let a1 = log.append("A-1", "t", StreamCategory::Domain, json!(null));

        assert_eq!((a0.position(), b0.position(), a1.position()), (0, 0, 1));
    }

    #[test]
    fn links_only_routed_types() {
        let log = routed_log(&["orders.order_placed"]);
        log.append("Order-1", "orders.order_placed", StreamCategory::Domain, json!({}));
        log.append("Order-1", "orders.order_cancelled", StreamCategory::Domain, json!({}));
        log.append("Note-1", "orders.order_placed", StreamCategory::Oob, json!({}));

        let routed = log.routed_events("orders.1.0");
        assert_eq!(routed.len(), 2);
        assert_eq!(routed[0].stream_id(), "Order-1");
        assert_eq!(routed[1].stream_id(), "Note-1");
    }

    #[test]
    fn nothing_is_linked_without_category_index() {
        let log = InMemoryEventLog::new();
        let definition = RoutingDefinition::new("orders.1.0", ["orders.order_placed"]);
        log.install_routing("r", &definition.render()).unwrap();
        log.append("Order-1", "orders.order_placed", StreamCategory::Domain, json!({}));

        assert!(log.routed_events("orders.1.0").is_empty());
    }

    #[test]
    fn rejects_unrecognised_routing() {
        let log = InMemoryEventLog::new();
        let err = log.install_routing("r", "not a routing").unwrap_err();
        assert!(matches!(err, EventLogError::Routing(_)));
    }

    #[test]
    fn identical_routing_install_is_a_no_op() {
        let log = InMemoryEventLog::new();
        let definition = RoutingDefinition::new("orders.1.0", ["a"]).render();
        log.install_routing("r", &definition).unwrap();
        log.install_routing("r", &definition).unwrap();
        assert_eq!(log.routing_revision("r"), Some(1));

        let changed = RoutingDefinition::new("orders.1.0", ["a", "b"]).render();
        log.install_routing("r", &changed).unwrap();
        assert_eq!(log.routing_revision("r"), Some(2));
    }

    #[test]
    fn reopening_a_group_redelivers_unacknowledged_events() {
        let log = routed_log(&["t"]);
        let (first, seen_first) = collector();
        log.open_durable_subscription("orders.1.0", "orders.1.0", first, no_drop())
            .unwrap();

        let e0 = log.append("S-1", "t", StreamCategory::Domain, json!(0));
        log.append("S-1", "t", StreamCategory::Domain, json!(1));
        assert_eq!(seen_first.lock().unwrap().len(), 2);

        log.acknowledge(e0.stream_id(), e0.position(), &e0).unwrap();
        log.drop_subscriptions(DropReason::ConnectionClosed);

        let (second, seen_second) = collector();
        log.open_durable_subscription("orders.1.0", "orders.1.0", second, no_drop())
            .unwrap();

        let redelivered = seen_second.lock().unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].position(), 1);
        assert_eq!(log.opens(), 2);
    }

    #[test]
    fn drop_notifies_subscribers_and_close_does_not() {
        let log = routed_log(&["t"]);
        let drops = Arc::new(Mutex::new(Vec::new()));
        let sink = drops.clone();
        let on_drop: DropCallback = Arc::new(move |r: DropReason| sink.lock().unwrap().push(r));
        let (on_event, _) = collector();

        log.open_durable_subscription("orders.1.0", "g", on_event.clone(), on_drop.clone())
            .unwrap();
        log.close_subscription("orders.1.0", "g").unwrap();
        log.drop_subscriptions(DropReason::ServerShutdown);
        assert!(drops.lock().unwrap().is_empty());

        log.open_durable_subscription("orders.1.0", "g", on_event, on_drop)
            .unwrap();
        log.drop_subscriptions(DropReason::ServerShutdown);
        assert_eq!(*drops.lock().unwrap(), vec![DropReason::ServerShutdown]);
        assert!(!log.has_subscription("orders.1.0", "g"));
    }

    #[test]
    fn injected_failures_are_consumed() {
        let log = InMemoryEventLog::new();
        log.fail_next_opens(1);
        log.fail_next_acks(1);
        let (on_event, _) = collector();
        let env = EventEnvelope::new(EventId::new(), "S-1", 0, "t", json!(null));

        assert!(log
            .open_durable_subscription("s", "g", on_event.clone(), no_drop())
            .is_err());
        assert!(log.open_durable_subscription("s", "g", on_event, no_drop()).is_ok());
        assert!(log.acknowledge("S-1", 0, &env).is_err());
        assert!(log.acknowledge("S-1", 0, &env).is_ok());
        assert!(log.is_acknowledged("S-1", 0));
    }

    #[test]
    fn volatile_subscribers_see_every_append() {
        let log = InMemoryEventLog::new();
        let (on_event, seen) = collector();
        log.subscribe_to_all(on_event, no_drop()).unwrap();

        log.append("A-1", "x", StreamCategory::Poco, json!(null));
        log.append("B-1", "y", StreamCategory::Domain, json!(null));

        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
