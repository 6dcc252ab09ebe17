use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::StreamCategory;

/// A typed event that can be carried in an [`EventEnvelope`](crate::EventEnvelope).
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - identified on the wire by a stable type name
/// - written to one of the log's stream categories
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "orders.order_placed").
    const EVENT_TYPE: &'static str;

    /// Category the event is appended under.
    const CATEGORY: StreamCategory = StreamCategory::Domain;
}
