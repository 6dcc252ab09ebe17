//! Delivery headers stamped onto an envelope before it is dispatched.

use crate::EventEnvelope;

pub const EVENT_HEADER_PREFIX: &str = "eventline.event";
pub const EVENT_ID_HEADER: &str = "eventline.event.id";
pub const EVENT_STREAM_HEADER: &str = "eventline.event.stream";
pub const EVENT_POSITION_HEADER: &str = "eventline.event.position";

impl EventEnvelope {
    /// Copy the log coordinates (id, origin stream, position) into the headers,
    /// so handlers can see where the event came from without the envelope type.
    pub fn with_delivery_headers(self) -> Self {
        let id = self.event_id().to_string();
        let stream = self.stream_id().to_string();
        let position = self.position().to_string();

        self.with_header(EVENT_ID_HEADER, id)
            .with_header(EVENT_STREAM_HEADER, stream)
            .with_header(EVENT_POSITION_HEADER, position)
    }
}
