//! Webhook event dispatch
//!
//! Verified events are published onto an in-process broadcast bus.
//! Consumers subscribe for their own receiver; the publisher never knows
//! who, if anyone, is listening.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// A verified inbound webhook event
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    /// Event id assigned at ingestion
    pub id: Uuid,
    /// Source service name
    pub source: String,
    /// Event type extracted from the payload
    pub event_type: String,
    /// Parsed JSON payload
    pub payload: Value,
    /// Raw request body as received (cheap to clone across subscribers)
    #[serde(skip)]
    pub raw_body: Bytes,
    /// When the event was received
    pub received_at: DateTime<Utc>,
}

impl WebhookEvent {
    /// Build an event from a verified payload
    #[must_use]
    pub fn new(source: &str, payload: Value, raw_body: Bytes) -> Self {
        let event_type = event_type_of(source, &payload);
        Self {
            id: Uuid::new_v4(),
            source: source.to_string(),
            event_type,
            payload,
            raw_body,
            received_at: Utc::now(),
        }
    }
}

/// Extract an event type from the payload's conventional fields,
/// falling back to `<source>.event`.
fn event_type_of(source: &str, payload: &Value) -> String {
    for key in ["event", "type", "action"] {
        if let Some(value) = payload.get(key).and_then(Value::as_str) {
            return value.to_string();
        }
    }
    format!("{source}.event")
}

/// In-process broadcast bus for accepted webhook events
pub struct EventBus {
    /// Broadcast channel; receivers are created on subscribe
    tx: broadcast::Sender<WebhookEvent>,
}

impl EventBus {
    /// Create a bus with the given per-subscriber buffer size
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size.max(1));
        Self { tx }
    }

    /// Subscribe to all future events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WebhookEvent> {
        self.tx.subscribe()
    }

    /// Publish an event, returning the number of subscribers that saw it.
    ///
    /// Events published with no subscribers are dropped; ingestion does not
    /// depend on anyone listening.
    pub fn publish(&self, event: WebhookEvent) -> usize {
        let source = event.source.clone();
        let event_type = event.event_type.clone();
        match self.tx.send(event) {
            Ok(receivers) => {
                debug!(source = %source, event_type = %event_type, receivers, "Dispatched webhook event");
                receivers
            }
            Err(_) => {
                warn!(source = %source, event_type = %event_type, "No subscribers for webhook event");
                0
            }
        }
    }

    /// Current subscriber count
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let event = WebhookEvent::new(
            "media-server",
            json!({"event": "library.new", "title": "Heat"}),
            Bytes::from_static(b"{}"),
        );
        let delivered = bus.publish(event.clone());

        assert_eq!(delivered, 2);
        assert_eq!(rx1.recv().await.unwrap().id, event.id);
        assert_eq!(rx2.recv().await.unwrap().event_type, "library.new");
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let bus = EventBus::new(16);
        let event = WebhookEvent::new("downloader", json!({}), Bytes::new());
        assert_eq!(bus.publish(event), 0);
    }

    #[test]
    fn test_event_type_extraction() {
        let event = WebhookEvent::new(
            "request-broker",
            json!({"type": "request.approved"}),
            Bytes::new(),
        );
        assert_eq!(event.event_type, "request.approved");

        let fallback = WebhookEvent::new("request-broker", json!({"data": 1}), Bytes::new());
        assert_eq!(fallback.event_type, "request-broker.event");
    }
}
