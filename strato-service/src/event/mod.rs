//! Event shape detection and normalization
//!
//! Adapters are tried in a fixed priority order chosen so that stricter
//! schemas come first: HTTP-v2, HTTP-v1, Websocket, Queue, ObjectStore,
//! StreamChange, Scheduled, EventBus. Scheduled events share the event-bus
//! envelope and must be checked before the generic event-bus adapter. Events
//! matching no adapter normalize to [`TriggerKind::Unknown`] with the raw
//! value preserved.
//!
//! Detection is all-or-nothing: once an adapter claims an event, its
//! normalization failure is a `BadRequest` and no further adapter is tried.

pub mod bus;
pub mod http;
pub mod records;
pub mod websocket;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::request::{Request, TriggerKind};

pub use bus::{EventBusAdapter, ScheduledAdapter};
pub use http::{HttpV1Adapter, HttpV2Adapter};
pub use records::{ObjectStoreAdapter, QueueAdapter, StreamChangeAdapter};
pub use websocket::WebsocketAdapter;

/// A converter from a raw event value into the uniform [`Request`]
pub trait EventAdapter: Send + Sync {
    /// The trigger kind this adapter produces
    fn trigger(&self) -> TriggerKind;

    /// Whether this adapter recognizes the event shape
    fn detect(&self, event: &Value) -> bool;

    /// Normalize the event; only called after `detect` returned true
    fn adapt(&self, event: &Value) -> Result<Request>;
}

/// Priority-ordered adapter registry
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn EventAdapter>>,
}

impl AdapterRegistry {
    /// Empty registry; detection falls straight through to Unknown
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }

    /// Registry with the built-in adapters in their required priority order
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(HttpV2Adapter));
        registry.register(Box::new(HttpV1Adapter));
        registry.register(Box::new(WebsocketAdapter));
        registry.register(Box::new(QueueAdapter));
        registry.register(Box::new(ObjectStoreAdapter));
        registry.register(Box::new(StreamChangeAdapter));
        registry.register(Box::new(ScheduledAdapter));
        registry.register(Box::new(EventBusAdapter));
        registry
    }

    /// Append an adapter; ties within the same shape go to the earlier entry
    pub fn register(&mut self, adapter: Box<dyn EventAdapter>) {
        self.adapters.push(adapter);
    }

    /// Detect and normalize the event
    ///
    /// The first adapter whose `detect` returns true commits; its failure is
    /// final. Unmatched events normalize to an Unknown-trigger request whose
    /// `raw_event` holds the full value.
    pub fn adapt(&self, event: &Value) -> Result<Request> {
        for adapter in &self.adapters {
            if adapter.detect(event) {
                return adapter.adapt(event).map_err(|err| {
                    Error::bad_request(format!(
                        "failed to normalize {} event: {}",
                        adapter.trigger(),
                        err.message
                    ))
                    .with_detail("trigger", adapter.trigger().to_string())
                });
            }
        }

        let mut request = Request::new(TriggerKind::Unknown);
        request.raw_event = event.clone();
        Ok(request)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unmatched_event_normalizes_to_unknown() {
        let registry = AdapterRegistry::with_defaults();
        let event = json!({"mystery": true});
        let request = registry.adapt(&event).unwrap();
        assert_eq!(request.trigger, TriggerKind::Unknown);
        assert_eq!(request.raw_event, event);
    }

    #[test]
    fn scalar_event_normalizes_to_unknown() {
        let registry = AdapterRegistry::with_defaults();
        let request = registry.adapt(&json!("ping")).unwrap();
        assert_eq!(request.trigger, TriggerKind::Unknown);
    }

    #[test]
    fn every_accepted_event_has_a_trigger() {
        let registry = AdapterRegistry::with_defaults();
        let events = vec![
            json!({"version": "2.0", "routeKey": "GET /x", "requestContext": {"http": {"method": "GET", "path": "/x"}}}),
            json!({"httpMethod": "GET", "resource": "/x", "path": "/x"}),
            json!({"Records": [{"eventSource": "aws:sqs", "body": "{}", "messageId": "m1"}]}),
            json!({"source": "aws.events", "detail-type": "Scheduled Event", "detail": {}}),
            json!({"source": "orders", "detail-type": "OrderPlaced", "detail": {"id": 1}}),
            json!({"nonsense": 42}),
        ];
        for event in events {
            let request = registry.adapt(&event).unwrap();
            // Unknown is itself a valid, always-set kind
            assert!(matches!(
                request.trigger,
                TriggerKind::HttpV2
                    | TriggerKind::HttpV1
                    | TriggerKind::Queue
                    | TriggerKind::Scheduled
                    | TriggerKind::EventBus
                    | TriggerKind::Unknown
            ));
        }
    }

    #[test]
    fn scheduled_wins_over_event_bus() {
        let registry = AdapterRegistry::with_defaults();
        let event = json!({
            "source": "aws.events",
            "detail-type": "Scheduled Event",
            "detail": {},
            "time": "2023-01-01T00:00:00Z"
        });
        let request = registry.adapt(&event).unwrap();
        assert_eq!(request.trigger, TriggerKind::Scheduled);
    }

    #[test]
    fn partial_scheduled_match_falls_to_event_bus() {
        let registry = AdapterRegistry::with_defaults();
        // Right source, wrong detail-type: generic event-bus envelope
        let event = json!({
            "source": "aws.events",
            "detail-type": "Deployment State Change",
            "detail": {"state": "SUCCEEDED"}
        });
        let request = registry.adapt(&event).unwrap();
        assert_eq!(request.trigger, TriggerKind::EventBus);
    }

    #[test]
    fn mixed_record_batch_falls_to_unknown() {
        let registry = AdapterRegistry::with_defaults();
        let event = json!({"Records": [
            {"eventSource": "aws:sqs", "body": "{}", "messageId": "m1"},
            {"eventSource": "aws:s3", "s3": {}}
        ]});
        let request = registry.adapt(&event).unwrap();
        assert_eq!(request.trigger, TriggerKind::Unknown);
    }
}
