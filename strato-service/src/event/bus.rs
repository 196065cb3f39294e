//! Event-bus and scheduled-timer adapters
//!
//! Scheduled events share the event-bus envelope, so the scheduled adapter
//! must run first and requires both the scheduler source and detail-type to
//! match exactly; a partial match is treated as a generic bus message.

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::request::{Request, TriggerKind};

use super::EventAdapter;

const SCHEDULER_SOURCE: &str = "aws.events";
const SCHEDULER_DETAIL_TYPE: &str = "Scheduled Event";

fn envelope(event: &Value) -> Option<(&str, &str, &Map<String, Value>)> {
    let source = event.get("source")?.as_str()?;
    let detail_type = event.get("detail-type")?.as_str()?;
    let detail = event.get("detail")?.as_object()?;
    Some((source, detail_type, detail))
}

fn bus_request(trigger: TriggerKind, event: &Value, default_path: &str) -> Result<Request> {
    let (source, detail_type, detail) =
        envelope(event).ok_or_else(|| Error::bad_request("missing bus envelope"))?;

    let mut request = Request::new(trigger);
    request.method = "POST".to_string();
    request.path = default_path.to_string();
    request.source = source.to_string();
    request.detail_type = detail_type.to_string();
    request.detail = detail.clone();
    request.raw_event = event.clone();
    Ok(request)
}

// ============================================================================
// Scheduled timers
// ============================================================================

/// Scheduled timer adapter
pub struct ScheduledAdapter;

impl EventAdapter for ScheduledAdapter {
    fn trigger(&self) -> TriggerKind {
        TriggerKind::Scheduled
    }

    fn detect(&self, event: &Value) -> bool {
        event.get("source").and_then(Value::as_str) == Some(SCHEDULER_SOURCE)
            && event.get("detail-type").and_then(Value::as_str) == Some(SCHEDULER_DETAIL_TYPE)
    }

    fn adapt(&self, event: &Value) -> Result<Request> {
        let mut request = bus_request(TriggerKind::Scheduled, event, "/scheduled")?;
        // Rule name is the trailing segment of the first resource ARN
        request.trigger_key = event
            .get("resources")
            .and_then(Value::as_array)
            .and_then(|r| r.first())
            .and_then(Value::as_str)
            .and_then(|arn| arn.rsplit('/').next())
            .unwrap_or_default()
            .to_string();
        Ok(request)
    }
}

// ============================================================================
// Generic event-bus messages
// ============================================================================

/// Generic event-bus message adapter
pub struct EventBusAdapter;

impl EventAdapter for EventBusAdapter {
    fn trigger(&self) -> TriggerKind {
        TriggerKind::EventBus
    }

    fn detect(&self, event: &Value) -> bool {
        envelope(event).is_some()
    }

    fn adapt(&self, event: &Value) -> Result<Request> {
        let mut request = bus_request(TriggerKind::EventBus, event, "/events")?;
        request.trigger_key = request.source.clone();
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scheduled_requires_exact_source_and_detail_type() {
        let scheduled = json!({
            "source": "aws.events",
            "detail-type": "Scheduled Event",
            "detail": {},
            "time": "2023-01-01T00:00:00Z",
            "resources": ["arn:aws:events:us-east-1:123:rule/nightly-report"]
        });
        assert!(ScheduledAdapter.detect(&scheduled));

        let wrong_type = json!({
            "source": "aws.events",
            "detail-type": "Deployment State Change",
            "detail": {}
        });
        assert!(!ScheduledAdapter.detect(&wrong_type));

        let wrong_source = json!({
            "source": "custom.scheduler",
            "detail-type": "Scheduled Event",
            "detail": {}
        });
        assert!(!ScheduledAdapter.detect(&wrong_source));
    }

    #[test]
    fn scheduled_extracts_rule_name() {
        let event = json!({
            "source": "aws.events",
            "detail-type": "Scheduled Event",
            "detail": {},
            "resources": ["arn:aws:events:us-east-1:123:rule/nightly-report"]
        });
        let request = ScheduledAdapter.adapt(&event).unwrap();
        assert_eq!(request.trigger, TriggerKind::Scheduled);
        assert_eq!(request.trigger_key, "nightly-report");
        assert_eq!(request.source, "aws.events");
        assert!(request.body.is_empty());
    }

    #[test]
    fn event_bus_needs_full_envelope() {
        assert!(EventBusAdapter.detect(&json!({
            "source": "orders",
            "detail-type": "OrderPlaced",
            "detail": {"id": 1}
        })));
        assert!(!EventBusAdapter.detect(&json!({"source": "orders"})));
        assert!(!EventBusAdapter.detect(&json!({
            "source": "orders",
            "detail-type": "OrderPlaced",
            "detail": "not-an-object"
        })));
    }

    #[test]
    fn event_bus_carries_detail_map() {
        let event = json!({
            "source": "orders",
            "detail-type": "OrderPlaced",
            "detail": {"id": 7, "total": 10.5}
        });
        let request = EventBusAdapter.adapt(&event).unwrap();
        assert_eq!(request.trigger, TriggerKind::EventBus);
        assert_eq!(request.detail_type, "OrderPlaced");
        assert_eq!(request.detail.get("id"), Some(&json!(7)));
        assert_eq!(request.trigger_key, "orders");
    }
}
