//! Websocket frame adapter
//!
//! Frames are distinguished by `requestContext.connectionId`; the runtime's
//! route key selects between `$connect`, `$disconnect`, `$default`, and
//! application-defined actions.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::request::{Request, TriggerKind};

use super::EventAdapter;

/// Websocket connect/disconnect/message adapter
pub struct WebsocketAdapter;

impl EventAdapter for WebsocketAdapter {
    fn trigger(&self) -> TriggerKind {
        TriggerKind::Websocket
    }

    fn detect(&self, event: &Value) -> bool {
        event.pointer("/requestContext/connectionId").is_some()
            && event.pointer("/requestContext/routeKey").is_some()
    }

    fn adapt(&self, event: &Value) -> Result<Request> {
        let connection_id = event
            .pointer("/requestContext/connectionId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::bad_request("missing connectionId"))?;
        let route_key = event
            .pointer("/requestContext/routeKey")
            .and_then(Value::as_str)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| Error::bad_request("missing routeKey"))?;

        let mut request = Request::new(TriggerKind::Websocket);
        request.connection_id = connection_id.to_string();
        request.trigger_key = route_key.to_string();
        if let Some(body) = event.get("body").and_then(Value::as_str) {
            request.body = body.as_bytes().to_vec();
        }
        request.is_base64_encoded = event
            .get("isBase64Encoded")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        request.raw_event = event.clone();
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(route_key: &str) -> Value {
        json!({
            "requestContext": {"connectionId": "conn-1", "routeKey": route_key},
            "body": "{\"action\":\"ping\"}"
        })
    }

    #[test]
    fn detects_connection_frames() {
        assert!(WebsocketAdapter.detect(&frame("$connect")));
        assert!(!WebsocketAdapter.detect(&json!({"requestContext": {"routeKey": "$connect"}})));
    }

    #[test]
    fn normalizes_route_key_and_connection() {
        for key in ["$connect", "$disconnect", "$default", "sendMessage"] {
            let request = WebsocketAdapter.adapt(&frame(key)).unwrap();
            assert_eq!(request.trigger, TriggerKind::Websocket);
            assert_eq!(request.connection_id, "conn-1");
            assert_eq!(request.trigger_key, key);
        }
    }

    #[test]
    fn body_is_carried() {
        let request = WebsocketAdapter.adapt(&frame("$default")).unwrap();
        assert_eq!(request.body, br#"{"action":"ping"}"#.to_vec());
    }
}
