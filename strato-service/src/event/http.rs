//! HTTP proxy event adapters (payload formats 1.0 and 2.0)
//!
//! Header keys are lower-cased during normalization so `ctx.header()` lookups
//! behave identically across both payload generations; values are preserved
//! verbatim. Each HTTP request carries a single synthetic record so
//! batch-style middleware can treat every trigger uniformly.

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::request::{Record, Request, TriggerKind};

use super::EventAdapter;

/// Copy a JSON string map into string pairs, skipping non-string values
fn string_map(value: Option<&Value>) -> Vec<(String, String)> {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn apply_common(request: &mut Request, event: &Value) {
    for (key, value) in string_map(event.get("headers")) {
        request.insert_header(key.to_ascii_lowercase(), value);
    }
    for (key, value) in string_map(event.get("queryStringParameters")) {
        request.query_params.insert(key, value);
    }
    for (key, value) in string_map(event.get("pathParameters")) {
        request.path_params.insert(key, value);
    }
    if let Some(body) = event.get("body").and_then(Value::as_str) {
        request.body = body.as_bytes().to_vec();
    }
    request.is_base64_encoded = event
        .get("isBase64Encoded")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    request.raw_event = event.clone();
}

fn synthetic_record(event: &Value, id: &str) -> Record {
    Record {
        event_source: "http".to_string(),
        id: id.to_string(),
        body: event
            .get("body")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        attributes: Map::new(),
        raw: event.clone(),
    }
}

// ============================================================================
// Payload format 2.0
// ============================================================================

/// HTTP proxy adapter for payload format 2.0
pub struct HttpV2Adapter;

impl EventAdapter for HttpV2Adapter {
    fn trigger(&self) -> TriggerKind {
        TriggerKind::HttpV2
    }

    fn detect(&self, event: &Value) -> bool {
        event.get("version").and_then(Value::as_str) == Some("2.0")
            && event.get("routeKey").is_some()
            && event
                .pointer("/requestContext/http")
                .map(Value::is_object)
                .unwrap_or(false)
    }

    fn adapt(&self, event: &Value) -> Result<Request> {
        let http = event
            .pointer("/requestContext/http")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::bad_request("missing requestContext.http"))?;

        let method = http
            .get("method")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| Error::bad_request("missing http method"))?;
        let path = http
            .get("path")
            .and_then(Value::as_str)
            .or_else(|| event.get("rawPath").and_then(Value::as_str))
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::bad_request("missing http path"))?;

        let mut request = Request::new(TriggerKind::HttpV2);
        request.method = method.to_ascii_uppercase();
        request.path = path.to_string();
        request.trigger_key = event
            .get("routeKey")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        apply_common(&mut request, event);

        let request_id = event
            .pointer("/requestContext/requestId")
            .and_then(Value::as_str)
            .unwrap_or_default();
        request.records.push(synthetic_record(event, request_id));
        Ok(request)
    }
}

// ============================================================================
// Payload format 1.0
// ============================================================================

/// REST-style HTTP proxy adapter (payload format 1.0)
pub struct HttpV1Adapter;

impl EventAdapter for HttpV1Adapter {
    fn trigger(&self) -> TriggerKind {
        TriggerKind::HttpV1
    }

    fn detect(&self, event: &Value) -> bool {
        let version_ok = match event.get("version").and_then(Value::as_str) {
            None => true,
            Some("1.0") => true,
            Some(_) => false,
        };
        version_ok && event.get("httpMethod").is_some() && event.get("resource").is_some()
    }

    fn adapt(&self, event: &Value) -> Result<Request> {
        let method = event
            .get("httpMethod")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| Error::bad_request("missing httpMethod"))?;
        let path = event
            .get("path")
            .and_then(Value::as_str)
            .or_else(|| event.get("resource").and_then(Value::as_str))
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::bad_request("missing path"))?;

        let mut request = Request::new(TriggerKind::HttpV1);
        request.method = method.to_ascii_uppercase();
        request.path = path.to_string();
        request.trigger_key = event
            .get("resource")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        apply_common(&mut request, event);

        // Fall back to multi-value headers; first value wins
        if let Some(multi) = event.get("multiValueHeaders").and_then(Value::as_object) {
            for (key, values) in multi {
                if let Some(first) = values
                    .as_array()
                    .and_then(|v| v.first())
                    .and_then(Value::as_str)
                {
                    request.insert_header(key.to_ascii_lowercase(), first.to_string());
                }
            }
        }

        let request_id = event
            .pointer("/requestContext/requestId")
            .and_then(Value::as_str)
            .unwrap_or_default();
        request.records.push(synthetic_record(event, request_id));
        Ok(request)
    }
}
