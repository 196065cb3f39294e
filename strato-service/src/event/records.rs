//! Batched record adapters: queue, object store, change stream
//!
//! Batched adapters classify homogeneous batches by the first record's
//! event source; mixed batches match no adapter and fall through to Unknown.
//! Each adapter builds one [`Record`] per element and synthesizes a `POST`
//! method with a default path derived from the vendor event source, so batch
//! handlers can also be registered through the ordinary routing API.

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::request::{Record, Request, TriggerKind};

use super::EventAdapter;

const QUEUE_SOURCE: &str = "aws:sqs";
const OBJECT_STORE_SOURCE: &str = "aws:s3";
const STREAM_SOURCE: &str = "aws:dynamodb";

/// True when every record in the batch carries the given event source
fn homogeneous(event: &Value, source: &str) -> bool {
    let Some(records) = event.get("Records").and_then(Value::as_array) else {
        return false;
    };
    !records.is_empty()
        && records.iter().all(|record| {
            record.get("eventSource").and_then(Value::as_str) == Some(source)
        })
}

fn records_of(event: &Value) -> Result<&Vec<Value>> {
    event
        .get("Records")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::bad_request("missing Records"))
}

/// Shared scaffolding for batched requests: raw-event body, synthetic route
fn batched_request(trigger: TriggerKind, event: &Value, default_path: &str) -> Result<Request> {
    let mut request = Request::new(trigger);
    request.method = "POST".to_string();
    request.path = default_path.to_string();
    request.body = serde_json::to_vec(event)
        .map_err(|err| Error::bad_request(format!("unserializable event: {}", err)))?;
    request.raw_event = event.clone();
    Ok(request)
}

fn attributes_of(record: &Value, skip: &[&str]) -> Map<String, Value> {
    record
        .as_object()
        .map(|map| {
            map.iter()
                .filter(|(k, _)| !skip.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// Trailing segment of a colon-delimited source ARN (the queue name)
fn arn_resource(record: &Value) -> String {
    record
        .get("eventSourceARN")
        .and_then(Value::as_str)
        .and_then(|arn| arn.rsplit(':').next())
        .unwrap_or_default()
        .to_string()
}

// ============================================================================
// Queue batches
// ============================================================================

/// Queue message batch adapter
pub struct QueueAdapter;

impl EventAdapter for QueueAdapter {
    fn trigger(&self) -> TriggerKind {
        TriggerKind::Queue
    }

    fn detect(&self, event: &Value) -> bool {
        homogeneous(event, QUEUE_SOURCE)
    }

    fn adapt(&self, event: &Value) -> Result<Request> {
        let mut request = batched_request(TriggerKind::Queue, event, "/sqs")?;
        for record in records_of(event)? {
            request.records.push(Record {
                event_source: QUEUE_SOURCE.to_string(),
                id: record
                    .get("messageId")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                body: record
                    .get("body")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                attributes: attributes_of(record, &["body", "eventSource"]),
                raw: record.clone(),
            });
        }
        request.trigger_key = records_of(event)?
            .first()
            .map(arn_resource)
            .unwrap_or_default();
        Ok(request)
    }
}

// ============================================================================
// Object-store notifications
// ============================================================================

/// Object-store notification batch adapter
pub struct ObjectStoreAdapter;

impl EventAdapter for ObjectStoreAdapter {
    fn trigger(&self) -> TriggerKind {
        TriggerKind::ObjectStore
    }

    fn detect(&self, event: &Value) -> bool {
        homogeneous(event, OBJECT_STORE_SOURCE)
    }

    fn adapt(&self, event: &Value) -> Result<Request> {
        let mut request = batched_request(TriggerKind::ObjectStore, event, "/s3")?;
        for record in records_of(event)? {
            let key = record
                .pointer("/s3/object/key")
                .and_then(Value::as_str)
                .unwrap_or_default();
            request.records.push(Record {
                event_source: OBJECT_STORE_SOURCE.to_string(),
                id: key.to_string(),
                body: record.to_string(),
                attributes: attributes_of(record, &["eventSource"]),
                raw: record.clone(),
            });
        }
        request.trigger_key = records_of(event)?
            .first()
            .and_then(|r| r.pointer("/s3/bucket/name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(request)
    }
}

// ============================================================================
// Change-stream batches
// ============================================================================

/// Change-stream record batch adapter
pub struct StreamChangeAdapter;

impl EventAdapter for StreamChangeAdapter {
    fn trigger(&self) -> TriggerKind {
        TriggerKind::StreamChange
    }

    fn detect(&self, event: &Value) -> bool {
        homogeneous(event, STREAM_SOURCE)
    }

    fn adapt(&self, event: &Value) -> Result<Request> {
        let mut request = batched_request(TriggerKind::StreamChange, event, "/dynamodb")?;
        for record in records_of(event)? {
            request.records.push(Record {
                event_source: STREAM_SOURCE.to_string(),
                id: record
                    .get("eventID")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                body: record
                    .get("dynamodb")
                    .map(Value::to_string)
                    .unwrap_or_default(),
                attributes: attributes_of(record, &["dynamodb", "eventSource"]),
                raw: record.clone(),
            });
        }
        // Table name sits between "table/" and "/stream" in the source ARN
        request.trigger_key = records_of(event)?
            .first()
            .and_then(|r| r.get("eventSourceARN"))
            .and_then(Value::as_str)
            .and_then(|arn| arn.split("table/").nth(1))
            .and_then(|rest| rest.split('/').next())
            .unwrap_or_default()
            .to_string();
        Ok(request)
    }
}
