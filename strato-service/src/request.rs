//! Uniform request model and trigger taxonomy
//!
//! Every accepted event, whatever its original shape, is normalized into a
//! [`Request`] before routing. The original raw event is preserved on the
//! request as an escape hatch for handlers that need vendor-specific fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Trigger taxonomy
// ============================================================================

/// The event shape that caused the invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// REST-style HTTP proxy event (payload format 1.0)
    HttpV1,
    /// HTTP proxy event, payload format 2.0
    HttpV2,
    /// Queue message batch
    Queue,
    /// Object-store notification batch
    ObjectStore,
    /// Event-bus message
    EventBus,
    /// Scheduled timer
    Scheduled,
    /// Websocket frame
    Websocket,
    /// Change-stream record batch
    StreamChange,
    /// Unclassifiable event
    Unknown,
}

impl TriggerKind {
    /// True for HTTP proxy triggers (either payload version)
    pub fn is_http(&self) -> bool {
        matches!(self, Self::HttpV1 | Self::HttpV2)
    }

    /// True for triggers that deliver a record batch
    pub fn is_batched(&self) -> bool {
        matches!(self, Self::Queue | Self::ObjectStore | Self::StreamChange)
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HttpV1 => "http_v1",
            Self::HttpV2 => "http_v2",
            Self::Queue => "queue",
            Self::ObjectStore => "object_store",
            Self::EventBus => "event_bus",
            Self::Scheduled => "scheduled",
            Self::Websocket => "websocket",
            Self::StreamChange => "stream_change",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// Records
// ============================================================================

/// One element of a batched trigger
///
/// Each record carries its own body and source metadata; HTTP adapters
/// populate a single synthetic record so batch-style handlers can treat all
/// triggers uniformly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Record {
    /// Vendor event-source identifier (e.g. `aws:sqs`)
    pub event_source: String,

    /// Per-record identifier (message id, sequence number, object key)
    pub id: String,

    /// Record body as delivered
    pub body: String,

    /// Source-provided per-record attributes
    #[serde(default)]
    pub attributes: Map<String, Value>,

    /// The raw record value, preserved verbatim
    pub raw: Value,
}

// ============================================================================
// Request
// ============================================================================

/// Uniform request produced by the adapter layer
#[derive(Debug, Clone)]
pub struct Request {
    /// The trigger that caused this invocation; always set
    pub trigger: TriggerKind,

    /// HTTP method; empty for non-HTTP triggers unless synthesized
    pub method: String,

    /// Request path; empty for non-HTTP triggers unless synthesized
    pub path: String,

    /// Header map, case-preserving, first value wins
    headers: Vec<(String, String)>,

    /// Query string parameters
    pub query_params: HashMap<String, String>,

    /// Path parameters filled in by the router on match
    pub path_params: HashMap<String, String>,

    /// Raw body bytes
    pub body: Vec<u8>,

    /// Whether `body` is base64-encoded
    pub is_base64_encoded: bool,

    /// Event source identifier (event-bus and scheduled triggers)
    pub source: String,

    /// Event detail-type (event-bus and scheduled triggers)
    pub detail_type: String,

    /// Source-provided detail map
    pub detail: Map<String, Value>,

    /// Ordered record list; non-nil (possibly empty) for batched triggers
    pub records: Vec<Record>,

    /// Websocket connection id, when present
    pub connection_id: String,

    /// Trigger-specific dispatch key (queue name, route key, rule name)
    pub trigger_key: String,

    /// The original raw event, preserved for escape hatches
    pub raw_event: Value,
}

impl Request {
    /// Create an empty request for the given trigger
    pub fn new(trigger: TriggerKind) -> Self {
        Self {
            trigger,
            method: String::new(),
            path: String::new(),
            headers: Vec::new(),
            query_params: HashMap::new(),
            path_params: HashMap::new(),
            body: Vec::new(),
            is_base64_encoded: false,
            source: String::new(),
            detail_type: String::new(),
            detail: Map::new(),
            records: Vec::new(),
            connection_id: String::new(),
            trigger_key: String::new(),
            raw_event: Value::Null,
        }
    }

    /// Insert a header; the first value for a key wins
    pub fn insert_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if !self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(&key)) {
            self.headers.push((key, value.into()));
        }
    }

    /// Case-insensitive header lookup; empty string if absent
    pub fn header(&self, key: &str) -> &str {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    /// All headers in insertion order, case preserved
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Query parameter; empty string if absent
    pub fn query(&self, key: &str) -> &str {
        self.query_params.get(key).map(String::as_str).unwrap_or("")
    }

    /// Path parameter; empty string if absent
    pub fn param(&self, key: &str) -> &str {
        self.path_params.get(key).map(String::as_str).unwrap_or("")
    }

    /// Decoded body bytes, honoring `is_base64_encoded`
    pub fn decoded_body(&self) -> Result<Vec<u8>, base64::DecodeError> {
        if self.is_base64_encoded {
            use base64::Engine as _;
            base64::engine::general_purpose::STANDARD.decode(&self.body)
        } else {
            Ok(self.body.clone())
        }
    }
}
