//! Structured log entries
//!
//! Entries are immutable once enqueued. Correlation ids are lifted out of the
//! free-form field map into first-class columns so downstream queries never
//! depend on field-map key conventions.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Log severity accepted by the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    /// Diagnostic detail
    Debug,
    /// Normal operational events
    Info,
    /// Recoverable anomalies
    Warn,
    /// Failures requiring attention
    Error,
}

impl Level {
    /// Uppercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

/// UTC timestamp serialized with millisecond precision
fn serialize_millis<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// One structured log entry
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// UTC timestamp, millisecond precision
    #[serde(serialize_with = "serialize_millis")]
    pub timestamp: DateTime<Utc>,

    /// Severity
    pub level: Level,

    /// Human-readable message
    pub message: String,

    /// Correlation id of the originating request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Tenant the request executed for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Acting user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Distributed trace id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// Span within the trace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,

    /// Remaining free-form fields, already redacted
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
}

impl LogEntry {
    /// Build an entry, lifting correlation ids out of the field map
    pub fn new(level: Level, message: impl Into<String>, mut fields: Map<String, Value>) -> Self {
        let mut lift = |key: &str| {
            fields
                .remove(key)
                .and_then(|v| v.as_str().map(str::to_string))
        };
        let request_id = lift("request_id");
        let tenant_id = lift("tenant_id");
        let user_id = lift("user_id");
        let trace_id = lift("trace_id");
        let span_id = lift("span_id");

        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            request_id,
            tenant_id,
            user_id,
            trace_id,
            span_id,
            fields,
        }
    }
}
