//! Structured error types and reply-body conversion
//!
//! Every error that crosses the framework boundary is an [`Error`] carrying a
//! machine-readable kind code, a human message, an HTTP status, and an
//! optional detail map. Internal causes ride along for logging but are never
//! serialized into the wire body.

use chrono::Utc;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error as ThisError;

/// Result type alias using the framework error
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Error kinds
// ============================================================================

/// Machine-readable error taxonomy with default HTTP status mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Request body failed field-level validation
    Validation,
    /// Malformed or undecodable request
    BadRequest,
    /// Missing or invalid credentials
    Unauthorized,
    /// Authenticated but not permitted
    Forbidden,
    /// No matching route or resource
    NotFound,
    /// State conflict with the current resource
    Conflict,
    /// Caller exceeded its request budget
    RateLimited,
    /// Unexpected failure inside the framework or handler
    Internal,
    /// A scoped deadline elapsed before completion
    DeadlineExceeded,
    /// A downstream dependency is unreachable
    Unavailable,
    /// A concurrent request holds the idempotency lock for this key
    IdempotencyConflict,
    /// The response was written twice
    AlreadyWritten,
    /// No adapter recognized the incoming event shape
    UnrecognizedEvent,
}

impl ErrorKind {
    /// Wire code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::BadRequest => "BadRequest",
            Self::Unauthorized => "Unauthorized",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "NotFound",
            Self::Conflict => "Conflict",
            Self::RateLimited => "RateLimited",
            Self::Internal => "InternalError",
            Self::DeadlineExceeded => "DeadlineExceeded",
            Self::Unavailable => "Unavailable",
            Self::IdempotencyConflict => "IdempotencyConflict",
            Self::AlreadyWritten => "AlreadyWritten",
            Self::UnrecognizedEvent => "UnrecognizedEvent",
        }
    }

    /// Default HTTP status for this kind
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation | Self::BadRequest | Self::UnrecognizedEvent => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict | Self::IdempotencyConflict => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal | Self::AlreadyWritten => StatusCode::INTERNAL_SERVER_ERROR,
            Self::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// Structured error
// ============================================================================

/// Structured framework error
///
/// The cause chain (`source`) is available for logging but is never part of
/// the serialized reply body.
#[derive(Debug, ThisError)]
#[error("{kind}: {message}")]
pub struct Error {
    /// Error taxonomy kind
    pub kind: ErrorKind,
    /// Human-readable message, safe to return to callers
    pub message: String,
    /// HTTP status used when this error is written to a response
    pub status: StatusCode,
    /// Optional structured details (e.g., per-field validation rules)
    pub details: Option<Map<String, Value>>,
    /// Request id copied from the invocation context, when known
    pub request_id: Option<String>,
    /// Unix timestamp (seconds) at construction
    pub timestamp: i64,
    /// Wrapped cause, logged but never serialized
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Create an error of the given kind with its default status
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: kind.status(),
            details: None,
            request_id: None,
            timestamp: Utc::now().timestamp(),
            source: None,
        }
    }

    /// Validation failure carrying a field → rule-list map
    pub fn validation(message: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self::new(ErrorKind::Validation, message).with_details(fields)
    }

    /// Malformed request
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// Missing or invalid credentials
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    /// Authenticated but not permitted
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    /// Missing route or resource
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// State conflict
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Request budget exceeded
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    /// Unexpected internal failure
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Scoped deadline elapsed
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeadlineExceeded, message)
    }

    /// Downstream dependency unreachable
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    /// A concurrent request holds the idempotency lock
    pub fn idempotency_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IdempotencyConflict, message)
    }

    /// The response was already written
    pub fn already_written() -> Self {
        Self::new(ErrorKind::AlreadyWritten, "response already written")
    }

    /// No adapter recognized the event shape
    pub fn unrecognized_event(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnrecognizedEvent, message)
    }

    /// Override the HTTP status
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Attach a full detail map
    pub fn with_details(mut self, details: Map<String, Value>) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach a single detail entry
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Stamp the originating request id
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Wrap an internal cause; logged at ERROR, never serialized
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Serializable reply body for this error
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.kind.code().to_string(),
            message: self.message.clone(),
            details: self.details.clone(),
            request_id: self.request_id.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Wrap any error as an internal error; the original becomes the cause
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::bad_request(format!("invalid JSON: {}", err)).with_source(err)
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::internal(format!("configuration error: {}", err)).with_source(err)
    }
}

// ============================================================================
// Wire body
// ============================================================================

/// Error reply body
///
/// `{code, message, details?, request_id, timestamp}` per the reply contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable kind code
    pub code: String,

    /// Human-readable message
    pub message: String,

    /// Structured details, present for validation failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,

    /// Originating request id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Unix timestamp (seconds)
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_status_mapping() {
        assert_eq!(ErrorKind::Validation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::BadRequest.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorKind::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorKind::RateLimited.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ErrorKind::Internal.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ErrorKind::DeadlineExceeded.status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ErrorKind::Unavailable.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ErrorKind::IdempotencyConflict.status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ErrorKind::AlreadyWritten.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ErrorKind::UnrecognizedEvent.status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn kind_codes() {
        assert_eq!(ErrorKind::Validation.code(), "ValidationError");
        assert_eq!(ErrorKind::Internal.code(), "InternalError");
        assert_eq!(ErrorKind::IdempotencyConflict.code(), "IdempotencyConflict");
    }

    #[test]
    fn builder_chain() {
        let err = Error::not_found("user missing")
            .with_detail("entity", "user")
            .with_request_id("req_1");
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.request_id.as_deref(), Some("req_1"));
        assert_eq!(
            err.details.as_ref().and_then(|d| d.get("entity")),
            Some(&Value::String("user".into()))
        );
    }

    #[test]
    fn body_never_carries_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "socket reset");
        let err = Error::internal("boom").with_source(io);
        let body = serde_json::to_value(err.to_body()).unwrap();
        assert_eq!(body["code"], "InternalError");
        assert_eq!(body["message"], "boom");
        assert!(body.get("source").is_none());
        assert!(!body.to_string().contains("socket reset"));
    }

    #[test]
    fn source_chain_preserved_for_logging() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "socket reset");
        let err = Error::internal("boom").with_source(io);
        let source = std::error::Error::source(&err).expect("cause retained");
        assert!(source.to_string().contains("socket reset"));
    }

    #[test]
    fn validation_carries_field_map() {
        let mut fields = Map::new();
        fields.insert("email".into(), serde_json::json!(["email"]));
        let err = Error::validation("validation failed", fields);
        let body = err.to_body();
        assert_eq!(body.code, "ValidationError");
        assert_eq!(
            body.details.unwrap().get("email"),
            Some(&serde_json::json!(["email"]))
        );
    }
}
