//! Response model with double-write protection and optional buffering
//!
//! The response body is held behind an `Arc` so that an enabled
//! [`ResponseBuffer`] shares the payload with the response instead of deep
//! copying it.

use http::StatusCode;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Per-invocation response carrier
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status code; defaults to 200
    pub status: StatusCode,

    /// Response headers
    pub headers: HashMap<String, String>,

    /// Opaque body value; serialized at reply time
    body: Option<Arc<Value>>,

    /// Whether the body is base64-encoded binary
    pub is_base64_encoded: bool,

    /// Set once the body has been written
    written: bool,

    /// Capture buffer, present only when buffering is enabled
    buffer: Option<ResponseBuffer>,
}

/// Snapshot of a buffered response write
///
/// Holds a reference to the payload, not a copy; middleware can read it after
/// the handler returns, derive cache keys from it, or replay it into a later
/// duplicate request.
#[derive(Debug, Clone)]
pub struct ResponseBuffer {
    /// Status at capture time
    pub status: StatusCode,

    /// Header snapshot at capture time
    pub headers: HashMap<String, String>,

    /// The captured payload, shared with the response
    pub payload: Arc<Value>,

    /// Whether the captured body was base64-encoded
    pub is_base64_encoded: bool,
}

impl Response {
    /// New unwritten response with status 200
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HashMap::new(),
            body: None,
            is_base64_encoded: false,
            written: false,
            buffer: None,
        }
    }

    /// True once a body write has committed
    pub fn is_written(&self) -> bool {
        self.written
    }

    /// The written body, if any
    pub fn body(&self) -> Option<&Arc<Value>> {
        self.body.as_ref()
    }

    /// Set a header, replacing any existing value for the key
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    /// Turn on write capture; subsequent writes are recorded in the buffer
    pub fn enable_buffering(&mut self) {
        if self.buffer.is_none() {
            self.buffer = Some(ResponseBuffer {
                status: self.status,
                headers: HashMap::new(),
                payload: Arc::new(Value::Null),
                is_base64_encoded: false,
            });
        }
    }

    /// The capture buffer, when buffering is enabled and a write occurred
    pub fn buffer(&self) -> Option<&ResponseBuffer> {
        self.buffer.as_ref()
    }

    /// Commit a body write
    ///
    /// The second write fails with `AlreadyWritten` and leaves the first
    /// intact. When buffering is enabled the write is also captured, sharing
    /// the payload allocation.
    pub fn write(&mut self, body: Value) -> Result<()> {
        if self.written {
            return Err(Error::already_written());
        }
        let payload = Arc::new(body);
        if self.buffer.is_some() {
            self.buffer = Some(ResponseBuffer {
                status: self.status,
                headers: self.headers.clone(),
                payload: Arc::clone(&payload),
                is_base64_encoded: self.is_base64_encoded,
            });
        }
        self.body = Some(payload);
        self.written = true;
        Ok(())
    }

    /// Replay a previously captured buffer into this response
    ///
    /// Used by replay middleware (idempotency, caching) to short-circuit the
    /// handler. Overwrites any prior write.
    pub fn replay(&mut self, buffer: &ResponseBuffer) {
        self.status = buffer.status;
        self.headers = buffer.headers.clone();
        self.body = Some(Arc::clone(&buffer.payload));
        self.is_base64_encoded = buffer.is_base64_encoded;
        self.written = true;
    }

    /// Reset the written bit so an error body can replace a partial write
    pub(crate) fn reset_for_error(&mut self) {
        self.written = false;
        self.body = None;
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}
