//! Type-safe request identifiers
//!
//! Request ids use UUIDv7 for time-sortability, making them ideal for log
//! correlation across a fleet of short-lived function instances:
//!
//! ```rust
//! use strato_service::ids::RequestId;
//!
//! let request_id = RequestId::new();
//! assert!(request_id.as_str().starts_with("req_"));
//! ```

use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A prefixed request identifier for log correlation.
///
/// Format: `req_<uuidv7>`, e.g. `req_0190a6e1-7c2f-7d10-b0e4-2a9f6c1d8e42`.
/// UUIDv7 keeps ids time-sortable, so a lexicographic sort of request ids is
/// also a rough chronological sort.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// The prefix used for request ids
    pub const PREFIX: &'static str = "req";

    /// Creates a new time-sortable request id.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("{}_{}", Self::PREFIX, Uuid::now_v7()))
    }

    /// Returns the request id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = RequestIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(raw) = s.strip_prefix("req_") else {
            return Err(RequestIdError::InvalidPrefix {
                expected: Self::PREFIX.to_string(),
                actual: s.split('_').next().unwrap_or("").to_string(),
            });
        };
        Uuid::from_str(raw).map_err(RequestIdError::Parse)?;
        Ok(Self(s.to_string()))
    }
}

impl AsRef<str> for RequestId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<RequestId> for String {
    fn from(id: RequestId) -> Self {
        id.0
    }
}

/// Error type for request id parsing.
#[derive(Debug, thiserror::Error)]
pub enum RequestIdError {
    /// The id body could not be parsed as a UUID.
    #[error("failed to parse request id: {0}")]
    Parse(#[from] uuid::Error),

    /// The prefix was not the expected value.
    #[error("invalid prefix: expected '{expected}', got '{actual}'")]
    InvalidPrefix {
        /// The expected prefix.
        expected: String,
        /// The actual prefix found.
        actual: String,
    },
}
