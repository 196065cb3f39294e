//! Collaborator seams for the log sink
//!
//! The downstream log service and the error notifier are consumed through
//! narrow async traits so the core never links a concrete cloud SDK. The
//! in-memory implementations back the test suite.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;

use super::entry::LogEntry;

/// Failure reported by a transport operation
#[derive(Debug, Error)]
#[error("transport error: {message}")]
pub struct TransportError {
    /// What went wrong
    pub message: String,

    /// Sequence token the service reported as current, when it did
    pub current_token: Option<String>,

    /// Set when a create call failed because the target already exists
    pub already_exists: bool,
}

impl TransportError {
    /// Plain transport failure
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            current_token: None,
            already_exists: false,
        }
    }

    /// Rejected batch carrying the token the service expects next
    pub fn invalid_token(message: impl Into<String>, current: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            current_token: Some(current.into()),
            already_exists: false,
        }
    }

    /// Ignorable already-exists failure from a create call
    pub fn already_exists() -> Self {
        Self {
            message: "already exists".to_string(),
            current_token: None,
            already_exists: true,
        }
    }
}

/// Downstream log service operations
#[async_trait]
pub trait LogTransport: Send + Sync {
    /// Create the log group; already-exists is ignorable
    async fn create_group(&self, group: &str) -> Result<(), TransportError>;

    /// Create a stream within the group; already-exists is ignorable
    async fn create_stream(&self, group: &str, stream: &str) -> Result<(), TransportError>;

    /// Submit a batch under the current sequence token, returning the next
    async fn put_events(
        &self,
        group: &str,
        stream: &str,
        events: &[LogEntry],
        sequence_token: Option<&str>,
    ) -> Result<Option<String>, TransportError>;
}

/// Error notification hook, called from the sink's background task
#[async_trait]
pub trait ErrorNotifier: Send + Sync {
    /// Deliver one ERROR entry; failures are counted, never retried
    async fn notify(&self, entry: &LogEntry) -> Result<(), TransportError>;
}

// ============================================================================
// In-memory implementations
// ============================================================================

/// In-memory transport capturing flushed batches, for tests and local runs
#[derive(Default)]
pub struct MemoryTransport {
    groups: Mutex<HashSet<String>>,
    streams: Mutex<HashSet<String>>,
    batches: Mutex<Vec<Vec<LogEntry>>>,
    seen_tokens: Mutex<Vec<Option<String>>>,
    token_counter: AtomicU64,
    /// When set, every put fails with this message
    fail_with: Mutex<Option<String>>,
}

impl MemoryTransport {
    /// Empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// All batches flushed so far
    pub fn batches(&self) -> Vec<Vec<LogEntry>> {
        self.batches.lock().expect("batches lock").clone()
    }

    /// All entries across batches, flattened in flush order
    pub fn entries(&self) -> Vec<LogEntry> {
        self.batches().into_iter().flatten().collect()
    }

    /// Sequence tokens received with each put, in order
    pub fn seen_tokens(&self) -> Vec<Option<String>> {
        self.seen_tokens.lock().expect("tokens lock").clone()
    }

    /// Make every subsequent put fail
    pub fn fail_puts(&self, message: impl Into<String>) {
        *self.fail_with.lock().expect("fail lock") = Some(message.into());
    }

    /// Restore normal operation
    pub fn heal(&self) {
        *self.fail_with.lock().expect("fail lock") = None;
    }
}

#[async_trait]
impl LogTransport for MemoryTransport {
    async fn create_group(&self, group: &str) -> Result<(), TransportError> {
        let mut groups = self.groups.lock().expect("groups lock");
        if !groups.insert(group.to_string()) {
            return Err(TransportError::already_exists());
        }
        Ok(())
    }

    async fn create_stream(&self, group: &str, stream: &str) -> Result<(), TransportError> {
        let mut streams = self.streams.lock().expect("streams lock");
        if !streams.insert(format!("{}/{}", group, stream)) {
            return Err(TransportError::already_exists());
        }
        Ok(())
    }

    async fn put_events(
        &self,
        _group: &str,
        _stream: &str,
        events: &[LogEntry],
        sequence_token: Option<&str>,
    ) -> Result<Option<String>, TransportError> {
        if let Some(message) = self.fail_with.lock().expect("fail lock").clone() {
            return Err(TransportError::new(message));
        }
        self.seen_tokens
            .lock()
            .expect("tokens lock")
            .push(sequence_token.map(str::to_string));
        self.batches
            .lock()
            .expect("batches lock")
            .push(events.to_vec());
        let next = self.token_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(format!("seq-{}", next)))
    }
}

/// Transport that discards everything; the default when none is wired
pub struct NullTransport;

#[async_trait]
impl LogTransport for NullTransport {
    async fn create_group(&self, _group: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn create_stream(&self, _group: &str, _stream: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn put_events(
        &self,
        _group: &str,
        _stream: &str,
        _events: &[LogEntry],
        _sequence_token: Option<&str>,
    ) -> Result<Option<String>, TransportError> {
        Ok(None)
    }
}

/// Notifier that records delivered entries, for tests
#[derive(Default)]
pub struct MemoryNotifier {
    delivered: Mutex<Vec<LogEntry>>,
    fail: Mutex<bool>,
}

impl MemoryNotifier {
    /// Empty notifier
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries delivered so far
    pub fn delivered(&self) -> Vec<LogEntry> {
        self.delivered.lock().expect("delivered lock").clone()
    }

    /// Make subsequent notifications fail
    pub fn fail_next(&self) {
        *self.fail.lock().expect("fail lock") = true;
    }
}

#[async_trait]
impl ErrorNotifier for MemoryNotifier {
    async fn notify(&self, entry: &LogEntry) -> Result<(), TransportError> {
        if *self.fail.lock().expect("fail lock") {
            return Err(TransportError::new("notifier unavailable"));
        }
        self.delivered
            .lock()
            .expect("delivered lock")
            .push(entry.clone());
        Ok(())
    }
}
