//! Idempotency-key replay middleware
//!
//! For protected methods carrying an `Idempotency-Key` header, the first
//! request takes a lock, runs the handler with response buffering enabled,
//! and stores the captured response under the key with a TTL. A later
//! duplicate within the TTL replays the stored response verbatim, marked with
//! `X-Idempotent-Replay: true`, and skips the handler. A concurrent duplicate
//! while the first is in flight receives `IdempotencyConflict`: the store
//! serializes requests per key, and the first populates the record before
//! releasing its lock.

use async_trait::async_trait;
use dashmap::DashMap;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::handler::{ArcHandler, Handler};
use crate::response::ResponseBuffer;

use super::Middleware;

/// Header identifying an operation for exactly-once replay
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Header marking a replayed response
pub const REPLAY_HEADER: &str = "X-Idempotent-Replay";

/// A captured response in external-store form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResponse {
    /// Captured status code
    pub status: u16,

    /// Captured headers
    pub headers: HashMap<String, String>,

    /// Captured payload
    pub payload: Value,

    /// Whether the payload was base64-encoded binary
    pub is_base64_encoded: bool,
}

impl StoredResponse {
    fn from_buffer(buffer: &ResponseBuffer) -> Self {
        Self {
            status: buffer.status.as_u16(),
            headers: buffer.headers.clone(),
            payload: (*buffer.payload).clone(),
            is_base64_encoded: buffer.is_base64_encoded,
        }
    }

    fn to_buffer(&self) -> ResponseBuffer {
        ResponseBuffer {
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            headers: self.headers.clone(),
            payload: Arc::new(self.payload.clone()),
            is_base64_encoded: self.is_base64_encoded,
        }
    }
}

/// External store contract for idempotency records
///
/// `lock` and `put_if_absent` must be atomic per key; the in-memory
/// implementation relies on its map's per-entry locking for that. `unlock`
/// must be idempotent and a no-op for unheld locks, and must tolerate
/// racing lock expiry — the winning request calls it after populating the
/// record, on the success and failure paths alike.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Stored response for the key, if present and unexpired
    async fn get(&self, key: &str) -> Result<Option<StoredResponse>>;

    /// Store the record unless one exists; true when stored
    async fn put_if_absent(
        &self,
        key: &str,
        record: StoredResponse,
        ttl: Duration,
    ) -> Result<bool>;

    /// Take the in-flight lock; false when another request holds it
    async fn lock(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Release the in-flight lock, keeping any stored record
    async fn unlock(&self, key: &str);
}

// ============================================================================
// In-memory store
// ============================================================================

struct MemoryEntry {
    record: Option<StoredResponse>,
    record_expires: Option<Instant>,
    locked_until: Option<Instant>,
}

impl MemoryEntry {
    fn record_live(&self) -> bool {
        self.record.is_some()
            && self
                .record_expires
                .map(|at| Instant::now() < at)
                .unwrap_or(false)
    }

    fn locked(&self) -> bool {
        self.locked_until
            .map(|at| Instant::now() < at)
            .unwrap_or(false)
    }
}

/// Process-local idempotency store
#[derive(Default)]
pub struct MemoryIdempotencyStore {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryIdempotencyStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn get(&self, key: &str) -> Result<Option<StoredResponse>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.record_live() {
                return Ok(entry.record.clone());
            }
        }
        Ok(None)
    }

    async fn put_if_absent(
        &self,
        key: &str,
        record: StoredResponse,
        ttl: Duration,
    ) -> Result<bool> {
        let mut entry = self.entries.entry(key.to_string()).or_insert(MemoryEntry {
            record: None,
            record_expires: None,
            locked_until: None,
        });
        if entry.record_live() {
            return Ok(false);
        }
        entry.record = Some(record);
        entry.record_expires = Some(Instant::now() + ttl);
        Ok(true)
    }

    async fn lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut entry = self.entries.entry(key.to_string()).or_insert(MemoryEntry {
            record: None,
            record_expires: None,
            locked_until: None,
        });
        if entry.locked() {
            return Ok(false);
        }
        entry.locked_until = Some(Instant::now() + ttl);
        Ok(true)
    }

    async fn unlock(&self, key: &str) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.locked_until = None;
        }
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Idempotency replay middleware
pub struct Idempotency {
    store: Arc<dyn IdempotencyStore>,
    methods: Vec<String>,
    ttl: Duration,
    lock_ttl: Duration,
}

impl Idempotency {
    /// Protect POST requests with a 24h record TTL
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            store,
            methods: vec!["POST".to_string()],
            ttl: Duration::from_secs(24 * 60 * 60),
            lock_ttl: Duration::from_secs(30),
        }
    }

    /// Override the protected methods
    pub fn methods(mut self, methods: &[&str]) -> Self {
        self.methods = methods.iter().map(|m| m.to_ascii_uppercase()).collect();
        self
    }

    /// Override the record TTL
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Override the in-flight lock TTL
    pub fn lock_ttl(mut self, lock_ttl: Duration) -> Self {
        self.lock_ttl = lock_ttl;
        self
    }
}

struct IdempotencyHandler {
    store: Arc<dyn IdempotencyStore>,
    methods: Vec<String>,
    ttl: Duration,
    lock_ttl: Duration,
    next: ArcHandler,
}

#[async_trait]
impl Handler for IdempotencyHandler {
    async fn call(&self, ctx: &mut Context) -> Result<()> {
        if !self.methods.iter().any(|m| *m == ctx.request.method) {
            return self.next.call(ctx).await;
        }
        let key = ctx.header(IDEMPOTENCY_KEY_HEADER).to_string();
        if key.is_empty() {
            return self.next.call(ctx).await;
        }
        let cache_key = format!("{}:{}:{}", ctx.request.method, ctx.request.path, key);

        if let Some(stored) = self.store.get(&cache_key).await? {
            ctx.response.replay(&stored.to_buffer());
            ctx.response.set_header(REPLAY_HEADER, "true");
            return Ok(());
        }

        if !self.store.lock(&cache_key, self.lock_ttl).await? {
            return Err(Error::idempotency_conflict(
                "a request with this idempotency key is in flight",
            )
            .with_request_id(ctx.request_id.clone()));
        }

        ctx.enable_response_buffering();
        let result = self.next.call(ctx).await;

        match &result {
            Ok(()) => {
                if let Some(buffer) = ctx.get_response_buffer() {
                    if ctx.response.is_written() {
                        let record = StoredResponse::from_buffer(buffer);
                        let _ = self.store.put_if_absent(&cache_key, record, self.ttl).await?;
                    }
                }
                self.store.unlock(&cache_key).await;
            }
            Err(_) => {
                self.store.unlock(&cache_key).await;
            }
        }
        result
    }
}

impl Middleware for Idempotency {
    fn wrap(&self, next: ArcHandler) -> ArcHandler {
        Arc::new(IdempotencyHandler {
            store: Arc::clone(&self.store),
            methods: self.methods.clone(),
            ttl: self.ttl,
            lock_ttl: self.lock_ttl,
            next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::fn_handler;
    use crate::metrics::Metrics;
    use crate::request::{Request, TriggerKind};
    use crate::sink::Logger;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    fn post_context(key: Option<&str>) -> Context {
        let mut request = Request::new(TriggerKind::HttpV2);
        request.method = "POST".to_string();
        request.path = "/payments".to_string();
        if let Some(key) = key {
            request.insert_header(IDEMPOTENCY_KEY_HEADER, key);
        }
        Context::new(
            request,
            "req_idem".to_string(),
            Logger::disabled(),
            Arc::new(Metrics::disabled()),
            CancellationToken::new(),
        )
    }

    fn counting_handler(counter: Arc<AtomicU32>) -> ArcHandler {
        fn_handler(move |ctx| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                ctx.created(&json!({"transaction": format!("tx_{}", n)}))
            })
        })
    }

    #[tokio::test]
    async fn duplicate_replays_stored_response() {
        let store = Arc::new(MemoryIdempotencyStore::new());
        let calls = Arc::new(AtomicU32::new(0));
        let handler = Idempotency::new(store).wrap(counting_handler(Arc::clone(&calls)));

        let mut first = post_context(Some("k1"));
        handler.call(&mut first).await.unwrap();
        assert_eq!(first.response.status, StatusCode::CREATED);
        let first_body = (**first.response.body().unwrap()).clone();

        let mut second = post_context(Some("k1"));
        handler.call(&mut second).await.unwrap();
        assert_eq!(second.response.status, StatusCode::CREATED);
        assert_eq!(**second.response.body().unwrap(), first_body);
        assert_eq!(
            second.response.headers.get(REPLAY_HEADER).map(String::as_str),
            Some("true")
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_run_independently() {
        let store = Arc::new(MemoryIdempotencyStore::new());
        let calls = Arc::new(AtomicU32::new(0));
        let handler = Idempotency::new(store).wrap(counting_handler(Arc::clone(&calls)));

        let mut first = post_context(Some("k1"));
        handler.call(&mut first).await.unwrap();
        let mut second = post_context(Some("k2"));
        handler.call(&mut second).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(second.response.headers.get(REPLAY_HEADER).is_none());
    }

    #[tokio::test]
    async fn concurrent_duplicate_conflicts_while_first_in_flight() {
        let store = Arc::new(MemoryIdempotencyStore::new());
        // Simulate the first request holding the lock
        assert!(store
            .lock("POST:/payments:k1", Duration::from_secs(30))
            .await
            .unwrap());

        let handler = Idempotency::new(Arc::clone(&store) as Arc<dyn IdempotencyStore>)
            .wrap(counting_handler(Arc::new(AtomicU32::new(0))));
        let mut ctx = post_context(Some("k1"));
        let err = handler.call(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::IdempotencyConflict);
    }

    #[tokio::test]
    async fn handler_errors_release_the_lock_without_storing() {
        let store = Arc::new(MemoryIdempotencyStore::new());
        let failing = fn_handler(|_| Box::pin(async { Err(Error::conflict("declined")) }));
        let handler =
            Idempotency::new(Arc::clone(&store) as Arc<dyn IdempotencyStore>).wrap(failing);

        let mut ctx = post_context(Some("k1"));
        assert!(handler.call(&mut ctx).await.is_err());

        // Lock released: a retry runs the handler again
        let calls = Arc::new(AtomicU32::new(0));
        let handler = Idempotency::new(Arc::clone(&store) as Arc<dyn IdempotencyStore>)
            .wrap(counting_handler(Arc::clone(&calls)));
        let mut retry = post_context(Some("k1"));
        handler.call(&mut retry).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn requests_without_key_bypass_the_store() {
        let store = Arc::new(MemoryIdempotencyStore::new());
        let calls = Arc::new(AtomicU32::new(0));
        let handler = Idempotency::new(store).wrap(counting_handler(Arc::clone(&calls)));

        let mut first = post_context(None);
        handler.call(&mut first).await.unwrap();
        let mut second = post_context(None);
        handler.call(&mut second).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_records_allow_reprocessing() {
        let store = Arc::new(MemoryIdempotencyStore::new());
        let calls = Arc::new(AtomicU32::new(0));
        let handler = Idempotency::new(store)
            .ttl(Duration::from_millis(20))
            .wrap(counting_handler(Arc::clone(&calls)));

        let mut first = post_context(Some("k1"));
        handler.call(&mut first).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let mut second = post_context(Some("k1"));
        handler.call(&mut second).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
