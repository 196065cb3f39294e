//! Batched, bounded, concurrency-safe structured log pipeline
//!
//! Producers enqueue entries non-blockingly onto a bounded channel; a single
//! background task drains it and flushes batches to the [`LogTransport`] when
//! the batch size is reached, the flush interval fires, an explicit flush is
//! signaled, or the sink is closing. A full buffer drops the entry and bumps
//! the dropped counter; the request path never blocks on logging.
//!
//! [`Logger::with_fields`] derives a child logger that shares the buffer,
//! background task, sequence token, stats, and close-once guard with its
//! parent; only the context-field map differs. Closing any member of the
//! family closes the whole family exactly once.

pub mod entry;
pub mod redaction;
pub mod transport;

pub use entry::{Level, LogEntry};
pub use redaction::{redact_fields, redact_value, REDACTED, SANITIZED_ERROR};
pub use transport::{
    ErrorNotifier, LogTransport, MemoryNotifier, MemoryTransport, NullTransport, TransportError,
};

use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::config::Config;

// ============================================================================
// Configuration
// ============================================================================

/// Sink tuning knobs
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Downstream log group
    pub group: String,

    /// Downstream log stream
    pub stream: String,

    /// Minimum accepted level
    pub level: Level,

    /// Entries per flushed batch
    pub batch_size: usize,

    /// Background flush interval
    pub flush_interval: Duration,

    /// Bounded channel capacity
    pub buffer_size: usize,

    /// Upper bound on a single notifier call
    pub notifier_timeout: Duration,
}

impl SinkConfig {
    /// Derive sink settings from the service configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            group: config.service.name.clone(),
            stream: format!("{}-{}", config.service.name, config.service.environment),
            level: config.logger.level.parse().unwrap_or(Level::Info),
            batch_size: config.logger.batch_size.max(1),
            flush_interval: config.flush_interval(),
            buffer_size: config.buffer_size().max(1),
            notifier_timeout: Duration::from_secs(2),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// ============================================================================
// Stats
// ============================================================================

#[derive(Default)]
struct SinkStats {
    entries_logged: AtomicU64,
    dropped: AtomicU64,
    error_count: AtomicU64,
    flush_count: AtomicU64,
    last_error: StdMutex<Option<String>>,
}

/// Point-in-time view of sink counters
#[derive(Debug, Clone)]
pub struct SinkStatsSnapshot {
    /// Entries accepted onto the buffer
    pub entries_logged: u64,

    /// Entries rejected by a full buffer, a closed sink, or a failed flush
    pub dropped: u64,

    /// Flush and notification failures
    pub error_count: u64,

    /// Successful batch flushes
    pub flush_count: u64,

    /// Most recent flush failure message
    pub last_error: Option<String>,
}

enum SinkMessage {
    Entry(LogEntry),
    Flush,
    Close,
}

struct SinkShared {
    tx: mpsc::Sender<SinkMessage>,
    closed: AtomicBool,
    close_once: AtomicBool,
    stats: Arc<SinkStats>,
    worker: StdMutex<Option<JoinHandle<()>>>,
    level: Level,
}

// ============================================================================
// Logger
// ============================================================================

/// Handle onto the shared sink, carrying per-logger context fields
///
/// Cheap to clone; all clones and [`Logger::with_fields`] derivations alias
/// the same buffer, worker, token, and counters.
#[derive(Clone)]
pub struct Logger {
    shared: Arc<SinkShared>,
    fields: Map<String, Value>,
}

impl Logger {
    /// Start a sink with the given transport and no notifier
    ///
    /// Spawns the background flush task; must be called within a Tokio
    /// runtime.
    pub fn new(config: SinkConfig, transport: Arc<dyn LogTransport>) -> Self {
        Self::with_notifier(config, transport, None)
    }

    /// Start a sink with an optional error notifier
    pub fn with_notifier(
        config: SinkConfig,
        transport: Arc<dyn LogTransport>,
        notifier: Option<Arc<dyn ErrorNotifier>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.buffer_size);
        let stats = Arc::new(SinkStats::default());
        let level = config.level;

        let worker = SinkWorker {
            rx,
            transport,
            notifier,
            config,
            stats: Arc::clone(&stats),
            sequence_token: AsyncMutex::new(None),
            bootstrapped: false,
        };
        let handle = tokio::spawn(worker.run());

        Self {
            shared: Arc::new(SinkShared {
                tx,
                closed: AtomicBool::new(false),
                close_once: AtomicBool::new(false),
                stats,
                worker: StdMutex::new(Some(handle)),
                level,
            }),
            fields: Map::new(),
        }
    }

    /// Logger that discards everything; useful before wiring is complete
    pub fn disabled() -> Self {
        Self::new(
            SinkConfig {
                level: Level::Error,
                ..SinkConfig::default()
            },
            Arc::new(NullTransport),
        )
    }

    /// Derive a child sharing all sink state, with extra context fields
    ///
    /// The child aliases the parent's buffer, worker, sequence token, stats,
    /// and close-once guard; only the field map differs.
    pub fn with_fields(&self, fields: Map<String, Value>) -> Logger {
        let mut merged = self.fields.clone();
        merged.extend(fields);
        Logger {
            shared: Arc::clone(&self.shared),
            fields: merged,
        }
    }

    /// Log at DEBUG
    pub fn debug(&self, message: impl Into<String>) {
        self.log(Level::Debug, message, Map::new());
    }

    /// Log at INFO
    pub fn info(&self, message: impl Into<String>) {
        self.log(Level::Info, message, Map::new());
    }

    /// Log at WARN
    pub fn warn(&self, message: impl Into<String>) {
        self.log(Level::Warn, message, Map::new());
    }

    /// Log at ERROR
    pub fn error(&self, message: impl Into<String>) {
        self.log(Level::Error, message, Map::new());
    }

    /// Log with additional one-off fields
    pub fn log(&self, level: Level, message: impl Into<String>, fields: Map<String, Value>) {
        if level < self.shared.level {
            return;
        }
        if self.shared.closed.load(Ordering::SeqCst) {
            self.shared.stats.dropped.fetch_add(1, Ordering::SeqCst);
            return;
        }

        let mut merged = self.fields.clone();
        merged.extend(fields);
        redaction::redact_fields(&mut merged);
        let entry = LogEntry::new(level, message, merged);

        match self.shared.tx.try_send(SinkMessage::Entry(entry)) {
            Ok(()) => {
                self.shared.stats.entries_logged.fetch_add(1, Ordering::SeqCst);
            }
            Err(_) => {
                self.shared.stats.dropped.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Signal the background task to flush what it has
    pub fn flush(&self) {
        let _ = self.shared.tx.try_send(SinkMessage::Flush);
    }

    /// Stop accepting entries, drain the buffer, and wait for the worker
    ///
    /// Idempotent across the whole `with_fields` family: the first caller
    /// drains and joins; later calls return immediately.
    pub async fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        if self.shared.close_once.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shared.tx.send(SinkMessage::Close).await;
        let handle = {
            let mut guard = self.shared.worker.lock().expect("worker lock");
            guard.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Current counter values
    pub fn stats(&self) -> SinkStatsSnapshot {
        let stats = &self.shared.stats;
        SinkStatsSnapshot {
            entries_logged: stats.entries_logged.load(Ordering::SeqCst),
            dropped: stats.dropped.load(Ordering::SeqCst),
            error_count: stats.error_count.load(Ordering::SeqCst),
            flush_count: stats.flush_count.load(Ordering::SeqCst),
            last_error: stats.last_error.lock().expect("last_error lock").clone(),
        }
    }

    /// Healthy while errors stay under 10% of accepted entries
    pub fn is_healthy(&self) -> bool {
        let entries = self.shared.stats.entries_logged.load(Ordering::SeqCst);
        if entries == 0 {
            return true;
        }
        let errors = self.shared.stats.error_count.load(Ordering::SeqCst);
        (errors as f64) / (entries as f64) < 0.10
    }
}

// ============================================================================
// Background worker
// ============================================================================

struct SinkWorker {
    rx: mpsc::Receiver<SinkMessage>,
    transport: Arc<dyn LogTransport>,
    notifier: Option<Arc<dyn ErrorNotifier>>,
    config: SinkConfig,
    stats: Arc<SinkStats>,
    sequence_token: AsyncMutex<Option<String>>,
    bootstrapped: bool,
}

impl SinkWorker {
    async fn run(mut self) {
        let mut interval = tokio::time::interval(self.config.flush_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut batch: Vec<LogEntry> = Vec::with_capacity(self.config.batch_size);

        loop {
            tokio::select! {
                message = self.rx.recv() => match message {
                    Some(SinkMessage::Entry(entry)) => {
                        self.maybe_notify(&entry);
                        batch.push(entry);
                        if batch.len() >= self.config.batch_size {
                            self.flush_batch(&mut batch).await;
                        }
                    }
                    Some(SinkMessage::Flush) => {
                        self.flush_batch(&mut batch).await;
                    }
                    Some(SinkMessage::Close) | None => {
                        self.drain(&mut batch).await;
                        break;
                    }
                },
                _ = interval.tick() => {
                    self.flush_batch(&mut batch).await;
                }
            }
        }
    }

    /// Pull whatever is still queued, then flush the remainder
    async fn drain(&mut self, batch: &mut Vec<LogEntry>) {
        while let Ok(message) = self.rx.try_recv() {
            if let SinkMessage::Entry(entry) = message {
                self.maybe_notify(&entry);
                batch.push(entry);
                if batch.len() >= self.config.batch_size {
                    self.flush_batch(batch).await;
                }
            }
        }
        self.flush_batch(batch).await;
    }

    fn maybe_notify(&self, entry: &LogEntry) {
        if entry.level != Level::Error {
            return;
        }
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        let entry = entry.clone();
        let stats = Arc::clone(&self.stats);
        let timeout = self.config.notifier_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, notifier.notify(&entry)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    stats.error_count.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!(error = %err.message, "error notification failed");
                }
                Err(_) => {
                    stats.error_count.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!("error notification timed out");
                }
            }
        });
    }

    async fn ensure_bootstrapped(&mut self) -> bool {
        if self.bootstrapped {
            return true;
        }
        for result in [
            self.transport.create_group(&self.config.group).await,
            self.transport
                .create_stream(&self.config.group, &self.config.stream)
                .await,
        ] {
            if let Err(err) = result {
                if !err.already_exists {
                    self.record_error(&err.message);
                    return false;
                }
            }
        }
        self.bootstrapped = true;
        true
    }

    async fn flush_batch(&mut self, batch: &mut Vec<LogEntry>) {
        if batch.is_empty() {
            return;
        }
        if !self.ensure_bootstrapped().await {
            // Entries in a failed flush never reach a batch; account for them
            self.stats
                .dropped
                .fetch_add(batch.len() as u64, Ordering::SeqCst);
            batch.clear();
            return;
        }

        // Read-modify-write of the sequence token is a single critical section
        let mut token = self.sequence_token.lock().await;
        match self
            .transport
            .put_events(&self.config.group, &self.config.stream, batch, token.as_deref())
            .await
        {
            Ok(next) => {
                *token = next;
                self.stats.flush_count.fetch_add(1, Ordering::SeqCst);
                batch.clear();
            }
            Err(err) => {
                if let Some(current) = err.current_token.clone() {
                    *token = Some(current);
                }
                drop(token);
                self.record_error(&err.message);
                self.stats
                    .dropped
                    .fetch_add(batch.len() as u64, Ordering::SeqCst);
                batch.clear();
            }
        }
    }

    fn record_error(&self, message: &str) {
        self.stats.error_count.fetch_add(1, Ordering::SeqCst);
        *self.stats.last_error.lock().expect("last_error lock") = Some(message.to_string());
        tracing::warn!(error = message, "log flush failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Semaphore;

    fn test_config(batch_size: usize, buffer_size: usize) -> SinkConfig {
        SinkConfig {
            group: "svc".into(),
            stream: "svc-test".into(),
            level: Level::Debug,
            batch_size,
            flush_interval: Duration::from_secs(3600),
            buffer_size,
            notifier_timeout: Duration::from_millis(200),
        }
    }

    fn fields(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn flushes_when_batch_size_reached() {
        let transport = Arc::new(MemoryTransport::new());
        let logger = Logger::new(test_config(2, 10), transport.clone());
        logger.info("one");
        logger.info("two");
        logger.info("three");
        logger.close().await;

        let batches = transport.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);
    }

    #[tokio::test]
    async fn close_drains_everything() {
        let transport = Arc::new(MemoryTransport::new());
        let logger = Logger::new(test_config(100, 100), transport.clone());
        for i in 0..7 {
            logger.info(format!("entry {}", i));
        }
        logger.close().await;
        assert_eq!(transport.entries().len(), 7);
    }

    #[tokio::test]
    async fn interval_timer_flushes_partial_batches() {
        let transport = Arc::new(MemoryTransport::new());
        let config = SinkConfig {
            flush_interval: Duration::from_millis(20),
            ..test_config(100, 100)
        };
        let logger = Logger::new(config, transport.clone());
        logger.info("solo");
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(transport.entries().len(), 1);
        logger.close().await;
    }

    #[tokio::test]
    async fn explicit_flush_signal_flushes() {
        let transport = Arc::new(MemoryTransport::new());
        let logger = Logger::new(test_config(100, 100), transport.clone());
        logger.info("solo");
        logger.flush();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.entries().len(), 1);
        logger.close().await;
    }

    /// Transport that stalls until released, pinning the worker mid-flush
    struct StallTransport {
        gate: Semaphore,
        inner: MemoryTransport,
    }

    #[async_trait]
    impl LogTransport for StallTransport {
        async fn create_group(&self, _group: &str) -> Result<(), TransportError> {
            Ok(())
        }
        async fn create_stream(&self, _g: &str, _s: &str) -> Result<(), TransportError> {
            Ok(())
        }
        async fn put_events(
            &self,
            group: &str,
            stream: &str,
            events: &[LogEntry],
            token: Option<&str>,
        ) -> Result<Option<String>, TransportError> {
            let _permit = self.gate.acquire().await.expect("gate open");
            self.inner.put_events(group, stream, events, token).await
        }
    }

    #[tokio::test]
    async fn full_buffer_drops_and_counts() {
        let buffer = 4;
        let transport = Arc::new(StallTransport {
            gate: Semaphore::new(0),
            inner: MemoryTransport::new(),
        });
        let logger = Logger::new(test_config(1, buffer), transport.clone());

        // First entry occupies the worker (stalled inside put_events)
        logger.info("stuck");
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Fill the channel, then one more
        for i in 0..buffer {
            logger.info(format!("queued {}", i));
        }
        logger.info("overflow");

        let stats = logger.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.entries_logged, (buffer + 1) as u64);

        transport.gate.add_permits(1000);
        logger.close().await;
        assert_eq!(transport.inner.entries().len(), buffer + 1);
    }

    #[tokio::test]
    async fn every_entry_flushed_or_counted_dropped() {
        let transport = Arc::new(StallTransport {
            gate: Semaphore::new(0),
            inner: MemoryTransport::new(),
        });
        let logger = Logger::new(test_config(1, 2), transport.clone());
        let total = 9;
        logger.info("stuck");
        tokio::time::sleep(Duration::from_millis(50)).await;
        for i in 0..total - 1 {
            logger.info(format!("entry {}", i));
        }
        transport.gate.add_permits(1000);
        logger.close().await;

        let stats = logger.stats();
        let flushed = transport.inner.entries().len() as u64;
        assert_eq!(flushed + stats.dropped, total as u64);
    }

    #[tokio::test]
    async fn sequence_tokens_chain_across_batches() {
        let transport = Arc::new(MemoryTransport::new());
        let logger = Logger::new(test_config(1, 10), transport.clone());
        logger.info("a");
        tokio::time::sleep(Duration::from_millis(50)).await;
        logger.info("b");
        logger.close().await;

        let tokens = transport.seen_tokens();
        assert_eq!(tokens[0], None);
        assert_eq!(tokens[1].as_deref(), Some("seq-1"));
    }

    #[tokio::test]
    async fn flush_errors_never_crash_and_record_state() {
        let transport = Arc::new(MemoryTransport::new());
        transport.fail_puts("service unreachable");
        let logger = Logger::new(test_config(1, 10), transport.clone());
        logger.info("doomed");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = logger.stats();
        assert!(stats.error_count >= 1);
        assert_eq!(stats.last_error.as_deref(), Some("service unreachable"));

        // The sink keeps working once the downstream heals
        transport.heal();
        logger.info("recovered");
        logger.close().await;
        assert_eq!(transport.entries().len(), 1);
    }

    #[tokio::test]
    async fn with_fields_shares_buffer_and_stats() {
        let transport = Arc::new(MemoryTransport::new());
        let parent = Logger::new(test_config(100, 100), transport.clone());
        let child = parent.with_fields(fields(&[("tenant_id", json!("acme"))]));
        let grandchild = child.with_fields(fields(&[("span_id", json!("s1"))]));

        parent.info("from parent");
        grandchild.info("from grandchild");
        assert_eq!(parent.stats().entries_logged, 2);

        grandchild.close().await;
        let entries = transport.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].tenant_id.as_deref(), Some("acme"));
        assert_eq!(entries[1].span_id.as_deref(), Some("s1"));
        assert_eq!(entries[0].tenant_id, None);
    }

    #[tokio::test]
    async fn derived_close_closes_family_exactly_once() {
        let transport = Arc::new(MemoryTransport::new());
        let parent = Logger::new(test_config(100, 100), transport.clone());
        let child = parent.with_fields(Map::new());

        parent.info("before close");
        child.close().await;
        parent.close().await; // second close is a no-op
        child.close().await;

        assert_eq!(transport.entries().len(), 1);
        // Entries after close are refused and counted
        parent.info("after close");
        assert_eq!(transport.entries().len(), 1);
        assert_eq!(parent.stats().dropped, 1);
    }

    #[tokio::test]
    async fn level_filter_suppresses_quiet_entries() {
        let transport = Arc::new(MemoryTransport::new());
        let config = SinkConfig {
            level: Level::Warn,
            ..test_config(100, 100)
        };
        let logger = Logger::new(config, transport.clone());
        logger.debug("noise");
        logger.info("noise");
        logger.warn("kept");
        logger.error("kept");
        logger.close().await;
        assert_eq!(transport.entries().len(), 2);
    }

    #[tokio::test]
    async fn fields_are_redacted_before_enqueue() {
        let transport = Arc::new(MemoryTransport::new());
        let logger = Logger::new(test_config(100, 100), transport.clone());
        logger.log(
            Level::Info,
            "payment",
            fields(&[
                ("password", json!("p")),
                ("account_number", json!("1234567890")),
                ("card_brand", json!("visa")),
                ("description", json!("nice")),
            ]),
        );
        logger.close().await;

        let entry = &transport.entries()[0];
        assert_eq!(entry.fields.get("password"), Some(&json!(REDACTED)));
        assert_eq!(entry.fields.get("account_number"), Some(&json!("******7890")));
        assert_eq!(entry.fields.get("card_brand"), Some(&json!("visa")));
        assert_eq!(
            entry.fields.get("description"),
            Some(&json!("[USER_CONTENT_4_CHARS]"))
        );
    }

    #[tokio::test]
    async fn notifier_sees_error_entries() {
        let transport = Arc::new(MemoryTransport::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let logger = Logger::with_notifier(
            test_config(100, 100),
            transport.clone(),
            Some(notifier.clone()),
        );
        logger.info("not notified");
        logger.error("notified");
        tokio::time::sleep(Duration::from_millis(80)).await;
        logger.close().await;

        let delivered = notifier.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].message, "notified");
    }

    #[tokio::test]
    async fn notifier_failure_counts_but_never_blocks_logging() {
        let transport = Arc::new(MemoryTransport::new());
        let notifier = Arc::new(MemoryNotifier::new());
        notifier.fail_next();
        let logger = Logger::with_notifier(
            test_config(100, 100),
            transport.clone(),
            Some(notifier.clone()),
        );
        logger.error("boom");
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(logger.stats().error_count >= 1);

        logger.info("still logging");
        logger.close().await;
        assert_eq!(transport.entries().len(), 2);
    }

    #[tokio::test]
    async fn health_tracks_error_ratio() {
        let transport = Arc::new(MemoryTransport::new());
        let logger = Logger::new(test_config(1, 50), transport.clone());
        assert!(logger.is_healthy());

        transport.fail_puts("down");
        for i in 0..5 {
            logger.info(format!("entry {}", i));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        // 5 flush failures against 5 accepted entries: far over 10%
        assert!(!logger.is_healthy());
        logger.close().await;
    }
}
