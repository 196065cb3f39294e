//! Lightweight in-process metrics collector
//!
//! Counters and duration aggregates for the dispatch path. Shared by
//! reference on every invocation context; a disabled collector is a no-op so
//! call sites never branch.

use dashmap::DashMap;
use std::collections::HashMap;
use std::time::Duration;

/// Aggregated duration observations for one metric name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DurationStat {
    /// Number of observations
    pub count: u64,
    /// Total observed time in microseconds
    pub total_micros: u128,
}

/// In-process metrics registry
pub struct Metrics {
    enabled: bool,
    counters: DashMap<String, u64>,
    durations: DashMap<String, DurationStat>,
}

impl Metrics {
    /// Collector that records
    pub fn new() -> Self {
        Self {
            enabled: true,
            counters: DashMap::new(),
            durations: DashMap::new(),
        }
    }

    /// Collector that ignores every call
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            counters: DashMap::new(),
            durations: DashMap::new(),
        }
    }

    /// Whether recording is active
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Increment a counter by one
    pub fn increment(&self, name: &str) {
        self.add(name, 1);
    }

    /// Increment a counter by `delta`
    pub fn add(&self, name: &str, delta: u64) {
        if !self.enabled {
            return;
        }
        *self.counters.entry(name.to_string()).or_insert(0) += delta;
    }

    /// Record one duration observation
    pub fn record_duration(&self, name: &str, duration: Duration) {
        if !self.enabled {
            return;
        }
        let mut stat = self
            .durations
            .entry(name.to_string())
            .or_insert_with(DurationStat::default);
        stat.count += 1;
        stat.total_micros += duration.as_micros();
    }

    /// Current counter value
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).map(|v| *v).unwrap_or(0)
    }

    /// Current duration aggregate
    pub fn duration(&self, name: &str) -> DurationStat {
        self.durations
            .get(name)
            .map(|v| *v)
            .unwrap_or_default()
    }

    /// Snapshot of all counters
    pub fn counters(&self) -> HashMap<String, u64> {
        self.counters
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Well-known metric names emitted by the dispatch path
pub mod names {
    /// Invocations received
    pub const REQUESTS: &str = "requests_total";
    /// Invocations that produced an error reply
    pub const ERRORS: &str = "requests_errors_total";
    /// End-to-end dispatch latency
    pub const DURATION: &str = "request_duration";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.increment("hits");
        metrics.add("hits", 4);
        assert_eq!(metrics.counter("hits"), 5);
        assert_eq!(metrics.counter("misses"), 0);
    }

    #[test]
    fn durations_aggregate() {
        let metrics = Metrics::new();
        metrics.record_duration("latency", Duration::from_micros(100));
        metrics.record_duration("latency", Duration::from_micros(300));
        let stat = metrics.duration("latency");
        assert_eq!(stat.count, 2);
        assert_eq!(stat.total_micros, 400);
    }

    #[test]
    fn disabled_collector_records_nothing() {
        let metrics = Metrics::disabled();
        metrics.increment("hits");
        metrics.record_duration("latency", Duration::from_micros(10));
        assert_eq!(metrics.counter("hits"), 0);
        assert_eq!(metrics.duration("latency").count, 0);
        assert!(!metrics.is_enabled());
    }
}
