use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

/// Metric names emitted by the core
pub mod names {
    pub const ENQUEUED: &str = "outbox.enqueued";
    pub const SENT: &str = "outbox.sent";
    pub const RETRIED: &str = "outbox.retried";
    pub const FAILED: &str = "outbox.failed";
    pub const RECLAIMED: &str = "outbox.reclaimed";
    pub const SEND_DURATION: &str = "outbox.send";
}

/// Pluggable sink for counters and timings
pub trait MetricsSink: Send + Sync {
    fn incr_counter(&self, name: &str, value: u64);
    fn record_duration(&self, name: &str, duration: Duration);
}

/// Sink that drops everything (the default)
#[derive(Debug, Default, Clone)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr_counter(&self, _name: &str, _value: u64) {}
    fn record_duration(&self, _name: &str, _duration: Duration) {}
}

/// In-process metrics for tests and simple deployments
#[derive(Default)]
pub struct LiveMetrics {
    counters: RwLock<HashMap<String, u64>>,
    durations: RwLock<HashMap<String, Vec<Duration>>>,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter (0 if never incremented)
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.read().get(name).copied().unwrap_or(0)
    }

    /// Average recorded duration for a timing series
    pub fn average_duration(&self, name: &str) -> Option<Duration> {
        let durations = self.durations.read();
        let samples = durations.get(name)?;
        if samples.is_empty() {
            return None;
        }
        let total: Duration = samples.iter().sum();
        Some(total / samples.len() as u32)
    }

    /// Number of samples recorded for a timing series
    pub fn duration_samples(&self, name: &str) -> usize {
        self.durations.read().get(name).map_or(0, |s| s.len())
    }
}

impl MetricsSink for LiveMetrics {
    fn incr_counter(&self, name: &str, value: u64) {
        *self.counters.write().entry(name.to_string()).or_insert(0) += value;
    }

    fn record_duration(&self, name: &str, duration: Duration) {
        let mut durations = self.durations.write();
        let samples = durations.entry(name.to_string()).or_default();
        samples.push(duration);
        // Keep only the most recent 1000 samples per series
        if samples.len() > 1000 {
            samples.remove(0);
        }
    }
}
