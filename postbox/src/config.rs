use std::time::Duration;

use crate::policy::RetryPolicy;

/// Configuration for the outbox facade and its scheduler
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Retry scheduling policy
    pub retry: RetryPolicy,

    /// Maximum entries in flight
    pub concurrency: usize,

    /// Start the scheduler on `init` and kick it on `enqueue`
    pub auto_start: bool,

    /// Periodic tick interval
    pub heartbeat: Duration,

    /// Reclaim `processing` entries stuck longer than this
    pub lock_timeout: Duration,

    /// Advisory: callers may pause/resume from their own network probes
    pub pause_on_no_network: bool,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            concurrency: 3,
            auto_start: true,
            heartbeat: Duration::from_secs(1),
            lock_timeout: Duration::from_secs(300), // 5 minutes
            pause_on_no_network: false,
        }
    }
}

impl OutboxConfig {
    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the in-flight concurrency bound
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Control whether `init` starts the scheduler
    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Set the heartbeat interval
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Set the stuck-entry reclaim threshold
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }
}
