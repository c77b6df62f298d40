use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use std::time::Duration;

/// Retry backoff policy using decorrelated jitter.
///
/// Each delay is drawn uniformly from `[base_delay, min(max_delay, prev * 3)]`,
/// which spreads retries across time instead of synchronizing them against a
/// shared backend.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Minimum retry delay and first-retry seed
    pub base_delay: Duration,

    /// Upper bound on any jittered delay
    pub max_delay: Duration,

    /// After this many attempts, transient failures schedule "never"
    pub max_attempts: u32,
}

/// Sentinel schedule for entries past their attempt budget
const NEVER_RETRY_DAYS: i64 = 365;

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            max_attempts: 8,
        }
    }
}

impl RetryPolicy {
    /// Compute the next attempt time for an entry.
    ///
    /// `attempt` is the attempt count after the failure being scheduled.
    /// `previous_delay` is the delay that preceded this failure, when known;
    /// the policy seeds from `base_delay` otherwise.
    pub fn next_attempt(
        &self,
        attempt: u32,
        now: DateTime<Utc>,
        previous_delay: Option<Duration>,
    ) -> DateTime<Utc> {
        if attempt >= self.max_attempts {
            return now + ChronoDuration::days(NEVER_RETRY_DAYS);
        }

        let base_ms = self.base_delay.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max_delay.as_millis().min(u128::from(u64::MAX)) as u64;
        let prev_ms = previous_delay
            .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
            .unwrap_or(base_ms);

        // Upper bound is min(prev*3, max), but never below base.
        let upper = prev_ms.saturating_mul(3).min(max_ms).max(base_ms);
        let delay_ms = if base_ms >= upper {
            base_ms
        } else {
            rand::rng().random_range(base_ms..=upper)
        };

        now + ChronoDuration::milliseconds(delay_ms as i64)
    }
}
