//! Bounded acquire-retry policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff with a hard deadline.
///
/// The first retry sleeps `initial_interval`; each following sleep doubles up
/// to `max_interval`. Waiting stops once `max_wait` has elapsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// First sleep between attempts
    pub initial_interval: Duration,
    /// Upper bound for a single sleep
    pub max_interval: Duration,
    /// Total time budget for acquiring
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(50),
            max_wait: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// Fixed-interval retries bounded by `max_wait`
    pub fn fixed(interval: Duration, max_wait: Duration) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            max_wait,
        }
    }

    /// Sleep before retry number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial_interval
            .saturating_mul(factor)
            .min(self.max_interval)
    }
}
