//! Retry policy: decides backoff delays.

use std::time::Duration;

use crate::config::SchedulerConfig;

/// Retry policy for failed tasks.
///
/// The delay grows with each retry and is capped, so a flapping handler
/// backs off without ever waiting longer than `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            base_delay: Duration::from_secs(config.retry_base_delay_secs),
            max_delay: Duration::from_secs(config.retry_max_delay_secs),
        }
    }

    /// Calculate the delay before re-enqueueing a task.
    ///
    /// # Arguments
    /// * `retry_count` - Retries already granted (0 for the first failure).
    ///
    /// delay = min(base_delay * (retry_count + 1), max_delay)
    ///
    /// Example with the defaults (60s, 300s):
    /// - first failure: 60s
    /// - second: 120s
    /// - third: 180s
    /// - fifth and later: 300s
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        self.base_delay
            .saturating_mul(retry_count.saturating_add(1))
            .min(self.max_delay)
    }
}
