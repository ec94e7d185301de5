//! Retry decisions for upstream API calls.
//!
//! Only rate limiting (429) and server-side failures (5xx) are worth
//! retrying; other client errors and payload problems are terminal. The
//! wait schedule is fixed rather than exponential because the upstream
//! quota resets hourly.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry configuration: attempt cap and the wait schedule in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_intervals")]
    pub intervals: Vec<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            intervals: default_intervals(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_intervals() -> Vec<u64> {
    vec![300, 600, 3600]
}

/// Decides whether and how long to wait before another attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        let mut config = config;
        if config.intervals.is_empty() {
            config.intervals = default_intervals();
        }
        Self { config }
    }

    /// Whether attempt number `attempt` (0-based) may be retried after a
    /// failure with the given HTTP status.
    ///
    /// Transport failures arrive with no status and are treated as
    /// server-side trouble.
    pub fn should_retry(&self, attempt: u32, status: Option<u16>) -> bool {
        if attempt >= self.config.max_retries {
            return false;
        }
        match status {
            None => true,
            Some(s) => s == 429 || s >= 500,
        }
    }

    /// Wait before retry number `attempt` (0-based), clamped to the last
    /// configured interval.
    pub fn wait_time(&self, attempt: u32) -> Duration {
        let idx = (attempt as usize).min(self.config.intervals.len() - 1);
        Duration::from_secs(self.config.intervals[idx])
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
