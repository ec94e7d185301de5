//! Adaptive batch sizing for the free bulk source.
//!
//! MIMD control: batch size doubles after a streak of clean batches and
//! halves once the cumulative failure rate gets bad, with the pacing
//! interval doubling at the same time. Jitter keeps the request cadence
//! from looking mechanical.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

/// Consecutive clean batches required before the batch size doubles.
const GROWTH_STREAK: u32 = 5;
/// Cumulative failure rate above which the downloader backs off.
const FAILURE_RATE_LIMIT: f64 = 0.2;

/// Downloader tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderConfig {
    #[serde(default = "default_initial_batch")]
    pub initial_batch_size: usize,
    #[serde(default = "default_min_batch")]
    pub min_batch_size: usize,
    #[serde(default = "default_max_batch")]
    pub max_batch_size: usize,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: f64,
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: f64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: default_initial_batch(),
            min_batch_size: default_min_batch(),
            max_batch_size: default_max_batch(),
            interval_secs: default_interval_secs(),
            max_interval_secs: default_max_interval_secs(),
        }
    }
}

fn default_initial_batch() -> usize {
    100
}

fn default_min_batch() -> usize {
    10
}

fn default_max_batch() -> usize {
    500
}

fn default_interval_secs() -> f64 {
    5.0
}

fn default_max_interval_secs() -> f64 {
    30.0
}

/// Snapshot of the downloader state, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloaderStats {
    pub batch_size: usize,
    pub interval_secs: f64,
    pub consecutive_successes: u32,
    pub successes: u64,
    pub failures: u64,
}

struct DownloaderState {
    batch_size: usize,
    interval_secs: f64,
    consecutive_successes: u32,
    successes: u64,
    failures: u64,
}

/// MIMD batch size controller.
pub struct AdaptiveBatchDownloader {
    config: DownloaderConfig,
    state: Mutex<DownloaderState>,
}

impl AdaptiveBatchDownloader {
    pub fn new(config: DownloaderConfig) -> Self {
        let state = DownloaderState {
            batch_size: config
                .initial_batch_size
                .clamp(config.min_batch_size, config.max_batch_size),
            interval_secs: config.interval_secs,
            consecutive_successes: 0,
            successes: 0,
            failures: 0,
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// Size to use for the next batch.
    pub fn batch_size(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.batch_size)
            .unwrap_or(self.config.min_batch_size)
    }

    /// Record one batch outcome and adjust the control state.
    pub fn record(&self, success: bool) {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => return,
        };

        if success {
            state.successes += 1;
            state.consecutive_successes += 1;
            if state.consecutive_successes >= GROWTH_STREAK {
                let grown = (state.batch_size * 2).min(self.config.max_batch_size);
                if grown != state.batch_size {
                    info!(from = state.batch_size, to = grown, "Batch size grown");
                }
                state.batch_size = grown;
                state.consecutive_successes = 0;
            }
            return;
        }

        state.failures += 1;
        state.consecutive_successes = 0;

        let total = state.successes + state.failures;
        let failure_rate = state.failures as f64 / total as f64;
        if failure_rate > FAILURE_RATE_LIMIT {
            let shrunk = (state.batch_size / 2).max(self.config.min_batch_size);
            let slowed = (state.interval_secs * 2.0).min(self.config.max_interval_secs);
            info!(
                failure_rate = format!("{:.0}%", failure_rate * 100.0),
                batch_size = shrunk,
                interval_secs = slowed,
                "Backing off batch downloads"
            );
            state.batch_size = shrunk;
            state.interval_secs = slowed;
            state.successes = 0;
            state.failures = 0;
        } else {
            debug!(
                failure_rate = format!("{:.0}%", failure_rate * 100.0),
                "Batch failed, within tolerance"
            );
        }
    }

    /// Pacing delay before the next batch: the current interval with a
    /// uniform ±20% jitter.
    pub fn pacing_delay(&self) -> Duration {
        let interval = self
            .state
            .lock()
            .map(|s| s.interval_secs)
            .unwrap_or(self.config.interval_secs);
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        Duration::from_secs_f64(interval * jitter)
    }

    /// Base interval without jitter, used for retry waits.
    pub fn interval_secs(&self) -> f64 {
        self.state
            .lock()
            .map(|s| s.interval_secs)
            .unwrap_or(self.config.interval_secs)
    }

    pub fn stats(&self) -> DownloaderStats {
        let state = self.state.lock();
        match state {
            Ok(s) => DownloaderStats {
                batch_size: s.batch_size,
                interval_secs: s.interval_secs,
                consecutive_successes: s.consecutive_successes,
                successes: s.successes,
                failures: s.failures,
            },
            Err(_) => DownloaderStats {
                batch_size: self.config.min_batch_size,
                interval_secs: self.config.interval_secs,
                consecutive_successes: 0,
                successes: 0,
                failures: 0,
            },
        }
    }
}

impl Default for AdaptiveBatchDownloader {
    fn default() -> Self {
        Self::new(DownloaderConfig::default())
    }
}
