//! Request pacing for the quota-limited API.
//!
//! The upstream grants a fixed number of calls per hour. Instead of letting
//! callers burst and then starve, every call is spaced by at least
//! `3600 / quota` seconds from the previous granted call. Concurrent callers
//! queue on the internal mutex, so the spacing holds across tasks.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

const HOUR: Duration = Duration::from_secs(3600);

/// Snapshot of the limiter's hourly window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterStats {
    /// Calls granted in the current hourly window
    pub calls_this_hour: u64,
    /// Quota remaining in the current window (never negative)
    pub remaining_calls: u64,
    /// Seconds until the window resets
    pub next_reset_secs: u64,
}

struct LimiterState {
    last_call: Option<Instant>,
    window_start: Instant,
    calls_in_window: u64,
}

/// Minimum-interval rate limiter with an hourly usage counter.
pub struct RateLimiter {
    calls_per_hour: u64,
    min_interval: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Create a limiter from an hourly quota.
    pub fn new(calls_per_hour: u64) -> Self {
        let quota = calls_per_hour.max(1);
        Self {
            calls_per_hour: quota,
            min_interval: Duration::from_secs_f64(3600.0 / quota as f64),
            state: Mutex::new(LimiterState {
                last_call: None,
                window_start: Instant::now(),
                calls_in_window: 0,
            }),
        }
    }

    /// Block until the next call may proceed, then record the grant.
    ///
    /// Holding the lock across the sleep serializes concurrent callers, so
    /// each grant is spaced from the previous one regardless of task count.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;

        let now = Instant::now();
        if now.duration_since(state.window_start) >= HOUR {
            state.window_start = now;
            state.calls_in_window = 0;
        }

        if let Some(last) = state.last_call {
            let elapsed = now.duration_since(last);
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "Rate limiter pacing");
                tokio::time::sleep(wait).await;
            }
        }

        state.last_call = Some(Instant::now());
        state.calls_in_window += 1;
    }

    /// Current window usage.
    pub async fn stats(&self) -> RateLimiterStats {
        let mut state = self.state.lock().await;

        let now = Instant::now();
        let in_window = now.duration_since(state.window_start);
        if in_window >= HOUR {
            state.window_start = now;
            state.calls_in_window = 0;
        }

        let elapsed = now.duration_since(state.window_start);
        RateLimiterStats {
            calls_this_hour: state.calls_in_window,
            remaining_calls: self.calls_per_hour.saturating_sub(state.calls_in_window),
            next_reset_secs: (HOUR - elapsed).as_secs(),
        }
    }

    /// Configured minimum spacing between calls.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_interval_from_quota() {
        let limiter = RateLimiter::new(600);
        assert_eq!(limiter.min_interval(), Duration::from_secs(6));

        let limiter = RateLimiter::new(3600);
        assert_eq!(limiter.min_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_quota_clamped() {
        let limiter = RateLimiter::new(0);
        assert_eq!(limiter.min_interval(), Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_spaces_calls() {
        let limiter = RateLimiter::new(3600); // 1 second spacing

        let t0 = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        // Two spacing gaps for three calls
        assert!(t0.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_call_immediate() {
        let limiter = RateLimiter::new(600);

        let t0 = Instant::now();
        limiter.acquire().await;
        assert!(t0.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_counts_window() {
        let limiter = RateLimiter::new(600);

        limiter.acquire().await;
        limiter.acquire().await;

        let stats = limiter.stats().await;
        assert_eq!(stats.calls_this_hour, 2);
        assert_eq!(stats.remaining_calls, 598);
        assert!(stats.next_reset_secs <= 3600);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_hour() {
        let limiter = RateLimiter::new(600);

        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(3601)).await;

        let stats = limiter.stats().await;
        assert_eq!(stats.calls_this_hour, 0);
        assert_eq!(stats.remaining_calls, 600);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exhaustion_floors_at_zero() {
        let limiter = RateLimiter::new(4); // 900 second spacing

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        let stats = limiter.stats().await;
        assert_eq!(stats.calls_this_hour, 4);
        assert_eq!(stats.remaining_calls, 0);
    }
}
