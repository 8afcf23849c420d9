//! Fixed-window request limiter.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

fn default_requests_per_minute() -> u32 {
    60
}

/// Rate limit configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per one-minute window.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

impl RateLimitConfig {
    /// Creates a config for the given requests per minute.
    #[must_use]
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
        }
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request is allowed.
    pub allowed: bool,
    /// Requests left in the current window.
    pub remaining: u32,
    /// Time until the window resets.
    pub reset_after: Duration,
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Counts requests in consecutive fixed windows.
#[derive(Debug)]
pub struct FixedWindowRateLimiter {
    limit: u32,
    window: Duration,
    state: Mutex<Window>,
}

impl FixedWindowRateLimiter {
    /// Creates a limiter with a one-minute window.
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_window(config.requests_per_minute, Duration::from_secs(60))
    }

    /// Creates a limiter with a custom window length.
    #[must_use]
    pub fn with_window(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            state: Mutex::new(Window {
                started: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Returns the configured limit.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Counts a request if the window has room.
    pub fn try_acquire(&self) -> RateLimitResult {
        let mut state = self.state.lock();
        let now = Instant::now();
        if now.duration_since(state.started) >= self.window {
            state.started = now;
            state.count = 0;
        }
        let reset_after = self.window.saturating_sub(now.duration_since(state.started));

        if state.count < self.limit {
            state.count += 1;
            RateLimitResult {
                allowed: true,
                remaining: self.limit - state.count,
                reset_after,
            }
        } else {
            RateLimitResult {
                allowed: false,
                remaining: 0,
                reset_after,
            }
        }
    }

    /// Returns the requests counted in the current window.
    #[must_use]
    pub fn current(&self) -> u32 {
        let state = self.state.lock();
        if state.started.elapsed() >= self.window {
            0
        } else {
            state.count
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_is_enforced_within_window() {
        let limiter = FixedWindowRateLimiter::new(&RateLimitConfig::per_minute(2));

        let first = limiter.try_acquire();
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);
        assert!(limiter.try_acquire().allowed);

        let denied = limiter.try_acquire();
        assert!(!denied.allowed);
        assert_eq!(limiter.current(), 2);
    }

    #[test]
    fn test_window_resets() {
        let limiter = FixedWindowRateLimiter::with_window(1, Duration::from_millis(10));
        assert!(limiter.try_acquire().allowed);
        assert!(!limiter.try_acquire().allowed);

        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.try_acquire().allowed);
    }
}
