//! Resilience policies for agents calling external services.
//!
//! - [`CircuitBreaker`]: stops calling a failing dependency until it recovers
//! - [`FixedWindowRateLimiter`]: bounds requests per minute
//! - [`ResponseCache`]: reuses successful responses by input fingerprint

mod circuit_breaker;
mod rate_limiter;
mod response_cache;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limiter::{FixedWindowRateLimiter, RateLimitConfig, RateLimitResult};
pub use response_cache::{fingerprint, CacheConfig, ResponseCache};

use serde::{Deserialize, Serialize};

/// Policies applied by a [`ResilientAgent`](crate::agents::ResilientAgent).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Circuit breaker thresholds.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Rate limit, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
    /// Response cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
}

impl ResilienceConfig {
    /// Creates the default configuration: breaker on, no rate limit, cache on.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the circuit breaker configuration.
    #[must_use]
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Sets the rate limit.
    #[must_use]
    pub fn with_rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = Some(config);
        self
    }

    /// Sets the cache configuration.
    #[must_use]
    pub fn with_cache(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }
}
