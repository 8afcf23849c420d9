//! Agent wrapping an external service call in resilience policies.

use super::Agent;
use crate::batch::KeyValueStore;
use crate::context::{Context, Payload};
use crate::errors::AgentflowError;
use crate::resilience::{
    CircuitBreaker, CircuitState, FixedWindowRateLimiter, ResilienceConfig, ResponseCache,
};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tag added when the payload came from the response cache.
pub const CACHED_TAG: &str = "cached";
/// Set to `true` when the fallback produced the payload.
pub const FALLBACK_USED_KEY: &str = "fallback_used";
/// Error code of the failure that triggered the fallback.
pub const FALLBACK_REASON_KEY: &str = "fallback_reason";
/// Name of the service whose failure was surfaced as a context error.
pub const FAILED_SERVICE_KEY: &str = "failed_service";

/// An operation against an external service.
#[async_trait]
pub trait ServiceCall: Send + Sync {
    /// Service name used for breaker logs, cache keys and error messages.
    fn service_name(&self) -> &str;

    /// Performs the call.
    async fn call(&self, input: &Payload) -> Result<Payload, AgentflowError>;
}

/// Produces a replacement payload when the service cannot be used.
pub type Fallback = Arc<dyn Fn(&Context, &AgentflowError) -> Payload + Send + Sync>;

/// Calls a [`ServiceCall`] behind a response cache, a rate limiter and a
/// circuit breaker, in that order.
///
/// Short-circuits and failures resolve to the fallback when one is set,
/// otherwise to a context error prefixed with the service name. `handle`
/// never returns `Err`.
pub struct ResilientAgent {
    name: String,
    service: Arc<dyn ServiceCall>,
    breaker: CircuitBreaker,
    limiter: Option<FixedWindowRateLimiter>,
    cache: Option<ResponseCache>,
    fallback: Option<Fallback>,
    config: ResilienceConfig,
}

impl ResilientAgent {
    /// Creates an agent around a service call.
    pub fn new(
        name: impl Into<String>,
        service: Arc<dyn ServiceCall>,
        config: ResilienceConfig,
    ) -> Self {
        let breaker = CircuitBreaker::new(service.service_name(), config.circuit_breaker.clone());
        let limiter = config.rate_limit.as_ref().map(FixedWindowRateLimiter::new);
        Self {
            name: name.into(),
            service,
            breaker,
            limiter,
            cache: None,
            fallback: None,
            config,
        }
    }

    /// Enables response caching in a store.
    #[must_use]
    pub fn with_cache(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.cache = Some(ResponseCache::new(store, self.config.cache.clone()));
        self
    }

    /// Sets the fallback.
    #[must_use]
    pub fn with_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(&Context, &AgentflowError) -> Payload + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    /// Returns the circuit breaker.
    #[must_use]
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Returns the breaker state.
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    fn service_name(&self) -> &str {
        self.service.service_name()
    }

    fn recover(&self, ctx: &Context, error: &AgentflowError) -> Context {
        match &self.fallback {
            Some(fallback) => {
                debug!(agent = %self.name, service = %self.service_name(), reason = error.code(), "Using fallback");
                ctx.with_payload(fallback(ctx, error))
                    .with_metadata(FALLBACK_USED_KEY, true)
                    .with_metadata(FALLBACK_REASON_KEY, error.code())
            }
            None => ctx
                .add_error(format!("{}: {error}", self.service_name()))
                .with_metadata(FAILED_SERVICE_KEY, self.service_name()),
        }
    }
}

impl fmt::Debug for ResilientAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientAgent")
            .field("name", &self.name)
            .field("service", &self.service_name())
            .field("circuit", &self.breaker.state())
            .field("has_fallback", &self.fallback.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Agent for ResilientAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Calls an external service behind a cache, rate limiter and circuit breaker"
    }

    fn tags(&self) -> Vec<String> {
        vec!["resilient".to_string(), self.service_name().to_string()]
    }

    async fn handle(&self, ctx: Context) -> Result<Context, AgentflowError> {
        let service = self.service_name();

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(service, ctx.payload()).await {
                debug!(agent = %self.name, service = %service, "Response cache hit");
                return Ok(ctx.with_payload(hit).with_tag(CACHED_TAG));
            }
        }

        if let Some(limiter) = &self.limiter {
            if !limiter.try_acquire().allowed {
                warn!(agent = %self.name, service = %service, "Rate limit exceeded");
                let err = AgentflowError::RateLimited {
                    service: service.to_string(),
                    limit: limiter.limit(),
                };
                return Ok(self.recover(&ctx, &err));
            }
        }

        if !self.breaker.can_execute() {
            let err = AgentflowError::CircuitOpen {
                service: service.to_string(),
            };
            return Ok(self.recover(&ctx, &err));
        }

        match self.service.call(ctx.payload()).await {
            Ok(output) => {
                self.breaker.record_success();
                if let Some(cache) = &self.cache {
                    cache.put(service, ctx.payload(), &output).await;
                }
                Ok(ctx.with_payload(output))
            }
            Err(err) => {
                self.breaker.record_failure();
                warn!(agent = %self.name, service = %service, error = %err, "Service call failed");
                Ok(self.recover(&ctx, &err))
            }
        }
    }
}
