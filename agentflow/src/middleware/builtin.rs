//! Built-in middleware.

use super::Middleware;
use crate::agents::Agent;
use crate::context::Context;
use crate::errors::AgentflowError;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Logs each dispatch through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingMiddleware {
    priority: i32,
}

impl LoggingMiddleware {
    /// Creates logging middleware that wraps everything else.
    #[must_use]
    pub fn new() -> Self {
        Self { priority: 1000 }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn before(&self, ctx: Context, agent: &dyn Agent) -> Context {
        info!(
            agent = %agent.name(),
            correlation_id = %ctx.correlation_id(),
            "Agent starting"
        );
        ctx
    }

    async fn after(&self, input: &Context, agent: &dyn Agent, result: Context) -> Context {
        let new_errors = result.error_count().saturating_sub(input.error_count());
        info!(
            agent = %agent.name(),
            correlation_id = %result.correlation_id(),
            new_errors,
            "Agent finished"
        );
        result
    }

    async fn on_error(
        &self,
        ctx: &Context,
        agent: &dyn Agent,
        error: &AgentflowError,
    ) -> Option<Context> {
        warn!(
            agent = %agent.name(),
            correlation_id = %ctx.correlation_id(),
            error = %error,
            "Agent raised"
        );
        None
    }
}

/// Metadata key holding per-agent timings.
pub const TIMINGS_KEY: &str = "timings";

/// Metadata key holding the dispatch start, in epoch microseconds.
///
/// Present only between the before and after hooks. When the agent raises,
/// the error handlers see the context that still carries it.
pub const TIMING_STARTED_KEY: &str = "timing_started_at_us";

/// Records each agent's wall time, in milliseconds, under `timings.<agent>`.
///
/// Holds no per-dispatch state; the start stamp travels in the context, so
/// concurrent dispatches of the same agent never share an entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingMiddleware;

impl TimingMiddleware {
    /// Creates timing middleware.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for TimingMiddleware {
    fn name(&self) -> &str {
        "timing"
    }

    fn priority(&self) -> i32 {
        900
    }

    async fn before(&self, ctx: Context, _agent: &dyn Agent) -> Context {
        ctx.with_metadata(TIMING_STARTED_KEY, Utc::now().timestamp_micros())
    }

    #[allow(clippy::cast_precision_loss)]
    async fn after(&self, input: &Context, agent: &dyn Agent, result: Context) -> Context {
        let result = result.without_metadata(TIMING_STARTED_KEY);
        let Some(started) = input.get_metadata(TIMING_STARTED_KEY).and_then(Value::as_i64) else {
            return result;
        };
        let elapsed = (Utc::now().timestamp_micros() - started).max(0) as f64 / 1000.0;
        let mut timings = result
            .get_metadata(TIMINGS_KEY)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(Map::new);
        timings.insert(agent.name().to_string(), Value::from(elapsed));
        result.with_metadata(TIMINGS_KEY, Value::Object(timings))
    }
}

/// Metadata key holding the payload size after the agent ran.
pub const PAYLOAD_SIZE_KEY: &str = "payload_size";

/// Warns when payloads grow large and records their size.
#[derive(Debug, Clone)]
pub struct ContextSizeMiddleware {
    max_size_bytes: usize,
    warning_threshold: f64,
}

impl ContextSizeMiddleware {
    /// Creates size middleware warning above `warning_threshold * max_size_bytes`.
    #[must_use]
    pub fn new(max_size_bytes: usize, warning_threshold: f64) -> Self {
        Self {
            max_size_bytes,
            warning_threshold: warning_threshold.clamp(0.0, 1.0),
        }
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn threshold(&self) -> usize {
        (self.max_size_bytes as f64 * self.warning_threshold) as usize
    }

    fn check(&self, agent: &dyn Agent, size: usize, phase: &str) {
        if size > self.max_size_bytes {
            warn!(
                agent = %agent.name(),
                phase,
                size_bytes = size,
                max_bytes = self.max_size_bytes,
                "Payload size exceeds maximum"
            );
        } else if size > self.threshold() {
            debug!(
                agent = %agent.name(),
                phase,
                size_bytes = size,
                threshold_bytes = self.threshold(),
                "Payload size approaching maximum"
            );
        }
    }
}

impl Default for ContextSizeMiddleware {
    fn default() -> Self {
        Self::new(1024 * 1024, 0.8)
    }
}

#[async_trait]
impl Middleware for ContextSizeMiddleware {
    fn name(&self) -> &str {
        "context_size"
    }

    fn priority(&self) -> i32 {
        -40
    }

    async fn before(&self, ctx: Context, agent: &dyn Agent) -> Context {
        self.check(agent, ctx.payload_size(), "before");
        ctx
    }

    async fn after(&self, _input: &Context, agent: &dyn Agent, result: Context) -> Context {
        let size = result.payload_size();
        self.check(agent, size, "after");
        result.with_metadata(PAYLOAD_SIZE_KEY, size)
    }
}

/// Adds a fixed tag to every result.
#[derive(Debug, Clone)]
pub struct TagMiddleware {
    name: String,
    tag: String,
}

impl TagMiddleware {
    /// Creates middleware named `tag:<tag>`.
    pub fn new(tag: impl Into<String>) -> Self {
        let tag = tag.into();
        Self {
            name: format!("tag:{tag}"),
            tag,
        }
    }
}

#[async_trait]
impl Middleware for TagMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    async fn after(&self, _input: &Context, _agent: &dyn Agent, result: Context) -> Context {
        result.with_tag(self.tag.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentRef, NoOpAgent};
    use crate::mediator::Mediator;
    use crate::testing::{FailingAgent, MockAgent, RecordingMiddleware};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_timing_records_per_agent() {
        let timing = TimingMiddleware::new();
        let agent = NoOpAgent::new("idle");
        let input = Context::new(1).with_metadata(TIMINGS_KEY, json!({"earlier": 1.0}));

        let ctx = timing.before(input.clone(), &agent).await;
        let result = timing.after(&input, &agent, ctx).await;

        let timings = result.get_metadata(TIMINGS_KEY).unwrap();
        assert!(timings.get("idle").and_then(Value::as_f64).is_some());
        assert_eq!(timings.get("earlier"), Some(&json!(1.0)));
        assert!(!result.has_metadata(TIMING_STARTED_KEY));
    }

    #[tokio::test]
    async fn test_timing_after_reads_the_prepared_context() {
        let timing = TimingMiddleware::new();
        let agent = NoOpAgent::new("idle");

        let prepared = timing.before(Context::new(1), &agent).await;
        assert!(prepared.has_metadata(TIMING_STARTED_KEY));

        // The agent output dropped the stamp; timing still comes from the input.
        let output = prepared.without_metadata(TIMING_STARTED_KEY);
        let result = timing.after(&prepared, &agent, output).await;
        assert!(result.get_metadata(TIMINGS_KEY).and_then(|t| t.get("idle")).is_some());

        let unstamped = timing.after(&Context::new(1), &agent, Context::new(1)).await;
        assert!(!unstamped.has_metadata(TIMINGS_KEY));
    }

    #[tokio::test]
    async fn test_timing_survives_recovered_failure() {
        let log = RecordingMiddleware::shared_log();
        let mediator = Mediator::new();
        mediator.add_middleware(RecordingMiddleware::new("rescue", 2000, log.clone()).recovering());
        mediator.add_middleware(TimingMiddleware::new());

        let recovered = mediator
            .dispatch(Context::new(1), AgentRef::instance(FailingAgent::raising("boom", "exploded")))
            .await
            .unwrap();
        assert!(!recovered.has_errors());
        assert!(!recovered.has_metadata(TIMINGS_KEY));

        let result = mediator
            .dispatch(recovered, AgentRef::instance(NoOpAgent::new("idle")))
            .await
            .unwrap();
        let timings = result.get_metadata(TIMINGS_KEY).unwrap();
        assert!(timings.get("idle").and_then(Value::as_f64).is_some());
        assert!(!result.has_metadata(TIMING_STARTED_KEY));
    }

    #[tokio::test]
    async fn test_timing_keeps_concurrent_dispatches_apart() {
        let mediator = Mediator::new();
        mediator.add_middleware(TimingMiddleware::new());
        let slow = AgentRef::instance(
            MockAgent::new("lookup", "slow").with_delay(Duration::from_millis(40)),
        );
        let fast = AgentRef::instance(MockAgent::new("lookup", "fast"));
        let ctx = Context::new(1);

        let (slow, fast) = tokio::join!(
            mediator.dispatch(ctx.clone(), slow),
            mediator.dispatch(ctx.clone(), fast)
        );
        let elapsed = |ctx: &Context| {
            ctx.get_metadata(TIMINGS_KEY)
                .and_then(|t| t.get("lookup"))
                .and_then(Value::as_f64)
                .unwrap()
        };

        let (slow, fast) = (slow.unwrap(), fast.unwrap());
        assert!(elapsed(&slow) >= 30.0);
        assert!(elapsed(&fast) < elapsed(&slow));
    }

    #[tokio::test]
    async fn test_context_size_records_size() {
        let middleware = ContextSizeMiddleware::new(4, 0.5);
        let agent = NoOpAgent::new("idle");
        let input = Context::new("a long payload");

        let result = middleware.after(&input, &agent, input.clone()).await;
        assert_eq!(
            result.get_metadata(PAYLOAD_SIZE_KEY),
            Some(&json!(input.payload_size()))
        );
    }

    #[tokio::test]
    async fn test_tag_middleware() {
        let middleware = TagMiddleware::new("audited");
        let agent = NoOpAgent::new("idle");
        let input = Context::new(1);

        let result = middleware.after(&input, &agent, input.clone()).await;
        assert!(result.has_tag("audited"));
        assert_eq!(middleware.name(), "tag:audited");
    }

    #[tokio::test]
    async fn test_logging_never_handles_errors() {
        let agent = NoOpAgent::new("idle");
        let err = AgentflowError::execution("idle", "boom");
        assert!(LoggingMiddleware::new()
            .on_error(&Context::new(1), &agent, &err)
            .await
            .is_none());
    }
}
