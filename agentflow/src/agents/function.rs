//! Closure-backed agents.

use super::{Agent, ValidationResult};
use crate::context::{Context, Payload};
use crate::core::RetryPolicy;
use crate::errors::AgentflowError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type HandleFn = Arc<dyn Fn(&Context) -> Result<Context, AgentflowError> + Send + Sync>;
type ConditionFn = Arc<dyn Fn(&Context) -> bool + Send + Sync>;
type ValidatorFn = Arc<dyn Fn(&Context) -> ValidationResult + Send + Sync>;

/// An agent whose `handle` is a closure.
#[derive(Clone)]
pub struct FnAgent {
    name: String,
    kind: Option<String>,
    description: String,
    enabled: bool,
    tags: Vec<String>,
    estimated: Duration,
    retry: RetryPolicy,
    handle: HandleFn,
    condition: Option<ConditionFn>,
    validator: Option<ValidatorFn>,
}

impl FnAgent {
    /// Creates an agent from a context transformation.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Context) -> Result<Context, AgentflowError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: None,
            description: String::new(),
            enabled: true,
            tags: Vec::new(),
            estimated: Duration::ZERO,
            retry: RetryPolicy::default(),
            handle: Arc::new(func),
            condition: None,
            validator: None,
        }
    }

    /// Creates an agent that only replaces the payload.
    pub fn transform<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Payload) -> Payload + Send + Sync + 'static,
    {
        Self::new(name, move |ctx| Ok(ctx.with_payload(func(ctx.payload()))))
    }

    /// Overrides the type identity seen by matchers.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds descriptive tags.
    #[must_use]
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Sets the self-reported cost.
    #[must_use]
    pub fn with_estimated_time(mut self, estimated: Duration) -> Self {
        self.estimated = estimated;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Only run when the predicate holds.
    #[must_use]
    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Validates input before running.
    #[must_use]
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Context) -> ValidationResult + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Disables the agent.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl fmt::Debug for FnAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnAgent")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Agent for FnAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or("FnAgent")
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn should_execute(&self, ctx: &Context) -> bool {
        self.condition.as_ref().map_or(true, |c| c(ctx))
    }

    fn validate(&self, ctx: &Context) -> ValidationResult {
        self.validator
            .as_ref()
            .map_or_else(ValidationResult::ok, |v| v(ctx))
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }

    fn estimated_execution_time(&self) -> Duration {
        self.estimated
    }

    fn tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    async fn handle(&self, ctx: Context) -> Result<Context, AgentflowError> {
        (self.handle)(&ctx)
    }
}

/// An agent that returns its input unchanged.
#[derive(Debug, Clone)]
pub struct NoOpAgent {
    name: String,
}

impl NoOpAgent {
    /// Creates a new no-op agent.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Agent for NoOpAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: Context) -> Result<Context, AgentflowError> {
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transform_agent() {
        let agent = FnAgent::transform("double", |p| Payload::from(p.as_i64().unwrap_or(0) * 2));
        let result = agent.invoke(Context::new(21)).await.unwrap();
        assert_eq!(result.payload(), &Payload::from(42));
    }

    #[test]
    fn test_builder_properties() {
        let agent = FnAgent::new("geo", |ctx| Ok(ctx.clone()))
            .with_kind("HttpGeoAgent")
            .with_description("looks up coordinates")
            .with_tags(["http", "geo"])
            .with_estimated_time(Duration::from_millis(40))
            .with_retry_policy(RetryPolicy::none());

        assert_eq!(agent.kind(), "HttpGeoAgent");
        assert_eq!(agent.description(), "looks up coordinates");
        assert_eq!(agent.tags(), vec!["http", "geo"]);
        assert_eq!(agent.estimated_execution_time(), Duration::from_millis(40));
        assert_eq!(agent.retry_policy().max_attempts, 1);
        assert!(agent.is_enabled());
    }

    #[tokio::test]
    async fn test_noop_agent_preserves_payload() {
        let result = NoOpAgent::new("idle").invoke(Context::new("x")).await.unwrap();
        assert_eq!(result.payload(), &Payload::from("x"));
    }
}
