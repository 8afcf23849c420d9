//! Agent contract and implementations.
//!
//! Agents are the units of work the mediator dispatches. Most agents only
//! implement [`Agent::handle`]; the default [`Agent::invoke`] wraps it in the
//! base lifecycle (enable check, condition, validation, hooks, error
//! conversion and timing metadata).

mod adapter;
mod function;
pub mod lifecycle;
mod registry;
mod resilient;

pub use adapter::{FnStep, Step, StepAdapterAgent};
pub use function::{FnAgent, NoOpAgent};
pub use registry::{AgentRegistry, Registry};
pub use resilient::{Fallback, ResilientAgent, ServiceCall};

use crate::context::Context;
use crate::core::RetryPolicy;
use crate::errors::AgentflowError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of [`Agent::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationResult {
    errors: Vec<String>,
}

impl ValidationResult {
    /// A passing result.
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    /// A failing result. An empty list still counts as a failure.
    #[must_use]
    pub fn invalid(errors: Vec<String>) -> Self {
        if errors.is_empty() {
            return Self {
                errors: vec!["validation failed".to_string()],
            };
        }
        Self { errors }
    }

    /// A failing result with a single message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
        }
    }

    /// Returns true if the input was accepted.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the validation messages.
    #[must_use]
    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

impl From<bool> for ValidationResult {
    fn from(valid: bool) -> Self {
        if valid {
            Self::ok()
        } else {
            Self::error("validation failed")
        }
    }
}

impl From<Vec<String>> for ValidationResult {
    fn from(errors: Vec<String>) -> Self {
        Self { errors }
    }
}

/// A single-purpose unit that transforms a [`Context`].
#[async_trait]
pub trait Agent: Send + Sync + Debug {
    /// Display name, used for logs, statistics and registry keys.
    fn name(&self) -> &str;

    /// Type identity used by middleware matchers.
    ///
    /// Defaults to the implementing type's name without its module path.
    fn kind(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// One-line description.
    fn description(&self) -> &str {
        ""
    }

    /// Disabled agents are skipped by the lifecycle.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Returns false to skip this agent for the given context.
    fn should_execute(&self, _ctx: &Context) -> bool {
        true
    }

    /// Checks the input before [`Agent::handle`] runs.
    fn validate(&self, _ctx: &Context) -> ValidationResult {
        ValidationResult::ok()
    }

    /// Retry policy used when the agent runs as a batch job.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Self-reported cost, summed by pipeline statistics.
    fn estimated_execution_time(&self) -> Duration {
        Duration::ZERO
    }

    /// Descriptive tags, visible to middleware matchers.
    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Runs before [`Agent::handle`].
    async fn before_execute(&self, ctx: Context) -> Result<Context, AgentflowError> {
        Ok(ctx)
    }

    /// The agent's own transformation.
    async fn handle(&self, ctx: Context) -> Result<Context, AgentflowError>;

    /// Runs after a successful [`Agent::handle`].
    async fn after_execute(&self, ctx: Context) -> Result<Context, AgentflowError> {
        Ok(ctx)
    }

    /// Converts a failure from the hooks or `handle` into a context update.
    ///
    /// Receives the context the lifecycle was given, before
    /// [`Agent::before_execute`] ran: changes made by `before_execute` or a
    /// partially run `handle` are not visible here.
    ///
    /// The default appends the error message and marks the context failed.
    fn on_error(&self, ctx: Context, error: &AgentflowError) -> Context {
        lifecycle::mark_failed(ctx, self.name(), error)
    }

    /// Entry point used by the mediator.
    ///
    /// The default runs the base lifecycle and never returns `Err`.
    async fn invoke(&self, ctx: Context) -> Result<Context, AgentflowError> {
        Ok(lifecycle::run(self, ctx).await)
    }
}

/// How a caller refers to an agent: directly, or by registry key.
#[derive(Debug, Clone)]
pub enum AgentRef {
    /// A pre-built agent.
    Instance(Arc<dyn Agent>),
    /// A key resolved through an [`AgentRegistry`].
    Named(String),
}

impl AgentRef {
    /// Wraps an agent value.
    pub fn instance(agent: impl Agent + 'static) -> Self {
        Self::Instance(Arc::new(agent))
    }

    /// Returns the agent name or registry key.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Instance(agent) => agent.name(),
            Self::Named(key) => key,
        }
    }

    /// Resolves to an agent instance.
    ///
    /// # Errors
    ///
    /// Returns `Resolution` if a named agent is not registered.
    pub fn resolve(&self, registry: &AgentRegistry) -> Result<Arc<dyn Agent>, AgentflowError> {
        match self {
            Self::Instance(agent) => Ok(Arc::clone(agent)),
            Self::Named(key) => registry.resolve(key),
        }
    }
}

impl From<Arc<dyn Agent>> for AgentRef {
    fn from(agent: Arc<dyn Agent>) -> Self {
        Self::Instance(agent)
    }
}

impl From<&Arc<dyn Agent>> for AgentRef {
    fn from(agent: &Arc<dyn Agent>) -> Self {
        Self::Instance(Arc::clone(agent))
    }
}

impl From<&str> for AgentRef {
    fn from(key: &str) -> Self {
        Self::Named(key.to_string())
    }
}

impl From<String> for AgentRef {
    fn from(key: String) -> Self {
        Self::Named(key)
    }
}

fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_result() {
        assert!(ValidationResult::ok().is_valid());

        let invalid = ValidationResult::invalid(vec!["too short".into()]);
        assert!(!invalid.is_valid());
        assert_eq!(invalid.errors(), &["too short"]);

        assert!(!ValidationResult::invalid(Vec::new()).is_valid());
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("agentflow::agents::NoOpAgent"), "NoOpAgent");
        assert_eq!(short_type_name("a::b::Wrapper<a::c::Inner>"), "Wrapper");
        assert_eq!(short_type_name("Plain"), "Plain");
    }

    #[test]
    fn test_default_kind_is_type_name() {
        let agent = NoOpAgent::new("idle");
        assert_eq!(agent.kind(), "NoOpAgent");
        assert_eq!(agent.name(), "idle");
    }

    #[test]
    fn test_agent_ref_labels() {
        let named = AgentRef::from("upper");
        let instance = AgentRef::instance(NoOpAgent::new("idle"));
        assert_eq!(named.label(), "upper");
        assert_eq!(instance.label(), "idle");
    }
}
