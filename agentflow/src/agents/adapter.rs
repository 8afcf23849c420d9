//! Bridge from externally defined processing steps to the agent contract.

use super::Agent;
use crate::context::Context;
use crate::errors::AgentflowError;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Metadata key listing the steps that completed, in order.
pub const STEPS_COMPLETED_KEY: &str = "steps_completed";

/// One step of an externally defined processing sequence.
#[async_trait]
pub trait Step: Send + Sync {
    /// Step name.
    fn name(&self) -> &str;

    /// Processes the context.
    async fn process(&self, ctx: Context) -> Result<Context, AgentflowError>;
}

/// A closure-backed step.
pub struct FnStep<F>
where
    F: Fn(Context) -> Result<Context, AgentflowError> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStep<F>
where
    F: Fn(Context) -> Result<Context, AgentflowError> + Send + Sync,
{
    /// Creates a new step.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> Step for FnStep<F>
where
    F: Fn(Context) -> Result<Context, AgentflowError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, ctx: Context) -> Result<Context, AgentflowError> {
        (self.func)(ctx)
    }
}

/// Runs an ordered sequence of steps as a single agent.
///
/// Stops at the first failing step; the lifecycle turns that failure into a
/// context error. Completed step names are recorded under `steps_completed`.
pub struct StepAdapterAgent {
    name: String,
    steps: Vec<Arc<dyn Step>>,
}

impl StepAdapterAgent {
    /// Creates an adapter with no steps.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Appends a step.
    #[must_use]
    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Appends a closure step.
    #[must_use]
    pub fn step_fn<F>(self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Context) -> Result<Context, AgentflowError> + Send + Sync + 'static,
    {
        self.step(FnStep::new(name, func))
    }

    /// Returns the step names in order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

impl fmt::Debug for StepAdapterAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepAdapterAgent")
            .field("name", &self.name)
            .field("steps", &self.step_names())
            .finish()
    }
}

#[async_trait]
impl Agent for StepAdapterAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Runs an ordered sequence of processing steps"
    }

    async fn handle(&self, mut ctx: Context) -> Result<Context, AgentflowError> {
        let mut completed = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            debug!(agent = %self.name, step = %step.name(), "Running step");
            ctx = step.process(ctx).await.map_err(|e| {
                AgentflowError::execution(&self.name, format!("step '{}': {e}", step.name()))
            })?;
            completed.push(Value::String(step.name().to_string()));
        }
        Ok(ctx.with_metadata(STEPS_COMPLETED_KEY, Value::Array(completed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Payload;
    use serde_json::json;

    fn adapter() -> StepAdapterAgent {
        StepAdapterAgent::new("normalize")
            .step_fn("trim", |ctx| {
                let trimmed = ctx.payload().as_str().unwrap_or_default().trim().to_string();
                Ok(ctx.with_payload(trimmed))
            })
            .step_fn("lower", |ctx| {
                let lower = ctx.payload().as_str().unwrap_or_default().to_lowercase();
                Ok(ctx.with_payload(lower))
            })
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let result = adapter().invoke(Context::new("  MiXed ")).await.unwrap();

        assert_eq!(result.payload(), &Payload::from("mixed"));
        assert_eq!(result.get_metadata(STEPS_COMPLETED_KEY), Some(&json!(["trim", "lower"])));
    }

    #[tokio::test]
    async fn test_failing_step_becomes_context_error() {
        let agent = adapter().step_fn("reject", |_| Err(AgentflowError::Internal("bad".into())));
        let result = agent.invoke(Context::new("x")).await.unwrap();

        assert_eq!(result.error_count(), 1);
        assert!(result.errors()[0].contains("step 'reject'"));
        assert!(!result.has_metadata(STEPS_COMPLETED_KEY));
    }
}
