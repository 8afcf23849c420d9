//! Pipeline stages and callable stage values.

use super::hooks::DebugHook;
use super::Pipeline;
use crate::agents::{Agent, AgentRef, AgentRegistry};
use crate::context::{Callable, Context, Payload};
use crate::errors::AgentflowError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// What a callable stage returns.
#[derive(Debug, Clone)]
pub enum StageValue {
    /// A bare value that becomes the new payload.
    Value(Payload),
    /// A payload plus a context whose tags, metadata and errors replace the current ones.
    WithContext(Payload, Context),
}

impl StageValue {
    /// Applies this value to the context it was computed from.
    #[must_use]
    pub fn apply(self, ctx: &Context) -> Context {
        match self {
            Self::Value(payload) => ctx.with_payload(payload),
            Self::WithContext(payload, replacement) => replacement.with_payload(payload),
        }
    }
}

impl From<Payload> for StageValue {
    fn from(payload: Payload) -> Self {
        Self::Value(payload)
    }
}

impl From<(Payload, Context)> for StageValue {
    fn from((payload, ctx): (Payload, Context)) -> Self {
        Self::WithContext(payload, ctx)
    }
}

type PayloadFn = Arc<dyn Fn(&Payload) -> Result<StageValue, AgentflowError> + Send + Sync>;
type ContextFn = Arc<dyn Fn(&Payload, &Context) -> Result<StageValue, AgentflowError> + Send + Sync>;

#[derive(Clone)]
enum StageFn {
    Payload(PayloadFn),
    WithContext(ContextFn),
}

/// A plain function run as a stage.
#[derive(Clone)]
pub struct CallableStage {
    name: String,
    func: StageFn,
    estimated: Duration,
}

impl CallableStage {
    /// A stage that only sees the payload.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Payload) -> Result<StageValue, AgentflowError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: StageFn::Payload(Arc::new(func)),
            estimated: Duration::ZERO,
        }
    }

    /// A stage that also sees the context.
    pub fn with_context<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Payload, &Context) -> Result<StageValue, AgentflowError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: StageFn::WithContext(Arc::new(func)),
            estimated: Duration::ZERO,
        }
    }

    /// Sets the self-reported cost.
    #[must_use]
    pub fn with_estimated_time(mut self, estimated: Duration) -> Self {
        self.estimated = estimated;
        self
    }

    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the function against the context.
    ///
    /// # Errors
    ///
    /// Returns whatever the function returns.
    pub fn call(&self, ctx: &Context) -> Result<Context, AgentflowError> {
        let value = match &self.func {
            StageFn::Payload(func) => func(ctx.payload())?,
            StageFn::WithContext(func) => func(ctx.payload(), ctx)?,
        };
        Ok(value.apply(ctx))
    }
}

impl fmt::Debug for CallableStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallableStage")
            .field("name", &self.name)
            .field("with_context", &matches!(self.func, StageFn::WithContext(_)))
            .finish_non_exhaustive()
    }
}

impl From<Callable> for CallableStage {
    fn from(callable: Callable) -> Self {
        let name = callable.name().to_string();
        Self::new(name, move |payload| Ok(callable.call(payload.clone()).into()))
    }
}

/// One step of a pipeline.
#[derive(Debug, Clone)]
pub enum Stage {
    /// An agent dispatched through the mediator.
    Agent(AgentRef),
    /// A plain function.
    Callable(CallableStage),
    /// A nested pipeline processed as one unit.
    Pipeline(Arc<Pipeline>),
    /// A debugging hook.
    Hook(DebugHook),
}

impl Stage {
    /// Name used in logs.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Agent(agent) => agent.label(),
            Self::Callable(stage) => stage.name(),
            Self::Pipeline(pipeline) => pipeline.name(),
            Self::Hook(hook) => hook.label(),
        }
    }

    /// Returns true for stages that parallel mode dispatches.
    #[must_use]
    pub fn is_agent(&self) -> bool {
        matches!(self, Self::Agent(_))
    }

    /// Self-reported cost. Named agents that do not resolve count as zero.
    #[must_use]
    pub fn estimated_time(&self, registry: &AgentRegistry) -> Duration {
        match self {
            Self::Agent(agent) => agent
                .resolve(registry)
                .map(|agent| agent.estimated_execution_time())
                .unwrap_or_default(),
            Self::Callable(stage) => stage.estimated,
            Self::Pipeline(pipeline) => pipeline.estimated_time(),
            Self::Hook(_) => Duration::ZERO,
        }
    }

    /// Returns true if this stage or anything nested in it branches.
    #[must_use]
    pub fn has_branching(&self) -> bool {
        match self {
            Self::Pipeline(pipeline) => pipeline.has_branching(),
            _ => false,
        }
    }
}

impl From<AgentRef> for Stage {
    fn from(agent: AgentRef) -> Self {
        Self::Agent(agent)
    }
}

impl From<Arc<dyn Agent>> for Stage {
    fn from(agent: Arc<dyn Agent>) -> Self {
        Self::Agent(AgentRef::Instance(agent))
    }
}

impl From<&str> for Stage {
    fn from(key: &str) -> Self {
        Self::Agent(AgentRef::from(key))
    }
}

impl From<Pipeline> for Stage {
    fn from(pipeline: Pipeline) -> Self {
        Self::Pipeline(Arc::new(pipeline))
    }
}

impl From<Arc<Pipeline>> for Stage {
    fn from(pipeline: Arc<Pipeline>) -> Self {
        Self::Pipeline(pipeline)
    }
}

impl From<CallableStage> for Stage {
    fn from(stage: CallableStage) -> Self {
        Self::Callable(stage)
    }
}

impl From<Callable> for Stage {
    fn from(callable: Callable) -> Self {
        Self::Callable(callable.into())
    }
}

impl From<DebugHook> for Stage {
    fn from(hook: DebugHook) -> Self {
        Self::Hook(hook)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bare_value_replaces_payload_only() {
        let stage = CallableStage::new("double", |p| {
            Ok(Payload::from(p.as_i64().unwrap_or(0) * 2).into())
        });
        let ctx = Context::new(4).with_tag("kept");

        let result = stage.call(&ctx).unwrap();
        assert_eq!(result.payload(), &Payload::from(8));
        assert!(result.has_tag("kept"));
    }

    #[test]
    fn test_pair_replaces_context() {
        let stage = CallableStage::with_context("retag", |p, ctx| {
            Ok((p.clone(), ctx.without_tag("old").with_tag("new")).into())
        });
        let ctx = Context::new("x").with_tag("old");

        let result = stage.call(&ctx).unwrap();
        assert!(result.has_tag("new"));
        assert!(!result.has_tag("old"));
        assert_eq!(result.payload(), &Payload::from("x"));
    }

    #[test]
    fn test_callable_payload_becomes_stage() {
        let callable = Callable::new("shout", |p| {
            Payload::from(format!("{}!", p.as_str().unwrap_or_default()))
        });
        let stage = Stage::from(callable);

        assert_eq!(stage.label(), "shout");
        let Stage::Callable(stage) = stage else {
            panic!("expected callable stage");
        };
        let result = stage.call(&Context::new("hi")).unwrap();
        assert_eq!(result.payload(), &Payload::from("hi!"));
    }

    #[test]
    fn test_error_propagates() {
        let stage = CallableStage::new("bad", |_| Err(AgentflowError::execution("bad", "nope")));
        assert!(stage.call(&Context::new(1)).is_err());
    }
}
