//! Composable pipelines of agents, functions and nested pipelines.
//!
//! A [`Pipeline`] is built fluently and then processed against a
//! [`Context`]. Its [`ExecutionMode`] decides how the stages are combined:
//!
//! - `Sequential` chains each stage's output into the next and stops once the
//!   context is cancelled.
//! - `Parallel` dispatches the agent stages against the same input and merges
//!   their payloads. Asynchronous parallel pipelines run as a batch.
//! - `Conditional` runs the stages, then one of two branch pipelines.
//! - `MapReduce` transforms collection payloads per item and optionally folds
//!   the results.

mod hooks;
mod stage;
mod stats;

pub use hooks::{redacted_debug_value, DebugHook, VALIDATION_HALT_REASON};
pub use stage::{CallableStage, Stage, StageValue};
pub use stats::PipelineStats;

use crate::agents::{Agent, AgentRef, ValidationResult};
use crate::batch::{BatchConfig, BatchCoordinator, BatchHandle};
use crate::context::{Context, Payload};
use crate::core::ExecutionMode;
use crate::errors::AgentflowError;
use crate::events::{EventKind, OrchestrationEvent};
use crate::mediator::Mediator;
use crate::middleware::Middleware;
use futures::future::{BoxFuture, FutureExt};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long `process` waits for an asynchronous batch without a pipeline timeout.
pub const DEFAULT_ASYNC_WAIT: Duration = Duration::from_secs(30);

type Predicate = Arc<dyn Fn(&Context) -> bool + Send + Sync>;
type MapFn = Arc<dyn Fn(&Payload) -> Payload + Send + Sync>;
type ReduceFn = Arc<dyn Fn(Payload, &Payload) -> Payload + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&Context, &AgentflowError) -> Context + Send + Sync>;
type SuccessHandler = Arc<dyn Fn(&Context) -> Context + Send + Sync>;

struct Branch {
    predicate: Predicate,
    on_true: Arc<Pipeline>,
    on_false: Option<Arc<Pipeline>>,
}

struct Reducer {
    func: ReduceFn,
    seed: Payload,
}

/// A stage failure together with the context the stage was given.
struct Interrupted {
    ctx: Context,
    error: AgentflowError,
}

/// An ordered composition of stages run through a mediator.
pub struct Pipeline {
    name: String,
    mediator: Arc<Mediator>,
    stages: Vec<Stage>,
    mode: ExecutionMode,
    branch: Option<Branch>,
    map_fn: Option<MapFn>,
    reducer: Option<Reducer>,
    middleware: Vec<Arc<dyn Middleware>>,
    error_handler: Option<ErrorHandler>,
    success_handler: Option<SuccessHandler>,
    timeout: Option<Duration>,
    asynchronous: bool,
    coordinator: Option<Arc<BatchCoordinator>>,
    halt_on_validation_failure: bool,
}

impl Pipeline {
    /// Creates an empty sequential pipeline.
    #[must_use]
    pub fn new(mediator: Arc<Mediator>) -> Self {
        Self {
            name: "pipeline".to_string(),
            mediator,
            stages: Vec::new(),
            mode: ExecutionMode::Sequential,
            branch: None,
            map_fn: None,
            reducer: None,
            middleware: Vec::new(),
            error_handler: None,
            success_handler: None,
            timeout: None,
            asynchronous: false,
            coordinator: None,
            halt_on_validation_failure: false,
        }
    }

    /// Sets the name used in logs and events.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Appends any stage.
    #[must_use]
    pub fn pipe(mut self, stage: impl Into<Stage>) -> Self {
        self.stages.push(stage.into());
        self
    }

    /// Appends an agent instance.
    #[must_use]
    pub fn agent(self, agent: impl Agent + 'static) -> Self {
        self.pipe(AgentRef::instance(agent))
    }

    /// Appends an agent resolved by name at dispatch time.
    #[must_use]
    pub fn agent_named(self, key: impl Into<String>) -> Self {
        self.pipe(AgentRef::Named(key.into()))
    }

    /// Appends a payload-only function.
    #[must_use]
    pub fn step<F>(self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Payload) -> Payload + Send + Sync + 'static,
    {
        self.pipe(CallableStage::new(name, move |payload| Ok(func(payload).into())))
    }

    /// Appends a fallible function.
    #[must_use]
    pub fn try_step<F>(self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Payload) -> Result<StageValue, AgentflowError> + Send + Sync + 'static,
    {
        self.pipe(CallableStage::new(name, func))
    }

    /// Appends a function that also sees the context.
    #[must_use]
    pub fn step_with_context<F>(self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Payload, &Context) -> Result<StageValue, AgentflowError> + Send + Sync + 'static,
    {
        self.pipe(CallableStage::with_context(name, func))
    }

    /// Appends a nested pipeline.
    #[must_use]
    pub fn nest(self, pipeline: Pipeline) -> Self {
        self.pipe(pipeline)
    }

    /// Sets the execution mode.
    #[must_use]
    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Switches to sequential mode.
    #[must_use]
    pub fn sequential(self) -> Self {
        self.mode(ExecutionMode::Sequential)
    }

    /// Switches to parallel mode.
    #[must_use]
    pub fn parallel(self) -> Self {
        self.mode(ExecutionMode::Parallel)
    }

    /// Switches to conditional mode with the given branches.
    ///
    /// Without a false branch the context passes through unchanged when the
    /// predicate fails.
    #[must_use]
    pub fn branch<F>(mut self, predicate: F, on_true: Pipeline, on_false: Option<Pipeline>) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.branch = Some(Branch {
            predicate: Arc::new(predicate),
            on_true: Arc::new(on_true),
            on_false: on_false.map(Arc::new),
        });
        self.mode(ExecutionMode::Conditional)
    }

    /// Switches to map-reduce mode with a per-item transformation.
    #[must_use]
    pub fn map<F>(mut self, func: F) -> Self
    where
        F: Fn(&Payload) -> Payload + Send + Sync + 'static,
    {
        self.map_fn = Some(Arc::new(func));
        self.mode(ExecutionMode::MapReduce)
    }

    /// Switches to map-reduce mode with a fold over the mapped items.
    #[must_use]
    pub fn reduce<F>(mut self, func: F, seed: impl Into<Payload>) -> Self
    where
        F: Fn(Payload, &Payload) -> Payload + Send + Sync + 'static,
    {
        self.reducer = Some(Reducer {
            func: Arc::new(func),
            seed: seed.into(),
        });
        self.mode(ExecutionMode::MapReduce)
    }

    /// Adds middleware applied to this pipeline's agent stages.
    #[must_use]
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Appends a hook that observes the context.
    #[must_use]
    pub fn tap<F>(self, func: F) -> Self
    where
        F: Fn(&Context) + Send + Sync + 'static,
    {
        self.pipe(DebugHook::tap(func))
    }

    /// Appends a hook that logs the full context.
    #[must_use]
    pub fn dump(self, label: impl Into<String>) -> Self {
        self.pipe(DebugHook::Dump(label.into()))
    }

    /// Appends a hook that logs a context summary.
    #[must_use]
    pub fn log_context(self, label: impl Into<String>) -> Self {
        self.pipe(DebugHook::LogContext(label.into()))
    }

    /// Appends a validation hook.
    ///
    /// The check may return a `bool`, a list of messages or a
    /// [`ValidationResult`]. Failures are recorded as context errors.
    #[must_use]
    pub fn validate<F, R>(self, check: F) -> Self
    where
        F: Fn(&Context) -> R + Send + Sync + 'static,
        R: Into<ValidationResult>,
    {
        self.pipe(DebugHook::validate(check))
    }

    /// Cancels the context when a validation hook fails.
    #[must_use]
    pub fn halt_on_validation_failure(mut self, halt: bool) -> Self {
        self.halt_on_validation_failure = halt;
        self
    }

    /// Converts a stage error into the final context.
    #[must_use]
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Context, &AgentflowError) -> Context + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Transforms the final context when no stage raised.
    #[must_use]
    pub fn on_success<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Context) -> Context + Send + Sync + 'static,
    {
        self.success_handler = Some(Arc::new(handler));
        self
    }

    /// Sets the timeout. Only asynchronous batches enforce it, when waiting.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Runs parallel stages as an asynchronous batch.
    #[must_use]
    pub fn asynchronous(mut self, enabled: bool) -> Self {
        self.asynchronous = enabled;
        self
    }

    /// Uses the given coordinator for asynchronous batches.
    ///
    /// Without one, each batch gets an in-process coordinator.
    #[must_use]
    pub fn with_coordinator(mut self, coordinator: Arc<BatchCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stages.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Returns the execution mode.
    #[must_use]
    pub fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Returns the configured timeout.
    #[must_use]
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns true if processing submits a batch.
    #[must_use]
    pub fn is_async(&self) -> bool {
        self.asynchronous && self.mode.supports_async()
    }

    /// Summarizes the pipeline's shape and expected cost.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            name: self.name.clone(),
            stage_count: self.stages.len(),
            estimated_time_ms: u64::try_from(self.estimated_time().as_millis()).unwrap_or(u64::MAX),
            has_branching: self.has_branching(),
            middleware_count: self.middleware.len(),
            mode: self.mode,
            asynchronous: self.is_async(),
        }
    }

    pub(crate) fn estimated_time(&self) -> Duration {
        let registry = self.mediator.registry();
        let stages: Duration = self
            .stages
            .iter()
            .map(|stage| stage.estimated_time(registry))
            .sum();
        let branch = self.branch.as_ref().map_or(Duration::ZERO, |branch| {
            let on_false = branch
                .on_false
                .as_ref()
                .map_or(Duration::ZERO, |p| p.estimated_time());
            branch.on_true.estimated_time().max(on_false)
        });
        stages + branch
    }

    pub(crate) fn has_branching(&self) -> bool {
        self.branch.is_some() || self.stages.iter().any(Stage::has_branching)
    }

    /// Runs a fresh context holding `payload`.
    ///
    /// # Errors
    ///
    /// See [`Pipeline::process`].
    pub async fn run(&self, payload: impl Into<Payload>) -> Result<Context, AgentflowError> {
        self.process(Context::new(payload)).await
    }

    /// Runs `payload` and returns only the resulting payload.
    ///
    /// # Errors
    ///
    /// See [`Pipeline::process`].
    pub async fn through(&self, payload: impl Into<Payload>) -> Result<Payload, AgentflowError> {
        Ok(self.run(payload).await?.into_payload())
    }

    /// Processes a context through the stages.
    ///
    /// Agent failures are recorded on the context. Errors that escape a stage
    /// (unresolved agents, failing functions, batch timeouts) go to the
    /// `on_error` handler, or are returned when there is none.
    ///
    /// # Errors
    ///
    /// Returns the first stage error when no `on_error` handler is set, and
    /// `Configuration` for a conditional pipeline without a branch.
    pub async fn process(&self, ctx: Context) -> Result<Context, AgentflowError> {
        let started = Instant::now();
        self.mediator
            .notify(OrchestrationEvent::new(EventKind::PipelineStarted, &self.name, &ctx))
            .await;

        let result = self.execute(ctx.clone()).await;

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let event = match &result {
            Ok(done) => OrchestrationEvent::new(EventKind::PipelineCompleted, &self.name, done),
            Err(err) => {
                OrchestrationEvent::new(EventKind::PipelineCompleted, &self.name, &ctx).with_error(err)
            }
        };
        self.mediator.notify(event.with_duration_ms(duration_ms)).await;
        result
    }

    /// Starts processing and returns a handle to the result.
    ///
    /// Asynchronous parallel pipelines return a pending handle as soon as the
    /// batch is submitted; everything else is processed before returning.
    ///
    /// # Errors
    ///
    /// Returns submission errors, or the errors of [`Pipeline::process`].
    pub async fn process_deferred(&self, ctx: Context) -> Result<BatchHandle, AgentflowError> {
        if self.is_async() {
            return self.submit_batch(&ctx).await;
        }
        Ok(BatchHandle::ready(self.process(ctx).await?))
    }

    fn execute(&self, ctx: Context) -> BoxFuture<'_, Result<Context, AgentflowError>> {
        async move {
            match self.run_mode(ctx).await {
                Ok(result) => Ok(match &self.success_handler {
                    Some(handler) => handler(&result),
                    None => result,
                }),
                Err(Interrupted { ctx, error }) => match &self.error_handler {
                    Some(handler) => {
                        warn!(
                            pipeline = %self.name,
                            correlation_id = %ctx.correlation_id(),
                            error = %error,
                            "Stage failed, handing off to on_error"
                        );
                        Ok(handler(&ctx, &error))
                    }
                    None => Err(error),
                },
            }
        }
        .boxed()
    }

    async fn run_mode(&self, ctx: Context) -> Result<Context, Interrupted> {
        match self.mode {
            ExecutionMode::Sequential => self.run_sequential(ctx).await,
            ExecutionMode::Parallel if self.is_async() => self.run_async(ctx).await,
            ExecutionMode::Parallel => Ok(self.run_parallel(&ctx).await),
            ExecutionMode::Conditional => self.run_conditional(ctx).await,
            ExecutionMode::MapReduce => self.run_map_reduce(ctx).await,
        }
    }

    async fn run_sequential(&self, ctx: Context) -> Result<Context, Interrupted> {
        let mut ctx = ctx;
        for stage in &self.stages {
            if ctx.is_cancelled() {
                debug!(
                    pipeline = %self.name,
                    next = %stage.label(),
                    "Context cancelled, skipping remaining stages"
                );
                break;
            }
            ctx = self.run_stage(stage, ctx).await?;
        }
        Ok(ctx)
    }

    async fn run_stage(&self, stage: &Stage, ctx: Context) -> Result<Context, Interrupted> {
        match stage {
            Stage::Agent(agent) => {
                match self
                    .mediator
                    .dispatch_with(ctx.clone(), agent.clone(), &self.middleware)
                    .await
                {
                    Ok(result) => Ok(result),
                    Err(error) => Err(Interrupted { ctx, error }),
                }
            }
            Stage::Callable(callable) => callable.call(&ctx).map_err(|error| Interrupted { ctx, error }),
            Stage::Pipeline(nested) => match nested.process(ctx.clone()).await {
                Ok(result) => Ok(result),
                Err(error) => Err(Interrupted { ctx, error }),
            },
            Stage::Hook(hook) => Ok(hook.apply(ctx, self.halt_on_validation_failure)),
        }
    }

    fn agent_refs(&self) -> Vec<AgentRef> {
        self.stages
            .iter()
            .filter_map(|stage| match stage {
                Stage::Agent(agent) => Some(agent.clone()),
                _ => None,
            })
            .collect()
    }

    async fn run_parallel(&self, ctx: &Context) -> Context {
        let agents = self.agent_refs();
        let skipped = self.stages.len() - agents.len();
        if skipped > 0 {
            debug!(pipeline = %self.name, skipped, "Parallel mode only dispatches agent stages");
        }
        self.mediator
            .dispatch_parallel_with(ctx, &agents, &self.middleware)
            .await
    }

    async fn submit_batch(&self, ctx: &Context) -> Result<BatchHandle, AgentflowError> {
        let coordinator = self.coordinator.clone().unwrap_or_else(|| {
            Arc::new(BatchCoordinator::in_process(
                Arc::clone(&self.mediator),
                BatchConfig::default(),
            ))
        });
        coordinator
            .submit_with(ctx, &self.agent_refs(), &self.middleware)
            .await
    }

    async fn run_async(&self, ctx: Context) -> Result<Context, Interrupted> {
        let handle = match self.submit_batch(&ctx).await {
            Ok(handle) => handle,
            Err(error) => return Err(Interrupted { ctx, error }),
        };
        debug!(
            pipeline = %self.name,
            batch_id = handle.batch_id().unwrap_or_default(),
            "Waiting for asynchronous batch"
        );
        match handle.wait(self.timeout.unwrap_or(DEFAULT_ASYNC_WAIT)).await {
            Ok(result) => Ok(result),
            Err(error) => Err(Interrupted { ctx, error }),
        }
    }

    async fn run_conditional(&self, ctx: Context) -> Result<Context, Interrupted> {
        let Some(branch) = &self.branch else {
            return Err(Interrupted {
                ctx,
                error: AgentflowError::Configuration(format!(
                    "pipeline '{}' is conditional but has no branch",
                    self.name
                )),
            });
        };

        let ctx = self.run_sequential(ctx).await?;
        if ctx.is_cancelled() {
            return Ok(ctx);
        }

        let taken = (branch.predicate)(&ctx);
        debug!(pipeline = %self.name, taken, "Branch evaluated");
        let target = if taken {
            Some(&branch.on_true)
        } else {
            branch.on_false.as_ref()
        };
        match target {
            Some(pipeline) => match pipeline.process(ctx.clone()).await {
                Ok(result) => Ok(result),
                Err(error) => Err(Interrupted { ctx, error }),
            },
            None => Ok(ctx),
        }
    }

    async fn run_map_reduce(&self, ctx: Context) -> Result<Context, Interrupted> {
        if !ctx.payload().is_collection() {
            debug!(
                pipeline = %self.name,
                payload_type = ctx.payload().type_name(),
                "Map-reduce needs a collection, leaving payload unchanged"
            );
            return Ok(ctx);
        }

        let mut item_errors = Vec::new();
        let mapped = match ctx.payload() {
            Payload::Map(entries) => {
                let mut mapped = BTreeMap::new();
                for (key, item) in entries {
                    mapped.insert(key.clone(), self.map_item(&ctx, item, &mut item_errors).await?);
                }
                Payload::Map(mapped)
            }
            Payload::List(items) => {
                let mut mapped = Vec::with_capacity(items.len());
                for item in items {
                    mapped.push(self.map_item(&ctx, item, &mut item_errors).await?);
                }
                Payload::List(mapped)
            }
            _ => ctx.payload().clone(),
        };

        let result = match &self.reducer {
            Some(reducer) => fold(&mapped, reducer),
            None => mapped,
        };
        Ok(ctx.with_payload(result).add_errors(item_errors))
    }

    /// Maps one item with the map function, or else by running the stages on it.
    async fn map_item(
        &self,
        ctx: &Context,
        item: &Payload,
        errors: &mut Vec<String>,
    ) -> Result<Payload, Interrupted> {
        if let Some(map_fn) = &self.map_fn {
            return Ok(map_fn(item));
        }
        if self.stages.is_empty() {
            return Ok(item.clone());
        }

        let base = ctx.error_count();
        let result = self.run_sequential(ctx.with_payload(item.clone())).await?;
        errors.extend(result.errors().iter().skip(base).cloned());
        Ok(result.into_payload())
    }
}

fn fold(mapped: &Payload, reducer: &Reducer) -> Payload {
    let seed = reducer.seed.clone();
    match mapped {
        Payload::List(items) => items.iter().fold(seed, |acc, item| (reducer.func)(acc, item)),
        Payload::Map(entries) => entries
            .values()
            .fold(seed, |acc, item| (reducer.func)(acc, item)),
        other => (reducer.func)(seed, other),
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("stages", &self.stages)
            .field("middleware", &self.middleware.len())
            .field("asynchronous", &self.asynchronous)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
