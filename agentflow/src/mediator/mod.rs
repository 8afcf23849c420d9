//! The mediator: the error boundary for synchronous dispatch.
//!
//! A dispatch resolves the agent, selects the applicable middleware, runs the
//! agent inside that middleware, and records statistics and notifications.
//! Agent failures come back as context errors; only unresolvable identifiers
//! cross the boundary as `Err`.

mod config;
#[cfg(test)]
mod mediator_tests;
mod stats;

pub use config::MediatorConfig;
pub use stats::{AgentStats, MediatorStats};

use crate::agents::{Agent, AgentRef, AgentRegistry};
use crate::context::Context;
use crate::core::merge_payloads;
use crate::errors::AgentflowError;
use crate::events::{get_event_sink, EventKind, EventSink, OrchestrationEvent};
use crate::middleware::{AgentMatcher, Middleware, MiddlewareChain, MiddlewareRegistry, ScopedMiddleware};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Metadata key holding the counts of a parallel dispatch.
pub const PARALLEL_EXECUTION_KEY: &str = "parallel_execution";

/// Resolves agents, applies middleware and tracks statistics.
///
/// The mediator is `Send + Sync`; statistics sit behind a mutex so one
/// instance can be shared across concurrent batch jobs.
pub struct Mediator {
    registry: Arc<AgentRegistry>,
    middleware_registry: Arc<MiddlewareRegistry>,
    global: RwLock<Vec<Arc<dyn Middleware>>>,
    scoped: RwLock<Vec<ScopedMiddleware>>,
    event_sink: Option<Arc<dyn EventSink>>,
    events_enabled: AtomicBool,
    config: MediatorConfig,
    stats: Mutex<MediatorStats>,
}

impl Mediator {
    /// Creates a mediator with empty registries.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MediatorConfig::default())
    }

    /// Creates a mediator with the given configuration.
    #[must_use]
    pub fn with_config(config: MediatorConfig) -> Self {
        Self {
            registry: Arc::new(AgentRegistry::new()),
            middleware_registry: Arc::new(MiddlewareRegistry::new()),
            global: RwLock::new(Vec::new()),
            scoped: RwLock::new(Vec::new()),
            event_sink: None,
            events_enabled: AtomicBool::new(config.emit_events),
            config,
            stats: Mutex::new(MediatorStats::default()),
        }
    }

    /// Uses a shared agent registry.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<AgentRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Uses a shared middleware registry.
    #[must_use]
    pub fn with_middleware_registry(mut self, registry: Arc<MiddlewareRegistry>) -> Self {
        self.middleware_registry = registry;
        self
    }

    /// Sends notifications to `sink` instead of the global sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &MediatorConfig {
        &self.config
    }

    /// Returns the agent registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Returns the middleware registry.
    #[must_use]
    pub fn middleware_registry(&self) -> &Arc<MiddlewareRegistry> {
        &self.middleware_registry
    }

    /// Registers an agent under its own name.
    pub fn register(&self, agent: impl Agent + 'static) {
        self.registry.register(agent);
    }

    /// Adds middleware applied to every dispatch.
    pub fn add_middleware(&self, middleware: impl Middleware + 'static) {
        self.add_middleware_arc(Arc::new(middleware));
    }

    /// Adds shared middleware applied to every dispatch.
    pub fn add_middleware_arc(&self, middleware: Arc<dyn Middleware>) {
        debug!(middleware = %middleware.name(), priority = middleware.priority(), "Adding global middleware");
        self.global.write().push(middleware);
    }

    /// Adds registered middleware, by key, to every dispatch.
    ///
    /// # Errors
    ///
    /// Returns `Resolution` if the key is not registered.
    pub fn use_middleware(&self, key: &str) -> Result<(), AgentflowError> {
        let middleware = self.middleware_registry.resolve(key)?;
        self.add_middleware_arc(middleware);
        Ok(())
    }

    /// Adds middleware applied only to agents accepted by `matcher`.
    pub fn add_scoped_middleware(&self, matcher: AgentMatcher, middleware: impl Middleware + 'static) {
        self.add_scoped(ScopedMiddleware::new(matcher, Arc::new(middleware)));
    }

    /// Adds a scoped middleware entry.
    pub fn add_scoped(&self, scoped: ScopedMiddleware) {
        debug!(
            middleware = %scoped.middleware.name(),
            matcher = %scoped.matcher.description(),
            "Adding scoped middleware"
        );
        self.scoped.write().push(scoped);
    }

    /// Returns the number of global and scoped middleware.
    #[must_use]
    pub fn middleware_count(&self) -> usize {
        self.global.read().len() + self.scoped.read().len()
    }

    /// Turns notifications on.
    pub fn enable_events(&self) {
        self.events_enabled.store(true, Ordering::SeqCst);
    }

    /// Turns notifications off. Contexts are unaffected.
    pub fn disable_events(&self) {
        self.events_enabled.store(false, Ordering::SeqCst);
    }

    /// Returns true if notifications are delivered.
    #[must_use]
    pub fn events_enabled(&self) -> bool {
        self.events_enabled.load(Ordering::SeqCst)
    }

    /// Returns a snapshot of the statistics.
    #[must_use]
    pub fn stats(&self) -> MediatorStats {
        self.stats.lock().clone()
    }

    /// Clears the statistics.
    pub fn reset_stats(&self) {
        *self.stats.lock() = MediatorStats::default();
    }

    /// Dispatches a context to one agent.
    ///
    /// # Errors
    ///
    /// Returns `Resolution` if a named agent is not registered. Agent
    /// failures are returned as context errors.
    pub async fn dispatch(
        &self,
        ctx: Context,
        agent: impl Into<AgentRef>,
    ) -> Result<Context, AgentflowError> {
        self.dispatch_with(ctx, agent, &[]).await
    }

    /// Dispatches with extra middleware treated as global for this call.
    ///
    /// # Errors
    ///
    /// Returns `Resolution` if a named agent is not registered.
    pub async fn dispatch_with(
        &self,
        ctx: Context,
        agent: impl Into<AgentRef>,
        extra: &[Arc<dyn Middleware>],
    ) -> Result<Context, AgentflowError> {
        let agent_ref = agent.into();
        let agent = match agent_ref.resolve(&self.registry) {
            Ok(agent) => agent,
            Err(err) => {
                warn!(agent = %agent_ref.label(), error = %err, "Agent resolution failed");
                self.stats.lock().record(agent_ref.label(), false, 0.0);
                return Err(err);
            }
        };
        let chain = self.select_chain(agent.as_ref(), &ctx, extra);
        Ok(self.execute(ctx, agent.as_ref(), &chain).await)
    }

    /// Dispatches agents one after another, stopping once the context is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `Resolution` if a named agent is not registered.
    pub async fn dispatch_sequence(
        &self,
        ctx: Context,
        agents: &[AgentRef],
    ) -> Result<Context, AgentflowError> {
        let mut ctx = ctx;
        for agent in agents {
            if ctx.is_cancelled() {
                debug!(
                    correlation_id = %ctx.correlation_id(),
                    next = %agent.label(),
                    "Context cancelled, stopping sequence"
                );
                break;
            }
            ctx = self.dispatch(ctx, agent.clone()).await?;
        }
        Ok(ctx)
    }

    /// Dispatches every agent against the same context and merges the results.
    ///
    /// A failing branch, including one whose agent cannot be resolved, never
    /// aborts the others; its messages are appended to the merged context.
    pub async fn dispatch_parallel(&self, ctx: &Context, agents: &[AgentRef]) -> Context {
        self.dispatch_parallel_with(ctx, agents, &[]).await
    }

    /// [`Mediator::dispatch_parallel`] with extra middleware.
    pub async fn dispatch_parallel_with(
        &self,
        ctx: &Context,
        agents: &[AgentRef],
        extra: &[Arc<dyn Middleware>],
    ) -> Context {
        let branches = agents
            .iter()
            .map(|agent| self.dispatch_with(ctx.clone(), agent.clone(), extra));
        let outcomes = join_all(branches).await;

        let base_errors = ctx.error_count();
        let mut payloads = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(result) if result.error_count() <= base_errors => {
                    payloads.push(result.into_payload());
                }
                Ok(result) => {
                    failures.extend(new_errors(&result, base_errors).iter().cloned());
                }
                Err(err) => failures.push(err.to_string()),
            }
        }

        let successful = payloads.len();
        let error_count = failures.len();
        let merged = if payloads.is_empty() {
            ctx.payload().clone()
        } else {
            merge_payloads(payloads)
        };
        debug!(
            correlation_id = %ctx.correlation_id(),
            total = agents.len(),
            successful,
            errors = error_count,
            "Parallel dispatch finished"
        );

        ctx.with_payload(merged).add_errors(failures).with_metadata(
            PARALLEL_EXECUTION_KEY,
            json!({
                "total_agents": agents.len(),
                "successful": successful,
                "errors": error_count,
            }),
        )
    }

    fn select_chain(
        &self,
        agent: &dyn Agent,
        ctx: &Context,
        extra: &[Arc<dyn Middleware>],
    ) -> MiddlewareChain {
        let mut global = self.global.read().clone();
        global.extend(extra.iter().cloned());
        let scoped = self.scoped.read().clone();
        MiddlewareChain::select(&global, &scoped, agent, ctx)
    }

    async fn execute(&self, ctx: Context, agent: &dyn Agent, chain: &MiddlewareChain) -> Context {
        let name = agent.name().to_string();
        let errors_before = ctx.error_count();

        if self.events_enabled() {
            self.emit(OrchestrationEvent::new(EventKind::AgentStarted, &name, &ctx))
                .await;
        }
        debug!(
            agent = %name,
            correlation_id = %ctx.correlation_id(),
            middleware = ?chain.names(),
            "Dispatching agent"
        );

        let timer = Instant::now();
        let prepared = chain.run_before(ctx, agent).await;
        let (result, raised) = match agent.invoke(prepared.clone()).await {
            Ok(output) => (chain.run_after(&prepared, agent, output).await, None),
            Err(err) => {
                warn!(agent = %name, error = %err, "Agent raised");
                (chain.handle_error(&prepared, agent, &err).await, Some(err))
            }
        };
        let elapsed_ms = timer.elapsed().as_secs_f64() * 1000.0;
        let succeeded = result.error_count() <= errors_before;

        self.stats.lock().record(&name, succeeded, elapsed_ms);
        if let Some(threshold) = self.config.slow_agent_threshold_ms {
            if elapsed_ms > threshold as f64 {
                warn!(agent = %name, duration_ms = elapsed_ms, threshold_ms = threshold, "Slow agent");
            }
        }

        if self.events_enabled() {
            let duration_ms = elapsed_ms as u64;
            let event = if succeeded {
                OrchestrationEvent::new(EventKind::AgentCompleted, &name, &result)
            } else {
                let failed = OrchestrationEvent::new(EventKind::AgentFailed, &name, &result);
                match &raised {
                    Some(err) => failed.with_error(err),
                    None => failed.with_context_errors(&name, new_errors(&result, errors_before)),
                }
            };
            self.emit(event.with_duration_ms(duration_ms)).await;
        }

        result
    }

    /// Delivers an event to the sink if notifications are enabled.
    pub async fn notify(&self, event: OrchestrationEvent) {
        if self.events_enabled() {
            self.emit(event).await;
        }
    }

    async fn emit(&self, event: OrchestrationEvent) {
        let sink = self.event_sink.clone().unwrap_or_else(get_event_sink);
        sink.emit(&event).await;
    }
}

impl Default for Mediator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Mediator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mediator")
            .field("agents", &self.registry.len())
            .field("middleware", &self.middleware_count())
            .field("events_enabled", &self.events_enabled())
            .field("config", &self.config)
            .finish()
    }
}

fn new_errors(result: &Context, before: usize) -> &[String] {
    result.errors().get(before..).unwrap_or_default()
}
