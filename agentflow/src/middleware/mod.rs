//! Cross-cutting interception around agent execution.
//!
//! Middleware selected for a dispatch form an onion: `before` hooks run in
//! descending priority, `after` hooks run in reverse, and `on_error` hooks
//! run forward until one of them handles the failure.

mod builtin;
mod chain;
mod matcher;

pub use builtin::{
    ContextSizeMiddleware, LoggingMiddleware, TagMiddleware, TimingMiddleware, PAYLOAD_SIZE_KEY,
    TIMINGS_KEY, TIMING_STARTED_KEY,
};
pub use chain::{MiddlewareChain, ScopedMiddleware};
pub use matcher::AgentMatcher;

use crate::agents::{Agent, Registry};
use crate::context::Context;
use crate::errors::AgentflowError;
use async_trait::async_trait;

/// Interception hooks around an agent invocation.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name used in logs and registries.
    fn name(&self) -> &str;

    /// Higher priorities run their `before` hook earlier.
    fn priority(&self) -> i32 {
        0
    }

    /// Returns false to leave this dispatch alone.
    fn should_run(&self, _agent: &dyn Agent, _ctx: &Context) -> bool {
        true
    }

    /// Runs before the agent.
    async fn before(&self, ctx: Context, _agent: &dyn Agent) -> Context {
        ctx
    }

    /// Runs after the agent, receiving the context the agent was given.
    async fn after(&self, _input: &Context, _agent: &dyn Agent, result: Context) -> Context {
        result
    }

    /// Handles an agent failure. Returning `Some` clears the error.
    async fn on_error(
        &self,
        _ctx: &Context,
        _agent: &dyn Agent,
        _error: &AgentflowError,
    ) -> Option<Context> {
        None
    }
}

/// Registry of middleware, keyed by name.
pub type MiddlewareRegistry = Registry<dyn Middleware>;

impl Registry<dyn Middleware> {
    /// Creates an empty middleware registry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_kind("middleware")
    }

    /// Registers middleware under its own name.
    pub fn register(&self, middleware: impl Middleware + 'static) {
        let name = middleware.name().to_string();
        self.register_as(name, std::sync::Arc::new(middleware));
    }
}

impl Default for Registry<dyn Middleware> {
    fn default() -> Self {
        Self::new()
    }
}
