//! Selection and ordering of the middleware applied to one dispatch.

use super::{AgentMatcher, Middleware};
use crate::agents::Agent;
use crate::context::Context;
use crate::errors::AgentflowError;
use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Middleware that only applies to agents accepted by a matcher.
#[derive(Clone)]
pub struct ScopedMiddleware {
    /// Which agents the middleware applies to.
    pub matcher: AgentMatcher,
    /// The middleware.
    pub middleware: Arc<dyn Middleware>,
}

impl ScopedMiddleware {
    /// Creates a scoped entry.
    #[must_use]
    pub fn new(matcher: AgentMatcher, middleware: Arc<dyn Middleware>) -> Self {
        Self {
            matcher,
            middleware,
        }
    }
}

impl fmt::Debug for ScopedMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedMiddleware")
            .field("matcher", &self.matcher)
            .field("middleware", &self.middleware.name())
            .finish()
    }
}

/// The ordered set of middleware selected for one agent and context.
///
/// The set is fixed at selection time, so the `after` phase runs exactly the
/// middleware whose `before` ran.
pub struct MiddlewareChain {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Creates a chain from an explicit list, ordered by descending priority.
    #[must_use]
    pub fn new(mut middleware: Vec<Arc<dyn Middleware>>) -> Self {
        middleware.sort_by_key(|m| Reverse(m.priority()));
        Self { middleware }
    }

    /// Selects the global middleware plus the scoped middleware whose matcher
    /// accepts the agent, keeping those whose `should_run` accepts the dispatch.
    ///
    /// Ties in priority keep registration order, globals first.
    #[must_use]
    pub fn select(
        global: &[Arc<dyn Middleware>],
        scoped: &[ScopedMiddleware],
        agent: &dyn Agent,
        ctx: &Context,
    ) -> Self {
        let candidates = global.iter().cloned().chain(
            scoped
                .iter()
                .filter(|s| s.matcher.matches(agent))
                .map(|s| Arc::clone(&s.middleware)),
        );
        let selected = candidates
            .filter(|m| m.should_run(agent, ctx))
            .collect();
        Self::new(selected)
    }

    /// Runs `before` hooks in descending priority.
    pub async fn run_before(&self, mut ctx: Context, agent: &dyn Agent) -> Context {
        for middleware in &self.middleware {
            ctx = middleware.before(ctx, agent).await;
        }
        ctx
    }

    /// Runs `after` hooks in reverse order.
    pub async fn run_after(&self, input: &Context, agent: &dyn Agent, mut result: Context) -> Context {
        for middleware in self.middleware.iter().rev() {
            result = middleware.after(input, agent, result).await;
        }
        result
    }

    /// Runs `on_error` hooks forward until one handles the failure.
    ///
    /// If none does, the error message is appended to the context once.
    pub async fn handle_error(
        &self,
        ctx: &Context,
        agent: &dyn Agent,
        error: &AgentflowError,
    ) -> Context {
        for middleware in &self.middleware {
            if let Some(handled) = middleware.on_error(ctx, agent, error).await {
                debug!(
                    agent = %agent.name(),
                    middleware = %middleware.name(),
                    "Middleware handled agent failure"
                );
                return handled;
            }
        }
        ctx.add_error(error.to_string())
    }

    /// Returns the middleware names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.middleware.iter().map(|m| m.name()).collect()
    }

    /// Returns the number of selected middleware.
    #[must_use]
    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    /// Returns true if nothing was selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("middleware", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::NoOpAgent;
    use crate::testing::RecordingMiddleware;
    use pretty_assertions::assert_eq;

    fn arc(m: RecordingMiddleware) -> Arc<dyn Middleware> {
        Arc::new(m)
    }

    #[tokio::test]
    async fn test_before_descending_after_reversed() {
        let log = RecordingMiddleware::shared_log();
        let chain = MiddlewareChain::new(vec![
            arc(RecordingMiddleware::new("low", 1, log.clone())),
            arc(RecordingMiddleware::new("high", 10, log.clone())),
            arc(RecordingMiddleware::new("mid", 5, log.clone())),
        ]);
        let agent = NoOpAgent::new("idle");
        let ctx = Context::new(1);

        let before = chain.run_before(ctx.clone(), &agent).await;
        chain.run_after(&ctx, &agent, before).await;

        assert_eq!(
            log.lock().clone(),
            vec![
                "before:high", "before:mid", "before:low",
                "after:low", "after:mid", "after:high",
            ]
        );
    }

    #[tokio::test]
    async fn test_selection_uses_matchers_and_should_run() {
        let log = RecordingMiddleware::shared_log();
        let global = vec![arc(RecordingMiddleware::new("global", 0, log.clone()))];
        let scoped = vec![
            ScopedMiddleware::new(
                AgentMatcher::name("idle"),
                arc(RecordingMiddleware::new("for-idle", 0, log.clone())),
            ),
            ScopedMiddleware::new(
                AgentMatcher::name("other"),
                arc(RecordingMiddleware::new("for-other", 0, log.clone())),
            ),
            ScopedMiddleware::new(
                AgentMatcher::any(),
                arc(RecordingMiddleware::new("skipper", 0, log.clone()).skip_when_tagged("quiet")),
            ),
        ];
        let agent = NoOpAgent::new("idle");

        let chain = MiddlewareChain::select(&global, &scoped, &agent, &Context::new(1));
        assert_eq!(chain.names(), vec!["global", "for-idle", "skipper"]);

        let quiet = Context::new(1).with_tag("quiet");
        let chain = MiddlewareChain::select(&global, &scoped, &agent, &quiet);
        assert_eq!(chain.names(), vec!["global", "for-idle"]);
    }

    #[tokio::test]
    async fn test_unhandled_error_is_appended_once() {
        let log = RecordingMiddleware::shared_log();
        let chain = MiddlewareChain::new(vec![
            arc(RecordingMiddleware::new("a", 2, log.clone())),
            arc(RecordingMiddleware::new("b", 1, log.clone())),
        ]);
        let agent = NoOpAgent::new("idle");
        let err = AgentflowError::execution("idle", "boom");

        let result = chain.handle_error(&Context::new(1), &agent, &err).await;

        assert_eq!(result.errors(), &["Agent 'idle' failed: boom"]);
        assert_eq!(log.lock().clone(), vec!["on_error:a", "on_error:b"]);
    }

    #[tokio::test]
    async fn test_first_handler_clears_error() {
        let log = RecordingMiddleware::shared_log();
        let chain = MiddlewareChain::new(vec![
            arc(RecordingMiddleware::new("recover", 2, log.clone()).recovering()),
            arc(RecordingMiddleware::new("later", 1, log.clone())),
        ]);
        let agent = NoOpAgent::new("idle");
        let err = AgentflowError::execution("idle", "boom");

        let result = chain.handle_error(&Context::new(1), &agent, &err).await;

        assert!(!result.has_errors());
        assert!(result.has_tag("recovered"));
        assert_eq!(log.lock().clone(), vec!["on_error:recover"]);
    }
}
