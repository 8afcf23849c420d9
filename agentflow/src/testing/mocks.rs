//! Test doubles for agents, services and middleware.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::agents::{lifecycle, Agent, ServiceCall};
use crate::context::{Context, Payload};
use crate::core::RetryPolicy;
use crate::errors::AgentflowError;
use crate::middleware::Middleware;

/// An agent that records calls and returns a configurable payload.
#[derive(Debug)]
pub struct MockAgent {
    name: String,
    output: Mutex<Payload>,
    delay: Option<Duration>,
    call_count: Mutex<usize>,
    inputs: Mutex<Vec<Payload>>,
}

impl MockAgent {
    /// Creates a mock returning `output`.
    pub fn new(name: impl Into<String>, output: impl Into<Payload>) -> Self {
        Self {
            name: name.into(),
            output: Mutex::new(output.into()),
            delay: None,
            call_count: Mutex::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Sleeps before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sets the payload to return.
    pub fn set_output(&self, output: impl Into<Payload>) {
        *self.output.lock() = output.into();
    }

    /// Returns the number of times the agent ran.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.call_count.lock()
    }

    /// Returns the payloads the agent received.
    #[must_use]
    pub fn recorded_inputs(&self) -> Vec<Payload> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn estimated_execution_time(&self) -> Duration {
        self.delay.unwrap_or_default()
    }

    async fn handle(&self, ctx: Context) -> Result<Context, AgentflowError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        *self.call_count.lock() += 1;
        self.inputs.lock().push(ctx.payload().clone());
        let output = self.output.lock().clone();
        Ok(ctx.with_payload(output))
    }
}

/// An agent that fails.
///
/// By default the failure goes through the base lifecycle and ends up as a
/// context error. [`FailingAgent::raising`] returns `Err` from `invoke`
/// instead, exercising the mediator's middleware error path.
#[derive(Debug)]
pub struct FailingAgent {
    name: String,
    message: String,
    raise: bool,
    succeed_after: Option<usize>,
    attempts: Mutex<usize>,
}

impl FailingAgent {
    /// Creates an agent whose `handle` always fails.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            raise: false,
            succeed_after: None,
            attempts: Mutex::new(0),
        }
    }

    /// Creates an agent whose `invoke` returns `Err`.
    pub fn raising(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            raise: true,
            ..Self::new(name, message)
        }
    }

    /// Fails the first `failures` attempts, then passes the context through.
    #[must_use]
    pub fn succeed_after(mut self, failures: usize) -> Self {
        self.succeed_after = Some(failures);
        self
    }

    /// Returns the number of attempts.
    #[must_use]
    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }

    fn attempt(&self) -> Result<(), AgentflowError> {
        let mut attempts = self.attempts.lock();
        *attempts += 1;
        match self.succeed_after {
            Some(failures) if *attempts > failures => Ok(()),
            _ => Err(AgentflowError::execution(&self.name, &self.message)),
        }
    }
}

#[async_trait]
impl Agent for FailingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new().with_base_delay_ms(1)
    }

    async fn handle(&self, ctx: Context) -> Result<Context, AgentflowError> {
        self.attempt()?;
        Ok(ctx)
    }

    async fn invoke(&self, ctx: Context) -> Result<Context, AgentflowError> {
        if self.raise {
            self.attempt()?;
            return Ok(ctx);
        }
        Ok(lifecycle::run(self, ctx).await)
    }
}

/// A service call that counts invocations.
#[derive(Debug)]
pub struct CountingServiceCall {
    name: String,
    result: Result<Payload, String>,
    calls: Mutex<usize>,
}

impl CountingServiceCall {
    /// A call that always succeeds with `output`.
    pub fn succeeding(name: impl Into<String>, output: impl Into<Payload>) -> Self {
        Self {
            name: name.into(),
            result: Ok(output.into()),
            calls: Mutex::new(0),
        }
    }

    /// A call that always fails with a transport error.
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: Err(message.into()),
            calls: Mutex::new(0),
        }
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl ServiceCall for CountingServiceCall {
    fn service_name(&self) -> &str {
        &self.name
    }

    async fn call(&self, _input: &Payload) -> Result<Payload, AgentflowError> {
        *self.calls.lock() += 1;
        self.result
            .clone()
            .map_err(|message| AgentflowError::transport(None, message))
    }
}

/// Shared log written by [`RecordingMiddleware`].
pub type MiddlewareLog = Arc<Mutex<Vec<String>>>;

/// Middleware that records `before:<name>`, `after:<name>` and
/// `on_error:<name>` into a shared log.
#[derive(Debug)]
pub struct RecordingMiddleware {
    name: String,
    priority: i32,
    log: MiddlewareLog,
    skip_tag: Option<String>,
    recovers: bool,
}

impl RecordingMiddleware {
    /// Creates an empty shared log.
    #[must_use]
    pub fn shared_log() -> MiddlewareLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    /// Creates recording middleware.
    pub fn new(name: impl Into<String>, priority: i32, log: MiddlewareLog) -> Self {
        Self {
            name: name.into(),
            priority,
            log,
            skip_tag: None,
            recovers: false,
        }
    }

    /// Declines to run when the context carries `tag`.
    #[must_use]
    pub fn skip_when_tagged(mut self, tag: impl Into<String>) -> Self {
        self.skip_tag = Some(tag.into());
        self
    }

    /// Handles errors by tagging the context `recovered`.
    #[must_use]
    pub fn recovering(mut self) -> Self {
        self.recovers = true;
        self
    }

    fn record(&self, phase: &str) {
        self.log.lock().push(format!("{phase}:{}", self.name));
    }
}

#[async_trait]
impl Middleware for RecordingMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn should_run(&self, _agent: &dyn Agent, ctx: &Context) -> bool {
        self.skip_tag.as_deref().map_or(true, |tag| !ctx.has_tag(tag))
    }

    async fn before(&self, ctx: Context, _agent: &dyn Agent) -> Context {
        self.record("before");
        ctx
    }

    async fn after(&self, _input: &Context, _agent: &dyn Agent, result: Context) -> Context {
        self.record("after");
        result
    }

    async fn on_error(
        &self,
        ctx: &Context,
        _agent: &dyn Agent,
        _error: &AgentflowError,
    ) -> Option<Context> {
        self.record("on_error");
        self.recovers.then(|| ctx.with_tag("recovered"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_agent_records_calls() {
        let agent = MockAgent::new("mock", "out");
        let result = agent.invoke(Context::new("in")).await.unwrap();

        assert_eq!(result.payload(), &Payload::from("out"));
        assert_eq!(agent.call_count(), 1);
        assert_eq!(agent.recorded_inputs(), vec![Payload::from("in")]);
    }

    #[tokio::test]
    async fn test_failing_agent_modes() {
        let lifecycle_failure = FailingAgent::new("f", "boom")
            .invoke(Context::new(1))
            .await
            .unwrap();
        assert!(lifecycle_failure.has_errors());

        let raised = FailingAgent::raising("f", "boom").invoke(Context::new(1)).await;
        assert!(raised.is_err());
    }

    #[tokio::test]
    async fn test_failing_agent_recovers_after_attempts() {
        let agent = FailingAgent::raising("f", "boom").succeed_after(1);
        assert!(agent.invoke(Context::new(1)).await.is_err());
        assert!(agent.invoke(Context::new(1)).await.is_ok());
        assert_eq!(agent.attempts(), 2);
    }

    #[tokio::test]
    async fn test_counting_service_call() {
        let call = CountingServiceCall::failing("geo", "down");
        assert!(call.call(&Payload::Null).await.is_err());
        assert_eq!(call.call_count(), 1);
    }
}
