//! Async batch dispatch and aggregation.
//!
//! Every agent of a batch runs as its own scheduled job. A job dispatches
//! the queued context through the mediator and writes either the resulting
//! context or a [`JobErrorRecord`] under its own key. When the scheduler
//! reports every job terminal, the completion callback merges the per-job
//! keys into one final context written at most once.

use super::{
    BatchHandle, BatchJob, BatchOptions, BatchSubmission, BatchSummary, JobAttempt, JobOutcome,
    KeyValueStore, TaskScheduler,
};
use super::{InMemoryStore, TokioScheduler};
use crate::agents::AgentRef;
use crate::context::{Context, QueuedContext};
use crate::core::{merge_payloads, RetryPolicy};
use crate::errors::AgentflowError;
use crate::events::{EventKind, OrchestrationEvent};
use crate::mediator::Mediator;
use crate::middleware::Middleware;
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Metadata key holding the counts of an aggregated batch.
pub const BATCH_KEY: &str = "batch";

fn default_result_ttl_seconds() -> u64 {
    3600
}

fn default_max_attempts() -> u32 {
    3
}

fn default_job_timeout_ms() -> u64 {
    60_000
}

fn default_poll_interval_ms() -> u64 {
    25
}

fn default_key_prefix() -> String {
    "agentflow:batch".to_string()
}

/// Configuration for the batch coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Lifetime of per-job and final keys.
    #[serde(default = "default_result_ttl_seconds")]
    pub result_ttl_seconds: u64,

    /// Attempts per job, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Time allowed per attempt.
    #[serde(default = "default_job_timeout_ms")]
    pub job_timeout_ms: u64,

    /// How often [`BatchHandle::wait`] polls the store.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Namespace of every key the coordinator writes.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Cancel the remaining jobs once one fails after its retries.
    #[serde(default)]
    pub cancel_siblings_on_failure: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            result_ttl_seconds: default_result_ttl_seconds(),
            max_attempts: default_max_attempts(),
            job_timeout_ms: default_job_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            key_prefix: default_key_prefix(),
            cancel_siblings_on_failure: false,
        }
    }
}

impl BatchConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the attempts per job.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the result lifetime.
    #[must_use]
    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl_seconds = ttl.as_secs();
        self
    }

    /// Sets the wait polling interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the key namespace.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Enables cancelling siblings when a job fails for good.
    #[must_use]
    pub fn with_cancel_siblings_on_failure(mut self, enabled: bool) -> Self {
        self.cancel_siblings_on_failure = enabled;
        self
    }

    /// Returns the result lifetime.
    #[must_use]
    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_seconds)
    }

    /// Returns the per-attempt timeout.
    #[must_use]
    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    /// Returns the wait polling interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Key of a job's resulting context.
    #[must_use]
    pub fn result_key(&self, batch_id: &str, job_id: &str) -> String {
        format!("{}:{batch_id}:job:{job_id}:result", self.key_prefix)
    }

    /// Key of a job's error record.
    #[must_use]
    pub fn error_key(&self, batch_id: &str, job_id: &str) -> String {
        format!("{}:{batch_id}:job:{job_id}:error", self.key_prefix)
    }

    /// Key of the aggregated context.
    #[must_use]
    pub fn final_key(&self, batch_id: &str) -> String {
        format!("{}:{batch_id}:final", self.key_prefix)
    }
}

/// What a failed job leaves behind for aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobErrorRecord {
    /// The job.
    pub job_id: String,
    /// Agent name or registry key.
    pub agent: String,
    /// Failure message.
    pub message: String,
    /// Machine-readable error code.
    pub code: String,
    /// Correlation id of the dispatched context.
    pub correlation_id: String,
    /// Attempt that wrote the record.
    pub attempt: u32,
}

/// A scheduled dispatch of one agent.
pub struct AgentJob {
    job_id: String,
    agent: AgentRef,
    input: QueuedContext,
    mediator: Arc<Mediator>,
    middleware: Vec<Arc<dyn Middleware>>,
    store: Arc<dyn KeyValueStore>,
    config: Arc<BatchConfig>,
}

impl AgentJob {
    /// Returns the agent label.
    #[must_use]
    pub fn agent_label(&self) -> &str {
        self.agent.label()
    }

    async fn store_result(&self, batch_id: &str, result: &Context) -> Result<(), AgentflowError> {
        let value = result.prepare_for_queue()?.to_value()?;
        self.store
            .put(
                &self.config.result_key(batch_id, &self.job_id),
                value,
                Some(self.config.result_ttl()),
            )
            .await?;
        self.store
            .forget(&self.config.error_key(batch_id, &self.job_id))
            .await
    }

    async fn store_error(
        &self,
        attempt: &JobAttempt,
        error: &AgentflowError,
    ) -> Result<(), AgentflowError> {
        let message = match error {
            AgentflowError::Execution { message, .. } => message.clone(),
            other => other.to_string(),
        };
        let record = JobErrorRecord {
            job_id: self.job_id.clone(),
            agent: self.agent.label().to_string(),
            message,
            code: error.code().to_string(),
            correlation_id: self.input.correlation_id.clone(),
            attempt: attempt.attempt,
        };
        self.store
            .put(
                &self.config.error_key(&attempt.batch_id, &self.job_id),
                serde_json::to_value(&record)?,
                Some(self.config.result_ttl()),
            )
            .await
    }
}

impl fmt::Debug for AgentJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentJob")
            .field("job_id", &self.job_id)
            .field("agent", &self.agent.label())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BatchJob for AgentJob {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    fn retry_policy(&self) -> RetryPolicy {
        match &self.agent {
            AgentRef::Instance(agent) => agent.retry_policy(),
            AgentRef::Named(key) => self
                .mediator
                .registry()
                .resolve(key)
                .map_or_else(|_| RetryPolicy::default(), |agent| agent.retry_policy()),
        }
    }

    async fn run(&self, attempt: &JobAttempt) -> Result<(), AgentflowError> {
        if attempt.cancellation.is_cancelled() {
            return Err(AgentflowError::Cancelled(format!(
                "batch '{}' was cancelled",
                attempt.batch_id
            )));
        }

        let ctx = Context::from_queue(self.input.clone());
        let errors_before = ctx.error_count();
        let failure = match self
            .mediator
            .dispatch_with(ctx, self.agent.clone(), &self.middleware)
            .await
        {
            Ok(result) if result.error_count() <= errors_before => {
                match self.store_result(&attempt.batch_id, &result).await {
                    Ok(()) => {
                        debug!(
                            batch_id = %attempt.batch_id,
                            job_id = %self.job_id,
                            agent = %self.agent.label(),
                            "Job result stored"
                        );
                        return Ok(());
                    }
                    Err(err) => err,
                }
            }
            Ok(result) => AgentflowError::execution(
                self.agent.label(),
                result.errors().get(errors_before..).unwrap_or_default().join("; "),
            ),
            Err(err) => err,
        };

        self.store_error(attempt, &failure).await?;
        if attempt.is_final() && self.config.cancel_siblings_on_failure {
            attempt
                .cancellation
                .cancel(format!("job '{}' failed: {failure}", self.job_id));
        }
        Err(failure)
    }
}

struct JobEntry {
    job_id: String,
    agent: String,
}

/// Submits agents as batch jobs and aggregates their results.
pub struct BatchCoordinator {
    mediator: Arc<Mediator>,
    store: Arc<dyn KeyValueStore>,
    scheduler: Arc<dyn TaskScheduler>,
    config: Arc<BatchConfig>,
}

impl BatchCoordinator {
    /// Creates a coordinator from its collaborators.
    #[must_use]
    pub fn new(
        mediator: Arc<Mediator>,
        store: Arc<dyn KeyValueStore>,
        scheduler: Arc<dyn TaskScheduler>,
        config: BatchConfig,
    ) -> Self {
        Self {
            mediator,
            store,
            scheduler,
            config: Arc::new(config),
        }
    }

    /// Creates a coordinator with an in-memory store and a tokio scheduler.
    #[must_use]
    pub fn in_process(mediator: Arc<Mediator>, config: BatchConfig) -> Self {
        Self::new(
            mediator,
            Arc::new(InMemoryStore::new()),
            Arc::new(TokioScheduler::new()),
            config,
        )
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Returns the scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<dyn TaskScheduler> {
        &self.scheduler
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Submits one job per agent.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the context cannot be queued, or the
    /// scheduler's error if submission fails.
    pub async fn submit(
        &self,
        ctx: &Context,
        agents: &[AgentRef],
    ) -> Result<BatchHandle, AgentflowError> {
        self.submit_with(ctx, agents, &[]).await
    }

    /// Submits one job per agent, each dispatched with extra middleware.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the context cannot be queued, or the
    /// scheduler's error if submission fails.
    pub async fn submit_with(
        &self,
        ctx: &Context,
        agents: &[AgentRef],
        middleware: &[Arc<dyn Middleware>],
    ) -> Result<BatchHandle, AgentflowError> {
        let input = ctx.prepare_for_queue()?;
        let batch_id = Uuid::new_v4().to_string();

        let mut entries = Vec::with_capacity(agents.len());
        let mut jobs: Vec<Arc<dyn BatchJob>> = Vec::with_capacity(agents.len());
        for agent in agents {
            let job_id = Uuid::new_v4().to_string();
            entries.push(JobEntry {
                job_id: job_id.clone(),
                agent: agent.label().to_string(),
            });
            jobs.push(Arc::new(AgentJob {
                job_id,
                agent: agent.clone(),
                input: input.clone(),
                mediator: Arc::clone(&self.mediator),
                middleware: middleware.to_vec(),
                store: Arc::clone(&self.store),
                config: Arc::clone(&self.config),
            }));
        }

        let aggregation = Aggregation {
            batch_id: batch_id.clone(),
            base: input,
            entries,
            mediator: Arc::clone(&self.mediator),
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
        };

        self.scheduler
            .submit(BatchSubmission {
                batch_id: batch_id.clone(),
                jobs,
                options: BatchOptions {
                    max_attempts: self.config.max_attempts,
                    job_timeout: self.config.job_timeout(),
                },
                on_complete: Box::new(move |summary: BatchSummary| {
                    async move { aggregation.complete(summary).await }.boxed()
                }),
            })
            .await?;

        info!(
            batch_id = %batch_id,
            correlation_id = %ctx.correlation_id(),
            jobs = agents.len(),
            "Batch dispatched"
        );
        Ok(BatchHandle::pending(
            batch_id.clone(),
            self.config.final_key(&batch_id),
            Arc::clone(&self.store),
            Arc::clone(&self.scheduler),
            self.config.poll_interval(),
        ))
    }
}

impl fmt::Debug for BatchCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("mediator", &self.mediator)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct Aggregation {
    batch_id: String,
    base: QueuedContext,
    entries: Vec<JobEntry>,
    mediator: Arc<Mediator>,
    store: Arc<dyn KeyValueStore>,
    config: Arc<BatchConfig>,
}

impl Aggregation {
    async fn complete(self, summary: BatchSummary) {
        let base = Context::from_queue(self.base.clone());
        let aggregated = match self.aggregate(&base, &summary).await {
            Ok(ctx) => ctx,
            Err(err) => {
                warn!(batch_id = %self.batch_id, error = %err, "Batch aggregation failed");
                base.add_error(format!("batch aggregation failed: {err}"))
            }
        };

        // Notify before the final key appears, so waiters observe the event.
        self.mediator
            .notify(OrchestrationEvent::new(
                EventKind::BatchCompleted,
                &self.batch_id,
                &aggregated,
            ))
            .await;

        match self.write_final(&aggregated).await {
            Ok(true) => info!(
                batch_id = %self.batch_id,
                errors = aggregated.error_count(),
                "Batch aggregated"
            ),
            Ok(false) => debug!(batch_id = %self.batch_id, "Batch already aggregated"),
            Err(err) => warn!(batch_id = %self.batch_id, error = %err, "Failed to store batch result"),
        }
    }

    async fn aggregate(
        &self,
        base: &Context,
        summary: &BatchSummary,
    ) -> Result<Context, AgentflowError> {
        let mut payloads = Vec::new();
        let mut errors = Vec::new();

        for entry in &self.entries {
            let result_key = self.config.result_key(&self.batch_id, &entry.job_id);
            if let Some(value) = self.store.get(&result_key).await? {
                let result = Context::from_queue(QueuedContext::from_value(value)?);
                payloads.push(result.into_payload());
                continue;
            }

            let error_key = self.config.error_key(&self.batch_id, &entry.job_id);
            if let Some(value) = self.store.get(&error_key).await? {
                let record: JobErrorRecord = serde_json::from_value(value)?;
                errors.push(record.message);
                continue;
            }

            match summary.outcome(&entry.job_id) {
                Some(JobOutcome::TimedOut { .. }) => {
                    errors.push(format!("{}: job timed out", entry.agent));
                }
                Some(JobOutcome::Failed { error, .. }) => {
                    errors.push(format!("{}: {error}", entry.agent));
                }
                _ => {}
            }
        }

        let progress = summary.progress();
        let successful = payloads.len();
        let failed = errors.len();
        let payload = if payloads.is_empty() {
            base.payload().clone()
        } else {
            merge_payloads(payloads)
        };

        let aggregated = base.with_payload(payload).add_errors(errors).with_metadata(
            BATCH_KEY,
            json!({
                "batch_id": self.batch_id,
                "total_jobs": self.entries.len(),
                "successful": successful,
                "failed": failed,
                "cancelled": progress.cancelled,
            }),
        );

        Ok(match &summary.cancel_reason {
            Some(reason) => aggregated.cancel_with_reason(reason.clone()),
            None => aggregated,
        })
    }

    async fn write_final(&self, aggregated: &Context) -> Result<bool, AgentflowError> {
        let value = aggregated.prepare_for_queue()?.to_value()?;
        self.store
            .put_if_absent(
                &self.config.final_key(&self.batch_id),
                value,
                Some(self.config.result_ttl()),
            )
            .await
    }
}
