//! Task scheduler collaborator and the in-process tokio implementation.

use super::BatchCancellation;
use crate::core::RetryPolicy;
use crate::errors::AgentflowError;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What a job sees about the attempt it is running.
#[derive(Debug, Clone)]
pub struct JobAttempt {
    /// The batch the job belongs to.
    pub batch_id: String,
    /// The job's id.
    pub job_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Attempts allowed in total.
    pub max_attempts: u32,
    /// Cancellation flag shared by the batch.
    pub cancellation: Arc<BatchCancellation>,
}

impl JobAttempt {
    /// Returns true if no retry follows a failure of this attempt.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// One independently scheduled unit of work.
#[async_trait]
pub trait BatchJob: Send + Sync {
    /// Unique id within the batch.
    fn job_id(&self) -> &str;

    /// Retry policy. Its `max_attempts` caps the batch limit and its
    /// delays space the attempts.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Runs one attempt. `Err` lets the scheduler retry;
    /// `Err(AgentflowError::Cancelled)` stops the job without retrying.
    async fn run(&self, attempt: &JobAttempt) -> Result<(), AgentflowError>;
}

/// Terminal state of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The job finished.
    Succeeded {
        /// Attempts used.
        attempts: u32,
    },
    /// The last attempt failed.
    Failed {
        /// Attempts used.
        attempts: u32,
        /// The last error.
        error: String,
    },
    /// The last attempt exceeded the job timeout.
    TimedOut {
        /// Attempts used.
        attempts: u32,
    },
    /// The batch was cancelled before the job could finish.
    Cancelled,
}

/// Counts of job states within a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// Jobs in the batch.
    pub total: usize,
    /// Jobs that finished.
    pub succeeded: usize,
    /// Jobs that failed or timed out after their retries.
    pub failed: usize,
    /// Jobs stopped by cancellation.
    pub cancelled: usize,
    /// Jobs not yet terminal.
    pub pending: usize,
}

impl BatchProgress {
    /// Progress for a batch with nothing finished yet.
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            total,
            pending: total,
            ..Self::default()
        }
    }

    /// Returns the share of terminal jobs, 0 to 100.
    #[must_use]
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let done = self.total - self.pending;
        u8::try_from(done * 100 / self.total).unwrap_or(100)
    }

    /// Returns true once every job is terminal.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.pending == 0
    }

    fn record(&mut self, outcome: &JobOutcome) {
        self.pending = self.pending.saturating_sub(1);
        match outcome {
            JobOutcome::Succeeded { .. } => self.succeeded += 1,
            JobOutcome::Failed { .. } | JobOutcome::TimedOut { .. } => self.failed += 1,
            JobOutcome::Cancelled => self.cancelled += 1,
        }
    }
}

/// Delivered to the completion callback once every job is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    /// The batch.
    pub batch_id: String,
    /// Outcomes in submission order, keyed by job id.
    pub outcomes: Vec<(String, JobOutcome)>,
    /// Why the batch was cancelled, if it was.
    pub cancel_reason: Option<String>,
}

impl BatchSummary {
    /// Looks up the outcome of one job.
    #[must_use]
    pub fn outcome(&self, job_id: &str) -> Option<&JobOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == job_id)
            .map(|(_, outcome)| outcome)
    }

    /// Returns the final counts.
    #[must_use]
    pub fn progress(&self) -> BatchProgress {
        let mut progress = BatchProgress::new(self.outcomes.len());
        for (_, outcome) in &self.outcomes {
            progress.record(outcome);
        }
        progress
    }
}

/// Scheduling limits applied to every job of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Attempts allowed per job, including the first.
    pub max_attempts: u32,
    /// Time allowed per attempt.
    pub job_timeout: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            job_timeout: Duration::from_secs(60),
        }
    }
}

/// Callback run exactly once when a batch finishes.
pub type CompletionCallback = Box<dyn FnOnce(BatchSummary) -> BoxFuture<'static, ()> + Send>;

/// A named batch of jobs handed to a [`TaskScheduler`].
pub struct BatchSubmission {
    /// Batch id.
    pub batch_id: String,
    /// The jobs, in order.
    pub jobs: Vec<Arc<dyn BatchJob>>,
    /// Retry and timeout limits.
    pub options: BatchOptions,
    /// Run once after every job is terminal.
    pub on_complete: CompletionCallback,
}

impl fmt::Debug for BatchSubmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchSubmission")
            .field("batch_id", &self.batch_id)
            .field("jobs", &self.jobs.iter().map(|j| j.job_id()).collect::<Vec<_>>())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Runs batches of independent jobs.
///
/// Implementations retry failed jobs up to the smaller of the batch's
/// `max_attempts` and the job's own retry policy, enforce the
/// per-attempt timeout and invoke `on_complete` exactly once, after every
/// job reached a terminal state.
#[async_trait]
pub trait TaskScheduler: Send + Sync {
    /// Starts a batch. Returns once the jobs are scheduled.
    async fn submit(&self, submission: BatchSubmission) -> Result<(), AgentflowError>;

    /// Returns the progress of a known batch.
    fn progress(&self, batch_id: &str) -> Option<BatchProgress>;

    /// Returns the cancellation flag of a known batch.
    fn cancellation(&self, batch_id: &str) -> Option<Arc<BatchCancellation>>;

    /// Cancels a batch. Returns false if it is unknown or already cancelled.
    fn cancel(&self, batch_id: &str, reason: &str) -> bool {
        self.cancellation(batch_id)
            .map_or(false, |cancellation| cancellation.cancel(reason))
    }
}

struct BatchState {
    progress: Mutex<BatchProgress>,
    cancellation: Arc<BatchCancellation>,
}

struct FinishedBatch {
    progress: BatchProgress,
    finished_at: Instant,
}

/// How long final progress of a finished batch stays queryable.
pub const DEFAULT_FINISHED_RETENTION: Duration = Duration::from_secs(300);

/// Scheduler that runs every job as a tokio task in this process.
///
/// Running batches are tracked until their completion callback is due.
/// Finished batches keep only their final progress, for the retention
/// period, and are pruned on the next submission.
pub struct TokioScheduler {
    batches: Arc<DashMap<String, Arc<BatchState>>>,
    finished: Arc<DashMap<String, FinishedBatch>>,
    retention: Duration,
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self {
            batches: Arc::new(DashMap::new()),
            finished: Arc::new(DashMap::new()),
            retention: DEFAULT_FINISHED_RETENTION,
        }
    }
}

impl TokioScheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long finished batches stay queryable.
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Drops finished batches older than the retention period.
    pub fn prune_finished(&self) {
        let retention = self.retention;
        self.finished
            .retain(|_, batch| batch.finished_at.elapsed() < retention);
    }

    /// Returns the number of running batches.
    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Returns the number of finished batches still queryable.
    #[must_use]
    pub fn finished_count(&self) -> usize {
        self.finished.len()
    }
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("batches", &self.batches.len())
            .field("finished", &self.finished.len())
            .field("retention", &self.retention)
            .finish()
    }
}

#[async_trait]
impl TaskScheduler for TokioScheduler {
    async fn submit(&self, submission: BatchSubmission) -> Result<(), AgentflowError> {
        let BatchSubmission {
            batch_id,
            jobs,
            options,
            on_complete,
        } = submission;

        self.prune_finished();
        if self.batches.contains_key(&batch_id) || self.finished.contains_key(&batch_id) {
            return Err(AgentflowError::Configuration(format!(
                "batch '{batch_id}' was already submitted"
            )));
        }

        let state = Arc::new(BatchState {
            progress: Mutex::new(BatchProgress::new(jobs.len())),
            cancellation: Arc::new(BatchCancellation::new()),
        });
        self.batches.insert(batch_id.clone(), Arc::clone(&state));
        info!(batch_id = %batch_id, jobs = jobs.len(), "Batch submitted");

        let job_ids: Vec<String> = jobs.iter().map(|job| job.job_id().to_string()).collect();
        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| tokio::spawn(run_job(job, batch_id.clone(), options, Arc::clone(&state))))
            .collect();

        let batches = Arc::clone(&self.batches);
        let finished = Arc::clone(&self.finished);
        tokio::spawn(async move {
            let results = join_all(handles).await;
            let outcomes = job_ids
                .into_iter()
                .zip(results)
                .map(|(job_id, joined)| {
                    let outcome = joined.unwrap_or_else(|e| {
                        warn!(job_id = %job_id, error = %e, "Job task aborted");
                        let outcome = JobOutcome::Failed {
                            attempts: 0,
                            error: format!("job task aborted: {e}"),
                        };
                        state.progress.lock().record(&outcome);
                        outcome
                    });
                    (job_id, outcome)
                })
                .collect();

            let summary = BatchSummary {
                batch_id,
                outcomes,
                cancel_reason: state.cancellation.reason(),
            };
            let progress = summary.progress();
            debug!(batch_id = %summary.batch_id, progress = ?progress, "Batch finished");
            batches.remove(&summary.batch_id);
            finished.insert(
                summary.batch_id.clone(),
                FinishedBatch {
                    progress,
                    finished_at: Instant::now(),
                },
            );
            on_complete(summary).await;
        });

        Ok(())
    }

    fn progress(&self, batch_id: &str) -> Option<BatchProgress> {
        if let Some(state) = self.batches.get(batch_id) {
            return Some(*state.progress.lock());
        }
        self.finished.get(batch_id).map(|batch| batch.progress)
    }

    fn cancellation(&self, batch_id: &str) -> Option<Arc<BatchCancellation>> {
        self.batches
            .get(batch_id)
            .map(|state| Arc::clone(&state.cancellation))
    }
}

async fn run_job(
    job: Arc<dyn BatchJob>,
    batch_id: String,
    options: BatchOptions,
    state: Arc<BatchState>,
) -> JobOutcome {
    let policy = job.retry_policy();
    let max_attempts = options.max_attempts.min(policy.max_attempts).max(1);
    let mut attempt = 1;

    let outcome = loop {
        if state.cancellation.is_cancelled() {
            break JobOutcome::Cancelled;
        }

        let context = JobAttempt {
            batch_id: batch_id.clone(),
            job_id: job.job_id().to_string(),
            attempt,
            max_attempts,
            cancellation: Arc::clone(&state.cancellation),
        };

        match tokio::time::timeout(options.job_timeout, job.run(&context)).await {
            Ok(Ok(())) => break JobOutcome::Succeeded { attempts: attempt },
            Ok(Err(AgentflowError::Cancelled(_))) => break JobOutcome::Cancelled,
            Ok(Err(err)) => {
                if context.is_final() {
                    break JobOutcome::Failed {
                        attempts: attempt,
                        error: err.to_string(),
                    };
                }
                warn!(
                    batch_id = %batch_id,
                    job_id = %context.job_id,
                    attempt,
                    error = %err,
                    "Job attempt failed, retrying"
                );
            }
            Err(_) => {
                if context.is_final() {
                    break JobOutcome::TimedOut { attempts: attempt };
                }
                warn!(
                    batch_id = %batch_id,
                    job_id = %context.job_id,
                    attempt,
                    timeout_ms = u64::try_from(options.job_timeout.as_millis()).unwrap_or(u64::MAX),
                    "Job attempt timed out, retrying"
                );
            }
        }

        tokio::time::sleep(policy.delay_for(attempt)).await;
        attempt += 1;
    };

    debug!(batch_id = %batch_id, job_id = %job.job_id(), outcome = ?outcome, "Job finished");
    state.progress.lock().record(&outcome);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::oneshot;

    fn completion(tx: oneshot::Sender<BatchSummary>) -> CompletionCallback {
        Box::new(move |summary: BatchSummary| {
            async move {
                let _ = tx.send(summary);
            }
            .boxed()
        })
    }

    struct ScriptedJob {
        id: String,
        failures: u32,
        delay: Duration,
        attempts: AtomicU32,
    }

    impl ScriptedJob {
        fn new(id: &str, failures: u32) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                failures,
                delay: Duration::ZERO,
                attempts: AtomicU32::new(0),
            })
        }

        fn slow(id: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                failures: 0,
                delay,
                attempts: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl BatchJob for ScriptedJob {
        fn job_id(&self) -> &str {
            &self.id
        }

        fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy::new().with_base_delay_ms(1)
        }

        async fn run(&self, _attempt: &JobAttempt) -> Result<(), AgentflowError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if attempt <= self.failures {
                return Err(AgentflowError::execution(&self.id, "scripted failure"));
            }
            Ok(())
        }
    }

    async fn run_batch(
        scheduler: &TokioScheduler,
        batch_id: &str,
        jobs: Vec<Arc<dyn BatchJob>>,
        options: BatchOptions,
    ) -> BatchSummary {
        let (tx, rx) = oneshot::channel();
        scheduler
            .submit(BatchSubmission {
                batch_id: batch_id.to_string(),
                jobs,
                options,
                on_complete: completion(tx),
            })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let scheduler = TokioScheduler::new();
        let job = ScriptedJob::new("flaky", 2);

        let summary = run_batch(&scheduler, "b1", vec![job.clone()], BatchOptions::default()).await;

        assert_eq!(summary.outcome("flaky"), Some(&JobOutcome::Succeeded { attempts: 3 }));
        assert_eq!(job.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let scheduler = TokioScheduler::new();
        let options = BatchOptions {
            max_attempts: 2,
            ..BatchOptions::default()
        };
        let job = ScriptedJob::new("broken", 10);

        let summary = run_batch(&scheduler, "b2", vec![job.clone()], options).await;

        assert!(matches!(
            summary.outcome("broken"),
            Some(JobOutcome::Failed { attempts: 2, .. })
        ));
        assert_eq!(job.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.progress("b2").unwrap().failed, 1);
    }

    struct SingleShotJob {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl BatchJob for SingleShotJob {
        fn job_id(&self) -> &str {
            "once"
        }

        fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy::none()
        }

        async fn run(&self, _attempt: &JobAttempt) -> Result<(), AgentflowError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(AgentflowError::execution("once", "no retries wanted"))
        }
    }

    #[tokio::test]
    async fn test_job_policy_caps_batch_attempts() {
        let scheduler = TokioScheduler::new();
        let job = Arc::new(SingleShotJob {
            attempts: AtomicU32::new(0),
        });

        let summary = run_batch(&scheduler, "capped", vec![job.clone()], BatchOptions::default()).await;

        assert!(matches!(
            summary.outcome("once"),
            Some(JobOutcome::Failed { attempts: 1, .. })
        ));
        assert_eq!(job.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_finished_batches_are_released() {
        let scheduler = TokioScheduler::new();
        run_batch(&scheduler, "done", vec![ScriptedJob::new("a", 0)], BatchOptions::default()).await;

        assert_eq!(scheduler.batch_count(), 0);
        assert_eq!(scheduler.finished_count(), 1);
        assert_eq!(scheduler.progress("done").unwrap().percent(), 100);
        assert!(scheduler.cancellation("done").is_none());
    }

    #[tokio::test]
    async fn test_finished_batches_expire_after_retention() {
        let scheduler = TokioScheduler::new().with_retention(Duration::ZERO);
        run_batch(&scheduler, "old", vec![ScriptedJob::new("a", 0)], BatchOptions::default()).await;
        run_batch(&scheduler, "new", Vec::new(), BatchOptions::default()).await;

        scheduler.prune_finished();
        assert_eq!(scheduler.batch_count(), 0);
        assert_eq!(scheduler.finished_count(), 0);
        assert!(scheduler.progress("old").is_none());
    }

    #[tokio::test]
    async fn test_timeout_on_final_attempt() {
        let scheduler = TokioScheduler::new();
        let options = BatchOptions {
            max_attempts: 1,
            job_timeout: Duration::from_millis(10),
        };

        let summary = run_batch(
            &scheduler,
            "b3",
            vec![ScriptedJob::slow("sleepy", Duration::from_secs(5))],
            options,
        )
        .await;

        assert_eq!(summary.outcome("sleepy"), Some(&JobOutcome::TimedOut { attempts: 1 }));
    }

    #[tokio::test]
    async fn test_completion_waits_for_every_job() {
        let scheduler = TokioScheduler::new();
        let jobs: Vec<Arc<dyn BatchJob>> = vec![
            ScriptedJob::new("a", 0),
            ScriptedJob::slow("b", Duration::from_millis(20)),
            ScriptedJob::new("c", 1),
        ];

        let summary = run_batch(&scheduler, "b4", jobs, BatchOptions::default()).await;
        let progress = summary.progress();

        assert_eq!(progress.total, 3);
        assert_eq!(progress.succeeded, 3);
        assert!(progress.is_finished());
        assert_eq!(progress.percent(), 100);
        let ids: Vec<_> = summary.outcomes.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_duplicate_batch_id_is_rejected() {
        let scheduler = TokioScheduler::new();
        run_batch(&scheduler, "dup", Vec::new(), BatchOptions::default()).await;

        let err = scheduler
            .submit(BatchSubmission {
                batch_id: "dup".to_string(),
                jobs: Vec::new(),
                options: BatchOptions::default(),
                on_complete: Box::new(|_: BatchSummary| async {}.boxed()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AgentflowError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_cancelled_batch_skips_jobs() {
        let scheduler = TokioScheduler::new();
        let (tx, rx) = oneshot::channel();
        let slow = ScriptedJob::slow("slow", Duration::from_millis(50));
        let jobs: Vec<Arc<dyn BatchJob>> = vec![slow];

        scheduler
            .submit(BatchSubmission {
                batch_id: "b5".to_string(),
                jobs,
                options: BatchOptions {
                    max_attempts: 1,
                    ..BatchOptions::default()
                },
                on_complete: completion(tx),
            })
            .await
            .unwrap();
        assert!(scheduler.cancel("b5", "user abort"));
        assert!(!scheduler.cancel("b5", "again"));

        let summary = rx.await.unwrap();
        assert_eq!(summary.cancel_reason.as_deref(), Some("user abort"));
        assert!(!scheduler.cancel("unknown", "x"));
    }

    #[test]
    fn test_progress_percent() {
        let mut progress = BatchProgress::new(4);
        assert_eq!(progress.percent(), 0);
        progress.record(&JobOutcome::Succeeded { attempts: 1 });
        progress.record(&JobOutcome::Cancelled);
        assert_eq!(progress.percent(), 50);
        assert_eq!(BatchProgress::new(0).percent(), 100);
    }
}
