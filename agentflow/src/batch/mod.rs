//! Async batch execution.
//!
//! This module provides:
//! - [`KeyValueStore`], the shared cache collaborator, and [`InMemoryStore`]
//! - [`TaskScheduler`], the job scheduler collaborator, and [`TokioScheduler`]
//! - [`BatchCoordinator`], which runs agents as jobs and aggregates results
//! - [`BatchHandle`], the explicit-wait handle over a batch result

mod cancellation;
mod coordinator;
mod handle;
mod scheduler;
mod store;

pub use cancellation::{BatchCancellation, CancelCallback};
pub use coordinator::{AgentJob, BatchConfig, BatchCoordinator, JobErrorRecord, BATCH_KEY};
pub use handle::BatchHandle;
pub use scheduler::{
    BatchJob, BatchOptions, BatchProgress, BatchSubmission, BatchSummary, CompletionCallback,
    JobAttempt, JobOutcome, TaskScheduler, TokioScheduler,
};
pub use store::{InMemoryStore, KeyValueStore};
