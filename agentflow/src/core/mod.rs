//! Core domain types shared across the orchestrator.
//!
//! - Execution status state machine
//! - Pipeline execution modes
//! - Retry policy
//! - The parallel merge rule

mod merge;
mod mode;
mod retry;
mod status;

pub use merge::merge_payloads;
pub use mode::ExecutionMode;
pub use retry::{BackoffStrategy, JitterStrategy, RetryPolicy};
pub use status::ExecutionStatus;
