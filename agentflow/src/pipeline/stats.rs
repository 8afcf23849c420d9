//! Pipeline shape summary.

use crate::core::ExecutionMode;
use serde::{Deserialize, Serialize};

/// What [`super::Pipeline::stats`] reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Pipeline name.
    pub name: String,
    /// Number of top-level stages, hooks included.
    pub stage_count: usize,
    /// Sum of the stages' self-reported costs, plus the costlier branch.
    pub estimated_time_ms: u64,
    /// Whether the pipeline or a nested one has a branch.
    pub has_branching: bool,
    /// Middleware attached to the pipeline itself.
    pub middleware_count: usize,
    /// Execution mode.
    pub mode: ExecutionMode,
    /// Whether processing submits a batch.
    pub asynchronous: bool,
}
