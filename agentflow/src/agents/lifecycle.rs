//! Base agent lifecycle.
//!
//! `Pending -> Skipped` when the agent is disabled or its condition is false,
//! `Pending -> Failed` when validation rejects the input, otherwise
//! `Pending -> Running -> {Completed, Failed}`. Timing metadata is recorded
//! on every path.

use super::Agent;
use crate::context::Context;
use crate::core::ExecutionStatus;
use crate::errors::AgentflowError;
use chrono::Utc;
use std::time::Instant;
use tracing::{debug, warn};

/// Set to `true` when the agent did not run.
pub const SKIPPED_KEY: &str = "skipped";
/// `"disabled"` or `"condition"`.
pub const SKIP_REASON_KEY: &str = "skip_reason";
/// Set to `true` when validation rejected the input.
pub const VALIDATION_FAILED_KEY: &str = "validation_failed";
/// Set to `true` when the agent failed.
pub const FAILED_KEY: &str = "failed";
/// Name of the agent that failed.
pub const FAILED_AGENT_KEY: &str = "failed_agent";
/// Terminal [`ExecutionStatus`] of the last invocation.
pub const STATUS_KEY: &str = "agent_status";
/// RFC 3339 start timestamp.
pub const STARTED_AT_KEY: &str = "execution_started_at";
/// RFC 3339 completion timestamp.
pub const COMPLETED_AT_KEY: &str = "execution_completed_at";
/// Elapsed time in milliseconds.
pub const EXECUTION_TIME_KEY: &str = "execution_time_ms";

/// Runs an agent through the base lifecycle.
///
/// Never fails: errors raised by the hooks or `handle` go through
/// [`Agent::on_error`].
pub async fn run<A: Agent + ?Sized>(agent: &A, ctx: Context) -> Context {
    let started_at = Utc::now();
    let timer = Instant::now();

    let (ctx, status) = if !agent.is_enabled() {
        debug!(agent = %agent.name(), "Agent disabled, skipping");
        (skip(&ctx, "disabled"), ExecutionStatus::Skipped)
    } else if !agent.should_execute(&ctx) {
        debug!(agent = %agent.name(), "Agent condition not met, skipping");
        (skip(&ctx, "condition"), ExecutionStatus::Skipped)
    } else {
        let validation = agent.validate(&ctx);
        if validation.is_valid() {
            match execute(agent, ctx.clone()).await {
                Ok(result) => (result, ExecutionStatus::Completed),
                Err(err) => {
                    warn!(agent = %agent.name(), error = %err, "Agent execution failed");
                    (agent.on_error(ctx, &err), ExecutionStatus::Failed)
                }
            }
        } else {
            debug!(
                agent = %agent.name(),
                errors = ?validation.errors(),
                "Agent input rejected"
            );
            let rejected = ctx
                .add_errors(validation.errors().iter().cloned())
                .with_metadata(VALIDATION_FAILED_KEY, true);
            (rejected, ExecutionStatus::Failed)
        }
    };

    let elapsed_ms = u64::try_from(timer.elapsed().as_millis()).unwrap_or(u64::MAX);
    ctx.with_metadata(STATUS_KEY, status.to_string())
        .with_metadata(STARTED_AT_KEY, started_at.to_rfc3339())
        .with_metadata(COMPLETED_AT_KEY, Utc::now().to_rfc3339())
        .with_metadata(EXECUTION_TIME_KEY, elapsed_ms)
}

/// Appends the error message and the failure markers.
#[must_use]
pub fn mark_failed(ctx: Context, agent: &str, error: &AgentflowError) -> Context {
    ctx.add_error(error.to_string())
        .with_metadata(FAILED_KEY, true)
        .with_metadata(FAILED_AGENT_KEY, agent)
}

async fn execute<A: Agent + ?Sized>(agent: &A, ctx: Context) -> Result<Context, AgentflowError> {
    let ctx = agent.before_execute(ctx).await?;
    let ctx = agent.handle(ctx).await?;
    agent.after_execute(ctx).await
}

fn skip(ctx: &Context, reason: &str) -> Context {
    ctx.with_metadata(SKIPPED_KEY, true)
        .with_metadata(SKIP_REASON_KEY, reason)
}
