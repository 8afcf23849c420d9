//! Orchestration notifications.

use crate::context::Context;
use crate::errors::{AgentflowError, ErrorSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// An agent is about to run.
    #[serde(rename = "agent.started")]
    AgentStarted,
    /// An agent finished without adding errors.
    #[serde(rename = "agent.completed")]
    AgentCompleted,
    /// An agent raised or added errors.
    #[serde(rename = "agent.failed")]
    AgentFailed,
    /// A pipeline began processing.
    #[serde(rename = "pipeline.started")]
    PipelineStarted,
    /// A pipeline finished processing.
    #[serde(rename = "pipeline.completed")]
    PipelineCompleted,
    /// A batch was aggregated.
    #[serde(rename = "batch.completed")]
    BatchCompleted,
}

impl EventKind {
    /// Dotted event name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentStarted => "agent.started",
            Self::AgentCompleted => "agent.completed",
            Self::AgentFailed => "agent.failed",
            Self::PipelineStarted => "pipeline.started",
            Self::PipelineCompleted => "pipeline.completed",
            Self::BatchCompleted => "batch.completed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification delivered to an [`EventSink`](super::EventSink).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationEvent {
    /// Event kind.
    pub kind: EventKind,
    /// Agent, pipeline or batch the event is about.
    pub subject: String,
    /// Correlation id of the context.
    pub correlation_id: String,
    /// Trace id of the context, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Tags of the context.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Elapsed time, for completion events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Failure details, for failure events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSummary>,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
}

impl OrchestrationEvent {
    /// Creates an event carrying the context's identity fields.
    #[must_use]
    pub fn new(kind: EventKind, subject: impl Into<String>, ctx: &Context) -> Self {
        Self {
            kind,
            subject: subject.into(),
            correlation_id: ctx.correlation_id().to_string(),
            trace_id: ctx.trace_id().map(str::to_string),
            tags: ctx.tags().clone(),
            duration_ms: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Attaches an error summary.
    #[must_use]
    pub fn with_error(mut self, error: &AgentflowError) -> Self {
        self.error = Some(error.summary());
        self
    }

    /// Attaches the summary of errors added to a context during execution.
    #[must_use]
    pub fn with_context_errors(mut self, agent: &str, messages: &[String]) -> Self {
        self.error = Some(ErrorSummary {
            class: "ExecutionError".to_string(),
            code: "EXECUTION_ERROR".to_string(),
            message: format!("Agent '{agent}' failed: {}", messages.join("; ")),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_carries_context_identity() {
        let ctx = Context::new("x").with_trace_id("t-1").with_tag("web");
        let event = OrchestrationEvent::new(EventKind::AgentStarted, "upper", &ctx);

        assert_eq!(event.correlation_id, ctx.correlation_id());
        assert_eq!(event.trace_id.as_deref(), Some("t-1"));
        assert!(event.tags.contains("web"));
    }

    #[test]
    fn test_kind_serializes_as_dotted_name() {
        let json = serde_json::to_string(&EventKind::AgentFailed).unwrap();
        assert_eq!(json, r#""agent.failed""#);
        assert_eq!(EventKind::PipelineCompleted.to_string(), "pipeline.completed");
    }

    #[test]
    fn test_failure_event_summary() {
        let ctx = Context::new("x");
        let err = AgentflowError::execution("upper", "boom");
        let event = OrchestrationEvent::new(EventKind::AgentFailed, "upper", &ctx).with_error(&err);

        let summary = event.error.unwrap();
        assert_eq!(summary.class, "ExecutionError");
        assert_eq!(summary.message, "Agent 'upper' failed: boom");
    }
}
