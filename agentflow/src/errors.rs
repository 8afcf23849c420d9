//! Error types for the agentflow orchestrator.
//!
//! Agent-level failures are normally folded into [`Context`](crate::context::Context)
//! errors by the mediator. The variants here cover the cases that cross an
//! API boundary: resolution of unknown identifiers, unsafe payloads on the
//! queue path, async aggregation timeouts and malformed configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for agentflow operations.
#[derive(Debug, Error)]
pub enum AgentflowError {
    /// Input was rejected before the agent ran.
    #[error("Validation failed for agent '{agent}': {}", errors.join("; "))]
    Validation {
        /// The agent that rejected the input.
        agent: String,
        /// The individual validation messages.
        errors: Vec<String>,
    },

    /// The agent's own logic failed.
    #[error("Agent '{agent}' failed: {message}")]
    Execution {
        /// The failing agent.
        agent: String,
        /// The failure message.
        message: String,
    },

    /// An agent or middleware identifier could not be resolved.
    #[error("Unable to resolve {kind} '{identifier}'")]
    Resolution {
        /// The identifier that was looked up.
        identifier: String,
        /// What was being resolved ("agent" or "middleware").
        kind: String,
    },

    /// The payload contains values that cannot be externalized.
    #[error("Payload is not serializable at '{path}': {message}")]
    Serialization {
        /// JSON-pointer-like path of the offending value.
        path: String,
        /// Details.
        message: String,
    },

    /// The circuit breaker short-circuited the call.
    #[error("Circuit open for service '{service}'")]
    CircuitOpen {
        /// The protected service.
        service: String,
    },

    /// The rate limiter short-circuited the call.
    #[error("Rate limit of {limit} requests/minute exceeded for service '{service}'")]
    RateLimited {
        /// The protected service.
        service: String,
        /// The configured limit.
        limit: u32,
    },

    /// Waiting for an async batch result exceeded its deadline.
    #[error("Batch '{batch_id}' did not finish within {waited_ms}ms")]
    AggregationTimeout {
        /// The batch being waited on.
        batch_id: String,
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// An HTTP collaborator failed.
    #[error("Transport error{}: {message}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Transport {
        /// HTTP status, if a response was received.
        status: Option<u16>,
        /// Details.
        message: String,
    },

    /// The orchestrator was configured inconsistently.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Work was cancelled.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Any other error raised from agent code.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgentflowError {
    /// Creates an execution error.
    #[must_use]
    pub fn execution(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            agent: agent.into(),
            message: message.into(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(agent: impl Into<String>, errors: Vec<String>) -> Self {
        Self::Validation {
            agent: agent.into(),
            errors,
        }
    }

    /// Creates an agent resolution error.
    #[must_use]
    pub fn unresolved_agent(identifier: impl Into<String>) -> Self {
        Self::Resolution {
            identifier: identifier.into(),
            kind: "agent".to_string(),
        }
    }

    /// Creates a middleware resolution error.
    #[must_use]
    pub fn unresolved_middleware(identifier: impl Into<String>) -> Self {
        Self::Resolution {
            identifier: identifier.into(),
            kind: "middleware".to_string(),
        }
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Serialization {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a transport error.
    #[must_use]
    pub fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transport {
            status,
            message: message.into(),
        }
    }

    /// Returns a stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Execution { .. } | Self::Other(_) => "EXECUTION_ERROR",
            Self::Resolution { .. } => "RESOLUTION_ERROR",
            Self::Serialization { .. } | Self::Json(_) => "SERIALIZATION_ERROR",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::AggregationTimeout { .. } => "AGGREGATION_TIMEOUT",
            Self::Transport { .. } => "TRANSPORT_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Cancelled(_) => "CANCELLED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the error class name reported in failure notifications.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "ValidationError",
            Self::Execution { .. } | Self::Other(_) => "ExecutionError",
            Self::Resolution { .. } => "ResolutionError",
            Self::Serialization { .. } | Self::Json(_) => "SerializationError",
            Self::CircuitOpen { .. } => "CircuitOpenError",
            Self::RateLimited { .. } => "RateLimitedError",
            Self::AggregationTimeout { .. } => "AggregationTimeout",
            Self::Transport { .. } => "TransportError",
            Self::Configuration(_) => "ConfigurationError",
            Self::Cancelled(_) => "CancelledError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Returns true when a resilience policy refused the call.
    #[must_use]
    pub fn is_short_circuit(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. } | Self::RateLimited { .. })
    }

    /// Builds the summary carried by failure events.
    #[must_use]
    pub fn summary(&self) -> ErrorSummary {
        ErrorSummary {
            class: self.kind_name().to_string(),
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

/// Serializable description of an error for events and job records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// Error class name.
    pub class: String,
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_message_joins_errors() {
        let err = AgentflowError::validation("upper", vec!["empty".into(), "too long".into()]);
        assert_eq!(
            err.to_string(),
            "Validation failed for agent 'upper': empty; too long"
        );
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_resolution_error_kinds() {
        let agent = AgentflowError::unresolved_agent("missing");
        let mw = AgentflowError::unresolved_middleware("audit");

        assert_eq!(agent.to_string(), "Unable to resolve agent 'missing'");
        assert_eq!(mw.to_string(), "Unable to resolve middleware 'audit'");
        assert_eq!(agent.kind_name(), "ResolutionError");
    }

    #[test]
    fn test_transport_error_display() {
        let with_status = AgentflowError::transport(Some(503), "unavailable");
        let without = AgentflowError::transport(None, "connection reset");

        assert_eq!(with_status.to_string(), "Transport error (status 503): unavailable");
        assert_eq!(without.to_string(), "Transport error: connection reset");
    }

    #[test]
    fn test_short_circuit_detection() {
        assert!(AgentflowError::CircuitOpen { service: "geo".into() }.is_short_circuit());
        assert!(AgentflowError::RateLimited { service: "geo".into(), limit: 10 }.is_short_circuit());
        assert!(!AgentflowError::execution("geo", "boom").is_short_circuit());
    }

    #[test]
    fn test_anyhow_conversion() {
        fn fallible() -> Result<(), AgentflowError> {
            Err(anyhow::anyhow!("disk full"))?;
            Ok(())
        }

        let err = fallible().unwrap_err();
        assert_eq!(err.to_string(), "disk full");
        assert_eq!(err.code(), "EXECUTION_ERROR");
    }

    #[test]
    fn test_summary() {
        let summary = AgentflowError::execution("a", "boom").summary();
        assert_eq!(summary.class, "ExecutionError");
        assert_eq!(summary.code, "EXECUTION_ERROR");
        assert_eq!(summary.message, "Agent 'a' failed: boom");
    }
}
