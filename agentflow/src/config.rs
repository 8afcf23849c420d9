//! Top-level configuration.

use crate::batch::BatchConfig;
use crate::errors::AgentflowError;
use crate::mediator::MediatorConfig;
use crate::resilience::ResilienceConfig;
use serde::{Deserialize, Serialize};

/// Settings for every configurable component, each section optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Mediator settings.
    #[serde(default)]
    pub mediator: MediatorConfig,
    /// Resilience policies for service-calling agents.
    #[serde(default)]
    pub resilience: ResilienceConfig,
    /// Async batch settings.
    #[serde(default)]
    pub batch: BatchConfig,
}

impl OrchestratorConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document. Missing sections and fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `Json` if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self, AgentflowError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets the mediator section.
    #[must_use]
    pub fn with_mediator(mut self, mediator: MediatorConfig) -> Self {
        self.mediator = mediator;
        self
    }

    /// Sets the resilience section.
    #[must_use]
    pub fn with_resilience(mut self, resilience: ResilienceConfig) -> Self {
        self.resilience = resilience;
        self
    }

    /// Sets the batch section.
    #[must_use]
    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_document_gives_defaults() {
        assert_eq!(OrchestratorConfig::from_json("{}").unwrap(), OrchestratorConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = OrchestratorConfig::from_json(
            r#"{
                "mediator": {"slow_agent_threshold_ms": 250},
                "resilience": {"rate_limit": {"requests_per_minute": 30}},
                "batch": {"max_attempts": 5, "cancel_siblings_on_failure": true}
            }"#,
        )
        .unwrap();

        assert!(config.mediator.emit_events);
        assert_eq!(config.mediator.slow_agent_threshold_ms, Some(250));
        assert_eq!(config.resilience.rate_limit.unwrap().requests_per_minute, 30);
        assert_eq!(config.batch.max_attempts, 5);
        assert!(config.batch.cancel_siblings_on_failure);
        assert_eq!(config.batch.result_ttl_seconds, 3600);
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(
            OrchestratorConfig::from_json("{not json"),
            Err(AgentflowError::Json(_))
        ));
    }
}
