//! Mediator configuration.

use serde::{Deserialize, Serialize};

/// Configuration for a [`Mediator`](super::Mediator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediatorConfig {
    /// Whether agent notifications are delivered to the event sink.
    #[serde(default = "default_emit_events")]
    pub emit_events: bool,

    /// Dispatches slower than this are logged at warn level.
    #[serde(default)]
    pub slow_agent_threshold_ms: Option<u64>,
}

fn default_emit_events() -> bool {
    true
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            emit_events: default_emit_events(),
            slow_agent_threshold_ms: None,
        }
    }
}

impl MediatorConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables event delivery.
    #[must_use]
    pub fn with_events(mut self, enabled: bool) -> Self {
        self.emit_events = enabled;
        self
    }

    /// Sets the slow-agent warning threshold.
    #[must_use]
    pub fn with_slow_agent_threshold_ms(mut self, threshold: u64) -> Self {
        self.slow_agent_threshold_ms = Some(threshold);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: MediatorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, MediatorConfig::default());
        assert!(config.emit_events);
        assert_eq!(config.slow_agent_threshold_ms, None);
    }
}
