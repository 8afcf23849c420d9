//! Aggregate dispatch statistics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counters for one agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    /// Number of dispatches.
    pub calls: u64,
    /// Dispatches that added no errors.
    pub successes: u64,
    /// Dispatches that failed.
    pub failures: u64,
    /// Cumulative wall time.
    pub total_time_ms: f64,
}

impl AgentStats {
    /// Returns the mean dispatch time.
    #[must_use]
    pub fn average_time_ms(&self) -> f64 {
        if self.calls == 0 {
            return 0.0;
        }
        self.total_time_ms / self.calls as f64
    }
}

/// A snapshot of mediator statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediatorStats {
    /// Number of dispatches, including failed resolutions.
    pub total_dispatches: u64,
    /// Dispatches that added no errors.
    pub successful: u64,
    /// Dispatches that failed.
    pub failed: u64,
    /// Cumulative wall time across all agents.
    pub total_time_ms: f64,
    /// Per-agent counters, keyed by agent name.
    pub agents: BTreeMap<String, AgentStats>,
}

impl MediatorStats {
    /// Returns the fraction of successful dispatches, or 0 when nothing ran.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_dispatches == 0 {
            return 0.0;
        }
        self.successful as f64 / self.total_dispatches as f64
    }

    /// Returns the mean dispatch time.
    #[must_use]
    pub fn average_time_ms(&self) -> f64 {
        if self.total_dispatches == 0 {
            return 0.0;
        }
        self.total_time_ms / self.total_dispatches as f64
    }

    /// Returns the counters of one agent.
    #[must_use]
    pub fn agent(&self, name: &str) -> Option<&AgentStats> {
        self.agents.get(name)
    }

    pub(crate) fn record(&mut self, agent: &str, success: bool, elapsed_ms: f64) {
        self.total_dispatches += 1;
        self.total_time_ms += elapsed_ms;
        let entry = self.agents.entry(agent.to_string()).or_default();
        entry.calls += 1;
        entry.total_time_ms += elapsed_ms;
        if success {
            self.successful += 1;
            entry.successes += 1;
        } else {
            self.failed += 1;
            entry.failures += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stats() {
        let stats = MediatorStats::default();
        assert_eq!(stats.success_rate(), 0.0);
        assert_eq!(stats.average_time_ms(), 0.0);
        assert!(stats.agent("missing").is_none());
    }

    #[test]
    fn test_record_updates_totals_and_agents() {
        let mut stats = MediatorStats::default();
        stats.record("upper", true, 10.0);
        stats.record("upper", false, 30.0);
        stats.record("reverse", true, 2.0);

        assert_eq!(stats.total_dispatches, 3);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.failed, 1);

        let upper = stats.agent("upper").unwrap();
        assert_eq!(upper.calls, 2);
        assert_eq!(upper.failures, 1);
        assert!((upper.average_time_ms() - 20.0).abs() < f64::EPSILON);
        assert!((stats.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }
}
