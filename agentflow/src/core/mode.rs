//! Pipeline execution modes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a pipeline threads its context through its stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Each stage receives the previous stage's output.
    #[default]
    Sequential,
    /// Agent stages run independently against the same input and are merged.
    Parallel,
    /// The stages run, then a predicate selects a branch pipeline.
    Conditional,
    /// Collection payloads are transformed per item, then optionally folded.
    MapReduce,
}

impl ExecutionMode {
    /// Every mode, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::Sequential,
        Self::Parallel,
        Self::Conditional,
        Self::MapReduce,
    ];

    /// Short label used in logs and stats.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Conditional => "conditional",
            Self::MapReduce => "map_reduce",
        }
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Sequential => "Stages run one after another, each receiving the previous output",
            Self::Parallel => "Agent stages run independently on the same input and are merged",
            Self::Conditional => "A predicate chooses which branch pipeline runs",
            Self::MapReduce => "Collection items are transformed individually, then folded",
        }
    }

    /// Returns true if stages may run concurrently.
    #[must_use]
    pub fn is_concurrent(&self) -> bool {
        match self {
            Self::Parallel => true,
            Self::Sequential | Self::Conditional | Self::MapReduce => false,
        }
    }

    /// Returns true if the mode can be handed to the batch coordinator.
    #[must_use]
    pub fn supports_async(&self) -> bool {
        match self {
            Self::Parallel => true,
            Self::Sequential | Self::Conditional | Self::MapReduce => false,
        }
    }

    /// Returns true if the mode needs a branch to be configured.
    #[must_use]
    pub fn requires_branch(&self) -> bool {
        match self {
            Self::Conditional => true,
            Self::Sequential | Self::Parallel | Self::MapReduce => false,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_parallel_is_concurrent() {
        let concurrent: Vec<_> = ExecutionMode::ALL
            .iter()
            .filter(|m| m.is_concurrent())
            .collect();
        assert_eq!(concurrent, vec![&ExecutionMode::Parallel]);
    }

    #[test]
    fn test_labels_round_trip_through_serde() {
        for mode in ExecutionMode::ALL {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{}\"", mode.label()));
        }
    }

    #[test]
    fn test_conditional_requires_branch() {
        assert!(ExecutionMode::Conditional.requires_branch());
        assert!(!ExecutionMode::MapReduce.requires_branch());
    }
}
