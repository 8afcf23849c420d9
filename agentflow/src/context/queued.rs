//! Externalized form of a context, safe to hand to queues and stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// A context whose payload has been converted to plain JSON.
///
/// Produced by [`Context::prepare_for_queue`](super::Context::prepare_for_queue)
/// and turned back with [`Context::from_queue`](super::Context::from_queue).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedContext {
    /// The payload as JSON.
    pub payload: Value,
    /// Metadata entries in insertion order.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Tag set.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Recorded errors.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Correlation id of the lineage.
    pub correlation_id: String,
    /// Trace id, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Creation time of the lineage.
    pub start_time: DateTime<Utc>,
    /// Cancellation flag.
    #[serde(default)]
    pub cancelled: bool,
}

impl QueuedContext {
    /// Encodes to a JSON value for storage.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Decodes from a stored JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not have the queued shape.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}
