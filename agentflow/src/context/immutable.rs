//! The immutable unit-of-work value threaded through every operation.

use super::{Payload, QueuedContext};
use crate::errors::AgentflowError;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

/// Metadata key holding the reason passed to [`Context::cancel_with_reason`].
pub const CANCEL_REASON_KEY: &str = "cancel_reason";

/// Immutable carrier of payload, metadata, tags and errors.
///
/// Every mutator borrows the receiver and returns a new `Context`.
/// `correlation_id` and `start_time` are fixed when the lineage is created
/// and copied into every derived value.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    payload: Payload,
    metadata: Map<String, Value>,
    tags: BTreeSet<String>,
    errors: Vec<String>,
    correlation_id: String,
    trace_id: Option<String>,
    start_time: DateTime<Utc>,
    cancelled: bool,
}

impl Context {
    /// Starts a new lineage with a fresh correlation id.
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            payload: payload.into(),
            metadata: Map::new(),
            tags: BTreeSet::new(),
            errors: Vec::new(),
            correlation_id: Uuid::new_v4().to_string(),
            trace_id: None,
            start_time: Utc::now(),
            cancelled: false,
        }
    }

    /// Restores a context that was externalized with [`Context::prepare_for_queue`].
    #[must_use]
    pub fn from_queue(queued: QueuedContext) -> Self {
        Self {
            payload: Payload::from(queued.payload),
            metadata: queued.metadata,
            tags: queued.tags,
            errors: queued.errors,
            correlation_id: queued.correlation_id,
            trace_id: queued.trace_id,
            start_time: queued.start_time,
            cancelled: queued.cancelled,
        }
    }

    /// Returns the payload.
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consumes the context, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Returns a copy carrying a new payload.
    #[must_use]
    pub fn with_payload(&self, payload: impl Into<Payload>) -> Self {
        Self {
            payload: payload.into(),
            ..self.clone()
        }
    }

    /// Returns the metadata map.
    #[must_use]
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Looks up a metadata value.
    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Returns true if the metadata key is present.
    #[must_use]
    pub fn has_metadata(&self, key: &str) -> bool {
        self.metadata.contains_key(key)
    }

    /// Returns a copy with one metadata entry set.
    #[must_use]
    pub fn with_metadata(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut next = self.clone();
        next.metadata.insert(key.into(), value.into());
        next
    }

    /// Returns a copy with several metadata entries set.
    #[must_use]
    pub fn merge_metadata<I, K>(&self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut next = self.clone();
        for (key, value) in entries {
            next.metadata.insert(key.into(), value);
        }
        next
    }

    /// Returns a copy without the given metadata key.
    #[must_use]
    pub fn without_metadata(&self, key: &str) -> Self {
        let mut next = self.clone();
        next.metadata.remove(key);
        next
    }

    /// Returns the tag set.
    #[must_use]
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Returns true if the tag is present.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Returns a copy with the tag added. Adding an existing tag is a no-op.
    #[must_use]
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.tags.insert(tag.into());
        next
    }

    /// Returns a copy with all the tags added.
    #[must_use]
    pub fn with_tags<I, T>(&self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut next = self.clone();
        next.tags.extend(tags.into_iter().map(Into::into));
        next
    }

    /// Returns a copy with the tag removed.
    #[must_use]
    pub fn without_tag(&self, tag: &str) -> Self {
        let mut next = self.clone();
        next.tags.remove(tag);
        next
    }

    /// Returns the recorded errors, oldest first.
    #[must_use]
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Returns true if any error has been recorded.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns the number of recorded errors.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns a copy with the error appended.
    #[must_use]
    pub fn add_error(&self, error: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.errors.push(error.into());
        next
    }

    /// Returns a copy with all the errors appended in order.
    #[must_use]
    pub fn add_errors<I, E>(&self, errors: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<String>,
    {
        let mut next = self.clone();
        next.errors.extend(errors.into_iter().map(Into::into));
        next
    }

    /// Returns true if the context was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Returns a cancelled copy.
    #[must_use]
    pub fn cancel(&self) -> Self {
        Self {
            cancelled: true,
            ..self.clone()
        }
    }

    /// Returns a cancelled copy recording the reason under `cancel_reason`.
    #[must_use]
    pub fn cancel_with_reason(&self, reason: impl Into<String>) -> Self {
        let mut next = self.cancel();
        next.metadata
            .insert(CANCEL_REASON_KEY.to_string(), Value::String(reason.into()));
        next
    }

    /// Returns the correlation id shared by the whole lineage.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Returns the trace id, if one was set.
    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    /// Returns a copy with the trace id set.
    #[must_use]
    pub fn with_trace_id(&self, trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: Some(trace_id.into()),
            ..self.clone()
        }
    }

    /// Returns when the lineage was created.
    #[must_use]
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Returns the time elapsed since the lineage was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        (Utc::now() - self.start_time).to_std().unwrap_or_default()
    }

    /// Returns true if the payload can be externalized.
    #[must_use]
    pub fn is_serializable(&self) -> bool {
        self.payload.is_serializable()
    }

    /// Returns a best-effort payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload.estimated_size()
    }

    /// Returns true if the payload is null, an empty string, or an empty collection.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Converts into the externalizable form used by queues and stores.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the payload holds a callable.
    pub fn prepare_for_queue(&self) -> Result<QueuedContext, AgentflowError> {
        Ok(QueuedContext {
            payload: self.payload.to_json()?,
            metadata: self.metadata.clone(),
            tags: self.tags.clone(),
            errors: self.errors.clone(),
            correlation_id: self.correlation_id.clone(),
            trace_id: self.trace_id.clone(),
            start_time: self.start_time,
            cancelled: self.cancelled,
        })
    }

    /// Renders the full context as JSON for debugging.
    ///
    /// Callables are rendered as placeholders rather than failing.
    #[must_use]
    pub fn to_debug_value(&self) -> Value {
        serde_json::json!({
            "payload": self.payload.to_json_lossy(),
            "metadata": Value::Object(self.metadata.clone()),
            "tags": self.tags.iter().cloned().collect::<Vec<_>>(),
            "errors": self.errors.clone(),
            "correlation_id": self.correlation_id.clone(),
            "trace_id": self.trace_id.clone(),
            "start_time": self.start_time.to_rfc3339(),
            "elapsed_ms": u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX),
            "cancelled": self.cancelled,
        })
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Payload::Null)
    }
}
