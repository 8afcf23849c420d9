//! Future-like handle over a batch result.

use super::{BatchProgress, KeyValueStore, TaskScheduler};
use crate::context::{Context, QueuedContext};
use crate::errors::AgentflowError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// The result of deferred processing.
///
/// A handle is either ready, holding the context of a synchronous run, or
/// pending on an async batch. Callers must `wait` before reading the result
/// of a pending handle; nothing blocks implicitly.
pub struct BatchHandle {
    state: HandleState,
}

enum HandleState {
    Ready(Context),
    Pending(PendingBatch),
}

struct PendingBatch {
    batch_id: String,
    final_key: String,
    store: Arc<dyn KeyValueStore>,
    scheduler: Arc<dyn TaskScheduler>,
    poll_interval: Duration,
    resolved: Mutex<Option<Context>>,
}

impl BatchHandle {
    /// Wraps an already computed context.
    #[must_use]
    pub fn ready(ctx: Context) -> Self {
        Self {
            state: HandleState::Ready(ctx),
        }
    }

    pub(crate) fn pending(
        batch_id: String,
        final_key: String,
        store: Arc<dyn KeyValueStore>,
        scheduler: Arc<dyn TaskScheduler>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            state: HandleState::Pending(PendingBatch {
                batch_id,
                final_key,
                store,
                scheduler,
                poll_interval,
                resolved: Mutex::new(None),
            }),
        }
    }

    /// Returns true if the result comes from an async batch.
    #[must_use]
    pub fn is_async(&self) -> bool {
        matches!(self.state, HandleState::Pending(_))
    }

    /// Returns the batch id of an async handle.
    #[must_use]
    pub fn batch_id(&self) -> Option<&str> {
        match &self.state {
            HandleState::Ready(_) => None,
            HandleState::Pending(batch) => Some(&batch.batch_id),
        }
    }

    /// Returns job completion, 0 to 100.
    #[must_use]
    pub fn progress(&self) -> u8 {
        match &self.state {
            HandleState::Ready(_) => 100,
            HandleState::Pending(batch) => {
                if batch.resolved.lock().is_some() {
                    return 100;
                }
                batch
                    .scheduler
                    .progress(&batch.batch_id)
                    .map_or(0, |progress| progress.percent())
            }
        }
    }

    /// Returns the job counts of an async handle.
    #[must_use]
    pub fn progress_detail(&self) -> Option<BatchProgress> {
        match &self.state {
            HandleState::Ready(_) => None,
            HandleState::Pending(batch) => batch.scheduler.progress(&batch.batch_id),
        }
    }

    /// Cancels the jobs that have not started. Returns false for ready
    /// handles and batches that were already cancelled.
    pub fn cancel(&self, reason: &str) -> bool {
        match &self.state {
            HandleState::Ready(_) => false,
            HandleState::Pending(batch) => batch.scheduler.cancel(&batch.batch_id, reason),
        }
    }

    /// Returns the result if it is already known, without waiting.
    #[must_use]
    pub fn try_result(&self) -> Option<Context> {
        match &self.state {
            HandleState::Ready(ctx) => Some(ctx.clone()),
            HandleState::Pending(batch) => batch.resolved.lock().clone(),
        }
    }

    /// Waits until the aggregated context is available.
    ///
    /// # Errors
    ///
    /// Returns `AggregationTimeout` if the final key does not appear within
    /// `timeout`, or a store error.
    pub async fn wait(&self, timeout: Duration) -> Result<Context, AgentflowError> {
        let batch = match &self.state {
            HandleState::Ready(ctx) => return Ok(ctx.clone()),
            HandleState::Pending(batch) => batch,
        };
        if let Some(ctx) = batch.resolved.lock().clone() {
            return Ok(ctx);
        }

        let started = Instant::now();
        loop {
            if let Some(value) = batch.store.get(&batch.final_key).await? {
                let ctx = Context::from_queue(QueuedContext::from_value(value)?);
                debug!(batch_id = %batch.batch_id, "Batch result available");
                *batch.resolved.lock() = Some(ctx.clone());
                return Ok(ctx);
            }

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(AgentflowError::AggregationTimeout {
                    batch_id: batch.batch_id.clone(),
                    waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                });
            }
            tokio::time::sleep(batch.poll_interval.min(timeout - waited)).await;
        }
    }
}

impl fmt::Debug for BatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            HandleState::Ready(ctx) => f
                .debug_struct("BatchHandle")
                .field("ready", &ctx.correlation_id())
                .finish(),
            HandleState::Pending(batch) => f
                .debug_struct("BatchHandle")
                .field("batch_id", &batch.batch_id)
                .field("resolved", &batch.resolved.lock().is_some())
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{InMemoryStore, TokioScheduler};
    use crate::context::Payload;

    fn pending(store: Arc<InMemoryStore>) -> BatchHandle {
        BatchHandle::pending(
            "b-1".to_string(),
            "final:b-1".to_string(),
            store,
            Arc::new(TokioScheduler::new()),
            Duration::from_millis(5),
        )
    }

    #[tokio::test]
    async fn test_ready_handle() {
        let handle = BatchHandle::ready(Context::new("done"));
        assert!(!handle.is_async());
        assert_eq!(handle.batch_id(), None);
        assert_eq!(handle.progress(), 100);
        assert!(!handle.cancel("no"));
        assert_eq!(
            handle.wait(Duration::ZERO).await.unwrap().payload(),
            &Payload::from("done")
        );
    }

    #[tokio::test]
    async fn test_wait_times_out_without_final_key() {
        let handle = pending(Arc::new(InMemoryStore::new()));
        assert!(handle.try_result().is_none());

        let err = handle.wait(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(
            err,
            AgentflowError::AggregationTimeout { ref batch_id, waited_ms } if batch_id == "b-1" && waited_ms >= 20
        ));
    }

    #[tokio::test]
    async fn test_wait_reads_final_key_once_written() {
        let store = Arc::new(InMemoryStore::new());
        let handle = pending(Arc::clone(&store));
        let ctx = Context::new("merged").with_tag("batch");

        let writer = Arc::clone(&store);
        let value = ctx.prepare_for_queue().unwrap().to_value().unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            writer.put("final:b-1", value, None).await.unwrap();
        });

        let result = handle.wait(Duration::from_secs(2)).await.unwrap();
        assert_eq!(result, ctx);
        assert_eq!(handle.try_result(), Some(ctx));
        assert_eq!(handle.progress(), 100);
    }
}
