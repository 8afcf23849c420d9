//! Event sink trait and implementations.

use super::OrchestrationEvent;
use async_trait::async_trait;
use tracing::{debug, info, Level};

/// Receives orchestration notifications.
///
/// Sinks observe execution; they never alter the context being processed.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: &OrchestrationEvent);

    /// Tries to emit an event without blocking.
    ///
    /// This method should never fail. Errors are logged but suppressed.
    fn try_emit(&self, event: &OrchestrationEvent);
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &OrchestrationEvent) {}

    fn try_emit(&self, _event: &OrchestrationEvent) {}
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// Creates an info-level logging sink.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }

    fn log_event(&self, event: &OrchestrationEvent) {
        let error = event.error.as_ref().map(|e| e.message.as_str());
        if self.level == Level::DEBUG {
            debug!(
                event_type = %event.kind,
                subject = %event.subject,
                correlation_id = %event.correlation_id,
                duration_ms = ?event.duration_ms,
                error = ?error,
                "Event: {}", event.kind
            );
        } else {
            info!(
                event_type = %event.kind,
                subject = %event.subject,
                correlation_id = %event.correlation_id,
                duration_ms = ?event.duration_ms,
                error = ?error,
                "Event: {}", event.kind
            );
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &OrchestrationEvent) {
        self.log_event(event);
    }

    fn try_emit(&self, event: &OrchestrationEvent) {
        self.log_event(event);
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<OrchestrationEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<OrchestrationEvent> {
        self.events.read().clone()
    }

    /// Returns the collected event names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.events.read().iter().map(|e| e.kind.as_str()).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events whose name starts with a prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<OrchestrationEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind.as_str().starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: &OrchestrationEvent) {
        self.events.write().push(event.clone());
    }

    fn try_emit(&self, event: &OrchestrationEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::events::EventKind;

    fn event(kind: EventKind) -> OrchestrationEvent {
        OrchestrationEvent::new(kind, "subject", &Context::new("x"))
    }

    #[tokio::test]
    async fn test_noop_and_logging_sinks_accept_events() {
        NoOpEventSink.emit(&event(EventKind::AgentStarted)).await;
        LoggingEventSink::debug().try_emit(&event(EventKind::AgentCompleted));
        LoggingEventSink::default()
            .emit(&event(EventKind::PipelineStarted))
            .await;
    }

    #[tokio::test]
    async fn test_collecting_sink_filter_and_clear() {
        let sink = CollectingEventSink::new();
        sink.emit(&event(EventKind::AgentStarted)).await;
        sink.emit(&event(EventKind::AgentCompleted)).await;
        sink.try_emit(&event(EventKind::PipelineCompleted));

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_of_type("agent.").len(), 2);
        assert_eq!(
            sink.names(),
            vec!["agent.started", "agent.completed", "pipeline.completed"]
        );

        sink.clear();
        assert!(sink.is_empty());
    }
}
