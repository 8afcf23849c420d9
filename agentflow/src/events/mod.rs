//! Event sink system for orchestration notifications.
//!
//! Agents, pipelines and batches report their progress through an
//! [`EventSink`]. Dispatching can be switched off on the mediator without
//! any effect on the contexts being processed.

mod event;
mod sink;

pub use event::{EventKind, OrchestrationEvent};
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use parking_lot::RwLock;
use std::sync::Arc;

static GLOBAL_EVENT_SINK: RwLock<Option<Arc<dyn EventSink>>> = RwLock::new(None);

/// Sets the process-wide default event sink.
pub fn set_event_sink(sink: Arc<dyn EventSink>) {
    *GLOBAL_EVENT_SINK.write() = Some(sink);
}

/// Clears the process-wide default event sink.
pub fn clear_event_sink() {
    *GLOBAL_EVENT_SINK.write() = None;
}

/// Gets the process-wide default event sink.
///
/// Returns a `NoOpEventSink` if no sink is set.
pub fn get_event_sink() -> Arc<dyn EventSink> {
    GLOBAL_EVENT_SINK
        .read()
        .clone()
        .unwrap_or_else(|| Arc::new(NoOpEventSink))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn test_set_get_and_clear_sink() {
        let collecting = Arc::new(CollectingEventSink::new());
        set_event_sink(collecting.clone());

        let event = OrchestrationEvent::new(EventKind::BatchCompleted, "global-sink-test", &Context::new(1));
        get_event_sink().try_emit(&event);
        clear_event_sink();
        get_event_sink().try_emit(&event);

        let seen = collecting
            .events()
            .into_iter()
            .filter(|e| e.subject == "global-sink-test")
            .count();
        assert_eq!(seen, 1);
    }
}
