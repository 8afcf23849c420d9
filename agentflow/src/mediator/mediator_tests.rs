//! Dispatch, middleware ordering and parallel merge tests for `Mediator`.

use super::*;
use crate::agents::FnAgent;
use crate::context::Payload;
use crate::events::CollectingEventSink;
use crate::testing::{assert_has_error, assert_has_tag, FailingAgent, MockAgent, RecordingMiddleware};
use pretty_assertions::assert_eq;
use serde_json::json;

fn upper() -> FnAgent {
    FnAgent::transform("upper", |p| {
        Payload::from(p.as_str().unwrap_or_default().to_uppercase())
    })
}

fn returning(name: &str, value: serde_json::Value) -> AgentRef {
    AgentRef::instance(MockAgent::new(name, value))
}

#[tokio::test]
async fn test_dispatch_runs_agent_and_records_success() {
    let mediator = Mediator::new();
    let result = mediator
        .dispatch(Context::new("ab"), AgentRef::instance(upper()))
        .await
        .unwrap();

    assert_eq!(result.payload(), &Payload::from("AB"));
    let stats = mediator.stats();
    assert_eq!(stats.total_dispatches, 1);
    assert_eq!(stats.successful, 1);
    assert_eq!(stats.agent("upper").unwrap().calls, 1);
}

#[tokio::test]
async fn test_dispatch_by_name_uses_registry() {
    let mediator = Mediator::new();
    mediator.register(upper());

    let result = mediator.dispatch(Context::new("x"), "upper").await.unwrap();
    assert_eq!(result.payload(), &Payload::from("X"));
}

#[tokio::test]
async fn test_unresolved_agent_is_a_typed_error() {
    let mediator = Mediator::new();
    let err = mediator.dispatch(Context::new(1), "missing").await.unwrap_err();

    assert!(matches!(
        err,
        AgentflowError::Resolution { ref identifier, ref kind } if identifier == "missing" && kind == "agent"
    ));
    assert_eq!(mediator.stats().failed, 1);
}

#[tokio::test]
async fn test_middleware_runs_as_onion() {
    let log = RecordingMiddleware::shared_log();
    let mediator = Mediator::new();
    mediator.add_middleware(RecordingMiddleware::new("low", 1, log.clone()));
    mediator.add_middleware(RecordingMiddleware::new("high", 10, log.clone()));

    mediator
        .dispatch(Context::new("a"), AgentRef::instance(upper()))
        .await
        .unwrap();

    assert_eq!(
        log.lock().clone(),
        vec!["before:high", "before:low", "after:low", "after:high"]
    );
}

#[tokio::test]
async fn test_scoped_middleware_only_applies_to_matching_agents() {
    let log = RecordingMiddleware::shared_log();
    let mediator = Mediator::new();
    mediator.add_scoped_middleware(
        AgentMatcher::name("upper"),
        RecordingMiddleware::new("scoped", 0, log.clone()),
    );

    mediator
        .dispatch(Context::new("a"), AgentRef::instance(MockAgent::new("other", "x")))
        .await
        .unwrap();
    assert!(log.lock().is_empty());

    mediator
        .dispatch(Context::new("a"), AgentRef::instance(upper()))
        .await
        .unwrap();
    assert_eq!(log.lock().clone(), vec!["before:scoped", "after:scoped"]);
}

#[tokio::test]
async fn test_raised_error_is_appended_once_without_handler() {
    let log = RecordingMiddleware::shared_log();
    let mediator = Mediator::new();
    mediator.add_middleware(RecordingMiddleware::new("first", 5, log.clone()));
    mediator.add_middleware(RecordingMiddleware::new("second", 1, log.clone()));

    let result = mediator
        .dispatch(Context::new(1), AgentRef::instance(FailingAgent::raising("boom", "exploded")))
        .await
        .unwrap();

    assert_eq!(result.error_count(), 1);
    assert_has_error(&result, "exploded");
    assert_eq!(
        log.lock().clone(),
        vec!["before:first", "before:second", "on_error:first", "on_error:second"]
    );
    assert_eq!(mediator.stats().failed, 1);
}

#[tokio::test]
async fn test_recovering_middleware_clears_the_error() {
    let log = RecordingMiddleware::shared_log();
    let mediator = Mediator::new();
    mediator.add_middleware(RecordingMiddleware::new("rescue", 5, log.clone()).recovering());
    mediator.add_middleware(RecordingMiddleware::new("later", 1, log.clone()));

    let result = mediator
        .dispatch(Context::new(1), AgentRef::instance(FailingAgent::raising("boom", "exploded")))
        .await
        .unwrap();

    assert!(!result.has_errors());
    assert_has_tag(&result, "recovered");
    assert_eq!(
        log.lock().clone(),
        vec!["before:rescue", "before:later", "on_error:rescue"]
    );
}

#[tokio::test]
async fn test_lifecycle_failure_counts_as_failed_and_emits_event() {
    let sink = Arc::new(CollectingEventSink::new());
    let mediator = Mediator::new().with_event_sink(sink.clone());

    let result = mediator
        .dispatch(Context::new(1), AgentRef::instance(FailingAgent::new("flaky", "no luck")))
        .await
        .unwrap();

    assert_has_error(&result, "no luck");
    assert_eq!(mediator.stats().failed, 1);
    assert_eq!(sink.names(), vec!["agent.started", "agent.failed"]);

    let failed = &sink.events_of_type("agent.failed")[0];
    assert_eq!(failed.subject, "flaky");
    assert!(failed.error.as_ref().unwrap().message.contains("no luck"));
    assert!(failed.duration_ms.is_some());
}

#[tokio::test]
async fn test_disabled_events_do_not_change_results() {
    let sink = Arc::new(CollectingEventSink::new());
    let mediator = Mediator::new().with_event_sink(sink.clone());
    mediator.disable_events();

    let ctx = Context::new("ab");
    let quiet = mediator.dispatch(ctx.clone(), AgentRef::instance(upper())).await.unwrap();
    mediator.enable_events();
    let loud = mediator.dispatch(ctx, AgentRef::instance(upper())).await.unwrap();

    assert_eq!(quiet.payload(), loud.payload());
    assert_eq!(quiet.errors(), loud.errors());
    assert_eq!(sink.names(), vec!["agent.started", "agent.completed"]);
}

#[tokio::test]
async fn test_sequence_stops_when_cancelled() {
    let mediator = Mediator::new();
    let marker = MockAgent::new("marker", "marked");
    let marker = Arc::new(marker);
    let agents = vec![
        AgentRef::instance(FnAgent::new("cancel", |ctx| Ok(ctx.cancel()))),
        AgentRef::from(marker.clone() as Arc<dyn Agent>),
    ];

    let result = mediator
        .dispatch_sequence(Context::new("start"), &agents)
        .await
        .unwrap();

    assert!(result.is_cancelled());
    assert_eq!(result.payload(), &Payload::from("start"));
    assert_eq!(marker.call_count(), 0);
}

#[tokio::test]
async fn test_parallel_later_agent_wins_on_collision() {
    let mediator = Mediator::new();
    let agents = vec![
        returning("first", json!({"a": 1})),
        returning("second", json!({"a": 2, "b": 3})),
    ];

    let result = mediator.dispatch_parallel(&Context::new(Payload::Null), &agents).await;

    assert_eq!(result.payload(), &Payload::from(json!({"a": 2, "b": 3})));
    assert_eq!(result.error_count(), 0);
    assert_eq!(
        result.get_metadata(PARALLEL_EXECUTION_KEY),
        Some(&json!({"total_agents": 2, "successful": 2, "errors": 0}))
    );
}

#[tokio::test]
async fn test_parallel_failures_do_not_abort_other_branches() {
    let mediator = Mediator::new();
    let agents = vec![
        returning("ok", json!({"x": 1})),
        AgentRef::instance(FailingAgent::new("bad", "kaput")),
        AgentRef::from("unregistered"),
    ];

    let result = mediator.dispatch_parallel(&Context::new(Payload::Null), &agents).await;

    assert_eq!(result.payload(), &Payload::from(json!({"x": 1})));
    assert_eq!(result.error_count(), 2);
    assert_has_error(&result, "kaput");
    assert_has_error(&result, "unregistered");
}

#[tokio::test]
async fn test_parallel_scalar_outputs_are_collected_in_order() {
    let mediator = Mediator::new();
    let agents = vec![returning("one", json!(1)), returning("two", json!("two"))];

    let result = mediator.dispatch_parallel(&Context::new(Payload::Null), &agents).await;
    assert_eq!(result.payload(), &Payload::from(json!([1, "two"])));
}

#[tokio::test]
async fn test_use_middleware_resolves_through_registry() {
    let mediator = Mediator::new();
    mediator
        .middleware_registry()
        .register(crate::middleware::TagMiddleware::new("audited"));

    assert!(mediator.use_middleware("tag:audited").is_ok());
    assert!(matches!(
        mediator.use_middleware("nope"),
        Err(AgentflowError::Resolution { .. })
    ));

    let result = mediator
        .dispatch(Context::new("a"), AgentRef::instance(upper()))
        .await
        .unwrap();
    assert_has_tag(&result, "audited");
}

#[tokio::test]
async fn test_reset_stats() {
    let mediator = Mediator::new();
    mediator
        .dispatch(Context::new("a"), AgentRef::instance(upper()))
        .await
        .unwrap();
    mediator.reset_stats();
    assert_eq!(mediator.stats(), MediatorStats::default());
}
