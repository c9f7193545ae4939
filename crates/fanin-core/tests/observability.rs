//! Observability tests for resolver lifecycle tracing.

use fanin_core::testing::ManualSource;
use fanin_core::{
    emit_listening_started, emit_round_cancelled, emit_round_completed, emit_source_failed,
    CancelReason, Resolver, ResolverSpan, SourceError, SourceId,
};
use serde_json::json;
use tracing_test::traced_test;

#[traced_test]
#[test]
fn emit_listening_started_logs_event_name() {
    emit_listening_started("obs", 1, 3);
    assert!(logs_contain("listening.started"));
}

#[traced_test]
#[test]
fn emit_round_completed_logs_round() {
    emit_round_completed("obs", 7, 2);
    assert!(logs_contain("round.completed"));
    assert!(logs_contain("round=7"));
}

#[traced_test]
#[test]
fn emit_round_cancelled_logs_reason() {
    emit_round_cancelled("obs", 2, CancelReason::Deadline);
    assert!(logs_contain("reason=deadline"));
}

#[traced_test]
#[test]
fn emit_source_failed_logs_warning() {
    emit_source_failed("obs", 1, SourceId::from_raw(3), &SourceError::new("boom"));
    assert!(logs_contain("round.source_failed"));
    assert!(logs_contain("src-3"));
}

#[traced_test]
#[test]
fn resolver_span_enters() {
    let span = ResolverSpan::enter("span-resolver");
    drop(span);
}

#[traced_test]
#[tokio::test]
async fn completed_round_is_logged() {
    let resolver = Resolver::new();
    let source = ManualSource::new("only");
    resolver.register(source.clone());
    resolver.begin_listening().unwrap();

    let wait = resolver.await_round();
    source.emit_json(json!({"x": 1}));
    wait.await.unwrap();

    assert!(logs_contain("round.completed"));
    resolver.end_listening();
    assert!(logs_contain("listening.stopped"));
}
