//! Round lifecycle contract tests against the public `Resolver` API.

use std::sync::Arc;

use fanin_core::testing::ManualSource;
use fanin_core::{
    CancelReason, PartialResult, Resolver, ResolverConfig, ResolverError, SourceError,
};
use futures::FutureExt;
use serde_json::{json, Value};

fn register_all(resolver: &Resolver, names: &[&str]) -> Vec<Arc<ManualSource>> {
    names
        .iter()
        .map(|name| {
            let source = ManualSource::new(*name);
            resolver.register(source.clone());
            source
        })
        .collect()
}

#[tokio::test]
async fn every_source_emitting_once_yields_shallow_merge() {
    for n in 0..5usize {
        let resolver = Resolver::new();
        let names: Vec<String> = (0..n).map(|i| format!("s{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let sources = register_all(&resolver, &refs);
        resolver.begin_listening().unwrap();

        let wait = resolver.await_round();
        for (i, source) in sources.iter().enumerate() {
            let mut partial = PartialResult::new();
            partial.insert(format!("k{i}"), json!(i));
            partial.insert("owner".to_string(), json!(i));
            source.emit(partial);
        }

        let merged = wait.await.unwrap();
        assert_eq!(merged.len(), if n == 0 { 0 } else { n + 1 }, "n = {n}");
        if n > 0 {
            assert_eq!(merged["owner"], json!(n - 1), "last registered wins");
        }
    }
}

#[tokio::test]
async fn no_sources_resolves_immediately_with_empty_merge() {
    let resolver = Resolver::new();
    resolver.begin_listening().unwrap();
    let merged = resolver.await_round().now_or_never().expect("settled").unwrap();
    assert!(merged.is_empty());
    assert!(!resolver.has_sources());
}

#[tokio::test]
async fn merge_folds_in_registration_order() {
    let resolver = Resolver::new();
    let sources = register_all(&resolver, &["a", "b", "c"]);
    resolver.begin_listening().unwrap();

    let wait = resolver.await_round();
    sources[2].emit_json(json!({"a": 9, "c": 3}));
    sources[0].emit_json(json!({"a": 1}));
    sources[1].emit_json(json!({"b": 2}));

    let merged = wait.await.unwrap();
    assert_eq!(Value::Object(merged), json!({"a": 9, "b": 2, "c": 3}));
}

#[tokio::test]
async fn cancel_before_any_emission_fails_the_wait() {
    let resolver = Resolver::new();
    let sources = register_all(&resolver, &["a", "b"]);
    resolver.begin_listening().unwrap();

    let wait = resolver.await_round();
    assert!(resolver.cancel());
    let outcome = wait.await;
    assert_eq!(
        outcome,
        Err(ResolverError::Cancelled {
            round: 1,
            reason: CancelReason::Explicit
        })
    );

    // Emissions after the cancel land in the freshly armed round.
    assert!(sources[0].emit_json(json!({"a": 1})));
    assert!(sources[1].emit_json(json!({"b": 1})));
    let merged = resolver.await_round().now_or_never().expect("settled").unwrap();
    assert_eq!(Value::Object(merged), json!({"a": 1, "b": 1}));
    assert_eq!(resolver.metrics().rounds_cancelled, 1);
}

#[tokio::test]
async fn cancel_without_pending_wait_is_noop() {
    let resolver = Resolver::new();
    register_all(&resolver, &["a"]);
    resolver.begin_listening().unwrap();
    assert!(!resolver.cancel());
    assert_eq!(resolver.round(), 1);
}

#[tokio::test]
async fn registering_mid_wait_cancels_and_subscribes_new_source() {
    let resolver = Resolver::new();
    let sources = register_all(&resolver, &["a", "b"]);
    resolver.begin_listening().unwrap();

    let wait = resolver.await_round();
    sources[0].emit_json(json!({"a": 1}));

    let late = ManualSource::new("late");
    resolver.register(late.clone());
    assert!(late.is_subscribed());

    let err = wait.await.unwrap_err();
    assert_eq!(err.cancel_reason(), Some(CancelReason::SourceRegistered));

    let mut next = resolver.await_round();
    sources[0].emit_json(json!({"a": 2}));
    sources[1].emit_json(json!({"b": 2}));
    assert!(futures::poll!(&mut next).is_pending(), "new source has not emitted");
    late.emit_json(json!({"late": true}));

    let merged = next.await.unwrap();
    assert_eq!(Value::Object(merged), json!({"a": 2, "b": 2, "late": true}));
}

#[tokio::test]
async fn next_round_requires_fresh_emissions() {
    let resolver = Resolver::new();
    let sources = register_all(&resolver, &["a", "b"]);
    resolver.begin_listening().unwrap();

    let wait = resolver.await_round();
    sources[0].emit_json(json!({"a": 1}));
    sources[1].emit_json(json!({"b": 1}));
    wait.await.unwrap();

    let mut second = resolver.await_round();
    assert!(futures::poll!(&mut second).is_pending());
    sources[0].emit_json(json!({"a": 2}));
    assert!(futures::poll!(&mut second).is_pending());
    sources[1].emit_json(json!({"b": 2}));

    let merged = second.await.unwrap();
    assert_eq!(Value::Object(merged), json!({"a": 2, "b": 2}));
    assert_eq!(resolver.metrics().rounds_completed, 2);
    assert_eq!(resolver.metrics().emissions_routed, 4);
}

#[tokio::test]
async fn end_listening_stops_round_completions() {
    let resolver = Resolver::new();
    let sources = register_all(&resolver, &["a", "b"]);
    resolver.begin_listening().unwrap();

    let wait = resolver.await_round();
    sources[0].emit_json(json!({"a": 1}));
    resolver.end_listening();

    let err = wait.await.unwrap_err();
    assert_eq!(err.cancel_reason(), Some(CancelReason::Stopped));
    assert!(sources.iter().all(|s| !s.is_subscribed()));
    assert!(!sources[1].emit_json(json!({"b": 1})));
    assert_eq!(resolver.await_round().await, Err(ResolverError::NotListening));

    // Idempotent.
    resolver.end_listening();
    assert!(!resolver.is_listening());
}

#[tokio::test]
async fn listening_can_restart_after_end() {
    let resolver = Resolver::new();
    let sources = register_all(&resolver, &["a"]);
    resolver.begin_listening().unwrap();
    resolver.end_listening();
    resolver.begin_listening().unwrap();
    assert_eq!(sources[0].subscribe_count(), 2);

    let wait = resolver.await_round();
    sources[0].emit_json(json!({"a": 1}));
    assert!(wait.await.is_ok());
}

#[tokio::test]
async fn source_failure_fails_the_pending_wait() {
    let resolver = Resolver::new();
    let sources = register_all(&resolver, &["blocks", "accounts"]);
    resolver.begin_listening().unwrap();

    let wait = resolver.await_round();
    sources[0].emit_json(json!({"block": 1}));
    sources[1].fail(SourceError::new("account lookup failed"));

    match wait.await {
        Err(ResolverError::SourceFailure {
            round,
            source_name,
            error,
            ..
        }) => {
            assert_eq!(round, 1);
            assert_eq!(source_name, "accounts");
            assert_eq!(error, SourceError::new("account lookup failed"));
        }
        other => panic!("expected source failure, got {other:?}"),
    }
    assert_eq!(resolver.round(), 2);
    assert_eq!(resolver.metrics().source_failures, 1);
}

#[tokio::test]
async fn clones_share_rounds() {
    let resolver = Resolver::with_config(ResolverConfig::default().with_label("shared"));
    let other = resolver.clone();
    let sources = register_all(&resolver, &["a"]);
    other.begin_listening().unwrap();

    let wait = resolver.await_round();
    assert!(other.is_waiting());
    sources[0].emit_json(json!({"a": 1}));
    assert!(wait.await.is_ok());
    assert_eq!(other.config().label, "shared");
}
