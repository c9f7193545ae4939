//! In-memory sources for tests and examples.
//!
//! [`ManualSource`] lets the caller push emissions synchronously, which keeps
//! round tests deterministic without timers or spawned tasks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;

use crate::error::SourceError;
use crate::merge::PartialResult;
use crate::source::{EmissionRouter, Source, SourceId, SourceSink, Subscription};

#[derive(Debug, Default)]
struct Wiring {
    generation: u64,
    sink: Option<SourceSink>,
    subscribes: usize,
}

/// Source driven by explicit `emit` / `fail` calls.
#[derive(Debug)]
pub struct ManualSource {
    name: String,
    wiring: Arc<Mutex<Wiring>>,
}

impl ManualSource {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            wiring: Arc::new(Mutex::new(Wiring::default())),
        })
    }

    fn wiring(&self) -> MutexGuard<'_, Wiring> {
        self.wiring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_sink(&self) -> Option<SourceSink> {
        self.wiring().sink.clone()
    }

    /// Emit `partial` to the current subscriber. Returns whether the
    /// resolver routed it.
    pub fn emit(&self, partial: PartialResult) -> bool {
        match self.current_sink() {
            Some(sink) => sink.emit(partial),
            None => false,
        }
    }

    /// Emit a JSON object; any other JSON value is emitted as an empty
    /// partial result.
    pub fn emit_json(&self, value: Value) -> bool {
        let partial = match value {
            Value::Object(map) => map,
            _ => PartialResult::new(),
        };
        self.emit(partial)
    }

    /// Fire the error channel.
    pub fn fail(&self, error: SourceError) -> bool {
        match self.current_sink() {
            Some(sink) => sink.fail(error),
            None => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.wiring().sink.is_some()
    }

    /// How many times the source has been subscribed.
    pub fn subscribe_count(&self) -> usize {
        self.wiring().subscribes
    }
}

impl Source for ManualSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&self, sink: SourceSink) -> Subscription {
        let generation = {
            let mut wiring = self.wiring();
            wiring.generation += 1;
            wiring.subscribes += 1;
            wiring.sink = Some(sink);
            wiring.generation
        };

        let wiring = Arc::clone(&self.wiring);
        Subscription::new(move || {
            let mut wiring = wiring.lock().unwrap_or_else(PoisonError::into_inner);
            if wiring.generation == generation {
                wiring.sink = None;
            }
        })
    }
}

struct Detached;

impl EmissionRouter for Detached {
    fn route_emit(&self, _source: SourceId, _session: u64, _partial: PartialResult) -> bool {
        false
    }

    fn route_fail(&self, _source: SourceId, _session: u64, _error: SourceError) -> bool {
        false
    }
}

/// A sink attached to no resolver; every emission reports `false`.
///
/// Useful for exercising a [`Source`] implementation on its own.
pub fn detached_sink(source: SourceId) -> SourceSink {
    let router: Weak<dyn EmissionRouter> = Weak::<Detached>::new();
    SourceSink::new(router, source, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unsubscribed_source_reports_false() {
        let source = ManualSource::new("idle");
        assert!(!source.is_subscribed());
        assert!(!source.emit_json(json!({"a": 1})));
        assert!(!source.fail(SourceError::new("nobody listening")));
    }

    #[test]
    fn old_teardown_does_not_clear_newer_subscription() {
        let source = ManualSource::new("resubscribed");
        let first = source.subscribe(detached_sink(SourceId::from_raw(1)));
        let second = source.subscribe(detached_sink(SourceId::from_raw(1)));
        assert_eq!(source.subscribe_count(), 2);

        first.unsubscribe();
        assert!(source.is_subscribed());
        second.unsubscribe();
        assert!(!source.is_subscribed());
    }

    #[test]
    fn detached_sink_accepts_nothing() {
        let sink = detached_sink(SourceId::from_raw(9));
        assert_eq!(sink.source_id(), SourceId::from_raw(9));
        assert!(!sink.emit(PartialResult::new()));
    }
}
