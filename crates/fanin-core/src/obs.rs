//! Structured observability hooks for resolver lifecycle events.
//!
//! Every hook emits one event carrying an `event = "..."` field so log
//! pipelines can filter on it. Verbosity follows `FANIN_LOG` / `RUST_LOG`
//! (see [`init_tracing`](crate::telemetry::init_tracing)).

use tracing::{debug, info, warn};

use crate::error::{CancelReason, SourceError};
use crate::source::SourceId;

/// RAII guard that enters a resolver-scoped tracing span.
///
/// # Example
///
/// ```ignore
/// let _span = ResolverSpan::enter("block-watch");
/// // tracing calls are now associated with resolver = "block-watch"
/// ```
pub struct ResolverSpan {
    _span: tracing::span::EnteredSpan,
}

impl ResolverSpan {
    pub fn enter(label: &str) -> Self {
        let span = tracing::info_span!("fanin.resolver", resolver = %label);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_source_registered(label: &str, source: SourceId, name: &str, listening: bool) {
    debug!(
        event = "source.registered",
        resolver = %label,
        source = %source,
        name = %name,
        listening = listening,
    );
}

pub fn emit_listening_started(label: &str, session: u64, sources: usize) {
    info!(
        event = "listening.started",
        resolver = %label,
        session = session,
        sources = sources,
    );
}

pub fn emit_listening_stopped(label: &str, session: u64, released: usize) {
    info!(
        event = "listening.stopped",
        resolver = %label,
        session = session,
        released = released,
    );
}

pub fn emit_round_armed(label: &str, round: u64, slots: usize) {
    debug!(event = "round.armed", resolver = %label, round = round, slots = slots);
}

pub fn emit_round_completed(label: &str, round: u64, keys: usize) {
    info!(event = "round.completed", resolver = %label, round = round, keys = keys);
}

pub fn emit_round_cancelled(label: &str, round: u64, reason: CancelReason) {
    info!(
        event = "round.cancelled",
        resolver = %label,
        round = round,
        reason = %reason,
    );
}

/// Source failure (warning level).
pub fn emit_source_failed(label: &str, round: u64, source: SourceId, error: &SourceError) {
    warn!(
        event = "round.source_failed",
        resolver = %label,
        round = round,
        source = %source,
        error = %error,
    );
}
