//! Resolver facade: register sources, listen, and await merged rounds.
//!
//! State machine:
//! - **Idle**: no subscriptions. `begin_listening()` subscribes every source
//!   and arms round 1.
//! - **RoundIdle**: listening, round armed, nobody waiting.
//!   `await_round()` moves to RoundWaiting, or settles immediately if the
//!   round already completed.
//! - **RoundWaiting**: the round's waiter settles with the merge once every
//!   slot is filled and the next round is armed. `cancel()`, a cancel handle,
//!   a registration, or `end_listening()` fails it instead.
//!
//! All state lives behind one mutex; sinks, subscriptions, and cancel handles
//! reach it through `Weak` references. Sources are subscribed and torn down
//! outside the lock so a source may emit from inside `subscribe`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::{self, Ready};
use tokio::sync::oneshot;
use tracing::{debug, instrument, trace};

use crate::barrier::{Fulfillment, RoundBarrier};
use crate::cancel::{CancellationGate, WaitId};
use crate::config::ResolverConfig;
use crate::error::{CancelReason, ResolverError, Result, SourceError};
use crate::merge::{MergedResult, PartialResult};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::obs;
use crate::registry::SourceRegistry;
use crate::source::{EmissionRouter, Source, SourceId, SourceSink};

#[derive(Debug, Default)]
struct State {
    registry: SourceRegistry,
    barrier: RoundBarrier,
    gate: CancellationGate,
}

struct Inner {
    config: ResolverConfig,
    state: Mutex<State>,
    metrics: Metrics,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn label(&self) -> &str {
        &self.config.label
    }

    fn arm(&self, state: &mut State) {
        let ids: Vec<SourceId> = state.registry.ids().collect();
        let round = state.barrier.arm(ids);
        obs::emit_round_armed(self.label(), round, state.barrier.slot_count());
    }

    /// Merge a complete round and arm the next one.
    fn complete_round(&self, state: &mut State) -> Option<MergedResult> {
        let round = state.barrier.round();
        let merged = state.barrier.complete()?;
        self.metrics.inc_rounds_completed();
        obs::emit_round_completed(self.label(), round, merged.len());
        obs::emit_round_armed(self.label(), state.barrier.round(), state.barrier.slot_count());
        Some(merged)
    }

    /// Bookkeeping after a waiter was forced to fail.
    fn after_forced_exit(&self, state: &mut State, round: u64, reason: CancelReason) {
        self.metrics.inc_rounds_cancelled();
        obs::emit_round_cancelled(self.label(), round, reason);
        if self.config.rearm_after_failure {
            let round = state.barrier.rearm();
            obs::emit_round_armed(self.label(), round, state.barrier.slot_count());
        }
    }

    fn cancel_wait(&self, wait: WaitId, reason: CancelReason) -> bool {
        let mut state = self.lock();
        match state.gate.cancel_wait(wait, reason) {
            Some(round) => {
                self.after_forced_exit(&mut state, round, reason);
                true
            }
            None => false,
        }
    }
}

impl EmissionRouter for Inner {
    fn route_emit(&self, source: SourceId, session: u64, partial: PartialResult) -> bool {
        let mut state = self.lock();
        if !state.registry.accepts(session) {
            self.metrics.inc_emissions_dropped();
            trace!(resolver = %self.label(), source = %source, session, "emission from closed session dropped");
            return false;
        }

        let fulfillment = state.barrier.fulfill(source, partial);
        if fulfillment == Fulfillment::UnknownSource {
            self.metrics.inc_emissions_dropped();
            debug!(resolver = %self.label(), source = %source, "emission for source without a slot dropped");
            return false;
        }
        self.metrics.inc_emissions_routed();
        trace!(resolver = %self.label(), source = %source, ?fulfillment, "emission routed");

        if fulfillment.completes_round() && state.gate.is_waiting() {
            if let Some(merged) = self.complete_round(&mut state) {
                state.gate.resolve(merged);
            }
        }
        true
    }

    fn route_fail(&self, source: SourceId, session: u64, error: SourceError) -> bool {
        let mut state = self.lock();
        if !state.registry.accepts(session) {
            self.metrics.inc_emissions_dropped();
            trace!(resolver = %self.label(), source = %source, session, "failure from closed session dropped");
            return false;
        }

        let round = state.barrier.round();
        self.metrics.inc_source_failures();
        obs::emit_source_failed(self.label(), round, source, &error);

        let failure = ResolverError::SourceFailure {
            round,
            source_id: source,
            source_name: state.registry.name_of(source).unwrap_or("unknown").to_string(),
            error,
        };
        if state.gate.is_waiting() {
            state.gate.fail(failure);
        } else {
            state.gate.defer(failure);
        }

        if self.config.rearm_after_failure {
            let round = state.barrier.rearm();
            obs::emit_round_armed(self.label(), round, state.barrier.slot_count());
        }
        true
    }
}

/// Fans the emissions of every registered source into one merged result per
/// round.
///
/// Cloning is cheap; clones share the same sources and rounds.
#[derive(Clone)]
pub struct Resolver {
    inner: Arc<Inner>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Self {
        Self::with_config(ResolverConfig::default())
    }

    pub fn with_config(config: ResolverConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State::default()),
                metrics: Metrics::new(),
            }),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.inner.config
    }

    fn router(&self) -> Weak<dyn EmissionRouter> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        weak
    }

    /// Append `source` to the registry.
    ///
    /// While listening, the armed round no longer matches the source count:
    /// a pending wait fails with `Cancelled { reason: SourceRegistered }`,
    /// the new source is subscribed, and a fresh round is armed over all
    /// sources.
    #[instrument(skip(self, source), fields(resolver = %self.inner.label()))]
    pub fn register(&self, source: Arc<dyn Source>) -> SourceId {
        let (id, session) = {
            let mut state = self.inner.lock();
            let listening = state.registry.is_listening();

            if listening {
                if let Some(round) = state.gate.cancel(CancelReason::SourceRegistered) {
                    self.inner.metrics.inc_rounds_cancelled();
                    obs::emit_round_cancelled(self.inner.label(), round, CancelReason::SourceRegistered);
                }
            }

            let id = state.registry.register(Arc::clone(&source));
            obs::emit_source_registered(self.inner.label(), id, source.name(), listening);
            if !listening {
                return id;
            }

            state.gate.clear_deferred();
            self.inner.arm(&mut state);
            (id, state.registry.session())
        };

        self.subscribe_one(session, id, source);
        id
    }

    fn subscribe_one(&self, session: u64, id: SourceId, source: Arc<dyn Source>) {
        let subscription = source.subscribe(SourceSink::new(self.router(), id, session));
        let stale = self.inner.lock().registry.attach(session, id, subscription);
        if let Some(stale) = stale {
            debug!(resolver = %self.inner.label(), source = %id, "session ended during subscribe");
            stale.unsubscribe();
        }
    }

    /// Subscribe every registered source and arm round 1.
    ///
    /// Returns `AlreadyListening` if called again before `end_listening()`.
    #[instrument(skip(self), fields(resolver = %self.inner.label()))]
    pub fn begin_listening(&self) -> Result<()> {
        let (session, pending) = {
            let mut state = self.inner.lock();
            let (session, pending) = state.registry.begin_listening()?;
            state.gate.clear_deferred();
            obs::emit_listening_started(self.inner.label(), session, pending.len());
            self.inner.arm(&mut state);
            (session, pending)
        };

        for p in pending {
            self.subscribe_one(session, p.id, p.source);
        }
        Ok(())
    }

    /// Release every subscription. A pending wait fails with
    /// `Cancelled { reason: Stopped }`. No-op when not listening.
    #[instrument(skip(self), fields(resolver = %self.inner.label()))]
    pub fn end_listening(&self) {
        let subscriptions = {
            let mut state = self.inner.lock();
            if !state.registry.is_listening() {
                return;
            }
            let session = state.registry.session();
            let subscriptions = state.registry.end_listening();

            if let Some(round) = state.gate.cancel(CancelReason::Stopped) {
                self.inner.metrics.inc_rounds_cancelled();
                obs::emit_round_cancelled(self.inner.label(), round, CancelReason::Stopped);
            }
            state.gate.clear_deferred();
            state.barrier.clear();
            obs::emit_listening_stopped(self.inner.label(), session, subscriptions.len());
            subscriptions
        };

        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        self.inner.metrics.flush(self.inner.label());
    }

    /// Start one wait cycle.
    ///
    /// The waiter is installed when this is called, not when the future is
    /// first polled. The future settles with:
    /// - the merged result once every source has emitted in the round
    ///   (immediately if the round already completed, or if no source is
    ///   registered)
    /// - `Cancelled` on `cancel()`, a cancel handle, a registration, or
    ///   `end_listening()`
    /// - `SourceFailure` when a source fires its error channel
    /// - `WaitInProgress` if another wait is still pending
    /// - `NotListening` if sources exist but listening has not begun
    pub fn await_round(&self) -> RoundWait {
        let mut state = self.inner.lock();
        let round = state.barrier.round();
        let inert = CancelHandle {
            inner: Weak::new(),
            wait: None,
            round,
        };

        if !state.registry.has_sources() {
            return RoundWait::ready(Ok(MergedResult::new()), inert);
        }
        if !state.registry.is_listening() {
            return RoundWait::ready(Err(ResolverError::NotListening), inert);
        }
        if state.gate.is_waiting() {
            return RoundWait::ready(Err(ResolverError::WaitInProgress { round }), inert);
        }
        if let Some(deferred) = state.gate.take_deferred() {
            return RoundWait::ready(Err(deferred), inert);
        }
        if state.barrier.is_complete() {
            if let Some(merged) = self.inner.complete_round(&mut state) {
                return RoundWait::ready(Ok(merged), inert);
            }
        }

        let (wait, rx) = state.gate.install(round);
        trace!(resolver = %self.inner.label(), round, %wait, "waiter installed");
        RoundWait {
            state: WaitState::Pending(rx),
            handle: CancelHandle {
                inner: Arc::downgrade(&self.inner),
                wait: Some(wait),
                round,
            },
        }
    }

    /// Await one round, cancelling it with reason `Deadline` if it has not
    /// settled within `deadline`.
    pub async fn await_round_within(&self, deadline: Duration) -> Result<MergedResult> {
        let wait = self.await_round();
        let handle = wait.cancel_handle();
        match tokio::time::timeout(deadline, wait).await {
            Ok(outcome) => outcome,
            Err(_) => {
                handle.cancel_with(CancelReason::Deadline);
                Err(ResolverError::Cancelled {
                    round: handle.round(),
                    reason: CancelReason::Deadline,
                })
            }
        }
    }

    /// Fail the pending wait with `Cancelled { reason: Explicit }`.
    ///
    /// Returns whether a wait was cancelled; a no-op otherwise.
    pub fn cancel(&self) -> bool {
        let mut state = self.inner.lock();
        match state.gate.cancel(CancelReason::Explicit) {
            Some(round) => {
                self.inner
                    .after_forced_exit(&mut state, round, CancelReason::Explicit);
                true
            }
            None => false,
        }
    }

    pub fn has_sources(&self) -> bool {
        self.inner.lock().registry.has_sources()
    }

    pub fn source_count(&self) -> usize {
        self.inner.lock().registry.len()
    }

    pub fn is_listening(&self) -> bool {
        self.inner.lock().registry.is_listening()
    }

    /// Whether a wait is pending.
    pub fn is_waiting(&self) -> bool {
        self.inner.lock().gate.is_waiting()
    }

    /// Current round number; 0 before listening first begins.
    pub fn round(&self) -> u64 {
        self.inner.lock().barrier.round()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Resolver")
            .field("label", &self.inner.config.label)
            .field("registry", &state.registry)
            .field("round", &state.barrier.round())
            .field("waiting", &state.gate.is_waiting())
            .finish()
    }
}

/// Cancels the one wait it was created for.
///
/// Handles from waits that settled immediately, or that have already
/// settled, do nothing.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Weak<Inner>,
    wait: Option<WaitId>,
    round: u64,
}

impl CancelHandle {
    /// Fail the wait with `Cancelled { reason: Explicit }`. Returns whether
    /// this call cancelled it.
    pub fn cancel(&self) -> bool {
        self.cancel_with(CancelReason::Explicit)
    }

    fn cancel_with(&self, reason: CancelReason) -> bool {
        let Some(wait) = self.wait else {
            return false;
        };
        match self.inner.upgrade() {
            Some(inner) => inner.cancel_wait(wait, reason),
            None => false,
        }
    }

    /// Round the wait was started on.
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn wait_id(&self) -> Option<WaitId> {
        self.wait
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("wait", &self.wait)
            .field("round", &self.round)
            .finish()
    }
}

enum WaitState {
    Ready(Ready<Result<MergedResult>>),
    Pending(oneshot::Receiver<Result<MergedResult>>),
}

/// Future returned by [`Resolver::await_round`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct RoundWait {
    state: WaitState,
    handle: CancelHandle,
}

impl RoundWait {
    fn ready(outcome: Result<MergedResult>, handle: CancelHandle) -> Self {
        Self {
            state: WaitState::Ready(future::ready(outcome)),
            handle,
        }
    }

    /// Handle that cancels this wait and no other.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    pub fn round(&self) -> u64 {
        self.handle.round
    }
}

impl Future for RoundWait {
    type Output = Result<MergedResult>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            WaitState::Ready(ready) => Pin::new(ready).poll(cx),
            WaitState::Pending(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
                Poll::Ready(Err(_)) => Poll::Ready(Err(ResolverError::Cancelled {
                    round: this.handle.round,
                    reason: CancelReason::ResolverDropped,
                })),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl fmt::Debug for RoundWait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = matches!(self.state, WaitState::Pending(_));
        f.debug_struct("RoundWait")
            .field("round", &self.handle.round)
            .field("pending", &pending)
            .finish()
    }
}
