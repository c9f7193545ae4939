//! Single-waiter cancellation gate.
//!
//! The gate owns the settle channel of the one wait that may be pending at a
//! time. Each installed wait gets its own [`WaitId`], so a cancel handle kept
//! from an earlier wait cannot fail a later one.

use std::fmt;

use tokio::sync::oneshot;
use tracing::trace;

use crate::error::{CancelReason, ResolverError, Result};
use crate::merge::MergedResult;

/// Identity of one `await_round()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitId(u64);

impl fmt::Display for WaitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wait-{}", self.0)
    }
}

#[derive(Debug)]
struct ActiveWait {
    id: WaitId,
    round: u64,
    tx: oneshot::Sender<Result<MergedResult>>,
}

/// Holds the settle action of the active wait and a failure deferred for the
/// next one.
#[derive(Debug, Default)]
pub struct CancellationGate {
    active: Option<ActiveWait>,
    deferred: Option<ResolverError>,
    next_id: u64,
}

impl CancellationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a waiter for `round`, superseding any previous one.
    pub fn install(&mut self, round: u64) -> (WaitId, oneshot::Receiver<Result<MergedResult>>) {
        self.next_id += 1;
        let id = WaitId(self.next_id);
        let (tx, rx) = oneshot::channel();
        if let Some(previous) = self.active.replace(ActiveWait { id, round, tx }) {
            trace!(wait = %previous.id, "superseded wait released");
        }
        (id, rx)
    }

    /// Whether a waiter is installed and its future is still alive.
    pub fn is_waiting(&self) -> bool {
        self.active.as_ref().is_some_and(|wait| !wait.tx.is_closed())
    }

    pub fn active_wait(&self) -> Option<WaitId> {
        self.active.as_ref().map(|wait| wait.id)
    }

    /// Round the active waiter is waiting on.
    pub fn active_round(&self) -> Option<u64> {
        self.active.as_ref().map(|wait| wait.round)
    }

    /// Settle the active waiter with `merged`. Returns whether a live waiter
    /// received it.
    pub fn resolve(&mut self, merged: MergedResult) -> bool {
        match self.active.take() {
            Some(wait) => wait.tx.send(Ok(merged)).is_ok(),
            None => false,
        }
    }

    /// Fail the active waiter with `Cancelled`.
    ///
    /// Returns the cancelled round if a live waiter was failed. An abandoned
    /// waiter is released without counting as cancelled.
    pub fn cancel(&mut self, reason: CancelReason) -> Option<u64> {
        let wait = self.active.take()?;
        let round = wait.round;
        let delivered = wait
            .tx
            .send(Err(ResolverError::Cancelled { round, reason }))
            .is_ok();
        delivered.then_some(round)
    }

    /// Fail the waiter identified by `id`, leaving any other waiter alone.
    ///
    /// Returns the round of the matched wait, whether or not its future was
    /// still alive.
    pub fn cancel_wait(&mut self, id: WaitId, reason: CancelReason) -> Option<u64> {
        if self.active_wait() != Some(id) {
            return None;
        }
        let wait = self.active.take()?;
        let round = wait.round;
        let _ = wait.tx.send(Err(ResolverError::Cancelled { round, reason }));
        Some(round)
    }

    /// Fail the active waiter with `error`. Returns whether a live waiter
    /// received it.
    pub fn fail(&mut self, error: ResolverError) -> bool {
        match self.active.take() {
            Some(wait) => wait.tx.send(Err(error)).is_ok(),
            None => false,
        }
    }

    /// Keep `error` for the next wait; a newer failure replaces an older one.
    pub fn defer(&mut self, error: ResolverError) {
        self.deferred = Some(error);
    }

    pub fn take_deferred(&mut self) -> Option<ResolverError> {
        self.deferred.take()
    }

    pub fn clear_deferred(&mut self) {
        self.deferred = None;
    }
}
