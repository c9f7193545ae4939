//! Error taxonomy for round waits and resolver misuse.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::source::SourceId;

/// Why a pending round wait was forced to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// `Resolver::cancel()` or a `CancelHandle` was invoked.
    Explicit,
    /// A source was registered while the round was armed.
    SourceRegistered,
    /// `end_listening()` tore the subscriptions down.
    Stopped,
    /// The caller's deadline elapsed before every source emitted.
    Deadline,
    /// The resolver was dropped while the wait was pending.
    ResolverDropped,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::Explicit => "explicit",
            CancelReason::SourceRegistered => "source_registered",
            CancelReason::Stopped => "stopped",
            CancelReason::Deadline => "deadline",
            CancelReason::ResolverDropped => "resolver_dropped",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by a source through its error channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct SourceError {
    message: String,
}

impl SourceError {
    pub fn new(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors surfaced by a [`Resolver`](crate::Resolver).
///
/// Round outcomes (`Cancelled`, `SourceFailure`, `WaitInProgress`,
/// `NotListening`) are delivered through the future returned by
/// `await_round()`. `AlreadyListening` is returned synchronously by
/// `begin_listening()`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolverError {
    #[error("round {round} cancelled: {reason}")]
    Cancelled { round: u64, reason: CancelReason },

    #[error("source {source_name} ({source_id}) failed in round {round}: {error}")]
    SourceFailure {
        round: u64,
        source_id: SourceId,
        source_name: String,
        error: SourceError,
    },

    #[error("a wait on round {round} is already pending")]
    WaitInProgress { round: u64 },

    #[error("resolver is not listening")]
    NotListening,

    #[error("resolver is already listening")]
    AlreadyListening,
}

impl ResolverError {
    /// True when the wait was forced to fail rather than failing on its own.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResolverError::Cancelled { .. })
    }

    /// The cancellation reason, if this is a `Cancelled` outcome.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            ResolverError::Cancelled { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Result type for resolver operations.
pub type Result<T> = std::result::Result<T, ResolverError>;
