//! Per-resolver atomic counters.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit the current values as a single
//! `tracing::info!` event (e.g. when listening ends).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time copy of a resolver's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub emissions_routed: u64,
    pub emissions_dropped: u64,
    pub rounds_completed: u64,
    pub rounds_cancelled: u64,
    pub source_failures: u64,
}

/// Lightweight atomic counters, no allocations, no locking.
#[derive(Debug)]
pub struct Metrics {
    emissions_routed: AtomicU64,
    emissions_dropped: AtomicU64,
    rounds_completed: AtomicU64,
    rounds_cancelled: AtomicU64,
    source_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            emissions_routed: AtomicU64::new(0),
            emissions_dropped: AtomicU64::new(0),
            rounds_completed: AtomicU64::new(0),
            rounds_cancelled: AtomicU64::new(0),
            source_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_emissions_routed(&self) {
        self.emissions_routed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "emissions_routed", "counter incremented");
    }

    pub fn inc_emissions_dropped(&self) {
        self.emissions_dropped.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "emissions_dropped", "counter incremented");
    }

    pub fn inc_rounds_completed(&self) {
        self.rounds_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rounds_completed", "counter incremented");
    }

    pub fn inc_rounds_cancelled(&self) {
        self.rounds_cancelled.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rounds_cancelled", "counter incremented");
    }

    pub fn inc_source_failures(&self) {
        self.source_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "source_failures", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self, label: &str) {
        let snapshot = self.snapshot();
        tracing::info!(
            metric = "flush",
            resolver = %label,
            emissions_routed = snapshot.emissions_routed,
            emissions_dropped = snapshot.emissions_dropped,
            rounds_completed = snapshot.rounds_completed,
            rounds_cancelled = snapshot.rounds_cancelled,
            source_failures = snapshot.source_failures,
        );
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            emissions_routed: self.emissions_routed.load(Ordering::Relaxed),
            emissions_dropped: self.emissions_dropped.load(Ordering::Relaxed),
            rounds_completed: self.rounds_completed.load(Ordering::Relaxed),
            rounds_cancelled: self.rounds_cancelled.load(Ordering::Relaxed),
            source_failures: self.source_failures.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.emissions_routed.store(0, Ordering::Relaxed);
        self.emissions_dropped.store(0, Ordering::Relaxed);
        self.rounds_completed.store(0, Ordering::Relaxed);
        self.rounds_cancelled.store(0, Ordering::Relaxed);
        self.source_failures.store(0, Ordering::Relaxed);
    }
}
