//! Per-round slot tracking.
//!
//! A [`RoundBarrier`] holds one slot per source registered when the round was
//! armed, in registration order. A slot is filled by the first emission of
//! its source in the round; later emissions in the same round overwrite the
//! value without counting again. The round is complete once every slot is
//! filled, at which point [`RoundBarrier::complete`] merges the slots and
//! arms the next round over the same sources.

use tracing::trace;

use crate::merge::{merge_in_order, MergedResult, PartialResult};
use crate::source::SourceId;

#[derive(Debug, Clone)]
struct Slot {
    source: SourceId,
    value: Option<PartialResult>,
}

/// Outcome of routing one emission into the active round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fulfillment {
    /// The slot was empty and is now filled.
    Filled { remaining: usize },
    /// The slot was already filled this round; its value was replaced.
    Overwrote { remaining: usize },
    /// No slot exists for the source in this round.
    UnknownSource,
}

impl Fulfillment {
    /// Whether every slot of the round is filled after this emission.
    pub fn completes_round(&self) -> bool {
        matches!(
            self,
            Fulfillment::Filled { remaining: 0 } | Fulfillment::Overwrote { remaining: 0 }
        )
    }
}

/// Slot set and merge/rearm protocol for successive rounds.
#[derive(Debug, Clone, Default)]
pub struct RoundBarrier {
    round: u64,
    slots: Vec<Slot>,
    filled: usize,
}

impl RoundBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new round with one empty slot per source, in the order given.
    ///
    /// Returns the new round number.
    pub fn arm<I>(&mut self, sources: I) -> u64
    where
        I: IntoIterator<Item = SourceId>,
    {
        self.slots = sources
            .into_iter()
            .map(|source| Slot {
                source,
                value: None,
            })
            .collect();
        self.filled = 0;
        self.round += 1;
        trace!(round = self.round, slots = self.slots.len(), "round armed");
        self.round
    }

    /// Re-arm over the sources of the current round.
    pub fn rearm(&mut self) -> u64 {
        let sources: Vec<SourceId> = self.slots.iter().map(|slot| slot.source).collect();
        self.arm(sources)
    }

    /// Drop every slot; the round number is kept.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.filled = 0;
    }

    /// Record `partial` as the latest value of `source`'s slot.
    pub fn fulfill(&mut self, source: SourceId, partial: PartialResult) -> Fulfillment {
        let Some(slot) = self.slots.iter_mut().find(|slot| slot.source == source) else {
            return Fulfillment::UnknownSource;
        };

        let was_empty = slot.value.replace(partial).is_none();
        if was_empty {
            self.filled += 1;
            Fulfillment::Filled {
                remaining: self.remaining(),
            }
        } else {
            Fulfillment::Overwrote {
                remaining: self.remaining(),
            }
        }
    }

    /// Merge the slots in registration order and arm the next round.
    ///
    /// Returns `None` without touching state if the round is not complete.
    pub fn complete(&mut self) -> Option<MergedResult> {
        if !self.is_complete() {
            return None;
        }
        let merged = self.merge();
        self.rearm();
        Some(merged)
    }

    /// Merge of the currently filled slots, in registration order.
    pub fn merge(&self) -> MergedResult {
        merge_in_order(self.slots.iter().filter_map(|slot| slot.value.as_ref()))
    }

    pub fn is_complete(&self) -> bool {
        self.filled == self.slots.len()
    }

    pub fn remaining(&self) -> usize {
        self.slots.len() - self.filled
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Whether `source` has emitted since the round was armed.
    pub fn is_filled(&self, source: SourceId) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.source == source && slot.value.is_some())
    }
}
