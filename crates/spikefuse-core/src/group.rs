//! The set of per-thread replicas of one logical monitoring point.
//!
//! A [`SiblingGroup`] is a cheap, clonable handle to one published slot per
//! sibling. Sibling `i` writes only slot `i`; every sibling may read every
//! slot. The host's cycle barrier supplies the happens-before edge between a
//! publish in cycle `N` and the reads in cycle `N + 1`; the seqlock in each
//! slot only guarantees that a read is never torn.

use std::sync::Arc;

use spikefuse_error::{FuseError, Result};
use spikefuse_types::{Cycle, SiblingIndex};

use crate::danger::DangerState;
use crate::slot::{PublishedSlot, SlotSnapshot};

/// Shared handle to every sibling's published state.
#[derive(Debug, Clone)]
pub struct SiblingGroup {
    slots: Arc<[PublishedSlot]>,
}

impl SiblingGroup {
    /// Group of `sibling_count` never-published slots.
    #[must_use]
    pub fn new(sibling_count: usize) -> Self {
        Self {
            slots: (0..sibling_count).map(|_| PublishedSlot::new()).collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, sibling: SiblingIndex) -> Result<&PublishedSlot> {
        self.slots.get(sibling.get()).ok_or_else(|| {
            FuseError::internal(format!(
                "{sibling} outside group of {} siblings",
                self.slots.len()
            ))
        })
    }

    /// Publish `sibling`'s state after its update for `cycle`.
    pub fn publish(
        &self,
        sibling: SiblingIndex,
        cycle: Cycle,
        state: &DangerState,
        n_events: u64,
    ) -> Result<()> {
        self.slot(sibling)?
            .publish(cycle, state.risk, state.unstable_since, n_events);
        Ok(())
    }

    /// Consistent view of one sibling's slot.
    pub fn snapshot(&self, sibling: SiblingIndex) -> Result<SlotSnapshot> {
        self.slot(sibling)?.read().ok_or_else(|| {
            FuseError::internal(format!("{sibling} slot read exhausted its retries"))
        })
    }

    /// Views of every slot, in sibling order.
    pub fn snapshots(&self) -> Result<Vec<SlotSnapshot>> {
        (0..self.slots.len())
            .map(|i| self.snapshot(SiblingIndex::new(i)))
            .collect()
    }

    /// Earliest instability mark across the group, if any.
    pub fn min_unstable_since(&self) -> Result<Option<Cycle>> {
        let mut earliest: Option<Cycle> = None;
        for i in 0..self.slots.len() {
            if let Some(mark) = self.snapshot(SiblingIndex::new(i))?.unstable_since {
                earliest = Some(earliest.map_or(mark, |e| e.min(mark)));
            }
        }
        Ok(earliest)
    }

    /// Events recorded across every sibling.
    pub fn total_events(&self) -> Result<u64> {
        Ok(self.snapshots()?.iter().map(|s| s.n_events).sum())
    }

    /// Return `sibling`'s slot to its never-published state. Only the owning
    /// sibling may call this.
    pub fn clear(&self, sibling: SiblingIndex) {
        if let Some(slot) = self.slots.get(sibling.get()) {
            slot.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(risk: f64, since: Option<u64>) -> DangerState {
        DangerState {
            risk,
            unstable_since: since.map(Cycle::new),
        }
    }

    #[test]
    fn min_over_marked_siblings_only() {
        let group = SiblingGroup::new(3);
        assert_eq!(group.min_unstable_since().unwrap(), None);

        group
            .publish(SiblingIndex::new(0), Cycle::new(9), &state(0.4, None), 1)
            .unwrap();
        group
            .publish(SiblingIndex::new(1), Cycle::new(9), &state(1.2, Some(9)), 2)
            .unwrap();
        group
            .publish(SiblingIndex::new(2), Cycle::new(9), &state(1.7, Some(7)), 3)
            .unwrap();

        assert_eq!(group.min_unstable_since().unwrap(), Some(Cycle::new(7)));
        assert_eq!(group.total_events().unwrap(), 6);
    }

    #[test]
    fn clones_share_slots() {
        let group = SiblingGroup::new(2);
        let other = group.clone();
        group
            .publish(SiblingIndex::new(1), Cycle::new(3), &state(2.0, Some(3)), 0)
            .unwrap();
        let snap = other.snapshot(SiblingIndex::new(1)).unwrap();
        assert_eq!(snap.cycle, Some(Cycle::new(3)));
        assert_eq!(snap.unstable_since, Some(Cycle::new(3)));

        other.clear(SiblingIndex::new(1));
        assert_eq!(group.min_unstable_since().unwrap(), None);
        assert_eq!(group.snapshot(SiblingIndex::new(1)).unwrap().cycle, None);
    }

    #[test]
    fn out_of_range_sibling_is_internal_error() {
        let group = SiblingGroup::new(1);
        let err = group.snapshot(SiblingIndex::new(4)).unwrap_err();
        assert!(matches!(err, FuseError::Internal(_)));
    }
}
