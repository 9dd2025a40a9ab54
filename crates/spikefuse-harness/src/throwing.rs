//! A node that aborts on one sibling only.
//!
//! Reproduces what an immediate, unsynchronized abort does to a lockstep
//! host: the throwing sibling leaves, the others wait at the next barrier
//! for a party that never arrives. Under [`LockstepKernel`] that surfaces as
//! `PartialAbort`.
//!
//! [`LockstepKernel`]: crate::LockstepKernel

use spikefuse_core::CycleNode;
use spikefuse_error::{FuseError, Result};
use spikefuse_types::{
    Cycle, DeliveryClass, RuntimeFacts, SegmentToggle, SiblingIndex, SpikeEvent, StatusDict,
};

#[derive(Debug, Clone)]
pub struct ThrowingNode {
    sibling: SiblingIndex,
    throw_on: Option<(SiblingIndex, Cycle)>,
    n_events: u64,
}

impl ThrowingNode {
    /// Node that raises the instability fault on `throw_on` at `cycle`.
    #[must_use]
    pub fn new(sibling: SiblingIndex, throw_on: SiblingIndex, cycle: Cycle) -> Self {
        Self {
            sibling,
            throw_on: Some((throw_on, cycle)),
            n_events: 0,
        }
    }

    /// Node that never raises.
    #[must_use]
    pub fn never(sibling: SiblingIndex) -> Self {
        Self {
            sibling,
            throw_on: None,
            n_events: 0,
        }
    }

    /// One node per sibling; only sibling 0 raises, at `cycle`.
    #[must_use]
    pub fn group(sibling_count: usize, cycle: Cycle) -> Vec<Self> {
        (0..sibling_count)
            .map(|i| Self::new(SiblingIndex::new(i), SiblingIndex::FIRST, cycle))
            .collect()
    }
}

impl CycleNode<SpikeEvent> for ThrowingNode {
    fn sibling(&self) -> SiblingIndex {
        self.sibling
    }

    fn calibrate(&mut self, runtime: &RuntimeFacts) -> Result<()> {
        runtime.validate()
    }

    fn init_buffers(&mut self) {
        self.n_events = 0;
    }

    fn handle(&mut self, event: SpikeEvent, _class: DeliveryClass, _toggle: SegmentToggle) -> Result<()> {
        self.n_events += u64::from(event.multiplicity);
        Ok(())
    }

    fn update(&mut self, cycle: Cycle, _toggle: SegmentToggle) -> Result<()> {
        match self.throw_on {
            Some((sibling, at)) if sibling == self.sibling && at == cycle => {
                tracing::info!(
                    target: "spikefuse.harness",
                    sibling = self.sibling.get(),
                    cycle = cycle.get(),
                    "throwing node raised"
                );
                Err(FuseError::UnstableSpiking {
                    cycle: cycle.get(),
                    trigger_cycle: cycle.get(),
                })
            }
            _ => Ok(()),
        }
    }

    fn get_status(&self) -> Result<StatusDict> {
        let mut d = StatusDict::new();
        d.insert("sibling".into(), self.sibling.get().into());
        d.insert("n_events".into(), self.n_events.into());
        Ok(d)
    }

    fn set_status(&mut self, _d: &StatusDict) -> Result<()> {
        Ok(())
    }

    fn risk(&self) -> f64 {
        0.0
    }

    fn n_events(&self) -> u64 {
        self.n_events
    }
}
