//! Event records stored by the monitor's two-segment buffer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::glossary::{Cycle, NodeId};

/// How an event reached the monitor.
///
/// Globally routed events are fully delivered before any sibling updates in
/// a cycle. Locally routed events (from senders replicated on every sibling)
/// may arrive before or after the owning sibling's update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryClass {
    Global,
    Local,
}

/// Which of the two buffer segments is read this cycle.
///
/// Owned by the host scheduler; it flips once per cycle and every sibling
/// sees the same value for the same cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentToggle {
    read: u8,
}

impl SegmentToggle {
    /// Toggle in effect during `cycle`.
    #[inline]
    pub const fn for_cycle(cycle: Cycle) -> Self {
        Self {
            read: (cycle.get() & 1) as u8,
        }
    }

    /// Segment drained by this cycle's update.
    #[inline]
    pub const fn read(self) -> usize {
        self.read as usize
    }

    /// Segment that collects events for the next cycle.
    #[inline]
    pub const fn write(self) -> usize {
        (self.read ^ 1) as usize
    }

    /// The toggle of the following cycle.
    #[inline]
    #[must_use]
    pub const fn flipped(self) -> Self {
        Self {
            read: self.read ^ 1,
        }
    }

    /// Segment a delivery of `class` is appended to.
    #[inline]
    pub const fn target(self, class: DeliveryClass) -> usize {
        match class {
            DeliveryClass::Global => self.read(),
            DeliveryClass::Local => self.write(),
        }
    }
}

/// Element stored in the event buffer.
pub trait BufferedEvent: Clone + Send + fmt::Debug + 'static {
    /// Cycle at which the event was emitted.
    fn stamp(&self) -> Cycle;
    /// Node that emitted the event.
    fn sender(&self) -> NodeId;
    /// Number of spikes this element stands for.
    fn multiplicity(&self) -> u32;
}

/// A spike carrying a multiplicity, stored once regardless of multiplicity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpikeEvent {
    pub stamp: Cycle,
    pub sender: NodeId,
    pub multiplicity: u32,
}

impl SpikeEvent {
    #[must_use]
    pub const fn new(stamp: Cycle, sender: NodeId, multiplicity: u32) -> Self {
        Self {
            stamp,
            sender,
            multiplicity,
        }
    }

    /// One stored object per spike.
    pub fn expand(self) -> impl Iterator<Item = UnitSpike> {
        (0..self.multiplicity).map(move |_| UnitSpike {
            stamp: self.stamp,
            sender: self.sender,
        })
    }
}

impl BufferedEvent for SpikeEvent {
    fn stamp(&self) -> Cycle {
        self.stamp
    }

    fn sender(&self) -> NodeId {
        self.sender
    }

    fn multiplicity(&self) -> u32 {
        self.multiplicity
    }
}

/// A single spike. Buffers of these hold one element per spike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitSpike {
    pub stamp: Cycle,
    pub sender: NodeId,
}

impl BufferedEvent for UnitSpike {
    fn stamp(&self) -> Cycle {
        self.stamp
    }

    fn sender(&self) -> NodeId {
        self.sender
    }

    fn multiplicity(&self) -> u32 {
        1
    }
}

impl From<UnitSpike> for SpikeEvent {
    fn from(spike: UnitSpike) -> Self {
        Self::new(spike.stamp, spike.sender, 1)
    }
}
