//! Two-segment event buffer.
//!
//! Events are split by delivery class so the count an update observes does
//! not depend on arrival order within a cycle:
//!
//! - Globally routed events are delivered before any sibling updates, so they
//!   go to the segment read by this cycle's update.
//! - Locally routed events may land before or after the owning sibling's
//!   update. They go to the other segment and are observed next cycle, never
//!   "sometimes now, sometimes later".
//!
//! The host flips [`SegmentToggle`] once per cycle; the buffer does not own it.

use spikefuse_error::{FuseError, Result};
use spikefuse_types::{BufferedEvent, DeliveryClass, SegmentToggle};

/// Initial per-segment capacity.
pub const DEFAULT_SEGMENT_CAPACITY: usize = 64;

/// Double buffer of pending events for one sibling.
#[derive(Debug, Clone)]
pub struct EventBuffer<E> {
    segments: [Vec<E>; 2],
}

impl<E: BufferedEvent> Default for EventBuffer<E> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SEGMENT_CAPACITY)
    }
}

impl<E: BufferedEvent> EventBuffer<E> {
    #[must_use]
    pub fn with_capacity(per_segment: usize) -> Self {
        Self {
            segments: [Vec::with_capacity(per_segment), Vec::with_capacity(per_segment)],
        }
    }

    /// Append `event` to the segment its delivery class is routed to.
    ///
    /// A zero multiplicity is a caller error and is rejected before the
    /// event is stored.
    pub fn record(&mut self, event: E, class: DeliveryClass, toggle: SegmentToggle) -> Result<()> {
        if event.multiplicity() == 0 {
            return Err(FuseError::InvalidMultiplicity { multiplicity: 0 });
        }
        self.segments[toggle.target(class)].push(event);
        Ok(())
    }

    /// Hand every event in the read segment to `sink`, then clear that
    /// segment. Capacity is retained. Returns the summed multiplicity.
    pub fn drain_read(&mut self, toggle: SegmentToggle, mut sink: impl FnMut(&E)) -> u64 {
        let segment = &mut self.segments[toggle.read()];
        let mut count = 0_u64;
        for event in segment.iter() {
            count += u64::from(event.multiplicity());
            sink(event);
        }
        segment.clear();
        count
    }

    /// Remove and return the read segment's events, keeping its capacity.
    pub fn drain_and_clear_read(&mut self, toggle: SegmentToggle) -> std::vec::Drain<'_, E> {
        self.segments[toggle.read()].drain(..)
    }

    /// Events waiting in `segment` (0 or 1).
    #[must_use]
    pub fn pending(&self, segment: usize) -> &[E] {
        &self.segments[segment]
    }

    /// Summed multiplicity waiting in both segments.
    #[must_use]
    pub fn pending_multiplicity(&self) -> u64 {
        self.segments
            .iter()
            .flatten()
            .map(|e| u64::from(e.multiplicity()))
            .sum()
    }

    /// Reserved storage of each segment.
    #[must_use]
    pub fn capacity(&self) -> [usize; 2] {
        [self.segments[0].capacity(), self.segments[1].capacity()]
    }

    /// Drop every pending event in both segments.
    pub fn reset(&mut self) {
        for segment in &mut self.segments {
            segment.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use spikefuse_types::{Cycle, NodeId, SpikeEvent, UnitSpike};

    use super::*;

    fn spike(sender: u64, multiplicity: u32) -> SpikeEvent {
        SpikeEvent::new(Cycle::new(1), NodeId::new(sender), multiplicity)
    }

    #[test]
    fn global_events_are_visible_this_cycle() {
        let toggle = SegmentToggle::for_cycle(Cycle::new(1));
        let mut buf = EventBuffer::default();
        buf.record(spike(1, 3), DeliveryClass::Global, toggle).unwrap();
        assert_eq!(buf.drain_read(toggle, |_| {}), 3);
    }

    #[test]
    fn local_events_are_deferred_one_cycle() {
        let toggle = SegmentToggle::for_cycle(Cycle::new(1));
        let mut buf = EventBuffer::default();
        buf.record(spike(1, 2), DeliveryClass::Local, toggle).unwrap();
        assert_eq!(buf.drain_read(toggle, |_| {}), 0);
        assert_eq!(buf.drain_read(toggle.flipped(), |_| {}), 2);
    }

    #[test]
    fn zero_multiplicity_is_rejected() {
        let toggle = SegmentToggle::for_cycle(Cycle::ZERO);
        let mut buf = EventBuffer::default();
        let err = buf
            .record(spike(1, 0), DeliveryClass::Global, toggle)
            .unwrap_err();
        assert_eq!(err, FuseError::InvalidMultiplicity { multiplicity: 0 });
        assert_eq!(buf.pending_multiplicity(), 0);
    }

    #[test]
    fn draining_keeps_capacity() {
        let toggle = SegmentToggle::for_cycle(Cycle::ZERO);
        let mut buf: EventBuffer<UnitSpike> = EventBuffer::with_capacity(4);
        for i in 0..100 {
            let unit = UnitSpike {
                stamp: Cycle::ZERO,
                sender: NodeId::new(i),
            };
            buf.record(unit, DeliveryClass::Global, toggle).unwrap();
        }
        let grown = buf.capacity()[toggle.read()];
        assert!(grown >= 100);
        let drained: Vec<UnitSpike> = buf.drain_and_clear_read(toggle).collect();
        assert_eq!(drained.len(), 100);
        assert!(buf.pending(toggle.read()).is_empty());
        assert_eq!(buf.capacity()[toggle.read()], grown);
    }

    #[test]
    fn drain_leaves_write_segment_untouched() {
        let toggle = SegmentToggle::for_cycle(Cycle::new(6));
        let mut buf = EventBuffer::default();
        buf.record(spike(1, 1), DeliveryClass::Global, toggle).unwrap();
        buf.record(spike(2, 5), DeliveryClass::Local, toggle).unwrap();
        let mut seen = Vec::new();
        assert_eq!(buf.drain_read(toggle, |e| seen.push(e.sender)), 1);
        assert_eq!(seen, vec![NodeId::new(1)]);
        assert_eq!(buf.pending(toggle.write()).len(), 1);
    }

    proptest! {
        /// The count drained per cycle depends only on the multiset of
        /// deliveries and their classes, not on the order they arrived in.
        #[test]
        fn drained_count_is_order_independent(
            (deliveries, shuffled) in prop::collection::vec((1_u32..8, any::<bool>()), 0..40)
                .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle())),
        ) {
            let toggle = SegmentToggle::for_cycle(Cycle::new(3));
            let run = |order: &[(u32, bool)]| {
                let mut buf = EventBuffer::default();
                for (i, &(m, global)) in order.iter().enumerate() {
                    let class = if global { DeliveryClass::Global } else { DeliveryClass::Local };
                    buf.record(spike(i as u64, m), class, toggle).unwrap();
                }
                let now = buf.drain_read(toggle, |_| {});
                let next = buf.drain_read(toggle.flipped(), |_| {});
                (now, next)
            };

            prop_assert_eq!(run(&deliveries), run(&shuffled));
        }
    }
}
