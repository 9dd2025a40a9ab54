//! Seqlock-published sibling state.
//!
//! Every sibling owns one [`PublishedSlot`] and is its only writer. After its
//! local update for a cycle it publishes `(cycle, risk, unstable_since,
//! n_events)`; any sibling may read any slot. Readers never block the writer
//! and never observe a torn tuple.
//!
//! ## Protocol
//!
//! The sequence counter is even when stable, odd during a publish. Readers
//! sample it before and after loading the fields and retry on an odd or
//! changed value.
//!
//! Publishes are serialized by a `parking_lot::Mutex` so a misbehaving second
//! writer cannot interleave with the owner.

use std::sync::atomic::{AtomicU64, Ordering};

use spikefuse_types::Cycle;

use crate::observability::record_snapshot_retries;

/// Encoding of `unstable_since = None` in the atomic slot.
const NOT_UNSTABLE: u64 = u64::MAX;

/// Encoding of "nothing published yet".
const NEVER_PUBLISHED: u64 = u64::MAX;

/// Maximum retries before a reader gives up.
const MAX_RETRIES: u32 = 1_000_000;

/// One consistent view of a sibling's published state.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct SlotSnapshot {
    /// Cycle the values were published for, `None` before the first publish.
    pub cycle: Option<Cycle>,
    pub risk: f64,
    pub unstable_since: Option<Cycle>,
    /// Events this sibling has recorded so far.
    pub n_events: u64,
}

/// Seqlock over one sibling's published danger state.
pub struct PublishedSlot {
    seq: AtomicU64,
    cycle: AtomicU64,
    risk_bits: AtomicU64,
    unstable_since: AtomicU64,
    n_events: AtomicU64,
    write_lock: parking_lot::Mutex<()>,
}

impl Default for PublishedSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishedSlot {
    #[must_use]
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            cycle: AtomicU64::new(NEVER_PUBLISHED),
            risk_bits: AtomicU64::new(0.0_f64.to_bits()),
            unstable_since: AtomicU64::new(NOT_UNSTABLE),
            n_events: AtomicU64::new(0),
            write_lock: parking_lot::Mutex::new(()),
        }
    }

    /// Publish the owner's state for `cycle`.
    pub fn publish(&self, cycle: Cycle, risk: f64, unstable_since: Option<Cycle>, n_events: u64) {
        let _guard = self.write_lock.lock();
        self.seq.fetch_add(1, Ordering::Release); // even → odd
        self.cycle.store(cycle.get(), Ordering::Release);
        self.risk_bits.store(risk.to_bits(), Ordering::Release);
        self.unstable_since
            .store(unstable_since.map_or(NOT_UNSTABLE, Cycle::get), Ordering::Release);
        self.n_events.store(n_events, Ordering::Release);
        self.seq.fetch_add(1, Ordering::Release); // odd → even
    }

    /// Return the slot to its never-published state.
    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        self.seq.fetch_add(1, Ordering::Release);
        self.cycle.store(NEVER_PUBLISHED, Ordering::Release);
        self.risk_bits.store(0.0_f64.to_bits(), Ordering::Release);
        self.unstable_since.store(NOT_UNSTABLE, Ordering::Release);
        self.n_events.store(0, Ordering::Release);
        self.seq.fetch_add(1, Ordering::Release);
    }

    /// Optimistic consistent read. Returns `None` only if `MAX_RETRIES` is
    /// exhausted.
    #[inline]
    pub fn read(&self) -> Option<SlotSnapshot> {
        let mut retries: u32 = 0;

        let snapshot = loop {
            let seq1 = self.seq.load(Ordering::Acquire);
            if seq1 & 1 == 0 {
                let cycle = self.cycle.load(Ordering::Acquire);
                let risk = self.risk_bits.load(Ordering::Acquire);
                let unstable = self.unstable_since.load(Ordering::Acquire);
                let n_events = self.n_events.load(Ordering::Acquire);

                if self.seq.load(Ordering::Acquire) == seq1 {
                    break SlotSnapshot {
                        cycle: (cycle != NEVER_PUBLISHED).then_some(Cycle::new(cycle)),
                        risk: f64::from_bits(risk),
                        unstable_since: (unstable != NOT_UNSTABLE).then_some(Cycle::new(unstable)),
                        n_events,
                    };
                }
            }

            retries += 1;
            if retries >= MAX_RETRIES {
                emit_trace(retries);
                return None;
            }
            std::hint::spin_loop();
        };

        record_snapshot_retries(retries);
        emit_trace(retries);
        Some(snapshot)
    }
}

#[allow(clippy::missing_fields_in_debug)]
impl std::fmt::Debug for PublishedSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let seq = self.seq.load(Ordering::Relaxed);
        f.debug_struct("PublishedSlot")
            .field("seq", &seq)
            .field("writing", &(seq & 1 == 1))
            .finish_non_exhaustive()
    }
}

fn emit_trace(retries: u32) {
    if retries > 0 {
        tracing::debug!(target: "spikefuse.group", retries, "slot read contended");
    } else {
        tracing::trace!(target: "spikefuse.group", retries = 0_u32, "slot read");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn fresh_slot_reads_as_unpublished() {
        let slot = PublishedSlot::new();
        let snap = slot.read().unwrap();
        assert_eq!(snap.cycle, None);
        assert_eq!(snap.risk, 0.0);
        assert_eq!(snap.unstable_since, None);
        assert_eq!(snap.n_events, 0);
    }

    #[test]
    fn publish_then_read() {
        let slot = PublishedSlot::new();
        slot.publish(Cycle::new(7), 1.25, Some(Cycle::new(6)), 42);
        let snap = slot.read().unwrap();
        assert_eq!(snap.cycle, Some(Cycle::new(7)));
        assert_eq!(snap.risk, 1.25);
        assert_eq!(snap.unstable_since, Some(Cycle::new(6)));
        assert_eq!(snap.n_events, 42);

        slot.clear();
        let snap = slot.read().unwrap();
        assert_eq!(snap.cycle, None);
        assert_eq!(snap.unstable_since, None);
        assert_eq!(snap.n_events, 0);
    }

    /// Readers never see fields from two different publishes.
    #[test]
    fn no_torn_reads() {
        let slot = Arc::new(PublishedSlot::new());
        let stop = Arc::new(AtomicBool::new(false));
        let barrier = Arc::new(Barrier::new(4)); // 1 writer + 3 readers

        let writer_slot = Arc::clone(&slot);
        let writer_stop = Arc::clone(&stop);
        let writer_barrier = Arc::clone(&barrier);
        let writer = thread::spawn(move || {
            writer_barrier.wait();
            let mut c = 0_u64;
            while !writer_stop.load(Ordering::Relaxed) {
                c += 1;
                // Invariant: risk == cycle, unstable_since == cycle - 1, n_events == 2 * cycle.
                writer_slot.publish(Cycle::new(c), c as f64, Some(Cycle::new(c - 1)), 2 * c);
            }
            c
        });

        let mut readers = Vec::new();
        for _ in 0..3 {
            let r_slot = Arc::clone(&slot);
            let r_stop = Arc::clone(&stop);
            let r_barrier = Arc::clone(&barrier);
            readers.push(thread::spawn(move || {
                r_barrier.wait();
                let mut reads = 0_u64;
                while !r_stop.load(Ordering::Relaxed) {
                    let snap = r_slot.read().unwrap();
                    if let Some(c) = snap.cycle {
                        let expected_risk = c.get() as f64;
                        assert_eq!(snap.risk, expected_risk, "torn read: {snap:?}");
                        assert_eq!(snap.unstable_since, c.checked_sub(1));
                        assert_eq!(snap.n_events, 2 * c.get());
                    }
                    reads += 1;
                }
                reads
            }));
        }

        thread::sleep(Duration::from_millis(200));
        stop.store(true, Ordering::Release);

        let writes = writer.join().unwrap();
        let reads: u64 = readers.into_iter().map(|r| r.join().unwrap()).sum();
        assert!(writes > 0, "writer must have published");
        assert!(reads > 0, "readers must have read");
    }

    #[test]
    fn debug_format() {
        let slot = PublishedSlot::new();
        let dbg = format!("{slot:?}");
        assert!(dbg.contains("PublishedSlot"));
        assert!(dbg.contains("writing: false"));
    }
}
