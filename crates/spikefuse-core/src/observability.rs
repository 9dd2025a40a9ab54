//! Process-wide fuse counters.
//!
//! Lock-free, `Relaxed` ordering. Counters are diagnostic only; no decision
//! reads them.
//!
//! - `spikefuse_cycles_total`: sibling updates completed.
//! - `spikefuse_events_total`: spikes counted toward risk.
//! - `spikefuse_unstable_marks_total`: siblings that crossed the danger level.
//! - `spikefuse_aborts_total`: sibling updates that returned the abort fault.
//! - `spikefuse_snapshot_retries_total`: contended slot reads.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

static SPIKEFUSE_CYCLES_TOTAL: AtomicU64 = AtomicU64::new(0);
static SPIKEFUSE_EVENTS_TOTAL: AtomicU64 = AtomicU64::new(0);
static SPIKEFUSE_UNSTABLE_MARKS_TOTAL: AtomicU64 = AtomicU64::new(0);
static SPIKEFUSE_ABORTS_TOTAL: AtomicU64 = AtomicU64::new(0);
static SPIKEFUSE_SNAPSHOT_RETRIES_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Snapshot of fuse metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FuseMetrics {
    pub spikefuse_cycles_total: u64,
    pub spikefuse_events_total: u64,
    pub spikefuse_unstable_marks_total: u64,
    pub spikefuse_aborts_total: u64,
    pub spikefuse_snapshot_retries_total: u64,
}

/// Read current fuse metrics.
#[must_use]
pub fn fuse_metrics() -> FuseMetrics {
    FuseMetrics {
        spikefuse_cycles_total: SPIKEFUSE_CYCLES_TOTAL.load(Ordering::Relaxed),
        spikefuse_events_total: SPIKEFUSE_EVENTS_TOTAL.load(Ordering::Relaxed),
        spikefuse_unstable_marks_total: SPIKEFUSE_UNSTABLE_MARKS_TOTAL.load(Ordering::Relaxed),
        spikefuse_aborts_total: SPIKEFUSE_ABORTS_TOTAL.load(Ordering::Relaxed),
        spikefuse_snapshot_retries_total: SPIKEFUSE_SNAPSHOT_RETRIES_TOTAL.load(Ordering::Relaxed),
    }
}

pub(crate) fn record_cycle(events: u64) {
    SPIKEFUSE_CYCLES_TOTAL.fetch_add(1, Ordering::Relaxed);
    if events > 0 {
        SPIKEFUSE_EVENTS_TOTAL.fetch_add(events, Ordering::Relaxed);
    }
}

pub(crate) fn record_unstable_mark() {
    SPIKEFUSE_UNSTABLE_MARKS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_abort() {
    SPIKEFUSE_ABORTS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_snapshot_retries(retries: u32) {
    if retries > 0 {
        SPIKEFUSE_SNAPSHOT_RETRIES_TOTAL.fetch_add(u64::from(retries), Ordering::Relaxed);
    }
}
