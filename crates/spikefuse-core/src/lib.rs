//! Sibling-synchronized spike-rate fuse.
//!
//! A monitoring point replicated once per execution thread counts incoming
//! spikes per cycle, tracks a decaying danger level, and aborts the whole
//! run on the same cycle on every sibling once any of them has crossed the
//! danger level.

pub mod buffer;
pub mod coordinator;
pub mod danger;
pub mod device;
pub mod group;
pub mod observability;
pub mod recorder;
pub mod slot;

pub use buffer::{DEFAULT_SEGMENT_CAPACITY, EventBuffer};
pub use coordinator::{AbortCoordinator, AbortDecision, reduce_marks};
pub use danger::{
    CONVERGENCE_RESIDUAL, CalibratedRates, DangerState, DangerTracker, HZ_TO_PER_MS,
    UNSTABLE_LEVEL,
};
pub use device::{CycleNode, DevicePhase, FuseDevice};
pub use group::SiblingGroup;
pub use observability::{FuseMetrics, fuse_metrics};
pub use recorder::{CountingRecorder, EventRecorder, MemoryRecorder};
pub use slot::{PublishedSlot, SlotSnapshot};
