//! Host harness for spikefuse.
//!
//! A small lockstep kernel standing in for the simulation engine: sibling
//! threads, an abandonable cycle barrier, spike sources, and the
//! rate-versus-threshold sweep.

pub mod barrier;
pub mod kernel;
pub mod source;
pub mod sweep;
pub mod throwing;

pub use barrier::CycleBarrier;
pub use kernel::{
    KernelConfig, LocalInjection, LockstepKernel, RunOutcome, RunReport, SiblingReport,
};
pub use source::{Delivery, PoissonConfig, PoissonSource, ScriptedSource, SpikeSource};
pub use sweep::{SweepConfig, SweepGrid, SweepPoint, SweepResult, SweepVerdict, run_point, sweep};
pub use throwing::ThrowingNode;
