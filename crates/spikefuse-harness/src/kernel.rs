//! Lockstep host kernel.
//!
//! Stands in for the simulation engine around the fuse: one thread per
//! sibling, advancing in cycles under a shared barrier.
//!
//! ```text
//! for cycle in 0..cycles:
//!     deliver globally routed events       (read segment)
//!     [deliver locally routed events]      (write segment, BeforeUpdate)
//!     barrier
//!     update
//!     [deliver locally routed events]      (write segment, AfterUpdate)
//!     barrier
//! ```
//!
//! A sibling whose update fails abandons the barrier and leaves. Siblings
//! still waiting are released with `BarrierAbandoned`, so a staggered abort
//! is reported as [`FuseError::PartialAbort`] instead of hanging.

use std::thread;

use serde::Serialize;
use spikefuse_core::CycleNode;
use spikefuse_error::{FuseError, Result};
use spikefuse_types::{Cycle, DeliveryClass, RuntimeFacts, SegmentToggle, SiblingIndex, SpikeEvent};

use crate::barrier::CycleBarrier;
use crate::source::{Delivery, SpikeSource};

/// When locally routed events reach the node relative to its update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum LocalInjection {
    #[default]
    BeforeUpdate,
    AfterUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KernelConfig {
    pub cycles: u64,
    pub cycle_duration_ms: f64,
    pub local_injection: LocalInjection,
}

impl KernelConfig {
    #[must_use]
    pub const fn new(cycles: u64, cycle_duration_ms: f64) -> Self {
        Self {
            cycles,
            cycle_duration_ms,
            local_injection: LocalInjection::BeforeUpdate,
        }
    }

    #[must_use]
    pub const fn with_local_injection(mut self, local_injection: LocalInjection) -> Self {
        self.local_injection = local_injection;
        self
    }
}

/// How a run ended when every sibling agreed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed { cycles: u64 },
    Aborted { cycle: u64, trigger_cycle: u64 },
}

impl RunOutcome {
    #[must_use]
    pub const fn is_aborted(self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

/// Final state of one sibling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SiblingReport {
    pub sibling: usize,
    pub risk: f64,
    pub n_events: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub siblings: Vec<SiblingReport>,
    /// Spikes recorded across every sibling.
    pub events: u64,
}

/// How one sibling's thread finished.
#[derive(Debug, Clone, PartialEq)]
enum SiblingExit {
    Completed,
    Aborted { cycle: u64, trigger_cycle: u64 },
    Stranded { cycle: u64 },
    Failed(FuseError),
}

/// Drives a sibling group in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct LockstepKernel {
    config: KernelConfig,
}

impl LockstepKernel {
    #[must_use]
    pub const fn new(config: KernelConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> KernelConfig {
        self.config
    }

    /// Calibrate `nodes`, then run them for the configured cycles with
    /// `sources[i]` feeding `nodes[i]`.
    pub fn run<N, S>(&self, mut nodes: Vec<N>, sources: Vec<S>) -> Result<RunReport>
    where
        N: CycleNode<SpikeEvent>,
        S: SpikeSource,
    {
        let siblings = nodes.len();
        if siblings == 0 || sources.len() != siblings {
            return Err(FuseError::invalid_runtime(format!(
                "{} nodes need as many sources, got {}",
                siblings,
                sources.len()
            )));
        }

        let facts = RuntimeFacts::new(self.config.cycle_duration_ms, siblings);
        for node in &mut nodes {
            node.calibrate(&facts)?;
            node.init_buffers();
        }

        tracing::info!(
            target: "spikefuse.harness",
            siblings,
            cycles = self.config.cycles,
            cycle_duration_ms = self.config.cycle_duration_ms,
            "run started"
        );

        let barrier = CycleBarrier::new(siblings);
        let finished: Vec<(SiblingExit, SiblingReport)> = thread::scope(|scope| {
            let handles: Vec<_> = nodes
                .into_iter()
                .zip(sources)
                .map(|(node, source)| {
                    let barrier = &barrier;
                    let config = self.config;
                    scope.spawn(move || drive_sibling(node, source, barrier, config))
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(i, h)| {
                    h.join().unwrap_or_else(|_| {
                        (
                            SiblingExit::Failed(FuseError::internal(format!(
                                "sibling {i} panicked"
                            ))),
                            SiblingReport {
                                sibling: i,
                                risk: 0.0,
                                n_events: 0,
                            },
                        )
                    })
                })
                .collect()
        });

        let (exits, reports): (Vec<_>, Vec<_>) = finished.into_iter().unzip();
        let outcome = self.reconcile(&exits)?;
        let events = reports.iter().map(|r| r.n_events).sum();

        tracing::info!(
            target: "spikefuse.harness",
            ?outcome,
            events,
            "run finished"
        );
        Ok(RunReport {
            outcome,
            siblings: reports,
            events,
        })
    }

    /// Collapse per-sibling exits into one outcome, or the error that
    /// explains why there is none.
    fn reconcile(&self, exits: &[SiblingExit]) -> Result<RunOutcome> {
        if let Some(err) = exits.iter().find_map(|e| match e {
            SiblingExit::Failed(err) => Some(err.clone()),
            _ => None,
        }) {
            return Err(err);
        }

        if exits.iter().all(|e| *e == SiblingExit::Completed) {
            return Ok(RunOutcome::Completed {
                cycles: self.config.cycles,
            });
        }

        let first = &exits[0];
        if let SiblingExit::Aborted {
            cycle,
            trigger_cycle,
        } = *first
        {
            if exits.iter().all(|e| e == first) {
                return Ok(RunOutcome::Aborted {
                    cycle,
                    trigger_cycle,
                });
            }
        }

        let aborted = exits
            .iter()
            .filter(|e| matches!(e, SiblingExit::Aborted { .. }))
            .count();
        let cycle = exits
            .iter()
            .filter_map(|e| match e {
                SiblingExit::Aborted { cycle, .. } | SiblingExit::Stranded { cycle } => {
                    Some(*cycle)
                }
                _ => None,
            })
            .min()
            .unwrap_or(self.config.cycles);
        tracing::warn!(
            target: "spikefuse.harness",
            cycle,
            aborted,
            siblings = exits.len(),
            "siblings disagreed on abort"
        );
        Err(FuseError::PartialAbort {
            cycle,
            aborted,
            siblings: exits.len(),
        })
    }
}

fn deliver<N: CycleNode<SpikeEvent>>(
    node: &mut N,
    pending: &[Delivery],
    class: DeliveryClass,
    toggle: SegmentToggle,
) -> Result<()> {
    for delivery in pending.iter().filter(|d| d.class == class) {
        node.handle(delivery.event, delivery.class, toggle)?;
    }
    Ok(())
}

fn drive_sibling<N, S>(
    mut node: N,
    mut source: S,
    barrier: &CycleBarrier,
    config: KernelConfig,
) -> (SiblingExit, SiblingReport)
where
    N: CycleNode<SpikeEvent>,
    S: SpikeSource,
{
    let _guard = AbandonOnPanic(barrier);
    let exit = run_cycles(&mut node, &mut source, barrier, config);
    if exit != SiblingExit::Completed {
        barrier.abandon();
    }
    let report = SiblingReport {
        sibling: node.sibling().get(),
        risk: node.risk(),
        n_events: node.n_events(),
    };
    (exit, report)
}

fn run_cycles<N, S>(
    node: &mut N,
    source: &mut S,
    barrier: &CycleBarrier,
    config: KernelConfig,
) -> SiblingExit
where
    N: CycleNode<SpikeEvent>,
    S: SpikeSource,
{
    let sibling: SiblingIndex = node.sibling();
    let mut pending = Vec::new();

    for raw in 0..config.cycles {
        let cycle = Cycle::new(raw);
        let toggle = SegmentToggle::for_cycle(cycle);
        pending.clear();
        source.emit(cycle, &mut pending);

        let delivered = deliver(node, &pending, DeliveryClass::Global, toggle).and_then(|()| {
            if config.local_injection == LocalInjection::BeforeUpdate {
                deliver(node, &pending, DeliveryClass::Local, toggle)
            } else {
                Ok(())
            }
        });
        if let Err(err) = delivered {
            return SiblingExit::Failed(err);
        }
        if let Err(err) = barrier.wait(cycle) {
            return stranded_or_failed(err);
        }

        match node.update(cycle, toggle) {
            Ok(()) => {}
            Err(FuseError::UnstableSpiking {
                cycle,
                trigger_cycle,
            }) => {
                tracing::debug!(
                    target: "spikefuse.harness",
                    sibling = sibling.get(),
                    cycle,
                    "sibling aborting"
                );
                return SiblingExit::Aborted {
                    cycle,
                    trigger_cycle,
                };
            }
            Err(err) => return SiblingExit::Failed(err),
        }

        if config.local_injection == LocalInjection::AfterUpdate {
            if let Err(err) = deliver(node, &pending, DeliveryClass::Local, toggle) {
                return SiblingExit::Failed(err);
            }
        }
        if let Err(err) = barrier.wait(cycle) {
            return stranded_or_failed(err);
        }
    }
    SiblingExit::Completed
}

/// Releases the other siblings if this one unwinds.
struct AbandonOnPanic<'a>(&'a CycleBarrier);

impl Drop for AbandonOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abandon();
        }
    }
}

fn stranded_or_failed(err: FuseError) -> SiblingExit {
    match err {
        FuseError::BarrierAbandoned { cycle } => SiblingExit::Stranded { cycle },
        other => SiblingExit::Failed(other),
    }
}
