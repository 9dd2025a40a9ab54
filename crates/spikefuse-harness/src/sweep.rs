//! Rate x threshold acceptance sweep.
//!
//! Every grid point drives a fresh fuse group with Poisson input and checks
//! the verdict against the drive: firing above the frequency threshold must
//! abort, firing below it must not. A drive exactly at threshold may go
//! either way.

use serde::Serialize;
use spikefuse_core::FuseDevice;
use spikefuse_error::Result;
use spikefuse_types::{
    KEY_FREQUENCY_THRESH, KEY_LENGTH_THRESH, KEY_N_CONNECTED_NEURONS, SpikeEvent, status_dict,
};

use crate::kernel::{KernelConfig, LockstepKernel, RunOutcome};
use crate::source::{PoissonConfig, PoissonSource};

/// Axes of the sweep. Every combination is run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepGrid {
    pub n_sources: Vec<u64>,
    pub siblings: Vec<usize>,
    pub rates_hz: Vec<f64>,
    pub frequency_threshes: Vec<f64>,
    pub length_threshes_ms: Vec<f64>,
}

impl Default for SweepGrid {
    fn default() -> Self {
        Self {
            n_sources: vec![100, 800],
            siblings: vec![1, 4, 12],
            rates_hz: vec![20.0, 60.0, 100.0],
            frequency_threshes: vec![20.0, 60.0, 100.0],
            length_threshes_ms: vec![100.0, 200.0],
        }
    }
}

impl SweepGrid {
    /// Every grid point in axis order.
    #[must_use]
    pub fn points(&self) -> Vec<SweepPoint> {
        let mut points = Vec::new();
        for &n_sources in &self.n_sources {
            for &siblings in &self.siblings {
                for &rate_hz in &self.rates_hz {
                    for &frequency_thresh in &self.frequency_threshes {
                        for &length_thresh in &self.length_threshes_ms {
                            points.push(SweepPoint {
                                n_sources,
                                siblings,
                                rate_hz,
                                frequency_thresh,
                                length_thresh,
                            });
                        }
                    }
                }
            }
        }
        points
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SweepPoint {
    pub n_sources: u64,
    pub siblings: usize,
    pub rate_hz: f64,
    pub frequency_thresh: f64,
    pub length_thresh: f64,
}

/// Run length and randomness shared by every point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SweepConfig {
    pub cycles: u64,
    pub cycle_duration_ms: f64,
    pub seed: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            cycles: 500,
            cycle_duration_ms: 1.0,
            seed: 0x5eed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum SweepVerdict {
    Stable,
    Unstable { at_ms: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SweepResult {
    pub point: SweepPoint,
    pub verdict: SweepVerdict,
    /// Verdict matches the drive relative to the threshold.
    pub consistent: bool,
}

/// Run every point of `grid`.
pub fn sweep(grid: &SweepGrid, config: &SweepConfig) -> Result<Vec<SweepResult>> {
    grid.points()
        .into_iter()
        .map(|point| run_point(point, config))
        .collect()
}

/// Run one grid point.
pub fn run_point(point: SweepPoint, config: &SweepConfig) -> Result<SweepResult> {
    let fuse_config = status_dict([
        (KEY_FREQUENCY_THRESH, point.frequency_thresh.into()),
        (KEY_LENGTH_THRESH, point.length_thresh.into()),
        (
            KEY_N_CONNECTED_NEURONS,
            i64::try_from(point.n_sources).unwrap_or(i64::MAX).into(),
        ),
    ]);
    let nodes = FuseDevice::<SpikeEvent>::replicas(point.siblings, &fuse_config)?;
    let poisson = PoissonConfig::new(
        point.rate_hz,
        point.n_sources,
        config.seed,
        config.cycle_duration_ms,
    );
    let sources = PoissonSource::per_sibling(&poisson, point.siblings);

    let kernel = LockstepKernel::new(KernelConfig::new(config.cycles, config.cycle_duration_ms));
    let report = kernel.run(nodes, sources)?;

    let verdict = match report.outcome {
        RunOutcome::Completed { .. } => SweepVerdict::Stable,
        RunOutcome::Aborted { cycle, .. } => SweepVerdict::Unstable {
            at_ms: cycle as f64 * config.cycle_duration_ms,
        },
    };
    let consistent = match verdict {
        SweepVerdict::Stable => point.rate_hz <= point.frequency_thresh,
        SweepVerdict::Unstable { .. } => point.rate_hz >= point.frequency_thresh,
    };
    tracing::info!(
        target: "spikefuse.harness",
        n_sources = point.n_sources,
        siblings = point.siblings,
        rate_hz = point.rate_hz,
        frequency_thresh = point.frequency_thresh,
        length_thresh = point.length_thresh,
        ?verdict,
        consistent,
        "sweep point"
    );
    Ok(SweepResult {
        point,
        verdict,
        consistent,
    })
}
