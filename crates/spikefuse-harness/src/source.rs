//! Spike sources feeding one sibling each.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Poisson};
use serde::{Deserialize, Serialize};
use spikefuse_core::HZ_TO_PER_MS;
use spikefuse_types::{Cycle, DeliveryClass, NodeId, SiblingIndex, SpikeEvent};

/// One event and the path it is delivered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub event: SpikeEvent,
    pub class: DeliveryClass,
}

/// Per-sibling producer of spikes.
pub trait SpikeSource: Send {
    /// Append every delivery for `cycle` to `out`.
    fn emit(&mut self, cycle: Cycle, out: &mut Vec<Delivery>);
}

/// Poisson drive of `n_sources` independent sources at `rate_hz` each.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoissonConfig {
    pub rate_hz: f64,
    pub n_sources: u64,
    pub seed: u64,
    pub cycle_duration_ms: f64,
    pub class: DeliveryClass,
}

impl PoissonConfig {
    #[must_use]
    pub const fn new(rate_hz: f64, n_sources: u64, seed: u64, cycle_duration_ms: f64) -> Self {
        Self {
            rate_hz,
            n_sources,
            seed,
            cycle_duration_ms,
            class: DeliveryClass::Global,
        }
    }
}

/// Poisson spikes from the sources owned by one sibling.
///
/// Source `j` lives on sibling `j % sibling_count`, so each sibling sees
/// about `1 / sibling_count` of the population. A non-positive rate stays
/// silent.
#[derive(Debug, Clone)]
pub struct PoissonSource {
    senders: Vec<NodeId>,
    per_cycle: Option<Poisson<f64>>,
    class: DeliveryClass,
    rng: StdRng,
}

impl PoissonSource {
    #[must_use]
    pub fn new(config: &PoissonConfig, sibling: SiblingIndex, sibling_count: usize) -> Self {
        let senders = (sibling.get() as u64..config.n_sources)
            .step_by(sibling_count.max(1))
            .map(NodeId::new)
            .collect();
        let stream = config
            .seed
            .wrapping_add((sibling.get() as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let mean = config.rate_hz * config.cycle_duration_ms * HZ_TO_PER_MS;
        Self {
            senders,
            per_cycle: Poisson::new(mean).ok(),
            class: config.class,
            rng: StdRng::seed_from_u64(stream),
        }
    }

    /// One source per sibling of a group.
    #[must_use]
    pub fn per_sibling(config: &PoissonConfig, sibling_count: usize) -> Vec<Self> {
        (0..sibling_count)
            .map(|i| Self::new(config, SiblingIndex::new(i), sibling_count))
            .collect()
    }

    #[must_use]
    pub fn senders(&self) -> &[NodeId] {
        &self.senders
    }
}

impl SpikeSource for PoissonSource {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn emit(&mut self, cycle: Cycle, out: &mut Vec<Delivery>) {
        let Some(dist) = self.per_cycle else {
            return;
        };
        for &sender in &self.senders {
            let k = dist.sample(&mut self.rng) as u32;
            if k > 0 {
                out.push(Delivery {
                    event: SpikeEvent::new(cycle, sender, k),
                    class: self.class,
                });
            }
        }
    }
}

/// Exact, pre-written deliveries for one sibling.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    script: BTreeMap<u64, Vec<Delivery>>,
}

impl ScriptedSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `multiplicity` spikes from `sender` on `cycle`.
    #[must_use]
    pub fn at(mut self, cycle: u64, sender: u64, multiplicity: u32, class: DeliveryClass) -> Self {
        self.script.entry(cycle).or_default().push(Delivery {
            event: SpikeEvent::new(Cycle::new(cycle), NodeId::new(sender), multiplicity),
            class,
        });
        self
    }

    /// Deliver `multiplicity` spikes on every cycle in `cycles`.
    #[must_use]
    pub fn every(
        mut self,
        cycles: std::ops::Range<u64>,
        sender: u64,
        multiplicity: u32,
        class: DeliveryClass,
    ) -> Self {
        for cycle in cycles {
            self = self.at(cycle, sender, multiplicity, class);
        }
        self
    }

    /// Summed multiplicity over the whole script.
    #[must_use]
    pub fn total_multiplicity(&self) -> u64 {
        self.script
            .values()
            .flatten()
            .map(|d| u64::from(d.event.multiplicity))
            .sum()
    }
}

impl SpikeSource for ScriptedSource {
    fn emit(&mut self, cycle: Cycle, out: &mut Vec<Delivery>) {
        if let Some(deliveries) = self.script.get(&cycle.get()) {
            out.extend_from_slice(deliveries);
        }
    }
}
