//! The fuse node.
//!
//! One [`FuseDevice`] per sibling. All siblings of one logical monitor share
//! a [`SiblingGroup`]; each owns its buffer, tracker and recorder outright.
//!
//! ```text
//! Configured --calibrate--> Calibrated --update--> Running --abort--> Aborted
//!      ^                        |
//!      +------set_status--------+
//! ```
//!
//! The host drives every node through [`CycleNode`]: `handle` during the
//! delivery phase, then `update` once per cycle.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use spikefuse_error::{FuseError, Result};
use spikefuse_types::{
    ActiveWindow, BufferedEvent, Cycle, DeliveryClass, FuseParams, KEY_FREQUENCY_THRESH,
    KEY_LENGTH_THRESH, KEY_N_CONNECTED_NEURONS, KEY_ORIGIN, KEY_START, KEY_STOP, RuntimeFacts,
    SegmentToggle, SiblingIndex, StatusDict,
};

use crate::buffer::{DEFAULT_SEGMENT_CAPACITY, EventBuffer};
use crate::coordinator::AbortCoordinator;
use crate::danger::{CalibratedRates, DangerState, DangerTracker};
use crate::group::SiblingGroup;
use crate::observability::{record_abort, record_cycle, record_unstable_mark};
use crate::recorder::{CountingRecorder, EventRecorder};

const CONFIG_KEYS: [&str; 6] = [
    KEY_FREQUENCY_THRESH,
    KEY_LENGTH_THRESH,
    KEY_N_CONNECTED_NEURONS,
    KEY_ORIGIN,
    KEY_START,
    KEY_STOP,
];

/// Lifecycle phase of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DevicePhase {
    Configured,
    Calibrated,
    Running,
    Aborted,
}

impl DevicePhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configured => "configured",
            Self::Calibrated => "calibrated",
            Self::Running => "running",
            Self::Aborted => "aborted",
        }
    }

    /// Thresholds and window are frozen.
    #[must_use]
    pub const fn is_locked(self) -> bool {
        matches!(self, Self::Running | Self::Aborted)
    }
}

impl fmt::Display for DevicePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle hooks a host kernel calls on each sibling.
pub trait CycleNode<E>: Send {
    /// Position of this node within its sibling group.
    fn sibling(&self) -> SiblingIndex;

    /// Derive per-cycle constants from the host's facts.
    fn calibrate(&mut self, runtime: &RuntimeFacts) -> Result<()>;

    /// Allocate empty buffers and zero per-run state.
    fn init_buffers(&mut self);

    /// Accept one delivered event.
    fn handle(&mut self, event: E, class: DeliveryClass, toggle: SegmentToggle) -> Result<()>;

    /// Advance one cycle. `Err(UnstableSpiking)` asks the host to stop.
    fn update(&mut self, cycle: Cycle, toggle: SegmentToggle) -> Result<()>;

    fn get_status(&self) -> Result<StatusDict>;

    fn set_status(&mut self, d: &StatusDict) -> Result<()>;

    /// Current danger level.
    fn risk(&self) -> f64;

    /// Spikes recorded by this sibling.
    fn n_events(&self) -> u64;
}

/// Spike-rate fuse replicated once per sibling.
pub struct FuseDevice<E, R = CountingRecorder> {
    params: FuseParams,
    window: ActiveWindow,
    buffer: EventBuffer<E>,
    tracker: DangerTracker,
    recorder: R,
    sibling: SiblingIndex,
    group: SiblingGroup,
    phase: DevicePhase,
    fault: Option<FuseError>,
}

impl<E, R> FuseDevice<E, R>
where
    E: BufferedEvent,
    R: EventRecorder<E>,
{
    /// Node for `sibling` of `group`, with the monitor disabled until
    /// thresholds are set.
    pub fn new(sibling: SiblingIndex, group: SiblingGroup, recorder: R) -> Result<Self> {
        if sibling.get() >= group.len() {
            return Err(FuseError::internal(format!(
                "{sibling} outside group of {} siblings",
                group.len()
            )));
        }
        Ok(Self {
            params: FuseParams::default(),
            window: ActiveWindow::ALWAYS,
            buffer: EventBuffer::default(),
            tracker: DangerTracker::new(CalibratedRates::DISABLED),
            recorder,
            sibling,
            group,
            phase: DevicePhase::Configured,
            fault: None,
        })
    }

    /// One configured node per sibling, sharing a fresh group.
    pub fn replicas(sibling_count: usize, config: &StatusDict) -> Result<Vec<Self>>
    where
        R: Default,
    {
        let group = SiblingGroup::new(sibling_count);
        (0..sibling_count)
            .map(|i| {
                let mut node = Self::new(SiblingIndex::new(i), group.clone(), R::default())?;
                node.set_status(config)?;
                Ok(node)
            })
            .collect()
    }

    #[must_use]
    pub fn phase(&self) -> DevicePhase {
        self.phase
    }

    #[must_use]
    pub fn params(&self) -> FuseParams {
        self.params
    }

    #[must_use]
    pub fn window(&self) -> ActiveWindow {
        self.window
    }

    #[must_use]
    pub fn rates(&self) -> CalibratedRates {
        self.tracker.rates()
    }

    #[must_use]
    pub fn state(&self) -> DangerState {
        self.tracker.state()
    }

    #[must_use]
    pub fn group(&self) -> &SiblingGroup {
        &self.group
    }

    #[must_use]
    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    #[must_use]
    pub fn buffer(&self) -> &EventBuffer<E> {
        &self.buffer
    }

    fn abort(&mut self, fault: FuseError) -> FuseError {
        record_abort();
        self.phase = DevicePhase::Aborted;
        self.fault = Some(fault.clone());
        fault
    }
}

impl<E, R> CycleNode<E> for FuseDevice<E, R>
where
    E: BufferedEvent,
    R: EventRecorder<E>,
{
    fn sibling(&self) -> SiblingIndex {
        self.sibling
    }

    fn calibrate(&mut self, runtime: &RuntimeFacts) -> Result<()> {
        if self.phase.is_locked() {
            return Err(FuseError::InvalidPhase {
                operation: "calibrate",
                phase: self.phase.as_str(),
            });
        }
        if runtime.sibling_count != self.group.len() {
            return Err(FuseError::invalid_runtime(format!(
                "host reports {} siblings, group has {}",
                runtime.sibling_count,
                self.group.len()
            )));
        }

        let rates = CalibratedRates::calibrate(&self.params, runtime)?;
        if rates.is_disabled() {
            if self.sibling.is_first() {
                tracing::warn!(
                    target: "spikefuse.calibrate",
                    frequency_thresh = self.params.frequency_thresh,
                    length_thresh = self.params.length_thresh,
                    n_connected_neurons = self.params.n_connected_neurons,
                    "a threshold is zero, not fusing"
                );
            }
        } else {
            tracing::debug!(
                target: "spikefuse.calibrate",
                sibling = self.sibling.get(),
                decay_factor = rates.decay_factor,
                increment_step = rates.increment_step,
                convergence_cycles = rates.convergence_cycles,
                "calibrated"
            );
        }
        self.tracker.recalibrate(rates);
        self.phase = DevicePhase::Calibrated;
        Ok(())
    }

    fn init_buffers(&mut self) {
        self.buffer = EventBuffer::with_capacity(DEFAULT_SEGMENT_CAPACITY);
        self.tracker.reset();
        self.recorder.clear();
        self.group.clear(self.sibling);
    }

    fn handle(&mut self, event: E, class: DeliveryClass, toggle: SegmentToggle) -> Result<()> {
        if event.multiplicity() == 0 {
            return Err(FuseError::InvalidMultiplicity { multiplicity: 0 });
        }
        if !self.window.is_active(event.stamp()) {
            tracing::trace!(
                target: "spikefuse.device",
                sibling = self.sibling.get(),
                stamp = event.stamp().get(),
                "event outside active window dropped"
            );
            return Ok(());
        }
        self.buffer.record(event, class, toggle)
    }

    fn update(&mut self, cycle: Cycle, toggle: SegmentToggle) -> Result<()> {
        match self.phase {
            DevicePhase::Configured => {
                return Err(FuseError::InvalidPhase {
                    operation: "update",
                    phase: self.phase.as_str(),
                });
            }
            DevicePhase::Aborted => {
                return Err(self
                    .fault
                    .clone()
                    .unwrap_or_else(|| FuseError::internal("aborted without a fault")));
            }
            DevicePhase::Calibrated => self.phase = DevicePhase::Running,
            DevicePhase::Running => {}
        }

        let Self {
            buffer, recorder, ..
        } = self;
        let count = buffer.drain_read(toggle, |event| recorder.record(event));

        if let Some(mark) = self.tracker.update(count, cycle) {
            record_unstable_mark();
            tracing::info!(
                target: "spikefuse.device",
                sibling = self.sibling.get(),
                cycle = mark.get(),
                risk = self.tracker.risk(),
                "sibling crossed the danger level"
            );
        }

        let state = self.tracker.state();
        self.group
            .publish(self.sibling, cycle, &state, self.recorder.n_events())?;
        record_cycle(count);
        tracing::trace!(
            target: "spikefuse.device",
            sibling = self.sibling.get(),
            cycle = cycle.get(),
            events = count,
            risk = state.risk,
            "updated"
        );

        let decision = AbortCoordinator.reduce(&self.group, cycle)?;
        decision
            .into_result(cycle)
            .map_err(|fault| self.abort(fault))
    }

    fn get_status(&self) -> Result<StatusDict> {
        let mut d = StatusDict::new();
        self.params.get(&mut d);
        self.window.get(&mut d);
        self.recorder.get_status(&mut d);
        if self.sibling.is_first() {
            d.insert("n_events".into(), self.group.total_events()?.into());
        }

        let state = self.tracker.state();
        let rates = self.tracker.rates();
        d.insert("danger_level".into(), state.risk.into());
        d.insert(
            "unstable_since".into(),
            state
                .unstable_since
                .map_or(Value::Null, |c| Value::from(c.get())),
        );
        d.insert("decay_factor".into(), rates.decay_factor.into());
        d.insert("increment_step".into(), rates.increment_step.into());
        d.insert("sibling".into(), self.sibling.get().into());
        Ok(d)
    }

    fn set_status(&mut self, d: &StatusDict) -> Result<()> {
        if self.phase.is_locked() {
            let fields: Vec<&'static str> = CONFIG_KEYS
                .into_iter()
                .filter(|key| d.contains_key(*key))
                .collect();
            tracing::debug!(
                target: "spikefuse.device",
                sibling = self.sibling.get(),
                phase = self.phase.as_str(),
                "reconfiguration refused"
            );
            return Err(FuseError::bad_parameter(
                fields,
                "cannot reconfigure a running monitor",
            ));
        }

        let candidate = self.params.set(d).and_then(|params| {
            let window = self.window.set(d)?;
            Ok((params, window))
        });
        let (params, window) = candidate.inspect_err(|err| {
            tracing::debug!(
                target: "spikefuse.device",
                sibling = self.sibling.get(),
                error = %err,
                "reconfiguration rejected"
            );
        })?;

        if params != self.params && self.phase == DevicePhase::Calibrated {
            self.phase = DevicePhase::Configured;
        }
        self.params = params;
        self.window = window;
        Ok(())
    }

    fn risk(&self) -> f64 {
        self.tracker.risk()
    }

    fn n_events(&self) -> u64 {
        self.recorder.n_events()
    }
}

impl<E, R> fmt::Debug for FuseDevice<E, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuseDevice")
            .field("sibling", &self.sibling)
            .field("phase", &self.phase)
            .field("params", &self.params)
            .field("risk", &self.tracker.risk())
            .finish_non_exhaustive()
    }
}
