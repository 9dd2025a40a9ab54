//! Decaying danger accumulator and its calibration.
//!
//! Each cycle the owning sibling applies
//!
//! ```text
//! risk <- risk * decay_factor + increment_step * events_this_cycle
//! ```
//!
//! Calibration pins two properties of a constant drive at exactly
//! `frequency_thresh` per source from `n_connected_neurons` sources:
//!
//! 1. the steady state is exactly 1:
//!    `increment_step * events_per_cycle / (1 - decay_factor) = 1`;
//! 2. after `L = round(length_thresh / cycle_duration)` cycles the risk has
//!    covered all but [`CONVERGENCE_RESIDUAL`] of the way to steady state:
//!    `decay_factor^L = CONVERGENCE_RESIDUAL`.
//!
//! Each sibling sees roughly `1 / sibling_count` of the sources, so the
//! increment is scaled up by the sibling count.

use serde::Serialize;
use spikefuse_error::{FuseError, Result};
use spikefuse_types::{Cycle, FuseParams, RuntimeFacts};

/// Fraction of the distance to steady state left after `L` cycles of
/// threshold drive (risk reaches 0.99 of steady state).
pub const CONVERGENCE_RESIDUAL: f64 = 0.01;

/// Converts a frequency in Hz to events per millisecond.
pub const HZ_TO_PER_MS: f64 = 1e-3;

/// Risk above which a sibling is marked unstable.
pub const UNSTABLE_LEVEL: f64 = 1.0;

/// Decay and increment derived from the thresholds and runtime facts.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct CalibratedRates {
    /// Per-cycle multiplicative decay, in `[0, 1)`.
    pub decay_factor: f64,
    /// Risk added per received spike.
    pub increment_step: f64,
    /// Whole cycles in the convergence window (0 when disabled).
    pub convergence_cycles: u64,
}

impl CalibratedRates {
    /// Rates of a switched-off monitor: risk never grows.
    pub const DISABLED: Self = Self {
        decay_factor: 0.0,
        increment_step: 0.0,
        convergence_cycles: 0,
    };

    /// Derive rates from validated parameters and host facts.
    ///
    /// Returns [`DISABLED`](Self::DISABLED) if any threshold is zero, and
    /// `DegenerateCalibration` if the convergence window rounds to zero
    /// cycles. Non-zero thresholds whose rates fall outside `decay in [0, 1)`
    /// and `0 < increment < inf` are rejected as `BadParameter`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn calibrate(params: &FuseParams, runtime: &RuntimeFacts) -> Result<Self> {
        params.validate()?;
        runtime.validate()?;
        if params.is_disabled() {
            return Ok(Self::DISABLED);
        }

        let window = (params.length_thresh / runtime.cycle_duration_ms).round();
        if window < 1.0 {
            return Err(FuseError::DegenerateCalibration {
                length_thresh: params.length_thresh,
                cycle_duration_ms: runtime.cycle_duration_ms,
            });
        }
        if !window.is_finite() {
            return Err(FuseError::invalid_runtime(format!(
                "convergence window of {} ms over {} ms cycles is unbounded",
                params.length_thresh, runtime.cycle_duration_ms
            )));
        }

        let decay_factor = CONVERGENCE_RESIDUAL.powf(1.0 / window);
        let scale = runtime.cycle_duration_ms * HZ_TO_PER_MS;
        let increment_step = (1.0 - decay_factor) * runtime.sibling_count as f64
            / (params.frequency_thresh * params.n_connected_neurons as f64 * scale);

        if decay_factor >= 1.0 {
            return Err(FuseError::bad_parameter(
                vec!["length_thresh"],
                format!(
                    "length_thresh {} ms is too long to decay over {} ms cycles",
                    params.length_thresh, runtime.cycle_duration_ms
                ),
            ));
        }
        if !(increment_step.is_finite() && increment_step > 0.0) {
            return Err(FuseError::bad_parameter(
                vec!["frequency_thresh", "n_connected_neurons"],
                format!("thresholds give a non-finite increment step ({increment_step})"),
            ));
        }

        Ok(Self {
            decay_factor,
            increment_step,
            convergence_cycles: window as u64,
        })
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.increment_step == 0.0
    }

    /// Risk a constant per-cycle input settles at.
    #[must_use]
    pub fn steady_state(&self, events_per_cycle: f64) -> f64 {
        if self.is_disabled() {
            return 0.0;
        }
        self.increment_step * events_per_cycle / (1.0 - self.decay_factor)
    }
}

/// Per-sibling mutable danger state.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DangerState {
    pub risk: f64,
    /// First cycle at which `risk` exceeded [`UNSTABLE_LEVEL`].
    pub unstable_since: Option<Cycle>,
}

/// Owner of one sibling's [`DangerState`]. Single writer.
#[derive(Debug, Clone, Default)]
pub struct DangerTracker {
    rates: CalibratedRates,
    state: DangerState,
}

impl DangerTracker {
    #[must_use]
    pub fn new(rates: CalibratedRates) -> Self {
        Self {
            rates,
            state: DangerState::default(),
        }
    }

    #[must_use]
    pub fn rates(&self) -> CalibratedRates {
        self.rates
    }

    #[must_use]
    pub fn state(&self) -> DangerState {
        self.state
    }

    #[must_use]
    pub fn risk(&self) -> f64 {
        self.state.risk
    }

    /// Replace the rates, keeping the accumulated state.
    pub fn recalibrate(&mut self, rates: CalibratedRates) {
        self.rates = rates;
    }

    /// Decay, add this cycle's events, and mark instability.
    ///
    /// Returns `Some(cycle)` only on the cycle the sibling first becomes
    /// unstable. The mark is not acted on here; the group reduction acts on
    /// it one cycle later.
    pub fn update(&mut self, event_count: u64, cycle: Cycle) -> Option<Cycle> {
        self.state.risk =
            self.state.risk * self.rates.decay_factor + self.rates.increment_step * event_count as f64;

        if self.state.unstable_since.is_none() && self.state.risk > UNSTABLE_LEVEL {
            self.state.unstable_since = Some(cycle);
            return Some(cycle);
        }
        None
    }

    /// Back to zero risk and no instability mark.
    pub fn reset(&mut self) {
        self.state = DangerState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates(freq: f64, length_ms: f64, n: i64, cycle_ms: f64, siblings: usize) -> CalibratedRates {
        CalibratedRates::calibrate(
            &FuseParams::new(freq, length_ms, n),
            &RuntimeFacts::new(cycle_ms, siblings),
        )
        .unwrap()
    }

    #[test]
    fn disabled_when_any_threshold_is_zero() {
        for p in [
            FuseParams::new(0.0, 100.0, 5),
            FuseParams::new(10.0, 0.0, 5),
            FuseParams::new(10.0, 100.0, 0),
        ] {
            let r = CalibratedRates::calibrate(&p, &RuntimeFacts::new(1.0, 2)).unwrap();
            assert_eq!(r, CalibratedRates::DISABLED);
        }
    }

    #[test]
    fn disabled_tracker_never_grows() {
        let mut t = DangerTracker::new(CalibratedRates::DISABLED);
        for c in 0..1_000 {
            assert_eq!(t.update(1_000_000, Cycle::new(c)), None);
        }
        assert_eq!(t.risk(), 0.0);
        assert_eq!(t.state().unstable_since, None);
    }

    #[test]
    fn sub_cycle_window_is_a_configuration_error() {
        let err = CalibratedRates::calibrate(
            &FuseParams::new(10.0, 0.4, 5),
            &RuntimeFacts::new(1.0, 1),
        )
        .unwrap_err();
        assert!(matches!(err, FuseError::DegenerateCalibration { .. }));
    }

    #[test]
    fn vanishing_frequency_is_rejected_not_nan() {
        let err = CalibratedRates::calibrate(
            &FuseParams::new(1e-320, 100.0, 1),
            &RuntimeFacts::new(1.0, 1),
        )
        .unwrap_err();
        assert!(err.to_string().contains("frequency_thresh"), "{err}");
        assert!(err.is_user_recoverable());
    }

    #[test]
    fn endless_window_is_rejected_not_disabled() {
        let err = CalibratedRates::calibrate(
            &FuseParams::new(10.0, 1e20, 5),
            &RuntimeFacts::new(1.0, 1),
        )
        .unwrap_err();
        assert!(err.to_string().contains("length_thresh"), "{err}");
        assert!(err.is_user_recoverable());
    }

    #[test]
    fn window_rounds_to_nearest_cycle() {
        assert_eq!(rates(10.0, 0.5, 5, 1.0, 1).convergence_cycles, 1);
        assert_eq!(rates(10.0, 100.0, 5, 1.0, 1).convergence_cycles, 100);
        assert_eq!(rates(10.0, 100.0, 5, 0.3, 1).convergence_cycles, 333);
    }

    #[test]
    fn decay_matches_residual() {
        let r = rates(10.0, 100.0, 5, 1.0, 1);
        assert!((r.decay_factor.powi(100) - CONVERGENCE_RESIDUAL).abs() < 1e-12);
        assert!((0.0..1.0).contains(&r.decay_factor));
    }

    #[test]
    fn decay_without_input_is_geometric() {
        let r = rates(10.0, 100.0, 5, 1.0, 1);
        let mut t = DangerTracker::new(r);
        t.update(400, Cycle::ZERO);
        let r0 = t.risk();
        let mut prev = r0;
        for k in 1..=50 {
            t.update(0, Cycle::new(k));
            assert!(t.risk() < prev);
            let expected = r0 * r.decay_factor.powi(i32::try_from(k).unwrap());
            assert!((t.risk() - expected).abs() <= 1e-9 * r0);
            prev = t.risk();
        }
    }

    #[test]
    fn threshold_drive_settles_at_one() {
        // 1000 Hz x 5 sources x 1 ms = 5 spikes per cycle.
        let r = rates(1000.0, 100.0, 5, 1.0, 1);
        assert!((r.steady_state(5.0) - 1.0).abs() < 1e-12);
        let mut t = DangerTracker::new(r);
        for c in 0..2_000 {
            t.update(5, Cycle::new(c));
        }
        assert!((t.risk() - 1.0).abs() < 0.01, "risk={}", t.risk());
    }

    #[test]
    fn steady_state_accounts_for_siblings_and_cycle_length() {
        // 1000 Hz x 10 sources over 2 siblings x 0.5 ms = 2.5 spikes per sibling-cycle.
        let r = rates(1000.0, 100.0, 10, 0.5, 2);
        assert!((r.steady_state(2.5) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn threshold_drive_reaches_target_within_window() {
        let r = rates(1000.0, 100.0, 5, 1.0, 1);
        let target = 1.0 - CONVERGENCE_RESIDUAL;
        let mut t = DangerTracker::new(r);
        let mut reached = None;
        for c in 1..=200_u64 {
            t.update(5, Cycle::new(c));
            if reached.is_none() && t.risk() >= target - 1e-9 {
                reached = Some(c);
            }
        }
        let reached = reached.expect("threshold drive must converge");
        assert!((99..=101).contains(&reached), "reached at cycle {reached}");
    }

    #[test]
    fn instability_is_marked_once_with_first_cycle() {
        let r = rates(10.0, 100.0, 5, 1.0, 1);
        let mut t = DangerTracker::new(r);
        let mut marks = Vec::new();
        for c in 0..30 {
            if let Some(at) = t.update(50, Cycle::new(c)) {
                marks.push(at);
            }
        }
        assert_eq!(marks.len(), 1);
        assert_eq!(t.state().unstable_since, Some(marks[0]));
        // The mark survives the risk decaying back below the level.
        for c in 30..2_000 {
            t.update(0, Cycle::new(c));
        }
        assert!(t.risk() < UNSTABLE_LEVEL);
        assert_eq!(t.state().unstable_since, Some(marks[0]));
    }

    #[test]
    fn reset_clears_state_but_not_rates() {
        let r = rates(10.0, 100.0, 5, 1.0, 1);
        let mut t = DangerTracker::new(r);
        t.update(1_000, Cycle::new(1));
        t.reset();
        assert_eq!(t.state(), DangerState::default());
        assert_eq!(t.rates(), r);
    }
}
