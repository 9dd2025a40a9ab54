//! Parameter records.
//!
//! `FuseParams` and `ActiveWindow` are set at configuration time and are
//! immutable while a run is in progress. Both follow the same update
//! discipline: `set` builds a complete candidate from the current values plus
//! the supplied keys and validates it, so a rejected update never touches
//! the committed record.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use spikefuse_error::{FuseError, Result};

use crate::glossary::Cycle;
use crate::status::{StatusDict, read_f64, read_i64, read_opt_i64};

pub const KEY_FREQUENCY_THRESH: &str = "frequency_thresh";
pub const KEY_LENGTH_THRESH: &str = "length_thresh";
pub const KEY_N_CONNECTED_NEURONS: &str = "n_connected_neurons";
pub const KEY_ORIGIN: &str = "origin";
pub const KEY_START: &str = "start";
pub const KEY_STOP: &str = "stop";

/// User thresholds of the instability monitor.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FuseParams {
    /// Per-source firing rate (Hz) at which risk settles at exactly 1.
    pub frequency_thresh: f64,
    /// Time (ms) over which sustained threshold firing converges.
    pub length_thresh: f64,
    /// Number of upstream sources feeding the monitor.
    pub n_connected_neurons: i64,
}

impl FuseParams {
    #[must_use]
    pub const fn new(frequency_thresh: f64, length_thresh: f64, n_connected_neurons: i64) -> Self {
        Self {
            frequency_thresh,
            length_thresh,
            n_connected_neurons,
        }
    }

    /// Reject negative or non-finite values, naming every offending field.
    pub fn validate(&self) -> Result<()> {
        let mut fields = Vec::new();
        if !(self.frequency_thresh.is_finite() && self.frequency_thresh >= 0.0) {
            fields.push(KEY_FREQUENCY_THRESH);
        }
        if !(self.length_thresh.is_finite() && self.length_thresh >= 0.0) {
            fields.push(KEY_LENGTH_THRESH);
        }
        if self.n_connected_neurons < 0 {
            fields.push(KEY_N_CONNECTED_NEURONS);
        }
        if fields.is_empty() {
            Ok(())
        } else {
            Err(FuseError::bad_parameter(
                fields,
                "length_thresh, frequency_thresh, and n_connected_neurons must be non-negative",
            ))
        }
    }

    /// A zero in any field switches the monitor off.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.frequency_thresh == 0.0 || self.length_thresh == 0.0 || self.n_connected_neurons == 0
    }

    /// Validated candidate built from `self` overlaid with the keys in `d`.
    pub fn set(&self, d: &StatusDict) -> Result<Self> {
        let mut candidate = *self;
        if let Some(v) = read_f64(d, KEY_FREQUENCY_THRESH)? {
            candidate.frequency_thresh = v;
        }
        if let Some(v) = read_f64(d, KEY_LENGTH_THRESH)? {
            candidate.length_thresh = v;
        }
        if let Some(v) = read_i64(d, KEY_N_CONNECTED_NEURONS)? {
            candidate.n_connected_neurons = v;
        }
        candidate.validate()?;
        Ok(candidate)
    }

    /// Store current values in `d`.
    pub fn get(&self, d: &mut StatusDict) {
        d.insert(KEY_FREQUENCY_THRESH.into(), self.frequency_thresh.into());
        d.insert(KEY_LENGTH_THRESH.into(), self.length_thresh.into());
        d.insert(KEY_N_CONNECTED_NEURONS.into(), self.n_connected_neurons.into());
    }
}

/// Facts about the host supplied at calibration time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuntimeFacts {
    /// Simulation time covered by one cycle, in milliseconds.
    pub cycle_duration_ms: f64,
    /// Number of siblings sharing the monitor's identity.
    pub sibling_count: usize,
}

impl RuntimeFacts {
    #[must_use]
    pub const fn new(cycle_duration_ms: f64, sibling_count: usize) -> Self {
        Self {
            cycle_duration_ms,
            sibling_count,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.cycle_duration_ms.is_finite() && self.cycle_duration_ms > 0.0) {
            return Err(FuseError::invalid_runtime(format!(
                "cycle duration must be positive, got {} ms",
                self.cycle_duration_ms
            )));
        }
        if self.sibling_count == 0 {
            return Err(FuseError::invalid_runtime("sibling group is empty"));
        }
        Ok(())
    }
}

/// Window of event stamps the monitor accepts.
///
/// An event stamped `t` is accepted iff `origin + start <= t < origin + stop`;
/// `stop = None` leaves the window open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActiveWindow {
    pub origin: u64,
    pub start: u64,
    pub stop: Option<u64>,
}

impl ActiveWindow {
    /// Window accepting every stamp.
    pub const ALWAYS: Self = Self {
        origin: 0,
        start: 0,
        stop: None,
    };

    #[must_use]
    pub fn is_active(&self, stamp: Cycle) -> bool {
        let t = stamp.get();
        let lo = self.origin.saturating_add(self.start);
        match self.stop {
            Some(stop) => lo <= t && t < self.origin.saturating_add(stop),
            None => lo <= t,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.stop {
            Some(stop) if stop < self.start => Err(FuseError::bad_parameter(
                vec![KEY_STOP],
                format!("stop ({stop}) must not precede start ({})", self.start),
            )),
            _ => Ok(()),
        }
    }

    /// Validated candidate built from `self` overlaid with the keys in `d`.
    pub fn set(&self, d: &StatusDict) -> Result<Self> {
        fn non_negative(key: &'static str, v: i64) -> Result<u64> {
            u64::try_from(v).map_err(|_| {
                FuseError::bad_parameter(vec![key], format!("{key} must be non-negative, got {v}"))
            })
        }

        let mut candidate = *self;
        if let Some(v) = read_i64(d, KEY_ORIGIN)? {
            candidate.origin = non_negative(KEY_ORIGIN, v)?;
        }
        if let Some(v) = read_i64(d, KEY_START)? {
            candidate.start = non_negative(KEY_START, v)?;
        }
        if let Some(v) = read_opt_i64(d, KEY_STOP)? {
            candidate.stop = v.map(|s| non_negative(KEY_STOP, s)).transpose()?;
        }
        candidate.validate()?;
        Ok(candidate)
    }

    pub fn get(&self, d: &mut StatusDict) {
        d.insert(KEY_ORIGIN.into(), self.origin.into());
        d.insert(KEY_START.into(), self.start.into());
        d.insert(
            KEY_STOP.into(),
            self.stop.map_or(Value::Null, Value::from),
        );
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::status::status_dict;

    #[test]
    fn defaults_are_disabled() {
        let p = FuseParams::default();
        assert!(p.validate().is_ok());
        assert!(p.is_disabled());
    }

    #[test]
    fn any_zero_disables() {
        assert!(!FuseParams::new(10.0, 100.0, 5).is_disabled());
        assert!(FuseParams::new(0.0, 100.0, 5).is_disabled());
        assert!(FuseParams::new(10.0, 0.0, 5).is_disabled());
        assert!(FuseParams::new(10.0, 100.0, 0).is_disabled());
    }

    #[test]
    fn set_rejects_negative_and_keeps_original() {
        let current = FuseParams::new(10.0, 100.0, 5);
        let d = status_dict([("frequency_thresh", json!(-0.1))]);
        let err = current.set(&d).unwrap_err();
        match err {
            FuseError::BadParameter { fields, .. } => {
                assert_eq!(fields, vec!["frequency_thresh"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(current, FuseParams::new(10.0, 100.0, 5));
    }

    #[test]
    fn set_names_every_invalid_field() {
        let d = status_dict([
            ("frequency_thresh", json!(-1.0)),
            ("length_thresh", json!(-2.0)),
            ("n_connected_neurons", json!(-3)),
        ]);
        let err = FuseParams::default().set(&d).unwrap_err();
        assert!(matches!(err, FuseError::BadParameter { ref fields, .. } if fields.len() == 3));
        assert!(err.to_string().contains("n_connected_neurons"));
    }

    #[test]
    fn set_partial_update_keeps_other_fields() {
        let current = FuseParams::new(10.0, 100.0, 5);
        let d = status_dict([("length_thresh", json!(200))]);
        let next = current.set(&d).unwrap();
        assert_eq!(next, FuseParams::new(10.0, 200.0, 5));
    }

    #[test]
    fn set_rejects_wrong_types() {
        let d = status_dict([("n_connected_neurons", json!(2.5))]);
        assert!(matches!(
            FuseParams::default().set(&d),
            Err(FuseError::TypeMismatch {
                key: "n_connected_neurons",
                ..
            })
        ));
    }

    #[test]
    fn get_round_trips_through_set() {
        let p = FuseParams::new(60.0, 200.0, 800);
        let mut d = StatusDict::new();
        p.get(&mut d);
        assert_eq!(d["frequency_thresh"], json!(60.0));
        assert_eq!(d["n_connected_neurons"], json!(800));
        assert_eq!(FuseParams::default().set(&d).unwrap(), p);
    }

    #[test]
    fn runtime_facts_validation() {
        assert!(RuntimeFacts::new(1.0, 4).validate().is_ok());
        assert!(RuntimeFacts::new(0.0, 4).validate().is_err());
        assert!(RuntimeFacts::new(f64::NAN, 4).validate().is_err());
        assert!(RuntimeFacts::new(1.0, 0).validate().is_err());
    }

    #[test]
    fn window_bounds() {
        let w = ActiveWindow {
            origin: 10,
            start: 5,
            stop: Some(20),
        };
        assert!(!w.is_active(Cycle::new(14)));
        assert!(w.is_active(Cycle::new(15)));
        assert!(w.is_active(Cycle::new(29)));
        assert!(!w.is_active(Cycle::new(30)));
        assert!(ActiveWindow::ALWAYS.is_active(Cycle::ZERO));
    }

    #[test]
    fn window_set_validates_ordering() {
        let d = status_dict([("start", json!(10)), ("stop", json!(5))]);
        let err = ActiveWindow::ALWAYS.set(&d).unwrap_err();
        assert!(matches!(err, FuseError::BadParameter { ref fields, .. } if fields == &["stop"]));

        let d = status_dict([("stop", Value::Null), ("start", json!(3))]);
        let w = ActiveWindow {
            origin: 0,
            start: 0,
            stop: Some(9),
        }
        .set(&d)
        .unwrap();
        assert_eq!(w.stop, None);
        assert_eq!(w.start, 3);
    }
}
