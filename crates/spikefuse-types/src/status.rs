//! Key/value status dictionaries.
//!
//! Configuration arrives and status leaves in the same shape: a JSON object
//! keyed by parameter name. The readers here type-check one key at a time
//! and report `TypeMismatch` instead of coercing.

use serde_json::{Map, Value};
use spikefuse_error::{FuseError, Result};

/// Generic key/value configuration and status record.
pub type StatusDict = Map<String, Value>;

/// Build a dictionary from `(key, value)` pairs.
pub fn status_dict<I, K>(pairs: I) -> StatusDict
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Read a floating-point key. Integers are accepted and widened.
pub fn read_f64(d: &StatusDict, key: &'static str) -> Result<Option<f64>> {
    match d.get(key) {
        None => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or(FuseError::TypeMismatch {
                key,
                expected: "a float",
            }),
        Some(_) => Err(FuseError::TypeMismatch {
            key,
            expected: "a float",
        }),
    }
}

/// Read an integer key. Floats are rejected, even integral ones.
pub fn read_i64(d: &StatusDict, key: &'static str) -> Result<Option<i64>> {
    match d.get(key) {
        None => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or(FuseError::TypeMismatch {
                key,
                expected: "an integer",
            }),
        Some(_) => Err(FuseError::TypeMismatch {
            key,
            expected: "an integer",
        }),
    }
}

/// Read an integer key where an explicit `null` means "unset".
pub fn read_opt_i64(d: &StatusDict, key: &'static str) -> Result<Option<Option<i64>>> {
    match d.get(key) {
        Some(Value::Null) => Ok(Some(None)),
        _ => read_i64(d, key).map(|v| v.map(Some)),
    }
}
