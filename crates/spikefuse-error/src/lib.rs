use thiserror::Error;

/// Fixed diagnostic carried by the instability fault.
pub const UNSTABLE_SPIKING_MESSAGE: &str =
    "The Network seems to be in a regime of unstable spiking, terminating simulation";

/// Primary error type for spikefuse operations.
///
/// Configuration problems are recovered locally by the caller. The
/// instability fault is the one condition meant to reach the host and end
/// the run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FuseError {
    // === Configuration Errors ===
    /// A reconfiguration carried out-of-range values.
    #[error("BadParameter: {detail} (rejected: {})", .fields.join(", "))]
    BadParameter {
        fields: Vec<&'static str>,
        detail: String,
    },

    /// A status dictionary key held a value of the wrong type.
    #[error("TypeMismatch: key '{key}' expects {expected}")]
    TypeMismatch {
        key: &'static str,
        expected: &'static str,
    },

    /// The convergence window rounds to zero whole cycles.
    #[error(
        "DegenerateCalibration: length_thresh {length_thresh} ms spans less than one cycle of {cycle_duration_ms} ms"
    )]
    DegenerateCalibration {
        length_thresh: f64,
        cycle_duration_ms: f64,
    },

    /// The host supplied unusable runtime facts (cycle duration, sibling count).
    #[error("InvalidRuntime: {detail}")]
    InvalidRuntime { detail: String },

    /// A lifecycle operation was attempted in the wrong phase.
    #[error("InvalidPhase: cannot {operation} while {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: &'static str,
    },

    // === Caller Contract Violations ===
    /// An event with a non-positive multiplicity reached the buffer.
    #[error("InvalidMultiplicity: event multiplicity must be positive, got {multiplicity}")]
    InvalidMultiplicity { multiplicity: i64 },

    // === Fatal Conditions ===
    /// The group agreed to abort. Fatal and non-resumable.
    #[error("UnstableSpiking: {}", UNSTABLE_SPIKING_MESSAGE)]
    UnstableSpiking {
        /// Cycle at which every sibling aborted.
        cycle: u64,
        /// Earliest cycle at which any sibling crossed the danger threshold.
        trigger_cycle: u64,
    },

    // === Host Errors ===
    /// Siblings disagreed on whether or when to abort.
    #[error("PartialAbort: {aborted} of {siblings} siblings aborted at cycle {cycle}")]
    PartialAbort {
        cycle: u64,
        aborted: usize,
        siblings: usize,
    },

    /// Another participant left the cycle barrier while this one waited.
    #[error("BarrierAbandoned: cycle barrier abandoned at cycle {cycle}")]
    BarrierAbandoned { cycle: u64 },

    /// Internal logic error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Numeric error codes, stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Successful result.
    Ok = 0,
    /// Rejected configuration.
    Config = 1,
    /// Internal logic error.
    Internal = 2,
    /// Caller broke an API contract.
    Misuse = 3,
    /// Instability detected; run terminated.
    Unstable = 4,
    /// Host coordination failure.
    Host = 5,
}

impl FuseError {
    /// Map this error to its numeric code.
    #[allow(clippy::match_same_arms)]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::BadParameter { .. }
            | Self::TypeMismatch { .. }
            | Self::DegenerateCalibration { .. }
            | Self::InvalidRuntime { .. } => ErrorCode::Config,
            Self::InvalidPhase { .. } | Self::InvalidMultiplicity { .. } => ErrorCode::Misuse,
            Self::UnstableSpiking { .. } => ErrorCode::Unstable,
            Self::PartialAbort { .. } | Self::BarrierAbandoned { .. } => ErrorCode::Host,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether the run must terminate. Nothing can be retried after this.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnstableSpiking { .. } | Self::PartialAbort { .. } | Self::BarrierAbandoned { .. }
        )
    }

    /// Whether the user can likely fix this by changing the configuration.
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::BadParameter { .. }
                | Self::TypeMismatch { .. }
                | Self::DegenerateCalibration { .. }
                | Self::InvalidRuntime { .. }
        )
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::BadParameter { .. } => {
                Some("frequency_thresh, length_thresh and n_connected_neurons must be non-negative")
            }
            Self::DegenerateCalibration { .. } => {
                Some("Raise length_thresh to at least one cycle duration")
            }
            Self::UnstableSpiking { .. } => {
                Some("Lower the input drive or raise frequency_thresh; the run cannot be resumed")
            }
            Self::PartialAbort { .. } => {
                Some("Abort decisions must come from the group reduction, not a single sibling")
            }
            _ => None,
        }
    }

    /// Get the process exit code for this error (for CLI use).
    pub const fn exit_code(&self) -> i32 {
        self.error_code() as i32
    }

    /// Create a parameter rejection.
    pub fn bad_parameter(fields: Vec<&'static str>, detail: impl Into<String>) -> Self {
        Self::BadParameter {
            fields,
            detail: detail.into(),
        }
    }

    /// Create a runtime-facts rejection.
    pub fn invalid_runtime(detail: impl Into<String>) -> Self {
        Self::InvalidRuntime {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using `FuseError`.
pub type Result<T> = std::result::Result<T, FuseError>;
