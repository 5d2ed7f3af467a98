//! Error types for the scheduler module

use std::fmt;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, ScheduleError>;

/// Scheduler-specific errors
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleError {
    /// Time key is NaN or infinite
    InvalidTime {
        time: f64,
    },

    /// An equal value is already scheduled
    Duplicate {
        existing: f64,
    },

    /// Another value already occupies the rounded time slot
    SlotOccupied {
        time: f64,
    },

    /// Smart generator parameters are out of range
    InvalidGenerator {
        reason: String,
    },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTime { time } => {
                write!(f, "Invalid schedule time '{}'. Must be a finite number", time)
            }
            Self::Duplicate { existing } => {
                write!(f, "Equal value already scheduled at {}", existing)
            }
            Self::SlotOccupied { time } => {
                write!(f, "Schedule slot {} is already occupied", time)
            }
            Self::InvalidGenerator { reason } => {
                write!(f, "Invalid smart generator: {}", reason)
            }
        }
    }
}

impl std::error::Error for ScheduleError {}

impl ScheduleError {
    /// Create an invalid time error
    pub fn invalid_time(time: f64) -> Self {
        Self::InvalidTime { time }
    }

    /// Create a duplicate value error
    pub fn duplicate(existing: f64) -> Self {
        Self::Duplicate { existing }
    }

    /// Create a slot occupied error
    pub fn slot_occupied(time: f64) -> Self {
        Self::SlotOccupied { time }
    }

    /// Create an invalid generator error
    pub fn invalid_generator(reason: impl Into<String>) -> Self {
        Self::InvalidGenerator {
            reason: reason.into(),
        }
    }

    /// Check if the error is recoverable
    ///
    /// Duplicates and collisions are expected under normal operation and are
    /// logged by callers; malformed input is not.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Duplicate { .. } | Self::SlotOccupied { .. })
    }

    /// Short machine-readable reason, used as a metrics label
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidTime { .. } => "invalid_time",
            Self::Duplicate { .. } => "duplicate",
            Self::SlotOccupied { .. } => "slot_occupied",
            Self::InvalidGenerator { .. } => "invalid_generator",
        }
    }
}
