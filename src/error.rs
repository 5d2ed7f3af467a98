//! Unified error handling for the lookout crate
//!
//! This module provides a unified error type that consolidates all domain-specific
//! errors into a single `Error` enum, while maintaining the ability to use
//! domain-specific errors when needed.
//!
//! # Architecture
//!
//! - [`LookoutErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use lookout::error::{Error, LookoutErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::debug!("Ignored: {err}");
//!     } else {
//!         tracing::error!("Fatal error: {err}");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::engine::state::StateError;
pub use crate::plugins::PluginError;
pub use crate::scheduler::error::ScheduleError;
pub use crate::storage::StorageError;

/// Common trait for all lookout error types
pub trait LookoutErrorTrait: std::error::Error {
    /// Check if this error is expected and must only be logged
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Schedule insertion and timing errors
    Schedule,
    /// Dedup storage errors
    Storage,
    /// Plugin lookup and runtime errors
    Plugin,
    /// Thread state machine, spawning and supervision errors
    Thread,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Storage => "storage",
            Self::Plugin => "plugin",
            Self::Thread => "thread",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the lookout crate
#[derive(Error, Debug)]
pub enum Error {
    /// Schedule insertion and timing errors
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// Dedup storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Plugin errors
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Thread state errors
    #[error("Thread state error: {0}")]
    State(#[from] StateError),

    /// Thread spawning and other OS errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl LookoutErrorTrait for ScheduleError {
    fn is_recoverable(&self) -> bool {
        ScheduleError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Schedule
    }
}

impl LookoutErrorTrait for StorageError {
    fn is_recoverable(&self) -> bool {
        StorageError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Storage
    }
}

impl LookoutErrorTrait for PluginError {
    fn is_recoverable(&self) -> bool {
        PluginError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Plugin
    }
}

impl LookoutErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Schedule(e) => e.is_recoverable(),
            Self::Storage(e) => e.is_recoverable(),
            Self::Plugin(e) => e.is_recoverable(),
            // Losing a race with a natural shutdown
            Self::State(_) => true,
            Self::Io(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Schedule(_) => ErrorCategory::Schedule,
            Self::Storage(_) => ErrorCategory::Storage,
            Self::Plugin(_) => ErrorCategory::Plugin,
            Self::State(_) | Self::Io(_) => ErrorCategory::Thread,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ThreadState;

    #[test]
    fn test_error_category() {
        let err = Error::from(ScheduleError::slot_occupied(1.0));
        assert_eq!(err.category(), ErrorCategory::Schedule);

        let err = Error::from(PluginError::NotFound("shop".into()));
        assert_eq!(err.category(), ErrorCategory::Plugin);
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::from(ScheduleError::duplicate(1.0)).is_recoverable());
        assert!(Error::from(PluginError::NoParser("shop".into())).is_recoverable());
        assert!(!Error::from(PluginError::execution("shop", "boom")).is_recoverable());
        assert!(!Error::from(ScheduleError::invalid_time(f64::NAN)).is_recoverable());
    }

    #[test]
    fn test_uniqueness_is_recoverable() {
        let err = Error::from(StorageError::Uniqueness {
            table: "announces".into(),
            hash: "00".into(),
        });
        assert!(err.is_recoverable());
        assert_eq!(err.category(), ErrorCategory::Storage);
    }

    #[test]
    fn test_state_error_conversion() {
        let err: Error = StateError::IllegalTransition {
            from: ThreadState::Pausing,
            to: ThreadState::Active,
        }
        .into();
        assert!(matches!(err, Error::State(_)));
        assert_eq!(err.category(), ErrorCategory::Thread);
    }

    #[test]
    fn test_thread_spawn_failure_is_fatal() {
        let err = Error::from(std::io::Error::other("no more threads"));
        assert_eq!(err.category(), ErrorCategory::Thread);
        assert!(!err.is_recoverable());

        let err = Error::with_source("failed to start the pipe", std::io::Error::other("limit"));
        assert_eq!(err.category(), ErrorCategory::Other);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_other_error() {
        let err = Error::other("Something went wrong");
        assert_eq!(err.category(), ErrorCategory::Other);
        assert_eq!(err.to_string(), "Something went wrong");
    }
}
