//! Cooperative thread state machine
//!
//! Every managed thread carries a [`StateCell`]. Other threads *request*
//! transitions; the thread itself *advances* the two intermediate states at
//! the top of each tick.
//!
//! ```text
//!                 request          advance
//!   Uninitialized ──────▶ Active ─────────────────────────┐
//!                           │ request        ▲ advance    │
//!                           ▼                │            │
//!                        Pausing ──────▶ Paused ──▶ Resuming
//!                                 advance     request
//!
//!   Active, Paused, Uninitialized ──request──▶ Stopping (terminal)
//! ```
//!
//! `Pausing`, `Resuming` and `Stopping` are locked: every request made while
//! a cell is in one of them fails with [`StateError::IllegalTransition`].

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;
use thiserror::Error;

/// Lifecycle state of a managed thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ThreadState {
    Uninitialized = 0,
    Active = 1,
    Pausing = 2,
    Paused = 3,
    Resuming = 4,
    Stopping = 5,
}

impl ThreadState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Active,
            2 => Self::Pausing,
            3 => Self::Paused,
            4 => Self::Resuming,
            _ => Self::Stopping,
        }
    }

    /// Numeric state code
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Active => "active",
            Self::Pausing => "pausing",
            Self::Paused => "paused",
            Self::Resuming => "resuming",
            Self::Stopping => "stopping",
        }
    }

    /// Whether requests are refused until the owning loop moves on
    pub fn is_locked(self) -> bool {
        matches!(self, Self::Pausing | Self::Resuming | Self::Stopping)
    }

    /// Whether an external request may move `self` to `to`
    pub fn can_transition_to(self, to: ThreadState) -> bool {
        matches!(
            (self, to),
            (Self::Uninitialized, Self::Active | Self::Stopping)
                | (Self::Active, Self::Pausing | Self::Stopping)
                | (Self::Paused, Self::Resuming | Self::Stopping)
        )
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.code())
    }
}

/// Thread state errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    /// The requested move is not in the transition table
    #[error("Illegal thread state transition {from} -> {to}")]
    IllegalTransition { from: ThreadState, to: ThreadState },
}

/// Atomically updated thread state
#[derive(Debug)]
pub struct StateCell {
    state: AtomicU8,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(ThreadState::Uninitialized)
    }
}

impl StateCell {
    /// Create a cell in `state`
    pub fn new(state: ThreadState) -> Self {
        Self {
            state: AtomicU8::new(state.code()),
        }
    }

    /// Current state
    pub fn get(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn swap_if(&self, from: ThreadState, to: ThreadState) -> Result<(), ThreadState> {
        self.state
            .compare_exchange(from.code(), to.code(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ThreadState::from_u8)
    }

    /// Request a transition; returns the state it replaced
    pub fn request(&self, to: ThreadState) -> Result<ThreadState, StateError> {
        let mut current = self.get();
        loop {
            if !current.can_transition_to(to) {
                return Err(StateError::IllegalTransition { from: current, to });
            }
            match self.swap_if(current, to) {
                Ok(()) => return Ok(current),
                Err(actual) => current = actual,
            }
        }
    }

    /// Complete a pending pause or resume; returns the resulting state
    ///
    /// Only the owning loop calls this.
    pub fn advance(&self) -> ThreadState {
        loop {
            let current = self.get();
            let next = match current {
                ThreadState::Pausing => ThreadState::Paused,
                ThreadState::Resuming => ThreadState::Active,
                other => return other,
            };
            if self.swap_if(current, next).is_ok() {
                return next;
            }
        }
    }

    /// Enter the terminal state unconditionally; used when the loop exits
    pub fn terminate(&self) {
        self.state
            .store(ThreadState::Stopping.code(), Ordering::Release);
    }
}
