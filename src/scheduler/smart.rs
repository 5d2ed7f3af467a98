//! Converging time generators for adaptive polling
//!
//! A [`SmartGenerator`] is anchored on a target instant `T` (a drop, a release,
//! a restock window) and yields a finite, strictly increasing sequence of
//! candidate poll times whose last element is exactly `T`.
//!
//! ```text
//!  exponential:  T-b^4      T-b^3    T-b^2  T-b  T
//!                 |----------|--------|------|----|
//!  linear:       T-4s   T-3s   T-2s   T-s    T
//!                 |------|------|------|------|
//! ```

use serde::{Deserialize, Serialize};

use super::error::{ScheduleError, SchedulerResult};

/// Spacing policy of the candidate sequence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SmartPolicy {
    /// `T - base^i`: coarse early polls, dense polls near the anchor
    Exponential { base: f64 },
    /// `T - step * i`: evenly spaced polls
    Linear { step: f64 },
}

impl SmartPolicy {
    fn offset(&self, i: u32) -> f64 {
        match *self {
            Self::Exponential { base } => base.powi(i32::try_from(i).unwrap_or(i32::MAX)),
            Self::Linear { step } => step * f64::from(i),
        }
    }
}

/// Generator of candidate times converging on an anchor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmartGenerator {
    anchor: f64,
    length: u32,
    #[serde(flatten)]
    policy: SmartPolicy,
}

impl SmartGenerator {
    /// Exponential generator; `base` must be greater than 1
    pub fn exponential(anchor: f64, length: u32, base: f64) -> SchedulerResult<Self> {
        if !(base.is_finite() && base > 1.0) {
            return Err(ScheduleError::invalid_generator(format!(
                "exponential base must be a finite number greater than 1, got {base}"
            )));
        }
        Self::build(anchor, length, SmartPolicy::Exponential { base })
    }

    /// Linear generator; `step` must be positive
    pub fn linear(anchor: f64, length: u32, step: f64) -> SchedulerResult<Self> {
        if !(step.is_finite() && step > 0.0) {
            return Err(ScheduleError::invalid_generator(format!(
                "linear step must be a finite positive number, got {step}"
            )));
        }
        Self::build(anchor, length, SmartPolicy::Linear { step })
    }

    fn build(anchor: f64, length: u32, policy: SmartPolicy) -> SchedulerResult<Self> {
        if !anchor.is_finite() {
            return Err(ScheduleError::invalid_generator(format!(
                "anchor must be finite, got {anchor}"
            )));
        }
        Ok(Self {
            anchor,
            length,
            policy,
        })
    }

    /// Anchor time `T`
    pub fn anchor(&self) -> f64 {
        self.anchor
    }

    /// Number of candidates produced by [`generate`](Self::generate), at least 1
    pub fn length(&self) -> u32 {
        self.length.max(1)
    }

    /// Spacing policy
    pub fn policy(&self) -> SmartPolicy {
        self.policy
    }

    /// Lazy candidate sequence, strictly increasing and ending at the anchor
    pub fn generate(&self) -> SmartSequence {
        SmartSequence {
            anchor: self.anchor,
            policy: self.policy,
            next_exponent: self.length.saturating_sub(1),
            finished: false,
        }
    }

    /// First candidate strictly after `now`, or the anchor once `now >= T`
    pub fn extract(&self, now: f64) -> f64 {
        self.generate()
            .find(|&candidate| candidate > now)
            .unwrap_or(self.anchor)
    }

    /// Whether the adaptive window is exhausted at `now`
    pub fn is_exhausted(&self, now: f64) -> bool {
        now >= self.anchor
    }
}

/// Iterator returned by [`SmartGenerator::generate`]
#[derive(Debug, Clone)]
pub struct SmartSequence {
    anchor: f64,
    policy: SmartPolicy,
    next_exponent: u32,
    finished: bool,
}

impl Iterator for SmartSequence {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if self.finished {
            return None;
        }
        if self.next_exponent == 0 {
            self.finished = true;
            return Some(self.anchor);
        }
        let candidate = self.anchor - self.policy.offset(self.next_exponent);
        self.next_exponent -= 1;
        Some(candidate)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.finished {
            0
        } else {
            self.next_exponent as usize + 1
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SmartSequence {}
