//! Time-indexed scheduling primitives
//!
//! This module provides the building blocks the resolver uses to decide
//! *when* work becomes eligible and *in which order* it is served.
//!
//! # Overview
//!
//! ```text
//!   insert ──▶ UniqueSchedule ──(due ≤ now)──▶ PriorityQueue ──▶ worker
//!               time → entity                  priority → entity
//!                    ▲
//!                    │ next time
//!              SmartGenerator (adaptive)
//! ```
//!
//! # Modules
//!
//! - [`schedule`] - Rounded float-keyed schedules with range queries
//! - [`smart`] - Converging candidate-time generators
//! - [`queue`] - Bounded min-priority queue with timed insertion
//! - [`error`] - Scheduler error type
//!
//! # Guarantees
//!
//! | Structure | Guarantee |
//! |-----------|-----------|
//! | `Schedule` | one value per rounded timestamp |
//! | `UniqueSchedule` | no two `==` values, whatever their time |
//! | `SmartGenerator` | strictly increasing, last candidate is the anchor |
//! | `PriorityQueue` | smallest priority first, FIFO among equals |

pub mod error;
pub mod queue;
pub mod schedule;
pub mod smart;

// Re-export main types
pub use error::{ScheduleError, SchedulerResult};
pub use queue::{PriorityQueue, QueueFull};
pub use schedule::{round_time, Schedule, TimeKey, TimeRange, UniqueSchedule};
pub use smart::{SmartGenerator, SmartPolicy, SmartSequence};
