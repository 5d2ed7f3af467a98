//! Thread engine
//!
//! - [`state`]: cooperative thread state machine
//! - [`runner`]: managed thread loop, handles and telemetry
//! - [`pipe`]: cleanup, plugin reindex and dispatch loop
//! - [`worker`]: catalog and target execution loops
//! - [`manager`]: supervisor keeping the pools at their configured size

pub mod manager;
pub mod pipe;
pub mod runner;
pub mod state;
pub mod worker;

pub use manager::{CoordinationLock, ThreadManager};
pub use pipe::{Pipe, ReindexReport};
pub use runner::{LoopBody, ThreadExit, ThreadHandle, ThreadKind, ThreadTelemetry};
pub use state::{StateCell, StateError, ThreadState};
pub use worker::{CatalogWorker, Worker};
