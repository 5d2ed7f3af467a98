//! lookout - plugin-driven monitoring engine
//!
//! Plugins describe what to watch (catalogs) and what they found (targets,
//! items, messages). The engine schedules their work on adaptive timelines,
//! runs it on supervised worker threads and drops everything it has already
//! reported.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Catalogs, targets, items and content hashes
//! - [`scheduler`] - Time-keyed schedules, bounded priority queue, smart timelines
//! - [`storage`] - SQLite-backed dedup hash storage with dump and backup
//! - [`plugins`] - Parser and script manager boundary, built-in plugins
//! - [`resolver`] - Scheduling, dispatch and execution of plugin work
//! - [`engine`] - Thread state machine, pipe, workers and supervisor
//! - [`events`] - Alerts and results delivered to listeners
//! - [`metrics`] - Prometheus counters and gauges
//! - [`utils`] - Clocks and small helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lookout::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let clock = SystemClock::shared();
//!     let storage = Arc::new(HashStorage::from_config(&config.storage, clock.clone())?);
//!     let events = Arc::new(EventHandler::spawn(vec![Box::new(TracingListener)])?);
//!     let registry = Arc::new(PluginRegistry::new(config.engine.plugin_error_budget));
//!     let resolver = Arc::new(Resolver::new(&config, clock.clone(), registry, storage, events));
//!
//!     let manager = Arc::new(ThreadManager::new(&config, resolver, clock));
//!     manager.start()?;
//!     // ...
//!     manager.close();
//!     manager.join()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod metrics;
pub mod models;
pub mod plugins;
pub mod resolver;
pub mod scheduler;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::engine::{ThreadManager, ThreadState};
    pub use crate::error::{Error, ErrorCategory, LookoutErrorTrait, Result};
    pub use crate::events::{Event, EventHandler, Listener, TracingListener};
    pub use crate::models::{Catalog, ExecuteMode, Item, ParseResult, Target, Task, Timing};
    pub use crate::plugins::{Parser, PluginRegistry, ScriptManager};
    pub use crate::resolver::Resolver;
    pub use crate::storage::HashStorage;
    pub use crate::utils::{Clock, SystemClock};
}

// Direct re-exports for convenience
pub use models::{Catalog, ExecuteMode, Item, ParseResult, Target, Task, Timing};
