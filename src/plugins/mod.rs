//! Plugin capability boundary
//!
//! The engine never loads plugin code itself. It asks a [`ScriptManager`] for
//! a [`Parser`] by name and calls it synchronously from a worker thread.
//! Everything a plugin can produce is expressed as [`ParseResult`] values.
//!
//! - [`registry`]: compiled-in [`PluginRegistry`] with per-plugin error budgets
//! - [`builtin`]: plugins shipped with the binary

pub mod builtin;
pub mod registry;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::models::{Catalog, ContentHash, ExecuteMode, ParseResult, Task};

pub use builtin::HeartbeatParser;
pub use registry::PluginRegistry;

/// Result type for plugin operations
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors raised at the plugin boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// No script is loaded under this name
    #[error("Plugin '{0}' not found")]
    NotFound(String),

    /// The script is loaded but exposes no parser
    #[error("Plugin '{0}' has no parser")]
    NoParser(String),

    /// The parser reported a runtime failure
    #[error("Plugin '{script}' failed: {message}")]
    Execution { script: String, message: String },

    /// The parser panicked
    #[error("Plugin '{script}' panicked: {message}")]
    Panicked { script: String, message: String },
}

impl PluginError {
    /// Create an execution failure
    pub fn execution(script: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            script: script.into(),
            message: message.into(),
        }
    }

    /// Missing plugin or capability, as opposed to a runtime failure
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::NoParser(_))
    }

    /// Name of the plugin involved
    pub fn script(&self) -> &str {
        match self {
            Self::NotFound(s) | Self::NoParser(s) => s,
            Self::Execution { script, .. } | Self::Panicked { script, .. } => script,
        }
    }
}

/// Indexing and execution logic for one monitored source
pub trait Parser: Send + Sync {
    /// Plugin name, also the owner of every entity it produces
    fn name(&self) -> &str;

    /// Initial catalog seeded when the plugin is (re)loaded
    fn catalog(&self) -> Catalog;

    /// Run one task and report what was found
    fn execute(&self, mode: ExecuteMode, task: &Task) -> PluginResult<Vec<ParseResult>>;
}

/// Source of loaded plugins
pub trait ScriptManager: Send + Sync {
    /// Parser for `name`, or `NotFound` / `NoParser`
    fn parser(&self, name: &str) -> PluginResult<Arc<dyn Parser>>;

    /// Content hash of every loaded script, used to detect code changes
    fn hashes(&self) -> HashMap<String, ContentHash>;

    /// Count a runtime failure; `true` if the plugin was unloaded as a result
    fn record_error(&self, name: &str) -> bool;
}
