//! Plugins shipped with the binary

use std::sync::Arc;

use super::{Parser, PluginRegistry, PluginResult};
use crate::models::{Catalog, ExecuteMode, Message, ParseResult, Task, Timing};

/// Name of the heartbeat plugin
pub const HEARTBEAT: &str = "heartbeat";

/// Liveness plugin: every catalog run emits a message and reschedules itself
#[derive(Debug, Clone)]
pub struct HeartbeatParser {
    period: f64,
}

impl HeartbeatParser {
    /// Beat every `period` seconds
    pub fn new(period: f64) -> Self {
        Self { period }
    }
}

impl Parser for HeartbeatParser {
    fn name(&self) -> &str {
        HEARTBEAT
    }

    fn catalog(&self) -> Catalog {
        Catalog::new(HEARTBEAT, Timing::interval(self.period))
    }

    fn execute(&self, mode: ExecuteMode, task: &Task) -> PluginResult<Vec<ParseResult>> {
        match (mode, task) {
            (ExecuteMode::Catalog, Task::Catalog(catalog)) => Ok(vec![
                Message::new(HEARTBEAT, format!("alive, next beat in {}s", self.period)).into(),
                catalog.clone().into(),
            ]),
            _ => Ok(Vec::new()),
        }
    }
}

/// Registry preloaded with the built-in plugins
pub fn builtin_registry(error_budget: u32, heartbeat_secs: f64) -> PluginRegistry {
    let registry = PluginRegistry::new(error_budget);
    registry.register(
        Arc::new(HeartbeatParser::new(heartbeat_secs)),
        env!("CARGO_PKG_VERSION"),
    );
    registry
}
