//! Compiled-in plugin registry

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{Parser, PluginError, PluginResult, ScriptManager};
use crate::models::ContentHash;

struct Script {
    hash: ContentHash,
    version: String,
    parser: Option<Arc<dyn Parser>>,
    errors: u32,
}

fn script_hash(name: &str, version: &str) -> ContentHash {
    ContentHash::of(format!("{name}\0{version}").as_bytes())
}

/// Registry of loaded scripts, keyed by name
///
/// Registering a name again replaces the script; a new version changes its
/// content hash, which the pipe picks up as a code change.
pub struct PluginRegistry {
    scripts: RwLock<HashMap<String, Script>>,
    error_budget: u32,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("scripts", &self.names())
            .field("error_budget", &self.error_budget)
            .finish()
    }
}

impl PluginRegistry {
    /// Create an empty registry; plugins are unloaded after `error_budget` failures
    pub fn new(error_budget: u32) -> Self {
        Self {
            scripts: RwLock::new(HashMap::new()),
            error_budget: error_budget.max(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Script>> {
        self.scripts.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Script>> {
        self.scripts.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(&self, name: String, version: &str, parser: Option<Arc<dyn Parser>>) -> ContentHash {
        let hash = script_hash(&name, version);
        tracing::info!(script = %name, version, parser = parser.is_some(), "Plugin registered");
        self.write().insert(
            name,
            Script {
                hash,
                version: version.to_string(),
                parser,
                errors: 0,
            },
        );
        hash
    }

    /// Load `parser` under its own name
    pub fn register(&self, parser: Arc<dyn Parser>, version: &str) -> ContentHash {
        let name = parser.name().to_string();
        self.insert(name, version, Some(parser))
    }

    /// Load a script that exposes no parser
    pub fn register_stub(&self, name: impl Into<String>, version: &str) -> ContentHash {
        self.insert(name.into(), version, None)
    }

    /// Unload a script; `true` if it was loaded
    pub fn unload(&self, name: &str) -> bool {
        let removed = self.write().remove(name).is_some();
        if removed {
            tracing::info!(script = %name, "Plugin unloaded");
        }
        removed
    }

    /// Names of loaded scripts, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Loaded version of `name`
    pub fn version(&self, name: &str) -> Option<String> {
        self.read().get(name).map(|s| s.version.clone())
    }

    /// Failures recorded against `name` since it was loaded
    pub fn error_count(&self, name: &str) -> Option<u32> {
        self.read().get(name).map(|s| s.errors)
    }

    /// Number of loaded scripts
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no script is loaded
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl ScriptManager for PluginRegistry {
    fn parser(&self, name: &str) -> PluginResult<Arc<dyn Parser>> {
        let scripts = self.read();
        let script = scripts
            .get(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        script
            .parser
            .clone()
            .ok_or_else(|| PluginError::NoParser(name.to_string()))
    }

    fn hashes(&self) -> HashMap<String, ContentHash> {
        self.read()
            .iter()
            .map(|(name, script)| (name.clone(), script.hash))
            .collect()
    }

    fn record_error(&self, name: &str) -> bool {
        let mut scripts = self.write();
        let Some(script) = scripts.get_mut(name) else {
            return false;
        };
        script.errors += 1;
        if script.errors < self.error_budget {
            return false;
        }

        let errors = script.errors;
        scripts.remove(name);
        tracing::error!(script = %name, errors, "Plugin exceeded its error budget and was unloaded");
        true
    }
}
