//! Configuration management for the lookout engine
//!
//! This module handles loading and validating configuration from environment variables
//! and TOML files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::MAX_HASH_LEVEL;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Thread supervision configuration
    pub engine: EngineConfig,

    /// Scheduling and dispatch configuration
    pub resolver: ResolverConfig,

    /// Dedup storage configuration
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Thread supervision configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Production mode isolates plugin failures; otherwise they crash the worker
    pub production: bool,

    /// Number of target workers
    pub workers: usize,

    /// Number of catalog workers
    pub catalog_workers: usize,

    /// Pipe tick period in milliseconds
    pub pipe_tick_ms: u64,

    /// Worker tick period in milliseconds
    pub worker_tick_ms: u64,

    /// Supervisor tick period in milliseconds
    pub manager_tick_ms: u64,

    /// Failed lock attempts before the supervisor lock is force-released
    pub lock_starvation_ticks: u32,

    /// Per-thread join timeout in milliseconds
    pub join_timeout_ms: u64,

    /// Runtime failures tolerated before a plugin is unloaded
    pub plugin_error_budget: u32,

    /// Period of the built-in heartbeat catalog in seconds
    pub heartbeat_secs: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            production: true,
            workers: 4,
            catalog_workers: 1,
            pipe_tick_ms: 100,
            worker_tick_ms: 50,
            manager_tick_ms: 500,
            lock_starvation_ticks: 10,
            join_timeout_ms: 2000,
            plugin_error_budget: 10,
            heartbeat_secs: 60.0,
        }
    }
}

/// Scheduling and dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Catalog queue capacity
    pub catalog_queue_size: usize,

    /// Target queue capacity
    pub target_queue_size: usize,

    /// Maximum wait for queue space during dispatch, in milliseconds
    pub dispatch_wait_ms: u64,

    /// Forward probes tried when a schedule slot is taken
    pub max_probe_attempts: u32,

    /// Probe increment in seconds
    pub probe_step: f64,

    /// Reuse counter wraps at this value
    pub reuse_cap: u32,

    /// Highest priority value a target can escalate to
    pub priority_ceiling: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            catalog_queue_size: 256,
            target_queue_size: 4096,
            dispatch_wait_ms: 100,
            max_probe_attempts: 100,
            probe_step: 0.0001,
            reuse_cap: 10,
            priority_ceiling: 99,
        }
    }
}

/// Dedup storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQL dump written on shutdown and read on startup
    pub dump_path: PathBuf,

    /// Binary snapshot path
    pub backup_path: PathBuf,

    /// Load the dump on startup when it exists
    pub restore_on_start: bool,

    /// Dedup window in seconds; older hashes are evicted
    pub retention_secs: u64,

    /// Hash level used for announce dedup (0-5)
    pub announce_hash_level: u8,

    /// Hash level used for release dedup (0-5)
    pub release_hash_level: u8,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dump_path: PathBuf::from("data/hash_storage.sql"),
            backup_path: PathBuf::from("data/hash_storage.db"),
            restore_on_start: true,
            retention_secs: 14 * 24 * 60 * 60,
            announce_hash_level: 5,
            release_hash_level: 1,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let engine = EngineConfig {
            production: env_parse("LOOKOUT_PRODUCTION").unwrap_or(defaults.engine.production),
            workers: env_parse("LOOKOUT_WORKERS").unwrap_or(defaults.engine.workers),
            catalog_workers: env_parse("LOOKOUT_CATALOG_WORKERS")
                .unwrap_or(defaults.engine.catalog_workers),
            pipe_tick_ms: env_parse("LOOKOUT_PIPE_TICK_MS").unwrap_or(defaults.engine.pipe_tick_ms),
            worker_tick_ms: env_parse("LOOKOUT_WORKER_TICK_MS")
                .unwrap_or(defaults.engine.worker_tick_ms),
            manager_tick_ms: env_parse("LOOKOUT_MANAGER_TICK_MS")
                .unwrap_or(defaults.engine.manager_tick_ms),
            ..defaults.engine
        };

        let resolver = ResolverConfig {
            catalog_queue_size: env_parse("LOOKOUT_CATALOG_QUEUE_SIZE")
                .unwrap_or(defaults.resolver.catalog_queue_size),
            target_queue_size: env_parse("LOOKOUT_TARGET_QUEUE_SIZE")
                .unwrap_or(defaults.resolver.target_queue_size),
            dispatch_wait_ms: env_parse("LOOKOUT_DISPATCH_WAIT_MS")
                .unwrap_or(defaults.resolver.dispatch_wait_ms),
            ..defaults.resolver
        };

        let storage = StorageConfig {
            dump_path: std::env::var("LOOKOUT_DUMP_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage.dump_path),
            backup_path: std::env::var("LOOKOUT_BACKUP_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage.backup_path),
            retention_secs: env_parse("LOOKOUT_RETENTION_SECS")
                .unwrap_or(defaults.storage.retention_secs),
            ..defaults.storage
        };

        let logging = LoggingConfig {
            level: std::env::var("LOOKOUT_LOG_LEVEL").unwrap_or(defaults.logging.level),
            format: std::env::var("LOOKOUT_LOG_FORMAT").unwrap_or(defaults.logging.format),
        };

        Ok(Self {
            engine,
            resolver,
            storage,
            logging,
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if engine.pipe_tick_ms == 0 || engine.worker_tick_ms == 0 || engine.manager_tick_ms == 0 {
            anyhow::bail!("tick periods must be greater than 0");
        }

        if engine.plugin_error_budget == 0 {
            anyhow::bail!("plugin_error_budget must be greater than 0");
        }

        if !(engine.heartbeat_secs.is_finite() && engine.heartbeat_secs > 0.0) {
            anyhow::bail!("heartbeat_secs must be positive");
        }

        if engine.lock_starvation_ticks == 0 {
            anyhow::bail!("lock_starvation_ticks must be greater than 0");
        }

        let resolver = &self.resolver;
        if resolver.catalog_queue_size == 0 || resolver.target_queue_size == 0 {
            anyhow::bail!("queue sizes must be greater than 0");
        }

        if !(resolver.probe_step.is_finite() && resolver.probe_step > 0.0) {
            anyhow::bail!("probe_step must be positive");
        }

        if resolver.reuse_cap == 0 {
            anyhow::bail!("reuse_cap must be greater than 0");
        }

        let storage = &self.storage;
        if storage.announce_hash_level > MAX_HASH_LEVEL
            || storage.release_hash_level > MAX_HASH_LEVEL
        {
            anyhow::bail!("hash levels must be between 0 and {MAX_HASH_LEVEL}");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("log format must be 'text' or 'json'");
        }

        Ok(())
    }

    /// Pipe tick period
    #[must_use]
    pub fn pipe_tick(&self) -> Duration {
        Duration::from_millis(self.engine.pipe_tick_ms)
    }

    /// Worker tick period
    #[must_use]
    pub fn worker_tick(&self) -> Duration {
        Duration::from_millis(self.engine.worker_tick_ms)
    }

    /// Supervisor tick period
    #[must_use]
    pub fn manager_tick(&self) -> Duration {
        Duration::from_millis(self.engine.manager_tick_ms)
    }

    /// Per-thread join timeout
    #[must_use]
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.join_timeout_ms)
    }

    /// Maximum wait for queue space during dispatch
    #[must_use]
    pub fn dispatch_wait(&self) -> Duration {
        Duration::from_millis(self.resolver.dispatch_wait_ms)
    }

    /// Dedup retention window in seconds
    #[must_use]
    pub fn retention(&self) -> f64 {
        self.storage.retention_secs as f64
    }
}
