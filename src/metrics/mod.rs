//! Prometheus metrics for the lookout engine
//!
//! This module provides metrics tracking for:
//! - Resolver: executions, lost tasks, schedule rejections, dedup hits, queue depth
//! - Plugins: runtime failures per script
//! - Supervisor: thread restarts and exits
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for scheduling and dispatch metrics
struct ResolverMetrics {
    executions: CounterVec,
    execution_duration: HistogramVec,
    lost_tasks: CounterVec,
    schedule_rejections: CounterVec,
    dedup_hits: CounterVec,
    queue_depth: GaugeVec,
}

/// Container for plugin and thread metrics
struct EngineMetrics {
    plugin_failures: CounterVec,
    thread_exits: CounterVec,
    live_threads: GaugeVec,
}

/// Global storage for resolver metrics
static RESOLVER_METRICS: OnceLock<ResolverMetrics> = OnceLock::new();

/// Global storage for engine metrics
static ENGINE_METRICS: OnceLock<EngineMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, errors are logged and subsequent
/// metric operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = lookout::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Prevent double initialization
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let resolver = ResolverMetrics {
        executions: register_counter_vec!(
            "lookout_executions_total",
            "Task executions by mode and outcome",
            &["mode", "outcome"]
        )?,
        execution_duration: register_histogram_vec!(
            "lookout_execution_duration_seconds",
            "Plugin execution time in seconds",
            &["mode"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        )?,
        lost_tasks: register_counter_vec!(
            "lookout_lost_tasks_total",
            "Tasks dropped because a queue or schedule had no room",
            &["queue"]
        )?,
        schedule_rejections: register_counter_vec!(
            "lookout_schedule_rejections_total",
            "Schedule insertions rejected, by reason",
            &["schedule", "reason"]
        )?,
        dedup_hits: register_counter_vec!(
            "lookout_dedup_hits_total",
            "Results suppressed because their hash was already stored",
            &["table"]
        )?,
        queue_depth: register_gauge_vec!(
            "lookout_queue_depth",
            "Tasks waiting in a dispatch queue",
            &["queue"]
        )?,
    };

    let engine = EngineMetrics {
        plugin_failures: register_counter_vec!(
            "lookout_plugin_failures_total",
            "Plugin runtime failures by script",
            &["script"]
        )?,
        thread_exits: register_counter_vec!(
            "lookout_thread_exits_total",
            "Managed thread exits by kind and exit type",
            &["kind", "exit"]
        )?,
        live_threads: register_gauge_vec!(
            "lookout_live_threads",
            "Live managed threads by kind",
            &["kind"]
        )?,
    };

    RESOLVER_METRICS.set(resolver).map_err(|_| "Resolver metrics already initialized")?;
    ENGINE_METRICS.set(engine).map_err(|_| "Engine metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    RESOLVER_METRICS.get().is_some() && ENGINE_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record one task execution
pub fn record_execution(mode: &str, outcome: &str, duration_secs: f64) {
    let Some(m) = RESOLVER_METRICS.get() else {
        return;
    };

    m.executions.with_label_values(&[mode, outcome]).inc();
    m.execution_duration
        .with_label_values(&[mode])
        .observe(duration_secs);
}

/// Record tasks lost on a queue
pub fn record_lost_tasks(queue: &str, count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = RESOLVER_METRICS.get() {
        m.lost_tasks
            .with_label_values(&[queue])
            .inc_by(count as f64);
    }
}

/// Record a rejected schedule insertion
pub fn record_schedule_rejection(schedule: &str, reason: &str) {
    if let Some(m) = RESOLVER_METRICS.get() {
        m.schedule_rejections
            .with_label_values(&[schedule, reason])
            .inc();
    }
}

/// Record a result suppressed by the dedup cache
pub fn record_dedup_hit(table: &str) {
    if let Some(m) = RESOLVER_METRICS.get() {
        m.dedup_hits.with_label_values(&[table]).inc();
    }
}

/// Update the depth of a dispatch queue
pub fn update_queue_depth(queue: &str, depth: usize) {
    if let Some(m) = RESOLVER_METRICS.get() {
        m.queue_depth.with_label_values(&[queue]).set(depth as f64);
    }
}

/// Record a plugin runtime failure
pub fn record_plugin_failure(script: &str) {
    if let Some(m) = ENGINE_METRICS.get() {
        m.plugin_failures.with_label_values(&[script]).inc();
    }
}

/// Record a managed thread exit
pub fn record_thread_exit(kind: &str, exit: &str) {
    if let Some(m) = ENGINE_METRICS.get() {
        m.thread_exits.with_label_values(&[kind, exit]).inc();
    }
}

/// Update the live thread count of a pool
pub fn update_live_threads(kind: &str, count: usize) {
    if let Some(m) = ENGINE_METRICS.get() {
        m.live_threads.with_label_values(&[kind]).set(count as f64);
    }
}

// ============================================================================
// Tests
// ============================================================================
