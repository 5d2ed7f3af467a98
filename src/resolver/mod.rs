//! Scheduling, dispatch and execution of catalogs and targets
//!
//! The [`Resolver`] owns two lanes, one for catalogs and one for targets. A
//! lane pairs a [`UniqueSchedule`] (work waiting for its time) with a bounded
//! [`PriorityQueue`] (work that is due and waiting for a worker).
//!
//! ```text
//!   insert_* ──▶ schedule ──dispatch_*──▶ queue ──execute──▶ plugin
//!      ▲                                                        │
//!      └──────────── new catalog / targets ◀────────────────────┘
//! ```
//!
//! # Locking
//!
//! Each lane has one mutex, around its schedule. Every operation that
//! touches both the schedule and the queue of a lane (eviction, dispatch)
//! holds it for the whole operation, so a superseded entry can never slip
//! from one to the other unseen. Workers dequeue without it. The two lanes
//! never lock each other, and plugin code always runs with no lane lock held.

pub mod priority;

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::{Config, ResolverConfig};
use crate::error::{Error, Result};
use crate::events::{AlertCode, Event, EventHandler};
use crate::metrics;
use crate::models::{Catalog, ExecuteMode, Item, ItemKind, ParseResult, Target, Task, Timing};
use crate::plugins::{PluginError, ScriptManager};
use crate::scheduler::{PriorityQueue, QueueFull, TimeRange, UniqueSchedule};
use crate::storage::{tables, HashStorage};
use crate::utils::{panic_message, SharedClock};

pub use priority::PriorityPolicy;

// ============================================================================
// Lanes
// ============================================================================

/// Entity that can sit in a lane
trait Schedulable: PartialEq {
    fn script(&self) -> &str;
    fn timing(&self) -> &Timing;
    fn timing_mut(&mut self) -> &mut Timing;
}

impl Schedulable for Catalog {
    fn script(&self) -> &str {
        &self.script
    }

    fn timing(&self) -> &Timing {
        &self.timing
    }

    fn timing_mut(&mut self) -> &mut Timing {
        &mut self.timing
    }
}

impl Schedulable for Target {
    fn script(&self) -> &str {
        &self.script
    }

    fn timing(&self) -> &Timing {
        &self.timing
    }

    fn timing_mut(&mut self) -> &mut Timing {
        &mut self.timing
    }
}

struct Lane<T> {
    mode: ExecuteMode,
    schedule: Mutex<UniqueSchedule<T>>,
    queue: PriorityQueue<T>,
}

impl<T: Schedulable> Lane<T> {
    fn new(mode: ExecuteMode, capacity: usize) -> Self {
        Self {
            mode,
            schedule: Mutex::new(UniqueSchedule::new()),
            queue: PriorityQueue::new(capacity),
        }
    }

    fn name(&self) -> &'static str {
        self.mode.as_str()
    }

    fn lock(&self) -> MutexGuard<'_, UniqueSchedule<T>> {
        self.schedule.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Evict every entry of `script` from the schedule and the queue
    fn evict(&self, schedule: &mut UniqueSchedule<T>, script: &str) -> usize {
        let scheduled = schedule.retain(|entity| entity.script() != script);
        let queued = self.queue.retain(|entity| entity.script() != script);
        scheduled + queued
    }

    fn snapshot(&self) -> Vec<(f64, T)>
    where
        T: Clone,
    {
        self.lock()
            .get(TimeRange::All)
            .unwrap_or_default()
            .into_iter()
            .map(|(time, entity)| (time, entity.clone()))
            .collect()
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Result of moving due work from a schedule into its queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Tasks now waiting in the queue
    pub queued: usize,
    /// Tasks dropped because the queue stayed full
    pub lost: usize,
}

/// How a single execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The plugin ran and its results were applied
    Completed,
    /// The plugin or its parser was unavailable
    Skipped,
    /// The plugin failed at runtime
    Failed,
}

/// What one execution produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub script: String,
    pub mode: ExecuteMode,
    pub outcome: ExecutionOutcome,
    /// A new catalog superseded the pending one
    pub catalog_replaced: bool,
    pub targets_scheduled: usize,
    pub items_surfaced: usize,
    pub target_ends: usize,
    pub messages: usize,
    /// Results suppressed by the dedup cache
    pub duplicates: usize,
    /// Restocks of items that were never released
    pub dropped: usize,
}

impl ExecutionReport {
    fn new(script: &str, mode: ExecuteMode) -> Self {
        Self {
            script: script.to_string(),
            mode,
            outcome: ExecutionOutcome::Completed,
            catalog_replaced: false,
            targets_scheduled: 0,
            items_surfaced: 0,
            target_ends: 0,
            messages: 0,
            duplicates: 0,
            dropped: 0,
        }
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Owner of the catalog and target lanes
pub struct Resolver {
    settings: ResolverConfig,
    policy: PriorityPolicy,
    production: bool,
    announce_level: u8,
    release_level: u8,
    clock: SharedClock,
    scripts: Arc<dyn ScriptManager>,
    storage: Arc<HashStorage>,
    events: Arc<EventHandler>,
    catalogs: Lane<Catalog>,
    targets: Lane<Target>,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("catalogs_scheduled", &self.catalog_schedule_len())
            .field("catalogs_queued", &self.catalogs.queue.len())
            .field("targets_scheduled", &self.target_schedule_len())
            .field("targets_queued", &self.targets.queue.len())
            .finish_non_exhaustive()
    }
}

impl Resolver {
    /// Create a resolver with empty lanes
    pub fn new(
        config: &Config,
        clock: SharedClock,
        scripts: Arc<dyn ScriptManager>,
        storage: Arc<HashStorage>,
        events: Arc<EventHandler>,
    ) -> Self {
        let settings = config.resolver.clone();
        Self {
            policy: PriorityPolicy::from_config(&settings),
            catalogs: Lane::new(ExecuteMode::Catalog, settings.catalog_queue_size),
            targets: Lane::new(ExecuteMode::Target, settings.target_queue_size),
            settings,
            production: config.engine.production,
            announce_level: config.storage.announce_hash_level,
            release_level: config.storage.release_hash_level,
            clock,
            scripts,
            storage,
            events,
        }
    }

    /// Current time of the engine clock
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Dispatch priority of a task
    pub fn priority(&self, task: &Task) -> u32 {
        self.policy.task(task)
    }

    /// Priority table in use
    pub fn policy(&self) -> PriorityPolicy {
        self.policy
    }

    /// Dedup storage shared with the engine
    pub fn storage(&self) -> &Arc<HashStorage> {
        &self.storage
    }

    /// Plugin source shared with the engine
    pub fn scripts(&self) -> &Arc<dyn ScriptManager> {
        &self.scripts
    }

    /// Event sink shared with the engine
    pub fn events(&self) -> &Arc<EventHandler> {
        &self.events
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    /// Compute the next due time of `entity` and place it in `schedule`
    fn schedule_entity<T: Schedulable>(
        &self,
        lane: &Lane<T>,
        schedule: &mut UniqueSchedule<T>,
        mut entity: T,
        now: f64,
    ) -> Option<f64> {
        let lane_name = lane.name();

        if let Some(existing) = schedule.find(&entity) {
            tracing::debug!(
                script = %entity.script(),
                lane = lane_name,
                existing,
                "Equal task already scheduled, insertion ignored"
            );
            metrics::record_schedule_rejection(lane_name, "duplicate");
            return None;
        }

        if entity.timing().is_expired() {
            tracing::warn!(
                script = %entity.script(),
                lane = lane_name,
                "Expired smart task dropped"
            );
            metrics::record_schedule_rejection(lane_name, "expired");
            return None;
        }

        let mut expired_now = false;
        let due = match entity.timing_mut() {
            Timing::Interval { interval } => now + *interval,
            Timing::Scheduled { timestamp } => *timestamp,
            Timing::Smart { generator, expired } => {
                let next = generator.extract(now);
                if next <= now {
                    *expired = true;
                    expired_now = true;
                }
                next
            }
        };
        if expired_now {
            tracing::warn!(
                script = %entity.script(),
                lane = lane_name,
                anchor = due,
                "Smart schedule exhausted, running once at its anchor"
            );
        }

        let mut at = due;
        let mut attempts = 0;
        while schedule.contains_time(at) {
            if attempts >= self.settings.max_probe_attempts {
                tracing::warn!(
                    script = %entity.script(),
                    lane = lane_name,
                    due,
                    attempts,
                    "No free schedule slot, task lost"
                );
                metrics::record_schedule_rejection(lane_name, "slot_occupied");
                metrics::record_lost_tasks(lane_name, 1);
                return None;
            }
            attempts += 1;
            at = due + self.settings.probe_step * f64::from(attempts);
        }

        let script = entity.script().to_string();
        match schedule.set(at, entity) {
            Ok(time) => {
                tracing::trace!(script = %script, lane = lane_name, time, "Task scheduled");
                Some(time)
            }
            Err(e) => {
                tracing::warn!(script = %script, lane = lane_name, error = %e, "Task not scheduled");
                metrics::record_schedule_rejection(lane_name, e.reason());
                None
            }
        }
    }

    /// Schedule a catalog, returning its due time
    ///
    /// With `force`, every pending catalog of the same plugin is evicted first
    /// so the new one wins; otherwise a pending equal catalog is kept.
    pub fn insert_catalog(&self, catalog: Catalog, force: bool) -> Option<f64> {
        let now = self.clock.now();
        let mut schedule = self.catalogs.lock();
        if force {
            let evicted = self.catalogs.evict(&mut schedule, &catalog.script);
            if evicted > 0 {
                tracing::debug!(script = %catalog.script, evicted, "Superseded catalog evicted");
            }
        }
        self.schedule_entity(&self.catalogs, &mut schedule, catalog, now)
    }

    /// Schedule a target, returning its due time
    pub fn insert_target(&self, target: Target) -> Option<f64> {
        let now = self.clock.now();
        let mut schedule = self.targets.lock();
        self.schedule_entity(&self.targets, &mut schedule, target, now)
    }

    /// Evict every pending catalog of `script`
    pub fn remove_catalog(&self, script: &str) -> usize {
        let mut schedule = self.catalogs.lock();
        self.catalogs.evict(&mut schedule, script)
    }

    /// Evict every pending target of `script`
    pub fn remove_targets(&self, script: &str) -> usize {
        let mut schedule = self.targets.lock();
        self.targets.evict(&mut schedule, script)
    }

    // ------------------------------------------------------------------
    // Promotion
    // ------------------------------------------------------------------

    /// Remove every due entry, keeping those whose plugin can still run them
    fn take_due<T: Schedulable>(
        &self,
        lane: &Lane<T>,
        schedule: &mut UniqueSchedule<T>,
        now: f64,
    ) -> Vec<T> {
        let due = match schedule.drain(TimeRange::AtOrBefore(now)) {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(lane = lane.name(), error = %e, "Clock returned an invalid time");
                return Vec::new();
            }
        };

        due.into_iter()
            .filter_map(|(time, entity)| match self.scripts.parser(entity.script()) {
                Ok(_) => Some(entity),
                Err(e) => {
                    tracing::warn!(
                        script = %entity.script(),
                        lane = lane.name(),
                        time,
                        error = %e,
                        "Skipping task of unavailable plugin"
                    );
                    None
                }
            })
            .collect()
    }

    /// Pop every due catalog whose plugin is loaded with a parser
    pub fn get_catalogs(&self) -> Vec<Catalog> {
        let now = self.clock.now();
        let mut schedule = self.catalogs.lock();
        self.take_due(&self.catalogs, &mut schedule, now)
    }

    /// Pop every due target whose plugin is loaded with a parser
    pub fn get_targets(&self) -> Vec<Target> {
        let now = self.clock.now();
        let mut schedule = self.targets.lock();
        self.take_due(&self.targets, &mut schedule, now)
    }

    fn dispatch<T: Schedulable>(
        &self,
        lane: &Lane<T>,
        wait: Duration,
        priority: impl Fn(&T) -> u32,
    ) -> DispatchReport {
        let now = self.clock.now();
        let mut report = DispatchReport::default();
        {
            let mut schedule = lane.lock();
            let mut wait = wait;
            for entity in self.take_due(lane, &mut schedule, now) {
                let rank = priority(&entity);
                match lane.queue.put(rank, entity, wait) {
                    Ok(()) => report.queued += 1,
                    Err(QueueFull(entity)) => {
                        report.lost += 1;
                        // Still full after a full wait; the rest of the batch is not waited for
                        wait = Duration::ZERO;
                        tracing::warn!(
                            script = %entity.script(),
                            lane = lane.name(),
                            priority = rank,
                            "Queue full, task lost"
                        );
                    }
                }
            }
        }

        metrics::record_lost_tasks(lane.name(), report.lost);
        metrics::update_queue_depth(lane.name(), lane.queue.len());
        report
    }

    /// Move due catalogs into the catalog queue
    pub fn dispatch_catalogs(&self, wait: Duration) -> DispatchReport {
        self.dispatch(&self.catalogs, wait, |catalog| self.policy.catalog(catalog))
    }

    /// Move due targets into the target queue
    pub fn dispatch_targets(&self, wait: Duration) -> DispatchReport {
        self.dispatch(&self.targets, wait, |target| self.policy.target(target))
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Run one queued task of `mode`; `None` when the queue is empty
    ///
    /// In production mode plugin failures are counted, alerted and reported
    /// as [`ExecutionOutcome::Failed`]. Otherwise they are returned as
    /// `Error::Plugin` so the calling worker stops loudly.
    pub fn execute(&self, mode: ExecuteMode) -> Result<Option<ExecutionReport>> {
        let task = match mode {
            ExecuteMode::Catalog => self.catalogs.queue.try_get().map(Task::Catalog),
            ExecuteMode::Target => self.targets.queue.try_get().map(Task::Target),
        };
        match task {
            Some(task) => self.run(task).map(Some),
            None => Ok(None),
        }
    }

    fn run(&self, task: Task) -> Result<ExecutionReport> {
        let mode = task.mode();
        let script = task.script().to_string();
        let mut report = ExecutionReport::new(&script, mode);

        let started = Instant::now();
        let outcome = self.scripts.parser(&script).and_then(|parser| {
            panic::catch_unwind(AssertUnwindSafe(|| parser.execute(mode, &task))).unwrap_or_else(
                |payload| {
                    Err(PluginError::Panicked {
                        script: script.clone(),
                        message: panic_message(payload.as_ref()),
                    })
                },
            )
        });
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok(results) => {
                self.apply(&task, results, &mut report)?;
                metrics::record_execution(mode.as_str(), "completed", elapsed);
                tracing::debug!(
                    script = %script,
                    mode = %mode,
                    items = report.items_surfaced,
                    targets = report.targets_scheduled,
                    "Task executed"
                );
            }
            Err(e) if e.is_recoverable() => {
                metrics::record_execution(mode.as_str(), "skipped", elapsed);
                tracing::warn!(script = %script, mode = %mode, error = %e, "Task skipped");
                report.outcome = ExecutionOutcome::Skipped;
            }
            Err(e) => {
                metrics::record_execution(mode.as_str(), "failed", elapsed);
                self.plugin_failure(&e);
                if !self.production {
                    return Err(e.into());
                }
                report.outcome = ExecutionOutcome::Failed;
            }
        }

        Ok(report)
    }

    fn plugin_failure(&self, error: &PluginError) {
        let script = error.script();
        tracing::error!(script = %script, error = %error, "Plugin execution failed");
        metrics::record_plugin_failure(script);
        self.events
            .emit(Event::alert(AlertCode::PluginFailure, error.to_string()));

        if self.scripts.record_error(script) {
            self.events.emit(Event::alert(
                AlertCode::PluginUnloaded,
                format!("Plugin '{script}' unloaded after repeated failures"),
            ));
        }
    }

    /// Route plugin results back into the lanes, the dedup cache and the event sink
    ///
    /// A dedup storage failure skips only the affected result. The catalog and
    /// targets are still scheduled, then the first failure is returned.
    fn apply(
        &self,
        task: &Task,
        results: Vec<ParseResult>,
        report: &mut ExecutionReport,
    ) -> Result<()> {
        let mut catalog: Option<Catalog> = None;
        let mut targets = Vec::new();
        let mut failure: Option<Error> = None;
        let mut keep_first = |e: Error| {
            tracing::error!(script = %task.script(), error = %e, "Dedup storage failed, result skipped");
            failure.get_or_insert(e);
        };

        for result in results {
            match result {
                ParseResult::Catalog(next) => {
                    if catalog.is_none() {
                        catalog = Some(next);
                    } else {
                        tracing::debug!(script = %next.script, "Additional catalog ignored");
                    }
                }
                ParseResult::Target(target) => targets.push(target),
                ParseResult::Item(item) => match self.admit_item(item, report) {
                    Ok(Some(follow_up)) => targets.push(follow_up),
                    Ok(None) => {}
                    Err(e) => keep_first(e),
                },
                ParseResult::TargetEnd(end) => match self.storage.admit_target_end(&end) {
                    Ok(true) => {
                        report.target_ends += 1;
                        self.events.emit(Event::TargetEnd(end));
                    }
                    Ok(false) => {
                        report.duplicates += 1;
                        metrics::record_dedup_hit(tables::TARGET_ENDS);
                        tracing::debug!(script = %end.target.script, "Target end already notified");
                    }
                    Err(e) => keep_first(e.into()),
                },
                ParseResult::Message(message) => {
                    report.messages += 1;
                    self.events.emit(Event::Message(message));
                }
            }
        }

        if let Some(catalog) = catalog {
            report.catalog_replaced = self.insert_catalog(catalog, true).is_some();
        }

        let current = match task {
            Task::Target(target) => Some(target),
            Task::Catalog(_) => None,
        };
        for mut target in targets {
            if let Some(current) = current.filter(|current| **current == target) {
                target.reuse = self.policy.next_reuse(current.reuse);
            }
            if self.insert_target(target).is_some() {
                report.targets_scheduled += 1;
            }
        }

        // First storage failure, reported after scheduling
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Surface an item unless already seen; returns its follow-up target
    fn admit_item(&self, item: Item, report: &mut ExecutionReport) -> Result<Option<Target>> {
        let follow_up = match &item.kind {
            ItemKind::Announce => {
                if !self.storage.admit_announce(&item, self.announce_level)? {
                    report.duplicates += 1;
                    metrics::record_dedup_hit(tables::ANNOUNCES);
                    tracing::debug!(script = %item.script, url = %item.url, "Announce already surfaced");
                    return Ok(None);
                }
                None
            }
            ItemKind::Release { restock } => {
                if !self.storage.admit_release(&item, self.release_level)? {
                    report.duplicates += 1;
                    metrics::record_dedup_hit(tables::RELEASES);
                    tracing::debug!(script = %item.script, url = %item.url, "Release already surfaced");
                    return Ok(None);
                }
                if let Some(id) = item.id {
                    self.storage.admit_item_id(id)?;
                }
                restock.clone()
            }
            ItemKind::Restock { id } => {
                if !self.storage.contains_item_id(*id)? {
                    report.dropped += 1;
                    tracing::debug!(script = %item.script, id, "Restock of unknown item dropped");
                    return Ok(None);
                }
                None
            }
        };

        report.items_surfaced += 1;
        self.events.emit(Event::Item(item));
        Ok(follow_up)
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Scheduled catalogs with their due times, ascending
    pub fn scheduled_catalogs(&self) -> Vec<(f64, Catalog)> {
        self.catalogs.snapshot()
    }

    /// Scheduled targets with their due times, ascending
    pub fn scheduled_targets(&self) -> Vec<(f64, Target)> {
        self.targets.snapshot()
    }

    /// Number of scheduled catalogs
    pub fn catalog_schedule_len(&self) -> usize {
        self.catalogs.lock().len()
    }

    /// Number of scheduled targets
    pub fn target_schedule_len(&self) -> usize {
        self.targets.lock().len()
    }

    /// Number of queued catalogs
    pub fn catalog_queue_len(&self) -> usize {
        self.catalogs.queue.len()
    }

    /// Number of queued targets
    pub fn target_queue_len(&self) -> usize {
        self.targets.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Message, TargetEnd, TargetEndKind};
    use crate::plugins::{Parser, PluginRegistry, PluginResult};
    use crate::scheduler::SmartGenerator;
    use crate::utils::ManualClock;

    struct Echo;

    impl Parser for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn catalog(&self) -> Catalog {
            Catalog::new("echo", Timing::interval(5.0))
        }

        fn execute(&self, _mode: ExecuteMode, task: &Task) -> PluginResult<Vec<ParseResult>> {
            Ok(match task {
                Task::Catalog(catalog) => vec![catalog.clone().into()],
                Task::Target(target) => vec![
                    target.clone().into(),
                    TargetEnd::new(target.clone(), TargetEndKind::Success).into(),
                    Message::new("echo", "checked").into(),
                ],
            })
        }
    }

    fn resolver(clock: &Arc<ManualClock>) -> Resolver {
        let registry = PluginRegistry::new(3);
        registry.register(Arc::new(Echo), "1");
        let storage = Arc::new(HashStorage::in_memory(clock.clone()).unwrap());
        let events = Arc::new(EventHandler::spawn(Vec::new()).unwrap());
        Resolver::new(
            &Config::default(),
            clock.clone(),
            Arc::new(registry),
            storage,
            events,
        )
    }

    #[test]
    fn test_interval_and_scheduled_due_times() {
        let clock = ManualClock::shared(100.0);
        let resolver = resolver(&clock);

        assert_eq!(
            resolver.insert_catalog(Catalog::new("echo", Timing::interval(5.0)), false),
            Some(105.0)
        );
        assert_eq!(
            resolver.insert_target(Target::page("echo", "p", Timing::scheduled(130.0))),
            Some(130.0)
        );
    }

    #[test]
    fn test_force_replaces_pending_catalog() {
        let clock = ManualClock::shared(0.0);
        let resolver = resolver(&clock);

        resolver.insert_catalog(Catalog::new("echo", Timing::interval(50.0)), false);
        assert_eq!(
            resolver.insert_catalog(Catalog::new("echo", Timing::interval(5.0)), false),
            None
        );
        assert_eq!(
            resolver.insert_catalog(Catalog::new("echo", Timing::interval(5.0)), true),
            Some(5.0)
        );
        assert_eq!(resolver.scheduled_catalogs().len(), 1);
    }

    #[test]
    fn test_colliding_slots_are_probed_forward() {
        let clock = ManualClock::shared(0.0);
        let resolver = resolver(&clock);

        let first = resolver.insert_target(Target::page("echo", "a", Timing::scheduled(10.0)));
        let second = resolver.insert_target(Target::page("echo", "b", Timing::scheduled(10.0)));
        assert_eq!(first, Some(10.0));
        assert_eq!(second, Some(10.0001));
    }

    #[test]
    fn test_probe_exhaustion_loses_task() {
        let clock = ManualClock::shared(0.0);
        let mut config = Config::default();
        config.resolver.max_probe_attempts = 1;
        let resolver = Resolver::new(
            &config,
            clock.clone(),
            Arc::new(PluginRegistry::new(1)),
            Arc::new(HashStorage::in_memory(clock.clone()).unwrap()),
            Arc::new(EventHandler::spawn(Vec::new()).unwrap()),
        );

        for name in ["a", "b"] {
            assert!(resolver
                .insert_target(Target::page("echo", name, Timing::scheduled(10.0)))
                .is_some());
        }
        assert_eq!(
            resolver.insert_target(Target::page("echo", "c", Timing::scheduled(10.0))),
            None
        );
        assert_eq!(resolver.target_schedule_len(), 2);
    }

    #[test]
    fn test_smart_expiry() {
        let clock = ManualClock::shared(100.0);
        let resolver = resolver(&clock);
        let generator = SmartGenerator::linear(90.0, 4, 1.0).unwrap();
        let target = Target::page("echo", "drop", Timing::smart(generator));

        // anchor already passed: scheduled once at the anchor, marked expired
        assert_eq!(resolver.insert_target(target), Some(90.0));
        let scheduled = resolver.get_targets().remove(0);
        assert!(scheduled.timing.is_expired());

        // an expired target is never scheduled again
        assert_eq!(resolver.insert_target(scheduled), None);
        assert_eq!(resolver.target_schedule_len(), 0);
    }

    #[test]
    fn test_unavailable_plugin_is_filtered() {
        let clock = ManualClock::shared(0.0);
        let resolver = resolver(&clock);
        resolver.insert_catalog(Catalog::new("ghost", Timing::scheduled(0.0)), false);
        resolver.insert_catalog(Catalog::new("echo", Timing::scheduled(0.0)), false);

        clock.set(1.0);
        let due = resolver.get_catalogs();
        assert_eq!(due, vec![Catalog::new("echo", Timing::scheduled(0.0))]);
        assert_eq!(resolver.catalog_schedule_len(), 0);
    }

    #[test]
    fn test_execute_escalates_reuse_and_dedups_target_end() {
        let clock = ManualClock::shared(0.0);
        let resolver = resolver(&clock);
        resolver.insert_target(Target::page("echo", "p", Timing::interval(1.0)));

        clock.set(1.0);
        assert_eq!(resolver.dispatch_targets(Duration::ZERO).queued, 1);
        let report = resolver.execute(ExecuteMode::Target).unwrap().unwrap();
        assert_eq!(report.outcome, ExecutionOutcome::Completed);
        assert_eq!(report.targets_scheduled, 1);
        assert_eq!(report.target_ends, 1);
        assert_eq!(report.messages, 1);

        let (_, requeued) = resolver.scheduled_targets().remove(0);
        assert_eq!(requeued.reuse, 1);

        clock.set(2.0);
        resolver.dispatch_targets(Duration::ZERO);
        let report = resolver.execute(ExecuteMode::Target).unwrap().unwrap();
        assert_eq!(report.target_ends, 0);
        assert_eq!(report.duplicates, 1);
    }

    #[test]
    fn test_execute_on_empty_queue() {
        let clock = ManualClock::shared(0.0);
        let resolver = resolver(&clock);
        assert!(resolver.execute(ExecuteMode::Catalog).unwrap().is_none());
    }
}
