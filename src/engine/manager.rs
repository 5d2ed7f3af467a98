//! Thread supervision
//!
//! The [`ThreadManager`] keeps exactly one live pipe and the configured
//! number of workers and catalog workers. Its own supervisor thread calls
//! [`ThreadManager::tick`] periodically; each tick reaps dead threads,
//! respawns the pipe, and grows or trims the worker pools.
//!
//! Pool changes are serialized by a [`CoordinationLock`]. Ticks only ever
//! *try* to take it; an operator command holding it for too many consecutive
//! ticks is forcibly released so supervision cannot starve.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::Duration;

use rand::seq::SliceRandom;

use super::pipe::Pipe;
use super::runner::{LoopBody, ThreadExit, ThreadHandle, ThreadKind, ThreadTelemetry};
use super::state::ThreadState;
use super::worker::{CatalogWorker, Worker};
use crate::config::Config;
use crate::error::{Error, LookoutErrorTrait, Result};
use crate::events::{AlertCode, Event, EventHandler, MonitorEvent};
use crate::metrics;
use crate::resolver::Resolver;
use crate::utils::{panic_message, SharedClock};

// ============================================================================
// Coordination lock
// ============================================================================

#[derive(Debug, Default)]
struct LockState {
    held: bool,
    generation: u64,
}

/// Mutual exclusion for pool changes that can be taken back by force
///
/// Every acquisition gets a new generation. A guard only releases the lock
/// if its generation is still current, so a guard outliving a forced release
/// cannot free somebody else's hold.
#[derive(Debug, Default)]
pub struct CoordinationLock {
    state: Mutex<LockState>,
    released: Condvar,
}

/// Hold on a [`CoordinationLock`]
#[derive(Debug)]
pub struct CoordinationGuard<'a> {
    lock: &'a CoordinationLock,
    generation: u64,
}

impl CoordinationLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn grant(&self, state: &mut LockState) -> CoordinationGuard<'_> {
        state.held = true;
        state.generation += 1;
        CoordinationGuard {
            lock: self,
            generation: state.generation,
        }
    }

    /// Take the lock if it is free
    pub fn try_acquire(&self) -> Option<CoordinationGuard<'_>> {
        let mut state = self.state();
        if state.held {
            return None;
        }
        Some(self.grant(&mut state))
    }

    /// Block until the lock is free, then take it
    pub fn acquire(&self) -> CoordinationGuard<'_> {
        let mut state = self.state();
        while state.held {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        self.grant(&mut state)
    }

    /// Free the lock regardless of who holds it
    pub fn force_release(&self) {
        let mut state = self.state();
        state.held = false;
        self.released.notify_all();
    }

    pub fn is_held(&self) -> bool {
        self.state().held
    }
}

impl Drop for CoordinationGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state();
        if state.held && state.generation == self.generation {
            state.held = false;
            self.lock.released.notify_one();
        }
    }
}

// ============================================================================
// Pools
// ============================================================================

#[derive(Debug, Default)]
struct Pools {
    pipe: Option<ThreadHandle>,
    workers: Vec<ThreadHandle>,
    catalog_workers: Vec<ThreadHandle>,
}

impl Pools {
    fn iter(&self) -> impl Iterator<Item = &ThreadHandle> {
        self.pipe
            .iter()
            .chain(self.workers.iter())
            .chain(self.catalog_workers.iter())
    }

    fn drain(&mut self) -> Vec<ThreadHandle> {
        let mut handles: Vec<ThreadHandle> = self.pipe.take().into_iter().collect();
        handles.append(&mut self.workers);
        handles.append(&mut self.catalog_workers);
        handles
    }
}

fn count_live(pool: &[ThreadHandle]) -> usize {
    pool.iter().filter(|handle| handle.is_live()).count()
}

/// Supervisor thread body
struct Supervisor(Weak<ThreadManager>);

impl LoopBody for Supervisor {
    fn tick(&mut self) -> Result<bool> {
        match self.0.upgrade() {
            Some(manager) => manager.tick().map(|()| true),
            None => Ok(false),
        }
    }
}

// ============================================================================
// Thread manager
// ============================================================================

/// Supervisor of the pipe and worker pools
pub struct ThreadManager {
    config: Config,
    resolver: Arc<Resolver>,
    clock: SharedClock,
    lock: CoordinationLock,
    pools: Mutex<Pools>,
    supervisor: Mutex<Option<ThreadHandle>>,
    workers: AtomicUsize,
    catalog_workers: AtomicUsize,
    starved_ticks: AtomicU32,
    paused: AtomicBool,
    halted: AtomicBool,
}

impl std::fmt::Debug for ThreadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadManager")
            .field("workers", &self.worker_count())
            .field("catalog_workers", &self.catalog_worker_count())
            .field("paused", &self.is_paused())
            .field("halted", &self.is_halted())
            .finish_non_exhaustive()
    }
}

impl ThreadManager {
    /// Create a manager with empty pools; nothing runs until [`start`](Self::start)
    /// or the first [`tick`](Self::tick)
    pub fn new(config: &Config, resolver: Arc<Resolver>, clock: SharedClock) -> Self {
        Self {
            workers: AtomicUsize::new(config.engine.workers),
            catalog_workers: AtomicUsize::new(config.engine.catalog_workers),
            config: config.clone(),
            resolver,
            clock,
            lock: CoordinationLock::new(),
            pools: Mutex::new(Pools::default()),
            supervisor: Mutex::new(None),
            starved_ticks: AtomicU32::new(0),
            paused: AtomicBool::new(false),
            halted: AtomicBool::new(false),
        }
    }

    fn pools(&self) -> MutexGuard<'_, Pools> {
        self.pools.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn supervisor(&self) -> MutexGuard<'_, Option<ThreadHandle>> {
        self.supervisor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn events(&self) -> &Arc<EventHandler> {
        self.resolver.events()
    }

    /// Spawn the supervisor thread
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut slot = self.supervisor();
        if slot.as_ref().is_some_and(ThreadHandle::is_live) {
            return Ok(());
        }

        self.halted.store(false, Ordering::SeqCst);
        let handle = ThreadHandle::spawn(
            ThreadKind::Supervisor,
            Supervisor(Arc::downgrade(self)),
            self.config.manager_tick(),
            self.clock.clone(),
            false,
        )?;
        tracing::info!(
            workers = self.worker_count(),
            catalog_workers = self.catalog_worker_count(),
            thread = handle.name(),
            "Thread manager started"
        );
        *slot = Some(handle);

        self.events().emit(Event::Monitor(MonitorEvent::Started));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Supervision
    // ------------------------------------------------------------------

    /// Run one supervision pass
    ///
    /// Skips the pass if the coordination lock is busy. An error means the
    /// manager has halted and stopped every thread.
    pub fn tick(&self) -> Result<()> {
        let Some(_guard) = self.lock.try_acquire() else {
            let starved = self.starved_ticks.fetch_add(1, Ordering::SeqCst) + 1;
            if starved >= self.config.engine.lock_starvation_ticks {
                tracing::warn!(starved, "Coordination lock starved, forcing release");
                self.lock.force_release();
                self.starved_ticks.store(0, Ordering::SeqCst);
            } else {
                tracing::debug!(starved, "Coordination lock busy, skipping tick");
            }
            return Ok(());
        };
        self.starved_ticks.store(0, Ordering::SeqCst);

        if self.is_halted() {
            return Ok(());
        }

        self.supervise(|| self.maintain())
    }

    /// Run one supervision pass; any error or panic halts the engine
    fn supervise(&self, pass: impl FnOnce() -> Result<()>) -> Result<()> {
        let result = panic::catch_unwind(AssertUnwindSafe(pass))
            .unwrap_or_else(|payload| {
                Err(Error::other(format!(
                    "supervisor tick panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });

        if let Err(e) = &result {
            tracing::error!(
                category = e.category().as_str(),
                error = %e,
                "Supervisor tick failed, stopping all threads"
            );
            self.events()
                .emit(Event::alert(AlertCode::SupervisorFailure, e.to_string()));
            self.halted.store(true, Ordering::SeqCst);
            self.stop_all();
        }
        result
    }

    fn maintain(&self) -> Result<()> {
        let paused = self.is_paused();
        let mut pools = self.pools();

        if pools.pipe.as_ref().is_some_and(|pipe| !pipe.is_alive()) {
            if let Some(dead) = pools.pipe.take() {
                self.reap(dead);
            }
        }
        if pools.pipe.is_none() {
            let pipe = ThreadHandle::spawn(
                ThreadKind::Pipe,
                Pipe::new(self.resolver.clone(), &self.config),
                self.config.pipe_tick(),
                self.clock.clone(),
                paused,
            )
            .map_err(|e| Error::with_source("failed to start the pipe", e))?;
            pools.pipe = Some(pipe);
        }

        let target = self.worker_count();
        self.size_pool(&mut pools.workers, ThreadKind::Worker, target, || {
            ThreadHandle::spawn(
                ThreadKind::Worker,
                Worker::new(self.resolver.clone()),
                self.config.worker_tick(),
                self.clock.clone(),
                paused,
            )
        });

        let target = self.catalog_worker_count();
        self.size_pool(
            &mut pools.catalog_workers,
            ThreadKind::CatalogWorker,
            target,
            || {
                ThreadHandle::spawn(
                    ThreadKind::CatalogWorker,
                    CatalogWorker::new(self.resolver.clone()),
                    self.config.worker_tick(),
                    self.clock.clone(),
                    paused,
                )
            },
        );

        Ok(())
    }

    /// Reap dead threads, then spawn or stop until `target` are live
    fn size_pool(
        &self,
        pool: &mut Vec<ThreadHandle>,
        kind: ThreadKind,
        target: usize,
        spawn: impl Fn() -> std::io::Result<ThreadHandle>,
    ) {
        let (alive, dead): (Vec<_>, Vec<_>) = pool.drain(..).partition(ThreadHandle::is_alive);
        *pool = alive;
        for handle in dead {
            self.reap(handle);
        }

        let live: Vec<usize> = pool
            .iter()
            .enumerate()
            .filter(|(_, handle)| handle.state() != ThreadState::Stopping)
            .map(|(index, _)| index)
            .collect();

        if live.len() < target {
            for _ in live.len()..target {
                match spawn() {
                    Ok(handle) => pool.push(handle),
                    Err(e) => {
                        tracing::error!(kind = kind.as_str(), error = %e, "Failed to start thread");
                    }
                }
            }
        } else if live.len() > target {
            let excess = live.len() - target;
            for &index in live.choose_multiple(&mut rand::thread_rng(), excess) {
                let handle = &pool[index];
                match handle.stop() {
                    Ok(_) => tracing::debug!(thread = handle.name(), "Trimming thread"),
                    // Mid-pause; retried next tick
                    Err(e) => tracing::debug!(thread = handle.name(), error = %e, "Trim deferred"),
                }
            }
        }

        metrics::update_live_threads(kind.as_str(), count_live(pool));
    }

    /// Collect a finished thread and report how it ended
    fn reap(&self, handle: ThreadHandle) {
        let name = handle.name().to_string();
        let kind = handle.kind();
        let exit = handle.join(Duration::ZERO);
        metrics::record_thread_exit(kind.as_str(), exit.as_str());

        match exit {
            ThreadExit::Clean => {
                tracing::info!(thread = %name, kind = kind.as_str(), "Thread exited");
            }
            ThreadExit::Crashed(message) => {
                tracing::error!(
                    thread = %name,
                    kind = kind.as_str(),
                    error = %message,
                    "Thread crashed, restarting"
                );
                self.events().emit(Event::alert(
                    AlertCode::ThreadCrashed,
                    format!("{name} crashed: {message}"),
                ));
            }
            ThreadExit::TimedOut => {
                tracing::warn!(thread = %name, kind = kind.as_str(), "Thread did not finish");
            }
        }
    }

    // ------------------------------------------------------------------
    // Operator commands
    // ------------------------------------------------------------------

    /// Configured number of target workers
    pub fn worker_count(&self) -> usize {
        self.workers.load(Ordering::SeqCst)
    }

    /// Configured number of catalog workers
    pub fn catalog_worker_count(&self) -> usize {
        self.catalog_workers.load(Ordering::SeqCst)
    }

    /// Change the target worker count; applied on the next tick
    pub fn set_worker_count(&self, count: usize) {
        let _guard = self.lock.acquire();
        self.workers.store(count, Ordering::SeqCst);
        tracing::info!(count, "Worker count changed");
    }

    /// Change the catalog worker count; applied on the next tick
    pub fn set_catalog_worker_count(&self, count: usize) {
        let _guard = self.lock.acquire();
        self.catalog_workers.store(count, Ordering::SeqCst);
        tracing::info!(count, "Catalog worker count changed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Whether supervision has been halted by a stop, close or failure
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Pause every managed thread; new threads start paused
    pub fn pause(&self) {
        let _guard = self.lock.acquire();
        self.paused.store(true, Ordering::SeqCst);
        for handle in self.pools().iter() {
            if let Err(e) = handle.pause() {
                tracing::debug!(thread = handle.name(), error = %e, "Pause request ignored");
            }
        }
        tracing::info!("Threads paused");
    }

    /// Resume every paused thread
    pub fn resume(&self) {
        let _guard = self.lock.acquire();
        self.paused.store(false, Ordering::SeqCst);
        for handle in self.pools().iter() {
            if let Err(e) = handle.resume() {
                tracing::debug!(thread = handle.name(), error = %e, "Resume request ignored");
            }
        }
        tracing::info!("Threads resumed");
    }

    /// Halt supervision and ask every managed thread to stop
    pub fn stop_threads(&self) {
        let _guard = self.lock.acquire();
        self.halted.store(true, Ordering::SeqCst);
        self.stop_all();
    }

    fn stop_all(&self) {
        let timeout = self.config.join_timeout();
        for handle in self.pools().iter() {
            if !handle.stop_within(timeout) {
                tracing::warn!(thread = handle.name(), state = %handle.state(), "Thread refused to stop");
            }
        }
    }

    /// Stop the supervisor and every managed thread
    ///
    /// Returns the longest time [`join`](Self::join) may take.
    pub fn close(&self) -> Duration {
        tracing::info!("Closing thread manager");
        self.events().emit(Event::Monitor(MonitorEvent::Stopping));

        let timeout = self.config.join_timeout();
        let supervisors = match self.supervisor().as_ref() {
            Some(handle) => {
                handle.stop_within(timeout);
                1
            }
            None => 0,
        };
        self.stop_threads();

        let threads = self.pools().iter().count() + supervisors;
        timeout * u32::try_from(threads).unwrap_or(u32::MAX)
    }

    /// Wait for every thread to finish
    ///
    /// Fails if the supervisor itself crashed.
    pub fn join(&self) -> Result<()> {
        let timeout = self.config.join_timeout();
        let mut failure = None;

        if let Some(supervisor) = self.supervisor().take() {
            let exit = supervisor.join(timeout);
            metrics::record_thread_exit(ThreadKind::Supervisor.as_str(), exit.as_str());
            match exit {
                ThreadExit::Clean => {}
                ThreadExit::Crashed(message) => failure = Some(message),
                ThreadExit::TimedOut => tracing::warn!("Supervisor did not stop in time"),
            }
        }

        let handles = self.pools().drain();
        for handle in handles {
            let name = handle.name().to_string();
            let kind = handle.kind();
            let exit = handle.join(timeout);
            metrics::record_thread_exit(kind.as_str(), exit.as_str());
            match exit {
                ThreadExit::Clean => tracing::debug!(thread = %name, "Thread joined"),
                ThreadExit::Crashed(message) => {
                    tracing::error!(thread = %name, error = %message, "Thread crashed while stopping");
                }
                ThreadExit::TimedOut => tracing::warn!(thread = %name, "Thread did not stop in time"),
            }
        }

        self.events().emit(Event::Monitor(MonitorEvent::Stopped));
        tracing::info!("Thread manager stopped");

        match failure {
            Some(message) => Err(Error::other(format!("supervisor failed: {message}"))),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Whether a pipe is running and not stopping
    pub fn pipe_alive(&self) -> bool {
        self.pools().pipe.as_ref().is_some_and(ThreadHandle::is_live)
    }

    /// Target workers running and not stopping
    pub fn live_workers(&self) -> usize {
        count_live(&self.pools().workers)
    }

    /// Catalog workers running and not stopping
    pub fn live_catalog_workers(&self) -> usize {
        count_live(&self.pools().catalog_workers)
    }

    /// Telemetry of the supervisor and every managed thread
    pub fn telemetry(&self) -> Vec<ThreadTelemetry> {
        let mut telemetry: Vec<ThreadTelemetry> = self
            .supervisor()
            .iter()
            .map(ThreadHandle::telemetry)
            .collect();
        telemetry.extend(self.pools().iter().map(ThreadHandle::telemetry));
        telemetry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryListener;
    use crate::plugins::PluginRegistry;
    use crate::storage::HashStorage;
    use crate::utils::SystemClock;
    use std::thread;
    use std::time::Instant;

    fn manager(workers: usize, catalog_workers: usize) -> (Arc<ThreadManager>, crate::events::EventLog) {
        let mut config = Config::default();
        config.engine.workers = workers;
        config.engine.catalog_workers = catalog_workers;
        config.engine.pipe_tick_ms = 5;
        config.engine.worker_tick_ms = 5;
        config.engine.manager_tick_ms = 10;
        config.engine.join_timeout_ms = 1000;
        config.engine.lock_starvation_ticks = 3;

        let clock = SystemClock::shared();
        let listener = MemoryListener::new();
        let log = listener.events();
        let events = Arc::new(EventHandler::spawn(vec![Box::new(listener)]).unwrap());
        let storage = Arc::new(HashStorage::in_memory(clock.clone()).unwrap());
        let resolver = Arc::new(Resolver::new(
            &config,
            clock.clone(),
            Arc::new(PluginRegistry::new(3)),
            storage,
            events,
        ));
        (Arc::new(ThreadManager::new(&config, resolver, clock)), log)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_lock_generation_guards_stale_release() {
        let lock = CoordinationLock::new();
        let stale = lock.try_acquire().unwrap();
        assert!(lock.try_acquire().is_none());

        lock.force_release();
        let current = lock.try_acquire().unwrap();
        drop(stale);
        assert!(lock.is_held());

        drop(current);
        assert!(!lock.is_held());
    }

    #[test]
    fn test_tick_fills_pools() {
        let (manager, _log) = manager(2, 1);
        manager.tick().unwrap();

        assert!(manager.pipe_alive());
        assert_eq!(manager.live_workers(), 2);
        assert_eq!(manager.live_catalog_workers(), 1);
        assert_eq!(manager.telemetry().len(), 4);

        manager.close();
        manager.join().unwrap();
    }

    #[test]
    fn test_starved_lock_is_forced_open() {
        let (manager, _log) = manager(1, 0);
        let held = manager.lock.try_acquire().unwrap();

        for _ in 0..3 {
            manager.tick().unwrap();
        }
        assert!(!manager.lock.is_held());
        drop(held);

        manager.tick().unwrap();
        assert!(manager.pipe_alive());
        manager.close();
        manager.join().unwrap();
    }

    #[test]
    fn test_pause_reaches_every_thread() {
        let (manager, _log) = manager(2, 0);
        manager.tick().unwrap();
        manager.pause();

        assert!(wait_for(|| manager
            .telemetry()
            .iter()
            .all(|t| t.state == ThreadState::Paused)));

        manager.resume();
        assert!(wait_for(|| manager
            .telemetry()
            .iter()
            .all(|t| t.state == ThreadState::Active)));

        manager.close();
        manager.join().unwrap();
    }

    #[test]
    fn test_halted_manager_does_not_respawn() {
        let (manager, _log) = manager(1, 0);
        manager.tick().unwrap();
        manager.stop_threads();

        assert!(wait_for(|| !manager.pipe_alive()));
        manager.tick().unwrap();
        assert!(!manager.pipe_alive());
        assert_eq!(manager.live_workers(), 0);
        manager.join().unwrap();
    }

    #[test]
    fn test_supervisor_lifecycle_events() {
        let (manager, log) = manager(1, 0);
        manager.start().unwrap();
        assert!(wait_for(|| manager.pipe_alive()));

        let drain = manager.close();
        assert!(drain >= Duration::from_secs(1));
        manager.join().unwrap();
        manager.events().flush(Duration::from_secs(1));

        let monitor: Vec<MonitorEvent> = log
            .snapshot()
            .into_iter()
            .filter_map(|event| match event {
                Event::Monitor(m) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(
            monitor,
            vec![
                MonitorEvent::Started,
                MonitorEvent::Stopping,
                MonitorEvent::Stopped
            ]
        );
    }
    fn supervisor_failures(log: &crate::events::EventLog) -> Vec<String> {
        log.snapshot()
            .into_iter()
            .filter_map(|event| match event {
                Event::Alert {
                    code: AlertCode::SupervisorFailure,
                    message,
                    ..
                } => Some(message),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_failed_pass_halts_and_stops_every_thread() {
        let (manager, log) = manager(2, 1);
        manager.tick().unwrap();
        assert_eq!(manager.telemetry().len(), 4);

        let err = manager
            .supervise(|| Err(Error::other("pool bookkeeping failed")))
            .unwrap_err();
        assert_eq!(err.to_string(), "pool bookkeeping failed");
        assert!(manager.is_halted());
        assert!(manager
            .telemetry()
            .iter()
            .all(|t| t.state == ThreadState::Stopping));

        // Halted: later ticks neither fail nor respawn
        assert!(wait_for(|| !manager.pipe_alive()));
        manager.tick().unwrap();
        assert!(!manager.pipe_alive());
        assert_eq!(manager.live_workers(), 0);

        manager.join().unwrap();
        manager.events().flush(Duration::from_secs(1));
        assert_eq!(supervisor_failures(&log), vec!["pool bookkeeping failed"]);
    }

    #[test]
    fn test_panicking_pass_is_reported_as_failure() {
        let (manager, log) = manager(1, 0);
        manager.tick().unwrap();

        let err = manager
            .supervise(|| panic!("pool index out of range"))
            .unwrap_err();
        assert!(err.to_string().contains("pool index out of range"));
        assert!(manager.is_halted());
        assert!(manager
            .telemetry()
            .iter()
            .all(|t| t.state == ThreadState::Stopping));

        manager.join().unwrap();
        manager.events().flush(Duration::from_secs(1));
        let failures = supervisor_failures(&log);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("supervisor tick panicked"));
    }

    #[test]
    fn test_start_clears_halt() {
        let (manager, _log) = manager(1, 0);
        let _ = manager.supervise(|| Err(Error::other("boom")));
        assert!(manager.is_halted());

        manager.start().unwrap();
        assert!(!manager.is_halted());
        assert!(wait_for(|| manager.pipe_alive()));

        manager.close();
        manager.join().unwrap();
    }
}
