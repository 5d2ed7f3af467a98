//! Managed thread loop and its handle
//!
//! A managed thread repeatedly calls [`LoopBody::tick`] while `Active`,
//! idles while `Paused`, and exits at the first tick that observes
//! `Stopping`. Each iteration sleeps the remainder of the configured tick
//! period, so a stop request is honored within one period.

use std::io;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use super::state::{StateCell, StateError, ThreadState};
use crate::error::{LookoutErrorTrait, Result};
use crate::utils::{panic_message, SharedClock};

/// Poll period while waiting for a thread to finish
const JOIN_POLL: Duration = Duration::from_millis(5);

/// Work performed by a managed thread on every active tick
pub trait LoopBody: Send + 'static {
    /// Run one unit of work
    ///
    /// Returns `true` when work was done. An error ends the thread and is
    /// reported as a crash.
    fn tick(&mut self) -> Result<bool>;
}

/// Role of a managed thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadKind {
    Pipe,
    Worker,
    CatalogWorker,
    Supervisor,
}

impl ThreadKind {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pipe => "pipe",
            Self::Worker => "worker",
            Self::CatalogWorker => "catalog_worker",
            Self::Supervisor => "supervisor",
        }
    }
}

/// Point-in-time view of a managed thread
#[derive(Debug, Clone, Serialize)]
pub struct ThreadTelemetry {
    pub id: Uuid,
    pub name: String,
    pub kind: ThreadKind,
    /// Epoch seconds at spawn
    pub start_time: f64,
    pub state: ThreadState,
    /// Operations per second over the last tick; zero when idle
    pub speed: f64,
    /// Epoch seconds at the end of the last tick
    pub last_tick: f64,
    pub idle: bool,
}

impl ThreadTelemetry {
    /// Seconds since the thread last finished a tick
    pub fn freeze_time(&self, now: f64) -> f64 {
        (now - self.last_tick).max(0.0)
    }
}

/// How a managed thread ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadExit {
    /// Returned after observing `Stopping`
    Clean,
    /// Panicked or returned an error
    Crashed(String),
    /// Still running when the join timeout elapsed
    TimedOut,
}

impl ThreadExit {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Crashed(_) => "crashed",
            Self::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Progress {
    speed: f64,
    last_tick: f64,
    idle: bool,
}

struct Shared {
    state: StateCell,
    progress: Mutex<Progress>,
}

impl Shared {
    fn record(&self, progress: Progress) {
        let mut guard = self
            .progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = progress;
    }

    fn progress(&self) -> Progress {
        *self
            .progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Leaves the state terminal however the loop ends, unwinding included
struct TerminateOnExit(Arc<Shared>);

impl Drop for TerminateOnExit {
    fn drop(&mut self) {
        self.0.state.terminate();
    }
}

fn run_loop(
    mut body: impl LoopBody,
    shared: Arc<Shared>,
    tick: Duration,
    clock: SharedClock,
) -> Result<()> {
    let _terminate = TerminateOnExit(Arc::clone(&shared));

    loop {
        let started = Instant::now();
        let worked = match shared.state.advance() {
            ThreadState::Stopping => break,
            ThreadState::Active => match body.tick() {
                Ok(worked) => worked,
                Err(e) => {
                    tracing::error!(
                        category = e.category().as_str(),
                        recoverable = e.is_recoverable(),
                        error = %e,
                        "Loop body failed, thread exiting"
                    );
                    return Err(e);
                }
            },
            _ => false,
        };

        let elapsed = started.elapsed();
        let period = elapsed.max(tick).as_secs_f64();
        shared.record(Progress {
            speed: if worked && period > 0.0 { 1.0 / period } else { 0.0 },
            last_tick: clock.now(),
            idle: !worked,
        });

        thread::sleep(tick.saturating_sub(elapsed));
    }

    Ok(())
}

/// Handle to a running managed thread
pub struct ThreadHandle {
    id: Uuid,
    name: String,
    kind: ThreadKind,
    start_time: f64,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl std::fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl ThreadHandle {
    /// Spawn a thread running `body` every `tick`
    ///
    /// With `start_paused` the thread comes up `Pausing` and settles into
    /// `Paused` on its first iteration without running the body.
    pub fn spawn(
        kind: ThreadKind,
        body: impl LoopBody,
        tick: Duration,
        clock: SharedClock,
        start_paused: bool,
    ) -> io::Result<Self> {
        let id = Uuid::new_v4();
        let name = format!("lookout-{}-{}", kind.as_str(), &id.simple().to_string()[..8]);
        let start_time = clock.now();

        let shared = Arc::new(Shared {
            state: StateCell::default(),
            progress: Mutex::new(Progress {
                speed: 0.0,
                last_tick: start_time,
                idle: true,
            }),
        });
        // Both requests are legal from a fresh cell
        let _ = shared.state.request(ThreadState::Active);
        if start_paused {
            let _ = shared.state.request(ThreadState::Pausing);
        }

        let loop_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_loop(body, loop_shared, tick, clock))?;

        tracing::debug!(thread = %name, kind = kind.as_str(), "Thread started");

        Ok(Self {
            id,
            name,
            kind,
            start_time,
            shared,
            handle: Some(handle),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ThreadKind {
        self.kind
    }

    /// Current lifecycle state
    pub fn state(&self) -> ThreadState {
        self.shared.state.get()
    }

    /// Whether the OS thread is still running
    pub fn is_alive(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Running and not asked to stop
    pub fn is_live(&self) -> bool {
        self.is_alive() && self.state() != ThreadState::Stopping
    }

    /// Request `Active -> Pausing`
    pub fn pause(&self) -> std::result::Result<ThreadState, StateError> {
        self.shared.state.request(ThreadState::Pausing)
    }

    /// Request `Paused -> Resuming`
    pub fn resume(&self) -> std::result::Result<ThreadState, StateError> {
        self.shared.state.request(ThreadState::Resuming)
    }

    /// Request `Stopping`
    pub fn stop(&self) -> std::result::Result<ThreadState, StateError> {
        self.shared.state.request(ThreadState::Stopping)
    }

    /// Request `Stopping`, retrying while the loop is mid-transition
    ///
    /// Returns `false` if the state stayed locked for the whole `timeout`.
    pub fn stop_within(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.stop() {
                Ok(_) => return true,
                Err(StateError::IllegalTransition {
                    from: ThreadState::Stopping,
                    ..
                }) => return true,
                Err(_) if !self.is_alive() => return true,
                Err(_) if Instant::now() >= deadline => return false,
                Err(_) => thread::sleep(Duration::from_millis(1)),
            }
        }
    }

    /// Snapshot of the thread's telemetry
    pub fn telemetry(&self) -> ThreadTelemetry {
        let progress = self.shared.progress();
        ThreadTelemetry {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            start_time: self.start_time,
            state: self.state(),
            speed: progress.speed,
            last_tick: progress.last_tick,
            idle: progress.idle,
        }
    }

    /// Wait up to `timeout` for the thread to finish
    ///
    /// A thread still running at the deadline is detached.
    pub fn join(mut self, timeout: Duration) -> ThreadExit {
        let Some(handle) = self.handle.take() else {
            return ThreadExit::Clean;
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            let now = Instant::now();
            if now >= deadline {
                return ThreadExit::TimedOut;
            }
            thread::sleep(JOIN_POLL.min(deadline - now));
        }

        match handle.join() {
            Ok(Ok(())) => ThreadExit::Clean,
            Ok(Err(e)) => ThreadExit::Crashed(e.to_string()),
            Err(payload) => ThreadExit::Crashed(panic_message(payload.as_ref())),
        }
    }
}
