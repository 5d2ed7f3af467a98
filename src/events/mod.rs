//! Event delivery
//!
//! The engine reports everything user-visible through [`EventHandler::emit`]:
//! lifecycle changes, alerts, surfaced items, target ends and plugin messages.
//! Emission only enqueues; a dedicated dispatcher thread drains the queue and
//! hands each event to every registered [`Listener`] in emission order. A
//! panicking listener is logged and skipped; it never reaches the emitter.

pub mod listeners;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;

use crate::models::{Item, Message, TargetEnd};

pub use listeners::{EventLog, MemoryListener, TracingListener};

/// Engine lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorEvent {
    Started,
    Stopping,
    Stopped,
}

/// Alert classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCode {
    /// Plugin raised a runtime failure
    PluginFailure,
    /// Plugin exhausted its error budget
    PluginUnloaded,
    /// Managed thread terminated abnormally
    ThreadCrashed,
    /// Supervisor tick failed and the engine shut down
    SupervisorFailure,
}

impl AlertCode {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PluginFailure => "plugin_failure",
            Self::PluginUnloaded => "plugin_unloaded",
            Self::ThreadCrashed => "thread_crashed",
            Self::SupervisorFailure => "supervisor_failure",
        }
    }
}

/// Something the engine wants the outside world to know
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    Monitor(MonitorEvent),
    Alert {
        code: AlertCode,
        /// Name of the thread that raised the alert
        thread: String,
        message: String,
    },
    Item(Item),
    TargetEnd(TargetEnd),
    Message(Message),
}

impl Event {
    /// Alert raised from the current thread
    pub fn alert(code: AlertCode, message: impl Into<String>) -> Self {
        Self::Alert {
            code,
            thread: crate::utils::current_thread_name(),
            message: message.into(),
        }
    }

    /// Short event name, used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Monitor(_) => "monitor",
            Self::Alert { .. } => "alert",
            Self::Item(_) => "item",
            Self::TargetEnd(_) => "target_end",
            Self::Message(_) => "message",
        }
    }
}

/// Receiver of engine events, called on the dispatcher thread
pub trait Listener: Send {
    /// Name used when logging listener failures
    fn name(&self) -> &str {
        "listener"
    }

    /// Handle one event
    fn on_event(&mut self, event: &Event);
}

enum Command {
    Deliver(Event),
    Flush(Sender<()>),
}

/// Queued fan-out of events to listeners
pub struct EventHandler {
    sender: Mutex<Option<Sender<Command>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    emitted: AtomicU64,
}

impl std::fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandler")
            .field("emitted", &self.emitted())
            .finish_non_exhaustive()
    }
}

fn dispatch(receiver: Receiver<Command>, mut listeners: Vec<Box<dyn Listener>>) {
    for command in receiver {
        match command {
            Command::Deliver(event) => {
                for listener in listeners.iter_mut() {
                    let delivered =
                        panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(&event)));
                    if delivered.is_err() {
                        tracing::error!(
                            listener = listener.name(),
                            event = event.name(),
                            "Listener panicked"
                        );
                    }
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Event dispatcher stopped");
}

impl EventHandler {
    /// Start the dispatcher thread with a fixed set of listeners
    pub fn spawn(listeners: Vec<Box<dyn Listener>>) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let dispatcher = thread::Builder::new()
            .name("lookout-events".to_string())
            .spawn(move || dispatch(receiver, listeners))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            dispatcher: Mutex::new(Some(dispatcher)),
            emitted: AtomicU64::new(0),
        })
    }

    fn sender(&self) -> MutexGuard<'_, Option<Sender<Command>>> {
        self.sender.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue an event for delivery; never blocks on listeners
    pub fn emit(&self, event: Event) {
        let sent = match self.sender().as_ref() {
            Some(sender) => sender.send(Command::Deliver(event)).is_ok(),
            None => false,
        };
        if sent {
            self.emitted.fetch_add(1, Ordering::Relaxed);
        } else {
            tracing::debug!("Event dropped, dispatcher closed");
        }
    }

    /// Wait until everything emitted so far has been delivered
    pub fn flush(&self, timeout: Duration) -> bool {
        let (done, waiter) = mpsc::channel();
        let queued = match self.sender().as_ref() {
            Some(sender) => sender.send(Command::Flush(done)).is_ok(),
            None => false,
        };
        queued && waiter.recv_timeout(timeout).is_ok()
    }

    /// Number of events accepted for delivery
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Deliver what is queued, then stop the dispatcher
    pub fn close(&self) {
        self.sender().take();
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Event dispatcher panicked");
            }
        }
    }
}

impl Drop for EventHandler {
    fn drop(&mut self) {
        self.close();
    }
}
