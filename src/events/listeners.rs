//! Stock listeners

use std::sync::{Arc, Mutex, MutexGuard};

use super::{Event, Listener};

/// Writes every event to the log
#[derive(Debug, Default)]
pub struct TracingListener;

impl Listener for TracingListener {
    fn name(&self) -> &str {
        "tracing"
    }

    fn on_event(&mut self, event: &Event) {
        match event {
            Event::Monitor(state) => tracing::info!(?state, "Monitor"),
            Event::Alert {
                code,
                thread,
                message,
            } => tracing::warn!(code = code.as_str(), thread = %thread, "Alert: {message}"),
            Event::Item(item) => tracing::info!(
                script = %item.script,
                stage = item.kind.name(),
                url = %item.url,
                "Item: {}",
                crate::utils::truncate_text(&item.name, 80)
            ),
            Event::TargetEnd(end) => tracing::info!(
                script = %end.target.script,
                kind = %end.kind,
                "Target ended"
            ),
            Event::Message(message) => {
                tracing::info!(script = %message.script, "Message: {}", message.text)
            }
        }
    }
}

/// Shared view of the events collected by a [`MemoryListener`]
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of every event received so far
    pub fn snapshot(&self) -> Vec<Event> {
        self.lock().clone()
    }

    /// Number of events received
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing was received
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop everything received so far
    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Keeps every event in memory, for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryListener {
    log: EventLog,
}

impl MemoryListener {
    /// Create an empty listener
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the collected events, usable after the listener is moved
    pub fn events(&self) -> EventLog {
        self.log.clone()
    }
}

impl Listener for MemoryListener {
    fn name(&self) -> &str {
        "memory"
    }

    fn on_event(&mut self, event: &Event) {
        self.log.lock().push(event.clone());
    }
}
