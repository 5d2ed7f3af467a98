//! Common test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lookout::config::Config;
use lookout::events::{Event, EventHandler, EventLog, MemoryListener};
use lookout::models::{Catalog, ExecuteMode, ParseResult, Task, Timing};
use lookout::plugins::{Parser, PluginError, PluginRegistry, PluginResult};
use lookout::resolver::Resolver;
use lookout::storage::HashStorage;
use lookout::utils::ManualClock;

/// One scripted reaction of a [`ScriptedParser`]
#[derive(Debug, Clone)]
pub enum Step {
    Return(Vec<ParseResult>),
    Fail(String),
    Panic(String),
}

/// Parser replaying a queue of steps; returns nothing once the queue is empty
pub struct ScriptedParser {
    name: String,
    interval: f64,
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Task>>,
}

impl ScriptedParser {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            interval: 5.0,
            steps: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_interval(mut self, interval: f64) -> Self {
        self.interval = interval;
        self
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn returns(&self, results: Vec<ParseResult>) {
        self.push(Step::Return(results));
    }

    /// Tasks seen so far, in call order
    pub fn calls(&self) -> Vec<Task> {
        self.calls.lock().unwrap().clone()
    }
}

impl Parser for ScriptedParser {
    fn name(&self) -> &str {
        &self.name
    }

    fn catalog(&self) -> Catalog {
        Catalog::new(self.name.clone(), Timing::interval(self.interval))
    }

    fn execute(&self, _mode: ExecuteMode, task: &Task) -> PluginResult<Vec<ParseResult>> {
        self.calls.lock().unwrap().push(task.clone());
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            None => Ok(Vec::new()),
            Some(Step::Return(results)) => Ok(results),
            Some(Step::Fail(message)) => Err(PluginError::execution(self.name.clone(), message)),
            Some(Step::Panic(message)) => panic!("{message}"),
        }
    }
}

/// Resolver wired to in-memory collaborators and a manual clock
pub struct Harness {
    pub config: Config,
    pub clock: Arc<ManualClock>,
    pub registry: Arc<PluginRegistry>,
    pub storage: Arc<HashStorage>,
    pub events: Arc<EventHandler>,
    pub log: EventLog,
    pub resolver: Arc<Resolver>,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        let clock = ManualClock::shared(0.0);
        let registry = Arc::new(PluginRegistry::new(config.engine.plugin_error_budget));
        let storage = Arc::new(HashStorage::in_memory(clock.clone()).unwrap());
        let listener = MemoryListener::new();
        let log = listener.events();
        let events = Arc::new(EventHandler::spawn(vec![Box::new(listener)]).unwrap());
        let resolver = Arc::new(Resolver::new(
            &config,
            clock.clone(),
            registry.clone(),
            storage.clone(),
            events.clone(),
        ));

        Self {
            config,
            clock,
            registry,
            storage,
            events,
            log,
            resolver,
        }
    }

    /// Register a scripted parser and keep a handle to it
    pub fn plugin(&self, parser: ScriptedParser) -> Arc<ScriptedParser> {
        let parser = Arc::new(parser);
        self.registry.register(parser.clone(), "1");
        parser
    }

    /// Every event delivered so far
    pub fn events(&self) -> Vec<Event> {
        assert!(self.events.flush(Duration::from_secs(2)), "event flush timed out");
        self.log.snapshot()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

/// Config with short ticks for tests that run real threads
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.engine.pipe_tick_ms = 5;
    config.engine.worker_tick_ms = 5;
    config.engine.manager_tick_ms = 10;
    config.engine.join_timeout_ms = 1000;
    config
}

/// Poll `condition` for up to two seconds
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}
