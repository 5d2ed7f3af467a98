//! Pipe thread body
//!
//! Every tick the pipe:
//!
//! 1. drops dedup hashes older than the retention window,
//! 2. compares the plugin hash snapshot against the previous one and
//!    reseeds or evicts the catalogs of every plugin that changed,
//! 3. moves due catalogs and targets into their dispatch queues.

use std::collections::{BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use super::runner::LoopBody;
use crate::config::Config;
use crate::error::Result;
use crate::models::ContentHash;
use crate::resolver::{DispatchReport, Resolver};
use crate::utils::panic_message;

/// Outcome of one reindex pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexReport {
    /// Plugins whose catalog was (re)seeded
    pub indexed: Vec<String>,
    /// Plugins whose pending work was evicted
    pub removed: Vec<String>,
    /// Plugins whose catalog could not be produced
    pub failed: Vec<String>,
}

impl ReindexReport {
    pub fn is_empty(&self) -> bool {
        self.indexed.is_empty() && self.removed.is_empty() && self.failed.is_empty()
    }
}

/// Cleanup, reindex and dispatch loop
pub struct Pipe {
    resolver: Arc<Resolver>,
    retention: f64,
    dispatch_wait: Duration,
    known: HashMap<String, ContentHash>,
}

impl Pipe {
    pub fn new(resolver: Arc<Resolver>, config: &Config) -> Self {
        Self {
            resolver,
            retention: config.retention(),
            dispatch_wait: config.dispatch_wait(),
            known: HashMap::new(),
        }
    }

    /// Drop dedup hashes older than the retention window
    pub fn cleanup(&self) -> Result<usize> {
        let cutoff = self.resolver.now() - self.retention;
        let removed = self.resolver.storage().cleanup(Some(cutoff))?;
        if removed > 0 {
            tracing::debug!(removed, cutoff, "Expired hashes removed");
        }
        Ok(removed)
    }

    /// Reseed or evict every plugin whose hash changed since the last pass
    pub fn reindex(&mut self) -> ReindexReport {
        let current = self.resolver.scripts().hashes();
        let changed: BTreeSet<&String> = current
            .keys()
            .chain(self.known.keys())
            .filter(|name| current.get(*name) != self.known.get(*name))
            .collect();

        let mut report = ReindexReport::default();
        for name in changed {
            if current.contains_key(name) {
                self.index(name, &mut report);
            } else {
                self.evict(name);
                report.removed.push(name.clone());
            }
        }

        self.known = current;
        report
    }

    fn index(&self, name: &str, report: &mut ReindexReport) {
        let parser = match self.resolver.scripts().parser(name) {
            Ok(parser) => parser,
            Err(e) => {
                tracing::warn!(script = name, error = %e, "Plugin cannot be indexed");
                self.evict(name);
                report.removed.push(name.to_string());
                return;
            }
        };

        let catalog = match panic::catch_unwind(AssertUnwindSafe(|| parser.catalog())) {
            Ok(catalog) => catalog,
            Err(payload) => {
                tracing::error!(
                    script = name,
                    error = %panic_message(payload.as_ref()),
                    "Plugin panicked while building its catalog"
                );
                report.failed.push(name.to_string());
                return;
            }
        };

        if catalog.script != name {
            tracing::warn!(
                script = name,
                catalog_script = %catalog.script,
                "Plugin seeded a catalog for another plugin"
            );
        }

        match self.resolver.insert_catalog(catalog, true) {
            Some(due) => {
                tracing::info!(script = name, due, "Plugin indexed");
                report.indexed.push(name.to_string());
            }
            None => report.failed.push(name.to_string()),
        }
    }

    fn evict(&self, name: &str) {
        let catalogs = self.resolver.remove_catalog(name);
        let targets = self.resolver.remove_targets(name);
        tracing::info!(script = name, catalogs, targets, "Plugin removed, pending work evicted");
    }

    /// Move due work into both queues
    pub fn dispatch(&self) -> (DispatchReport, DispatchReport) {
        (
            self.resolver.dispatch_catalogs(self.dispatch_wait),
            self.resolver.dispatch_targets(self.dispatch_wait),
        )
    }
}

impl LoopBody for Pipe {
    fn tick(&mut self) -> Result<bool> {
        let cleaned = self.cleanup()?;
        let reindexed = self.reindex();
        let (catalogs, targets) = self.dispatch();

        Ok(cleaned > 0
            || !reindexed.is_empty()
            || catalogs.queued + catalogs.lost + targets.queued + targets.lost > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventHandler;
    use crate::models::{Catalog, ExecuteMode, ParseResult, Target, Task, Timing};
    use crate::plugins::{Parser, PluginRegistry, PluginResult};
    use crate::storage::{tables, HashStorage};
    use crate::utils::ManualClock;

    struct Shop;

    impl Parser for Shop {
        fn name(&self) -> &str {
            "shop"
        }

        fn catalog(&self) -> Catalog {
            Catalog::new("shop", Timing::interval(10.0))
        }

        fn execute(&self, _mode: ExecuteMode, _task: &Task) -> PluginResult<Vec<ParseResult>> {
            Ok(Vec::new())
        }
    }

    struct Broken;

    impl Parser for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn catalog(&self) -> Catalog {
            panic!("no catalog today")
        }

        fn execute(&self, _mode: ExecuteMode, _task: &Task) -> PluginResult<Vec<ParseResult>> {
            Ok(Vec::new())
        }
    }

    fn setup(clock: &Arc<ManualClock>) -> (Arc<PluginRegistry>, Arc<Resolver>, Pipe) {
        let registry = Arc::new(PluginRegistry::new(3));
        let storage = Arc::new(HashStorage::in_memory(clock.clone()).unwrap());
        let events = Arc::new(EventHandler::spawn(Vec::new()).unwrap());
        let config = Config::default();
        let resolver = Arc::new(Resolver::new(
            &config,
            clock.clone(),
            registry.clone(),
            storage,
            events,
        ));
        let pipe = Pipe::new(resolver.clone(), &config);
        (registry, resolver, pipe)
    }

    #[test]
    fn test_reindex_seeds_new_plugins_once() {
        let clock = ManualClock::shared(0.0);
        let (registry, resolver, mut pipe) = setup(&clock);
        registry.register(Arc::new(Shop), "1");

        let report = pipe.reindex();
        assert_eq!(report.indexed, vec!["shop".to_string()]);
        assert_eq!(resolver.scheduled_catalogs()[0].0, 10.0);

        assert!(pipe.reindex().is_empty());
        assert_eq!(resolver.catalog_schedule_len(), 1);
    }

    #[test]
    fn test_reindex_replaces_catalog_on_new_version() {
        let clock = ManualClock::shared(0.0);
        let (registry, resolver, mut pipe) = setup(&clock);
        registry.register(Arc::new(Shop), "1");
        pipe.reindex();

        clock.set(3.0);
        registry.register(Arc::new(Shop), "2");
        assert_eq!(pipe.reindex().indexed, vec!["shop".to_string()]);

        let scheduled = resolver.scheduled_catalogs();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].0, 13.0);
    }

    #[test]
    fn test_reindex_evicts_unloaded_plugins() {
        let clock = ManualClock::shared(0.0);
        let (registry, resolver, mut pipe) = setup(&clock);
        registry.register(Arc::new(Shop), "1");
        pipe.reindex();
        resolver.insert_target(Target::page("shop", "p", Timing::interval(5.0)));

        registry.unload("shop");
        let report = pipe.reindex();
        assert_eq!(report.removed, vec!["shop".to_string()]);
        assert_eq!(resolver.catalog_schedule_len(), 0);
        assert_eq!(resolver.target_schedule_len(), 0);
    }

    #[test]
    fn test_stub_without_parser_is_evicted() {
        let clock = ManualClock::shared(0.0);
        let (registry, resolver, mut pipe) = setup(&clock);
        registry.register_stub("draft", "1");
        resolver.insert_target(Target::page("draft", "p", Timing::interval(5.0)));

        assert_eq!(pipe.reindex().removed, vec!["draft".to_string()]);
        assert_eq!(resolver.target_schedule_len(), 0);
    }

    #[test]
    fn test_catalog_panic_does_not_abort_batch() {
        let clock = ManualClock::shared(0.0);
        let (registry, resolver, mut pipe) = setup(&clock);
        registry.register(Arc::new(Broken), "1");
        registry.register(Arc::new(Shop), "1");

        let report = pipe.reindex();
        assert_eq!(report.failed, vec!["broken".to_string()]);
        assert_eq!(report.indexed, vec!["shop".to_string()]);
        assert_eq!(resolver.catalog_schedule_len(), 1);
    }

    #[test]
    fn test_tick_dispatches_due_catalogs() {
        let clock = ManualClock::shared(0.0);
        let (registry, resolver, mut pipe) = setup(&clock);
        registry.register(Arc::new(Shop), "1");

        assert!(pipe.tick().unwrap());
        assert_eq!(resolver.catalog_queue_len(), 0);

        clock.set(10.0);
        assert!(pipe.tick().unwrap());
        assert_eq!(resolver.catalog_queue_len(), 1);
        assert_eq!(resolver.catalog_schedule_len(), 0);

        assert!(!pipe.tick().unwrap());
    }

    #[test]
    fn test_cleanup_respects_retention() {
        let clock = ManualClock::shared(0.0);
        let (_registry, resolver, pipe) = setup(&clock);
        let retention = Config::default().retention();
        let storage = resolver.storage();

        storage
            .add(&ContentHash::of(b"old"), Some(0.0), tables::ANNOUNCES)
            .unwrap();
        storage
            .add(&ContentHash::of(b"new"), Some(retention), tables::ANNOUNCES)
            .unwrap();

        clock.set(retention + 1.0);
        assert_eq!(pipe.cleanup().unwrap(), 1);
        assert_eq!(storage.count(tables::ANNOUNCES).unwrap(), 1);
    }
}
