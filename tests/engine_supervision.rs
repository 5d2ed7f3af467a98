//! Supervisor behavior with real threads

mod common;

use std::sync::Arc;

use common::{fast_config, wait_for, Harness, ScriptedParser, Step};
use lookout::engine::{ThreadKind, ThreadManager, ThreadState};
use lookout::events::{AlertCode, Event};
use lookout::models::{Target, Timing};
use lookout::utils::SystemClock;

fn manager(h: &Harness) -> Arc<ThreadManager> {
    Arc::new(ThreadManager::new(
        &h.config,
        h.resolver.clone(),
        SystemClock::shared(),
    ))
}

#[test]
fn test_pool_grows_then_trims_to_configured_size() {
    let mut config = fast_config();
    config.engine.workers = 3;
    config.engine.catalog_workers = 0;
    let h = Harness::new(config);
    let manager = manager(&h);

    assert_eq!(manager.live_workers(), 0);
    manager.tick().unwrap();
    assert_eq!(manager.live_workers(), 3);
    assert!(manager.pipe_alive());

    manager.set_worker_count(1);
    manager.tick().unwrap();
    assert_eq!(manager.live_workers(), 1);

    // Trimmed threads exit and are reaped on later ticks
    assert!(wait_for(|| {
        manager.tick().unwrap();
        manager
            .telemetry()
            .iter()
            .filter(|t| t.kind == ThreadKind::Worker)
            .count()
            == 1
    }));

    manager.close();
    manager.join().unwrap();
}

#[test]
fn test_crashed_worker_is_replaced_and_alerted() {
    let mut config = fast_config();
    config.engine.production = false;
    config.engine.workers = 1;
    config.engine.catalog_workers = 0;
    let h = Harness::new(config);
    let shop = h.plugin(ScriptedParser::new("shop"));
    shop.push(Step::Fail("selector changed".into()));

    h.resolver
        .insert_target(Target::page("shop", "p", Timing::interval(1.0)));
    h.clock.set(1.0);

    let manager = manager(&h);
    manager.tick().unwrap();
    let first = manager.telemetry();

    // Pipe dispatches the target, the worker fails on it and dies
    assert!(wait_for(|| {
        manager.tick().unwrap();
        let events = h.events();
        events.iter().any(|event| {
            matches!(
                event,
                Event::Alert {
                    code: AlertCode::ThreadCrashed,
                    ..
                }
            )
        })
    }));

    assert!(wait_for(|| {
        manager.tick().unwrap();
        manager.live_workers() == 1
    }));
    let replaced = manager
        .telemetry()
        .into_iter()
        .filter(|t| t.kind == ThreadKind::Worker)
        .all(|t| first.iter().all(|old| old.id != t.id));
    assert!(replaced);

    manager.close();
    manager.join().unwrap();
}

#[test]
fn test_paused_manager_spawns_paused_threads() {
    let mut config = fast_config();
    config.engine.workers = 1;
    config.engine.catalog_workers = 1;
    let h = Harness::new(config);
    let manager = manager(&h);

    manager.pause();
    manager.tick().unwrap();
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
fn test_started_engine_runs_catalogs() {
    let mut config = fast_config();
    config.engine.workers = 1;
    config.engine.catalog_workers = 1;
    let h = Harness::new(config);
    let shop = h.plugin(ScriptedParser::new("shop").with_interval(0.5));

    let manager = manager(&h);
    manager.start().unwrap();

    // The pipe seeds the catalog at t=0.5 on the manual clock
    assert!(wait_for(|| h.resolver.catalog_schedule_len() == 1));
    h.clock.set(1.0);
    assert!(wait_for(|| !shop.calls().is_empty()));

    let drain = manager.close();
    assert!(drain > std::time::Duration::ZERO);
    manager.join().unwrap();
    assert!(manager
        .telemetry()
        .is_empty());
}
