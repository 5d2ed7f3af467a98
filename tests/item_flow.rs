//! Result routing: item dedup, restocks, terminal records and plugin failures

mod common;

use std::time::Duration;

use common::{Harness, ScriptedParser, Step};
use lookout::config::Config;
use lookout::error::Error;
use lookout::events::{AlertCode, Event};
use lookout::models::{
    Catalog, ExecuteMode, Item, Message, Target, TargetEnd, TargetEndKind, Timing,
};
use lookout::resolver::ExecutionOutcome;

/// Queue one due catalog for `script`
fn queue_catalog(h: &Harness, script: &str) {
    h.resolver
        .insert_catalog(Catalog::new(script, Timing::interval(1.0)), false);
    h.clock.advance(1.0);
    h.resolver.dispatch_catalogs(Duration::ZERO);
}

fn items(events: &[Event]) -> Vec<&Item> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Item(item) => Some(item),
            _ => None,
        })
        .collect()
}

fn alerts(events: &[Event]) -> Vec<AlertCode> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Alert { code, .. } => Some(*code),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Items
// ============================================================================

#[test]
fn test_announce_surfaces_once() {
    let h = Harness::default();
    let shop = h.plugin(ScriptedParser::new("shop"));
    let item = Item::announce("shop", "https://shop.example/p/1", "Runner");

    shop.returns(vec![item.clone().into()]);
    queue_catalog(&h, "shop");
    let first = h.resolver.execute(ExecuteMode::Catalog).unwrap().unwrap();

    shop.returns(vec![item.clone().into()]);
    queue_catalog(&h, "shop");
    let second = h.resolver.execute(ExecuteMode::Catalog).unwrap().unwrap();

    assert_eq!(first.items_surfaced, 1);
    assert_eq!(second.items_surfaced, 0);
    assert_eq!(second.duplicates, 1);
    assert_eq!(items(&h.events()), vec![&item]);
}

#[test]
fn test_announce_with_new_content_surfaces_again() {
    let h = Harness::default();
    let shop = h.plugin(ScriptedParser::new("shop"));
    let item = Item::announce("shop", "https://shop.example/p/1", "Runner");

    shop.returns(vec![item.clone().into()]);
    queue_catalog(&h, "shop");
    h.resolver.execute(ExecuteMode::Catalog).unwrap();

    // Announces hash full content by default
    shop.returns(vec![item.clone().with_price(99.0, "EUR").into()]);
    queue_catalog(&h, "shop");
    let report = h.resolver.execute(ExecuteMode::Catalog).unwrap().unwrap();
    assert_eq!(report.items_surfaced, 1);
}

#[test]
fn test_release_schedules_restock_and_enables_restocks() {
    let h = Harness::default();
    let shop = h.plugin(ScriptedParser::new("shop"));

    let follow_up = Target::restock("shop", 42, Timing::interval(30.0));
    let release = Item::release("shop", "https://shop.example/p/42", "Runner")
        .with_id(42)
        .with_restock_target(follow_up.clone());
    let restock = Item::restock("shop", "https://shop.example/p/42", "Runner", 42);
    let orphan = Item::restock("shop", "https://shop.example/p/7", "Other", 7);

    // Unknown ids are dropped before any release
    shop.returns(vec![restock.clone().into()]);
    queue_catalog(&h, "shop");
    let report = h.resolver.execute(ExecuteMode::Catalog).unwrap().unwrap();
    assert_eq!(report.dropped, 1);

    shop.returns(vec![release.clone().into()]);
    queue_catalog(&h, "shop");
    let report = h.resolver.execute(ExecuteMode::Catalog).unwrap().unwrap();
    assert_eq!(report.items_surfaced, 1);
    assert_eq!(report.targets_scheduled, 1);
    assert_eq!(h.resolver.scheduled_targets()[0].1, follow_up);
    assert!(h.storage.contains_item_id(42).unwrap());

    // Restocks are not deduplicated
    shop.returns(vec![restock.clone().into(), restock.clone().into(), orphan.into()]);
    queue_catalog(&h, "shop");
    let report = h.resolver.execute(ExecuteMode::Catalog).unwrap().unwrap();
    assert_eq!(report.items_surfaced, 2);
    assert_eq!(report.dropped, 1);

    assert_eq!(items(&h.events()), vec![&release, &restock, &restock]);
}

#[test]
fn test_release_surfaces_once_per_identity() {
    let h = Harness::default();
    let shop = h.plugin(ScriptedParser::new("shop"));
    let release = Item::release("shop", "https://shop.example/p/1", "Runner");

    shop.returns(vec![release.clone().into()]);
    queue_catalog(&h, "shop");
    h.resolver.execute(ExecuteMode::Catalog).unwrap();

    // Release level 1 ignores price changes
    shop.returns(vec![release.clone().with_price(150.0, "EUR").into()]);
    queue_catalog(&h, "shop");
    let report = h.resolver.execute(ExecuteMode::Catalog).unwrap().unwrap();
    assert_eq!(report.items_surfaced, 0);
    assert_eq!(report.duplicates, 1);
}

// ============================================================================
// Target ends and messages
// ============================================================================

#[test]
fn test_target_end_notifies_once_and_messages_always() {
    let h = Harness::default();
    let shop = h.plugin(ScriptedParser::new("shop"));
    let target = Target::page("shop", "p", Timing::interval(5.0));
    let end = TargetEnd::new(target, TargetEndKind::SoldOut);
    let message = Message::new("shop", "still watching");

    for _ in 0..2 {
        shop.returns(vec![end.clone().into(), message.clone().into()]);
        queue_catalog(&h, "shop");
        h.resolver.execute(ExecuteMode::Catalog).unwrap();
    }

    let events = h.events();
    let ends = events
        .iter()
        .filter(|event| matches!(event, Event::TargetEnd(_)))
        .count();
    let messages = events
        .iter()
        .filter(|event| matches!(event, Event::Message(_)))
        .count();
    assert_eq!(ends, 1);
    assert_eq!(messages, 2);
}

// ============================================================================
// Plugin failures
// ============================================================================

#[test]
fn test_production_failure_alerts_and_unloads_after_budget() {
    let mut config = Config::default();
    config.engine.plugin_error_budget = 2;
    let h = Harness::new(config);
    let shop = h.plugin(ScriptedParser::new("shop"));
    shop.push(Step::Fail("timeout".into()));
    shop.push(Step::Fail("timeout".into()));

    queue_catalog(&h, "shop");
    let report = h.resolver.execute(ExecuteMode::Catalog).unwrap().unwrap();
    assert_eq!(report.outcome, ExecutionOutcome::Failed);
    assert_eq!(h.registry.error_count("shop"), Some(1));

    queue_catalog(&h, "shop");
    h.resolver.execute(ExecuteMode::Catalog).unwrap();
    assert!(h.registry.version("shop").is_none());

    assert_eq!(
        alerts(&h.events()),
        vec![
            AlertCode::PluginFailure,
            AlertCode::PluginFailure,
            AlertCode::PluginUnloaded
        ]
    );
}

#[test]
fn test_panicking_plugin_is_isolated() {
    let h = Harness::default();
    let shop = h.plugin(ScriptedParser::new("shop"));
    shop.push(Step::Panic("index out of bounds".into()));

    queue_catalog(&h, "shop");
    let report = h.resolver.execute(ExecuteMode::Catalog).unwrap().unwrap();
    assert_eq!(report.outcome, ExecutionOutcome::Failed);

    // The resolver keeps working
    shop.returns(vec![Message::new("shop", "recovered").into()]);
    queue_catalog(&h, "shop");
    let report = h.resolver.execute(ExecuteMode::Catalog).unwrap().unwrap();
    assert_eq!(report.messages, 1);
}

#[test]
fn test_development_mode_surfaces_failures() {
    let mut config = Config::default();
    config.engine.production = false;
    let h = Harness::new(config);
    let shop = h.plugin(ScriptedParser::new("shop"));
    shop.push(Step::Fail("bad selector".into()));

    queue_catalog(&h, "shop");
    let err = h.resolver.execute(ExecuteMode::Catalog).unwrap_err();
    assert!(matches!(err, Error::Plugin(_)));
    assert!(err.to_string().contains("bad selector"));
}

#[test]
fn test_missing_parser_is_skipped() {
    let h = Harness::default();
    let shop = h.plugin(ScriptedParser::new("shop"));

    queue_catalog(&h, "shop");
    h.registry.unload("shop");

    let report = h.resolver.execute(ExecuteMode::Catalog).unwrap().unwrap();
    assert_eq!(report.outcome, ExecutionOutcome::Skipped);
    assert!(shop.calls().is_empty());
    assert!(alerts(&h.events()).is_empty());
}

#[test]
fn test_storage_failure_still_schedules_catalog_and_targets() {
    let h = Harness::default();
    let shop = h.plugin(ScriptedParser::new("shop"));
    h.resolver
        .insert_catalog(Catalog::new("shop", Timing::scheduled(1.0)), false);
    h.clock.set(1.0);
    h.resolver.dispatch_catalogs(Duration::ZERO);

    let follow_up = Target::page("shop", "p", Timing::scheduled(60.0));
    shop.returns(vec![
        Item::announce("shop", "https://shop.example/p/1", "Runner").into(),
        Message::new("shop", "after the item").into(),
        Catalog::new("shop", Timing::scheduled(50.0)).into(),
        follow_up.clone().into(),
    ]);

    // A non-finite clock makes every dedup insertion fail
    h.clock.set(f64::NAN);
    let err = h.resolver.execute(ExecuteMode::Catalog).unwrap_err();
    assert!(matches!(err, Error::Storage(_)));

    assert_eq!(h.resolver.scheduled_catalogs()[0].0, 50.0);
    assert_eq!(h.resolver.scheduled_targets(), vec![(60.0, follow_up)]);

    let events = h.events();
    assert!(items(&events).is_empty());
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::Message(m) if m.text == "after the item")));
}
