use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use lookout::config::Config;
use lookout::engine::ThreadManager;
use lookout::events::{EventHandler, TracingListener};
use lookout::plugins::builtin::builtin_registry;
use lookout::resolver::Resolver;
use lookout::storage::HashStorage;
use lookout::utils::SystemClock;

/// Run the engine until interrupted or until supervision halts
pub async fn run(config: Config) -> Result<()> {
    println!("Starting lookout engine");
    println!("=======================");
    println!("  Workers: {}", config.engine.workers);
    println!("  Catalog workers: {}", config.engine.catalog_workers);
    println!("  Production mode: {}", config.engine.production);
    println!("  Dump file: {}", config.storage.dump_path.display());

    if let Err(e) = lookout::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    let clock = SystemClock::shared();
    let storage = Arc::new(
        HashStorage::from_config(&config.storage, clock.clone())
            .context("Failed to open hash storage")?,
    );
    let registry = Arc::new(builtin_registry(
        config.engine.plugin_error_budget,
        config.engine.heartbeat_secs,
    ));
    let events = Arc::new(
        EventHandler::spawn(vec![Box::new(TracingListener)])
            .context("Failed to start event dispatcher")?,
    );
    let resolver = Arc::new(Resolver::new(
        &config,
        clock.clone(),
        registry,
        storage.clone(),
        events.clone(),
    ));

    let manager = Arc::new(ThreadManager::new(&config, resolver, clock));
    manager.start().context("Failed to start thread manager")?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for interrupt")?;
            tracing::info!("Interrupt received, shutting down");
        }
        () = wait_halted(&manager, config.manager_tick()) => {
            tracing::warn!("Supervision halted, shutting down");
        }
    }

    let drain = manager.close();
    tracing::info!(drain_secs = drain.as_secs_f64(), "Waiting for threads to finish");
    let joined = {
        let manager = manager.clone();
        tokio::task::spawn_blocking(move || manager.join())
            .await
            .context("Join task failed")?
    };

    events.flush(Duration::from_secs(1));
    events.close();

    let rows = storage
        .dump(&config.storage.dump_path)
        .with_context(|| {
            format!(
                "Failed to dump hash storage to {}",
                config.storage.dump_path.display()
            )
        })?;
    println!("Saved {rows} hashes to {}", config.storage.dump_path.display());

    joined.context("Engine stopped abnormally")?;
    Ok(())
}

async fn wait_halted(manager: &ThreadManager, period: Duration) {
    while !manager.is_halted() {
        tokio::time::sleep(period).await;
    }
}
