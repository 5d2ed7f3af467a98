use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lookout::config::Config;

mod commands;

#[derive(Parser)]
#[command(
    name = "lookout",
    version,
    about = "Plugin-driven monitoring engine with adaptive scheduling and deduplication",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file; environment variables are used otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the configuration
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitoring engine
    Run {
        /// Override the number of target workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Override the number of catalog workers
        #[arg(long)]
        catalog_workers: Option<usize>,

        /// Let plugin failures crash their worker instead of isolating them
        #[arg(long, default_value = "false")]
        development: bool,
    },

    /// Inspect or maintain a hash storage dump
    Cache {
        #[command(subcommand)]
        action: CacheAction,

        /// Dump file; defaults to the configured dump path
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show hash counts per table
    Stats,

    /// Drop hashes older than the retention window
    Cleanup,

    /// Compact the store
    Defragment,

    /// Write a binary snapshot
    Backup {
        /// Snapshot path; defaults to the configured backup path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Rebuild the dump from a binary snapshot
    Restore {
        /// Snapshot path; defaults to the configured backup path
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(format) = &cli.log_format {
        config.logging.format = format.clone();
    }

    setup_tracing(&config.logging.level, &config.logging.format, cli.verbose)?;
    config.validate().context("Invalid configuration")?;

    match cli.command {
        Commands::Run {
            workers,
            catalog_workers,
            development,
        } => {
            if let Some(workers) = workers {
                config.engine.workers = workers;
            }
            if let Some(catalog_workers) = catalog_workers {
                config.engine.catalog_workers = catalog_workers;
            }
            if development {
                config.engine.production = false;
            }
            tracing::info!(
                workers = config.engine.workers,
                catalog_workers = config.engine.catalog_workers,
                production = config.engine.production,
                "Starting run command"
            );
            commands::run(config).await?;
        }

        Commands::Cache { action, file } => {
            let path = file.unwrap_or_else(|| config.storage.dump_path.clone());
            tracing::info!(path = %path.display(), "Starting cache command");
            match action {
                CacheAction::Stats => commands::cache::stats(&path)?,
                CacheAction::Cleanup => commands::cache::cleanup(&config, &path)?,
                CacheAction::Defragment => commands::cache::defragment(&path)?,
                CacheAction::Backup { output } => {
                    let output = output.unwrap_or_else(|| config.storage.backup_path.clone());
                    commands::cache::backup(&path, &output)?;
                }
                CacheAction::Restore { input } => {
                    let input = input.unwrap_or_else(|| config.storage.backup_path.clone());
                    commands::cache::restore(&input, &path)?;
                }
            }
        }

        Commands::Config => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{rendered}");
        }
    }

    Ok(())
}

fn setup_tracing(level: &str, format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("lookout=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("lookout={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_thread_names(true))
                .try_init()?;
        }
    }

    Ok(())
}
