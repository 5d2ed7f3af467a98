use anyhow::{Context, Result};
use std::path::Path;

use lookout::config::Config;
use lookout::storage::HashStorage;
use lookout::utils::{Clock, SystemClock};

fn open(path: &Path) -> Result<HashStorage> {
    let storage = HashStorage::in_memory(SystemClock::shared())?;
    if path.exists() {
        storage
            .load(path)
            .with_context(|| format!("Failed to load dump: {}", path.display()))?;
    } else {
        tracing::warn!(path = %path.display(), "Dump file not found, starting empty");
    }
    Ok(storage)
}

/// Print row counts per table
pub fn stats(path: &Path) -> Result<()> {
    let storage = open(path)?;

    println!("Hash storage: {}", path.display());
    println!("===========================");
    for table in storage.tables()? {
        println!("  {:<16} {:>10}", table, storage.count(&table)?);
    }
    println!("  {:<16} {:>10}", "total", storage.len()?);
    Ok(())
}

/// Drop hashes older than the retention window and rewrite the dump
pub fn cleanup(config: &Config, path: &Path) -> Result<()> {
    let storage = open(path)?;
    let cutoff = SystemClock.now() - config.retention();
    let removed = storage.cleanup(Some(cutoff))?;
    storage.dump(path)?;

    println!("Removed {removed} expired hashes from {}", path.display());
    Ok(())
}

/// Compact the store and rewrite the dump
pub fn defragment(path: &Path) -> Result<()> {
    let storage = open(path)?;
    storage.defragment()?;
    let rows = storage.dump(path)?;

    println!("Defragmented {} ({rows} hashes)", path.display());
    Ok(())
}

/// Write a binary snapshot of a dump
pub fn backup(path: &Path, output: &Path) -> Result<()> {
    let storage = open(path)?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    storage.backup(output)?;

    println!("Backed up {} to {}", path.display(), output.display());
    Ok(())
}

/// Rebuild a dump from a binary snapshot
pub fn restore(input: &Path, path: &Path) -> Result<()> {
    let storage = HashStorage::in_memory(SystemClock::shared())?;
    storage
        .restore(input)
        .with_context(|| format!("Failed to restore backup: {}", input.display()))?;
    let rows = storage.dump(path)?;

    println!("Restored {rows} hashes from {} into {}", input.display(), path.display());
    Ok(())
}
