//! Content-addressed deduplication cache
//!
//! Hashes of everything the engine has already acted on live in named tables
//! of an in-memory SQLite database. Every table has the same shape:
//!
//! ```text
//! CREATE TABLE "<name>" (
//!     hash BLOB PRIMARY KEY NOT NULL,   -- 32-byte SHA-256
//!     time REAL NOT NULL                -- insertion time, epoch seconds
//! )
//! ```
//!
//! The primary key makes a second insertion of the same hash fail; that
//! failure is reported as [`StorageError::Uniqueness`], which callers treat
//! as "already seen" rather than as a fault. Rows are never updated, only
//! evicted by [`HashStorage::cleanup`] or dropped wholesale by `load`.
//!
//! The store is persisted as a portable SQL script (`dump`/`load`) or as a
//! binary snapshot through SQLite's online backup API (`backup`/`restore`).
//!
//! All tables share one mutex around the connection.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{ffi, params, Connection, DatabaseName};
use thiserror::Error;

use crate::config::StorageConfig;
use crate::models::{ContentHash, Item, TargetEnd};
use crate::utils::SharedClock;

/// Well-known table names
pub mod tables {
    /// Targets that reached a terminal state
    pub const TARGET_ENDS: &str = "target_ends";
    /// Announced items
    pub const ANNOUNCES: &str = "announces";
    /// Released items
    pub const RELEASES: &str = "releases";
    /// Ids of released items, consulted before surfacing restocks
    pub const ITEM_IDS: &str = "item_ids";
    /// Table used when callers do not name one
    pub const DEFAULT: &str = "hashes";
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by the hash storage
#[derive(Error, Debug)]
pub enum StorageError {
    /// The hash is already present in the table
    #[error("Hash {hash} already present in table '{table}'")]
    Uniqueness { table: String, hash: String },

    /// Table name outside `[A-Za-z_][A-Za-z0-9_]*`
    #[error("Invalid table name: '{0}'")]
    InvalidTable(String),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Insertion time is NaN or infinite
    #[error("Invalid insertion time: {0}")]
    InvalidTime(f64),

    /// Dump script ended inside its transaction
    #[error("Incomplete dump script: transaction not committed")]
    IncompleteDump,

    /// Dump file I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether this is the expected "already seen" condition
    pub fn is_uniqueness(&self) -> bool {
        matches!(self, Self::Uniqueness { .. })
    }

    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        self.is_uniqueness()
    }
}

fn validate_table(table: &str) -> StorageResult<()> {
    let mut chars = table.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidTable(table.to_string()))
    }
}

/// Primary key or unique constraint; NOT NULL and CHECK failures are real faults
fn is_duplicate_key(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

fn item_id_hash(id: i64) -> ContentHash {
    ContentHash::of(format!("item_id:{id}").as_bytes())
}

/// Persistent set of seen hashes, partitioned into named tables
pub struct HashStorage {
    conn: Mutex<Connection>,
    clock: SharedClock,
}

impl std::fmt::Debug for HashStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashStorage").finish_non_exhaustive()
    }
}

impl HashStorage {
    /// Create an empty in-memory store
    pub fn in_memory(clock: SharedClock) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    /// Create a store and restore the configured dump if present
    pub fn from_config(config: &StorageConfig, clock: SharedClock) -> StorageResult<Self> {
        let storage = Self::in_memory(clock)?;
        if config.restore_on_start && config.dump_path.exists() {
            let rows = storage.load(&config.dump_path)?;
            tracing::info!(path = %config.dump_path.display(), rows, "Hash storage restored");
        }
        Ok(storage)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_table(conn: &Connection, table: &str) -> StorageResult<()> {
        validate_table(table)?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (
                hash BLOB PRIMARY KEY NOT NULL,
                time REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS \"idx_{table}_time\" ON \"{table}\"(time);"
        ))?;
        Ok(())
    }

    fn table_names(conn: &Connection) -> StorageResult<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn contains_locked(conn: &Connection, hash: &ContentHash, table: &str) -> StorageResult<bool> {
        Self::ensure_table(conn, table)?;
        let exists: bool = conn.query_row(
            &format!("SELECT EXISTS(SELECT 1 FROM \"{table}\" WHERE hash = ?1)"),
            params![&hash.as_bytes()[..]],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn add_locked(
        conn: &Connection,
        hash: &ContentHash,
        table: &str,
        time: f64,
    ) -> StorageResult<()> {
        if !time.is_finite() {
            return Err(StorageError::InvalidTime(time));
        }
        Self::ensure_table(conn, table)?;
        conn.execute(
            &format!("INSERT INTO \"{table}\" (hash, time) VALUES (?1, ?2)"),
            params![&hash.as_bytes()[..], time],
        )
        .map_err(|e| {
            if is_duplicate_key(&e) {
                StorageError::Uniqueness {
                    table: table.to_string(),
                    hash: hash.to_hex(),
                }
            } else {
                StorageError::Database(e)
            }
        })?;
        Ok(())
    }

    fn clear_locked(conn: &Connection) -> StorageResult<usize> {
        let names = Self::table_names(conn)?;
        for name in &names {
            conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{name}\";"))?;
        }
        Ok(names.len())
    }

    // ------------------------------------------------------------------
    // Primitives
    // ------------------------------------------------------------------

    /// Whether `hash` is present in `table`
    pub fn contains(&self, hash: &ContentHash, table: &str) -> StorageResult<bool> {
        Self::contains_locked(&self.lock(), hash, table)
    }

    /// Insert `hash` into `table`, stamped with `time` (default: now)
    ///
    /// Fails with [`StorageError::Uniqueness`] if the hash is already present,
    /// leaving the store unchanged.
    pub fn add(&self, hash: &ContentHash, time: Option<f64>, table: &str) -> StorageResult<()> {
        let time = time.unwrap_or_else(|| self.clock.now());
        Self::add_locked(&self.lock(), hash, table, time)
    }

    /// Insert `hash` unless present; `true` if this call inserted it
    ///
    /// Check and insert happen under one lock acquisition, so concurrent
    /// callers admit a given hash at most once.
    pub fn admit(&self, hash: &ContentHash, table: &str) -> StorageResult<bool> {
        match self.add(hash, None, table) {
            Ok(()) => Ok(true),
            Err(e) if e.is_uniqueness() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete every row in every table inserted at or before `time` (default: now)
    pub fn cleanup(&self, time: Option<f64>) -> StorageResult<usize> {
        let time = time.unwrap_or_else(|| self.clock.now());
        let conn = self.lock();
        let mut removed = 0;
        for table in Self::table_names(&conn)? {
            removed += conn.execute(
                &format!("DELETE FROM \"{table}\" WHERE time <= ?1"),
                params![time],
            )?;
        }
        if removed > 0 {
            tracing::debug!(removed, before = time, "Hash storage cleanup");
        }
        Ok(removed)
    }

    /// Names of existing tables
    pub fn tables(&self) -> StorageResult<Vec<String>> {
        Self::table_names(&self.lock())
    }

    /// Number of rows in `table` (0 if it does not exist)
    pub fn count(&self, table: &str) -> StorageResult<usize> {
        validate_table(table)?;
        let conn = self.lock();
        if !Self::table_names(&conn)?.iter().any(|t| t == table) {
            return Ok(0);
        }
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }

    /// Total number of rows across tables
    pub fn len(&self) -> StorageResult<usize> {
        let mut total = 0;
        for table in self.tables()? {
            total += self.count(&table)?;
        }
        Ok(total)
    }

    /// Whether the store holds no rows
    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Drop every table
    pub fn clear(&self) -> StorageResult<usize> {
        Self::clear_locked(&self.lock())
    }

    /// Compact the database file
    pub fn defragment(&self) -> StorageResult<()> {
        self.lock().execute_batch("VACUUM;")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Render the whole store as a SQL script
    pub fn dump_script(&self) -> StorageResult<String> {
        let conn = self.lock();
        let mut script = String::from("BEGIN TRANSACTION;\n");

        for table in Self::table_names(&conn)? {
            let _ = writeln!(
                script,
                "CREATE TABLE IF NOT EXISTS \"{table}\" (hash BLOB PRIMARY KEY NOT NULL, time REAL NOT NULL);"
            );
            let mut stmt = conn.prepare(&format!(
                "SELECT hash, time FROM \"{table}\" ORDER BY time, hash"
            ))?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, f64>(1)?))
            })?;
            for row in rows {
                let (hash, time) = row?;
                let _ = writeln!(
                    script,
                    "INSERT INTO \"{table}\" VALUES(X'{}',{time:?});",
                    hex(&hash)
                );
            }
        }

        script.push_str("COMMIT;\n");
        Ok(script)
    }

    /// Write the store to `path` as a SQL script, returning the row count
    pub fn dump(&self, path: impl AsRef<Path>) -> StorageResult<usize> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let script = self.dump_script()?;

        // Atomic write using temp file
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &script)?;
        std::fs::rename(&temp_path, path)?;
        let rows = script.lines().filter(|l| l.starts_with("INSERT")).count();
        tracing::info!(path = %path.display(), rows, "Hash storage dumped");
        Ok(rows)
    }

    /// Replace every table with the contents of a SQL script
    ///
    /// The script is replayed into a fresh connection that replaces the
    /// current one only once fully committed. On any failure the existing
    /// tables are left as they were.
    pub fn load_script(&self, script: &str) -> StorageResult<usize> {
        let scratch = Connection::open_in_memory()?;
        scratch.execute_batch(script)?;
        if !scratch.is_autocommit() {
            return Err(StorageError::IncompleteDump);
        }

        let mut rows = 0;
        for table in Self::table_names(&scratch)? {
            Self::ensure_table(&scratch, &table)?;
            let count: i64 =
                scratch.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
                    row.get(0)
                })?;
            rows += count as usize;
        }

        *self.lock() = scratch;
        Ok(rows)
    }

    /// Replace every table with the dump at `path`, returning the row count
    pub fn load(&self, path: impl AsRef<Path>) -> StorageResult<usize> {
        let script = std::fs::read_to_string(path.as_ref())?;
        self.load_script(&script)
    }

    /// Dump to `path`, then drop every table
    pub fn unload(&self, path: impl AsRef<Path>) -> StorageResult<usize> {
        let rows = self.dump(path)?;
        self.clear()?;
        Ok(rows)
    }

    /// Write a binary snapshot of the store to `path`
    pub fn backup(&self, path: impl AsRef<Path>) -> StorageResult<()> {
        let path = path.as_ref();
        self.lock().backup(DatabaseName::Main, path, None)?;
        tracing::info!(path = %path.display(), "Hash storage backup written");
        Ok(())
    }

    /// Replace the store with the binary snapshot at `path`
    pub fn restore(&self, path: impl AsRef<Path>) -> StorageResult<()> {
        let path = path.as_ref();
        self.lock().restore(
            DatabaseName::Main,
            path,
            None::<fn(rusqlite::backup::Progress)>,
        )?;
        tracing::info!(path = %path.display(), "Hash storage restored from backup");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Domain wrappers
    // ------------------------------------------------------------------

    /// Record a target end; `true` if it had not been recorded before
    pub fn admit_target_end(&self, end: &TargetEnd) -> StorageResult<bool> {
        self.admit(&end.hash(), tables::TARGET_ENDS)
    }

    /// Whether a terminal record exists for this target
    pub fn contains_target_end(&self, end: &TargetEnd) -> StorageResult<bool> {
        self.contains(&end.hash(), tables::TARGET_ENDS)
    }

    /// Record an announce at `level`; `true` if new
    pub fn admit_announce(&self, item: &Item, level: u8) -> StorageResult<bool> {
        self.admit(&item.hash(level), tables::ANNOUNCES)
    }

    /// Whether this announce was already recorded at `level`
    pub fn contains_announce(&self, item: &Item, level: u8) -> StorageResult<bool> {
        self.contains(&item.hash(level), tables::ANNOUNCES)
    }

    /// Record a release at `level`; `true` if new
    pub fn admit_release(&self, item: &Item, level: u8) -> StorageResult<bool> {
        self.admit(&item.hash(level), tables::RELEASES)
    }

    /// Whether this release was already recorded at `level`
    pub fn contains_release(&self, item: &Item, level: u8) -> StorageResult<bool> {
        self.contains(&item.hash(level), tables::RELEASES)
    }

    /// Record a released item id; `true` if new
    pub fn admit_item_id(&self, id: i64) -> StorageResult<bool> {
        self.admit(&item_id_hash(id), tables::ITEM_IDS)
    }

    /// Whether an item with this id was released
    pub fn contains_item_id(&self, id: i64) -> StorageResult<bool> {
        self.contains(&item_id_hash(id), tables::ITEM_IDS)
    }
}
