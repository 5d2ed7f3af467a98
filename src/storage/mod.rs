//! Persistent deduplication storage
//!
//! The engine keeps one process-scoped [`HashStorage`] that records the
//! content hashes of everything it has already surfaced. It lives in memory
//! on an embedded SQLite connection and is persisted to a dump file between
//! runs.

pub mod hash_storage;

pub use hash_storage::{tables, HashStorage, StorageError, StorageResult};
