//! Durable metadata cache.
//!
//! Maps an absolute local path to the `(hash, mtime, size)` observed the last
//! time that file was confirmed in sync with the remote. A matching stat lets
//! the orchestrator skip the file without touching the network. The same
//! database records one row per sync or reconstruct pass for `status`.

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{MetadataCache, SqliteStateDb};
pub use error::StateError;
pub use types::{FileRecord, RunKind, StateSummary, SyncRunStats};
