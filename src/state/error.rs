//! Error types for the metadata cache.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during metadata cache operations.
#[derive(Error, Debug)]
pub enum StateError {
    /// Failed to open or create the database file.
    #[error("Failed to open cache database at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("Cache migration failed: {0}")]
    Migration(#[from] rusqlite::Error),

    #[error("Cache query failed: {0}")]
    Query(String),

    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),

    /// The on-disk schema was written by a newer build.
    #[error("Cache schema version {found} is newer than supported version {expected}")]
    UnsupportedSchemaVersion { found: i32, expected: i32 },
}

impl StateError {
    pub fn query(source: rusqlite::Error) -> Self {
        Self::Query(source.to_string())
    }

    pub(crate) fn poisoned<T>(e: std::sync::PoisonError<T>) -> Self {
        Self::Query(format!("connection lock poisoned: {e}"))
    }
}
