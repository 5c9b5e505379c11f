//! Metadata cache trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::StateError;
use super::schema;
use super::types::{FileRecord, RunKind, StateSummary, SyncRunStats};

/// Persistent path → `(hash, mtime, size)` store.
///
/// Object-safe so it can be shared as `Arc<dyn MetadataCache>` across sync
/// tasks. Every call takes the single connection lock for its duration, which
/// serializes each read-modify-write.
#[async_trait]
pub trait MetadataCache: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<FileRecord>, StateError>;

    /// Insert or replace the entry for `record.path`.
    async fn put(&self, record: &FileRecord) -> Result<(), StateError>;

    async fn count(&self) -> Result<u64, StateError>;

    /// Start a new pass and return its row id.
    async fn start_run(&self, kind: RunKind) -> Result<i64, StateError>;

    async fn complete_run(&self, run_id: i64, stats: &SyncRunStats) -> Result<(), StateError>;

    async fn summary(&self) -> Result<StateSummary, StateError>;
}

/// SQLite implementation of the metadata cache.
pub struct SqliteStateDb {
    /// rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteStateDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStateDb")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStateDb {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path_clone).map_err(|e| StateError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StateError::Migration)?;
            // Safe with WAL.
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StateError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, StateError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn timestamp_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

#[async_trait]
impl MetadataCache for SqliteStateDb {
    async fn get(&self, path: &str) -> Result<Option<FileRecord>, StateError> {
        let conn = self.conn.lock().map_err(StateError::poisoned)?;

        conn.query_row(
            "SELECT file_path, file_hash, last_modified, file_size FROM file_cache WHERE file_path = ?1",
            [path],
            |row| {
                Ok(FileRecord {
                    path: row.get(0)?,
                    content_hash: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    mtime: row.get::<_, Option<f64>>(2)?.unwrap_or_default(),
                    size: row.get::<_, Option<i64>>(3)?.unwrap_or_default() as u64,
                })
            },
        )
        .optional()
        .map_err(StateError::query)
    }

    async fn put(&self, record: &FileRecord) -> Result<(), StateError> {
        let conn = self.conn.lock().map_err(StateError::poisoned)?;

        conn.execute(
            "INSERT OR REPLACE INTO file_cache (file_path, file_hash, last_modified, file_size) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                &record.path,
                &record.content_hash,
                record.mtime,
                record.size as i64,
            ],
        )
        .map_err(StateError::query)?;

        Ok(())
    }

    async fn count(&self) -> Result<u64, StateError> {
        let conn = self.conn.lock().map_err(StateError::poisoned)?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM file_cache", [], |row| row.get(0))
            .map_err(StateError::query)?;
        Ok(n as u64)
    }

    async fn start_run(&self, kind: RunKind) -> Result<i64, StateError> {
        let started_at = Utc::now().timestamp();
        let conn = self.conn.lock().map_err(StateError::poisoned)?;

        conn.execute(
            "INSERT INTO sync_runs (kind, started_at) VALUES (?1, ?2)",
            rusqlite::params![kind.as_str(), started_at],
        )
        .map_err(StateError::query)?;

        Ok(conn.last_insert_rowid())
    }

    async fn complete_run(&self, run_id: i64, stats: &SyncRunStats) -> Result<(), StateError> {
        let completed_at = Utc::now().timestamp();
        let conn = self.conn.lock().map_err(StateError::poisoned)?;

        conn.execute(
            "UPDATE sync_runs SET completed_at = ?1, processed = ?2, transferred = ?3, unchanged = ?4, failed = ?5, interrupted = ?6 WHERE id = ?7",
            rusqlite::params![
                completed_at,
                stats.processed as i64,
                stats.transferred as i64,
                stats.unchanged as i64,
                stats.failed as i64,
                i64::from(stats.interrupted),
                run_id
            ],
        )
        .map_err(StateError::query)?;

        Ok(())
    }

    async fn summary(&self) -> Result<StateSummary, StateError> {
        let conn = self.conn.lock().map_err(StateError::poisoned)?;

        let cached_files: i64 = conn
            .query_row("SELECT COUNT(*) FROM file_cache", [], |row| row.get(0))
            .map_err(StateError::query)?;
        let total_runs: i64 = conn
            .query_row("SELECT COUNT(*) FROM sync_runs", [], |row| row.get(0))
            .map_err(StateError::query)?;

        type LastRow = (String, i64, Option<i64>, i64, i64, i64, i64, i64);
        let last: Option<LastRow> = conn
            .query_row(
                "SELECT kind, started_at, completed_at, processed, transferred, unchanged, failed, interrupted
                 FROM sync_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                },
            )
            .optional()
            .map_err(StateError::query)?;

        let mut summary = StateSummary {
            cached_files: cached_files as u64,
            total_runs: total_runs as u64,
            last_run_kind: None,
            last_run_started: None,
            last_run_completed: None,
            last_run_stats: None,
        };

        if let Some((
            kind,
            started,
            completed,
            processed,
            transferred,
            unchanged,
            failed,
            interrupted,
        )) = last
        {
            summary.last_run_kind = RunKind::from_str(&kind);
            summary.last_run_started = timestamp_to_datetime(started);
            summary.last_run_completed = completed.and_then(timestamp_to_datetime);
            summary.last_run_stats = Some(SyncRunStats {
                processed: processed as u64,
                transferred: transferred as u64,
                unchanged: unchanged as u64,
                failed: failed as u64,
                interrupted: interrupted != 0,
            });
        }

        Ok(summary)
    }
}
