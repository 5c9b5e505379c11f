//! Local → remote sync pass.
//!
//! Walks the local root, skips files whose cached `(mtime, size, hash)` still
//! match, and uploads the rest either as one object or as a part set
//! depending on size. Per-file failures are counted and reported, never
//! fatal to the pass.

pub mod error;
pub mod locks;
pub(crate) mod upload;

use std::future::ready;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::engine::{Engine, Predicate};
use crate::hasher;
use crate::parts::naming;
use crate::progress::{EngineEvent, Events};
use crate::reconstruct::write::is_temp_file;
use crate::remote::RemoteError;
use crate::state::{FileRecord, RunKind, SyncRunStats};
use error::{ErrorKind, SyncError};
use upload::UploadOutcome;

/// Result of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub uploaded: u64,
    /// Files examined to completion: uploaded, unchanged or failed.
    pub processed: u64,
    pub unchanged: u64,
    pub failed: u64,
    pub interrupted: bool,
}

impl SyncSummary {
    pub fn run_stats(&self) -> SyncRunStats {
        SyncRunStats {
            processed: self.processed,
            transferred: self.uploaded,
            unchanged: self.unchanged,
            failed: self.failed,
            interrupted: self.interrupted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Direct,
    Split,
}

impl SizeClass {
    pub fn of(size: u64, direct_limit: u64) -> Self {
        if size <= direct_limit {
            Self::Direct
        } else {
            Self::Split
        }
    }
}

/// One file's work for this pass.
#[derive(Debug, Clone)]
pub struct SyncTask {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub size_class: SizeClass,
}

/// A local file found by the walk, before the predicate and stat.
#[derive(Debug, Clone)]
struct LocalCandidate {
    local_path: PathBuf,
    rel_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FileStat {
    mtime: f64,
    size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Uploaded,
    Unchanged,
    Failed(ErrorKind),
    Cancelled,
}

async fn stat(path: &Path) -> Result<FileStat, SyncError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| SyncError::local_io(path, e))?;
    let mtime = meta
        .modified()
        .map_err(|e| SyncError::local_io(path, e))?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ok(FileStat {
        mtime,
        size: meta.len(),
    })
}

/// Files under `root`, skipping `.git`, part containers and our temp files.
async fn discover_local(root: &Path) -> Result<Vec<LocalCandidate>, SyncError> {
    let meta = tokio::fs::metadata(root)
        .await
        .map_err(|e| SyncError::local_io(root, e))?;
    if !meta.is_dir() {
        return Err(SyncError::local_io(
            root,
            std::io::Error::other("sync root is not a directory"),
        ));
    }

    let root = root.to_path_buf();
    let found = tokio::task::spawn_blocking(move || {
        let mut found = Vec::new();
        let walker = WalkDir::new(&root).follow_links(false).into_iter();
        for entry in walker.filter_entry(|e| {
            e.depth() == 0
                || !e.file_type().is_dir()
                || !(e.file_name() == ".git"
                    || naming::is_container_name(&e.file_name().to_string_lossy()))
        }) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || is_temp_file(entry.file_name()) {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&root) else {
                continue;
            };
            found.push(LocalCandidate {
                rel_path: rel.to_path_buf(),
                local_path: entry.into_path(),
            });
        }
        found.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        found
    })
    .await?;
    Ok(found)
}

impl Engine {
    /// Run one sync pass over `local_root`.
    ///
    /// Fails only on global preconditions (root unreadable). Every per-file
    /// problem is counted in the summary and reported through `events`.
    pub async fn sync(
        &self,
        local_root: &Path,
        predicate: &Predicate,
        cancel: &CancellationToken,
        events: &Events,
    ) -> Result<SyncSummary, SyncError> {
        let candidates: Vec<LocalCandidate> = discover_local(local_root)
            .await?
            .into_iter()
            .filter(|c| predicate(&c.rel_path))
            .collect();
        events.emit(EngineEvent::PassStarted {
            total: candidates.len() as u64,
        });

        let run_id = match self.cache.start_run(RunKind::Sync).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, "Could not record sync run");
                None
            }
        };

        let outcomes: Vec<FileOutcome> = stream::iter(candidates)
            .take_while(|_| ready(!cancel.is_cancelled()))
            .map(|candidate| self.sync_file(candidate, cancel, events))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        let mut summary = SyncSummary::default();
        for outcome in outcomes {
            match outcome {
                FileOutcome::Uploaded => summary.uploaded += 1,
                FileOutcome::Unchanged => summary.unchanged += 1,
                FileOutcome::Failed(_) => summary.failed += 1,
                FileOutcome::Cancelled => continue,
            }
            summary.processed += 1;
        }
        summary.interrupted = cancel.is_cancelled();

        if let Some(id) = run_id {
            if let Err(e) = self.cache.complete_run(id, &summary.run_stats()).await {
                tracing::warn!(error = %e, "Could not record sync run");
            }
        }
        Ok(summary)
    }

    async fn sync_file(
        &self,
        candidate: LocalCandidate,
        cancel: &CancellationToken,
        events: &Events,
    ) -> FileOutcome {
        let display = candidate.rel_path.display().to_string();
        events.emit(EngineEvent::FileStarted {
            path: display.clone(),
        });

        match self.sync_file_inner(&candidate, cancel, events).await {
            Ok(UploadOutcome::Written { parts }) => {
                events.emit(EngineEvent::FileUploaded {
                    path: display,
                    parts,
                });
                FileOutcome::Uploaded
            }
            Ok(UploadOutcome::AlreadyCurrent) => {
                events.emit(EngineEvent::FileUnchanged { path: display });
                FileOutcome::Unchanged
            }
            Err(SyncError::Cancelled) => FileOutcome::Cancelled,
            Err(e) => {
                let kind = e.kind();
                events.emit(EngineEvent::FileFailed {
                    path: display,
                    kind,
                    message: e.to_string(),
                });
                FileOutcome::Failed(kind)
            }
        }
    }

    async fn sync_file_inner(
        &self,
        candidate: &LocalCandidate,
        cancel: &CancellationToken,
        events: &Events,
    ) -> Result<UploadOutcome, SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let local = &candidate.local_path;
        let before = stat(local).await?;
        let hash = hasher::hash_file(local)
            .await
            .map_err(|e| SyncError::local_io(local, e))?;

        let key = local.to_string_lossy().into_owned();
        if let Some(record) = self.cached(&key).await {
            if record.stat_matches(before.mtime, before.size) && record.content_hash == hash {
                return Ok(UploadOutcome::AlreadyCurrent);
            }
        }

        let task = SyncTask {
            local_path: local.clone(),
            remote_path: self.remote_path_for(&candidate.rel_path),
            size_class: SizeClass::of(before.size, self.config.direct_upload_limit_bytes),
        };

        let _guard = self.path_locks.lock(&task.remote_path).await;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let (outcome, sent_hash) = match task.size_class {
            SizeClass::Direct => {
                match upload::upload_direct(self, &task.local_path, &task.remote_path).await {
                    Ok(done) => done,
                    Err(SyncError::Remote(RemoteError::TooLarge { .. })) => {
                        tracing::info!(
                            path = %task.remote_path,
                            "Rejected as too large, uploading in parts"
                        );
                        let outcome = upload::upload_split(
                            self,
                            &task.local_path,
                            &task.remote_path,
                            before.size,
                            cancel,
                            events,
                        )
                        .await?;
                        (outcome, hash)
                    }
                    Err(e) => return Err(e),
                }
            }
            SizeClass::Split => {
                let outcome = upload::upload_split(
                    self,
                    &task.local_path,
                    &task.remote_path,
                    before.size,
                    cancel,
                    events,
                )
                .await?;
                (outcome, hash)
            }
        };

        // Only cache what is still on disk; a file edited mid-upload must be
        // re-detected next pass.
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let after = stat(local).await?;
        if after == before {
            self.record(FileRecord {
                path: key,
                content_hash: sent_hash,
                mtime: after.mtime,
                size: after.size,
            })
            .await;
        } else {
            tracing::debug!(path = %task.remote_path, "Changed during upload, not caching");
        }
        Ok(outcome)
    }

    /// Cache read that degrades to a miss.
    async fn cached(&self, key: &str) -> Option<FileRecord> {
        match self.cache.get(key).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(path = %key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn record(&self, record: FileRecord) {
        if let Err(e) = self.cache.put(&record).await {
            tracing::warn!(path = %record.path, error = %e, "Cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::testing::{engine_with, small_config};
    use crate::engine::EngineConfig;
    use crate::parts::{decode, naming::part_path};
    use crate::remote::memory::MemoryStore;

    fn all(_: &Path) -> bool {
        true
    }

    fn write(root: &Path, rel: &str, data: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    async fn run(engine: &Engine, root: &Path) -> SyncSummary {
        engine
            .sync(root, &all, &CancellationToken::new(), &Events::none())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_uploads_new_files_and_records_cache() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"alpha");
        write(dir.path(), "sub/b.txt", b"beta");
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), small_config());

        let summary = run(&engine, dir.path()).await;
        assert_eq!(summary.uploaded, 2);
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(store.get("a.txt").unwrap(), b"alpha");
        assert_eq!(store.get("sub/b.txt").unwrap(), b"beta");

        let key = dir.path().join("a.txt").to_string_lossy().into_owned();
        let record = engine.cache.get(&key).await.unwrap().unwrap();
        assert_eq!(record.content_hash, hasher::hash_bytes(b"alpha"));
        assert_eq!(record.size, 5);
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"alpha");
        write(dir.path(), "big.bin", &pattern(50 * 1024, 1));
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), small_config());

        run(&engine, dir.path()).await;
        let calls = store.calls();
        let second = run(&engine, dir.path()).await;

        assert_eq!(second.uploaded, 0);
        assert_eq!(second.unchanged, 2);
        assert_eq!(second.processed, 2);
        assert_eq!(store.calls(), calls, "unchanged files must not touch the remote");
    }

    #[tokio::test]
    async fn test_single_byte_change_reuploads_only_that_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"alpha");
        write(dir.path(), "b.txt", b"bravo");
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), small_config());
        run(&engine, dir.path()).await;

        // same size, possibly same mtime: only the hash can tell
        write(dir.path(), "b.txt", b"bravO");
        let summary = run(&engine, dir.path()).await;

        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(store.get("b.txt").unwrap(), b"bravO");
        let writes = store.writes();
        assert_eq!(writes.iter().filter(|p| *p == "a.txt").count(), 1);
        assert_eq!(writes.iter().filter(|p| *p == "b.txt").count(), 2);
    }

    #[tokio::test]
    async fn test_direct_and_split_by_size() {
        // 40 KiB limit with 4 KiB parts: 10 KiB goes direct, 100 KiB is 25 parts.
        let dir = tempfile::tempdir().unwrap();
        let small = pattern(10 * 1024, 3);
        let large = pattern(100 * 1024, 7);
        write(dir.path(), "small.bin", &small);
        write(dir.path(), "media/large.bin", &large);
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), small_config());

        let summary = run(&engine, dir.path()).await;
        assert_eq!(summary.uploaded, 2);

        assert_eq!(store.get("small.bin").unwrap(), small);
        assert!(store.get("small.bin.parts/small.bin.part0.txt").is_none());

        assert!(store.get("media/large.bin").is_none());
        let parts: Vec<_> = store
            .paths()
            .into_iter()
            .filter(|p| p.starts_with("media/large.bin.parts/"))
            .collect();
        assert_eq!(parts.len(), 25);

        let mut rebuilt = Vec::new();
        for i in 0..25 {
            let text = store.get(&part_path("media/large.bin", i)).unwrap();
            let (meta, payload) = decode(std::str::from_utf8(&text).unwrap()).unwrap();
            assert_eq!(meta.part_index, i);
            assert_eq!(meta.total_parts, 25);
            assert_eq!(meta.original_filename, "large.bin");
            rebuilt.extend(payload);
        }
        assert_eq!(rebuilt, large);
    }

    #[tokio::test]
    async fn test_too_large_rejection_redirects_to_parts() {
        let dir = tempfile::tempdir().unwrap();
        let data = pattern(10 * 1024, 9);
        write(dir.path(), "f.bin", &data);
        let store = Arc::new(MemoryStore::new());
        store.set_max_object_size(8 * 1024);
        let engine = engine_with(store.clone(), small_config());

        let summary = run(&engine, dir.path()).await;
        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.failed, 0);
        assert!(store.get("f.bin").is_none());
        assert!(store.get(&part_path("f.bin", 2)).is_some());
        assert_eq!(store.write_attempts("f.bin"), 1);
    }

    #[tokio::test]
    async fn test_failed_part_is_not_cached_and_retried_next_pass() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "f.bin", &pattern(20 * 1024, 2));
        let store = Arc::new(MemoryStore::new());
        // more failures than attempts available in one pass
        store.fail_writes(&part_path("f.bin", 1), 4);
        let engine = engine_with(store.clone(), small_config());

        let first = run(&engine, dir.path()).await;
        assert_eq!(first.failed, 1);
        assert_eq!(first.uploaded, 0);
        let key = dir.path().join("f.bin").to_string_lossy().into_owned();
        assert!(engine.cache.get(&key).await.unwrap().is_none());

        let second = run(&engine, dir.path()).await;
        assert_eq!(second.uploaded, 1);
        assert!(store.get(&part_path("f.bin", 1)).is_some());
        assert!(engine.cache.get(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_transient_write_errors_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"alpha");
        let store = Arc::new(MemoryStore::new());
        store.fail_writes("a.txt", 2);
        let engine = engine_with(store.clone(), small_config());

        let summary = run(&engine, dir.path()).await;
        assert_eq!(summary.uploaded, 1);
        assert_eq!(store.write_attempts("a.txt"), 3);
    }

    #[tokio::test]
    async fn test_identical_remote_is_recorded_without_write() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"alpha");
        let store = Arc::new(MemoryStore::new());
        store.insert("a.txt", b"alpha".to_vec());
        let engine = engine_with(store.clone(), small_config());

        let summary = run(&engine, dir.path()).await;
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.uploaded, 0);
        assert!(store.writes().is_empty());
        let key = dir.path().join("a.txt").to_string_lossy().into_owned();
        assert!(engine.cache.get(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_changed_remote_is_updated() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"new");
        let store = Arc::new(MemoryStore::new());
        store.insert("a.txt", b"old".to_vec());
        let engine = engine_with(store.clone(), small_config());

        assert_eq!(run(&engine, dir.path()).await.uploaded, 1);
        assert_eq!(store.get("a.txt").unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_direct_upload_removes_stale_part_container() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.bin", b"now small");
        let store = Arc::new(MemoryStore::new());
        store.insert(&part_path("a.bin", 0), b"old part".to_vec());
        store.insert(&part_path("a.bin", 1), b"old part".to_vec());
        let engine = engine_with(store.clone(), small_config());

        run(&engine, dir.path()).await;
        assert_eq!(store.paths(), vec!["a.bin".to_string()]);
    }

    #[tokio::test]
    async fn test_split_upload_removes_stale_single_and_extra_parts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.bin", &pattern(50 * 1024, 4));
        let store = Arc::new(MemoryStore::new());
        store.insert("a.bin", b"was small".to_vec());
        store.insert(&part_path("a.bin", 30), b"leftover".to_vec());
        store.insert("a.bin.parts/unrelated.txt", b"keep".to_vec());
        let engine = engine_with(store.clone(), small_config());

        run(&engine, dir.path()).await;
        assert!(store.get("a.bin").is_none());
        assert!(store.get(&part_path("a.bin", 30)).is_none());
        assert!(store.get(&part_path("a.bin", 12)).is_some());
        assert!(store.get("a.bin.parts/unrelated.txt").is_some());
    }

    #[tokio::test]
    async fn test_failed_stale_cleanup_fails_the_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.bin", &pattern(50 * 1024, 4));
        let store = Arc::new(MemoryStore::new());
        store.insert("a.bin", b"was small".to_vec());
        store.fail_deletes("a.bin", 10);
        let engine = engine_with(store.clone(), small_config());

        let summary = run(&engine, dir.path()).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.uploaded, 0);
        let key = dir.path().join("a.bin").to_string_lossy().into_owned();
        assert!(engine.cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_predicate_and_structural_skips() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "keep.md", b"k");
        write(dir.path(), "skip.log", b"s");
        write(dir.path(), ".git/config", b"g");
        write(dir.path(), "x.bin.parts/x.bin.part0.txt", b"p");
        write(dir.path(), ".y.bin.gitsync.tmp", b"t");
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), small_config());

        let only_md = |p: &Path| p.extension().is_some_and(|e| e == "md");
        let summary = engine
            .sync(dir.path(), &only_md, &CancellationToken::new(), &Events::none())
            .await
            .unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(store.paths(), vec!["keep.md".to_string()]);

        let summary = run(&engine, dir.path()).await;
        assert_eq!(summary.processed, 2, "only keep.md and skip.log are candidates");
    }

    #[tokio::test]
    async fn test_remote_root_prefix() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"alpha");
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(
            store.clone(),
            EngineConfig {
                remote_root: "backup".into(),
                ..small_config()
            },
        );
        run(&engine, dir.path()).await;
        assert_eq!(store.paths(), vec!["backup/a.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"alpha");
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), small_config());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = engine
            .sync(dir.path(), &all, &cancel, &Events::none())
            .await
            .unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.processed, 0);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_missing_root_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(Arc::new(MemoryStore::new()), small_config());
        let err = engine
            .sync(
                &dir.path().join("nope"),
                &all,
                &CancellationToken::new(),
                &Events::none(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LocalIo);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_one_file_only() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"alpha");
        write(dir.path(), "b.txt", b"bravo");
        let store = Arc::new(MemoryStore::new());
        store.fail_writes("a.txt", 10);
        let engine = engine_with(store.clone(), small_config());

        let (events, mut rx) = Events::channel();
        let summary = engine
            .sync(dir.path(), &all, &CancellationToken::new(), &events)
            .await
            .unwrap();
        drop(events);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.uploaded, 1);

        let mut failed = Vec::new();
        while let Some(ev) = rx.recv().await {
            if let EngineEvent::FileFailed { path, kind, .. } = ev {
                failed.push((path, kind));
            }
        }
        assert_eq!(failed, vec![("a.txt".to_string(), ErrorKind::TransientNetwork)]);
    }

    #[tokio::test]
    async fn test_run_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"alpha");
        let engine = engine_with(Arc::new(MemoryStore::new()), small_config());
        run(&engine, dir.path()).await;

        let summary = engine.cache.summary().await.unwrap();
        assert_eq!(summary.total_runs, 1);
        assert_eq!(summary.last_run_kind, Some(RunKind::Sync));
        assert_eq!(summary.last_run_stats.unwrap().transferred, 1);
    }
}
