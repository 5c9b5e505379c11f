//! Remote → local pass: reassemble part sets into their original files and,
//! optionally, pull plain files alongside them.
//!
//! Each logical file moves through [`Stage`]s. The pass only reads the
//! remote: part sets stay in the repository after reconstruction, and only
//! local part artifacts next to a confirmed output are removed.

pub(crate) mod cleanup;
pub(crate) mod fetch;
pub mod write;

use std::collections::BTreeSet;
use std::future::ready;
use std::path::{Path, PathBuf};

use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;
use crate::parts::naming;
use crate::progress::{EngineEvent, Events};
use crate::remote::DirEntry;
use crate::state::{RunKind, SyncRunStats};
use crate::sync::error::{ErrorKind, SyncError};
use fetch::FetchedPart;

#[derive(Debug, Clone, Default)]
pub struct ReconstructOptions {
    /// Also download plain remote files into the local mirror.
    pub download_plain: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconstructSummary {
    pub reconstructed: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Plain files pulled.
    pub downloaded: u64,
    pub interrupted: bool,
}

impl ReconstructSummary {
    pub fn run_stats(&self) -> SyncRunStats {
        SyncRunStats {
            processed: self.reconstructed + self.skipped + self.failed + self.downloaded,
            transferred: self.reconstructed + self.downloaded,
            unchanged: self.skipped,
            failed: self.failed,
            interrupted: self.interrupted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discovering,
    Downloading,
    Validating,
    Assembling,
    Writing,
    CleaningUp,
    Done,
    Failed(ErrorKind),
}

impl Stage {
    fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Reconstructed,
    Downloaded,
    Skipped,
    Failed,
    Cancelled,
}

/// Working state of one logical file.
struct Job {
    logical: String,
    container: String,
    dest: PathBuf,
    entries: Vec<DirEntry>,
    parts: Vec<FetchedPart>,
    data: Vec<u8>,
    written: bool,
    skip: bool,
}

/// Completeness check: one `total_parts`, no duplicates, every index in
/// `0..total_parts`. Sorts `parts` by index on success.
pub(crate) fn validate(logical: &str, parts: &mut [FetchedPart]) -> Result<(), SyncError> {
    let incomplete = |reason: String| SyncError::Incomplete {
        path: logical.to_string(),
        reason,
    };
    let Some(first) = parts.first() else {
        return Err(incomplete("no parts found".into()));
    };
    let total = first.total;
    if total == 0 {
        return Err(incomplete("total_parts is 0".into()));
    }
    if let Some(other) = parts.iter().find(|p| p.total != total) {
        return Err(incomplete(format!(
            "inconsistent total_parts ({} and {})",
            total, other.total
        )));
    }

    parts.sort_by_key(|p| p.index);
    if let Some(w) = parts.windows(2).find(|w| w[0].index == w[1].index) {
        return Err(incomplete(format!("duplicate part index {}", w[0].index)));
    }
    if let Some(p) = parts.iter().find(|p| p.index >= total) {
        return Err(incomplete(format!(
            "part index {} out of range for {} parts",
            p.index, total
        )));
    }
    if parts.len() as u32 != total {
        let present: BTreeSet<u32> = parts.iter().map(|p| p.index).collect();
        let missing: Vec<u32> = (0..total).filter(|i| !present.contains(i)).collect();
        return Err(incomplete(format!("missing parts {missing:?} of {total}")));
    }
    Ok(())
}

impl Engine {
    /// Reassemble every part set under the remote root into `local_root`.
    ///
    /// Fails only when the remote root cannot be listed. Per-file problems
    /// are counted in the summary and reported through `events`.
    pub async fn reconstruct(
        &self,
        local_root: &Path,
        options: &ReconstructOptions,
        cancel: &CancellationToken,
        events: &Events,
    ) -> Result<ReconstructSummary, SyncError> {
        let mut summary = ReconstructSummary::default();
        let tree = match fetch::walk(self, cancel, events).await {
            Ok(tree) => tree,
            Err(SyncError::Cancelled) => {
                summary.interrupted = true;
                return Ok(summary);
            }
            Err(e) => return Err(e),
        };

        let plain: &[DirEntry] = if options.download_plain {
            &tree.files
        } else {
            &[]
        };
        events.emit(EngineEvent::PassStarted {
            total: (tree.containers.len() + plain.len()) as u64,
        });

        let run_id = match self.cache.start_run(RunKind::Reconstruct).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, "Could not record reconstruct run");
                None
            }
        };

        let containers = stream::iter(&tree.containers)
            .take_while(|_| ready(!cancel.is_cancelled()))
            .map(|container| self.reconstruct_one(container, local_root, cancel, events))
            .buffer_unordered(self.config.concurrency);
        let downloads = stream::iter(plain)
            .take_while(|_| ready(!cancel.is_cancelled()))
            .map(|entry| self.pull_one(entry, local_root, cancel, events))
            .buffer_unordered(self.config.concurrency);
        let outcomes: Vec<ItemOutcome> = containers.chain(downloads).collect().await;

        for outcome in outcomes {
            match outcome {
                ItemOutcome::Reconstructed => summary.reconstructed += 1,
                ItemOutcome::Downloaded => summary.downloaded += 1,
                ItemOutcome::Skipped => summary.skipped += 1,
                ItemOutcome::Failed => summary.failed += 1,
                ItemOutcome::Cancelled => {}
            }
        }
        summary.interrupted = cancel.is_cancelled();

        if let Some(id) = run_id {
            if let Err(e) = self.cache.complete_run(id, &summary.run_stats()).await {
                tracing::warn!(error = %e, "Could not record reconstruct run");
            }
        }
        Ok(summary)
    }

    /// Recreate the remote directory tree under `local_root`, skipping part
    /// containers. Returns the number of directories created.
    pub async fn mirror_structure(
        &self,
        local_root: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, SyncError> {
        let tree = fetch::walk(self, cancel, &Events::none()).await?;
        let mut created = 0;
        for dir in &tree.dirs {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let Some(local) = self.local_path_for(local_root, dir) else {
                tracing::warn!(path = %dir, "Skipping directory outside the local root");
                continue;
            };
            if tokio::fs::metadata(&local).await.is_ok_and(|m| m.is_dir()) {
                continue;
            }
            tokio::fs::create_dir_all(&local)
                .await
                .map_err(|e| SyncError::local_io(&local, e))?;
            tracing::debug!(path = %local.display(), "Created directory");
            created += 1;
        }
        Ok(created)
    }

    async fn reconstruct_one(
        &self,
        container: &str,
        local_root: &Path,
        cancel: &CancellationToken,
        events: &Events,
    ) -> ItemOutcome {
        let Some(logical) = naming::logical_path_of_container(container) else {
            return ItemOutcome::Skipped;
        };
        let Some(_guard) = self.in_progress.try_begin(logical) else {
            tracing::debug!(path = %logical, "Already being reconstructed");
            return ItemOutcome::Skipped;
        };
        events.emit(EngineEvent::FileStarted {
            path: logical.to_string(),
        });

        let Some(dest) = self.local_path_for(local_root, logical) else {
            events.emit(EngineEvent::FileFailed {
                path: logical.to_string(),
                kind: ErrorKind::Validation,
                message: format!("{logical} maps outside the local root"),
            });
            return ItemOutcome::Failed;
        };
        let mut job = Job {
            logical: logical.to_string(),
            container: container.to_string(),
            dest,
            entries: Vec::new(),
            parts: Vec::new(),
            data: Vec::new(),
            written: false,
            skip: false,
        };

        let mut stage = Stage::Discovering;
        while !stage.is_terminal() {
            if cancel.is_cancelled() {
                if job.written {
                    // Output is complete; local artifacts stay for the next pass.
                    tracing::info!(path = %job.logical, "Cancelled before local cleanup");
                    events.emit(EngineEvent::Reconstructed {
                        path: job.logical.clone(),
                        bytes: job.data.len() as u64,
                    });
                    return ItemOutcome::Reconstructed;
                }
                return ItemOutcome::Cancelled;
            }
            tracing::trace!(path = %job.logical, ?stage, "Reconstruct stage");
            stage = match self.step(stage, &mut job, cancel, events).await {
                Ok(next) => next,
                Err(SyncError::Cancelled) => return ItemOutcome::Cancelled,
                Err(e) => {
                    let kind = e.kind();
                    events.emit(EngineEvent::FileFailed {
                        path: job.logical.clone(),
                        kind,
                        message: e.to_string(),
                    });
                    Stage::Failed(kind)
                }
            };
        }

        match stage {
            Stage::Failed(_) => ItemOutcome::Failed,
            _ if job.skip => {
                events.emit(EngineEvent::Skipped { path: job.logical });
                ItemOutcome::Skipped
            }
            _ => {
                events.emit(EngineEvent::Reconstructed {
                    path: job.logical,
                    bytes: job.data.len() as u64,
                });
                ItemOutcome::Reconstructed
            }
        }
    }

    async fn step(
        &self,
        stage: Stage,
        job: &mut Job,
        cancel: &CancellationToken,
        events: &Events,
    ) -> Result<Stage, SyncError> {
        match stage {
            Stage::Discovering => {
                let original = naming::file_name(&job.logical);
                job.entries = fetch::list_parts(self, &job.container, original)
                    .await?
                    .unwrap_or_default();
                if job.entries.is_empty() {
                    return Err(SyncError::Incomplete {
                        path: job.logical.clone(),
                        reason: "no parts found".into(),
                    });
                }
                if !self.config.overwrite_existing
                    && tokio::fs::try_exists(&job.dest).await.unwrap_or(false)
                {
                    job.skip = true;
                    return Ok(Stage::CleaningUp);
                }
                Ok(Stage::Downloading)
            }
            Stage::Downloading => {
                job.parts =
                    fetch::fetch_all(self, &job.logical, &job.entries, cancel, events).await?;
                Ok(Stage::Validating)
            }
            Stage::Validating => {
                validate(&job.logical, &mut job.parts)?;
                Ok(Stage::Assembling)
            }
            Stage::Assembling => {
                let parts = std::mem::take(&mut job.parts);
                job.data = tokio::task::spawn_blocking(move || {
                    let len = parts.iter().map(|p| p.payload.len()).sum();
                    let mut data = Vec::with_capacity(len);
                    for part in parts {
                        data.extend_from_slice(&part.payload);
                    }
                    data
                })
                .await?;
                Ok(Stage::Writing)
            }
            Stage::Writing => {
                write::write_atomic(&job.dest, &job.data)
                    .await
                    .map_err(|e| SyncError::local_io(&job.dest, e))?;
                job.written = true;
                Ok(Stage::CleaningUp)
            }
            Stage::CleaningUp => {
                cleanup::remove_local_parts(&job.dest).await;
                Ok(Stage::Done)
            }
            Stage::Done | Stage::Failed(_) => Ok(stage),
        }
    }

    /// Download one plain file into the local mirror.
    async fn pull_one(
        &self,
        entry: &DirEntry,
        local_root: &Path,
        cancel: &CancellationToken,
        events: &Events,
    ) -> ItemOutcome {
        match self.pull_one_inner(entry, local_root, cancel).await {
            Ok(Some(bytes)) => {
                events.emit(EngineEvent::Downloaded {
                    path: entry.path.clone(),
                    bytes,
                });
                ItemOutcome::Downloaded
            }
            Ok(None) => {
                events.emit(EngineEvent::Skipped {
                    path: entry.path.clone(),
                });
                ItemOutcome::Skipped
            }
            Err(SyncError::Cancelled) => ItemOutcome::Cancelled,
            Err(e) => {
                events.emit(EngineEvent::FileFailed {
                    path: entry.path.clone(),
                    kind: e.kind(),
                    message: e.to_string(),
                });
                ItemOutcome::Failed
            }
        }
    }

    async fn pull_one_inner(
        &self,
        entry: &DirEntry,
        local_root: &Path,
        cancel: &CancellationToken,
    ) -> Result<Option<u64>, SyncError> {
        let Some(dest) = self.local_path_for(local_root, &entry.path) else {
            return Err(SyncError::InvalidConfig(format!(
                "{} maps outside the local root",
                entry.path
            )));
        };
        if !self.config.overwrite_existing
            && tokio::fs::try_exists(&dest).await.unwrap_or(false)
        {
            return Ok(None);
        }
        let data = fetch::fetch_blob(self, entry).await?;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        write::write_atomic(&dest, &data)
            .await
            .map_err(|e| SyncError::local_io(&dest, e))?;
        Ok(Some(data.len() as u64))
    }
}
