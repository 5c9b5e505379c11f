//! Direct and part-based uploads, plus removal of the representation a
//! logical file is *not* currently using.

use std::future::ready;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use super::error::SyncError;
use crate::engine::Engine;
use crate::hasher::{git_blob_sha, hash_bytes};
use crate::parts::{encode, naming, split, PartMetadata};
use crate::progress::{EngineEvent, Events};
use crate::remote::{self, EntryKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UploadOutcome {
    /// Remote content changed. `parts` is `None` for a single object.
    Written { parts: Option<u32> },
    /// Remote already held identical bytes in the expected representation.
    AlreadyCurrent,
}

pub(crate) fn commit_message(update: bool, name: &str) -> String {
    if update {
        format!("Update {name}")
    } else {
        format!("Add {name}")
    }
}

/// Upload `local` as one object at `remote`. Returns the outcome and the
/// SHA-256 of the bytes actually sent.
pub(crate) async fn upload_direct(
    engine: &Engine,
    local: &Path,
    remote: &str,
) -> Result<(UploadOutcome, String), SyncError> {
    let bytes = tokio::fs::read(local)
        .await
        .map_err(|e| SyncError::local_io(local, e))?;
    let (bytes, content_hash, blob_sha) = tokio::task::spawn_blocking(move || {
        let content_hash = hash_bytes(&bytes);
        let blob_sha = git_blob_sha(&bytes);
        (bytes, content_hash, blob_sha)
    })
    .await?;

    let name = naming::file_name(remote);
    let written = remote::put_with_retry(
        engine.store.as_ref(),
        &engine.config.retry,
        remote,
        &bytes,
        &blob_sha,
        |update| commit_message(update, name),
    )
    .await?;

    let removed = remove_stale_container(engine, remote).await?;

    let outcome = if written.is_some() || removed {
        UploadOutcome::Written { parts: None }
    } else {
        UploadOutcome::AlreadyCurrent
    };
    Ok((outcome, content_hash))
}

/// Expected payload length of part `index`; used to detect a file that
/// changed size while its parts were being read.
fn expected_part_len(file_size: u64, part_size: u64, index: u32) -> u64 {
    let offset = u64::from(index) * part_size;
    file_size.saturating_sub(offset).min(part_size)
}

/// Upload `local` as `total_parts` part objects under `<remote>.parts/`.
///
/// `file_size` is the size observed before hashing; `total_parts` is derived
/// from it up front so every part is encoded with final metadata.
pub(crate) async fn upload_split(
    engine: &Engine,
    local: &Path,
    remote: &str,
    file_size: u64,
    cancel: &CancellationToken,
    events: &Events,
) -> Result<UploadOutcome, SyncError> {
    let part_size = engine.config.part_size_bytes;
    let total = split::plan(file_size, part_size)
        .map_err(|e| SyncError::InvalidConfig(format!("{remote}: {e}")))?;
    let done = AtomicU32::new(0);

    tracing::debug!(path = %remote, total, "Uploading in parts");

    let results: Vec<Result<bool, SyncError>> = stream::iter(0..total)
        .take_while(|_| ready(!cancel.is_cancelled()))
        .map(|index| {
            let done = &done;
            async move {
                let written =
                    upload_part(engine, local, remote, index, total, file_size).await?;
                let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                events.emit(EngineEvent::PartProgress {
                    path: remote.to_string(),
                    done: n,
                    total,
                });
                Ok(written)
            }
        })
        .buffer_unordered(engine.config.part_concurrency)
        .collect()
        .await;

    let mut written = 0u32;
    let mut completed = 0u32;
    for result in results {
        if result? {
            written += 1;
        }
        completed += 1;
    }
    if completed < total {
        return Err(SyncError::Cancelled);
    }

    let removed_single = remove_stale_single(engine, remote).await?;
    let removed_extra = remove_extra_parts(engine, remote, total).await?;

    if written == 0 && !removed_single && removed_extra == 0 {
        Ok(UploadOutcome::AlreadyCurrent)
    } else {
        Ok(UploadOutcome::Written { parts: Some(total) })
    }
}

async fn upload_part(
    engine: &Engine,
    local: &Path,
    remote: &str,
    index: u32,
    total: u32,
    file_size: u64,
) -> Result<bool, SyncError> {
    let part_size = engine.config.part_size_bytes;
    let original = naming::file_name(remote).to_string();
    let part_remote = naming::part_path(remote, index);
    let part_name = naming::part_file_name(&original, index);

    let path: PathBuf = local.to_path_buf();
    let label = part_remote.clone();
    let (encoded, blob_sha) = tokio::task::spawn_blocking(move || {
        let slice = split::read_part(&path, index, part_size)
            .map_err(|e| SyncError::local_io(&path, e))?;
        if slice.len() as u64 != expected_part_len(file_size, part_size, index) {
            return Err(SyncError::local_io(
                &path,
                std::io::Error::other("file changed size while uploading"),
            ));
        }
        let meta = PartMetadata {
            original_filename: original,
            part_index: index,
            total_parts: total,
        };
        let text = encode(&meta, &slice).map_err(|source| SyncError::Part {
            path: label,
            source,
        })?;
        let bytes = text.into_bytes();
        let sha = git_blob_sha(&bytes);
        Ok((bytes, sha))
    })
    .await??;

    let written = remote::put_with_retry(
        engine.store.as_ref(),
        &engine.config.retry,
        &part_remote,
        &encoded,
        &blob_sha,
        |update| commit_message(update, &part_name),
    )
    .await?;
    Ok(written.is_some())
}

/// After a direct upload: delete any part container left from when the file
/// was larger. Returns whether anything was removed.
async fn remove_stale_container(engine: &Engine, remote: &str) -> Result<bool, SyncError> {
    let container = naming::container_path(remote);
    let Some(entries) =
        remote::list_with_retry(engine.store.as_ref(), &engine.config.retry, &container).await?
    else {
        return Ok(false);
    };
    let mut removed = false;
    for entry in entries.iter().filter(|e| e.kind == EntryKind::File) {
        remote::delete_with_retry(
            engine.store.as_ref(),
            &engine.config.retry,
            &entry.path,
            &entry.sha,
            &format!("Remove stale {}", entry.name),
        )
        .await?;
        removed = true;
    }
    if removed {
        tracing::info!(path = %remote, "Removed stale part container");
    }
    Ok(removed)
}

/// After a part upload: delete a single object left from when the file was
/// small.
async fn remove_stale_single(engine: &Engine, remote: &str) -> Result<bool, SyncError> {
    let Some(info) =
        remote::head_with_retry(engine.store.as_ref(), &engine.config.retry, remote).await?
    else {
        return Ok(false);
    };
    remote::delete_with_retry(
        engine.store.as_ref(),
        &engine.config.retry,
        remote,
        &info.sha,
        &format!("Remove stale {}", naming::file_name(remote)),
    )
    .await?;
    tracing::info!(path = %remote, "Removed stale single object");
    Ok(true)
}

/// After a part upload: delete parts with an index at or beyond the new
/// `total`, left from a larger earlier version.
async fn remove_extra_parts(engine: &Engine, remote: &str, total: u32) -> Result<u32, SyncError> {
    let container = naming::container_path(remote);
    let original = naming::file_name(remote);
    let Some(entries) =
        remote::list_with_retry(engine.store.as_ref(), &engine.config.retry, &container).await?
    else {
        return Ok(0);
    };
    let mut removed = 0;
    for entry in &entries {
        let Some(index) = naming::parse_part_index(original, &entry.name) else {
            continue;
        };
        if entry.kind != EntryKind::File || index < total {
            continue;
        }
        remote::delete_with_retry(
            engine.store.as_ref(),
            &engine.config.retry,
            &entry.path,
            &entry.sha,
            &format!("Remove stale {}", entry.name),
        )
        .await?;
        removed += 1;
    }
    Ok(removed)
}
