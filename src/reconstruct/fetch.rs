//! Remote discovery and part/blob retrieval.

use std::collections::VecDeque;
use std::future::ready;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;
use crate::hasher::git_blob_sha;
use crate::parts::{codec::decode_bytes, naming};
use crate::progress::{EngineEvent, Events};
use crate::remote::{self, DirEntry, EntryKind, RemoteError};
use crate::retry::{retry_with_backoff, RetryAction};
use crate::sync::error::SyncError;

/// Everything found under the remote root.
#[derive(Debug, Default)]
pub(crate) struct RemoteTree {
    /// Paths of `*.parts` directories. Never descended into.
    pub containers: Vec<String>,
    /// Plain files outside any container.
    pub files: Vec<DirEntry>,
    /// Ordinary directories, parents before children.
    pub dirs: Vec<String>,
}

/// Breadth-first listing from the remote root.
///
/// A failure on the root listing is returned; deeper failures are reported
/// and that subtree is skipped.
pub(crate) async fn walk(
    engine: &Engine,
    cancel: &CancellationToken,
    events: &Events,
) -> Result<RemoteTree, SyncError> {
    let root = engine.config.remote_root.clone();
    let mut tree = RemoteTree::default();
    let mut queue = VecDeque::from([root.clone()]);

    while let Some(dir) = queue.pop_front() {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let listing =
            remote::list_with_retry(engine.store.as_ref(), &engine.config.retry, &dir).await;
        let entries = match listing {
            Ok(Some(entries)) => entries,
            Ok(None) => {
                if dir == root {
                    tracing::warn!(path = %dir, "Remote root does not exist");
                }
                continue;
            }
            Err(e) if dir == root => return Err(e.into()),
            Err(e) => {
                events.log(tracing::Level::WARN, format!("Could not list {dir}: {e}"));
                continue;
            }
        };

        for entry in entries {
            match entry.kind {
                EntryKind::Dir if naming::is_container_name(&entry.name) => {
                    tree.containers.push(entry.path)
                }
                EntryKind::Dir => {
                    tree.dirs.push(entry.path.clone());
                    queue.push_back(entry.path);
                }
                EntryKind::File => tree.files.push(entry),
                EntryKind::Other => {
                    tracing::debug!(path = %entry.path, "Skipping non-file entry");
                }
            }
        }
    }

    tree.containers.sort();
    tree.containers.dedup();
    tree.files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(tree)
}

/// Entries of `container` that are parts of `original_name`. `None` when the
/// container is gone.
pub(crate) async fn list_parts(
    engine: &Engine,
    container: &str,
    original_name: &str,
) -> Result<Option<Vec<DirEntry>>, SyncError> {
    let Some(entries) =
        remote::list_with_retry(engine.store.as_ref(), &engine.config.retry, container).await?
    else {
        return Ok(None);
    };
    Ok(Some(
        entries
            .into_iter()
            .filter(|e| {
                e.kind == EntryKind::File
                    && naming::parse_part_index(original_name, &e.name).is_some()
            })
            .collect(),
    ))
}

/// One decoded part.
#[derive(Debug, Clone)]
pub(crate) struct FetchedPart {
    pub index: u32,
    pub total: u32,
    pub payload: Vec<u8>,
}

fn classify_fetch(e: &SyncError) -> RetryAction {
    if e.is_retryable() {
        RetryAction::Retry
    } else {
        RetryAction::Abort
    }
}

/// Fetch and decode one part. `None` when the object no longer exists.
async fn fetch_part(engine: &Engine, path: &str) -> Result<Option<FetchedPart>, SyncError> {
    retry_with_backoff(&engine.config.retry, path, classify_fetch, |_| async move {
        let Some(object) = engine.store.read_object(path).await? else {
            return Ok(None);
        };
        let name = naming::file_name(path).to_string();
        let decoded =
            tokio::task::spawn_blocking(move || decode_bytes(&object.content, &name)).await?;
        let (meta, payload) = decoded.map_err(|source| SyncError::Part {
            path: path.to_string(),
            source,
        })?;
        Ok(Some(FetchedPart {
            index: meta.part_index,
            total: meta.total_parts,
            payload,
        }))
    })
    .await
}

/// Fetch every entry with bounded parallelism.
///
/// Parts that vanished or stayed malformed after all retries are left out;
/// the completeness check catches the gap. Any other error fails the file.
pub(crate) async fn fetch_all(
    engine: &Engine,
    logical: &str,
    entries: &[DirEntry],
    cancel: &CancellationToken,
    events: &Events,
) -> Result<Vec<FetchedPart>, SyncError> {
    let total = entries.len() as u32;
    let done = AtomicU32::new(0);

    let results: Vec<Result<Option<FetchedPart>, SyncError>> = stream::iter(entries)
        .take_while(|_| ready(!cancel.is_cancelled()))
        .map(|entry| {
            let done = &done;
            async move {
                let result = match fetch_part(engine, &entry.path).await {
                    Ok(None) => {
                        tracing::warn!(path = %entry.path, "Part disappeared before it was read");
                        Ok(None)
                    }
                    Err(SyncError::Part { path, source }) => {
                        tracing::warn!(
                            %path,
                            error = %source,
                            "Part still malformed after retries"
                        );
                        Ok(None)
                    }
                    other => other,
                };
                let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                events.emit(EngineEvent::PartProgress {
                    path: logical.to_string(),
                    done: n,
                    total,
                });
                result
            }
        })
        .buffer_unordered(engine.config.part_concurrency)
        .collect()
        .await;

    if results.len() < entries.len() {
        return Err(SyncError::Cancelled);
    }
    let mut parts = Vec::with_capacity(results.len());
    for result in results {
        if let Some(part) = result? {
            parts.push(part);
        }
    }
    Ok(parts)
}

/// Content of a plain file by blob id, through the blob cache.
pub(crate) async fn fetch_blob(engine: &Engine, entry: &DirEntry) -> Result<Arc<[u8]>, SyncError> {
    if let Some(hit) = engine.blobs.get(&entry.sha) {
        return Ok(hit);
    }
    let data = retry_with_backoff(
        &engine.config.retry,
        &entry.path,
        remote::classify,
        |_| async move {
            let data = engine.store.read_blob(&entry.sha).await?;
            if git_blob_sha(&data) != entry.sha {
                return Err(RemoteError::Decode {
                    path: entry.path.clone(),
                    reason: "blob content does not match its id".into(),
                });
            }
            Ok(data)
        },
    )
    .await?;
    let data: Arc<[u8]> = data.into();
    engine.blobs.put(&entry.sha, data.clone());
    Ok(data)
}
