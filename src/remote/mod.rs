//! Thin abstraction over the remote object store.
//!
//! The store is treated as a dumb path → bytes map with per-object revision
//! tokens (`sha`). It offers no locking; callers serialize writers to the same
//! path themselves.

pub mod cache;
pub mod error;
pub mod github;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;

use crate::retry::{retry_with_backoff, RetryAction, RetryConfig};

pub use cache::BlobCache;
pub use error::RemoteError;
pub use github::{GitHubConfig, GitHubStore};

/// Payload ceiling of the contents endpoint itself. Independent of the
/// engine's direct-upload limit, which must stay at or below it.
pub const HARD_OBJECT_CEILING: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub path: String,
    /// Revision token (git blob id).
    pub sha: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub path: String,
    pub sha: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    /// Symlinks and submodules; never synced.
    Other,
}

impl EntryKind {
    pub fn from_api(s: &str) -> Self {
        match s {
            "file" => Self::File,
            "dir" => Self::Dir,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
    pub sha: String,
    pub size: u64,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Full object with content. `None` when the path does not exist.
    async fn read_object(&self, path: &str) -> Result<Option<RemoteObject>, RemoteError>;

    /// Revision token and size without transferring large content.
    async fn head_object(&self, path: &str) -> Result<Option<ObjectInfo>, RemoteError>;

    /// Create (`previous_sha = None`) or update an object. Returns the new
    /// revision token.
    async fn write_object(
        &self,
        path: &str,
        content: &[u8],
        previous_sha: Option<&str>,
        message: &str,
    ) -> Result<String, RemoteError>;

    async fn delete_object(&self, path: &str, sha: &str, message: &str)
        -> Result<(), RemoteError>;

    /// Immediate children of a directory. `None` when it does not exist.
    async fn list_directory(&self, path: &str) -> Result<Option<Vec<DirEntry>>, RemoteError>;

    /// Raw blob content by its id.
    async fn read_blob(&self, sha: &str) -> Result<Vec<u8>, RemoteError>;
}

/// Retry classifier shared by every remote call site.
pub fn classify(e: &RemoteError) -> RetryAction {
    if e.is_retryable() {
        RetryAction::Retry
    } else {
        RetryAction::Abort
    }
}

/// `head_object` under the shared retry policy.
pub async fn head_with_retry(
    store: &dyn RemoteStore,
    retry: &RetryConfig,
    path: &str,
) -> Result<Option<ObjectInfo>, RemoteError> {
    retry_with_backoff(retry, path, classify, |_| store.head_object(path)).await
}

/// `list_directory` under the shared retry policy.
pub async fn list_with_retry(
    store: &dyn RemoteStore,
    retry: &RetryConfig,
    path: &str,
) -> Result<Option<Vec<DirEntry>>, RemoteError> {
    retry_with_backoff(retry, path, classify, |_| store.list_directory(path)).await
}

/// `delete_object` under the shared retry policy. A path that is already
/// gone counts as deleted.
pub async fn delete_with_retry(
    store: &dyn RemoteStore,
    retry: &RetryConfig,
    path: &str,
    sha: &str,
    message: &str,
) -> Result<(), RemoteError> {
    match retry_with_backoff(retry, path, classify, |_| {
        store.delete_object(path, sha, message)
    })
    .await
    {
        Err(RemoteError::NotFound { .. }) => Ok(()),
        other => other,
    }
}

/// Create-or-update with a fresh revision token on every attempt, so a
/// conflict retry never reuses a stale token.
///
/// Returns `Ok(None)` when the remote already holds identical bytes.
pub async fn put_with_retry(
    store: &dyn RemoteStore,
    retry: &RetryConfig,
    path: &str,
    content: &[u8],
    local_blob_sha: &str,
    message_for: impl Fn(bool) -> String + Send + Sync,
) -> Result<Option<String>, RemoteError> {
    let message_for = &message_for;
    retry_with_backoff(retry, path, classify, |_| async move {
        let previous = store.head_object(path).await?;
        match previous {
            Some(info) if info.sha == local_blob_sha => Ok(None),
            Some(info) => store
                .write_object(path, content, Some(&info.sha), &message_for(true))
                .await
                .map(Some),
            None => store
                .write_object(path, content, None, &message_for(false))
                .await
                .map(Some),
        }
    })
    .await
}
