//! In-memory [`RemoteStore`] with fault injection, for tests.
//!
//! Directories are implicit, as on the real backend: a directory exists while
//! at least one object lives under it. Revision tokens are real git blob ids.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{DirEntry, EntryKind, ObjectInfo, RemoteError, RemoteObject, RemoteStore};
use crate::hasher::git_blob_sha;

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    calls: AtomicU64,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, Vec<u8>>,
    read_failures: HashMap<String, u32>,
    truncated_reads: HashMap<String, u32>,
    write_failures: HashMap<String, u32>,
    write_conflicts: HashMap<String, u32>,
    delete_failures: HashMap<String, u32>,
    list_failures: HashMap<String, u32>,
    cancel_on_read: HashMap<String, CancellationToken>,
    max_object_size: Option<usize>,
    read_attempts: HashMap<String, u32>,
    write_attempts: HashMap<String, u32>,
    writes: Vec<String>,
    deletes: Vec<String>,
}

/// Consume one injected fault for `path`, if any remain.
fn take(faults: &mut HashMap<String, u32>, path: &str) -> bool {
    match faults.get_mut(path) {
        Some(n) if *n > 0 => {
            *n -= 1;
            true
        }
        _ => false,
    }
}

fn transient(path: &str) -> RemoteError {
    RemoteError::HttpStatus {
        status: 503,
        path: path.to_string(),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.lock().unwrap()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn insert(&self, path: &str, content: Vec<u8>) {
        self.state().objects.insert(path.to_string(), content);
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.state().objects.get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.state().objects.keys().cloned().collect()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.state().objects.clone()
    }

    /// Total calls made through the trait.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, path: &str, times: u32) {
        self.state().read_failures.insert(path.to_string(), times);
    }

    /// Serve the next `times` reads of `path` with the last byte cut off.
    pub fn truncate_reads(&self, path: &str, times: u32) {
        self.state().truncated_reads.insert(path.to_string(), times);
    }

    pub fn fail_writes(&self, path: &str, times: u32) {
        self.state().write_failures.insert(path.to_string(), times);
    }

    /// Reject the next `times` writes of `path` as stale revisions.
    pub fn conflict_writes(&self, path: &str, times: u32) {
        self.state().write_conflicts.insert(path.to_string(), times);
    }

    pub fn fail_deletes(&self, path: &str, times: u32) {
        self.state().delete_failures.insert(path.to_string(), times);
    }

    pub fn fail_lists(&self, path: &str, times: u32) {
        self.state().list_failures.insert(path.to_string(), times);
    }

    /// Cancel `token` as soon as `path` is read. The read itself succeeds.
    pub fn cancel_on_read(&self, path: &str, token: CancellationToken) {
        self.state().cancel_on_read.insert(path.to_string(), token);
    }

    pub fn set_max_object_size(&self, bytes: usize) {
        self.state().max_object_size = Some(bytes);
    }

    pub fn read_attempts(&self, path: &str) -> u32 {
        self.state().read_attempts.get(path).copied().unwrap_or(0)
    }

    pub fn write_attempts(&self, path: &str) -> u32 {
        self.state().write_attempts.get(path).copied().unwrap_or(0)
    }

    /// Successful writes, in order.
    pub fn writes(&self) -> Vec<String> {
        self.state().writes.clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.state().deletes.clone()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn read_object(&self, path: &str) -> Result<Option<RemoteObject>, RemoteError> {
        let mut inner = self.lock();
        *inner.read_attempts.entry(path.to_string()).or_default() += 1;
        if let Some(token) = inner.cancel_on_read.get(path) {
            token.cancel();
        }
        if take(&mut inner.read_failures, path) {
            return Err(transient(path));
        }
        let truncate = take(&mut inner.truncated_reads, path);
        Ok(inner.objects.get(path).map(|content| {
            let sha = git_blob_sha(content);
            let mut content = content.clone();
            if truncate {
                content.pop();
            }
            RemoteObject {
                path: path.to_string(),
                sha,
                content,
            }
        }))
    }

    async fn head_object(&self, path: &str) -> Result<Option<ObjectInfo>, RemoteError> {
        let inner = self.lock();
        Ok(inner.objects.get(path).map(|content| ObjectInfo {
            path: path.to_string(),
            sha: git_blob_sha(content),
            size: content.len() as u64,
        }))
    }

    async fn write_object(
        &self,
        path: &str,
        content: &[u8],
        previous_sha: Option<&str>,
        _message: &str,
    ) -> Result<String, RemoteError> {
        let mut inner = self.lock();
        *inner.write_attempts.entry(path.to_string()).or_default() += 1;

        if inner.max_object_size.is_some_and(|max| content.len() > max) {
            return Err(RemoteError::TooLarge {
                path: path.to_string(),
                message: "payload exceeds limit".into(),
            });
        }
        if take(&mut inner.write_failures, path) {
            return Err(transient(path));
        }
        let current = inner.objects.get(path).map(|c| git_blob_sha(c));
        if take(&mut inner.write_conflicts, path) || current.as_deref() != previous_sha {
            return Err(RemoteError::Conflict {
                path: path.to_string(),
                message: format!("expected {current:?}, got {previous_sha:?}"),
            });
        }

        inner.objects.insert(path.to_string(), content.to_vec());
        inner.writes.push(path.to_string());
        Ok(git_blob_sha(content))
    }

    async fn delete_object(
        &self,
        path: &str,
        sha: &str,
        _message: &str,
    ) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        if take(&mut inner.delete_failures, path) {
            return Err(transient(path));
        }
        match inner.objects.get(path) {
            None => Err(RemoteError::NotFound {
                path: path.to_string(),
            }),
            Some(c) if git_blob_sha(c) != sha => Err(RemoteError::Conflict {
                path: path.to_string(),
                message: "sha does not match".into(),
            }),
            Some(_) => {
                inner.objects.remove(path);
                inner.deletes.push(path.to_string());
                Ok(())
            }
        }
    }

    async fn list_directory(&self, path: &str) -> Result<Option<Vec<DirEntry>>, RemoteError> {
        let mut inner = self.lock();
        if take(&mut inner.list_failures, path) {
            return Err(transient(path));
        }

        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path.trim_end_matches('/'))
        };
        let mut files = Vec::new();
        let mut dirs = BTreeSet::new();
        for (key, content) in inner.objects.range(prefix.clone()..) {
            let Some(rest) = key.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    dirs.insert(dir.to_string());
                }
                None => files.push(DirEntry {
                    name: rest.to_string(),
                    path: key.clone(),
                    kind: EntryKind::File,
                    sha: git_blob_sha(content),
                    size: content.len() as u64,
                }),
            }
        }

        if files.is_empty() && dirs.is_empty() && !path.is_empty() {
            return Ok(None);
        }
        let mut entries: Vec<DirEntry> = dirs
            .into_iter()
            .map(|name| DirEntry {
                path: format!("{prefix}{name}"),
                name,
                kind: EntryKind::Dir,
                sha: String::new(),
                size: 0,
            })
            .collect();
        entries.extend(files);
        Ok(Some(entries))
    }

    async fn read_blob(&self, sha: &str) -> Result<Vec<u8>, RemoteError> {
        let inner = self.lock();
        inner
            .objects
            .values()
            .find(|c| git_blob_sha(c) == sha)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound {
                path: sha.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listing_is_immediate_children_only() {
        let store = MemoryStore::new();
        store.insert("a/x.txt", b"1".to_vec());
        store.insert("a/b/y.txt", b"2".to_vec());
        store.insert("ab.txt", b"3".to_vec());

        let root = store.list_directory("").await.unwrap().unwrap();
        let names: Vec<_> = root.iter().map(|e| (e.name.as_str(), e.kind)).collect();
        assert_eq!(names, vec![("a", EntryKind::Dir), ("ab.txt", EntryKind::File)]);

        let a = store.list_directory("a").await.unwrap().unwrap();
        let names: Vec<_> = a.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(names, vec!["a/b", "a/x.txt"]);

        assert!(store.list_directory("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_sha_conflicts() {
        let store = MemoryStore::new();
        store.insert("f", b"v1".to_vec());
        let err = store.write_object("f", b"v2", Some("bogus"), "m").await.unwrap_err();
        assert!(matches!(err, RemoteError::Conflict { .. }));
        let err = store.write_object("f", b"v2", None, "m").await.unwrap_err();
        assert!(matches!(err, RemoteError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_injected_read_failures_are_consumed() {
        let store = MemoryStore::new();
        store.insert("p", b"data".to_vec());
        store.fail_reads("p", 2);
        assert!(store.read_object("p").await.is_err());
        assert!(store.read_object("p").await.is_err());
        assert_eq!(store.read_object("p").await.unwrap().unwrap().content, b"data");
        assert_eq!(store.read_attempts("p"), 3);
    }
}
