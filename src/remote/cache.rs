//! Byte-bounded LRU for blob contents keyed by blob id.
//!
//! Blob ids are content hashes, so an entry never goes stale; the bound only
//! keeps a long-lived process (watch mode) from growing without limit.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

pub struct BlobCache {
    max_bytes: u64,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    /// front = least recently used.
    order: VecDeque<String>,
    data: HashMap<String, Arc<[u8]>>,
    used_bytes: u64,
}

impl std::fmt::Debug for BlobCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobCache")
            .field("max_bytes", &self.max_bytes)
            .field("used_bytes", &self.used_bytes())
            .finish()
    }
}

impl BlobCache {
    /// A `max_bytes` of 0 disables caching.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        // Pure in-memory state; a panic mid-update cannot leave it unusable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert, evicting least recently used entries until it fits. Entries
    /// larger than the whole budget are not cached.
    pub fn put(&self, sha: &str, data: Arc<[u8]>) {
        let len = data.len() as u64;
        if len > self.max_bytes {
            return;
        }

        let mut inner = self.lock();
        if let Some(old) = inner.data.remove(sha) {
            inner.used_bytes -= old.len() as u64;
            inner.order.retain(|s| s != sha);
        }

        while inner.used_bytes + len > self.max_bytes {
            let Some(evict) = inner.order.pop_front() else {
                break;
            };
            if let Some(evicted) = inner.data.remove(&evict) {
                inner.used_bytes -= evicted.len() as u64;
                tracing::trace!(sha = %evict, "Evicted cached blob");
            }
        }

        inner.used_bytes += len;
        inner.data.insert(sha.to_string(), data);
        inner.order.push_back(sha.to_string());
    }

    /// Look up and promote to most recently used.
    pub fn get(&self, sha: &str) -> Option<Arc<[u8]>> {
        let mut inner = self.lock();
        let data = inner.data.get(sha)?.clone();
        inner.order.retain(|s| s != sha);
        inner.order.push_back(sha.to_string());
        Some(data)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().data.len()
    }

    pub fn used_bytes(&self) -> u64 {
        self.lock().used_bytes
    }
}
