//! Client-side serialization for a store that offers no locking.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

/// One async mutex per remote logical path. Writers to the same path queue;
/// distinct paths proceed in parallel.
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PathLocks {
    pub async fn lock(&self, path: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Drop entries nobody holds or waits on.
            map.retain(|_, m| Arc::strong_count(m) > 1);
            map.entry(path.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Set of logical files currently being reconstructed.
#[derive(Debug, Default)]
pub struct InProgress {
    active: Mutex<HashSet<String>>,
}

/// Removes its key from the set on drop.
#[derive(Debug)]
pub struct InProgressGuard<'a> {
    owner: &'a InProgress,
    key: String,
}

impl InProgress {
    /// `None` when `key` is already being worked on.
    pub fn try_begin(&self, key: &str) -> Option<InProgressGuard<'_>> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(key.to_string()) {
            return None;
        }
        Some(InProgressGuard {
            owner: self,
            key: key.to_string(),
        })
    }

    #[cfg(test)]
    pub fn is_active(&self, key: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.owner
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_path_serializes() {
        let locks = Arc::new(PathLocks::default());
        let order = Arc::new(Mutex::new(Vec::new()));

        let g = locks.lock("a").await;
        let (l2, o2) = (locks.clone(), order.clone());
        let waiter = tokio::spawn(async move {
            let _g = l2.lock("a").await;
            o2.lock().unwrap().push("second");
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        order.lock().unwrap().push("first");
        drop(g);
        waiter.await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_distinct_paths_do_not_block() {
        let locks = PathLocks::default();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b")).await;
        assert!(b.is_ok());
    }

    #[test]
    fn test_in_progress_guard_rejects_duplicate_and_releases() {
        let set = InProgress::default();
        let g = set.try_begin("docs/a.bin").unwrap();
        assert!(set.try_begin("docs/a.bin").is_none());
        assert!(set.try_begin("docs/b.bin").is_some());
        assert!(set.is_active("docs/a.bin"));
        drop(g);
        assert!(!set.is_active("docs/a.bin"));
        assert!(set.try_begin("docs/a.bin").is_some());
    }
}
