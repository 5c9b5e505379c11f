//! Engine configuration and the shared handle the passes run on.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::parts::naming;
use crate::remote::{BlobCache, RemoteStore, HARD_OBJECT_CEILING};
use crate::retry::RetryConfig;
use crate::state::MetadataCache;
use crate::sync::error::SyncError;
use crate::sync::locks::{InProgress, PathLocks};

const MIB: u64 = 1024 * 1024;

/// Upper bound on the `METADATA:` line plus `CONTENT:` marker of one part.
pub const PART_HEADER_ALLOWANCE: u64 = 1024;

/// Caller-supplied filter deciding which local files take part in a sync.
pub type Predicate = dyn Fn(&Path) -> bool + Send + Sync;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Files at or below this size are written as one object.
    pub direct_upload_limit_bytes: u64,
    pub part_size_bytes: u64,
    pub retry: RetryConfig,
    /// Replace existing local files when reconstructing or pulling.
    pub overwrite_existing: bool,
    /// Files in flight at once.
    pub concurrency: usize,
    /// Parts in flight per file.
    pub part_concurrency: usize,
    /// Remote directory that mirrors the local root. Empty for the repo root.
    pub remote_root: String,
    pub blob_cache_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            direct_upload_limit_bytes: 40 * MIB,
            part_size_bytes: 4 * MIB,
            retry: RetryConfig::default(),
            overwrite_existing: false,
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            part_concurrency: 4,
            remote_root: String::new(),
            blob_cache_bytes: 64 * MIB,
        }
    }
}

/// Size of a part object carrying `part_size` payload bytes.
pub fn encoded_part_len(part_size: u64) -> u64 {
    part_size.div_ceil(3) * 4 + PART_HEADER_ALLOWANCE
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.direct_upload_limit_bytes == 0 {
            return Err(SyncError::InvalidConfig(
                "direct upload limit must be positive".into(),
            ));
        }
        if self.direct_upload_limit_bytes > HARD_OBJECT_CEILING {
            return Err(SyncError::InvalidConfig(format!(
                "direct upload limit {} exceeds the remote ceiling of {} bytes",
                self.direct_upload_limit_bytes, HARD_OBJECT_CEILING
            )));
        }
        if self.part_size_bytes == 0 {
            return Err(SyncError::InvalidConfig("part size must be positive".into()));
        }
        let encoded = encoded_part_len(self.part_size_bytes);
        if encoded >= self.direct_upload_limit_bytes {
            return Err(SyncError::InvalidConfig(format!(
                "part size {} encodes to ~{} bytes, not below the direct upload limit {}",
                self.part_size_bytes, encoded, self.direct_upload_limit_bytes
            )));
        }
        if self.concurrency == 0 || self.part_concurrency == 0 {
            return Err(SyncError::InvalidConfig("concurrency must be at least 1".into()));
        }
        if self.remote_root.split('/').any(|s| s == "..") {
            return Err(SyncError::InvalidConfig(format!(
                "remote root {:?} may not contain '..'",
                self.remote_root
            )));
        }
        Ok(())
    }
}

/// Everything a sync or reconstruct pass shares. Cheap to share behind an
/// `Arc`; every field is internally synchronized.
pub struct Engine {
    pub(crate) store: Arc<dyn RemoteStore>,
    pub(crate) cache: Arc<dyn MetadataCache>,
    pub(crate) blobs: BlobCache,
    pub(crate) config: EngineConfig,
    pub(crate) path_locks: PathLocks,
    pub(crate) in_progress: InProgress,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        cache: Arc<dyn MetadataCache>,
        mut config: EngineConfig,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        config.remote_root = config.remote_root.trim_matches('/').to_string();
        Ok(Self {
            store,
            cache,
            blobs: BlobCache::new(config.blob_cache_bytes),
            config,
            path_locks: PathLocks::default(),
            in_progress: InProgress::default(),
        })
    }

    /// Remote path for a path relative to the local root.
    pub fn remote_path_for(&self, rel: &Path) -> String {
        let rel = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/");
        naming::join(&self.config.remote_root, &rel)
    }

    /// Local destination for a remote path, or `None` if the path lies
    /// outside the remote root or would escape the local root.
    pub fn local_path_for(&self, local_root: &Path, remote_path: &str) -> Option<PathBuf> {
        let root = &self.config.remote_root;
        let rel = if root.is_empty() {
            remote_path
        } else {
            remote_path.strip_prefix(root.as_str())?.strip_prefix('/')?
        };
        let mut out = local_root.to_path_buf();
        for seg in rel.split('/') {
            if seg.is_empty() || seg == "." || seg == ".." {
                return None;
            }
            out.push(seg);
        }
        Some(out)
    }
}
