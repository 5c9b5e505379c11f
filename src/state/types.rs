//! Types for the metadata cache.

use chrono::{DateTime, Utc};

/// One cache entry: the last confirmed-in-sync observation of a local file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    /// Absolute local path; the primary key.
    pub path: String,
    /// Lowercase hex SHA-256 of the file bytes.
    pub content_hash: String,
    /// Modification time as fractional seconds since the Unix epoch.
    pub mtime: f64,
    pub size: u64,
}

impl FileRecord {
    /// Stat-level match. The hash remains the source of truth.
    pub fn stat_matches(&self, mtime: f64, size: u64) -> bool {
        self.size == size && self.mtime == mtime
    }
}

/// Which engine pass a `sync_runs` row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Sync,
    Reconstruct,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Reconstruct => "reconstruct",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sync" => Some(Self::Sync),
            "reconstruct" => Some(Self::Reconstruct),
            _ => None,
        }
    }
}

/// Statistics for a single pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRunStats {
    pub processed: u64,
    /// Files uploaded (sync) or reconstructed (reconstruct).
    pub transferred: u64,
    /// Files unchanged (sync) or skipped (reconstruct).
    pub unchanged: u64,
    pub failed: u64,
    /// Whether the pass was cut short by cancellation.
    pub interrupted: bool,
}

/// Summary of the cache database, for the `status` command.
#[derive(Debug, Clone)]
pub struct StateSummary {
    pub cached_files: u64,
    pub total_runs: u64,
    pub last_run_kind: Option<RunKind>,
    pub last_run_started: Option<DateTime<Utc>>,
    pub last_run_completed: Option<DateTime<Utc>>,
    pub last_run_stats: Option<SyncRunStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_kind_round_trip() {
        for kind in [RunKind::Sync, RunKind::Reconstruct] {
            assert_eq!(RunKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(RunKind::from_str("invalid"), None);
    }

    #[test]
    fn test_stat_matches() {
        let record = FileRecord {
            path: "/tmp/a".into(),
            content_hash: "00".into(),
            mtime: 1_700_000_000.25,
            size: 10,
        };
        assert!(record.stat_matches(1_700_000_000.25, 10));
        assert!(!record.stat_matches(1_700_000_000.25, 11));
        assert!(!record.stat_matches(1_700_000_001.0, 10));
    }
}
