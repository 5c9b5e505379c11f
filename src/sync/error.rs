use std::path::PathBuf;

use thiserror::Error;

use crate::parts::PartError;
use crate::remote::RemoteError;
use crate::state::StateError;

/// Failure categories reported per file and recorded in summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TransientNetwork,
    Conflict,
    TooLarge,
    Validation,
    MalformedPart,
    Incomplete,
    LocalIo,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientNetwork => "transient_network",
            Self::Conflict => "conflict",
            Self::TooLarge => "too_large",
            Self::Validation => "validation",
            Self::MalformedPart => "malformed_part",
            Self::Incomplete => "incomplete",
            Self::LocalIo => "local_io",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Malformed part {path}: {source}")]
    Part {
        path: String,
        #[source]
        source: PartError,
    },

    /// Missing, duplicate or inconsistent parts after all fetch retries.
    #[error("Incomplete part set for {path}: {reason}")]
    Incomplete { path: String, reason: String },

    #[error("Local I/O error on {path}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cancelled")]
    Cancelled,

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl SyncError {
    pub fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::LocalIo {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Remote(e) => match e {
                RemoteError::Conflict { .. } => ErrorKind::Conflict,
                RemoteError::TooLarge { .. } => ErrorKind::TooLarge,
                RemoteError::NotFound { .. } | RemoteError::Rejected { .. } => {
                    ErrorKind::Validation
                }
                RemoteError::HttpStatus { .. } if e.is_retryable() => ErrorKind::TransientNetwork,
                RemoteError::HttpStatus { .. } => ErrorKind::Validation,
                RemoteError::Http { .. } | RemoteError::Decode { .. } => {
                    ErrorKind::TransientNetwork
                }
            },
            SyncError::Part { .. } => ErrorKind::MalformedPart,
            SyncError::Incomplete { .. } => ErrorKind::Incomplete,
            SyncError::LocalIo { .. } | SyncError::State(_) | SyncError::Join(_) => {
                ErrorKind::LocalIo
            }
            SyncError::InvalidConfig(_) => ErrorKind::Validation,
            SyncError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// A malformed part is retried as a fetch: truncation in transit looks
    /// the same as corruption at rest.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_retryable(),
            SyncError::Part { .. } => true,
            _ => false,
        }
    }
}
