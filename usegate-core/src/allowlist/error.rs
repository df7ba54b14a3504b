//! Errors returned by allowlist mutations.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// Administrative errors. Request-time rejections are not errors; see
/// [`crate::policy::Decision`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The identifier (canonical form) is already allowed.
    #[error("use case '{id}' is already allowed")]
    DuplicateId { id: String },

    /// The identifier (canonical form) is not in the allowlist.
    #[error("use case '{id}' is not in the allowlist")]
    NotFound { id: String },

    /// The identifier cannot be stored.
    #[error("invalid use case identifier '{id}': {reason}")]
    InvalidId { id: String, reason: &'static str },

    /// A bulk import line could not be parsed. Nothing was written.
    #[error("line {line}: {reason}: '{content}'")]
    MalformedBulkLine {
        line: usize,
        content: String,
        reason: String,
    },

    /// A backup could not be taken under the fail-closed policy.
    #[error("backup of {} failed: {message}", path.display())]
    BackupFailed { path: PathBuf, message: String },

    /// Another writer held the file lock for longer than the lock timeout.
    #[error("another writer holds the lock on {}", path.display())]
    Locked { path: PathBuf },

    /// The configured path names a directory.
    #[error("configuration path is a directory: {}", path.display())]
    PathIsDirectory { path: PathBuf },

    /// Writing the new document failed. The previous file is intact.
    #[error("failed to persist {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
