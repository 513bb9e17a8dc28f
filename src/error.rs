//! Error types for atomic-build.
//!
//! All operations return `Result<T>` which aliases `Result<T, BuildError>`.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from atomic write, staging, and transaction operations.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A single-file write or staged-directory commit failed.
    ///
    /// By the time this is returned, local cleanup for the failed step
    /// (temp file removal, backup restore) has already run.
    #[error("Atomic write failed for {}: {source}", .path.display())]
    AtomicWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// One or more operations could not be undone.
    #[error("Rollback failed: {}", join_failures(.0))]
    RollbackFailed(Vec<RollbackFailure>),

    /// Transaction or staged directory already committed/rolled back.
    #[error("Transaction already committed or rolled back")]
    TransactionClosed,

    /// Strict durability requested on a platform without directory sync.
    #[error("Directory sync is not supported on this platform: {}", .0.display())]
    DirSyncUnsupported(PathBuf),

    /// Invalid path supplied by the caller.
    #[error("Invalid path '{0}': {1}")]
    InvalidPath(String, String),

    /// Build plan is malformed or fails preflight.
    #[error("Invalid build plan: {0}")]
    InvalidPlan(String),

    /// File system operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// TOML parse error in a build plan.
    #[error("TOML error: {0}")]
    Toml(#[from] toml_edit::TomlError),

    /// Regex compilation failed (indicates bug).
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Unexpected error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BuildError {
    pub(crate) fn atomic(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::AtomicWrite {
            path: path.into(),
            source,
        }
    }
}

/// A single failure encountered while undoing an operation.
#[derive(Debug)]
pub struct RollbackFailure {
    pub path: PathBuf,
    pub source: std::io::Error,
}

impl fmt::Display for RollbackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.source)
    }
}

fn join_failures(failures: &[RollbackFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for atomic-build operations.
pub type Result<T> = std::result::Result<T, BuildError>;
