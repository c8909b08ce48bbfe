//! dirsync Sync - One-way tree reconciliation engine
//!
//! Provides:
//! - Content comparison of file pairs (size/mtime fast path, SHA-256 slow path)
//! - Creation and removal passes that mirror a source tree into a replica
//! - Structural failure recovery (missing source or replica root)
//! - An interruptible periodic scheduler
//! - A cosmetic change watcher that only annotates the log
//!
//! ## Modules
//!
//! - [`comparator`] - decides whether two files are content-identical
//! - [`reconciler`] - creation and removal passes over two directory trees
//! - [`recovery`] - one cycle wrapped in structural-failure classification
//! - [`scheduler`] - run/stop state machine driving periodic cycles
//! - [`watcher`] - `notify` watcher and change logger

pub mod comparator;
pub mod reconciler;
pub mod recovery;
pub mod scheduler;
pub mod watcher;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use dirsync_core::domain::DomainError;
use thiserror::Error;

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error occurred while operating on a path
    #[error("IO error on {}: {source}", path.display())]
    Io {
        /// The entry being read, written or removed
        path: PathBuf,
        /// The underlying error
        #[source]
        source: std::io::Error,
    },

    /// Insufficient filesystem permissions
    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    /// The specified path does not exist
    #[error("Path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    /// A blocking filesystem task panicked or was cancelled
    #[error("Background task failed: {0}")]
    TaskFailed(String),

    /// The change watcher could not be set up
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// A domain-level error propagated from dirsync-core
    #[error("Domain error: {0}")]
    DomainError(#[from] DomainError),
}

impl SyncError {
    /// Wraps an I/O error with the path it occurred on
    ///
    /// `NotFound` and `PermissionDenied` get their own variants so callers can
    /// match on them without digging into the source error.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match source.kind() {
            ErrorKind::NotFound => SyncError::PathNotFound(path),
            ErrorKind::PermissionDenied => SyncError::PermissionDenied(path),
            _ => SyncError::Io { path, source },
        }
    }

    /// Returns true for errors caused by a missing path
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::PathNotFound(_))
    }
}
