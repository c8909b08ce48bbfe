//! Startup validation of the source, replica and log paths
//!
//! Runs once before the scheduler is constructed:
//!
//! 1. the interval must be a positive number of seconds,
//! 2. no path may be inside another (a replica inside its own source would
//!    be mirrored into itself forever),
//! 3. missing source/replica directories are created,
//! 4. the log file must be openable for append.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::{endpoint::normalize_absolute, DomainError, SyncEndpoint};

/// Paths that passed validation, ready to hand to the scheduler and logger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPaths {
    /// The source/replica pair
    pub endpoint: SyncEndpoint,
    /// Absolute path of the log file
    pub log_file: PathBuf,
}

/// Validates the startup arguments and prepares the filesystem for a run
///
/// Relative paths are resolved against the current working directory.
///
/// # Errors
/// Returns a [`DomainError`] describing the first problem found.
pub fn validate_paths(
    source: &Path,
    replica: &Path,
    log_file: &Path,
    interval_secs: u64,
) -> Result<ValidatedPaths, DomainError> {
    if interval_secs == 0 {
        return Err(DomainError::InvalidInterval(interval_secs));
    }

    let source = absolutize(source)?;
    let replica = absolutize(replica)?;
    let log_file = absolutize(log_file)?;

    let paths = [&source, &replica, &log_file];
    for (i, inner) in paths.iter().enumerate() {
        for (j, outer) in paths.iter().enumerate() {
            if i != j && is_inside(inner, outer) {
                return Err(DomainError::PathsOverlap {
                    inner: inner.display().to_string(),
                    outer: outer.display().to_string(),
                });
            }
        }
    }

    ensure_directory(&source, "source")?;
    ensure_directory(&replica, "replica")?;

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .map_err(|e| {
            DomainError::ValidationFailed(format!(
                "Error accessing log file {}: {e}",
                log_file.display()
            ))
        })?;

    let endpoint = SyncEndpoint::new(source, replica)?;
    debug!(%endpoint, log_file = %log_file.display(), "Paths validated");

    Ok(ValidatedPaths { endpoint, log_file })
}

/// Returns true if `path` equals `dir` or lies anywhere below it
///
/// Comparison is component-wise, so `/data/src2` is not inside `/data/src`.
pub fn is_inside(path: &Path, dir: &Path) -> bool {
    path.starts_with(dir)
}

/// Resolves `path` against the working directory and normalizes it lexically
///
/// # Errors
/// Returns `DomainError::InvalidPath` if the working directory is unavailable
/// or the path escapes the root.
pub fn absolutize(path: &Path) -> Result<PathBuf, DomainError> {
    if path.as_os_str().is_empty() {
        return Err(DomainError::InvalidPath("Path must not be empty".to_string()));
    }

    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| DomainError::InvalidPath(format!("Cannot resolve working directory: {e}")))?
            .join(path)
    };

    normalize_absolute(&joined)
}

fn ensure_directory(path: &Path, role: &str) -> Result<(), DomainError> {
    if path.is_dir() {
        return Ok(());
    }
    if path.exists() {
        return Err(DomainError::ValidationFailed(format!(
            "The {role} path {} exists but is not a directory",
            path.display()
        )));
    }

    std::fs::create_dir_all(path).map_err(|e| {
        DomainError::ValidationFailed(format!(
            "Error creating {role} directory {}: {e}",
            path.display()
        ))
    })?;
    debug!(path = %path.display(), role, "Created missing directory");
    Ok(())
}
