//! Source/replica endpoint pair
//!
//! A [`SyncEndpoint`] fixes the two roots a scheduler reconciles for its whole
//! lifetime. Both roots are absolute and lexically normalized at construction,
//! so every relative-path computation between the trees works on clean
//! component lists.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};

use super::errors::DomainError;

/// An immutable (source, replica) pair of absolute directory paths
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncEndpoint {
    source: PathBuf,
    replica: PathBuf,
}

impl SyncEndpoint {
    /// Create a new endpoint pair
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if either path is relative or
    /// escapes the filesystem root via `..`
    pub fn new(
        source: impl Into<PathBuf>,
        replica: impl Into<PathBuf>,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            source: normalize_absolute(&source.into())?,
            replica: normalize_absolute(&replica.into())?,
        })
    }

    /// The authoritative root
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// The mirrored root
    #[must_use]
    pub fn replica(&self) -> &Path {
        &self.replica
    }
}

impl Display for SyncEndpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source.display(), self.replica.display())
    }
}

/// Resolve `.` and `..` components of an absolute path without touching the
/// filesystem (the path might not exist yet).
///
/// # Errors
/// Returns `DomainError::InvalidPath` if the path is relative or escapes the
/// root via `..`
pub fn normalize_absolute(path: &Path) -> Result<PathBuf, DomainError> {
    if !path.is_absolute() {
        return Err(DomainError::InvalidPath(format!(
            "Path must be absolute: {}",
            path.display()
        )));
    }

    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(p) => normalized.push(p.as_os_str()),
            Component::RootDir => normalized.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(DomainError::InvalidPath(
                        "Path escapes root via ..".to_string(),
                    ));
                }
            }
            Component::Normal(c) => normalized.push(c),
        }
    }

    Ok(normalized)
}
