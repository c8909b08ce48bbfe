//! File content comparison
//!
//! [`FileComparator::files_equal`] first compares size and modification time,
//! which rules out most changed files without reading them. Only when both
//! match are the two files hashed (SHA-256, streamed in fixed-size chunks)
//! and the digests compared. This still catches edits that preserve size and
//! timestamp, e.g. after clock skew or a tool that restores mtimes.

use std::fs::Metadata;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{instrument, trace};

use crate::SyncError;

/// SHA-256 digest of a file's full byte stream
pub type ContentDigest = [u8; 32];

/// Read buffer size used while hashing
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Decides whether two files are content-identical
///
/// Keeps a running count of hashed files, which the cycle log reports and
/// tests use to check the cheap path.
#[derive(Debug, Default)]
pub struct FileComparator {
    files_hashed: AtomicU64,
}

impl FileComparator {
    /// Create a new comparator with a zeroed hash counter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true iff both files have the same size, modification time and
    /// content digest
    ///
    /// # Errors
    /// Propagates any error from reading metadata or content of either file.
    #[instrument(skip_all, fields(a = %a.display(), b = %b.display()))]
    pub async fn files_equal(&self, a: &Path, b: &Path) -> Result<bool, SyncError> {
        let meta_a = tokio::fs::metadata(a)
            .await
            .map_err(|e| SyncError::io(a, e))?;
        let meta_b = tokio::fs::metadata(b)
            .await
            .map_err(|e| SyncError::io(b, e))?;

        if !metadata_matches(&meta_a, &meta_b) {
            trace!("size or mtime differs");
            return Ok(false);
        }

        let digest_a = self.content_hash(a).await?;
        let digest_b = self.content_hash(b).await?;
        let equal = digest_a == digest_b;

        trace!(equal, "compared content digests");
        Ok(equal)
    }

    /// Computes the SHA-256 digest of the file at `path`
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or read.
    pub async fn content_hash(&self, path: &Path) -> Result<ContentDigest, SyncError> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| SyncError::io(path, e))?;

        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; HASH_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await.map_err(|e| SyncError::io(path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        self.files_hashed.fetch_add(1, Ordering::Relaxed);
        Ok(hasher.finalize().into())
    }

    /// Number of files hashed since construction
    pub fn files_hashed(&self) -> u64 {
        self.files_hashed.load(Ordering::Relaxed)
    }
}

/// Cheap pre-check: equal length and equal modification time
///
/// Platforms without mtime support compare as equal here and fall through
/// to hashing.
fn metadata_matches(a: &Metadata, b: &Metadata) -> bool {
    a.len() == b.len() && a.modified().ok() == b.modified().ok()
}
