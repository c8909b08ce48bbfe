//! Tree reconciliation passes
//!
//! [`TreeReconciler`] mirrors a source tree into a replica with two
//! independent passes:
//!
//! - [`sync_creation`](TreeReconciler::sync_creation) copies missing or changed
//!   files and creates missing directories. It never removes an entry that has
//!   a same-kind counterpart in the source.
//! - [`sync_removal`](TreeReconciler::sync_removal) deletes replica files and
//!   directories that have no counterpart in the source. It never creates
//!   anything.
//!
//! Both passes walk the trees with an explicit work-list of
//! `(source dir, replica dir)` pairs, so tree depth is bounded by heap memory
//! rather than the call stack.
//!
//! ## Design Decisions
//!
//! - **Copies** go to a temporary sibling that is renamed over the target, and
//!   carry the source's mtime so the comparator's cheap path matches on the
//!   next cycle.
//! - **Kind mismatches** (file in the source, directory in the replica or the
//!   other way round) are resolved by removing the replica entry first.
//! - **Symlinks to regular files** in the source are copied by content. Other
//!   special entries (directory or dangling symlinks, FIFOs, sockets) are not
//!   mirrored.
//! - **Entry failures** follow the configured [`EntryErrorPolicy`]. A failure
//!   while either root is missing always aborts the pass, so the recovery
//!   layer gets to classify it.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use dirsync_core::config::EntryErrorPolicy;
use tracing::{debug, info, instrument, warn};

use crate::comparator::FileComparator;
use crate::SyncError;

/// Suffix of the temporary file a copy is written to before the rename
pub const TEMP_SUFFIX: &str = ".dirsync-tmp";

// ============================================================================
// ReconcileReport
// ============================================================================

/// Summary of one pass, or of a whole cycle after [`merge`](Self::merge)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Files copied from source to replica
    pub files_copied: u32,
    /// Directories created in the replica
    pub dirs_created: u32,
    /// Files (or special entries) deleted from the replica
    pub files_deleted: u32,
    /// Directories deleted (recursively) from the replica
    pub dirs_deleted: u32,
    /// Entry failures that were skipped (non-fatal)
    pub errors: Vec<String>,
}

impl ReconcileReport {
    /// Adds the counters and errors of `other` to this report
    pub fn merge(&mut self, other: ReconcileReport) {
        self.files_copied += other.files_copied;
        self.dirs_created += other.dirs_created;
        self.files_deleted += other.files_deleted;
        self.dirs_deleted += other.dirs_deleted;
        self.errors.extend(other.errors);
    }

    /// Total number of filesystem mutations performed
    pub fn changes(&self) -> u32 {
        self.files_copied + self.dirs_created + self.files_deleted + self.dirs_deleted
    }

    /// True if the pass neither changed anything nor skipped any entry
    pub fn is_noop(&self) -> bool {
        self.changes() == 0 && self.errors.is_empty()
    }
}

// ============================================================================
// Directory listing helpers
// ============================================================================

/// What a directory entry is, without following symlinks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    File,
    Dir,
    Other,
}

#[derive(Debug)]
struct Entry {
    name: OsString,
    path: PathBuf,
    kind: EntryKind,
}

async fn list_dir(dir: &Path) -> Result<Vec<Entry>, SyncError> {
    let mut read_dir = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| SyncError::io(dir, e))?;

    let mut entries = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| SyncError::io(dir, e))?
    {
        let path = entry.path();
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| SyncError::io(&path, e))?;
        let kind = if file_type.is_file() {
            EntryKind::File
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::Other
        };
        entries.push(Entry {
            name: entry.file_name(),
            path,
            kind,
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Lists a source directory, counting symlinks to regular files as files
async fn list_source_dir(dir: &Path) -> Result<Vec<Entry>, SyncError> {
    let mut entries = list_dir(dir).await?;
    for entry in &mut entries {
        if entry.kind == EntryKind::Other && is_link_to_file(&entry.path).await {
            entry.kind = EntryKind::File;
        }
    }
    Ok(entries)
}

async fn is_link_to_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Kind of the entry at `path`, or `None` if nothing is there
async fn kind_of(path: &Path) -> Result<Option<EntryKind>, SyncError> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(Some(EntryKind::File)),
        Ok(meta) if meta.is_dir() => Ok(Some(EntryKind::Dir)),
        Ok(_) => Ok(Some(EntryKind::Other)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SyncError::io(path, e)),
    }
}

/// Like [`kind_of`], with the source-side view of symlinks to regular files
async fn source_kind_of(path: &Path) -> Result<Option<EntryKind>, SyncError> {
    let kind = kind_of(path).await?;
    if kind == Some(EntryKind::Other) && is_link_to_file(path).await {
        return Ok(Some(EntryKind::File));
    }
    Ok(kind)
}

pub(crate) async fn dir_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

// ============================================================================
// TreeReconciler
// ============================================================================

/// Runs the creation and removal passes between two directory trees
#[derive(Debug)]
pub struct TreeReconciler {
    comparator: FileComparator,
    policy: EntryErrorPolicy,
}

impl TreeReconciler {
    /// Creates a reconciler with the given per-entry failure policy
    #[must_use]
    pub fn new(policy: EntryErrorPolicy) -> Self {
        Self {
            comparator: FileComparator::new(),
            policy,
        }
    }

    /// The comparator used by the creation pass
    pub fn comparator(&self) -> &FileComparator {
        &self.comparator
    }

    /// The per-entry failure policy
    pub fn policy(&self) -> EntryErrorPolicy {
        self.policy
    }

    /// Makes every source file and directory present and content-equal in the
    /// replica
    ///
    /// # Errors
    /// Fails if either root cannot be listed, or on the first entry failure
    /// under [`EntryErrorPolicy::Abort`] or while a root is missing.
    #[instrument(skip_all, fields(source = %source.display(), replica = %replica.display()))]
    pub async fn sync_creation(
        &self,
        source: &Path,
        replica: &Path,
    ) -> Result<ReconcileReport, SyncError> {
        let mut report = ReconcileReport::default();
        let mut pending = vec![(source.to_path_buf(), replica.to_path_buf())];

        while let Some((src_dir, rep_dir)) = pending.pop() {
            let entries = match list_source_dir(&src_dir).await {
                Ok(entries) => entries,
                Err(e) if src_dir != source => {
                    self.entry_failed(&mut report, source, replica, e).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            for entry in entries {
                let target = rep_dir.join(&entry.name);
                let result = match entry.kind {
                    EntryKind::File => {
                        self.create_file(&entry.path, &target, &mut report).await
                    }
                    EntryKind::Dir => {
                        let created = self.ensure_dir(&target, &mut report).await;
                        if created.is_ok() {
                            pending.push((entry.path, target));
                        }
                        created
                    }
                    EntryKind::Other => {
                        warn!(path = %entry.path.display(), "Skipping special file");
                        Ok(())
                    }
                };

                if let Err(e) = result {
                    self.entry_failed(&mut report, source, replica, e).await?;
                }
            }
        }

        debug!(
            copied = report.files_copied,
            dirs_created = report.dirs_created,
            skipped = report.errors.len(),
            "Creation pass finished"
        );
        Ok(report)
    }

    /// Deletes every replica file and directory that has no counterpart in
    /// the source
    ///
    /// Nothing is deleted from a replica directory whose source counterpart
    /// cannot be confirmed to exist, so a source root that disappears
    /// mid-pass never empties the replica.
    ///
    /// # Errors
    /// Fails if either root cannot be listed, if the source root disappears,
    /// or on entry failures as for [`sync_creation`](Self::sync_creation).
    #[instrument(skip_all, fields(source = %source.display(), replica = %replica.display()))]
    pub async fn sync_removal(
        &self,
        source: &Path,
        replica: &Path,
    ) -> Result<ReconcileReport, SyncError> {
        let mut report = ReconcileReport::default();
        let mut pending = vec![(source.to_path_buf(), replica.to_path_buf())];

        while let Some((src_dir, rep_dir)) = pending.pop() {
            if !dir_exists(&src_dir).await {
                if src_dir == source || !dir_exists(source).await {
                    return Err(SyncError::PathNotFound(source.to_path_buf()));
                }
                // Vanished concurrently; the next cycle removes its replica.
                debug!(path = %src_dir.display(), "Source directory vanished during removal pass");
                continue;
            }

            let entries = match list_dir(&rep_dir).await {
                Ok(entries) => entries,
                Err(e) if rep_dir != replica => {
                    self.entry_failed(&mut report, source, replica, e).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            for entry in entries {
                let counterpart = src_dir.join(&entry.name);
                let result = match entry.kind {
                    EntryKind::File => {
                        remove_file_if_orphan(&entry.path, &counterpart, &mut report).await
                    }
                    EntryKind::Dir => {
                        let counterpart_kind = source_kind_of(&counterpart).await;
                        match counterpart_kind {
                            Ok(Some(EntryKind::Dir)) => {
                                pending.push((counterpart, entry.path));
                                Ok(())
                            }
                            Ok(_) => remove_dir(&entry.path, &mut report).await,
                            Err(e) => Err(e),
                        }
                    }
                    EntryKind::Other => {
                        warn!(path = %entry.path.display(), "Leaving special file in replica");
                        Ok(())
                    }
                };

                if let Err(e) = result {
                    self.entry_failed(&mut report, source, replica, e).await?;
                }
            }
        }

        debug!(
            files_deleted = report.files_deleted,
            dirs_deleted = report.dirs_deleted,
            skipped = report.errors.len(),
            "Removal pass finished"
        );
        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Creation helpers
    // ------------------------------------------------------------------------

    async fn create_file(
        &self,
        src: &Path,
        dst: &Path,
        report: &mut ReconcileReport,
    ) -> Result<(), SyncError> {
        match kind_of(dst).await? {
            Some(EntryKind::File) => {
                if self.comparator.files_equal(src, dst).await? {
                    return Ok(());
                }
            }
            Some(EntryKind::Dir) => remove_dir(dst, report).await?,
            Some(EntryKind::Other) => remove_file(dst, report).await?,
            None => {}
        }

        copy_file(src, dst).await?;
        report.files_copied += 1;
        info!(source = %src.display(), replica = %dst.display(), "Copied file");
        Ok(())
    }

    async fn ensure_dir(&self, dst: &Path, report: &mut ReconcileReport) -> Result<(), SyncError> {
        match kind_of(dst).await? {
            Some(EntryKind::Dir) => return Ok(()),
            Some(_) => remove_file(dst, report).await?,
            None => {}
        }

        tokio::fs::create_dir(dst)
            .await
            .map_err(|e| SyncError::io(dst, e))?;
        report.dirs_created += 1;
        info!(path = %dst.display(), "Created directory");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Failure policy
    // ------------------------------------------------------------------------

    /// Applies the entry failure policy to `err`
    ///
    /// Returns `Err` when the pass has to abort.
    async fn entry_failed(
        &self,
        report: &mut ReconcileReport,
        source: &Path,
        replica: &Path,
        err: SyncError,
    ) -> Result<(), SyncError> {
        if self.policy == EntryErrorPolicy::Abort {
            return Err(err);
        }
        if !dir_exists(source).await || !dir_exists(replica).await {
            return Err(err);
        }

        warn!(error = %err, "Skipping entry after error");
        report.errors.push(err.to_string());
        Ok(())
    }
}

// ============================================================================
// Filesystem mutations
// ============================================================================

/// Copies `src` over `dst` via a temporary sibling and applies the source mtime
async fn copy_file(src: &Path, dst: &Path) -> Result<(), SyncError> {
    let tmp_path = {
        let mut p = dst.as_os_str().to_owned();
        p.push(TEMP_SUFFIX);
        PathBuf::from(p)
    };

    let mtime = tokio::fs::metadata(src)
        .await
        .and_then(|m| m.modified())
        .map_err(|e| SyncError::io(src, e))?;

    if let Err(e) = tokio::fs::copy(src, &tmp_path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(SyncError::io(&tmp_path, e));
    }

    if let Err(e) = apply_mtime(&tmp_path, mtime).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    tokio::fs::rename(&tmp_path, dst)
        .await
        .map_err(|e| SyncError::io(dst, e))
}

async fn apply_mtime(path: &Path, mtime: SystemTime) -> Result<(), SyncError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&owned)?;
        file.set_modified(mtime)
    })
    .await
    .map_err(|e| SyncError::TaskFailed(e.to_string()))?
    .map_err(|e| SyncError::io(path, e))
}

async fn remove_file_if_orphan(
    path: &Path,
    counterpart: &Path,
    report: &mut ReconcileReport,
) -> Result<(), SyncError> {
    match source_kind_of(counterpart).await? {
        Some(EntryKind::File) => Ok(()),
        _ => remove_file(path, report).await,
    }
}

async fn remove_file(path: &Path, report: &mut ReconcileReport) -> Result<(), SyncError> {
    tokio::fs::remove_file(path)
        .await
        .map_err(|e| SyncError::io(path, e))?;
    report.files_deleted += 1;
    info!(path = %path.display(), "Deleted file");
    Ok(())
}

async fn remove_dir(path: &Path, report: &mut ReconcileReport) -> Result<(), SyncError> {
    tokio::fs::remove_dir_all(path)
        .await
        .map_err(|e| SyncError::io(path, e))?;
    report.dirs_deleted += 1;
    info!(path = %path.display(), "Deleted directory");
    Ok(())
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    /// Relative path -> file content (`None` for directories)
    fn snapshot(root: &Path) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
        let mut out = BTreeMap::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir).unwrap() {
                let entry = entry.unwrap();
                let path = entry.path();
                let rel = path.strip_prefix(root).unwrap().to_path_buf();
                let ft = entry.file_type().unwrap();
                if ft.is_dir() {
                    out.insert(rel, None);
                    stack.push(path);
                } else if ft.is_file() {
                    out.insert(rel, Some(fs::read(&path).unwrap()));
                }
            }
        }
        out
    }

    struct Trees {
        _dir: TempDir,
        source: PathBuf,
        replica: PathBuf,
    }

    fn trees() -> Trees {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source");
        let replica = dir.path().join("replica");
        fs::create_dir(&source).unwrap();
        fs::create_dir(&replica).unwrap();
        Trees {
            _dir: dir,
            source,
            replica,
        }
    }

    async fn full_cycle(r: &TreeReconciler, t: &Trees) -> ReconcileReport {
        let mut report = r.sync_creation(&t.source, &t.replica).await.unwrap();
        report.merge(r.sync_removal(&t.source, &t.replica).await.unwrap());
        report
    }

    #[tokio::test]
    async fn test_hello_scenario() {
        let t = trees();
        let r = TreeReconciler::new(EntryErrorPolicy::Skip);
        fs::write(t.source.join("a.txt"), "hello").unwrap();

        let report = full_cycle(&r, &t).await;
        assert_eq!(report.files_copied, 1);
        assert_eq!(fs::read_to_string(t.replica.join("a.txt")).unwrap(), "hello");

        fs::remove_file(t.source.join("a.txt")).unwrap();
        let report = full_cycle(&r, &t).await;
        assert_eq!(report.files_deleted, 1);
        assert!(!t.replica.join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_nested_tree_is_mirrored() {
        let t = trees();
        fs::create_dir_all(t.source.join("docs/2024/q1")).unwrap();
        fs::create_dir_all(t.source.join("empty")).unwrap();
        fs::write(t.source.join("root.txt"), "r").unwrap();
        fs::write(t.source.join("docs/readme.md"), "# docs").unwrap();
        fs::write(t.source.join("docs/2024/q1/report.csv"), "a,b\n1,2\n").unwrap();

        let r = TreeReconciler::new(EntryErrorPolicy::Skip);
        let report = full_cycle(&r, &t).await;

        assert_eq!(snapshot(&t.source), snapshot(&t.replica));
        assert_eq!(report.files_copied, 3);
        assert_eq!(report.dirs_created, 4);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_second_cycle_is_noop() {
        let t = trees();
        fs::create_dir_all(t.source.join("a/b")).unwrap();
        fs::write(t.source.join("a/b/c.txt"), "deep").unwrap();
        fs::write(t.source.join("top.txt"), "top").unwrap();

        let r = TreeReconciler::new(EntryErrorPolicy::Skip);
        full_cycle(&r, &t).await;

        let report = full_cycle(&r, &t).await;
        assert!(report.is_noop(), "unexpected changes: {report:?}");
    }

    #[tokio::test]
    async fn test_copy_preserves_mtime_and_leaves_no_temp_file() {
        let t = trees();
        let src = t.source.join("a.txt");
        fs::write(&src, "content").unwrap();

        let r = TreeReconciler::new(EntryErrorPolicy::Skip);
        full_cycle(&r, &t).await;

        let src_mtime = fs::metadata(&src).unwrap().modified().unwrap();
        let dst_mtime = fs::metadata(t.replica.join("a.txt")).unwrap().modified().unwrap();
        assert_eq!(src_mtime, dst_mtime);

        let names: Vec<_> = fs::read_dir(&t.replica)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![OsString::from("a.txt")]);
    }

    #[tokio::test]
    async fn test_modified_file_is_recopied() {
        let t = trees();
        let src = t.source.join("a.txt");
        fs::write(&src, "v1").unwrap();

        let r = TreeReconciler::new(EntryErrorPolicy::Skip);
        full_cycle(&r, &t).await;

        // Same size, so the comparator needs the mtime or the digest to notice
        fs::write(&src, "v2").unwrap();
        let file = fs::OpenOptions::new().write(true).open(&src).unwrap();
        file.set_modified(SystemTime::now() + std::time::Duration::from_secs(5))
            .unwrap();

        let report = full_cycle(&r, &t).await;
        assert_eq!(report.files_copied, 1);
        assert_eq!(fs::read_to_string(t.replica.join("a.txt")).unwrap(), "v2");
    }

    #[tokio::test]
    async fn test_replica_edit_is_overwritten() {
        let t = trees();
        fs::write(t.source.join("a.txt"), "original").unwrap();

        let r = TreeReconciler::new(EntryErrorPolicy::Skip);
        full_cycle(&r, &t).await;

        fs::write(t.replica.join("a.txt"), "tampered").unwrap();
        let report = full_cycle(&r, &t).await;
        assert_eq!(report.files_copied, 1);
        assert_eq!(
            fs::read_to_string(t.replica.join("a.txt")).unwrap(),
            "original"
        );
    }

    #[tokio::test]
    async fn test_removed_directory_is_deleted_recursively() {
        let t = trees();
        fs::create_dir_all(t.source.join("gone/inner")).unwrap();
        fs::write(t.source.join("gone/inner/f.txt"), "x").unwrap();
        fs::write(t.source.join("keep.txt"), "k").unwrap();

        let r = TreeReconciler::new(EntryErrorPolicy::Skip);
        full_cycle(&r, &t).await;
        assert!(t.replica.join("gone/inner/f.txt").exists());

        fs::remove_dir_all(t.source.join("gone")).unwrap();
        let report = r.sync_removal(&t.source, &t.replica).await.unwrap();

        assert_eq!(report.dirs_deleted, 1);
        assert_eq!(report.files_deleted, 0);
        assert!(!t.replica.join("gone").exists());
        assert!(t.replica.join("keep.txt").exists());
    }

    #[tokio::test]
    async fn test_creation_never_deletes_and_removal_never_creates() {
        let t = trees();
        fs::write(t.source.join("new.txt"), "n").unwrap();
        fs::write(t.replica.join("extra.txt"), "e").unwrap();

        let r = TreeReconciler::new(EntryErrorPolicy::Skip);
        let created = r.sync_creation(&t.source, &t.replica).await.unwrap();
        assert_eq!(created.files_deleted + created.dirs_deleted, 0);
        assert!(t.replica.join("extra.txt").exists());

        fs::write(t.source.join("later.txt"), "l").unwrap();
        let removed = r.sync_removal(&t.source, &t.replica).await.unwrap();
        assert_eq!(removed.files_copied + removed.dirs_created, 0);
        assert!(!t.replica.join("extra.txt").exists());
        assert!(!t.replica.join("later.txt").exists());
    }

    #[tokio::test]
    async fn test_kind_mismatch_is_replaced() {
        let t = trees();
        // Source has a file where the replica has a directory, and vice versa
        fs::write(t.source.join("was_dir"), "now a file").unwrap();
        fs::create_dir(t.source.join("was_file")).unwrap();
        fs::create_dir_all(t.replica.join("was_dir/sub")).unwrap();
        fs::write(t.replica.join("was_file"), "old file").unwrap();

        let r = TreeReconciler::new(EntryErrorPolicy::Skip);
        let report = full_cycle(&r, &t).await;

        assert!(t.replica.join("was_dir").is_file());
        assert!(t.replica.join("was_file").is_dir());
        assert_eq!(snapshot(&t.source), snapshot(&t.replica));
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_deep_tree_does_not_overflow() {
        let t = trees();
        let mut deep = t.source.clone();
        for _ in 0..200 {
            deep.push("d");
        }
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("leaf.txt"), "bottom").unwrap();

        let r = TreeReconciler::new(EntryErrorPolicy::Skip);
        let report = full_cycle(&r, &t).await;

        assert_eq!(report.dirs_created, 200);
        let replica_leaf = t
            .replica
            .join(deep.strip_prefix(&t.source).unwrap())
            .join("leaf.txt");
        assert_eq!(fs::read_to_string(replica_leaf).unwrap(), "bottom");
    }

    #[tokio::test]
    async fn test_creation_fails_when_source_root_missing() {
        let t = trees();
        fs::remove_dir(&t.source).unwrap();

        let r = TreeReconciler::new(EntryErrorPolicy::Skip);
        let err = r.sync_creation(&t.source, &t.replica).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_removal_refuses_to_empty_replica_without_source() {
        let t = trees();
        fs::write(t.replica.join("precious.txt"), "keep me").unwrap();
        fs::remove_dir(&t.source).unwrap();

        let r = TreeReconciler::new(EntryErrorPolicy::Skip);
        let err = r.sync_removal(&t.source, &t.replica).await.unwrap_err();
        assert!(matches!(err, SyncError::PathNotFound(ref p) if p == &t.source));
        assert!(t.replica.join("precious.txt").exists());
    }

    #[tokio::test]
    async fn test_creation_fails_when_replica_root_missing() {
        let t = trees();
        fs::write(t.source.join("a.txt"), "a").unwrap();
        fs::remove_dir(&t.replica).unwrap();

        // Even under the skip policy a missing root aborts the pass
        let r = TreeReconciler::new(EntryErrorPolicy::Skip);
        assert!(r.sync_creation(&t.source, &t.replica).await.is_err());
    }

    #[tokio::test]
    async fn test_entry_failed_skip_records_error() {
        let t = trees();
        let r = TreeReconciler::new(EntryErrorPolicy::Skip);
        let mut report = ReconcileReport::default();

        let err = SyncError::io(
            t.source.join("x"),
            std::io::Error::new(std::io::ErrorKind::Other, "transient lock"),
        );
        r.entry_failed(&mut report, &t.source, &t.replica, err)
            .await
            .unwrap();

        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("transient lock"));
        assert!(!report.is_noop());
    }

    #[tokio::test]
    async fn test_entry_failed_abort_propagates() {
        let t = trees();
        let r = TreeReconciler::new(EntryErrorPolicy::Abort);
        let mut report = ReconcileReport::default();

        let err = SyncError::io(
            t.source.join("x"),
            std::io::Error::new(std::io::ErrorKind::Other, "transient lock"),
        );
        assert!(r
            .entry_failed(&mut report, &t.source, &t.replica, err)
            .await
            .is_err());
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_skip_policy_continues_past_failing_entry() {
        let t = trees();
        fs::write(t.source.join("a.txt"), "a").unwrap();
        fs::write(t.source.join("b.txt"), "b").unwrap();
        // A directory squatting on the temp name makes the copy of a.txt fail
        let squatter = t.replica.join(format!("a.txt{TEMP_SUFFIX}"));
        fs::create_dir(&squatter).unwrap();

        let r = TreeReconciler::new(EntryErrorPolicy::Skip);
        let report = r.sync_creation(&t.source, &t.replica).await.unwrap();

        assert_eq!(report.files_copied, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains(TEMP_SUFFIX), "{:?}", report.errors);
        assert!(!t.replica.join("a.txt").exists());
        assert_eq!(fs::read_to_string(t.replica.join("b.txt")).unwrap(), "b");

        // The leftover has no source counterpart, so the next cycle clears it
        let removed = r.sync_removal(&t.source, &t.replica).await.unwrap();
        assert_eq!(removed.dirs_deleted, 1);
        let report = r.sync_creation(&t.source, &t.replica).await.unwrap();
        assert_eq!(report.files_copied, 1);
        assert!(report.errors.is_empty());
        assert_eq!(snapshot(&t.source), snapshot(&t.replica));
    }

    #[tokio::test]
    async fn test_abort_policy_stops_at_failing_entry() {
        let t = trees();
        fs::write(t.source.join("a.txt"), "a").unwrap();
        fs::write(t.source.join("b.txt"), "b").unwrap();
        fs::create_dir(t.replica.join(format!("a.txt{TEMP_SUFFIX}"))).unwrap();

        let r = TreeReconciler::new(EntryErrorPolicy::Abort);
        let err = r.sync_creation(&t.source, &t.replica).await.unwrap_err();

        assert!(matches!(
            err,
            SyncError::Io { ref path, .. } if path.ends_with("a.txt.dirsync-tmp")
        ));
        assert!(!t.replica.join("b.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_symlink_is_copied_by_content() {
        let t = trees();
        let outside = t._dir.path().join("outside.txt");
        fs::write(&outside, "linked content").unwrap();
        std::os::unix::fs::symlink(&outside, t.source.join("link.txt")).unwrap();

        let r = TreeReconciler::new(EntryErrorPolicy::Skip);
        let report = full_cycle(&r, &t).await;

        assert_eq!(report.files_copied, 1);
        let copy = t.replica.join("link.txt");
        assert!(fs::symlink_metadata(&copy).unwrap().is_file());
        assert_eq!(fs::read_to_string(&copy).unwrap(), "linked content");

        // The removal pass keeps the copy and later cycles leave it alone
        let report = full_cycle(&r, &t).await;
        assert!(report.is_noop(), "unexpected changes: {report:?}");
        assert!(copy.is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_directory_and_dangling_symlinks_are_not_mirrored() {
        let t = trees();
        fs::create_dir(t.source.join("real")).unwrap();
        fs::write(t.source.join("real/f.txt"), "f").unwrap();
        std::os::unix::fs::symlink(t.source.join("real"), t.source.join("dir_link")).unwrap();
        std::os::unix::fs::symlink(t.source.join("nowhere"), t.source.join("dangling")).unwrap();

        let r = TreeReconciler::new(EntryErrorPolicy::Skip);
        let report = full_cycle(&r, &t).await;

        assert_eq!(report.files_copied, 1);
        assert!(report.errors.is_empty());
        assert!(t.replica.join("real/f.txt").is_file());
        assert!(fs::symlink_metadata(t.replica.join("dir_link")).is_err());
        assert!(fs::symlink_metadata(t.replica.join("dangling")).is_err());
    }

    #[test]
    fn test_report_merge_and_changes() {
        let mut a = ReconcileReport {
            files_copied: 2,
            dirs_created: 1,
            ..Default::default()
        };
        let b = ReconcileReport {
            files_deleted: 3,
            dirs_deleted: 1,
            errors: vec!["boom".to_string()],
            ..Default::default()
        };
        a.merge(b);
        assert_eq!(a.changes(), 7);
        assert_eq!(a.errors, vec!["boom".to_string()]);
        assert!(ReconcileReport::default().is_noop());
    }
}
