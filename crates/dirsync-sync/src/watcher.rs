//! Source tree change watching
//!
//! Provides a [`FileWatcher`] that wraps the `notify` crate to monitor the
//! source root, converting raw OS events into [`ChangeEvent`] values, and a
//! [`ChangeLogger`] that writes one human-readable line per event.
//!
//! The watcher is cosmetic: reconciliation never consumes its events, and a
//! watcher failure never affects a cycle.
//!
//! ## Architecture
//!
//! ```text
//! inotify / kqueue
//!       │
//!       ▼
//!  FileWatcher  ──→  mpsc::channel  ──→  ChangeLogger  ──→  tracing
//! ```

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::SyncError;

/// Capacity of the event channel between the notify thread and the logger
const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ============================================================================
// ChangeEvent
// ============================================================================

/// A filesystem change observed under the watched root
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A new file or directory was created at the given path
    Created(PathBuf),
    /// An existing entry was modified (content or metadata changed)
    Modified(PathBuf),
    /// A file or directory was deleted from the given path
    Deleted(PathBuf),
    /// A file or directory was renamed/moved
    Renamed {
        /// The original path before the rename
        old: PathBuf,
        /// The new path after the rename
        new: PathBuf,
    },
}

impl ChangeEvent {
    /// Returns the primary path associated with this event
    ///
    /// For rename events, this returns the new (destination) path.
    pub fn path(&self) -> &Path {
        match self {
            ChangeEvent::Created(p) => p,
            ChangeEvent::Modified(p) => p,
            ChangeEvent::Deleted(p) => p,
            ChangeEvent::Renamed { new, .. } => new,
        }
    }
}

// ============================================================================
// FileWatcher
// ============================================================================

/// Watches a directory tree using the OS-native mechanism
///
/// Dropping the watcher stops all watches and closes the event channel.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Creates a watcher and the receiver its events are delivered on
    ///
    /// # Errors
    /// Returns an error if the underlying OS watcher cannot be created
    pub fn new() -> Result<(Self, mpsc::Receiver<ChangeEvent>), SyncError> {
        let (tx, rx) = mpsc::channel::<ChangeEvent>(EVENT_CHANNEL_CAPACITY);

        let watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if let Some(change) = map_notify_event(&event) {
                        if let Err(e) = tx.blocking_send(change) {
                            debug!(error = %e, "Dropping change event (receiver closed)");
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "File watcher error");
                }
            },
            notify::Config::default(),
        )?;

        Ok((Self { watcher }, rx))
    }

    /// Starts watching `path` and everything below it
    ///
    /// # Errors
    /// Returns an error if the path cannot be watched (missing, not
    /// permitted, or the inotify watch limit was reached)
    pub fn watch(&mut self, path: &Path) -> Result<(), SyncError> {
        self.watcher.watch(path, RecursiveMode::Recursive)?;
        info!(path = %path.display(), "Watching source directory for changes");
        Ok(())
    }
}

/// Converts a `notify::Event` into a [`ChangeEvent`]
///
/// - `Create(*)` -> `Created`
/// - `Modify(Name(Both))` with 2 paths -> `Renamed`
/// - `Remove(*)` -> `Deleted`
/// - any other `Modify(*)` -> `Modified`
///
/// Access events and events without paths are dropped.
pub fn map_notify_event(event: &notify::Event) -> Option<ChangeEvent> {
    let paths = &event.paths;

    match &event.kind {
        EventKind::Create(_) => Some(ChangeEvent::Created(paths.first()?.clone())),

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [old, new, ..] = paths.as_slice() {
                Some(ChangeEvent::Renamed {
                    old: old.clone(),
                    new: new.clone(),
                })
            } else {
                Some(ChangeEvent::Modified(paths.first()?.clone()))
            }
        }

        EventKind::Modify(_) => Some(ChangeEvent::Modified(paths.first()?.clone())),

        EventKind::Remove(_) => Some(ChangeEvent::Deleted(paths.first()?.clone())),

        _ => None,
    }
}

// ============================================================================
// ChangeLogger
// ============================================================================

/// What the event path refers to at the time the event is logged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryLabel {
    File,
    Directory,
    /// The path no longer exists
    Unknown,
}

impl EntryLabel {
    /// Looks up the path without following symlinks
    pub async fn of(path: &Path) -> Self {
        match tokio::fs::symlink_metadata(path).await {
            Ok(meta) if meta.is_dir() => EntryLabel::Directory,
            Ok(_) => EntryLabel::File,
            Err(_) => EntryLabel::Unknown,
        }
    }
}

impl Display for EntryLabel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EntryLabel::File => f.write_str("File"),
            EntryLabel::Directory => f.write_str("Directory"),
            EntryLabel::Unknown => f.write_str("File/Directory"),
        }
    }
}

/// Formats the log line for `event`
pub fn describe(event: &ChangeEvent, label: EntryLabel) -> String {
    match event {
        ChangeEvent::Created(p) => format!("{label}: {} (Created)", p.display()),
        ChangeEvent::Modified(p) => format!("{label}: {} (Changed)", p.display()),
        ChangeEvent::Deleted(p) => format!("{label}: {} (Deleted)", p.display()),
        ChangeEvent::Renamed { old, new } => {
            format!("{label}: {} renamed to {}", old.display(), new.display())
        }
    }
}

/// Consumes watcher events and logs them
pub struct ChangeLogger {
    rx: mpsc::Receiver<ChangeEvent>,
}

impl ChangeLogger {
    pub fn new(rx: mpsc::Receiver<ChangeEvent>) -> Self {
        Self { rx }
    }

    /// Logs events until the channel closes or `shutdown` is cancelled
    ///
    /// Returns the number of events logged.
    pub async fn run(mut self, shutdown: CancellationToken) -> u64 {
        let mut logged = 0u64;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Change logger shutting down");
                    break;
                }
                event = self.rx.recv() => {
                    let Some(event) = event else {
                        warn!("Change event channel closed");
                        break;
                    };
                    let label = EntryLabel::of(event.path()).await;
                    info!("{}", describe(&event, label));
                    logged += 1;
                }
            }
        }

        logged
    }
}
