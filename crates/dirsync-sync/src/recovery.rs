//! Structural failure recovery around one reconciliation cycle
//!
//! A cycle is `sync_creation` followed by `sync_removal`. When either pass
//! fails, [`RecoveryHandler`] looks at the filesystem to decide what kind of
//! failure it was:
//!
//! | Class          | Condition                     | Handling                          |
//! |----------------|-------------------------------|-----------------------------------|
//! | SourceMissing  | source root gone              | halt, no retry                    |
//! | ReplicaMissing | source present, replica gone  | recreate replica, retry once      |
//! | Unclassified   | both roots present            | return the original error         |

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

use dirsync_core::domain::SyncEndpoint;
use tracing::{error, info, warn};

use crate::reconciler::{dir_exists, ReconcileReport, TreeReconciler};
use crate::SyncError;

/// Classification of a failed cycle by the state of the two roots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The source root does not exist
    SourceMissing,
    /// The source root exists but the replica root does not
    ReplicaMissing,
    /// Both roots exist, so the failure is not structural
    Unclassified,
}

/// Why the scheduler must not run further cycles
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// The source root no longer exists
    SourceMissing(PathBuf),
    /// The replica root vanished and could not be rebuilt
    ReplicaUnrecoverable { path: PathBuf, error: String },
}

impl Display for HaltReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::SourceMissing(path) => {
                write!(f, "Source directory is missing: {}", path.display())
            }
            HaltReason::ReplicaUnrecoverable { path, error } => {
                write!(
                    f,
                    "Replica directory could not be recovered: {}: {error}",
                    path.display()
                )
            }
        }
    }
}

/// Result of one cycle that did not end in an unclassified error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Both passes completed on the first attempt
    Synced(ReconcileReport),
    /// The replica root was recreated and the retry completed
    Recovered(ReconcileReport),
    /// A structural failure that stops the scheduler
    Halted(HaltReason),
}

impl CycleOutcome {
    /// True if the scheduler must stop after this cycle
    pub fn is_halted(&self) -> bool {
        matches!(self, CycleOutcome::Halted(_))
    }

    /// The cycle report, if the cycle completed
    pub fn report(&self) -> Option<&ReconcileReport> {
        match self {
            CycleOutcome::Synced(report) | CycleOutcome::Recovered(report) => Some(report),
            CycleOutcome::Halted(_) => None,
        }
    }
}

/// Runs reconciliation cycles for one endpoint and handles structural failures
#[derive(Debug)]
pub struct RecoveryHandler {
    endpoint: SyncEndpoint,
    reconciler: TreeReconciler,
}

impl RecoveryHandler {
    /// Creates a handler that runs `reconciler` over `endpoint`
    pub fn new(endpoint: SyncEndpoint, reconciler: TreeReconciler) -> Self {
        Self {
            endpoint,
            reconciler,
        }
    }

    pub fn endpoint(&self) -> &SyncEndpoint {
        &self.endpoint
    }

    pub fn reconciler(&self) -> &TreeReconciler {
        &self.reconciler
    }

    /// Runs one cycle, recovering from a missing replica root
    ///
    /// # Errors
    /// Returns the pass error unchanged when both roots still exist.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, SyncError> {
        match self.reconcile().await {
            Ok(report) => Ok(CycleOutcome::Synced(report)),
            Err(err) => self.recover(err).await,
        }
    }

    /// Classifies the current filesystem state of the two roots
    pub async fn classify(&self) -> FailureClass {
        if !dir_exists(self.endpoint.source()).await {
            FailureClass::SourceMissing
        } else if !dir_exists(self.endpoint.replica()).await {
            FailureClass::ReplicaMissing
        } else {
            FailureClass::Unclassified
        }
    }

    async fn reconcile(&self) -> Result<ReconcileReport, SyncError> {
        let source = self.endpoint.source();
        let replica = self.endpoint.replica();

        let mut report = self.reconciler.sync_creation(source, replica).await?;
        report.merge(self.reconciler.sync_removal(source, replica).await?);
        Ok(report)
    }

    async fn recover(&self, err: SyncError) -> Result<CycleOutcome, SyncError> {
        let source = self.endpoint.source();
        let replica = self.endpoint.replica();

        match self.classify().await {
            FailureClass::SourceMissing => {
                error!(
                    source = %source.display(),
                    error = %err,
                    "Source directory is missing, stopping synchronization"
                );
                Ok(CycleOutcome::Halted(HaltReason::SourceMissing(
                    source.to_path_buf(),
                )))
            }
            FailureClass::ReplicaMissing => {
                warn!(
                    replica = %replica.display(),
                    error = %err,
                    "Replica directory is missing, recreating it"
                );

                if let Err(e) = tokio::fs::create_dir_all(replica).await {
                    return Ok(self.unrecoverable(SyncError::io(replica, e)));
                }

                match self.reconcile().await {
                    Ok(report) => {
                        info!(replica = %replica.display(), "Replica directory recovered");
                        Ok(CycleOutcome::Recovered(report))
                    }
                    Err(e) => Ok(self.unrecoverable(e)),
                }
            }
            FailureClass::Unclassified => Err(err),
        }
    }

    fn unrecoverable(&self, err: SyncError) -> CycleOutcome {
        let replica = self.endpoint.replica();
        error!(
            replica = %replica.display(),
            error = %err,
            "Replica directory could not be recovered, stopping synchronization"
        );
        CycleOutcome::Halted(HaltReason::ReplicaUnrecoverable {
            path: replica.to_path_buf(),
            error: err.to_string(),
        })
    }
}
