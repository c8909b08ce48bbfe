//! Sync scheduler - runs reconciliation cycles on a fixed interval
//!
//! The [`SyncScheduler`] owns the [`SyncState`] machine and drives the
//! [`RecoveryHandler`] in a loop until it is stopped, halted by a structural
//! failure, or an unclassified error escapes a cycle.
//!
//! ## Flow
//!
//! ```text
//! start() ──→ Running ──→ run_cycle ──→ sleep (1s slices) ──┐
//!                ▲                                          │
//!                └──────────── still Running? ◀─────────────┘
//! ```
//!
//! The idle period is slept in one-second slices with the state re-checked
//! after each slice, so [`stop()`](SyncScheduler::stop) is honored within about
//! a second even with long intervals.

use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dirsync_core::domain::{DomainError, SyncEndpoint, SyncState};
use tracing::{error, info};

use crate::reconciler::TreeReconciler;
use crate::recovery::{CycleOutcome, HaltReason, RecoveryHandler};
use crate::SyncError;

/// Granularity of the idle sleep between cycles
const SLEEP_SLICE: Duration = Duration::from_secs(1);

/// Why [`SyncScheduler::start`] returned without an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// [`SyncScheduler::stop`] was called
    Cancelled,
    /// A cycle hit a structural failure
    Halted(HaltReason),
}

impl Display for StopReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Cancelled => f.write_str("cancelled"),
            StopReason::Halted(reason) => write!(f, "halted: {reason}"),
        }
    }
}

// ============================================================================
// SyncScheduler
// ============================================================================

/// Periodic one-way synchronization of a single endpoint
///
/// A scheduler is single-use: once `Stopped` it cannot be started again.
/// Share it as `Arc<SyncScheduler>` to call [`stop()`](Self::stop) from
/// another task while [`start()`](Self::start) is running.
#[derive(Debug)]
pub struct SyncScheduler {
    handler: RecoveryHandler,
    state: Mutex<SyncState>,
    cycles_completed: AtomicU64,
}

impl SyncScheduler {
    /// Creates an idle scheduler for `endpoint`
    pub fn new(endpoint: SyncEndpoint, reconciler: TreeReconciler) -> Self {
        Self {
            handler: RecoveryHandler::new(endpoint, reconciler),
            state: Mutex::new(SyncState::Idle),
            cycles_completed: AtomicU64::new(0),
        }
    }

    pub fn endpoint(&self) -> &SyncEndpoint {
        self.handler.endpoint()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SyncState {
        *self.lock_state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SyncState::Running
    }

    /// Number of cycles that finished with `Synced` or `Recovered`
    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    /// Runs cycles every `interval_secs` seconds until stopped or halted
    ///
    /// # Errors
    /// - `DomainError::InvalidInterval` if `interval_secs` is zero
    /// - `DomainError::InvalidState` if the scheduler is not `Idle`
    /// - any unclassified error from a cycle; the scheduler is `Stopped`
    ///   afterwards
    pub async fn start(&self, interval_secs: u64) -> Result<StopReason, SyncError> {
        if interval_secs == 0 {
            return Err(DomainError::InvalidInterval(interval_secs).into());
        }

        self.lock_state().transition_to(SyncState::Running)?;
        info!(
            source = %self.endpoint().source().display(),
            replica = %self.endpoint().replica().display(),
            interval_secs,
            "Synchronization started"
        );

        let result = self.run_loop(interval_secs).await;
        self.force_stopped();

        match &result {
            Ok(reason) => info!(%reason, "Synchronization stopped"),
            Err(e) => error!(error = %e, "Synchronization stopped after error"),
        }
        result
    }

    /// Requests the loop to end
    ///
    /// Idempotent and safe to call from any thread. Has no effect unless the
    /// scheduler is `Running`.
    pub fn stop(&self) {
        let mut state = self.lock_state();
        if *state == SyncState::Running {
            info!("Synchronization cancelled");
            *state = SyncState::Stopped;
        }
    }

    async fn run_loop(&self, interval_secs: u64) -> Result<StopReason, SyncError> {
        while self.is_running() {
            match self.handler.run_cycle().await? {
                CycleOutcome::Halted(reason) => return Ok(StopReason::Halted(reason)),
                CycleOutcome::Synced(report) | CycleOutcome::Recovered(report) => {
                    let cycle = self.cycles_completed.fetch_add(1, Ordering::Relaxed) + 1;
                    info!(
                        cycle,
                        copied = report.files_copied,
                        dirs_created = report.dirs_created,
                        deleted = report.files_deleted,
                        dirs_deleted = report.dirs_deleted,
                        skipped = report.errors.len(),
                        hashed = self.handler.reconciler().comparator().files_hashed(),
                        "Synchronization cycle completed"
                    );
                }
            }

            for _ in 0..interval_secs {
                if !self.is_running() {
                    break;
                }
                tokio::time::sleep(SLEEP_SLICE).await;
            }
        }

        Ok(StopReason::Cancelled)
    }

    fn force_stopped(&self) {
        *self.lock_state() = SyncState::Stopped;
    }

    fn lock_state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Unit tests
// ============================================================================
