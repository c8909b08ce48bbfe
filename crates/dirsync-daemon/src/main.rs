//! dirsync Daemon - periodic one-way directory mirroring
//!
//! Validates the command line, installs logging, then runs a
//! [`SyncScheduler`] until SIGINT/SIGTERM, a structural failure, or an
//! unclassified error ends it. An optional change logger watches the source
//! tree and annotates the log between cycles.
//!
//! # Exit status
//!
//! `0` after a signal-initiated shutdown, non-zero for invalid arguments, a
//! halted scheduler, or an error escaping a cycle.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use dirsync_core::config::{Config, ConfigBuilder, EntryErrorPolicy};
use dirsync_core::logging::init_logging;
use dirsync_core::validation::{validate_paths, ValidatedPaths};
use dirsync_sync::reconciler::TreeReconciler;
use dirsync_sync::scheduler::{StopReason, SyncScheduler};
use dirsync_sync::watcher::{ChangeLogger, FileWatcher};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const USAGE: &str = "Usage: dirsyncd <SOURCE> <REPLICA> <LOG> [INTERVAL]";

const STOP_RETRY: Duration = Duration::from_millis(50);

// ============================================================================
// Command line
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "dirsyncd", version, about = "Periodic one-way directory mirroring")]
struct Cli {
    /// Directory to mirror from
    source: PathBuf,

    /// Directory kept identical to SOURCE
    replica: PathBuf,

    /// Log file (created if missing, appended otherwise)
    log: PathBuf,

    /// Seconds between cycles (defaults to sync.interval from the config file)
    interval: Option<u64>,

    /// Use alternate config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Do not log source tree changes between cycles
    #[arg(long)]
    no_watch: bool,

    /// What to do when a single entry cannot be synchronized
    #[arg(long, value_name = "skip|abort")]
    on_entry_error: Option<EntryErrorPolicy>,
}

impl Cli {
    fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }

    /// Layers the command-line overrides on top of `base`
    fn apply_overrides(&self, base: Config) -> Config {
        let mut builder = ConfigBuilder::from_config(base);

        if let Some(interval) = self.interval {
            builder = builder.sync_interval(interval);
        }
        if let Some(policy) = self.on_entry_error {
            builder = builder.sync_on_entry_error(policy);
        }
        if self.no_watch {
            builder = builder.sync_watch_changes(false);
        }
        builder = match self.verbose {
            0 => builder,
            1 => builder.logging_level("debug"),
            _ => builder.logging_level("trace"),
        };

        builder.build()
    }
}

// ============================================================================
// Shutdown handling
// ============================================================================

/// Waits for SIGINT or SIGTERM, then cancels `token`
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Daemon
// ============================================================================

/// Starts the change logger for `source`
///
/// Returns the watcher, which must stay alive for events to flow. Failures
/// are logged and leave synchronization unaffected.
fn start_change_logger(source: &Path, shutdown: CancellationToken) -> Option<FileWatcher> {
    let (mut watcher, rx) = match FileWatcher::new() {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "Change logging disabled: watcher unavailable");
            return None;
        }
    };

    if let Err(e) = watcher.watch(source) {
        warn!(error = %e, "Change logging disabled: cannot watch source");
        return None;
    }

    tokio::spawn(ChangeLogger::new(rx).run(shutdown));
    Some(watcher)
}

/// Runs the scheduler until it stops
///
/// Cancelling `shutdown` stops the scheduler; the token is cancelled on
/// return so helper tasks end too.
async fn run(
    config: &Config,
    paths: &ValidatedPaths,
    shutdown: CancellationToken,
) -> Result<StopReason> {
    let scheduler = Arc::new(SyncScheduler::new(
        paths.endpoint.clone(),
        TreeReconciler::new(config.sync.on_entry_error),
    ));

    let stopper = {
        let scheduler = Arc::clone(&scheduler);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            // The signal may arrive before the scheduler has left Idle
            while !scheduler.state().is_terminal() {
                scheduler.stop();
                tokio::time::sleep(STOP_RETRY).await;
            }
        })
    };

    let watcher = if config.sync.watch_changes {
        start_change_logger(paths.endpoint.source(), shutdown.clone())
    } else {
        None
    };

    let result = scheduler
        .start(config.sync.interval)
        .await
        .context("Synchronization failed");

    shutdown.cancel();
    stopper.abort();
    drop(watcher);

    result
}

fn usage_error(message: impl std::fmt::Display) -> ExitCode {
    eprintln!("{USAGE}");
    eprintln!("{message}");
    ExitCode::FAILURE
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = cli.apply_overrides(Config::load_or_default(&cli.config_path()));
    if let Some(first) = config.validate().first() {
        return usage_error(first);
    }

    let paths = match validate_paths(&cli.source, &cli.replica, &cli.log, config.sync.interval) {
        Ok(paths) => paths,
        Err(e) => return usage_error(e),
    };

    if let Err(e) = init_logging(&config.logging, &paths.log_file) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    info!(
        config_path = %cli.config_path().display(),
        log_file = %paths.log_file.display(),
        "dirsync daemon starting (dirsyncd)"
    );

    let shutdown_token = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown_token.clone()));

    match run(&config, &paths, shutdown_token).await {
        Ok(StopReason::Cancelled) => {
            info!("dirsync daemon shut down gracefully");
            ExitCode::SUCCESS
        }
        Ok(StopReason::Halted(reason)) => {
            error!(%reason, "dirsync daemon halted");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = format!("{e:#}"), "dirsync daemon exiting with error");
            ExitCode::FAILURE
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
