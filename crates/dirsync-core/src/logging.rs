//! Tracing setup: console plus an append-only log file
//!
//! Every line carries a `[YYYY-MM-DD HH:MM:SS]` local timestamp. The file sink
//! is shared by all threads through a mutex and reopens the log file if it was
//! deleted while the daemon is running.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::Local;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Timestamp format used on every log line
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Local wall-clock timer for `tracing_subscriber::fmt`
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTimestamp;

impl FormatTime for LocalTimestamp {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "[{}]", Local::now().format(TIMESTAMP_FORMAT))
    }
}

/// Thread-safe append-only log file sink
///
/// Cloning shares the underlying handle. Before each event the sink checks
/// whether the file still exists and recreates it if it was removed.
#[derive(Debug, Clone)]
pub struct LogFileWriter {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl LogFileWriter {
    /// Opens (or creates) `path` for appending
    ///
    /// # Errors
    /// Returns the I/O error if the file cannot be opened
    pub fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reopen_if_missing(&self) -> io::Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        let reopened = open_append(&self.path)?;
        let mut guard = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        *guard = reopened;
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Per-event writer handed out by [`LogFileWriter`]
#[derive(Debug)]
pub struct LogFileHandle {
    file: Arc<Mutex<File>>,
}

impl Write for LogFileHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        file.write_all(buf)?;
        file.flush()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        file.flush()
    }
}

impl<'a> MakeWriter<'a> for LogFileWriter {
    type Writer = LogFileHandle;

    fn make_writer(&'a self) -> Self::Writer {
        if let Err(e) = self.reopen_if_missing() {
            eprintln!(
                "Error recreating log file {}: {e}",
                self.path.display()
            );
        }
        LogFileHandle {
            file: Arc::clone(&self.file),
        }
    }
}

/// Installs the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `config.level`. The console layer is
/// only installed when `config.console` is set.
///
/// # Errors
/// Fails if the log file cannot be opened or a global subscriber is
/// already installed.
pub fn init_logging(config: &LoggingConfig, log_file: &Path) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_writer = LogFileWriter::new(log_file)
        .with_context(|| format!("Error opening log file: {}", log_file.display()))?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_timer(LocalTimestamp)
        .with_target(false)
        .with_ansi(false)
        .with_writer(file_writer);

    let console_layer = config.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_timer(LocalTimestamp)
            .with_target(false)
            .with_writer(io::stdout)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}
