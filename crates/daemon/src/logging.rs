//! Log file setup
//!
//! All components log through `tracing`; this installs the subscriber that
//! appends them to the persistent log file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or invalid
const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log file path: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("Failed to create log directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to install log subscriber: {0}")]
    Init(String),
}

/// Directory and file name of the log sink. A bare file name lives in the
/// working directory.
pub fn split_log_path(log_file: &Path) -> Option<(PathBuf, OsString)> {
    let name = log_file.file_name()?.to_os_string();
    let dir = match log_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Some((dir, name))
}

/// Install the global subscriber writing to `log_file`.
///
/// The file is appended to and never rotated. Keep the returned guard alive
/// for the lifetime of the process; dropping it flushes and stops the writer.
pub fn init_logging(log_file: &Path) -> Result<WorkerGuard, LoggingError> {
    let (dir, name) =
        split_log_path(log_file).ok_or_else(|| LoggingError::InvalidPath(log_file.to_path_buf()))?;

    std::fs::create_dir_all(&dir).map_err(|source| LoggingError::CreateDir {
        path: dir.clone(),
        source,
    })?;

    let file_appender = tracing_appender::rolling::never(&dir, name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    tracing::info!("Logging to {}", log_file.display());
    Ok(guard)
}
