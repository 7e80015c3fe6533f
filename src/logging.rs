//! Logging setup for the daemon.
//!
//! Installs a global tracing subscriber that writes to stdout as text or JSON,
//! and optionally to a per-launch log file in a configured directory. Log files
//! are timestamped and kept to a bounded count.

use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::OnceLock,
    time::SystemTime,
};

use time::{
    OffsetDateTime, UtcOffset, format_description::BorrowedFormatItem,
    macros::format_description,
};
use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling,
};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

use crate::config::{LogFormat, LoggingConfig};

const LOG_FILE_PREFIX: &str = "rdb-archiver";
const FALLBACK_LEVEL: &str = "info";

/// Set once the subscriber is installed; holds the file writer guard if any.
static LOG_GUARD: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Errors that may occur while initializing logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// Failed to create or access the log directory.
    #[error("Failed to prepare log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to enumerate existing log files for pruning.
    #[error("Failed to read log directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to remove an obsolete log file.
    #[error("Failed to remove old log file {path}: {source}")]
    RemoveFile {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to format a timestamp for the log filename.
    #[error("Failed to format log filename time: {0}")]
    FormatTime(time::error::Format),
    /// Failed to set the global tracing subscriber.
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(tracing::subscriber::SetGlobalDefaultError),
    /// Failed to create the initial log file for this launch.
    #[error("Failed to create log file at {path}: {source}")]
    CreateLogFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Initialize tracing from `config`.
///
/// Subsequent calls are no-ops. Returns the log file path when a log
/// directory is configured.
pub fn init(config: &LoggingConfig) -> Result<Option<PathBuf>, LoggingError> {
    if LOG_GUARD.get().is_some() {
        return Ok(None);
    }

    let (env_filter, level_rejected) = build_env_filter(&config.level);
    let timer = build_timer();
    let (text_layer, json_layer) = match config.format {
        LogFormat::Text => (
            Some(
                fmt::layer()
                    .with_timer(timer.clone())
                    .with_writer(std::io::stdout),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                fmt::layer()
                    .json()
                    .with_timer(timer.clone())
                    .with_writer(std::io::stdout),
            ),
        ),
    };

    let (file_layer, guard, log_path) = match &config.dir {
        Some(dir) => {
            let file = open_log_file(dir, config.max_files)?;
            let layer = fmt::layer()
                .with_ansi(false)
                .with_timer(timer)
                .with_writer(file.writer);
            (Some(layer), Some(file.guard), Some(file.path))
        }
        None => (None, None, None),
    };

    let subscriber = Registry::default()
        .with(env_filter)
        .with(text_layer)
        .with(json_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber).map_err(LoggingError::SetGlobal)?;
    let _ = LOG_GUARD.set(guard);

    if level_rejected {
        tracing::warn!(level = %config.level, "Unknown log level; using {FALLBACK_LEVEL}");
    }
    match &log_path {
        Some(path) => tracing::info!("Logging initialized; log file at {}", path.display()),
        None => tracing::info!("Logging initialized"),
    }
    Ok(log_path)
}

struct LogFile {
    writer: NonBlocking,
    guard: WorkerGuard,
    path: PathBuf,
}

fn open_log_file(dir: &Path, max_files: usize) -> Result<LogFile, LoggingError> {
    fs::create_dir_all(dir).map_err(|source| LoggingError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let log_file_name = format_log_file_name(OffsetDateTime::now_utc())?;
    let log_path = dir.join(&log_file_name);
    ensure_file_exists(&log_path)?;

    let file_appender = rolling::never(dir, log_file_name);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    prune_old_logs(dir, max_files.max(1))?;
    Ok(LogFile {
        writer,
        guard,
        path: log_path,
    })
}

fn ensure_file_exists(path: &Path) -> Result<(), LoggingError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|_| ())
        .map_err(|source| LoggingError::CreateLogFile {
            path: path.to_path_buf(),
            source,
        })
}

/// Delete the oldest of this program's log files beyond `max_files`.
fn prune_old_logs(dir: &Path, max_files: usize) -> Result<(), LoggingError> {
    let mut entries = fs::read_dir(dir)
        .map_err(|source| LoggingError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .filter(|entry| is_own_log_file(&entry.path()))
        .map(|entry| {
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, entry.path())
        })
        .collect::<Vec<_>>();

    entries.sort_by_key(|(modified, _)| *modified);
    let excess = entries.len().saturating_sub(max_files);
    for (_, path) in entries.into_iter().take(excess) {
        fs::remove_file(&path).map_err(|source| LoggingError::RemoveFile { path, source })?;
    }
    Ok(())
}

fn is_own_log_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|name| name.to_str()).unwrap_or("");
    name.starts_with(&format!("{LOG_FILE_PREFIX}_")) && name.ends_with(".log")
}

fn format_log_file_name(now: OffsetDateTime) -> Result<String, LoggingError> {
    const NAME_FORMAT: &[BorrowedFormatItem<'_>] =
        format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
    let name = now
        .to_offset(UtcOffset::UTC)
        .format(NAME_FORMAT)
        .map_err(LoggingError::FormatTime)?;
    Ok(format!("{LOG_FILE_PREFIX}_{name}.log"))
}

fn build_timer() -> fmt::time::OffsetTime<BorrowedFormatItem<'static>> {
    const DISPLAY_FORMAT: &[BorrowedFormatItem<'static>] =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    fmt::time::OffsetTime::new(UtcOffset::UTC, DISPLAY_FORMAT.into())
}

/// `RUST_LOG` wins; otherwise the configured level. The flag reports a
/// configured level that did not parse.
fn build_env_filter(level: &str) -> (EnvFilter, bool) {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return (filter, false);
    }
    match EnvFilter::try_new(level.trim()) {
        Ok(filter) if !level.trim().is_empty() => (filter, false),
        _ => (EnvFilter::new(FALLBACK_LEVEL), true),
    }
}
