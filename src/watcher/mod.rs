//! Change detection for the source directory.
//!
//! The [`Watcher`] decides when a new, stable snapshot exists and hands it to
//! the worker through the shared [`Mailbox`]. Two strategies exist: polling
//! the primary file's modification time, and (on Linux) inotify events fed
//! through a debounce state machine. `auto` picks between them once, based on
//! a startup probe.

mod debounce;
mod detect;
#[cfg(target_os = "linux")]
mod notify;
mod poll;
mod probe;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::SystemTime;

use thiserror::Error;
use tracing::info;

use crate::cancel::CancelToken;
use crate::config::{SourceConfig, WatchMode};
use crate::fsops::FileOps;
use crate::mailbox::Mailbox;
use crate::snapshot::Job;

pub use debounce::{DebounceInput, DebounceState, Debouncer};
pub use detect::Detection;
pub use probe::probe_notifications;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("notify watch mode is not supported on this platform")]
    NotifyUnsupported,
    #[error("failed to watch {path}: {source}")]
    Subscribe {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read change events for {path}: {source}")]
    Events {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Strategy actually running, after `auto` has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveMode {
    Poll,
    Notify,
}

impl std::fmt::Display for ActiveMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ActiveMode::Poll => "poll",
            ActiveMode::Notify => "notify",
        })
    }
}

/// Resolve the configured mode. `probe` runs only for `auto`.
pub fn resolve_mode(
    configured: WatchMode,
    probe: impl FnOnce() -> bool,
) -> Result<ActiveMode, WatchError> {
    match configured {
        WatchMode::Poll => Ok(ActiveMode::Poll),
        WatchMode::Notify if cfg!(target_os = "linux") => Ok(ActiveMode::Notify),
        WatchMode::Notify => Err(WatchError::NotifyUnsupported),
        WatchMode::Auto if probe() => Ok(ActiveMode::Notify),
        WatchMode::Auto => Ok(ActiveMode::Poll),
    }
}

pub struct Watcher {
    config: RwLock<Arc<SourceConfig>>,
    /// Modification time of the last primary file handed to the mailbox.
    last_seen: Mutex<Option<SystemTime>>,
    mailbox: Arc<Mailbox<Job>>,
    ops: FileOps,
}

impl Watcher {
    pub fn new(config: SourceConfig, ops: FileOps, mailbox: Arc<Mailbox<Job>>) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            last_seen: Mutex::new(None),
            mailbox,
            ops,
        }
    }

    pub fn config(&self) -> Arc<SourceConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn cancel(&self) -> &CancelToken {
        self.ops.cancel_token()
    }

    /// Swap in a new source configuration.
    ///
    /// Changing the directory or the primary file name forgets the last seen
    /// timestamp so the current file is archived under its new identity.
    pub fn update_config(&self, config: SourceConfig) {
        let mut guard = self.config.write().unwrap_or_else(PoisonError::into_inner);
        if guard.path != config.path || guard.primary != config.primary {
            *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = None;
            info!(
                path = %config.path.display(),
                primary = %config.primary,
                "Source identity changed; forcing re-detection"
            );
        }
        if guard.watch.mode != config.watch.mode {
            info!(
                from = %guard.watch.mode,
                to = %config.watch.mode,
                "Watch mode change takes effect after restart"
            );
        }
        *guard = Arc::new(config);
    }

    /// Run the detection loop until cancellation.
    pub fn run(&self, mode: ActiveMode) -> Result<(), WatchError> {
        info!(mode = %mode, path = %self.config().path.display(), "Watcher started");
        let result = match mode {
            ActiveMode::Poll => {
                poll::run(self);
                Ok(())
            }
            ActiveMode::Notify => self.run_notify(),
        };
        info!("Watcher stopped");
        result
    }

    #[cfg(target_os = "linux")]
    fn run_notify(&self) -> Result<(), WatchError> {
        notify::run(self)
    }

    #[cfg(not(target_os = "linux"))]
    fn run_notify(&self) -> Result<(), WatchError> {
        Err(WatchError::NotifyUnsupported)
    }
}
