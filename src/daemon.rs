//! Process wiring: builds the pipeline, runs the detection and archival
//! threads, and supervises them for signals, config reloads and failures.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::config::{self, Config, ConfigError, ReloadMethod};
use crate::fsops::{FileOps, FileState};
use crate::logging;
use crate::mailbox::Mailbox;
use crate::retention::RetentionError;
use crate::snapshot::Job;
use crate::watcher::{self, ActiveMode, WatchError, Watcher};
use crate::worker::{DestinationLayout, Worker};

/// How often the supervisor looks at signals and thread health.
const SUPERVISE_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Retention(#[from] RetentionError),
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error("failed to install signal handlers: {source}")]
    Signal { source: std::io::Error },
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },
    #[error("{name} thread panicked")]
    Panicked { name: &'static str },
}

/// Flags flipped by signal handlers (or tests) and polled by the supervisor.
#[derive(Debug, Clone, Default)]
pub struct Signals {
    pub shutdown: Arc<AtomicBool>,
    pub reload: Arc<AtomicBool>,
}

impl Signals {
    /// Route SIGINT/SIGTERM to `shutdown` and, on Unix, SIGHUP to `reload`.
    pub fn install() -> Result<Self, DaemonError> {
        use signal_hook::consts::{SIGINT, SIGTERM};

        let signals = Self::default();
        let register = |signal, flag: &Arc<AtomicBool>| {
            signal_hook::flag::register(signal, Arc::clone(flag))
                .map(|_| ())
                .map_err(|source| DaemonError::Signal { source })
        };
        register(SIGINT, &signals.shutdown)?;
        register(SIGTERM, &signals.shutdown)?;
        #[cfg(unix)]
        register(signal_hook::consts::SIGHUP, &signals.reload)?;
        Ok(signals)
    }
}

/// A fully wired pipeline, ready to run.
pub struct Daemon {
    config_path: PathBuf,
    config: Config,
    mode: ActiveMode,
    ops: FileOps,
    mailbox: Arc<Mailbox<Job>>,
    watcher: Arc<Watcher>,
    worker: Arc<Worker>,
}

impl Daemon {
    /// Build every component for `config`; in `auto` mode this runs the
    /// notification probe once.
    pub fn build(config_path: PathBuf, config: Config) -> Result<Self, DaemonError> {
        let ops = FileOps::new(CancelToken::new());
        let mailbox = Arc::new(Mailbox::new());
        let worker = Worker::new(
            config.destination.clone(),
            &config.retention,
            ops.clone(),
            Arc::clone(&mailbox),
        )?;
        let mode = watcher::resolve_mode(config.source.watch.mode, || {
            watcher::probe_notifications(&config.source.path)
        })?;
        info!(configured = %config.source.watch.mode, active = %mode, "Watch mode selected");
        let watcher = Watcher::new(config.source.clone(), ops.clone(), Arc::clone(&mailbox));
        Ok(Self {
            config_path,
            config,
            mode,
            ops,
            mailbox,
            watcher: Arc::new(watcher),
            worker: Arc::new(worker),
        })
    }

    pub fn mode(&self) -> ActiveMode {
        self.mode
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.ops.cancel_token().clone()
    }

    /// Load the config file again and hand it to the watcher and worker.
    /// On error the running configuration is left untouched.
    pub fn reload(&mut self) -> Result<(), DaemonError> {
        let next = config::load(&self.config_path)?;
        self.worker
            .update_config(next.destination.clone(), &next.retention)?;
        self.watcher.update_config(next.source.clone());
        if next.logging != self.config.logging {
            warn!("Logging settings change on restart only");
        }
        self.config = next;
        info!(path = %self.config_path.display(), "Configuration reloaded");
        Ok(())
    }

    /// Spawn the pipeline threads and supervise them until `signals.shutdown`
    /// is raised or the detection thread fails.
    pub fn run(mut self, signals: &Signals) -> Result<(), DaemonError> {
        let worker_handle = spawn("archival", {
            let worker = Arc::clone(&self.worker);
            move || worker.start()
        })?;
        let watcher_handle = match spawn("detection", {
            let watcher = Arc::clone(&self.watcher);
            let mode = self.mode;
            move || watcher.run(mode)
        }) {
            Ok(handle) => handle,
            Err(err) => {
                self.stop();
                let _ = worker_handle.join();
                return Err(err);
            }
        };

        let outcome = self.supervise(signals, &watcher_handle);
        self.stop();
        let watched = join("detection", watcher_handle);
        let archived = join("archival", worker_handle);
        info!("Shutdown complete");
        outcome?;
        watched??;
        archived
    }

    fn supervise(
        &mut self,
        signals: &Signals,
        watcher_handle: &JoinHandle<Result<(), WatchError>>,
    ) -> Result<(), DaemonError> {
        let mut config_state = self.config_file_state();
        let mut next_check = Instant::now() + self.config.reload.check_interval;
        loop {
            if signals.shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested");
                return Ok(());
            }
            if watcher_handle.is_finished() {
                error!("Detection thread exited; shutting down");
                return Ok(());
            }

            let reload = &self.config.reload;
            let mut wants_reload = signals.reload.swap(false, Ordering::SeqCst);
            if reload.enabled && reload.method == ReloadMethod::Watch && Instant::now() >= next_check
            {
                next_check = Instant::now() + reload.check_interval;
                let current = self.config_file_state();
                if let (Some(before), Some(after)) = (&config_state, &current)
                    && !before.matches(after)
                {
                    debug!(path = %self.config_path.display(), "Config file changed");
                    wants_reload = true;
                }
                if current.is_some() {
                    config_state = current;
                }
            }
            if wants_reload {
                if self.config.reload.enabled {
                    if let Err(err) = self.reload() {
                        warn!(error = %err, "Reload failed; keeping previous configuration");
                    }
                } else {
                    info!("Reload requested but disabled in configuration");
                }
            }
            std::thread::sleep(SUPERVISE_TICK);
        }
    }

    fn config_file_state(&self) -> Option<FileState> {
        match self.ops.stat(&self.config_path) {
            Ok(state) => Some(state),
            Err(err) => {
                debug!(path = %self.config_path.display(), error = %err, "Config file not readable");
                None
            }
        }
    }

    fn stop(&self) {
        self.ops.cancel_token().cancel();
        self.mailbox.close();
    }
}

fn spawn<T, F>(name: &'static str, body: F) -> Result<JoinHandle<T>, DaemonError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    std::thread::Builder::new()
        .name(format!("rdb-archiver-{name}"))
        .spawn(body)
        .map_err(|source| DaemonError::Spawn { name, source })
}

fn join<T>(name: &'static str, handle: JoinHandle<T>) -> Result<T, DaemonError> {
    handle.join().map_err(|_| DaemonError::Panicked { name })
}

/// Entry point for the long-running process.
pub fn run(config_path: PathBuf) -> Result<(), DaemonError> {
    let config = config::load(&config_path)?;
    if let Err(err) = logging::init(&config.logging) {
        eprintln!("Logging disabled: {err}");
    }
    info!(path = %config_path.display(), "Starting rdb-archiver");
    let signals = Signals::install()?;
    Daemon::build(config_path, config)?.run(&signals)
}

/// Validate the config at `path` and describe what it resolves to.
pub fn check_config(path: &Path) -> Result<String, DaemonError> {
    let config = config::load(path)?;
    let tiers = crate::retention::tiers_for(
        &config.retention.rules,
        &config.destination.latest_subdir,
        config.retention.last_count,
    )?;
    let layout = DestinationLayout::resolve(&config.destination);
    let mut report = String::new();
    let _ = writeln!(report, "config: {}", path.display());
    let _ = writeln!(
        report,
        "source: {} (primary {}, auxiliary [{}])",
        config.source.path.display(),
        config.source.primary,
        config.source.auxiliary.join(", ")
    );
    let _ = writeln!(report, "watch mode: {}", config.source.watch.mode);
    let _ = writeln!(report, "archive root: {}", layout.archive_root().display());
    let _ = writeln!(report, "latest: {}", layout.latest_dir().display());
    for tier in tiers.iter() {
        let schedule = tier
            .schedule
            .as_ref()
            .map_or_else(|| "-".to_string(), |schedule| schedule.to_string());
        let _ = writeln!(report, "tier {}: keep {} ({schedule})", tier.name, tier.capacity);
    }
    Ok(report)
}
