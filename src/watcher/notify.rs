use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify};
use tracing::{debug, info, warn};

use super::{DebounceInput, Debouncer, WatchError, Watcher};

/// Longest time between event reads.
const TICK: Duration = Duration::from_millis(50);

fn watch_flags() -> AddWatchFlags {
    AddWatchFlags::IN_CLOSE_WRITE
        | AddWatchFlags::IN_MOVED_TO
        | AddWatchFlags::IN_CREATE
        | AddWatchFlags::IN_MODIFY
}

/// Non-blocking inotify subscription on one directory.
pub(super) struct Subscription {
    dir: PathBuf,
    inotify: Inotify,
}

impl Subscription {
    pub(super) fn open(dir: &Path, flags: AddWatchFlags) -> Result<Self, WatchError> {
        let subscribe_err = |errno: Errno| WatchError::Subscribe {
            path: dir.to_path_buf(),
            source: errno.into(),
        };
        let inotify = Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC)
            .map_err(subscribe_err)?;
        inotify.add_watch(dir, flags).map_err(subscribe_err)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            inotify,
        })
    }

    pub(super) fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drain pending events. `None` in the result stands for a queue overflow,
    /// where names were lost.
    pub(super) fn drain(&self) -> Result<Vec<Option<OsString>>, WatchError> {
        let mut names = Vec::new();
        loop {
            match self.inotify.read_events() {
                Ok(events) if events.is_empty() => return Ok(names),
                Ok(events) => {
                    for event in events {
                        if event.mask.contains(AddWatchFlags::IN_Q_OVERFLOW) {
                            names.push(None);
                        } else if let Some(name) = event.name {
                            names.push(Some(name));
                        }
                    }
                }
                Err(Errno::EAGAIN) => return Ok(names),
                Err(Errno::EINTR) => continue,
                Err(errno) => {
                    return Err(WatchError::Events {
                        path: self.dir.clone(),
                        source: errno.into(),
                    });
                }
            }
        }
    }
}

pub(super) fn run(watcher: &Watcher) -> Result<(), WatchError> {
    let cancel = watcher.cancel();
    let mut subscription = Subscription::open(&watcher.config().path, watch_flags())?;
    let mut rejected_dir: Option<PathBuf> = None;
    let mut debouncer = Debouncer::new();

    // Whatever is already on disk counts as the first change.
    watcher.detect();

    loop {
        if cancel.is_cancelled() {
            debouncer.step(DebounceInput::Cancel);
            return Ok(());
        }
        let config = watcher.config();
        if config.path != subscription.dir() && rejected_dir.as_ref() != Some(&config.path) {
            match Subscription::open(&config.path, watch_flags()) {
                Ok(next) => {
                    info!(path = %config.path.display(), "Re-subscribed to source directory");
                    subscription = next;
                    rejected_dir = None;
                    debouncer.step(DebounceInput::Cancel);
                    watcher.detect();
                }
                Err(err) => {
                    warn!(error = %err, "Keeping previous directory watch");
                    rejected_dir = Some(config.path.clone());
                }
            }
        }

        let now = Instant::now();
        let relevant = subscription
            .drain()?
            .iter()
            .any(|name| name.as_ref().is_none_or(|name| *name == *config.primary));
        if relevant {
            debouncer.step(DebounceInput::Change {
                at: now,
                window: config.watch.debounce_window,
            });
        }
        if debouncer.step(DebounceInput::Tick { at: Instant::now() }) {
            debug!("Debounce window elapsed");
            watcher.detect();
        }

        let wait = debouncer
            .remaining(Instant::now())
            .map_or(TICK, |remaining| remaining.min(TICK));
        if !cancel.sleep(wait) {
            debouncer.step(DebounceInput::Cancel);
            return Ok(());
        }
    }
}
