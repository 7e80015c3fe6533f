use std::path::Path;

use tracing::debug;

const PROBE_TMP: &str = ".fsprobe_tmp";
const PROBE_FINAL: &str = ".fsprobe_final";

/// Check whether change notifications are delivered for `dir`.
///
/// Writes a marker file, renames it and waits briefly for an event. Any
/// failure counts as "not reliable". The marker files are removed afterwards.
pub fn probe_notifications(dir: &Path) -> bool {
    let reliable = probe_platform(dir);
    let _ = std::fs::remove_file(dir.join(PROBE_TMP));
    let _ = std::fs::remove_file(dir.join(PROBE_FINAL));
    debug!(path = %dir.display(), reliable, "Notification probe finished");
    reliable
}

#[cfg(target_os = "linux")]
fn probe_platform(dir: &Path) -> bool {
    use std::time::{Duration, Instant};

    use nix::sys::inotify::AddWatchFlags;

    use super::notify::Subscription;

    const PROBE_TIMEOUT: Duration = Duration::from_millis(200);
    const PROBE_STEP: Duration = Duration::from_millis(10);

    let flags =
        AddWatchFlags::IN_CREATE | AddWatchFlags::IN_MOVED_TO | AddWatchFlags::IN_CLOSE_WRITE;
    let subscription = match Subscription::open(dir, flags) {
        Ok(subscription) => subscription,
        Err(err) => {
            debug!(error = %err, "Notification probe could not subscribe");
            return false;
        }
    };
    let tmp = dir.join(PROBE_TMP);
    if let Err(err) = std::fs::write(&tmp, b"probe")
        .and_then(|()| std::fs::rename(&tmp, dir.join(PROBE_FINAL)))
    {
        debug!(path = %dir.display(), error = %err, "Notification probe could not write");
        return false;
    }
    let deadline = Instant::now() + PROBE_TIMEOUT;
    while Instant::now() < deadline {
        match subscription.drain() {
            Ok(events) if !events.is_empty() => return true,
            Ok(_) => std::thread::sleep(PROBE_STEP),
            Err(_) => return false,
        }
    }
    false
}

#[cfg(not(target_os = "linux"))]
fn probe_platform(_dir: &Path) -> bool {
    false
}
