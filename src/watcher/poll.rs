use tracing::debug;

use super::{Detection, Watcher};

/// Re-run detection every poll interval until cancelled. The interval is read
/// from the current configuration on each tick.
pub(super) fn run(watcher: &Watcher) {
    loop {
        if watcher.cancel().is_cancelled() {
            return;
        }
        if let Detection::Deposited(snapshot) = watcher.detect() {
            debug!(primary = %snapshot.primary.name, "Poll tick found a new snapshot");
        }
        let interval = watcher.config().watch.poll_interval;
        if !watcher.cancel().sleep(interval) {
            return;
        }
    }
}
