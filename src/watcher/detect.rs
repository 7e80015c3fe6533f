use std::sync::{Arc, PoisonError};

use tracing::{debug, warn};

use super::Watcher;
use crate::snapshot::{Artifact, Job, Snapshot};

/// Result of one detection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// A new snapshot was placed in the mailbox.
    Deposited(Snapshot),
    /// The primary file could not be observed.
    Missing,
    /// The primary file has not advanced past the last deposited version.
    Unchanged,
    /// The primary file grew or shrank during the stability window.
    Unstable,
    Cancelled,
}

impl Watcher {
    /// Stat the primary file and, if it advanced, deposit a new snapshot.
    pub fn detect(&self) -> Detection {
        let config = self.config();
        let primary_path = config.path.join(&config.primary);
        let mut primary = match self.ops.stat(&primary_path) {
            Ok(state) => state,
            Err(err) => {
                debug!(path = %primary_path.display(), error = %err, "Primary file not readable");
                return Detection::Missing;
            }
        };
        let last_seen = *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);
        if last_seen.is_some_and(|last| primary.modified <= last) {
            return Detection::Unchanged;
        }

        let window = config.watch.stability_window;
        if !window.is_zero() {
            if !self.cancel().sleep(window) {
                return Detection::Cancelled;
            }
            let settled = match self.ops.stat(&primary_path) {
                Ok(state) => state,
                Err(err) => {
                    debug!(path = %primary_path.display(), error = %err, "Primary file vanished while settling");
                    return Detection::Missing;
                }
            };
            if settled.size != primary.size {
                debug!(
                    path = %primary_path.display(),
                    before = primary.size,
                    after = settled.size,
                    "Primary file still changing"
                );
                return Detection::Unstable;
            }
            primary = settled;
        }

        let mut auxiliary = Vec::with_capacity(config.auxiliary.len());
        for name in &config.auxiliary {
            let path = config.path.join(name);
            match self.ops.stat(&path) {
                Ok(state) => auxiliary.push(Artifact::from_state(&state)),
                Err(err) => warn!(path = %path.display(), error = %err, "Skipping auxiliary file"),
            }
        }
        let snapshot = Snapshot {
            source_dir: config.path.clone(),
            primary: Artifact::from_state(&primary),
            auxiliary,
        };

        {
            let current = self.config.read().unwrap_or_else(PoisonError::into_inner);
            if !Arc::ptr_eq(&*current, &config) {
                debug!("Source configuration changed during detection; discarding");
                return Detection::Unchanged;
            }
            *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(primary.modified);
        }
        if self.mailbox.put(Job::new(snapshot.clone())) {
            debug!("Replaced an undelivered snapshot");
        }
        debug!(
            path = %primary_path.display(),
            size = primary.size,
            auxiliary = snapshot.auxiliary.len(),
            "Snapshot detected"
        );
        Detection::Deposited(snapshot)
    }
}
