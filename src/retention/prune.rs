use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::fsops::{FileOps, FsError};
use crate::snapshot::parse_timestamp;

/// A timestamp-named entry inside a tier or latest folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedSnapshot {
    pub timestamp: OffsetDateTime,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    pub kept: usize,
    pub removed: usize,
    /// Deletions that failed and were skipped.
    pub failed: usize,
}

/// Snapshot entries of `dir`, newest first. A missing directory is empty.
///
/// Entries whose names are not snapshot timestamps, including staging
/// leftovers, are ignored.
pub fn list_snapshots(ops: &FileOps, dir: &Path) -> Result<Vec<ArchivedSnapshot>, FsError> {
    let entries = match ops.list_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.is_not_found() => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let mut snapshots: Vec<ArchivedSnapshot> = entries
        .into_iter()
        .filter_map(|entry| {
            parse_timestamp(&entry.name).map(|timestamp| ArchivedSnapshot {
                timestamp,
                path: entry.path,
            })
        })
        .collect();
    snapshots.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(snapshots)
}

/// Delete every snapshot in `dir` beyond the `capacity` newest.
pub fn prune_to_capacity(
    ops: &FileOps,
    dir: &Path,
    capacity: usize,
) -> Result<PruneOutcome, FsError> {
    let snapshots = list_snapshots(ops, dir)?;
    let mut outcome = PruneOutcome {
        kept: snapshots.len().min(capacity),
        ..PruneOutcome::default()
    };
    for stale in snapshots.iter().skip(capacity) {
        match ops.remove_all(&stale.path) {
            Ok(()) => {
                debug!(path = %stale.path.display(), "Pruned snapshot");
                outcome.removed += 1;
            }
            Err(err) => {
                warn!(path = %stale.path.display(), error = %err, "Failed to prune snapshot");
                outcome.failed += 1;
            }
        }
    }
    Ok(outcome)
}
