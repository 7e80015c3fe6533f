use std::path::Path;

use time::OffsetDateTime;
use tracing::{debug, warn};

use super::RetentionError;
use super::prune::list_snapshots;
use super::schedule::Schedule;
use crate::fsops::FileOps;

/// Copy `finalized` into `tier_dir` when it is the first snapshot at or after
/// the latest boundary of `schedule`.
///
/// Returns `Ok(false)` when the boundary is already represented in the tier or
/// when an earlier snapshot in `latest_dir` is the closer candidate.
pub(super) fn promote(
    ops: &FileOps,
    schedule: &Schedule,
    tier_dir: &Path,
    latest_dir: &Path,
    finalized: &Path,
    timestamp: OffsetDateTime,
) -> Result<bool, RetentionError> {
    let tier = tier_name(tier_dir);
    let Some(anchor) = schedule.anchor_at_or_before(timestamp) else {
        warn!(tier = %tier, schedule = %schedule, "Schedule has no boundary before snapshot");
        return Ok(false);
    };

    let promoted = list_snapshots(ops, tier_dir).map_err(|source| RetentionError::List {
        tier: tier.clone(),
        source,
    })?;
    if promoted.iter().any(|entry| entry.timestamp >= anchor) {
        debug!(tier = %tier, anchor = %anchor, "Boundary already promoted");
        return Ok(false);
    }

    let candidates = list_snapshots(ops, latest_dir).map_err(|source| RetentionError::List {
        tier: tier.clone(),
        source,
    })?;
    let closest = candidates
        .iter()
        .filter(|entry| entry.timestamp >= anchor)
        .map(|entry| entry.timestamp)
        .min();
    if closest.is_some_and(|closest| closest != timestamp) {
        debug!(tier = %tier, anchor = %anchor, "An earlier snapshot represents this boundary");
        return Ok(false);
    }

    let Some(name) = finalized.file_name() else {
        return Err(RetentionError::NotASnapshot {
            path: finalized.to_path_buf(),
        });
    };
    let promote_err = |source| RetentionError::Promote {
        tier: tier.clone(),
        source,
    };
    ops.mkdir_all(tier_dir).map_err(promote_err)?;
    ops.copy_dir(finalized, &tier_dir.join(name))
        .map_err(promote_err)?;
    Ok(true)
}

fn tier_name(tier_dir: &Path) -> String {
    tier_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
