//! Retention engine: promotion into cron-anchored tiers and per-tier pruning.
//!
//! Runs synchronously on the archival thread after each successful pass. Every
//! tier is handled independently; a failing tier is logged and the remaining
//! tiers still run.

mod promote;
mod prune;
pub mod schedule;

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::RetentionRule;
use crate::fsops::{FileOps, FsError};
use crate::snapshot::timestamp_of_path;

pub use prune::{ArchivedSnapshot, PruneOutcome, list_snapshots, prune_to_capacity};
pub use schedule::{Schedule, ScheduleError};

/// One named retention policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionTier {
    pub name: String,
    /// `None` for a capacity-only tier.
    pub schedule: Option<Schedule>,
    /// Number of snapshots to keep; 0 keeps nothing.
    pub capacity: usize,
}

impl RetentionTier {
    pub fn from_rule(rule: &RetentionRule) -> Result<Self, RetentionError> {
        let schedule = if rule.cron.trim().is_empty() {
            None
        } else {
            Some(
                Schedule::parse(&rule.cron).map_err(|source| RetentionError::Schedule {
                    tier: rule.name.clone(),
                    source,
                })?,
            )
        };
        Ok(Self {
            name: rule.name.clone(),
            schedule,
            capacity: rule.count,
        })
    }

    pub fn capacity_only(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            schedule: None,
            capacity,
        }
    }
}

/// Build the tier list for `rules`, followed by the keep-last-N tier over the
/// latest collection.
pub fn tiers_for(
    rules: &[RetentionRule],
    latest_subdir: &str,
    last_count: usize,
) -> Result<Vec<RetentionTier>, RetentionError> {
    let mut tiers = rules
        .iter()
        .map(RetentionTier::from_rule)
        .collect::<Result<Vec<_>, _>>()?;
    tiers.push(RetentionTier::capacity_only(latest_subdir, last_count));
    Ok(tiers)
}

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("retention tier {tier} has an invalid schedule: {source}")]
    Schedule {
        tier: String,
        source: ScheduleError,
    },
    #[error("{path} is not a finalized snapshot directory")]
    NotASnapshot { path: PathBuf },
    #[error("promotion into tier {tier} failed: {source}")]
    Promote { tier: String, source: FsError },
    #[error("listing tier {tier} failed: {source}")]
    List { tier: String, source: FsError },
    #[error("{failed} of {total} retention tiers failed")]
    Incomplete { failed: usize, total: usize },
}

/// What one [`RetentionEngine::apply`] call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Tiers that received a copy of the new snapshot.
    pub promoted: Vec<String>,
    /// Entries deleted across all tiers.
    pub pruned: usize,
}

pub struct RetentionEngine {
    ops: FileOps,
    tiers: RwLock<Arc<Vec<RetentionTier>>>,
}

impl RetentionEngine {
    pub fn new(ops: FileOps, tiers: Vec<RetentionTier>) -> Self {
        Self {
            ops,
            tiers: RwLock::new(Arc::new(tiers)),
        }
    }

    /// Replace the tier list; takes effect on the next `apply`.
    pub fn update_config(&self, tiers: Vec<RetentionTier>) {
        let mut guard = self.tiers.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(tiers);
    }

    pub fn tiers(&self) -> Arc<Vec<RetentionTier>> {
        self.tiers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Promote and prune every tier for the snapshot just finalized at
    /// `finalized`, which must live directly inside the latest collection.
    pub fn apply(
        &self,
        archive_root: &Path,
        finalized: &Path,
    ) -> Result<RetentionReport, RetentionError> {
        let timestamp =
            timestamp_of_path(finalized).ok_or_else(|| RetentionError::NotASnapshot {
                path: finalized.to_path_buf(),
            })?;
        let latest_dir = finalized
            .parent()
            .ok_or_else(|| RetentionError::NotASnapshot {
                path: finalized.to_path_buf(),
            })?;
        let tiers = self.tiers();
        let mut report = RetentionReport::default();
        let mut failed = 0;
        for tier in tiers.iter() {
            let tier_dir = archive_root.join(&tier.name);
            let mut tier_failed = false;
            if let Some(schedule) = &tier.schedule
                && tier.capacity > 0
            {
                let promoted = promote::promote(
                    &self.ops, schedule, &tier_dir, latest_dir, finalized, timestamp,
                );
                match promoted {
                    Ok(true) => {
                        info!(tier = %tier.name, snapshot = %finalized.display(), "Promoted snapshot");
                        report.promoted.push(tier.name.clone());
                    }
                    Ok(false) => debug!(tier = %tier.name, "Promotion not needed"),
                    Err(err) => {
                        tier_failed = true;
                        warn!(tier = %tier.name, error = %err, "Promotion failed");
                    }
                }
            }
            match prune_to_capacity(&self.ops, &tier_dir, tier.capacity) {
                Ok(outcome) => {
                    report.pruned += outcome.removed;
                    tier_failed |= outcome.failed > 0;
                }
                Err(source) => {
                    tier_failed = true;
                    let err = RetentionError::List {
                        tier: tier.name.clone(),
                        source,
                    };
                    warn!(tier = %tier.name, error = %err, "Pruning failed");
                }
            }
            if tier_failed {
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(RetentionError::Incomplete {
                failed,
                total: tiers.len(),
            });
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests;
