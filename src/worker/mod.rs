//! Archival side of the pipeline.
//!
//! The [`Worker`] takes jobs from the mailbox one at a time, assembles each
//! snapshot under a `.tmp-` staging directory, renames it into the latest
//! collection and then hands the finalized path to the retention engine.

mod layout;

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{DestinationConfig, RetentionConfig};
use crate::fsops::{FileOps, FileState, FsError};
use crate::mailbox::Mailbox;
use crate::retention::{RetentionEngine, RetentionError, RetentionReport, tiers_for};
use crate::snapshot::{Artifact, Job, Snapshot};

pub use layout::{AUTO_INSTANCE, DestinationLayout, resolve_instance};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to name snapshot directory: {0}")]
    Timestamp(time::error::Format),
    #[error("failed to prepare {path}: {source}")]
    Prepare { path: PathBuf, source: FsError },
    #[error("failed to copy {artifact}: {source}")]
    Copy { artifact: String, source: FsError },
    /// The primary file was replaced after detection; a newer job follows.
    #[error("{artifact} changed after detection")]
    Superseded { artifact: String },
    #[error("failed to finalize {path}: {source}")]
    Finalize { path: PathBuf, source: FsError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Archived {
        path: PathBuf,
        /// `None` when retention failed; the failure is only logged.
        retention: Option<RetentionReport>,
    },
    /// A snapshot with the same timestamp is already in the latest collection.
    /// `identical` is false when the archived primary differs in size, which
    /// means a second dump landed within the same second and was dropped.
    AlreadyArchived { path: PathBuf, identical: bool },
}

pub struct Worker {
    destination: RwLock<Arc<DestinationConfig>>,
    retention: RetentionEngine,
    mailbox: Arc<Mailbox<Job>>,
    ops: FileOps,
}

impl Worker {
    pub fn new(
        destination: DestinationConfig,
        retention: &RetentionConfig,
        ops: FileOps,
        mailbox: Arc<Mailbox<Job>>,
    ) -> Result<Self, RetentionError> {
        let tiers = tiers_for(
            &retention.rules,
            &destination.latest_subdir,
            retention.last_count,
        )?;
        Ok(Self {
            destination: RwLock::new(Arc::new(destination)),
            retention: RetentionEngine::new(ops.clone(), tiers),
            mailbox,
            ops,
        })
    }

    pub fn destination(&self) -> Arc<DestinationConfig> {
        self.destination
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn retention(&self) -> &RetentionEngine {
        &self.retention
    }

    /// Swap destination and retention settings. Nothing changes when the
    /// retention rules are invalid.
    pub fn update_config(
        &self,
        destination: DestinationConfig,
        retention: &RetentionConfig,
    ) -> Result<(), RetentionError> {
        let tiers = tiers_for(
            &retention.rules,
            &destination.latest_subdir,
            retention.last_count,
        )?;
        let mut guard = self
            .destination
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(destination);
        self.retention.update_config(tiers);
        Ok(())
    }

    /// Process jobs until the mailbox closes or cancellation is requested.
    pub fn start(&self) {
        let cancel = self.ops.cancel_token();
        info!("Worker started");
        while !cancel.is_cancelled() {
            let Some(job) = self.mailbox.take() else {
                break;
            };
            if cancel.is_cancelled() {
                break;
            }
            match self.handle(&job.snapshot) {
                Ok(ArchiveOutcome::Archived { path, .. }) => {
                    info!(path = %path.display(), "Snapshot archived");
                }
                Ok(ArchiveOutcome::AlreadyArchived { path, .. }) => {
                    debug!(path = %path.display(), "Snapshot already archived");
                }
                Err(err) => {
                    error!(primary = %job.snapshot.primary.name, error = %err, "Archival pass failed");
                }
            }
        }
        info!("Worker stopped");
    }

    /// Archive one snapshot atomically, then run retention.
    pub fn handle(&self, snapshot: &Snapshot) -> Result<ArchiveOutcome, ArchiveError> {
        let destination = self.destination();
        let layout = DestinationLayout::resolve(&destination);
        let name = snapshot.dir_name().map_err(ArchiveError::Timestamp)?;
        let final_path = layout.snapshot_path(&name);
        match self.ops.stat(&final_path) {
            Ok(_) => {
                let identical = self.archived_primary_matches(&final_path, &snapshot.primary);
                if !identical {
                    warn!(
                        path = %final_path.display(),
                        primary = %snapshot.primary.name,
                        size = snapshot.primary.size,
                        "Dropping dump that shares its second with an archived snapshot"
                    );
                }
                return Ok(ArchiveOutcome::AlreadyArchived {
                    path: final_path,
                    identical,
                });
            }
            Err(err) if err.is_not_found() => {}
            Err(source) => {
                return Err(ArchiveError::Prepare {
                    path: final_path,
                    source,
                });
            }
        }

        let staging = layout.staging_path(&name);
        let prepare = |source| ArchiveError::Prepare {
            path: staging.clone(),
            source,
        };
        self.ops.remove_all(&staging).map_err(prepare)?;
        self.ops.mkdir_all(&staging).map_err(prepare)?;

        if let Err(err) = self.stage(snapshot, &staging) {
            self.discard(&staging);
            return Err(err);
        }
        if let Err(source) = self.ops.rename(&staging, &final_path) {
            self.discard(&staging);
            return Err(ArchiveError::Finalize {
                path: final_path,
                source,
            });
        }
        debug!(path = %final_path.display(), "Snapshot finalized");

        let retention = match self.retention.apply(layout.archive_root(), &final_path) {
            Ok(report) => Some(report),
            Err(err) => {
                warn!(path = %final_path.display(), error = %err, "Retention incomplete");
                None
            }
        };
        Ok(ArchiveOutcome::Archived {
            path: final_path,
            retention,
        })
    }

    fn stage(&self, snapshot: &Snapshot, staging: &Path) -> Result<(), ArchiveError> {
        let primary = self.copy_artifact(snapshot, &snapshot.primary, staging)?;
        if primary.modified != snapshot.primary.modified {
            return Err(ArchiveError::Superseded {
                artifact: snapshot.primary.name.clone(),
            });
        }
        for artifact in &snapshot.auxiliary {
            self.copy_artifact(snapshot, artifact, staging)?;
        }
        Ok(())
    }

    fn copy_artifact(
        &self,
        snapshot: &Snapshot,
        artifact: &Artifact,
        staging: &Path,
    ) -> Result<FileState, ArchiveError> {
        self.ops
            .copy(&snapshot.source_path(artifact), &staging.join(&artifact.name))
            .map_err(|source| ArchiveError::Copy {
                artifact: artifact.name.clone(),
                source,
            })
    }

    /// Archive copies carry a fresh mtime, so only the size is comparable.
    fn archived_primary_matches(&self, final_path: &Path, primary: &Artifact) -> bool {
        self.ops
            .stat(&final_path.join(&primary.name))
            .is_ok_and(|state| state.size == primary.size)
    }

    fn discard(&self, staging: &Path) {
        if let Err(err) = self.ops.remove_all(staging) {
            warn!(path = %staging.display(), error = %err, "Leaving staging directory behind");
        }
    }
}
