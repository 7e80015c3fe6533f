//! Snapshot domain model shared by the watcher, worker and retention engine.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::fsops::FileState;

/// Directory-name format for archived snapshots (UTC).
pub const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]-[minute]-[second]");

/// One file belonging to a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// File name relative to the snapshot's source directory.
    pub name: String,
    pub size: u64,
    pub modified: SystemTime,
}

impl Artifact {
    pub fn from_state(state: &FileState) -> Self {
        let name = state
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            name,
            size: state.size,
            modified: state.modified,
        }
    }
}

/// A coherent capture of the primary file plus whichever auxiliary files were present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub source_dir: PathBuf,
    pub primary: Artifact,
    pub auxiliary: Vec<Artifact>,
}

impl Snapshot {
    /// Logical timestamp: the primary file's modification time.
    pub fn timestamp(&self) -> OffsetDateTime {
        OffsetDateTime::from(self.primary.modified)
    }

    /// Archive directory name derived from the logical timestamp.
    pub fn dir_name(&self) -> Result<String, time::error::Format> {
        format_timestamp(self.timestamp())
    }

    /// Primary first, then auxiliaries in capture order.
    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        std::iter::once(&self.primary).chain(self.auxiliary.iter())
    }

    pub fn source_path(&self, artifact: &Artifact) -> PathBuf {
        self.source_dir.join(&artifact.name)
    }
}

/// Unit of work handed from detection to archival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub snapshot: Snapshot,
}

impl Job {
    pub fn new(snapshot: Snapshot) -> Self {
        Self { snapshot }
    }
}

/// Render `timestamp` as an archive directory name, normalised to UTC.
pub fn format_timestamp(timestamp: OffsetDateTime) -> Result<String, time::error::Format> {
    timestamp
        .to_offset(time::UtcOffset::UTC)
        .format(TIMESTAMP_FORMAT)
}

/// Parse an archive directory name back into a UTC timestamp.
///
/// Returns `None` for anything that is not exactly a snapshot name, which
/// includes staging directories.
pub fn parse_timestamp(name: &str) -> Option<OffsetDateTime> {
    PrimitiveDateTime::parse(name, TIMESTAMP_FORMAT)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// Timestamp encoded in the final path component of `path`.
pub fn timestamp_of_path(path: &Path) -> Option<OffsetDateTime> {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(parse_timestamp)
}
