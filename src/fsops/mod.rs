//! Resilient filesystem primitives.
//!
//! Every operation that touches the source or the archive tree goes through
//! [`FileOps`]: transient errors are retried with capped exponential backoff,
//! copies are verified against the source's pre-copy [`FileState`], and
//! `rename` is the only way anything reaches its final name.

mod copy;
mod retry;

use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;

use crate::cancel::CancelToken;

pub use copy::{STAGING_PREFIX, staging_path};
pub use retry::{RetryPolicy, is_transient};

/// Point-in-time observation of a file.
#[derive(Debug, Clone)]
pub struct FileState {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    /// Inode number where the platform exposes one, otherwise 0.
    pub identity: u64,
}

impl FileState {
    fn from_metadata(path: &Path, meta: &Metadata) -> io::Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            size: meta.len(),
            modified: meta.modified()?,
            identity: identity_of(meta),
        })
    }

    /// True when `other` describes the same file version: size, modification
    /// time and identity token all agree. A zero identity is treated as unknown.
    pub fn matches(&self, other: &FileState) -> bool {
        let identity_matches =
            self.identity == 0 || other.identity == 0 || self.identity == other.identity;
        identity_matches && self.size == other.size && self.modified == other.modified
    }
}

#[cfg(unix)]
fn identity_of(meta: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn identity_of(_meta: &Metadata) -> u64 {
    0
}

/// Errors surfaced by [`FileOps`].
#[derive(Debug, Error)]
pub enum FsError {
    /// The path does not exist.
    #[error("{path} does not exist")]
    NotFound { path: PathBuf },
    /// A non-transient failure; never retried.
    #[error("{op} failed permanently for {path}: {source}")]
    Permanent {
        op: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    /// A transient failure that persisted through every attempt.
    #[error("{op} failed for {path} after {attempts} attempts: {source}")]
    Exhausted {
        op: &'static str,
        path: PathBuf,
        attempts: u32,
        source: io::Error,
    },
    /// The source was rewritten while it was being copied.
    #[error("source {path} changed during copy")]
    SourceChanged {
        path: PathBuf,
        before: Box<FileState>,
        after: Box<FileState>,
    },
    /// Cancellation was requested before the operation could complete.
    #[error("{op} cancelled for {path}")]
    Cancelled { op: &'static str, path: PathBuf },
}

impl FsError {
    /// True for the torn-read guard, as opposed to an I/O failure.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, FsError::SourceChanged { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound { .. })
    }
}

/// Filesystem operations with retry, cancellation and torn-read detection.
#[derive(Debug, Clone)]
pub struct FileOps {
    policy: RetryPolicy,
    cancel: CancelToken,
}

impl FileOps {
    pub fn new(cancel: CancelToken) -> Self {
        Self::with_policy(RetryPolicy::default(), cancel)
    }

    pub fn with_policy(policy: RetryPolicy, cancel: CancelToken) -> Self {
        if !policy.delays_grow_strictly() {
            tracing::warn!(
                max_delay = ?policy.max_delay,
                attempts = policy.max_attempts,
                "Retry cap flattens the backoff; later attempts share one delay"
            );
        }
        Self { policy, cancel }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Observe `path`, following symlinks.
    pub fn stat(&self, path: &Path) -> Result<FileState, FsError> {
        retry::retry(self.policy, &self.cancel, "stat", path, || {
            let meta = fs::metadata(path)?;
            FileState::from_metadata(path, &meta)
        })
    }

    /// Copy `src` to `dst`, refusing to commit if `src` changed meanwhile.
    pub fn copy(&self, src: &Path, dst: &Path) -> Result<FileState, FsError> {
        copy::copy_verified(self, src, dst)
    }

    /// Recursively copy the directory `src` to `dst`, publishing it atomically.
    pub fn copy_dir(&self, src: &Path, dst: &Path) -> Result<(), FsError> {
        copy::copy_dir_atomic(self, src, dst)
    }

    pub fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        retry::retry(self.policy, &self.cancel, "rename", from, || {
            fs::rename(from, to)
        })
    }

    pub fn mkdir_all(&self, path: &Path) -> Result<(), FsError> {
        retry::retry(self.policy, &self.cancel, "mkdir", path, || {
            fs::create_dir_all(path)
        })
    }

    /// Remove a file or directory tree. A missing path is not an error.
    pub fn remove_all(&self, path: &Path) -> Result<(), FsError> {
        let result = retry::retry(self.policy, &self.cancel, "remove", path, || {
            let meta = fs::symlink_metadata(path)?;
            if meta.is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            }
        });
        match result {
            Err(FsError::NotFound { .. }) => Ok(()),
            other => other,
        }
    }

    /// List the entries of `dir`.
    pub fn list_dir(&self, dir: &Path) -> Result<Vec<DirEntryInfo>, FsError> {
        retry::retry(self.policy, &self.cancel, "list", dir, || {
            let mut entries = Vec::new();
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                let is_dir = entry.file_type()?.is_dir();
                entries.push(DirEntryInfo {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    path: entry.path(),
                    is_dir,
                });
            }
            Ok(entries)
        })
    }
}

/// One directory entry as seen by [`FileOps::list_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
}
