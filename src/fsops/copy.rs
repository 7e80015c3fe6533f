use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::{FileOps, FileState, FsError, retry};

/// Prefix marking a directory that is still being assembled.
pub const STAGING_PREFIX: &str = ".tmp-";

pub(super) fn copy_verified(ops: &FileOps, src: &Path, dst: &Path) -> Result<FileState, FsError> {
    let before = ops.stat(src)?;
    copy_checked(ops, &before, dst)
}

/// Copy the file described by `before` onto `dst`, removing the partial file
/// on any failure.
pub(super) fn copy_checked(
    ops: &FileOps,
    before: &FileState,
    dst: &Path,
) -> Result<FileState, FsError> {
    let partial = partial_path(dst);
    let result = copy_from_state(ops, before, dst, &partial);
    if result.is_err() {
        discard(&partial);
    }
    result
}

/// Copy `before.path` into `partial`, re-stat the source, and only then move the
/// partial file onto `dst`.
pub(super) fn copy_from_state(
    ops: &FileOps,
    before: &FileState,
    dst: &Path,
    partial: &Path,
) -> Result<FileState, FsError> {
    let src = before.path.as_path();
    retry::retry(ops.policy, &ops.cancel, "copy", src, || {
        copy_bytes(src, partial)
    })?;
    let after = ops.stat(src)?;
    if !before.matches(&after) {
        return Err(FsError::SourceChanged {
            path: src.to_path_buf(),
            before: Box::new(before.clone()),
            after: Box::new(after),
        });
    }
    ops.rename(partial, dst)?;
    Ok(after)
}

fn copy_bytes(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut input = File::open(src)?;
    let mut output = File::create(dst)?;
    let copied = io::copy(&mut input, &mut output)?;
    output.sync_all()?;
    Ok(copied)
}

pub(super) fn partial_path(dst: &Path) -> PathBuf {
    let name = dst
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    dst.with_file_name(format!(".{name}.partial"))
}

/// Sibling staging path used while `dst` is being assembled.
pub fn staging_path(dst: &Path) -> PathBuf {
    let name = dst
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    dst.with_file_name(format!("{STAGING_PREFIX}{name}"))
}

pub(super) fn copy_dir_atomic(ops: &FileOps, src: &Path, dst: &Path) -> Result<(), FsError> {
    let staging = staging_path(dst);
    ops.remove_all(&staging)?;
    let result = copy_dir_contents(ops, src, &staging).and_then(|()| ops.rename(&staging, dst));
    if result.is_err() {
        discard(&staging);
    }
    result
}

fn copy_dir_contents(ops: &FileOps, src: &Path, dst: &Path) -> Result<(), FsError> {
    ops.mkdir_all(dst)?;
    for entry in ops.list_dir(src)? {
        let target = dst.join(&entry.name);
        if entry.is_dir {
            copy_dir_contents(ops, &entry.path, &target)?;
        } else {
            ops.copy(&entry.path, &target)?;
        }
    }
    Ok(())
}

fn discard(path: &Path) {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(_) => return,
    };
    if let Err(err) = result {
        warn!(path = %path.display(), error = %err, "Failed to discard partial copy");
    }
}
