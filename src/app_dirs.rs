//! Application directory helpers anchored to a single `rdb-archiver` folder.
//!
//! Only the default config file location lives here. Defaults to the OS config
//! directory (e.g. `~/.config` on Linux) and honours an `RDB_ARCHIVER_HOME`
//! override for containers and tests.

use std::path::PathBuf;

use directories::BaseDirs;
use thiserror::Error;

/// Name of the application directory that lives under the OS config root.
pub const APP_DIR_NAME: &str = "rdb-archiver";
/// Environment variable that replaces the whole application directory.
pub const APP_HOME_ENV: &str = "RDB_ARCHIVER_HOME";

/// Errors that can occur while resolving or preparing application directories.
#[derive(Debug, Error)]
pub enum AppDirError {
    /// No suitable base config directory could be resolved.
    #[error("No suitable base config directory available for application files")]
    NoBaseDir,
    /// Failed to create the application directory.
    #[error("Failed to create application directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Return the application directory, creating it if needed.
pub fn app_root_dir() -> Result<PathBuf, AppDirError> {
    let path = app_root_path().ok_or(AppDirError::NoBaseDir)?;
    std::fs::create_dir_all(&path).map_err(|source| AppDirError::CreateDir {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

fn app_root_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(APP_HOME_ENV)
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }
    BaseDirs::new().map(|dirs| dirs.config_dir().join(APP_DIR_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_root_ends_with_app_dir_name() {
        if std::env::var(APP_HOME_ENV).is_ok() {
            return;
        }
        if let Some(path) = app_root_path() {
            assert!(path.ends_with(APP_DIR_NAME));
        }
    }
}
