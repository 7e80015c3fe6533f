use std::path::PathBuf;

use thiserror::Error;

use crate::app_dirs::AppDirError;
use crate::retention::schedule::ScheduleError;

/// Errors that may occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The file is not valid YAML for the config model.
    #[error("Invalid config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    /// A value parsed but cannot be used.
    #[error("Invalid config: {0}")]
    Invalid(String),
    /// A retention rule carries an unparseable schedule.
    #[error("Invalid schedule for retention rule {rule}: {source}")]
    Schedule { rule: String, source: ScheduleError },
    /// No default config location could be resolved.
    #[error("Unable to resolve a config location: {0}")]
    Location(#[from] AppDirError),
}

impl ConfigError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        ConfigError::Invalid(reason.into())
    }
}
