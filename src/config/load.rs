use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::warn;

use crate::app_dirs;

use super::{CONFIG_FILE_NAME, CONFIG_PATH_ENV, Config, ConfigError, LOG_LEVEL_ENV, RETENTION_LAST_ENV};

static ENV_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\(([A-Za-z0-9_]+)\)").expect("env placeholder regex must compile")
});

/// Read, expand, parse, override and validate the config at `path`.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&text, path)
}

/// Parse raw config text; `origin` only labels parse errors.
pub fn parse_config(text: &str, origin: &Path) -> Result<Config, ConfigError> {
    let expanded = expand_env_vars(text);
    let mut config: Config =
        serde_yaml::from_str(&expanded).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Replace every `$(NAME)` with the value of environment variable `NAME`.
///
/// Unset variables expand to the empty string.
pub fn expand_env_vars(text: &str) -> String {
    ENV_PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| {
            std::env::var(map_env_key(&caps[1])).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(windows)]
fn map_env_key(key: &str) -> &str {
    if key == "HOSTNAME" { "COMPUTERNAME" } else { key }
}

#[cfg(not(windows))]
fn map_env_key(key: &str) -> &str {
    key
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(level) = std::env::var(LOG_LEVEL_ENV)
        && !level.trim().is_empty()
    {
        config.logging.level = level.trim().to_string();
    }
    if let Ok(value) = std::env::var(RETENTION_LAST_ENV)
        && !value.trim().is_empty()
    {
        match value.trim().parse::<usize>() {
            Ok(count) => config.retention.last_count = count,
            Err(_) => warn!(
                variable = RETENTION_LAST_ENV,
                value = %value,
                "Ignoring non-numeric retention override"
            ),
        }
    }
}

/// Resolve the config file path: explicit argument, then environment, then
/// the application directory.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }
    Ok(app_dirs::app_root_dir()?.join(CONFIG_FILE_NAME))
}
