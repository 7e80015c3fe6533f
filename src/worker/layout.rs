use std::path::{Path, PathBuf};

use crate::config::{DestinationConfig, InstanceConfig};
use crate::fsops::staging_path;

/// Fallback value that resolves to the machine's host name.
pub const AUTO_INSTANCE: &str = "auto";

/// Resolved archive tree for one pass:
/// `root/[instance/]latest_subdir/<timestamp>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationLayout {
    archive_root: PathBuf,
    latest_dir: PathBuf,
    instance: Option<String>,
}

impl DestinationLayout {
    pub fn resolve(config: &DestinationConfig) -> Self {
        let instance = resolve_instance(&config.instance);
        let archive_root = match &instance {
            Some(instance) => config.root.join(instance),
            None => config.root.clone(),
        };
        let latest_dir = archive_root.join(&config.latest_subdir);
        Self {
            archive_root,
            latest_dir,
            instance,
        }
    }

    /// Directory holding the latest collection and every tier folder.
    pub fn archive_root(&self) -> &Path {
        &self.archive_root
    }

    pub fn latest_dir(&self) -> &Path {
        &self.latest_dir
    }

    pub fn instance(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    pub fn snapshot_path(&self, name: &str) -> PathBuf {
        self.latest_dir.join(name)
    }

    pub fn staging_path(&self, name: &str) -> PathBuf {
        staging_path(&self.snapshot_path(name))
    }
}

/// Instance subdirectory: the override variable if set, else the fallback.
///
/// `auto` means the host name; an empty fallback means no subdirectory.
pub fn resolve_instance(config: &InstanceConfig) -> Option<String> {
    let from_env = if config.override_env.trim().is_empty() {
        None
    } else {
        std::env::var(config.override_env.trim())
            .ok()
            .filter(|value| !value.trim().is_empty())
    };
    let raw = match from_env {
        Some(value) => value,
        None => match config.fallback.trim() {
            "" => return None,
            AUTO_INSTANCE => gethostname::gethostname().to_string_lossy().into_owned(),
            literal => literal.to_string(),
        },
    };
    let cleaned = sanitize(raw.trim());
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Keep instance names to a single path component.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    if cleaned == "." || cleaned == ".." {
        cleaned.replace('.', "_")
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn destination(fallback: &str, override_env: &str) -> DestinationConfig {
        DestinationConfig {
            root: PathBuf::from("/dest"),
            latest_subdir: "last".to_string(),
            instance: InstanceConfig {
                override_env: override_env.to_string(),
                fallback: fallback.to_string(),
            },
        }
    }

    #[test]
    fn empty_fallback_has_no_instance_dir() {
        let layout = DestinationLayout::resolve(&destination("", ""));
        assert_eq!(layout.instance(), None);
        assert_eq!(layout.archive_root(), Path::new("/dest"));
        assert_eq!(layout.latest_dir(), Path::new("/dest/last"));
        assert_eq!(
            layout.staging_path("2024-01-01T00-00-00"),
            PathBuf::from("/dest/last/.tmp-2024-01-01T00-00-00")
        );
    }

    #[test]
    fn literal_fallback_is_used_verbatim() {
        let layout = DestinationLayout::resolve(&destination("redis-a", ""));
        assert_eq!(layout.latest_dir(), Path::new("/dest/redis-a/last"));
    }

    #[test]
    fn unset_override_falls_back() {
        let layout = DestinationLayout::resolve(&destination(
            "fallback",
            "RDB_ARCHIVER_TEST_SURELY_UNSET_INSTANCE",
        ));
        assert_eq!(layout.instance(), Some("fallback"));
    }

    #[test]
    fn auto_fallback_uses_host_name() {
        let layout = DestinationLayout::resolve(&destination(AUTO_INSTANCE, ""));
        let host = gethostname::gethostname().to_string_lossy().into_owned();
        if host.trim().is_empty() {
            assert_eq!(layout.instance(), None);
        } else {
            assert_eq!(layout.instance(), Some(sanitize(host.trim()).as_str()));
        }
    }

    #[test]
    fn instance_names_stay_single_component() {
        assert_eq!(sanitize("a/b\\c"), "a_b_c");
        assert_eq!(sanitize(".."), "__");
        assert_eq!(sanitize("node-1"), "node-1");
    }
}
