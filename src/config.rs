use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{HiveError, Result};

pub const DEFAULT_ROOT: &str = ".hive";
pub const DEFAULT_ACTIVE_SECS: u64 = 60;
pub const DEFAULT_DEAD_SECS: u64 = 300;
pub const DEFAULT_LOCK_TTL_MIN: u64 = 120;

/// Runtime configuration shared by every store and the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub root: PathBuf,
    /// Heartbeats younger than this classify an agent as `active`.
    pub active_secs: u64,
    /// Heartbeats older than this classify an agent as `dead`.
    pub dead_secs: u64,
    pub lock_ttl_min: u64,
    pub actor: Option<String>,
}

/// Optional `<root>/config.yaml`. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    active_secs: Option<u64>,
    dead_secs: Option<u64>,
    lock_ttl_min: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            active_secs: DEFAULT_ACTIVE_SECS,
            dead_secs: DEFAULT_DEAD_SECS,
            lock_ttl_min: DEFAULT_LOCK_TTL_MIN,
            actor: None,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env(root_override: Option<&Path>) -> Result<Self> {
        Self::from_lookup(root_override, |key| std::env::var(key).ok())
    }

    /// Load configuration: defaults, then `<root>/config.yaml`, then `HIVE_*` variables.
    pub fn from_lookup<F>(root_override: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(root) = root_override {
            config.root = root.to_path_buf();
        } else if let Some(root) = get("HIVE_ROOT") {
            config.root = PathBuf::from(root);
        }

        let file_path = config.root.join("config.yaml");
        if file_path.exists() {
            let raw = fs::read_to_string(&file_path)?;
            let file: FileConfig = serde_yaml::from_str(&raw).map_err(|e| {
                HiveError::ConfigInvalid(format!("{}: {e}", file_path.display()))
            })?;
            if let Some(v) = file.active_secs {
                config.active_secs = v;
            }
            if let Some(v) = file.dead_secs {
                config.dead_secs = v;
            }
            if let Some(v) = file.lock_ttl_min {
                config.lock_ttl_min = v;
            }
        }

        if let Some(v) = get("HIVE_ACTIVE_SECS") {
            config.active_secs = parse_u64("HIVE_ACTIVE_SECS", &v)?;
        }
        if let Some(v) = get("HIVE_DEAD_SECS") {
            config.dead_secs = parse_u64("HIVE_DEAD_SECS", &v)?;
        }
        if let Some(v) = get("HIVE_LOCK_TTL_MIN") {
            config.lock_ttl_min = parse_u64("HIVE_LOCK_TTL_MIN", &v)?;
        }
        config.actor = get("HIVE_AGENT");

        if config.active_secs > config.dead_secs {
            return Err(HiveError::ConfigInvalid(format!(
                "active threshold ({}s) exceeds dead threshold ({}s)",
                config.active_secs, config.dead_secs
            )));
        }

        Ok(config)
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|_| HiveError::ConfigInvalid(format!("{key}={value} is not a non-negative integer")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = Config::from_lookup(None, lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "active_secs: 10\ndead_secs: 40\nlock_ttl_min: 5\n",
        )
        .unwrap();

        let config = Config::from_lookup(
            Some(dir.path()),
            lookup(&[("HIVE_DEAD_SECS", "90"), ("HIVE_AGENT", "ops")]),
        )
        .unwrap();
        assert_eq!(config.active_secs, 10);
        assert_eq!(config.dead_secs, 90);
        assert_eq!(config.lock_ttl_min, 5);
        assert_eq!(config.actor.as_deref(), Some("ops"));
    }

    #[test]
    fn root_comes_from_env_unless_overridden() {
        let config = Config::from_lookup(None, lookup(&[("HIVE_ROOT", "/tmp/shared")])).unwrap();
        assert_eq!(config.root, PathBuf::from("/tmp/shared"));

        let config = Config::from_lookup(
            Some(Path::new("/srv/hive")),
            lookup(&[("HIVE_ROOT", "/tmp/shared")]),
        )
        .unwrap();
        assert_eq!(config.root, PathBuf::from("/srv/hive"));
    }

    #[test]
    fn rejects_garbage_and_inverted_thresholds() {
        let err = Config::from_lookup(None, lookup(&[("HIVE_ACTIVE_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, HiveError::ConfigInvalid(_)));

        let err = Config::from_lookup(
            None,
            lookup(&[("HIVE_ACTIVE_SECS", "600"), ("HIVE_DEAD_SECS", "60")]),
        )
        .unwrap_err();
        assert!(matches!(err, HiveError::ConfigInvalid(_)));
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("config.yaml"), "heartbeat: 3\n").unwrap();
        let err = Config::from_lookup(Some(dir.path()), lookup(&[])).unwrap_err();
        assert!(matches!(err, HiveError::ConfigInvalid(_)));
    }
}
