//! Configuration loading and management
//!
//! Handles parsing of `.taskq.toml` configuration files.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::task::{DEFAULT_TASK_TITLE, MAX_TITLE_LEN};

pub const CONFIG_FILE: &str = ".taskq.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Title rules shared by create and rename
    #[serde(default)]
    pub titles: TitlesConfig,

    /// Optimistic controller behaviour
    #[serde(default)]
    pub controller: ControllerConfig,

    /// In-memory remote used by `taskq run`
    #[serde(default)]
    pub remote: RemoteConfig,
}

/// Title normalization rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitlesConfig {
    /// Title given to a task created with a blank title
    #[serde(default = "default_title")]
    pub default: String,

    /// Maximum title length in characters
    #[serde(default = "default_max_len")]
    pub max_len: usize,
}

fn default_title() -> String {
    DEFAULT_TASK_TITLE.to_string()
}

fn default_max_len() -> usize {
    MAX_TITLE_LEN
}

impl Default for TitlesConfig {
    fn default() -> Self {
        Self {
            default: default_title(),
            max_len: default_max_len(),
        }
    }
}

/// What to do with a mutation whose key already has one in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReentryPolicy {
    /// Run it after the in-flight one settles
    #[default]
    Queue,
    /// Drop it and tell the user
    Ignore,
}

impl ReentryPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReentryPolicy::Queue => "queue",
            ReentryPolicy::Ignore => "ignore",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub reentry: ReentryPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Latency applied to every remote call unless a rule overrides it
    #[serde(default)]
    pub latency_ms: u64,
}

impl Config {
    /// Load configuration from a `.taskq.toml` file
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a directory, or return defaults
    pub fn load_from_dir(dir: &Path) -> Self {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path).unwrap_or_default()
        } else {
            Self::default()
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> crate::error::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> crate::error::Result<()> {
        self.titles.validate()?;
        Ok(())
    }
}

impl TitlesConfig {
    fn validate(&self) -> crate::error::Result<()> {
        if self.max_len == 0 {
            return Err(crate::error::Error::InvalidConfig(
                "titles.max_len must be >= 1".to_string(),
            ));
        }
        let default = self.default.trim();
        if default.is_empty() {
            return Err(crate::error::Error::InvalidConfig(
                "titles.default cannot be empty".to_string(),
            ));
        }
        if default.chars().count() > self.max_len {
            return Err(crate::error::Error::InvalidConfig(format!(
                "titles.default is longer than titles.max_len ({})",
                self.max_len
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn load_reads_all_sections() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        let content = r#"
[titles]
default = "New task"
max_len = 80

[controller]
reentry = "ignore"

[remote]
latency_ms = 120
"#;
        fs::write(&path, content.trim()).expect("write config");

        let cfg = Config::load(&path).expect("load config");
        assert_eq!(cfg.titles.default, "New task");
        assert_eq!(cfg.titles.max_len, 80);
        assert_eq!(cfg.controller.reentry, ReentryPolicy::Ignore);
        assert_eq!(cfg.remote.latency_ms, 120);
    }

    #[test]
    fn invalid_reentry_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[controller]\nreentry = \"drop\"").expect("write config");

        let err = Config::load(&path).expect_err("invalid config");
        match err {
            crate::error::Error::TomlParse(_) => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn invalid_titles_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        let content = r#"
[titles]
default = "a title that is far too long"
max_len = 5
"#;
        fs::write(&path, content.trim()).expect("write config");

        let err = Config::load(&path).expect_err("invalid config");
        match err {
            crate::error::Error::InvalidConfig(_) => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn load_from_dir_defaults_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = Config::load_from_dir(dir.path());
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.titles.default, DEFAULT_TASK_TITLE);
        assert_eq!(cfg.titles.max_len, MAX_TITLE_LEN);
        assert_eq!(cfg.controller.reentry, ReentryPolicy::Queue);
    }

    #[test]
    fn save_writes_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.toml");
        Config::default().save(&path).expect("save config");

        let written = fs::read_to_string(&path).expect("read config");
        assert!(written.contains("reentry = \"queue\""));
        assert!(written.contains("max_len = 255"));
    }
}
