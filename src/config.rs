//! Server Configuration
//!
//! Loaded from `questboard.toml` (or the file named by `QUESTBOARD_CONFIG`).
//! Every field has a default, so a missing file yields a usable config.
//! `DATABASE_URL` and `QUESTBOARD_BIND` override the file when set.

use std::path::Path;
use std::time::Duration;

use chrono::Weekday;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::progression::{OverflowPolicy, OVERFLOW_POLICY};

pub const DEFAULT_CONFIG_PATH: &str = "questboard.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("unknown weekday '{0}' for weekly_reset_day")]
    Weekday(String),

    #[error("sweep_interval_secs must be greater than zero")]
    ZeroInterval,

    #[error("completion_xp must not be negative (got {0})")]
    NegativeCompletionXp(i32),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub scheduler: SchedulerSection,
    pub progression: ProgressionSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite:questboard.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Seconds between reset sweeps; must not exceed one day
    pub sweep_interval_secs: u64,
    /// Weekday name ("sunday", "Sun", ...) on which weekly quests reset
    pub weekly_reset_day: String,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 3600,
            weekly_reset_day: "sunday".to_string(),
        }
    }
}

impl SchedulerSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn anchor_day(&self) -> Result<Weekday, ConfigError> {
        self.weekly_reset_day
            .trim()
            .parse::<Weekday>()
            .map_err(|_| ConfigError::Weekday(self.weekly_reset_day.clone()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProgressionSection {
    /// Experience granted to a knight for each completed quest
    pub completion_xp: i32,
    /// "discard" or "carry"
    pub overflow: OverflowPolicy,
}

impl Default for ProgressionSection {
    fn default() -> Self {
        Self {
            completion_xp: 50,
            overflow: OVERFLOW_POLICY,
        }
    }
}

impl Config {
    /// Resolve the config path from the environment, load it and validate
    /// the result once all overrides are applied.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("QUESTBOARD_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let mut config = Self::load_from_file(Path::new(&path))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file, falling back to defaults if it does not exist.
    /// The result is not validated.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let config = Self::from_toml(&content)?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(bind) = std::env::var("QUESTBOARD_BIND") {
            self.server.bind = bind;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.sweep_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.progression.completion_xp < 0 {
            return Err(ConfigError::NegativeCompletionXp(self.progression.completion_xp));
        }
        if self.scheduler.sweep_interval_secs > 24 * 3600 {
            warn!(
                "sweep_interval_secs={} exceeds one day; daily quests may reset late",
                self.scheduler.sweep_interval_secs
            );
        }
        self.scheduler.anchor_day()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.scheduler.sweep_interval_secs, 3600);
        assert_eq!(config.scheduler.anchor_day().unwrap(), Weekday::Sun);
        assert_eq!(config.progression.completion_xp, 50);
        assert_eq!(config.progression.overflow, OverflowPolicy::Discard);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml(
            r#"
[scheduler]
weekly_reset_day = "Monday"
"#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.scheduler.anchor_day().unwrap(), Weekday::Mon);
        assert_eq!(config.scheduler.sweep_interval_secs, 3600);
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn test_rejects_bad_weekday() {
        let config = Config::from_toml("[scheduler]\nweekly_reset_day = \"someday\"\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Weekday(_)));
    }

    #[test]
    fn test_rejects_zero_interval() {
        let config = Config::from_toml("[scheduler]\nsweep_interval_secs = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroInterval));
    }

    #[test]
    fn test_rejects_negative_completion_xp() {
        let config = Config::from_toml("[progression]\ncompletion_xp = -10\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::NegativeCompletionXp(-10)));

        // Zero is allowed: completions still count, they just grant nothing
        let config = Config::from_toml("[progression]\ncompletion_xp = 0\n").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overflow_policy_from_file() {
        let config = Config::from_toml("[progression]\noverflow = \"carry\"\n").unwrap();
        assert_eq!(config.progression.overflow, OverflowPolicy::Carry);

        assert!(Config::from_toml("[progression]\noverflow = \"hoard\"\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("questboard.toml");
        std::fs::write(
            &path,
            r#"
[database]
url = "sqlite::memory:"

[progression]
completion_xp = 25
"#,
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.progression.completion_xp, 25);

        let missing = Config::load_from_file(&temp_dir.path().join("nope.toml")).unwrap();
        assert_eq!(missing.server.bind, "0.0.0.0:5000");
    }
}
