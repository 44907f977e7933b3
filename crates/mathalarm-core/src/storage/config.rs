//! TOML-based application configuration.
//!
//! Stores:
//! - Alarm window limits and the build profile that sets the minimum window
//! - Puzzle attempt ceiling, retention and an optional generator seed
//! - Dismissal session input and countdown settings
//!
//! Configuration is stored at `~/.config/mathalarm/config.toml`.

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::{data_dir, is_dev_env};
use crate::alarm::AlarmPolicy;
use crate::error::ConfigError;
use crate::puzzle::PuzzleSettings;
use crate::session::SessionSettings;

/// Which minimum-window rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Production,
    Debug,
}

impl Profile {
    pub fn min_duration(self) -> Duration {
        match self {
            Profile::Production => Duration::minutes(1),
            Profile::Debug => Duration::seconds(5),
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        if is_dev_env() {
            Profile::Debug
        } else {
            Profile::Production
        }
    }
}

/// Alarm window configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmConfig {
    #[serde(default)]
    pub profile: Profile,
    /// Overrides the profile minimum when set.
    #[serde(default)]
    pub min_duration_secs: Option<u64>,
    #[serde(default = "default_max_window_hours")]
    pub max_window_hours: u32,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

/// Puzzle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PuzzleConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_puzzle_retention_hours")]
    pub retention_hours: u32,
    /// Fixed generator seed (None = entropy).
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Dismissal session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_input_max_len")]
    pub input_max_len: usize,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/mathalarm/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub alarm: AlarmConfig,
    #[serde(default)]
    pub puzzle: PuzzleConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_max_window_hours() -> u32 {
    12
}
fn default_retention_days() -> u32 {
    7
}
fn default_max_attempts() -> u32 {
    5
}
fn default_puzzle_retention_hours() -> u32 {
    24
}
fn default_input_max_len() -> usize {
    10
}
fn default_tick_interval_ms() -> u64 {
    1000
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            profile: Profile::default(),
            min_duration_secs: None,
            max_window_hours: default_max_window_hours(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for PuzzleConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retention_hours: default_puzzle_retention_hours(),
            seed: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            input_max_len: default_input_max_len(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(invalid("config key is empty".into()));
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let obj = current
                .as_object_mut()
                .ok_or_else(|| invalid("unknown config key".into()))?;

            if parts.peek().is_some() {
                current = obj
                    .get_mut(part)
                    .ok_or_else(|| invalid("unknown config key".into()))?;
                continue;
            }

            let existing = obj
                .get(part)
                .ok_or_else(|| invalid("unknown config key".into()))?;

            let new_value = match existing {
                serde_json::Value::Bool(_) => serde_json::Value::Bool(
                    value
                        .parse::<bool>()
                        .map_err(|e| invalid(e.to_string()))?,
                ),
                serde_json::Value::Number(_) => value
                    .parse::<u64>()
                    .map(|n| serde_json::Value::Number(n.into()))
                    .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?,
                // Optional numbers (`null` until set): "none" clears, anything else must be a number.
                serde_json::Value::Null => {
                    if value.eq_ignore_ascii_case("none") {
                        serde_json::Value::Null
                    } else {
                        value
                            .parse::<u64>()
                            .map(|n| serde_json::Value::Number(n.into()))
                            .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?
                    }
                }
                _ => serde_json::Value::String(value.into()),
            };

            obj.insert(part.to_string(), new_value);
            return Ok(());
        }

        Err(invalid("unknown config key".into()))
    }

    fn path() -> Result<PathBuf, ConfigError> {
        data_dir()
            .map(|dir| dir.join("config.toml"))
            .map_err(|e| ConfigError::LoadFailed {
                path: PathBuf::from("~/.config/mathalarm"),
                message: e.to_string(),
            })
    }

    /// Load from disk or write and return the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(e.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value does not fit its type.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Set a config value by key and save.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.apply(key, value)?;
        self.save()
    }

    /// Window rules for the lifecycle manager.
    pub fn policy(&self) -> AlarmPolicy {
        let min_duration = self
            .alarm
            .min_duration_secs
            .map(|s| Duration::seconds(s as i64))
            .unwrap_or_else(|| self.alarm.profile.min_duration());
        AlarmPolicy {
            min_duration,
            max_duration: Duration::hours(self.alarm.max_window_hours as i64),
            alarm_retention: Duration::days(self.alarm.retention_days as i64),
            puzzle_retention: Duration::hours(self.puzzle.retention_hours as i64),
        }
    }

    pub fn puzzle_settings(&self) -> PuzzleSettings {
        PuzzleSettings {
            max_attempts: self.puzzle.max_attempts,
            seed: self.puzzle.seed,
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            input_max_len: self.session.input_max_len,
            tick_interval: std::time::Duration::from_millis(self.session.tick_interval_ms.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.alarm.max_window_hours, 12);
        assert_eq!(parsed.puzzle.max_attempts, 5);
        assert_eq!(parsed.session.input_max_len, 10);
    }

    #[test]
    fn missing_sections_take_defaults() {
        let parsed: Config = toml::from_str("[alarm]\nprofile = \"debug\"\n").unwrap();
        assert_eq!(parsed.alarm.profile, Profile::Debug);
        assert_eq!(parsed.alarm.retention_days, 7);
        assert_eq!(parsed.puzzle.retention_hours, 24);
    }

    #[test]
    fn policy_uses_profile_minimum() {
        let mut cfg = Config::default();
        cfg.alarm.profile = Profile::Production;
        assert_eq!(cfg.policy().min_duration, Duration::minutes(1));
        cfg.alarm.profile = Profile::Debug;
        assert_eq!(cfg.policy().min_duration, Duration::seconds(5));
        cfg.alarm.min_duration_secs = Some(30);
        assert_eq!(cfg.policy().min_duration, Duration::seconds(30));
        assert_eq!(cfg.policy().max_duration, Duration::hours(12));
        assert_eq!(cfg.policy().alarm_retention, Duration::days(7));
        assert_eq!(cfg.policy().puzzle_retention, Duration::days(1));
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("alarm.max_window_hours").as_deref(), Some("12"));
        assert_eq!(cfg.get("session.input_max_len").as_deref(), Some("10"));
        assert!(cfg.get("alarm.missing_key").is_none());
    }

    #[test]
    fn apply_updates_enum_and_number() {
        let mut cfg = Config::default();
        cfg.apply("alarm.profile", "debug").unwrap();
        assert_eq!(cfg.alarm.profile, Profile::Debug);
        cfg.apply("puzzle.max_attempts", "3").unwrap();
        assert_eq!(cfg.puzzle.max_attempts, 3);
    }

    #[test]
    fn apply_sets_and_clears_optional_seed() {
        let mut cfg = Config::default();
        cfg.apply("puzzle.seed", "42").unwrap();
        assert_eq!(cfg.puzzle.seed, Some(42));
        cfg.apply("puzzle.seed", "none").unwrap();
        assert_eq!(cfg.puzzle.seed, None);
    }

    #[test]
    fn apply_rejects_unknown_key_and_bad_values() {
        let mut cfg = Config::default();
        assert!(cfg.apply("alarm.nonexistent", "1").is_err());
        assert!(cfg.apply("puzzle.max_attempts", "many").is_err());
        assert!(cfg.apply("alarm.profile", "loud").is_err());
        assert!(cfg.apply("", "1").is_err());
    }

    #[test]
    fn load_from_writes_default_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.puzzle.max_attempts, 5);

        let mut edited = cfg.clone();
        edited.puzzle.max_attempts = 9;
        edited.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap().puzzle.max_attempts, 9);
    }
}
