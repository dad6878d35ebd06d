//! TOML-based application configuration.
//!
//! Stores:
//! - Remote relational store endpoint and timeouts
//! - Calendar projection settings (target calendar, time zone, lookup window)
//! - Retry policy for network calls
//! - Local database location
//!
//! Configuration is stored at `~/.config/jobdesk/config.toml`. Credentials
//! never live here; see [`crate::credentials`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::ConfigError;

/// Hosted relational store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the store. Empty means offline-only.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Calendar projection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Global publish switch; individual jobs can still opt out.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,
    /// IANA zone for timed events. Empty falls back to `TZ`, then UTC.
    #[serde(default)]
    pub time_zone: String,
    #[serde(default = "default_lookup_padding_days")]
    pub lookup_padding_days: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Bounded retry with jittered exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file. Empty means `<data dir>/jobdesk.db`.
    #[serde(default)]
    pub database_path: String,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/jobdesk/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

// Default functions
fn default_true() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_calendar_id() -> String {
    "primary".into()
}
fn default_lookup_padding_days() -> u32 {
    31
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    200
}
fn default_max_delay_ms() -> u64 {
    2000
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            calendar_id: default_calendar_id(),
            time_zone: String::new(),
            lookup_padding_days: default_lookup_padding_days(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
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
            return Err(ConfigError::UnknownKey(key.to_string()));
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current
                    .as_object_mut()
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
                let existing = obj
                    .get(part)
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        let n = value
                            .parse::<u64>()
                            .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?;
                        serde_json::Value::Number(n.into())
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        return Err(invalid("cannot set a whole section".to_string()));
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current
                .get_mut(part)
                .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        }

        Err(ConfigError::UnknownKey(key.to_string()))
    }

    fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk or return default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from an explicit path, writing defaults there when absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(_) => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
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

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
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

    /// Set a config value by key without saving. Returns error if key is unknown.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Reject values the rest of the crate cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.remote.url.is_empty() {
            url::Url::parse(&self.remote.url).map_err(|e| ConfigError::InvalidValue {
                key: "remote.url".into(),
                message: e.to_string(),
            })?;
        }
        if !self.calendar.time_zone.is_empty()
            && self.calendar.time_zone.parse::<chrono_tz::Tz>().is_err()
        {
            return Err(ConfigError::InvalidValue {
                key: "calendar.time_zone".into(),
                message: format!("unknown time zone '{}'", self.calendar.time_zone),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "retry.max_attempts".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Resolved SQLite path. `JOBDESK_DB` overrides the configured one.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        if let Ok(path) = std::env::var("JOBDESK_DB") {
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        if self.storage.database_path.is_empty() {
            Ok(data_dir()?.join("jobdesk.db"))
        } else {
            Ok(PathBuf::from(&self.storage.database_path))
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
        assert_eq!(parsed.calendar.calendar_id, "primary");
        assert_eq!(parsed.retry.max_attempts, 3);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: Config = toml::from_str("[remote]\nurl = \"https://db.example.com\"\n").unwrap();
        assert_eq!(parsed.remote.url, "https://db.example.com");
        assert_eq!(parsed.remote.timeout_secs, 30);
        assert_eq!(parsed.calendar.lookup_padding_days, 31);
        assert!(parsed.calendar.enabled);
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("calendar.enabled").as_deref(), Some("true"));
        assert_eq!(cfg.get("retry.base_delay_ms").as_deref(), Some("200"));
        assert!(cfg.get("calendar.missing_key").is_none());
    }

    #[test]
    fn set_updates_nested_values() {
        let mut cfg = Config::default();
        cfg.set("calendar.enabled", "false").unwrap();
        cfg.set("retry.max_attempts", "5").unwrap();
        cfg.set("calendar.time_zone", "Europe/Berlin").unwrap();
        assert!(!cfg.calendar.enabled);
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.calendar.time_zone, "Europe/Berlin");
    }

    #[test]
    fn set_rejects_unknown_key() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.set("calendar.nonexistent", "x"),
            Err(ConfigError::UnknownKey(_))
        ));
    }

    #[test]
    fn set_rejects_invalid_type() {
        let mut cfg = Config::default();
        assert!(cfg.set("calendar.enabled", "not_a_bool").is_err());
        assert!(cfg.set("retry.max_attempts", "many").is_err());
    }

    #[test]
    fn set_rejects_unknown_time_zone_and_keeps_old_value() {
        let mut cfg = Config::default();
        assert!(cfg.set("calendar.time_zone", "Mars/Olympus").is_err());
        assert!(cfg.calendar.time_zone.is_empty());
    }

    #[test]
    fn load_from_writes_defaults_when_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.calendar.calendar_id, "primary");
    }

    #[test]
    fn load_from_reports_parse_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[remote\nurl=").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::LoadFailed { .. })
        ));
    }
}
