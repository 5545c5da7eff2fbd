//! Configuration for the check-up monitor.

use crate::core::session::MachineConfig;
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::insight::{DEFAULT_MODEL, GEMINI_API_KEY_ENV};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the device relay
    pub relay_url: String,

    /// Duration of the observation window
    #[serde(with = "duration_secs")]
    pub window_duration: Duration,

    /// Acquisition/watcher period
    #[serde(rename = "tick_interval_ms", with = "duration_millis")]
    pub tick_interval: Duration,

    /// Maximum age of a device signal that may auto-start a check-up
    #[serde(rename = "freshness_secs", with = "duration_secs")]
    pub freshness: Duration,

    /// Upper bound for one relay request
    #[serde(rename = "fetch_timeout_ms", with = "duration_millis")]
    pub fetch_timeout: Duration,

    /// Number of saved results kept in memory
    pub history_capacity: usize,

    /// Station recorded on results (defaults to the hostname)
    pub station_id: Option<String>,

    /// IANA timezone used when displaying timestamps
    pub timezone: String,

    /// Insight backend settings
    pub insight: InsightConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_url: "http://127.0.0.1:8787".to_string(),
            window_duration: Duration::from_secs(15),
            tick_interval: Duration::from_secs(1),
            freshness: Duration::from_secs(10),
            fetch_timeout: Duration::from_millis(900),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            station_id: None,
            timezone: "UTC".to_string(),
            insight: InsightConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a file; defaults when it does not exist.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a file.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mediband")
            .join("config.json")
    }

    /// Reject values the monitor cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_duration.as_secs() == 0 {
            return Err(ConfigError::Invalid(
                "window_duration must be at least one second".to_string(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "tick_interval must be greater than zero".to_string(),
            ));
        }
        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "unknown timezone '{}'",
                self.timezone
            )));
        }
        Ok(())
    }

    /// Window length in whole seconds (= samples per complete capture).
    pub fn window_secs(&self) -> u32 {
        u32::try_from(self.window_duration.as_secs()).unwrap_or(u32::MAX)
    }

    /// Station identifier, falling back to the hostname.
    pub fn resolved_station_id(&self) -> String {
        self.station_id.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string())
        })
    }

    /// Parameters for the check-up state machine.
    pub fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            window_secs: self.window_secs(),
            freshness_ms: i64::try_from(self.freshness.as_millis()).unwrap_or(i64::MAX),
            station_id: self.resolved_station_id(),
        }
    }

    /// Display timezone; UTC when the configured name is unknown.
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}

/// Insight backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightConfig {
    /// Gemini model name
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_key_env: GEMINI_API_KEY_ENV.to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde support for Duration as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window_duration, Duration::from_secs(15));
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.freshness, Duration::from_secs(10));
        assert_eq!(config.window_secs(), 15);
        assert_eq!(config.insight.model, "gemini-2.5-flash");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"relay_url":"http://relay.local","window_duration":30,"tick_interval_ms":500}"#)
                .unwrap();
        assert_eq!(config.relay_url, "http://relay.local");
        assert_eq!(config.window_duration, Duration::from_secs(30));
        assert_eq!(config.tick_interval, Duration::from_millis(500));
        assert_eq!(config.history_capacity, DEFAULT_HISTORY_CAPACITY);
        assert_eq!(config.fetch_timeout, Duration::from_millis(900));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = std::env::temp_dir()
            .join(format!("mediband-config-{}", uuid::Uuid::new_v4()))
            .join("config.json");
        let config = Config {
            station_id: Some("triage-2".to_string()),
            timezone: "Europe/Berlin".to_string(),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.resolved_station_id(), "triage-2");
        assert_eq!(loaded.tz(), chrono_tz::Europe::Berlin);

        let machine = loaded.machine_config();
        assert_eq!(machine.window_secs, 15);
        assert_eq!(machine.freshness_ms, 10_000);
        assert_eq!(machine.station_id, "triage-2");

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = Config {
            timezone: "Mars/Olympus".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = Config {
            window_duration: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
