//! Bridge configuration
//!
//! Loaded from YAML, then adjusted by `OMNIDOCS_*` environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use handshake_engine::ClientConfig;
use popup_lifecycle::{WindowFeatures, DEFAULT_POLL_INTERVAL};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const ENV_POLL_INTERVAL: &str = "OMNIDOCS_POLL_INTERVAL";
pub const ENV_STRICT_ORIGIN: &str = "OMNIDOCS_STRICT_ORIGIN";
pub const ENV_COUNTDOWN_SECS: &str = "OMNIDOCS_COUNTDOWN_SECS";

/// Project-local configuration file, checked before the user config directory.
pub const LOCAL_CONFIG_PATH: &str = "config/omnidocs.yaml";
const CONFIG_DIR_NAME: &str = "omnidocs-bridge";
const CONFIG_FILE_NAME: &str = "config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidEnv {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Popup window layout.
    pub popup: WindowFeatures,
    /// Closure polling interval for windows without a closed event, e.g. `200ms`.
    #[serde(with = "humantime_duration")]
    pub poll_interval: Duration,
    /// Drop inbound messages whose origin differs from the popup URL's origin.
    pub strict_origin: bool,
    /// Seconds the operator has to answer a data request.
    pub countdown_secs: u64,
    pub event_capacity: usize,
    pub replay: ReplayConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            popup: WindowFeatures::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            strict_origin: false,
            countdown_secs: 30,
            event_capacity: 256,
            replay: ReplayConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReplayConfig {
    /// Popup URL used when a transcript names none.
    pub default_url: String,
    /// How long a replay step waits for the session to react.
    #[serde(with = "humantime_duration")]
    pub settle: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            default_url: "https://capture.omnidocs.example/session".to_string(),
            settle: Duration::from_secs(2),
        }
    }
}

impl BridgeConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.popup.width == 0 || self.popup.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "popup size must be non-zero (got {}x{})",
                self.popup.width, self.popup.height
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll_interval must be positive".into()));
        }
        if self.countdown_secs == 0 {
            return Err(ConfigError::Invalid("countdown_secs must be positive".into()));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be positive".into()));
        }
        let url = Url::parse(&self.replay.default_url).map_err(|err| {
            ConfigError::Invalid(format!(
                "replay.default_url {:?}: {}",
                self.replay.default_url, err
            ))
        })?;
        if !url.origin().is_tuple() {
            return Err(ConfigError::Invalid(format!(
                "replay.default_url {:?} has an opaque origin",
                self.replay.default_url
            )));
        }
        Ok(())
    }

    /// Apply `OMNIDOCS_*` overrides from the process environment. Returns the variables
    /// that took effect.
    pub fn apply_env_overrides(&mut self) -> Result<Vec<&'static str>, ConfigError> {
        self.apply_overrides_from(|key| env::var(key).ok())
    }

    pub fn apply_overrides_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Vec<&'static str>, ConfigError> {
        let mut applied = Vec::new();

        if let Some(value) = lookup(ENV_POLL_INTERVAL) {
            self.poll_interval = humantime::parse_duration(value.trim()).map_err(|err| {
                ConfigError::InvalidEnv {
                    key: ENV_POLL_INTERVAL,
                    value: value.clone(),
                    reason: err.to_string(),
                }
            })?;
            applied.push(ENV_POLL_INTERVAL);
        }

        if let Some(value) = lookup(ENV_STRICT_ORIGIN) {
            self.strict_origin = parse_flag(&value).ok_or_else(|| ConfigError::InvalidEnv {
                key: ENV_STRICT_ORIGIN,
                value: value.clone(),
                reason: "expected true/false".into(),
            })?;
            applied.push(ENV_STRICT_ORIGIN);
        }

        if let Some(value) = lookup(ENV_COUNTDOWN_SECS) {
            self.countdown_secs =
                value
                    .trim()
                    .parse()
                    .map_err(|err: std::num::ParseIntError| ConfigError::InvalidEnv {
                        key: ENV_COUNTDOWN_SECS,
                        value: value.clone(),
                        reason: err.to_string(),
                    })?;
            applied.push(ENV_COUNTDOWN_SECS);
        }

        Ok(applied)
    }

    pub fn countdown(&self) -> Duration {
        Duration::from_secs(self.countdown_secs)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            features: self.popup.clone(),
            poll_interval: self.poll_interval,
            strict_origin: self.strict_origin,
            event_capacity: self.event_capacity,
        }
    }
}

/// `./config/omnidocs.yaml` when present, otherwise the user config directory.
pub fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(LOCAL_CONFIG_PATH);
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

mod humantime_duration {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = BridgeConfig::from_yaml_str(
            "poll_interval: 500ms\npopup:\n  width: 900\nreplay:\n  settle: 3s\n",
        )
        .unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.popup.width, 900);
        assert_eq!(config.popup.height, 1000);
        assert_eq!(config.replay.settle, Duration::from_secs(3));
        assert_eq!(config.countdown_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_file_is_default() {
        assert_eq!(BridgeConfig::from_yaml_str("  \n").unwrap(), BridgeConfig::default());
    }

    #[test]
    fn bad_duration_is_a_parse_error() {
        assert!(matches!(
            BridgeConfig::from_yaml_str("poll_interval: soon"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn validation_rejects_degenerate_values() {
        let mut config = BridgeConfig::default();
        config.countdown_secs = 0;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.replay.default_url = "data:text/html,hi".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn overrides_come_from_lookup() {
        let mut config = BridgeConfig::default();
        let applied = config
            .apply_overrides_from(|key| match key {
                ENV_POLL_INTERVAL => Some("1s".into()),
                ENV_STRICT_ORIGIN => Some("yes".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(applied, vec![ENV_POLL_INTERVAL, ENV_STRICT_ORIGIN]);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert!(config.strict_origin);
        assert_eq!(config.countdown_secs, 30);
    }

    #[test]
    #[serial]
    fn process_environment_overrides() {
        env::set_var(ENV_COUNTDOWN_SECS, "45");
        let mut config = BridgeConfig::default();
        let applied = config.apply_env_overrides();
        env::remove_var(ENV_COUNTDOWN_SECS);

        assert_eq!(applied.unwrap(), vec![ENV_COUNTDOWN_SECS]);
        assert_eq!(config.countdown(), Duration::from_secs(45));
    }

    #[test]
    #[serial]
    fn invalid_environment_value_is_reported() {
        env::set_var(ENV_STRICT_ORIGIN, "maybe");
        let mut config = BridgeConfig::default();
        let result = config.apply_env_overrides();
        env::remove_var(ENV_STRICT_ORIGIN);

        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnv {
                key: ENV_STRICT_ORIGIN,
                ..
            })
        ));
    }
}
