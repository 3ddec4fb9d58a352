//! Hub configuration.
//!
//! Loading order, later layers winning:
//! 1. Compiled [`HubConfig::default()`]
//! 2. Optional TOML file
//! 3. `RELAY_`-prefixed environment variables (`RELAY_HTTP_ADDR`, ...)
//!
//! Command-line flags are applied on top by the binary.

use crate::ussd::{TerminalMatcher, DEFAULT_TERMINAL_MARKERS};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "RELAY_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// TCP address devices connect to
    pub device_addr: String,
    /// HTTP / WebSocket address for operators
    pub http_addr: String,
    /// Events buffered per observer before it is disconnected
    pub observer_queue_capacity: usize,
    /// Records retained per device in the command log
    pub command_log_capacity: usize,
    pub write_timeout_ms: u64,
    /// Sessions without an update for this long are ended
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    /// Delay between a terminal prompt and the session's end
    pub terminal_grace_ms: u64,
    pub terminal_markers: Vec<String>,
    /// Default tracing directive when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            device_addr: "0.0.0.0:9000".to_string(),
            http_addr: "0.0.0.0:5000".to_string(),
            observer_queue_capacity: 256,
            command_log_capacity: 1000,
            write_timeout_ms: 5_000,
            idle_timeout_secs: 300,
            sweep_interval_secs: 30,
            terminal_grace_ms: 3_000,
            terminal_markers: DEFAULT_TERMINAL_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            log_level: "info".to_string(),
        }
    }
}

impl HubConfig {
    /// Layered configuration source without the environment layer
    pub fn figment(path: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(HubConfig::default()));
        match path {
            Some(path) => figment.merge(Toml::file(path)),
            None => figment,
        }
    }

    /// Load defaults, then `path` (missing files are skipped), then env vars
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config: HubConfig = Self::figment(path)
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the hub unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.observer_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "observer_queue_capacity must be at least 1".into(),
            ));
        }
        if self.command_log_capacity == 0 {
            return Err(ConfigError::Invalid(
                "command_log_capacity must be at least 1".into(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs must be at least 1".into(),
            ));
        }
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "idle_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn terminal_grace(&self) -> Duration {
        Duration::from_millis(self.terminal_grace_ms)
    }

    pub fn terminal_matcher(&self) -> TerminalMatcher {
        TerminalMatcher::new(self.terminal_markers.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "relay-config-{}-{}.toml",
            name,
            std::process::id()
        ));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_defaults_round_through_figment() {
        let config: HubConfig = HubConfig::figment(None).extract().unwrap();
        assert_eq!(config, HubConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duration_helpers() {
        let config = HubConfig::default();
        assert_eq!(config.write_timeout(), Duration::from_secs(5));
        assert_eq!(config.idle_timeout(), Duration::from_secs(300));
        assert_eq!(config.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.terminal_grace(), Duration::from_secs(3));
    }

    #[test]
    fn test_partial_toml_overrides_defaults() {
        let config: HubConfig = HubConfig::figment(None)
            .merge(Toml::string(
                r#"
                http_addr = "127.0.0.1:8081"
                idle_timeout_secs = 60
                terminal_markers = ["Done"]
                "#,
            ))
            .extract()
            .unwrap();

        assert_eq!(config.http_addr, "127.0.0.1:8081");
        assert_eq!(config.idle_timeout_secs, 60);
        assert_eq!(config.device_addr, HubConfig::default().device_addr);
        assert_eq!(config.terminal_matcher().matches("All Done"), Some("Done"));
        assert_eq!(config.terminal_matcher().matches("Thank you"), None);
    }

    #[test]
    fn test_file_layer() {
        let path = temp_file("file-layer", "observer_queue_capacity = 8\n");
        let config: HubConfig = HubConfig::figment(Some(&path)).extract().unwrap();
        assert_eq!(config.observer_queue_capacity, 8);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join("relay-config-does-not-exist.toml");
        let config: HubConfig = HubConfig::figment(Some(&path)).extract().unwrap();
        assert_eq!(config, HubConfig::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let path = temp_file("malformed", "idle_timeout_secs = \"soon\"\n");
        assert!(HubConfig::load(Some(&path)).is_err());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = HubConfig {
            observer_queue_capacity: 0,
            ..HubConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = HubConfig {
            sweep_interval_secs: 0,
            ..HubConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
