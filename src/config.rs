//! Engine configuration.
//!
//! One [`EngineConfig`] is built per command invocation (from an optional
//! YAML file plus CLI overrides) and passed down to every component that
//! needs a knob. Nothing here is global.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Admission control for AWS control-plane requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlPlaneConfig {
    /// Token refill rate. Kept below the documented MSK API limits.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Bucket capacity.
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Extra attempts for throttled calls, on top of the SDK retryer.
    #[serde(default = "default_max_throttle_retries")]
    pub max_throttle_retries: u32,
}

/// Broker connection settings shared by every auth mode.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    #[serde(default = "default_metadata_retries")]
    pub metadata_retries: u32,

    #[serde(default = "default_metadata_retry_backoff_ms")]
    pub metadata_retry_backoff_ms: u64,

    #[serde(default = "default_client_id")]
    pub client_id: String,
}

/// Self-managed Kafka Connect topic scanning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScanConfig {
    #[serde(default = "default_connect_configs_topic")]
    pub connect_configs_topic: String,

    #[serde(default = "default_connect_status_topic")]
    pub connect_status_topic: String,

    /// Longest wait for a single record while reading the configs topic.
    #[serde(default = "default_config_read_timeout_ms")]
    pub config_read_timeout_ms: u64,

    /// Wall-clock budget per status topic partition.
    #[serde(default = "default_status_read_timeout_ms")]
    pub status_read_timeout_ms: u64,

    #[serde(default = "default_status_message_cap")]
    pub status_message_cap: u64,
}

/// State file persistence.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateConfig {
    #[serde(default = "default_save_max_attempts")]
    pub save_max_attempts: u32,

    #[serde(default = "default_save_base_delay_ms")]
    pub save_base_delay_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_requests_per_second() -> u32 {
    8
}

fn default_burst() -> u32 {
    1
}

fn default_max_throttle_retries() -> u32 {
    5
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_keepalive_secs() -> u64 {
    60
}

fn default_metadata_retries() -> u32 {
    3
}

fn default_metadata_retry_backoff_ms() -> u64 {
    250
}

fn default_client_id() -> String {
    "kafka-fleet-scan".to_string()
}

fn default_connect_configs_topic() -> String {
    "connect-configs".to_string()
}

fn default_connect_status_topic() -> String {
    "connect-status".to_string()
}

fn default_config_read_timeout_ms() -> u64 {
    10_000
}

fn default_status_read_timeout_ms() -> u64 {
    5_000
}

fn default_status_message_cap() -> u64 {
    1_000
}

fn default_save_max_attempts() -> u32 {
    3
}

fn default_save_base_delay_ms() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            max_throttle_retries: default_max_throttle_retries(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            keepalive_secs: default_keepalive_secs(),
            metadata_retries: default_metadata_retries(),
            metadata_retry_backoff_ms: default_metadata_retry_backoff_ms(),
            client_id: default_client_id(),
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn metadata_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.metadata_retry_backoff_ms)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            connect_configs_topic: default_connect_configs_topic(),
            connect_status_topic: default_connect_status_topic(),
            config_read_timeout_ms: default_config_read_timeout_ms(),
            status_read_timeout_ms: default_status_read_timeout_ms(),
            status_message_cap: default_status_message_cap(),
        }
    }
}

impl ScanConfig {
    pub fn config_read_timeout(&self) -> Duration {
        Duration::from_millis(self.config_read_timeout_ms)
    }

    pub fn status_read_timeout(&self) -> Duration {
        Duration::from_millis(self.status_read_timeout_ms)
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            save_max_attempts: default_save_max_attempts(),
            save_base_delay_ms: default_save_base_delay_ms(),
        }
    }
}

impl StateConfig {
    pub fn save_base_delay(&self) -> Duration {
        Duration::from_millis(self.save_base_delay_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.control_plane.requests_per_second == 0 {
            return Err(ConfigError::Invalid(
                "control_plane.requests_per_second must be at least 1".to_string(),
            ));
        }
        if self.control_plane.burst == 0 {
            return Err(ConfigError::Invalid(
                "control_plane.burst must be at least 1".to_string(),
            ));
        }
        if self.state.save_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "state.save_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.scan.connect_configs_topic.is_empty() || self.scan.connect_status_topic.is_empty()
        {
            return Err(ConfigError::Invalid(
                "scan topic names must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = EngineConfig::from_yaml("{}").unwrap();
        assert_eq!(config.control_plane.requests_per_second, 8);
        assert_eq!(config.control_plane.burst, 1);
        assert_eq!(config.control_plane.max_throttle_retries, 5);
        assert_eq!(config.scan.status_message_cap, 1000);
        assert_eq!(config.scan.connect_configs_topic, "connect-configs");
        assert_eq!(config.network.client_id, "kafka-fleet-scan");
    }

    #[test]
    fn test_partial_override() {
        let yaml = r#"
control_plane:
  requests_per_second: 4
scan:
  status_message_cap: 50
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.control_plane.requests_per_second, 4);
        assert_eq!(config.control_plane.burst, 1);
        assert_eq!(config.scan.status_message_cap, 50);
        assert_eq!(config.scan.status_read_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_rate_rejected() {
        let yaml = "control_plane:\n  requests_per_second: 0\n";
        assert!(matches!(
            EngineConfig::from_yaml(yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_zero_save_attempts_rejected() {
        let yaml = "state:\n  save_max_attempts: 0\n";
        assert!(EngineConfig::from_yaml(yaml).is_err());
    }
}
