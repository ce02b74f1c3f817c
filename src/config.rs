//! Agent configuration
//!
//! Loaded from TOML, then overridden from the environment, then validated:
//!
//! ```toml
//! [device]
//! name = "pi-01"
//! endpoint = "localhost:5000"
//!
//! [mqtt]
//! host = "xxxx-ats.iot.eu-central-1.amazonaws.com"
//! port = 8883
//!
//! [mqtt.tls]
//! ca_path = "/etc/sensortwin/AmazonRootCA1.pem"
//! cert_path = "/etc/sensortwin/device.pem.crt"
//! key_path = "/etc/sensortwin/private.pem.key"
//!
//! [commands]
//! namespace = "vibration"
//!
//! [sync]
//! heartbeat_interval_secs = 10
//! ```
//!
//! Environment overrides: `DEVICE_NAME`, `DEVICE_ENDPOINT`, `AWS_IOT_ENDPOINT`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::heartbeat::HeartbeatSettings;
use crate::mqtt::config::MqttConfig;
use crate::orchestrator::AgentSettings;

const CONFIG_DIR: &str = "sensortwin";
const CONFIG_FILE: &str = "agent.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Thing name of the device at the shadow service
    pub name: String,
    /// `host:port` of the local logger service
    pub endpoint: String,
    pub http_timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            endpoint: "localhost:5000".to_string(),
            http_timeout_secs: 10,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct CommandsConfig {
    pub namespace: String,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            namespace: "vibration".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub heartbeat_interval_secs: u64,
    pub startup_delay_secs: u64,
    pub delete_timeout_secs: u64,
    pub bootstrap_attempts: u32,
    pub bootstrap_backoff_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 60,
            startup_delay_secs: 0,
            delete_timeout_secs: 10,
            bootstrap_attempts: 5,
            bootstrap_backoff_ms: 500,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub device: DeviceConfig,
    pub mqtt: MqttConfig,
    pub commands: CommandsConfig,
    pub sync: SyncConfig,
}

impl AgentConfig {
    /// `<config dir>/sensortwin/agent.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Loads, applies environment overrides and validates
    ///
    /// An explicit `path` must exist. Without one the default location is
    /// tried and defaults are used when nothing is there.
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                if !Self::exists(path).await? {
                    return Err(ConfigError::NotFound(path.to_path_buf()));
                }
                Self::read(path).await?
            }
            None => {
                let default_path = Self::default_path();
                let found = match &default_path {
                    Some(path) => Self::exists(path).await?,
                    None => false,
                };
                match default_path {
                    Some(path) if found => Self::read(&path).await?,
                    _ => {
                        warn!("No config file found, using defaults");
                        Self::default()
                    }
                }
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    async fn exists(path: &Path) -> Result<bool, ConfigError> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn read(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading config from {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Applies `DEVICE_NAME`, `DEVICE_ENDPOINT` and `AWS_IOT_ENDPOINT`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(name) = lookup("DEVICE_NAME") {
            debug!("Device name from environment");
            self.device.name = name;
        }
        if let Some(endpoint) = lookup("DEVICE_ENDPOINT") {
            debug!("Device endpoint from environment");
            self.device.endpoint = endpoint;
        }
        if let Some(host) = lookup("AWS_IOT_ENDPOINT") {
            debug!("Broker host from environment");
            self.mqtt.host = host;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "device.name is empty (set it or DEVICE_NAME)".to_string(),
            ));
        }
        if self.device.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("device.endpoint is empty".to_string()));
        }
        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.host is empty".to_string()));
        }
        if self.commands.namespace.trim().is_empty() || self.commands.namespace.contains('/') {
            return Err(ConfigError::Invalid(
                "commands.namespace must be a single topic level".to_string(),
            ));
        }

        let intervals = [
            ("sync.heartbeat_interval_secs", self.sync.heartbeat_interval_secs),
            ("sync.delete_timeout_secs", self.sync.delete_timeout_secs),
            ("device.http_timeout_secs", self.device.http_timeout_secs),
            ("mqtt.keep_alive_secs", self.mqtt.keep_alive_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{} must be greater than zero", name)));
        }
        Ok(())
    }

    pub fn client_id(&self) -> String {
        self.mqtt
            .client_id
            .clone()
            .unwrap_or_else(|| self.device.name.clone())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.device.http_timeout_secs)
    }
}

impl From<&AgentConfig> for AgentSettings {
    fn from(config: &AgentConfig) -> Self {
        AgentSettings {
            device_name: config.device.name.clone(),
            command_namespace: config.commands.namespace.clone(),
            heartbeat: HeartbeatSettings {
                interval: Duration::from_secs(config.sync.heartbeat_interval_secs),
            },
            startup_delay: Duration::from_secs(config.sync.startup_delay_secs),
            delete_timeout: Duration::from_secs(config.sync.delete_timeout_secs),
            bootstrap_attempts: config.sync.bootstrap_attempts,
            bootstrap_backoff: Duration::from_millis(config.sync.bootstrap_backoff_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = AgentConfig::from_toml(
            r#"
            [device]
            name = "pi-01"

            [sync]
            heartbeat_interval_secs = 10
            "#,
        )
        .expect("parses");

        assert_eq!(config.device.name, "pi-01");
        assert_eq!(config.device.endpoint, "localhost:5000");
        assert_eq!(config.sync.heartbeat_interval_secs, 10);
        assert_eq!(config.sync.delete_timeout_secs, 10);
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.commands.namespace, "vibration");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tls_section_is_parsed() {
        let config = AgentConfig::from_toml(
            r#"
            [device]
            name = "pi-01"

            [mqtt.tls]
            ca_path = "/etc/ca.pem"
            alpn = ["x-amzn-mqtt-ca"]
            "#,
        )
        .expect("parses");

        let tls = config.mqtt.tls.expect("tls section");
        assert_eq!(tls.ca_path, PathBuf::from("/etc/ca.pem"));
        assert_eq!(tls.cert_path, None);
        assert_eq!(tls.alpn, vec!["x-amzn-mqtt-ca".to_string()]);
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("DEVICE_NAME", "pi-07"),
            ("AWS_IOT_ENDPOINT", "abc-ats.iot.eu-central-1.amazonaws.com"),
        ]
        .into_iter()
        .collect();
        let mut config = AgentConfig::default();

        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.device.name, "pi-07");
        assert_eq!(config.mqtt.host, "abc-ats.iot.eu-central-1.amazonaws.com");
        assert_eq!(config.device.endpoint, "localhost:5000");
        assert_eq!(config.client_id(), "pi-07");
    }

    #[test]
    fn validation_rejects_missing_name_and_zero_intervals() {
        let config = AgentConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AgentConfig::default();
        config.device.name = "pi-01".to_string();
        config.sync.heartbeat_interval_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn settings_carry_durations() {
        let mut config = AgentConfig::default();
        config.device.name = "pi-01".to_string();
        config.sync.bootstrap_backoff_ms = 250;

        let settings = AgentSettings::from(&config);
        assert_eq!(settings.device_name, "pi-01");
        assert_eq!(settings.heartbeat.interval, Duration::from_secs(60));
        assert_eq!(settings.bootstrap_backoff, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn explicit_missing_file_is_an_error() {
        let result = AgentConfig::load(Some(Path::new("/nonexistent/sensortwin.toml"))).await;
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}
