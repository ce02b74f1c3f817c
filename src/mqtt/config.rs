use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Broker connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Falls back to the device name when unset
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    pub clean_session: bool,
    /// Capacity of the rumqttc request queue
    pub request_capacity: usize,
    pub connect_timeout_secs: u64,
    pub subscribe_timeout_secs: u64,
    pub tls: Option<TlsConfig>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8883,
            client_id: None,
            keep_alive_secs: 30,
            clean_session: false,
            request_capacity: 64,
            connect_timeout_secs: 30,
            subscribe_timeout_secs: 10,
            tls: None,
        }
    }
}

/// Certificate material for mutual TLS. Files are read at startup, never generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub ca_path: PathBuf,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    /// ALPN protocol names, e.g. `x-amzn-mqtt-ca` when connecting on port 443
    #[serde(default)]
    pub alpn: Vec<String>,
}
