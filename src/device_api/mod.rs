//! # Local Device API
//!
//! The logger service on the device exposes health, settings and start/stop
//! control over HTTP. The engine reaches it only through [`DeviceApi`]:
//!
//! ```text
//! GET  /api/health
//! GET  /api/settings/{sensor_id}
//! PUT  /api/settings/{sensor_id}
//! POST /api/devices/{sensor_id}?action={start|stop}
//! ```
//!
//! Every failure, transport or non-2xx, surfaces as an [`ApiError`]; callers
//! turn it into a uniform failure result and never propagate it further.

pub mod http_client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::sensors::SensorRecord;

pub use http_client::HttpDeviceApi;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Could not decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Device API unavailable: {0}")]
    Unavailable(String),
}

/// Body of `GET /api/health`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Health {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub sensors: Vec<SensorRecord>,
}

impl Health {
    /// Partial reported state for the device-level shadow
    pub fn to_state(&self) -> Map<String, Value> {
        let mut state = Map::new();
        state.insert(
            "device_id".to_string(),
            self.device_id.clone().map_or(Value::Null, Value::String),
        );
        state.insert(
            "sensors".to_string(),
            Value::Array(self.sensors.iter().map(SensorRecord::to_value).collect()),
        );
        state
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperateAction {
    Start,
    Stop,
}

impl OperateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperateAction::Start => "start",
            OperateAction::Stop => "stop",
        }
    }

    /// Whether the sensor is running after the action
    pub fn active(&self) -> bool {
        matches!(self, OperateAction::Start)
    }
}

impl From<bool> for OperateAction {
    fn from(active: bool) -> Self {
        if active {
            OperateAction::Start
        } else {
            OperateAction::Stop
        }
    }
}

impl fmt::Display for OperateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperateAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(OperateAction::Start),
            "stop" => Ok(OperateAction::Stop),
            other => Err(format!("Unsupported operate action: {}", other)),
        }
    }
}

/// Injected client for the device's local API
#[async_trait]
pub trait DeviceApi: Send + Sync {
    async fn health(&self) -> Result<Health, ApiError>;

    async fn get_settings(&self, sensor_id: &str) -> Result<Value, ApiError>;

    /// Replaces the sensor's settings and returns the settings now in effect
    async fn put_settings(&self, sensor_id: &str, settings: &Value) -> Result<Value, ApiError>;

    async fn operate(&self, sensor_id: &str, action: OperateAction) -> Result<(), ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn health_parses_logger_service_body() {
        let health: Health = serde_json::from_value(json!({
            "device_id": "pi-01",
            "sensors": [
                {"sensor_id": "cx1", "active": true},
                {"sensor_id": "cx2", "active": false}
            ]
        }))
        .expect("parses");

        assert_eq!(health.device_id.as_deref(), Some("pi-01"));
        assert_eq!(health.sensors.len(), 2);
        assert_eq!(
            Value::Object(health.to_state()),
            json!({
                "device_id": "pi-01",
                "sensors": [
                    {"sensor_id": "cx1", "active": true},
                    {"sensor_id": "cx2", "active": false}
                ]
            })
        );
    }

    #[test]
    fn operate_action_parsing() {
        assert_eq!("START".parse::<OperateAction>(), Ok(OperateAction::Start));
        assert_eq!(OperateAction::from(false), OperateAction::Stop);
        assert!("pause".parse::<OperateAction>().is_err());
    }
}
