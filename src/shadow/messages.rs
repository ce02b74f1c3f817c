//! JSON bodies exchanged on the named-shadow topics

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShadowState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateRequest {
    pub state: ShadowState,
    #[serde(rename = "clientToken")]
    pub client_token: String,
}

/// Body of `update/accepted`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UpdateResponse {
    #[serde(default)]
    pub state: ShadowState,
    #[serde(default, rename = "clientToken")]
    pub client_token: Option<String>,
    #[serde(default)]
    pub version: Option<u64>,
}

/// Body of `update/delta`: the desired keys that differ from reported
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeltaEvent {
    #[serde(default)]
    pub state: Map<String, Value>,
    #[serde(default)]
    pub version: Option<u64>,
}

/// Body of any `*/rejected` topic
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorResponse {
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "clientToken")]
    pub client_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteRequest {
    #[serde(rename = "clientToken")]
    pub client_token: String,
}

/// Body of `delete/accepted`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeleteResponse {
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default, rename = "clientToken")]
    pub client_token: Option<String>,
}
