use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Suffix appended to the inbound topic when the envelope names no response topic
pub const RESPONSE_SUFFIX: &str = "resp";

/// Body of an inbound command message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_topic: Option<String>,
}

impl CommandEnvelope {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Where the result goes: the envelope's topic, else `<inbound_topic>/resp`
    pub fn response_topic_for(&self, inbound_topic: &str) -> String {
        match self.response_topic.as_deref() {
            Some(topic) if !topic.is_empty() => topic.to_string(),
            _ => format!("{}/{}", inbound_topic, RESPONSE_SUFFIX),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Success,
    Failed,
}

/// `{"status": "Success" | "Failed", "error": <reason> | null}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandStatus {
    pub status: Status,
    pub error: Option<String>,
}

/// What gets published back: a status envelope or a raw document
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandOutcome {
    Status(CommandStatus),
    Document(Value),
}

impl CommandOutcome {
    pub fn success() -> Self {
        CommandOutcome::Status(CommandStatus {
            status: Status::Success,
            error: None,
        })
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        CommandOutcome::Status(CommandStatus {
            status: Status::Failed,
            error: Some(reason.into()),
        })
    }

    pub fn is_success(&self) -> bool {
        !matches!(
            self,
            CommandOutcome::Status(CommandStatus {
                status: Status::Failed,
                ..
            })
        )
    }

    pub fn to_value(&self) -> Value {
        match self {
            CommandOutcome::Document(document) => document.clone(),
            CommandOutcome::Status(status) => serde_json::json!({
                "status": status.status,
                "error": status.error,
            }),
        }
    }
}

/// `(target_id, action)` taken from the last two segments of a command topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAddress {
    pub target_id: String,
    pub action: String,
}

impl fmt::Display for CommandAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.target_id, self.action)
    }
}

/// Parses `cmd/<namespace>/<device>/<target_id>/<action>`
///
/// Topics outside `cmd/<namespace>` are not commands. After that root at
/// least two segments must remain, otherwise the topic carries no address
/// and `None` is returned.
pub fn parse_command_topic(topic: &str, namespace: &str) -> Option<CommandAddress> {
    let segments: Vec<&str> = topic
        .strip_prefix("cmd/")?
        .strip_prefix(namespace)?
        .strip_prefix('/')?
        .split('/')
        .collect();
    if segments.len() < 2 {
        return None;
    }

    let action = segments[segments.len() - 1];
    let target_id = segments[segments.len() - 2];
    if target_id.is_empty() || action.is_empty() {
        return None;
    }
    Some(CommandAddress {
        target_id: target_id.to_string(),
        action: action.to_string(),
    })
}
