pub mod push_protocol;
pub mod rest;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            "tool" => Ok(MessageRole::Tool),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

/// Kind of user-initiated operation; picks the submission endpoint and the
/// start/complete frame pair the backend emits for it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Act,
    Chat,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Act => "act",
            RequestKind::Chat => "chat",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "act" => Ok(RequestKind::Act),
            "chat" => Ok(RequestKind::Chat),
            other => Err(format!("Unknown request kind: {other}")),
        }
    }
}

/// Lifecycle of a tracked request. Ordering is meaningful: a record only
/// ever moves forward (`Created < Running < terminal`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Created,
    Running,
    Completed,
    Failed,
}

impl Default for RequestStatus {
    fn default() -> Self {
        Self::Created
    }
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Created => "created",
            RequestStatus::Running => "running",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            RequestStatus::Created => 0,
            RequestStatus::Running => 1,
            RequestStatus::Completed | RequestStatus::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` is a lawful forward transition.
    pub fn can_advance_to(&self, next: RequestStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Idle,
    Deploying,
    Ready,
    Error,
}

impl Default for DeploymentStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Idle => "idle",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Ready => "ready",
            DeploymentStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Ready | DeploymentStatus::Error)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
    /// Retries exhausted; no further automatic reconnects.
    Failed,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Closed
    }
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Initializing,
    Active,
    Failed,
}

impl Default for ProjectStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Initializing => "initializing",
            ProjectStatus::Active => "active",
            ProjectStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "initializing" | "init" => Ok(ProjectStatus::Initializing),
            "active" | "ready" => Ok(ProjectStatus::Active),
            "failed" | "error" => Ok(ProjectStatus::Failed),
            other => Err(format!("Unknown project status: {other}")),
        }
    }
}

pub const MESSAGE_TYPE_CHAT: &str = "chat";
pub const MESSAGE_TYPE_TOOL_USE: &str = "tool_use";
pub const MESSAGE_TYPE_TOOL_RESULT: &str = "tool_result";
pub const MESSAGE_TYPE_THINKING: &str = "thinking";

/// One chat/tool entry as the backend delivers it, both over the push
/// channel and from the message history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayMessage {
    pub id: String,
    pub role: MessageRole,
    #[serde(
        default = "default_message_type",
        deserialize_with = "deserialize_message_type"
    )]
    pub message_type: String,
    pub content: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub parent_message_id: Option<String>,
    #[serde(default, alias = "metadata")]
    pub metadata_json: Option<Value>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl DisplayMessage {
    pub fn is_tool_use(&self) -> bool {
        self.message_type == MESSAGE_TYPE_TOOL_USE || self.role == MessageRole::Tool
    }

    /// Messages flagged `hidden_from_ui` by the backend never reach the
    /// transcript.
    pub fn is_hidden(&self) -> bool {
        self.metadata_json
            .as_ref()
            .and_then(|meta| meta.get("hidden_from_ui"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

fn default_message_type() -> String {
    MESSAGE_TYPE_CHAT.to_string()
}

fn deserialize_message_type<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value
        .filter(|kind| !kind.trim().is_empty())
        .unwrap_or_else(default_message_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_status_only_moves_forward() {
        assert!(RequestStatus::Created.can_advance_to(RequestStatus::Running));
        assert!(RequestStatus::Created.can_advance_to(RequestStatus::Failed));
        assert!(RequestStatus::Running.can_advance_to(RequestStatus::Completed));
        assert!(!RequestStatus::Running.can_advance_to(RequestStatus::Created));
        assert!(!RequestStatus::Completed.can_advance_to(RequestStatus::Failed));
        assert!(!RequestStatus::Failed.can_advance_to(RequestStatus::Running));
    }

    #[test]
    fn display_message_defaults_missing_type_to_chat() {
        let message: DisplayMessage = serde_json::from_str(
            r#"{"id":"m1","role":"assistant","message_type":null,"content":"hi"}"#,
        )
        .expect("parse message");
        assert_eq!(message.message_type, MESSAGE_TYPE_CHAT);
        assert!(!message.is_tool_use());
    }

    #[test]
    fn hidden_flag_is_read_from_metadata() {
        let message: DisplayMessage = serde_json::from_value(serde_json::json!({
            "id": "m2",
            "role": "system",
            "message_type": "system",
            "content": "internal",
            "metadata": {"hidden_from_ui": true}
        }))
        .expect("parse message");
        assert!(message.is_hidden());
    }

    #[test]
    fn project_status_accepts_backend_spellings() {
        assert_eq!(
            "initializing".parse::<ProjectStatus>(),
            Ok(ProjectStatus::Initializing)
        );
        assert_eq!(" Active ".parse::<ProjectStatus>(), Ok(ProjectStatus::Active));
        assert_eq!("failed".parse::<ProjectStatus>(), Ok(ProjectStatus::Failed));
        assert!("bogus".parse::<ProjectStatus>().is_err());
    }
}
