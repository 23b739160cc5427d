use serde::{Deserialize, Serialize};

use crate::{DeploymentStatus, RequestKind};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveRequestsResponse {
    #[serde(rename = "hasActiveRequests", default)]
    pub has_active_requests: bool,
    #[serde(rename = "activeCount", default)]
    pub active_count: u32,
}

/// How the hosting provider's status string reads for this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteDeploymentState {
    InFlight,
    Ready,
    Failed,
    Unknown,
}

impl RemoteDeploymentState {
    pub fn parse(status: &str) -> Self {
        match status.trim().to_ascii_uppercase().as_str() {
            "QUEUED" | "INITIALIZING" | "BUILDING" => RemoteDeploymentState::InFlight,
            "READY" => RemoteDeploymentState::Ready,
            "ERROR" | "CANCELED" | "CANCELLED" => RemoteDeploymentState::Failed,
            _ => RemoteDeploymentState::Unknown,
        }
    }

    pub fn as_deployment_status(&self) -> Option<DeploymentStatus> {
        match self {
            RemoteDeploymentState::InFlight => Some(DeploymentStatus::Deploying),
            RemoteDeploymentState::Ready => Some(DeploymentStatus::Ready),
            RemoteDeploymentState::Failed => Some(DeploymentStatus::Error),
            RemoteDeploymentState::Unknown => None,
        }
    }
}

/// Body of `GET /api/projects/{id}/vercel/deployment/current`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentDeployment {
    #[serde(default)]
    pub has_deployment: bool,
    #[serde(default)]
    pub deployment_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub deployment_url: Option<String>,
    #[serde(default)]
    pub last_deployment_url: Option<String>,
}

impl CurrentDeployment {
    pub fn remote_state(&self) -> RemoteDeploymentState {
        if !self.has_deployment {
            return RemoteDeploymentState::Unknown;
        }
        self.status
            .as_deref()
            .map(RemoteDeploymentState::parse)
            .unwrap_or(RemoteDeploymentState::Unknown)
    }

    pub fn is_in_flight(&self) -> bool {
        self.remote_state() == RemoteDeploymentState::InFlight
    }

    /// The URL of a confirmed deployment record: the live one when present,
    /// otherwise the last one the backend remembers.
    pub fn confirmed_url(&self) -> Option<&str> {
        self.deployment_url
            .as_deref()
            .or(self.last_deployment_url.as_deref())
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitRequest {
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli_preference: Option<String>,
    #[serde(default)]
    pub is_initial_prompt: bool,
    pub execution_mode: RequestKind,
    pub request_id: String,
}

impl SubmitRequest {
    pub fn new(kind: RequestKind, request_id: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            conversation_id: None,
            cli_preference: None,
            is_initial_prompt: false,
            execution_mode: kind,
            request_id: request_id.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitResponse {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Reply to a publish call. `deployment_url` here is the provider's
/// predicted address and is never treated as live.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub deployment_url: Option<String>,
    #[serde(default)]
    pub deployment_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveSession {
    pub session_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub cli_type: Option<String>,
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
}

impl ActiveSession {
    pub fn is_running(&self) -> bool {
        match self.status.as_deref().map(str::trim) {
            None => true,
            Some(status) => matches!(status, "active" | "running" | "pending"),
        }
    }
}
