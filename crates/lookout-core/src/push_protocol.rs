use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{DisplayMessage, RequestKind};

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

/// Every frame kind the backend emits on the project event stream. The set
/// is closed: kinds this client has no use for land on `Unknown` instead of
/// failing the decode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushFrame {
    Message {
        data: DisplayMessage,
        #[serde(default)]
        timestamp: Option<String>,
    },
    ActStart {
        #[serde(default)]
        data: SessionStartPayload,
    },
    ActComplete {
        #[serde(default)]
        data: SessionCompletePayload,
    },
    ChatStart {
        #[serde(default)]
        data: SessionStartPayload,
    },
    ChatComplete {
        #[serde(default)]
        data: SessionCompletePayload,
    },
    ProjectStatus {
        data: ProjectStatusPayload,
    },
    MessagesCleared {
        #[serde(default)]
        conversation_id: Option<String>,
    },
    CliOutput {
        #[serde(default)]
        output: String,
        #[serde(default)]
        cli_type: Option<String>,
    },
    Status {
        status: String,
        #[serde(default)]
        data: Value,
    },
    #[serde(other)]
    Unknown,
}

impl PushFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            PushFrame::Message { .. } => "message",
            PushFrame::ActStart { .. } => "act_start",
            PushFrame::ActComplete { .. } => "act_complete",
            PushFrame::ChatStart { .. } => "chat_start",
            PushFrame::ChatComplete { .. } => "chat_complete",
            PushFrame::ProjectStatus { .. } => "project_status",
            PushFrame::MessagesCleared { .. } => "messages_cleared",
            PushFrame::CliOutput { .. } => "cli_output",
            PushFrame::Status { .. } => "status",
            PushFrame::Unknown => "unknown",
        }
    }

    /// Correlation token carried by the frame, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            PushFrame::Message { data, .. } => data.request_id.as_deref(),
            PushFrame::ActStart { data } | PushFrame::ChatStart { data } => {
                data.request_id.as_deref()
            }
            PushFrame::ActComplete { data } | PushFrame::ChatComplete { data } => {
                data.request_id.as_deref()
            }
            _ => None,
        }
    }

    /// Lifts the request lifecycle frames into one shape so push-driven
    /// transitions can go through the same code path as poll-driven ones.
    pub fn lifecycle(&self) -> Option<LifecycleSignal<'_>> {
        match self {
            PushFrame::ActStart { data } => Some(LifecycleSignal::Started {
                kind: RequestKind::Act,
                payload: data,
            }),
            PushFrame::ChatStart { data } => Some(LifecycleSignal::Started {
                kind: RequestKind::Chat,
                payload: data,
            }),
            PushFrame::ActComplete { data } => Some(LifecycleSignal::Completed {
                kind: RequestKind::Act,
                payload: data,
            }),
            PushFrame::ChatComplete { data } => Some(LifecycleSignal::Completed {
                kind: RequestKind::Chat,
                payload: data,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LifecycleSignal<'a> {
    Started {
        kind: RequestKind,
        payload: &'a SessionStartPayload,
    },
    Completed {
        kind: RequestKind,
        payload: &'a SessionCompletePayload,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStartPayload {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionCompletePayload {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SessionCompletePayload {
    pub fn is_successful(&self) -> bool {
        let failed_status = self
            .status
            .as_deref()
            .map(|status| matches!(status.trim(), "failed" | "error"))
            .unwrap_or(false);
        !failed_status && self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectStatusPayload {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

pub fn encode_frame<T: Serialize>(value: &T, max_frame_bytes: usize) -> Result<String, FrameError> {
    let encoded = serde_json::to_string(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

pub fn decode_frame(text: &str, max_frame_bytes: usize) -> Result<PushFrame, FrameError> {
    let raw = text.trim_end_matches(['\r', '\n']);
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_str(raw).map_err(|err| FrameError::Decode(err.to_string()))
}
