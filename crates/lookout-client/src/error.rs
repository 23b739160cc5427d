use lookout_core::push_protocol::FrameError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("response decode failed: {0}")]
    Decode(String),
    #[error("submission rejected: {0}")]
    SubmissionRejected(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("project view is closed")]
    ViewClosed,
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl SyncError {
    /// User-facing line for failures surfaced from imperative actions.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::SubmissionRejected(reason) => reason.clone(),
            SyncError::UnexpectedStatus { status, body } if body.trim().is_empty() => {
                format!("backend answered {status}")
            }
            SyncError::UnexpectedStatus { body, .. } => body.trim().to_string(),
            other => other.to_string(),
        }
    }
}
