//! Backend REST surface consumed by the sync engine.

use async_trait::async_trait;
use lookout_core::rest::{
    ActiveRequestsResponse, ActiveSession, CurrentDeployment, PublishResponse, SubmitRequest,
    SubmitResponse,
};
use lookout_core::{DisplayMessage, RequestKind};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::config::SyncConfig;
use crate::error::SyncError;

pub const DEFAULT_HISTORY_LIMIT: usize = 200;

#[async_trait]
pub trait ProjectApi: Send + Sync {
    async fn active_requests(&self, project_id: &str) -> Result<ActiveRequestsResponse, SyncError>;

    async fn current_deployment(&self, project_id: &str) -> Result<CurrentDeployment, SyncError>;

    async fn submit(
        &self,
        project_id: &str,
        body: &SubmitRequest,
    ) -> Result<SubmitResponse, SyncError>;

    async fn publish(&self, project_id: &str) -> Result<PublishResponse, SyncError>;

    async fn messages(
        &self,
        project_id: &str,
        conversation_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DisplayMessage>, SyncError>;

    /// `None` when the backend has no running session for the project.
    async fn active_session(&self, project_id: &str) -> Result<Option<ActiveSession>, SyncError>;
}

#[derive(Clone)]
pub struct HttpProjectApi {
    http: Client,
    config: SyncConfig,
}

impl HttpProjectApi {
    /// Every call is capped at `config.request_timeout`, so a backend that
    /// accepts the connection and never answers cannot stall a fetch.
    pub fn new(config: SyncConfig) -> Result<Self, SyncError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    fn submit_path(project_id: &str, kind: RequestKind) -> String {
        format!("api/chat/{project_id}/{}", kind.as_str())
    }
}

#[async_trait]
impl ProjectApi for HttpProjectApi {
    async fn active_requests(&self, project_id: &str) -> Result<ActiveRequestsResponse, SyncError> {
        let url = self
            .config
            .api_url(&format!("api/chat/{project_id}/requests/active"))?;
        let res = self.http.get(url).send().await?;
        read_json(res).await
    }

    async fn current_deployment(&self, project_id: &str) -> Result<CurrentDeployment, SyncError> {
        let url = self
            .config
            .api_url(&format!("api/projects/{project_id}/vercel/deployment/current"))?;
        let res = self.http.get(url).send().await?;
        read_json(res).await
    }

    async fn submit(
        &self,
        project_id: &str,
        body: &SubmitRequest,
    ) -> Result<SubmitResponse, SyncError> {
        let url = self
            .config
            .api_url(&Self::submit_path(project_id, body.execution_mode))?;
        let res = self.http.post(url).json(body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(SyncError::SubmissionRejected(rejection_reason(status, &body)));
        }
        read_json(res).await
    }

    async fn publish(&self, project_id: &str) -> Result<PublishResponse, SyncError> {
        let url = self
            .config
            .api_url(&format!("api/projects/{project_id}/vercel/deploy"))?;
        let res = self
            .http
            .post(url)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(SyncError::SubmissionRejected(rejection_reason(status, &body)));
        }
        read_json(res).await
    }

    async fn messages(
        &self,
        project_id: &str,
        conversation_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DisplayMessage>, SyncError> {
        let mut url = self
            .config
            .api_url(&format!("api/chat/{project_id}/messages"))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(conversation_id) = conversation_id {
                query.append_pair("conversation_id", conversation_id);
            }
            query.append_pair("limit", &limit.to_string());
        }
        let res = self.http.get(url).send().await?;
        read_json(res).await
    }

    async fn active_session(&self, project_id: &str) -> Result<Option<ActiveSession>, SyncError> {
        let url = self
            .config
            .api_url(&format!("api/chat/{project_id}/active-session"))?;
        let res = self.http.get(url).send().await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_json::<ActiveSession>(res).await.map(Some)
    }
}

async fn read_json<T: DeserializeOwned>(res: Response) -> Result<T, SyncError> {
    let status = res.status();
    let body = res.text().await?;
    if !status.is_success() {
        return Err(SyncError::UnexpectedStatus { status, body });
    }
    serde_json::from_str(&body).map_err(|err| SyncError::Decode(err.to_string()))
}

/// FastAPI-style `{"detail": ...}` bodies carry the human-readable reason.
fn rejection_reason(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("detail")
                .and_then(|detail| detail.as_str())
                .map(str::to_string)
        });
    match detail {
        Some(detail) => detail,
        None if body.trim().is_empty() => format!("backend answered {status}"),
        None => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_reason_prefers_detail_field() {
        assert_eq!(
            rejection_reason(StatusCode::BAD_REQUEST, r#"{"detail":"Project not found"}"#),
            "Project not found"
        );
        assert_eq!(
            rejection_reason(StatusCode::INTERNAL_SERVER_ERROR, "  boom "),
            "boom"
        );
        assert_eq!(
            rejection_reason(StatusCode::BAD_GATEWAY, ""),
            "backend answered 502 Bad Gateway"
        );
    }
}
