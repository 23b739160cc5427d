use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lookout_client::api::ProjectApi;
use lookout_client::SyncError;
use lookout_core::rest::{
    ActiveRequestsResponse, ActiveSession, CurrentDeployment, PublishResponse, SubmitRequest,
    SubmitResponse,
};
use lookout_core::DisplayMessage;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accept,
    Reject(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApiCallCounts {
    pub active_requests: usize,
    pub current_deployment: usize,
    pub submit: usize,
    pub publish: usize,
    pub messages: usize,
    pub active_session: usize,
}

struct FakeState {
    active: ActiveRequestsResponse,
    active_delay: Option<Duration>,
    history_delay: Option<Duration>,
    deployments: VecDeque<CurrentDeployment>,
    submit_outcome: SubmitOutcome,
    submitted: Vec<SubmitRequest>,
    publish: Result<PublishResponse, String>,
    history: HashMap<Option<String>, Vec<DisplayMessage>>,
    active_session: Option<ActiveSession>,
    calls: ApiCallCounts,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            active: ActiveRequestsResponse::default(),
            active_delay: None,
            history_delay: None,
            deployments: VecDeque::new(),
            submit_outcome: SubmitOutcome::Accept,
            submitted: Vec::new(),
            publish: Ok(PublishResponse {
                success: true,
                ..PublishResponse::default()
            }),
            history: HashMap::new(),
            active_session: None,
            calls: ApiCallCounts::default(),
        }
    }
}

/// Scriptable in-memory backend.
///
/// Deployment answers are consumed front to back; the last one sticks.
#[derive(Default)]
pub struct InMemoryProjectApi {
    state: Mutex<FakeState>,
    history_in_flight: Arc<AtomicUsize>,
}

/// Counts a history call as in flight until its future finishes or is dropped.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryProjectApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn set_active_requests(&self, has_active_requests: bool, active_count: u32) {
        self.state.lock().await.active = ActiveRequestsResponse {
            has_active_requests,
            active_count,
        };
    }

    /// Holds every active-requests answer back by `delay`.
    pub async fn set_active_requests_delay(&self, delay: Option<Duration>) {
        self.state.lock().await.active_delay = delay;
    }

    /// Holds every history answer back by `delay`.
    pub async fn set_history_delay(&self, delay: Option<Duration>) {
        self.state.lock().await.history_delay = delay;
    }

    pub async fn push_deployment(&self, deployment: CurrentDeployment) {
        self.state.lock().await.deployments.push_back(deployment);
    }

    pub async fn set_submit_outcome(&self, outcome: SubmitOutcome) {
        self.state.lock().await.submit_outcome = outcome;
    }

    pub async fn set_publish(&self, outcome: Result<PublishResponse, String>) {
        self.state.lock().await.publish = outcome;
    }

    pub async fn set_history(&self, conversation_id: Option<&str>, messages: Vec<DisplayMessage>) {
        self.state
            .lock()
            .await
            .history
            .insert(conversation_id.map(str::to_string), messages);
    }

    pub async fn set_active_session(&self, session: Option<ActiveSession>) {
        self.state.lock().await.active_session = session;
    }

    /// History calls that have started and are still being awaited.
    pub fn history_in_flight(&self) -> usize {
        self.history_in_flight.load(Ordering::SeqCst)
    }

    pub async fn calls(&self) -> ApiCallCounts {
        self.state.lock().await.calls
    }

    pub async fn submitted(&self) -> Vec<SubmitRequest> {
        self.state.lock().await.submitted.clone()
    }
}

#[async_trait]
impl ProjectApi for InMemoryProjectApi {
    async fn active_requests(&self, _project_id: &str) -> Result<ActiveRequestsResponse, SyncError> {
        let delay = {
            let mut guard = self.state.lock().await;
            guard.calls.active_requests += 1;
            guard.active_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.state.lock().await.active)
    }

    async fn current_deployment(&self, _project_id: &str) -> Result<CurrentDeployment, SyncError> {
        let mut guard = self.state.lock().await;
        guard.calls.current_deployment += 1;
        let answer = if guard.deployments.len() > 1 {
            guard.deployments.pop_front()
        } else {
            guard.deployments.front().cloned()
        };
        Ok(answer.unwrap_or_default())
    }

    async fn submit(
        &self,
        _project_id: &str,
        body: &SubmitRequest,
    ) -> Result<SubmitResponse, SyncError> {
        let mut guard = self.state.lock().await;
        guard.calls.submit += 1;
        guard.submitted.push(body.clone());
        match guard.submit_outcome.clone() {
            SubmitOutcome::Accept => Ok(SubmitResponse {
                session_id: Some(format!("session-{}", guard.calls.submit)),
                conversation_id: body.conversation_id.clone(),
                status: Some("running".to_string()),
                message: Some(format!("{} execution started", body.execution_mode)),
            }),
            SubmitOutcome::Reject(reason) => Err(SyncError::SubmissionRejected(reason)),
        }
    }

    async fn publish(&self, _project_id: &str) -> Result<PublishResponse, SyncError> {
        let mut guard = self.state.lock().await;
        guard.calls.publish += 1;
        guard.publish.clone().map_err(SyncError::SubmissionRejected)
    }

    async fn messages(
        &self,
        _project_id: &str,
        conversation_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DisplayMessage>, SyncError> {
        let _in_flight = InFlight::enter(&self.history_in_flight);
        let delay = {
            let mut guard = self.state.lock().await;
            guard.calls.messages += 1;
            guard.history_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let guard = self.state.lock().await;
        let mut messages = guard
            .history
            .get(&conversation_id.map(str::to_string))
            .cloned()
            .unwrap_or_default();
        if messages.len() > limit {
            messages.drain(..messages.len() - limit);
        }
        Ok(messages)
    }

    async fn active_session(&self, _project_id: &str) -> Result<Option<ActiveSession>, SyncError> {
        let mut guard = self.state.lock().await;
        guard.calls.active_session += 1;
        Ok(guard.active_session.clone())
    }
}
