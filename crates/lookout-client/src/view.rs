//! One mounted project view: owns the push channel, the ledger and its
//! poller, the deployment monitor and the transcript, and drives them from a
//! single task. The UI observes a [`ViewSnapshot`] and acts through a
//! [`ProjectViewHandle`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lookout_core::push_protocol::{LifecycleSignal, PushFrame};
use lookout_core::rest::{
    ActiveRequestsResponse, ActiveSession, CurrentDeployment, PublishResponse, SubmitRequest,
    SubmitResponse,
};
use lookout_core::{
    ConnectionState, DeploymentStatus, DisplayMessage, ProjectStatus, RequestKind,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::api::{ProjectApi, DEFAULT_HISTORY_LIMIT};
use crate::config::SyncConfig;
use crate::deployment_monitor::{DeploymentJob, DeploymentMonitor, MonitorTick};
use crate::error::SyncError;
use crate::message_reconciler::{MessageReconciler, RenderedMessage};
use crate::push_channel::{ChannelEvent, PushChannel};
use crate::request_ledger::{
    CreateOutcome, LedgerPoller, LedgerTick, PollOutcome, RequestLedger, TrackedRequest,
};
use crate::timer::{TimerFired, TimerKind};

const CLOSE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    pub project_id: String,
    pub connection: ConnectionState,
    pub is_connected: bool,
    /// Retries exhausted; stays set until `retry_initialization`.
    pub connection_lost: bool,
    pub has_active_requests: bool,
    /// The backend's own view of pending work, from the last poll.
    pub server_busy: bool,
    pub requests: Vec<TrackedRequest>,
    pub deployment: DeploymentJob,
    pub messages: Arc<[DisplayMessage]>,
    pub transcript: Arc<[RenderedMessage]>,
    pub project_status: ProjectStatus,
    pub project_message: Option<String>,
    pub remote_session: Option<ActiveSession>,
    pub active_conversation: Option<String>,
    pub visible: bool,
}

impl ViewSnapshot {
    fn empty(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            connection: ConnectionState::Closed,
            is_connected: false,
            connection_lost: false,
            has_active_requests: false,
            server_busy: false,
            requests: Vec::new(),
            deployment: DeploymentJob::default(),
            messages: Arc::from(Vec::new()),
            transcript: Arc::from(Vec::new()),
            project_status: ProjectStatus::default(),
            project_message: None,
            remote_session: None,
            active_conversation: None,
            visible: true,
        }
    }

    pub fn deployment_status(&self) -> DeploymentStatus {
        self.deployment.status
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitDisposition {
    Submitted,
    /// The request id was already tracked; nothing was sent.
    AlreadyTracked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub request_id: String,
    pub session_id: Option<String>,
    pub disposition: SubmitDisposition,
}

enum Command {
    Submit {
        request_id: String,
        instruction: String,
        kind: RequestKind,
        reply: oneshot::Sender<Result<SubmitReceipt, SyncError>>,
    },
    Publish {
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    SwitchSession {
        conversation_id: Option<String>,
    },
    RetryInitialization,
    SetVisible(bool),
    Shutdown,
}

enum TaskResult {
    LedgerPolled {
        issued_at: u64,
        result: Result<ActiveRequestsResponse, SyncError>,
    },
    DeploymentPolled {
        epoch: u64,
        result: Result<CurrentDeployment, SyncError>,
    },
    DeploymentChecked(Result<CurrentDeployment, SyncError>),
    SessionChecked(Result<Option<ActiveSession>, SyncError>),
    HistoryLoaded {
        generation: u64,
        fetch_started: Instant,
        result: Result<Vec<DisplayMessage>, SyncError>,
    },
    Submitted {
        request_id: String,
        result: Result<SubmitResponse, SyncError>,
        reply: oneshot::Sender<Result<SubmitReceipt, SyncError>>,
    },
    Published {
        epoch: u64,
        result: Result<PublishResponse, SyncError>,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
}

/// Imperative surface of a mounted view. Dropping the handle unmounts the
/// view the same way `shutdown` does, minus the wait.
pub struct ProjectViewHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<ViewSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl ProjectViewHandle {
    pub fn snapshot(&self) -> ViewSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewSnapshot> {
        self.snapshot.clone()
    }

    /// Submits under a fresh client-generated request id.
    pub async fn submit(
        &self,
        instruction: impl Into<String>,
        kind: RequestKind,
    ) -> Result<SubmitReceipt, SyncError> {
        self.submit_with_id(Uuid::new_v4().to_string(), instruction, kind)
            .await
    }

    /// Retrying with the same `request_id` never creates a second ledger
    /// entry or a second backend call.
    pub async fn submit_with_id(
        &self,
        request_id: impl Into<String>,
        instruction: impl Into<String>,
        kind: RequestKind,
    ) -> Result<SubmitReceipt, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit {
            request_id: request_id.into(),
            instruction: instruction.into(),
            kind,
            reply,
        })?;
        rx.await.map_err(|_| SyncError::ViewClosed)?
    }

    pub async fn publish(&self) -> Result<(), SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Publish { reply })?;
        rx.await.map_err(|_| SyncError::ViewClosed)?
    }

    pub fn switch_session(&self, conversation_id: Option<String>) -> Result<(), SyncError> {
        self.send(Command::SwitchSession { conversation_id })
    }

    pub fn retry_initialization(&self) -> Result<(), SyncError> {
        self.send(Command::RetryInitialization)
    }

    pub fn set_visible(&self, visible: bool) -> Result<(), SyncError> {
        self.send(Command::SetVisible(visible))
    }

    /// Unmounts: intentional channel close, every timer cleared, in-flight
    /// fetches aborted.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn send(&self, command: Command) -> Result<(), SyncError> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::ViewClosed)
    }
}

impl Drop for ProjectViewHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

pub struct ProjectView {
    project_id: String,
    api: Arc<dyn ProjectApi>,
    push: PushChannel,
    ledger: RequestLedger,
    poller: LedgerPoller,
    monitor: DeploymentMonitor,
    transcript: MessageReconciler,
    /// Transcript as last published, rebuilt only when its revision moves.
    published_transcript: Option<PublishedTranscript>,
    poll_timeout: Duration,
    request_timeout: Duration,
    connection: ConnectionState,
    opened_before: bool,
    project_status: ProjectStatus,
    project_message: Option<String>,
    remote_session: Option<ActiveSession>,
    active_conversation: Option<String>,
    visible: bool,
    history_generation: u64,
    deployment_poll_in_flight: bool,
    inflight: JoinSet<()>,
    results: mpsc::UnboundedSender<TaskResult>,
    snapshot: watch::Sender<ViewSnapshot>,
}

impl ProjectView {
    /// Mounts a view for `project_id` and starts its event loop on the
    /// current runtime.
    pub fn mount(
        config: SyncConfig,
        project_id: impl Into<String>,
        api: Arc<dyn ProjectApi>,
    ) -> Result<ProjectViewHandle, SyncError> {
        let project_id = project_id.into();
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(ViewSnapshot::empty(&project_id));

        let push = PushChannel::new(&config, &project_id, channel_tx)?;
        let view = ProjectView {
            api,
            push,
            ledger: RequestLedger::new(),
            poller: LedgerPoller::new(&config, timer_tx.clone()),
            monitor: DeploymentMonitor::new(&config, timer_tx),
            transcript: MessageReconciler::new(config.merge_window),
            published_transcript: None,
            poll_timeout: config.poll_timeout,
            request_timeout: config.request_timeout,
            connection: ConnectionState::Closed,
            opened_before: false,
            project_status: ProjectStatus::default(),
            project_message: None,
            remote_session: None,
            active_conversation: None,
            visible: true,
            history_generation: 0,
            deployment_poll_in_flight: false,
            inflight: JoinSet::new(),
            results: results_tx,
            snapshot: snapshot_tx,
            project_id,
        };
        let task = tokio::spawn(view.run(command_rx, channel_rx, timer_rx, results_rx));
        Ok(ProjectViewHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
            task: Some(task),
        })
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut channel: mpsc::UnboundedReceiver<ChannelEvent>,
        mut timers: mpsc::UnboundedReceiver<TimerFired>,
        mut results: mpsc::UnboundedReceiver<TaskResult>,
    ) {
        info!("view_mounted: project={}", self.project_id);
        self.bootstrap();
        self.publish_snapshot();
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = channel.recv() => self.handle_channel_event(event),
                Some(fired) = timers.recv() => self.handle_timer(fired),
                Some(result) = results.recv() => self.handle_result(result),
                Some(_) = self.inflight.join_next(), if !self.inflight.is_empty() => {}
            }
            self.publish_snapshot();
        }
        self.teardown(&mut channel).await;
    }

    fn bootstrap(&mut self) {
        self.push.connect();
        self.poller.poll_now(&self.ledger);
        self.load_history();
        let api = Arc::clone(&self.api);
        let project_id = self.project_id.clone();
        let limit = self.poll_timeout;
        self.spawn(async move {
            TaskResult::SessionChecked(bounded(limit, api.active_session(&project_id)).await)
        });
        self.check_deployment();
    }

    async fn teardown(&mut self, channel: &mut mpsc::UnboundedReceiver<ChannelEvent>) {
        info!("view_unmounting: project={}", self.project_id);
        self.poller.shutdown();
        self.monitor.shutdown();
        self.inflight.abort_all();
        let needs_close = !matches!(
            self.push.state(),
            ConnectionState::Closed | ConnectionState::Failed
        );
        self.push.disconnect();
        if needs_close {
            let closed = timeout(CLOSE_GRACE, async {
                while let Some(event) = channel.recv().await {
                    if matches!(event, ChannelEvent::State(ConnectionState::Closed)) {
                        break;
                    }
                }
            })
            .await;
            if closed.is_err() {
                debug!("view_close_grace_elapsed");
            }
        }
        self.connection = ConnectionState::Closed;
        self.ledger.clear_remote();
        self.publish_snapshot();
    }

    fn spawn<F>(&mut self, fut: F)
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        let results = self.results.clone();
        self.inflight.spawn(async move {
            let _ = results.send(fut.await);
        });
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit {
                request_id,
                instruction,
                kind,
                reply,
            } => self.submit(request_id, instruction, kind, reply),
            Command::Publish { reply } => self.publish(reply),
            Command::SwitchSession { conversation_id } => {
                info!("view_switch_session: {:?}", conversation_id);
                self.active_conversation = conversation_id;
                self.transcript.clear(None);
                self.load_history();
            }
            Command::RetryInitialization => {
                info!("view_retry_initialization");
                self.push.rearm();
                self.load_history();
                self.poller.poll_now(&self.ledger);
                self.check_deployment();
            }
            Command::SetVisible(visible) => {
                if visible == self.visible {
                    return;
                }
                self.visible = visible;
                if visible {
                    self.poller.resume(&self.ledger);
                } else {
                    self.poller.suspend();
                }
            }
            Command::Shutdown => {}
        }
    }

    fn submit(
        &mut self,
        request_id: String,
        instruction: String,
        kind: RequestKind,
        reply: oneshot::Sender<Result<SubmitReceipt, SyncError>>,
    ) {
        let now = Instant::now();
        if self.ledger.create(&request_id, None, &instruction, kind, now)
            == CreateOutcome::AlreadyTracked
        {
            let session_id = self
                .ledger
                .get(&request_id)
                .and_then(|record| record.session_id.clone());
            let _ = reply.send(Ok(SubmitReceipt {
                request_id,
                session_id,
                disposition: SubmitDisposition::AlreadyTracked,
            }));
            return;
        }
        self.poller.after_mutation(&self.ledger, now);

        let mut body = SubmitRequest::new(kind, request_id.clone(), instruction);
        body.conversation_id = self.active_conversation.clone();
        let api = Arc::clone(&self.api);
        let project_id = self.project_id.clone();
        let limit = self.request_timeout;
        self.spawn(async move {
            let result = bounded(limit, api.submit(&project_id, &body)).await;
            TaskResult::Submitted {
                request_id,
                result,
                reply,
            }
        });
    }

    fn publish(&mut self, reply: oneshot::Sender<Result<(), SyncError>>) {
        if !self.monitor.begin_publish() {
            let _ = reply.send(Err(SyncError::SubmissionRejected(
                "a deployment is already in progress".to_string(),
            )));
            return;
        }
        let epoch = self.monitor.epoch();
        let api = Arc::clone(&self.api);
        let project_id = self.project_id.clone();
        let limit = self.request_timeout;
        self.spawn(async move {
            let result = bounded(limit, api.publish(&project_id)).await;
            TaskResult::Published {
                epoch,
                result,
                reply,
            }
        });
    }

    fn load_history(&mut self) {
        self.history_generation += 1;
        let generation = self.history_generation;
        let fetch_started = Instant::now();
        let conversation = self.active_conversation.clone();
        let api = Arc::clone(&self.api);
        let project_id = self.project_id.clone();
        let limit = self.request_timeout;
        self.spawn(async move {
            let result = bounded(
                limit,
                api.messages(&project_id, conversation.as_deref(), DEFAULT_HISTORY_LIMIT),
            )
            .await;
            TaskResult::HistoryLoaded {
                generation,
                fetch_started,
                result,
            }
        });
    }

    fn check_deployment(&mut self) {
        let api = Arc::clone(&self.api);
        let project_id = self.project_id.clone();
        let limit = self.poll_timeout;
        self.spawn(async move {
            let result = bounded(limit, api.current_deployment(&project_id)).await;
            TaskResult::DeploymentChecked(result)
        });
    }

    fn poll_ledger(&mut self) {
        if !self.poller.begin_poll() {
            return;
        }
        let issued_at = self.ledger.revision();
        let api = Arc::clone(&self.api);
        let project_id = self.project_id.clone();
        let limit = self.poll_timeout;
        self.spawn(async move {
            let result = bounded(limit, api.active_requests(&project_id)).await;
            TaskResult::LedgerPolled { issued_at, result }
        });
    }

    fn poll_deployment(&mut self, epoch: u64) {
        if self.deployment_poll_in_flight {
            return;
        }
        self.deployment_poll_in_flight = true;
        let api = Arc::clone(&self.api);
        let project_id = self.project_id.clone();
        let limit = self.poll_timeout;
        self.spawn(async move {
            let result = bounded(limit, api.current_deployment(&project_id)).await;
            TaskResult::DeploymentPolled { epoch, result }
        });
    }

    fn handle_timer(&mut self, fired: TimerFired) {
        trace!("timer_fired: {} gen={}", fired.kind.as_str(), fired.generation);
        match fired.kind {
            TimerKind::LedgerPoll | TimerKind::LedgerNudge | TimerKind::CompletionWatchdog => {
                match self.poller.on_timer(fired) {
                    Some(LedgerTick::Poll) => self.poll_ledger(),
                    Some(LedgerTick::Watchdog) => {
                        let now = Instant::now();
                        let expired = self.ledger.expire_overdue(now, self.poller.fallback());
                        for request_id in &expired {
                            warn!("ledger_request_expired: {request_id}");
                        }
                        if expired.is_empty() {
                            self.poller.reschedule_watchdog(&self.ledger, now);
                        } else {
                            self.poller.after_mutation(&self.ledger, now);
                        }
                    }
                    None => {}
                }
            }
            TimerKind::DeploymentPoll | TimerKind::DeploymentRevert => {
                if let Some(MonitorTick::Poll { epoch }) = self.monitor.on_timer(fired) {
                    self.poll_deployment(epoch);
                }
            }
        }
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::State(state) => {
                debug!("push_state: {state}");
                self.connection = state;
                if state == ConnectionState::Open {
                    if self.opened_before {
                        // pushes may have been missed while disconnected
                        self.poller.poll_now(&self.ledger);
                    }
                    self.opened_before = true;
                }
            }
            ChannelEvent::Frame(frame) => self.handle_frame(frame),
        }
    }

    fn handle_frame(&mut self, frame: PushFrame) {
        let now = Instant::now();
        if let Some(signal) = frame.lifecycle() {
            if let LifecycleSignal::Completed { payload, .. } = &signal {
                let finished_remote = self.remote_session.as_ref().is_some_and(|session| {
                    payload.session_id.as_deref() == Some(session.session_id.as_str())
                });
                if finished_remote {
                    self.remote_session = None;
                }
            }
            if self.ledger.apply_signal(&signal, now) {
                self.poller.after_mutation(&self.ledger, now);
            }
            return;
        }
        match frame {
            PushFrame::Message { data, .. } => {
                if let (Some(active), Some(conversation)) =
                    (self.active_conversation.as_deref(), data.conversation_id.as_deref())
                {
                    if active != conversation {
                        debug!("transcript_other_conversation: {}", data.id);
                        return;
                    }
                }
                self.transcript.insert(data, now);
            }
            PushFrame::ProjectStatus { data } => match data.status.parse::<ProjectStatus>() {
                Ok(status) => {
                    info!("project_status: {status}");
                    self.project_status = status;
                    self.project_message = data.message;
                }
                Err(err) => warn!("project_status_unrecognized: {err}"),
            },
            PushFrame::MessagesCleared { conversation_id } => {
                self.transcript.clear(conversation_id.as_deref());
            }
            PushFrame::CliOutput { output, cli_type } => {
                debug!(
                    "cli_output: cli={} bytes={}",
                    cli_type.as_deref().unwrap_or("unknown"),
                    output.len()
                );
            }
            PushFrame::Status { status, .. } => debug!("push_status: {status}"),
            PushFrame::ActStart { .. }
            | PushFrame::ChatStart { .. }
            | PushFrame::ActComplete { .. }
            | PushFrame::ChatComplete { .. }
            | PushFrame::Unknown => {}
        }
    }

    fn handle_result(&mut self, result: TaskResult) {
        let now = Instant::now();
        match result {
            TaskResult::LedgerPolled { issued_at, result } => {
                match result {
                    Ok(response) => {
                        if !response.has_active_requests {
                            self.remote_session = None;
                        }
                        if let PollOutcome::Applied { settled } =
                            self.ledger.apply_poll(response, issued_at)
                        {
                            if !settled.is_empty() {
                                info!("ledger_settled_by_poll: {}", settled.join(","));
                                self.poller.after_mutation(&self.ledger, now);
                            }
                        }
                    }
                    Err(err) => warn!("ledger_poll_failed: {err}"),
                }
                if self.poller.finish_poll(&self.ledger) {
                    self.poll_ledger();
                }
            }
            TaskResult::DeploymentPolled { epoch, result } => {
                self.deployment_poll_in_flight = false;
                match result {
                    Ok(current) => {
                        self.monitor.apply_poll(&current, epoch);
                    }
                    Err(err) => warn!("deployment_poll_failed: {err}"),
                }
            }
            TaskResult::DeploymentChecked(result) => match result {
                Ok(current) => {
                    self.monitor.resume(&current);
                }
                Err(err) => warn!("deployment_check_failed: {err}"),
            },
            TaskResult::SessionChecked(result) => match result {
                Ok(Some(session)) if session.is_running() => {
                    info!("view_resumed_session: {}", session.session_id);
                    self.remote_session = Some(session);
                    self.poller.poll_now(&self.ledger);
                }
                Ok(_) => {}
                Err(err) => warn!("session_check_failed: {err}"),
            },
            TaskResult::HistoryLoaded {
                generation,
                fetch_started,
                result,
            } => {
                if generation != self.history_generation {
                    return;
                }
                match result {
                    Ok(history) => self.transcript.load_history(history, fetch_started),
                    Err(err) => warn!("history_load_failed: {err}"),
                }
            }
            TaskResult::Submitted {
                request_id,
                result,
                reply,
            } => match result {
                Ok(response) => {
                    if let Some(session_id) = response.session_id.as_deref() {
                        self.ledger.attach_session(&request_id, session_id);
                    }
                    if self.active_conversation.is_none() {
                        self.active_conversation = response.conversation_id.clone();
                    }
                    self.poller.after_mutation(&self.ledger, now);
                    let _ = reply.send(Ok(SubmitReceipt {
                        request_id,
                        session_id: response.session_id,
                        disposition: SubmitDisposition::Submitted,
                    }));
                }
                Err(err) => {
                    warn!("submit_failed: request_id={request_id} {err}");
                    self.ledger
                        .complete(&request_id, false, Some(err.user_message()));
                    self.poller.after_mutation(&self.ledger, now);
                    let _ = reply.send(Err(err));
                }
            },
            TaskResult::Published {
                epoch,
                result,
                reply,
            } => {
                if epoch != self.monitor.epoch() {
                    let _ = reply.send(Ok(()));
                    return;
                }
                match result {
                    Ok(response) => {
                        self.monitor.publish_accepted(&response);
                        let outcome = if response.success {
                            Ok(())
                        } else {
                            Err(SyncError::SubmissionRejected(
                                "deployment was not accepted".to_string(),
                            ))
                        };
                        let _ = reply.send(outcome);
                    }
                    Err(err) => {
                        self.monitor.publish_failed(err.user_message());
                        let _ = reply.send(Err(err));
                    }
                }
            }
        }
    }

    fn published_transcript(&mut self) -> PublishedTranscript {
        let revision = self.transcript.revision();
        if let Some(published) = &self.published_transcript {
            if published.revision == revision {
                return published.clone();
            }
        }
        let published = PublishedTranscript {
            revision,
            messages: Arc::from(self.transcript.messages()),
            rendered: Arc::from(self.transcript.rendered()),
        };
        self.published_transcript = Some(published.clone());
        published
    }

    fn publish_snapshot(&mut self) {
        let transcript = self.published_transcript();
        let next = ViewSnapshot {
            project_id: self.project_id.clone(),
            connection: self.connection,
            is_connected: self.connection == ConnectionState::Open,
            connection_lost: self.connection == ConnectionState::Failed,
            has_active_requests: self.ledger.has_active_requests(),
            server_busy: self.ledger.remote_active(),
            requests: self.ledger.records().to_vec(),
            deployment: self.monitor.job().clone(),
            messages: transcript.messages,
            transcript: transcript.rendered,
            project_status: self.project_status,
            project_message: self.project_message.clone(),
            remote_session: self.remote_session.clone(),
            active_conversation: self.active_conversation.clone(),
            visible: self.visible,
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

#[derive(Clone)]
struct PublishedTranscript {
    revision: u64,
    messages: Arc<[DisplayMessage]>,
    rendered: Arc<[RenderedMessage]>,
}

async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, SyncError>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(limit)),
    }
}
