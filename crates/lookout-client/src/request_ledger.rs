use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lookout_core::push_protocol::LifecycleSignal;
use lookout_core::rest::ActiveRequestsResponse;
use lookout_core::{RequestKind, RequestStatus};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::timer::{PollTimer, TimerFired, TimerKind};

pub const FALLBACK_TIMEOUT_ERROR: &str = "timed out waiting for completion";

/// Settled records kept for display; older ones are dropped.
pub const MAX_SETTLED_RECORDS: usize = 50;

/// Dropped request ids remembered so a re-submit stays a no-op.
const RETIRED_ID_MEMORY: usize = 4 * MAX_SETTLED_RECORDS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedRequest {
    pub request_id: String,
    pub session_id: Option<String>,
    pub instruction: String,
    pub kind: RequestKind,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub error: Option<String>,
    created: Instant,
}

impl TrackedRequest {
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// The one transition function; push, poll and watchdog all go through
    /// it, so whichever source arrives first wins.
    fn advance(&mut self, next: RequestStatus, error: Option<String>) -> bool {
        if !self.status.can_advance_to(next) {
            return false;
        }
        self.status = next;
        if next == RequestStatus::Failed {
            self.error = error;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Inserted,
    AlreadyTracked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// A local mutation landed while the poll was in flight.
    Stale,
    Applied { settled: Vec<String> },
}

/// Outstanding user-initiated requests for one project view, in creation
/// order. Every active record is kept; only the newest
/// [`MAX_SETTLED_RECORDS`] terminal ones are.
#[derive(Debug, Default)]
pub struct RequestLedger {
    records: Vec<TrackedRequest>,
    by_request: HashMap<String, usize>,
    /// Server-assigned request id -> the local request id it turned out to be.
    aliases: HashMap<String, String>,
    retired: VecDeque<String>,
    revision: u64,
    remote_active: bool,
    remote_count: u32,
}

impl RequestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumped by every local mutation. Polls are tagged with the revision
    /// they were issued under.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn records(&self) -> &[TrackedRequest] {
        &self.records
    }

    pub fn get(&self, request_id: &str) -> Option<&TrackedRequest> {
        self.by_request
            .get(request_id)
            .and_then(|index| self.records.get(*index))
    }

    pub fn has_active_requests(&self) -> bool {
        self.records.iter().any(TrackedRequest::is_active)
    }

    pub fn active_count(&self) -> usize {
        self.records.iter().filter(|record| record.is_active()).count()
    }

    /// Last answer of the authoritative active-requests query.
    pub fn remote_active(&self) -> bool {
        self.remote_active
    }

    pub fn remote_count(&self) -> u32 {
        self.remote_count
    }

    /// Whether polling should run at the short cadence.
    pub fn wants_fast_poll(&self) -> bool {
        self.has_active_requests() || self.remote_active
    }

    pub fn create(
        &mut self,
        request_id: &str,
        session_id: Option<String>,
        instruction: &str,
        kind: RequestKind,
        now: Instant,
    ) -> CreateOutcome {
        if self.by_request.contains_key(request_id)
            || self.retired.iter().any(|retired| retired == request_id)
        {
            debug!("ledger_create_duplicate: {request_id}");
            return CreateOutcome::AlreadyTracked;
        }
        self.by_request
            .insert(request_id.to_string(), self.records.len());
        self.records.push(TrackedRequest {
            request_id: request_id.to_string(),
            session_id,
            instruction: instruction.to_string(),
            kind,
            status: RequestStatus::Created,
            created_at: Utc::now(),
            error: None,
            created: now,
        });
        self.revision += 1;
        CreateOutcome::Inserted
    }

    pub fn attach_session(&mut self, request_id: &str, session_id: &str) -> bool {
        let Some(index) = self.by_request.get(request_id).copied() else {
            return false;
        };
        let record = &mut self.records[index];
        if record.session_id.as_deref() == Some(session_id) {
            return false;
        }
        record.session_id = Some(session_id.to_string());
        self.revision += 1;
        true
    }

    pub fn start(&mut self, key: &str) -> bool {
        self.transition(key, RequestStatus::Running, None)
    }

    /// No-op on a record that is already terminal.
    pub fn complete(&mut self, key: &str, successful: bool, error: Option<String>) -> bool {
        let next = if successful {
            RequestStatus::Completed
        } else {
            RequestStatus::Failed
        };
        self.transition(key, next, error)
    }

    /// Resolves `key` as a request id first, then as a session id.
    fn transition(&mut self, key: &str, next: RequestStatus, error: Option<String>) -> bool {
        let Some(index) = self.resolve(key) else {
            debug!("ledger_transition_unknown: {key} -> {next}");
            return false;
        };
        self.transition_at(index, next, error)
    }

    fn transition_at(&mut self, index: usize, next: RequestStatus, error: Option<String>) -> bool {
        let record = &mut self.records[index];
        if !record.advance(next, error) {
            return false;
        }
        info!(
            "ledger_transition: request_id={} status={}",
            record.request_id, record.status
        );
        self.revision += 1;
        if next.is_terminal() {
            self.prune_settled();
        }
        true
    }

    fn resolve(&self, key: &str) -> Option<usize> {
        self.lookup_request(key)
            .or_else(|| self.lookup_session(key))
    }

    fn lookup_request(&self, request_id: &str) -> Option<usize> {
        if let Some(index) = self.by_request.get(request_id) {
            return Some(*index);
        }
        self.aliases
            .get(request_id)
            .and_then(|local| self.by_request.get(local))
            .copied()
    }

    fn lookup_session(&self, session_id: &str) -> Option<usize> {
        self.records
            .iter()
            .rposition(|record| record.session_id.as_deref() == Some(session_id))
    }

    /// When a lifecycle frame carries no correlation at all, the only
    /// outstanding request of that kind is the unambiguous target.
    fn sole_active_of(&self, kind: RequestKind) -> Option<usize> {
        let mut active = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.kind == kind && record.is_active());
        match (active.next(), active.next()) {
            (Some((index, _)), None) => Some(index),
            _ => None,
        }
    }

    /// Finds the record a lifecycle frame talks about: its request id, then
    /// its session id, and only for a frame carrying neither, the sole
    /// active request of that kind. The backend may announce its own
    /// request id for a submission the client tracks under another one;
    /// the session id ties the two together and the server id is kept as
    /// an alias.
    fn correlate(
        &mut self,
        kind: RequestKind,
        request_id: Option<&str>,
        session_id: Option<&str>,
    ) -> Option<usize> {
        if request_id.is_none() && session_id.is_none() {
            return self.sole_active_of(kind);
        }
        if let Some(index) = request_id.and_then(|id| self.lookup_request(id)) {
            return Some(index);
        }
        let index = session_id.and_then(|id| self.lookup_session(id))?;
        if let Some(server_id) = request_id {
            let local = self.records[index].request_id.clone();
            debug!("ledger_alias: {server_id} -> {local}");
            self.aliases.insert(server_id.to_string(), local);
        }
        Some(index)
    }

    /// Push-driven transitions. A start for a request this view never
    /// submitted (another tab, a resumed session) is adopted as running.
    pub fn apply_signal(&mut self, signal: &LifecycleSignal<'_>, now: Instant) -> bool {
        match signal {
            LifecycleSignal::Started { kind, payload } => {
                let request_id = payload.request_id.as_deref();
                let session_id = payload.session_id.as_deref();
                let index = match self.correlate(*kind, request_id, session_id) {
                    Some(index) => index,
                    None => {
                        let Some(request_id) = request_id else {
                            return false;
                        };
                        self.create(
                            request_id,
                            payload.session_id.clone(),
                            payload.instruction.as_deref().unwrap_or_default(),
                            *kind,
                            now,
                        );
                        match self.by_request.get(request_id) {
                            Some(index) => *index,
                            None => return false,
                        }
                    }
                };
                let mut changed = false;
                if let Some(session_id) = session_id {
                    let local = self.records[index].request_id.clone();
                    changed |= self.attach_session(&local, session_id);
                }
                self.transition_at(index, RequestStatus::Running, None) || changed
            }
            LifecycleSignal::Completed { kind, payload } => {
                let index = self.correlate(
                    *kind,
                    payload.request_id.as_deref(),
                    payload.session_id.as_deref(),
                );
                match index {
                    Some(index) => {
                        let next = if payload.is_successful() {
                            RequestStatus::Completed
                        } else {
                            RequestStatus::Failed
                        };
                        self.transition_at(index, next, payload.error.clone())
                    }
                    None => false,
                }
            }
        }
    }

    /// Drops the oldest terminal records beyond the display cap and
    /// re-indexes what is left.
    fn prune_settled(&mut self) {
        let settled = self.records.len() - self.active_count();
        if settled <= MAX_SETTLED_RECORDS {
            return;
        }
        let mut excess = settled - MAX_SETTLED_RECORDS;
        let mut dropped = Vec::with_capacity(excess);
        self.records.retain(|record| {
            if excess > 0 && !record.is_active() {
                excess -= 1;
                dropped.push(record.request_id.clone());
                false
            } else {
                true
            }
        });
        debug!("ledger_pruned: {} settled records", dropped.len());
        self.aliases.retain(|_, local| !dropped.contains(local));
        for request_id in dropped {
            if self.retired.len() == RETIRED_ID_MEMORY {
                self.retired.pop_front();
            }
            self.retired.push_back(request_id);
        }
        self.by_request = self
            .records
            .iter()
            .enumerate()
            .map(|(index, record)| (record.request_id.clone(), index))
            .collect();
    }

    /// Poll-driven reconciliation. The server's answer is re-derived fresh
    /// each time; an answer issued before the latest local mutation is
    /// discarded. When the server reports nothing active, every request it
    /// has accepted is settled as completed.
    pub fn apply_poll(&mut self, response: ActiveRequestsResponse, issued_at: u64) -> PollOutcome {
        if issued_at != self.revision {
            debug!(
                "ledger_poll_stale: issued_at={issued_at} revision={}",
                self.revision
            );
            return PollOutcome::Stale;
        }
        self.remote_active = response.has_active_requests;
        self.remote_count = response.active_count;
        if response.has_active_requests {
            return PollOutcome::Applied { settled: Vec::new() };
        }
        let accepted: Vec<String> = self
            .records
            .iter()
            .filter(|record| record.is_active() && record.session_id.is_some())
            .map(|record| record.request_id.clone())
            .collect();
        let settled = accepted
            .into_iter()
            .filter(|request_id| self.transition(request_id, RequestStatus::Completed, None))
            .collect();
        PollOutcome::Applied { settled }
    }

    /// Marks the server as idle without touching local records; used when
    /// polling is torn down.
    pub fn clear_remote(&mut self) {
        self.remote_active = false;
        self.remote_count = 0;
    }

    /// Earliest moment an outstanding request runs out of patience.
    pub fn next_deadline(&self, fallback: Duration) -> Option<Instant> {
        self.records
            .iter()
            .filter(|record| record.is_active())
            .map(|record| record.created + fallback)
            .min()
    }

    pub fn expire_overdue(&mut self, now: Instant, fallback: Duration) -> Vec<String> {
        let overdue: Vec<String> = self
            .records
            .iter()
            .filter(|record| record.is_active() && record.created + fallback <= now)
            .map(|record| record.request_id.clone())
            .collect();
        overdue
            .into_iter()
            .filter(|request_id| {
                self.transition(
                    request_id,
                    RequestStatus::Failed,
                    Some(FALLBACK_TIMEOUT_ERROR.to_string()),
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerTick {
    Poll,
    Watchdog,
}

/// The ledger's own timers: the adaptive-cadence poll, the out-of-band
/// nudge after a local mutation, and the completion watchdog armed for the
/// earliest outstanding deadline.
pub struct LedgerPoller {
    poll: PollTimer,
    nudge: PollTimer,
    watchdog: PollTimer,
    active_interval: Duration,
    idle_interval: Duration,
    mutation_delay: Duration,
    fallback: Duration,
    suspended: bool,
    in_flight: bool,
    pending: bool,
}

impl LedgerPoller {
    pub fn new(config: &SyncConfig, timers: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            poll: PollTimer::new(TimerKind::LedgerPoll, timers.clone()),
            nudge: PollTimer::new(TimerKind::LedgerNudge, timers.clone()),
            watchdog: PollTimer::new(TimerKind::CompletionWatchdog, timers),
            active_interval: config.active_poll_interval,
            idle_interval: config.idle_poll_interval,
            mutation_delay: config.mutation_poll_delay,
            fallback: config.completion_fallback,
            suspended: false,
            in_flight: false,
            pending: false,
        }
    }

    pub fn fallback(&self) -> Duration {
        self.fallback
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Period of the running cadence, `None` while suspended.
    pub fn current_interval(&self) -> Option<Duration> {
        self.poll.period()
    }

    fn desired_interval(&self, ledger: &RequestLedger) -> Duration {
        if ledger.wants_fast_poll() {
            self.active_interval
        } else {
            self.idle_interval
        }
    }

    /// Restarts the cadence with an immediate first poll.
    pub fn poll_now(&mut self, ledger: &RequestLedger) {
        if self.suspended {
            return;
        }
        self.poll.start_every(Duration::ZERO, self.desired_interval(ledger));
    }

    pub fn refresh_cadence(&mut self, ledger: &RequestLedger) {
        if self.suspended {
            return;
        }
        let desired = self.desired_interval(ledger);
        if self.poll.period() != Some(desired) {
            debug!("ledger_cadence: {}ms", desired.as_millis());
            self.poll.start_every(desired, desired);
        }
    }

    pub fn after_mutation(&mut self, ledger: &RequestLedger, now: Instant) {
        if !self.suspended {
            self.nudge.start_once(self.mutation_delay);
        }
        self.refresh_cadence(ledger);
        self.reschedule_watchdog(ledger, now);
    }

    pub fn reschedule_watchdog(&mut self, ledger: &RequestLedger, now: Instant) {
        match ledger.next_deadline(self.fallback) {
            Some(deadline) => self.watchdog.start_once(deadline.saturating_duration_since(now)),
            None => self.watchdog.cancel(),
        }
    }

    pub fn suspend(&mut self) {
        self.suspended = true;
        self.pending = false;
        self.poll.cancel();
        self.nudge.cancel();
    }

    pub fn resume(&mut self, ledger: &RequestLedger) {
        self.suspended = false;
        self.poll_now(ledger);
    }

    pub fn on_timer(&mut self, fired: TimerFired) -> Option<LedgerTick> {
        match fired.kind {
            TimerKind::LedgerPoll if self.poll.accept(fired) => Some(LedgerTick::Poll),
            TimerKind::LedgerNudge if self.nudge.accept(fired) => Some(LedgerTick::Poll),
            TimerKind::CompletionWatchdog if self.watchdog.accept(fired) => {
                Some(LedgerTick::Watchdog)
            }
            _ => None,
        }
    }

    /// At most one poll in flight; a request made meanwhile is remembered
    /// and issued when the current one lands.
    pub fn begin_poll(&mut self) -> bool {
        if self.suspended {
            return false;
        }
        if self.in_flight {
            self.pending = true;
            return false;
        }
        self.in_flight = true;
        true
    }

    /// Returns whether a follow-up poll was requested while this one ran.
    pub fn finish_poll(&mut self, ledger: &RequestLedger) -> bool {
        self.in_flight = false;
        self.refresh_cadence(ledger);
        std::mem::take(&mut self.pending) && !self.suspended
    }

    pub fn shutdown(&mut self) {
        self.poll.cancel();
        self.nudge.cancel();
        self.watchdog.cancel();
    }
}
