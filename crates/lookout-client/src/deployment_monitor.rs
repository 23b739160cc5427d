use std::time::Duration;

use lookout_core::rest::{CurrentDeployment, PublishResponse, RemoteDeploymentState};
use lookout_core::DeploymentStatus;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::timer::{PollTimer, TimerFired, TimerKind};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentJob {
    pub status: DeploymentStatus,
    pub deployment_id: Option<String>,
    /// Only ever taken from a confirmed deployment record.
    pub url: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorTick {
    Poll { epoch: u64 },
    Reverted,
}

/// idle -> deploying -> ready | error, with error reverting to idle after
/// a display delay. Owns its poll timer; no other component shares it.
pub struct DeploymentMonitor {
    job: DeploymentJob,
    poll_timer: PollTimer,
    revert_timer: PollTimer,
    poll_interval: Duration,
    error_display: Duration,
    epoch: u64,
}

impl DeploymentMonitor {
    pub fn new(config: &SyncConfig, timers: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            job: DeploymentJob::default(),
            poll_timer: PollTimer::new(TimerKind::DeploymentPoll, timers.clone()),
            revert_timer: PollTimer::new(TimerKind::DeploymentRevert, timers),
            poll_interval: config.deployment_poll_interval,
            error_display: config.deployment_error_display,
            epoch: 0,
        }
    }

    pub fn job(&self) -> &DeploymentJob {
        &self.job
    }

    pub fn status(&self) -> DeploymentStatus {
        self.job.status
    }

    pub fn is_polling(&self) -> bool {
        self.poll_timer.is_active()
    }

    /// Poll answers carry the epoch they were requested under; a new
    /// publish or resumption starts a new epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns `false` while a deployment is already in flight.
    pub fn begin_publish(&mut self) -> bool {
        if self.job.status == DeploymentStatus::Deploying {
            return false;
        }
        self.revert_timer.cancel();
        self.poll_timer.cancel();
        self.epoch += 1;
        self.job = DeploymentJob {
            status: DeploymentStatus::Deploying,
            ..DeploymentJob::default()
        };
        true
    }

    /// The publish call succeeded. Its URL is a prediction and is ignored;
    /// only polling may confirm one.
    pub fn publish_accepted(&mut self, response: &PublishResponse) {
        if !response.success {
            self.fail("deployment was not accepted".to_string());
            return;
        }
        if response.deployment_id.is_some() {
            self.job.deployment_id = response.deployment_id.clone();
        }
        self.start_polling();
    }

    pub fn publish_failed(&mut self, reason: String) {
        self.fail(reason);
    }

    /// Clears any prior poll handle before arming a new one.
    pub fn start_polling(&mut self) {
        self.poll_timer.start_every(Duration::ZERO, self.poll_interval);
    }

    pub fn stop_polling(&mut self) {
        self.poll_timer.cancel();
    }

    pub fn on_timer(&mut self, fired: TimerFired) -> Option<MonitorTick> {
        match fired.kind {
            TimerKind::DeploymentPoll if self.poll_timer.accept(fired) => {
                Some(MonitorTick::Poll { epoch: self.epoch })
            }
            TimerKind::DeploymentRevert if self.revert_timer.accept(fired) => {
                if self.job.status != DeploymentStatus::Error {
                    return None;
                }
                self.job = DeploymentJob::default();
                Some(MonitorTick::Reverted)
            }
            _ => None,
        }
    }

    /// Mount-time check: a deployment already running on the server puts the
    /// monitor into `deploying` without any local publish.
    pub fn resume(&mut self, current: &CurrentDeployment) -> bool {
        if self.job.status == DeploymentStatus::Deploying || !current.is_in_flight() {
            return false;
        }
        info!(
            "deployment_resumed: id={}",
            current.deployment_id.as_deref().unwrap_or("unknown")
        );
        self.revert_timer.cancel();
        self.epoch += 1;
        self.job = DeploymentJob {
            status: DeploymentStatus::Deploying,
            deployment_id: current.deployment_id.clone(),
            url: None,
            error: None,
        };
        self.start_polling();
        true
    }

    /// Applies one answer of the current-deployment query. Returns whether
    /// the job changed.
    pub fn apply_poll(&mut self, current: &CurrentDeployment, epoch: u64) -> bool {
        if epoch != self.epoch || self.job.status != DeploymentStatus::Deploying {
            return false;
        }
        match current.remote_state() {
            RemoteDeploymentState::Unknown if current.has_deployment => {
                // a record whose status we cannot read is not a confirmation
                debug!(
                    "deployment_status_unrecognized: {}",
                    current.status.as_deref().unwrap_or("missing")
                );
                self.track_id(current)
            }
            RemoteDeploymentState::InFlight => self.track_id(current),
            RemoteDeploymentState::Failed => {
                let status = current.status.as_deref().unwrap_or("ERROR");
                self.fail(format!("deployment ended with {status}"));
                true
            }
            RemoteDeploymentState::Ready | RemoteDeploymentState::Unknown => {
                self.stop_polling();
                match current.confirmed_url() {
                    Some(url) => {
                        info!("deployment_ready: {url}");
                        self.job.status = DeploymentStatus::Ready;
                        self.job.url = Some(url.to_string());
                        if current.deployment_id.is_some() {
                            self.job.deployment_id = current.deployment_id.clone();
                        }
                    }
                    None => {
                        info!("deployment_settled_without_url");
                        self.job = DeploymentJob::default();
                    }
                }
                true
            }
        }
    }

    fn track_id(&mut self, current: &CurrentDeployment) -> bool {
        if current.deployment_id.is_some() && current.deployment_id != self.job.deployment_id {
            self.job.deployment_id = current.deployment_id.clone();
            return true;
        }
        false
    }

    fn fail(&mut self, reason: String) {
        warn!("deployment_failed: {reason}");
        self.stop_polling();
        self.job.status = DeploymentStatus::Error;
        self.job.url = None;
        self.job.error = Some(reason);
        self.revert_timer.start_once(self.error_display);
    }

    pub fn shutdown(&mut self) {
        self.poll_timer.cancel();
        self.revert_timer.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn monitor() -> (DeploymentMonitor, mpsc::UnboundedReceiver<TimerFired>) {
        let config = SyncConfig::new(Url::parse("http://localhost:8080").expect("url")).expect("config");
        let (tx, rx) = mpsc::unbounded_channel();
        (DeploymentMonitor::new(&config, tx), rx)
    }

    fn deployment(has_deployment: bool, status: &str) -> CurrentDeployment {
        CurrentDeployment {
            has_deployment,
            deployment_id: Some("dpl_1".to_string()),
            status: Some(status.to_string()),
            ..CurrentDeployment::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn publish_polls_until_ready_and_ignores_predicted_url() {
        let (mut monitor, _rx) = monitor();
        assert!(monitor.begin_publish());
        assert!(!monitor.begin_publish());
        assert!(!monitor.is_polling());

        monitor.publish_accepted(&PublishResponse {
            success: true,
            deployment_url: Some("https://predicted.example".to_string()),
            deployment_id: Some("dpl_1".to_string()),
            status: Some("QUEUED".to_string()),
        });
        assert!(monitor.is_polling());
        assert_eq!(monitor.job().url, None);

        let epoch = monitor.epoch();
        assert!(!monitor.apply_poll(&deployment(true, "BUILDING"), epoch));
        assert_eq!(monitor.status(), DeploymentStatus::Deploying);

        let mut ready = deployment(true, "READY");
        ready.deployment_url = Some("https://live.example".to_string());
        assert!(monitor.apply_poll(&ready, epoch));
        assert_eq!(monitor.status(), DeploymentStatus::Ready);
        assert_eq!(monitor.job().url.as_deref(), Some("https://live.example"));
        assert!(!monitor.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn no_record_without_url_returns_to_idle() {
        let (mut monitor, _rx) = monitor();
        monitor.begin_publish();
        monitor.publish_accepted(&PublishResponse {
            success: true,
            ..PublishResponse::default()
        });
        assert!(monitor.apply_poll(&CurrentDeployment::default(), monitor.epoch()));
        assert_eq!(monitor.status(), DeploymentStatus::Idle);
        assert!(!monitor.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn no_record_with_last_url_is_ready() {
        let (mut monitor, _rx) = monitor();
        monitor.begin_publish();
        monitor.start_polling();
        let settled = CurrentDeployment {
            has_deployment: false,
            last_deployment_url: Some("https://last.example".to_string()),
            ..CurrentDeployment::default()
        };
        assert!(monitor.apply_poll(&settled, monitor.epoch()));
        assert_eq!(monitor.status(), DeploymentStatus::Ready);
        assert_eq!(monitor.job().url.as_deref(), Some("https://last.example"));
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_status_on_a_live_record_keeps_polling() {
        let (mut monitor, _rx) = monitor();
        monitor.begin_publish();
        monitor.start_polling();
        let epoch = monitor.epoch();

        let mut odd = deployment(true, "UPLOADING");
        odd.deployment_id = Some("dpl_2".to_string());
        odd.deployment_url = Some("https://not-yet-live.example".to_string());
        assert!(monitor.apply_poll(&odd, epoch));
        assert_eq!(monitor.status(), DeploymentStatus::Deploying);
        assert_eq!(monitor.job().url, None);
        assert_eq!(monitor.job().deployment_id.as_deref(), Some("dpl_2"));
        assert!(monitor.is_polling());

        odd.status = None;
        assert!(!monitor.apply_poll(&odd, epoch));
        assert_eq!(monitor.status(), DeploymentStatus::Deploying);
        assert!(monitor.is_polling());

        let mut ready = deployment(true, "READY");
        ready.deployment_url = Some("https://live.example".to_string());
        assert!(monitor.apply_poll(&ready, epoch));
        assert_eq!(monitor.job().url.as_deref(), Some("https://live.example"));
    }

    #[tokio::test(start_paused = true)]
    async fn error_reverts_to_idle_after_display_delay() {
        let (mut monitor, mut rx) = monitor();
        monitor.begin_publish();
        monitor.start_polling();
        assert!(monitor.apply_poll(&deployment(true, "ERROR"), monitor.epoch()));
        assert_eq!(monitor.status(), DeploymentStatus::Error);
        assert!(!monitor.is_polling());

        let started = tokio::time::Instant::now();
        loop {
            let fired = rx.recv().await.expect("timer");
            if let Some(tick) = monitor.on_timer(fired) {
                if tick == MonitorTick::Reverted {
                    break;
                }
            }
        }
        assert!(started.elapsed() >= Duration::from_millis(5000));
        assert_eq!(monitor.job(), &DeploymentJob::default());
    }

    #[tokio::test(start_paused = true)]
    async fn resume_enters_deploying_without_local_publish() {
        let (mut monitor, _rx) = monitor();
        assert!(!monitor.resume(&deployment(false, "BUILDING")));
        assert!(monitor.resume(&deployment(true, "BUILDING")));
        assert_eq!(monitor.status(), DeploymentStatus::Deploying);
        assert_eq!(monitor.job().deployment_id.as_deref(), Some("dpl_1"));
        assert!(monitor.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn answers_from_an_older_epoch_are_ignored() {
        let (mut monitor, _rx) = monitor();
        monitor.begin_publish();
        let old_epoch = monitor.epoch();
        monitor.publish_failed("boom".to_string());
        assert_eq!(monitor.status(), DeploymentStatus::Error);

        monitor.begin_publish();
        monitor.start_polling();
        assert!(!monitor.apply_poll(&deployment(true, "ERROR"), old_epoch));
        assert_eq!(monitor.status(), DeploymentStatus::Deploying);
    }
}
