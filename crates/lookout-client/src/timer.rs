use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    LedgerPoll,
    LedgerNudge,
    CompletionWatchdog,
    DeploymentPoll,
    DeploymentRevert,
}

impl TimerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerKind::LedgerPoll => "ledger_poll",
            TimerKind::LedgerNudge => "ledger_nudge",
            TimerKind::CompletionWatchdog => "completion_watchdog",
            TimerKind::DeploymentPoll => "deployment_poll",
            TimerKind::DeploymentRevert => "deployment_revert",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    pub generation: u64,
}

/// A cancellable scheduled task with exactly one owner. Starting it again
/// aborts the previous task first, and dropping it aborts whatever is left.
///
/// Ticks carry the generation they were scheduled under; the owner feeds
/// them back through [`PollTimer::accept`] so a tick already queued by a
/// cancelled schedule is ignored.
pub struct PollTimer {
    kind: TimerKind,
    tx: mpsc::UnboundedSender<TimerFired>,
    handle: Option<JoinHandle<()>>,
    generation: u64,
    period: Option<Duration>,
    one_shot: bool,
}

impl PollTimer {
    pub fn new(kind: TimerKind, tx: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            kind,
            tx,
            handle: None,
            generation: 0,
            period: None,
            one_shot: false,
        }
    }

    /// Fires after `first`, then every `period`.
    pub fn start_every(&mut self, first: Duration, period: Duration) {
        self.cancel();
        // tokio intervals reject a zero period
        let period = period.max(Duration::from_millis(1));
        self.generation += 1;
        self.period = Some(period);
        self.one_shot = false;
        let fired = TimerFired {
            kind: self.kind,
            generation: self.generation,
        };
        let tx = self.tx.clone();
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(fired).is_err() {
                    break;
                }
            }
        }));
    }

    pub fn start_once(&mut self, delay: Duration) {
        self.cancel();
        self.generation += 1;
        self.period = None;
        self.one_shot = true;
        let fired = TimerFired {
            kind: self.kind,
            generation: self.generation,
        };
        let tx = self.tx.clone();
        self.handle = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = tx.send(fired);
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.period = None;
        self.one_shot = false;
    }

    /// Whether `fired` belongs to the live schedule. A one-shot disarms
    /// itself once its tick is accepted.
    pub fn accept(&mut self, fired: TimerFired) -> bool {
        if fired.kind != self.kind || fired.generation != self.generation || self.handle.is_none() {
            return false;
        }
        if self.one_shot {
            self.handle = None;
            self.one_shot = false;
        }
        true
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Period of the running repeating schedule, if any.
    pub fn period(&self) -> Option<Duration> {
        self.period
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn restarting_supersedes_the_previous_schedule() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = PollTimer::new(TimerKind::DeploymentPoll, tx);

        timer.start_every(Duration::ZERO, Duration::from_millis(1000));
        let stale = rx.recv().await.expect("first tick");
        timer.start_every(Duration::from_millis(1000), Duration::from_millis(1000));

        assert!(!timer.accept(stale));
        let fresh = rx.recv().await.expect("fresh tick");
        assert!(timer.accept(fresh));
        assert_eq!(timer.period(), Some(Duration::from_millis(1000)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_stops_ticking() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = PollTimer::new(TimerKind::LedgerPoll, tx);
        timer.start_every(Duration::from_millis(500), Duration::from_millis(500));
        timer.cancel();
        assert!(!timer.is_active());

        time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_disarms_after_accept() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = PollTimer::new(TimerKind::DeploymentRevert, tx);
        timer.start_once(Duration::from_millis(5000));
        assert!(timer.is_active());

        let fired = rx.recv().await.expect("fires");
        assert!(timer.accept(fired));
        assert!(!timer.is_active());
        assert!(!timer.accept(fired));
    }
}
