use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lookout_core::push_protocol::{decode_frame, encode_frame, PushFrame};
use lookout_core::ConnectionState;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::SyncConfig;
use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    State(ConnectionState),
    Frame(PushFrame),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub ceiling: Duration,
    pub max_retries: u32,
}

impl ReconnectPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            base: config.reconnect_base,
            ceiling: config.reconnect_ceiling,
            max_retries: config.max_retries,
        }
    }
}

/// `min(base * 2^retry_count, ceiling)`, where `retry_count` is the number
/// of reconnects already scheduled since the last successful open.
pub fn reconnect_delay(retry_count: u32, base: Duration, ceiling: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(retry_count)).min(ceiling)
}

/// The single push connection of a project view. The logical channel
/// survives reconnects; each reconnect opens a fresh websocket.
pub struct PushChannel {
    url: Url,
    policy: ReconnectPolicy,
    max_frame_bytes: usize,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state_rx: watch::Receiver<ConnectionState>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    close_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl PushChannel {
    pub fn new(
        config: &SyncConfig,
        project_id: &str,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Result<Self, SyncError> {
        let url = config.push_url(project_id)?;
        Ok(Self::with_url(
            url,
            ReconnectPolicy::from_config(config),
            config.max_frame_bytes,
            events,
        ))
    }

    pub fn with_url(
        url: Url,
        policy: ReconnectPolicy,
        max_frame_bytes: usize,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Self {
        let (_, state_rx) = watch::channel(ConnectionState::Closed);
        Self {
            url,
            policy,
            max_frame_bytes,
            events,
            state_rx,
            outbound: None,
            close_tx: None,
            task: None,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Starts the connection task. A no-op while a task is already running.
    pub fn connect(&mut self) {
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (close_tx, close_rx) = watch::channel(false);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.state_rx = state_rx;
        self.close_tx = Some(close_tx);
        self.outbound = Some(outbound_tx);
        let _ = self.events.send(ChannelEvent::State(ConnectionState::Connecting));
        self.task = Some(tokio::spawn(run_channel(
            ChannelTask {
                url: self.url.clone(),
                policy: self.policy,
                max_frame_bytes: self.max_frame_bytes,
                events: self.events.clone(),
                state_tx,
            },
            outbound_rx,
            close_rx,
        )));
    }

    /// Intentional close: tears the transport down without scheduling a
    /// reconnect.
    pub fn disconnect(&mut self) {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(true);
        }
        self.outbound = None;
    }

    /// Fresh retry budget after the channel gave up.
    pub fn rearm(&mut self) {
        if self.state() == ConnectionState::Failed
            || self.task.as_ref().map_or(true, |task| task.is_finished())
        {
            if let Some(task) = self.task.take() {
                task.abort();
            }
            self.connect();
        }
    }

    /// Queues a frame for the open transport. Returns `false`, without
    /// sending, when the channel is not open.
    pub fn send<T: Serialize>(&self, payload: &T) -> bool {
        if !self.is_open() {
            warn!("push_send_skipped: channel is {}", self.state());
            return false;
        }
        let text = match encode_frame(payload, self.max_frame_bytes) {
            Ok(text) => text,
            Err(err) => {
                warn!("push_send_encode_error: {err}");
                return false;
            }
        };
        match self.outbound.as_ref() {
            Some(outbound) => outbound.send(text).is_ok(),
            None => false,
        }
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.disconnect();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct ChannelTask {
    url: Url,
    policy: ReconnectPolicy,
    max_frame_bytes: usize,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ChannelTask {
    fn set_state(&self, state: ConnectionState) {
        if *self.state_tx.borrow() == state {
            return;
        }
        let _ = self.state_tx.send(state);
        let _ = self.events.send(ChannelEvent::State(state));
    }

    fn dispatch(&self, text: &str) {
        match decode_frame(text, self.max_frame_bytes) {
            Ok(PushFrame::Unknown) => debug!("push_frame_ignored: unknown type"),
            Ok(frame) => {
                let _ = self.events.send(ChannelEvent::Frame(frame));
            }
            Err(err) => warn!("push_frame_dropped: {err}"),
        }
    }
}

enum SessionEnd {
    Intentional,
    Dropped,
}

async fn run_channel(
    task: ChannelTask,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut close_rx: watch::Receiver<bool>,
) {
    let mut retry_count: u32 = 0;
    loop {
        if *close_rx.borrow() {
            break;
        }
        task.set_state(ConnectionState::Connecting);
        let connect = tokio::select! {
            result = connect_async(task.url.as_str()) => result,
            _ = close_rx.changed() => break,
        };
        match connect {
            Ok((ws, _)) => {
                retry_count = 0;
                task.set_state(ConnectionState::Open);
                info!("push_connected: {}", task.url);
                let (mut sink, mut stream) = ws.split();
                let end = loop {
                    tokio::select! {
                        msg = stream.next() => match msg {
                            Some(Ok(Message::Text(text))) => task.dispatch(&text),
                            Some(Ok(Message::Close(_))) | None => break SessionEnd::Dropped,
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                warn!("push_read_error: {err}");
                                break SessionEnd::Dropped;
                            }
                        },
                        Some(out) = outbound.recv() => {
                            if let Err(err) = sink.send(Message::Text(out)).await {
                                warn!("push_write_error: {err}");
                                break SessionEnd::Dropped;
                            }
                        }
                        _ = close_rx.changed() => {
                            task.set_state(ConnectionState::Closing);
                            let _ = sink.send(Message::Close(None)).await;
                            let _ = sink.close().await;
                            break SessionEnd::Intentional;
                        }
                    }
                };
                if matches!(end, SessionEnd::Intentional) {
                    break;
                }
            }
            Err(err) => warn!("push_connect_error: {err}"),
        }

        if retry_count >= task.policy.max_retries {
            warn!(
                "push_connection_lost: giving up after {} retries",
                task.policy.max_retries
            );
            task.set_state(ConnectionState::Failed);
            return;
        }
        let delay = reconnect_delay(retry_count, task.policy.base, task.policy.ceiling);
        retry_count += 1;
        task.set_state(ConnectionState::Closed);
        info!(
            "push_reconnect_scheduled: attempt={} delay_ms={}",
            retry_count,
            delay.as_millis()
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = close_rx.changed() => break,
        }
    }
    task.set_state(ConnectionState::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delays_double_then_cap() {
        let base = Duration::from_millis(1000);
        let ceiling = Duration::from_millis(10_000);
        let delays: Vec<u128> = (0..5)
            .map(|retry| reconnect_delay(retry, base, ceiling).as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10_000]);
        assert_eq!(reconnect_delay(40, base, ceiling), ceiling);
    }

    #[tokio::test]
    async fn send_is_a_no_op_until_open() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = PushChannel::with_url(
            Url::parse("ws://127.0.0.1:9/api/chat/p1").expect("url"),
            ReconnectPolicy {
                base: Duration::from_millis(10),
                ceiling: Duration::from_millis(10),
                max_retries: 0,
            },
            1024,
            tx,
        );
        assert_eq!(channel.state(), ConnectionState::Closed);
        assert!(!channel.send(&serde_json::json!({"type": "ping"})));
    }
}
