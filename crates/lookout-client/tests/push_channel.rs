mod support;

use std::time::Duration;

use lookout_client::push_channel::{ChannelEvent, PushChannel, ReconnectPolicy};
use lookout_core::push_protocol::PushFrame;
use lookout_core::ConnectionState;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use url::Url;

use support::PushServer;

fn quick_policy(max_retries: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        base: Duration::from_millis(20),
        ceiling: Duration::from_millis(40),
        max_retries,
    }
}

fn channel(url: &str, max_retries: u32) -> (PushChannel, mpsc::UnboundedReceiver<ChannelEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let channel = PushChannel::with_url(
        Url::parse(url).expect("url"),
        quick_policy(max_retries),
        64 * 1024,
        tx,
    );
    (channel, rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> ChannelEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event in time")
        .expect("channel alive")
}

async fn wait_for_state(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>, wanted: ConnectionState) {
    loop {
        if next_event(rx).await == ChannelEvent::State(wanted) {
            return;
        }
    }
}

fn message_frame(id: &str, content: &str) -> String {
    json!({
        "type": "message",
        "data": {"id": id, "role": "assistant", "message_type": "chat", "content": content},
        "timestamp": "2024-05-01T10:00:00Z"
    })
    .to_string()
}

#[tokio::test]
async fn dispatches_frames_and_drops_malformed_ones() {
    let server = PushServer::start(
        vec![
            "not json at all".to_string(),
            message_frame("m1", "hello"),
            json!({"type": "heartbeat"}).to_string(),
            json!({"type": "status", "status": "ok"}).to_string(),
        ],
        false,
    )
    .await;
    let (mut channel, mut rx) = channel(&server.push_url("p1"), 3);
    channel.connect();
    assert_eq!(next_event(&mut rx).await, ChannelEvent::State(ConnectionState::Connecting));
    assert_eq!(next_event(&mut rx).await, ChannelEvent::State(ConnectionState::Open));
    assert!(channel.is_open());

    let first = next_event(&mut rx).await;
    match first {
        ChannelEvent::Frame(PushFrame::Message { data, .. }) => {
            assert_eq!(data.id, "m1");
            assert_eq!(data.content, "hello");
        }
        other => panic!("expected message frame, got {other:?}"),
    }
    match next_event(&mut rx).await {
        ChannelEvent::Frame(PushFrame::Status { status, .. }) => assert_eq!(status, "ok"),
        other => panic!("expected status frame, got {other:?}"),
    }
    assert!(channel.send(&json!({"type": "ping"})));

    channel.disconnect();
    wait_for_state(&mut rx, ConnectionState::Closed).await;
}

#[tokio::test]
async fn reconnects_after_the_server_hangs_up() {
    let server = PushServer::start(vec![message_frame("m1", "hello")], true).await;
    let (mut channel, mut rx) = channel(&server.push_url("p1"), 3);
    channel.connect();

    wait_for_state(&mut rx, ConnectionState::Open).await;
    wait_for_state(&mut rx, ConnectionState::Closed).await;
    wait_for_state(&mut rx, ConnectionState::Connecting).await;
    wait_for_state(&mut rx, ConnectionState::Open).await;
    assert!(server.connections() >= 2);
    channel.disconnect();
}

#[tokio::test]
async fn gives_up_after_max_retries() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let (mut channel, mut rx) = channel(&format!("ws://{addr}/api/chat/p1"), 2);
    channel.connect();

    let mut attempts = 0;
    loop {
        match next_event(&mut rx).await {
            ChannelEvent::State(ConnectionState::Connecting) => attempts += 1,
            ChannelEvent::State(ConnectionState::Failed) => break,
            ChannelEvent::State(ConnectionState::Open) => panic!("nothing should accept"),
            _ => {}
        }
    }
    // the first attempt plus one per allowed retry
    assert_eq!(attempts, 3);
    assert_eq!(channel.state(), ConnectionState::Failed);
    assert!(!channel.send(&json!({"type": "ping"})));
}

#[tokio::test]
async fn intentional_close_never_reconnects() {
    let server = PushServer::start(Vec::new(), false).await;
    let (mut channel, mut rx) = channel(&server.push_url("p1"), 5);
    channel.connect();
    wait_for_state(&mut rx, ConnectionState::Open).await;

    channel.disconnect();
    assert_eq!(next_event(&mut rx).await, ChannelEvent::State(ConnectionState::Closing));
    assert_eq!(next_event(&mut rx).await, ChannelEvent::State(ConnectionState::Closed));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn rearm_restores_a_failed_channel() {
    let server = PushServer::start(Vec::new(), false).await;
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let dead = listener.local_addr().expect("addr");
    drop(listener);

    let (mut failed, mut rx) = channel(&format!("ws://{dead}/api/chat/p1"), 0);
    failed.connect();
    wait_for_state(&mut rx, ConnectionState::Failed).await;
    failed.rearm();
    assert_eq!(next_event(&mut rx).await, ChannelEvent::State(ConnectionState::Connecting));
    drop(failed);

    let (mut live, mut rx) = channel(&server.push_url("p1"), 0);
    live.connect();
    wait_for_state(&mut rx, ConnectionState::Open).await;
    live.rearm();
    assert!(live.is_open());
    live.disconnect();
}
