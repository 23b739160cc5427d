#![allow(dead_code)]

mod fake_api;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub use fake_api::{ApiCallCounts, InMemoryProjectApi, SubmitOutcome};

/// Minimal push endpoint: every connection receives `script` in order, then
/// either hangs up or waits for the client to close.
pub struct PushServer {
    pub addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

#[derive(Clone)]
struct ServerState {
    script: Arc<Vec<String>>,
    hang_up: bool,
    delay: Duration,
    connections: Arc<AtomicUsize>,
}

impl PushServer {
    pub async fn start(script: Vec<String>, hang_up: bool) -> Self {
        Self::start_delayed(script, hang_up, Duration::ZERO).await
    }

    /// Like `start`, but each connection waits `delay` before the script.
    pub async fn start_delayed(script: Vec<String>, hang_up: bool, delay: Duration) -> Self {
        let connections = Arc::new(AtomicUsize::new(0));
        let state = ServerState {
            script: Arc::new(script),
            hang_up,
            delay,
            connections: Arc::clone(&connections),
        };
        let app = Router::new()
            .route("/api/chat/:project_id", get(upgrade))
            .with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            addr,
            connections,
            task,
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn http_base(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn push_url(&self, project_id: &str) -> String {
        format!("ws://{}/api/chat/{project_id}", self.addr)
    }
}

impl Drop for PushServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve(socket, state))
}

async fn serve(mut socket: WebSocket, state: ServerState) {
    state.connections.fetch_add(1, Ordering::SeqCst);
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    for frame in state.script.iter() {
        if socket.send(Message::Text(frame.clone())).await.is_err() {
            return;
        }
    }
    if state.hang_up {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    while let Some(Ok(message)) = socket.recv().await {
        if matches!(message, Message::Close(_)) {
            break;
        }
    }
}
