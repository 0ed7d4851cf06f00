use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use vitalcall::VideoConfig;

/// One text frame a participant sent to the relay.
#[derive(Debug, Clone)]
pub struct RelayedFrame {
    pub room: String,
    pub from: u64,
    pub kind: String,
    pub text: String,
}

#[derive(Debug, Clone)]
struct StoredRoom {
    title: Option<String>,
    created_at: String,
}

#[derive(Clone, Default)]
struct RelayState {
    rooms: Arc<Mutex<HashMap<String, Vec<(u64, mpsc::UnboundedSender<String>)>>>>,
    next_peer: Arc<AtomicU64>,
    frames: Arc<Mutex<Vec<RelayedFrame>>>,
    tokens: Arc<Mutex<Vec<String>>>,
    stored_rooms: Arc<Mutex<HashMap<String, StoredRoom>>>,
    room_failure: Arc<Mutex<Option<(StatusCode, String)>>>,
}

/// In-process signaling relay and room API.
///
/// Serves `/video/ws/{code}` and `/video/rooms[/{code}]` on an ephemeral
/// port. Frames are forwarded verbatim to the other sockets of the room;
/// existing sockets get `peer-join` when someone connects and `peer-leave`
/// when someone disconnects.
pub struct MockRelay {
    addr: SocketAddr,
    state: RelayState,
    server: JoinHandle<()>,
}

impl MockRelay {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind mock relay")?;
        let addr = listener.local_addr()?;
        let state = RelayState::default();

        let app = Router::new()
            .route("/video/ws/{code}", get(ws_handler))
            .route("/video/rooms", post(create_room))
            .route("/video/rooms/{code}", get(get_room).delete(delete_room))
            .with_state(state.clone());

        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("[MockRelay] server stopped: {}", e);
            }
        });

        tracing::debug!("[MockRelay] listening on {}", addr);
        Ok(Self {
            addr,
            state,
            server,
        })
    }

    pub fn config(&self) -> VideoConfig {
        VideoConfig {
            ice_servers: Vec::new(),
            connect_timeout: Duration::from_secs(5),
            negotiation_timeout: Duration::from_secs(5),
            ..VideoConfig::with_api_url(format!("http://{}/video", self.addr))
        }
    }

    /// Makes every `POST /rooms` answer with `status` and `body`.
    pub fn fail_room_creation(&self, status: u16, body: &str) {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        *self.state.room_failure.lock() = Some((status, body.to_string()));
    }

    /// Sends `text` to every socket in `room`, as if another peer sent it.
    pub fn inject(&self, room: &str, text: &str) {
        if let Some(peers) = self.state.rooms.lock().get(room) {
            for (_, tx) in peers {
                let _ = tx.send(text.to_string());
            }
        }
    }

    /// Closes every socket in `room` from the server side.
    pub fn kick_all(&self, room: &str) {
        self.state.rooms.lock().remove(room);
    }

    pub fn participants(&self, room: &str) -> usize {
        self.state.rooms.lock().get(room).map_or(0, Vec::len)
    }

    pub fn tokens(&self) -> Vec<String> {
        self.state.tokens.lock().clone()
    }

    pub fn frames(&self) -> Vec<RelayedFrame> {
        self.state.frames.lock().clone()
    }

    pub fn frames_of_kind(&self, kind: &str) -> Vec<RelayedFrame> {
        self.frames().into_iter().filter(|f| f.kind == kind).collect()
    }

    /// Waits until `room` has exactly `count` sockets.
    pub async fn wait_for_participants(&self, room: &str, count: usize, timeout_ms: u64) -> bool {
        wait_until(timeout_ms, || self.participants(room) == count).await
    }

    pub async fn wait_for_frames(&self, kind: &str, count: usize, timeout_ms: u64) -> bool {
        wait_until(timeout_ms, || self.frames_of_kind(kind).len() >= count).await
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.server.abort();
    }
}

pub async fn wait_until(timeout_ms: u64, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

// ============================================================================
// SIGNALING RELAY
// ============================================================================

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(code): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    if let Some(token) = query.get("token") {
        state.tokens.lock().push(token.clone());
    }
    ws.on_upgrade(move |socket| handle_socket(socket, code, state))
}

async fn handle_socket(socket: WebSocket, room: String, state: RelayState) {
    let id = state.next_peer.fetch_add(1, Ordering::SeqCst);
    tracing::debug!("[MockRelay] peer {} joined room {}", id, room);

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    {
        let mut rooms = state.rooms.lock();
        let peers = rooms.entry(room.clone()).or_default();
        for (_, peer) in peers.iter() {
            let _ = peer.send(json!({"type": "peer-join"}).to_string());
        }
        peers.push((id, tx));
    }

    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let mut recv_task = tokio::spawn({
        let state = state.clone();
        let room = room.clone();

        async move {
            while let Some(Ok(msg)) = receiver.next().await {
                match msg {
                    Message::Text(text) => {
                        let text = text.to_string();
                        let kind = serde_json::from_str::<Value>(&text)
                            .ok()
                            .and_then(|v| v["type"].as_str().map(str::to_string))
                            .unwrap_or_default();
                        tracing::debug!("[MockRelay] {} frame from peer {}", kind, id);

                        state.frames.lock().push(RelayedFrame {
                            room: room.clone(),
                            from: id,
                            kind,
                            text: text.clone(),
                        });

                        if let Some(peers) = state.rooms.lock().get(&room) {
                            for (peer_id, peer) in peers {
                                if *peer_id != id {
                                    let _ = peer.send(text.clone());
                                }
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    let mut rooms = state.rooms.lock();
    if let Some(peers) = rooms.get_mut(&room) {
        peers.retain(|(peer_id, _)| *peer_id != id);
        for (_, peer) in peers.iter() {
            let _ = peer.send(json!({"type": "peer-leave"}).to_string());
        }
    }
    tracing::debug!("[MockRelay] peer {} left room {}", id, room);
}

// ============================================================================
// ROOM API
// ============================================================================

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

async fn create_room(
    State(state): State<RelayState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some((status, message)) = state.room_failure.lock().clone() {
        return (status, message).into_response();
    }
    let Some(token) = bearer(&headers) else {
        return (StatusCode::UNAUTHORIZED, "missing token").into_response();
    };
    state.tokens.lock().push(token);

    let code = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    let title = body["title"].as_str().map(str::to_string);
    state.stored_rooms.lock().insert(
        code.clone(),
        StoredRoom {
            title: title.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        },
    );

    (StatusCode::CREATED, Json(json!({"code": code, "title": title}))).into_response()
}

async fn get_room(Path(code): Path<String>, State(state): State<RelayState>) -> Response {
    match state.stored_rooms.lock().get(&code) {
        Some(room) => Json(json!({
            "code": code,
            "title": room.title,
            "created_at": room.created_at,
        }))
        .into_response(),
        None => (StatusCode::NOT_FOUND, "room not found").into_response(),
    }
}

async fn delete_room(Path(code): Path<String>, State(state): State<RelayState>) -> Response {
    let deleted = u64::from(state.stored_rooms.lock().remove(&code).is_some());
    Json(json!({ "deleted": deleted })).into_response()
}
