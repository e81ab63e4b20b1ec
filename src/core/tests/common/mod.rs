//! In-process stand-in for the remote store: GraphQL over HTTP POST and
//! `graphql-transport-ws` on the same path, backed by an in-memory table.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use parlor_core::{ChannelEvent, ClientConfig, SharedCredentials, TransportSession};
use parlor_protocol::{
    decode_frame, encode_frame, Chat, Frame, GraphQLRequest, GraphQLResponse, Message, Sender,
    GRAPHQL_TRANSPORT_WS,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

#[derive(Default)]
struct Db {
    chats: Vec<Chat>,
    ticks: i64,
}

impl Db {
    fn tick(&mut self) -> DateTime<Utc> {
        self.ticks += 1;
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() + chrono::Duration::milliseconds(self.ticks)
    }

    fn chat_list(&self) -> Value {
        let mut chats: Vec<Chat> = self
            .chats
            .iter()
            .map(|c| Chat {
                id: c.id,
                created_at: c.created_at,
                messages: c.messages.last().cloned().into_iter().collect(),
            })
            .collect();
        chats.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        json!({ "chats": chats })
    }

    fn messages_of(&self, chat_id: Uuid) -> Value {
        let messages: Vec<Message> = self
            .chats
            .iter()
            .find(|c| c.id == chat_id)
            .map(|c| c.messages.clone())
            .unwrap_or_default();
        json!({ "messages": messages })
    }
}

#[derive(Default)]
pub struct Recorded {
    /// `Authorization` header of every HTTP request.
    pub http_auth: Vec<Option<String>>,
    /// Operation name of every HTTP request.
    pub http_ops: Vec<String>,
    /// Bearer token of every `connection_init`.
    pub ws_inits: Vec<Option<String>>,
    /// Operation name of every `subscribe` frame.
    pub ws_subscribes: Vec<String>,
    /// Number of `complete` frames received.
    pub ws_completes: usize,
}

struct ServerState {
    db: Mutex<Db>,
    recorded: Mutex<Recorded>,
    changes: broadcast::Sender<()>,
    kick: broadcast::Sender<()>,
    connections: AtomicUsize,
}

impl ServerState {
    fn resolve(&self, req: &GraphQLRequest) -> GraphQLResponse {
        let vars = req.variables.clone().unwrap_or(Value::Null);
        let uuid_var = |name: &str| {
            vars.get(name)
                .and_then(Value::as_str)
                .and_then(|s| Uuid::parse_str(s).ok())
        };

        let mut db = self.db.lock().unwrap();
        let (data, changed) = match req.operation_name.as_deref() {
            Some("GetChats") | Some("SubscribeToChats") => (db.chat_list(), false),
            Some("SubscribeToMessages") => match uuid_var("chatId") {
                Some(id) => (db.messages_of(id), false),
                None => return GraphQLResponse::error("variable chatId is required"),
            },
            Some("CreateChat") => {
                let chat = Chat {
                    id: Uuid::new_v4(),
                    created_at: db.tick(),
                    messages: Vec::new(),
                };
                let data = json!({
                    "insert_chats_one": { "id": chat.id, "created_at": chat.created_at }
                });
                db.chats.push(chat);
                (data, true)
            }
            Some("DeleteChat") => {
                let Some(id) = uuid_var("chat_id") else {
                    return GraphQLResponse::error("variable chat_id is required");
                };
                let before = db.chats.len();
                db.chats.retain(|c| c.id != id);
                if db.chats.len() == before {
                    (json!({ "delete_chats_by_pk": null }), false)
                } else {
                    (json!({ "delete_chats_by_pk": { "id": id } }), true)
                }
            }
            Some("InsertMessage") => {
                let Some(chat_id) = uuid_var("chat_id") else {
                    return GraphQLResponse::error("variable chat_id is required");
                };
                let sender: Sender = match vars.get("sender").cloned().map(serde_json::from_value) {
                    Some(Ok(s)) => s,
                    _ => return GraphQLResponse::error("invalid sender"),
                };
                let text = vars
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let created_at = db.tick();
                let Some(chat) = db.chats.iter_mut().find(|c| c.id == chat_id) else {
                    return GraphQLResponse::error(
                        "Foreign key violation. insert or update on table \"messages\"",
                    );
                };
                let message = Message {
                    id: Uuid::new_v4(),
                    chat_id,
                    text,
                    sender,
                    created_at,
                };
                chat.messages.push(message.clone());
                (json!({ "insert_messages_one": message }), true)
            }
            other => {
                return GraphQLResponse::error(format!(
                    "field '{}' not found in type: 'query_root'",
                    other.unwrap_or("?")
                ))
            }
        };
        drop(db);
        if changed {
            let _ = self.changes.send(());
        }
        GraphQLResponse::success(data)
    }
}

pub struct FakeRemote {
    pub addr: SocketAddr,
    state: Arc<ServerState>,
}

impl FakeRemote {
    pub async fn start() -> Self {
        init_tracing();
        let (changes, _) = broadcast::channel(64);
        let (kick, _) = broadcast::channel(4);
        let state = Arc::new(ServerState {
            db: Mutex::new(Db::default()),
            recorded: Mutex::new(Recorded::default()),
            changes,
            kick,
            connections: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/v1/graphql", post(graphql_http).get(graphql_ws))
            .with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(
            format!("http://{}/v1/graphql", self.addr),
            format!("ws://{}/v1/graphql", self.addr),
        );
        config.connect_timeout = Duration::from_secs(5);
        config.request_timeout = Duration::from_secs(5);
        config.reconnect_base_delay = Duration::from_millis(10);
        config.reconnect_max_delay = Duration::from_millis(50);
        config.thinking_delay = Duration::from_millis(20)..Duration::from_millis(40);
        config
    }

    pub fn session(&self, token: Option<&str>) -> (Arc<TransportSession>, Arc<SharedCredentials>) {
        let credentials = Arc::new(SharedCredentials::new(token.map(String::from)));
        let session = TransportSession::new(&self.config(), credentials.clone()).unwrap();
        (Arc::new(session), credentials)
    }

    pub fn recorded<T>(&self, f: impl FnOnce(&Recorded) -> T) -> T {
        f(&self.state.recorded.lock().unwrap())
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Close every open socket as a server restart would.
    pub fn kick(&self) {
        let _ = self.state.kick.send(());
    }
}

async fn graphql_http(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(req): Json<GraphQLRequest>,
) -> Json<GraphQLResponse> {
    {
        let mut rec = state.recorded.lock().unwrap();
        rec.http_auth.push(
            headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(String::from),
        );
        rec.http_ops
            .push(req.operation_name.clone().unwrap_or_default());
    }
    Json(state.resolve(&req))
}

async fn graphql_ws(State(state): State<Arc<ServerState>>, ws: WebSocketUpgrade) -> Response {
    ws.protocols([GRAPHQL_TRANSPORT_WS])
        .on_upgrade(move |socket| serve_socket(socket, state))
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> bool {
    let text = encode_frame(frame).unwrap();
    socket.send(WsMessage::Text(text.into())).await.is_ok()
}

async fn serve_socket(mut socket: WebSocket, state: Arc<ServerState>) {
    state.connections.fetch_add(1, Ordering::SeqCst);

    let init = match socket.recv().await {
        Some(Ok(WsMessage::Text(t))) => decode_frame(t.as_str()).ok(),
        _ => None,
    };
    let Some(Frame::ConnectionInit { payload }) = init else {
        return;
    };
    let token = payload.and_then(|p| p.bearer_token().map(String::from));
    state.recorded.lock().unwrap().ws_inits.push(token);
    if !send_frame(&mut socket, &Frame::ConnectionAck { payload: None }).await {
        return;
    }

    let mut subs: HashMap<String, GraphQLRequest> = HashMap::new();
    let mut changes = state.changes.subscribe();
    let mut kick = state.kick.subscribe();

    loop {
        tokio::select! {
            msg = socket.recv() => match msg {
                Some(Ok(WsMessage::Text(t))) => match decode_frame(t.as_str()) {
                    Ok(Frame::Subscribe { id, payload }) => {
                        state
                            .recorded
                            .lock()
                            .unwrap()
                            .ws_subscribes
                            .push(payload.operation_name.clone().unwrap_or_default());
                        let result = state.resolve(&payload);
                        let frame = if result.data.is_none() {
                            Frame::Error { id: id.clone(), payload: result.errors }
                        } else {
                            Frame::Next { id: id.clone(), payload: result }
                        };
                        if !send_frame(&mut socket, &frame).await {
                            break;
                        }
                        if matches!(frame, Frame::Next { .. }) {
                            subs.insert(id, payload);
                        }
                    }
                    Ok(Frame::Complete { id }) => {
                        subs.remove(&id);
                        state.recorded.lock().unwrap().ws_completes += 1;
                    }
                    Ok(Frame::Ping { .. }) => {
                        if !send_frame(&mut socket, &Frame::pong()).await {
                            break;
                        }
                    }
                    _ => {}
                },
                Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            _ = changes.recv() => {
                let mut alive = true;
                for (id, req) in &subs {
                    let frame = Frame::Next { id: id.clone(), payload: state.resolve(req) };
                    if !send_frame(&mut socket, &frame).await {
                        alive = false;
                        break;
                    }
                }
                if !alive {
                    break;
                }
            }
            _ = kick.recv() => {
                let _ = socket
                    .send(WsMessage::Close(Some(CloseFrame {
                        code: 1012,
                        reason: "service restart".into(),
                    })))
                    .await;
                break;
            }
        }
    }
}

// ── Waiting helpers ──────────────────────────────────────────────────

pub const WAIT: Duration = Duration::from_secs(5);

/// Next item of a stream, failing the test after [`WAIT`].
/// Route client logs to the test harness. `PARLOR_LOG` overrides the level.
pub fn init_tracing() {
    let filter = std::env::var("PARLOR_LOG").unwrap_or_else(|_| "parlor_core=warn".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_test_writer()
        .try_init();
}

pub async fn next<S: futures::Stream + Unpin>(stream: &mut S) -> Option<S::Item> {
    tokio::time::timeout(WAIT, stream.next())
        .await
        .expect("timed out waiting for stream item")
}

/// Wait until the watched value satisfies `f`.
pub async fn wait_for<T>(rx: &mut watch::Receiver<T>, f: impl Fn(&T) -> bool) {
    tokio::time::timeout(WAIT, async {
        loop {
            let done = {
                let value = rx.borrow_and_update();
                f(&*value)
            };
            if done {
                return;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("timed out waiting for state");
}

/// Collect channel events until one matches `f`; returns all seen.
pub async fn wait_event(
    rx: &mut broadcast::Receiver<ChannelEvent>,
    f: impl Fn(&ChannelEvent) -> bool,
) -> Vec<ChannelEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(WAIT, async {
        loop {
            let event = rx.recv().await.unwrap();
            let done = f(&event);
            seen.push(event);
            if done {
                return;
            }
        }
    })
    .await
    .expect("timed out waiting for channel event");
    seen
}

/// Drain whatever events are already queued.
pub fn drain(rx: &mut broadcast::Receiver<ChannelEvent>) -> Vec<ChannelEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    seen
}
