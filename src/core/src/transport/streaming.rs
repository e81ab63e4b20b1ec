use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parlor_protocol::{
    decode_frame, encode_frame, ConnectionInitPayload, Frame, GraphQLRequest, GraphQLResponse,
    CLOSE_FORBIDDEN, CLOSE_INIT_TIMEOUT, GRAPHQL_TRANSPORT_WS,
};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::Instrument;

use super::backoff::ReconnectBackoff;
use super::events::ChannelEvent;
use crate::credentials::{authorization_header, CredentialProvider};
use crate::error::SyncError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One result (or failure) for a live operation.
pub(crate) type Delivery = Result<GraphQLResponse, SyncError>;

/// Requests from handles and feeds to the channel task.
pub(crate) enum Command {
    Subscribe {
        id: String,
        request: GraphQLRequest,
        tx: mpsc::UnboundedSender<Delivery>,
    },
    Unsubscribe {
        id: String,
    },
    Invalidate,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct StreamingSettings {
    pub url: String,
    pub connect_timeout: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
}

/// Handle to the shared streaming channel.
///
/// The socket is owned by a single background task that is spawned on the
/// first subscription, never at construction. Handles and feeds talk to it
/// through an unbounded command queue, so no caller waits on socket I/O.
/// Subscriptions issued before the socket is acknowledged wait in the queue.
pub struct StreamingChannel {
    settings: StreamingSettings,
    credentials: Arc<dyn CredentialProvider>,
    events: broadcast::Sender<ChannelEvent>,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    next_id: AtomicU64,
}

impl StreamingChannel {
    pub fn new(
        settings: StreamingSettings,
        credentials: Arc<dyn CredentialProvider>,
        events: broadcast::Sender<ChannelEvent>,
    ) -> Self {
        Self {
            settings,
            credentials,
            events,
            commands: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Whether the channel task has been started.
    pub fn is_open(&self) -> bool {
        let guard = match self.commands.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    fn sender(&self) -> mpsc::UnboundedSender<Command> {
        let mut guard = match self.commands.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(tx) = guard.as_ref() {
            if !tx.is_closed() {
                return tx.clone();
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let actor = ChannelActor {
            backoff: ReconnectBackoff::new(
                self.settings.reconnect_base_delay,
                self.settings.reconnect_max_delay,
            ),
            settings: self.settings.clone(),
            credentials: self.credentials.clone(),
            events: self.events.clone(),
            commands: rx,
            subscriptions: HashMap::new(),
            opened: 0,
        };
        tokio::spawn(actor.run());
        tracing::debug!(url = %self.settings.url, "streaming channel task started");
        *guard = Some(tx.clone());
        tx
    }

    /// Register a live operation. Returns its id, the delivery receiver, and
    /// the command sender the feed uses to unsubscribe on drop.
    pub(crate) fn subscribe(
        &self,
        request: GraphQLRequest,
    ) -> (
        String,
        mpsc::UnboundedReceiver<Delivery>,
        mpsc::UnboundedSender<Command>,
    ) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let commands = self.sender();
        let cmd = Command::Subscribe {
            id: id.clone(),
            request,
            tx,
        };
        if let Err(mpsc::error::SendError(Command::Subscribe { tx, .. })) = commands.send(cmd) {
            let _ = tx.send(Err(SyncError::Closed));
        }
        (id, rx, commands)
    }

    /// Tear down the current socket, if any. Active subscriptions are
    /// re-sent on a fresh socket opened with a freshly resolved credential.
    pub fn invalidate(&self) {
        let guard = match self.commands.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_ref() {
            Some(tx) => {
                let _ = tx.send(Command::Invalidate);
            }
            None => tracing::debug!("invalidate before first use; nothing to tear down"),
        }
    }

    /// Stop the channel task. Every open feed ends. A later subscription
    /// starts a new task.
    pub fn shutdown(&self) {
        let mut guard = match self.commands.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(tx) = guard.take() {
            let _ = tx.send(Command::Shutdown);
        }
    }
}

struct ActiveSubscription {
    request: GraphQLRequest,
    tx: mpsc::UnboundedSender<Delivery>,
}

/// Why a socket session ended.
enum SessionEnd {
    /// Last subscription went away; closed until the next one.
    Idle,
    Invalidated,
    Lost { code: Option<u16>, reason: String },
    Shutdown,
}

impl SessionEnd {
    fn lost(e: impl std::fmt::Display) -> Self {
        Self::Lost {
            code: None,
            reason: e.to_string(),
        }
    }

    fn describe(&self) -> (Option<u16>, String) {
        match self {
            Self::Idle => (Some(1000), "no active subscriptions".into()),
            Self::Invalidated => (Some(1000), "credential changed".into()),
            Self::Lost { code, reason } => (*code, reason.clone()),
            Self::Shutdown => (Some(1000), "shutdown".into()),
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

struct ChannelActor {
    settings: StreamingSettings,
    credentials: Arc<dyn CredentialProvider>,
    events: broadcast::Sender<ChannelEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    subscriptions: HashMap<String, ActiveSubscription>,
    backoff: ReconnectBackoff,
    opened: u64,
}

impl ChannelActor {
    async fn run(mut self) {
        loop {
            // No socket while nothing is subscribed.
            while self.subscriptions.is_empty() {
                match self.commands.recv().await {
                    Some(cmd) => {
                        if let Flow::Stop = self.apply_offline(cmd) {
                            return;
                        }
                    }
                    None => return,
                }
            }

            let end = match self.open().await {
                Ok(mut ws) => {
                    self.backoff.reset();
                    let span = tracing::info_span!("stream", connection = self.opened);
                    self.drive(&mut ws).instrument(span).await
                }
                Err(e) => {
                    tracing::warn!(url = %self.settings.url, error = %e, "streaming connect failed");
                    SessionEnd::lost(e)
                }
            };

            if let SessionEnd::Invalidated = end {
                self.emit(ChannelEvent::Invalidated);
            }
            let (code, reason) = end.describe();
            tracing::info!(?code, %reason, "streaming channel closed");
            self.emit(ChannelEvent::Closed { code, reason });

            match end {
                SessionEnd::Shutdown => return,
                SessionEnd::Idle | SessionEnd::Invalidated => continue,
                SessionEnd::Lost { code, .. } => {
                    match code {
                        Some(CLOSE_FORBIDDEN) => tracing::warn!("server rejected the credential"),
                        Some(CLOSE_INIT_TIMEOUT) => tracing::warn!("server gave up waiting for connection_init"),
                        _ => {}
                    }
                    if self.subscriptions.is_empty() {
                        continue;
                    }
                    let delay = self.backoff.next_delay();
                    let failures = self.backoff.attempt();
                    tracing::info!(failures, ?delay, "streaming channel reconnecting");
                    self.emit(ChannelEvent::Reconnecting { failures, delay });
                    if let Flow::Stop = self.wait(delay).await {
                        return;
                    }
                }
            }
        }
    }

    fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    /// Handle a command while no socket is open.
    fn apply_offline(&mut self, cmd: Command) -> Flow {
        match cmd {
            Command::Subscribe { id, request, tx } => {
                self.subscriptions
                    .insert(id, ActiveSubscription { request, tx });
            }
            Command::Unsubscribe { id } => {
                self.subscriptions.remove(&id);
            }
            Command::Invalidate => {}
            Command::Shutdown => return Flow::Stop,
        }
        Flow::Continue
    }

    /// Sleep out a reconnect delay. A credential change cuts the wait short.
    async fn wait(&mut self, delay: Duration) -> Flow {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Flow::Continue,
                cmd = self.commands.recv() => match cmd {
                    None | Some(Command::Shutdown) => return Flow::Stop,
                    Some(Command::Invalidate) => return Flow::Continue,
                    Some(other) => {
                        self.apply_offline(other);
                        if self.subscriptions.is_empty() {
                            return Flow::Continue;
                        }
                    }
                }
            }
        }
    }

    async fn open(&mut self) -> Result<WsStream, SyncError> {
        self.opened += 1;
        self.emit(ChannelEvent::Connecting {
            attempt: self.opened,
        });

        let token = self.credentials.resolve().await;
        authorization_header(token.as_deref())?;
        let init = Frame::ConnectionInit {
            payload: Some(ConnectionInitPayload::with_token(token.as_deref())),
        };

        let mut request = self
            .settings
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        request.headers_mut().insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(GRAPHQL_TRANSPORT_WS),
        );

        let timeout = self.settings.connect_timeout;
        let ws = tokio::time::timeout(timeout, handshake(request, init))
            .await
            .map_err(|_| SyncError::Transport(format!("no connection_ack within {timeout:?}")))??;

        tracing::info!(url = %self.settings.url, attempt = self.opened, "streaming channel connected");
        self.emit(ChannelEvent::Connected);
        Ok(ws)
    }

    async fn drive(&mut self, ws: &mut WsStream) -> SessionEnd {
        let active: Vec<(String, GraphQLRequest)> = self
            .subscriptions
            .iter()
            .map(|(id, sub)| (id.clone(), sub.request.clone()))
            .collect();
        for (id, request) in active {
            tracing::debug!(%id, "subscribing");
            if let Err(e) = send_frame(ws, &Frame::subscribe(id, request)).await {
                return SessionEnd::lost(e);
            }
        }

        loop {
            tokio::select! {
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = self.handle_text(ws, text.as_str()).await {
                            return SessionEnd::lost(e);
                        }
                        if self.subscriptions.is_empty() {
                            close(ws, "no active subscriptions").await;
                            return SessionEnd::Idle;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return SessionEnd::Lost {
                            code: frame.as_ref().map(|f| u16::from(f.code)),
                            reason: frame
                                .as_ref()
                                .map(|f| f.reason.as_str().to_string())
                                .unwrap_or_else(|| "closed by server".into()),
                        };
                    }
                    // tungstenite answers pings itself.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SessionEnd::lost(e),
                    None => return SessionEnd::lost("socket stream ended"),
                },
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Subscribe { id, request, tx }) => {
                        let frame = Frame::subscribe(id.clone(), request.clone());
                        self.subscriptions.insert(id, ActiveSubscription { request, tx });
                        if let Err(e) = send_frame(ws, &frame).await {
                            return SessionEnd::lost(e);
                        }
                    }
                    Some(Command::Unsubscribe { id }) => {
                        if self.subscriptions.remove(&id).is_some() {
                            tracing::debug!(%id, "unsubscribing");
                            if let Err(e) = send_frame(ws, &Frame::complete(id)).await {
                                return SessionEnd::lost(e);
                            }
                        }
                        if self.subscriptions.is_empty() {
                            close(ws, "no active subscriptions").await;
                            return SessionEnd::Idle;
                        }
                    }
                    Some(Command::Invalidate) => {
                        close(ws, "credential changed").await;
                        return SessionEnd::Invalidated;
                    }
                    Some(Command::Shutdown) | None => {
                        close(ws, "shutdown").await;
                        return SessionEnd::Shutdown;
                    }
                },
            }
        }
    }

    async fn handle_text(&mut self, ws: &mut WsStream, text: &str) -> Result<(), SyncError> {
        let frame = match decode_frame(text) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "invalid frame from server");
                return Ok(());
            }
        };

        match frame {
            Frame::Next { id, payload } => self.deliver(&id, Ok(payload)),
            Frame::Error { id, payload } => {
                tracing::warn!(%id, "subscription rejected by server");
                // Stays registered: it is re-sent on the next socket.
                self.deliver(&id, Err(SyncError::Operation(payload)));
            }
            Frame::Complete { id } => {
                if self.subscriptions.remove(&id).is_some() {
                    tracing::debug!(%id, "subscription completed by server");
                }
            }
            Frame::Ping { .. } => send_frame(ws, &Frame::pong()).await?,
            Frame::Pong { .. } | Frame::ConnectionAck { .. } => {}
            other => tracing::debug!(?other, "ignoring unexpected frame"),
        }
        Ok(())
    }

    fn deliver(&self, id: &str, item: Delivery) {
        match self.subscriptions.get(id) {
            // A closed receiver means the feed is being dropped; its
            // Unsubscribe command is already queued.
            Some(sub) => {
                let _ = sub.tx.send(item);
            }
            None => tracing::debug!(%id, "delivery for unknown operation"),
        }
    }
}

/// Open the socket and complete the `connection_init` / `connection_ack`
/// exchange.
async fn handshake(
    request: tokio_tungstenite::tungstenite::handshake::client::Request,
    init: Frame,
) -> Result<WsStream, SyncError> {
    let (mut ws, _resp) = connect_async(request)
        .await
        .map_err(|e| SyncError::Transport(e.to_string()))?;
    send_frame(&mut ws, &init).await?;

    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => match decode_frame(text.as_str())? {
                Frame::ConnectionAck { .. } => return Ok(ws),
                Frame::Ping { .. } => send_frame(&mut ws, &Frame::pong()).await?,
                other => {
                    return Err(SyncError::Transport(format!(
                        "unexpected frame before connection_ack: {other:?}"
                    )))
                }
            },
            Some(Ok(Message::Close(frame))) => {
                let reason = match frame {
                    Some(f) => format!("closed during handshake: {} {}", u16::from(f.code), f.reason.as_str()),
                    None => "closed during handshake".to_string(),
                };
                return Err(SyncError::Transport(reason));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(SyncError::Transport(e.to_string())),
            None => return Err(SyncError::Transport("socket ended during handshake".into())),
        }
    }
}

async fn send_frame(ws: &mut WsStream, frame: &Frame) -> Result<(), SyncError> {
    let text = encode_frame(frame)?;
    ws.send(Message::Text(text.into()))
        .await
        .map_err(|e| SyncError::Transport(e.to_string()))
}

async fn close(ws: &mut WsStream, reason: &'static str) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: reason.into(),
    };
    if let Err(e) = ws.close(Some(frame)).await {
        tracing::debug!(error = %e, "close handshake failed");
    }
}
