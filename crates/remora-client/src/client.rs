//! JSON-RPC client over one WebSocket at a time.
//!
//! A [`JsonRpcClient`] survives its socket: when the link drops it
//! reconnects in the background (see [`crate::reconnect`]) and presents its
//! session id again. Requests issued while disconnected wait up to the
//! reconnection timeout until the new link has finished that handshake. A
//! request that started under a session which did not survive the handshake
//! is rolled back instead of being sent under a new one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use remora_core::constants::{
    METHOD_CLOSE_SESSION, METHOD_CONNECT, METHOD_SESSION_EXPIRED, PARAM_SESSION_ID, PARAM_VALUE,
};
use remora_core::wire::without_session_id;
use remora_core::{ErrorBody, Message, Request, RequestId, Response, RpcError, SessionId};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::reconnect::{self, ConnectionEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Callback for server notifications (`onEvent` and friends).
pub type NotificationHandler = Arc<dyn Fn(&Request) + Send + Sync>;

/// Callback answering server-to-client requests.
pub type RequestHandler = Arc<dyn Fn(&Request) -> Result<Value, ErrorBody> + Send + Sync>;

const OUTBOUND_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 64;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) struct Inner {
    pub(crate) config: ClientConfig,
    writer: RwLock<Option<mpsc::Sender<String>>>,
    link: Mutex<Option<(u64, CancellationToken)>>,
    next_link: AtomicU64,
    connected: watch::Sender<bool>,
    ready: watch::Sender<bool>,
    pub(crate) reconnecting: AtomicBool,
    pub(crate) closed: CancellationToken,
    pending: DashMap<RequestId, oneshot::Sender<Response>>,
    next_id: AtomicU64,
    session_id: RwLock<Option<SessionId>>,
    on_notification: RwLock<Option<NotificationHandler>>,
    on_request: RwLock<Option<RequestHandler>>,
    events: broadcast::Sender<ConnectionEvent>,
}

/// Cheaply cloneable handle to one logical client connection.
#[derive(Clone)]
pub struct JsonRpcClient {
    pub(crate) inner: Arc<Inner>,
}

impl JsonRpcClient {
    /// Open a socket to `config.url`.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let client = Self::new(config);
        client.open().await?;
        client.mark_ready();
        client.emit(ConnectionEvent::Connected);
        Ok(client)
    }

    fn new(config: ClientConfig) -> Self {
        let (connected, _) = watch::channel(false);
        let (ready, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                writer: RwLock::new(None),
                link: Mutex::new(None),
                next_link: AtomicU64::new(1),
                connected,
                ready,
                reconnecting: AtomicBool::new(false),
                closed: CancellationToken::new(),
                pending: DashMap::new(),
                next_id: AtomicU64::new(1),
                session_id: RwLock::new(None),
                on_notification: RwLock::new(None),
                on_request: RwLock::new(None),
                events,
            }),
        }
    }

    /// Open a fresh socket and make it the current link.
    pub(crate) async fn open(&self) -> Result<(), ClientError> {
        let (ws, _) = connect_async(self.inner.config.url.as_str()).await?;
        self.attach(ws);
        Ok(())
    }

    fn attach(&self, ws: WsStream) {
        let (tx, rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
        let generation = self.inner.next_link.fetch_add(1, Ordering::Relaxed);
        let token = self.inner.closed.child_token();
        if let Some((_, old)) = self.inner.link.lock().replace((generation, token.clone())) {
            old.cancel();
        }
        *self.inner.writer.write() = Some(tx);
        let _ = self.inner.connected.send_replace(true);
        debug!(url = %self.inner.config.url, generation, "link attached");
        let _ = tokio::spawn(run_link(self.clone(), ws, rx, generation, token));
    }

    fn link_lost(&self, generation: u64) {
        {
            let mut link = self.inner.link.lock();
            if link.as_ref().map(|(g, _)| *g) != Some(generation) {
                return;
            }
            *link = None;
        }
        let _ = self.inner.ready.send_replace(false);
        *self.inner.writer.write() = None;
        let _ = self.inner.connected.send_replace(false);
        if self.inner.closed.is_cancelled() {
            return;
        }
        info!(url = %self.inner.config.url, "connection lost");
        self.emit(ConnectionEvent::Disconnected);
        if self.inner.config.auto_reconnect {
            let _ = tokio::spawn(reconnect::reconnect(self.clone()));
        } else {
            self.fail_pending();
        }
    }

    /// Release requests waiting for the link. Called once the session
    /// handshake on a new socket is settled.
    pub(crate) fn mark_ready(&self) {
        if self.inner.writer.read().is_some() {
            let _ = self.inner.ready.send_replace(true);
        }
    }

    fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    pub(crate) fn emit(&self, event: ConnectionEvent) {
        let _ = self.inner.events.send(event);
    }

    /// Drop every pending request; waiters see a connection error.
    pub(crate) fn fail_pending(&self) {
        self.inner.pending.clear();
    }

    // ── Session ─────────────────────────────────────────────────────

    /// Session id learned from the server, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.session_id.read().clone()
    }

    fn capture_session(&self, session_id: SessionId) {
        let mut current = self.inner.session_id.write();
        if current.as_ref() != Some(&session_id) {
            debug!(session_id = %session_id, "session id captured");
            *current = Some(session_id);
        }
    }

    /// Forget `session_id` and roll back requests bound to it.
    ///
    /// Returns `false` if it is not the current session.
    pub(crate) fn expire_session(&self, session_id: &SessionId) -> bool {
        {
            let mut current = self.inner.session_id.write();
            if current.as_ref() != Some(session_id) {
                return false;
            }
            *current = None;
        }
        warn!(session_id = %session_id, "session expired");
        let ids: Vec<RequestId> = self.inner.pending.iter().map(|e| *e.key()).collect();
        let body = RpcError::RolledBack {
            reason: format!("session {session_id} expired"),
        }
        .to_error_body();
        for id in ids {
            if let Some((_, tx)) = self.inner.pending.remove(&id) {
                let _ = tx.send(Response::error(Some(id), body.clone()));
            }
        }
        self.emit(ConnectionEvent::SessionExpired {
            session_id: session_id.clone(),
        });
        true
    }

    /// Whether a socket is currently attached.
    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    /// Whether [`JsonRpcClient::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Connection lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Route server notifications to `handler`.
    pub fn on_notification(&self, handler: impl Fn(&Request) + Send + Sync + 'static) {
        *self.inner.on_notification.write() = Some(Arc::new(handler));
    }

    /// Answer server-to-client requests with `handler`.
    pub fn on_request(
        &self,
        handler: impl Fn(&Request) -> Result<Value, ErrorBody> + Send + Sync + 'static,
    ) {
        *self.inner.on_request.write() = Some(Arc::new(handler));
    }

    // ── Outbound ────────────────────────────────────────────────────

    /// Current writer. `gated` callers wait for the link to be ready; the
    /// session handshake itself goes out as soon as a socket is attached.
    async fn writer(&self, gated: bool) -> Result<mpsc::Sender<String>, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        if !gated || self.is_ready() {
            return self
                .inner
                .writer
                .read()
                .clone()
                .ok_or_else(|| ClientError::Connection("not connected".into()));
        }
        let mut ready = self.inner.ready.subscribe();
        let wait = async { ready.wait_for(|r| *r).await.map(|_| ()) };
        tokio::select! {
            result = tokio::time::timeout(self.inner.config.reconnection_timeout, wait) => {
                if !matches!(result, Ok(Ok(()))) {
                    return Err(ClientError::Connection("not connected".into()));
                }
            }
            () = self.inner.closed.cancelled() => return Err(ClientError::Closed),
        }
        self.inner
            .writer
            .read()
            .clone()
            .ok_or_else(|| ClientError::Connection("not connected".into()))
    }

    /// Fail if the session a call started under was lost while it waited.
    fn ensure_session(&self, started_under: Option<&SessionId>) -> Result<(), ClientError> {
        match started_under {
            Some(session_id) if self.session_id().as_ref() != Some(session_id) => {
                debug!(session_id = %session_id, "call outlived its session");
                Err(ClientError::RolledBack {
                    reason: format!("session {session_id} expired"),
                })
            }
            _ => Ok(()),
        }
    }

    fn prepare(&self, mut request: Request) -> String {
        if request.session_id().is_none() {
            if let Some(session_id) = self.session_id() {
                request.set_session_id(&session_id);
            }
        }
        Message::from(request).to_text()
    }

    /// Send a request and wait for its result.
    ///
    /// `{"value": …}` wrappers and the `sessionId` key are stripped from the
    /// result.
    #[instrument(skip(self, params))]
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        self.call(method, params, true).await
    }

    /// The `connect` handshake on a freshly attached socket.
    pub(crate) async fn handshake(&self, params: Value) -> Result<Value, ClientError> {
        self.call(METHOD_CONNECT, Some(params), false).await
    }

    async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        gated: bool,
    ) -> Result<Value, ClientError> {
        let started_under = self.session_id();
        let writer = self.writer(gated).await?;
        if gated {
            self.ensure_session(started_under.as_ref())?;
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let text = self.prepare(Request::new(id, method, params));
        let (tx, rx) = oneshot::channel();
        let _ = self.inner.pending.insert(id, tx);
        trace!(id, "sending request");

        if writer.send(text).await.is_err() {
            let _ = self.inner.pending.remove(&id);
            return Err(ClientError::Connection("connection lost while sending".into()));
        }

        let timeout = self.inner.config.request_timeout;
        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) if self.is_closed() => return Err(ClientError::Closed),
            Ok(Err(_)) => return Err(ClientError::Connection("connection lost".into())),
            Err(_) => {
                let _ = self.inner.pending.remove(&id);
                return Err(ClientError::Timeout {
                    method: method.to_owned(),
                    timeout,
                });
            }
        };
        match response.into_result() {
            Ok(result) => Ok(unwrap_value(without_session_id(result))),
            Err(body) => Err(ClientError::from_error_body(body)),
        }
    }

    /// Send a notification.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ClientError> {
        let started_under = self.session_id();
        let writer = self.writer(true).await?;
        self.ensure_session(started_under.as_ref())?;
        let text = self.prepare(Request::notification(method, params));
        writer
            .send(text)
            .await
            .map_err(|_| ClientError::Connection("connection lost while sending".into()))
    }

    /// Drop the current socket without closing the session.
    ///
    /// With auto-reconnect enabled the client reconnects and resumes.
    pub fn drop_transport(&self) {
        let _ = self.inner.ready.send_replace(false);
        if let Some((_, token)) = self.inner.link.lock().as_ref() {
            token.cancel();
        }
    }

    /// Close the session on the server and the socket.
    pub async fn close(&self) {
        if self.is_closed() {
            return;
        }
        if self.session_id().is_some() && self.is_ready() {
            if let Ok(Err(e)) = tokio::time::timeout(CLOSE_TIMEOUT, self.request(METHOD_CLOSE_SESSION, None)).await {
                debug!(error = %e, "closeSession failed");
            }
        }
        self.inner.closed.cancel();
        let _ = self.inner.ready.send_replace(false);
        *self.inner.writer.write() = None;
        let _ = self.inner.connected.send_replace(false);
        self.fail_pending();
        info!(url = %self.inner.config.url, "client closed");
    }

    // ── Inbound ─────────────────────────────────────────────────────

    fn handle_incoming(&self, text: &str) {
        match Message::parse(text) {
            Ok(Message::Response(response)) => {
                if let Some(session_id) = response.session_id() {
                    self.capture_session(session_id);
                }
                match response.id.and_then(|id| self.inner.pending.remove(&id)) {
                    Some((_, tx)) => {
                        let _ = tx.send(response);
                    }
                    None => warn!(id = ?response.id, "response for unknown request"),
                }
            }
            Ok(Message::Request(request)) => self.handle_server_request(&request),
            Err(e) => warn!(error = %e, "malformed message from server"),
        }
    }

    fn handle_server_request(&self, request: &Request) {
        if request.method == METHOD_SESSION_EXPIRED {
            if let Some(session_id) = request.param_str(PARAM_SESSION_ID).map(SessionId::from) {
                let _ = self.expire_session(&session_id);
            }
            return;
        }

        let Some(id) = request.id else {
            let handler = self.inner.on_notification.read().clone();
            match handler {
                Some(handler) => handler(request),
                None => debug!(method = %request.method, "notification ignored"),
            }
            return;
        };

        let handler = self.inner.on_request.read().clone();
        let response = match handler {
            Some(handler) => match handler(request) {
                Ok(result) => Response::success(id, result),
                Err(body) => Response::error(Some(id), body),
            },
            None => Response::error(
                Some(id),
                RpcError::MethodNotFound {
                    method: request.method.clone(),
                }
                .to_error_body(),
            ),
        };
        let writer = self.inner.writer.read().clone();
        let sent = writer.is_some_and(|w| w.try_send(Message::from(response).to_text()).is_ok());
        if !sent {
            warn!(method = %request.method, id, "answer to server request not sent");
        }
    }
}

/// Unwrap a lone `{"value": …}` wrapper.
fn unwrap_value(value: Value) -> Value {
    match value {
        Value::Object(mut obj) if obj.len() == 1 && obj.contains_key(PARAM_VALUE) => {
            obj.remove(PARAM_VALUE).unwrap_or(Value::Null)
        }
        other => other,
    }
}

async fn run_link(
    client: JsonRpcClient,
    ws: WsStream,
    mut outbound: mpsc::Receiver<String>,
    generation: u64,
    token: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    loop {
        tokio::select! {
            out = outbound.recv() => {
                let Some(text) = out else { break };
                if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => client.handle_incoming(text.as_str()),
                    Some(Ok(WsMessage::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => client.handle_incoming(text),
                        Err(_) => debug!(len = data.len(), "non-UTF8 binary frame ignored"),
                    },
                    Some(Ok(WsMessage::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            () = token.cancelled() => {
                let _ = ws_tx.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }
    client.link_lost(generation);
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("url", &self.inner.config.url)
            .field("session_id", &self.session_id())
            .field("connected", &self.is_connected())
            .field("pending", &self.inner.pending.len())
            .finish_non_exhaustive()
    }
}
