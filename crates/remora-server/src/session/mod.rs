//! Server-side sessions.
//!
//! A [`Session`] is the durable logical channel to one client. It outlives
//! the transport it is bound to: when a socket drops, the session waits up to
//! its reconnection timeout for the client to come back before it is closed.
//!
//! Outbound delivery depends on the bound transport:
//! - a push transport receives the message immediately;
//! - a polling session (one that has been reached over HTTP) buffers it until
//!   the next `poll`;
//! - otherwise the send fails with [`SessionError::Disconnected`].

pub mod manager;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use remora_core::wire::without_session_id;
use remora_core::{ConnectionId, Message, Request, RequestId, Response, SessionId};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::errors::SessionError;
use crate::metrics::POLL_BUFFER_DROPS_TOTAL;
use crate::transaction::{Transaction, TransactionInner};
use crate::transport::Transport;

pub use manager::SessionManager;

/// Per-session settings, taken from [`ServerConfig`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    /// How long the session outlives its transport.
    pub reconnection_timeout: Duration,
    /// How long a server-to-client request waits for its answer.
    pub request_timeout: Duration,
    /// Add `sessionId` to results and outbound params.
    pub inject_session_id: bool,
    /// Outbox capacity for polling sessions.
    pub max_buffered: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for SessionOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            reconnection_timeout: config.reconnection_timeout(),
            request_timeout: config.handler_timeout(),
            inject_session_id: config.inject_session_id,
            max_buffered: config.max_buffered_messages.max(1),
        }
    }
}

/// One logical client session.
pub struct Session {
    id: SessionId,
    options: SessionOptions,
    created_at: DateTime<Utc>,
    new: AtomicBool,
    last_activity: Mutex<Instant>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    polling: AtomicBool,
    outbox: Mutex<VecDeque<Value>>,
    next_request_id: AtomicU64,
    pending_requests: DashMap<RequestId, oneshot::Sender<Response>>,
    transactions: DashMap<u64, Weak<TransactionInner>>,
    close_timer: Mutex<Option<CancellationToken>>,
    closed: CancellationToken,
}

impl Session {
    /// Create an unbound session.
    pub fn new(id: SessionId, options: SessionOptions) -> Self {
        Self {
            id,
            options,
            created_at: Utc::now(),
            new: AtomicBool::new(true),
            last_activity: Mutex::new(Instant::now()),
            transport: RwLock::new(None),
            polling: AtomicBool::new(false),
            outbox: Mutex::new(VecDeque::new()),
            next_request_id: AtomicU64::new(1),
            pending_requests: DashMap::new(),
            transactions: DashMap::new(),
            close_timer: Mutex::new(None),
            closed: CancellationToken::new(),
        }
    }

    /// Session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Whether no request other than the first has been seen.
    pub fn is_new(&self) -> bool {
        self.new.load(Ordering::Acquire)
    }

    pub(crate) fn mark_resumed(&self) {
        self.new.store(false, Ordering::Release);
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Record client activity.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last client activity.
    pub fn idle_time(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// How long the session survives without a transport.
    pub fn reconnection_timeout(&self) -> Duration {
        self.options.reconnection_timeout
    }

    /// Whether results carry the session id.
    pub fn injects_session_id(&self) -> bool {
        self.options.inject_session_id
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    // ── transport binding ───────────────────────────────────────────

    /// Currently bound transport.
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().clone()
    }

    /// Id of the currently bound transport.
    pub fn transport_id(&self) -> Option<ConnectionId> {
        self.transport.read().as_ref().map(|t| t.id().clone())
    }

    /// Whether messages are buffered for polling.
    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Acquire)
    }

    /// Bind `transport`, returning the one it replaces.
    pub fn bind_transport(&self, transport: Arc<dyn Transport>) -> Option<Arc<dyn Transport>> {
        self.polling.store(!transport.can_push(), Ordering::Release);
        let previous = self.transport.write().replace(transport);
        if self.polling.load(Ordering::Acquire) {
            return previous;
        }
        self.flush_outbox();
        previous
    }

    /// Unbind the transport if it is still `transport_id`.
    pub fn unbind_transport(&self, transport_id: &ConnectionId) -> bool {
        let mut slot = self.transport.write();
        if slot.as_ref().is_some_and(|t| t.id() == transport_id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    // Buffered messages of a session that switched from polling to push.
    fn flush_outbox(&self) {
        let pending: Vec<Value> = self.outbox.lock().drain(..).collect();
        if pending.is_empty() {
            return;
        }
        let Some(transport) = self.transport() else {
            return;
        };
        debug!(session_id = %self.id, count = pending.len(), "flushing buffered messages");
        for value in pending {
            let _ = transport.send(Arc::new(value.to_string()));
        }
    }

    // ── close timer ─────────────────────────────────────────────────

    /// Install a close timer, cancelling any earlier one.
    pub fn set_close_timer(&self, token: CancellationToken) {
        if let Some(old) = self.close_timer.lock().replace(token) {
            old.cancel();
        }
    }

    /// Cancel the pending close timer. Returns whether one was armed.
    pub fn cancel_close_timer(&self) -> bool {
        match self.close_timer.lock().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    // ── outbound ────────────────────────────────────────────────────

    fn deliver(&self, message: &Message) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed {
                session_id: self.id.clone(),
            });
        }
        match self.transport() {
            Some(transport) if transport.can_push() => {
                if transport.send(Arc::new(message.to_text())) {
                    Ok(())
                } else {
                    Err(SessionError::SendFailed {
                        session_id: self.id.clone(),
                    })
                }
            }
            Some(_) => {
                self.buffer(message);
                Ok(())
            }
            None if self.is_polling() => {
                self.buffer(message);
                Ok(())
            }
            None => Err(SessionError::Disconnected {
                session_id: self.id.clone(),
            }),
        }
    }

    fn buffer(&self, message: &Message) {
        let value = serde_json::to_value(message).unwrap_or(Value::Null);
        let mut outbox = self.outbox.lock();
        if outbox.len() >= self.options.max_buffered {
            let _ = outbox.pop_front();
            counter!(POLL_BUFFER_DROPS_TOTAL).increment(1);
            warn!(session_id = %self.id, "poll buffer full, dropping oldest message");
        }
        outbox.push_back(value);
    }

    /// Take everything buffered for the next poll.
    pub fn drain_outbox(&self) -> Vec<Value> {
        self.outbox.lock().drain(..).collect()
    }

    /// Number of buffered messages.
    pub fn outbox_len(&self) -> usize {
        self.outbox.lock().len()
    }

    /// Send a notification to the client.
    pub fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), SessionError> {
        let mut request = Request::notification(method, params);
        if self.options.inject_session_id {
            request.set_session_id(&self.id);
        }
        self.deliver(&Message::from(request))
    }

    /// Send a request to the client and wait for its answer.
    pub async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value, SessionError> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let _ = self.pending_requests.insert(id, tx);

        let mut request = Request::new(id, method, params);
        if self.options.inject_session_id {
            request.set_session_id(&self.id);
        }
        if let Err(e) = self.deliver(&Message::from(request)) {
            let _ = self.pending_requests.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.options.request_timeout, rx).await {
            Ok(Ok(response)) => response
                .into_result()
                .map(without_session_id)
                .map_err(SessionError::Remote),
            Ok(Err(_)) => Err(SessionError::Closed {
                session_id: self.id.clone(),
            }),
            Err(_) => {
                let _ = self.pending_requests.remove(&id);
                Err(SessionError::Timeout {
                    method: method.to_owned(),
                    timeout: self.options.request_timeout,
                })
            }
        }
    }

    /// Route a client response to the server request awaiting it.
    pub fn handle_response(&self, response: Response) -> bool {
        let Some(id) = response.id else {
            warn!(session_id = %self.id, "response without id dropped");
            return false;
        };
        match self.pending_requests.remove(&id) {
            Some((_, waiter)) => waiter.send(response).is_ok(),
            None => {
                warn!(session_id = %self.id, id, "response to unknown request dropped");
                false
            }
        }
    }

    /// Server requests awaiting an answer.
    pub fn pending_request_count(&self) -> usize {
        self.pending_requests.len()
    }

    // ── async transactions ──────────────────────────────────────────

    pub(crate) fn register_transaction(&self, serial: u64, inner: Weak<TransactionInner>) {
        let _ = self.transactions.insert(serial, inner);
    }

    pub(crate) fn unregister_transaction(&self, serial: u64) {
        let _ = self.transactions.remove(&serial);
    }

    /// Async transactions not yet completed.
    pub fn pending_transaction_count(&self) -> usize {
        self.transactions.iter().filter(|t| t.strong_count() > 0).count()
    }

    // ── close ───────────────────────────────────────────────────────

    /// Close the session: roll back pending async transactions, fail pending
    /// server requests and drop buffered output. Idempotent.
    ///
    /// The transport is left open; it may serve another session.
    pub fn close(&self, reason: &str) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        let _ = self.cancel_close_timer();

        let pending: Vec<Transaction> = self
            .transactions
            .iter()
            .filter_map(|t| t.value().upgrade())
            .map(Transaction::from_inner)
            .collect();
        self.transactions.clear();
        for tx in &pending {
            let _ = tx.rollback(reason);
        }

        self.pending_requests.clear();
        self.outbox.lock().clear();
        let _ = self.transport.write().take();
        info!(
            session_id = %self.id,
            reason,
            rolled_back = pending.len(),
            "session closed"
        );
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("new", &self.is_new())
            .field("transport", &self.transport_id())
            .field("polling", &self.is_polling())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::websocket::connection::ClientConnection;
    use assert_matches::assert_matches;
    use remora_core::ErrorBody;
    use serde_json::json;
    use tokio::sync::mpsc;

    /// Push transport over a channel, for tests.
    pub(crate) fn push_transport(
        id: &str,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(64);
        (Arc::new(ClientConnection::new(ConnectionId::from(id), tx)), rx)
    }

    /// Transport that never pushes.
    pub(crate) struct PollOnly(pub ConnectionId);

    impl Transport for PollOnly {
        fn id(&self) -> &ConnectionId {
            &self.0
        }
        fn can_push(&self) -> bool {
            false
        }
        fn send(&self, _message: Arc<String>) -> bool {
            false
        }
        fn close(&self) {}
    }

    fn session() -> Session {
        Session::new(SessionId::from("s1"), SessionOptions::default())
    }

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn unbound_session_is_disconnected() {
        let s = session();
        let err = s.send_notification("onEvent", None).unwrap_err();
        assert_matches!(err, SessionError::Disconnected { .. });
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn push_transport_receives_notification_with_session_id() {
        let s = session();
        let (conn, mut rx) = push_transport("c1");
        assert!(s.bind_transport(conn).is_none());
        s.send_notification("onEvent", Some(json!({"value": 1}))).unwrap();
        let msg = parse(&rx.recv().await.unwrap());
        assert_eq!(msg["method"], "onEvent");
        assert_eq!(msg["params"]["sessionId"], "s1");
        assert!(msg.get("id").is_none());
    }

    #[test]
    fn polling_session_buffers_after_unbind() {
        let s = session();
        let _ = s.bind_transport(Arc::new(PollOnly(ConnectionId::from("h1"))));
        s.send_notification("a", None).unwrap();
        assert!(s.unbind_transport(&ConnectionId::from("h1")));
        s.send_notification("b", None).unwrap();
        let drained = s.drain_outbox();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1]["method"], "b");
        assert_eq!(s.outbox_len(), 0);
    }

    #[test]
    fn outbox_drops_oldest_when_full() {
        let s = Session::new(
            SessionId::from("s1"),
            SessionOptions {
                max_buffered: 2,
                ..SessionOptions::default()
            },
        );
        let _ = s.bind_transport(Arc::new(PollOnly(ConnectionId::from("h1"))));
        for m in ["a", "b", "c"] {
            s.send_notification(m, None).unwrap();
        }
        let methods: Vec<Value> = s.drain_outbox().into_iter().map(|v| v["method"].clone()).collect();
        assert_eq!(methods, vec![json!("b"), json!("c")]);
    }

    #[tokio::test]
    async fn switching_to_push_flushes_buffer() {
        let s = session();
        let _ = s.bind_transport(Arc::new(PollOnly(ConnectionId::from("h1"))));
        s.send_notification("queued", None).unwrap();
        let (conn, mut rx) = push_transport("c2");
        let _ = s.bind_transport(conn);
        assert_eq!(parse(&rx.recv().await.unwrap())["method"], "queued");
        assert_eq!(s.outbox_len(), 0);
    }

    #[test]
    fn unbind_ignores_stale_transport() {
        let s = session();
        let (a, _ra) = push_transport("a");
        let (b, _rb) = push_transport("b");
        let _ = s.bind_transport(a);
        let _ = s.bind_transport(b);
        assert!(!s.unbind_transport(&ConnectionId::from("a")));
        assert_eq!(s.transport_id(), Some(ConnectionId::from("b")));
    }

    #[tokio::test]
    async fn server_request_resolves_with_client_response() {
        let s = Arc::new(session());
        let (conn, mut rx) = push_transport("c1");
        let _ = s.bind_transport(conn);

        let s2 = s.clone();
        let call = tokio::spawn(async move { s2.send_request("getInfo", None).await });
        let req = parse(&rx.recv().await.unwrap());
        assert_eq!(req["method"], "getInfo");
        let id = req["id"].as_u64().unwrap();

        let mut resp = Response::success(id, json!({"ok": true}));
        resp.set_session_id(s.id());
        assert!(s.handle_response(resp));
        assert_eq!(call.await.unwrap().unwrap(), json!({"ok": true}));
        assert_eq!(s.pending_request_count(), 0);
    }

    #[tokio::test]
    async fn server_request_surfaces_client_error() {
        let s = Arc::new(session());
        let (conn, mut rx) = push_transport("c1");
        let _ = s.bind_transport(conn);
        let s2 = s.clone();
        let call = tokio::spawn(async move { s2.send_request("x", None).await });
        let id = parse(&rx.recv().await.unwrap())["id"].as_u64().unwrap();
        let _ = s.handle_response(Response::error(
            Some(id),
            ErrorBody::new(-32601, None, "unsupported", None),
        ));
        assert_matches!(call.await.unwrap(), Err(SessionError::Remote(body)) if body.code == -32601);
    }

    #[tokio::test(start_paused = true)]
    async fn server_request_times_out() {
        let s = Session::new(
            SessionId::from("s1"),
            SessionOptions {
                request_timeout: Duration::from_millis(200),
                ..SessionOptions::default()
            },
        );
        let (conn, _rx) = push_transport("c1");
        let _ = s.bind_transport(conn);
        let err = s.send_request("slow", None).await.unwrap_err();
        assert_matches!(err, SessionError::Timeout { ref method, .. } if method == "slow");
        assert_eq!(s.pending_request_count(), 0);
    }

    #[tokio::test]
    async fn close_fails_pending_requests_and_further_sends() {
        let s = Arc::new(session());
        let (conn, mut rx) = push_transport("c1");
        let _ = s.bind_transport(conn);
        let s2 = s.clone();
        let call = tokio::spawn(async move { s2.send_request("x", None).await });
        let _ = rx.recv().await.unwrap();
        s.close("test");
        assert_matches!(call.await.unwrap(), Err(SessionError::Closed { .. }));
        assert!(s.is_closed());
        assert_matches!(
            s.send_notification("late", None),
            Err(SessionError::Closed { .. })
        );
        s.close("twice");
    }

    #[test]
    fn close_timer_replaced_and_cancelled() {
        let s = session();
        let first = CancellationToken::new();
        let second = CancellationToken::new();
        s.set_close_timer(first.clone());
        s.set_close_timer(second.clone());
        assert!(first.is_cancelled());
        assert!(s.cancel_close_timer());
        assert!(second.is_cancelled());
        assert!(!s.cancel_close_timer());
    }

    #[test]
    fn response_to_unknown_request_is_dropped() {
        let s = session();
        assert!(!s.handle_response(Response::success(99, Value::Null)));
    }
}
