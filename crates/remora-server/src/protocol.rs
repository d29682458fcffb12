//! Transport-independent message processing.
//!
//! [`ProtocolManager::process_message`] takes one inbound text frame from any
//! transport and returns the response to write back, if any. It classifies
//! the session (new or resumed), answers the protocol methods itself
//! (`ping`, `connect`, `poll`, `closeSession`) and hands every other request
//! to the [`MethodRegistry`] inside a [`Transaction`].
//!
//! It also owns session teardown: the close timer armed when a transport
//! goes away, explicit closes, and shutdown.

use std::sync::Arc;

use metrics::counter;
use remora_core::constants::{
    METHOD_CLOSE_SESSION, METHOD_CONNECT, METHOD_PING, METHOD_POLL, METHOD_SESSION_EXPIRED,
    PARAM_SESSION_ID, PARAM_VALUE, PONG, RECONNECTION_SUCCESSFUL,
};
use remora_core::wire::without_session_id;
use remora_core::{ConnectionId, Message, Request, Response, RpcError, SessionId};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::metrics::SESSIONS_CLOSED_TOTAL;
use crate::rpc::context::RpcContext;
use crate::rpc::registry::MethodRegistry;
use crate::session::{Session, SessionManager};
use crate::transaction::Transaction;
use crate::transport::Transport;

/// Routes inbound messages to sessions and handlers. Cheap to clone.
#[derive(Clone)]
pub struct ProtocolManager {
    registry: Arc<MethodRegistry>,
    ctx: Arc<RpcContext>,
}

impl ProtocolManager {
    /// Create a manager over `registry` and `ctx`.
    pub fn new(registry: Arc<MethodRegistry>, ctx: Arc<RpcContext>) -> Self {
        Self { registry, ctx }
    }

    /// Handler context.
    pub fn context(&self) -> &Arc<RpcContext> {
        &self.ctx
    }

    /// Session registry.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.ctx.sessions
    }

    /// Method registry.
    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }

    /// Process one inbound message. Returns the response to send back.
    #[instrument(skip_all, fields(transport_id = %transport.id()))]
    pub async fn process_message(
        &self,
        text: &str,
        transport: &Arc<dyn Transport>,
    ) -> Option<Response> {
        match Message::parse(text) {
            Ok(Message::Request(request)) => self.process_request(request, transport).await,
            Ok(Message::Response(response)) => {
                self.process_response(response, transport);
                None
            }
            Err(e) => {
                warn!(error = %e, "rejecting malformed message");
                Some(Response::error(None, e.to_rpc_error().to_error_body()))
            }
        }
    }

    async fn process_request(
        &self,
        request: Request,
        transport: &Arc<dyn Transport>,
    ) -> Option<Response> {
        match request.method.as_str() {
            METHOD_PING => {
                trace!(id = ?request.id, "ping");
                self.process_ping(request)
            }
            METHOD_CONNECT => {
                debug!(id = ?request.id, "connect");
                self.process_connect(request, transport)
            }
            _ => {
                debug!(method = %request.method, id = ?request.id, "request");
                let (session, new) = self
                    .sessions()
                    .get_or_create(request.session_id().as_ref(), transport);
                match request.method.as_str() {
                    METHOD_POLL => self.process_poll(request, &session),
                    METHOD_CLOSE_SESSION => self.process_close(request, &session),
                    _ => self.dispatch(request, session, new).await,
                }
            }
        }
    }

    fn process_ping(&self, request: Request) -> Option<Response> {
        let id = request.id?;
        let session_id = request.session_id();
        let payload = request.params.map_or(Value::Null, without_session_id);
        let result = if payload.is_null() {
            json!({ PARAM_VALUE: PONG })
        } else {
            payload
        };
        let mut response = Response::success(id, result);
        if let Some(session_id) = session_id.filter(|_| self.sessions().options().inject_session_id) {
            response.set_session_id(&session_id);
        }
        Some(response)
    }

    fn process_connect(&self, request: Request, transport: &Arc<dyn Transport>) -> Option<Response> {
        let id = request.id;
        let Some(session_id) = request.session_id() else {
            return id.map(|id| {
                Response::error(
                    Some(id),
                    RpcError::invalid_params("sessionId is mandatory in a reconnection request")
                        .to_error_body(),
                )
            });
        };

        if let Some(session) = self.sessions().get(&session_id) {
            session.mark_resumed();
            session.touch();
            self.sessions().bind(&session, transport.clone());
            info!(session_id = %session_id, transport_id = %transport.id(), "session reconnected");
            return id.map(|id| {
                let mut response = Response::success(id, Value::String(RECONNECTION_SUCCESSFUL.into()));
                response.set_session_id(&session_id);
                response
            });
        }

        warn!(session_id = %session_id, "reconnection to unknown session");
        if transport.can_push() {
            let notice = Request::notification(
                METHOD_SESSION_EXPIRED,
                Some(json!({ PARAM_SESSION_ID: session_id })),
            );
            if !transport.send(Arc::new(Message::from(notice).to_text())) {
                debug!(session_id = %session_id, "sessionExpired notice not enqueued");
            }
        } else {
            debug!(
                session_id = %session_id,
                transport_id = %transport.id(),
                "no push channel, expiry reported in the error response only"
            );
        }
        id.map(|id| Response::error(Some(id), RpcError::SessionExpired { session_id }.to_error_body()))
    }

    fn process_poll(&self, request: Request, session: &Arc<Session>) -> Option<Response> {
        let payload = request.params.map_or(Value::Null, without_session_id);
        let answers = match payload.get(PARAM_VALUE).cloned().unwrap_or(payload) {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                warn!(session_id = %session.id(), "poll params are not a list: {other}");
                Vec::new()
            }
        };
        for item in answers {
            match serde_json::from_value::<Response>(item) {
                Ok(response) => {
                    let _ = session.handle_response(response);
                }
                Err(e) => warn!(session_id = %session.id(), error = %e, "invalid response in poll"),
            }
        }
        let outbound = session.drain_outbox();
        trace!(session_id = %session.id(), count = outbound.len(), "poll");
        let id = request.id?;
        let mut response = Response::success(id, Value::Array(outbound));
        if session.injects_session_id() {
            response.set_session_id(session.id());
        }
        Some(response)
    }

    fn process_close(&self, request: Request, session: &Arc<Session>) -> Option<Response> {
        self.close_session(session.id(), "closed by client");
        request.id.map(|id| Response::success(id, Value::Null))
    }

    #[instrument(skip_all, fields(session_id = %session.id(), method = %request.method))]
    async fn dispatch(&self, request: Request, session: Arc<Session>, new: bool) -> Option<Response> {
        let request_id = request.id;
        let (tx, rx) = Transaction::new(&request, session, new);
        let params = request.params.map_or(Value::Null, without_session_id);
        self.registry.dispatch(params, &tx, &self.ctx).await;
        drop(tx);

        let id = request_id?;
        match rx.await {
            Ok(response) => Some(response),
            Err(_) => {
                error!(method = %request.method, id, "transaction dropped without a response");
                Some(Response::error(
                    Some(id),
                    RpcError::RolledBack {
                        reason: "request abandoned by its handler".into(),
                    }
                    .to_error_body(),
                ))
            }
        }
    }

    /// A client answered a server-initiated request.
    fn process_response(&self, response: Response, transport: &Arc<dyn Transport>) {
        let session = self
            .sessions()
            .get_by_transport(transport.id())
            .or_else(|| response.session_id().and_then(|id| self.sessions().get(&id)));
        match session {
            Some(session) => {
                let _ = session.handle_response(response);
            }
            None => warn!(id = ?response.id, "response for unknown session dropped"),
        }
    }

    // ── teardown ────────────────────────────────────────────────────

    /// Close a session: roll back its async work and release its objects.
    pub fn close_session(&self, session_id: &SessionId, reason: &str) -> bool {
        let Some(session) = self.sessions().remove(session_id) else {
            return false;
        };
        session.close(reason);
        let released = self.ctx.objects.release_session(session_id);
        counter!(SESSIONS_CLOSED_TOTAL).increment(1);
        info!(session_id = %session_id, reason, released = released.len(), "session removed");
        true
    }

    /// The transport `transport_id` went away. Unbind its session and close
    /// it unless the client reconnects within the reconnection timeout.
    pub fn close_session_if_timeout(&self, transport_id: &ConnectionId, reason: &str) {
        let Some(session) = self.sessions().unbind_transport(transport_id) else {
            return;
        };
        let timeout = session.reconnection_timeout();
        let token = CancellationToken::new();
        session.set_close_timer(token.clone());
        debug!(
            session_id = %session.id(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "close timer armed"
        );

        let manager = self.clone();
        let reason = reason.to_owned();
        let _ = tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    let _ = manager.close_session(session.id(), &reason);
                }
            }
        });
    }

    /// Close every session and release every object.
    pub fn shutdown(&self) -> usize {
        let sessions = self.sessions().all();
        for session in &sessions {
            let _ = self.close_session(session.id(), "server shutting down");
        }
        let dropped = self.ctx.objects.release_all();
        info!(sessions = sessions.len(), objects = dropped, "protocol shut down");
        sessions.len()
    }
}

impl std::fmt::Debug for ProtocolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolManager")
            .field("methods", &self.registry.methods())
            .field("ctx", &self.ctx)
            .finish()
    }
}
