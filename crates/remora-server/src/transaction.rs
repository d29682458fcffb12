//! One inbound request and its single response.
//!
//! Every completion path (`send_response`, `send_void_response`,
//! `send_error`, `rollback`) funnels through one compare-and-set on the
//! `responded` flag, so at most one response is ever produced regardless of
//! how many tasks race to answer.
//!
//! A handler that cannot answer before returning calls
//! [`Transaction::start_async`] and hands a clone to a worker. The session
//! tracks async transactions weakly and rolls them back when it closes. If
//! every clone is dropped without an answer, the waiting side observes the
//! closed channel and answers with a rollback error.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use metrics::counter;
use parking_lot::Mutex;
use remora_core::{ErrorBody, Request, RequestId, Response, RpcError};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::errors::TransactionError;
use crate::metrics::TRANSACTIONS_ROLLED_BACK_TOTAL;
use crate::session::Session;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

pub(crate) struct TransactionInner {
    serial: u64,
    request_id: Option<RequestId>,
    method: String,
    session: Arc<Session>,
    new_session: bool,
    responded: AtomicBool,
    async_mode: AtomicBool,
    reply: Mutex<Option<oneshot::Sender<Response>>>,
}

/// Handle on one in-flight request. Clones share the response slot.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    /// Open a transaction for `request` on `session`.
    ///
    /// The receiver yields the response once one is sent.
    pub fn new(
        request: &Request,
        session: Arc<Session>,
        new_session: bool,
    ) -> (Self, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        let inner = TransactionInner {
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            request_id: request.id,
            method: request.method.clone(),
            session,
            new_session,
            responded: AtomicBool::new(false),
            async_mode: AtomicBool::new(false),
            reply: Mutex::new(Some(tx)),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    pub(crate) fn from_inner(inner: Arc<TransactionInner>) -> Self {
        Self { inner }
    }

    /// Request id, `None` for notifications.
    pub fn request_id(&self) -> Option<RequestId> {
        self.inner.request_id
    }

    /// Request method.
    pub fn method(&self) -> &str {
        &self.inner.method
    }

    /// Owning session.
    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    /// Whether the session was created by this request.
    pub fn is_new_session(&self) -> bool {
        self.inner.new_session
    }

    /// Whether the request is a notification.
    pub fn is_notification(&self) -> bool {
        self.inner.request_id.is_none()
    }

    /// Whether a response has been sent.
    pub fn has_responded(&self) -> bool {
        self.inner.responded.load(Ordering::Acquire)
    }

    /// Whether the handler deferred completion.
    pub fn is_async(&self) -> bool {
        self.inner.async_mode.load(Ordering::Acquire)
    }

    /// Defer completion to a worker holding a clone.
    pub fn start_async(&self) {
        if !self.inner.async_mode.swap(true, Ordering::AcqRel) && !self.has_responded() {
            self.inner
                .session
                .register_transaction(self.inner.serial, Arc::downgrade(&self.inner));
        }
    }

    /// Answer with `result`.
    pub fn send_response(&self, result: Value) -> Result<(), TransactionError> {
        self.complete(|id, session| {
            let mut response = Response::success(id, result);
            if session.injects_session_id() {
                response.set_session_id(session.id());
            }
            response
        })
    }

    /// Answer with a `null` result.
    pub fn send_void_response(&self) -> Result<(), TransactionError> {
        self.send_response(Value::Null)
    }

    /// Answer with an error.
    pub fn send_error(
        &self,
        code: i64,
        error_type: Option<&str>,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Result<(), TransactionError> {
        let body = ErrorBody::new(code, error_type.map(str::to_owned), message, data);
        self.complete(|id, _| Response::error(Some(id), body))
    }

    /// Answer with a mapped [`RpcError`].
    pub fn send_rpc_error(&self, err: &RpcError) -> Result<(), TransactionError> {
        if let RpcError::Internal { message } = err {
            error!(method = self.method(), error = message, "internal error");
        }
        let body = err.to_error_body();
        self.complete(|id, _| Response::error(Some(id), body))
    }

    /// Cancel with a rollback error.
    pub fn rollback(&self, reason: &str) -> Result<(), TransactionError> {
        let result = self.send_rpc_error(&RpcError::RolledBack {
            reason: reason.to_owned(),
        });
        if result.is_ok() {
            counter!(TRANSACTIONS_ROLLED_BACK_TOTAL).increment(1);
            debug!(method = self.method(), reason, "transaction rolled back");
        }
        result
    }

    fn complete(
        &self,
        build: impl FnOnce(RequestId, &Session) -> Response,
    ) -> Result<(), TransactionError> {
        let inner = &self.inner;
        let Some(id) = inner.request_id else {
            error!(method = %inner.method, "attempted to respond to a notification");
            return Err(TransactionError::Notification {
                method: inner.method.clone(),
            });
        };
        if inner
            .responded
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            error!(method = %inner.method, id, "response already sent");
            return Err(TransactionError::AlreadyResponded {
                method: inner.method.clone(),
                request_id: Some(id),
            });
        }
        if self.is_async() {
            inner.session.unregister_transaction(inner.serial);
        }
        let response = build(id, &inner.session);
        let sender = inner.reply.lock().take();
        match sender {
            Some(sender) => sender
                .send(response)
                .map_err(|_| TransactionError::Disconnected { request_id: id }),
            None => Err(TransactionError::Disconnected { request_id: id }),
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("method", &self.inner.method)
            .field("request_id", &self.inner.request_id)
            .field("session", self.inner.session.id())
            .field("async", &self.is_async())
            .field("responded", &self.has_responded())
            .finish()
    }
}
