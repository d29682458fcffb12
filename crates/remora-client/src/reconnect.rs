//! Reconnection with backoff and session resumption.
//!
//! After the link drops, the client retries with jittered exponential
//! backoff. Each successful socket is followed by a `connect` handshake
//! presenting the previous session id; the server either resumes the session
//! or reports it expired, in which case requests bound to it are rolled back
//! and the next request starts a fresh session. Ordinary requests stay parked
//! until the handshake is settled, so none of them can reach the server on
//! the new socket ahead of it.

use std::sync::atomic::Ordering;

use remora_core::SessionId;
use remora_core::constants::PARAM_SESSION_ID;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::client::JsonRpcClient;
use crate::errors::ClientError;

/// Connection lifecycle notifications.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// First socket opened.
    Connected,
    /// The socket dropped.
    Disconnected,
    /// Reconnection attempt `attempt` (one-based) is starting.
    Reconnecting {
        /// Attempt number.
        attempt: u32,
    },
    /// A new socket is up.
    Reconnected {
        /// Whether the previous session was resumed.
        same_session: bool,
    },
    /// Every attempt failed; pending requests were failed.
    ConnectionFailed,
    /// The server no longer knows the session.
    SessionExpired {
        /// The expired session id.
        session_id: SessionId,
    },
}

/// Reconnect `client` until it succeeds, retries run out, or it is closed.
#[instrument(skip_all, fields(url = %client.inner.config.url))]
pub(crate) async fn reconnect(client: JsonRpcClient) {
    let inner = &client.inner;
    if inner.reconnecting.swap(true, Ordering::AcqRel) {
        return;
    }
    let retry = inner.config.reconnect.clone();
    let mut reconnected = false;

    for attempt in 0..=retry.max_retries {
        if inner.closed.is_cancelled() {
            break;
        }
        client.emit(ConnectionEvent::Reconnecting { attempt: attempt + 1 });
        let delay = retry.delay_for(attempt);
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = inner.closed.cancelled() => break,
        }
        match client.open().await {
            Ok(()) => {
                let same_session = resume(&client).await;
                client.mark_ready();
                info!(attempt = attempt + 1, same_session, "reconnected");
                client.emit(ConnectionEvent::Reconnected { same_session });
                reconnected = true;
                break;
            }
            Err(e) => warn!(attempt = attempt + 1, ?delay, error = %e, "reconnection attempt failed"),
        }
    }

    inner.reconnecting.store(false, Ordering::Release);
    if !reconnected && !inner.closed.is_cancelled() {
        warn!(attempts = retry.max_retries + 1, "giving up on reconnection");
        client.fail_pending();
        client.emit(ConnectionEvent::ConnectionFailed);
    }
}

/// Present the previous session id. Returns whether it was resumed.
async fn resume(client: &JsonRpcClient) -> bool {
    let Some(session_id) = client.session_id() else {
        return false;
    };
    let params = json!({ PARAM_SESSION_ID: session_id.as_str() });
    match client.handshake(params).await {
        Ok(_) => true,
        Err(ClientError::SessionExpired { .. } | ClientError::RolledBack { .. }) => {
            let _ = client.expire_session(&session_id);
            false
        }
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "reconnection handshake failed");
            false
        }
    }
}
