//! One WebSocket connection, from upgrade to disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use remora_core::ConnectionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::protocol::ProtocolManager;
use crate::transport::Transport;

/// Outbound queue depth per connection.
const SEND_QUEUE_CAPACITY: usize = 1024;

/// Liveness settings for one socket.
#[derive(Clone, Copy, Debug)]
pub struct WsTimings {
    /// Ping cadence.
    pub heartbeat_interval: Duration,
    /// Close the socket after this much silence.
    pub heartbeat_timeout: Duration,
}

/// Serve one upgraded socket until it closes or `shutdown` fires.
///
/// Inbound text frames are processed concurrently; responses and pushed
/// messages share one ordered outbound queue. When the socket goes away the
/// bound session is left to its reconnection timer.
#[instrument(skip_all, fields(transport_id = %conn_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    conn_id: ConnectionId,
    protocol: ProtocolManager,
    timings: WsTimings,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(SEND_QUEUE_CAPACITY);
    let connection = Arc::new(ClientConnection::new(conn_id.clone(), send_tx));
    let transport: Arc<dyn Transport> = connection.clone();

    let started = Instant::now();
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    info!("websocket connected");

    let closing = connection.closing().clone();
    let outbound_closing = closing.clone();
    let outbound = tokio::spawn(async move {
        let mut pinger = tokio::time::interval_at(
            tokio::time::Instant::now() + timings.heartbeat_interval,
            timings.heartbeat_interval,
        );
        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                _ = pinger.tick() => {
                    if ws_tx.send(Message::Ping(axum::body::Bytes::new())).await.is_err() {
                        break;
                    }
                }
                () = outbound_closing.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let heartbeat_conn = connection.clone();
    let heartbeat_cancel = closing.child_token();
    let heartbeat = tokio::spawn(async move {
        let result = run_heartbeat(
            heartbeat_conn.clone(),
            timings.heartbeat_interval,
            timings.heartbeat_timeout,
            heartbeat_cancel,
        )
        .await;
        if result == HeartbeatResult::TimedOut {
            warn!(silent_for = ?heartbeat_conn.last_pong_elapsed(), "peer unresponsive, closing");
            heartbeat_conn.close();
        }
    });

    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            () = closing.cancelled() => break,
            () = shutdown.cancelled() => {
                connection.close();
                break;
            }
        };
        let Some(Ok(frame)) = frame else { break };
        connection.mark_alive();

        let text = match frame {
            Message::Text(t) => t.as_str().to_owned(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => {
                    debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            },
            Message::Close(_) => {
                debug!("peer sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let protocol = protocol.clone();
        let transport = transport.clone();
        let conn = connection.clone();
        let _ = tokio::spawn(async move {
            if let Some(response) = protocol.process_message(&text, &transport).await {
                let text = remora_core::Message::from(response).to_text();
                if !conn.send(Arc::new(text)) {
                    debug!("response not enqueued, connection closing or queue full");
                }
            }
        });
    }

    connection.close();
    heartbeat.abort();
    let _ = tokio::time::timeout(Duration::from_secs(1), outbound).await;
    protocol.close_session_if_timeout(&conn_id, "transport closed");

    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    info!(
        dropped = connection.drop_count(),
        age = ?connection.age(),
        "websocket disconnected"
    );
}
