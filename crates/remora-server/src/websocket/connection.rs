//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use remora_core::ConnectionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::transport::Transport;

/// One connected WebSocket peer.
pub struct ClientConnection {
    id: ConnectionId,
    /// Send channel to the socket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the peer answered since the last heartbeat check.
    pub is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    /// Messages dropped because the channel was full or closed.
    pub dropped_messages: AtomicU64,
    closing: CancellationToken,
}

impl ClientConnection {
    /// Create a connection writing into `tx`.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            closing: CancellationToken::new(),
        }
    }

    /// Queue a text frame.
    ///
    /// Returns `false` if the channel is full or closed, and bumps the
    /// dropped counter.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.closing.is_cancelled() {
            return false;
        }
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record peer activity (pong or any inbound frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the last recorded activity.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Read and reset the alive flag. `true` if the peer was active since
    /// the previous check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Token cancelled when the connection is asked to close.
    pub fn closing(&self) -> &CancellationToken {
        &self.closing
    }
}

impl Transport for ClientConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn can_push(&self) -> bool {
        true
    }

    fn send(&self, message: Arc<String>) -> bool {
        ClientConnection::send(self, message)
    }

    fn close(&self) {
        self.closing.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection(capacity: usize) -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ClientConnection::new(ConnectionId::from("conn_1"), tx), rx)
    }

    #[tokio::test]
    async fn send_reaches_channel() {
        let (conn, mut rx) = make_connection(4);
        assert!(conn.send(Arc::new("hello".into())));
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
    }

    #[test]
    fn full_channel_counts_drops() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.send(Arc::new("a".into())));
        assert!(!conn.send(Arc::new("b".into())));
        assert!(!conn.send(Arc::new("c".into())));
        assert_eq!(conn.drop_count(), 2);
    }

    #[test]
    fn closed_receiver_rejects() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        assert!(!conn.send(Arc::new("x".into())));
    }

    #[test]
    fn alive_flag_resets_on_check() {
        let (conn, _rx) = make_connection(4);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[test]
    fn transport_close_stops_sends() {
        let (conn, _rx) = make_connection(4);
        let transport: &dyn Transport = &conn;
        assert!(transport.can_push());
        assert_eq!(transport.id().as_str(), "conn_1");
        transport.close();
        assert!(conn.closing().is_cancelled());
        assert!(!transport.send(Arc::new("late".into())));
    }
}
