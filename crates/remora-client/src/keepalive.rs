//! Keep-alive scheduling.
//!
//! Two modes:
//! - [`KeepAliveMode::PerSession`]: one heartbeat for the whole connection,
//!   running from [`KeepAliveScheduler::start`] until stopped.
//! - [`KeepAliveMode::PerId`]: one independent heartbeat per tracked id.
//!   Adding an id beats immediately and then every interval; removing it
//!   cancels only that timer. With no ids there are no beats.
//!
//! Every timer is its own task under a shared root token, so a slow beat
//! delays only its own timer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use remora_core::constants::{METHOD_KEEPALIVE, METHOD_PING, PARAM_INTERVAL, PARAM_OBJECT};
use serde_json::json;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::client::JsonRpcClient;
use crate::errors::ClientError;

/// Sends one heartbeat.
#[async_trait]
pub trait Heartbeat: Send + Sync + 'static {
    /// Beat for the session (`None`) or for one id.
    ///
    /// Returning `false` stops that timer.
    async fn beat(&self, id: Option<&str>) -> bool;
}

/// Scheduling mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeepAliveMode {
    /// One heartbeat for the connection.
    PerSession,
    /// One heartbeat per tracked id.
    PerId,
}

/// Fixed-interval heartbeat timers.
pub struct KeepAliveScheduler {
    mode: KeepAliveMode,
    interval: Duration,
    heartbeat: Arc<dyn Heartbeat>,
    root: CancellationToken,
    timers: Arc<Mutex<HashMap<String, CancellationToken>>>,
    session_timer: Mutex<Option<CancellationToken>>,
}

impl KeepAliveScheduler {
    /// Create a stopped scheduler.
    pub fn new(mode: KeepAliveMode, interval: Duration, heartbeat: Arc<dyn Heartbeat>) -> Self {
        Self {
            mode,
            interval,
            heartbeat,
            root: CancellationToken::new(),
            timers: Arc::new(Mutex::new(HashMap::new())),
            session_timer: Mutex::new(None),
        }
    }

    /// Scheduling mode.
    pub fn mode(&self) -> KeepAliveMode {
        self.mode
    }

    /// Beat period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the per-session heartbeat. No-op in per-id mode, when already
    /// running, or after [`KeepAliveScheduler::stop`].
    pub fn start(&self) {
        if self.mode != KeepAliveMode::PerSession || self.root.is_cancelled() {
            return;
        }
        let mut slot = self.session_timer.lock();
        if slot.is_some() {
            return;
        }
        let token = self.root.child_token();
        *slot = Some(token.clone());
        spawn_timer(self.heartbeat.clone(), None, self.interval, token, None);
        debug!(interval = ?self.interval, "session keep-alive started");
    }

    /// Track `id`. Returns `false` if it is already tracked, the scheduler is
    /// stopped, or the mode is per-session.
    pub fn add_id(&self, id: impl Into<String>) -> bool {
        if self.mode != KeepAliveMode::PerId || self.root.is_cancelled() {
            return false;
        }
        let id = id.into();
        let token = {
            let mut timers = self.timers.lock();
            if timers.contains_key(&id) {
                return false;
            }
            let token = self.root.child_token();
            let _ = timers.insert(id.clone(), token.clone());
            token
        };
        trace!(id, "keep-alive added");
        spawn_timer(
            self.heartbeat.clone(),
            Some(id),
            self.interval,
            token,
            Some(self.timers.clone()),
        );
        true
    }

    /// Stop tracking `id`. Returns whether it was tracked.
    pub fn remove_id(&self, id: &str) -> bool {
        match self.timers.lock().remove(id) {
            Some(token) => {
                token.cancel();
                trace!(id, "keep-alive removed");
                true
            }
            None => false,
        }
    }

    /// Tracked ids, sorted.
    pub fn tracked_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.timers.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether [`KeepAliveScheduler::stop`] was called.
    pub fn is_stopped(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Cancel every timer. Final.
    pub fn stop(&self) {
        self.root.cancel();
        self.timers.lock().clear();
        let _ = self.session_timer.lock().take();
    }
}

impl Drop for KeepAliveScheduler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl std::fmt::Debug for KeepAliveScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeepAliveScheduler")
            .field("mode", &self.mode)
            .field("interval", &self.interval)
            .field("tracked", &self.timers.lock().len())
            .finish_non_exhaustive()
    }
}

fn spawn_timer(
    heartbeat: Arc<dyn Heartbeat>,
    id: Option<String>,
    interval: Duration,
    token: CancellationToken,
    registry: Option<Arc<Mutex<HashMap<String, CancellationToken>>>>,
) {
    let _ = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = token.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let keep = tokio::select! {
                () = token.cancelled() => return,
                keep = heartbeat.beat(id.as_deref()) => keep,
            };
            if !keep {
                debug!(id = ?id, "keep-alive stopped by heartbeat");
                if let (Some(id), Some(registry)) = (&id, &registry) {
                    let _ = registry.lock().remove(id);
                }
                return;
            }
        }
    });
}

/// Heartbeats over a [`JsonRpcClient`]: `ping` per session, `keepAlive`
/// with the object reference per id.
pub struct RpcHeartbeat {
    client: JsonRpcClient,
    interval: Duration,
}

impl RpcHeartbeat {
    /// Beat through `client`, advertising `interval` in session pings.
    pub fn new(client: JsonRpcClient, interval: Duration) -> Self {
        Self { client, interval }
    }
}

#[async_trait]
impl Heartbeat for RpcHeartbeat {
    async fn beat(&self, id: Option<&str>) -> bool {
        let result = match id {
            None => {
                let interval = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX);
                self.client
                    .request(METHOD_PING, Some(json!({ PARAM_INTERVAL: interval })))
                    .await
            }
            Some(object) => {
                self.client
                    .request(METHOD_KEEPALIVE, Some(json!({ PARAM_OBJECT: object })))
                    .await
            }
        };
        match result {
            Ok(_) => true,
            Err(ClientError::Closed) => false,
            Err(ClientError::Execution(e)) if id.is_some() && e.code == remora_core::errors::NO_SUCH_OBJECT => {
                debug!(id, "object gone, keep-alive dropped");
                false
            }
            Err(e) => {
                warn!(id, error = %e, "keep-alive failed");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        total: AtomicUsize,
        per_id: Mutex<HashMap<String, usize>>,
        refuse: Mutex<Option<String>>,
    }

    #[async_trait]
    impl Heartbeat for Counter {
        async fn beat(&self, id: Option<&str>) -> bool {
            let _ = self.total.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = id {
                *self.per_id.lock().entry(id.to_owned()).or_default() += 1;
                return self.refuse.lock().as_deref() != Some(id);
            }
            true
        }
    }

    impl Counter {
        fn total(&self) -> usize {
            self.total.load(Ordering::SeqCst)
        }
        fn of(&self, id: &str) -> usize {
            self.per_id.lock().get(id).copied().unwrap_or(0)
        }
    }

    const T: Duration = Duration::from_millis(100);

    fn scheduler(mode: KeepAliveMode) -> (KeepAliveScheduler, Arc<Counter>) {
        let counter = Arc::new(Counter::default());
        (KeepAliveScheduler::new(mode, T, counter.clone()), counter)
    }

    #[tokio::test(start_paused = true)]
    async fn per_session_beats_every_interval() {
        let (ka, counter) = scheduler(KeepAliveMode::PerSession);
        ka.start();
        ka.start();
        tokio::time::sleep(T * 5 + T / 2).await;
        assert!(counter.total() >= 5, "got {}", counter.total());
        assert!(counter.total() <= 6, "got {}", counter.total());
    }

    #[tokio::test(start_paused = true)]
    async fn per_id_without_ids_is_silent() {
        let (ka, counter) = scheduler(KeepAliveMode::PerId);
        ka.start();
        tokio::time::sleep(T * 3).await;
        assert_eq!(counter.total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn two_ids_beat_independently() {
        let (ka, counter) = scheduler(KeepAliveMode::PerId);
        assert!(ka.add_id("a"));
        assert!(ka.add_id("b"));
        assert!(!ka.add_id("a"));
        tokio::time::sleep(T * 4 + T / 2).await;
        assert!(counter.total() >= 8, "got {}", counter.total());
        assert!(counter.of("a") >= 4);
        assert!(counter.of("b") >= 4);
        assert_eq!(ka.tracked_ids(), vec!["a".to_owned(), "b".to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn added_id_beats_immediately() {
        let (ka, counter) = scheduler(KeepAliveMode::PerId);
        assert!(ka.add_id("a"));
        tokio::time::sleep(T / 10).await;
        assert_eq!(counter.of("a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn removing_all_ids_silences() {
        let (ka, counter) = scheduler(KeepAliveMode::PerId);
        let _ = ka.add_id("a");
        let _ = ka.add_id("b");
        tokio::time::sleep(T * 2 + T / 2).await;
        assert!(ka.remove_id("a"));
        assert!(ka.remove_id("b"));
        assert!(!ka.remove_id("b"));
        let before = counter.total();
        tokio::time::sleep(T * 5).await;
        assert_eq!(counter.total(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn removing_one_keeps_the_other() {
        let (ka, counter) = scheduler(KeepAliveMode::PerId);
        let _ = ka.add_id("a");
        let _ = ka.add_id("b");
        tokio::time::sleep(T / 2).await;
        let _ = ka.remove_id("a");
        let a = counter.of("a");
        tokio::time::sleep(T * 3).await;
        assert_eq!(counter.of("a"), a);
        assert!(counter.of("b") >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_beat_drops_id() {
        let (ka, counter) = scheduler(KeepAliveMode::PerId);
        *counter.refuse.lock() = Some("gone".into());
        let _ = ka.add_id("gone");
        tokio::time::sleep(T * 3).await;
        assert_eq!(counter.of("gone"), 1);
        assert!(ka.tracked_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_everything() {
        let (ka, counter) = scheduler(KeepAliveMode::PerSession);
        ka.start();
        tokio::time::sleep(T * 2).await;
        ka.stop();
        let before = counter.total();
        tokio::time::sleep(T * 5).await;
        assert_eq!(counter.total(), before);
        ka.start();
        assert!(ka.is_stopped());
        tokio::time::sleep(T * 2).await;
        assert_eq!(counter.total(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn modes_reject_foreign_operations() {
        let (ka, _) = scheduler(KeepAliveMode::PerSession);
        assert!(!ka.add_id("a"));
        assert_eq!(ka.mode(), KeepAliveMode::PerSession);
    }
}
