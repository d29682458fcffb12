//! `RemoraServer`: Axum router with WebSocket and HTTP transports.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use remora_core::ConnectionId;
use remora_rom::{ClassRegistry, ObjectRegistry};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthCounters, HealthResponse};
use crate::http::jsonrpc_handler;
use crate::metrics::WS_CONNECTIONS_REJECTED_TOTAL;
use crate::protocol::ProtocolManager;
use crate::rpc::context::RpcContext;
use crate::rpc::handlers::register_all;
use crate::rpc::registry::MethodRegistry;
use crate::session::{SessionManager, SessionOptions};
use crate::shutdown::{DEFAULT_SHUTDOWN_TIMEOUT, ShutdownCoordinator};
use crate::websocket::session::{WsTimings, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Message router shared by both transports.
    pub protocol: ProtocolManager,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Open WebSocket connections.
    pub connections: Arc<AtomicUsize>,
    /// Prometheus handle for `/metrics`, when a recorder is installed.
    pub metrics_handle: Option<PrometheusHandle>,
}

/// The remora server.
pub struct RemoraServer {
    config: Arc<ServerConfig>,
    protocol: ProtocolManager,
    shutdown: Arc<ShutdownCoordinator>,
    connections: Arc<AtomicUsize>,
    metrics_handle: Option<PrometheusHandle>,
    start_time: Instant,
}

impl RemoraServer {
    /// Server exposing `classes` with the built-in methods.
    pub fn new(config: ServerConfig, classes: ClassRegistry) -> Self {
        Self::with_methods(config, classes, |_| {})
    }

    /// Server with extra methods registered after the built-ins.
    pub fn with_methods(
        config: ServerConfig,
        classes: ClassRegistry,
        extra: impl FnOnce(&mut MethodRegistry),
    ) -> Self {
        let mut registry = MethodRegistry::with_timeout(config.handler_timeout());
        register_all(&mut registry);
        extra(&mut registry);

        let sessions = Arc::new(SessionManager::new(SessionOptions::from(&config)));
        let ctx = RpcContext::new(ObjectRegistry::new(classes), sessions);
        Self {
            config: Arc::new(config),
            protocol: ProtocolManager::new(Arc::new(registry), Arc::new(ctx)),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            connections: Arc::new(AtomicUsize::new(0)),
            metrics_handle: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            protocol: self.protocol.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            config: self.config.clone(),
            connections: self.connections.clone(),
            metrics_handle: self.metrics_handle.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler))
            .route("/jsonrpc", post(jsonrpc_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind and serve in the background. Returns the bound address.
    ///
    /// The serve task stops when [`RemoraServer::shutdown`] runs.
    pub async fn listen(&self) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.token();
        info!(%addr, "remora server listening");

        self.shutdown.track(tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                token.cancelled().await;
            });
            if let Err(e) = serve.await {
                warn!(error = %e, "server stopped with error");
            }
        }));
        Ok(addr)
    }

    /// Stop accepting work, close every session and drain tracked tasks.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.shutdown.shutdown(DEFAULT_SHUTDOWN_TIMEOUT).await;
        let _ = self.protocol.shutdown();
    }

    /// Message router.
    pub fn protocol(&self) -> &ProtocolManager {
        &self.protocol
    }

    /// Shutdown coordinator.
    pub fn shutdown_coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Open WebSocket connections.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let ctx = state.protocol.context();
    let counters = HealthCounters {
        connections: state.connections.load(Ordering::Relaxed),
        sessions: ctx.sessions.len(),
        objects: ctx.objects.object_count(),
        subscriptions: ctx.objects.subscription_count(),
    };
    Json(health::health_check(
        state.start_time,
        counters,
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /ws
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let max = state.config.max_connections;
    if state
        .connections
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
        .is_err()
    {
        counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        warn!(max, "connection limit reached, rejecting upgrade");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let timings = WsTimings {
        heartbeat_interval: state.config.heartbeat_interval(),
        heartbeat_timeout: state.config.heartbeat_timeout(),
    };
    let failed = state.connections.clone();
    ws.max_message_size(state.config.max_message_size)
        .on_failed_upgrade(move |e| {
            let _ = failed.fetch_sub(1, Ordering::AcqRel);
            warn!(error = %e, "websocket upgrade failed");
        })
        .on_upgrade(move |socket| async move {
            run_ws_session(
                socket,
                ConnectionId::new(),
                state.protocol.clone(),
                timings,
                state.shutdown.token(),
            )
            .await;
            let _ = state.connections.fetch_sub(1, Ordering::AcqRel);
        })
}

impl std::fmt::Debug for RemoraServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoraServer")
            .field("config", &self.config)
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::handlers::test_helpers::test_classes;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn make_server() -> RemoraServer {
        RemoraServer::new(ServerConfig::default(), test_classes())
    }

    async fn body_json(resp: Response) -> Value {
        let body = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn post(body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/jsonrpc")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_counters() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["active_sessions"], 0);
        assert_eq!(parsed["live_objects"], 0);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let resp = make_server()
            .router()
            .oneshot(Request::builder().uri("/nonexistent").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ws_route_requires_upgrade() {
        let resp = make_server()
            .router()
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn metrics_absent_without_recorder() {
        let resp = make_server()
            .router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn http_ping_and_create() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(post(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["result"]["value"], "pong");

        let resp = server
            .router()
            .oneshot(post(&json!({
                "jsonrpc": "2.0", "id": 2, "method": "create",
                "params": {"type": "Pipeline"}
            })))
            .await
            .unwrap();
        let parsed = body_json(resp).await;
        assert!(parsed["result"]["value"].as_str().unwrap().ends_with("_Pipeline"));
        assert!(parsed["result"]["sessionId"].is_string());
        assert_eq!(server.protocol().sessions().len(), 1);
        assert_eq!(server.protocol().context().objects.object_count(), 1);
    }

    #[tokio::test]
    async fn http_notification_has_no_content() {
        let resp = make_server()
            .router()
            .oneshot(post(&json!({"jsonrpc": "2.0", "method": "keepAlive", "params": {}})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn http_rejected_after_shutdown() {
        let server = make_server();
        server.shutdown().await;
        let resp = server
            .router()
            .oneshot(post(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port() {
        let server = make_server();
        let addr = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        let body: Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        server.shutdown().await;
    }

    #[test]
    fn extra_methods_are_registered() {
        struct Echo;
        #[async_trait::async_trait]
        impl crate::rpc::registry::MethodHandler for Echo {
            async fn handle(
                &self,
                params: Value,
                _tx: &crate::transaction::Transaction,
                _ctx: &RpcContext,
            ) -> Result<Value, remora_core::RpcError> {
                Ok(params)
            }
        }
        let server = RemoraServer::with_methods(ServerConfig::default(), test_classes(), |r| {
            r.register("echo", Echo);
        });
        assert!(server.protocol().registry().has_method("echo"));
        assert!(server.protocol().registry().has_method("create"));
    }
}
