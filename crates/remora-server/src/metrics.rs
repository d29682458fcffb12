//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Fails if another recorder is already installed in this process.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render the Prometheus text exposition.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// RPC requests total (counter, labels: method).
pub const RPC_REQUESTS_TOTAL: &str = "remora_rpc_requests_total";
/// RPC errors total (counter, labels: method, error_type).
pub const RPC_ERRORS_TOTAL: &str = "remora_rpc_errors_total";
/// RPC handler duration (histogram, labels: method).
pub const RPC_REQUEST_DURATION_SECONDS: &str = "remora_rpc_request_duration_seconds";
/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "remora_ws_connections_total";
/// WebSocket connections closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "remora_ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "remora_ws_connections_active";
/// WebSocket connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "remora_ws_connection_duration_seconds";
/// WebSocket upgrades refused at the connection limit (counter).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "remora_ws_connections_rejected_total";
/// Sessions minted (counter).
pub const SESSIONS_CREATED_TOTAL: &str = "remora_sessions_created_total";
/// Sessions closed, explicitly or by timeout (counter).
pub const SESSIONS_CLOSED_TOTAL: &str = "remora_sessions_closed_total";
/// Live sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "remora_sessions_active";
/// Messages evicted from a full poll buffer (counter).
pub const POLL_BUFFER_DROPS_TOTAL: &str = "remora_poll_buffer_drops_total";
/// Async transactions cancelled by session close (counter).
pub const TRANSACTIONS_ROLLED_BACK_TOTAL: &str = "remora_transactions_rolled_back_total";
/// Object events that reached no session (counter).
pub const EVENTS_DROPPED_TOTAL: &str = "remora_events_dropped_total";
