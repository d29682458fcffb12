//! Protocol method and parameter names.

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

// ── Methods ─────────────────────────────────────────────────────────

/// Instantiate a remote object.
pub const METHOD_CREATE: &str = "create";
/// Call an operation on a remote object.
pub const METHOD_INVOKE: &str = "invoke";
/// Release a remote object.
pub const METHOD_RELEASE: &str = "release";
/// Subscribe to an event type of a remote object.
pub const METHOD_SUBSCRIBE: &str = "subscribe";
/// Cancel a subscription.
pub const METHOD_UNSUBSCRIBE: &str = "unsubscribe";
/// Session-level heartbeat.
pub const METHOD_PING: &str = "ping";
/// Per-object heartbeat.
pub const METHOD_KEEPALIVE: &str = "keepAlive";
/// Rebind a session to a new transport.
pub const METHOD_CONNECT: &str = "connect";
/// Close the session explicitly.
pub const METHOD_CLOSE_SESSION: &str = "closeSession";
/// Fetch buffered server messages (HTTP transport).
pub const METHOD_POLL: &str = "poll";
/// Server-pushed object event.
pub const METHOD_ON_EVENT: &str = "onEvent";
/// Server notice that the presented session id is unknown.
pub const METHOD_SESSION_EXPIRED: &str = "sessionExpired";

// ── Parameters ──────────────────────────────────────────────────────

/// Session affinity parameter, injected into params and results.
pub const PARAM_SESSION_ID: &str = "sessionId";
/// Type name for `create` and event type for `subscribe`.
pub const PARAM_TYPE: &str = "type";
/// Constructor arguments for `create`.
pub const PARAM_CONSTRUCTOR_PARAMS: &str = "constructorParams";
/// Target object reference.
pub const PARAM_OBJECT: &str = "object";
/// Operation name for `invoke`.
pub const PARAM_OPERATION: &str = "operation";
/// Operation arguments for `invoke`.
pub const PARAM_OPERATION_PARAMS: &str = "operationParams";
/// Subscription id for `unsubscribe` and `onEvent`.
pub const PARAM_SUBSCRIPTION: &str = "subscription";
/// Wrapper key for non-object values.
pub const PARAM_VALUE: &str = "value";
/// Event payload key in `onEvent`.
pub const PARAM_DATA: &str = "data";
/// Heartbeat interval hint sent with `ping`.
pub const PARAM_INTERVAL: &str = "interval";

// ── Results ─────────────────────────────────────────────────────────

/// Value answered to a `ping` without payload.
pub const PONG: &str = "pong";
/// Value answered to a successful `connect`.
pub const RECONNECTION_SUCCESSFUL: &str = "RECONNECTION_SUCCESSFUL";
