//! Session lookup by id and by transport.

use std::sync::Arc;

use dashmap::DashMap;
use metrics::{counter, gauge};
use remora_core::constants::METHOD_ON_EVENT;
use remora_core::{ConnectionId, SessionId};
use remora_rom::{EventSink, RomEvent};
use tracing::{debug, info, warn};

use super::{Session, SessionOptions};
use crate::metrics::{EVENTS_DROPPED_TOTAL, SESSIONS_ACTIVE, SESSIONS_CREATED_TOTAL};
use crate::transport::Transport;

/// Concurrent registry of live sessions.
pub struct SessionManager {
    sessions: DashMap<SessionId, Arc<Session>>,
    by_transport: DashMap<ConnectionId, SessionId>,
    options: SessionOptions,
}

impl SessionManager {
    /// Create an empty manager; new sessions get `options`.
    pub fn new(options: SessionOptions) -> Self {
        Self {
            sessions: DashMap::new(),
            by_transport: DashMap::new(),
            options,
        }
    }

    /// Options applied to new sessions.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Session by id.
    pub fn get(&self, session_id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|s| s.value().clone())
    }

    /// Session currently bound to `transport_id`.
    pub fn get_by_transport(&self, transport_id: &ConnectionId) -> Option<Arc<Session>> {
        let session_id = self.by_transport.get(transport_id)?.value().clone();
        self.get(&session_id)
    }

    /// Snapshot of all sessions.
    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|s| s.value().clone()).collect()
    }

    /// Mint a session, optionally bound to `transport`.
    pub fn create(&self, transport: Option<&Arc<dyn Transport>>) -> Arc<Session> {
        let session = Arc::new(Session::new(SessionId::new(), self.options.clone()));
        let _ = self.sessions.insert(session.id().clone(), session.clone());
        if let Some(transport) = transport {
            self.bind(&session, transport.clone());
        }
        counter!(SESSIONS_CREATED_TOTAL).increment(1);
        gauge!(SESSIONS_ACTIVE).increment(1.0);
        info!(session_id = %session.id(), "session created");
        session
    }

    /// Classify an inbound request.
    ///
    /// A known `session_id`, or a transport already bound to a session,
    /// resumes that session. Otherwise a fresh one is minted; a stale
    /// `session_id` is not reused. Returns the session and whether it is new.
    pub fn get_or_create(
        &self,
        session_id: Option<&SessionId>,
        transport: &Arc<dyn Transport>,
    ) -> (Arc<Session>, bool) {
        let existing = match session_id {
            Some(id) => {
                let found = self.get(id);
                if found.is_none() {
                    warn!(session_id = %id, "no session with this id, creating a new one");
                }
                found
            }
            None => self.get_by_transport(transport.id()),
        };
        match existing {
            Some(session) => {
                session.mark_resumed();
                session.touch();
                self.bind(&session, transport.clone());
                (session, false)
            }
            None => (self.create(Some(transport)), true),
        }
    }

    /// Bind `session` to `transport` and cancel its close timer.
    pub fn bind(&self, session: &Arc<Session>, transport: Arc<dyn Transport>) {
        let transport_id = transport.id().clone();
        if let Some(previous) = session.bind_transport(transport) {
            if previous.id() != &transport_id {
                let _ = self
                    .by_transport
                    .remove_if(previous.id(), |_, sid| sid == session.id());
            }
        }
        let _ = self.by_transport.insert(transport_id, session.id().clone());
        if session.cancel_close_timer() {
            debug!(session_id = %session.id(), "close timer cancelled");
        }
    }

    /// Detach whatever session is bound to `transport_id`.
    ///
    /// Returns the session only if it was still bound to that transport.
    pub fn unbind_transport(&self, transport_id: &ConnectionId) -> Option<Arc<Session>> {
        let (_, session_id) = self.by_transport.remove(transport_id)?;
        let session = self.get(&session_id)?;
        session.unbind_transport(transport_id).then_some(session)
    }

    /// Forget a session. The caller closes it.
    pub fn remove(&self, session_id: &SessionId) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(session_id)?;
        self.by_transport.retain(|_, sid| sid != session_id);
        gauge!(SESSIONS_ACTIVE).decrement(1.0);
        Some(session)
    }
}

impl EventSink for SessionManager {
    fn deliver(&self, session_id: Option<&SessionId>, event: RomEvent) {
        let Some(session) = session_id.and_then(|id| self.get(id)) else {
            counter!(EVENTS_DROPPED_TOTAL).increment(1);
            warn!(
                object = %event.object,
                event_type = %event.event_type,
                "event for unknown session dropped"
            );
            return;
        };
        if let Err(e) = session.send_notification(METHOD_ON_EVENT, Some(event.to_params())) {
            counter!(EVENTS_DROPPED_TOTAL).increment(1);
            warn!(
                session_id = %session.id(),
                event_type = %event.event_type,
                error = %e,
                "event delivery failed"
            );
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions.len())
            .field("transports", &self.by_transport.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::push_transport;
    use remora_core::SubscriptionId;
    use serde_json::{Value, json};

    fn manager() -> SessionManager {
        SessionManager::new(SessionOptions::default())
    }

    fn transport(id: &str) -> Arc<dyn Transport> {
        push_transport(id).0
    }

    #[test]
    fn first_request_creates_new_session() {
        let mgr = manager();
        let t = transport("c1");
        let (session, new) = mgr.get_or_create(None, &t);
        assert!(new);
        assert!(session.is_new());
        assert_eq!(mgr.len(), 1);
        assert_eq!(session.transport_id(), Some(ConnectionId::from("c1")));
    }

    #[test]
    fn later_requests_resume_by_id_or_transport() {
        let mgr = manager();
        let t = transport("c1");
        let (first, _) = mgr.get_or_create(None, &t);

        let (by_transport, new) = mgr.get_or_create(None, &t);
        assert!(!new);
        assert!(Arc::ptr_eq(&first, &by_transport));
        assert!(!first.is_new());

        let other = transport("c2");
        let (by_id, new) = mgr.get_or_create(Some(first.id()), &other);
        assert!(!new);
        assert!(Arc::ptr_eq(&first, &by_id));
        assert_eq!(mgr.get_by_transport(&ConnectionId::from("c2")).unwrap().id(), first.id());
        assert!(mgr.get_by_transport(&ConnectionId::from("c1")).is_none());
    }

    #[test]
    fn stale_id_gets_fresh_session() {
        let mgr = manager();
        let (session, new) = mgr.get_or_create(Some(&SessionId::from("gone")), &transport("c1"));
        assert!(new);
        assert_ne!(session.id().as_str(), "gone");
    }

    #[test]
    fn unbind_only_current_transport() {
        let mgr = manager();
        let a = transport("a");
        let (session, _) = mgr.get_or_create(None, &a);
        assert!(mgr.unbind_transport(&ConnectionId::from("a")).is_some());
        assert!(session.transport().is_none());
        assert!(mgr.unbind_transport(&ConnectionId::from("a")).is_none());
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn remove_drops_transport_index() {
        let mgr = manager();
        let (session, _) = mgr.get_or_create(None, &transport("a"));
        assert!(mgr.remove(session.id()).is_some());
        assert!(mgr.get_by_transport(&ConnectionId::from("a")).is_none());
        assert!(mgr.is_empty());
        assert!(mgr.remove(session.id()).is_none());
    }

    #[tokio::test]
    async fn events_become_on_event_notifications() {
        let mgr = manager();
        let (conn, mut rx) = push_transport("c1");
        let t: Arc<dyn Transport> = conn;
        let (session, _) = mgr.get_or_create(None, &t);
        mgr.deliver(
            Some(session.id()),
            RomEvent {
                object: "e1_Endpoint".into(),
                subscription: SubscriptionId::from("sub1"),
                event_type: "Error".into(),
                data: json!({"code": 1}),
            },
        );
        let msg: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(msg["method"], "onEvent");
        assert_eq!(msg["params"]["value"]["subscription"], "sub1");
        assert_eq!(msg["params"]["sessionId"], session.id().as_str());
    }

    #[test]
    fn events_for_unknown_sessions_are_dropped() {
        let mgr = manager();
        mgr.deliver(
            Some(&SessionId::from("nobody")),
            RomEvent {
                object: "o".into(),
                subscription: SubscriptionId::from("s"),
                event_type: "Error".into(),
                data: Value::Null,
            },
        );
        mgr.deliver(
            None,
            RomEvent {
                object: "o".into(),
                subscription: SubscriptionId::from("s"),
                event_type: "Error".into(),
                data: Value::Null,
            },
        );
    }
}
