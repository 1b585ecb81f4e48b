//! Client sessions
//!
//! A session binds a client id to a route and counts the bytes it moves.
//! Exactly one active route per session; sessions with identical
//! requirements may share a route through the cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use networkneuron_crypto::NodeIdentity;
use networkneuron_protocol::envelope::Packet;
use networkneuron_protocol::route::RouteRequirements;
use networkneuron_protocol::{Event, MessageId, NodeId, RouteId, SessionId};

use crate::error::{RouteError, SessionError};
use crate::router::Router;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One client's binding to a route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSession {
    pub session_id: SessionId,
    pub client_id: String,
    pub route_id: RouteId,
    pub destination: NodeId,
    pub started_at: u64,
    pub ended_at: Option<u64>,
    pub bytes_transferred: u64,
    pub active: bool,
}

/// The single owner of client sessions
pub struct SessionManager {
    local_node: NodeId,
    identity: Arc<NodeIdentity>,
    router: Arc<Router>,
    sessions: RwLock<HashMap<SessionId, ClientSession>>,
    events: broadcast::Sender<Event>,
}

impl SessionManager {
    pub fn new(
        local_node: NodeId,
        identity: Arc<NodeIdentity>,
        router: Arc<Router>,
        events: broadcast::Sender<Event>,
    ) -> Self {
        SessionManager {
            local_node,
            identity,
            router,
            sessions: RwLock::new(HashMap::new()),
            events,
        }
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }

    /// Open a session: acquire a route and bind to it.
    pub async fn open(
        &self,
        client_id: &str,
        destination: NodeId,
        requirements: &RouteRequirements,
    ) -> Result<ClientSession, SessionError> {
        let route = self.router.find_route(destination, requirements).await?;

        let session = ClientSession {
            session_id: SessionId::generate(),
            client_id: client_id.to_string(),
            route_id: route.route_id,
            destination,
            started_at: now_ms(),
            ended_at: None,
            bytes_transferred: 0,
            active: true,
        };

        self.router
            .bind_session(&route.route_id, session.session_id)
            .await;

        let mut sessions = self.sessions.write().await;
        sessions.insert(session.session_id, session.clone());
        drop(sessions);

        info!(session = %session.session_id, client = %client_id, route = %route.route_id, "session opened");
        self.emit(Event::SessionOpened {
            session: session.session_id,
            client: client_id.to_string(),
        });

        Ok(session)
    }

    /// Tunnel one payload through the session's route.
    ///
    /// If the router had to re-route, the session follows the fresh route.
    pub async fn send(&self, session_id: &SessionId, payload: Vec<u8>) -> Result<(), SessionError> {
        let (route_id, destination) = {
            let sessions = self.sessions.read().await;
            let session = sessions
                .get(session_id)
                .ok_or(SessionError::NotFound(*session_id))?;
            if !session.active {
                return Err(SessionError::NotActive(*session_id));
            }
            (session.route_id, session.destination)
        };

        let route = self
            .router
            .get_route(&route_id)
            .await
            .ok_or(SessionError::Route(RouteError::Invalid(format!(
                "route {} no longer exists",
                route_id
            ))))?;

        let bytes = payload.len() as u64;
        let mut packet = Packet {
            packet_id: MessageId::generate(),
            source: self.local_node,
            destination,
            route_snapshot: route.hops.clone(),
            payload,
            created_at: now_ms(),
            signature: Vec::new(),
        };
        packet.signature = self.identity.sign(&packet.canonical_bytes());

        let used_route = self.router.forward_packet(&route_id, packet).await?;

        let rebound = {
            let mut sessions = self.sessions.write().await;
            match sessions.get_mut(session_id) {
                Some(session) => {
                    session.bytes_transferred += bytes;
                    if used_route != route_id {
                        session.route_id = used_route;
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if rebound {
            debug!(session = %session_id, old = %route_id, new = %used_route, "session re-routed");
            self.router.bind_session(&used_route, *session_id).await;
        }
        Ok(())
    }

    /// Close a session cleanly, crediting the relays that served it.
    pub async fn close(&self, session_id: &SessionId) -> Result<ClientSession, SessionError> {
        let closed = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or(SessionError::NotFound(*session_id))?;
            if !session.active {
                return Err(SessionError::NotActive(*session_id));
            }
            session.active = false;
            session.ended_at = Some(now_ms());
            session.clone()
        };

        let hops = self
            .router
            .get_route(&closed.route_id)
            .await
            .map(|r| r.hops)
            .unwrap_or_default();

        self.router
            .release_session(&closed.route_id, session_id)
            .await;

        info!(session = %session_id, bytes = closed.bytes_transferred, "session closed");
        self.emit(Event::SessionClosed {
            session: *session_id,
        });
        for hop in hops {
            self.emit(Event::SessionServed {
                node: hop,
                session: *session_id,
            });
        }

        Ok(closed)
    }

    /// Close every active session bound to one of the given routes
    /// (topology change: the routes are already gone).
    pub async fn close_for_routes(&self, route_ids: &[RouteId]) -> Vec<SessionId> {
        let mut closed = Vec::new();
        let mut sessions = self.sessions.write().await;
        for session in sessions.values_mut() {
            if session.active && route_ids.contains(&session.route_id) {
                session.active = false;
                session.ended_at = Some(now_ms());
                closed.push(session.session_id);
            }
        }
        drop(sessions);

        for session_id in &closed {
            info!(session = %session_id, "session closed: route invalidated");
            self.emit(Event::SessionClosed {
                session: *session_id,
            });
        }
        closed
    }

    /// Snapshot of all active sessions.
    pub async fn list_active(&self) -> Vec<ClientSession> {
        let sessions = self.sessions.read().await;
        sessions.values().filter(|s| s.active).cloned().collect()
    }

    /// Snapshot of one session.
    pub async fn get(&self, session_id: &SessionId) -> Option<ClientSession> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Number of sessions ever tracked (active and closed).
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
