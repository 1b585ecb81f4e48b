//! Router: route cache, forwarding and invalidation
//!
//! Single writer for routes. `find_route` consults the LRU cache before
//! re-scoring candidates; `forward_packet` seals and ships one packet to
//! its next hop with a single re-route retry; topology changes remove
//! every affected route.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use networkneuron_peers::PeerRegistry;
use networkneuron_protocol::envelope::{DataPacketPayload, Packet};
use networkneuron_protocol::route::{Route, RouteRequirements};
use networkneuron_protocol::{Event, NodeId, RouteId, SessionId};

use crate::cache::LruRouteCache;
use crate::error::{Result, RouteError};
use crate::optimizer::{select_route, Candidate};
use crate::sealer::PacketSealer;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Router tuning knobs
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub route_ttl_ms: u64,
    pub route_cache_max: usize,
    /// Force AEAD on every route regardless of requirements
    pub encryption_required: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            route_ttl_ms: 300_000,
            route_cache_max: 1_000,
            encryption_required: true,
        }
    }
}

/// Why a forward attempt failed, as reported by the transport seam
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardError {
    /// The next hop's bounded queue is full
    Congested,
    /// The send deadline elapsed
    TimedOut,
    /// No live connection to the next hop
    PeerGone,
}

/// Transport seam the router forwards through
#[async_trait]
pub trait NextHopSender: Send + Sync {
    async fn forward(
        &self,
        next_hop: &NodeId,
        payload: DataPacketPayload,
    ) -> std::result::Result<(), ForwardError>;
}

/// Router statistics
#[derive(Debug, Default, Clone)]
pub struct RouterStats {
    pub routes_created: u64,
    pub routes_removed: u64,
    pub packets_forwarded: u64,
    pub bytes_forwarded: u64,
    pub forward_failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

struct RouterState {
    routes: HashMap<RouteId, Route>,
    /// Original query for each route, kept for the re-route retry
    route_queries: HashMap<RouteId, (NodeId, RouteRequirements)>,
    cache: LruRouteCache,
    bound_sessions: HashMap<RouteId, HashSet<SessionId>>,
    stats: RouterStats,
}

/// The single owner of routes
pub struct Router {
    config: RouterConfig,
    registry: Arc<PeerRegistry>,
    sealer: Arc<PacketSealer>,
    sender: Arc<dyn NextHopSender>,
    state: RwLock<RouterState>,
    events: broadcast::Sender<Event>,
}

impl Router {
    pub fn new(
        config: RouterConfig,
        registry: Arc<PeerRegistry>,
        sealer: Arc<PacketSealer>,
        sender: Arc<dyn NextHopSender>,
        events: broadcast::Sender<Event>,
    ) -> Self {
        let cache = LruRouteCache::new(config.route_cache_max);
        Router {
            config,
            registry,
            sealer,
            sender,
            state: RwLock::new(RouterState {
                routes: HashMap::new(),
                route_queries: HashMap::new(),
                cache,
                bound_sessions: HashMap::new(),
                stats: RouterStats::default(),
            }),
            events,
        }
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }

    fn remove_route_locked(state: &mut RouterState, route_id: &RouteId) -> Option<Route> {
        let removed = state.routes.remove(route_id);
        if removed.is_some() {
            state.route_queries.remove(route_id);
            state.bound_sessions.remove(route_id);
            state.cache.remove_routes(&[*route_id]);
            state.stats.routes_removed += 1;
        }
        removed
    }

    /// Find (or build) a route to `destination` satisfying `requirements`.
    ///
    /// A cache hit that is still valid is returned as-is; otherwise the
    /// optimizer re-scores the currently active peers.
    pub async fn find_route(
        &self,
        destination: NodeId,
        requirements: &RouteRequirements,
    ) -> Result<Route> {
        let active = self.registry.list_active().await;
        let active_ids: HashSet<NodeId> = active.iter().map(|r| r.node_id).collect();
        let key = (destination, requirements.canonical_hash());

        let mut state = self.state.write().await;

        if let Some(route_id) = state.cache.get(&key) {
            if let Some(route) = state.routes.get(&route_id).cloned() {
                let alive = route.hops.iter().all(|hop| active_ids.contains(hop));
                if !route.is_expired(now_ms()) && alive {
                    state.stats.cache_hits += 1;
                    debug!(route = %route_id, destination = %destination, "route cache hit");
                    return Ok(route);
                }
            }
            // Stale entry: drop it and re-score below
            state.cache.remove(&key);
            if state
                .bound_sessions
                .get(&route_id)
                .map_or(true, |s| s.is_empty())
                && Self::remove_route_locked(&mut state, &route_id).is_some()
            {
                self.emit(Event::RouteRemoved { route: route_id });
            }
        }
        state.stats.cache_misses += 1;

        let candidates: Vec<Candidate> = active
            .iter()
            .map(|record| Candidate {
                node_id: record.node_id,
                bandwidth: record.bandwidth,
                reputation: record.reputation.score(),
                region: record.region.clone(),
            })
            .collect();

        let chosen = select_route(&candidates, requirements)?;

        let route = Route {
            route_id: RouteId::generate(),
            hops: vec![chosen.node_id],
            latency_ms: chosen.bandwidth.latency_ms,
            bandwidth_mbps: chosen.bandwidth.download_mbps,
            cost: chosen.cost(),
            encrypted: self.config.encryption_required || requirements.require_encryption,
            expires_at: now_ms() + self.config.route_ttl_ms,
            bytes_used: 0,
        };

        state.routes.insert(route.route_id, route.clone());
        state
            .route_queries
            .insert(route.route_id, (destination, requirements.clone()));
        if let Some((_, evicted_id)) = state.cache.insert(key, route.route_id) {
            // The evicted entry's route is garbage once no session holds it
            if state
                .bound_sessions
                .get(&evicted_id)
                .map_or(true, |s| s.is_empty())
                && Self::remove_route_locked(&mut state, &evicted_id).is_some()
            {
                self.emit(Event::RouteRemoved { route: evicted_id });
            }
        }
        state.stats.routes_created += 1;

        info!(route = %route.route_id, hop = %chosen.node_id, destination = %destination, "route created");
        self.emit(Event::RouteCreated {
            route: route.route_id,
            destination,
        });

        Ok(route)
    }

    async fn seal_for_hop(&self, route: &Route, hop: &NodeId, packet: &Packet) -> Result<DataPacketPayload> {
        let bytes =
            serde_json::to_vec(packet).map_err(|e| RouteError::Invalid(e.to_string()))?;

        if route.encrypted {
            let record = self
                .registry
                .get(hop)
                .await
                .ok_or(RouteError::PeerGone(*hop))?;
            self.sealer.seal(&record.public_key, &bytes)
        } else {
            Ok(DataPacketPayload {
                encrypted: false,
                nonce: Vec::new(),
                wrapped_key: None,
                inner: bytes,
            })
        }
    }

    async fn attempt_forward(&self, route: &Route, packet: &Packet) -> Result<()> {
        let hop = *route.hops.first().ok_or_else(|| {
            RouteError::Invalid("route has no hops".to_string())
        })?;

        let payload = self.seal_for_hop(route, &hop, packet).await?;

        let outcome = self.sender.forward(&hop, payload).await;
        match outcome {
            Ok(()) => {
                self.registry.record_forward_outcome(&hop, true).await;

                let bytes = packet.payload.len() as u64;
                let mut state = self.state.write().await;
                state.stats.packets_forwarded += 1;
                state.stats.bytes_forwarded += bytes;

                if let Some(stored) = state.routes.get_mut(&route.route_id) {
                    let before = stored.bytes_used;
                    stored.bytes_used += bytes;

                    // One second of line-rate traffic is the budget
                    let budget = (stored.bandwidth_mbps * 1_000_000.0 / 8.0) as u64;
                    let threshold = (budget as f64 * 0.8) as u64;
                    if budget > 0 && stored.bytes_used > threshold && before <= threshold {
                        warn!(route = %route.route_id, used = stored.bytes_used, "route nearing bandwidth budget");
                        self.emit(Event::BandwidthWarning {
                            route: route.route_id,
                            bytes_used: stored.bytes_used,
                            bandwidth_mbps: stored.bandwidth_mbps,
                        });
                    }
                }

                self.emit(Event::PacketForwarded { node: hop, bytes });
                Ok(())
            }
            Err(e) => {
                self.registry.record_forward_outcome(&hop, false).await;
                let mut state = self.state.write().await;
                state.stats.forward_failures += 1;
                drop(state);

                Err(match e {
                    ForwardError::Congested => RouteError::Congested(route.route_id),
                    ForwardError::TimedOut => RouteError::TimedOut(route.route_id),
                    ForwardError::PeerGone => RouteError::PeerGone(hop),
                })
            }
        }
    }

    /// Forward one packet along a route.
    ///
    /// Validates the packet and the route, seals the payload when the
    /// route requires encryption, and retries exactly once on a fresh
    /// route when the first attempt fails. Returns the id of the route
    /// the packet actually left on.
    pub async fn forward_packet(&self, route_id: &RouteId, packet: Packet) -> Result<RouteId> {
        if packet.payload.is_empty() {
            return Err(RouteError::Invalid("empty payload".to_string()));
        }
        if packet.route_snapshot.is_empty() {
            return Err(RouteError::Invalid("empty route snapshot".to_string()));
        }
        if packet.signature.is_empty() {
            return Err(RouteError::Invalid("unsigned packet".to_string()));
        }

        let (route, query) = {
            let state = self.state.read().await;
            let route = state
                .routes
                .get(route_id)
                .cloned()
                .ok_or_else(|| RouteError::Invalid(format!("unknown route {}", route_id)))?;
            let query = state.route_queries.get(route_id).cloned();
            (route, query)
        };

        if route.is_expired(now_ms()) {
            let mut state = self.state.write().await;
            Self::remove_route_locked(&mut state, route_id);
            drop(state);
            self.emit(Event::RouteRemoved { route: *route_id });
            return Err(RouteError::Expired(*route_id));
        }

        match self.attempt_forward(&route, &packet).await {
            Ok(()) => Ok(*route_id),
            Err(first_err) => {
                // Drop the stale route and retry once on a fresh one
                warn!(route = %route_id, error = %first_err, "forward failed, retrying on a fresh route");
                {
                    let mut state = self.state.write().await;
                    Self::remove_route_locked(&mut state, route_id);
                }
                self.emit(Event::RouteRemoved { route: *route_id });

                let (destination, requirements) = match query {
                    Some(q) => q,
                    None => return Err(first_err),
                };

                let fresh = self.find_route(destination, &requirements).await?;
                let mut retry_packet = packet;
                retry_packet.route_snapshot = fresh.hops.clone();

                self.attempt_forward(&fresh, &retry_packet).await?;
                Ok(fresh.route_id)
            }
        }
    }

    /// Remove every route that references a dropped peer.
    ///
    /// Returns the removed route ids so the session manager can close the
    /// sessions bound to them.
    pub async fn invalidate_peer(&self, peer: &NodeId) -> Vec<RouteId> {
        let mut state = self.state.write().await;
        let affected: Vec<RouteId> = state
            .routes
            .values()
            .filter(|r| r.contains_hop(peer))
            .map(|r| r.route_id)
            .collect();

        for route_id in &affected {
            Self::remove_route_locked(&mut state, route_id);
        }
        drop(state);

        for route_id in &affected {
            info!(route = %route_id, peer = %peer, "route invalidated: hop dropped");
            self.emit(Event::RouteRemoved { route: *route_id });
        }
        affected
    }

    /// A bandwidth report invalidates cache entries through the reporter
    /// so future lookups re-score; in-flight routes stay until expiry.
    pub async fn on_bandwidth_report(&self, reporter: &NodeId) {
        let mut state = self.state.write().await;
        let through_reporter: Vec<RouteId> = state
            .routes
            .values()
            .filter(|r| r.contains_hop(reporter))
            .map(|r| r.route_id)
            .collect();
        state.cache.remove_routes(&through_reporter);
        debug!(reporter = %reporter, entries = through_reporter.len(), "cache entries invalidated by bandwidth report");
    }

    /// Drop expired routes; returns their ids for session cleanup.
    pub async fn sweep_expired(&self) -> Vec<RouteId> {
        let now = now_ms();
        let mut state = self.state.write().await;
        let expired: Vec<RouteId> = state
            .routes
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.route_id)
            .collect();

        for route_id in &expired {
            Self::remove_route_locked(&mut state, route_id);
        }
        drop(state);

        for route_id in &expired {
            self.emit(Event::RouteRemoved { route: *route_id });
        }
        expired
    }

    /// Bind a session to a route (SessionManager only).
    pub async fn bind_session(&self, route_id: &RouteId, session_id: SessionId) {
        let mut state = self.state.write().await;
        state
            .bound_sessions
            .entry(*route_id)
            .or_default()
            .insert(session_id);
    }

    /// Release a session's binding. The route is removed once nothing
    /// references it anymore.
    pub async fn release_session(&self, route_id: &RouteId, session_id: &SessionId) {
        let mut state = self.state.write().await;
        let unused = match state.bound_sessions.get_mut(route_id) {
            Some(sessions) => {
                sessions.remove(session_id);
                sessions.is_empty()
            }
            None => return,
        };

        if unused {
            state.bound_sessions.remove(route_id);
            if Self::remove_route_locked(&mut state, route_id).is_some() {
                drop(state);
                self.emit(Event::RouteRemoved { route: *route_id });
            }
        }
    }

    /// Snapshot of one route.
    pub async fn get_route(&self, route_id: &RouteId) -> Option<Route> {
        self.state.read().await.routes.get(route_id).cloned()
    }

    /// Snapshot of all routes.
    pub async fn list_routes(&self) -> Vec<Route> {
        self.state.read().await.routes.values().cloned().collect()
    }

    /// Current cache size.
    pub async fn cache_len(&self) -> usize {
        self.state.read().await.cache.len()
    }

    pub async fn stats(&self) -> RouterStats {
        self.state.read().await.stats.clone()
    }
}
