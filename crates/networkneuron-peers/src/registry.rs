//! Peer registry
//!
//! Single writer for peer state. Lifecycle transitions are validated
//! against the peer state machine; dropping a peer is terminal and is
//! announced on the event bus so the routing plane can invalidate routes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use networkneuron_protocol::types::{BandwidthProfile, Capability, NodeInfo};
use networkneuron_protocol::{Event, NodeId};

use crate::error::{PeerError, Result};
use crate::peer::{PeerRecord, PeerState};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Registry tuning knobs
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Dial discovered peers until this many are active
    pub min_peers: usize,
    /// Refuse new connections beyond this many tracked peers
    pub max_peers: usize,
    /// Expected heartbeat period
    pub keepalive_interval_ms: u64,
    /// Missed windows tolerated before quarantine
    pub keepalive_misses_before_quarantine: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            min_peers: 5,
            max_peers: 50,
            keepalive_interval_ms: 15_000,
            keepalive_misses_before_quarantine: 1,
        }
    }
}

/// Registry statistics
#[derive(Debug, Default, Clone)]
pub struct RegistryStats {
    pub discovered: usize,
    pub connecting: usize,
    pub active: usize,
    pub quarantined: usize,
    pub dropped: usize,
}

/// The single owner of peer records
pub struct PeerRegistry {
    config: RegistryConfig,
    peers: Arc<RwLock<HashMap<NodeId, PeerRecord>>>,
    events: broadcast::Sender<Event>,
}

impl PeerRegistry {
    pub fn new(config: RegistryConfig, events: broadcast::Sender<Event>) -> Self {
        PeerRegistry {
            config,
            peers: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    fn emit(&self, event: Event) {
        // No receivers is fine; the bus is best-effort for observers
        let _ = self.events.send(event);
    }

    fn transition(record: &mut PeerRecord, to: PeerState) -> Result<()> {
        if !record.state.can_transition_to(to) {
            return Err(PeerError::IllegalTransition {
                peer: record.node_id,
                from: record.state,
                to,
            });
        }
        debug!(peer = %record.node_id, from = %record.state, to = %to, "peer state transition");
        record.state = to;
        Ok(())
    }

    /// Track a newly discovered node. Known nodes only get `last_seen`
    /// refreshed; dropped nodes stay dropped.
    pub async fn on_discover(&self, info: NodeInfo) -> Result<()> {
        let mut peers = self.peers.write().await;

        if let Some(existing) = peers.get_mut(&info.node_id) {
            if existing.state != PeerState::Dropped {
                existing.last_seen = now_ms();
            }
            return Ok(());
        }

        if peers.len() >= self.config.max_peers {
            warn!(peer = %info.node_id, "discovery ignored: peer table full");
            return Ok(());
        }

        info!(peer = %info.node_id, address = %info.address, "discovered node");
        peers.insert(info.node_id, PeerRecord::discovered(info, now_ms()));
        Ok(())
    }

    /// Begin connecting to a peer. Inserts the record if the address was
    /// given to us out of band (e.g. a bootstrap entry). A previously
    /// dropped peer that reconnects starts a fresh record; `dropped` is
    /// terminal per record, not per node forever.
    pub async fn on_connect(&self, info: NodeInfo) -> Result<()> {
        use std::collections::hash_map::Entry;

        let mut peers = self.peers.write().await;
        let record = match peers.entry(info.node_id) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().state == PeerState::Dropped {
                    *occupied.get_mut() = PeerRecord::discovered(info, now_ms());
                }
                occupied.into_mut()
            }
            Entry::Vacant(vacant) => vacant.insert(PeerRecord::discovered(info, now_ms())),
        };

        Self::transition(record, PeerState::Connecting)
    }

    /// The connection is up and the handshake exchange has started.
    pub async fn on_handshaking(&self, peer_id: &NodeId) -> Result<()> {
        let mut peers = self.peers.write().await;
        let record = peers.get_mut(peer_id).ok_or(PeerError::Unknown(*peer_id))?;
        Self::transition(record, PeerState::Handshaking)
    }

    /// Signed handshake verified; the peer is now active.
    pub async fn on_handshake_ok(
        &self,
        peer_id: &NodeId,
        capabilities: Vec<Capability>,
        bandwidth: BandwidthProfile,
    ) -> Result<()> {
        let mut peers = self.peers.write().await;
        let record = peers.get_mut(peer_id).ok_or(PeerError::Unknown(*peer_id))?;

        Self::transition(record, PeerState::Active)?;
        let now = now_ms();
        record.capabilities = capabilities;
        record.bandwidth = bandwidth;
        record.connected_at = Some(now);
        record.last_seen = now;

        info!(peer = %peer_id, "handshake verified, peer active");
        self.emit(Event::HandshakeOk { peer: *peer_id });
        self.emit(Event::PeerConnected { peer: *peer_id });
        Ok(())
    }

    /// Handshake failed; the peer is dropped and the cause surfaces.
    pub async fn on_handshake_failed(&self, peer_id: &NodeId, reason: String) -> Result<()> {
        warn!(peer = %peer_id, reason = %reason, "handshake failed");
        self.emit(Event::HandshakeErr {
            peer: *peer_id,
            reason: reason.clone(),
        });
        self.drop_peer(peer_id).await?;
        Err(PeerError::HandshakeFail {
            peer: peer_id.to_string(),
            reason,
        })
    }

    /// Heartbeat received: refresh liveness and the bandwidth profile.
    /// A quarantined peer that resumes heartbeating is restored to active.
    pub async fn on_heartbeat(
        &self,
        peer_id: &NodeId,
        bandwidth: BandwidthProfile,
    ) -> Result<()> {
        let mut peers = self.peers.write().await;
        let record = peers.get_mut(peer_id).ok_or(PeerError::Unknown(*peer_id))?;

        match record.state {
            PeerState::Active => {}
            PeerState::Quarantined => {
                Self::transition(record, PeerState::Active)?;
                info!(peer = %peer_id, "peer recovered from quarantine");
            }
            PeerState::Dropped => return Err(PeerError::Dropped(*peer_id)),
            _ => return Err(PeerError::Unknown(*peer_id)),
        }

        record.bandwidth = bandwidth;
        record.last_seen = now_ms();
        record.reputation.record_heartbeat();
        Ok(())
    }

    /// Explicit disconnect: terminal drop plus a `PeerDropped` event.
    pub async fn on_disconnect(&self, peer_id: &NodeId) -> Result<()> {
        self.drop_peer(peer_id).await
    }

    /// Quarantine a peer (crypto or wire misbehavior).
    pub async fn quarantine(&self, peer_id: &NodeId, reason: &str) -> Result<()> {
        let mut peers = self.peers.write().await;
        let record = peers.get_mut(peer_id).ok_or(PeerError::Unknown(*peer_id))?;

        Self::transition(record, PeerState::Quarantined)?;
        warn!(peer = %peer_id, reason = %reason, "peer quarantined");
        Ok(())
    }

    async fn drop_peer(&self, peer_id: &NodeId) -> Result<()> {
        let mut peers = self.peers.write().await;
        let record = peers.get_mut(peer_id).ok_or(PeerError::Unknown(*peer_id))?;

        if record.state == PeerState::Dropped {
            return Ok(());
        }
        Self::transition(record, PeerState::Dropped)?;
        drop(peers);

        info!(peer = %peer_id, "peer dropped");
        self.emit(Event::PeerDropped { peer: *peer_id });
        Ok(())
    }

    /// Sweep liveness: one missed keepalive window degrades an active peer
    /// to quarantined, a second drops it. Returns the peers dropped in this
    /// pass.
    pub async fn sweep_keepalive(&self) -> Vec<NodeId> {
        let window_ms = self.config.keepalive_interval_ms
            * self.config.keepalive_misses_before_quarantine.max(1) as u64;
        let now = now_ms();

        let mut to_drop = Vec::new();
        {
            let mut peers = self.peers.write().await;
            for record in peers.values_mut() {
                match record.state {
                    PeerState::Active => {
                        if !record.is_within_window(now, window_ms) {
                            record.reputation.record_missed_heartbeat();
                            if Self::transition(record, PeerState::Quarantined).is_ok() {
                                warn!(peer = %record.node_id, "missed keepalive window, quarantined");
                            }
                        }
                    }
                    PeerState::Quarantined => {
                        if !record.is_within_window(now, window_ms * 2) {
                            record.reputation.record_missed_heartbeat();
                            to_drop.push(record.node_id);
                        }
                    }
                    _ => {}
                }
            }
        }

        for peer_id in &to_drop {
            let _ = self.drop_peer(peer_id).await;
        }
        to_drop
    }

    /// Report a forwarding outcome for reputation (Router only).
    pub async fn record_forward_outcome(&self, peer_id: &NodeId, success: bool) {
        let mut peers = self.peers.write().await;
        if let Some(record) = peers.get_mut(peer_id) {
            if success {
                record.reputation.record_session_success();
            } else {
                record.reputation.record_session_failure();
            }
        }
    }

    /// Snapshot of all active peers.
    pub async fn list_active(&self) -> Vec<PeerRecord> {
        let peers = self.peers.read().await;
        peers
            .values()
            .filter(|r| r.state == PeerState::Active)
            .cloned()
            .collect()
    }

    /// Snapshot of one peer.
    pub async fn get(&self, peer_id: &NodeId) -> Option<PeerRecord> {
        let peers = self.peers.read().await;
        peers.get(peer_id).cloned()
    }

    /// Number of tracked, non-dropped peers.
    pub async fn count(&self) -> usize {
        let peers = self.peers.read().await;
        peers
            .values()
            .filter(|r| r.state != PeerState::Dropped)
            .count()
    }

    /// Discovered peers worth dialing while below `min_peers` active.
    pub async fn dial_candidates(&self) -> Vec<PeerRecord> {
        let peers = self.peers.read().await;
        let active = peers
            .values()
            .filter(|r| r.state == PeerState::Active)
            .count();

        if active >= self.config.min_peers {
            return Vec::new();
        }

        let mut candidates: Vec<PeerRecord> = peers
            .values()
            .filter(|r| r.state == PeerState::Discovered)
            .cloned()
            .collect();
        candidates.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        candidates.truncate(self.config.min_peers - active);
        candidates
    }

    /// Per-state counts.
    pub async fn stats(&self) -> RegistryStats {
        let peers = self.peers.read().await;
        let mut stats = RegistryStats::default();
        for record in peers.values() {
            match record.state {
                PeerState::Discovered => stats.discovered += 1,
                PeerState::Connecting | PeerState::Handshaking => stats.connecting += 1,
                PeerState::Active => stats.active += 1,
                PeerState::Quarantined => stats.quarantined += 1,
                PeerState::Dropped => stats.dropped += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use networkneuron_protocol::types::NODE_ID_SIZE;

    fn node(byte: u8) -> NodeId {
        NodeId::from_bytes([byte; NODE_ID_SIZE])
    }

    fn info(byte: u8) -> NodeInfo {
        NodeInfo {
            node_id: node(byte),
            address: format!("127.0.0.1:{}", 4000 + byte as u16),
            public_key: vec![byte; 32],
            region: Some("eu-west".to_string()),
            bandwidth: BandwidthProfile::default(),
        }
    }

    fn registry() -> (PeerRegistry, broadcast::Receiver<Event>) {
        let (tx, rx) = broadcast::channel(64);
        (PeerRegistry::new(RegistryConfig::default(), tx), rx)
    }

    async fn activate(reg: &PeerRegistry, byte: u8) {
        reg.on_connect(info(byte)).await.unwrap();
        reg.on_handshaking(&node(byte)).await.unwrap();
        reg.on_handshake_ok(&node(byte), vec![Capability::Relay], BandwidthProfile::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_discover_then_connect_lifecycle() {
        let (reg, _rx) = registry();

        reg.on_discover(info(1)).await.unwrap();
        assert_eq!(reg.get(&node(1)).await.unwrap().state, PeerState::Discovered);

        activate(&reg, 1).await;
        let record = reg.get(&node(1)).await.unwrap();
        assert_eq!(record.state, PeerState::Active);
        assert!(record.connected_at.is_some());
        assert_eq!(reg.list_active().await.len(), 1);
    }

    #[tokio::test]
    async fn test_handshake_failure_drops_peer() {
        let (reg, mut rx) = registry();

        reg.on_connect(info(1)).await.unwrap();
        reg.on_handshaking(&node(1)).await.unwrap();
        let err = reg
            .on_handshake_failed(&node(1), "bad signature".to_string())
            .await
            .unwrap_err();

        assert!(matches!(err, PeerError::HandshakeFail { .. }));
        assert_eq!(reg.get(&node(1)).await.unwrap().state, PeerState::Dropped);

        let mut saw_drop = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, Event::PeerDropped { peer } if peer == node(1)) {
                saw_drop = true;
            }
        }
        assert!(saw_drop);
    }

    #[tokio::test]
    async fn test_heartbeat_updates_profile_and_last_seen() {
        let (reg, _rx) = registry();
        activate(&reg, 1).await;

        let profile = BandwidthProfile {
            download_mbps: 50.0,
            latency_ms: 80.0,
            ..Default::default()
        };
        reg.on_heartbeat(&node(1), profile).await.unwrap();

        let record = reg.get(&node(1)).await.unwrap();
        assert_eq!(record.bandwidth.download_mbps, 50.0);
        assert_eq!(record.bandwidth.latency_ms, 80.0);
        assert!(record.is_within_window(now_ms(), 1_000));
    }

    #[tokio::test]
    async fn test_missed_windows_quarantine_then_drop() {
        let (tx, _rx) = broadcast::channel(64);
        let reg = PeerRegistry::new(
            RegistryConfig {
                keepalive_interval_ms: 0, // every sweep counts as a missed window
                ..Default::default()
            },
            tx,
        );
        activate(&reg, 1).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        assert!(reg.sweep_keepalive().await.is_empty());
        assert_eq!(reg.get(&node(1)).await.unwrap().state, PeerState::Quarantined);

        let dropped = reg.sweep_keepalive().await;
        assert_eq!(dropped, vec![node(1)]);
        assert_eq!(reg.get(&node(1)).await.unwrap().state, PeerState::Dropped);
    }

    #[tokio::test]
    async fn test_heartbeat_recovers_quarantined_peer() {
        let (tx, _rx) = broadcast::channel(64);
        let reg = PeerRegistry::new(
            RegistryConfig {
                keepalive_interval_ms: 0,
                ..Default::default()
            },
            tx,
        );
        activate(&reg, 1).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        reg.sweep_keepalive().await;
        assert_eq!(reg.get(&node(1)).await.unwrap().state, PeerState::Quarantined);

        reg.on_heartbeat(&node(1), BandwidthProfile::default())
            .await
            .unwrap();
        assert_eq!(reg.get(&node(1)).await.unwrap().state, PeerState::Active);
    }

    #[tokio::test]
    async fn test_dropped_peer_rejects_heartbeat() {
        let (reg, _rx) = registry();
        activate(&reg, 1).await;
        reg.on_disconnect(&node(1)).await.unwrap();

        let err = reg
            .on_heartbeat(&node(1), BandwidthProfile::default())
            .await
            .unwrap_err();
        assert_eq!(err, PeerError::Dropped(node(1)));
    }

    #[tokio::test]
    async fn test_dial_candidates_below_min_peers() {
        let (reg, _rx) = registry();
        for byte in 1..=3 {
            reg.on_discover(info(byte)).await.unwrap();
        }
        activate(&reg, 9).await;

        let candidates = reg.dial_candidates().await;
        assert_eq!(candidates.len(), 3);
        // Deterministic order by node id
        assert!(candidates.windows(2).all(|w| w[0].node_id < w[1].node_id));
    }

    #[tokio::test]
    async fn test_max_peers_bounds_discovery() {
        let (tx, _rx) = broadcast::channel(64);
        let reg = PeerRegistry::new(
            RegistryConfig {
                max_peers: 2,
                ..Default::default()
            },
            tx,
        );

        for byte in 1..=5 {
            reg.on_discover(info(byte)).await.unwrap();
        }
        assert_eq!(reg.count().await, 2);
    }

    #[tokio::test]
    async fn test_reconnect_after_drop_starts_fresh_record() {
        let (reg, _rx) = registry();
        activate(&reg, 1).await;
        reg.on_disconnect(&node(1)).await.unwrap();
        assert_eq!(reg.get(&node(1)).await.unwrap().state, PeerState::Dropped);

        // A new inbound connection restarts the lifecycle
        activate(&reg, 1).await;
        assert_eq!(reg.get(&node(1)).await.unwrap().state, PeerState::Active);
    }

    #[tokio::test]
    async fn test_forward_outcome_feeds_reputation() {
        let (reg, _rx) = registry();
        activate(&reg, 1).await;

        let before = reg.get(&node(1)).await.unwrap().reputation.score();
        for _ in 0..20 {
            reg.record_forward_outcome(&node(1), false).await;
        }
        let after = reg.get(&node(1)).await.unwrap().reputation.score();
        assert!(after < before);
    }
}
