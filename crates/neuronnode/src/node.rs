//! Node coordinator
//!
//! Owns startup order (crypto, codec, ledger, registry, transport,
//! router, sessions, accounting, rewards), the event bus, and the
//! keepalive / route-sweep / distribution timers. Shutdown runs in
//! reverse and flushes the ledger journal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use networkneuron_ledger::{
    Accounting, Journal, Ledger, LedgerConfig, LedgerSnapshot, NodePerformance, RewardConfig,
    RewardEngine,
};
use networkneuron_peers::{PeerRegistry, RegistryConfig};
use networkneuron_protocol::envelope::{
    BandwidthReportPayload, DataPacketPayload, ErrorPayload, HandshakePayload, HeartbeatPayload,
    MessageType, NodeDiscoveryPayload, Packet, RouteRequestPayload, RouteResponsePayload,
};
use networkneuron_protocol::types::{BandwidthProfile, Capability, NodeInfo};
use networkneuron_protocol::{Envelope, Event, NodeId, WireError, PROTOCOL_ID};
use networkneuron_routing::{
    ForwardError, NextHopSender, PacketSealer, Router, RouterConfig, SessionManager,
};
use networkneuron_transport::{InboundMessage, TransportConfig, TransportManager};

use crate::admin::AdminApi;
use crate::config::Config;

/// Bridges the router's forwarding seam onto the transport.
struct TransportSender {
    transport: Arc<TransportManager>,
    local_node: NodeId,
    deadline: Duration,
}

#[async_trait]
impl NextHopSender for TransportSender {
    async fn forward(
        &self,
        next_hop: &NodeId,
        payload: DataPacketPayload,
    ) -> std::result::Result<(), ForwardError> {
        let envelope = Envelope::from_payload(
            MessageType::DataPacket,
            self.local_node,
            Some(*next_hop),
            &payload,
        )
        .map_err(|_| ForwardError::PeerGone)?;

        use networkneuron_transport::TransportError;
        match tokio::time::timeout(self.deadline, self.transport.send(next_hop, envelope)).await {
            Err(_) => Err(ForwardError::TimedOut),
            Ok(Ok(())) => Ok(()),
            Ok(Err(TransportError::Congested(_))) => Err(ForwardError::Congested),
            Ok(Err(TransportError::TimedOut(_))) => Err(ForwardError::TimedOut),
            Ok(Err(_)) => Err(ForwardError::PeerGone),
        }
    }
}

/// Shared component handles used by the background loops.
#[derive(Clone)]
struct Planes {
    local_node: NodeId,
    registry: Arc<PeerRegistry>,
    transport: Arc<TransportManager>,
    router: Arc<Router>,
    sessions: Arc<SessionManager>,
    accounting: Arc<Accounting>,
    sealer: Arc<PacketSealer>,
    events_tx: broadcast::Sender<Event>,
}

/// Main node orchestrator
pub struct Node {
    config: Config,
    planes: Planes,
    ledger: Arc<Mutex<Ledger>>,
    rewards: Arc<RewardEngine>,
    inbound_rx: Option<mpsc::Receiver<InboundMessage>>,
    tasks: Vec<JoinHandle<()>>,
    local_addr: Option<std::net::SocketAddr>,
}

impl Node {
    pub async fn new(config: Config) -> Result<Self> {
        info!("Initializing node components...");

        // Crypto first: everything below signs or verifies
        networkneuron_crypto::init().map_err(|e| anyhow::anyhow!("crypto init: {}", e))?;
        let identity = Arc::new(config.load_identity()?);
        let local_node = NodeId::from_bytes(identity.node_id_bytes());
        info!(node = %local_node, "✓ Identity loaded");

        let (events_tx, _) = broadcast::channel(1024);

        // Ledger: recover from the journal or seed the genesis state
        let ledger_dir = config.ledger_dir();
        let (snapshot, tail) = Journal::recover(&ledger_dir)
            .map_err(|e| anyhow::anyhow!("ledger recovery: {}", e))?;
        let journal =
            Journal::open(&ledger_dir).map_err(|e| anyhow::anyhow!("ledger journal: {}", e))?;

        let mut ledger = Ledger::new(
            Arc::clone(&identity),
            LedgerConfig {
                min_stake: config.ledger.min_stake,
                tx_retention: config.ledger.tx_retention,
            },
        )
        .with_journal(journal);

        if snapshot.is_some() || !tail.is_empty() {
            let base = snapshot.unwrap_or(LedgerSnapshot {
                balances: Vec::new(),
                stakes: Vec::new(),
                last_seq: 0,
            });
            ledger
                .restore(base, tail)
                .map_err(|e| anyhow::anyhow!("ledger restore: {}", e))?;
            info!("✓ Ledger recovered from journal");
        } else {
            let mut bootstrap = Vec::new();
            for entry in &config.ledger.bootstrap_balances {
                let node = NodeId::from_hex(&entry.node_id)
                    .map_err(|e| anyhow::anyhow!("bootstrap balance node id: {}", e))?;
                bootstrap.push((node, entry.amount));
            }
            ledger
                .seed(
                    config.ledger.initial_supply,
                    config.ledger.reward_pool_fraction,
                    &bootstrap,
                )
                .map_err(|e| anyhow::anyhow!("ledger seed: {}", e))?;
            info!("✓ Ledger seeded");
        }
        let ledger = Arc::new(Mutex::new(ledger));

        // Peer registry
        let registry = Arc::new(PeerRegistry::new(
            RegistryConfig {
                min_peers: config.peers.min_peers,
                max_peers: config.peers.max_peers,
                keepalive_interval_ms: config.peers.keepalive_interval_secs * 1000,
                keepalive_misses_before_quarantine: config
                    .peers
                    .keepalive_misses_before_quarantine,
            },
            events_tx.clone(),
        ));
        info!("✓ Peer registry initialized");

        // Transport
        let local_payload = HandshakePayload {
            node_info: NodeInfo {
                node_id: local_node,
                address: config.node.listen_addr.clone(),
                public_key: identity.export_public_key(),
                region: config.node.region.clone(),
                bandwidth: BandwidthProfile::default(),
            },
            capabilities: vec![Capability::Relay],
            version: PROTOCOL_ID.to_string(),
        };
        let (transport, inbound_rx) = TransportManager::new(
            Arc::clone(&identity),
            local_payload,
            TransportConfig::default(),
        );
        let transport = Arc::new(transport);
        info!("✓ Transport initialized");

        // Router and sessions
        let sealer = Arc::new(
            PacketSealer::new(Arc::clone(&identity), config.routing.key_scheme)
                .map_err(|e| anyhow::anyhow!("packet sealer: {}", e))?,
        );
        let sender = Arc::new(TransportSender {
            transport: Arc::clone(&transport),
            local_node,
            deadline: Duration::from_secs(10),
        });
        let router = Arc::new(Router::new(
            RouterConfig {
                route_ttl_ms: config.routing.route_ttl_secs * 1000,
                route_cache_max: config.routing.route_cache_max,
                encryption_required: config.routing.encryption_required,
            },
            Arc::clone(&registry),
            Arc::clone(&sealer),
            sender,
            events_tx.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            local_node,
            Arc::clone(&identity),
            Arc::clone(&router),
            events_tx.clone(),
        ));
        info!("✓ Router and session manager initialized");

        // Accounting and rewards
        let accounting = Arc::new(Accounting::new());
        let rewards = Arc::new(RewardEngine::new(
            RewardConfig {
                reward_rate: config.rewards.reward_rate,
                min_stake: config.ledger.min_stake,
                max_reward_per_day: config.rewards.max_reward_per_day,
            },
            Arc::clone(&ledger),
            Arc::clone(&accounting),
            events_tx.clone(),
        ));
        info!("✓ Accounting and reward engine initialized");

        let planes = Planes {
            local_node,
            registry,
            transport,
            router,
            sessions,
            accounting,
            sealer,
            events_tx,
        };

        Ok(Node {
            config,
            planes,
            ledger,
            rewards,
            inbound_rx: Some(inbound_rx),
            tasks: Vec::new(),
            local_addr: None,
        })
    }

    /// In-process admin service contract.
    pub fn admin(&self) -> AdminApi {
        AdminApi::new(
            self.planes.local_node,
            Arc::clone(&self.planes.registry),
            Arc::clone(&self.planes.router),
            Arc::clone(&self.planes.sessions),
            Arc::clone(&self.planes.accounting),
            Arc::clone(&self.ledger),
            Arc::clone(&self.rewards),
        )
    }

    pub fn node_id(&self) -> NodeId {
        self.planes.local_node
    }

    /// Address the node is actually listening on (after `start`).
    pub fn listen_addr(&self) -> Option<std::net::SocketAddr> {
        self.local_addr
    }

    /// Handle to the session manager, for embedding clients.
    pub fn sessions(&self) -> Arc<SessionManager> {
        Arc::clone(&self.planes.sessions)
    }

    /// Bind the listener, spawn the background loops and dial bootstrap
    /// peers. Returns once the node is serving.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting NeuronNode services...");

        let listener = TcpListener::bind(&self.config.node.listen_addr)
            .await
            .with_context(|| format!("binding {}", self.config.node.listen_addr))?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);
        info!(addr = %local_addr, "✓ Listening");
        self.tasks
            .push(self.planes.transport.spawn_accept_loop(listener));

        self.start_background_loops();
        self.dial_bootstrap_peers().await;
        Ok(())
    }

    /// Start serving and run until shutdown is requested.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        info!("═══════════════════════════════════════════════");
        info!("  NeuronNode is now running");
        info!("  Node ID: {}", self.planes.local_node.to_hex());
        info!("═══════════════════════════════════════════════");

        tokio::signal::ctrl_c().await.ok();

        info!("Shutting down NeuronNode...");
        self.shutdown().await
    }

    /// Spawn the inbound dispatcher, the event consumer and the timers.
    fn start_background_loops(&mut self) {
        if let Some(inbound_rx) = self.inbound_rx.take() {
            self.tasks
                .push(spawn_inbound_loop(self.planes.clone(), inbound_rx));
        }
        self.tasks.push(spawn_event_loop(self.planes.clone()));
        self.tasks.push(spawn_keepalive_timer(
            self.planes.clone(),
            Duration::from_secs(self.config.peers.keepalive_interval_secs),
        ));
        self.tasks.push(spawn_sweep_timer(
            self.planes.clone(),
            Duration::from_secs(self.config.peers.keepalive_interval_secs),
        ));
        self.tasks.push(spawn_distribution_timer(
            Arc::clone(&self.rewards),
            Duration::from_secs(self.config.rewards.distribution_interval_secs),
        ));
    }

    async fn dial_bootstrap_peers(&self) {
        let mut addrs = self.config.node.bootstrap_peers.clone();
        for addr in self.load_known_peers() {
            if !addrs.contains(&addr) {
                addrs.push(addr);
            }
        }

        for addr in &addrs {
            match self.planes.transport.dial(addr).await {
                Ok(outcome) => {
                    if let Err(e) = admit_peer(&self.planes, &outcome.remote).await {
                        warn!(addr = %addr, error = %e, "bootstrap peer rejected");
                    }
                }
                Err(e) => warn!(addr = %addr, error = %e, "bootstrap dial failed"),
            }
        }
    }

    fn known_peers_path(&self) -> std::path::PathBuf {
        self.config.data_directory.join("peers.json")
    }

    /// Peer addresses remembered from the previous run.
    fn load_known_peers(&self) -> Vec<String> {
        match std::fs::read(self.known_peers_path()) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    async fn save_known_peers(&self) {
        let addrs: Vec<String> = self
            .planes
            .registry
            .list_active()
            .await
            .into_iter()
            .map(|record| record.address)
            .collect();

        match serde_json::to_vec(&addrs) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(self.known_peers_path(), bytes) {
                    warn!(error = %e, "failed to persist known peers");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode known peers"),
        }
    }

    /// Reverse-order shutdown; the ledger flushes before exit.
    pub async fn shutdown(&mut self) -> Result<()> {
        for task in self.tasks.drain(..).rev() {
            task.abort();
        }

        self.save_known_peers().await;
        self.planes.transport.shutdown().await;

        let mut ledger = self.ledger.lock().await;
        ledger
            .persist_snapshot()
            .map_err(|e| anyhow::anyhow!("ledger snapshot: {}", e))?;
        ledger
            .flush()
            .map_err(|e| anyhow::anyhow!("ledger flush: {}", e))?;
        info!("✓ Ledger flushed");

        Ok(())
    }
}

/// Record a verified handshake in the registry.
async fn admit_peer(
    planes: &Planes,
    remote: &HandshakePayload,
) -> networkneuron_peers::Result<()> {
    let peer_id = remote.node_info.node_id;
    planes.registry.on_connect(remote.node_info.clone()).await?;
    planes.registry.on_handshaking(&peer_id).await?;
    planes
        .registry
        .on_handshake_ok(
            &peer_id,
            remote.capabilities.clone(),
            remote.node_info.bandwidth,
        )
        .await
}

fn spawn_inbound_loop(
    planes: Planes,
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = inbound_rx.recv().await {
            match message {
                InboundMessage::Connected { outcome } => {
                    if let Err(e) = admit_peer(&planes, &outcome.remote).await {
                        warn!(peer = %outcome.remote.node_info.node_id, error = %e, "inbound peer rejected");
                        planes
                            .transport
                            .disconnect(&outcome.remote.node_info.node_id)
                            .await;
                    }
                }
                InboundMessage::Disconnected { peer } => {
                    planes.transport.disconnect(&peer).await;
                    let _ = planes.registry.on_disconnect(&peer).await;
                }
                InboundMessage::Misbehavior { peer, error } => {
                    handle_misbehavior(&planes, &peer, &error).await;
                }
                InboundMessage::Envelope { peer, envelope } => {
                    handle_envelope(&planes, peer, envelope).await;
                }
            }
        }
        debug!("inbound loop finished");
    })
}

/// Wire/crypto misbehavior policy: bad signatures quarantine the sender;
/// replays are dropped without touching peer state.
async fn handle_misbehavior(planes: &Planes, peer: &NodeId, error: &WireError) {
    match error {
        WireError::Replay { msg_id, .. } => {
            debug!(peer = %peer, msg_id = %msg_id, "replayed message dropped");
        }
        _ => {
            if let Err(e) = planes.registry.quarantine(peer, &error.to_string()).await {
                debug!(peer = %peer, error = %e, "quarantine skipped");
            }
        }
    }
}

async fn handle_envelope(planes: &Planes, peer: NodeId, envelope: Envelope) {
    let result = match envelope.message_type {
        MessageType::Heartbeat => handle_heartbeat(planes, &peer, &envelope).await,
        MessageType::NodeDiscovery => handle_discovery(planes, &envelope).await,
        MessageType::RouteRequest => handle_route_request(planes, &peer, &envelope).await,
        MessageType::RouteResponse => {
            debug!(peer = %peer, "route response received");
            Ok(())
        }
        MessageType::DataPacket => handle_data_packet(planes, &peer, &envelope).await,
        MessageType::BandwidthReport => handle_bandwidth_report(planes, &peer, &envelope).await,
        MessageType::Error => {
            match envelope.decode_payload::<ErrorPayload>() {
                Ok(err) => warn!(peer = %peer, code = err.code, message = %err.message, "peer error"),
                Err(_) => warn!(peer = %peer, "undecodable error payload"),
            }
            Ok(())
        }
        MessageType::Handshake => {
            // Handshakes only belong to connection establishment
            debug!(peer = %peer, "unexpected handshake on established connection");
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!(peer = %peer, msg_id = %envelope.msg_id, error = %e, "envelope handling failed");
    }
}

async fn handle_heartbeat(
    planes: &Planes,
    peer: &NodeId,
    envelope: &Envelope,
) -> anyhow::Result<()> {
    let payload: HeartbeatPayload = envelope.decode_payload()?;
    planes.registry.on_heartbeat(peer, payload.bandwidth).await?;

    // Heartbeats also refresh the node's rolling performance record
    if let Some(record) = planes.registry.get(peer).await {
        planes
            .accounting
            .set_performance(
                peer,
                NodePerformance {
                    uptime_pct: payload.bandwidth.uptime_pct,
                    avg_latency_ms: payload.bandwidth.latency_ms,
                    reputation: record.reputation.score(),
                },
            )
            .await;
    }
    Ok(())
}

async fn handle_discovery(planes: &Planes, envelope: &Envelope) -> anyhow::Result<()> {
    let payload: NodeDiscoveryPayload = envelope.decode_payload()?;
    for info in payload.nodes {
        if info.node_id != planes.local_node {
            planes.registry.on_discover(info).await?;
        }
    }
    Ok(())
}

async fn handle_route_request(
    planes: &Planes,
    peer: &NodeId,
    envelope: &Envelope,
) -> anyhow::Result<()> {
    let payload: RouteRequestPayload = envelope.decode_payload()?;

    let reply = match planes
        .router
        .find_route(payload.destination, &payload.requirements)
        .await
    {
        Ok(route) => Envelope::from_payload(
            MessageType::RouteResponse,
            planes.local_node,
            Some(*peer),
            &RouteResponsePayload {
                request_id: envelope.msg_id,
                route,
                alternatives: Vec::new(),
            },
        )?,
        Err(e) => Envelope::from_payload(
            MessageType::Error,
            planes.local_node,
            Some(*peer),
            &ErrorPayload {
                code: 404,
                message: e.to_string(),
            },
        )?,
    };

    planes.transport.send(peer, reply).await?;
    Ok(())
}

async fn handle_bandwidth_report(
    planes: &Planes,
    peer: &NodeId,
    envelope: &Envelope,
) -> anyhow::Result<()> {
    let payload: BandwidthReportPayload = envelope.decode_payload()?;

    planes
        .registry
        .on_heartbeat(&payload.reporter, payload.bandwidth)
        .await
        .ok();
    planes.router.on_bandwidth_report(&payload.reporter).await;
    let _ = planes.events_tx.send(Event::BandwidthReport {
        reporter: payload.reporter,
    });

    debug!(peer = %peer, reporter = %payload.reporter, "bandwidth report applied");
    Ok(())
}

/// Relay or deliver one tunneled packet.
async fn handle_data_packet(
    planes: &Planes,
    peer: &NodeId,
    envelope: &Envelope,
) -> anyhow::Result<()> {
    let payload: DataPacketPayload = envelope.decode_payload()?;

    let sender_key = planes
        .registry
        .get(peer)
        .await
        .map(|record| record.public_key)
        .unwrap_or_default();

    let packet_bytes = planes
        .sealer
        .open(&sender_key, &payload)
        .map_err(|e| anyhow::anyhow!("packet open failed: {}", e))?;
    let mut packet: Packet = serde_json::from_slice(&packet_bytes)?;

    // Verify the origin signature when we know the origin's key
    if let Some(origin) = planes.registry.get(&packet.source).await {
        if networkneuron_crypto::identity::verify(
            &origin.public_key,
            &packet.canonical_bytes(),
            &packet.signature,
        )
        .is_err()
        {
            anyhow::bail!("packet origin signature invalid for {}", packet.source);
        }
    }

    // Consume ourselves from the head of the snapshot
    if packet.next_hop() == Some(&planes.local_node) {
        packet.advance();
    }

    if packet.destination == planes.local_node {
        info!(packet = %packet.packet_id, source = %packet.source, bytes = packet.payload.len(), "packet delivered locally");
        return Ok(());
    }

    let next = match packet.next_hop().copied() {
        Some(next) => next,
        None => packet.destination,
    };

    let record = planes
        .registry
        .get(&next)
        .await
        .ok_or_else(|| anyhow::anyhow!("next hop {} unknown", next))?;

    let bytes = packet.payload.len() as u64;
    let packet_bytes = serde_json::to_vec(&packet)?;
    let sealed = if payload.encrypted {
        planes
            .sealer
            .seal(&record.public_key, &packet_bytes)
            .map_err(|e| anyhow::anyhow!("packet seal failed: {}", e))?
    } else {
        DataPacketPayload {
            encrypted: false,
            nonce: Vec::new(),
            wrapped_key: None,
            inner: packet_bytes,
        }
    };

    let forward = Envelope::from_payload(
        MessageType::DataPacket,
        planes.local_node,
        Some(next),
        &sealed,
    )?;
    planes.transport.send(&next, forward).await?;

    let _ = planes.events_tx.send(Event::PacketForwarded {
        node: planes.local_node,
        bytes,
    });
    debug!(packet = %packet.packet_id, next = %next, bytes, "packet relayed");
    Ok(())
}

/// Accounting and invalidation driven off the event bus.
fn spawn_event_loop(planes: Planes) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut events = planes.events_tx.subscribe();
        loop {
            match events.recv().await {
                Ok(Event::PacketForwarded { node, bytes }) => {
                    planes.accounting.record_bytes(&node, bytes).await;
                }
                Ok(Event::SessionServed { node, .. }) => {
                    planes.accounting.record_session(&node).await;
                }
                Ok(Event::PeerDropped { peer }) => {
                    planes.transport.disconnect(&peer).await;
                    let removed = planes.router.invalidate_peer(&peer).await;
                    if !removed.is_empty() {
                        planes.sessions.close_for_routes(&removed).await;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event consumer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Send heartbeats to every connected peer on the keepalive schedule.
fn spawn_keepalive_timer(planes: Planes, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;

            let profile = BandwidthProfile {
                uptime_pct: 100.0,
                ..Default::default()
            };
            let payload = HeartbeatPayload { bandwidth: profile };

            for peer in planes.transport.connected_peers().await {
                let envelope = match Envelope::from_payload(
                    MessageType::Heartbeat,
                    planes.local_node,
                    Some(peer),
                    &payload,
                ) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        error!(error = %e, "heartbeat encode failed");
                        continue;
                    }
                };
                if let Err(e) = planes.transport.send(&peer, envelope).await {
                    debug!(peer = %peer, error = %e, "heartbeat send failed");
                }
            }
        }
    })
}

/// Keepalive and route-expiry sweeps.
fn spawn_sweep_timer(planes: Planes, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;

            // Missed-heartbeat degradation; drops announce PeerDropped,
            // which the event loop turns into route invalidation
            planes.registry.sweep_keepalive().await;

            let expired = planes.router.sweep_expired().await;
            if !expired.is_empty() {
                planes.sessions.close_for_routes(&expired).await;
            }
        }
    })
}

/// Periodic reward distribution.
fn spawn_distribution_timer(rewards: Arc<RewardEngine>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so the first
        // distribution happens one full period after startup
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match rewards.distribute("daily").await {
                Ok(report) => {
                    info!(paid = report.paid.len(), "scheduled distribution complete")
                }
                Err(e) => error!(error = %e, "scheduled distribution failed"),
            }
        }
    })
}
