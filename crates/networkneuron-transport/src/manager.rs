//! Transport manager
//!
//! Owns the listener, the dialer and the table of live peer connections.
//! Every outbound envelope is signed with the local identity before it is
//! queued; everything inbound has already been signature- and
//! replay-checked by the peer loops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use networkneuron_crypto::NodeIdentity;
use networkneuron_protocol::envelope::HandshakePayload;
use networkneuron_protocol::replay::DEFAULT_WINDOW_MS;
use networkneuron_protocol::{Envelope, NodeId, ReplayWindow, WireError};

use crate::error::{Result, TransportError};
use crate::handshake::{self, HandshakeConfig, HandshakeOutcome};
use crate::peer_io::{spawn_peer_loops, PeerHandle};

/// Transport tuning
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Bounded outbound queue depth per peer
    pub queue_capacity: usize,
    /// Deadline for establishing a TCP connection
    pub dial_timeout: Duration,
    pub handshake: HandshakeConfig,
    /// Replay window applied to inbound envelopes
    pub replay_window_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            queue_capacity: 256,
            dial_timeout: Duration::from_secs(10),
            handshake: HandshakeConfig::default(),
            replay_window_ms: DEFAULT_WINDOW_MS,
        }
    }
}

/// Everything the transport reports upward to the coordinator
#[derive(Debug)]
pub enum InboundMessage {
    /// A verified envelope from a connected peer
    Envelope { peer: NodeId, envelope: Envelope },
    /// An inbound connection completed its handshake
    Connected { outcome: HandshakeOutcome },
    /// The peer's connection ended
    Disconnected { peer: NodeId },
    /// The peer sent something that failed signature or replay checks
    Misbehavior { peer: NodeId, error: WireError },
}

/// Owner of all live peer connections
pub struct TransportManager {
    identity: Arc<NodeIdentity>,
    local_payload: HandshakePayload,
    config: TransportConfig,
    peers: Arc<RwLock<HashMap<NodeId, PeerHandle>>>,
    replay: Arc<Mutex<ReplayWindow>>,
    inbound_tx: mpsc::Sender<InboundMessage>,
}

impl TransportManager {
    /// Build the manager plus the receiver the coordinator drains.
    pub fn new(
        identity: Arc<NodeIdentity>,
        local_payload: HandshakePayload,
        config: TransportConfig,
    ) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(1024);
        let replay = Arc::new(Mutex::new(ReplayWindow::new(config.replay_window_ms)));

        (
            TransportManager {
                identity,
                local_payload,
                config,
                peers: Arc::new(RwLock::new(HashMap::new())),
                replay,
                inbound_tx,
            },
            inbound_rx,
        )
    }

    /// Dial a peer and run the handshake as initiator.
    pub async fn dial(&self, addr: &str) -> Result<HandshakeOutcome> {
        let stream = tokio::time::timeout(self.config.dial_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::TimedOut(self.config.dial_timeout.as_millis() as u64))?
            .map_err(|e| TransportError::DialFail {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;

        let mut stream = stream;
        let outcome = handshake::initiate(
            &mut stream,
            &self.identity,
            &self.local_payload,
            &self.config.handshake,
        )
        .await?;

        self.register(stream, &outcome).await;
        info!(peer = %outcome.remote_node_id(), addr = %addr, "outbound connection established");
        Ok(outcome)
    }

    /// Accept connections forever, responding to handshakes.
    ///
    /// Spawned by the coordinator; ends when the listener socket closes.
    pub fn spawn_accept_loop(self: &Arc<Self>, listener: TcpListener) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let (mut stream, addr) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed, stopping listener");
                        break;
                    }
                };

                let outcome = match handshake::respond(
                    &mut stream,
                    &manager.identity,
                    &manager.local_payload,
                    &manager.config.handshake,
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(addr = %addr, error = %e, "inbound handshake failed");
                        continue;
                    }
                };

                manager.register(stream, &outcome).await;
                info!(peer = %outcome.remote_node_id(), addr = %addr, "inbound connection established");
                let _ = manager
                    .inbound_tx
                    .send(InboundMessage::Connected { outcome })
                    .await;
            }
        })
    }

    async fn register(&self, stream: TcpStream, outcome: &HandshakeOutcome) {
        let node_id = outcome.remote_node_id();
        let (read_half, write_half) = stream.into_split();

        let (handle, _send_task, _recv_task) = spawn_peer_loops(
            node_id,
            outcome.remote.node_info.public_key.clone(),
            read_half,
            write_half,
            self.config.queue_capacity,
            Arc::clone(&self.replay),
            self.inbound_tx.clone(),
        );

        let mut peers = self.peers.write().await;
        peers.insert(node_id, handle);
    }

    /// Sign an envelope with the local identity and queue it to a peer.
    ///
    /// Fails fast with `Congested` when the peer's bounded queue is full.
    pub async fn send(&self, peer: &NodeId, envelope: Envelope) -> Result<()> {
        let signature = self.identity.sign(&envelope.canonical_bytes());
        let signed = envelope.with_signature(signature);

        let peers = self.peers.read().await;
        let handle = peers.get(peer).ok_or(TransportError::Closed)?;
        handle.try_send(signed)
    }

    /// Drop a peer's connection; its send loop ends when the handle goes.
    pub async fn disconnect(&self, peer: &NodeId) {
        let mut peers = self.peers.write().await;
        if peers.remove(peer).is_some() {
            info!(peer = %peer, "connection dropped");
        }

        let mut replay = self.replay.lock().await;
        replay.forget(peer);
    }

    /// Whether a live connection to the peer exists.
    pub async fn is_connected(&self, peer: &NodeId) -> bool {
        self.peers.read().await.contains_key(peer)
    }

    /// Ids of all connected peers.
    pub async fn connected_peers(&self) -> Vec<NodeId> {
        self.peers.read().await.keys().copied().collect()
    }

    /// Drop every connection (shutdown path).
    pub async fn shutdown(&self) {
        let mut peers = self.peers.write().await;
        let count = peers.len();
        peers.clear();
        if count > 0 {
            info!(connections = count, "transport shut down");
        }
    }
}
