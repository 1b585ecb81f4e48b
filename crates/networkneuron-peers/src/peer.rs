//! Peer records and the peer lifecycle state machine

use serde::{Deserialize, Serialize};

use networkneuron_protocol::types::{BandwidthProfile, Capability, NodeInfo};
use networkneuron_protocol::NodeId;

use crate::reputation::PeerReputation;

/// Lifecycle state of a known peer
///
/// `discovered -> connecting -> handshaking -> active <-> quarantined -> dropped`
/// with `dropped` terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    Discovered,
    Connecting,
    Handshaking,
    Active,
    Quarantined,
    Dropped,
}

impl PeerState {
    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(self, next: PeerState) -> bool {
        use PeerState::*;
        matches!(
            (self, next),
            (Discovered, Connecting)
                | (Connecting, Handshaking)
                | (Handshaking, Active)
                | (Active, Quarantined)
                | (Quarantined, Active)
                | (Discovered, Dropped)
                | (Connecting, Dropped)
                | (Handshaking, Dropped)
                | (Active, Dropped)
                | (Quarantined, Dropped)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == PeerState::Dropped
    }
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PeerState::Discovered => "discovered",
            PeerState::Connecting => "connecting",
            PeerState::Handshaking => "handshaking",
            PeerState::Active => "active",
            PeerState::Quarantined => "quarantined",
            PeerState::Dropped => "dropped",
        };
        write!(f, "{}", name)
    }
}

/// Everything the registry tracks about one peer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub node_id: NodeId,
    pub address: String,
    pub public_key: Vec<u8>,
    pub capabilities: Vec<Capability>,
    pub region: Option<String>,
    pub bandwidth: BandwidthProfile,
    pub reputation: PeerReputation,
    /// Unix milliseconds; set when the peer became active
    pub connected_at: Option<u64>,
    /// Unix milliseconds of the last heartbeat or message
    pub last_seen: u64,
    pub state: PeerState,
}

impl PeerRecord {
    /// Build a record for a freshly discovered node.
    pub fn discovered(info: NodeInfo, now_ms: u64) -> Self {
        PeerRecord {
            node_id: info.node_id,
            address: info.address,
            public_key: info.public_key,
            capabilities: Vec::new(),
            region: info.region,
            bandwidth: info.bandwidth,
            reputation: PeerReputation::new(),
            connected_at: None,
            last_seen: now_ms,
            state: PeerState::Discovered,
        }
    }

    /// Whether the peer counts as alive within the keepalive window.
    pub fn is_within_window(&self, now_ms: u64, window_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_seen) <= window_ms
    }
}
