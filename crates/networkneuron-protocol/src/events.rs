//! Typed events published on the coordinator bus
//!
//! Components communicate through one statically typed event enum over a
//! broadcast channel; unknown events cannot exist.

use serde::{Deserialize, Serialize};

use crate::types::{NodeId, RouteId, SessionId};

/// Everything observable on the coordinator event bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    PeerConnected {
        peer: NodeId,
    },
    PeerDropped {
        peer: NodeId,
    },
    HandshakeOk {
        peer: NodeId,
    },
    HandshakeErr {
        peer: NodeId,
        reason: String,
    },
    RouteCreated {
        route: RouteId,
        destination: NodeId,
    },
    RouteRemoved {
        route: RouteId,
    },
    PacketForwarded {
        node: NodeId,
        bytes: u64,
    },
    SessionOpened {
        session: SessionId,
        client: String,
    },
    SessionClosed {
        session: SessionId,
    },
    /// A completed session is attributed to the relay that served it
    SessionServed {
        node: NodeId,
        session: SessionId,
    },
    BandwidthReport {
        reporter: NodeId,
    },
    /// A route crossed 80% of its bandwidth budget (non-fatal)
    BandwidthWarning {
        route: RouteId,
        bytes_used: u64,
        bandwidth_mbps: f64,
    },
    RewardDistributed {
        node: NodeId,
        amount: f64,
        period: String,
    },
    RewardPoolExhausted {
        period: String,
        skipped_nodes: usize,
    },
}
