//! Error types for peer operations

use networkneuron_protocol::NodeId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PeerError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PeerError {
    #[error("Dial failed for {peer}: {reason}")]
    DialFail { peer: String, reason: String },

    #[error("Handshake failed with {peer}: {reason}")]
    HandshakeFail { peer: String, reason: String },

    #[error("Peer {0} is quarantined")]
    Quarantined(NodeId),

    #[error("Peer {0} is dropped")]
    Dropped(NodeId),

    #[error("Unknown peer {0}")]
    Unknown(NodeId),

    #[error("Illegal state transition for {peer}: {from:?} -> {to:?}")]
    IllegalTransition {
        peer: NodeId,
        from: crate::peer::PeerState,
        to: crate::peer::PeerState,
    },
}
