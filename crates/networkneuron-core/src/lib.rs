//! NetworkNeuron Core Library
//!
//! Ties together the NetworkNeuron component crates:
//! - Crypto (identity, AEAD, signatures, key exchange)
//! - Protocol (envelopes, frames, routes, events)
//! - Peers (registry, lifecycle, reputation)
//! - Transport (dial, handshake, per-peer streams)
//! - Routing (optimizer, route cache, sessions)
//! - Ledger (balances, stakes, accounting, rewards)

pub use networkneuron_crypto as crypto;
pub use networkneuron_ledger as ledger;
pub use networkneuron_peers as peers;
pub use networkneuron_protocol as protocol;
pub use networkneuron_routing as routing;
pub use networkneuron_transport as transport;

pub use crypto::CryptoError;
pub use ledger::LedgerError;
pub use peers::PeerError;
pub use protocol::WireError;
pub use routing::{RouteError, SessionError};

/// Initialize the NetworkNeuron library.
pub fn init() -> Result<(), CryptoError> {
    crypto::init()
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::types::NODE_ID_SIZE;

    #[test]
    fn test_init() {
        assert!(init().is_ok());
    }

    #[test]
    fn test_module_exports() {
        let _ = crypto::init();

        let node_id = protocol::NodeId::from_bytes([1u8; NODE_ID_SIZE]);
        assert_eq!(node_id.as_bytes().len(), NODE_ID_SIZE);

        let requirements = protocol::RouteRequirements::default();
        assert_eq!(requirements.algorithm, protocol::RouteAlgorithm::Balanced);

        let reputation = peers::PeerReputation::new();
        assert_eq!(reputation.score(), 0.5);

        let accounting = ledger::Accounting::new();
        drop(accounting);
    }
}
