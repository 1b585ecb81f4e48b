//! Core protocol types

use blake2::{Blake2b512, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of a node ID in bytes (32 bytes / 256 bits)
pub const NODE_ID_SIZE: usize = 32;

/// Size of the short identifiers (message, route, session, transaction)
pub const SHORT_ID_SIZE: usize = 16;

/// A unique identifier for a node in the NetworkNeuron overlay
///
/// Derived from the node's long-lived public key; ordering is lexicographic
/// over the raw bytes and is used for deterministic tie-breaking.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct NodeId([u8; NODE_ID_SIZE]);

impl NodeId {
    /// Create a NodeId from a byte array
    pub fn from_bytes(bytes: [u8; NODE_ID_SIZE]) -> Self {
        NodeId(bytes)
    }

    /// Get the bytes of this NodeId
    pub fn as_bytes(&self) -> &[u8; NODE_ID_SIZE] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        let bytes = hex::decode(s).map_err(|e| crate::WireError::Decode(e.to_string()))?;

        if bytes.len() != NODE_ID_SIZE {
            return Err(crate::WireError::Decode(format!(
                "invalid NodeId length: expected {}, got {}",
                NODE_ID_SIZE,
                bytes.len()
            )));
        }

        let mut arr = [0u8; NODE_ID_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(NodeId(arr))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.to_hex())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

macro_rules! short_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
        pub struct $name([u8; SHORT_ID_SIZE]);

        impl $name {
            /// Create from bytes
            pub fn from_bytes(bytes: [u8; SHORT_ID_SIZE]) -> Self {
                $name(bytes)
            }

            /// Generate a fresh random identifier
            pub fn generate() -> Self {
                let mut bytes = [0u8; SHORT_ID_SIZE];
                rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
                $name(bytes)
            }

            /// Get bytes
            pub fn as_bytes(&self) -> &[u8; SHORT_ID_SIZE] {
                &self.0
            }

            /// Convert to hex string
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from hex string
            pub fn from_hex(s: &str) -> crate::Result<Self> {
                let bytes =
                    hex::decode(s).map_err(|e| crate::WireError::Decode(e.to_string()))?;

                if bytes.len() != SHORT_ID_SIZE {
                    return Err(crate::WireError::Decode(format!(
                        "invalid {} length: {}",
                        stringify!($name),
                        bytes.len()
                    )));
                }

                let mut arr = [0u8; SHORT_ID_SIZE];
                arr.copy_from_slice(&bytes);
                Ok($name(arr))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}...)", stringify!($name), &self.to_hex()[..12])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", &self.to_hex()[..12])
            }
        }
    };
}

short_id! {
    /// A unique identifier for a protocol message
    MessageId
}

short_id! {
    /// A unique identifier for a route
    RouteId
}

short_id! {
    /// A unique identifier for a client session
    SessionId
}

short_id! {
    /// A unique identifier for a ledger transaction
    TxId
}

impl MessageId {
    /// Derive a message ID from message contents.
    /// Uses BLAKE2b(timestamp + source + destination + payload + sequence)[0..16].
    pub fn derive(
        source: &NodeId,
        destination: Option<&NodeId>,
        payload: &[u8],
        timestamp: u64,
        sequence: u32,
    ) -> Self {
        let mut hasher = Blake2b512::new();

        hasher.update(timestamp.to_be_bytes());
        hasher.update(source.as_bytes());
        if let Some(dest) = destination {
            hasher.update(dest.as_bytes());
        }
        hasher.update(payload);
        hasher.update(sequence.to_be_bytes());

        let hash = hasher.finalize();

        let mut id = [0u8; SHORT_ID_SIZE];
        id.copy_from_slice(&hash[..SHORT_ID_SIZE]);

        MessageId(id)
    }
}

/// Bandwidth profile advertised by a peer and refreshed via heartbeats
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandwidthProfile {
    pub upload_mbps: f64,
    pub download_mbps: f64,
    pub latency_ms: f64,
    /// Uptime percentage in [0, 100]
    pub uptime_pct: f64,
    pub capacity_mbps: f64,
}

impl Default for BandwidthProfile {
    fn default() -> Self {
        BandwidthProfile {
            upload_mbps: 0.0,
            download_mbps: 0.0,
            latency_ms: 0.0,
            uptime_pct: 0.0,
            capacity_mbps: 0.0,
        }
    }
}

/// Capabilities a node advertises during handshake and discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Forwards traffic for other nodes
    Relay,
    /// Terminates tunnels toward the open network
    Exit,
    /// Offers store-and-forward buffering
    Storage,
}

/// Publicly shareable information about a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: NodeId,
    /// Dialable address, e.g. "host:port"
    pub address: String,
    /// Ed25519 public key used to verify the node's signatures
    pub public_key: Vec<u8>,
    pub region: Option<String>,
    pub bandwidth: BandwidthProfile,
}
