//! NetworkNeuron peer plane
//!
//! Tracks every node known to this one: discovered, connecting, active,
//! quarantined or dropped. The registry is the single writer for peer
//! state; other components hold node ids and query through it.

pub mod error;
pub mod peer;
pub mod registry;
pub mod reputation;

pub use error::{PeerError, Result};
pub use peer::{PeerRecord, PeerState};
pub use registry::{PeerRegistry, RegistryConfig};
pub use reputation::PeerReputation;
