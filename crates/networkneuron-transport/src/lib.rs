//! NetworkNeuron transport plane
//!
//! Owns the wire: dialing and accepting reliable duplex connections,
//! the authenticated handshake, per-peer send/receive loops with bounded
//! outbound queues, and the keepalive schedule. Everything above this
//! crate deals in verified envelopes keyed by peer id.

pub mod conn;
pub mod error;
pub mod handshake;
pub mod manager;
pub mod peer_io;

pub use error::{Result, TransportError};
pub use handshake::{HandshakeConfig, HandshakeOutcome};
pub use manager::{InboundMessage, TransportConfig, TransportManager};
pub use peer_io::PeerHandle;
