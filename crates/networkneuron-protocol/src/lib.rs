//! NetworkNeuron wire protocol
//!
//! Defines the shared protocol types (node, route and session identifiers,
//! bandwidth profiles), the signed message envelope, the length-prefixed
//! frame codec, replay protection and the typed event set published on the
//! coordinator bus.

pub mod envelope;
pub mod error;
pub mod events;
pub mod frame;
pub mod replay;
pub mod route;
pub mod types;

pub use envelope::{Envelope, MessageType};
pub use error::{Result, WireError};
pub use events::Event;
pub use frame::{decode_frame, encode_frame};
pub use replay::ReplayWindow;
pub use route::{Route, RouteAlgorithm, RouteRequirements};
pub use types::{BandwidthProfile, Capability, MessageId, NodeId, NodeInfo, RouteId, SessionId, TxId};

/// Protocol identification string exchanged during handshake.
pub const PROTOCOL_ID: &str = "networkneuron/1.0";

/// Protocol version carried in every frame.
pub const PROTOCOL_VERSION: u8 = 1;
