//! Message envelope and typed payloads
//!
//! Every protocol message travels inside an [`Envelope`]: a fixed header,
//! a payload belonging to exactly one message type, and a detached signature
//! over the envelope's canonical bytes. Payloads are tagged unions; decode
//! either yields a well-typed value or a [`WireError`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, WireError};
use crate::route::{Route, RouteRequirements};
use crate::types::{BandwidthProfile, Capability, MessageId, NodeId, NodeInfo};

/// Maximum payload size carried by one envelope (1 MB)
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Message type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Session establishment (0x01)
    Handshake = 0x01,
    /// Peer discovery announcement (0x02)
    NodeDiscovery = 0x02,
    /// Request a route to a destination (0x03)
    RouteRequest = 0x03,
    /// Route answer with alternatives (0x04)
    RouteResponse = 0x04,
    /// Tunneled client traffic (0x05)
    DataPacket = 0x05,
    /// Keep-alive with bandwidth profile (0x06)
    Heartbeat = 0x06,
    /// Observed bandwidth report (0x07)
    BandwidthReport = 0x07,
    /// Protocol-level error (0xFF)
    Error = 0xFF,
}

impl MessageType {
    /// Create from u8, rejecting unknown tags
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(MessageType::Handshake),
            0x02 => Ok(MessageType::NodeDiscovery),
            0x03 => Ok(MessageType::RouteRequest),
            0x04 => Ok(MessageType::RouteResponse),
            0x05 => Ok(MessageType::DataPacket),
            0x06 => Ok(MessageType::Heartbeat),
            0x07 => Ok(MessageType::BandwidthReport),
            0xFF => Ok(MessageType::Error),
            _ => Err(WireError::UnknownType(value)),
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// A signed protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_type: MessageType,
    pub msg_id: MessageId,
    /// Unix time in milliseconds
    pub timestamp: u64,
    pub source: NodeId,
    pub destination: Option<NodeId>,
    /// Encoded payload of the message type
    pub payload: Vec<u8>,
    /// Detached Ed25519 signature over [`Envelope::canonical_bytes`]
    pub signature: Vec<u8>,
}

impl Envelope {
    /// Build an unsigned envelope around an encoded payload.
    pub fn new(
        message_type: MessageType,
        source: NodeId,
        destination: Option<NodeId>,
        payload: Vec<u8>,
    ) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(WireError::Decode(format!(
                "payload too large: {} bytes (max {})",
                payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let msg_id = MessageId::derive(&source, destination.as_ref(), &payload, timestamp, 0);

        Ok(Envelope {
            message_type,
            msg_id,
            timestamp,
            source,
            destination,
            payload,
            signature: Vec::new(),
        })
    }

    /// Build an envelope from a typed payload.
    pub fn from_payload<T: Serialize>(
        message_type: MessageType,
        source: NodeId,
        destination: Option<NodeId>,
        payload: &T,
    ) -> Result<Self> {
        let bytes =
            serde_json::to_vec(payload).map_err(|e| WireError::Decode(e.to_string()))?;
        Self::new(message_type, source, destination, bytes)
    }

    /// Decode the payload as the given type.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload).map_err(|e| WireError::Decode(e.to_string()))
    }

    /// The deterministic byte form used as signing input.
    ///
    /// The signature field itself is excluded; everything else is encoded
    /// in fixed order with explicit lengths, so two envelopes with equal
    /// fields always produce identical bytes.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.payload.len());

        out.push(self.message_type.to_u8());
        out.extend_from_slice(self.msg_id.as_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(self.source.as_bytes());
        match &self.destination {
            Some(dest) => {
                out.push(1);
                out.extend_from_slice(dest.as_bytes());
            }
            None => out.push(0),
        }
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);

        out
    }

    /// Attach a detached signature produced over [`Self::canonical_bytes`].
    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = signature;
        self
    }
}

/// Handshake payload: identity, capabilities and protocol version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub node_info: NodeInfo,
    pub capabilities: Vec<Capability>,
    /// Protocol identification string, e.g. "networkneuron/1.0"
    pub version: String,
}

/// Discovery announcement carrying known nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDiscoveryPayload {
    pub nodes: Vec<NodeInfo>,
}

/// Request a route toward a destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequestPayload {
    pub destination: NodeId,
    pub requirements: RouteRequirements,
}

/// Answer to a route request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResponsePayload {
    /// Message id of the originating request
    pub request_id: MessageId,
    pub route: Route,
    pub alternatives: Vec<Route>,
}

/// A unit of tunneled client traffic
///
/// The route snapshot is consumed hop by hop: each forwarder removes itself
/// from the head before relaying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub packet_id: MessageId,
    pub source: NodeId,
    pub destination: NodeId,
    /// Remaining hops, head first
    pub route_snapshot: Vec<NodeId>,
    pub payload: Vec<u8>,
    /// Unix time in milliseconds
    pub created_at: u64,
    pub signature: Vec<u8>,
}

impl Packet {
    /// Deterministic signing input for the packet.
    ///
    /// The route snapshot is excluded: forwarders consume it hop by hop,
    /// and the origin signature must stay verifiable at every hop.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(96 + self.payload.len());

        out.extend_from_slice(self.packet_id.as_bytes());
        out.extend_from_slice(self.source.as_bytes());
        out.extend_from_slice(self.destination.as_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&self.created_at.to_be_bytes());

        out
    }

    /// Next hop to forward to, if any remain.
    pub fn next_hop(&self) -> Option<&NodeId> {
        self.route_snapshot.first()
    }

    /// Remove this forwarder from the head of the snapshot.
    pub fn advance(&mut self) -> Option<NodeId> {
        if self.route_snapshot.is_empty() {
            None
        } else {
            Some(self.route_snapshot.remove(0))
        }
    }
}

/// Wire form of a packet: either plaintext or AEAD-sealed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPacketPayload {
    pub encrypted: bool,
    /// AEAD nonce when encrypted; empty otherwise
    pub nonce: Vec<u8>,
    /// Ephemeral packet key sealed to the recipient, when the wrapped-key
    /// scheme is in use
    pub wrapped_key: Option<Vec<u8>>,
    /// Encoded [`Packet`], ciphertext when `encrypted`
    pub inner: Vec<u8>,
}

/// Keep-alive payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub bandwidth: BandwidthProfile,
}

/// Observed bandwidth report from a relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandwidthReportPayload {
    pub reporter: NodeId,
    pub bandwidth: BandwidthProfile,
    /// Bytes the reporter forwarded during the reporting window
    pub bytes_forwarded: u64,
}

/// Protocol-level error notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: u16,
    pub message: String,
}
