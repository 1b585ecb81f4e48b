//! Frame format for wire transmission
//!
//! Frames are the on-wire representation of envelopes. Layout:
//! - Length (4 bytes): total frame length excluding this prefix (big-endian)
//! - Magic (4 bytes): 0x4E4E524E ("NNRN")
//! - Version (1 byte): protocol version (0x01)
//! - Message type (1 byte)
//! - Flags (1 byte): bit 0 = destination present
//! - Reserved (1 byte): must be zero
//! - Message ID (16 bytes)
//! - Source node ID (32 bytes)
//! - Destination node ID (32 bytes, zeroed when absent)
//! - Timestamp (8 bytes, big-endian, milliseconds)
//! - Payload length (4 bytes, big-endian)
//! - Payload (variable)
//! - Signature length (2 bytes, big-endian)
//! - Signature (variable, 64 bytes for Ed25519)

use crate::envelope::{Envelope, MessageType, MAX_PAYLOAD_SIZE};
use crate::error::{Result, WireError};
use crate::types::{MessageId, NodeId, NODE_ID_SIZE, SHORT_ID_SIZE};
use crate::PROTOCOL_VERSION;

/// Magic bytes identifying NetworkNeuron frames: "NNRN"
pub const MAGIC_BYTES: [u8; 4] = [0x4E, 0x4E, 0x52, 0x4E];

/// Fixed header size after the length prefix:
/// 4 + 1 + 1 + 1 + 1 + 16 + 32 + 32 + 8 + 4 = 100 bytes
pub const HEADER_SIZE: usize = 100;

/// Maximum signature size accepted on decode
pub const MAX_SIGNATURE_SIZE: usize = 256;

/// Maximum total frame size
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE + 2 + MAX_SIGNATURE_SIZE;

const FLAG_HAS_DESTINATION: u8 = 0b0000_0001;

/// Encode an envelope into a length-prefixed frame.
pub fn encode_frame(envelope: &Envelope) -> Result<Vec<u8>> {
    if envelope.payload.len() > MAX_PAYLOAD_SIZE {
        return Err(WireError::Decode(format!(
            "payload too large: {} bytes (max {})",
            envelope.payload.len(),
            MAX_PAYLOAD_SIZE
        )));
    }
    if envelope.signature.len() > MAX_SIGNATURE_SIZE {
        return Err(WireError::Decode(format!(
            "signature too large: {} bytes (max {})",
            envelope.signature.len(),
            MAX_SIGNATURE_SIZE
        )));
    }

    let body_len = HEADER_SIZE + envelope.payload.len() + 2 + envelope.signature.len();
    let mut out = Vec::with_capacity(4 + body_len);

    out.extend_from_slice(&(body_len as u32).to_be_bytes());
    out.extend_from_slice(&MAGIC_BYTES);
    out.push(PROTOCOL_VERSION);
    out.push(envelope.message_type.to_u8());
    out.push(if envelope.destination.is_some() {
        FLAG_HAS_DESTINATION
    } else {
        0
    });
    out.push(0); // reserved
    out.extend_from_slice(envelope.msg_id.as_bytes());
    out.extend_from_slice(envelope.source.as_bytes());
    match &envelope.destination {
        Some(dest) => out.extend_from_slice(dest.as_bytes()),
        None => out.extend_from_slice(&[0u8; NODE_ID_SIZE]),
    }
    out.extend_from_slice(&envelope.timestamp.to_be_bytes());
    out.extend_from_slice(&(envelope.payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&envelope.payload);
    out.extend_from_slice(&(envelope.signature.len() as u16).to_be_bytes());
    out.extend_from_slice(&envelope.signature);

    Ok(out)
}

/// Decode a frame body (the bytes following the length prefix).
///
/// Decode is total: any malformed input yields a [`WireError`], never a
/// partially constructed envelope.
pub fn decode_frame(body: &[u8]) -> Result<Envelope> {
    if body.len() < HEADER_SIZE {
        return Err(WireError::Decode(format!(
            "frame too short: {} bytes (header is {})",
            body.len(),
            HEADER_SIZE
        )));
    }
    if body.len() > MAX_FRAME_SIZE {
        return Err(WireError::Decode(format!(
            "frame too large: {} bytes (max {})",
            body.len(),
            MAX_FRAME_SIZE
        )));
    }

    let mut pos = 0usize;

    if body[pos..pos + 4] != MAGIC_BYTES {
        return Err(WireError::Decode("bad magic bytes".to_string()));
    }
    pos += 4;

    let version = body[pos];
    pos += 1;
    if version != PROTOCOL_VERSION {
        return Err(WireError::Decode(format!(
            "unsupported protocol version: {}",
            version
        )));
    }

    let message_type = MessageType::from_u8(body[pos])?;
    pos += 1;

    let flags = body[pos];
    pos += 1;
    pos += 1; // reserved

    let mut msg_id = [0u8; SHORT_ID_SIZE];
    msg_id.copy_from_slice(&body[pos..pos + SHORT_ID_SIZE]);
    pos += SHORT_ID_SIZE;

    let mut source = [0u8; NODE_ID_SIZE];
    source.copy_from_slice(&body[pos..pos + NODE_ID_SIZE]);
    pos += NODE_ID_SIZE;

    let mut dest = [0u8; NODE_ID_SIZE];
    dest.copy_from_slice(&body[pos..pos + NODE_ID_SIZE]);
    pos += NODE_ID_SIZE;

    let timestamp = u64::from_be_bytes(body[pos..pos + 8].try_into().unwrap());
    pos += 8;

    let payload_len = u32::from_be_bytes(body[pos..pos + 4].try_into().unwrap()) as usize;
    pos += 4;

    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(WireError::Decode(format!(
            "payload too large: {} bytes (max {})",
            payload_len, MAX_PAYLOAD_SIZE
        )));
    }
    if body.len() < pos + payload_len + 2 {
        return Err(WireError::Decode("truncated payload".to_string()));
    }

    let payload = body[pos..pos + payload_len].to_vec();
    pos += payload_len;

    let sig_len = u16::from_be_bytes(body[pos..pos + 2].try_into().unwrap()) as usize;
    pos += 2;

    if sig_len > MAX_SIGNATURE_SIZE {
        return Err(WireError::Decode(format!(
            "signature too large: {} bytes (max {})",
            sig_len, MAX_SIGNATURE_SIZE
        )));
    }
    if body.len() != pos + sig_len {
        return Err(WireError::Decode("trailing bytes after signature".to_string()));
    }

    let signature = body[pos..pos + sig_len].to_vec();

    let destination = if flags & FLAG_HAS_DESTINATION != 0 {
        Some(NodeId::from_bytes(dest))
    } else {
        None
    };

    Ok(Envelope {
        message_type,
        msg_id: MessageId::from_bytes(msg_id),
        timestamp,
        source: NodeId::from_bytes(source),
        destination,
        payload,
        signature,
    })
}
