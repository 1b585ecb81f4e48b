//! Error types for wire codec operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WireError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WireError {
    #[error("Unknown message type: {0:#04x}")]
    UnknownType(u8),

    #[error("Bad signature on message from {peer}")]
    BadSignature { peer: String },

    #[error("Replayed message {msg_id} from {peer}")]
    Replay { peer: String, msg_id: String },

    #[error("Decode failed: {0}")]
    Decode(String),
}
