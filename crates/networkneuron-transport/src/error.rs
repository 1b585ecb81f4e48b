//! Error types for transport operations

use networkneuron_crypto::CryptoError;
use networkneuron_protocol::WireError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Dial failed for {addr}: {reason}")]
    DialFail { addr: String, reason: String },

    #[error("Handshake failed: {0}")]
    HandshakeFail(String),

    #[error("Outbound queue full for peer {0}")]
    Congested(String),

    #[error("Operation timed out after {0} ms")]
    TimedOut(u64),

    #[error("Connection closed")]
    Closed,

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
