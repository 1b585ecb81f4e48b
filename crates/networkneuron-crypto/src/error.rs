//! Error types for cryptographic operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CryptoError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CryptoError {
    /// AEAD tag mismatch: ciphertext, nonce or associated data was altered
    #[error("Authentication failed")]
    AuthFail,

    #[error("Key generation failed: {0}")]
    KeyGen(String),

    #[error("Signing failed: {0}")]
    Sign(String),

    #[error("Signature verification failed: {0}")]
    Verify(String),
}
