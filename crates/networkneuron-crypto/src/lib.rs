//! NetworkNeuron cryptographic primitives
//!
//! Node identity and message signatures (Ed25519), authenticated encryption
//! with associated data (XChaCha20-Poly1305), per-peer tunnel key exchange
//! (X25519) and ephemeral key wrapping. All primitives come from libsodium
//! via `sodiumoxide`.

pub mod encryption;
pub mod error;
pub mod identity;
pub mod keyexchange;
pub mod random;
pub mod sealed;
pub mod tunnel;

pub use encryption::{decrypt, encrypt, EncryptedPayload, Nonce, SymmetricKey, DEFAULT_AAD};
pub use error::{CryptoError, Result};
pub use identity::NodeIdentity;
pub use keyexchange::{client_session_keys, derive_key, server_session_keys, KeyExchangeKeypair, SessionKeys};

/// Initialize the underlying crypto library.
///
/// Must be called once before any other operation; safe to call repeatedly.
pub fn init() -> Result<()> {
    sodiumoxide::init().map_err(|_| CryptoError::KeyGen("libsodium init failed".to_string()))
}
