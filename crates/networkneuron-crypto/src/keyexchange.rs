//! Per-peer tunnel key exchange
//!
//! X25519 key exchange producing distinct transmit/receive keys for each
//! (initiator, responder) pair, plus a KDF for deriving symmetric keys from
//! a shared secret and salt.

use blake2::{Blake2b512, Digest};
use serde::{Deserialize, Serialize};
use sodiumoxide::crypto::kx;

use crate::encryption::SymmetricKey;
use crate::error::{CryptoError, Result};

/// Size of an X25519 public key
pub const PUBLIC_KEY_BYTES: usize = kx::PUBLICKEYBYTES;

/// An X25519 public key exchanged during handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct X25519PublicKey(pub [u8; PUBLIC_KEY_BYTES]);

impl X25519PublicKey {
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_BYTES] {
        &self.0
    }
}

/// Ephemeral or semi-static keypair for tunnel key exchange
pub struct KeyExchangeKeypair {
    pub public_key: kx::PublicKey,
    secret_key: kx::SecretKey,
}

impl KeyExchangeKeypair {
    /// Generate a fresh key-exchange keypair.
    pub fn generate() -> Self {
        let (public_key, secret_key) = kx::gen_keypair();
        KeyExchangeKeypair {
            public_key,
            secret_key,
        }
    }

    pub fn public(&self) -> X25519PublicKey {
        X25519PublicKey(self.public_key.0)
    }
}

/// Directional session keys for one tunnel
pub struct SessionKeys {
    /// Encrypts traffic we send
    pub tx_key: SymmetricKey,
    /// Decrypts traffic we receive
    pub rx_key: SymmetricKey,
}

/// Derive session keys as the initiating (client) side.
pub fn client_session_keys(
    local: &KeyExchangeKeypair,
    remote: &X25519PublicKey,
) -> Result<SessionKeys> {
    let remote_pk = kx::PublicKey(remote.0);
    let (rx, tx) = kx::client_session_keys(&local.public_key, &local.secret_key, &remote_pk)
        .map_err(|_| CryptoError::KeyGen("client session key derivation failed".to_string()))?;

    Ok(SessionKeys {
        tx_key: SymmetricKey::from_bytes(tx.as_ref())?,
        rx_key: SymmetricKey::from_bytes(rx.as_ref())?,
    })
}

/// Derive session keys as the responding (server) side.
pub fn server_session_keys(
    local: &KeyExchangeKeypair,
    remote: &X25519PublicKey,
) -> Result<SessionKeys> {
    let remote_pk = kx::PublicKey(remote.0);
    let (rx, tx) = kx::server_session_keys(&local.public_key, &local.secret_key, &remote_pk)
        .map_err(|_| CryptoError::KeyGen("server session key derivation failed".to_string()))?;

    Ok(SessionKeys {
        tx_key: SymmetricKey::from_bytes(tx.as_ref())?,
        rx_key: SymmetricKey::from_bytes(rx.as_ref())?,
    })
}

/// Derive a symmetric key from a shared secret and salt.
pub fn derive_key(shared_secret: &[u8], salt: &[u8]) -> Result<SymmetricKey> {
    let mut hasher = Blake2b512::new();
    hasher.update((shared_secret.len() as u64).to_be_bytes());
    hasher.update(shared_secret);
    hasher.update(salt);
    let hash = hasher.finalize();

    SymmetricKey::from_bytes(&hash[..crate::encryption::KEY_BYTES])
}
