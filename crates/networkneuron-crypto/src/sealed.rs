//! Ephemeral per-packet key wrapping
//!
//! When a route uses the wrapped-key scheme, the sender generates a fresh
//! symmetric key per packet and seals it to the recipient's Curve25519
//! public key. Only the recipient can unwrap it; the key never travels in
//! plaintext.

use sodiumoxide::crypto::box_;
use sodiumoxide::crypto::sealedbox;
use sodiumoxide::crypto::sign::ed25519;

use crate::encryption::SymmetricKey;
use crate::error::{CryptoError, Result};
use crate::identity::NodeIdentity;

/// A Curve25519 keypair for receiving wrapped keys
pub struct WrapKeypair {
    pub public_key: box_::PublicKey,
    secret_key: box_::SecretKey,
}

impl WrapKeypair {
    /// Generate a fresh wrapping keypair.
    pub fn generate() -> Self {
        let (public_key, secret_key) = box_::gen_keypair();
        WrapKeypair {
            public_key,
            secret_key,
        }
    }

    /// Derive the wrapping keypair from a node's signing identity, so a
    /// packet can be sealed to any peer whose Ed25519 key we know.
    pub fn from_identity(identity: &NodeIdentity) -> Result<Self> {
        let public_key = ed25519::to_curve25519_pk(&identity.public_key)
            .map_err(|_| CryptoError::KeyGen("public key not convertible".to_string()))?;
        let secret_key = ed25519::to_curve25519_sk(&identity.secret_key)
            .map_err(|_| CryptoError::KeyGen("secret key not convertible".to_string()))?;
        Ok(WrapKeypair {
            public_key,
            secret_key,
        })
    }

    pub fn public_bytes(&self) -> Vec<u8> {
        self.public_key.as_ref().to_vec()
    }
}

/// The Curve25519 key a peer's packets should be wrapped to, derived from
/// its advertised Ed25519 key.
pub fn wrap_public_key_for(ed25519_public_key: &[u8]) -> Result<Vec<u8>> {
    let pk = ed25519::PublicKey::from_slice(ed25519_public_key)
        .ok_or_else(|| CryptoError::KeyGen("invalid public key length".to_string()))?;
    let curve = ed25519::to_curve25519_pk(&pk)
        .map_err(|_| CryptoError::KeyGen("public key not convertible".to_string()))?;
    Ok(curve.as_ref().to_vec())
}

/// Seal a symmetric key to a recipient's public key.
pub fn wrap_key(key: &SymmetricKey, recipient_public_key: &[u8]) -> Result<Vec<u8>> {
    let public_key = box_::PublicKey::from_slice(recipient_public_key)
        .ok_or_else(|| CryptoError::KeyGen("invalid wrap public key length".to_string()))?;

    Ok(sealedbox::seal(key.as_bytes(), &public_key))
}

/// Unwrap a symmetric key sealed to our keypair.
pub fn unwrap_key(wrapped: &[u8], keypair: &WrapKeypair) -> Result<SymmetricKey> {
    let bytes = sealedbox::open(wrapped, &keypair.public_key, &keypair.secret_key)
        .map_err(|_| CryptoError::AuthFail)?;

    SymmetricKey::from_bytes(&bytes)
}
