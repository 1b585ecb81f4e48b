//! Authenticated encryption with associated data
//!
//! XChaCha20-Poly1305 with an explicit 24-byte nonce. The associated data
//! is authenticated alongside the ciphertext; any mutation of ciphertext,
//! nonce or AAD fails decryption with [`CryptoError::AuthFail`].

use serde::{Deserialize, Serialize};
use sodiumoxide::crypto::aead::xchacha20poly1305_ietf as aead;

use crate::error::{CryptoError, Result};

/// Associated data bound to every packet unless the caller overrides it
pub const DEFAULT_AAD: &[u8] = b"networkneuron";

/// Symmetric key size
pub const KEY_BYTES: usize = aead::KEYBYTES;

/// Nonce size
pub const NONCE_BYTES: usize = aead::NONCEBYTES;

/// A symmetric AEAD key
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey(aead::Key);

impl SymmetricKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        SymmetricKey(aead::gen_key())
    }

    /// Restore a key from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        aead::Key::from_slice(bytes)
            .map(SymmetricKey)
            .ok_or_else(|| CryptoError::KeyGen("invalid symmetric key length".to_string()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey(..)")
    }
}

/// An explicit AEAD nonce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nonce([u8; NONCE_BYTES]);

impl Nonce {
    /// Generate a fresh random nonce.
    pub fn generate() -> Self {
        Nonce(aead::gen_nonce().0)
    }

    pub fn from_bytes(bytes: [u8; NONCE_BYTES]) -> Self {
        Nonce(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != NONCE_BYTES {
            return Err(CryptoError::KeyGen("invalid nonce length".to_string()));
        }
        let mut arr = [0u8; NONCE_BYTES];
        arr.copy_from_slice(bytes);
        Ok(Nonce(arr))
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_BYTES] {
        &self.0
    }
}

/// Ciphertext together with the nonce it was sealed under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub nonce: Nonce,
    pub ciphertext: Vec<u8>,
}

/// Encrypt `plaintext` under `key`, authenticating `aad`.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8], aad: &[u8]) -> EncryptedPayload {
    let nonce = Nonce::generate();
    let ciphertext = aead::seal(plaintext, Some(aad), &aead::Nonce(nonce.0), &key.0);
    EncryptedPayload { nonce, ciphertext }
}

/// Encrypt with a caller-provided nonce.
pub fn encrypt_with_nonce(
    key: &SymmetricKey,
    plaintext: &[u8],
    aad: &[u8],
    nonce: Nonce,
) -> EncryptedPayload {
    let ciphertext = aead::seal(plaintext, Some(aad), &aead::Nonce(nonce.0), &key.0);
    EncryptedPayload { nonce, ciphertext }
}

/// Decrypt and authenticate.
pub fn decrypt(key: &SymmetricKey, payload: &EncryptedPayload, aad: &[u8]) -> Result<Vec<u8>> {
    aead::open(
        &payload.ciphertext,
        Some(aad),
        &aead::Nonce(payload.nonce.0),
        &key.0,
    )
    .map_err(|_| CryptoError::AuthFail)
}
