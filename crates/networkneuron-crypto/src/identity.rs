//! Long-lived node identity
//!
//! Each node owns one Ed25519 keypair for the lifetime of its identity.
//! The node id is the BLAKE2b-256 hash of the public key; the secret key
//! signs every outbound protocol message.

use blake2::{Blake2b512, Digest};
use sodiumoxide::crypto::sign::ed25519;

use crate::error::{CryptoError, Result};

/// Size of a node id derived from the public key
pub const NODE_ID_BYTES: usize = 32;

/// Size of a detached Ed25519 signature
pub const SIGNATURE_BYTES: usize = ed25519::SIGNATUREBYTES;

/// A node's long-lived signing identity
#[derive(Clone)]
pub struct NodeIdentity {
    pub public_key: ed25519::PublicKey,
    pub secret_key: ed25519::SecretKey,
}

impl NodeIdentity {
    /// Generate a fresh identity keypair.
    pub fn generate() -> Result<Self> {
        crate::init()?;
        let (public_key, secret_key) = ed25519::gen_keypair();
        Ok(NodeIdentity {
            public_key,
            secret_key,
        })
    }

    /// Restore an identity from exported secret key bytes.
    pub fn from_secret_key(bytes: &[u8]) -> Result<Self> {
        let secret_key = ed25519::SecretKey::from_slice(bytes)
            .ok_or_else(|| CryptoError::KeyGen("invalid secret key length".to_string()))?;
        let public_key = secret_key.public_key();
        Ok(NodeIdentity {
            public_key,
            secret_key,
        })
    }

    /// Stable node id: BLAKE2b-256 of the public key.
    pub fn node_id_bytes(&self) -> [u8; NODE_ID_BYTES] {
        node_id_for_public_key(self.public_key.as_ref())
    }

    /// Export the secret key for persistence.
    pub fn export_secret_key(&self) -> Vec<u8> {
        self.secret_key.as_ref().to_vec()
    }

    /// Export the public key for sharing.
    pub fn export_public_key(&self) -> Vec<u8> {
        self.public_key.as_ref().to_vec()
    }

    /// Produce a detached signature over `message`.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        ed25519::sign_detached(message, &self.secret_key)
            .as_ref()
            .to_vec()
    }
}

impl std::fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secret key intentionally omitted
        write!(f, "NodeIdentity({})", hex::encode(self.node_id_bytes()))
    }
}

/// Derive the node id for any advertised public key.
pub fn node_id_for_public_key(public_key: &[u8]) -> [u8; NODE_ID_BYTES] {
    let mut hasher = Blake2b512::new();
    hasher.update(public_key);
    let hash = hasher.finalize();

    let mut id = [0u8; NODE_ID_BYTES];
    id.copy_from_slice(&hash[..NODE_ID_BYTES]);
    id
}

/// Verify a detached signature against an advertised public key.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
    let public_key = ed25519::PublicKey::from_slice(public_key)
        .ok_or_else(|| CryptoError::Verify("invalid public key length".to_string()))?;

    let signature = ed25519::Signature::from_bytes(signature)
        .map_err(|_| CryptoError::Verify("invalid signature length".to_string()))?;

    if ed25519::verify_detached(&signature, message, &public_key) {
        Ok(())
    } else {
        Err(CryptoError::Verify("signature mismatch".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_round_trip() {
        let identity = NodeIdentity::generate().unwrap();
        let message = b"canonical message bytes";

        let signature = identity.sign(message);
        assert_eq!(signature.len(), SIGNATURE_BYTES);

        assert!(verify(&identity.export_public_key(), message, &signature).is_ok());
    }

    #[test]
    fn test_mutated_message_fails_verification() {
        let identity = NodeIdentity::generate().unwrap();
        let signature = identity.sign(b"original");

        let result = verify(&identity.export_public_key(), b"mutated", &signature);
        assert!(matches!(result, Err(CryptoError::Verify(_))));
    }

    #[test]
    fn test_mutated_signature_fails_verification() {
        let identity = NodeIdentity::generate().unwrap();
        let message = b"original";
        let mut signature = identity.sign(message);
        signature[0] ^= 0x01;

        assert!(verify(&identity.export_public_key(), message, &signature).is_err());
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let alice = NodeIdentity::generate().unwrap();
        let bob = NodeIdentity::generate().unwrap();
        let message = b"from alice";

        let signature = alice.sign(message);
        assert!(verify(&bob.export_public_key(), message, &signature).is_err());
    }

    #[test]
    fn test_secret_key_round_trip() {
        let identity = NodeIdentity::generate().unwrap();
        let restored = NodeIdentity::from_secret_key(&identity.export_secret_key()).unwrap();

        assert_eq!(identity.node_id_bytes(), restored.node_id_bytes());
        assert_eq!(identity.export_public_key(), restored.export_public_key());
    }

    #[test]
    fn test_node_id_is_stable_hash_of_public_key() {
        let identity = NodeIdentity::generate().unwrap();

        let id1 = identity.node_id_bytes();
        let id2 = node_id_for_public_key(&identity.export_public_key());
        assert_eq!(id1, id2);

        let other = NodeIdentity::generate().unwrap();
        assert_ne!(id1, other.node_id_bytes());
    }

    #[test]
    fn test_bad_key_material_rejected() {
        assert!(NodeIdentity::from_secret_key(b"short").is_err());
        assert!(verify(b"short", b"msg", &[0u8; SIGNATURE_BYTES]).is_err());
    }
}
