//! Per-peer tunnel keys
//!
//! Derives one symmetric key per (local, remote) identity pair: both ends
//! convert their Ed25519 identity keys to Curve25519, compute the shared
//! point, and run it through the KDF with a fixed salt. Either side derives
//! the same key, so a tunnel needs no extra key material on the wire.

use sodiumoxide::crypto::box_;
use sodiumoxide::crypto::sign::ed25519;

use crate::encryption::SymmetricKey;
use crate::error::{CryptoError, Result};
use crate::identity::NodeIdentity;
use crate::keyexchange::derive_key;

const TUNNEL_SALT: &[u8] = b"networkneuron-tunnel";

/// Derive the shared tunnel key for traffic between `identity` and the
/// peer that owns `remote_ed25519_pk`.
pub fn tunnel_key(identity: &NodeIdentity, remote_ed25519_pk: &[u8]) -> Result<SymmetricKey> {
    let remote_pk = ed25519::PublicKey::from_slice(remote_ed25519_pk)
        .ok_or_else(|| CryptoError::KeyGen("invalid remote public key length".to_string()))?;

    let curve_remote = ed25519::to_curve25519_pk(&remote_pk)
        .map_err(|_| CryptoError::KeyGen("remote key not convertible".to_string()))?;
    let curve_local = ed25519::to_curve25519_sk(&identity.secret_key)
        .map_err(|_| CryptoError::KeyGen("local key not convertible".to_string()))?;

    let shared = box_::precompute(&curve_remote, &curve_local);

    derive_key(shared.as_ref(), TUNNEL_SALT)
}
