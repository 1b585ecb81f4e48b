//! Packet sealing
//!
//! Two key schemes, chosen per route by configuration:
//! - `Tunnel`: one symmetric key per (sender, next hop) pair, derived from
//!   the identity keys with no extra material on the wire.
//! - `Wrapped`: a fresh key per packet, sealed to the next hop's public
//!   key and carried alongside the ciphertext.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use networkneuron_crypto::encryption::{decrypt, encrypt, EncryptedPayload, Nonce, SymmetricKey, DEFAULT_AAD};
use networkneuron_crypto::sealed::{unwrap_key, wrap_key, wrap_public_key_for, WrapKeypair};
use networkneuron_crypto::tunnel::tunnel_key;
use networkneuron_crypto::NodeIdentity;
use networkneuron_protocol::envelope::DataPacketPayload;

use crate::error::RouteError;

/// How packet keys are distributed for a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyScheme {
    /// Per-peer tunnel key via ECDH + KDF
    #[default]
    Tunnel,
    /// Ephemeral per-packet key wrapped to the recipient
    Wrapped,
}

/// Seals and opens packet payloads for this node
pub struct PacketSealer {
    identity: Arc<NodeIdentity>,
    wrap_keypair: WrapKeypair,
    scheme: KeyScheme,
}

impl PacketSealer {
    pub fn new(identity: Arc<NodeIdentity>, scheme: KeyScheme) -> Result<Self, RouteError> {
        let wrap_keypair = WrapKeypair::from_identity(&identity)
            .map_err(|e| RouteError::Invalid(e.to_string()))?;
        Ok(PacketSealer {
            identity,
            wrap_keypair,
            scheme,
        })
    }

    pub fn scheme(&self) -> KeyScheme {
        self.scheme
    }

    /// Seal encoded packet bytes for the next hop.
    pub fn seal(
        &self,
        next_hop_public_key: &[u8],
        packet_bytes: &[u8],
    ) -> Result<DataPacketPayload, RouteError> {
        match self.scheme {
            KeyScheme::Tunnel => {
                let key = tunnel_key(&self.identity, next_hop_public_key)
                    .map_err(|e| RouteError::Invalid(e.to_string()))?;
                let sealed = encrypt(&key, packet_bytes, DEFAULT_AAD);

                Ok(DataPacketPayload {
                    encrypted: true,
                    nonce: sealed.nonce.as_bytes().to_vec(),
                    wrapped_key: None,
                    inner: sealed.ciphertext,
                })
            }
            KeyScheme::Wrapped => {
                let packet_key = SymmetricKey::generate();
                let sealed = encrypt(&packet_key, packet_bytes, DEFAULT_AAD);

                let wrap_pk = wrap_public_key_for(next_hop_public_key)
                    .map_err(|e| RouteError::Invalid(e.to_string()))?;
                let wrapped = wrap_key(&packet_key, &wrap_pk)
                    .map_err(|e| RouteError::Invalid(e.to_string()))?;

                Ok(DataPacketPayload {
                    encrypted: true,
                    nonce: sealed.nonce.as_bytes().to_vec(),
                    wrapped_key: Some(wrapped),
                    inner: sealed.ciphertext,
                })
            }
        }
    }

    /// Open a sealed payload addressed to this node.
    pub fn open(
        &self,
        sender_public_key: &[u8],
        payload: &DataPacketPayload,
    ) -> Result<Vec<u8>, RouteError> {
        if !payload.encrypted {
            return Ok(payload.inner.clone());
        }

        let nonce = Nonce::from_slice(&payload.nonce)
            .map_err(|e| RouteError::Invalid(e.to_string()))?;
        let sealed = EncryptedPayload {
            nonce,
            ciphertext: payload.inner.clone(),
        };

        let key = match &payload.wrapped_key {
            Some(wrapped) => unwrap_key(wrapped, &self.wrap_keypair)
                .map_err(|e| RouteError::Invalid(e.to_string()))?,
            None => tunnel_key(&self.identity, sender_public_key)
                .map_err(|e| RouteError::Invalid(e.to_string()))?,
        };

        decrypt(&key, &sealed, DEFAULT_AAD).map_err(|e| RouteError::Invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealer(identity: Arc<NodeIdentity>, scheme: KeyScheme) -> PacketSealer {
        PacketSealer::new(identity, scheme).unwrap()
    }

    #[test]
    fn test_tunnel_seal_open() {
        networkneuron_crypto::init().unwrap();

        let alice = Arc::new(NodeIdentity::generate().unwrap());
        let bob = Arc::new(NodeIdentity::generate().unwrap());

        let alice_sealer = sealer(Arc::clone(&alice), KeyScheme::Tunnel);
        let bob_sealer = sealer(Arc::clone(&bob), KeyScheme::Tunnel);

        let sealed = alice_sealer
            .seal(&bob.export_public_key(), b"packet bytes")
            .unwrap();
        assert!(sealed.encrypted);
        assert!(sealed.wrapped_key.is_none());

        let opened = bob_sealer
            .open(&alice.export_public_key(), &sealed)
            .unwrap();
        assert_eq!(opened, b"packet bytes");
    }

    #[test]
    fn test_wrapped_seal_open() {
        networkneuron_crypto::init().unwrap();

        let alice = Arc::new(NodeIdentity::generate().unwrap());
        let bob = Arc::new(NodeIdentity::generate().unwrap());

        let alice_sealer = sealer(Arc::clone(&alice), KeyScheme::Wrapped);
        let bob_sealer = sealer(Arc::clone(&bob), KeyScheme::Wrapped);

        let sealed = alice_sealer
            .seal(&bob.export_public_key(), b"packet bytes")
            .unwrap();
        assert!(sealed.wrapped_key.is_some());

        let opened = bob_sealer
            .open(&alice.export_public_key(), &sealed)
            .unwrap();
        assert_eq!(opened, b"packet bytes");
    }

    #[test]
    fn test_wrong_recipient_cannot_open() {
        networkneuron_crypto::init().unwrap();

        let alice = Arc::new(NodeIdentity::generate().unwrap());
        let bob = Arc::new(NodeIdentity::generate().unwrap());
        let eve = Arc::new(NodeIdentity::generate().unwrap());

        for scheme in [KeyScheme::Tunnel, KeyScheme::Wrapped] {
            let alice_sealer = sealer(Arc::clone(&alice), scheme);
            let eve_sealer = sealer(Arc::clone(&eve), scheme);

            let sealed = alice_sealer
                .seal(&bob.export_public_key(), b"secret")
                .unwrap();
            assert!(eve_sealer.open(&alice.export_public_key(), &sealed).is_err());
        }
    }

    #[test]
    fn test_plaintext_payload_passthrough() {
        networkneuron_crypto::init().unwrap();

        let alice = Arc::new(NodeIdentity::generate().unwrap());
        let s = sealer(alice, KeyScheme::Tunnel);

        let payload = DataPacketPayload {
            encrypted: false,
            nonce: Vec::new(),
            wrapped_key: None,
            inner: b"clear".to_vec(),
        };
        assert_eq!(s.open(&[0u8; 32], &payload).unwrap(), b"clear");
    }
}
