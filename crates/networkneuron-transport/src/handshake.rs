//! Authenticated handshake
//!
//! Explicit state machine with a deadline on every step. Each side sends a
//! signed `Handshake` envelope carrying its node info, capabilities and
//! protocol version; the signature is verified against the advertised
//! public key, and the claimed node id must match the hash of that key.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use networkneuron_crypto::identity::{node_id_for_public_key, verify};
use networkneuron_crypto::NodeIdentity;
use networkneuron_protocol::envelope::{HandshakePayload, MessageType};
use networkneuron_protocol::{Envelope, NodeId, WireError, PROTOCOL_ID};

use crate::conn::{read_frame, write_frame};
use crate::error::{Result, TransportError};

/// Handshake tuning
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Deadline applied to each send/receive step
    pub step_deadline: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        HandshakeConfig {
            step_deadline: Duration::from_secs(10),
        }
    }
}

/// A verified remote identity produced by a successful handshake
#[derive(Debug, Clone)]
pub struct HandshakeOutcome {
    pub remote: HandshakePayload,
}

impl HandshakeOutcome {
    pub fn remote_node_id(&self) -> NodeId {
        self.remote.node_info.node_id
    }
}

async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::TimedOut(deadline.as_millis() as u64)),
    }
}

fn build_hello(identity: &NodeIdentity, local: &HandshakePayload) -> Result<Envelope> {
    let source = NodeId::from_bytes(identity.node_id_bytes());
    let envelope = Envelope::from_payload(MessageType::Handshake, source, None, local)?;
    let signature = identity.sign(&envelope.canonical_bytes());
    Ok(envelope.with_signature(signature))
}

/// Verify a received handshake envelope and extract its payload.
///
/// The signature check runs before anything in the payload is trusted.
pub fn verify_hello(envelope: &Envelope) -> Result<HandshakePayload> {
    if envelope.message_type != MessageType::Handshake {
        return Err(TransportError::HandshakeFail(format!(
            "expected handshake, got {:?}",
            envelope.message_type
        )));
    }

    let payload: HandshakePayload = envelope.decode_payload()?;

    verify(
        &payload.node_info.public_key,
        &envelope.canonical_bytes(),
        &envelope.signature,
    )
    .map_err(|_| {
        TransportError::Wire(WireError::BadSignature {
            peer: envelope.source.to_string(),
        })
    })?;

    // The claimed node id must be the hash of the key that signed
    let derived = NodeId::from_bytes(node_id_for_public_key(&payload.node_info.public_key));
    if derived != payload.node_info.node_id || derived != envelope.source {
        return Err(TransportError::HandshakeFail(
            "node id does not match public key".to_string(),
        ));
    }

    if payload.version != PROTOCOL_ID {
        return Err(TransportError::HandshakeFail(format!(
            "protocol mismatch: {}",
            payload.version
        )));
    }

    Ok(payload)
}

/// Run the handshake as the dialing side.
pub async fn initiate<S>(
    stream: &mut S,
    identity: &NodeIdentity,
    local: &HandshakePayload,
    config: &HandshakeConfig,
) -> Result<HandshakeOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let hello = build_hello(identity, local)?;
    with_deadline(config.step_deadline, write_frame(stream, &hello)).await?;
    debug!(source = %hello.source, "handshake hello sent");

    let response = with_deadline(config.step_deadline, read_frame(stream)).await?;
    let remote = verify_hello(&response)?;
    debug!(peer = %remote.node_info.node_id, "handshake complete");

    Ok(HandshakeOutcome { remote })
}

/// Run the handshake as the accepting side.
pub async fn respond<S>(
    stream: &mut S,
    identity: &NodeIdentity,
    local: &HandshakePayload,
    config: &HandshakeConfig,
) -> Result<HandshakeOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let hello = with_deadline(config.step_deadline, read_frame(stream)).await?;
    let remote = verify_hello(&hello)?;

    let reply = build_hello(identity, local)?;
    with_deadline(config.step_deadline, write_frame(stream, &reply)).await?;
    debug!(peer = %remote.node_info.node_id, "handshake response sent");

    Ok(HandshakeOutcome { remote })
}

#[cfg(test)]
mod tests {
    use super::*;
    use networkneuron_protocol::types::{BandwidthProfile, Capability, NodeInfo};

    fn payload_for(identity: &NodeIdentity, address: &str) -> HandshakePayload {
        HandshakePayload {
            node_info: NodeInfo {
                node_id: NodeId::from_bytes(identity.node_id_bytes()),
                address: address.to_string(),
                public_key: identity.export_public_key(),
                region: Some("eu-west".to_string()),
                bandwidth: BandwidthProfile::default(),
            },
            capabilities: vec![Capability::Relay],
            version: PROTOCOL_ID.to_string(),
        }
    }

    #[tokio::test]
    async fn test_mutual_handshake() {
        networkneuron_crypto::init().unwrap();

        let alice = NodeIdentity::generate().unwrap();
        let bob = NodeIdentity::generate().unwrap();
        let alice_payload = payload_for(&alice, "127.0.0.1:4001");
        let bob_payload = payload_for(&bob, "127.0.0.1:4002");

        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let config = HandshakeConfig::default();

        let (client_out, server_out) = tokio::join!(
            initiate(&mut client, &alice, &alice_payload, &config),
            respond(&mut server, &bob, &bob_payload, &config),
        );

        let client_out = client_out.unwrap();
        let server_out = server_out.unwrap();

        assert_eq!(
            client_out.remote_node_id(),
            NodeId::from_bytes(bob.node_id_bytes())
        );
        assert_eq!(
            server_out.remote_node_id(),
            NodeId::from_bytes(alice.node_id_bytes())
        );
    }

    #[tokio::test]
    async fn test_forged_signature_rejected() {
        networkneuron_crypto::init().unwrap();

        let alice = NodeIdentity::generate().unwrap();
        let mallory = NodeIdentity::generate().unwrap();

        // Mallory claims Alice's info but can only sign with her own key
        let forged_payload = payload_for(&alice, "127.0.0.1:4001");
        let envelope = Envelope::from_payload(
            MessageType::Handshake,
            NodeId::from_bytes(alice.node_id_bytes()),
            None,
            &forged_payload,
        )
        .unwrap();
        let forged = envelope.clone().with_signature(mallory.sign(&envelope.canonical_bytes()));

        assert!(matches!(
            verify_hello(&forged),
            Err(TransportError::Wire(WireError::BadSignature { .. }))
        ));
    }

    #[tokio::test]
    async fn test_node_id_mismatch_rejected() {
        networkneuron_crypto::init().unwrap();

        let alice = NodeIdentity::generate().unwrap();
        let mut payload = payload_for(&alice, "127.0.0.1:4001");
        payload.node_info.node_id = NodeId::from_bytes([9u8; 32]);

        let envelope = Envelope::from_payload(
            MessageType::Handshake,
            NodeId::from_bytes(alice.node_id_bytes()),
            None,
            &payload,
        )
        .unwrap();
        let signed = envelope.clone().with_signature(alice.sign(&envelope.canonical_bytes()));

        assert!(matches!(
            verify_hello(&signed),
            Err(TransportError::HandshakeFail(_))
        ));
    }

    #[tokio::test]
    async fn test_protocol_mismatch_rejected() {
        networkneuron_crypto::init().unwrap();

        let alice = NodeIdentity::generate().unwrap();
        let mut payload = payload_for(&alice, "127.0.0.1:4001");
        payload.version = "networkneuron/0.9".to_string();

        let envelope = Envelope::from_payload(
            MessageType::Handshake,
            NodeId::from_bytes(alice.node_id_bytes()),
            None,
            &payload,
        )
        .unwrap();
        let signed = envelope.clone().with_signature(alice.sign(&envelope.canonical_bytes()));

        assert!(matches!(
            verify_hello(&signed),
            Err(TransportError::HandshakeFail(_))
        ));
    }

    #[tokio::test]
    async fn test_initiator_times_out_without_response() {
        networkneuron_crypto::init().unwrap();

        let alice = NodeIdentity::generate().unwrap();
        let payload = payload_for(&alice, "127.0.0.1:4001");

        let (mut client, _server) = tokio::io::duplex(64 * 1024);
        let config = HandshakeConfig {
            step_deadline: Duration::from_millis(50),
        };

        let result = initiate(&mut client, &alice, &payload, &config).await;
        assert!(matches!(result, Err(TransportError::TimedOut(_))));
    }
}
