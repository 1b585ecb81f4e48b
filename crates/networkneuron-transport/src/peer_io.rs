//! Per-peer send and receive loops
//!
//! Each connected peer gets two cooperative tasks: an outbound loop
//! draining a bounded queue onto the socket, and an inbound loop that
//! verifies every envelope signature and replay-checks it before anything
//! payload-specific runs. A full outbound queue fails fast with
//! `Congested`.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use networkneuron_crypto::identity::verify;
use networkneuron_protocol::{Envelope, NodeId, ReplayWindow, WireError};

use crate::conn::{read_frame, write_frame};
use crate::error::{Result, TransportError};
use crate::manager::InboundMessage;

/// Sender half of a peer connection
#[derive(Clone)]
pub struct PeerHandle {
    pub node_id: NodeId,
    outbound: mpsc::Sender<Envelope>,
}

impl PeerHandle {
    /// Queue an envelope for transmission. Fails fast when the bounded
    /// queue is full.
    pub fn try_send(&self, envelope: Envelope) -> Result<()> {
        self.outbound.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                TransportError::Congested(self.node_id.to_string())
            }
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Spawn the send/recv loops for one verified peer connection.
///
/// Returns the peer handle plus both task handles so shutdown can await
/// or abort them.
pub fn spawn_peer_loops<R, W>(
    node_id: NodeId,
    remote_public_key: Vec<u8>,
    mut reader: R,
    mut writer: W,
    queue_capacity: usize,
    replay: Arc<Mutex<ReplayWindow>>,
    inbound_tx: mpsc::Sender<InboundMessage>,
) -> (PeerHandle, JoinHandle<()>, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Envelope>(queue_capacity);

    let send_task = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &envelope).await {
                warn!(peer = %node_id, error = %e, "outbound write failed, ending send loop");
                break;
            }
        }
        debug!(peer = %node_id, "send loop finished");
    });

    let recv_task = tokio::spawn(async move {
        loop {
            let envelope = match read_frame(&mut reader).await {
                Ok(envelope) => envelope,
                Err(TransportError::Closed) => {
                    debug!(peer = %node_id, "connection closed by peer");
                    break;
                }
                Err(e) => {
                    warn!(peer = %node_id, error = %e, "inbound read failed");
                    break;
                }
            };

            // Signature first: nothing payload-specific runs on an
            // unverified envelope.
            if verify(
                &remote_public_key,
                &envelope.canonical_bytes(),
                &envelope.signature,
            )
            .is_err()
            {
                warn!(peer = %node_id, msg_id = %envelope.msg_id, "bad envelope signature");
                let _ = inbound_tx
                    .send(InboundMessage::Misbehavior {
                        peer: node_id,
                        error: WireError::BadSignature {
                            peer: envelope.source.to_string(),
                        },
                    })
                    .await;
                continue;
            }

            // Replay check inside the per-peer window
            {
                let mut window = replay.lock().await;
                if let Err(e) = window.check(envelope.source, envelope.msg_id, now_ms()) {
                    warn!(peer = %node_id, msg_id = %envelope.msg_id, "replayed envelope rejected");
                    let _ = inbound_tx
                        .send(InboundMessage::Misbehavior {
                            peer: node_id,
                            error: e,
                        })
                        .await;
                    continue;
                }
            }

            if inbound_tx
                .send(InboundMessage::Envelope {
                    peer: node_id,
                    envelope,
                })
                .await
                .is_err()
            {
                break; // coordinator is gone
            }
        }

        let _ = inbound_tx
            .send(InboundMessage::Disconnected { peer: node_id })
            .await;
    });

    let handle = PeerHandle {
        node_id,
        outbound: outbound_tx,
    };

    (handle, send_task, recv_task)
}
