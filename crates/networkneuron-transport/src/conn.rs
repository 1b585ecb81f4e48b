//! Framed envelope I/O over a reliable duplex stream

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use networkneuron_protocol::frame::{decode_frame, encode_frame, MAX_FRAME_SIZE};
use networkneuron_protocol::{Envelope, WireError};

use crate::error::{Result, TransportError};

/// Write one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, envelope: &Envelope) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(envelope)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame and decode it.
pub async fn read_frame<R>(reader: &mut R) -> Result<Envelope>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::Closed
        } else {
            TransportError::Io(e)
        }
    })?;

    let body_len = u32::from_be_bytes(len_buf) as usize;
    if body_len > MAX_FRAME_SIZE {
        return Err(TransportError::Wire(WireError::Decode(format!(
            "frame too large: {} bytes (max {})",
            body_len, MAX_FRAME_SIZE
        ))));
    }

    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::Closed
        } else {
            TransportError::Io(e)
        }
    })?;

    Ok(decode_frame(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use networkneuron_protocol::envelope::MessageType;
    use networkneuron_protocol::types::NODE_ID_SIZE;
    use networkneuron_protocol::NodeId;

    fn node(byte: u8) -> NodeId {
        NodeId::from_bytes([byte; NODE_ID_SIZE])
    }

    #[tokio::test]
    async fn test_frame_round_trip_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);

        let envelope = Envelope::new(
            MessageType::Heartbeat,
            node(1),
            Some(node(2)),
            b"profile".to_vec(),
        )
        .unwrap()
        .with_signature(vec![7u8; 64]);

        write_frame(&mut client, &envelope).await.unwrap();
        let received = read_frame(&mut server).await.unwrap();

        assert_eq!(received, envelope);
    }

    #[tokio::test]
    async fn test_closed_stream_reported() {
        let (client, mut server) = tokio::io::duplex(1024);
        drop(client);

        let result = read_frame(&mut server).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_rejected() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        client
            .write_all(&(u32::MAX).to_be_bytes())
            .await
            .unwrap();

        let result = read_frame(&mut server).await;
        assert!(matches!(result, Err(TransportError::Wire(_))));
    }

    #[tokio::test]
    async fn test_multiple_frames_in_sequence() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);

        for i in 1..=3u8 {
            let env = Envelope::new(
                MessageType::NodeDiscovery,
                node(i),
                None,
                vec![i; 16],
            )
            .unwrap();
            write_frame(&mut client, &env).await.unwrap();
        }

        for i in 1..=3u8 {
            let env = read_frame(&mut server).await.unwrap();
            assert_eq!(env.source, node(i));
        }
    }
}
