//! Network Module
//!
//! TCP plumbing for the metadata service: message framing, the pooled
//! client, the peer-side server, and the transport seam used by the
//! replication orchestrator.

mod client;
mod server;
mod transport;

pub use client::NetworkClient;
pub use server::MetadataService;
pub use transport::{PeerTransport, TcpTransport};

use crate::error::{Error, Result};
use crate::replication::{FrameHeader, Message};

/// Upper bound on a single frame; a partition map for one table comfortably
/// fits far below this
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Read a framed message from a reader
pub async fn read_message<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    use tokio::io::AsyncReadExt;

    // Read header
    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::from_bytes(&header_bytes);

    if header.length > MAX_FRAME_LEN {
        return Err(Error::Network(format!(
            "frame length {} exceeds limit",
            header.length
        )));
    }

    // Read body
    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body).await?;

    // Verify checksum
    let computed_checksum = crc32fast::hash(&body);
    if computed_checksum != header.checksum {
        return Err(Error::Network("Message checksum mismatch".into()));
    }

    let message = Message::deserialize(&body)?;
    Ok(message)
}

/// Write a framed message to a writer
pub async fn write_message<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let body = message.serialize()?;
    let header = FrameHeader::new(&body);

    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let msg = Message::StatusRequest;

        let mut buf = Vec::new();
        write_message(&mut buf, &msg).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let restored = read_message(&mut cursor).await.unwrap();
        assert_eq!(restored.type_name(), "StatusRequest");
    }

    #[tokio::test]
    async fn test_corrupted_frame_rejected() {
        let msg = Message::StatusRequest;

        let mut buf = Vec::new();
        write_message(&mut buf, &msg).await.unwrap();

        // Flip a body byte; the checksum must catch it
        let last = buf.len() - 1;
        buf[last] ^= 0xff;

        let mut cursor = std::io::Cursor::new(buf);
        assert!(read_message(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let header = FrameHeader {
            length: MAX_FRAME_LEN + 1,
            checksum: 0,
        };
        let mut buf = header.to_bytes().to_vec();
        buf.extend_from_slice(&[0u8; 16]);

        let mut cursor = std::io::Cursor::new(buf);
        assert!(read_message(&mut cursor).await.is_err());
    }
}
