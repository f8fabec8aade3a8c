//! Data-channel wire protocol.
//!
//! Three messages travel between peers during a transfer:
//!
//! | Message | Frame | Content |
//! |---|---|---|
//! | metadata | text | `{"type":"metadata","payload":{"name":..,"type":..,"size":..}}` |
//! | chunk | binary | raw file bytes, at most one chunk size |
//! | end | text | `{"type":"end"}` |
//!
//! Plus one `hello` frame the dialing side sends first, carrying the
//! connection id negotiated over the relay.
//!
//! ## Frame Format
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      Speed Frame                           │
//! ├────────────┬────────────┬────────────┬─────────────────────┤
//! │   Magic    │  Version   │    Kind    │      Length         │
//! │  4 bytes   │  2 bytes   │   1 byte   │      4 bytes        │
//! ├────────────┴────────────┴────────────┴─────────────────────┤
//! │                        Payload                             │
//! │                    (variable length)                       │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! - Magic: `0x53 0x50 0x45 0x44` ("SPED")
//! - Version: `0x01 0x00` (1.0)
//! - Kind: `0x01` text, `0x02` binary, `0x03` hello
//! - Length: Payload length in bytes (big-endian)

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{Error, Result};

/// Protocol magic bytes: "SPED"
pub const MAGIC: [u8; 4] = [0x53, 0x50, 0x45, 0x44];

/// Frame header size in bytes
pub const HEADER_SIZE: usize = 11;

/// Maximum payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Largest chunk a binary frame may carry (64 KiB)
pub const MAX_CHUNK_SIZE: usize = crate::DEFAULT_CHUNK_SIZE;

/// Frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// JSON envelope
    Text = 0x01,
    /// Raw chunk bytes
    Binary = 0x02,
    /// Connection id sent by the dialing peer
    Hello = 0x03,
}

impl FrameKind {
    /// Parse a frame kind from a byte.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Text),
            0x02 => Some(Self::Binary),
            0x03 => Some(Self::Hello),
            _ => None,
        }
    }
}

/// A protocol frame header.
#[derive(Debug, Clone)]
pub struct FrameHeader {
    /// Protocol version (major, minor)
    pub version: (u8, u8),
    /// Frame kind
    pub kind: FrameKind,
    /// Payload length
    pub payload_length: u32,
}

impl FrameHeader {
    /// Encode the header to bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4] = self.version.0;
        buf[5] = self.version.1;
        buf[6] = self.kind as u8;
        buf[7..11].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode a header from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the magic, version, kind or length is invalid.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        if buf[0..4] != MAGIC {
            return Err(Error::ProtocolError("invalid magic bytes".to_string()));
        }

        let version = (buf[4], buf[5]);
        if version.0 != crate::PROTOCOL_VERSION.0 {
            return Err(Error::UnsupportedVersion {
                major: version.0,
                minor: version.1,
            });
        }

        let kind = FrameKind::from_byte(buf[6])
            .ok_or_else(|| Error::ProtocolError(format!("unknown frame kind: {:#x}", buf[6])))?;

        let payload_length = u32::from_be_bytes([buf[7], buf[8], buf[9], buf[10]]);

        if payload_length as usize > MAX_PAYLOAD_SIZE {
            return Err(Error::ProtocolError(format!(
                "payload too large: {payload_length} bytes"
            )));
        }

        Ok(Self {
            version,
            kind,
            payload_length,
        })
    }
}

/// Description of the file about to be streamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// File name (no directory components)
    pub name: String,
    /// MIME type
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Total byte length
    pub size: u64,
}

/// JSON envelopes sent as text frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    /// Announces the upcoming binary stream
    Metadata {
        /// The file being sent
        payload: FileInfo,
    },
    /// Marks completion of the stream
    End,
}

/// A message on the data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataMessage {
    /// Metadata envelope
    Metadata(FileInfo),
    /// One ordered slice of the file
    Chunk(Vec<u8>),
    /// End marker
    End,
}

/// Encode a message into its frame kind and payload.
///
/// # Errors
///
/// Returns an error if serialization fails or a chunk exceeds the frame limit.
pub fn encode_message(message: &DataMessage) -> Result<(FrameKind, Vec<u8>)> {
    match message {
        DataMessage::Metadata(info) => {
            let envelope = Envelope::Metadata {
                payload: info.clone(),
            };
            Ok((FrameKind::Text, serde_json::to_vec(&envelope)?))
        }
        DataMessage::End => Ok((FrameKind::Text, serde_json::to_vec(&Envelope::End)?)),
        DataMessage::Chunk(data) => {
            if data.len() > MAX_CHUNK_SIZE {
                return Err(Error::ProtocolError(format!(
                    "chunk too large: {} bytes",
                    data.len()
                )));
            }
            Ok((FrameKind::Binary, data.clone()))
        }
    }
}

/// Decode a frame payload into a message.
///
/// # Errors
///
/// Returns an error for hello frames, chunks over [`MAX_CHUNK_SIZE`] and
/// text frames that are not a known envelope.
pub fn decode_message(kind: FrameKind, payload: Vec<u8>) -> Result<DataMessage> {
    match kind {
        FrameKind::Binary if payload.len() > MAX_CHUNK_SIZE => Err(Error::ProtocolError(
            format!("chunk too large: {} bytes", payload.len()),
        )),
        FrameKind::Binary => Ok(DataMessage::Chunk(payload)),
        FrameKind::Text => {
            let envelope: Envelope = serde_json::from_slice(&payload)
                .map_err(|e| Error::ProtocolError(format!("bad envelope: {e}")))?;
            Ok(match envelope {
                Envelope::Metadata { payload } => DataMessage::Metadata(payload),
                Envelope::End => DataMessage::End,
            })
        }
        FrameKind::Hello => Err(Error::UnexpectedMessage {
            expected: "data".to_string(),
            actual: "hello".to_string(),
        }),
    }
}

/// Read a complete frame from a stream.
///
/// # Errors
///
/// Returns an error if reading fails or the frame is invalid.
pub async fn read_frame<R>(reader: &mut R) -> Result<(FrameHeader, Vec<u8>)>
where
    R: AsyncReadExt + Unpin,
{
    let mut header_buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_buf).await?;

    let header = FrameHeader::decode(&header_buf)?;

    let mut payload = vec![0u8; header.payload_length as usize];
    if header.payload_length > 0 {
        reader.read_exact(&mut payload).await?;
    }

    Ok((header, payload))
}

/// Write a complete frame to a stream.
///
/// # Errors
///
/// Returns an error if writing fails.
pub async fn write_frame<W>(writer: &mut W, kind: FrameKind, payload: &[u8]) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let payload_length = u32::try_from(payload.len())
        .map_err(|_| Error::ProtocolError(format!("payload too large: {}", payload.len())))?;
    let header = FrameHeader {
        version: crate::PROTOCOL_VERSION,
        kind,
        payload_length,
    };

    writer.write_all(&header.encode()).await?;
    if !payload.is_empty() {
        writer.write_all(payload).await?;
    }
    writer.flush().await?;

    Ok(())
}

/// Read the next data message from a stream.
///
/// # Errors
///
/// Returns an error if reading fails or the frame is not a data message.
pub async fn read_message<R>(reader: &mut R) -> Result<DataMessage>
where
    R: AsyncReadExt + Unpin,
{
    let (header, payload) = read_frame(reader).await?;
    decode_message(header.kind, payload)
}

/// Write one data message to a stream.
///
/// # Errors
///
/// Returns an error if encoding or writing fails.
pub async fn write_message<W>(writer: &mut W, message: &DataMessage) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let (kind, payload) = encode_message(message)?;
    write_frame(writer, kind, &payload).await
}

/// Read a complete frame from a stream with a timeout.
///
/// # Errors
///
/// Returns `Error::Timeout` if the operation exceeds the specified duration.
/// Returns an error if reading fails or the frame is invalid.
pub async fn read_frame_with_timeout<R>(
    reader: &mut R,
    duration: Duration,
) -> Result<(FrameHeader, Vec<u8>)>
where
    R: AsyncReadExt + Unpin,
{
    timeout(duration, read_frame(reader))
        .await
        .map_err(|_| Error::Timeout(duration.as_secs()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_header_encode_decode() {
        let header = FrameHeader {
            version: (1, 0),
            kind: FrameKind::Binary,
            payload_length: 65536,
        };

        let encoded = header.encode();
        assert_eq!(&encoded[0..4], b"SPED");

        let decoded = FrameHeader::decode(&encoded).expect("decode");
        assert_eq!(decoded.version, (1, 0));
        assert_eq!(decoded.kind, FrameKind::Binary);
        assert_eq!(decoded.payload_length, 65536);
    }

    #[test]
    fn test_frame_header_rejects_bad_magic() {
        let mut encoded = FrameHeader {
            version: (1, 0),
            kind: FrameKind::Text,
            payload_length: 0,
        }
        .encode();
        encoded[0] = b'X';

        assert!(matches!(
            FrameHeader::decode(&encoded),
            Err(Error::ProtocolError(_))
        ));
    }

    #[test]
    fn test_frame_header_rejects_unknown_kind_and_version() {
        let mut encoded = FrameHeader {
            version: (1, 0),
            kind: FrameKind::Text,
            payload_length: 0,
        }
        .encode();
        encoded[6] = 0x7F;
        assert!(FrameHeader::decode(&encoded).is_err());

        encoded[6] = 0x01;
        encoded[4] = 9;
        assert!(matches!(
            FrameHeader::decode(&encoded),
            Err(Error::UnsupportedVersion { major: 9, .. })
        ));
    }

    #[test]
    fn test_frame_header_rejects_oversized_payload() {
        let mut encoded = FrameHeader {
            version: (1, 0),
            kind: FrameKind::Binary,
            payload_length: 0,
        }
        .encode();
        encoded[7..11].copy_from_slice(&u32::MAX.to_be_bytes());

        assert!(FrameHeader::decode(&encoded).is_err());
    }

    #[test]
    fn test_metadata_envelope_shape() {
        let (kind, payload) = encode_message(&DataMessage::Metadata(FileInfo {
            name: "photo.png".to_string(),
            mime_type: "image/png".to_string(),
            size: 1234,
        }))
        .expect("encode");

        assert_eq!(kind, FrameKind::Text);
        let json: serde_json::Value = serde_json::from_slice(&payload).expect("json");
        assert_eq!(json["type"], "metadata");
        assert_eq!(json["payload"]["name"], "photo.png");
        assert_eq!(json["payload"]["type"], "image/png");
        assert_eq!(json["payload"]["size"], 1234);
    }

    #[test]
    fn test_end_envelope_shape() {
        let (kind, payload) = encode_message(&DataMessage::End).expect("encode");
        assert_eq!(kind, FrameKind::Text);
        assert_eq!(payload, br#"{"type":"end"}"#);
    }

    #[test]
    fn test_decode_foreign_envelope() {
        let decoded = decode_message(
            FrameKind::Text,
            br#"{"type":"metadata","payload":{"name":"a.txt","type":"","size":0}}"#.to_vec(),
        )
        .expect("decode");
        assert_eq!(
            decoded,
            DataMessage::Metadata(FileInfo {
                name: "a.txt".to_string(),
                mime_type: String::new(),
                size: 0,
            })
        );
    }

    #[test]
    fn test_decode_unknown_envelope_is_error() {
        let result = decode_message(FrameKind::Text, br#"{"type":"resume"}"#.to_vec());
        assert!(matches!(result, Err(Error::ProtocolError(_))));

        let result = decode_message(FrameKind::Text, b"not json".to_vec());
        assert!(matches!(result, Err(Error::ProtocolError(_))));
    }

    #[test]
    fn test_decode_hello_is_unexpected() {
        let result = decode_message(FrameKind::Hello, b"dc_x".to_vec());
        assert!(matches!(result, Err(Error::UnexpectedMessage { .. })));
    }

    #[tokio::test]
    async fn test_message_stream_preserves_order() {
        let mut buffer = Vec::new();
        let messages = vec![
            DataMessage::Metadata(FileInfo {
                name: "a.bin".to_string(),
                mime_type: "application/octet-stream".to_string(),
                size: 5,
            }),
            DataMessage::Chunk(vec![1, 2, 3]),
            DataMessage::Chunk(vec![4, 5]),
            DataMessage::End,
        ];
        for message in &messages {
            write_message(&mut buffer, message).await.expect("write");
        }

        let mut cursor = std::io::Cursor::new(buffer);
        for expected in &messages {
            let message = read_message(&mut cursor).await.expect("read");
            assert_eq!(&message, expected);
        }
        assert!(read_message(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_chunk_frame() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, FrameKind::Binary, &[])
            .await
            .expect("write");
        assert_eq!(buffer.len(), HEADER_SIZE);

        let mut cursor = std::io::Cursor::new(buffer);
        let (header, payload) = read_frame(&mut cursor).await.expect("read");
        assert_eq!(header.kind, FrameKind::Binary);
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_read_frame_with_timeout_expires() {
        struct NeverReadyReader;

        impl tokio::io::AsyncRead for NeverReadyReader {
            fn poll_read(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                _buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Pending
            }
        }

        let mut reader = NeverReadyReader;
        let result = read_frame_with_timeout(&mut reader, Duration::from_millis(50)).await;

        match result {
            Err(Error::Timeout(secs)) => assert_eq!(secs, 0),
            other => panic!("Expected Timeout error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_frame_with_timeout_success() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, FrameKind::Hello, b"dc_abc")
            .await
            .expect("write");

        let mut cursor = std::io::Cursor::new(buffer);
        let (header, payload) = read_frame_with_timeout(&mut cursor, Duration::from_secs(5))
            .await
            .expect("read frame");
        assert_eq!(header.kind, FrameKind::Hello);
        assert_eq!(payload, b"dc_abc");
    }

    #[test]
    fn test_chunk_size_limit() {
        let full = vec![0u8; MAX_CHUNK_SIZE];
        assert!(matches!(
            decode_message(FrameKind::Binary, full.clone()),
            Ok(DataMessage::Chunk(c)) if c.len() == MAX_CHUNK_SIZE
        ));

        let oversized = vec![0u8; MAX_CHUNK_SIZE + 1];
        assert!(matches!(
            decode_message(FrameKind::Binary, oversized.clone()),
            Err(Error::ProtocolError(_))
        ));
        assert!(encode_message(&DataMessage::Chunk(oversized)).is_err());
        assert!(encode_message(&DataMessage::Chunk(full)).is_ok());
    }
}
