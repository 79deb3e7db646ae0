//! Wire format of RCON packets.
//!
//! ```text
//! offset 0:            size (i32 LE) = 4 + 4 + len(body) + 2
//! offset 4:            id   (i32 LE)
//! offset 8:            type (i32 LE)
//! offset 12:           body
//! offset 12+len(body): 0x00
//! offset 13+len(body): 0x00
//! ```
//!
//! The `size` field does not count itself, so it is always 4 less than the length of the frame.

use std::borrow::Cow;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::ErrorKind;

/// Largest `size` a packet may declare.
pub const MAX_PACKET_SIZE: i32 = 4096;

/// Size of the `id` and `type` fields.
const HEADER_SIZE: i32 = 8;

const TERMINATOR_COUNT: i32 = 2;

/// Smallest `size` a packet may declare, i.e. the size of a packet with an empty body.
pub const MIN_PACKET_SIZE: i32 = HEADER_SIZE + TERMINATOR_COUNT;

/// Largest body that fits into a single packet.
pub const MAX_BODY_SIZE: usize = (MAX_PACKET_SIZE - MIN_PACKET_SIZE) as usize;

/// Packet type.
///
/// The protocol reuses the value `2` for both commands sent to the server and authentication
/// responses sent back, so this is a plain wrapper around the wire value rather than an enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketType(pub i32);

impl PacketType {
    pub const RESPONSE_VALUE: PacketType = PacketType(0);
    pub const EXEC_COMMAND: PacketType = PacketType(2);
    pub const AUTH_RESPONSE: PacketType = PacketType(2);
    pub const AUTH: PacketType = PacketType(3);
}

/// A single RCON packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub packet_type: PacketType,
    pub body: Vec<u8>,
}

impl Packet {
    pub fn new(packet_type: PacketType, id: i32, body: impl Into<Vec<u8>>) -> Self {
        Packet {
            id,
            packet_type,
            body: body.into(),
        }
    }

    /// The value of the `size` field for this packet.
    pub fn size(&self) -> i32 {
        i32::try_from(self.body.len())
            .ok()
            .and_then(|len| len.checked_add(MIN_PACKET_SIZE))
            .unwrap_or(i32::MAX)
    }

    /// Size of the body in bytes, without the terminators.
    pub fn body_size(&self) -> usize {
        self.body.len()
    }

    /// The body as text. Invalid UTF-8 is replaced.
    pub fn body_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Appends the encoded packet to `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.reserve(self.body.len() + MIN_PACKET_SIZE as usize + 4);
        buf.extend_from_slice(&self.size().to_le_bytes());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.packet_type.0.to_le_bytes());
        buf.extend_from_slice(&self.body);
        buf.extend_from_slice(&[0x00; TERMINATOR_COUNT as usize]);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        buf
    }

    /// Reads exactly one packet from `reader`.
    ///
    /// On failure the returned error holds every byte that was consumed from the reader.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Packet, PacketError> {
        let mut reader = CountingReader::new(reader);

        let size = reader.read_i32("size").await?;
        if size > MAX_PACKET_SIZE {
            return Err(reader.error(PacketErrorReason::TooLarge { size }));
        }
        if size < MIN_PACKET_SIZE {
            return Err(reader.error(PacketErrorReason::TooSmall { size }));
        }

        let id = reader.read_i32("id").await?;
        let packet_type = PacketType(reader.read_i32("type").await?);

        // Body followed by both terminators
        let tail_len = (size - HEADER_SIZE) as usize;
        let tail_start = reader.fill(tail_len, "body").await?;
        let body_len = tail_len - TERMINATOR_COUNT as usize;

        let terminators_start = tail_start + body_len;
        for offset in terminators_start..terminators_start + TERMINATOR_COUNT as usize {
            let value = reader.bytes[offset];
            if value != 0x00 {
                return Err(reader.error(PacketErrorReason::BadTerminator { offset, value }));
            }
        }

        let body = reader.bytes[tail_start..terminators_start].to_vec();
        Ok(Packet {
            id,
            packet_type,
            body,
        })
    }
}

/// Writes pre-encoded packets, giving up once `timeout` has passed. A zero timeout waits forever.
pub(crate) async fn write_frames<W: AsyncWrite + Unpin>(
    writer: &mut W,
    buf: &[u8],
    timeout: Duration,
) -> crate::Result<()> {
    if timeout.is_zero() {
        writer.write_all(buf).await?;
        return Ok(());
    }

    match tokio::time::timeout(timeout, writer.write_all(buf)).await {
        Ok(res) => Ok(res?),
        Err(_) => Err(crate::RconError::WriteTimeout(timeout).into()),
    }
}

/// Error returned when a packet could not be read.
#[derive(Debug, thiserror::Error)]
#[error("failed to parse packet: {reason}. Bytes: [{}]", hex(.bytes))]
pub struct PacketError {
    reason: PacketErrorReason,
    bytes: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PacketErrorReason {
    /// The stream ended cleanly before the first byte of the packet.
    #[error("end of stream")]
    Eof,

    /// The stream ended in the middle of the packet.
    #[error("stream ended while reading packet {field}")]
    Truncated { field: &'static str },

    #[error("failure to read packet {field}: {source}")]
    Io {
        field: &'static str,
        source: std::io::Error,
    },

    #[error("packet size too large, {size}")]
    TooLarge { size: i32 },

    #[error("packet size too small, {size}")]
    TooSmall { size: i32 },

    #[error("terminator at offset {offset} is not nul, {value:#04x}")]
    BadTerminator { offset: usize, value: u8 },
}

impl PacketError {
    pub fn reason(&self) -> &PacketErrorReason {
        &self.reason
    }

    /// The raw bytes read before the error occurred.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of bytes consumed from the reader.
    pub fn consumed(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the stream ended cleanly on a packet boundary.
    pub fn is_eof(&self) -> bool {
        matches!(self.reason, PacketErrorReason::Eof)
    }

    pub(crate) fn kind(&self) -> ErrorKind {
        match &self.reason {
            PacketErrorReason::Eof => ErrorKind::TransportClosed,
            PacketErrorReason::Truncated { .. } => ErrorKind::TransportError,
            PacketErrorReason::Io { source, .. } => crate::io_error_kind(source),
            PacketErrorReason::TooLarge { .. }
            | PacketErrorReason::TooSmall { .. }
            | PacketErrorReason::BadTerminator { .. } => ErrorKind::MalformedPacket,
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Wraps a reader and keeps every byte read from it.
struct CountingReader<'a, R> {
    inner: &'a mut R,
    bytes: Vec<u8>,
}

impl<'a, R: AsyncRead + Unpin> CountingReader<'a, R> {
    fn new(inner: &'a mut R) -> Self {
        CountingReader {
            inner,
            bytes: Vec::new(),
        }
    }

    fn error(&self, reason: PacketErrorReason) -> PacketError {
        PacketError {
            reason,
            bytes: self.bytes.clone(),
        }
    }

    async fn read_i32(&mut self, field: &'static str) -> Result<i32, PacketError> {
        let start = self.fill(4, field).await?;
        let mut value = [0u8; 4];
        value.copy_from_slice(&self.bytes[start..start + 4]);
        Ok(i32::from_le_bytes(value))
    }

    /// Reads exactly `len` bytes and returns the offset they start at.
    async fn fill(&mut self, len: usize, field: &'static str) -> Result<usize, PacketError> {
        let start = self.bytes.len();
        self.bytes.resize(start + len, 0);

        let mut filled = 0;
        while filled < len {
            match self.inner.read(&mut self.bytes[start + filled..]).await {
                Ok(0) => {
                    self.bytes.truncate(start + filled);
                    let reason = if self.bytes.is_empty() {
                        PacketErrorReason::Eof
                    } else {
                        PacketErrorReason::Truncated { field }
                    };
                    return Err(self.error(reason));
                }
                Ok(n) => filled += n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    self.bytes.truncate(start + filled);
                    return Err(self.error(PacketErrorReason::Io { field, source }));
                }
            }
        }

        Ok(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn decode(bytes: &[u8]) -> Result<Packet, PacketError> {
        let mut reader = bytes;
        Packet::read_from(&mut reader).await
    }

    fn frame(size: i32, id: i32, packet_type: i32, tail: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&id.to_le_bytes());
        buf.extend_from_slice(&packet_type.to_le_bytes());
        buf.extend_from_slice(tail);
        buf
    }

    #[test]
    fn encode_layout() {
        let packet = Packet::new(PacketType::EXEC_COMMAND, 10000, "ListPlayers");
        let encoded = packet.encode();

        assert_eq!(packet.size(), 21);
        assert_eq!(encoded.len(), 25);
        assert_eq!(&encoded[0..4], &21i32.to_le_bytes());
        assert_eq!(&encoded[4..8], &10000i32.to_le_bytes());
        assert_eq!(&encoded[8..12], &2i32.to_le_bytes());
        assert_eq!(&encoded[12..23], b"ListPlayers");
        assert_eq!(&encoded[23..], &[0, 0]);
    }

    #[tokio::test]
    async fn decode_encoded_packet() {
        let packet = Packet::new(PacketType::AUTH, -7, "password123");
        let decoded = decode(&packet.encode()).await.unwrap();

        assert_eq!(decoded, packet);
        assert_eq!(decoded.body_size(), 11);
        assert_eq!(decoded.body_str(), "password123");
    }

    #[tokio::test]
    async fn decode_body_size_limits() {
        for len in [0, 1, 100, MAX_BODY_SIZE] {
            let packet = Packet::new(PacketType::RESPONSE_VALUE, 4, vec![b'x'; len]);
            let decoded = decode(&packet.encode()).await.unwrap();
            assert_eq!(decoded.body_size(), len);
            assert_eq!(decoded.size(), len as i32 + MIN_PACKET_SIZE);
        }
    }

    #[tokio::test]
    async fn decode_consumes_one_packet() {
        let mut buf = Packet::new(PacketType::RESPONSE_VALUE, 2, "first").encode();
        Packet::new(PacketType::RESPONSE_VALUE, 3, "second").write_to(&mut buf);

        let mut reader = &buf[..];
        let first = Packet::read_from(&mut reader).await.unwrap();
        let second = Packet::read_from(&mut reader).await.unwrap();

        assert_eq!(first.body, b"first");
        assert_eq!(second.id, 3);
        assert_eq!(second.body, b"second");
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn decode_rejects_oversize_packet() {
        let bytes = frame(MAX_PACKET_SIZE + 1, 1, 0, &[]);
        let err = decode(&bytes).await.unwrap_err();

        assert!(matches!(
            err.reason(),
            PacketErrorReason::TooLarge { size: 4097 }
        ));
        assert_eq!(err.kind(), ErrorKind::MalformedPacket);
        // Only the size field was consumed
        assert_eq!(err.consumed(), 4);
        assert_eq!(err.bytes(), &4097i32.to_le_bytes());
    }

    #[tokio::test]
    async fn decode_rejects_undersize_packet() {
        let err = decode(&frame(9, 1, 0, &[0, 0])).await.unwrap_err();
        assert!(matches!(err.reason(), PacketErrorReason::TooSmall { size: 9 }));

        let err = decode(&frame(-1, 1, 0, &[0, 0])).await.unwrap_err();
        assert!(matches!(err.reason(), PacketErrorReason::TooSmall { size: -1 }));
        assert_eq!(err.kind(), ErrorKind::MalformedPacket);
    }

    #[tokio::test]
    async fn decode_reports_bad_body_terminator() {
        let err = decode(&frame(13, 1, 0, b"abc\x01\x00")).await.unwrap_err();

        assert!(matches!(
            err.reason(),
            PacketErrorReason::BadTerminator {
                offset: 15,
                value: 0x01
            }
        ));
        assert_eq!(err.consumed(), 17);
        assert!(err.to_string().contains("offset 15"));
        assert!(err.to_string().contains("0x01"));
    }

    #[tokio::test]
    async fn decode_reports_bad_packet_terminator() {
        let err = decode(&frame(10, 1, 0, b"\x00\xff")).await.unwrap_err();

        assert!(matches!(
            err.reason(),
            PacketErrorReason::BadTerminator {
                offset: 13,
                value: 0xff
            }
        ));
    }

    #[tokio::test]
    async fn decode_distinguishes_eof_from_truncation() {
        let err = decode(&[]).await.unwrap_err();
        assert!(err.is_eof());
        assert_eq!(err.consumed(), 0);
        assert_eq!(err.kind(), ErrorKind::TransportClosed);

        let err = decode(&[10, 0]).await.unwrap_err();
        assert!(!err.is_eof());
        assert!(matches!(
            err.reason(),
            PacketErrorReason::Truncated { field: "size" }
        ));
        assert_eq!(err.bytes(), &[10, 0]);
        assert_eq!(err.kind(), ErrorKind::TransportError);

        let err = decode(&frame(14, 1, 0, b"ab")).await.unwrap_err();
        assert!(matches!(
            err.reason(),
            PacketErrorReason::Truncated { field: "body" }
        ));
        assert_eq!(err.consumed(), 14);
    }

    #[test]
    fn error_message_includes_bytes() {
        let err = PacketError {
            reason: PacketErrorReason::TooLarge { size: 5000 },
            bytes: vec![0x88, 0x13, 0x00, 0x00],
        };
        assert_eq!(
            err.to_string(),
            "failed to parse packet: packet size too large, 5000. Bytes: [88 13 00 00]"
        );
    }
}
