//! Packet framing: 3-byte little-endian length, 1-byte sequence number.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{MysqlError, Result};

pub const HEADER_LEN: usize = 4;
/// Size of the fixed packet buffer, header included.
pub const MAX_PACKET_LEN: usize = 1024;
pub const MAX_PAYLOAD_LEN: usize = MAX_PACKET_LEN - HEADER_LEN;

/// Marker of an OK packet.
pub const OK_MARKER: u8 = 0x00;
/// Marker of an auth-switch request.
pub const AUTH_SWITCH_MARKER: u8 = 0xFE;
/// Marker of an error packet.
pub const ERR_MARKER: u8 = 0xFF;

/// One protocol packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    /// First payload byte, the packet type marker for server responses.
    #[must_use]
    pub fn marker(&self) -> Option<u8> {
        self.payload.first().copied()
    }
}

/// Header bytes for a payload of `len` bytes.
#[must_use]
pub fn encode_header(len: usize, seq: u8) -> [u8; HEADER_LEN] {
    let len = len as u32;
    [len as u8, (len >> 8) as u8, (len >> 16) as u8, seq]
}

/// Read one packet.
///
/// # Errors
///
/// [`MysqlError::PacketTooLarge`] if the header announces more than
/// [`MAX_PAYLOAD_LEN`] bytes; [`MysqlError::ConnectionClosed`] on EOF.
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Packet> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await.map_err(eof_as_closed)?;

    let len = usize::from(header[0]) | usize::from(header[1]) << 8 | usize::from(header[2]) << 16;
    if len > MAX_PAYLOAD_LEN {
        return Err(MysqlError::PacketTooLarge {
            len,
            max: MAX_PAYLOAD_LEN,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(eof_as_closed)?;

    Ok(Packet {
        seq: header[3],
        payload,
    })
}

/// Write one packet.
///
/// # Errors
///
/// [`MysqlError::PacketTooLarge`] if `payload` exceeds [`MAX_PAYLOAD_LEN`].
pub async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    seq: u8,
    payload: &[u8],
) -> Result<()> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(MysqlError::PacketTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&encode_header(payload.len(), seq));
    buf.extend_from_slice(payload);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

fn eof_as_closed(e: std::io::Error) -> MysqlError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        MysqlError::ConnectionClosed
    } else {
        MysqlError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_header() {
        assert_eq!(encode_header(0x012345, 7), [0x45, 0x23, 0x01, 7]);
        assert_eq!(encode_header(1, 0), [1, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (mut a, mut b) = tokio::io::duplex(2048);
        write_packet(&mut a, 3, b"\x03SELECT 1").await.unwrap();
        let packet = read_packet(&mut b).await.unwrap();
        assert_eq!(packet.seq, 3);
        assert_eq!(packet.payload, b"\x03SELECT 1");
        assert_eq!(packet.marker(), Some(0x03));
    }

    #[tokio::test]
    async fn test_read_rejects_oversized_packet() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&encode_header(MAX_PAYLOAD_LEN + 1, 0)).await.unwrap();
        let err = read_packet(&mut b).await.unwrap_err();
        assert!(matches!(
            err,
            MysqlError::PacketTooLarge { len, max } if len == MAX_PAYLOAD_LEN + 1 && max == MAX_PAYLOAD_LEN
        ));
    }

    #[tokio::test]
    async fn test_write_rejects_oversized_payload() {
        let (mut a, _b) = tokio::io::duplex(64);
        let payload = vec![b'x'; MAX_PAYLOAD_LEN + 1];
        assert!(matches!(
            write_packet(&mut a, 0, &payload).await,
            Err(MysqlError::PacketTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_truncated_packet_is_connection_closed() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&encode_header(10, 0)).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);
        assert!(matches!(
            read_packet(&mut b).await,
            Err(MysqlError::ConnectionClosed)
        ));
    }
}
