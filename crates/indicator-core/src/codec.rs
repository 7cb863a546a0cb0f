//! Frame codec for the sensor link.
//!
//! Frames are COBS-encoded and terminated by a single `0x00` byte, so a
//! receive buffer can hold several frames and be split by scanning for the
//! delimiter. [`FrameCodec`] wraps the byte-level functions for use with
//! [`tokio_util::codec::Framed`].
//!
//! # Example
//!
//! ```
//! use indicator_core::codec::{decode, encode};
//!
//! let frame = encode(&[0xB2, 0x00, 0x20, 0x19, 0x44]);
//! assert_eq!(*frame.last().unwrap(), 0x00);
//! assert!(!frame[..frame.len() - 1].contains(&0x00));
//! assert_eq!(decode(&frame).unwrap(), vec![0xB2, 0x00, 0x20, 0x19, 0x44]);
//! ```

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

/// Byte that terminates every frame on the stream.
pub const DELIMITER: u8 = 0x00;

/// Largest encoded frame accepted, delimiter included.
pub const MAX_FRAME_LEN: usize = 512;

/// Errors from frame encoding and decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The candidate frame had no bytes besides the delimiter.
    #[error("empty frame")]
    Empty,

    /// A block header pointed past the end of the frame.
    #[error("truncated frame")]
    Truncated,

    /// A delimiter byte appeared inside the encoded body.
    #[error("unexpected delimiter at offset {offset}")]
    UnexpectedDelimiter {
        /// Position of the stray byte within the frame.
        offset: usize,
    },

    /// The frame exceeds [`MAX_FRAME_LEN`].
    #[error("frame of {len} bytes exceeds maximum of {max}")]
    FrameTooLong {
        /// Length of the offending frame.
        len: usize,
        /// The configured maximum.
        max: usize,
    },
}

/// Upper bound on the encoded size of a payload, delimiter included.
#[must_use]
pub fn max_encoded_len(payload_len: usize) -> usize {
    payload_len + payload_len / 254 + 2
}

/// Encode `payload` into a delimiter-terminated frame.
///
/// The output contains [`DELIMITER`] exactly once, as its last byte.
#[must_use]
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(max_encoded_len(payload.len()));
    let mut code_idx = 0;
    let mut code: u8 = 1;
    out.push(0);

    for &byte in payload {
        if byte == DELIMITER {
            out[code_idx] = code;
            code_idx = out.len();
            out.push(0);
            code = 1;
            continue;
        }

        out.push(byte);
        code += 1;
        if code == 0xFF {
            out[code_idx] = code;
            code_idx = out.len();
            out.push(0);
            code = 1;
        }
    }

    out[code_idx] = code;
    out.push(DELIMITER);
    out
}

/// Decode one frame produced by [`encode`].
///
/// A single trailing delimiter is accepted and ignored, so both the raw
/// output of `encode` and a frame already stripped of its terminator decode
/// to the same payload.
///
/// # Errors
///
/// Returns a [`CodecError`] for empty, truncated or malformed input. Never
/// panics.
pub fn decode(frame: &[u8]) -> Result<Vec<u8>, CodecError> {
    let body = frame.strip_suffix(&[DELIMITER]).unwrap_or(frame);
    if body.is_empty() {
        return Err(CodecError::Empty);
    }

    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        let code = body[i];
        if code == DELIMITER {
            return Err(CodecError::UnexpectedDelimiter { offset: i });
        }

        let end = i + usize::from(code);
        if end > body.len() {
            return Err(CodecError::Truncated);
        }

        let block = &body[i + 1..end];
        if let Some(pos) = block.iter().position(|&b| b == DELIMITER) {
            return Err(CodecError::UnexpectedDelimiter { offset: i + 1 + pos });
        }
        out.extend_from_slice(block);

        i = end;
        if code != 0xFF && i < body.len() {
            out.push(0);
        }
    }

    Ok(out)
}

/// `tokio_util` codec yielding decoded frame payloads.
///
/// Empty and undecodable candidate frames are dropped with a log line.
/// Garbage longer than [`MAX_FRAME_LEN`] without a delimiter is discarded
/// up to the next delimiter.
#[derive(Debug, Default)]
pub struct FrameCodec {
    discarding: bool,
    dropped: u64,
}

impl FrameCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of candidate frames dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Decoder for FrameCodec {
    type Item = Vec<u8>;
    type Error = crate::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = src.iter().position(|&b| b == DELIMITER) else {
                if src.len() >= MAX_FRAME_LEN {
                    warn!(
                        "Discarding {} bytes without a frame delimiter",
                        src.len()
                    );
                    src.clear();
                    if !self.discarding {
                        self.discarding = true;
                        self.dropped += 1;
                    }
                }
                return Ok(None);
            };

            let candidate = src.split_to(pos + 1);

            if self.discarding {
                self.discarding = false;
                debug!("Resynchronised on delimiter after oversized frame");
                continue;
            }

            if candidate.len() > MAX_FRAME_LEN {
                warn!(
                    "{}",
                    CodecError::FrameTooLong {
                        len: candidate.len(),
                        max: MAX_FRAME_LEN,
                    }
                );
                self.dropped += 1;
                continue;
            }

            if candidate.len() == 1 {
                // Back-to-back delimiters are harmless padding.
                continue;
            }

            match decode(&candidate) {
                Ok(payload) => return Ok(Some(payload)),
                Err(e) => {
                    debug!("Dropping undecodable frame ({} bytes): {}", candidate.len(), e);
                    self.dropped += 1;
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.has_remaining() {
            debug!("Dropping {} bytes of partial frame at end of stream", src.len());
            src.clear();
        }
        Ok(None)
    }
}

impl Encoder<Vec<u8>> for FrameCodec {
    type Error = crate::Error;

    fn encode(&mut self, payload: Vec<u8>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = encode(&payload);
        if frame.len() > MAX_FRAME_LEN {
            return Err(CodecError::FrameTooLong {
                len: frame.len(),
                max: MAX_FRAME_LEN,
            }
            .into());
        }
        dst.extend_from_slice(&frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    #[test]
    fn test_encode_known_vectors() {
        assert_eq!(encode(&[]), vec![0x01, 0x00]);
        assert_eq!(encode(&[0x00]), vec![0x01, 0x01, 0x00]);
        assert_eq!(encode(&[0x00, 0x00]), vec![0x01, 0x01, 0x01, 0x00]);
        assert_eq!(
            encode(&[0x11, 0x22, 0x00, 0x33]),
            vec![0x03, 0x11, 0x22, 0x02, 0x33, 0x00]
        );
        assert_eq!(
            encode(&[0x11, 0x00, 0x00, 0x00]),
            vec![0x02, 0x11, 0x01, 0x01, 0x01, 0x00]
        );
    }

    #[test]
    fn test_encode_long_run() {
        let payload: Vec<u8> = (1..=254).collect();
        let frame = encode(&payload);
        assert_eq!(frame[0], 0xFF);
        assert_eq!(frame.len(), 254 + 3);
        assert_eq!(decode(&frame).unwrap(), payload);

        let mut with_zero = payload.clone();
        with_zero.push(0);
        assert_eq!(decode(&encode(&with_zero)).unwrap(), with_zero);
    }

    #[test]
    fn test_decode_without_terminator() {
        assert_eq!(decode(&[0x03, 0x11, 0x22, 0x02, 0x33]).unwrap(), vec![0x11, 0x22, 0x00, 0x33]);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert_eq!(decode(&[]), Err(CodecError::Empty));
        assert_eq!(decode(&[0x00]), Err(CodecError::Empty));
        assert_eq!(decode(&[0x05, 0x11, 0x22]), Err(CodecError::Truncated));
        assert_eq!(
            decode(&[0x03, 0x11, 0x00, 0x22]),
            Err(CodecError::UnexpectedDelimiter { offset: 2 })
        );
        assert_eq!(
            decode(&[0x00, 0x11]),
            Err(CodecError::UnexpectedDelimiter { offset: 0 })
        );
    }

    #[tokio::test]
    async fn test_framed_read_splits_chunked_stream() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut frames = FramedRead::new(rx, FrameCodec::new());

        let mut wire = Vec::new();
        wire.extend(encode(&[0xB2, 0x00, 0x20, 0x19, 0x44]));
        wire.push(0x00);
        wire.extend([0x09, 0x01]); // garbage, dropped
        wire.push(0x00);
        wire.extend(encode(&[0xB3, 0x00, 0x00, 0xAC, 0x41]));

        tokio::spawn(async move {
            for chunk in wire.chunks(3) {
                tx.write_all(chunk).await.unwrap();
            }
        });

        assert_eq!(
            frames.next().await.unwrap().unwrap(),
            vec![0xB2, 0x00, 0x20, 0x19, 0x44]
        );
        assert_eq!(
            frames.next().await.unwrap().unwrap(),
            vec![0xB3, 0x00, 0x00, 0xAC, 0x41]
        );
        assert!(frames.next().await.is_none());
        assert_eq!(frames.decoder().dropped(), 1);
    }

    #[test]
    fn test_decoder_discards_oversized_garbage() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[0x42u8; MAX_FRAME_LEN + 10][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());

        // Tail of the garbage, then a good frame.
        buf.extend_from_slice(&[0x42, 0x42, 0x00]);
        buf.extend_from_slice(&encode(&[0xB5, 1, 2, 3, 4]));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(vec![0xB5, 1, 2, 3, 4]));
    }

    #[tokio::test]
    async fn test_framed_write_encodes() {
        let (tx, mut rx) = tokio::io::duplex(64);
        let mut sink = FramedWrite::new(tx, FrameCodec::new());
        sink.send(vec![0xA4]).await.unwrap();
        drop(sink);

        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut rx, &mut out)
            .await
            .unwrap();
        assert_eq!(out, vec![0x02, 0xA4, 0x00]);
    }

    #[test]
    fn test_encoder_rejects_oversized_payload() {
        let mut codec = FrameCodec::new();
        let mut dst = BytesMut::new();
        let result = Encoder::encode(&mut codec, vec![1u8; MAX_FRAME_LEN], &mut dst);
        assert!(result.is_err());
        assert!(dst.is_empty());
    }
}
