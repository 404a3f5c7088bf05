//! Connection-level framing.
//!
//! Frame layout (5 byte header + payload):
//!
//! ```text
//! +------------+-------------+------------------------+
//! | compressed | payload_len | payload                |
//! |  1 byte    |   4 bytes   | payload_len bytes      |
//! +------------+-------------+------------------------+
//! ```
//!
//! The payload is an encoded packet, zlib-compressed when the flag byte
//! is 1. `payload_len` counts the bytes on the wire, after compression.

use crate::compress;
use crate::error::ProtocolError;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the frame header in bytes (1 + 4).
pub const FRAME_HEADER_SIZE: usize = 5;

/// Payloads this long or longer are compressed.
pub const COMPRESSION_THRESHOLD: usize = 32;

/// Flag byte value marking a compressed payload.
pub const FLAG_COMPRESSED: u8 = 1;

/// Outbound framing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOptions {
    pub compression: bool,
    pub compression_threshold: usize,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            compression: true,
            compression_threshold: COMPRESSION_THRESHOLD,
        }
    }
}

impl FrameOptions {
    /// Never compress.
    pub fn uncompressed() -> Self {
        Self {
            compression: false,
            ..Self::default()
        }
    }

    fn should_compress(&self, len: usize) -> bool {
        self.compression && len >= self.compression_threshold
    }
}

/// A frame as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub compressed: bool,
    /// Payload bytes as sent, compressed if `compressed` is set.
    pub payload: Bytes,
}

impl Frame {
    /// Wraps an encoded packet, compressing it if `options` say so.
    pub fn pack(inner: &[u8], options: &FrameOptions) -> Result<Self, ProtocolError> {
        if options.should_compress(inner.len()) {
            Ok(Self {
                compressed: true,
                payload: Bytes::from(compress::compress(inner)?),
            })
        } else {
            Ok(Self {
                compressed: false,
                payload: Bytes::copy_from_slice(inner),
            })
        }
    }

    /// Returns the encoded packet, inflating it if needed.
    pub fn unpack(&self) -> Result<Bytes, ProtocolError> {
        if self.compressed {
            compress::decompress(&self.payload, MAX_PAYLOAD_SIZE).map(Bytes::from)
        } else {
            Ok(self.payload.clone())
        }
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        buf.put_u8(self.compressed as u8);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Decodes a frame from the front of `buf`.
    ///
    /// Returns `Ok(Some(frame))` and consumes its bytes once a complete
    /// frame is buffered, `Ok(None)` if more data is needed, or `Err` on
    /// a malformed header.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let compressed = match buf[0] {
            0 => false,
            FLAG_COMPRESSED => true,
            other => return Err(ProtocolError::InvalidFlags(other)),
        };

        let payload_len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        if buf.len() < FRAME_HEADER_SIZE + payload_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len).freeze();
        Ok(Some(Self {
            compressed,
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_payload_not_compressed() {
        let inner = [7u8; 10];
        let frame = Frame::pack(&inner, &FrameOptions::default()).unwrap();
        assert!(!frame.compressed);

        let encoded = frame.encode().unwrap();
        assert_eq!(&encoded[..5], &[0, 0, 0, 0, 10]);
        assert_eq!(&encoded[5..], &inner);
    }

    #[test]
    fn test_threshold_payload_compressed() {
        let inner: Vec<u8> = (0..40u8).collect();
        let frame = Frame::pack(&inner, &FrameOptions::default()).unwrap();
        assert!(frame.compressed);

        let mut encoded = frame.encode().unwrap();
        assert_eq!(encoded[0], FLAG_COMPRESSED);
        let decoded = Frame::decode(&mut encoded).unwrap().unwrap();
        assert_eq!(decoded.unpack().unwrap().as_ref(), inner.as_slice());
        assert!(encoded.is_empty());
    }

    #[test]
    fn test_exactly_at_threshold() {
        let at = vec![1u8; COMPRESSION_THRESHOLD];
        assert!(Frame::pack(&at, &FrameOptions::default()).unwrap().compressed);

        let below = vec![1u8; COMPRESSION_THRESHOLD - 1];
        assert!(!Frame::pack(&below, &FrameOptions::default()).unwrap().compressed);
    }

    #[test]
    fn test_compression_disabled() {
        let inner = vec![3u8; 500];
        let frame = Frame::pack(&inner, &FrameOptions::uncompressed()).unwrap();
        assert!(!frame.compressed);
        assert_eq!(frame.payload.as_ref(), inner.as_slice());
    }

    #[test]
    fn test_uncompressed_frame_is_idempotent() {
        let inner = b"short".to_vec();
        let frame = Frame::pack(&inner, &FrameOptions::default()).unwrap();
        let mut encoded = frame.encode().unwrap();
        let decoded = Frame::decode(&mut encoded).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.unpack().unwrap().as_ref(), inner.as_slice());
    }

    #[test]
    fn test_partial_frame() {
        let frame = Frame::pack(&[1, 2, 3, 4], &FrameOptions::default()).unwrap();
        let encoded = frame.encode().unwrap();

        let mut buf = BytesMut::from(&encoded[..3]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);

        buf.extend_from_slice(&encoded[3..7]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&encoded[7..]);
        assert_eq!(Frame::decode(&mut buf).unwrap().unwrap(), frame);
    }

    #[test]
    fn test_back_to_back_frames() {
        let a = Frame::pack(b"first", &FrameOptions::default()).unwrap();
        let b = Frame::pack(&[9u8; 64], &FrameOptions::default()).unwrap();
        let mut buf = a.encode().unwrap();
        buf.extend_from_slice(&b.encode().unwrap());
        buf.extend_from_slice(&[0, 0]);

        assert_eq!(Frame::decode(&mut buf).unwrap().unwrap(), a);
        assert_eq!(Frame::decode(&mut buf).unwrap().unwrap(), b);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_invalid_flags() {
        let mut buf = BytesMut::from(&[2u8, 0, 0, 0, 0][..]);
        assert!(matches!(
            Frame::decode(&mut buf),
            Err(ProtocolError::InvalidFlags(2))
        ));
    }

    #[test]
    fn test_frame_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u8(0);
        buf.put_u32(MAX_PAYLOAD_SIZE as u32 + 1);
        assert!(matches!(
            Frame::decode(&mut buf),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_corrupt_compressed_payload() {
        let frame = Frame {
            compressed: true,
            payload: Bytes::from_static(b"definitely not zlib"),
        };
        assert!(matches!(
            frame.unpack(),
            Err(ProtocolError::CorruptStream(_))
        ));
    }
}
