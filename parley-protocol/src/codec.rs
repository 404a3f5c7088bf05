//! Encoder and decoder for framed packets.

use crate::error::ProtocolError;
use crate::field::UnknownFields;
use crate::frame::{Frame, FrameOptions};
use crate::packet::Packet;
use bytes::BytesMut;

/// Encodes packets into frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a packet and wraps it in a frame.
    pub fn encode_packet(packet: &Packet, options: &FrameOptions) -> Result<BytesMut, ProtocolError> {
        let inner = packet.encode()?;
        Frame::pack(&inner, options)?.encode()
    }
}

/// Buffers stream bytes and yields decoded packets.
pub struct Decoder {
    buffer: BytesMut,
    unknown_fields: UnknownFields,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_unknown_fields(UnknownFields::default())
    }

    pub fn with_unknown_fields(unknown_fields: UnknownFields) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            unknown_fields,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }

    /// Attempts to decode the next packet from the buffer.
    pub fn decode_packet(&mut self) -> Result<Option<Packet>, ProtocolError> {
        match self.decode_frame()? {
            Some(frame) => {
                let inner = frame.unpack()?;
                Packet::decode_with(&inner, self.unknown_fields).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
