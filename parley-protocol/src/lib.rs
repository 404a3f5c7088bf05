//! # parley-protocol
//!
//! Binary wire protocol for the parley messaging client.
//!
//! This crate provides:
//! - Primitive big-endian codec with bounded reads
//! - Declarative field descriptors in tagged and positional modes
//! - Entity records (users, channels, messages, ...) with partial updates
//! - Packet envelopes and payloads
//! - Length-prefixed framing with optional zlib compression

pub mod codec;
pub mod compress;
pub mod entity;
pub mod entity_get;
pub mod error;
pub mod field;
pub mod frame;
pub mod packet;
pub mod value;
pub mod wire;

pub use codec::{Decoder, Encoder};
pub use entity::{
    Agent, Channel, Entity, EntityType, File, Group, Message, MessageState, Poll, Role, User,
    UserStatus, ENTITY_TYPES,
};
pub use entity_get::{EntityContext, EntityGetRequest, PageDirection, Pagination};
pub use error::{ProtocolError, StatusCode};
pub use field::{
    DecodeOptions, FieldKind, FieldMode, FieldSpec, Record, Schema, UnknownFields, MAX_NESTING_DEPTH,
};
pub use frame::{Frame, FrameOptions, COMPRESSION_THRESHOLD, FRAME_HEADER_SIZE};
pub use packet::{Packet, PacketBody, PacketHeader, PacketType, PACKET_TYPES};
pub use value::{Color, MessageSection, Permission, Permissions, SectionKind, Value};

/// Protocol version announced in `Identification`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default server port.
pub const DEFAULT_PORT: u16 = 1746;

/// Maximum frame payload size (16 MiB), before and after decompression.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Builds every record schema, panicking on an invalid declaration.
///
/// Schemas are otherwise built on first use; call this at startup to
/// surface a bad declaration immediately.
pub fn verify_schemas() {
    entity::verify_schemas();
    packet::verify_schemas();
}
