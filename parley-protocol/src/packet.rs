//! Packets: the request/response units exchanged over a connection.
//!
//! Every packet shares one envelope:
//!
//! ```text
//! [type:u8][seq:u32][replyTo:u32][sideChannel:str][payload...]
//! ```
//!
//! `seq` is assigned by the sender, `replyTo` names the packet being
//! answered (0 when the packet is not a reply) and an empty side channel
//! string means none. Payloads are positional records, except
//! `EntityGet` (a request list) and `Entities` (an entity list).

use crate::entity::Entity;
use crate::entity_get::{encode_requests, EntityGetRequest};
use crate::error::{ProtocolError, StatusCode};
use crate::field::FieldKind as Kind;
use crate::field::{
    decode_record, encode_record, packet_record, DecodeOptions, Record, UnknownFields,
};
use crate::wire::{self, Reader, MAX_PREFIXED_LEN};
use crate::PROTOCOL_VERSION;
use bytes::{BufMut, BytesMut};
use serde::Serialize;
use std::fmt;

/// Size of the envelope before the side channel string.
pub const ENVELOPE_FIXED_SIZE: usize = 1 + 4 + 4;

/// Encoding and decoding of a packet payload.
pub trait Payload: Sized {
    fn encode_payload(&self, buf: &mut BytesMut) -> Result<(), ProtocolError>;

    fn decode_payload(reader: &mut Reader<'_>, unknown: UnknownFields) -> Result<Self, ProtocolError>;
}

macro_rules! positional_payload {
    ($($name:ident),* $(,)?) => {
        /// Forces registration of every positional payload schema.
        pub(crate) fn verify_schemas() {
            $( $name::schema(); )*
        }

        $(
            impl Payload for $name {
                fn encode_payload(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
                    encode_record(self, buf, false).map(|_| ())
                }

                fn decode_payload(
                    reader: &mut Reader<'_>,
                    unknown: UnknownFields,
                ) -> Result<Self, ProtocolError> {
                    decode_record(reader, &DecodeOptions::positional(unknown))
                }
            }
        )*
    };
}

packet_record! {
    Login {
        0 => email: String = Kind::Str,
        1 => password: String = Kind::Str,
    }
}

packet_record! {
    /// Keepalive. The peer answers with a [`Pong`] carrying the same echo.
    Ping {
        0 => echo: u32 = Kind::Uint(4),
    }
}

packet_record! {
    Pong {
        0 => echo: u32 = Kind::Uint(4),
    }
}

packet_record! {
    /// Outcome of a request.
    Status {
        0 => code: u16 = Kind::Uint(2),
        1 => message: String = Kind::Str,
    }
}

packet_record! {
    Signup {
        0 => email: String = Kind::Str,
        1 => name: String = Kind::Str,
        2 => password: String = Kind::Str,
    }
}

packet_record! {
    /// Asks for a download token for a file.
    FileTokenRequest {
        0 => file: u64 = Kind::Uint(8),
    }
}

packet_record! {
    FileToken {
        0 => token: String = Kind::Str,
    }
}

packet_record! {
    /// Second login factor, or the secret returned when enabling it.
    MfaSecret {
        0 => secret: String = Kind::Str,
    }
}

packet_record! {
    AccessToken {
        0 => token: String = Kind::Str,
    }
}

packet_record! {
    /// Continuation token issued after the first login step.
    ContToken {
        0 => token: String = Kind::Str,
    }
}

packet_record! {
    ContactsManage {
        0 => contact_type: u8 = Kind::Uint(1),
        1 => action: u8 = Kind::Uint(1),
        2 => id: u64 = Kind::Uint(8),
    }
}

packet_record! {
    Search {
        0 => target: u8 = Kind::Uint(1),
        1 => ref_id: u64 = Kind::Uint(8),
        2 => query: String = Kind::Str,
    }
}

packet_record! {
    InviteResolve {
        0 => code: String = Kind::Str,
        /// Join the group instead of only previewing it.
        1 => add: bool = Kind::Bool,
    }
}

packet_record! {
    BotCreate {
        0 => name: String = Kind::Str,
    }
}

packet_record! {
    BotInvite {
        0 => bot: u64 = Kind::Uint(8),
        1 => group: u64 = Kind::Uint(8),
    }
}

packet_record! {
    /// First packet on a connection.
    Identification {
        0 => protocol: u32 = Kind::Uint(4),
        1 => supports_compression: bool = Kind::Bool,
    }
}

packet_record! {
    ClientIdentity {
        0 => public_key: Vec<u8> = Kind::Blob,
    }
}

positional_payload!(
    Login,
    Ping,
    Pong,
    Status,
    Signup,
    FileTokenRequest,
    FileToken,
    MfaSecret,
    AccessToken,
    ContToken,
    ContactsManage,
    Search,
    InviteResolve,
    BotCreate,
    BotInvite,
    Identification,
    ClientIdentity,
);

/// Entity fetch. Only the client sends these, so they cannot be decoded.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntityGet {
    pub requests: Vec<EntityGetRequest>,
}

impl Payload for EntityGet {
    fn encode_payload(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        encode_requests(&self.requests, buf)
    }

    fn decode_payload(_: &mut Reader<'_>, _: UnknownFields) -> Result<Self, ProtocolError> {
        Err(ProtocolError::EncodeOnly("EntityGet"))
    }
}

/// A batch of entities, full or partial.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Entities {
    pub entities: Vec<Entity>,
}

impl Payload for Entities {
    fn encode_payload(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        if self.entities.len() > MAX_PREFIXED_LEN {
            return Err(ProtocolError::LengthOverflow {
                len: self.entities.len(),
                max: MAX_PREFIXED_LEN,
            });
        }
        buf.put_u16(self.entities.len() as u16);
        for entity in &self.entities {
            entity.encode(buf)?;
        }
        Ok(())
    }

    fn decode_payload(reader: &mut Reader<'_>, unknown: UnknownFields) -> Result<Self, ProtocolError> {
        let count = reader.u16()? as usize;
        let mut entities = Vec::with_capacity(count.min(reader.remaining().len() / 2));
        for _ in 0..count {
            entities.push(Entity::decode(reader, unknown)?);
        }
        Ok(Self { entities })
    }
}

// ============================================================================
// Typed views over raw payload fields
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ContactType {
    Friend = 0,
    Blocked = 1,
    PendingIn = 2,
    PendingOut = 3,
    Group = 4,
}

impl ContactType {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(ContactType::Friend),
            1 => Some(ContactType::Blocked),
            2 => Some(ContactType::PendingIn),
            3 => Some(ContactType::PendingOut),
            4 => Some(ContactType::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ContactAction {
    Add = 0,
    Remove = 1,
}

impl ContactAction {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(ContactAction::Add),
            1 => Some(ContactAction::Remove),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SearchTarget {
    User = 0,
    GroupMember = 1,
    GroupEmoji = 2,
}

impl SearchTarget {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(SearchTarget::User),
            1 => Some(SearchTarget::GroupMember),
            2 => Some(SearchTarget::GroupEmoji),
            _ => None,
        }
    }
}

impl Login {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl Ping {
    pub fn new(echo: u32) -> Self {
        Self { echo }
    }
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code: code as u16,
            message: message.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::Ok, "")
    }

    /// `None` for codes newer than this client.
    pub fn status_code(&self) -> Option<StatusCode> {
        StatusCode::from_wire(self.code)
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok as u16
    }
}

impl ContactsManage {
    pub fn new(contact_type: ContactType, action: ContactAction, id: u64) -> Self {
        Self {
            contact_type: contact_type as u8,
            action: action as u8,
            id,
        }
    }

    pub fn kind(&self) -> Option<ContactType> {
        ContactType::from_wire(self.contact_type)
    }

    pub fn contact_action(&self) -> Option<ContactAction> {
        ContactAction::from_wire(self.action)
    }
}

impl Search {
    pub fn new(target: SearchTarget, ref_id: u64, query: impl Into<String>) -> Self {
        Self {
            target: target as u8,
            ref_id,
            query: query.into(),
        }
    }

    pub fn search_target(&self) -> Option<SearchTarget> {
        SearchTarget::from_wire(self.target)
    }
}

impl Identification {
    /// Identifies as this library's protocol version.
    pub fn current(supports_compression: bool) -> Self {
        Self {
            protocol: PROTOCOL_VERSION,
            supports_compression,
        }
    }
}

// ============================================================================
// Packet table
// ============================================================================

macro_rules! packet_table {
    ($($code:literal => $name:ident),* $(,)?) => {
        /// Packet type discriminant.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[repr(u8)]
        pub enum PacketType {
            $($name = $code,)*
        }

        /// Every packet type with its name, in discriminant order.
        pub const PACKET_TYPES: &[(PacketType, &str)] = &[
            $((PacketType::$name, stringify!($name)),)*
        ];

        impl PacketType {
            pub fn from_wire(value: u8) -> Result<Self, ProtocolError> {
                match value {
                    $($code => Ok(PacketType::$name),)*
                    other => Err(ProtocolError::InvalidPacketType(other)),
                }
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $(PacketType::$name => stringify!($name),)*
                }
            }
        }

        /// Payload of a packet.
        #[derive(Debug, Clone, PartialEq, Serialize)]
        #[serde(tag = "kind")]
        pub enum PacketBody {
            $($name($name),)*
        }

        impl PacketBody {
            pub fn packet_type(&self) -> PacketType {
                match self {
                    $(PacketBody::$name(_) => PacketType::$name,)*
                }
            }

            fn encode_payload(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
                match self {
                    $(PacketBody::$name(p) => p.encode_payload(buf),)*
                }
            }

            fn decode_payload(
                packet_type: PacketType,
                reader: &mut Reader<'_>,
                unknown: UnknownFields,
            ) -> Result<Self, ProtocolError> {
                Ok(match packet_type {
                    $(PacketType::$name => PacketBody::$name($name::decode_payload(reader, unknown)?),)*
                })
            }
        }

        $(
            impl From<$name> for PacketBody {
                fn from(value: $name) -> Self {
                    PacketBody::$name(value)
                }
            }
        )*
    };
}

packet_table! {
    1 => Login,
    2 => Ping,
    3 => Pong,
    4 => Status,
    5 => Signup,
    6 => EntityGet,
    7 => Entities,
    8 => FileTokenRequest,
    9 => FileToken,
    10 => MfaSecret,
    11 => AccessToken,
    12 => ContToken,
    13 => ContactsManage,
    14 => Search,
    15 => InviteResolve,
    16 => BotCreate,
    17 => BotInvite,
    18 => Identification,
    19 => ClientIdentity,
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The envelope fields of an encoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    pub seq: u32,
    pub reply_to: u32,
    pub side_channel: Option<String>,
    /// Offset of the payload within the buffer.
    pub payload_offset: usize,
}

impl PacketHeader {
    /// Reads the envelope without touching the payload. Works for every
    /// packet type, encode-only ones included.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = Reader::new(buf);
        let packet_type = PacketType::from_wire(reader.u8()?)?;
        let seq = reader.u32()?;
        let reply_to = reader.u32()?;
        let side_channel = Some(reader.string()?).filter(|s| !s.is_empty());
        Ok(Self {
            packet_type,
            seq,
            reply_to,
            side_channel,
            payload_offset: reader.position(),
        })
    }
}

/// A packet with its envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Packet {
    /// Sender-assigned sequence number; 0 until assigned.
    pub seq: u32,
    /// Sequence number of the packet this answers, or 0.
    pub reply_to: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side_channel: Option<String>,
    pub body: PacketBody,
}

impl Packet {
    pub fn new(body: impl Into<PacketBody>) -> Self {
        Self {
            seq: 0,
            reply_to: 0,
            side_channel: None,
            body: body.into(),
        }
    }

    pub fn in_reply_to(mut self, seq: u32) -> Self {
        self.reply_to = seq;
        self
    }

    pub fn with_side_channel(mut self, channel: impl Into<String>) -> Self {
        self.side_channel = Some(channel.into()).filter(|s| !s.is_empty());
        self
    }

    pub fn packet_type(&self) -> PacketType {
        self.body.packet_type()
    }

    pub fn is_reply(&self) -> bool {
        self.reply_to != 0
    }

    /// Encodes envelope and payload.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(self.packet_type() as u8);
        buf.put_u32(self.seq);
        buf.put_u32(self.reply_to);
        wire::put_string(&mut buf, self.side_channel.as_deref().unwrap_or(""))?;
        self.body.encode_payload(&mut buf)?;
        Ok(buf)
    }

    /// Decodes a packet, skipping ignored entity fields.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        Self::decode_with(buf, UnknownFields::default())
    }

    /// Decodes a packet. Bytes after the payload are ignored so that a
    /// newer peer can append fields.
    pub fn decode_with(buf: &[u8], unknown: UnknownFields) -> Result<Self, ProtocolError> {
        let header = PacketHeader::decode(buf)?;
        let mut reader = Reader::at(buf, header.payload_offset);
        let body = PacketBody::decode_payload(header.packet_type, &mut reader, unknown)?;
        Ok(Self {
            seq: header.seq,
            reply_to: header.reply_to,
            side_channel: header.side_channel,
            body,
        })
    }
}
