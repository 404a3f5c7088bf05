//! Entity records.
//!
//! Every entity is encoded as:
//!
//! ```text
//! [type:u8][fieldCount:u8][fieldCount × (fieldId:u8, value)]
//! ```
//!
//! Field id 0 is always the `u64` identifier. All other attributes are
//! optional, and a partial entity (id plus changed fields) is how the
//! server ships mutations.

use crate::error::ProtocolError;
use crate::field::FieldKind as Kind;
use crate::field::{
    decode_record, encode_record, entity_record, DecodeOptions, Record, UnknownFields,
};
use crate::value::{Color, MessageSection, Permissions};
use crate::wire::Reader;
use bytes::{BufMut, BytesMut};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Entity type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EntityType {
    User = 1,
    Channel = 2,
    Group = 3,
    Message = 4,
    Role = 5,
    File = 6,
    MessageState = 7,
    Poll = 8,
    Agent = 9,
}

/// Every entity type with its name, in discriminant order.
pub const ENTITY_TYPES: [(EntityType, &str); 9] = [
    (EntityType::User, "user"),
    (EntityType::Channel, "channel"),
    (EntityType::Group, "group"),
    (EntityType::Message, "message"),
    (EntityType::Role, "role"),
    (EntityType::File, "file"),
    (EntityType::MessageState, "message_state"),
    (EntityType::Poll, "poll"),
    (EntityType::Agent, "agent"),
];

impl EntityType {
    /// Maps a wire discriminant. Requests carry it as `u16`, entities as `u8`.
    pub fn from_wire(value: u16) -> Result<Self, ProtocolError> {
        value
            .checked_sub(1)
            .and_then(|i| ENTITY_TYPES.get(i as usize))
            .map(|(t, _)| *t)
            .ok_or(ProtocolError::InvalidEntityType(value))
    }

    pub fn name(&self) -> &'static str {
        ENTITY_TYPES[*self as usize - 1].1
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase().replace('-', "_");
        ENTITY_TYPES
            .iter()
            .find(|(_, name)| *name == lower)
            .map(|(t, _)| *t)
            .ok_or_else(|| format!("unknown entity type: {s}"))
    }
}

/// Presence status of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum UserStatus {
    Offline = 0,
    Online = 1,
    Idle = 2,
    Dnd = 3,
    Focus = 4,
}

impl UserStatus {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(UserStatus::Offline),
            1 => Some(UserStatus::Online),
            2 => Some(UserStatus::Idle),
            3 => Some(UserStatus::Dnd),
            4 => Some(UserStatus::Focus),
            _ => None,
        }
    }
}

entity_record! {
    /// A user account or bot.
    User {
        1 => email: String = Kind::Str,
        2 => name: String = Kind::Str,
        3 => tag: u32 = Kind::Uint(4),
        4 => status: u8 = Kind::Uint(1),
        5 => status_text: String = Kind::Str,
        6 => permissions: Permissions = Kind::Permissions,
        /// File id of the avatar image.
        7 => avatar: u64 = Kind::Uint(8),
        8 => mfa_enabled: bool = Kind::Bool,
        9 => friends: Vec<u64> = Kind::Numbers(8),
        10 => blocked: Vec<u64> = Kind::Numbers(8),
        11 => pending_in: Vec<u64> = Kind::Numbers(8),
        12 => pending_out: Vec<u64> = Kind::Numbers(8),
        13 => dm_channel: u64 = Kind::Uint(8),
        14 => groups: Vec<u64> = Kind::Numbers(8),
        15 => roles: Vec<u64> = Kind::Numbers(8),
        16 => color: Color = Kind::Color { alpha: false },
        17 => badges: Vec<u64> = Kind::Numbers(1),
        18 => bot_owner: u64 = Kind::Uint(8),
        19 => owned_bots: Vec<u64> = Kind::Numbers(8),
        20 => agents: Vec<u64> = Kind::Numbers(8),
        21 => email_confirmed: bool = Kind::Bool,
        22 => note: String = Kind::Str,
    }
}

impl User {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Decoded presence status; `None` when absent or out of range.
    pub fn presence(&self) -> Option<UserStatus> {
        self.status.and_then(UserStatus::from_wire)
    }
}

entity_record! {
    /// A text or voice channel, either a DM or part of a group.
    Channel {
        1 => name: String = Kind::Str,
        2 => members: Vec<u64> = Kind::Numbers(8),
        3 => group: u64 = Kind::Uint(8),
        4 => messages: Vec<u64> = Kind::Numbers(8),
        5 => typing: Vec<u64> = Kind::Numbers(8),
        6 => unread: u32 = Kind::Uint(4),
        7 => first_unread: u64 = Kind::Uint(8),
        8 => voice: bool = Kind::Bool,
        9 => voice_users: Vec<u64> = Kind::Numbers(8),
        10 => voice_status: Vec<u64> = Kind::Numbers(1),
        11 => mentions: Vec<u64> = Kind::Numbers(8),
    }
}

impl Channel {
    /// Field id of the paginated message list.
    pub const MESSAGES_FIELD: u8 = 4;
}

entity_record! {
    Group {
        1 => owner: u64 = Kind::Uint(8),
        2 => name: String = Kind::Str,
        3 => icon: u64 = Kind::Uint(8),
        4 => invites: Vec<String> = Kind::Strings,
        5 => everyone_role: u64 = Kind::Uint(8),
        6 => roles: Vec<u64> = Kind::Numbers(8),
        7 => channels: Vec<u64> = Kind::Numbers(8),
        8 => emoji: Vec<u64> = Kind::Numbers(8),
    }
}

entity_record! {
    /// A message. Its content lives in [`MessageState`]s; `latest` is the
    /// current revision.
    Message {
        1 => states: Vec<u64> = Kind::Numbers(8),
        2 => channel: u64 = Kind::Uint(8),
        3 => sender: u64 = Kind::Uint(8),
        4 => latest: MessageState = Kind::Entity,
    }
    ignore {
        5 => "edited" = Kind::Bool,
    }
}

entity_record! {
    Role {
        1 => name: String = Kind::Str,
        2 => color: Color = Kind::Color { alpha: false },
        3 => group: u64 = Kind::Uint(8),
        4 => priority: u16 = Kind::Uint(2),
        5 => permissions: Permissions = Kind::Permissions,
        6 => members: Vec<u64> = Kind::Numbers(8),
    }
}

entity_record! {
    /// Uploaded file metadata. Files are immutable once created.
    File {
        1 => name: String = Kind::Str,
        2 => size: u32 = Kind::Uint(4),
        3 => preview: String = Kind::Str,
        4 => length: u32 = Kind::Uint(4),
        5 => pixel_size: String = Kind::Str,
        6 => emoji_name: String = Kind::Str,
    }
}

entity_record! {
    /// One revision of a message's content.
    MessageState {
        1 => message: u64 = Kind::Uint(8),
        2 => sections: Vec<MessageSection> = Kind::Sections,
    }
}

entity_record! {
    Poll {
        1 => options: Vec<String> = Kind::Strings,
        2 => option_votes: Vec<u64> = Kind::Numbers(4),
        3 => self_vote: u8 = Kind::Uint(1),
        4 => total_voters: u32 = Kind::Uint(4),
    }
}

entity_record! {
    Agent {
        1 => owner: u64 = Kind::Uint(8),
        2 => kind: u8 = Kind::Uint(1),
        3 => name: String = Kind::Str,
        4 => online: bool = Kind::Bool,
    }
}

/// Any entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entity {
    User(User),
    Channel(Channel),
    Group(Group),
    Message(Message),
    Role(Role),
    File(File),
    MessageState(MessageState),
    Poll(Poll),
    Agent(Agent),
}

fn merge_record<R: Record>(base: &mut R, patch: &R) -> Result<(), ProtocolError> {
    for spec in R::schema().fields().iter().filter(|s| s.slot != 0) {
        if let Some(value) = patch.get(spec.slot) {
            base.set(spec.slot, value)?;
        }
    }
    Ok(())
}

impl Entity {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Entity::User(_) => EntityType::User,
            Entity::Channel(_) => EntityType::Channel,
            Entity::Group(_) => EntityType::Group,
            Entity::Message(_) => EntityType::Message,
            Entity::Role(_) => EntityType::Role,
            Entity::File(_) => EntityType::File,
            Entity::MessageState(_) => EntityType::MessageState,
            Entity::Poll(_) => EntityType::Poll,
            Entity::Agent(_) => EntityType::Agent,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            Entity::User(e) => e.id,
            Entity::Channel(e) => e.id,
            Entity::Group(e) => e.id,
            Entity::Message(e) => e.id,
            Entity::Role(e) => e.id,
            Entity::File(e) => e.id,
            Entity::MessageState(e) => e.id,
            Entity::Poll(e) => e.id,
            Entity::Agent(e) => e.id,
        }
    }

    /// Appends the entity to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u8(self.entity_type() as u8);
        match self {
            Entity::User(e) => encode_record(e, buf, true),
            Entity::Channel(e) => encode_record(e, buf, true),
            Entity::Group(e) => encode_record(e, buf, true),
            Entity::Message(e) => encode_record(e, buf, true),
            Entity::Role(e) => encode_record(e, buf, true),
            Entity::File(e) => encode_record(e, buf, true),
            Entity::MessageState(e) => encode_record(e, buf, true),
            Entity::Poll(e) => encode_record(e, buf, true),
            Entity::Agent(e) => encode_record(e, buf, true),
        }?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Reads one entity, leaving `reader` just past it.
    pub fn decode(reader: &mut Reader<'_>, unknown: UnknownFields) -> Result<Self, ProtocolError> {
        Self::decode_with(reader, &DecodeOptions::tagged(unknown))
    }

    /// Reads at most `field_limit` fields of an entity.
    ///
    /// The reader is left after the last field read, so the remaining
    /// fields of a longer entity are not consumed.
    pub fn decode_partial(
        reader: &mut Reader<'_>,
        field_limit: usize,
        unknown: UnknownFields,
    ) -> Result<Self, ProtocolError> {
        Self::decode_with(
            reader,
            &DecodeOptions::tagged(unknown).with_field_limit(field_limit),
        )
    }

    /// Decodes the entity starting at `pos`, returning it with the
    /// position just past it.
    pub fn decode_at(
        buf: &[u8],
        pos: usize,
        unknown: UnknownFields,
    ) -> Result<(Self, usize), ProtocolError> {
        let mut reader = Reader::at(buf, pos);
        let entity = Self::decode(&mut reader, unknown)?;
        Ok((entity, reader.position()))
    }

    pub(crate) fn decode_with(
        reader: &mut Reader<'_>,
        options: &DecodeOptions,
    ) -> Result<Self, ProtocolError> {
        let entity_type = EntityType::from_wire(reader.u8()? as u16)?;
        let entity = match entity_type {
            EntityType::User => Entity::User(decode_record(reader, options)?),
            EntityType::Channel => Entity::Channel(decode_record(reader, options)?),
            EntityType::Group => Entity::Group(decode_record(reader, options)?),
            EntityType::Message => Entity::Message(decode_record(reader, options)?),
            EntityType::Role => Entity::Role(decode_record(reader, options)?),
            EntityType::File => Entity::File(decode_record(reader, options)?),
            EntityType::MessageState => Entity::MessageState(decode_record(reader, options)?),
            EntityType::Poll => Entity::Poll(decode_record(reader, options)?),
            EntityType::Agent => Entity::Agent(decode_record(reader, options)?),
        };
        Ok(entity)
    }

    /// Applies the fields present in `patch` on top of this entity.
    ///
    /// Both must share type and id. Files cannot be patched.
    pub fn merge(&mut self, patch: &Entity) -> Result<(), ProtocolError> {
        if self.entity_type() != patch.entity_type() || self.id() != patch.id() {
            return Err(ProtocolError::MergeMismatch(format!(
                "{} {} <- {} {}",
                self.entity_type(),
                self.id(),
                patch.entity_type(),
                patch.id()
            )));
        }
        match (self, patch) {
            (Entity::User(a), Entity::User(b)) => merge_record(a, b),
            (Entity::Channel(a), Entity::Channel(b)) => merge_record(a, b),
            (Entity::Group(a), Entity::Group(b)) => merge_record(a, b),
            (Entity::Message(a), Entity::Message(b)) => merge_record(a, b),
            (Entity::Role(a), Entity::Role(b)) => merge_record(a, b),
            (Entity::File(_), Entity::File(_)) => Err(ProtocolError::ImmutableEntity("file")),
            (Entity::MessageState(a), Entity::MessageState(b)) => merge_record(a, b),
            (Entity::Poll(a), Entity::Poll(b)) => merge_record(a, b),
            (Entity::Agent(a), Entity::Agent(b)) => merge_record(a, b),
            (a, b) => Err(ProtocolError::MergeMismatch(format!(
                "{} <- {}",
                a.entity_type(),
                b.entity_type()
            ))),
        }
    }
}

/// Forces registration of every entity schema.
pub(crate) fn verify_schemas() {
    User::schema();
    Channel::schema();
    Group::schema();
    Message::schema();
    Role::schema();
    File::schema();
    MessageState::schema();
    Poll::schema();
    Agent::schema();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::MAX_NESTING_DEPTH;
    use crate::value::{Permission, SectionKind};
    use proptest::prelude::*;
    use proptest::test_runner::TestCaseError;

    fn full_user() -> User {
        User {
            id: 9001,
            email: Some("ann@example.com".into()),
            name: Some("Ann".into()),
            tag: Some(1234),
            status: Some(UserStatus::Dnd as u8),
            status_text: Some("busy".into()),
            permissions: Some(
                Permissions::new()
                    .with(Permission::SendMessages)
                    .with(Permission::ManageBots),
            ),
            avatar: Some(77),
            mfa_enabled: Some(true),
            friends: Some(vec![1, 2, 3]),
            blocked: Some(vec![]),
            pending_in: Some(vec![4]),
            pending_out: Some(vec![5, 6]),
            dm_channel: Some(100),
            groups: Some(vec![200]),
            roles: Some(vec![300, 301]),
            color: Some(Color::rgb(0xAA, 0xBB, 0xCC)),
            badges: Some(vec![1, 7]),
            bot_owner: Some(0),
            owned_bots: Some(vec![11]),
            agents: Some(vec![12, 13]),
            email_confirmed: Some(false),
            note: Some("hi there".into()),
        }
    }

    fn sample_message() -> Message {
        Message {
            id: 500,
            states: Some(vec![501, 502]),
            channel: Some(10),
            sender: Some(9001),
            latest: Some(MessageState {
                id: 502,
                message: Some(500),
                sections: Some(vec![
                    MessageSection::text("hello"),
                    MessageSection::file(42),
                    MessageSection {
                        kind: SectionKind::Code,
                        blob: 0,
                        text: "fn main() {}".into(),
                    },
                ]),
            }),
        }
    }

    fn roundtrip(entity: &Entity) -> Entity {
        let buf = entity.to_bytes().unwrap();
        let (decoded, pos) = Entity::decode_at(&buf, 0, UnknownFields::Strict).unwrap();
        assert_eq!(pos, buf.len());
        decoded
    }

    #[test]
    fn test_scenario_user_exact_bytes() {
        let user = Entity::User(User::new(42).with_name("Ann"));
        let buf = user.to_bytes().unwrap();
        assert_eq!(
            buf.as_ref(),
            &[
                0x01, // User
                0x02, // two fields
                0x00, 0, 0, 0, 0, 0, 0, 0, 0x2A, // id = 42
                0x02, 0x00, 0x03, b'A', b'n', b'n', // name = "Ann"
            ]
        );
        assert_eq!(roundtrip(&user), user);
    }

    #[test]
    fn test_full_user_roundtrip() {
        let user = Entity::User(full_user());
        assert_eq!(roundtrip(&user), user);
    }

    #[test]
    fn test_nested_entity_roundtrip() {
        let message = Entity::Message(sample_message());
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn test_every_type_roundtrips_bare() {
        for (entity_type, _) in ENTITY_TYPES {
            let entity = match entity_type {
                EntityType::User => Entity::User(User::new(1)),
                EntityType::Channel => Entity::Channel(Channel::new(2)),
                EntityType::Group => Entity::Group(Group::new(3)),
                EntityType::Message => Entity::Message(Message::new(4)),
                EntityType::Role => Entity::Role(Role::new(5)),
                EntityType::File => Entity::File(File::new(6)),
                EntityType::MessageState => Entity::MessageState(MessageState::new(7)),
                EntityType::Poll => Entity::Poll(Poll::new(8)),
                EntityType::Agent => Entity::Agent(Agent::new(9)),
            };
            let buf = entity.to_bytes().unwrap();
            assert_eq!(buf[0], entity_type as u8);
            assert_eq!(buf[1], 1);
            assert_eq!(roundtrip(&entity), entity);
        }
    }

    #[test]
    fn test_invalid_entity_type() {
        for discriminant in [0u8, 10, 255] {
            let buf = [discriminant, 1, 0, 0, 0, 0, 0, 0, 0, 0, 1];
            let err = Entity::decode_at(&buf, 0, UnknownFields::Skip).unwrap_err();
            assert!(matches!(err, ProtocolError::InvalidEntityType(d) if d == discriminant as u16));
        }
    }

    #[test]
    fn test_truncation_at_every_boundary() {
        for entity in [
            Entity::User(full_user()),
            Entity::Message(sample_message()),
        ] {
            let buf = entity.to_bytes().unwrap();
            for cut in 0..buf.len() {
                let err = Entity::decode_at(&buf[..cut], 0, UnknownFields::Strict).unwrap_err();
                assert!(err.is_truncation(), "cut at {cut}: {err}");
            }
        }
    }

    #[test]
    fn test_decode_at_offset() {
        let mut buf = BytesMut::from(&b"xyz"[..]);
        let first = Entity::Agent(Agent {
            id: 1,
            name: Some("helper".into()),
            online: Some(true),
            ..Default::default()
        });
        let second = Entity::Poll(Poll {
            id: 2,
            options: Some(vec!["yes".into(), "no".into()]),
            option_votes: Some(vec![3, 4]),
            ..Default::default()
        });
        first.encode(&mut buf).unwrap();
        second.encode(&mut buf).unwrap();

        let (a, pos) = Entity::decode_at(&buf, 3, UnknownFields::Strict).unwrap();
        let (b, end) = Entity::decode_at(&buf, pos, UnknownFields::Strict).unwrap();
        assert_eq!((a, b), (first, second));
        assert_eq!(end, buf.len());
    }

    #[test]
    fn test_decode_partial() {
        let buf = Entity::User(full_user()).to_bytes().unwrap();
        let mut reader = Reader::new(&buf);
        let partial = Entity::decode_partial(&mut reader, 3, UnknownFields::Strict).unwrap();
        match partial {
            Entity::User(user) => {
                assert_eq!(user.id, 9001);
                assert_eq!(user.email.as_deref(), Some("ann@example.com"));
                assert_eq!(user.name.as_deref(), Some("Ann"));
                assert_eq!(user.tag, None);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(reader.position() < buf.len());
    }

    #[test]
    fn test_ignored_message_field() {
        // Message 3 with fields: id, edited=true (ignored id 5), channel=8
        let mut buf = vec![4u8, 3, 0, 0, 0, 0, 0, 0, 0, 0, 3, 5, 1, 2];
        buf.extend_from_slice(&8u64.to_be_bytes());

        let (entity, _) = Entity::decode_at(&buf, 0, UnknownFields::Skip).unwrap();
        assert_eq!(
            entity,
            Entity::Message(Message {
                id: 3,
                channel: Some(8),
                ..Default::default()
            })
        );

        let err = Entity::decode_at(&buf, 0, UnknownFields::Strict).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::UnknownField {
                record: "Message",
                id: 5
            }
        ));
    }

    #[test]
    fn test_nested_entity_wrong_type() {
        // Message whose `latest` holds a User instead of a MessageState.
        let mut buf = BytesMut::from(&[4u8, 2, 0, 0, 0, 0, 0, 0, 0, 0, 1, 4][..]);
        Entity::User(User::new(5)).encode(&mut buf).unwrap();
        let err = Entity::decode_at(&buf, 0, UnknownFields::Strict).unwrap_err();
        assert!(matches!(err, ProtocolError::FieldTypeMismatch("latest")));
    }

    /// Messages whose `latest` holds another message, `levels` deep, with
    /// the innermost one cut off after its type byte.
    fn nested_messages(levels: usize) -> Vec<u8> {
        let mut buf = [4u8, 1, 4].repeat(levels);
        buf.push(4);
        buf
    }

    #[test]
    fn test_deep_nesting_rejected() {
        for levels in [MAX_NESTING_DEPTH + 1, 2000, 200_000] {
            let buf = nested_messages(levels);
            let err = Entity::decode_at(&buf, 0, UnknownFields::Skip).unwrap_err();
            assert!(
                matches!(err, ProtocolError::NestingTooDeep { max: MAX_NESTING_DEPTH }),
                "{levels}: {err:?}"
            );
        }

        // Within the bound the decoder runs into the cut instead.
        let buf = nested_messages(MAX_NESTING_DEPTH);
        let err = Entity::decode_at(&buf, 0, UnknownFields::Skip).unwrap_err();
        assert!(err.is_truncation(), "{err:?}");
    }

    #[test]
    fn test_deep_nesting_rejected_with_field_limit() {
        let buf = nested_messages(2000);
        let mut reader = Reader::new(&buf);
        let err = Entity::decode_partial(&mut reader, 1, UnknownFields::Strict).unwrap_err();
        assert!(matches!(err, ProtocolError::NestingTooDeep { .. }));
    }

    #[test]
    fn test_merge_applies_present_fields() {
        let mut cached = Entity::User(full_user());
        let patch = Entity::User(User {
            id: 9001,
            status: Some(UserStatus::Online as u8),
            friends: Some(vec![]),
            ..Default::default()
        });
        cached.merge(&patch).unwrap();

        let Entity::User(user) = cached else {
            panic!("type changed");
        };
        assert_eq!(user.presence(), Some(UserStatus::Online));
        assert_eq!(user.friends, Some(vec![]));
        assert_eq!(user.name.as_deref(), Some("Ann"));
        assert_eq!(user.note.as_deref(), Some("hi there"));
    }

    #[test]
    fn test_merge_rejections() {
        let mut file = Entity::File(File::new(1));
        let err = file.merge(&Entity::File(File::new(1))).unwrap_err();
        assert!(matches!(err, ProtocolError::ImmutableEntity("file")));

        let mut user = Entity::User(User::new(1));
        assert!(matches!(
            user.merge(&Entity::User(User::new(2))),
            Err(ProtocolError::MergeMismatch(_))
        ));
        assert!(matches!(
            user.merge(&Entity::Channel(Channel::new(1))),
            Err(ProtocolError::MergeMismatch(_))
        ));
    }

    #[test]
    fn test_entity_type_names() {
        assert_eq!("message_state".parse::<EntityType>().unwrap(), EntityType::MessageState);
        assert_eq!("Message-State".parse::<EntityType>().unwrap(), EntityType::MessageState);
        assert_eq!("user".parse::<EntityType>().unwrap(), EntityType::User);
        assert!("usr".parse::<EntityType>().is_err());
        for (t, name) in ENTITY_TYPES {
            assert_eq!(t.to_string(), name);
            assert_eq!(EntityType::from_wire(t as u16).unwrap(), t);
        }
    }

    #[test]
    fn test_messages_field_id() {
        assert_eq!(
            Channel::schema().id_of("messages"),
            Some(Channel::MESSAGES_FIELD)
        );
    }

    #[test]
    fn test_schemas_register() {
        verify_schemas();
    }

    #[test]
    fn test_serialize_tagged() {
        let json = serde_json::to_value(Entity::User(User::new(42).with_name("Ann"))).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "user", "id": 42, "name": "Ann"})
        );
    }

    fn arb_ids() -> impl Strategy<Value = Vec<u64>> {
        prop::collection::vec(any::<u64>(), 0..6)
    }

    fn arb_text(max: usize) -> impl Strategy<Value = String> {
        prop::collection::vec(any::<char>(), 0..=max).prop_map(|chars| chars.into_iter().collect())
    }

    fn arb_color() -> impl Strategy<Value = Color> {
        any::<(u8, u8, u8)>().prop_map(|(r, g, b)| Color::rgb(r, g, b))
    }

    fn arb_permissions() -> impl Strategy<Value = Permissions> {
        any::<[u8; 6]>().prop_map(Permissions::from_bytes)
    }

    fn arb_section() -> impl Strategy<Value = MessageSection> {
        (0u8..8, any::<u64>(), arb_text(8)).prop_map(|(kind, blob, text)| MessageSection {
            kind: SectionKind::try_from(kind).unwrap(),
            blob,
            text,
        })
    }

    fn arb_user() -> impl Strategy<Value = User> {
        let head = (
            any::<u64>(),
            prop::option::of("[a-z@.]{0,20}"),
            prop::option::of(arb_text(12)),
            prop::option::of(any::<u32>()),
            prop::option::of(0u8..5),
            prop::option::of(arb_text(12)),
            prop::option::of(arb_permissions()),
            prop::option::of(any::<u64>()),
            prop::option::of(any::<bool>()),
            prop::option::of(arb_ids()),
            prop::option::of(arb_ids()),
            prop::option::of(arb_ids()),
        );
        let tail = (
            prop::option::of(arb_ids()),
            prop::option::of(any::<u64>()),
            prop::option::of(arb_ids()),
            prop::option::of(arb_ids()),
            prop::option::of(arb_color()),
            prop::option::of(prop::collection::vec(0u64..256, 0..4)),
            prop::option::of(any::<u64>()),
            prop::option::of(arb_ids()),
            prop::option::of(arb_ids()),
            prop::option::of(any::<bool>()),
            prop::option::of(arb_text(10)),
        );
        (head, tail).prop_map(
            |(
                (id, email, name, tag, status, status_text, permissions, avatar, mfa_enabled, friends, blocked, pending_in),
                (pending_out, dm_channel, groups, roles, color, badges, bot_owner, owned_bots, agents, email_confirmed, note),
            )| User {
                id,
                email,
                name,
                tag,
                status,
                status_text,
                permissions,
                avatar,
                mfa_enabled,
                friends,
                blocked,
                pending_in,
                pending_out,
                dm_channel,
                groups,
                roles,
                color,
                badges,
                bot_owner,
                owned_bots,
                agents,
                email_confirmed,
                note,
            },
        )
    }

    fn arb_channel() -> impl Strategy<Value = Channel> {
        (
            any::<u64>(),
            prop::option::of(arb_text(16)),
            prop::option::of(arb_ids()),
            prop::option::of(any::<u64>()),
            prop::option::of(arb_ids()),
            prop::option::of(arb_ids()),
            prop::option::of(any::<u32>()),
            prop::option::of(any::<u64>()),
            prop::option::of(any::<bool>()),
            prop::option::of(arb_ids()),
            prop::option::of(prop::collection::vec(0u64..256, 0..4)),
            prop::option::of(arb_ids()),
        )
            .prop_map(
                |(id, name, members, group, messages, typing, unread, first_unread, voice, voice_users, voice_status, mentions)| {
                    Channel {
                        id,
                        name,
                        members,
                        group,
                        messages,
                        typing,
                        unread,
                        first_unread,
                        voice,
                        voice_users,
                        voice_status,
                        mentions,
                    }
                },
            )
    }

    fn arb_group() -> impl Strategy<Value = Group> {
        (
            any::<u64>(),
            prop::option::of(any::<u64>()),
            prop::option::of(arb_text(16)),
            prop::option::of(any::<u64>()),
            prop::option::of(prop::collection::vec(arb_text(8), 0..4)),
            prop::option::of(any::<u64>()),
            prop::option::of(arb_ids()),
            prop::option::of(arb_ids()),
            prop::option::of(arb_ids()),
        )
            .prop_map(
                |(id, owner, name, icon, invites, everyone_role, roles, channels, emoji)| Group {
                    id,
                    owner,
                    name,
                    icon,
                    invites,
                    everyone_role,
                    roles,
                    channels,
                    emoji,
                },
            )
    }

    fn arb_message_state() -> impl Strategy<Value = MessageState> {
        (
            any::<u64>(),
            prop::option::of(any::<u64>()),
            prop::option::of(prop::collection::vec(arb_section(), 0..4)),
        )
            .prop_map(|(id, message, sections)| MessageState {
                id,
                message,
                sections,
            })
    }

    fn arb_message() -> impl Strategy<Value = Message> {
        (
            any::<u64>(),
            prop::option::of(arb_ids()),
            prop::option::of(any::<u64>()),
            prop::option::of(any::<u64>()),
            prop::option::of(arb_message_state()),
        )
            .prop_map(|(id, states, channel, sender, latest)| Message {
                id,
                states,
                channel,
                sender,
                latest,
            })
    }

    fn arb_role() -> impl Strategy<Value = Role> {
        (
            any::<u64>(),
            prop::option::of(arb_text(16)),
            prop::option::of(arb_color()),
            prop::option::of(any::<u64>()),
            prop::option::of(any::<u16>()),
            prop::option::of(arb_permissions()),
            prop::option::of(arb_ids()),
        )
            .prop_map(|(id, name, color, group, priority, permissions, members)| Role {
                id,
                name,
                color,
                group,
                priority,
                permissions,
                members,
            })
    }

    fn arb_file() -> impl Strategy<Value = File> {
        (
            any::<u64>(),
            prop::option::of(arb_text(16)),
            prop::option::of(any::<u32>()),
            prop::option::of(arb_text(16)),
            prop::option::of(any::<u32>()),
            prop::option::of("[0-9]{1,4}x[0-9]{1,4}"),
            prop::option::of(arb_text(8)),
        )
            .prop_map(|(id, name, size, preview, length, pixel_size, emoji_name)| File {
                id,
                name,
                size,
                preview,
                length,
                pixel_size,
                emoji_name,
            })
    }

    fn arb_poll() -> impl Strategy<Value = Poll> {
        (
            any::<u64>(),
            prop::option::of(prop::collection::vec(arb_text(8), 0..4)),
            prop::option::of(prop::collection::vec(0u64..=u32::MAX as u64, 0..4)),
            prop::option::of(any::<u8>()),
            prop::option::of(any::<u32>()),
        )
            .prop_map(|(id, options, option_votes, self_vote, total_voters)| Poll {
                id,
                options,
                option_votes,
                self_vote,
                total_voters,
            })
    }

    fn arb_agent() -> impl Strategy<Value = Agent> {
        (
            any::<u64>(),
            prop::option::of(any::<u64>()),
            prop::option::of(any::<u8>()),
            prop::option::of(arb_text(16)),
            prop::option::of(any::<bool>()),
        )
            .prop_map(|(id, owner, kind, name, online)| Agent {
                id,
                owner,
                kind,
                name,
                online,
            })
    }

    fn arb_entity() -> impl Strategy<Value = Entity> {
        prop_oneof![
            arb_user().prop_map(Entity::User),
            arb_channel().prop_map(Entity::Channel),
            arb_group().prop_map(Entity::Group),
            arb_message().prop_map(Entity::Message),
            arb_role().prop_map(Entity::Role),
            arb_file().prop_map(Entity::File),
            arb_message_state().prop_map(Entity::MessageState),
            arb_poll().prop_map(Entity::Poll),
            arb_agent().prop_map(Entity::Agent),
        ]
    }

    /// Slots holding a value, id included.
    fn present_slots(entity: &Entity) -> Vec<u8> {
        fn slots<R: Record>(record: &R) -> Vec<u8> {
            R::schema()
                .fields()
                .iter()
                .map(|spec| spec.slot)
                .filter(|slot| record.get(*slot).is_some())
                .collect()
        }
        match entity {
            Entity::User(e) => slots(e),
            Entity::Channel(e) => slots(e),
            Entity::Group(e) => slots(e),
            Entity::Message(e) => slots(e),
            Entity::Role(e) => slots(e),
            Entity::File(e) => slots(e),
            Entity::MessageState(e) => slots(e),
            Entity::Poll(e) => slots(e),
            Entity::Agent(e) => slots(e),
        }
    }

    fn check_roundtrip(entity: Entity) -> Result<(), TestCaseError> {
        let buf = entity.to_bytes().unwrap();
        let (decoded, pos) = Entity::decode_at(&buf, 0, UnknownFields::Strict).unwrap();
        prop_assert_eq!(pos, buf.len());
        prop_assert_eq!(&decoded, &entity);
        Ok(())
    }

    proptest! {
        #[test]
        fn prop_user_roundtrip(user in arb_user()) {
            check_roundtrip(Entity::User(user))?;
        }

        #[test]
        fn prop_channel_roundtrip(channel in arb_channel()) {
            check_roundtrip(Entity::Channel(channel))?;
        }

        #[test]
        fn prop_group_roundtrip(group in arb_group()) {
            check_roundtrip(Entity::Group(group))?;
        }

        #[test]
        fn prop_message_roundtrip(message in arb_message()) {
            check_roundtrip(Entity::Message(message))?;
        }

        #[test]
        fn prop_role_roundtrip(role in arb_role()) {
            check_roundtrip(Entity::Role(role))?;
        }

        #[test]
        fn prop_file_roundtrip(file in arb_file()) {
            check_roundtrip(Entity::File(file))?;
        }

        #[test]
        fn prop_message_state_roundtrip(state in arb_message_state()) {
            check_roundtrip(Entity::MessageState(state))?;
        }

        #[test]
        fn prop_poll_roundtrip(poll in arb_poll()) {
            check_roundtrip(Entity::Poll(poll))?;
        }

        #[test]
        fn prop_agent_roundtrip(agent in arb_agent()) {
            check_roundtrip(Entity::Agent(agent))?;
        }

        // Decoding populates exactly the attributes that were encoded,
        // and the count byte matches them.
        #[test]
        fn prop_decode_populates_only_encoded_fields(entity in arb_entity()) {
            let buf = entity.to_bytes().unwrap();
            let (decoded, _) = Entity::decode_at(&buf, 0, UnknownFields::Strict).unwrap();
            let encoded = present_slots(&entity);
            prop_assert_eq!(present_slots(&decoded), encoded.clone());
            prop_assert_eq!(buf[1] as usize, encoded.len());
        }

        // Encoding a field alongside others yields the same bytes for it as
        // encoding it alone.
        #[test]
        fn prop_sparse_independence(user in arb_user(), note in "\\PC{0,10}") {
            let alone = Entity::User(User { id: user.id, note: Some(note.clone()), ..Default::default() })
                .to_bytes()
                .unwrap();
            let with_rest = Entity::User(User { note: Some(note), ..user })
                .to_bytes()
                .unwrap();
            // note is the last declared field, so its bytes close both encodings
            let field_len = alone.len() - 2 - 9;
            prop_assert_eq!(
                &alone[alone.len() - field_len..],
                &with_rest[with_rest.len() - field_len..]
            );
            prop_assert_eq!(with_rest[1] as usize, 1 + count_present(&with_rest));
        }
    }

    fn count_present(buf: &[u8]) -> usize {
        let (entity, _) = Entity::decode_at(buf, 0, UnknownFields::Strict).unwrap();
        let Entity::User(user) = entity else { unreachable!() };
        User::schema()
            .fields()
            .iter()
            .filter(|s| s.slot != 0 && user.get(s.slot).is_some())
            .count()
    }
}
