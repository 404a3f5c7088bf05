//! Attribute values carried by record fields.
//!
//! Records expose their attributes as [`Value`]s so a single field
//! descriptor table can drive both encoding and decoding. Typed struct
//! fields convert through [`FieldValue`].

use crate::entity::Entity;
use crate::error::ProtocolError;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A decoded or to-be-encoded attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Uint(u64),
    Bool(bool),
    Color(Color),
    Str(String),
    Numbers(Vec<u64>),
    Strings(Vec<String>),
    Permissions(Permissions),
    Blob(Vec<u8>),
    Sections(Vec<MessageSection>),
    Entity(Box<Entity>),
}

/// Conversion between a typed struct field and a [`Value`].
pub trait FieldValue: Sized {
    fn to_value(&self) -> Value;

    /// Returns `None` when the value has a different shape or does not fit.
    fn from_value(value: Value) -> Option<Self>;
}

/// Converts a decoded value into the type of the named field.
pub fn convert<T: FieldValue>(value: Value, field: &'static str) -> Result<T, ProtocolError> {
    T::from_value(value).ok_or(ProtocolError::FieldTypeMismatch(field))
}

macro_rules! uint_field_value {
    ($($ty:ty),*) => {
        $(
            impl FieldValue for $ty {
                fn to_value(&self) -> Value {
                    Value::Uint(*self as u64)
                }

                fn from_value(value: Value) -> Option<Self> {
                    match value {
                        Value::Uint(v) => <$ty>::try_from(v).ok(),
                        _ => None,
                    }
                }
            }
        )*
    };
}

uint_field_value!(u8, u16, u32, u64);

macro_rules! simple_field_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FieldValue for $ty {
                fn to_value(&self) -> Value {
                    Value::$variant(self.clone())
                }

                fn from_value(value: Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

simple_field_value! {
    bool => Bool,
    Color => Color,
    String => Str,
    Vec<u64> => Numbers,
    Vec<String> => Strings,
    Permissions => Permissions,
    Vec<u8> => Blob,
    Vec<MessageSection> => Sections,
}

impl FieldValue for Entity {
    fn to_value(&self) -> Value {
        Value::Entity(Box::new(self.clone()))
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Entity(entity) => Some(*entity),
            _ => None,
        }
    }
}

// ============================================================================
// Colors
// ============================================================================

/// An RGB color with optional alpha, written as `#rrggbb` or `#rrggbbaa`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: Option<u8>,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: None }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a: Some(a) }
    }

    /// Packs into a 3-byte (`alpha == false`) or 4-byte integer.
    ///
    /// A missing alpha packs as fully opaque; a present alpha is dropped
    /// when packing without one.
    pub fn to_packed(&self, alpha: bool) -> u64 {
        let rgb = (self.r as u64) << 16 | (self.g as u64) << 8 | self.b as u64;
        if alpha {
            rgb << 8 | self.a.unwrap_or(0xFF) as u64
        } else {
            rgb
        }
    }

    pub fn from_packed(packed: u64, alpha: bool) -> Self {
        if alpha {
            Self::rgba(
                (packed >> 24) as u8,
                (packed >> 16) as u8,
                (packed >> 8) as u8,
                packed as u8,
            )
        } else {
            Self::rgb((packed >> 16) as u8, (packed >> 8) as u8, packed as u8)
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)?;
        if let Some(a) = self.a {
            write!(f, "{:02x}", a)?;
        }
        Ok(())
    }
}

impl FromStr for Color {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidColor(s.to_string());
        let hex = s.strip_prefix('#').ok_or_else(invalid)?;
        if !hex.is_ascii() || !(hex.len() == 6 || hex.len() == 8) {
            return Err(invalid());
        }
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
        let (r, g, b) = (byte(0)?, byte(2)?, byte(4)?);
        if hex.len() == 8 {
            Ok(Self::rgba(r, g, b, byte(6)?))
        } else {
            Ok(Self::rgb(r, g, b))
        }
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ============================================================================
// Permissions
// ============================================================================

/// Size of the permission bitset on the wire.
pub const PERMISSION_BYTES: usize = 6;

/// Individual permission flags. The discriminant is the bit index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Permission {
    ReadOwnProfile = 0,
    EditOwnProfile = 1,
    ManageContacts = 2,
    ReadMessages = 3,
    SendMessages = 4,
    DeleteMessages = 5,
    EditMessages = 6,
    CreateGroups = 7,
    ManageGroups = 8,
    ManageChannels = 9,
    ManageRoles = 10,
    ManageInvites = 11,
    KickMembers = 12,
    BanMembers = 13,
    MentionEveryone = 14,
    UploadFiles = 15,
    JoinVoice = 16,
    SpeakInVoice = 17,
    ManageBots = 18,
}

impl Permission {
    pub const ALL: [Permission; 19] = [
        Permission::ReadOwnProfile,
        Permission::EditOwnProfile,
        Permission::ManageContacts,
        Permission::ReadMessages,
        Permission::SendMessages,
        Permission::DeleteMessages,
        Permission::EditMessages,
        Permission::CreateGroups,
        Permission::ManageGroups,
        Permission::ManageChannels,
        Permission::ManageRoles,
        Permission::ManageInvites,
        Permission::KickMembers,
        Permission::BanMembers,
        Permission::MentionEveryone,
        Permission::UploadFiles,
        Permission::JoinVoice,
        Permission::SpeakInVoice,
        Permission::ManageBots,
    ];

    fn position(self) -> (usize, u8) {
        let bit = self as usize;
        (bit / 8, 1 << (bit % 8))
    }
}

/// Fixed-size permission bitset. Bit `i` lives in byte `i / 8` under mask
/// `1 << (i % 8)`; unknown bits are preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Permissions([u8; PERMISSION_BYTES]);

impl Permissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: [u8; PERMISSION_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PERMISSION_BYTES] {
        &self.0
    }

    pub fn with(mut self, permission: Permission) -> Self {
        self.set(permission, true);
        self
    }

    pub fn set(&mut self, permission: Permission, enabled: bool) {
        let (byte, mask) = permission.position();
        if enabled {
            self.0[byte] |= mask;
        } else {
            self.0[byte] &= !mask;
        }
    }

    pub fn has(&self, permission: Permission) -> bool {
        let (byte, mask) = permission.position();
        self.0[byte] & mask != 0
    }

    /// Known permissions that are set.
    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        Permission::ALL.into_iter().filter(|p| self.has(*p))
    }
}

impl FromIterator<Permission> for Permissions {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        iter.into_iter().fold(Self::new(), Permissions::with)
    }
}

impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

// ============================================================================
// Message sections
// ============================================================================

/// What a message section holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SectionKind {
    Text = 0,
    Code = 1,
    File = 2,
    Quote = 3,
    Invite = 4,
    User = 5,
    BotUi = 6,
    Poll = 7,
}

impl TryFrom<u8> for SectionKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SectionKind::Text),
            1 => Ok(SectionKind::Code),
            2 => Ok(SectionKind::File),
            3 => Ok(SectionKind::Quote),
            4 => Ok(SectionKind::Invite),
            5 => Ok(SectionKind::User),
            6 => Ok(SectionKind::BotUi),
            7 => Ok(SectionKind::Poll),
            other => Err(ProtocolError::InvalidSectionKind(other)),
        }
    }
}

/// One part of a message body.
///
/// `blob` references a file, user or poll id depending on `kind`; it is
/// zero for plain text sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSection {
    pub kind: SectionKind,
    pub blob: u64,
    pub text: String,
}

impl MessageSection {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: SectionKind::Text,
            blob: 0,
            text: text.into(),
        }
    }

    pub fn file(file_id: u64) -> Self {
        Self {
            kind: SectionKind::File,
            blob: file_id,
            text: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_parse_and_display() {
        let c: Color = "#1a2b3c".parse().unwrap();
        assert_eq!(c, Color::rgb(0x1a, 0x2b, 0x3c));
        assert_eq!(c.to_string(), "#1a2b3c");

        let c: Color = "#1A2B3C80".parse().unwrap();
        assert_eq!(c, Color::rgba(0x1a, 0x2b, 0x3c, 0x80));
        assert_eq!(c.to_string(), "#1a2b3c80");
    }

    #[test]
    fn test_color_rejects_garbage() {
        for bad in ["", "123456", "#12345", "#1234567", "#gg0000", "#ééé"] {
            assert!(bad.parse::<Color>().is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn test_color_packing() {
        let c = Color::rgb(0x12, 0x34, 0x56);
        assert_eq!(c.to_packed(false), 0x123456);
        assert_eq!(c.to_packed(true), 0x123456FF);
        assert_eq!(Color::from_packed(0x123456, false), c);
        assert_eq!(
            Color::from_packed(0x12345678, true),
            Color::rgba(0x12, 0x34, 0x56, 0x78)
        );
    }

    #[test]
    fn test_permissions_bits() {
        let perms = Permissions::new()
            .with(Permission::ReadOwnProfile)
            .with(Permission::ManageGroups)
            .with(Permission::ManageBots);
        assert_eq!(perms.as_bytes(), &[0b0000_0001, 0b0000_0001, 0b0000_0100, 0, 0, 0]);
        assert!(perms.has(Permission::ManageGroups));
        assert!(!perms.has(Permission::SendMessages));

        let listed: Vec<_> = perms.iter().collect();
        assert_eq!(
            listed,
            vec![
                Permission::ReadOwnProfile,
                Permission::ManageGroups,
                Permission::ManageBots
            ]
        );
    }

    #[test]
    fn test_permissions_preserve_unknown_bits() {
        let mut perms = Permissions::from_bytes([0, 0, 0, 0, 0, 0x80]);
        perms.set(Permission::JoinVoice, true);
        perms.set(Permission::JoinVoice, false);
        assert_eq!(perms.as_bytes()[5], 0x80);
        assert_eq!(perms.iter().count(), 0);
    }

    #[test]
    fn test_uint_conversion_range() {
        assert_eq!(u8::from_value(Value::Uint(255)), Some(255));
        assert_eq!(u8::from_value(Value::Uint(256)), None);
        assert_eq!(u16::from_value(Value::Bool(true)), None);
    }

    #[test]
    fn test_convert_reports_field() {
        let err = convert::<String>(Value::Uint(1), "name").unwrap_err();
        assert!(matches!(err, ProtocolError::FieldTypeMismatch("name")));
    }

    #[test]
    fn test_section_kind_wire() {
        assert_eq!(SectionKind::try_from(6).unwrap(), SectionKind::BotUi);
        assert!(matches!(
            SectionKind::try_from(8),
            Err(ProtocolError::InvalidSectionKind(8))
        ));
    }

    #[test]
    fn test_serialize_color_and_permissions() {
        let json = serde_json::to_string(&Color::rgb(255, 0, 16)).unwrap();
        assert_eq!(json, "\"#ff0010\"");

        let perms: Permissions = [Permission::SendMessages, Permission::JoinVoice]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&perms).unwrap();
        assert_eq!(json, "[\"send_messages\",\"join_voice\"]");
    }
}
