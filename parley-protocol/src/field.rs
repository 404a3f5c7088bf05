//! Field descriptors and record encoding.
//!
//! A record type declares its attributes as a [`Schema`]: an ordered list
//! of [`FieldSpec`]s, each naming an attribute and the [`FieldKind`] that
//! encodes it. Schemas come in two placement modes:
//!
//! - **Tagged**: every field carries a one-byte id and is written as
//!   `[id][value]`; absent fields are omitted. Entities use this mode,
//!   prefixed by a one-byte count of the fields present.
//! - **Positional**: fields carry no id and are written back to back in
//!   declaration order. Packet payloads use this mode.
//!
//! A schema never mixes the two; [`Schema::new`] rejects such a
//! declaration.

use crate::entity::Entity;
use crate::error::ProtocolError;
use crate::value::{Color, MessageSection, Permissions, SectionKind, Value, PERMISSION_BYTES};
use crate::wire::{self, Reader};
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a field's value is laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Unsigned integer of the given byte width.
    Uint(usize),
    Bool,
    /// 3-byte RGB, or 4-byte RGBA when `alpha` is set.
    Color { alpha: bool },
    Str,
    /// Number list with elements of the given byte width.
    Numbers(usize),
    Strings,
    Permissions,
    Blob,
    Sections,
    /// A complete nested entity, discriminant included.
    Entity,
}

impl FieldKind {
    fn color_width(alpha: bool) -> usize {
        if alpha {
            4
        } else {
            3
        }
    }

    /// Writes `value` (without any field id).
    pub fn encode(
        &self,
        field: &'static str,
        value: &Value,
        buf: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        match (self, value) {
            (FieldKind::Uint(width), Value::Uint(v)) => wire::put_uint(buf, *v, *width),
            (FieldKind::Bool, Value::Bool(v)) => wire::put_bool(buf, *v),
            (FieldKind::Color { alpha }, Value::Color(c)) => {
                wire::put_uint(buf, c.to_packed(*alpha), Self::color_width(*alpha))
            }
            (FieldKind::Str, Value::Str(v)) => wire::put_string(buf, v)?,
            (FieldKind::Numbers(width), Value::Numbers(v)) => wire::put_numbers(buf, v, *width)?,
            (FieldKind::Strings, Value::Strings(v)) => wire::put_strings(buf, v)?,
            (FieldKind::Permissions, Value::Permissions(p)) => buf.put_slice(p.as_bytes()),
            (FieldKind::Blob, Value::Blob(v)) => wire::put_blob(buf, v)?,
            (FieldKind::Sections, Value::Sections(sections)) => {
                if sections.len() > wire::MAX_PREFIXED_LEN {
                    return Err(ProtocolError::LengthOverflow {
                        len: sections.len(),
                        max: wire::MAX_PREFIXED_LEN,
                    });
                }
                buf.put_u16(sections.len() as u16);
                for section in sections {
                    buf.put_u8(section.kind as u8);
                    buf.put_u64(section.blob);
                    wire::put_string(buf, &section.text)?;
                }
            }
            (FieldKind::Entity, Value::Entity(entity)) => entity.encode(buf)?,
            _ => return Err(ProtocolError::FieldTypeMismatch(field)),
        }
        Ok(())
    }

    /// Reads one value of this kind.
    pub fn decode(
        &self,
        reader: &mut Reader<'_>,
        options: &DecodeOptions,
    ) -> Result<Value, ProtocolError> {
        let value = match self {
            FieldKind::Uint(width) => Value::Uint(reader.uint(*width)?),
            FieldKind::Bool => Value::Bool(reader.bool()?),
            FieldKind::Color { alpha } => {
                let packed = reader.uint(Self::color_width(*alpha))?;
                Value::Color(Color::from_packed(packed, *alpha))
            }
            FieldKind::Str => Value::Str(reader.string()?),
            FieldKind::Numbers(width) => Value::Numbers(reader.numbers(*width)?),
            FieldKind::Strings => Value::Strings(reader.strings()?),
            FieldKind::Permissions => {
                let mut bytes = [0u8; PERMISSION_BYTES];
                bytes.copy_from_slice(reader.take(PERMISSION_BYTES)?);
                Value::Permissions(Permissions::from_bytes(bytes))
            }
            FieldKind::Blob => Value::Blob(reader.blob()?),
            FieldKind::Sections => {
                let count = reader.u16()? as usize;
                let mut sections = Vec::with_capacity(count.min(reader.remaining().len() / 11));
                for _ in 0..count {
                    let kind = SectionKind::try_from(reader.u8()?)?;
                    let blob = reader.u64()?;
                    let text = reader.string()?;
                    sections.push(MessageSection { kind, blob, text });
                }
                Value::Sections(sections)
            }
            FieldKind::Entity => {
                Value::Entity(Box::new(Entity::decode_with(reader, &options.nested()?)?))
            }
        };
        Ok(value)
    }

    /// Number of bytes the value at the start of `buf` occupies.
    ///
    /// Used to step over fields without materializing them. A nested
    /// entity has no length of its own, so measuring one decodes it.
    pub fn measure(&self, buf: &[u8], options: &DecodeOptions) -> Result<usize, ProtocolError> {
        let fixed = |width: usize| {
            if buf.len() < width {
                Err(ProtocolError::TruncatedInput {
                    needed: width,
                    available: buf.len(),
                })
            } else {
                Ok(width)
            }
        };
        match self {
            FieldKind::Uint(width) => fixed(*width),
            FieldKind::Bool => fixed(1),
            FieldKind::Color { alpha } => fixed(Self::color_width(*alpha)),
            FieldKind::Str | FieldKind::Blob => wire::string_len(buf),
            FieldKind::Numbers(width) => wire::numbers_len(buf, *width),
            FieldKind::Strings => wire::strings_len(buf),
            FieldKind::Permissions => fixed(PERMISSION_BYTES),
            FieldKind::Sections => {
                let mut reader = Reader::new(buf);
                let count = reader.u16()? as usize;
                for _ in 0..count {
                    reader.skip(1 + 8)?;
                    let len = reader.u16()? as usize;
                    reader.skip(len)?;
                }
                Ok(reader.position())
            }
            FieldKind::Entity => {
                let mut reader = Reader::new(buf);
                Entity::decode_with(&mut reader, &options.nested()?)?;
                Ok(reader.position())
            }
        }
    }
}

/// One named attribute of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    /// Wire id, present only in tagged mode.
    pub id: Option<u8>,
    /// Key the record uses to look the attribute up.
    pub slot: u8,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn tagged(id: u8, name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            id: Some(id),
            slot: id,
            kind,
        }
    }

    pub const fn positional(slot: u8, name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            id: None,
            slot,
            kind,
        }
    }
}

/// Placement mode of a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMode {
    Tagged,
    Positional,
}

/// What to do with a tagged field id the record does not model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownFields {
    /// Fail with `UnknownField`.
    Strict,
    /// Step over ids the schema lists as ignored. Ids with no descriptor
    /// at all still fail, since their length cannot be known.
    #[default]
    Skip,
}

impl fmt::Display for UnknownFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownFields::Strict => f.write_str("strict"),
            UnknownFields::Skip => f.write_str("skip"),
        }
    }
}

impl FromStr for UnknownFields {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(UnknownFields::Strict),
            "skip" => Ok(UnknownFields::Skip),
            other => Err(format!("unknown field policy {other:?} (expected strict or skip)")),
        }
    }
}

/// Field layout of one record type.
#[derive(Debug, Clone)]
pub struct Schema {
    name: &'static str,
    mode: FieldMode,
    fields: Vec<FieldSpec>,
    ignored: Vec<FieldSpec>,
}

impl Schema {
    /// Builds a schema, deriving its mode from the descriptors.
    pub fn new(name: &'static str, fields: Vec<FieldSpec>) -> Result<Self, ProtocolError> {
        let tagged = fields.iter().filter(|f| f.id.is_some()).count();
        let mode = if tagged == 0 {
            FieldMode::Positional
        } else if tagged == fields.len() {
            FieldMode::Tagged
        } else {
            return Err(ProtocolError::MixedFieldMode { record: name });
        };

        let schema = Self {
            name,
            mode,
            fields,
            ignored: Vec::new(),
        };
        schema.check_unique()?;
        Ok(schema)
    }

    /// Adds tagged ids that are recognized but not modelled.
    pub fn with_ignored(mut self, ignored: Vec<FieldSpec>) -> Result<Self, ProtocolError> {
        if ignored.is_empty() {
            return Ok(self);
        }
        if self.mode != FieldMode::Tagged || ignored.iter().any(|f| f.id.is_none()) {
            return Err(ProtocolError::MixedFieldMode { record: self.name });
        }
        self.ignored = ignored;
        self.check_unique()?;
        Ok(self)
    }

    /// Builds the schema of a built-in record type.
    ///
    /// # Panics
    ///
    /// Panics if the declaration is invalid. Record declarations are
    /// static, so this is a programming error that must surface the
    /// first time the type is used.
    pub fn register(
        name: &'static str,
        fields: Vec<FieldSpec>,
        ignored: Vec<FieldSpec>,
    ) -> Self {
        match Self::new(name, fields).and_then(|s| s.with_ignored(ignored)) {
            Ok(schema) => schema,
            Err(e) => panic!("invalid record declaration: {e}"),
        }
    }

    fn check_unique(&self) -> Result<(), ProtocolError> {
        let mut seen = [false; 256];
        for spec in self.fields.iter().chain(&self.ignored) {
            let key = spec.id.unwrap_or(spec.slot) as usize;
            if seen[key] {
                return Err(ProtocolError::DuplicateField {
                    record: self.name,
                    id: key as u8,
                });
            }
            seen[key] = true;
        }
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn mode(&self) -> FieldMode {
        self.mode
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Descriptor for a tagged field id.
    pub fn lookup(&self, id: u8) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.id == Some(id))
    }

    pub fn ignored(&self, id: u8) -> Option<&FieldSpec> {
        self.ignored.iter().find(|f| f.id == Some(id))
    }

    /// Wire id of the named field.
    pub fn id_of(&self, name: &str) -> Option<u8> {
        self.fields.iter().find(|f| f.name == name).and_then(|f| f.id)
    }
}

/// A type whose attributes are described by a [`Schema`].
pub trait Record: Default {
    fn schema() -> &'static Schema;

    /// Attribute stored under `slot`, or `None` when absent.
    fn get(&self, slot: u8) -> Option<Value>;

    fn set(&mut self, slot: u8, value: Value) -> Result<(), ProtocolError>;
}

/// Deepest chain of entities nested inside entity fields that a decode
/// will follow. The top-level record sits at depth 0.
pub const MAX_NESTING_DEPTH: usize = 8;

/// Options for [`decode_record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// A one-byte field count precedes the fields.
    pub include_count: bool,
    /// Stop after this many fields (tagged mode only).
    pub field_limit: Option<usize>,
    pub unknown_fields: UnknownFields,
    /// Nesting level of the record being decoded.
    pub depth: usize,
}

impl DecodeOptions {
    pub fn tagged(unknown_fields: UnknownFields) -> Self {
        Self {
            include_count: true,
            field_limit: None,
            unknown_fields,
            depth: 0,
        }
    }

    pub fn positional(unknown_fields: UnknownFields) -> Self {
        Self {
            include_count: false,
            field_limit: None,
            unknown_fields,
            depth: 0,
        }
    }

    pub fn with_field_limit(mut self, limit: usize) -> Self {
        self.field_limit = Some(limit);
        self
    }

    /// Options for an entity held in a field of the current record.
    ///
    /// Nested entities always carry their field count and are read in
    /// full, whatever limit applies to the outer record.
    pub fn nested(&self) -> Result<Self, ProtocolError> {
        let depth = self.depth + 1;
        if depth > MAX_NESTING_DEPTH {
            return Err(ProtocolError::NestingTooDeep {
                max: MAX_NESTING_DEPTH,
            });
        }
        Ok(Self {
            depth,
            ..Self::tagged(self.unknown_fields)
        })
    }
}

/// Writes one field: `[id][value]` in tagged mode, `[value]` otherwise.
pub fn encode_one(spec: &FieldSpec, value: &Value, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    if let Some(id) = spec.id {
        buf.put_u8(id);
    }
    spec.kind.encode(spec.name, value, buf)
}

/// Writes every present attribute of `record`, returning how many were
/// written. Positional records must have every attribute present.
pub fn encode_record<R: Record>(
    record: &R,
    buf: &mut BytesMut,
    include_count: bool,
) -> Result<usize, ProtocolError> {
    let schema = R::schema();
    let count_at = buf.len();
    if include_count {
        buf.put_u8(0);
    }

    let mut emitted = 0;
    for spec in schema.fields() {
        match record.get(spec.slot) {
            Some(value) => {
                encode_one(spec, &value, buf)?;
                emitted += 1;
            }
            None if schema.mode() == FieldMode::Positional => {
                return Err(ProtocolError::MissingField(spec.name));
            }
            None => {}
        }
    }

    if include_count {
        buf[count_at] = u8::try_from(emitted).map_err(|_| ProtocolError::LengthOverflow {
            len: emitted,
            max: u8::MAX as usize,
        })?;
    }
    Ok(emitted)
}

/// Reads a record from `reader`, leaving it positioned after the last
/// field consumed.
pub fn decode_record<R: Record>(
    reader: &mut Reader<'_>,
    options: &DecodeOptions,
) -> Result<R, ProtocolError> {
    let schema = R::schema();
    match schema.mode() {
        FieldMode::Tagged => decode_tagged(schema, reader, options),
        FieldMode::Positional => decode_positional(schema, reader, options),
    }
}

fn decode_tagged<R: Record>(
    schema: &Schema,
    reader: &mut Reader<'_>,
    options: &DecodeOptions,
) -> Result<R, ProtocolError> {
    let declared = if options.include_count {
        Some(reader.u8()? as usize)
    } else {
        None
    };
    let budget = match (declared, options.field_limit) {
        (Some(count), Some(limit)) => count.min(limit),
        (Some(count), None) => count,
        (None, Some(limit)) => limit,
        (None, None) => usize::MAX,
    };

    let mut record = R::default();
    let mut decoded = 0;
    while decoded < budget {
        if declared.is_none() && reader.is_empty() {
            break;
        }
        let id = reader.u8()?;
        if let Some(spec) = schema.lookup(id) {
            let value = spec.kind.decode(reader, options)?;
            record.set(spec.slot, value)?;
        } else {
            match (schema.ignored(id), options.unknown_fields) {
                (Some(spec), UnknownFields::Skip) => {
                    let len = spec.kind.measure(reader.remaining(), options)?;
                    reader.skip(len)?;
                }
                _ => {
                    return Err(ProtocolError::UnknownField {
                        record: schema.name(),
                        id,
                    })
                }
            }
        }
        decoded += 1;
    }
    Ok(record)
}

fn decode_positional<R: Record>(
    schema: &Schema,
    reader: &mut Reader<'_>,
    options: &DecodeOptions,
) -> Result<R, ProtocolError> {
    if options.field_limit.is_some() {
        return Err(ProtocolError::FieldLimitUnsupported {
            record: schema.name(),
        });
    }
    let mut record = R::default();
    for spec in schema.fields() {
        let value = spec.kind.decode(reader, options)?;
        record.set(spec.slot, value)?;
    }
    Ok(record)
}

/// Declares a tagged entity record.
///
/// Field id 0 is always the `u64` identifier; every other attribute is
/// optional. An `ignore` block lists ids the server may send that the
/// record does not keep.
macro_rules! entity_record {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$fmeta:meta])* $id:literal => $field:ident : $ty:ty = $kind:expr, )*
        }
        $( ignore { $( $iid:literal => $iname:literal = $ikind:expr, )* } )?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
        pub struct $name {
            pub id: u64,
            $(
                $(#[$fmeta])*
                #[serde(skip_serializing_if = "Option::is_none")]
                pub $field: Option<$ty>,
            )*
        }

        impl $name {
            /// A record carrying only its id.
            pub fn new(id: u64) -> Self {
                Self {
                    id,
                    ..Default::default()
                }
            }
        }

        impl $crate::field::Record for $name {
            fn schema() -> &'static $crate::field::Schema {
                static SCHEMA: std::sync::OnceLock<$crate::field::Schema> =
                    std::sync::OnceLock::new();
                SCHEMA.get_or_init(|| {
                    $crate::field::Schema::register(
                        stringify!($name),
                        vec![
                            $crate::field::FieldSpec::tagged(
                                0,
                                "id",
                                $crate::field::FieldKind::Uint(8),
                            ),
                            $( $crate::field::FieldSpec::tagged($id, stringify!($field), $kind), )*
                        ],
                        vec![
                            $($( $crate::field::FieldSpec::tagged($iid, $iname, $ikind), )*)?
                        ],
                    )
                })
            }

            fn get(&self, slot: u8) -> Option<$crate::value::Value> {
                use $crate::value::FieldValue;
                match slot {
                    0 => Some(self.id.to_value()),
                    $( $id => self.$field.as_ref().map(FieldValue::to_value), )*
                    _ => None,
                }
            }

            fn set(
                &mut self,
                slot: u8,
                value: $crate::value::Value,
            ) -> Result<(), $crate::error::ProtocolError> {
                match slot {
                    0 => self.id = $crate::value::convert(value, "id")?,
                    $( $id => self.$field = Some($crate::value::convert(value, stringify!($field))?), )*
                    _ => {
                        return Err($crate::error::ProtocolError::UnknownField {
                            record: stringify!($name),
                            id: slot,
                        })
                    }
                }
                Ok(())
            }
        }

        impl $crate::value::FieldValue for $name {
            fn to_value(&self) -> $crate::value::Value {
                $crate::value::Value::Entity(Box::new($crate::entity::Entity::$name(self.clone())))
            }

            fn from_value(value: $crate::value::Value) -> Option<Self> {
                match value {
                    $crate::value::Value::Entity(entity) => match *entity {
                        $crate::entity::Entity::$name(inner) => Some(inner),
                        _ => None,
                    },
                    _ => None,
                }
            }
        }

        impl From<$name> for $crate::entity::Entity {
            fn from(value: $name) -> Self {
                $crate::entity::Entity::$name(value)
            }
        }
    };
}

/// Declares a positional packet payload. Every attribute is required and
/// is written in declaration order.
macro_rules! packet_record {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$fmeta:meta])* $slot:literal => $field:ident : $ty:ty = $kind:expr, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl $crate::field::Record for $name {
            fn schema() -> &'static $crate::field::Schema {
                static SCHEMA: std::sync::OnceLock<$crate::field::Schema> =
                    std::sync::OnceLock::new();
                SCHEMA.get_or_init(|| {
                    $crate::field::Schema::register(
                        stringify!($name),
                        vec![
                            $( $crate::field::FieldSpec::positional($slot, stringify!($field), $kind), )*
                        ],
                        Vec::new(),
                    )
                })
            }

            fn get(&self, slot: u8) -> Option<$crate::value::Value> {
                use $crate::value::FieldValue;
                match slot {
                    $( $slot => Some(self.$field.to_value()), )*
                    _ => None,
                }
            }

            fn set(
                &mut self,
                slot: u8,
                value: $crate::value::Value,
            ) -> Result<(), $crate::error::ProtocolError> {
                match slot {
                    $( $slot => self.$field = $crate::value::convert(value, stringify!($field))?, )*
                    _ => {
                        return Err($crate::error::ProtocolError::UnknownField {
                            record: stringify!($name),
                            id: slot,
                        })
                    }
                }
                Ok(())
            }
        }
    };
}

pub(crate) use entity_record;
pub(crate) use packet_record;
