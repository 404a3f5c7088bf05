//! Entity fetch requests.
//!
//! An `EntityGet` payload is a list of requests:
//!
//! ```text
//! [count:u16] count × [type:u16][id:u64][flags:u8][pagination?][context?]
//! pagination (flags bit 0): [field:u16][direction:u8][from:u64][max:u8]
//! context    (flags bit 1): [type:u16][id:u64]
//! ```

use crate::entity::EntityType;
use crate::error::ProtocolError;
use crate::wire::MAX_PREFIXED_LEN;
use bytes::{BufMut, BytesMut};
use serde::Serialize;

const FLAG_PAGINATION: u8 = 0x01;
const FLAG_CONTEXT: u8 = 0x02;

/// Direction to page a list field in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PageDirection {
    Older = 0,
    Newer = 1,
}

impl PageDirection {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(PageDirection::Older),
            1 => Some(PageDirection::Newer),
            _ => None,
        }
    }
}

/// Fetch a window of a list field instead of the whole entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub field: u16,
    pub direction: PageDirection,
    /// Id to page from, exclusive.
    pub from: u64,
    pub max_count: u8,
}

/// Entity the request is made on behalf of, e.g. the group whose member
/// list is being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntityContext {
    pub entity_type: EntityType,
    pub id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntityGetRequest {
    pub entity_type: EntityType,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<EntityContext>,
}

impl EntityGetRequest {
    pub fn new(entity_type: EntityType, id: u64) -> Self {
        Self {
            entity_type,
            id,
            pagination: None,
            context: None,
        }
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    pub fn with_context(mut self, entity_type: EntityType, id: u64) -> Self {
        self.context = Some(EntityContext { entity_type, id });
        self
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.pagination.is_some() {
            flags |= FLAG_PAGINATION;
        }
        if self.context.is_some() {
            flags |= FLAG_CONTEXT;
        }
        flags
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.entity_type as u16);
        buf.put_u64(self.id);
        buf.put_u8(self.flags());
        if let Some(p) = &self.pagination {
            buf.put_u16(p.field);
            buf.put_u8(p.direction as u8);
            buf.put_u64(p.from);
            buf.put_u8(p.max_count);
        }
        if let Some(c) = &self.context {
            buf.put_u16(c.entity_type as u16);
            buf.put_u64(c.id);
        }
    }
}

/// Writes a request list.
pub fn encode_requests(requests: &[EntityGetRequest], buf: &mut BytesMut) -> Result<(), ProtocolError> {
    if requests.len() > MAX_PREFIXED_LEN {
        return Err(ProtocolError::LengthOverflow {
            len: requests.len(),
            max: MAX_PREFIXED_LEN,
        });
    }
    buf.put_u16(requests.len() as u16);
    for request in requests {
        request.encode(buf);
    }
    Ok(())
}
