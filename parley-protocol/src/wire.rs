//! Primitive value encoding.
//!
//! All integers are big-endian. Strings and lists carry a `u16` prefix:
//!
//! ```text
//! str:     [len:u16][utf8 bytes...]
//! numlist: [count:u16][count × fixed-width element]
//! strlist: [count:u16][count × str]
//! blob:    [len:u16][bytes...]
//! ```
//!
//! Reads go through [`Reader`], which bounds every slice against the
//! buffer it was given and fails with `TruncatedInput` instead of
//! producing zero-filled values.

use crate::error::ProtocolError;
use bytes::{BufMut, BytesMut};

/// Largest length or count a `u16` prefix can describe.
pub const MAX_PREFIXED_LEN: usize = u16::MAX as usize;

/// Bounded cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Starts reading at `pos`. A position past the end behaves like an
    /// empty reader.
    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        Self {
            buf,
            pos: pos.min(buf.len()),
        }
    }

    /// Current offset into the underlying buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Consumes exactly `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let available = self.buf.len() - self.pos;
        if n > available {
            return Err(ProtocolError::TruncatedInput {
                needed: n,
                available,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), ProtocolError> {
        self.take(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(self.uint(2)? as u16)
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(self.uint(4)? as u32)
    }

    pub fn u64(&mut self) -> Result<u64, ProtocolError> {
        self.uint(8)
    }

    /// Reads an unsigned integer of `width` bytes (1..=8).
    pub fn uint(&mut self, width: usize) -> Result<u64, ProtocolError> {
        debug_assert!((1..=8).contains(&width), "integer width {width}");
        Ok(decode_uint(self.take(width)?))
    }

    pub fn bool(&mut self) -> Result<bool, ProtocolError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ProtocolError::InvalidBool(other)),
        }
    }

    pub fn string(&mut self) -> Result<String, ProtocolError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }

    pub fn numbers(&mut self, width: usize) -> Result<Vec<u64>, ProtocolError> {
        let count = self.u16()? as usize;
        // Bound the whole run up front so a bogus count cannot allocate.
        let run = self.take(count * width)?;
        Ok(run.chunks_exact(width).map(decode_uint).collect())
    }

    pub fn strings(&mut self) -> Result<Vec<String>, ProtocolError> {
        let count = self.u16()? as usize;
        let mut out = Vec::with_capacity(count.min(self.remaining().len() / 2));
        for _ in 0..count {
            out.push(self.string()?);
        }
        Ok(out)
    }

    pub fn blob(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let len = self.u16()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}

/// Decodes a big-endian unsigned integer from up to 8 bytes.
pub fn decode_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

/// Writes the low `width` bytes of `value`, big-endian.
///
/// The value is not range-checked: callers pick a width that fits.
pub fn put_uint(buf: &mut BytesMut, value: u64, width: usize) {
    buf.put_uint(value, width);
}

pub fn put_bool(buf: &mut BytesMut, value: bool) {
    buf.put_u8(value as u8);
}

fn put_len(buf: &mut BytesMut, len: usize) -> Result<(), ProtocolError> {
    if len > MAX_PREFIXED_LEN {
        return Err(ProtocolError::LengthOverflow {
            len,
            max: MAX_PREFIXED_LEN,
        });
    }
    buf.put_u16(len as u16);
    Ok(())
}

pub fn put_string(buf: &mut BytesMut, value: &str) -> Result<(), ProtocolError> {
    put_len(buf, value.len())?;
    buf.put_slice(value.as_bytes());
    Ok(())
}

pub fn put_numbers(buf: &mut BytesMut, values: &[u64], width: usize) -> Result<(), ProtocolError> {
    put_len(buf, values.len())?;
    for value in values {
        put_uint(buf, *value, width);
    }
    Ok(())
}

pub fn put_strings(buf: &mut BytesMut, values: &[String]) -> Result<(), ProtocolError> {
    put_len(buf, values.len())?;
    for value in values {
        put_string(buf, value)?;
    }
    Ok(())
}

pub fn put_blob(buf: &mut BytesMut, value: &[u8]) -> Result<(), ProtocolError> {
    put_len(buf, value.len())?;
    buf.put_slice(value);
    Ok(())
}

/// Length of the string at the start of `buf`, prefix included.
pub fn string_len(buf: &[u8]) -> Result<usize, ProtocolError> {
    let mut reader = Reader::new(buf);
    let len = reader.u16()? as usize;
    reader.skip(len)?;
    Ok(reader.position())
}

/// Length of the number list at the start of `buf`, prefix included.
pub fn numbers_len(buf: &[u8], width: usize) -> Result<usize, ProtocolError> {
    let mut reader = Reader::new(buf);
    let count = reader.u16()? as usize;
    reader.skip(count * width)?;
    Ok(reader.position())
}

/// Length of the string list at the start of `buf`, prefix included.
pub fn strings_len(buf: &[u8]) -> Result<usize, ProtocolError> {
    let mut reader = Reader::new(buf);
    let count = reader.u16()? as usize;
    for _ in 0..count {
        let len = reader.u16()? as usize;
        reader.skip(len)?;
    }
    Ok(reader.position())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint_widths() {
        let mut buf = BytesMut::new();
        put_uint(&mut buf, 0x0102_0304, 4);
        put_uint(&mut buf, 0xAB, 1);
        put_uint(&mut buf, 0x0A0B_0C0D_0E0F, 6);
        assert_eq!(
            buf.as_ref(),
            &[1, 2, 3, 4, 0xAB, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F]
        );

        let mut reader = Reader::new(&buf);
        assert_eq!(reader.u32().unwrap(), 0x0102_0304);
        assert_eq!(reader.u8().unwrap(), 0xAB);
        assert_eq!(reader.uint(6).unwrap(), 0x0A0B_0C0D_0E0F);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_string_counts_bytes() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "héllo").unwrap();
        // 'é' is two bytes in UTF-8
        assert_eq!(&buf[..2], &[0, 6]);
        assert_eq!(string_len(&buf).unwrap(), 8);

        let mut reader = Reader::new(&buf);
        assert_eq!(reader.string().unwrap(), "héllo");
    }

    #[test]
    fn test_string_stops_at_declared_length() {
        let buf = [0u8, 2, b'h', b'i', b'!', b'!'];
        let mut reader = Reader::new(&buf);
        assert_eq!(reader.string().unwrap(), "hi");
        assert_eq!(reader.position(), 4);
    }

    #[test]
    fn test_truncated_string() {
        let buf = [0u8, 5, b'a', b'b'];
        let err = Reader::new(&buf).string().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::TruncatedInput {
                needed: 5,
                available: 2
            }
        ));
        assert!(string_len(&buf).unwrap_err().is_truncation());
    }

    #[test]
    fn test_invalid_utf8() {
        let buf = [0u8, 2, 0xC3, 0x28];
        let err = Reader::new(&buf).string().unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidUtf8));
    }

    #[test]
    fn test_invalid_bool() {
        let err = Reader::new(&[2]).bool().unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidBool(2)));
    }

    #[test]
    fn test_number_list() {
        let mut buf = BytesMut::new();
        put_numbers(&mut buf, &[1, 300, 70_000], 4).unwrap();
        assert_eq!(buf.len(), 2 + 3 * 4);
        assert_eq!(numbers_len(&buf, 4).unwrap(), buf.len());
        assert_eq!(Reader::new(&buf).numbers(4).unwrap(), vec![1, 300, 70_000]);
    }

    #[test]
    fn test_number_list_bogus_count() {
        // Claims 0xFFFF elements but carries one.
        let buf = [0xFFu8, 0xFF, 0, 0, 0, 0, 0, 0, 0, 1];
        let err = Reader::new(&buf).numbers(8).unwrap_err();
        assert!(err.is_truncation());
    }

    #[test]
    fn test_string_list() {
        let values = vec!["a".to_string(), String::new(), "xyz".to_string()];
        let mut buf = BytesMut::new();
        put_strings(&mut buf, &values).unwrap();
        assert_eq!(strings_len(&buf).unwrap(), buf.len());
        assert_eq!(Reader::new(&buf).strings().unwrap(), values);
    }

    #[test]
    fn test_length_overflow() {
        let long = "x".repeat(MAX_PREFIXED_LEN + 1);
        let err = put_string(&mut BytesMut::new(), &long).unwrap_err();
        assert!(matches!(err, ProtocolError::LengthOverflow { .. }));
    }

    #[test]
    fn test_reader_at_past_end() {
        let buf = [1u8, 2, 3];
        let mut reader = Reader::at(&buf, 10);
        assert!(reader.is_empty());
        assert!(reader.u8().unwrap_err().is_truncation());
    }
}
