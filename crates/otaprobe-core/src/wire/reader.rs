//! Sequential field reader over a protobuf-encoded buffer.

use super::{WireType, MAX_FIELD_NUMBER};
use crate::error::ProtocolError;

/// A decoded field value, borrowing length-delimited payloads from the input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    /// Wire type 0
    Varint(u64),
    /// Wire type 1, little-endian
    Fixed64(u64),
    /// Wire type 2
    Bytes(&'a [u8]),
    /// Wire type 5, little-endian
    Fixed32(u32),
}

impl FieldValue<'_> {
    /// Returns the wire type this value was encoded with
    pub fn wire_type(&self) -> WireType {
        match self {
            FieldValue::Varint(_) => WireType::Varint,
            FieldValue::Fixed64(_) => WireType::I64,
            FieldValue::Bytes(_) => WireType::Len,
            FieldValue::Fixed32(_) => WireType::I32,
        }
    }
}

/// A single field read from the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field<'a> {
    /// Field number from the tag
    pub number: u32,
    /// Absolute offset of the tag within the outermost buffer
    pub offset: usize,
    /// Absolute offset of the value, past any length prefix
    pub payload_offset: usize,
    /// The field payload
    pub value: FieldValue<'a>,
}

/// Decode a varint from the given bytes.
///
/// `offset` is only used for error reporting. Returns the decoded value and
/// the number of bytes consumed.
pub fn decode_varint(data: &[u8], offset: usize) -> Result<(u64, usize), ProtocolError> {
    let mut result: u64 = 0;
    let mut shift = 0;

    for (i, &byte) in data.iter().enumerate() {
        if i >= 10 {
            // Varints are at most 10 bytes for a 64-bit value
            return Err(ProtocolError::MalformedVarint { offset });
        }

        result |= ((byte & 0x7F) as u64) << shift;
        shift += 7;

        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }

    Err(ProtocolError::MalformedVarint { offset })
}

/// Read one field from the front of `data`.
///
/// Returns the field and total bytes consumed (tag plus value).
pub fn read_field(data: &[u8], offset: usize) -> Result<(Field<'_>, usize), ProtocolError> {
    let (tag, tag_len) = decode_varint(data, offset)?;

    let wire_type = WireType::from_tag_bits((tag & 0x07) as u8, offset)?;
    let number = tag >> 3;

    if number == 0 || number > u64::from(MAX_FIELD_NUMBER) {
        return Err(ProtocolError::InvalidFieldNumber { offset, number });
    }

    let rest = &data[tag_len..];
    let value_offset = offset + tag_len;

    let mut payload_offset = value_offset;
    let (value, value_len) = match wire_type {
        WireType::Varint => {
            let (v, len) = decode_varint(rest, value_offset)?;
            (FieldValue::Varint(v), len)
        }
        WireType::I64 => {
            let bytes = take(rest, 8, value_offset)?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            (FieldValue::Fixed64(u64::from_le_bytes(buf)), 8)
        }
        WireType::Len => {
            let (length, length_len) = decode_varint(rest, value_offset)?;
            // Anything that doesn't fit in usize can't fit in the buffer either
            let length = usize::try_from(length).unwrap_or(usize::MAX);
            payload_offset += length_len;
            let payload = take(&rest[length_len..], length, payload_offset)?;
            (FieldValue::Bytes(payload), length_len + length)
        }
        WireType::I32 => {
            let bytes = take(rest, 4, value_offset)?;
            let mut buf = [0u8; 4];
            buf.copy_from_slice(bytes);
            (FieldValue::Fixed32(u32::from_le_bytes(buf)), 4)
        }
    };

    let field = Field {
        number: number as u32,
        offset,
        payload_offset,
        value,
    };
    Ok((field, tag_len + value_len))
}

fn take(data: &[u8], needed: usize, offset: usize) -> Result<&[u8], ProtocolError> {
    if needed > data.len() {
        return Err(ProtocolError::Truncated {
            offset,
            needed,
            remaining: data.len(),
        });
    }
    Ok(&data[..needed])
}

/// Iterates over the top-level fields of a message.
///
/// Yields at most one error; after a structural failure the rest of the
/// buffer cannot be framed, so iteration stops.
#[derive(Debug, Clone)]
pub struct FieldReader<'a> {
    data: &'a [u8],
    position: usize,
    base: usize,
}

impl<'a> FieldReader<'a> {
    /// Creates a reader over a whole buffer
    pub fn new(data: &'a [u8]) -> Self {
        Self::at(data, 0)
    }

    /// Creates a reader over an embedded message located at `base` in the outer buffer
    pub fn at(data: &'a [u8], base: usize) -> Self {
        Self {
            data,
            position: 0,
            base,
        }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.position
    }
}

impl<'a> Iterator for FieldReader<'a> {
    type Item = Result<Field<'a>, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.data.len() {
            return None;
        }

        match read_field(&self.data[self.position..], self.base + self.position) {
            Ok((field, len)) => {
                self.position += len;
                Some(Ok(field))
            }
            Err(e) => {
                self.position = self.data.len();
                Some(Err(e))
            }
        }
    }
}
