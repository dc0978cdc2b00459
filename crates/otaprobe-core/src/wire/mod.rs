//! Protobuf wire format primitives.
//!
//! The checkin protocol speaks plain protobuf, but we never hold a full
//! schema for it. This module provides just enough of the wire format to
//! write the request by hand and to walk the response field by field.
//!
//! ## Wire Format Overview
//!
//! Each protobuf field is encoded as:
//! - A varint "tag" containing the field number and wire type
//! - The field data (format depends on wire type)
//!
//! Wire types:
//! - 0: VARINT (int32, int64, uint32, uint64, bool, enum)
//! - 1: I64 (fixed64, sfixed64, double)
//! - 2: LEN (string, bytes, embedded messages)
//! - 5: I32 (fixed32, sfixed32, float)
//!
//! Groups (3 and 4) are deprecated and never appear in checkin traffic, so
//! they are rejected along with the unassigned values 6 and 7.

mod reader;
mod writer;

use crate::error::ProtocolError;

pub use reader::{decode_varint, read_field, Field, FieldReader, FieldValue};
pub use writer::MessageWriter;

/// Maximum valid protobuf field number (2^29 - 1)
pub const MAX_FIELD_NUMBER: u32 = 536_870_911;

/// Wire types understood by the checkin codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    /// Variable-length integer
    Varint = 0,
    /// 64-bit fixed-width
    I64 = 1,
    /// Length-delimited (strings, bytes, embedded messages)
    Len = 2,
    /// 32-bit fixed-width
    I32 = 5,
}

impl WireType {
    /// Decodes the low three bits of a tag
    pub fn from_tag_bits(bits: u8, offset: usize) -> Result<Self, ProtocolError> {
        match bits {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::I64),
            2 => Ok(WireType::Len),
            5 => Ok(WireType::I32),
            _ => Err(ProtocolError::UnsupportedWireType {
                offset,
                wire_type: bits,
            }),
        }
    }
}
