//! Hand-rolled message writer on top of `prost::encoding`.
//!
//! Fields are written in call order, so callers control the exact byte
//! layout. The checkin server is sensitive to it.

use super::MAX_FIELD_NUMBER;
use bytes::{BufMut, Bytes, BytesMut};
use prost::encoding::{encode_key, encode_varint, WireType};

/// Accumulates the fields of one protobuf message
#[derive(Debug, Default, Clone)]
pub struct MessageWriter {
    buf: BytesMut,
}

impl MessageWriter {
    /// Creates an empty message
    pub fn new() -> Self {
        Self::default()
    }

    fn key(&mut self, field: u32, wire_type: WireType) {
        debug_assert!(
            (1..=MAX_FIELD_NUMBER).contains(&field),
            "field number {field} out of range"
        );
        encode_key(field, wire_type, &mut self.buf);
    }

    /// Writes a length-delimited byte string
    pub fn bytes(&mut self, field: u32, value: &[u8]) -> &mut Self {
        self.key(field, WireType::LengthDelimited);
        encode_varint(value.len() as u64, &mut self.buf);
        self.buf.put_slice(value);
        self
    }

    /// Writes a UTF-8 string
    pub fn string(&mut self, field: u32, value: &str) -> &mut Self {
        self.bytes(field, value.as_bytes())
    }

    /// Writes an `int64` varint
    pub fn int64(&mut self, field: u32, value: i64) -> &mut Self {
        self.key(field, WireType::Varint);
        encode_varint(value as u64, &mut self.buf);
        self
    }

    /// Writes an `int32` varint (negative values are sign-extended to ten bytes)
    pub fn int32(&mut self, field: u32, value: i32) -> &mut Self {
        self.int64(field, i64::from(value))
    }

    /// Writes a `bool` varint
    pub fn bool(&mut self, field: u32, value: bool) -> &mut Self {
        self.key(field, WireType::Varint);
        encode_varint(u64::from(value), &mut self.buf);
        self
    }

    /// Writes a little-endian `fixed64`
    pub fn fixed64(&mut self, field: u32, value: u64) -> &mut Self {
        self.key(field, WireType::SixtyFourBit);
        self.buf.put_u64_le(value);
        self
    }

    /// Writes an embedded message
    pub fn message(&mut self, field: u32, message: &MessageWriter) -> &mut Self {
        self.bytes(field, &message.buf)
    }

    /// Encoded length so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Freezes the message into its final bytes
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}
