//! Data output traits and implementations for envelope-level payloads.

use crate::error::Result;
use bytes::{BufMut, BytesMut};
use uuid::Uuid;

/// Trait for writing primitive values in the grid wire format.
///
/// All multi-byte values are written in little-endian byte order, matching
/// the frame envelope.
pub trait DataOutput {
    /// Writes a single byte (i8).
    fn write_byte(&mut self, v: i8) -> Result<()>;

    /// Writes a boolean as a single byte (0 for false, 1 for true).
    fn write_bool(&mut self, v: bool) -> Result<()>;

    /// Writes a 16-bit signed integer.
    fn write_short(&mut self, v: i16) -> Result<()>;

    /// Writes a 32-bit signed integer.
    fn write_int(&mut self, v: i32) -> Result<()>;

    /// Writes a 64-bit signed integer.
    fn write_long(&mut self, v: i64) -> Result<()>;

    /// Writes a 32-bit floating point value.
    fn write_float(&mut self, v: f32) -> Result<()>;

    /// Writes a 64-bit floating point value.
    fn write_double(&mut self, v: f64) -> Result<()>;

    /// Writes raw bytes without a length prefix.
    fn write_bytes(&mut self, v: &[u8]) -> Result<()>;

    /// Writes a length-prefixed byte array.
    fn write_byte_array(&mut self, v: &[u8]) -> Result<()>;

    /// Writes a length-prefixed UTF-8 string.
    fn write_string(&mut self, v: &str) -> Result<()>;

    /// Writes an optional string: a presence byte followed by the string.
    fn write_nullable_string(&mut self, v: Option<&str>) -> Result<()>;

    /// Writes a uuid as 16 raw bytes.
    fn write_uuid(&mut self, v: Uuid) -> Result<()>;
}

/// A buffer-based implementation of `DataOutput`.
#[derive(Debug)]
pub struct ObjectDataOutput {
    buffer: BytesMut,
}

impl ObjectDataOutput {
    /// Creates a new `ObjectDataOutput` with default capacity.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
        }
    }

    /// Creates a new `ObjectDataOutput` with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Returns the written bytes as a slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the output and returns the written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer.to_vec()
    }

    /// Consumes the output and returns the underlying buffer.
    pub fn into_buffer(self) -> BytesMut {
        self.buffer
    }

    /// Returns the number of bytes written.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no bytes have been written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for ObjectDataOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl DataOutput for ObjectDataOutput {
    fn write_byte(&mut self, v: i8) -> Result<()> {
        self.buffer.put_i8(v);
        Ok(())
    }

    fn write_bool(&mut self, v: bool) -> Result<()> {
        self.buffer.put_u8(v as u8);
        Ok(())
    }

    fn write_short(&mut self, v: i16) -> Result<()> {
        self.buffer.put_i16_le(v);
        Ok(())
    }

    fn write_int(&mut self, v: i32) -> Result<()> {
        self.buffer.put_i32_le(v);
        Ok(())
    }

    fn write_long(&mut self, v: i64) -> Result<()> {
        self.buffer.put_i64_le(v);
        Ok(())
    }

    fn write_float(&mut self, v: f32) -> Result<()> {
        self.buffer.put_f32_le(v);
        Ok(())
    }

    fn write_double(&mut self, v: f64) -> Result<()> {
        self.buffer.put_f64_le(v);
        Ok(())
    }

    fn write_bytes(&mut self, v: &[u8]) -> Result<()> {
        self.buffer.put_slice(v);
        Ok(())
    }

    fn write_byte_array(&mut self, v: &[u8]) -> Result<()> {
        self.write_int(v.len() as i32)?;
        self.buffer.put_slice(v);
        Ok(())
    }

    fn write_string(&mut self, v: &str) -> Result<()> {
        self.write_byte_array(v.as_bytes())
    }

    fn write_nullable_string(&mut self, v: Option<&str>) -> Result<()> {
        match v {
            Some(s) => {
                self.write_bool(true)?;
                self.write_string(s)
            }
            None => self.write_bool(false),
        }
    }

    fn write_uuid(&mut self, v: Uuid) -> Result<()> {
        self.buffer.put_slice(v.as_bytes());
        Ok(())
    }
}
