//! Data input traits and implementations for envelope-level payloads.

use crate::error::{GridError, Result};
use bytes::Buf;
use std::io::Cursor;
use uuid::Uuid;

/// Trait for reading primitive values from the grid wire format.
///
/// All multi-byte values are read in little-endian byte order, matching the
/// frame envelope.
pub trait DataInput {
    /// Reads a single byte (i8).
    fn read_byte(&mut self) -> Result<i8>;

    /// Reads a boolean from a single byte.
    fn read_bool(&mut self) -> Result<bool>;

    /// Reads a 16-bit signed integer.
    fn read_short(&mut self) -> Result<i16>;

    /// Reads a 32-bit signed integer.
    fn read_int(&mut self) -> Result<i32>;

    /// Reads a 64-bit signed integer.
    fn read_long(&mut self) -> Result<i64>;

    /// Reads a 32-bit floating point value.
    fn read_float(&mut self) -> Result<f32>;

    /// Reads a 64-bit floating point value.
    fn read_double(&mut self) -> Result<f64>;

    /// Reads the specified number of raw bytes.
    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>>;

    /// Reads a length-prefixed byte array.
    fn read_byte_array(&mut self) -> Result<Vec<u8>>;

    /// Reads a length-prefixed UTF-8 string.
    fn read_string(&mut self) -> Result<String>;

    /// Reads an optional string written by `write_nullable_string`.
    fn read_nullable_string(&mut self) -> Result<Option<String>>;

    /// Reads a uuid from 16 raw bytes.
    fn read_uuid(&mut self) -> Result<Uuid>;
}

/// A buffer-based implementation of `DataInput`.
#[derive(Debug)]
pub struct ObjectDataInput<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ObjectDataInput<'a> {
    /// Creates a new `ObjectDataInput` from the given byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    /// Returns the number of bytes remaining to be read.
    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    fn ensure_remaining(&self, n: usize) -> Result<()> {
        if self.cursor.remaining() < n {
            Err(GridError::Serialization(format!(
                "insufficient data: need {} bytes, have {}",
                n,
                self.cursor.remaining()
            )))
        } else {
            Ok(())
        }
    }
}

impl DataInput for ObjectDataInput<'_> {
    fn read_byte(&mut self) -> Result<i8> {
        self.ensure_remaining(1)?;
        Ok(self.cursor.get_i8())
    }

    fn read_bool(&mut self) -> Result<bool> {
        self.ensure_remaining(1)?;
        Ok(self.cursor.get_u8() != 0)
    }

    fn read_short(&mut self) -> Result<i16> {
        self.ensure_remaining(2)?;
        Ok(self.cursor.get_i16_le())
    }

    fn read_int(&mut self) -> Result<i32> {
        self.ensure_remaining(4)?;
        Ok(self.cursor.get_i32_le())
    }

    fn read_long(&mut self) -> Result<i64> {
        self.ensure_remaining(8)?;
        Ok(self.cursor.get_i64_le())
    }

    fn read_float(&mut self) -> Result<f32> {
        self.ensure_remaining(4)?;
        Ok(self.cursor.get_f32_le())
    }

    fn read_double(&mut self) -> Result<f64> {
        self.ensure_remaining(8)?;
        Ok(self.cursor.get_f64_le())
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.ensure_remaining(len)?;
        let mut buf = vec![0u8; len];
        self.cursor.copy_to_slice(&mut buf);
        Ok(buf)
    }

    fn read_byte_array(&mut self) -> Result<Vec<u8>> {
        let len = self.read_int()?;
        if len < 0 {
            return Err(GridError::Serialization(format!(
                "negative array length: {}",
                len
            )));
        }
        self.read_bytes(len as usize)
    }

    fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_byte_array()?;
        String::from_utf8(bytes)
            .map_err(|e| GridError::Serialization(format!("invalid UTF-8 string: {}", e)))
    }

    fn read_nullable_string(&mut self) -> Result<Option<String>> {
        if self.read_bool()? {
            Ok(Some(self.read_string()?))
        } else {
            Ok(None)
        }
    }

    fn read_uuid(&mut self) -> Result<Uuid> {
        let bytes = self.read_bytes(16)?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(&bytes);
        Ok(Uuid::from_bytes(raw))
    }
}
