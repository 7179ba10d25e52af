//! Envelope-level serialization primitives.
//!
//! The grid treats user values as opaque byte payloads; this module supplies
//! the little-endian readers and writers those payloads are built from, the
//! [`Data`] wrapper for a serialized value, and the partitioning hash.

mod data_input;
mod data_output;
mod traits;

pub use data_input::{DataInput, ObjectDataInput};
pub use data_output::{DataOutput, ObjectDataOutput};
pub use traits::{Deserializable, Serializable};

use crate::error::Result;

/// An opaque serialized value.
///
/// `Data` is the unit the near-cache, invocation payloads and invalidation
/// events traffic in. Its byte form is the authoritative identity: two
/// values are the same key iff their serialized forms are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Data(Vec<u8>);

impl Data {
    /// Creates a `Data` from raw serialized bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Serializes a value into its `Data` form.
    pub fn from_value<T: Serializable>(value: &T) -> Result<Self> {
        Ok(Self(value.to_bytes()?))
    }

    /// Deserializes this `Data` back into a value.
    pub fn to_value<T: Deserializable>(&self) -> Result<T> {
        T::from_bytes(&self.0)
    }

    /// Returns the serialized bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Returns the length of the serialized form in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the serialized form is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the partitioning hash of this value.
    ///
    /// The partition id is derived from this hash by the partition service:
    /// `(hash & i64::MAX) % partition_count`.
    pub fn partition_hash(&self) -> i32 {
        murmur_hash3_x86_32(&self.0, 0x01000193)
    }
}

impl From<Vec<u8>> for Data {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Data {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// MurmurHash3 x86 32-bit implementation.
fn murmur_hash3_x86_32(data: &[u8], seed: u32) -> i32 {
    const C1: u32 = 0xcc9e2d51;
    const C2: u32 = 0x1b873593;

    let len = data.len();
    let mut h1 = seed;
    let nblocks = len / 4;

    for i in 0..nblocks {
        let offset = i * 4;
        let k1 = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]);

        let k1 = k1.wrapping_mul(C1);
        let k1 = k1.rotate_left(15);
        let k1 = k1.wrapping_mul(C2);

        h1 ^= k1;
        h1 = h1.rotate_left(13);
        h1 = h1.wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let tail = &data[nblocks * 4..];
    let mut k1: u32 = 0;

    match tail.len() {
        3 => {
            k1 ^= (tail[2] as u32) << 16;
            k1 ^= (tail[1] as u32) << 8;
            k1 ^= tail[0] as u32;
            k1 = k1.wrapping_mul(C1);
            k1 = k1.rotate_left(15);
            k1 = k1.wrapping_mul(C2);
            h1 ^= k1;
        }
        2 => {
            k1 ^= (tail[1] as u32) << 8;
            k1 ^= tail[0] as u32;
            k1 = k1.wrapping_mul(C1);
            k1 = k1.rotate_left(15);
            k1 = k1.wrapping_mul(C2);
            h1 ^= k1;
        }
        1 => {
            k1 ^= tail[0] as u32;
            k1 = k1.wrapping_mul(C1);
            k1 = k1.rotate_left(15);
            k1 = k1.wrapping_mul(C2);
            h1 ^= k1;
        }
        _ => {}
    }

    h1 ^= len as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85ebca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2ae35);
    h1 ^= h1 >> 16;

    h1 as i32
}
