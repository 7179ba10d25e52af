//! Client-side near-cache: a local shadow of a remote data structure with
//! TTL/max-idle expiration, size-bounded eviction and server-driven
//! invalidation.

mod cache;
mod config;
mod invalidation;

pub use cache::{NearCache, NearCacheStats, NOT_RESERVED};
pub use config::{
    EvictionCandidate, EvictionComparator, EvictionPolicy, InMemoryFormat, NearCacheConfig,
    NearCacheConfigBuilder,
};
pub use invalidation::{InvalidationEvent, InvalidationOutcome, SequenceTracker};

use gridcast_core::{Data, Deserializable, Result};

/// Estimates the heap footprint of a cached key or value.
pub trait MemoryCost {
    /// Returns the approximate size in bytes.
    fn memory_cost(&self) -> usize;
}

impl MemoryCost for Data {
    fn memory_cost(&self) -> usize {
        self.len()
    }
}

impl MemoryCost for String {
    fn memory_cost(&self) -> usize {
        self.len()
    }
}

impl MemoryCost for Vec<u8> {
    fn memory_cost(&self) -> usize {
        self.len()
    }
}

impl MemoryCost for i32 {
    fn memory_cost(&self) -> usize {
        std::mem::size_of::<i32>()
    }
}

impl MemoryCost for i64 {
    fn memory_cost(&self) -> usize {
        std::mem::size_of::<i64>()
    }
}

/// A cached value in its configured in-memory format.
///
/// The format is the value-materialization half of the cache strategy: the
/// binary form stores the authoritative serialized bytes and deserializes on
/// every read; the object form stores the deserialized value and clones.
#[derive(Debug, Clone)]
pub enum CachedValue<V> {
    /// The serialized byte form.
    Binary(Data),
    /// The deserialized object.
    Object(V),
}

impl<V> CachedValue<V> {
    /// Wraps a serialized value according to the configured format.
    pub fn from_data(data: Data, format: InMemoryFormat) -> Result<Self>
    where
        V: Deserializable,
    {
        match format {
            InMemoryFormat::Binary => Ok(Self::Binary(data)),
            InMemoryFormat::Object => Ok(Self::Object(data.to_value()?)),
        }
    }

    /// Materializes the user-facing value.
    pub fn materialize(&self) -> Result<V>
    where
        V: Clone + Deserializable,
    {
        match self {
            Self::Binary(data) => data.to_value(),
            Self::Object(value) => Ok(value.clone()),
        }
    }
}

impl<V> MemoryCost for CachedValue<V> {
    fn memory_cost(&self) -> usize {
        match self {
            Self::Binary(data) => data.len(),
            Self::Object(_) => std::mem::size_of::<V>(),
        }
    }
}
