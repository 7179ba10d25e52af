//! Replicated map proxy.

use std::sync::Arc;

use gridcast_core::protocol::constants::{
    REPLICATED_MAP_GET, REPLICATED_MAP_PUT, REPLICATED_MAP_REMOVE, REPLICATED_MAP_SIZE,
};
use gridcast_core::{
    Data, DataOutput, Deserializable, Message, ObjectDataOutput, Result, Serializable,
};

use super::{decode_i32, decode_nullable_data};
use crate::invocation::{InvocationOptions, InvocationService, TargetPolicy};

/// A map replicated to every member.
///
/// Reads can be served by any member, so every operation routes to a random
/// live connection.
#[derive(Debug, Clone)]
pub struct ReplicatedMap<K, V> {
    name: String,
    invocations: Arc<InvocationService>,
    _marker: std::marker::PhantomData<fn(K, V)>,
}

impl<K, V> ReplicatedMap<K, V>
where
    K: Serializable,
    V: Serializable + Deserializable,
{
    pub(crate) fn new(name: String, invocations: Arc<InvocationService>) -> Self {
        Self {
            name,
            invocations,
            _marker: std::marker::PhantomData,
        }
    }

    /// Returns the map name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Puts a value, returning the previous value if any.
    pub async fn put(&self, key: &K, value: &V) -> Result<Option<V>> {
        let key_data = Data::from_value(key)?;
        let value_data = Data::from_value(value)?;
        let mut out = ObjectDataOutput::new();
        out.write_string(&self.name)?;
        out.write_byte_array(key_data.as_slice())?;
        out.write_byte_array(value_data.as_slice())?;
        let request = Message::with_payload(REPLICATED_MAP_PUT, out.into_buffer());

        let response = self
            .invocations
            .invoke(request, TargetPolicy::Random, InvocationOptions::new())
            .await?;
        match decode_nullable_data(&response)? {
            Some(previous) => previous.to_value().map(Some),
            None => Ok(None),
        }
    }

    /// Returns the value for the key, or `None` if absent.
    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        let key_data = Data::from_value(key)?;
        let mut out = ObjectDataOutput::new();
        out.write_string(&self.name)?;
        out.write_byte_array(key_data.as_slice())?;
        let request = Message::with_payload(REPLICATED_MAP_GET, out.into_buffer());

        let response = self
            .invocations
            .invoke(
                request,
                TargetPolicy::Random,
                InvocationOptions::new().retry_safe(true),
            )
            .await?;
        match decode_nullable_data(&response)? {
            Some(data) => data.to_value().map(Some),
            None => Ok(None),
        }
    }

    /// Removes the key, returning the removed value if any.
    pub async fn remove(&self, key: &K) -> Result<Option<V>> {
        let key_data = Data::from_value(key)?;
        let mut out = ObjectDataOutput::new();
        out.write_string(&self.name)?;
        out.write_byte_array(key_data.as_slice())?;
        let request = Message::with_payload(REPLICATED_MAP_REMOVE, out.into_buffer());

        let response = self
            .invocations
            .invoke(request, TargetPolicy::Random, InvocationOptions::new())
            .await?;
        match decode_nullable_data(&response)? {
            Some(previous) => previous.to_value().map(Some),
            None => Ok(None),
        }
    }

    /// Returns the number of entries.
    pub async fn size(&self) -> Result<i32> {
        let mut out = ObjectDataOutput::new();
        out.write_string(&self.name)?;
        let request = Message::with_payload(REPLICATED_MAP_SIZE, out.into_buffer());

        let response = self
            .invocations
            .invoke(
                request,
                TargetPolicy::Random,
                InvocationOptions::new().retry_safe(true),
            )
            .await?;
        decode_i32(&response)
    }
}
