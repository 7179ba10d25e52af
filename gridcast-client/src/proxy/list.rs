//! Distributed list proxy.

use std::sync::Arc;

use gridcast_core::protocol::constants::{LIST_ADD, LIST_GET, LIST_REMOVE, LIST_SIZE};
use gridcast_core::{
    Data, DataOutput, Deserializable, Message, ObjectDataOutput, Result, Serializable,
};

use super::{decode_bool, decode_i32, decode_nullable_data};
use crate::invocation::{InvocationOptions, InvocationService, TargetPolicy};

/// A distributed ordered list, routed to the partition its name hashes to.
#[derive(Debug, Clone)]
pub struct RemoteList<T> {
    name: String,
    invocations: Arc<InvocationService>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> RemoteList<T>
where
    T: Serializable + Deserializable,
{
    pub(crate) fn new(name: String, invocations: Arc<InvocationService>) -> Self {
        Self {
            name,
            invocations,
            _marker: std::marker::PhantomData,
        }
    }

    /// Returns the list name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends an item. Returns `true` if the list changed.
    pub async fn add(&self, item: &T) -> Result<bool> {
        let item_data = Data::from_value(item)?;
        let mut out = ObjectDataOutput::new();
        out.write_string(&self.name)?;
        out.write_byte_array(item_data.as_slice())?;
        let request = Message::with_payload(LIST_ADD, out.into_buffer());

        let response = self.invoke(request, false).await?;
        decode_bool(&response)
    }

    /// Returns the item at `index`, or `None` when out of range.
    pub async fn get(&self, index: i32) -> Result<Option<T>> {
        let mut out = ObjectDataOutput::new();
        out.write_string(&self.name)?;
        out.write_int(index)?;
        let request = Message::with_payload(LIST_GET, out.into_buffer());

        let response = self.invoke(request, true).await?;
        match decode_nullable_data(&response)? {
            Some(data) => data.to_value().map(Some),
            None => Ok(None),
        }
    }

    /// Removes the first occurrence of the item. Returns `true` if found.
    pub async fn remove(&self, item: &T) -> Result<bool> {
        let item_data = Data::from_value(item)?;
        let mut out = ObjectDataOutput::new();
        out.write_string(&self.name)?;
        out.write_byte_array(item_data.as_slice())?;
        let request = Message::with_payload(LIST_REMOVE, out.into_buffer());

        let response = self.invoke(request, false).await?;
        decode_bool(&response)
    }

    /// Returns the number of items.
    pub async fn size(&self) -> Result<i32> {
        let mut out = ObjectDataOutput::new();
        out.write_string(&self.name)?;
        let request = Message::with_payload(LIST_SIZE, out.into_buffer());

        let response = self.invoke(request, true).await?;
        decode_i32(&response)
    }

    async fn invoke(&self, mut request: Message, retry_safe: bool) -> Result<Message> {
        let name_data = Data::from_value(&self.name)?;
        let partition_id = self.invocations.partitions().partition_id_for(&name_data);
        request.set_partition_id(partition_id);
        self.invocations
            .invoke(
                request,
                TargetPolicy::Partition(partition_id),
                InvocationOptions::new().retry_safe(retry_safe),
            )
            .await
    }
}
