//! Distributed queue proxy.

use std::sync::Arc;
use std::time::Duration;

use gridcast_core::protocol::constants::{QUEUE_OFFER, QUEUE_PEEK, QUEUE_POLL, QUEUE_SIZE};
use gridcast_core::{
    Data, DataOutput, Deserializable, Message, ObjectDataOutput, Result, Serializable,
};

use super::{decode_bool, decode_i32, decode_nullable_data};
use crate::invocation::{InvocationOptions, InvocationService, TargetPolicy};

/// A distributed blocking FIFO queue.
///
/// A queue lives on the partition its name hashes to; every operation is
/// routed there.
#[derive(Debug, Clone)]
pub struct RemoteQueue<T> {
    name: String,
    invocations: Arc<InvocationService>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> RemoteQueue<T>
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

    /// Returns the queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Offers an item, waiting up to `timeout` for capacity.
    ///
    /// Returns `false` when the queue stayed full for the whole wait.
    pub async fn offer(&self, item: &T, timeout: Duration) -> Result<bool> {
        let item_data = Data::from_value(item)?;
        let mut out = ObjectDataOutput::new();
        out.write_string(&self.name)?;
        out.write_byte_array(item_data.as_slice())?;
        out.write_long(timeout.as_millis() as i64)?;
        let request = Message::with_payload(QUEUE_OFFER, out.into_buffer());

        let response = self.invoke(request, false).await?;
        decode_bool(&response)
    }

    /// Polls the head item, waiting up to `timeout` for one to appear.
    pub async fn poll(&self, timeout: Duration) -> Result<Option<T>> {
        let mut out = ObjectDataOutput::new();
        out.write_string(&self.name)?;
        out.write_long(timeout.as_millis() as i64)?;
        let request = Message::with_payload(QUEUE_POLL, out.into_buffer());

        let response = self.invoke(request, false).await?;
        match decode_nullable_data(&response)? {
            Some(data) => data.to_value().map(Some),
            None => Ok(None),
        }
    }

    /// Returns the head item without removing it.
    pub async fn peek(&self) -> Result<Option<T>> {
        let mut out = ObjectDataOutput::new();
        out.write_string(&self.name)?;
        let request = Message::with_payload(QUEUE_PEEK, out.into_buffer());

        let response = self.invoke(request, true).await?;
        match decode_nullable_data(&response)? {
            Some(data) => data.to_value().map(Some),
            None => Ok(None),
        }
    }

    /// Returns the number of queued items.
    pub async fn size(&self) -> Result<i32> {
        let mut out = ObjectDataOutput::new();
        out.write_string(&self.name)?;
        let request = Message::with_payload(QUEUE_SIZE, out.into_buffer());

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
