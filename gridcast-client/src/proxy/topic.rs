//! Topic proxy: publish/subscribe messaging.

use std::sync::{Arc, Mutex};

use uuid::Uuid;

use gridcast_core::protocol::constants::{
    EVENT_TOPIC_MESSAGE, REMOVE_LISTENER, TOPIC_ADD_LISTENER, TOPIC_PUBLISH,
};
use gridcast_core::{
    Data, DataInput, DataOutput, Deserializable, Message, ObjectDataInput, ObjectDataOutput,
    Result, Serializable,
};

use super::{decode_bool, decode_uuid};
use crate::connection::ConnectionId;
use crate::invocation::{InvocationOptions, InvocationService, TargetPolicy};

/// A message delivered to topic listeners.
#[derive(Debug, Clone)]
pub struct TopicMessage<T> {
    /// The published item.
    pub item: T,
    /// Publish time in milliseconds since the epoch, as stamped by the
    /// publishing member.
    pub publish_time: i64,
    /// The uuid of the publishing member.
    pub source: Uuid,
}

struct TopicListener {
    registration: Uuid,
    connection: ConnectionId,
    correlation_id: i64,
}

/// A distributed publish/subscribe topic.
#[derive(Clone)]
pub struct RemoteTopic<T> {
    name: String,
    invocations: Arc<InvocationService>,
    listeners: Arc<Mutex<Vec<TopicListener>>>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> std::fmt::Debug for RemoteTopic<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTopic").field("name", &self.name).finish()
    }
}

impl<T> RemoteTopic<T>
where
    T: Serializable + Deserializable + Send + Sync + 'static,
{
    pub(crate) fn new(name: String, invocations: Arc<InvocationService>) -> Self {
        Self {
            name,
            invocations,
            listeners: Arc::new(Mutex::new(Vec::new())),
            _marker: std::marker::PhantomData,
        }
    }

    /// Returns the topic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publishes an item to every subscriber on every client.
    pub async fn publish(&self, item: &T) -> Result<()> {
        let item_data = Data::from_value(item)?;
        let mut out = ObjectDataOutput::new();
        out.write_string(&self.name)?;
        out.write_byte_array(item_data.as_slice())?;
        let mut request = Message::with_payload(TOPIC_PUBLISH, out.into_buffer());

        let name_data = Data::from_value(&self.name)?;
        let partition_id = self.invocations.partitions().partition_id_for(&name_data);
        request.set_partition_id(partition_id);

        self.invocations
            .invoke(
                request,
                TargetPolicy::Partition(partition_id),
                InvocationOptions::new(),
            )
            .await
            .map(|_| ())
    }

    /// Subscribes a message listener; returns its registration uuid.
    pub async fn add_message_listener(
        &self,
        listener: impl Fn(TopicMessage<T>) + Send + Sync + 'static,
    ) -> Result<Uuid> {
        let topic_name = self.name.clone();
        let handler = Arc::new(move |message: Message| {
            if message.message_type() != EVENT_TOPIC_MESSAGE {
                tracing::warn!(
                    message_type = message.message_type(),
                    "unexpected frame on topic subscription"
                );
                return;
            }
            match decode_topic_message::<T>(&message) {
                Ok(event) => listener(event),
                Err(e) => {
                    tracing::warn!(topic = %topic_name, error = %e, "dropping malformed topic message");
                }
            }
        });

        let mut out = ObjectDataOutput::new();
        out.write_string(&self.name)?;
        let request = Message::with_payload(TOPIC_ADD_LISTENER, out.into_buffer());

        let (response, connection) = self
            .invocations
            .invoke_with_event_handler(request, handler, InvocationOptions::new())
            .await?;
        let registration = decode_uuid(&response)?;

        self.listeners.lock().expect("topic listeners poisoned").push(TopicListener {
            registration,
            connection,
            correlation_id: response.correlation_id(),
        });
        Ok(registration)
    }

    /// Removes a message listener. Returns `true` if it was registered.
    pub async fn remove_message_listener(&self, registration: Uuid) -> Result<bool> {
        let removed = {
            let mut listeners = self.listeners.lock().expect("topic listeners poisoned");
            match listeners.iter().position(|l| l.registration == registration) {
                Some(index) => Some(listeners.remove(index)),
                None => None,
            }
        };
        let Some(listener) = removed else {
            return Ok(false);
        };

        self.invocations
            .unbind_event_handler(listener.connection, listener.correlation_id);

        let mut out = ObjectDataOutput::new();
        out.write_string(&self.name)?;
        out.write_uuid(registration)?;
        let request = Message::with_payload(REMOVE_LISTENER, out.into_buffer());
        let response = self
            .invocations
            .invoke(
                request,
                TargetPolicy::Random,
                InvocationOptions::new().retry_safe(true),
            )
            .await?;
        decode_bool(&response)
    }
}

fn decode_topic_message<T: Deserializable>(message: &Message) -> Result<TopicMessage<T>> {
    let mut input = ObjectDataInput::new(message.payload());
    let item_data = Data::new(input.read_byte_array()?);
    let publish_time = input.read_long()?;
    let source = input.read_uuid()?;
    Ok(TopicMessage {
        item: item_data.to_value()?,
        publish_time,
        source,
    })
}
