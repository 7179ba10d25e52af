//! Replicated atomic counter proxy.

use std::sync::Arc;

use gridcast_core::protocol::constants::{
    COUNTER_ADD_AND_GET, COUNTER_COMPARE_AND_SET, COUNTER_GET, COUNTER_SET,
};
use gridcast_core::{DataOutput, Message, ObjectDataOutput, Result};

use super::{decode_bool, decode_i64, parse_proxy_name};
use crate::invocation::{InvocationOptions, InvocationService, TargetPolicy};

/// A strongly-consistent distributed counter.
///
/// Counters live in named groups; a proxy name of the form `name@group`
/// addresses the counter inside a custom group, while the default group is
/// implicit. Counter operations go to any member, which forwards them into
/// the owning group.
#[derive(Debug, Clone)]
pub struct AtomicCounter {
    object_name: String,
    group: Option<String>,
    invocations: Arc<InvocationService>,
}

impl AtomicCounter {
    pub(crate) fn create(name: &str, invocations: Arc<InvocationService>) -> Result<Self> {
        let (object_name, group) = parse_proxy_name(name)?;
        Ok(Self {
            object_name,
            group,
            invocations,
        })
    }

    /// Returns the counter's object name, without the group part.
    pub fn name(&self) -> &str {
        &self.object_name
    }

    /// Returns the custom group name, if the counter lives outside the
    /// default group.
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Returns the current value.
    pub async fn get(&self) -> Result<i64> {
        let request = self.request(COUNTER_GET, |_| Ok(()))?;
        let response = self.invoke(request, true).await?;
        decode_i64(&response)
    }

    /// Sets the value unconditionally.
    pub async fn set(&self, value: i64) -> Result<()> {
        let request = self.request(COUNTER_SET, |out| out.write_long(value))?;
        self.invoke(request, false).await.map(|_| ())
    }

    /// Adds `delta` and returns the resulting value.
    pub async fn add_and_get(&self, delta: i64) -> Result<i64> {
        let request = self.request(COUNTER_ADD_AND_GET, |out| out.write_long(delta))?;
        let response = self.invoke(request, false).await?;
        decode_i64(&response)
    }

    /// Increments and returns the resulting value.
    pub async fn increment_and_get(&self) -> Result<i64> {
        self.add_and_get(1).await
    }

    /// Decrements and returns the resulting value.
    pub async fn decrement_and_get(&self) -> Result<i64> {
        self.add_and_get(-1).await
    }

    /// Sets the value to `new` only if it currently equals `expected`.
    ///
    /// Compare-and-set is safe to retry: a repeated application observes the
    /// already-updated value and fails the comparison.
    pub async fn compare_and_set(&self, expected: i64, new: i64) -> Result<bool> {
        let request = self.request(COUNTER_COMPARE_AND_SET, |out| {
            out.write_long(expected)?;
            out.write_long(new)
        })?;
        let response = self.invoke(request, true).await?;
        decode_bool(&response)
    }

    fn request(
        &self,
        message_type: i32,
        write_args: impl FnOnce(&mut ObjectDataOutput) -> Result<()>,
    ) -> Result<Message> {
        let mut out = ObjectDataOutput::new();
        out.write_string(&self.object_name)?;
        out.write_nullable_string(self.group.as_deref())?;
        write_args(&mut out)?;
        Ok(Message::with_payload(message_type, out.into_buffer()))
    }

    async fn invoke(&self, request: Message, retry_safe: bool) -> Result<Message> {
        self.invocations
            .invoke(
                request,
                TargetPolicy::Random,
                InvocationOptions::new().retry_safe(retry_safe),
            )
            .await
    }
}
