//! Data-structure proxies: thin adapters that encode a request, submit it
//! through the invocation service and decode the response.

mod counter;
mod list;
mod map;
mod queue;
mod replicated_map;
mod topic;

pub use counter::AtomicCounter;
pub use list::RemoteList;
pub use map::RemoteMap;
pub use queue::RemoteQueue;
pub use replicated_map::ReplicatedMap;
pub use topic::RemoteTopic;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Mutex;

use gridcast_core::{Data, DataInput, GridError, Message, ObjectDataInput, Result};

/// The reserved group name of the cluster's metadata partition group.
const METADATA_GROUP_NAME: &str = "metadata";
/// The implicit group name, stripped from proxy names.
const DEFAULT_GROUP_NAME: &str = "default";

/// Splits a proxy name of the form `object@group`.
///
/// The default group is implicit: `counter@default` names the same object as
/// `counter`. The metadata group is reserved, a group may be given at most
/// once, and neither part may be blank.
pub fn parse_proxy_name(name: &str) -> Result<(String, Option<String>)> {
    let name = name.trim();
    let Some(at) = name.find('@') else {
        if name.is_empty() {
            return Err(GridError::InvalidArgument(
                "object name must not be empty".to_string(),
            ));
        }
        return Ok((name.to_string(), None));
    };

    let (object_part, group_part) = name.split_at(at);
    let group_part = &group_part[1..];
    if group_part.contains('@') {
        return Err(GridError::InvalidArgument(
            "group name may be specified at most once".to_string(),
        ));
    }

    let object_name = object_part.trim();
    if object_name.is_empty() {
        return Err(GridError::InvalidArgument(
            "object name must not be empty".to_string(),
        ));
    }
    let group_name = group_part.trim();
    if group_name.is_empty() {
        return Err(GridError::InvalidArgument(
            "group name must not be empty".to_string(),
        ));
    }
    if group_name.eq_ignore_ascii_case(METADATA_GROUP_NAME) {
        return Err(GridError::InvalidArgument(format!(
            "data structures cannot run on the {} group",
            METADATA_GROUP_NAME
        )));
    }
    if group_name.eq_ignore_ascii_case(DEFAULT_GROUP_NAME) {
        return Ok((object_name.to_string(), None));
    }
    Ok((object_name.to_string(), Some(group_name.to_string())))
}

/// Returns the object part of a proxy name, validating the group part.
pub fn object_name(name: &str) -> Result<String> {
    parse_proxy_name(name).map(|(object, _)| object)
}

// Response payload decoders shared by the proxies.

pub(crate) fn decode_nullable_data(message: &Message) -> Result<Option<Data>> {
    let mut input = ObjectDataInput::new(message.payload());
    if input.read_bool()? {
        Ok(Some(Data::new(input.read_byte_array()?)))
    } else {
        Ok(None)
    }
}

pub(crate) fn decode_bool(message: &Message) -> Result<bool> {
    let mut input = ObjectDataInput::new(message.payload());
    input.read_bool()
}

pub(crate) fn decode_i32(message: &Message) -> Result<i32> {
    let mut input = ObjectDataInput::new(message.payload());
    input.read_int()
}

pub(crate) fn decode_i64(message: &Message) -> Result<i64> {
    let mut input = ObjectDataInput::new(message.payload());
    input.read_long()
}

pub(crate) fn decode_uuid(message: &Message) -> Result<uuid::Uuid> {
    let mut input = ObjectDataInput::new(message.payload());
    input.read_uuid()
}

/// Caches proxies by (service, object name) so repeated lookups share one
/// instance, including its near-cache and listener registrations.
pub(crate) struct ProxyManager {
    proxies: Mutex<HashMap<(&'static str, String), Box<dyn Any + Send + Sync>>>,
}

impl std::fmt::Debug for ProxyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyManager")
            .field("cached", &self.proxies.lock().map(|p| p.len()).unwrap_or(0))
            .finish()
    }
}

impl ProxyManager {
    pub(crate) fn new() -> Self {
        Self {
            proxies: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached proxy for the key, or creates one.
    ///
    /// The factory runs outside the cache lock; when two callers race, the
    /// first insert wins and the loser's instance is dropped.
    pub(crate) async fn get_or_create<P, F, Fut>(
        &self,
        service: &'static str,
        name: &str,
        factory: F,
    ) -> Result<P>
    where
        P: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<P>>,
    {
        let key = (service, name.to_string());
        if let Some(existing) = self.lookup::<P>(&key) {
            return Ok(existing);
        }

        let created = factory().await?;

        let mut proxies = self.proxies.lock().expect("proxy cache poisoned");
        match proxies.get(&key) {
            Some(entry) => match entry.downcast_ref::<P>() {
                Some(winner) => Ok(winner.clone()),
                None => Ok(created),
            },
            None => {
                proxies.insert(key, Box::new(created.clone()));
                Ok(created)
            }
        }
    }

    fn lookup<P: Clone + 'static>(&self, key: &(&'static str, String)) -> Option<P> {
        let proxies = self.proxies.lock().expect("proxy cache poisoned");
        let entry = proxies.get(key)?;
        match entry.downcast_ref::<P>() {
            Some(proxy) => Some(proxy.clone()),
            None => {
                tracing::debug!(
                    service = key.0,
                    name = %key.1,
                    "cached proxy has a different type parameterization"
                );
                None
            }
        }
    }
}
