//! Distributed map proxy with optional near-cache.

use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

use gridcast_core::protocol::constants::{
    EVENT_MAP_BATCH_INVALIDATION, EVENT_MAP_INVALIDATION, MAP_ADD_INVALIDATION_LISTENER,
    MAP_CLEAR, MAP_CONTAINS_KEY, MAP_DELETE, MAP_GET, MAP_PUT, MAP_REMOVE, MAP_SIZE,
};
use gridcast_core::{
    Data, DataOutput, Deserializable, Message, ObjectDataOutput, Result, Serializable,
};

use super::{decode_bool, decode_i32, decode_nullable_data, decode_uuid};
use crate::connection::ConnectionId;
use crate::event::{ClientEvent, EventDispatcher, ReferenceIdGenerator, EVENT_CONNECTION_CLOSED, EVENT_CONNECTION_OPENED};
use crate::invocation::{InvocationOptions, InvocationService, TargetPolicy};
use crate::nearcache::{
    CachedValue, InMemoryFormat, InvalidationEvent, InvalidationOutcome, MemoryCost, NearCache,
    NearCacheConfig, NearCacheStats, SequenceTracker,
};

static SUBSCRIPTION_IDS: ReferenceIdGenerator = ReferenceIdGenerator::new();

/// The key-transform half of the cache strategy: keys are held either in
/// their serialized byte form or as the raw user value.
enum NearCacheStore<K, V> {
    Serialized(NearCache<Data, CachedValue<V>>),
    Raw(NearCache<K, CachedValue<V>>),
}

struct MapNearCache<K, V> {
    store: NearCacheStore<K, V>,
    tracker: SequenceTracker,
    format: InMemoryFormat,
    /// The connection carrying the invalidation subscription and the
    /// subscription's correlation id.
    carrier: Mutex<Option<(ConnectionId, i64)>>,
}

impl<K, V> MapNearCache<K, V>
where
    K: Eq + Hash + Ord + Clone + MemoryCost + Deserializable,
    V: Clone,
{
    fn get(&self, key: &K, key_data: &Data) -> Option<CachedValue<V>> {
        match &self.store {
            NearCacheStore::Serialized(cache) => cache.get(key_data),
            NearCacheStore::Raw(cache) => cache.get(key),
        }
    }

    fn try_reserve(&self, key: &K, key_data: &Data) -> Option<i64> {
        match &self.store {
            NearCacheStore::Serialized(cache) => cache.try_reserve(key_data.clone()),
            NearCacheStore::Raw(cache) => cache.try_reserve(key.clone()),
        }
    }

    fn try_publish(&self, key: &K, key_data: &Data, value: CachedValue<V>, reservation: i64) {
        match &self.store {
            NearCacheStore::Serialized(cache) => {
                cache.try_publish(key_data, value, reservation);
            }
            NearCacheStore::Raw(cache) => {
                cache.try_publish(key, value, reservation);
            }
        }
    }

    fn invalidate_local(&self, key: &K, key_data: &Data) {
        match &self.store {
            NearCacheStore::Serialized(cache) => cache.invalidate(key_data),
            NearCacheStore::Raw(cache) => cache.invalidate(key),
        }
    }

    /// Applies one server-driven invalidation under the sequence discipline.
    fn apply_invalidation(&self, event: InvalidationEvent) {
        match self.tracker.observe(event.partition, event.sequence) {
            InvalidationOutcome::Apply => match event.key {
                Some(key_data) => match &self.store {
                    NearCacheStore::Serialized(cache) => cache.invalidate(&key_data),
                    NearCacheStore::Raw(cache) => match key_data.to_value::<K>() {
                        Ok(key) => cache.invalidate(&key),
                        Err(e) => {
                            tracing::warn!(error = %e, "dropping invalidation with undecodable key");
                        }
                    },
                },
                None => self.clear(),
            },
            InvalidationOutcome::Flush => {
                tracing::debug!(
                    partition = %event.partition,
                    sequence = event.sequence,
                    "invalidation sequence gap, flushing"
                );
                self.clear();
            }
            InvalidationOutcome::Stale => {}
        }
    }

    fn clear(&self) {
        match &self.store {
            NearCacheStore::Serialized(cache) => cache.clear(),
            NearCacheStore::Raw(cache) => cache.clear(),
        }
    }

    fn stats(&self) -> NearCacheStats {
        match &self.store {
            NearCacheStore::Serialized(cache) => cache.stats(),
            NearCacheStore::Raw(cache) => cache.stats(),
        }
    }
}

struct MapInner<K, V> {
    name: String,
    invocations: Arc<InvocationService>,
    near_cache: Option<Arc<MapNearCache<K, V>>>,
}

/// A distributed map.
///
/// Every operation is delegated to the partition owner of its key. With a
/// near-cache configured, reads are answered locally when possible; the
/// remote stays authoritative and pushes invalidations.
pub struct RemoteMap<K, V> {
    inner: Arc<MapInner<K, V>>,
}

impl<K, V> Clone for RemoteMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> std::fmt::Debug for RemoteMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteMap")
            .field("name", &self.inner.name)
            .field("near_cache", &self.inner.near_cache.is_some())
            .finish()
    }
}

impl<K, V> RemoteMap<K, V>
where
    K: Serializable + Deserializable + Eq + Hash + Ord + Clone + MemoryCost + Send + Sync + 'static,
    V: Serializable + Deserializable + Clone + Send + Sync + 'static,
{
    /// Creates the proxy, setting up the near-cache when configured.
    pub(crate) async fn create(
        name: String,
        invocations: Arc<InvocationService>,
        dispatcher: Arc<EventDispatcher>,
        near_cache_config: Option<NearCacheConfig>,
    ) -> Result<Self> {
        let near_cache = match near_cache_config {
            Some(config) => {
                if config.preload_enabled() {
                    tracing::warn!(
                        name = %name,
                        "near-cache preloading requires a persisted store and is skipped"
                    );
                }
                let format = config.in_memory_format();
                let store = if config.serialize_keys() {
                    NearCacheStore::Serialized(NearCache::new(config.clone()))
                } else {
                    NearCacheStore::Raw(NearCache::new(config.clone()))
                };
                let cache = Arc::new(MapNearCache {
                    store,
                    tracker: SequenceTracker::new(),
                    format,
                    carrier: Mutex::new(None),
                });
                Some((cache, config))
            }
            None => None,
        };

        let inner = Arc::new(MapInner {
            name,
            invocations,
            near_cache: near_cache.as_ref().map(|(cache, _)| Arc::clone(cache)),
        });

        if let Some((cache, config)) = near_cache {
            if config.invalidate_on_change() {
                Self::register_invalidation_listener(&inner).await?;
                Self::subscribe_carrier_watch(&inner, &dispatcher);
            }
            Self::spawn_expiration_task(&cache, config.cleanup_interval());
        }

        Ok(Self { inner })
    }

    /// Returns the map name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns `true` if a near-cache is configured for this map.
    pub fn has_near_cache(&self) -> bool {
        self.inner.near_cache.is_some()
    }

    /// Returns the near-cache statistics, if a near-cache is configured.
    pub fn near_cache_stats(&self) -> Option<NearCacheStats> {
        self.inner.near_cache.as_ref().map(|cache| cache.stats())
    }

    /// Returns the value for the key, or `None` if absent.
    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        let key_data = Data::from_value(key)?;

        let Some(cache) = &self.inner.near_cache else {
            return match self.fetch_remote(&key_data).await? {
                Some(data) => data.to_value().map(Some),
                None => Ok(None),
            };
        };

        if let Some(cached) = cache.get(key, &key_data) {
            return cached.materialize().map(Some);
        }

        let reservation = cache.try_reserve(key, &key_data);
        match self.fetch_remote(&key_data).await {
            Ok(Some(data)) => {
                let value: V = data.to_value()?;
                if let Some(reservation) = reservation {
                    let cached = CachedValue::from_data(data, cache.format)?;
                    cache.try_publish(key, &key_data, cached, reservation);
                }
                Ok(Some(value))
            }
            Ok(None) => {
                cache.invalidate_local(key, &key_data);
                Ok(None)
            }
            Err(e) => {
                cache.invalidate_local(key, &key_data);
                Err(e)
            }
        }
    }

    /// Puts a value, returning the previous value if any.
    pub async fn put(&self, key: K, value: V) -> Result<Option<V>> {
        self.put_with_ttl(key, value, Duration::ZERO).await
    }

    /// Puts a value with a server-side TTL (zero means no limit).
    pub async fn put_with_ttl(&self, key: K, value: V, ttl: Duration) -> Result<Option<V>> {
        let key_data = Data::from_value(&key)?;
        let value_data = Data::from_value(&value)?;

        let mut out = ObjectDataOutput::new();
        out.write_string(&self.inner.name)?;
        out.write_byte_array(key_data.as_slice())?;
        out.write_byte_array(value_data.as_slice())?;
        out.write_long(ttl.as_millis() as i64)?;
        let request = Message::with_payload(MAP_PUT, out.into_buffer());

        let result = self.invoke_on_key(request, &key_data, false).await;
        // Mutations invalidate after the remote call returns, success or not.
        if let Some(cache) = &self.inner.near_cache {
            cache.invalidate_local(&key, &key_data);
        }
        match decode_nullable_data(&result?)? {
            Some(previous) => previous.to_value().map(Some),
            None => Ok(None),
        }
    }

    /// Removes the key, returning the removed value if any.
    pub async fn remove(&self, key: &K) -> Result<Option<V>> {
        let key_data = Data::from_value(key)?;
        let request = self.name_key_request(MAP_REMOVE, &key_data)?;

        let result = self.invoke_on_key(request, &key_data, false).await;
        if let Some(cache) = &self.inner.near_cache {
            cache.invalidate_local(key, &key_data);
        }
        match decode_nullable_data(&result?)? {
            Some(previous) => previous.to_value().map(Some),
            None => Ok(None),
        }
    }

    /// Removes the key without returning the previous value.
    pub async fn delete(&self, key: &K) -> Result<()> {
        let key_data = Data::from_value(key)?;
        let request = self.name_key_request(MAP_DELETE, &key_data)?;

        let result = self.invoke_on_key(request, &key_data, false).await;
        if let Some(cache) = &self.inner.near_cache {
            cache.invalidate_local(key, &key_data);
        }
        result.map(|_| ())
    }

    /// Returns `true` if the key is present.
    pub async fn contains_key(&self, key: &K) -> Result<bool> {
        let key_data = Data::from_value(key)?;
        if let Some(cache) = &self.inner.near_cache {
            if cache.get(key, &key_data).is_some() {
                return Ok(true);
            }
        }
        let request = self.name_key_request(MAP_CONTAINS_KEY, &key_data)?;
        let response = self.invoke_on_key(request, &key_data, true).await?;
        decode_bool(&response)
    }

    /// Returns the number of entries in the map.
    pub async fn size(&self) -> Result<i32> {
        let mut out = ObjectDataOutput::new();
        out.write_string(&self.inner.name)?;
        let request = Message::with_payload(MAP_SIZE, out.into_buffer());
        let response = self
            .inner
            .invocations
            .invoke(request, TargetPolicy::Random, InvocationOptions::new().retry_safe(true))
            .await?;
        decode_i32(&response)
    }

    /// Removes all entries.
    pub async fn clear(&self) -> Result<()> {
        let mut out = ObjectDataOutput::new();
        out.write_string(&self.inner.name)?;
        let request = Message::with_payload(MAP_CLEAR, out.into_buffer());
        let result = self
            .inner
            .invocations
            .invoke(request, TargetPolicy::Random, InvocationOptions::new().retry_safe(true))
            .await;
        if let Some(cache) = &self.inner.near_cache {
            cache.clear();
        }
        result.map(|_| ())
    }

    fn name_key_request(&self, message_type: i32, key_data: &Data) -> Result<Message> {
        let mut out = ObjectDataOutput::new();
        out.write_string(&self.inner.name)?;
        out.write_byte_array(key_data.as_slice())?;
        Ok(Message::with_payload(message_type, out.into_buffer()))
    }

    async fn fetch_remote(&self, key_data: &Data) -> Result<Option<Data>> {
        let request = self.name_key_request(MAP_GET, key_data)?;
        let response = self.invoke_on_key(request, key_data, true).await?;
        decode_nullable_data(&response)
    }

    async fn invoke_on_key(
        &self,
        mut request: Message,
        key_data: &Data,
        retry_safe: bool,
    ) -> Result<Message> {
        let partition_id = self.inner.invocations.partitions().partition_id_for(key_data);
        request.set_partition_id(partition_id);
        self.inner
            .invocations
            .invoke(
                request,
                TargetPolicy::Partition(partition_id),
                InvocationOptions::new().retry_safe(retry_safe),
            )
            .await
    }

    /// Registers the server-side invalidation listener for this map.
    async fn register_invalidation_listener(inner: &Arc<MapInner<K, V>>) -> Result<Uuid> {
        let cache = Arc::clone(
            inner
                .near_cache
                .as_ref()
                .expect("invalidation listener without a near-cache"),
        );

        let handler_cache = Arc::clone(&cache);
        let handler = Arc::new(move |message: Message| match message.message_type() {
            EVENT_MAP_INVALIDATION => match InvalidationEvent::decode(&message) {
                Ok(event) => handler_cache.apply_invalidation(event),
                Err(e) => tracing::warn!(error = %e, "dropping malformed invalidation"),
            },
            EVENT_MAP_BATCH_INVALIDATION => match InvalidationEvent::decode_batch(&message) {
                Ok(events) => {
                    for event in events {
                        handler_cache.apply_invalidation(event);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "dropping malformed invalidation batch"),
            },
            other => {
                tracing::warn!(message_type = other, "unexpected frame on invalidation subscription");
            }
        });

        let mut out = ObjectDataOutput::new();
        out.write_string(&inner.name)?;
        let request = Message::with_payload(MAP_ADD_INVALIDATION_LISTENER, out.into_buffer());

        let (response, connection_id) = inner
            .invocations
            .invoke_with_event_handler(request, handler, InvocationOptions::new())
            .await?;
        let registration = decode_uuid(&response)?;

        *cache.carrier.lock().expect("carrier poisoned") =
            Some((connection_id, response.correlation_id()));
        tracing::debug!(
            name = %inner.name,
            registration = %registration,
            connection = %connection_id,
            "invalidation listener registered"
        );
        Ok(registration)
    }

    /// Keeps the invalidation subscription alive across its carrier
    /// connection's death: on loss the cache is flushed (invalidations were
    /// missed) and the listener re-registers on the next live connection.
    fn subscribe_carrier_watch(inner: &Arc<MapInner<K, V>>, dispatcher: &Arc<EventDispatcher>) {
        let closed_inner = Arc::clone(inner);
        dispatcher.subscribe_sync(
            EVENT_CONNECTION_CLOSED,
            SUBSCRIPTION_IDS.next_id(),
            Arc::new(move |event| {
                let ClientEvent::ConnectionClosed { id, .. } = event else {
                    return;
                };
                let Some(cache) = &closed_inner.near_cache else {
                    return;
                };
                let mut carrier = cache.carrier.lock().expect("carrier poisoned");
                if carrier.map(|(conn, _)| conn) == Some(*id) {
                    *carrier = None;
                    drop(carrier);
                    cache.clear();
                    cache.tracker.reset();
                }
            }),
        );

        let opened_inner = Arc::clone(inner);
        dispatcher.subscribe_sync(
            EVENT_CONNECTION_OPENED,
            SUBSCRIPTION_IDS.next_id(),
            Arc::new(move |event| {
                let ClientEvent::ConnectionOpened { .. } = event else {
                    return;
                };
                let Some(cache) = &opened_inner.near_cache else {
                    return;
                };
                if cache.carrier.lock().expect("carrier poisoned").is_some() {
                    return;
                }
                let inner = Arc::clone(&opened_inner);
                tokio::spawn(async move {
                    if let Err(e) = Self::register_invalidation_listener(&inner).await {
                        tracing::warn!(name = %inner.name, error = %e, "invalidation listener re-registration failed");
                    }
                });
            }),
        );
    }

    /// Spawns the periodic expiration pass over the near-cache.
    fn spawn_expiration_task(cache: &Arc<MapNearCache<K, V>>, interval: Duration) {
        let cache = Arc::downgrade(cache);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    return;
                };
                match &cache.store {
                    NearCacheStore::Serialized(store) => store.expire_stale(),
                    NearCacheStore::Raw(store) => store.expire_stale(),
                };
            }
        });
    }
}
