//! The client facade: assembles the services and drives the lifecycle.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use gridcast_core::{Deserializable, GridError, Result, Serializable};

use crate::cluster::{ClusterService, Member, MembershipEvent, PartitionService};
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, StaticAddressProvider};
use crate::event::{
    ClientEvent, EventDispatcher, LifecycleEvent, ReferenceIdGenerator, EVENT_CONNECTED,
    EVENT_DISCONNECTED, EVENT_LIFECYCLE, EVENT_MEMBERS_ADDED, EVENT_MEMBERS_REMOVED,
};
use crate::invocation::InvocationService;
use crate::nearcache::MemoryCost;
use crate::proxy::{
    AtomicCounter, ProxyManager, RemoteList, RemoteMap, RemoteQueue, RemoteTopic, ReplicatedMap,
};

/// Process-wide counter for naming client instances.
static CLIENT_ID: AtomicI32 = AtomicI32::new(0);

/// The client lifecycle states.
///
/// Transitions are one-way and pairwise:
/// `Created → Starting → Ready → Stopping → Stopped`. No other transition is
/// legal; attempts to re-enter a prior state fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LifecycleState {
    /// Built but not started.
    Created = 0,
    /// Start in progress.
    Starting = 1,
    /// Connected and serving operations.
    Ready = 2,
    /// Shutdown in progress.
    Stopping = 3,
    /// Shut down; terminal.
    Stopped = 4,
}

impl LifecycleState {
    fn from_value(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Starting,
            2 => Self::Ready,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::Starting => write!(f, "STARTING"),
            Self::Ready => write!(f, "READY"),
            Self::Stopping => write!(f, "STOPPING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

struct ClientCore {
    name: String,
    uuid: Uuid,
    config: Arc<ClientConfig>,
    state: AtomicU8,
    dispatcher: Arc<EventDispatcher>,
    user_dispatcher: Arc<EventDispatcher>,
    cluster: Arc<ClusterService>,
    partitions: Arc<PartitionService>,
    manager: Arc<ConnectionManager>,
    invocations: Arc<InvocationService>,
    proxies: ProxyManager,
    ref_ids: ReferenceIdGenerator,
    lifecycle_subs: Mutex<HashMap<Uuid, i64>>,
    membership_subs: Mutex<HashMap<Uuid, (i64, i64)>>,
}

/// A client instance connected to one grid cluster.
///
/// The client delegates every operation on its distributed data structures
/// to the cluster members owning the relevant partitions. Handles are cheap
/// to clone and share one underlying instance.
///
/// # Example
///
/// ```ignore
/// let config = ClientConfig::builder()
///     .cluster_name("dev")
///     .add_address("127.0.0.1:5701".parse().unwrap())
///     .build()?;
/// let client = GridClient::connect(config).await?;
///
/// let map = client.get_map::<String, String>("greetings").await?;
/// map.put("hello".into(), "world".into()).await?;
///
/// client.shutdown().await?;
/// ```
#[derive(Clone)]
pub struct GridClient {
    core: Arc<ClientCore>,
}

impl std::fmt::Debug for GridClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridClient")
            .field("name", &self.core.name)
            .field("state", &self.state())
            .finish()
    }
}

impl GridClient {
    /// Builds a client from the configuration without starting it.
    ///
    /// Must be called from within a tokio runtime; the client spawns its
    /// event-delivery workers immediately.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let config = Arc::new(config);
        let id = CLIENT_ID.fetch_add(1, Ordering::Relaxed) + 1;
        let name = match config.client_name() {
            Some(name) => name.to_string(),
            None => format!("gridcast.client_{}", id),
        };
        let uuid = Uuid::new_v4();

        let dispatcher = Arc::new(EventDispatcher::new());
        let user_dispatcher = Arc::new(EventDispatcher::new());
        let cluster = Arc::new(ClusterService::new(Arc::clone(&dispatcher)));
        let partitions = Arc::new(PartitionService::new(Arc::clone(&dispatcher)));
        let address_provider = Arc::new(StaticAddressProvider::new(
            config.network().addresses().to_vec(),
        ));
        let manager = ConnectionManager::new(
            Arc::clone(&config),
            address_provider,
            Arc::clone(&dispatcher),
            Arc::clone(&cluster),
            Arc::clone(&partitions),
            uuid,
            name.clone(),
        );
        let invocations = Arc::new(InvocationService::new(
            Arc::clone(&manager),
            Arc::clone(&partitions),
            config.invocation().clone(),
        ));
        let proxies = ProxyManager::new();

        let core = Arc::new(ClientCore {
            name,
            uuid,
            config,
            state: AtomicU8::new(LifecycleState::Created as u8),
            dispatcher,
            user_dispatcher,
            cluster,
            partitions,
            manager,
            invocations,
            proxies,
            ref_ids: ReferenceIdGenerator::new(),
            lifecycle_subs: Mutex::new(HashMap::new()),
            membership_subs: Mutex::new(HashMap::new()),
        });

        let client = Self { core };
        client.bridge_user_events();
        client.attach_config_listeners();
        Ok(client)
    }

    /// Builds and starts a client.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let client = Self::new(config)?;
        client.start().await?;
        Ok(client)
    }

    /// Starts the client: connects to the cluster and transitions to
    /// `Ready`.
    ///
    /// Fails with `CannotStart` unless the client is in the `Created` state.
    pub async fn start(&self) -> Result<()> {
        if !self.transition(LifecycleState::Created, LifecycleState::Starting) {
            return Err(GridError::CannotStart);
        }
        self.publish_lifecycle(LifecycleEvent::Starting);

        if let Err(e) = self.core.manager.start().await {
            tracing::error!(error = %e, "client start failed");
            self.core
                .state
                .store(LifecycleState::Stopped as u8, Ordering::Release);
            self.core.manager.shutdown().await;
            self.core.dispatcher.stop().await;
            self.core.user_dispatcher.stop().await;
            return Err(e);
        }

        self.core
            .state
            .store(LifecycleState::Ready as u8, Ordering::Release);
        self.publish_lifecycle(LifecycleEvent::Started);

        self.spawn_fatal_watcher();
        tracing::info!(name = %self.core.name, "client started");
        Ok(())
    }

    /// Shuts the client down.
    ///
    /// Idempotent against concurrent callers: exactly one observes success,
    /// every other caller gets `NotReady`. Failures during shutdown are
    /// logged; shutdown always completes.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.transition(LifecycleState::Ready, LifecycleState::Stopping) {
            return Err(GridError::NotReady);
        }
        self.publish_lifecycle(LifecycleEvent::ShuttingDown);

        self.core.manager.shutdown().await;

        self.core
            .state
            .store(LifecycleState::Stopped as u8, Ordering::Release);
        self.publish_lifecycle(LifecycleEvent::Shutdown);

        self.core.dispatcher.stop().await;
        self.core.user_dispatcher.stop().await;
        tracing::info!(name = %self.core.name, "client shut down");
        Ok(())
    }

    /// Returns `true` while the client is in the `Ready` state.
    pub fn running(&self) -> bool {
        self.state() == LifecycleState::Ready
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_value(self.core.state.load(Ordering::Acquire))
    }

    /// Returns the client instance name.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Returns the client instance uuid.
    pub fn uuid(&self) -> Uuid {
        self.core.uuid
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.core.config
    }

    /// Returns the current cluster members.
    pub fn members(&self) -> Vec<Member> {
        self.core.cluster.members()
    }

    /// Returns the cluster's partition count, or 0 before the first connect.
    pub fn partition_count(&self) -> i32 {
        self.core.partitions.partition_count()
    }

    /// Returns the uuid of the member owning the given partition, if known.
    pub fn partition_owner(&self, partition_id: i32) -> Option<Uuid> {
        self.core.partitions.partition_owner(partition_id)
    }

    /// Returns the partition id a serialized key routes to.
    pub fn partition_id_for(&self, data: &gridcast_core::Data) -> i32 {
        self.core.partitions.partition_id_for(data)
    }

    /// Returns the number of live member connections.
    pub fn connection_count(&self) -> usize {
        self.core.manager.connection_count()
    }

    /// Returns a distributed map proxy.
    pub async fn get_map<K, V>(&self, name: &str) -> Result<RemoteMap<K, V>>
    where
        K: Serializable
            + Deserializable
            + Eq
            + Hash
            + Ord
            + Clone
            + MemoryCost
            + Send
            + Sync
            + 'static,
        V: Serializable + Deserializable + Clone + Send + Sync + 'static,
    {
        self.ensure_ready()?;
        let object_name = crate::proxy::object_name(name)?;
        let invocations = Arc::clone(&self.core.invocations);
        let dispatcher = Arc::clone(&self.core.dispatcher);
        let near_cache = self.core.config.near_cache(&object_name).cloned();
        let factory_name = object_name.clone();
        self.core
            .proxies
            .get_or_create("map", &object_name, move || {
                RemoteMap::create(factory_name, invocations, dispatcher, near_cache)
            })
            .await
    }

    /// Returns a replicated map proxy.
    pub async fn get_replicated_map<K, V>(&self, name: &str) -> Result<ReplicatedMap<K, V>>
    where
        K: Serializable + Send + Sync + 'static + Clone,
        V: Serializable + Deserializable + Send + Sync + 'static + Clone,
    {
        self.ensure_ready()?;
        let object_name = crate::proxy::object_name(name)?;
        let invocations = Arc::clone(&self.core.invocations);
        let factory_name = object_name.clone();
        self.core
            .proxies
            .get_or_create("replicated-map", &object_name, move || async move {
                Ok(ReplicatedMap::new(factory_name, invocations))
            })
            .await
    }

    /// Returns a distributed queue proxy.
    pub async fn get_queue<T>(&self, name: &str) -> Result<RemoteQueue<T>>
    where
        T: Serializable + Deserializable + Send + Sync + 'static + Clone,
    {
        self.ensure_ready()?;
        let object_name = crate::proxy::object_name(name)?;
        let invocations = Arc::clone(&self.core.invocations);
        let factory_name = object_name.clone();
        self.core
            .proxies
            .get_or_create("queue", &object_name, move || async move {
                Ok(RemoteQueue::new(factory_name, invocations))
            })
            .await
    }

    /// Returns a topic proxy.
    pub async fn get_topic<T>(&self, name: &str) -> Result<RemoteTopic<T>>
    where
        T: Serializable + Deserializable + Send + Sync + 'static + Clone,
    {
        self.ensure_ready()?;
        let object_name = crate::proxy::object_name(name)?;
        let invocations = Arc::clone(&self.core.invocations);
        let factory_name = object_name.clone();
        self.core
            .proxies
            .get_or_create("topic", &object_name, move || async move {
                Ok(RemoteTopic::new(factory_name, invocations))
            })
            .await
    }

    /// Returns a distributed list proxy.
    pub async fn get_list<T>(&self, name: &str) -> Result<RemoteList<T>>
    where
        T: Serializable + Deserializable + Send + Sync + 'static + Clone,
    {
        self.ensure_ready()?;
        let object_name = crate::proxy::object_name(name)?;
        let invocations = Arc::clone(&self.core.invocations);
        let factory_name = object_name.clone();
        self.core
            .proxies
            .get_or_create("list", &object_name, move || async move {
                Ok(RemoteList::new(factory_name, invocations))
            })
            .await
    }

    /// Returns an atomic counter proxy.
    ///
    /// The name may carry a group suffix (`name@group`); see
    /// [`AtomicCounter`].
    pub async fn get_atomic_counter(&self, name: &str) -> Result<AtomicCounter> {
        self.ensure_ready()?;
        let invocations = Arc::clone(&self.core.invocations);
        let full_name = name.to_string();
        self.core
            .proxies
            .get_or_create("atomic-counter", name, move || async move {
                AtomicCounter::create(&full_name, invocations)
            })
            .await
    }

    /// Adds a lifecycle listener; returns a uuid usable for removal.
    pub fn add_lifecycle_listener(
        &self,
        handler: impl Fn(LifecycleEvent) + Send + Sync + 'static,
    ) -> Result<Uuid> {
        if self.state() >= LifecycleState::Stopping {
            return Err(GridError::NotReady);
        }
        let uuid = Uuid::new_v4();
        let sub_id = self.core.ref_ids.next_id();
        self.subscribe_lifecycle_handler(sub_id, handler);
        self.core
            .lifecycle_subs
            .lock()
            .expect("lifecycle subscriptions poisoned")
            .insert(uuid, sub_id);
        Ok(uuid)
    }

    /// Removes a lifecycle listener. Idempotent.
    pub fn remove_lifecycle_listener(&self, registration: Uuid) -> Result<()> {
        if self.state() >= LifecycleState::Stopping {
            return Err(GridError::NotReady);
        }
        let removed = self
            .core
            .lifecycle_subs
            .lock()
            .expect("lifecycle subscriptions poisoned")
            .remove(&registration);
        if let Some(sub_id) = removed {
            self.core.user_dispatcher.unsubscribe(EVENT_LIFECYCLE, sub_id);
        }
        Ok(())
    }

    /// Adds a membership listener; returns a uuid usable for removal.
    pub fn add_membership_listener(
        &self,
        handler: impl Fn(&MembershipEvent) + Send + Sync + 'static,
    ) -> Result<Uuid> {
        if self.state() >= LifecycleState::Stopping {
            return Err(GridError::NotReady);
        }
        let uuid = Uuid::new_v4();
        let added_id = self.core.ref_ids.next_id();
        let removed_id = self.core.ref_ids.next_id();
        self.subscribe_membership_handler(added_id, removed_id, handler);
        self.core
            .membership_subs
            .lock()
            .expect("membership subscriptions poisoned")
            .insert(uuid, (added_id, removed_id));
        Ok(uuid)
    }

    /// Removes a membership listener. Idempotent.
    pub fn remove_membership_listener(&self, registration: Uuid) -> Result<()> {
        if self.state() >= LifecycleState::Stopping {
            return Err(GridError::NotReady);
        }
        let removed = self
            .core
            .membership_subs
            .lock()
            .expect("membership subscriptions poisoned")
            .remove(&registration);
        if let Some((added_id, removed_id)) = removed {
            self.core
                .user_dispatcher
                .unsubscribe(EVENT_MEMBERS_ADDED, added_id);
            self.core
                .user_dispatcher
                .unsubscribe(EVENT_MEMBERS_REMOVED, removed_id);
        }
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state() != LifecycleState::Ready {
            return Err(GridError::NotReady);
        }
        Ok(())
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.core
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn publish_lifecycle(&self, event: LifecycleEvent) {
        tracing::debug!(state = %event, "lifecycle state changed");
        self.core
            .dispatcher
            .publish(ClientEvent::LifecycleStateChanged(event));
    }

    /// Forwards internal events onto the user-facing dispatcher, so user
    /// handlers can never stall internal routing.
    fn bridge_user_events(&self) {
        let forwards: [(&'static str, Option<LifecycleEvent>); 4] = [
            (EVENT_LIFECYCLE, None),
            (EVENT_CONNECTED, Some(LifecycleEvent::ClientConnected)),
            (EVENT_DISCONNECTED, Some(LifecycleEvent::ClientDisconnected)),
            (EVENT_MEMBERS_ADDED, None),
        ];
        for (event_name, mapped) in forwards {
            let user = Arc::clone(&self.core.user_dispatcher);
            self.core.dispatcher.subscribe_sync(
                event_name,
                self.core.ref_ids.next_id(),
                Arc::new(move |event| match mapped {
                    Some(lifecycle) => {
                        user.publish(ClientEvent::LifecycleStateChanged(lifecycle))
                    }
                    None => user.publish(event.clone()),
                }),
            );
        }
        let user = Arc::clone(&self.core.user_dispatcher);
        self.core.dispatcher.subscribe_sync(
            EVENT_MEMBERS_REMOVED,
            self.core.ref_ids.next_id(),
            Arc::new(move |event| user.publish(event.clone())),
        );
    }

    fn attach_config_listeners(&self) {
        for listener in self.core.config.lifecycle_listeners() {
            let listener = Arc::clone(listener);
            let sub_id = self.core.ref_ids.next_id();
            self.subscribe_lifecycle_handler(sub_id, move |event| listener(event));
        }
        for listener in self.core.config.membership_listeners() {
            let listener = Arc::clone(listener);
            let added_id = self.core.ref_ids.next_id();
            let removed_id = self.core.ref_ids.next_id();
            self.subscribe_membership_handler(added_id, removed_id, move |event| listener(event));
        }
    }

    fn subscribe_lifecycle_handler(
        &self,
        sub_id: i64,
        handler: impl Fn(LifecycleEvent) + Send + Sync + 'static,
    ) {
        self.core.user_dispatcher.subscribe_sync(
            EVENT_LIFECYCLE,
            sub_id,
            Arc::new(move |event| {
                if let ClientEvent::LifecycleStateChanged(state) = event {
                    handler(*state);
                }
            }),
        );
    }

    fn subscribe_membership_handler(
        &self,
        added_id: i64,
        removed_id: i64,
        handler: impl Fn(&MembershipEvent) + Send + Sync + 'static,
    ) {
        let handler = Arc::new(handler);
        let added_handler = Arc::clone(&handler);
        self.core.user_dispatcher.subscribe_sync(
            EVENT_MEMBERS_ADDED,
            added_id,
            Arc::new(move |event| {
                if let ClientEvent::MembersAdded(members) = event {
                    for member in members {
                        added_handler(&MembershipEvent::added(member.clone()));
                    }
                }
            }),
        );
        self.core.user_dispatcher.subscribe_sync(
            EVENT_MEMBERS_REMOVED,
            removed_id,
            Arc::new(move |event| {
                if let ClientEvent::MembersRemoved(members) = event {
                    for member in members {
                        handler(&MembershipEvent::removed(member.clone()));
                    }
                }
            }),
        );
    }

    /// Shuts the client down when the connection manager reports an
    /// unrecoverable connection loss.
    fn spawn_fatal_watcher(&self) {
        let client = self.clone();
        let mut fatal = self.core.manager.subscribe_fatal();
        tokio::spawn(async move {
            while fatal.changed().await.is_ok() {
                if *fatal.borrow() {
                    tracing::warn!("connection loss is unrecoverable, shutting down client");
                    let _ = client.shutdown().await;
                    return;
                }
            }
        });
    }
}
