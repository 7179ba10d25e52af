//! Connection pool management: opening, authenticating, heartbeating and
//! reconciling connections against the member list.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use gridcast_core::protocol::constants::{CLIENT_ADD_CLUSTER_VIEW_LISTENER, CLIENT_HEARTBEAT};
use gridcast_core::{next_correlation_id, GridError, Message, Result};

use super::address::AddressProvider;
use super::connection::{Connection, ConnectionId};
use super::handshake::{AuthenticationRequest, AuthenticationResponse};
use crate::cluster::{ClusterService, MembersView, PartitionService, PartitionsView};
use crate::config::{ClientConfig, ReconnectMode};
use crate::event::{ClientEvent, EventDispatcher, ReferenceIdGenerator, EVENT_MEMBERS_ADDED, EVENT_MEMBERS_REMOVED};

/// Capacity of each connection's bounded send queue.
const SEND_QUEUE_CAPACITY: usize = 1024;

/// Calculates the next back-off duration with jitter applied.
fn next_backoff(current: Duration, multiplier: f64, max: Duration, jitter: f64) -> Duration {
    let base = current.as_secs_f64() * multiplier;
    let jitter_factor = if jitter > 0.0 {
        let mut rng = rand::thread_rng();
        1.0 + rng.gen_range(-jitter..=jitter)
    } else {
        1.0
    };
    std::cmp::min(Duration::from_secs_f64(base * jitter_factor), max)
}

/// Owns the set of live connections to cluster members.
///
/// In smart-routing mode the manager keeps at most one live connection per
/// member and tries to connect to every member it learns about; in
/// unisocket mode it keeps exactly one connection for all traffic.
pub struct ConnectionManager {
    config: Arc<ClientConfig>,
    address_provider: Arc<dyn AddressProvider>,
    dispatcher: Arc<EventDispatcher>,
    cluster: Arc<ClusterService>,
    partitions: Arc<PartitionService>,
    client_uuid: Uuid,
    client_name: String,

    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    by_member: RwLock<HashMap<Uuid, ConnectionId>>,
    connecting: Mutex<HashSet<SocketAddr>>,
    cluster_uuid: Mutex<Option<Uuid>>,
    view_listener_conn: Mutex<Option<ConnectionId>>,

    running: AtomicBool,
    shutdown_token: CancellationToken,
    connection_added: Notify,
    closed_tx: mpsc::UnboundedSender<ConnectionId>,
    closed_rx: Mutex<Option<mpsc::UnboundedReceiver<ConnectionId>>>,
    fatal_tx: watch::Sender<bool>,
    sub_ids: ReferenceIdGenerator,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("cluster", &self.config.cluster_name())
            .field("running", &self.running.load(Ordering::Relaxed))
            .field(
                "connections",
                &self.connections.read().map(|c| c.len()).unwrap_or(0),
            )
            .finish()
    }
}

impl ConnectionManager {
    /// Creates a connection manager wired to the given services.
    pub fn new(
        config: Arc<ClientConfig>,
        address_provider: Arc<dyn AddressProvider>,
        dispatcher: Arc<EventDispatcher>,
        cluster: Arc<ClusterService>,
        partitions: Arc<PartitionService>,
        client_uuid: Uuid,
        client_name: String,
    ) -> Arc<Self> {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let (fatal_tx, _) = watch::channel(false);

        Arc::new(Self {
            config,
            address_provider,
            dispatcher,
            cluster,
            partitions,
            client_uuid,
            client_name,
            connections: RwLock::new(HashMap::new()),
            by_member: RwLock::new(HashMap::new()),
            connecting: Mutex::new(HashSet::new()),
            cluster_uuid: Mutex::new(None),
            view_listener_conn: Mutex::new(None),
            // Flipped off exactly once, by shutdown.
            running: AtomicBool::new(true),
            shutdown_token: CancellationToken::new(),
            connection_added: Notify::new(),
            closed_tx,
            closed_rx: Mutex::new(Some(closed_rx)),
            fatal_tx,
            sub_ids: ReferenceIdGenerator::new(),
        })
    }

    /// Starts the manager: connects to the first responsive seed address,
    /// then begins heartbeating and reconciling with the member list.
    ///
    /// Failure to authenticate any connection within the cluster-connect
    /// timeout is fatal.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.spawn_closed_watcher();
        self.subscribe_membership_reconcile();

        let deadline = Instant::now() + self.config.cluster_connect_timeout();
        self.connect_to_cluster(Some(deadline)).await?;

        self.spawn_heartbeat_task();
        Ok(())
    }

    /// Shuts the manager down, closing every connection.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shutdown_token.cancel();

        let connections: Vec<Arc<Connection>> = {
            let map = self.connections.read().expect("connection map poisoned");
            map.values().cloned().collect()
        };
        let had_connections = !connections.is_empty();
        for connection in connections {
            connection.close("client shutting down");
        }
        self.connections.write().expect("connection map poisoned").clear();
        self.by_member.write().expect("member index poisoned").clear();

        if had_connections {
            self.dispatcher.publish(ClientEvent::Disconnected);
        }
        tracing::info!("connection manager shut down");
    }

    /// Returns `true` while the manager is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns a receiver flipped to `true` when the client must stop
    /// (reconnect exhausted or reconnect mode is shutdown).
    pub fn subscribe_fatal(&self) -> watch::Receiver<bool> {
        self.fatal_tx.subscribe()
    }

    /// Returns the cluster uuid learned from the first handshake.
    pub fn cluster_uuid(&self) -> Option<Uuid> {
        *self.cluster_uuid.lock().expect("cluster uuid poisoned")
    }

    /// Returns the number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().expect("connection map poisoned").len()
    }

    /// Returns all live connections.
    pub fn active_connections(&self) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .expect("connection map poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Returns the connection to the given member, if live.
    pub fn connection_for_member(&self, uuid: &Uuid) -> Option<Arc<Connection>> {
        let id = *self.by_member.read().expect("member index poisoned").get(uuid)?;
        self.connection_by_id(id)
    }

    /// Returns the connection with the given id, if live.
    pub fn connection_by_id(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .expect("connection map poisoned")
            .get(&id)
            .cloned()
    }

    /// Returns a random live connection.
    pub fn random_connection(&self) -> Option<Arc<Connection>> {
        let map = self.connections.read().expect("connection map poisoned");
        let ids: Vec<ConnectionId> = map.keys().copied().collect();
        ids.choose(&mut rand::thread_rng()).and_then(|id| map.get(id).cloned())
    }

    /// Waits until a live connection exists, bounded by the deadline.
    pub async fn await_connection(&self, deadline: Instant) -> Result<Arc<Connection>> {
        loop {
            if let Some(connection) = self.random_connection() {
                return Ok(connection);
            }
            if !self.is_running() {
                return Err(GridError::Connection("client is shut down".to_string()));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(GridError::Timeout(
                    "no connection became available before the deadline".to_string(),
                ));
            }
            // Bounded poll: a notification between the check above and this
            // await would otherwise be missed.
            let wait = std::cmp::min(deadline - now, Duration::from_millis(50));
            let _ = timeout(wait, self.connection_added.notified()).await;
        }
    }

    /// Connects to the first responsive address, retrying with back-off.
    ///
    /// `deadline: None` retries until shutdown.
    async fn connect_to_cluster(self: &Arc<Self>, deadline: Option<Instant>) -> Result<()> {
        let retry = self.config.retry();
        let mut backoff = retry.initial_backoff();

        loop {
            if self.shutdown_token.is_cancelled() {
                return Err(GridError::Connection("client is shutting down".to_string()));
            }

            let mut addresses = self.address_provider.load_addresses().await?;
            for member in self.cluster.members() {
                if !addresses.contains(&member.address) {
                    addresses.push(member.address);
                }
            }
            if addresses.is_empty() {
                return Err(GridError::Configuration(
                    "no cluster addresses to connect to".to_string(),
                ));
            }

            for address in &addresses {
                match self.connect_to(*address).await {
                    Ok(_) => return Ok(()),
                    Err(e) => {
                        tracing::warn!(address = %address, error = %e, "seed connection failed");
                    }
                }
            }

            if let Some(deadline) = deadline {
                if Instant::now() + backoff >= deadline {
                    return Err(GridError::Connection(format!(
                        "unable to connect to any address of cluster '{}' before the deadline",
                        self.config.cluster_name()
                    )));
                }
            }

            tracing::debug!(backoff = ?backoff, "retrying cluster connect");
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    return Err(GridError::Connection("client is shutting down".to_string()));
                }
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = next_backoff(backoff, retry.multiplier(), retry.max_backoff(), retry.jitter());
        }
    }

    /// Opens and authenticates a connection to one address.
    pub async fn connect_to(self: &Arc<Self>, address: SocketAddr) -> Result<Arc<Connection>> {
        {
            let map = self.connections.read().expect("connection map poisoned");
            if let Some(existing) = map.values().find(|c| c.address() == address) {
                return Ok(Arc::clone(existing));
            }
        }
        if !self.connecting.lock().expect("connecting set poisoned").insert(address) {
            return Err(GridError::Connection(format!(
                "connection attempt to {} already in progress",
                address
            )));
        }

        let result = self.connect_and_authenticate(address).await;
        self.connecting.lock().expect("connecting set poisoned").remove(&address);
        result
    }

    async fn connect_and_authenticate(
        self: &Arc<Self>,
        address: SocketAddr,
    ) -> Result<Arc<Connection>> {
        let connect_timeout = self.config.network().connection_timeout();
        let connection = timeout(
            connect_timeout,
            Connection::open(address, SEND_QUEUE_CAPACITY, self.closed_tx.clone()),
        )
        .await
        .map_err(|_| {
            GridError::Timeout(format!(
                "connection to {} timed out after {:?}",
                address, connect_timeout
            ))
        })??;

        let response = match self.authenticate(&connection).await {
            Ok(response) => response,
            Err(e) => {
                connection.close("authentication failed");
                return Err(e);
            }
        };

        if let Err(e) = self.install_authenticated(&connection, &response) {
            connection.close("handshake rejected");
            return Err(e);
        }

        tracing::info!(
            id = %connection.id(),
            address = %address,
            member = %response.member_uuid,
            "connected to cluster member"
        );
        Ok(connection)
    }

    async fn authenticate(
        self: &Arc<Self>,
        connection: &Arc<Connection>,
    ) -> Result<AuthenticationResponse> {
        let security = self.config.security();
        let request = AuthenticationRequest {
            cluster_name: self.config.cluster_name().to_string(),
            username: security.username().map(str::to_string),
            password: security.password().map(str::to_string),
            client_name: self.client_name.clone(),
            client_uuid: self.client_uuid,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            labels: self.config.labels().to_vec(),
        };

        let mut message = request.encode()?;
        let correlation_id = next_correlation_id();
        message.set_correlation_id(correlation_id);

        let waiter = connection.register_waiter(correlation_id);
        connection.send(message).await?;

        let auth_timeout = self.config.network().connection_timeout();
        let frame = match timeout(auth_timeout, waiter).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => {
                return Err(GridError::Connection(
                    "connection closed during authentication".to_string(),
                ))
            }
            Err(_) => {
                connection.remove_waiter(correlation_id);
                return Err(GridError::Timeout(format!(
                    "authentication timed out after {:?}",
                    auth_timeout
                )));
            }
        };

        if frame.is_error() {
            return Err(decode_error_frame(&frame));
        }
        let response = AuthenticationResponse::decode(&frame)?;
        response.check()?;
        Ok(response)
    }

    /// Installs an authenticated connection into the tables and publishes
    /// the connection events.
    fn install_authenticated(
        self: &Arc<Self>,
        connection: &Arc<Connection>,
        response: &AuthenticationResponse,
    ) -> Result<()> {
        {
            let mut cluster_uuid = self.cluster_uuid.lock().expect("cluster uuid poisoned");
            match *cluster_uuid {
                None => *cluster_uuid = Some(response.cluster_uuid),
                Some(existing) if existing != response.cluster_uuid => {
                    return Err(GridError::IllegalState(format!(
                        "member {} belongs to cluster {}, expected {}",
                        response.member_uuid, response.cluster_uuid, existing
                    )));
                }
                Some(_) => {}
            }
        }

        if !self.partitions.initialize_count(response.partition_count) {
            return Err(GridError::IllegalState(format!(
                "member {} advertises partition count {}, expected {}",
                response.member_uuid,
                response.partition_count,
                self.partitions.partition_count()
            )));
        }

        connection.set_remote_uuid(response.member_uuid);

        let was_empty = {
            let mut map = self.connections.write().expect("connection map poisoned");
            if !self.config.network().smart_routing() && !map.is_empty() {
                return Err(GridError::IllegalState(
                    "unisocket mode keeps a single connection".to_string(),
                ));
            }
            let was_empty = map.is_empty();
            map.insert(connection.id(), Arc::clone(connection));
            self.by_member
                .write()
                .expect("member index poisoned")
                .insert(response.member_uuid, connection.id());
            was_empty
        };

        self.dispatcher.publish(ClientEvent::ConnectionOpened {
            id: connection.id(),
            address: connection.address(),
        });
        if was_empty {
            self.dispatcher.publish(ClientEvent::Connected {
                address: connection.address(),
            });
        }
        self.connection_added.notify_waiters();

        self.ensure_view_listener(connection);
        Ok(())
    }

    /// Registers the cluster view listener on the given connection if no
    /// live connection carries it yet.
    fn ensure_view_listener(self: &Arc<Self>, connection: &Arc<Connection>) {
        {
            let holder = self.view_listener_conn.lock().expect("view listener poisoned");
            if let Some(id) = *holder {
                if self.connection_by_id(id).is_some() {
                    return;
                }
            }
        }
        let manager = Arc::clone(self);
        let connection = Arc::clone(connection);
        tokio::spawn(async move {
            if let Err(e) = manager.register_view_listener(&connection).await {
                tracing::warn!(
                    id = %connection.id(),
                    error = %e,
                    "failed to register cluster view listener"
                );
            }
        });
    }

    async fn register_view_listener(
        self: &Arc<Self>,
        connection: &Arc<Connection>,
    ) -> Result<()> {
        let correlation_id = next_correlation_id();

        let cluster = Arc::clone(&self.cluster);
        let partitions = Arc::clone(&self.partitions);
        connection.register_event_handler(
            correlation_id,
            Arc::new(move |message| {
                handle_view_event(&cluster, &partitions, message);
            }),
        );

        let mut request = Message::new(CLIENT_ADD_CLUSTER_VIEW_LISTENER);
        request.set_correlation_id(correlation_id);
        let waiter = connection.register_waiter(correlation_id);
        if let Err(e) = connection.send(request).await {
            connection.remove_waiter(correlation_id);
            connection.remove_event_handler(correlation_id);
            return Err(e);
        }

        let reply = match timeout(self.config.network().connection_timeout(), waiter).await {
            Ok(Ok(Ok(reply))) => reply,
            Ok(Ok(Err(e))) => {
                connection.remove_event_handler(correlation_id);
                return Err(e);
            }
            Ok(Err(_)) => {
                connection.remove_event_handler(correlation_id);
                return Err(GridError::Connection("connection closed".to_string()));
            }
            Err(_) => {
                connection.remove_waiter(correlation_id);
                connection.remove_event_handler(correlation_id);
                return Err(GridError::Timeout(
                    "cluster view registration timed out".to_string(),
                ));
            }
        };
        if reply.is_error() {
            connection.remove_event_handler(correlation_id);
            return Err(decode_error_frame(&reply));
        }

        *self.view_listener_conn.lock().expect("view listener poisoned") = Some(connection.id());
        tracing::debug!(id = %connection.id(), "cluster view listener registered");
        Ok(())
    }

    /// Spawns the task that reacts to closed connections.
    fn spawn_closed_watcher(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let mut closed_rx = self
            .closed_rx
            .lock()
            .expect("closed receiver poisoned")
            .take()
            .expect("closed watcher started twice");

        tokio::spawn(async move {
            while let Some(id) = closed_rx.recv().await {
                manager.handle_connection_closed(id);
            }
        });
    }

    fn handle_connection_closed(self: &Arc<Self>, id: ConnectionId) {
        let removed = {
            let mut map = self.connections.write().expect("connection map poisoned");
            map.remove(&id)
        };
        let Some(connection) = removed else {
            return;
        };

        self.by_member
            .write()
            .expect("member index poisoned")
            .retain(|_, conn_id| *conn_id != id);
        {
            let mut holder = self.view_listener_conn.lock().expect("view listener poisoned");
            if *holder == Some(id) {
                *holder = None;
            }
        }

        self.dispatcher.publish(ClientEvent::ConnectionClosed {
            id,
            address: connection.address(),
        });

        if !self.is_running() {
            return;
        }

        let remaining = self.active_connections();
        if let Some(next) = remaining.first() {
            // The cluster view listener must survive the loss of its carrier.
            self.ensure_view_listener(next);
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                manager.reconcile_connections().await;
            });
            return;
        }

        self.dispatcher.publish(ClientEvent::Disconnected);
        match self.config.reconnect_mode() {
            ReconnectMode::Shutdown => {
                tracing::warn!("last connection lost, reconnect mode is shutdown");
                let _ = self.fatal_tx.send(true);
            }
            ReconnectMode::KeepTrying => {
                let manager = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = manager.connect_to_cluster(None).await {
                        tracing::warn!(error = %e, "reconnect loop ended");
                    }
                });
            }
            ReconnectMode::UntilDeadline => {
                let manager = Arc::clone(self);
                tokio::spawn(async move {
                    let deadline = Instant::now() + manager.config.cluster_connect_timeout();
                    if let Err(e) = manager.connect_to_cluster(Some(deadline)).await {
                        tracing::error!(error = %e, "reconnect deadline exhausted");
                        let _ = manager.fatal_tx.send(true);
                    }
                });
            }
        }
    }

    /// Subscribes the smart-routing reconciler to membership events.
    fn subscribe_membership_reconcile(self: &Arc<Self>) {
        if !self.config.network().smart_routing() {
            return;
        }

        let manager = Arc::clone(self);
        self.dispatcher.subscribe_sync(
            EVENT_MEMBERS_ADDED,
            self.sub_ids.next_id(),
            Arc::new(move |_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    manager.reconcile_connections().await;
                });
            }),
        );

        let manager = Arc::clone(self);
        self.dispatcher.subscribe_sync(
            EVENT_MEMBERS_REMOVED,
            self.sub_ids.next_id(),
            Arc::new(move |event| {
                if let ClientEvent::MembersRemoved(members) = event {
                    for member in members {
                        if let Some(connection) = manager.connection_for_member(&member.uuid) {
                            connection.close("member left the cluster");
                        }
                    }
                }
            }),
        );
    }

    /// Connects to every known member that has no live connection yet.
    async fn reconcile_connections(self: &Arc<Self>) {
        if !self.is_running() {
            return;
        }
        for member in self.cluster.members() {
            let connected = self
                .by_member
                .read()
                .expect("member index poisoned")
                .contains_key(&member.uuid);
            if connected {
                continue;
            }
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = manager.connect_to(member.address).await {
                    tracing::debug!(
                        member = %member.uuid,
                        address = %member.address,
                        error = %e,
                        "member reconcile connect failed"
                    );
                }
            });
        }
    }

    /// Spawns the periodic heartbeat task.
    fn spawn_heartbeat_task(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let interval = self.config.network().heartbeat_interval();
        let idle_timeout = self.config.network().heartbeat_timeout();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = manager.shutdown_token.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                for connection in manager.active_connections() {
                    if connection.last_read_at().elapsed() > idle_timeout {
                        connection.close("heartbeat timeout");
                        continue;
                    }
                    if connection.last_write_at().elapsed() >= interval {
                        let connection = Arc::clone(&connection);
                        tokio::spawn(async move {
                            send_heartbeat(&connection, idle_timeout).await;
                        });
                    }
                }
            }
        });
    }
}

/// Sends one heartbeat ping and discards the pong.
async fn send_heartbeat(connection: &Arc<Connection>, pong_timeout: Duration) {
    let correlation_id = next_correlation_id();
    let mut ping = Message::new(CLIENT_HEARTBEAT);
    ping.set_correlation_id(correlation_id);

    let waiter = connection.register_waiter(correlation_id);
    if connection.send(ping).await.is_err() {
        connection.remove_waiter(correlation_id);
        return;
    }
    match timeout(pong_timeout, waiter).await {
        Ok(_) => {}
        Err(_) => connection.remove_waiter(correlation_id),
    }
}

/// Applies a cluster view event frame to the owning services.
fn handle_view_event(
    cluster: &Arc<ClusterService>,
    partitions: &Arc<PartitionService>,
    message: Message,
) {
    use gridcast_core::protocol::constants::{EVENT_MEMBERS_VIEW, EVENT_PARTITIONS_VIEW};

    match message.message_type() {
        EVENT_MEMBERS_VIEW => match MembersView::decode(&message) {
            Ok(view) => {
                cluster.apply_members_view(view.version, view.members);
            }
            Err(e) => tracing::warn!(error = %e, "dropping malformed member view"),
        },
        EVENT_PARTITIONS_VIEW => match PartitionsView::decode(&message) {
            Ok(view) => {
                partitions.apply_partitions_view(view.version, view.owners);
            }
            Err(e) => tracing::warn!(error = %e, "dropping malformed partition view"),
        },
        other => {
            tracing::warn!(message_type = other, "unexpected frame on cluster view subscription");
        }
    }
}

/// Decodes a server error response frame.
pub(crate) fn decode_error_frame(message: &Message) -> GridError {
    use gridcast_core::{DataInput, ObjectDataInput};

    let mut input = ObjectDataInput::new(message.payload());
    let code = match input.read_int() {
        Ok(code) => code,
        Err(e) => return e,
    };
    let text = input.read_string().unwrap_or_default();
    GridError::from_server(code, text)
}
