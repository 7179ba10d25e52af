//! Process-wide publish/subscribe bus for client events.
//!
//! Every service publishes its events through an [`EventDispatcher`];
//! subscribers attach either synchronously (invoked inline on the
//! publisher's task, in publication order) or asynchronously (queued to a
//! single dedicated worker per dispatcher, preserving per-event order).
//!
//! Handlers must not block indefinitely. The dispatcher does not time them
//! out; a stalled synchronous handler stalls its publisher, and a stalled
//! asynchronous handler stalls every event queued behind it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cluster::Member;
use crate::connection::ConnectionId;

/// Name of the lifecycle state change event.
pub const EVENT_LIFECYCLE: &str = "internal.lifecycle";
/// Name of the cluster-connected event.
pub const EVENT_CONNECTED: &str = "internal.connected";
/// Name of the cluster-disconnected event.
pub const EVENT_DISCONNECTED: &str = "internal.disconnected";
/// Name of the connection-opened event.
pub const EVENT_CONNECTION_OPENED: &str = "internal.connection.opened";
/// Name of the connection-closed event.
pub const EVENT_CONNECTION_CLOSED: &str = "internal.connection.closed";
/// Name of the members-added event.
pub const EVENT_MEMBERS_ADDED: &str = "internal.members.added";
/// Name of the members-removed event.
pub const EVENT_MEMBERS_REMOVED: &str = "internal.members.removed";
/// Name of the partition-table-updated event.
pub const EVENT_PARTITIONS_UPDATED: &str = "internal.partitions.updated";

/// Client lifecycle state transitions observable by listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// The client is starting and initializing resources.
    Starting,
    /// The client has started and is ready to accept operations.
    Started,
    /// The client is beginning the shutdown process.
    ShuttingDown,
    /// The client has completed shutdown.
    Shutdown,
    /// The client has connected to the cluster.
    ClientConnected,
    /// The client has disconnected from the cluster.
    ClientDisconnected,
}

impl LifecycleEvent {
    /// Returns a human-readable name for this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Shutdown => "SHUTDOWN",
            Self::ClientConnected => "CLIENT_CONNECTED",
            Self::ClientDisconnected => "CLIENT_DISCONNECTED",
        }
    }
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A tagged event published on the dispatcher.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The client's lifecycle state changed.
    LifecycleStateChanged(LifecycleEvent),
    /// The client established its first live connection to the cluster.
    Connected {
        /// The address of the member the client connected to.
        address: SocketAddr,
    },
    /// The client lost its last live connection to the cluster.
    Disconnected,
    /// A connection to one member was opened and authenticated.
    ConnectionOpened {
        /// The connection identifier.
        id: ConnectionId,
        /// The remote member address.
        address: SocketAddr,
    },
    /// A connection to one member was closed.
    ConnectionClosed {
        /// The connection identifier.
        id: ConnectionId,
        /// The remote member address.
        address: SocketAddr,
    },
    /// Members joined the cluster (one member-list version step).
    MembersAdded(Vec<Member>),
    /// Members left the cluster (one member-list version step).
    MembersRemoved(Vec<Member>),
    /// The partition table was replaced by a newer version.
    PartitionsUpdated {
        /// The version of the installed table.
        version: i32,
    },
}

impl ClientEvent {
    /// Returns the event name this event is published under.
    pub fn name(&self) -> &'static str {
        match self {
            Self::LifecycleStateChanged(_) => EVENT_LIFECYCLE,
            Self::Connected { .. } => EVENT_CONNECTED,
            Self::Disconnected => EVENT_DISCONNECTED,
            Self::ConnectionOpened { .. } => EVENT_CONNECTION_OPENED,
            Self::ConnectionClosed { .. } => EVENT_CONNECTION_CLOSED,
            Self::MembersAdded(_) => EVENT_MEMBERS_ADDED,
            Self::MembersRemoved(_) => EVENT_MEMBERS_REMOVED,
            Self::PartitionsUpdated { .. } => EVENT_PARTITIONS_UPDATED,
        }
    }
}

/// A subscriber callback.
pub type EventHandler = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Hands out process-unique subscription ids.
///
/// All generators draw from one process-wide sequence, so ids never collide
/// even across services sharing a dispatcher.
#[derive(Debug, Default)]
pub struct ReferenceIdGenerator;

impl ReferenceIdGenerator {
    /// Creates a new generator handle.
    pub const fn new() -> Self {
        Self
    }

    /// Returns the next id.
    pub fn next_id(&self) -> i64 {
        static COUNTER: AtomicI64 = AtomicI64::new(0);
        COUNTER.fetch_add(1, Ordering::Relaxed) + 1
    }
}

struct Subscription {
    id: i64,
    handler: EventHandler,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[derive(Debug, Default)]
struct SubscriptionTable {
    sync: HashMap<&'static str, Vec<Subscription>>,
    r#async: HashMap<&'static str, Vec<Subscription>>,
}

/// The publish/subscribe bus.
///
/// Dropping the dispatcher without calling [`stop`](Self::stop) abandons the
/// async worker; queued events may be lost. Services always stop their
/// dispatchers during shutdown.
pub struct EventDispatcher {
    table: Arc<Mutex<SubscriptionTable>>,
    queue: Mutex<Option<mpsc::UnboundedSender<ClientEvent>>>,
    stopped: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

impl EventDispatcher {
    /// Creates a new dispatcher and spawns its async delivery worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let table: Arc<Mutex<SubscriptionTable>> = Arc::new(Mutex::new(SubscriptionTable::default()));
        let (tx, mut rx) = mpsc::unbounded_channel::<ClientEvent>();

        let worker_table = Arc::clone(&table);
        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let handlers: Vec<EventHandler> = {
                    let table = worker_table.lock().expect("subscription table poisoned");
                    table
                        .r#async
                        .get(event.name())
                        .map(|subs| subs.iter().map(|s| Arc::clone(&s.handler)).collect())
                        .unwrap_or_default()
                };
                for handler in handlers {
                    invoke_handler(&handler, &event);
                }
            }
        });

        Self {
            table,
            queue: Mutex::new(Some(tx)),
            stopped: AtomicBool::new(false),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Subscribes a handler invoked inline on publish, in publication order.
    pub fn subscribe_sync(&self, event: &'static str, sub_id: i64, handler: EventHandler) {
        let mut table = self.table.lock().expect("subscription table poisoned");
        table
            .sync
            .entry(event)
            .or_default()
            .push(Subscription { id: sub_id, handler });
    }

    /// Subscribes a handler invoked on the dispatcher's async worker.
    ///
    /// Per-event delivery order is preserved: the worker processes the
    /// publication queue sequentially.
    pub fn subscribe_async(&self, event: &'static str, sub_id: i64, handler: EventHandler) {
        let mut table = self.table.lock().expect("subscription table poisoned");
        table
            .r#async
            .entry(event)
            .or_default()
            .push(Subscription { id: sub_id, handler });
    }

    /// Removes the subscription with the given id. Idempotent.
    pub fn unsubscribe(&self, event: &'static str, sub_id: i64) {
        let mut table = self.table.lock().expect("subscription table poisoned");
        if let Some(subs) = table.sync.get_mut(event) {
            subs.retain(|s| s.id != sub_id);
        }
        if let Some(subs) = table.r#async.get_mut(event) {
            subs.retain(|s| s.id != sub_id);
        }
    }

    /// Publishes an event.
    ///
    /// Synchronous subscribers run inline before this method returns;
    /// asynchronous subscribers only have the event enqueued. A stopped
    /// dispatcher refuses the publish.
    pub fn publish(&self, event: ClientEvent) {
        if self.stopped.load(Ordering::Acquire) {
            tracing::debug!(event = event.name(), "dropping publish on stopped dispatcher");
            return;
        }

        let handlers: Vec<EventHandler> = {
            let table = self.table.lock().expect("subscription table poisoned");
            table
                .sync
                .get(event.name())
                .map(|subs| subs.iter().map(|s| Arc::clone(&s.handler)).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            invoke_handler(&handler, &event);
        }

        let queue = self.queue.lock().expect("queue poisoned");
        if let Some(tx) = queue.as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Stops the dispatcher: drains the async queue and refuses further
    /// publishes. Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the sender lets the worker drain the remaining queue and exit.
        self.queue.lock().expect("queue poisoned").take();
        let worker = self.worker.lock().expect("worker handle poisoned").take();
        if let Some(handle) = worker {
            let _ = handle.await;
        }
    }

    /// Returns `true` if the dispatcher has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

fn invoke_handler(handler: &EventHandler, event: &ClientEvent) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::warn!(event = event.name(), reason = %reason, "event handler panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_handler(counter: Arc<AtomicUsize>) -> EventHandler {
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_sync_subscriber_runs_inline() {
        let dispatcher = EventDispatcher::new();
        let counter = Arc::new(AtomicUsize::new(0));
        dispatcher.subscribe_sync(EVENT_DISCONNECTED, 1, counting_handler(Arc::clone(&counter)));

        dispatcher.publish(ClientEvent::Disconnected);

        // No await needed: sync handlers complete before publish returns.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_async_subscriber_receives_after_drain() {
        let dispatcher = EventDispatcher::new();
        let counter = Arc::new(AtomicUsize::new(0));
        dispatcher.subscribe_async(EVENT_DISCONNECTED, 1, counting_handler(Arc::clone(&counter)));

        dispatcher.publish(ClientEvent::Disconnected);
        dispatcher.publish(ClientEvent::Disconnected);
        dispatcher.stop().await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_async_preserves_order() {
        let dispatcher = EventDispatcher::new();
        let seen: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        dispatcher.subscribe_async(
            EVENT_LIFECYCLE,
            1,
            Arc::new(move |event| {
                if let ClientEvent::LifecycleStateChanged(state) = event {
                    sink.lock().unwrap().push(state.name());
                }
            }),
        );

        dispatcher.publish(ClientEvent::LifecycleStateChanged(LifecycleEvent::Starting));
        dispatcher.publish(ClientEvent::LifecycleStateChanged(LifecycleEvent::Started));
        dispatcher.publish(ClientEvent::LifecycleStateChanged(LifecycleEvent::ShuttingDown));
        dispatcher.stop().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["STARTING", "STARTED", "SHUTTING_DOWN"]
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let dispatcher = EventDispatcher::new();
        let counter = Arc::new(AtomicUsize::new(0));
        dispatcher.subscribe_sync(EVENT_CONNECTED, 5, counting_handler(Arc::clone(&counter)));

        dispatcher.unsubscribe(EVENT_CONNECTED, 5);
        dispatcher.unsubscribe(EVENT_CONNECTED, 5);
        dispatcher.unsubscribe(EVENT_CONNECTED, 99);

        dispatcher.publish(ClientEvent::Connected {
            address: "127.0.0.1:5701".parse().unwrap(),
        });
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_stopped_dispatcher_refuses_publish() {
        let dispatcher = EventDispatcher::new();
        let counter = Arc::new(AtomicUsize::new(0));
        dispatcher.subscribe_sync(EVENT_DISCONNECTED, 1, counting_handler(Arc::clone(&counter)));

        dispatcher.stop().await;
        dispatcher.publish(ClientEvent::Disconnected);

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(dispatcher.is_stopped());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dispatcher = EventDispatcher::new();
        dispatcher.stop().await;
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_affect_siblings() {
        let dispatcher = EventDispatcher::new();
        let counter = Arc::new(AtomicUsize::new(0));
        dispatcher.subscribe_sync(
            EVENT_DISCONNECTED,
            1,
            Arc::new(|_| panic!("handler failure")),
        );
        dispatcher.subscribe_sync(EVENT_DISCONNECTED, 2, counting_handler(Arc::clone(&counter)));

        dispatcher.publish(ClientEvent::Disconnected);

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_sync_handlers_run_in_publication_order() {
        let dispatcher = EventDispatcher::new();
        let seen: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
        for id in [1i64, 2, 3] {
            let sink = Arc::clone(&seen);
            dispatcher.subscribe_sync(
                EVENT_DISCONNECTED,
                id,
                Arc::new(move |_| sink.lock().unwrap().push(id)),
            );
        }

        dispatcher.publish(ClientEvent::Disconnected);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_slow_async_handler_does_not_block_publisher() {
        let dispatcher = EventDispatcher::new();
        dispatcher.subscribe_async(
            EVENT_DISCONNECTED,
            1,
            Arc::new(|_| std::thread::sleep(Duration::from_millis(50))),
        );

        let start = std::time::Instant::now();
        dispatcher.publish(ClientEvent::Disconnected);
        assert!(start.elapsed() < Duration::from_millis(40));
        dispatcher.stop().await;
    }

    #[test]
    fn test_reference_id_generator_monotonic() {
        let generator = ReferenceIdGenerator::new();
        let a = generator.next_id();
        let b = generator.next_id();
        assert!(b > a);
    }

    #[test]
    fn test_client_event_names() {
        assert_eq!(
            ClientEvent::Disconnected.name(),
            EVENT_DISCONNECTED
        );
        assert_eq!(
            ClientEvent::MembersAdded(vec![]).name(),
            EVENT_MEMBERS_ADDED
        );
        assert_eq!(
            ClientEvent::PartitionsUpdated { version: 1 }.name(),
            EVENT_PARTITIONS_UPDATED
        );
    }

    #[test]
    fn test_lifecycle_event_display() {
        assert_eq!(LifecycleEvent::Starting.to_string(), "STARTING");
        assert_eq!(LifecycleEvent::Shutdown.to_string(), "SHUTDOWN");
    }
}
