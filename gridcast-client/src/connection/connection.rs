//! A single connection to a cluster member: framed stream, reader/writer
//! workers and the correlation table.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use gridcast_core::protocol::constants::PROTOCOL_PREAMBLE;
use gridcast_core::{GridError, Message, MessageCodec, Result};

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generates a new unique connection id.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Handler invoked for server-initiated event frames bound to one
/// subscription correlation id.
pub type EventHandlerFn = Arc<dyn Fn(Message) + Send + Sync>;

type Waiter = oneshot::Sender<Result<Message>>;

/// A connection to a single cluster member.
///
/// Each connection runs two workers: a writer draining the bounded send
/// queue in order, and a reader that buffers incoming bytes, cuts them into
/// frames and wakes the registered waiter (or event handler) for each
/// frame's correlation id. The connection manager is the only mutator of
/// the lifecycle state; everything else holds a shared handle.
pub struct Connection {
    id: ConnectionId,
    address: SocketAddr,
    remote_uuid: Mutex<Option<Uuid>>,
    send_tx: mpsc::Sender<Message>,
    pending: Mutex<HashMap<i64, Waiter>>,
    event_handlers: Mutex<HashMap<i64, EventHandlerFn>>,
    closed: AtomicBool,
    cancel: CancellationToken,
    connected_at: Instant,
    last_read: Mutex<Instant>,
    last_write: Mutex<Instant>,
    closed_tx: mpsc::UnboundedSender<ConnectionId>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("remote_uuid", &self.remote_uuid())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Opens a connection: TCP connect, protocol preamble, worker spawn.
    ///
    /// `closed_tx` receives the connection id once the connection closes,
    /// so the manager can remove it from its table.
    pub async fn open(
        address: SocketAddr,
        send_queue_capacity: usize,
        closed_tx: mpsc::UnboundedSender<ConnectionId>,
    ) -> Result<Arc<Self>> {
        let mut stream = TcpStream::connect(address).await.map_err(|e| {
            GridError::Connection(format!("failed to connect to {}: {}", address, e))
        })?;
        stream
            .set_nodelay(true)
            .map_err(|e| GridError::Connection(format!("failed to set TCP_NODELAY: {}", e)))?;

        stream.write_all(PROTOCOL_PREAMBLE).await.map_err(|e| {
            GridError::Connection(format!("failed to send preamble to {}: {}", address, e))
        })?;

        let (read_half, write_half) = stream.into_split();
        let (send_tx, send_rx) = mpsc::channel(send_queue_capacity);

        let now = Instant::now();
        let connection = Arc::new(Self {
            id: ConnectionId::new(),
            address,
            remote_uuid: Mutex::new(None),
            send_tx,
            pending: Mutex::new(HashMap::new()),
            event_handlers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            connected_at: now,
            last_read: Mutex::new(now),
            last_write: Mutex::new(now),
            closed_tx,
        });

        tokio::spawn(Self::writer_loop(Arc::clone(&connection), write_half, send_rx));
        tokio::spawn(Self::reader_loop(Arc::clone(&connection), read_half));

        tracing::debug!(id = %connection.id, address = %address, "connection established");
        Ok(connection)
    }

    /// Returns the connection's unique identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the remote address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Returns the uuid of the member behind this connection, once known.
    pub fn remote_uuid(&self) -> Option<Uuid> {
        *self.remote_uuid.lock().expect("remote uuid poisoned")
    }

    /// Records the member uuid learned from the authentication response.
    pub fn set_remote_uuid(&self, uuid: Uuid) {
        *self.remote_uuid.lock().expect("remote uuid poisoned") = Some(uuid);
    }

    /// Returns when this connection was established.
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Returns when a frame was last read from this connection.
    pub fn last_read_at(&self) -> Instant {
        *self.last_read.lock().expect("last read poisoned")
    }

    /// Returns when a frame was last written to this connection.
    pub fn last_write_at(&self) -> Instant {
        *self.last_write.lock().expect("last write poisoned")
    }

    /// Returns `true` until the connection closes.
    pub fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Returns `true` once the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Enqueues a frame on the bounded send queue, in order.
    ///
    /// Suspends while the queue is full; the caller bounds the wait with its
    /// own deadline.
    pub async fn send(&self, message: Message) -> Result<()> {
        if self.is_closed() {
            return Err(GridError::Connection(format!(
                "{} to {} is closed",
                self.id, self.address
            )));
        }
        self.send_tx.send(message).await.map_err(|_| {
            GridError::Connection(format!("{} to {} is closed", self.id, self.address))
        })
    }

    /// Registers a response waiter for a correlation id.
    ///
    /// The waiter is woken with the response frame, or with a connection-lost
    /// error when the connection closes first.
    pub fn register_waiter(&self, correlation_id: i64) -> oneshot::Receiver<Result<Message>> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("correlation table poisoned")
            .insert(correlation_id, tx);

        // The close path may have drained the table just before the insert.
        if self.is_closed() {
            if let Some(waiter) = self
                .pending
                .lock()
                .expect("correlation table poisoned")
                .remove(&correlation_id)
            {
                let _ = waiter.send(Err(GridError::Connection(format!(
                    "{} to {} is closed",
                    self.id, self.address
                ))));
            }
        }
        rx
    }

    /// Removes a response waiter; used on timeout and cancellation.
    pub fn remove_waiter(&self, correlation_id: i64) {
        self.pending
            .lock()
            .expect("correlation table poisoned")
            .remove(&correlation_id);
    }

    /// Returns the number of registered waiters.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("correlation table poisoned").len()
    }

    /// Binds a handler for server-initiated event frames carrying the given
    /// subscription correlation id.
    pub fn register_event_handler(&self, correlation_id: i64, handler: EventHandlerFn) {
        self.event_handlers
            .lock()
            .expect("event handler table poisoned")
            .insert(correlation_id, handler);
    }

    /// Removes an event handler binding. Idempotent.
    pub fn remove_event_handler(&self, correlation_id: i64) {
        self.event_handlers
            .lock()
            .expect("event handler table poisoned")
            .remove(&correlation_id);
    }

    /// Closes the connection. Idempotent.
    ///
    /// All pending waiters fail with a retryable connection-lost error and
    /// the manager is notified through the closed channel.
    pub fn close(&self, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(id = %self.id, address = %self.address, reason = reason, "closing connection");
        self.cancel.cancel();

        let waiters: Vec<(i64, Waiter)> = {
            let mut pending = self.pending.lock().expect("correlation table poisoned");
            pending.drain().collect()
        };
        for (correlation_id, waiter) in waiters {
            let _ = waiter.send(Err(GridError::Connection(format!(
                "{} to {} closed while invocation {} was in flight: {}",
                self.id, self.address, correlation_id, reason
            ))));
        }
        self.event_handlers
            .lock()
            .expect("event handler table poisoned")
            .clear();

        let _ = self.closed_tx.send(self.id);
    }

    async fn writer_loop(
        connection: Arc<Self>,
        mut write_half: OwnedWriteHalf,
        mut send_rx: mpsc::Receiver<Message>,
    ) {
        let mut codec = MessageCodec::new();
        let mut buffer = BytesMut::new();
        loop {
            let message = tokio::select! {
                _ = connection.cancel.cancelled() => break,
                message = send_rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            buffer.clear();
            if codec.encode(message, &mut buffer).is_err() {
                continue;
            }
            // write_all retries partial writes until the frame is out.
            if let Err(e) = write_half.write_all(&buffer).await {
                connection.close(&format!("write failed: {}", e));
                break;
            }
            *connection.last_write.lock().expect("last write poisoned") = Instant::now();
        }
    }

    async fn reader_loop(connection: Arc<Self>, mut read_half: OwnedReadHalf) {
        let mut codec = MessageCodec::new();
        let mut buffer = BytesMut::with_capacity(16 * 1024);
        loop {
            let read = tokio::select! {
                _ = connection.cancel.cancelled() => break,
                read = read_half.read_buf(&mut buffer) => read,
            };

            match read {
                Ok(0) => {
                    connection.close("remote closed the stream");
                    break;
                }
                Ok(_) => {
                    *connection.last_read.lock().expect("last read poisoned") = Instant::now();
                    loop {
                        match codec.decode(&mut buffer) {
                            Ok(Some(message)) => connection.route(message),
                            Ok(None) => break,
                            Err(e) => {
                                connection.close(&format!("frame decode failed: {}", e));
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    connection.close(&format!("read failed: {}", e));
                    break;
                }
            }
        }
    }

    /// Routes an inbound frame to its waiter, or to the subscription handler
    /// table when no waiter is registered (server-initiated events).
    fn route(&self, message: Message) {
        let correlation_id = message.correlation_id();

        let waiter = self
            .pending
            .lock()
            .expect("correlation table poisoned")
            .remove(&correlation_id);
        if let Some(waiter) = waiter {
            let _ = waiter.send(Ok(message));
            return;
        }

        let handler = self
            .event_handlers
            .lock()
            .expect("event handler table poisoned")
            .get(&correlation_id)
            .cloned();
        match handler {
            Some(handler) => handler(message),
            None => {
                tracing::trace!(
                    id = %self.id,
                    correlation_id = correlation_id,
                    "frame with no waiter or handler"
                );
            }
        }
    }
}
