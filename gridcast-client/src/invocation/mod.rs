//! The invocation service: partition-aware request routing, correlation,
//! retries, timeouts and cancellation.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use gridcast_core::{next_correlation_id, GridError, Message, Result};

use crate::cluster::PartitionService;
use crate::config::InvocationConfig;
use crate::connection::{decode_error_frame, Connection, ConnectionId, ConnectionManager};

/// Where an invocation is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPolicy {
    /// Route to the connection of the partition's current owner; fall back
    /// to a random live connection while the owner is unknown.
    Partition(i32),
    /// Route to the given member; fail fast if it is not connected.
    Member(Uuid),
    /// Route to any live connection.
    Random,
    /// Route to one specific connection.
    Connection(ConnectionId),
}

/// Per-invocation options: deadline, retry budget, cancellation.
#[derive(Debug, Clone, Default)]
pub struct InvocationOptions {
    timeout: Option<Duration>,
    unbounded: bool,
    retry_safe: bool,
    max_retries: Option<u32>,
    retry_pause: Option<Duration>,
    cancellation: Option<CancellationToken>,
}

impl InvocationOptions {
    /// Creates options with the service defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the invocation deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self.unbounded = false;
        self
    }

    /// Removes the deadline entirely.
    ///
    /// An unbounded invocation must carry a cancellation token; otherwise
    /// nothing could ever stop it.
    pub fn no_timeout(mut self) -> Self {
        self.unbounded = true;
        self
    }

    /// Marks the operation as safe to retry (read-only or CAS-style, or a
    /// mutation carrying a server-side dedup key).
    pub fn retry_safe(mut self, retry_safe: bool) -> Self {
        self.retry_safe = retry_safe;
        self
    }

    /// Overrides the maximum retry count.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Overrides the pause between retries.
    pub fn retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = Some(pause);
        self
    }

    /// Attaches a cancellation token; cancelling it removes the waiter and
    /// short-circuits retries.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Routes logical invocations onto member connections.
///
/// Every attempt stamps a fresh correlation id, registers the waiter in the
/// chosen connection's correlation table, enqueues the frame on that
/// connection's bounded send queue, then awaits the response, the deadline
/// or cancellation. A live invocation is registered with exactly one
/// connection; the waiter is removed before the caller is woken.
#[derive(Debug)]
pub struct InvocationService {
    manager: Arc<ConnectionManager>,
    partitions: Arc<PartitionService>,
    defaults: InvocationConfig,
}

enum Attempt {
    Response(Message),
    Retryable { error: GridError, ambiguous: bool },
}

impl InvocationService {
    /// Creates an invocation service routing through the given manager.
    pub fn new(
        manager: Arc<ConnectionManager>,
        partitions: Arc<PartitionService>,
        defaults: InvocationConfig,
    ) -> Self {
        Self {
            manager,
            partitions,
            defaults,
        }
    }

    /// Returns the partition service used for key routing.
    pub fn partitions(&self) -> &Arc<PartitionService> {
        &self.partitions
    }

    /// Invokes a request and awaits its response.
    pub async fn invoke(
        &self,
        request: Message,
        target: TargetPolicy,
        options: InvocationOptions,
    ) -> Result<Message> {
        let deadline = if options.unbounded {
            if options.cancellation.is_none() {
                return Err(GridError::MissingContext(
                    "an invocation without a deadline requires a cancellation token".to_string(),
                ));
            }
            None
        } else {
            let timeout = options.timeout.unwrap_or(self.defaults.timeout());
            Some(Instant::now() + timeout)
        };

        let max_retries = options.max_retries.unwrap_or(self.defaults.max_retries());
        let retry_pause = options.retry_pause.unwrap_or(self.defaults.retry_pause());
        let cancellation = options.cancellation.clone();

        let mut request = request;
        let mut attempt: u32 = 0;

        loop {
            if let Some(token) = &cancellation {
                if token.is_cancelled() {
                    return Err(GridError::Cancelled);
                }
            }

            let connection = match self.pick_connection(&target)? {
                Some(connection) => connection,
                None if options.retry_safe => {
                    match deadline {
                        Some(deadline) => {
                            self.manager.await_connection(deadline.into_std()).await?;
                        }
                        // Unbounded invocations poll under their token.
                        None => tokio::time::sleep(retry_pause).await,
                    }
                    continue;
                }
                None => {
                    return Err(GridError::Connection(
                        "no live connection available".to_string(),
                    ));
                }
            };

            match self
                .invoke_once(&mut request, &connection, deadline, &cancellation)
                .await?
            {
                Attempt::Response(response) => return Ok(response),
                Attempt::Retryable { error, ambiguous } => {
                    if !options.retry_safe {
                        if ambiguous {
                            return Err(GridError::IndeterminateOperation(format!(
                                "connection lost after the request was sent: {}",
                                error
                            )));
                        }
                        return Err(error);
                    }
                    if attempt >= max_retries {
                        tracing::warn!(attempts = attempt + 1, error = %error, "retry budget exhausted");
                        return Err(error);
                    }
                    attempt += 1;
                    tracing::debug!(
                        attempt = attempt,
                        target = ?target,
                        error = %error,
                        "retrying invocation"
                    );
                    if let Some(deadline) = deadline {
                        if Instant::now() + retry_pause >= deadline {
                            return Err(GridError::Timeout(
                                "deadline exceeded while retrying".to_string(),
                            ));
                        }
                    }
                    tokio::time::sleep(retry_pause).await;
                }
            }
        }
    }

    /// One send/await cycle on one connection.
    ///
    /// `Ok(Attempt::Retryable)` carries transport-level failures the retry
    /// loop may absorb; terminal failures (timeout, cancellation,
    /// non-retryable server errors) return `Err` directly.
    async fn invoke_once(
        &self,
        request: &mut Message,
        connection: &Arc<Connection>,
        deadline: Option<Instant>,
        cancellation: &Option<CancellationToken>,
    ) -> Result<Attempt> {
        let correlation_id = next_correlation_id();
        request.set_correlation_id(correlation_id);

        let mut waiter = connection.register_waiter(correlation_id);

        // Enqueue on the bounded send queue, waiting at most until the
        // deadline when the queue is full.
        let send_result = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, connection.send(request.clone())).await {
                Ok(result) => result,
                Err(_) => {
                    connection.remove_waiter(correlation_id);
                    return Err(GridError::Timeout(
                        "deadline exceeded while enqueueing the request".to_string(),
                    ));
                }
            },
            None => connection.send(request.clone()).await,
        };
        if let Err(error) = send_result {
            connection.remove_waiter(correlation_id);
            return Ok(Attempt::Retryable {
                error,
                ambiguous: false,
            });
        }

        let outcome = tokio::select! {
            outcome = &mut waiter => outcome,
            _ = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => {
                connection.remove_waiter(correlation_id);
                return Err(GridError::Timeout(format!(
                    "invocation {} timed out",
                    correlation_id
                )));
            }
            _ = async {
                match cancellation {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending().await,
                }
            } => {
                connection.remove_waiter(correlation_id);
                return Err(GridError::Cancelled);
            }
        };

        let result = match outcome {
            Ok(result) => result,
            // The connection dropped the waiter channel; treat like a close.
            Err(_) => Err(GridError::Connection("connection closed".to_string())),
        };

        match result {
            Ok(response) => {
                if response.is_error() {
                    let error = decode_error_frame(&response);
                    if error.is_retryable() {
                        // The server refused before executing; not ambiguous.
                        Ok(Attempt::Retryable {
                            error,
                            ambiguous: false,
                        })
                    } else {
                        Err(error)
                    }
                } else {
                    Ok(Attempt::Response(response))
                }
            }
            // Connection lost while awaiting: the request may have executed.
            Err(error) => Ok(Attempt::Retryable {
                error,
                ambiguous: true,
            }),
        }
    }

    /// Invokes a subscription-style request on one connection, binding a
    /// handler for the server-initiated event frames the subscription will
    /// produce.
    ///
    /// The handler is bound to the request's correlation id before the frame
    /// is sent, so no event can arrive unrouted. Returns the response and
    /// the carrier connection's id; the caller re-registers on another
    /// connection when the carrier closes.
    pub async fn invoke_with_event_handler(
        &self,
        mut request: Message,
        handler: crate::connection::EventHandlerFn,
        options: InvocationOptions,
    ) -> Result<(Message, ConnectionId)> {
        let deadline = Instant::now() + options.timeout.unwrap_or(self.defaults.timeout());

        let connection = match self.pick_connection(&TargetPolicy::Random)? {
            Some(connection) => connection,
            None => self.manager_await(deadline).await?,
        };

        let correlation_id = next_correlation_id();
        request.set_correlation_id(correlation_id);
        connection.register_event_handler(correlation_id, handler);

        let waiter = connection.register_waiter(correlation_id);
        if let Err(e) = connection.send(request).await {
            connection.remove_event_handler(correlation_id);
            return Err(e);
        }

        let response = match tokio::time::timeout_at(deadline, waiter).await {
            Ok(Ok(Ok(response))) => response,
            Ok(Ok(Err(error))) => {
                connection.remove_event_handler(correlation_id);
                return Err(error);
            }
            Ok(Err(_)) => {
                connection.remove_event_handler(correlation_id);
                return Err(GridError::Connection("connection closed".to_string()));
            }
            Err(_) => {
                connection.remove_waiter(correlation_id);
                connection.remove_event_handler(correlation_id);
                return Err(GridError::Timeout("listener registration timed out".to_string()));
            }
        };

        if response.is_error() {
            connection.remove_event_handler(correlation_id);
            return Err(decode_error_frame(&response));
        }
        Ok((response, connection.id()))
    }

    /// Removes an event handler binding from a connection, if it is live.
    pub fn unbind_event_handler(&self, connection_id: ConnectionId, correlation_id: i64) {
        if let Some(connection) = self.manager.connection_by_id(connection_id) {
            connection.remove_event_handler(correlation_id);
        }
    }

    /// Returns `true` while the given connection is live.
    pub fn is_connection_live(&self, connection_id: ConnectionId) -> bool {
        self.manager.connection_by_id(connection_id).is_some()
    }

    async fn manager_await(&self, deadline: Instant) -> Result<Arc<Connection>> {
        self.manager.await_connection(deadline.into_std()).await
    }

    /// Picks a target connection per policy.
    ///
    /// `Ok(None)` means no connection is currently available for a policy
    /// that allows waiting; hard routing failures return `Err`.
    fn pick_connection(&self, target: &TargetPolicy) -> Result<Option<Arc<Connection>>> {
        match target {
            TargetPolicy::Partition(partition_id) => {
                let owned = self
                    .partitions
                    .partition_owner(*partition_id)
                    .and_then(|owner| self.manager.connection_for_member(&owner));
                match owned {
                    Some(connection) => Ok(Some(connection)),
                    None => Ok(self.manager.random_connection()),
                }
            }
            TargetPolicy::Member(uuid) => match self.manager.connection_for_member(uuid) {
                Some(connection) => Ok(Some(connection)),
                None => Err(GridError::NoSuchMember(format!(
                    "no connected member with uuid {}",
                    uuid
                ))),
            },
            TargetPolicy::Random => Ok(self.manager.random_connection()),
            TargetPolicy::Connection(id) => match self.manager.connection_by_id(*id) {
                Some(connection) => Ok(Some(connection)),
                None => Err(GridError::TargetDisconnected(format!(
                    "{} is no longer live",
                    id
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterService;
    use crate::config::ClientConfig;
    use crate::connection::StaticAddressProvider;
    use crate::event::EventDispatcher;
    use gridcast_core::protocol::constants::MAP_GET;

    fn service_without_connections() -> (InvocationService, Arc<EventDispatcher>) {
        let dispatcher = Arc::new(EventDispatcher::new());
        let config = Arc::new(ClientConfig::builder().build().unwrap());
        let cluster = Arc::new(ClusterService::new(Arc::clone(&dispatcher)));
        let partitions = Arc::new(PartitionService::new(Arc::clone(&dispatcher)));
        let manager = ConnectionManager::new(
            config.clone(),
            Arc::new(StaticAddressProvider::default()),
            Arc::clone(&dispatcher),
            cluster,
            Arc::clone(&partitions),
            Uuid::new_v4(),
            "test-client".to_string(),
        );
        (
            InvocationService::new(manager, partitions, config.invocation().clone()),
            dispatcher,
        )
    }

    #[tokio::test]
    async fn test_unbounded_invocation_requires_cancellation() {
        let (service, dispatcher) = service_without_connections();
        let err = service
            .invoke(
                Message::new(MAP_GET),
                TargetPolicy::Random,
                InvocationOptions::new().no_timeout(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GridError::MissingContext(_)));
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_member_target_fails_fast_for_unknown_uuid() {
        let (service, dispatcher) = service_without_connections();
        let err = service
            .invoke(
                Message::new(MAP_GET),
                TargetPolicy::Member(Uuid::new_v4()),
                InvocationOptions::new().retry_safe(true),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GridError::NoSuchMember(_)));
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_no_connection_fails_fast_for_unsafe_ops() {
        let (service, dispatcher) = service_without_connections();
        let err = service
            .invoke(
                Message::new(MAP_GET),
                TargetPolicy::Random,
                InvocationOptions::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GridError::Connection(_)));
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_retry_safe_waits_until_deadline() {
        let (service, dispatcher) = service_without_connections();
        let start = std::time::Instant::now();
        let err = service
            .invoke(
                Message::new(MAP_GET),
                TargetPolicy::Random,
                InvocationOptions::new()
                    .retry_safe(true)
                    .timeout(Duration::from_millis(80)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GridError::Timeout(_)));
        assert!(start.elapsed() >= Duration::from_millis(70));
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_cancellation_short_circuits_waiting() {
        let (service, dispatcher) = service_without_connections();
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let err = service
            .invoke(
                Message::new(MAP_GET),
                TargetPolicy::Random,
                InvocationOptions::new()
                    .retry_safe(true)
                    .no_timeout()
                    .retry_pause(Duration::from_millis(5))
                    .cancellation(token),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GridError::Cancelled));
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_connection_target_fails_when_gone() {
        let (service, dispatcher) = service_without_connections();
        let err = service
            .invoke(
                Message::new(MAP_GET),
                TargetPolicy::Connection(ConnectionId::new()),
                InvocationOptions::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GridError::TargetDisconnected(_)));
        dispatcher.stop().await;
    }

    #[test]
    fn test_options_builder() {
        let options = InvocationOptions::new()
            .timeout(Duration::from_secs(1))
            .retry_safe(true)
            .max_retries(5)
            .retry_pause(Duration::from_millis(10));
        assert_eq!(options.timeout, Some(Duration::from_secs(1)));
        assert!(options.retry_safe);
        assert_eq!(options.max_retries, Some(5));
    }
}
