//! Client configuration types and builders.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use gridcast_core::{GridError, Result};

use crate::cluster::MembershipEvent;
use crate::event::LifecycleEvent;
use crate::nearcache::NearCacheConfig;

/// A lifecycle listener attached through configuration.
pub type LifecycleListenerFn = Arc<dyn Fn(LifecycleEvent) + Send + Sync>;

/// A membership listener attached through configuration.
pub type MembershipListenerFn = Arc<dyn Fn(&MembershipEvent) + Send + Sync>;

/// The default member address tried when none is configured.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:5701";

/// What the client does after losing its last live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectMode {
    /// Keep retrying indefinitely with back-off.
    KeepTrying,
    /// Retry until the configured cluster-connect deadline, then fail the
    /// client.
    UntilDeadline,
    /// Shut the client down immediately.
    Shutdown,
}

/// Network-level settings: seed addresses, timeouts, routing mode.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    addresses: Vec<SocketAddr>,
    connection_timeout: Duration,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    smart_routing: bool,
}

impl NetworkConfig {
    /// Returns the configured seed addresses.
    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addresses
    }

    /// Returns the per-attempt connection timeout.
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// Returns the heartbeat send interval.
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Returns the idle timeout after which a silent connection is closed.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    /// Returns whether smart routing is enabled.
    ///
    /// With smart routing the client connects to every member and sends each
    /// request straight to its partition owner; without it a single
    /// connection carries all traffic.
    pub fn smart_routing(&self) -> bool {
        self.smart_routing
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            connection_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(60),
            smart_routing: true,
        }
    }
}

/// Builder for [`NetworkConfig`].
#[derive(Debug, Default)]
pub struct NetworkConfigBuilder {
    config: NetworkConfig,
}

impl NetworkConfigBuilder {
    /// Adds a seed address.
    pub fn add_address(mut self, address: SocketAddr) -> Self {
        self.config.addresses.push(address);
        self
    }

    /// Sets the per-attempt connection timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Sets the heartbeat send interval.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Sets the idle timeout after which a silent connection is closed.
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.config.heartbeat_timeout = timeout;
        self
    }

    /// Enables or disables smart routing.
    pub fn smart_routing(mut self, enabled: bool) -> Self {
        self.config.smart_routing = enabled;
        self
    }
}

/// Back-off settings for reconnect attempts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter: f64,
}

impl RetryConfig {
    /// Returns the first back-off delay.
    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Returns the upper bound on back-off delays.
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Returns the back-off growth factor.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Returns the jitter fraction applied to each delay.
    pub fn jitter(&self) -> f64 {
        self.jitter
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

/// Builder for [`RetryConfig`].
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    /// Sets the first back-off delay.
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.config.initial_backoff = backoff;
        self
    }

    /// Sets the upper bound on back-off delays.
    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.config.max_backoff = backoff;
        self
    }

    /// Sets the back-off growth factor.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.config.multiplier = multiplier;
        self
    }

    /// Sets the jitter fraction applied to each delay.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.config.jitter = jitter;
        self
    }
}

/// Invocation-level settings: deadline, retry pause and retry budget.
#[derive(Debug, Clone)]
pub struct InvocationConfig {
    timeout: Duration,
    retry_pause: Duration,
    max_retries: u32,
}

impl InvocationConfig {
    /// Returns the default invocation deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the pause between retry attempts.
    pub fn retry_pause(&self) -> Duration {
        self.retry_pause
    }

    /// Returns the maximum number of retry attempts.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            retry_pause: Duration::from_millis(500),
            max_retries: 120,
        }
    }
}

/// Builder for [`InvocationConfig`].
#[derive(Debug, Default)]
pub struct InvocationConfigBuilder {
    config: InvocationConfig,
}

impl InvocationConfigBuilder {
    /// Sets the default invocation deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Sets the pause between retry attempts.
    pub fn retry_pause(mut self, pause: Duration) -> Self {
        self.config.retry_pause = pause;
        self
    }

    /// Sets the maximum number of retry attempts.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }
}

/// Credentials presented in the authentication handshake.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    username: Option<String>,
    password: Option<String>,
}

impl SecurityConfig {
    /// Returns the configured username.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Returns the configured password.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

/// The complete client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    cluster_name: String,
    client_name: Option<String>,
    labels: Vec<String>,
    network: NetworkConfig,
    retry: RetryConfig,
    invocation: InvocationConfig,
    security: SecurityConfig,
    reconnect_mode: ReconnectMode,
    cluster_connect_timeout: Duration,
    near_caches: Vec<NearCacheConfig>,
    lifecycle_listeners: Vec<LifecycleListenerFn>,
    membership_listeners: Vec<MembershipListenerFn>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("cluster_name", &self.cluster_name)
            .field("client_name", &self.client_name)
            .field("labels", &self.labels)
            .field("network", &self.network)
            .field("retry", &self.retry)
            .field("invocation", &self.invocation)
            .field("reconnect_mode", &self.reconnect_mode)
            .field("near_caches", &self.near_caches)
            .field("lifecycle_listeners", &self.lifecycle_listeners.len())
            .field("membership_listeners", &self.membership_listeners.len())
            .finish()
    }
}

impl ClientConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Returns the cluster name.
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Returns the configured client name, if any.
    pub fn client_name(&self) -> Option<&str> {
        self.client_name.as_deref()
    }

    /// Returns the client labels sent in the handshake.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Returns the network configuration.
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Returns the reconnect back-off configuration.
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Returns the invocation configuration.
    pub fn invocation(&self) -> &InvocationConfig {
        &self.invocation
    }

    /// Returns the security configuration.
    pub fn security(&self) -> &SecurityConfig {
        &self.security
    }

    /// Returns the cluster reconnect mode.
    pub fn reconnect_mode(&self) -> ReconnectMode {
        self.reconnect_mode
    }

    /// Returns the overall deadline for connecting to the cluster.
    pub fn cluster_connect_timeout(&self) -> Duration {
        self.cluster_connect_timeout
    }

    /// Returns the near-cache configuration for the given structure name.
    pub fn near_cache(&self, name: &str) -> Option<&NearCacheConfig> {
        self.near_caches.iter().find(|config| config.name() == name)
    }

    /// Returns all configured near-caches.
    pub fn near_caches(&self) -> &[NearCacheConfig] {
        &self.near_caches
    }

    /// Returns the lifecycle listeners attached through configuration.
    pub fn lifecycle_listeners(&self) -> &[LifecycleListenerFn] {
        &self.lifecycle_listeners
    }

    /// Returns the membership listeners attached through configuration.
    pub fn membership_listeners(&self) -> &[MembershipListenerFn] {
        &self.membership_listeners
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfigBuilder::new().build().expect("default config is valid")
    }
}

/// Builder for [`ClientConfig`].
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientConfigBuilder {
    /// Creates a builder with defaults.
    pub fn new() -> Self {
        Self {
            config: ClientConfig {
                cluster_name: "dev".to_string(),
                client_name: None,
                labels: Vec::new(),
                network: NetworkConfig::default(),
                retry: RetryConfig::default(),
                invocation: InvocationConfig::default(),
                security: SecurityConfig::default(),
                reconnect_mode: ReconnectMode::KeepTrying,
                cluster_connect_timeout: Duration::from_secs(60),
                near_caches: Vec::new(),
                lifecycle_listeners: Vec::new(),
                membership_listeners: Vec::new(),
            },
        }
    }

    /// Sets the cluster name.
    pub fn cluster_name(mut self, name: impl Into<String>) -> Self {
        self.config.cluster_name = name.into();
        self
    }

    /// Sets the client instance name.
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.config.client_name = Some(name.into());
        self
    }

    /// Adds a client label sent in the handshake.
    pub fn add_label(mut self, label: impl Into<String>) -> Self {
        self.config.labels.push(label.into());
        self
    }

    /// Adds a seed address.
    pub fn add_address(mut self, address: SocketAddr) -> Self {
        self.config.network.addresses.push(address);
        self
    }

    /// Configures network settings through a nested builder.
    pub fn network(mut self, f: impl FnOnce(NetworkConfigBuilder) -> NetworkConfigBuilder) -> Self {
        let builder = NetworkConfigBuilder {
            config: self.config.network.clone(),
        };
        self.config.network = f(builder).config;
        self
    }

    /// Configures reconnect back-off through a nested builder.
    pub fn retry(mut self, f: impl FnOnce(RetryConfigBuilder) -> RetryConfigBuilder) -> Self {
        let builder = RetryConfigBuilder {
            config: self.config.retry.clone(),
        };
        self.config.retry = f(builder).config;
        self
    }

    /// Configures invocation settings through a nested builder.
    pub fn invocation(
        mut self,
        f: impl FnOnce(InvocationConfigBuilder) -> InvocationConfigBuilder,
    ) -> Self {
        let builder = InvocationConfigBuilder {
            config: self.config.invocation.clone(),
        };
        self.config.invocation = f(builder).config;
        self
    }

    /// Sets the credentials presented in the handshake.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.security.username = Some(username.into());
        self.config.security.password = Some(password.into());
        self
    }

    /// Sets the cluster reconnect mode.
    pub fn reconnect_mode(mut self, mode: ReconnectMode) -> Self {
        self.config.reconnect_mode = mode;
        self
    }

    /// Sets the overall deadline for connecting to the cluster.
    pub fn cluster_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.cluster_connect_timeout = timeout;
        self
    }

    /// Adds a near-cache configuration.
    pub fn add_near_cache(mut self, config: NearCacheConfig) -> Self {
        self.config.near_caches.push(config);
        self
    }

    /// Attaches a lifecycle listener delivered every event once the client
    /// reaches `Ready` (including the `Starting`/`Started` pair of its own
    /// startup).
    pub fn add_lifecycle_listener(
        mut self,
        listener: impl Fn(LifecycleEvent) + Send + Sync + 'static,
    ) -> Self {
        self.config.lifecycle_listeners.push(Arc::new(listener));
        self
    }

    /// Attaches a membership listener.
    pub fn add_membership_listener(
        mut self,
        listener: impl Fn(&MembershipEvent) + Send + Sync + 'static,
    ) -> Self {
        self.config.membership_listeners.push(Arc::new(listener));
        self
    }

    /// Validates and builds the configuration.
    pub fn build(mut self) -> Result<ClientConfig> {
        if self.config.cluster_name.is_empty() {
            return Err(GridError::Configuration(
                "cluster name must not be empty".to_string(),
            ));
        }
        if let Some(name) = &self.config.client_name {
            if name.is_empty() {
                return Err(GridError::Configuration(
                    "client name must not be empty".to_string(),
                ));
            }
        }
        if self.config.retry.multiplier < 1.0 {
            return Err(GridError::Configuration(format!(
                "retry multiplier must be at least 1.0, got {}",
                self.config.retry.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.config.retry.jitter) {
            return Err(GridError::Configuration(format!(
                "retry jitter must be within [0, 1], got {}",
                self.config.retry.jitter
            )));
        }
        if self.config.invocation.timeout.is_zero() {
            return Err(GridError::Configuration(
                "invocation timeout must be positive".to_string(),
            ));
        }
        {
            let mut seen = std::collections::HashSet::new();
            for cache in &self.config.near_caches {
                if !seen.insert(cache.name().to_string()) {
                    return Err(GridError::Configuration(format!(
                        "duplicate near-cache configuration for '{}'",
                        cache.name()
                    )));
                }
            }
        }
        if self.config.network.addresses.is_empty() {
            self.config
                .network
                .addresses
                .push(DEFAULT_ADDRESS.parse().expect("default address is valid"));
        }
        Ok(self.config)
    }
}
