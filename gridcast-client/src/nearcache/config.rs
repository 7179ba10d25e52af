//! Near-cache configuration types and builder.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gridcast_core::{GridError, Result};

/// Policy used to select a victim when the cache exceeds its maximum size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EvictionPolicy {
    /// Evict the entry with the oldest last-access time.
    #[default]
    Lru,
    /// Evict the entry with the lowest access count.
    Lfu,
    /// Evict a uniformly random entry.
    Random,
    /// Never evict; reject new entries when the cache is full.
    None,
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lru => write!(f, "LRU"),
            Self::Lfu => write!(f, "LFU"),
            Self::Random => write!(f, "RANDOM"),
            Self::None => write!(f, "NONE"),
        }
    }
}

/// How values are held in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InMemoryFormat {
    /// Keep the serialized byte form; deserialize on every read.
    #[default]
    Binary,
    /// Keep the deserialized object; clone on every read.
    Object,
}

/// The metadata view of a record offered to a custom eviction comparator.
#[derive(Debug, Clone, Copy)]
pub struct EvictionCandidate {
    /// When the record was created.
    pub created_at: Instant,
    /// When the record was last read.
    pub last_accessed: Instant,
    /// How many times the record has been read.
    pub access_count: u64,
}

/// A user-supplied ordering on eviction candidates.
///
/// When present it supersedes the configured [`EvictionPolicy`]; the record
/// ordered least is evicted first.
pub type EvictionComparator =
    Arc<dyn Fn(&EvictionCandidate, &EvictionCandidate) -> Ordering + Send + Sync>;

/// Configuration for one near-cache, keyed by the data structure's name.
#[derive(Clone)]
pub struct NearCacheConfig {
    name: String,
    max_size: u32,
    time_to_live: Duration,
    max_idle: Duration,
    eviction_policy: EvictionPolicy,
    in_memory_format: InMemoryFormat,
    serialize_keys: bool,
    invalidate_on_change: bool,
    preload_enabled: bool,
    cleanup_interval: Duration,
    comparator: Option<EvictionComparator>,
}

impl std::fmt::Debug for NearCacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NearCacheConfig")
            .field("name", &self.name)
            .field("max_size", &self.max_size)
            .field("time_to_live", &self.time_to_live)
            .field("max_idle", &self.max_idle)
            .field("eviction_policy", &self.eviction_policy)
            .field("in_memory_format", &self.in_memory_format)
            .field("serialize_keys", &self.serialize_keys)
            .field("invalidate_on_change", &self.invalidate_on_change)
            .field("preload_enabled", &self.preload_enabled)
            .field("has_comparator", &self.comparator.is_some())
            .finish()
    }
}

impl NearCacheConfig {
    /// Creates a builder for a cache bound to the given structure name.
    pub fn builder(name: impl Into<String>) -> NearCacheConfigBuilder {
        NearCacheConfigBuilder::new(name)
    }

    /// Returns the data structure name this cache is bound to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the maximum number of entries.
    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    /// Returns the time-to-live. Zero means no TTL limit.
    pub fn time_to_live(&self) -> Duration {
        self.time_to_live
    }

    /// Returns the maximum idle time. Zero means no idle limit.
    pub fn max_idle(&self) -> Duration {
        self.max_idle
    }

    /// Returns the eviction policy.
    pub fn eviction_policy(&self) -> EvictionPolicy {
        self.eviction_policy
    }

    /// Returns the in-memory value format.
    pub fn in_memory_format(&self) -> InMemoryFormat {
        self.in_memory_format
    }

    /// Returns whether cache keys are the serialized byte form.
    pub fn serialize_keys(&self) -> bool {
        self.serialize_keys
    }

    /// Returns whether a server-side invalidation listener is registered.
    pub fn invalidate_on_change(&self) -> bool {
        self.invalidate_on_change
    }

    /// Returns whether preloading from a local store was requested.
    ///
    /// Preloading requires a persisted-cache store collaborator and is
    /// currently a no-op; the flag is carried for configuration parity.
    pub fn preload_enabled(&self) -> bool {
        self.preload_enabled
    }

    /// Returns the interval of the background expiration pass.
    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    /// Returns the custom eviction comparator, if configured.
    pub fn comparator(&self) -> Option<&EvictionComparator> {
        self.comparator.as_ref()
    }
}

/// Builder for [`NearCacheConfig`].
#[derive(Clone)]
pub struct NearCacheConfigBuilder {
    config: NearCacheConfig,
}

impl NearCacheConfigBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            config: NearCacheConfig {
                name: name.into(),
                max_size: 10_000,
                time_to_live: Duration::ZERO,
                max_idle: Duration::ZERO,
                eviction_policy: EvictionPolicy::Lru,
                in_memory_format: InMemoryFormat::Binary,
                serialize_keys: false,
                invalidate_on_change: true,
                preload_enabled: false,
                cleanup_interval: Duration::from_secs(5),
                comparator: None,
            },
        }
    }

    /// Sets the maximum number of entries.
    pub fn max_size(mut self, max_size: u32) -> Self {
        self.config.max_size = max_size;
        self
    }

    /// Sets the time-to-live. Zero disables the TTL limit.
    pub fn time_to_live(mut self, ttl: Duration) -> Self {
        self.config.time_to_live = ttl;
        self
    }

    /// Sets the maximum idle time. Zero disables the idle limit.
    pub fn max_idle(mut self, max_idle: Duration) -> Self {
        self.config.max_idle = max_idle;
        self
    }

    /// Sets the eviction policy.
    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.config.eviction_policy = policy;
        self
    }

    /// Sets the in-memory value format.
    pub fn in_memory_format(mut self, format: InMemoryFormat) -> Self {
        self.config.in_memory_format = format;
        self
    }

    /// Sets whether cache keys are the serialized byte form.
    pub fn serialize_keys(mut self, serialize_keys: bool) -> Self {
        self.config.serialize_keys = serialize_keys;
        self
    }

    /// Sets whether a server-side invalidation listener is registered.
    pub fn invalidate_on_change(mut self, invalidate: bool) -> Self {
        self.config.invalidate_on_change = invalidate;
        self
    }

    /// Requests preloading from a local store on startup.
    pub fn preload_enabled(mut self, enabled: bool) -> Self {
        self.config.preload_enabled = enabled;
        self
    }

    /// Sets the interval of the background expiration pass.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    /// Supplies a custom eviction comparator, superseding the policy.
    pub fn comparator(mut self, comparator: EvictionComparator) -> Self {
        self.config.comparator = Some(comparator);
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<NearCacheConfig> {
        if self.config.name.is_empty() {
            return Err(GridError::Configuration(
                "near-cache name must not be empty".to_string(),
            ));
        }
        if self.config.max_size == 0 {
            return Err(GridError::Configuration(
                "near-cache max size must be positive".to_string(),
            ));
        }
        if self.config.cleanup_interval.is_zero() {
            return Err(GridError::Configuration(
                "near-cache cleanup interval must be positive".to_string(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = NearCacheConfig::builder("orders").build().unwrap();
        assert_eq!(config.name(), "orders");
        assert_eq!(config.max_size(), 10_000);
        assert_eq!(config.eviction_policy(), EvictionPolicy::Lru);
        assert_eq!(config.in_memory_format(), InMemoryFormat::Binary);
        assert!(config.time_to_live().is_zero());
        assert!(config.max_idle().is_zero());
        assert!(!config.serialize_keys());
        assert!(config.invalidate_on_change());
        assert!(!config.preload_enabled());
        assert!(config.comparator().is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let config = NearCacheConfig::builder("orders")
            .max_size(2)
            .time_to_live(Duration::from_secs(60))
            .max_idle(Duration::from_secs(10))
            .eviction_policy(EvictionPolicy::Lfu)
            .in_memory_format(InMemoryFormat::Object)
            .serialize_keys(true)
            .invalidate_on_change(false)
            .build()
            .unwrap();

        assert_eq!(config.max_size(), 2);
        assert_eq!(config.time_to_live(), Duration::from_secs(60));
        assert_eq!(config.max_idle(), Duration::from_secs(10));
        assert_eq!(config.eviction_policy(), EvictionPolicy::Lfu);
        assert_eq!(config.in_memory_format(), InMemoryFormat::Object);
        assert!(config.serialize_keys());
        assert!(!config.invalidate_on_change());
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = NearCacheConfig::builder("").build().unwrap_err();
        assert!(matches!(err, GridError::Configuration(_)));
    }

    #[test]
    fn test_zero_max_size_rejected() {
        let err = NearCacheConfig::builder("orders").max_size(0).build().unwrap_err();
        assert!(matches!(err, GridError::Configuration(_)));
    }

    #[test]
    fn test_comparator_supersedes_policy_flagged_in_debug() {
        let config = NearCacheConfig::builder("orders")
            .comparator(Arc::new(|a, b| a.access_count.cmp(&b.access_count)))
            .build()
            .unwrap();
        assert!(config.comparator().is_some());
        assert!(format!("{:?}", config).contains("has_comparator: true"));
    }

    #[test]
    fn test_eviction_policy_display() {
        assert_eq!(EvictionPolicy::Lru.to_string(), "LRU");
        assert_eq!(EvictionPolicy::Lfu.to_string(), "LFU");
        assert_eq!(EvictionPolicy::Random.to_string(), "RANDOM");
        assert_eq!(EvictionPolicy::None.to_string(), "NONE");
    }
}
