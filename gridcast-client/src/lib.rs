//! Async client for a clustered in-memory data grid.
//!
//! The client connects to a dynamically changing set of cluster members,
//! discovers which member owns each data partition, and dispatches every
//! operation straight to the owning member's connection. It is built on
//! [Tokio](https://tokio.rs/) and exposes every operation as an `async fn`.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use gridcast_client::{ClientConfig, GridClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .cluster_name("dev")
//!         .add_address("127.0.0.1:5701".parse().unwrap())
//!         .build()?;
//!     let client = GridClient::connect(config).await?;
//!
//!     let map = client.get_map::<String, String>("greetings").await?;
//!     map.put("hello".into(), "world".into()).await?;
//!     let value = map.get(&"hello".to_string()).await?;
//!     println!("{:?}", value); // Some("world")
//!
//!     client.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Distributed Data Structures
//!
//! | Type | Obtain via | Description |
//! |------|-----------|-------------|
//! | [`RemoteMap<K, V>`] | [`get_map`](GridClient::get_map) | Partitioned map with TTL and optional near-cache |
//! | [`ReplicatedMap<K, V>`] | [`get_replicated_map`](GridClient::get_replicated_map) | Map replicated to every member |
//! | [`RemoteQueue<T>`] | [`get_queue`](GridClient::get_queue) | Distributed FIFO queue |
//! | [`RemoteTopic<T>`] | [`get_topic`](GridClient::get_topic) | Publish/subscribe messaging |
//! | [`RemoteList<T>`] | [`get_list`](GridClient::get_list) | Distributed ordered list |
//! | [`AtomicCounter`] | [`get_atomic_counter`](GridClient::get_atomic_counter) | Strongly-consistent counter |
//!
//! # Near-Cache
//!
//! A near-cache keeps previously fetched map entries in the client process,
//! invalidated by the cluster on every remote mutation:
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use gridcast_client::{ClientConfig, NearCacheConfig, EvictionPolicy};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let near_cache = NearCacheConfig::builder("hot-entries")
//!     .max_size(10_000)
//!     .time_to_live(Duration::from_secs(60))
//!     .eviction_policy(EvictionPolicy::Lru)
//!     .build()?;
//!
//! let config = ClientConfig::builder()
//!     .add_near_cache(near_cache)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod client;
pub mod cluster;
pub mod config;
pub mod connection;
pub mod event;
pub mod invocation;
pub mod nearcache;
pub mod proxy;

pub use client::{GridClient, LifecycleState};
pub use cluster::{Member, MembershipEvent, MembershipEventType};
pub use config::{ClientConfig, ClientConfigBuilder, ReconnectMode};
pub use event::LifecycleEvent;
pub use gridcast_core::{Data, Deserializable, GridError, Result, Serializable, ServerErrorCode};
pub use nearcache::{EvictionPolicy, InMemoryFormat, NearCacheConfig, NearCacheStats};
pub use proxy::{
    object_name, AtomicCounter, RemoteList, RemoteMap, RemoteQueue, RemoteTopic, ReplicatedMap,
};
