//! Seed address discovery.

use std::net::SocketAddr;

use async_trait::async_trait;

use gridcast_core::Result;

/// Supplies the addresses the connection manager seeds from.
///
/// The default implementation returns the statically configured addresses;
/// alternative providers can resolve addresses from an external discovery
/// service.
#[async_trait]
pub trait AddressProvider: Send + Sync + std::fmt::Debug {
    /// Returns candidate member addresses, in preference order.
    async fn load_addresses(&self) -> Result<Vec<SocketAddr>>;
}

/// An [`AddressProvider`] over a fixed address list.
#[derive(Debug, Clone, Default)]
pub struct StaticAddressProvider {
    addresses: Vec<SocketAddr>,
}

impl StaticAddressProvider {
    /// Creates a provider over the given addresses.
    pub fn new(addresses: Vec<SocketAddr>) -> Self {
        Self { addresses }
    }
}

#[async_trait]
impl AddressProvider for StaticAddressProvider {
    async fn load_addresses(&self) -> Result<Vec<SocketAddr>> {
        Ok(self.addresses.clone())
    }
}
