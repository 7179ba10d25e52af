//! Connections to cluster members and their management.

mod address;
#[allow(clippy::module_inception)]
mod connection;
mod handshake;
mod manager;

pub use address::{AddressProvider, StaticAddressProvider};
pub use connection::{Connection, ConnectionId, EventHandlerFn};
pub use handshake::{
    AuthenticationRequest, AuthenticationResponse, AUTH_STATUS_CREDENTIALS_FAILED,
    AUTH_STATUS_NOT_ALLOWED, AUTH_STATUS_OK,
};
pub use manager::ConnectionManager;

pub(crate) use manager::decode_error_frame;
