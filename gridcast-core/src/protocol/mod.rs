//! Wire envelope for the grid client protocol.
//!
//! Frames are little-endian and length-prefixed; the 4-byte length field
//! counts the whole frame including itself. Every frame carries a 64-bit
//! correlation id pairing a request with its response on one connection.

mod codec;
pub mod constants;
mod message;

pub use codec::MessageCodec;
pub use constants::*;
pub use message::{next_correlation_id, Message};
