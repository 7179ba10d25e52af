//! Core types and wire protocol for the gridcast data grid client.

#![warn(missing_docs)]

pub mod error;
pub mod protocol;
pub mod serialization;

pub use error::{GridError, Result, ServerErrorCode};
pub use protocol::{next_correlation_id, Message, MessageCodec};
pub use serialization::{
    Data, DataInput, DataOutput, Deserializable, ObjectDataInput, ObjectDataOutput, Serializable,
};
