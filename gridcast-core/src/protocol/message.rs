//! The single-frame message type of the grid client wire envelope.

use bytes::{Buf, BufMut, BytesMut};
use std::sync::atomic::{AtomicI64, Ordering};

use super::constants::*;

/// Global correlation id counter.
static CORRELATION_ID_COUNTER: AtomicI64 = AtomicI64::new(1);

/// Returns the next process-unique, monotonically increasing correlation id.
pub fn next_correlation_id() -> i64 {
    CORRELATION_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A single protocol frame.
///
/// On the wire a frame is a little-endian header followed by an opaque
/// payload. The 4-byte length field counts the whole frame, the length field
/// itself included:
///
/// ```text
/// | length: u32 | type: i32 | correlation id: i64 | partition id: i32 | payload |
/// ```
///
/// Requests and responses share the envelope; responses are matched to
/// requests by correlation id. Server-initiated event frames reuse the
/// correlation id of the subscription that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    message_type: i32,
    correlation_id: i64,
    partition_id: i32,
    payload: BytesMut,
}

impl Message {
    /// Creates a new request message of the given type, targeting any partition.
    ///
    /// The correlation id starts at zero; the invocation layer stamps a fresh
    /// one before every send attempt.
    pub fn new(message_type: i32) -> Self {
        Self {
            message_type,
            correlation_id: 0,
            partition_id: PARTITION_ID_ANY,
            payload: BytesMut::new(),
        }
    }

    /// Creates a new request message with the given type and payload.
    pub fn with_payload(message_type: i32, payload: impl Into<BytesMut>) -> Self {
        Self {
            message_type,
            correlation_id: 0,
            partition_id: PARTITION_ID_ANY,
            payload: payload.into(),
        }
    }

    /// Returns the message type.
    pub fn message_type(&self) -> i32 {
        self.message_type
    }

    /// Returns the correlation id.
    pub fn correlation_id(&self) -> i64 {
        self.correlation_id
    }

    /// Sets the correlation id.
    pub fn set_correlation_id(&mut self, correlation_id: i64) {
        self.correlation_id = correlation_id;
    }

    /// Returns the partition id.
    pub fn partition_id(&self) -> i32 {
        self.partition_id
    }

    /// Sets the partition id.
    pub fn set_partition_id(&mut self, partition_id: i32) {
        self.partition_id = partition_id;
    }

    /// Returns the message payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns `true` if this is an error response frame.
    pub fn is_error(&self) -> bool {
        self.message_type == ERROR_RESPONSE
    }

    /// Returns the frame length as written in the length field.
    ///
    /// This counts the full frame including the length field itself.
    pub fn frame_length(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }

    /// Writes this frame to the given buffer.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.frame_length());
        dst.put_u32_le(self.frame_length() as u32);
        dst.put_i32_le(self.message_type);
        dst.put_i64_le(self.correlation_id);
        dst.put_i32_le(self.partition_id);
        dst.put_slice(&self.payload);
    }

    /// Reads a frame from the given buffer.
    ///
    /// Returns `None` if the buffer does not yet hold a complete frame; the
    /// buffered bytes are retained untouched.
    pub fn read_from(src: &mut BytesMut) -> Option<Self> {
        if src.len() < SIZE_OF_FRAME_LENGTH_FIELD {
            return None;
        }

        let frame_length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if frame_length < FRAME_HEADER_SIZE || src.len() < frame_length {
            return None;
        }

        src.advance(SIZE_OF_FRAME_LENGTH_FIELD);
        let message_type = src.get_i32_le();
        let correlation_id = src.get_i64_le();
        let partition_id = src.get_i32_le();
        let payload = src.split_to(frame_length - FRAME_HEADER_SIZE);

        Some(Self {
            message_type,
            correlation_id,
            partition_id,
            payload,
        })
    }
}
