//! Codec for encoding/decoding wire frames over a byte stream.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::constants::*;
use super::message::Message;
use crate::error::{GridError, Result};

/// Maximum accepted frame length. Frames above this are treated as corrupt.
const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// Codec for grid protocol frames.
///
/// Implements the `tokio_util::codec::{Encoder, Decoder}` traits for use
/// with tokio's framed I/O.
#[derive(Debug, Default)]
pub struct MessageCodec;

impl MessageCodec {
    /// Creates a new codec instance.
    pub fn new() -> Self {
        Self
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = GridError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        item.write_to(dst);
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = GridError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < SIZE_OF_FRAME_LENGTH_FIELD {
            return Ok(None);
        }

        let frame_length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if frame_length < FRAME_HEADER_SIZE {
            return Err(GridError::Protocol(format!(
                "frame length {} below header size {}",
                frame_length, FRAME_HEADER_SIZE
            )));
        }
        if frame_length > MAX_FRAME_LENGTH {
            return Err(GridError::Protocol(format!(
                "frame length {} exceeds limit {}",
                frame_length, MAX_FRAME_LENGTH
            )));
        }

        if src.len() < frame_length {
            src.reserve(frame_length - src.len());
            return Ok(None);
        }

        Ok(Message::read_from(src))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut codec = MessageCodec::new();
        let mut original = Message::with_payload(MAP_PUT, BytesMut::from(&b"payload"[..]));
        original.set_correlation_id(11);
        original.set_partition_id(3);

        let mut buf = BytesMut::new();
        codec.encode(original.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, original);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_length() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(&[0x01, 0x02][..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_decode_incomplete_frame() {
        let mut codec = MessageCodec::new();
        let mut full = BytesMut::new();
        let msg = Message::with_payload(MAP_GET, BytesMut::from(&[0u8; 16][..]));
        msg.write_to(&mut full);

        let mut partial = BytesMut::from(&full[..10]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn test_decode_undersized_length_is_protocol_error() {
        let mut codec = MessageCodec::new();
        // Length field claims 4 bytes total, below the header size.
        let mut buf = BytesMut::from(&[0x04, 0x00, 0x00, 0x00][..]);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, GridError::Protocol(_)));
    }

    #[test]
    fn test_decode_oversized_length_is_protocol_error() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(&[0xFF, 0xFF, 0xFF, 0xFF][..]);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, GridError::Protocol(_)));
    }

    #[test]
    fn test_decode_multiple_frames() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();

        for correlation in 1..=3i64 {
            let mut msg = Message::new(CLIENT_HEARTBEAT);
            msg.set_correlation_id(correlation);
            codec.encode(msg, &mut buf).unwrap();
        }

        for expected in 1..=3i64 {
            let decoded = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(decoded.correlation_id(), expected);
        }
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
