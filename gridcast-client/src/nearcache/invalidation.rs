//! Server-driven invalidation events and the per-partition sequence store.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use gridcast_core::{Data, DataInput, DataOutput, GridError, Message, ObjectDataInput, Result};

/// A single invalidation delivered by the cluster.
///
/// A `None` key invalidates the whole structure (the server's clear-all
/// broadcast).
#[derive(Debug, Clone)]
pub struct InvalidationEvent {
    /// The serialized key to drop, or `None` for a full flush.
    pub key: Option<Data>,
    /// The uuid of the member that performed the mutation.
    pub source: Uuid,
    /// The uuid of the partition the key belongs to.
    pub partition: Uuid,
    /// The partition's monotonic invalidation sequence number.
    pub sequence: i64,
}

impl InvalidationEvent {
    fn read_one<R: DataInput>(input: &mut R) -> Result<Self> {
        let key = if input.read_bool()? {
            Some(Data::new(input.read_byte_array()?))
        } else {
            None
        };
        let source = input.read_uuid()?;
        let partition = input.read_uuid()?;
        let sequence = input.read_long()?;
        Ok(Self {
            key,
            source,
            partition,
            sequence,
        })
    }

    /// Writes this event in its wire form.
    pub fn write_to<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        match &self.key {
            Some(key) => {
                output.write_bool(true)?;
                output.write_byte_array(key.as_slice())?;
            }
            None => output.write_bool(false)?,
        }
        output.write_uuid(self.source)?;
        output.write_uuid(self.partition)?;
        output.write_long(self.sequence)
    }

    /// Decodes a single-invalidation event frame.
    pub fn decode(message: &Message) -> Result<Self> {
        let mut input = ObjectDataInput::new(message.payload());
        Self::read_one(&mut input)
    }

    /// Decodes a batched invalidation event frame.
    ///
    /// The batch is returned in wire order; the caller applies it through
    /// the sequence store so each partition's tuples take effect atomically.
    pub fn decode_batch(message: &Message) -> Result<Vec<Self>> {
        let mut input = ObjectDataInput::new(message.payload());
        let count = input.read_int()?;
        if count < 0 {
            return Err(GridError::Serialization(format!(
                "negative invalidation batch size: {}",
                count
            )));
        }
        let mut events = Vec::with_capacity(count as usize);
        for _ in 0..count {
            events.push(Self::read_one(&mut input)?);
        }
        Ok(events)
    }
}

/// What the sequence store decided about one invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationOutcome {
    /// The sequence is the next expected one; apply the invalidation.
    Apply,
    /// Sequences were missed; flush the partition's records.
    Flush,
    /// The sequence was already seen; drop the event.
    Stale,
}

/// Tracks the last seen invalidation sequence per partition.
///
/// Sequences only move forward. The first observation of a partition is the
/// baseline; after that, the next sequence is expected to follow directly,
/// and a gap means invalidations were lost while the listener was
/// re-registering.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    partitions: Mutex<HashMap<Uuid, i64>>,
}

impl SequenceTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Observes a sequence for a partition and decides how to treat it.
    pub fn observe(&self, partition: Uuid, sequence: i64) -> InvalidationOutcome {
        let mut partitions = self.partitions.lock().expect("sequence tracker poisoned");
        match partitions.get_mut(&partition) {
            None => {
                partitions.insert(partition, sequence);
                InvalidationOutcome::Apply
            }
            Some(last) => {
                if sequence <= *last {
                    return InvalidationOutcome::Stale;
                }
                let gap = sequence > *last + 1;
                *last = sequence;
                if gap {
                    InvalidationOutcome::Flush
                } else {
                    InvalidationOutcome::Apply
                }
            }
        }
    }

    /// Returns the last seen sequence for a partition.
    pub fn last_sequence(&self, partition: Uuid) -> Option<i64> {
        self.partitions
            .lock()
            .expect("sequence tracker poisoned")
            .get(&partition)
            .copied()
    }

    /// Forgets all partitions, e.g. after the listener re-registers.
    pub fn reset(&self) {
        self.partitions
            .lock()
            .expect("sequence tracker poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcast_core::protocol::constants::EVENT_MAP_INVALIDATION;
    use gridcast_core::ObjectDataOutput;

    fn event(partition: Uuid, sequence: i64) -> InvalidationEvent {
        InvalidationEvent {
            key: Some(Data::new(vec![1, 2, 3])),
            source: Uuid::new_v4(),
            partition,
            sequence,
        }
    }

    #[test]
    fn test_first_observation_is_baseline() {
        let tracker = SequenceTracker::new();
        let partition = Uuid::new_v4();
        assert_eq!(tracker.observe(partition, 17), InvalidationOutcome::Apply);
        assert_eq!(tracker.last_sequence(partition), Some(17));
    }

    #[test]
    fn test_sequences_applied_in_order() {
        let tracker = SequenceTracker::new();
        let partition = Uuid::new_v4();
        tracker.observe(partition, 1);
        assert_eq!(tracker.observe(partition, 2), InvalidationOutcome::Apply);
        assert_eq!(tracker.observe(partition, 3), InvalidationOutcome::Apply);
    }

    #[test]
    fn test_gap_triggers_flush_and_advances() {
        let tracker = SequenceTracker::new();
        let partition = Uuid::new_v4();
        tracker.observe(partition, 1);
        assert_eq!(tracker.observe(partition, 5), InvalidationOutcome::Flush);
        assert_eq!(tracker.last_sequence(partition), Some(5));
        // The store does not regress after the flush.
        assert_eq!(tracker.observe(partition, 6), InvalidationOutcome::Apply);
    }

    #[test]
    fn test_stale_sequences_dropped() {
        let tracker = SequenceTracker::new();
        let partition = Uuid::new_v4();
        tracker.observe(partition, 5);
        assert_eq!(tracker.observe(partition, 5), InvalidationOutcome::Stale);
        assert_eq!(tracker.observe(partition, 3), InvalidationOutcome::Stale);
        assert_eq!(tracker.last_sequence(partition), Some(5));
    }

    #[test]
    fn test_partitions_tracked_independently() {
        let tracker = SequenceTracker::new();
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        tracker.observe(p1, 1);
        tracker.observe(p2, 10);
        assert_eq!(tracker.observe(p1, 2), InvalidationOutcome::Apply);
        assert_eq!(tracker.observe(p2, 11), InvalidationOutcome::Apply);
    }

    #[test]
    fn test_reset_forgets_baselines() {
        let tracker = SequenceTracker::new();
        let partition = Uuid::new_v4();
        tracker.observe(partition, 9);
        tracker.reset();
        assert_eq!(tracker.last_sequence(partition), None);
        assert_eq!(tracker.observe(partition, 1), InvalidationOutcome::Apply);
    }

    #[test]
    fn test_single_event_roundtrip() {
        let original = event(Uuid::new_v4(), 42);
        let mut out = ObjectDataOutput::new();
        original.write_to(&mut out).unwrap();

        let message = Message::with_payload(
            EVENT_MAP_INVALIDATION,
            bytes::BytesMut::from(&out.into_bytes()[..]),
        );
        let decoded = InvalidationEvent::decode(&message).unwrap();
        assert_eq!(decoded.key, original.key);
        assert_eq!(decoded.source, original.source);
        assert_eq!(decoded.partition, original.partition);
        assert_eq!(decoded.sequence, 42);
    }

    #[test]
    fn test_clear_all_event_has_no_key() {
        let original = InvalidationEvent {
            key: None,
            source: Uuid::new_v4(),
            partition: Uuid::new_v4(),
            sequence: 7,
        };
        let mut out = ObjectDataOutput::new();
        original.write_to(&mut out).unwrap();

        let message = Message::with_payload(
            EVENT_MAP_INVALIDATION,
            bytes::BytesMut::from(&out.into_bytes()[..]),
        );
        let decoded = InvalidationEvent::decode(&message).unwrap();
        assert!(decoded.key.is_none());
    }

    #[test]
    fn test_batch_roundtrip() {
        let partition = Uuid::new_v4();
        let events = vec![event(partition, 1), event(partition, 2), event(partition, 3)];

        let mut out = ObjectDataOutput::new();
        out.write_int(events.len() as i32).unwrap();
        for e in &events {
            e.write_to(&mut out).unwrap();
        }

        let message = Message::with_payload(
            EVENT_MAP_INVALIDATION,
            bytes::BytesMut::from(&out.into_bytes()[..]),
        );
        let decoded = InvalidationEvent::decode_batch(&message).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[2].sequence, 3);
    }
}
