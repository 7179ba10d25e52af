//! Protocol constants for the grid client wire envelope.

/// The three-byte preamble sent immediately after TCP connect, before any frame.
pub const PROTOCOL_PREAMBLE: &[u8; 3] = b"CB2";

/// Size of the frame length field in bytes.
pub const SIZE_OF_FRAME_LENGTH_FIELD: usize = 4;

/// Offset of the message type field in a frame.
pub const MESSAGE_TYPE_OFFSET: usize = SIZE_OF_FRAME_LENGTH_FIELD;

/// Offset of the correlation id field in a frame.
pub const CORRELATION_ID_OFFSET: usize = MESSAGE_TYPE_OFFSET + 4;

/// Offset of the partition id field in a frame.
pub const PARTITION_ID_OFFSET: usize = CORRELATION_ID_OFFSET + 8;

/// Total frame header size: length, message type, correlation id, partition id.
///
/// The length field counts the whole frame, header included.
pub const FRAME_HEADER_SIZE: usize = PARTITION_ID_OFFSET + 4;

/// Partition id indicating no specific partition (-1).
pub const PARTITION_ID_ANY: i32 = -1;

// Message type constants. The server echoes the request type in its
// response; a failed invocation is answered with `ERROR_RESPONSE` instead.

/// Error response carrying a server error code and message.
pub const ERROR_RESPONSE: i32 = 0x0001;

/// Client authentication request.
pub const CLIENT_AUTHENTICATION: i32 = 0x0100;

/// Heartbeat ping request.
pub const CLIENT_HEARTBEAT: i32 = 0x0102;

/// Cluster view listener registration request.
pub const CLIENT_ADD_CLUSTER_VIEW_LISTENER: i32 = 0x0104;

// Server-initiated event frames. Event frames reuse the correlation id of
// the subscription that produced them; they are recognized by the presence
// of a registered event handler rather than by type.

/// Member list view event (version + full member list).
pub const EVENT_MEMBERS_VIEW: i32 = 0x0201;

/// Partition table view event (version + ownership assignments).
pub const EVENT_PARTITIONS_VIEW: i32 = 0x0202;

/// Near-cache invalidation event for a single key.
pub const EVENT_MAP_INVALIDATION: i32 = 0x0203;

/// Batched near-cache invalidation event.
pub const EVENT_MAP_BATCH_INVALIDATION: i32 = 0x0204;

/// Topic message event.
pub const EVENT_TOPIC_MESSAGE: i32 = 0x0205;

// Map operations.

/// Map put request.
pub const MAP_PUT: i32 = 0x0301;

/// Map get request.
pub const MAP_GET: i32 = 0x0302;

/// Map remove request.
pub const MAP_REMOVE: i32 = 0x0303;

/// Map contains key request.
pub const MAP_CONTAINS_KEY: i32 = 0x0304;

/// Map size request.
pub const MAP_SIZE: i32 = 0x0305;

/// Map clear request.
pub const MAP_CLEAR: i32 = 0x0306;

/// Map delete request (no previous value returned).
pub const MAP_DELETE: i32 = 0x0307;

/// Near-cache invalidation listener registration request.
pub const MAP_ADD_INVALIDATION_LISTENER: i32 = 0x0308;

/// Listener removal request (map and topic listeners).
pub const REMOVE_LISTENER: i32 = 0x0309;

// Replicated map operations.

/// Replicated map put request.
pub const REPLICATED_MAP_PUT: i32 = 0x0401;

/// Replicated map get request.
pub const REPLICATED_MAP_GET: i32 = 0x0402;

/// Replicated map remove request.
pub const REPLICATED_MAP_REMOVE: i32 = 0x0403;

/// Replicated map size request.
pub const REPLICATED_MAP_SIZE: i32 = 0x0404;

// Queue operations.

/// Queue offer request.
pub const QUEUE_OFFER: i32 = 0x0501;

/// Queue poll request.
pub const QUEUE_POLL: i32 = 0x0502;

/// Queue peek request.
pub const QUEUE_PEEK: i32 = 0x0503;

/// Queue size request.
pub const QUEUE_SIZE: i32 = 0x0504;

// Topic operations.

/// Topic publish request.
pub const TOPIC_PUBLISH: i32 = 0x0601;

/// Topic message listener registration request.
pub const TOPIC_ADD_LISTENER: i32 = 0x0602;

// List operations.

/// List add request.
pub const LIST_ADD: i32 = 0x0701;

/// List get-by-index request.
pub const LIST_GET: i32 = 0x0702;

/// List size request.
pub const LIST_SIZE: i32 = 0x0703;

/// List remove request.
pub const LIST_REMOVE: i32 = 0x0704;

// Atomic counter operations.

/// Counter get request.
pub const COUNTER_GET: i32 = 0x0801;

/// Counter set request.
pub const COUNTER_SET: i32 = 0x0802;

/// Counter add-and-get request.
pub const COUNTER_ADD_AND_GET: i32 = 0x0803;

/// Counter compare-and-set request.
pub const COUNTER_COMPARE_AND_SET: i32 = 0x0804;
