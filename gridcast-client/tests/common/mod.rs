//! Test harness: an in-process cluster simulation speaking the client's
//! wire dialect over real TCP.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use gridcast_client::cluster::{Member, MembersView, PartitionsView};
use gridcast_client::connection::{AuthenticationRequest, AuthenticationResponse, AUTH_STATUS_OK};
use gridcast_client::nearcache::InvalidationEvent;
use gridcast_core::protocol::constants::*;
use gridcast_core::{
    Data, DataInput, DataOutput, Message, MessageCodec, ObjectDataInput, ObjectDataOutput,
};

pub const DEFAULT_PARTITION_COUNT: i32 = 271;

type Writer = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

/// One recorded data operation, for routing assertions.
#[derive(Debug, Clone)]
pub struct OpRecord {
    pub member: Uuid,
    pub message_type: i32,
    pub name: String,
    pub key: Option<Vec<u8>>,
}

struct ViewSubscription {
    correlation_id: i64,
    writer: Writer,
}

struct InvalidationListener {
    map_name: String,
    correlation_id: i64,
    writer: Writer,
}

struct TopicListener {
    topic_name: String,
    correlation_id: i64,
    writer: Writer,
}

struct ClusterState {
    cluster_uuid: Uuid,
    partition_count: i32,
    members: Mutex<Vec<(Uuid, SocketAddr)>>,
    member_version: AtomicI32,
    partition_owners: Mutex<HashMap<i32, Uuid>>,
    partition_version: AtomicI32,
    partition_uuids: Mutex<HashMap<i32, Uuid>>,
    partition_sequences: Mutex<HashMap<Uuid, i64>>,
    maps: Mutex<HashMap<String, HashMap<Vec<u8>, Vec<u8>>>>,
    replicated_maps: Mutex<HashMap<String, HashMap<Vec<u8>, Vec<u8>>>>,
    queues: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    lists: Mutex<HashMap<String, Vec<Vec<u8>>>>,
    counters: Mutex<HashMap<String, i64>>,
    view_subs: Mutex<Vec<ViewSubscription>>,
    invalidation_listeners: Mutex<Vec<InvalidationListener>>,
    topic_listeners: Mutex<Vec<TopicListener>>,
    ops: Mutex<Vec<OpRecord>>,
}

/// An in-process cluster of scripted members.
pub struct MockCluster {
    state: Arc<ClusterState>,
}

/// One scripted member accepting real TCP connections.
pub struct MockMember {
    uuid: Uuid,
    address: SocketAddr,
    state: Arc<ClusterState>,
    shutdown: CancellationToken,
    /// When set, the member drops the connection instead of answering the
    /// next map get, simulating a member dying mid-invocation.
    drop_next_map_get: Arc<AtomicBool>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::with_partition_count(DEFAULT_PARTITION_COUNT)
    }

    pub fn with_partition_count(partition_count: i32) -> Self {
        Self {
            state: Arc::new(ClusterState {
                cluster_uuid: Uuid::new_v4(),
                partition_count,
                members: Mutex::new(Vec::new()),
                member_version: AtomicI32::new(0),
                partition_owners: Mutex::new(HashMap::new()),
                partition_version: AtomicI32::new(0),
                partition_uuids: Mutex::new(HashMap::new()),
                partition_sequences: Mutex::new(HashMap::new()),
                maps: Mutex::new(HashMap::new()),
                replicated_maps: Mutex::new(HashMap::new()),
                queues: Mutex::new(HashMap::new()),
                lists: Mutex::new(HashMap::new()),
                counters: Mutex::new(HashMap::new()),
                view_subs: Mutex::new(Vec::new()),
                invalidation_listeners: Mutex::new(Vec::new()),
                topic_listeners: Mutex::new(Vec::new()),
                ops: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn cluster_uuid(&self) -> Uuid {
        self.state.cluster_uuid
    }

    pub fn partition_count(&self) -> i32 {
        self.state.partition_count
    }

    /// Starts a new member, rebalances partitions and pushes fresh views.
    pub async fn spawn_member(&self) -> MockMember {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let uuid = Uuid::new_v4();
        let shutdown = CancellationToken::new();
        let drop_next_map_get = Arc::new(AtomicBool::new(false));

        self.state.members.lock().unwrap().push((uuid, address));
        self.state.member_version.fetch_add(1, Ordering::SeqCst);
        self.rebalance();

        let member = MockMember {
            uuid,
            address,
            state: Arc::clone(&self.state),
            shutdown: shutdown.clone(),
            drop_next_map_get: Arc::clone(&drop_next_map_get),
        };

        let state = Arc::clone(&self.state);
        let accept_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let stream = tokio::select! {
                    _ = accept_shutdown.cancelled() => return,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => stream,
                        Err(_) => return,
                    },
                };
                let state = Arc::clone(&state);
                let conn_shutdown = accept_shutdown.clone();
                let drop_flag = Arc::clone(&drop_next_map_get);
                tokio::spawn(async move {
                    let _ = serve_connection(state, uuid, stream, conn_shutdown, drop_flag).await;
                });
            }
        });

        self.push_views().await;
        member
    }

    /// Removes a member from the roster, rebalances and pushes fresh views.
    /// The member's sockets are killed too.
    pub async fn remove_member(&self, member: &MockMember) {
        member.shutdown.cancel();
        self.state
            .members
            .lock()
            .unwrap()
            .retain(|(uuid, _)| *uuid != member.uuid);
        self.state.member_version.fetch_add(1, Ordering::SeqCst);
        self.rebalance();
        self.push_views().await;
    }

    /// Assigns partitions round-robin over the current members.
    fn rebalance(&self) {
        let members = self.state.members.lock().unwrap();
        let mut owners = self.state.partition_owners.lock().unwrap();
        owners.clear();
        if members.is_empty() {
            return;
        }
        for partition_id in 0..self.state.partition_count {
            let (uuid, _) = members[partition_id as usize % members.len()];
            owners.insert(partition_id, uuid);
        }
        self.state.partition_version.fetch_add(1, Ordering::SeqCst);
    }

    /// Pushes the current member and partition views to every subscriber.
    pub async fn push_views(&self) {
        let subs: Vec<(i64, Writer)> = {
            let subs = self.state.view_subs.lock().unwrap();
            subs.iter()
                .map(|s| (s.correlation_id, Arc::clone(&s.writer)))
                .collect()
        };
        for (correlation_id, writer) in subs {
            let _ = push_views_to(&self.state, correlation_id, &writer).await;
        }
    }

    /// Returns the uuid owning the given partition.
    pub fn partition_owner(&self, partition_id: i32) -> Option<Uuid> {
        self.state.partition_owners.lock().unwrap().get(&partition_id).copied()
    }

    /// Returns the partition id a serialized key routes to.
    pub fn partition_id_for(&self, data: &Data) -> i32 {
        ((data.partition_hash() as i64 & i64::MAX) % self.state.partition_count as i64) as i32
    }

    /// Returns the recorded data operations.
    pub fn ops(&self) -> Vec<OpRecord> {
        self.state.ops.lock().unwrap().clone()
    }

    /// Stores an entry directly, bypassing any client.
    pub fn seed_map_entry(&self, name: &str, key: &Data, value: &Data) {
        self.state
            .maps
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .insert(key.as_slice().to_vec(), value.as_slice().to_vec());
    }

    /// Mutates an entry directly and pushes the invalidation, as another
    /// client's put would.
    pub async fn put_from_elsewhere(&self, name: &str, key: &Data, value: &Data) {
        self.seed_map_entry(name, key, value);
        let source = self.state.members.lock().unwrap().first().map(|(uuid, _)| *uuid);
        push_invalidation(
            &self.state,
            source.unwrap_or_else(Uuid::new_v4),
            name,
            Some(key.as_slice().to_vec()),
        )
        .await;
    }

    /// Pushes an invalidation with an artificially advanced sequence,
    /// simulating lost invalidation events.
    pub async fn push_invalidation_with_gap(&self, name: &str, key: &Data, gap: i64) {
        let partition_id = self.partition_id_for(key);
        let partition_uuid = partition_uuid_for(&self.state, partition_id);
        let sequence = {
            let mut sequences = self.state.partition_sequences.lock().unwrap();
            let entry = sequences.entry(partition_uuid).or_insert(0);
            *entry += 1 + gap;
            *entry
        };
        let source = self
            .state
            .members
            .lock()
            .unwrap()
            .first()
            .map(|(uuid, _)| *uuid)
            .unwrap_or_else(Uuid::new_v4);
        deliver_invalidation(
            &self.state,
            name,
            InvalidationEvent {
                key: Some(Data::new(key.as_slice().to_vec())),
                source,
                partition: partition_uuid,
                sequence,
            },
        )
        .await;
    }

    pub fn invalidation_listener_count(&self) -> usize {
        self.state.invalidation_listeners.lock().unwrap().len()
    }
}

impl MockMember {
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Arms the drop-on-next-get behavior.
    pub fn drop_next_map_get(&self) {
        self.drop_next_map_get.store(true, Ordering::SeqCst);
    }
}

async fn serve_connection(
    state: Arc<ClusterState>,
    member: Uuid,
    stream: TcpStream,
    shutdown: CancellationToken,
    drop_next_map_get: Arc<AtomicBool>,
) -> std::io::Result<()> {
    let (mut read_half, write_half) = stream.into_split();
    let writer: Writer = Arc::new(tokio::sync::Mutex::new(write_half));

    let mut preamble = [0u8; 3];
    read_half.read_exact(&mut preamble).await?;
    assert_eq!(&preamble, PROTOCOL_PREAMBLE, "bad protocol preamble");

    let mut codec = MessageCodec::new();
    let mut buffer = BytesMut::with_capacity(16 * 1024);
    loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            read = read_half.read_buf(&mut buffer) => read?,
        };
        if read == 0 {
            return Ok(());
        }
        while let Ok(Some(request)) = codec.decode(&mut buffer) {
            if request.message_type() == MAP_GET && drop_next_map_get.swap(false, Ordering::SeqCst)
            {
                // Simulate the member dying with the invocation in flight.
                return Ok(());
            }
            handle_request(&state, member, &writer, request).await;
        }
    }
}

async fn send(writer: &Writer, mut message: Message, correlation_id: i64) {
    message.set_correlation_id(correlation_id);
    let mut out = BytesMut::new();
    message.write_to(&mut out);
    let mut writer = writer.lock().await;
    let _ = writer.write_all(&out).await;
}

fn empty_response(message_type: i32) -> Message {
    Message::new(message_type)
}

fn bool_response(message_type: i32, value: bool) -> Message {
    let mut out = ObjectDataOutput::new();
    out.write_bool(value).unwrap();
    Message::with_payload(message_type, out.into_buffer())
}

fn i32_response(message_type: i32, value: i32) -> Message {
    let mut out = ObjectDataOutput::new();
    out.write_int(value).unwrap();
    Message::with_payload(message_type, out.into_buffer())
}

fn i64_response(message_type: i32, value: i64) -> Message {
    let mut out = ObjectDataOutput::new();
    out.write_long(value).unwrap();
    Message::with_payload(message_type, out.into_buffer())
}

fn nullable_response(message_type: i32, value: Option<&[u8]>) -> Message {
    let mut out = ObjectDataOutput::new();
    match value {
        Some(bytes) => {
            out.write_bool(true).unwrap();
            out.write_byte_array(bytes).unwrap();
        }
        None => out.write_bool(false).unwrap(),
    }
    Message::with_payload(message_type, out.into_buffer())
}

fn uuid_response(message_type: i32, value: Uuid) -> Message {
    let mut out = ObjectDataOutput::new();
    out.write_uuid(value).unwrap();
    Message::with_payload(message_type, out.into_buffer())
}

fn partition_uuid_for(state: &Arc<ClusterState>, partition_id: i32) -> Uuid {
    *state
        .partition_uuids
        .lock()
        .unwrap()
        .entry(partition_id)
        .or_insert_with(Uuid::new_v4)
}

async fn push_views_to(
    state: &Arc<ClusterState>,
    correlation_id: i64,
    writer: &Writer,
) -> gridcast_core::Result<()> {
    let members_view = {
        let members = state.members.lock().unwrap();
        MembersView {
            version: state.member_version.load(Ordering::SeqCst),
            members: members
                .iter()
                .map(|(uuid, address)| {
                    Member::with_details(*uuid, *address, "5.0-mock".to_string(), false)
                })
                .collect(),
        }
    };
    let partitions_view = {
        let owners = state.partition_owners.lock().unwrap();
        PartitionsView {
            version: state.partition_version.load(Ordering::SeqCst),
            owners: owners.clone(),
        }
    };
    send(writer, members_view.encode(correlation_id)?, correlation_id).await;
    send(writer, partitions_view.encode(correlation_id)?, correlation_id).await;
    Ok(())
}

async fn push_invalidation(
    state: &Arc<ClusterState>,
    source: Uuid,
    map_name: &str,
    key: Option<Vec<u8>>,
) {
    let (partition_uuid, sequence) = {
        let partition_id = match &key {
            Some(bytes) => {
                let data = Data::new(bytes.clone());
                ((data.partition_hash() as i64 & i64::MAX) % state.partition_count as i64) as i32
            }
            None => 0,
        };
        let partition_uuid = partition_uuid_for(state, partition_id);
        let mut sequences = state.partition_sequences.lock().unwrap();
        let entry = sequences.entry(partition_uuid).or_insert(0);
        *entry += 1;
        (partition_uuid, *entry)
    };

    deliver_invalidation(
        state,
        map_name,
        InvalidationEvent {
            key: key.map(Data::new),
            source,
            partition: partition_uuid,
            sequence,
        },
    )
    .await;
}

async fn deliver_invalidation(state: &Arc<ClusterState>, map_name: &str, event: InvalidationEvent) {
    let listeners: Vec<(i64, Writer)> = {
        let listeners = state.invalidation_listeners.lock().unwrap();
        listeners
            .iter()
            .filter(|l| l.map_name == map_name)
            .map(|l| (l.correlation_id, Arc::clone(&l.writer)))
            .collect()
    };
    for (correlation_id, writer) in listeners {
        let mut out = ObjectDataOutput::new();
        if event.write_to(&mut out).is_err() {
            continue;
        }
        let message = Message::with_payload(EVENT_MAP_INVALIDATION, out.into_buffer());
        send(&writer, message, correlation_id).await;
    }
}

fn record_op(
    state: &Arc<ClusterState>,
    member: Uuid,
    message_type: i32,
    name: &str,
    key: Option<Vec<u8>>,
) {
    state.ops.lock().unwrap().push(OpRecord {
        member,
        message_type,
        name: name.to_string(),
        key,
    });
}

async fn handle_request(state: &Arc<ClusterState>, member: Uuid, writer: &Writer, request: Message) {
    let correlation_id = request.correlation_id();
    let message_type = request.message_type();
    let mut input = ObjectDataInput::new(request.payload());

    match message_type {
        CLIENT_AUTHENTICATION => {
            let _ = AuthenticationRequest::decode(&request).unwrap();
            let response = AuthenticationResponse {
                status: AUTH_STATUS_OK,
                member_uuid: member,
                cluster_uuid: state.cluster_uuid,
                partition_count: state.partition_count,
                owner_uuid: member,
            };
            send(writer, response.encode(correlation_id).unwrap(), correlation_id).await;
        }
        CLIENT_HEARTBEAT => {
            send(writer, empty_response(CLIENT_HEARTBEAT), correlation_id).await;
        }
        CLIENT_ADD_CLUSTER_VIEW_LISTENER => {
            state.view_subs.lock().unwrap().push(ViewSubscription {
                correlation_id,
                writer: Arc::clone(writer),
            });
            send(
                writer,
                empty_response(CLIENT_ADD_CLUSTER_VIEW_LISTENER),
                correlation_id,
            )
            .await;
            let _ = push_views_to(state, correlation_id, writer).await;
        }
        MAP_GET => {
            let name = input.read_string().unwrap();
            let key = input.read_byte_array().unwrap();
            record_op(state, member, MAP_GET, &name, Some(key.clone()));
            let value = state
                .maps
                .lock()
                .unwrap()
                .get(&name)
                .and_then(|m| m.get(&key).cloned());
            send(writer, nullable_response(MAP_GET, value.as_deref()), correlation_id).await;
        }
        MAP_PUT => {
            let name = input.read_string().unwrap();
            let key = input.read_byte_array().unwrap();
            let value = input.read_byte_array().unwrap();
            let _ttl = input.read_long().unwrap();
            record_op(state, member, MAP_PUT, &name, Some(key.clone()));
            let previous = state
                .maps
                .lock()
                .unwrap()
                .entry(name.clone())
                .or_default()
                .insert(key.clone(), value);
            send(writer, nullable_response(MAP_PUT, previous.as_deref()), correlation_id).await;
            push_invalidation(state, member, &name, Some(key)).await;
        }
        MAP_REMOVE => {
            let name = input.read_string().unwrap();
            let key = input.read_byte_array().unwrap();
            record_op(state, member, MAP_REMOVE, &name, Some(key.clone()));
            let previous = state
                .maps
                .lock()
                .unwrap()
                .get_mut(&name)
                .and_then(|m| m.remove(&key));
            send(writer, nullable_response(MAP_REMOVE, previous.as_deref()), correlation_id).await;
            push_invalidation(state, member, &name, Some(key)).await;
        }
        MAP_DELETE => {
            let name = input.read_string().unwrap();
            let key = input.read_byte_array().unwrap();
            record_op(state, member, MAP_DELETE, &name, Some(key.clone()));
            if let Some(map) = state.maps.lock().unwrap().get_mut(&name) {
                map.remove(&key);
            }
            send(writer, empty_response(MAP_DELETE), correlation_id).await;
            push_invalidation(state, member, &name, Some(key)).await;
        }
        MAP_CONTAINS_KEY => {
            let name = input.read_string().unwrap();
            let key = input.read_byte_array().unwrap();
            let present = state
                .maps
                .lock()
                .unwrap()
                .get(&name)
                .map(|m| m.contains_key(&key))
                .unwrap_or(false);
            send(writer, bool_response(MAP_CONTAINS_KEY, present), correlation_id).await;
        }
        MAP_SIZE => {
            let name = input.read_string().unwrap();
            let size = state
                .maps
                .lock()
                .unwrap()
                .get(&name)
                .map(|m| m.len() as i32)
                .unwrap_or(0);
            send(writer, i32_response(MAP_SIZE, size), correlation_id).await;
        }
        MAP_CLEAR => {
            let name = input.read_string().unwrap();
            if let Some(map) = state.maps.lock().unwrap().get_mut(&name) {
                map.clear();
            }
            send(writer, empty_response(MAP_CLEAR), correlation_id).await;
            push_invalidation(state, member, &name, None).await;
        }
        MAP_ADD_INVALIDATION_LISTENER => {
            let name = input.read_string().unwrap();
            state
                .invalidation_listeners
                .lock()
                .unwrap()
                .push(InvalidationListener {
                    map_name: name,
                    correlation_id,
                    writer: Arc::clone(writer),
                });
            send(
                writer,
                uuid_response(MAP_ADD_INVALIDATION_LISTENER, Uuid::new_v4()),
                correlation_id,
            )
            .await;
        }
        REMOVE_LISTENER => {
            send(writer, bool_response(REMOVE_LISTENER, true), correlation_id).await;
        }
        REPLICATED_MAP_PUT => {
            let name = input.read_string().unwrap();
            let key = input.read_byte_array().unwrap();
            let value = input.read_byte_array().unwrap();
            let previous = state
                .replicated_maps
                .lock()
                .unwrap()
                .entry(name)
                .or_default()
                .insert(key, value);
            send(
                writer,
                nullable_response(REPLICATED_MAP_PUT, previous.as_deref()),
                correlation_id,
            )
            .await;
        }
        REPLICATED_MAP_GET => {
            let name = input.read_string().unwrap();
            let key = input.read_byte_array().unwrap();
            let value = state
                .replicated_maps
                .lock()
                .unwrap()
                .get(&name)
                .and_then(|m| m.get(&key).cloned());
            send(
                writer,
                nullable_response(REPLICATED_MAP_GET, value.as_deref()),
                correlation_id,
            )
            .await;
        }
        REPLICATED_MAP_REMOVE => {
            let name = input.read_string().unwrap();
            let key = input.read_byte_array().unwrap();
            let previous = state
                .replicated_maps
                .lock()
                .unwrap()
                .get_mut(&name)
                .and_then(|m| m.remove(&key));
            send(
                writer,
                nullable_response(REPLICATED_MAP_REMOVE, previous.as_deref()),
                correlation_id,
            )
            .await;
        }
        REPLICATED_MAP_SIZE => {
            let name = input.read_string().unwrap();
            let size = state
                .replicated_maps
                .lock()
                .unwrap()
                .get(&name)
                .map(|m| m.len() as i32)
                .unwrap_or(0);
            send(writer, i32_response(REPLICATED_MAP_SIZE, size), correlation_id).await;
        }
        QUEUE_OFFER => {
            let name = input.read_string().unwrap();
            let item = input.read_byte_array().unwrap();
            let _timeout = input.read_long().unwrap();
            state
                .queues
                .lock()
                .unwrap()
                .entry(name)
                .or_default()
                .push_back(item);
            send(writer, bool_response(QUEUE_OFFER, true), correlation_id).await;
        }
        QUEUE_POLL => {
            let name = input.read_string().unwrap();
            let _timeout = input.read_long().unwrap();
            let item = state
                .queues
                .lock()
                .unwrap()
                .get_mut(&name)
                .and_then(|q| q.pop_front());
            send(writer, nullable_response(QUEUE_POLL, item.as_deref()), correlation_id).await;
        }
        QUEUE_PEEK => {
            let name = input.read_string().unwrap();
            let item = state
                .queues
                .lock()
                .unwrap()
                .get(&name)
                .and_then(|q| q.front().cloned());
            send(writer, nullable_response(QUEUE_PEEK, item.as_deref()), correlation_id).await;
        }
        QUEUE_SIZE => {
            let name = input.read_string().unwrap();
            let size = state
                .queues
                .lock()
                .unwrap()
                .get(&name)
                .map(|q| q.len() as i32)
                .unwrap_or(0);
            send(writer, i32_response(QUEUE_SIZE, size), correlation_id).await;
        }
        LIST_ADD => {
            let name = input.read_string().unwrap();
            let item = input.read_byte_array().unwrap();
            state.lists.lock().unwrap().entry(name).or_default().push(item);
            send(writer, bool_response(LIST_ADD, true), correlation_id).await;
        }
        LIST_GET => {
            let name = input.read_string().unwrap();
            let index = input.read_int().unwrap();
            let item = state
                .lists
                .lock()
                .unwrap()
                .get(&name)
                .and_then(|l| l.get(index as usize).cloned());
            send(writer, nullable_response(LIST_GET, item.as_deref()), correlation_id).await;
        }
        LIST_REMOVE => {
            let name = input.read_string().unwrap();
            let item = input.read_byte_array().unwrap();
            let removed = {
                let mut lists = state.lists.lock().unwrap();
                match lists.get_mut(&name) {
                    Some(list) => match list.iter().position(|i| *i == item) {
                        Some(index) => {
                            list.remove(index);
                            true
                        }
                        None => false,
                    },
                    None => false,
                }
            };
            send(writer, bool_response(LIST_REMOVE, removed), correlation_id).await;
        }
        LIST_SIZE => {
            let name = input.read_string().unwrap();
            let size = state
                .lists
                .lock()
                .unwrap()
                .get(&name)
                .map(|l| l.len() as i32)
                .unwrap_or(0);
            send(writer, i32_response(LIST_SIZE, size), correlation_id).await;
        }
        TOPIC_PUBLISH => {
            let name = input.read_string().unwrap();
            let item = input.read_byte_array().unwrap();
            send(writer, empty_response(TOPIC_PUBLISH), correlation_id).await;

            let listeners: Vec<(i64, Writer)> = {
                let listeners = state.topic_listeners.lock().unwrap();
                listeners
                    .iter()
                    .filter(|l| l.topic_name == name)
                    .map(|l| (l.correlation_id, Arc::clone(&l.writer)))
                    .collect()
            };
            for (listener_cid, listener_writer) in listeners {
                let mut out = ObjectDataOutput::new();
                out.write_byte_array(&item).unwrap();
                out.write_long(0).unwrap();
                out.write_uuid(member).unwrap();
                let event = Message::with_payload(EVENT_TOPIC_MESSAGE, out.into_buffer());
                send(&listener_writer, event, listener_cid).await;
            }
        }
        TOPIC_ADD_LISTENER => {
            let name = input.read_string().unwrap();
            state.topic_listeners.lock().unwrap().push(TopicListener {
                topic_name: name,
                correlation_id,
                writer: Arc::clone(writer),
            });
            send(
                writer,
                uuid_response(TOPIC_ADD_LISTENER, Uuid::new_v4()),
                correlation_id,
            )
            .await;
        }
        COUNTER_GET => {
            let name = counter_key(&mut input);
            let value = state.counters.lock().unwrap().get(&name).copied().unwrap_or(0);
            send(writer, i64_response(COUNTER_GET, value), correlation_id).await;
        }
        COUNTER_SET => {
            let name = counter_key(&mut input);
            let value = input.read_long().unwrap();
            state.counters.lock().unwrap().insert(name, value);
            send(writer, empty_response(COUNTER_SET), correlation_id).await;
        }
        COUNTER_ADD_AND_GET => {
            let name = counter_key(&mut input);
            let delta = input.read_long().unwrap();
            let result = {
                let mut counters = state.counters.lock().unwrap();
                let value = counters.entry(name).or_insert(0);
                *value += delta;
                *value
            };
            send(writer, i64_response(COUNTER_ADD_AND_GET, result), correlation_id).await;
        }
        COUNTER_COMPARE_AND_SET => {
            let name = counter_key(&mut input);
            let expected = input.read_long().unwrap();
            let new = input.read_long().unwrap();
            let swapped = {
                let mut counters = state.counters.lock().unwrap();
                let value = counters.entry(name).or_insert(0);
                if *value == expected {
                    *value = new;
                    true
                } else {
                    false
                }
            };
            send(
                writer,
                bool_response(COUNTER_COMPARE_AND_SET, swapped),
                correlation_id,
            )
            .await;
        }
        other => {
            panic!("mock member received unsupported message type {:#06x}", other);
        }
    }
}

fn counter_key(input: &mut ObjectDataInput<'_>) -> String {
    let name = input.read_string().unwrap();
    match input.read_nullable_string().unwrap() {
        Some(group) => format!("{}@{}", name, group),
        None => name,
    }
}

/// Polls a condition until it holds or the timeout elapses.
pub async fn await_condition(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A client config pointed at the given members, tuned for fast tests.
pub fn test_config(addresses: &[SocketAddr]) -> gridcast_client::ClientConfig {
    let mut builder = gridcast_client::ClientConfig::builder()
        .cluster_name("mock")
        .cluster_connect_timeout(Duration::from_secs(5))
        .network(|n| n.connection_timeout(Duration::from_secs(2)))
        .invocation(|i| {
            i.timeout(Duration::from_secs(5))
                .retry_pause(Duration::from_millis(50))
        })
        .retry(|r| {
            r.initial_backoff(Duration::from_millis(20))
                .max_backoff(Duration::from_millis(200))
        });
    for address in addresses {
        builder = builder.add_address(*address);
    }
    builder.build().unwrap()
}
