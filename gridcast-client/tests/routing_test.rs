//! Partition-aware routing and failover retry against a two-member cluster.

mod common;

use std::time::Duration;

use gridcast_core::protocol::constants::MAP_GET;
use gridcast_core::Data;
use gridcast_client::GridClient;

use crate::common::{await_condition, test_config, MockCluster};

#[tokio::test]
async fn test_get_routes_to_partition_owner() {
    let cluster = MockCluster::new();
    let member_a = cluster.spawn_member().await;
    let member_b = cluster.spawn_member().await;

    let client = GridClient::connect(test_config(&[member_a.address(), member_b.address()]))
        .await
        .unwrap();

    // Smart routing connects to both members once the view arrives.
    assert!(
        await_condition(|| client.connection_count() == 2, Duration::from_secs(3)).await,
        "never connected to both members"
    );

    let key_data = Data::from_value(&"x".to_string()).unwrap();
    let partition_id = cluster.partition_id_for(&key_data);
    let owner = cluster.partition_owner(partition_id).unwrap();

    // Wait until the client installed the partition table.
    assert!(
        await_condition(
            || client.partition_owner(partition_id) == Some(owner),
            Duration::from_secs(3)
        )
        .await,
        "partition table never arrived"
    );
    assert_eq!(client.partition_id_for(&key_data), partition_id);

    let map = client.get_map::<String, String>("m").await.unwrap();
    let _ = map.get(&"x".to_string()).await.unwrap();

    let served_by: Vec<_> = cluster
        .ops()
        .into_iter()
        .filter(|op| {
            op.message_type == MAP_GET
                && op.name == "m"
                && op.key.as_deref() == Some(key_data.as_slice())
        })
        .map(|op| op.member)
        .collect();
    assert_eq!(served_by, vec![owner], "get was not dispatched to the partition owner");

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_put_then_get_roundtrip() {
    let cluster = MockCluster::new();
    let member = cluster.spawn_member().await;

    let client = GridClient::connect(test_config(&[member.address()])).await.unwrap();
    let map = client.get_map::<String, String>("m").await.unwrap();

    assert_eq!(map.put("k".to_string(), "v".to_string()).await.unwrap(), None);
    assert_eq!(map.get(&"k".to_string()).await.unwrap(), Some("v".to_string()));
    assert_eq!(
        map.put("k".to_string(), "v2".to_string()).await.unwrap(),
        Some("v".to_string())
    );
    assert!(map.contains_key(&"k".to_string()).await.unwrap());
    assert_eq!(map.size().await.unwrap(), 1);

    assert_eq!(map.remove(&"k".to_string()).await.unwrap(), Some("v2".to_string()));
    assert_eq!(map.get(&"k".to_string()).await.unwrap(), None);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failover_retries_on_another_member() {
    let cluster = MockCluster::new();
    let member_a = cluster.spawn_member().await;
    let member_b = cluster.spawn_member().await;

    let key = "x".to_string();
    let key_data = Data::from_value(&key).unwrap();
    let value_data = Data::from_value(&"v".to_string()).unwrap();
    cluster.seed_map_entry("m", &key_data, &value_data);

    let client = GridClient::connect(test_config(&[member_a.address(), member_b.address()]))
        .await
        .unwrap();
    assert!(
        await_condition(|| client.connection_count() == 2, Duration::from_secs(3)).await,
        "never connected to both members"
    );

    let partition_id = cluster.partition_id_for(&key_data);
    let owner = cluster.partition_owner(partition_id).unwrap();
    assert!(
        await_condition(
            || client.partition_owner(partition_id) == Some(owner),
            Duration::from_secs(3)
        )
        .await
    );

    // Kill the owner's connection as soon as the get arrives; the
    // invocation must be re-correlated and retried elsewhere.
    let armed = [&member_a, &member_b]
        .into_iter()
        .find(|m| m.uuid() == owner)
        .unwrap();
    armed.drop_next_map_get();

    let map = client.get_map::<String, String>("m").await.unwrap();
    let value = map.get(&key).await.unwrap();
    assert_eq!(value, Some("v".to_string()), "retried get must observe the value");

    // The retry landed on a live member.
    let gets: Vec<_> = cluster
        .ops()
        .into_iter()
        .filter(|op| op.message_type == MAP_GET && op.key.as_deref() == Some(key_data.as_slice()))
        .collect();
    assert_eq!(gets.len(), 1, "the dropped attempt never reached a handler");

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unisocket_keeps_single_connection() {
    let cluster = MockCluster::new();
    let member_a = cluster.spawn_member().await;
    let member_b = cluster.spawn_member().await;

    let mut builder = gridcast_client::ClientConfig::builder()
        .cluster_name("mock")
        .network(|n| n.smart_routing(false));
    for address in [member_a.address(), member_b.address()] {
        builder = builder.add_address(address);
    }
    let config = builder.build().unwrap();

    let client = GridClient::connect(config).await.unwrap();
    // Give the reconciler a chance to (wrongly) open a second connection.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(client.connection_count(), 1);

    let map = client.get_map::<String, String>("m").await.unwrap();
    map.put("k".to_string(), "v".to_string()).await.unwrap();
    assert_eq!(map.get(&"k".to_string()).await.unwrap(), Some("v".to_string()));

    client.shutdown().await.unwrap();
}
