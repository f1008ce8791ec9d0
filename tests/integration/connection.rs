use broker_resilience::{
    Address, ClientConfig, ConfigError, ConnectionSettings, ConnectionState, ResilientClient,
    RetryPolicy, RunOutcome,
};
use std::time::Duration;

use crate::support::{counting_op, init_tracing, settings, MemoryBroker};

#[tokio::test]
async fn connects_to_second_address_when_first_is_unreachable() {
    init_tracing();
    let broker = MemoryBroker::new();
    broker.set_node_down("rabbit-1:6671", true);

    let client = ResilientClient::new(
        broker.connector(),
        settings(&["rabbit-1:6671", "rabbit-2:7671"]),
        ClientConfig::default(),
    );

    let connection = client.connection().await.unwrap();
    assert_eq!(connection.node(), &Address::new("rabbit-2", 7671));
    assert_eq!(broker.attempts(), 1);
}

#[tokio::test]
async fn connection_is_opened_by_first_operation() {
    let broker = MemoryBroker::new();
    let client = ResilientClient::new(
        broker.connector(),
        settings(&["localhost"]),
        ClientConfig::default(),
    );
    assert_eq!(broker.attempts(), 0);
    assert_eq!(client.state().state(), ConnectionState::Disconnected);

    let (op, runs) = counting_op("PUBLISHER");
    assert_eq!(client.run(op).await.unwrap(), RunOutcome::Completed);

    assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(broker.attempts(), 1);
    assert_eq!(client.state().state(), ConnectionState::Connected);
    assert_eq!(client.state().generation(), 1);
}

#[tokio::test]
async fn operations_share_one_connection() {
    let broker = MemoryBroker::new();
    let client = ResilientClient::new(
        broker.connector(),
        settings(&["localhost"]),
        ClientConfig::default(),
    );

    for id in ["a", "b", "c"] {
        let (op, _) = counting_op(id);
        client.run(op).await.unwrap();
    }
    assert_eq!(broker.connections().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unreachable_cluster_at_startup_is_recovered() {
    let broker = MemoryBroker::new();
    broker.fail_next(2);
    let client = ResilientClient::new(
        broker.connector(),
        settings(&["localhost"]),
        ClientConfig::builder()
            .policy(RetryPolicy::bounded(5).with_delay(Duration::from_secs(1)))
            .build(),
    );

    let (op, runs) = counting_op("PUBLISHER");
    assert_eq!(client.run(op).await.unwrap(), RunOutcome::Completed);

    // One failed first connect, one failed recovery attempt, then success.
    assert_eq!(broker.attempts(), 3);
    assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[test]
fn invalid_settings_fail_at_construction() {
    assert_eq!(
        ConnectionSettings::builder().build().unwrap_err(),
        ConfigError::NoAddresses
    );
    assert!(matches!(
        "rabbit:notaport".parse::<Address>(),
        Err(ConfigError::InvalidAddress { .. })
    ));
    assert_eq!(
        ConnectionSettings::builder()
            .address(Address::new("localhost", 5672))
            .virtual_host("")
            .build()
            .unwrap_err(),
        ConfigError::EmptyVirtualHost
    );
}
