use broker_resilience::{ClientConfig, ClientError, ConnectionState, ResilientClient, RetryPolicy};
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::support::{counting_op, settings, EventLog, MemoryBroker};

#[tokio::test]
async fn run_after_shutdown_never_connects() {
    let broker = MemoryBroker::new();
    let client = ResilientClient::new(
        broker.connector(),
        settings(&["localhost"]),
        ClientConfig::default(),
    );
    assert!(client.shutdown().await);

    let (op, runs) = counting_op("PUBLISHER");
    let err = client.run(op).await.unwrap_err();
    assert!(matches!(err, ClientError::Shutdown));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(broker.attempts(), 0);
}

#[tokio::test]
async fn shutdown_closes_connection_and_forgets_durable_operations() {
    let broker = MemoryBroker::new();
    let log = EventLog::new();
    let client = ResilientClient::new(
        broker.connector(),
        settings(&["localhost"]),
        ClientConfig::builder().on_event(log.record()).build(),
    );
    let (consumer, _) = counting_op("CONSUMER");
    client.run_durable(consumer).await.unwrap();

    assert!(client.shutdown().await);
    assert!(!client.shutdown().await);

    assert_eq!(broker.open_count(), 0);
    assert_eq!(client.durable_count(), 0);
    assert_eq!(client.state().state(), ConnectionState::Terminated);
    assert_eq!(log.count("shutdown"), 1);
    // Our own close is not a remote shutdown.
    tokio::task::yield_now().await;
    assert_eq!(log.count("remote_shutdown"), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_recovery_sleep() {
    let broker = MemoryBroker::new();
    let client = ResilientClient::new(
        broker.connector(),
        settings(&["localhost"]),
        ClientConfig::background()
            .policy(RetryPolicy::unbounded().with_delay(Duration::from_secs(3600)))
            .build(),
    );
    client.connection().await.unwrap();
    broker.set_down(true);
    broker.kill_connections("node down");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(client.state().state(), ConnectionState::Reconnecting);

    // Would hang for an hour of virtual time if the sleep were not interrupted.
    tokio::time::timeout(Duration::from_secs(10), client.shutdown())
        .await
        .expect("shutdown waits for the sleeping episode");

    tokio::time::sleep(Duration::from_secs(7200)).await;
    assert_eq!(broker.attempts(), 1);
    assert_eq!(client.state().state(), ConnectionState::Terminated);
}

#[tokio::test(start_paused = true)]
async fn blocked_caller_gets_shutdown_error() {
    let broker = MemoryBroker::new();
    let client = ResilientClient::new(
        broker.connector(),
        settings(&["localhost"]),
        ClientConfig::builder()
            .policy(RetryPolicy::unbounded().with_delay(Duration::from_secs(60)))
            .build(),
    );
    broker.set_down(true);

    let caller = {
        let client = client.clone();
        tokio::spawn(async move {
            let (op, _) = counting_op("PUBLISHER");
            client.run(op).await
        })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    client.shutdown().await;

    let result = caller.await.unwrap();
    assert!(result.unwrap_err().is_shutdown());
}
