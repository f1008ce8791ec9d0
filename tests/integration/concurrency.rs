use broker_resilience::{
    operation_fn, ClientConfig, OperationRef, ResilientClient, RetryPolicy, RunOutcome,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::support::{settings, MemoryBroker, MemoryConnection};

fn client(broker: &MemoryBroker) -> ResilientClient<crate::support::MemoryConnector> {
    ResilientClient::new(
        broker.connector(),
        settings(&["localhost"]),
        ClientConfig::builder()
            .name("concurrency")
            .policy(RetryPolicy::bounded(50).with_delay(Duration::from_millis(10)))
            .build(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn never_more_than_one_open_connection() {
    let broker = MemoryBroker::new();
    broker.set_connect_delay(Duration::from_millis(2));
    let client = client(&broker);

    // Every 25th execution anywhere severs the connection it ran on.
    let executions = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&executions);
    let op: OperationRef<MemoryConnection> =
        operation_fn("PUBLISHER", move |conn: Arc<MemoryConnection>| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) % 25 == 24 {
                    conn.sever("connection reset by peer");
                }
                conn.publish()
            }
        });

    let mut handles = Vec::new();
    for _ in 0..16 {
        let client = client.clone();
        let op = Arc::clone(&op);
        handles.push(tokio::spawn(async move {
            for _ in 0..20 {
                assert_eq!(client.run(Arc::clone(&op)).await.unwrap(), RunOutcome::Completed);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(broker.max_open(), 1);
    assert!(broker.open_count() <= 1);
    assert!(client.state().recoveries() > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_failures_share_one_replacement() {
    let broker = MemoryBroker::new();
    let client = client(&broker);
    client.connection().await.unwrap();

    // Fails on the first connection only.
    let op: OperationRef<MemoryConnection> =
        operation_fn("PUBLISHER", |conn: Arc<MemoryConnection>| async move {
            if conn.id() == 1 {
                conn.sever("connection reset by peer");
            }
            conn.publish()
        });

    let mut handles = Vec::new();
    for _ in 0..16 {
        let client = client.clone();
        let op = Arc::clone(&op);
        handles.push(tokio::spawn(async move { client.run(op).await }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), RunOutcome::Completed);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(broker.connections().len(), 2);
    assert!(client.state().recoveries() <= 1);
    assert_eq!(broker.max_open(), 1);
}
