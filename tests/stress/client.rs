//! Resilient client stress tests

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use broker_resilience::{
    operation_fn, ClientConfig, OperationRef, ResilientClient, RetryPolicy, RunOutcome,
};

use super::ConnectionTally;
use crate::support::{counting_op, settings, MemoryBroker, MemoryConnection, MemoryConnector};

fn client(broker: &MemoryBroker) -> ResilientClient<MemoryConnector> {
    ResilientClient::new(
        broker.connector(),
        settings(&["node-a", "node-b"]),
        ClientConfig::builder()
            .name("stress")
            .policy(RetryPolicy::unbounded().with_delay(Duration::from_millis(1)))
            .build(),
    )
}

/// Test: Happy path volume on a single connection
#[tokio::test]
#[ignore]
async fn stress_one_hundred_thousand_operations() {
    println!("\n=== Client: 100k operations, no failures ===");

    let broker = MemoryBroker::new();
    let client = client(&broker);
    let (op, runs) = counting_op("PUBLISHER");

    let start = Instant::now();
    let count = 100_000;

    for _ in 0..count {
        assert_eq!(client.run(Arc::clone(&op)).await.unwrap(), RunOutcome::Completed);
    }

    let elapsed = start.elapsed();
    println!("Completed {} operations in {:?}", count, elapsed);
    println!("Throughput: {:.0} ops/sec", count as f64 / elapsed.as_secs_f64());

    assert_eq!(runs.load(Ordering::SeqCst), count);
    assert_eq!(broker.attempts(), 1);
    assert_eq!(client.state().recoveries(), 0);
}

/// Test: Concurrent callers while the broker keeps killing connections
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore]
async fn stress_connection_churn_under_load() {
    println!("\n=== Client: 64 callers x 500 operations with churn ===");

    let broker = MemoryBroker::new();
    let client = client(&broker);
    let tally = ConnectionTally::new();

    let executions = Arc::new(AtomicU32::new(0));
    let op: OperationRef<MemoryConnection> = {
        let executions = Arc::clone(&executions);
        let tally = Arc::clone(&tally);
        operation_fn("PUBLISHER", move |conn: Arc<MemoryConnection>| {
            let executions = Arc::clone(&executions);
            let tally = Arc::clone(&tally);
            async move {
                tally.record(&conn);
                if executions.fetch_add(1, Ordering::SeqCst) % 1_000 == 999 {
                    conn.sever("connection reset by peer");
                }
                conn.publish()
            }
        })
    };

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..64 {
        let client = client.clone();
        let op = Arc::clone(&op);
        handles.push(tokio::spawn(async move {
            for _ in 0..500 {
                client.run(Arc::clone(&op)).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    println!("Elapsed: {:?}", start.elapsed());
    println!("Executions: {}", executions.load(Ordering::SeqCst));
    println!("Recoveries: {}", client.state().recoveries());
    println!("Connections opened: {}", broker.connections().len());
    println!("Connections used: {}", tally.connections_used());

    assert_eq!(broker.max_open(), 1);
    assert!(tally.connections_used() > 1);
    assert!(tally.connections_used() <= broker.connections().len());
    assert!(client.state().recoveries() > 0);
    assert!(client.is_connected().await);
}

/// Test: A large durable registry survives repeated outages
#[tokio::test(start_paused = true)]
#[ignore]
async fn stress_large_durable_registry() {
    println!("\n=== Client: 1000 durable operations x 20 outages ===");

    let broker = MemoryBroker::new();
    let client = client(&broker);

    let mut counters = Vec::new();
    for i in 0..1_000 {
        let (op, runs) = counting_op(&format!("CONSUMER-{i}"));
        client.run_durable(op).await.unwrap();
        counters.push(runs);
    }
    assert_eq!(client.durable_count(), 1_000);

    let outages = 20;
    for _ in 0..outages {
        broker.kill_connections("connection reset by peer");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(client.state().recoveries(), outages);
    for runs in &counters {
        assert_eq!(runs.load(Ordering::SeqCst), outages as u32 + 1);
    }
}

/// Test: Failover across nodes while one is flapping
#[tokio::test(start_paused = true)]
#[ignore]
async fn stress_failover_between_flapping_nodes() {
    println!("\n=== Client: 200 failovers between two nodes ===");

    let broker = MemoryBroker::new();
    let client = client(&broker);
    client.connection().await.unwrap();

    for round in 0..200 {
        let down = round % 2 == 0;
        broker.set_node_down("node-a:5672", down);
        broker.kill_connections("node maintenance");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let expected = if down { "node-b" } else { "node-a" };
        let connection = broker.latest().expect("a connection was opened");
        assert_eq!(connection.node().host(), expected);
    }

    assert_eq!(client.state().recoveries(), 200);
    assert_eq!(broker.max_open(), 1);
}
