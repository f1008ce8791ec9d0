use broker_resilience::{
    ClientConfig, ClientError, ClientEvent, ConnectionState, ResilientClient, RetryPolicy,
    RunOptions, RunOutcome,
};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::support::{
    channel_error_op, counting_op, flaky_op, init_tracing, settings, EventLog, MemoryBroker,
    MemoryConnector,
};

fn client(
    broker: &MemoryBroker,
    policy: RetryPolicy,
    log: &EventLog,
) -> ResilientClient<MemoryConnector> {
    ResilientClient::new(
        broker.connector(),
        settings(&["localhost"]),
        ClientConfig::builder()
            .name("recovery")
            .policy(policy)
            .on_event(log.record())
            .build(),
    )
}

#[tokio::test(start_paused = true)]
async fn bounded_policy_gives_up_after_exactly_max_attempts() {
    init_tracing();
    let broker = MemoryBroker::new();
    let log = EventLog::new();
    let client = client(
        &broker,
        RetryPolicy::bounded(5).with_delay(Duration::from_secs(5)),
        &log,
    );
    client.connection().await.unwrap();
    broker.set_down(true);

    let (op, runs) = channel_error_op("PUBLISHER");
    let err = client.run(op).await.unwrap_err();

    match err {
        ClientError::RecoveryExhausted { attempts, .. } => assert_eq!(attempts, 5),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    // The initial connect plus five recovery attempts; no sixth.
    assert_eq!(broker.attempts(), 6);
    assert_eq!(log.count("reconnect_attempt"), 5);
    assert_eq!(log.count("recovery_exhausted"), 1);
    assert_eq!(client.state().state(), ConnectionState::Failed);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(broker.attempts(), 6);
}

#[tokio::test(start_paused = true)]
async fn outage_reported_by_broker_is_exhausted_once() {
    let broker = MemoryBroker::new();
    let log = EventLog::new();
    let client = client(
        &broker,
        RetryPolicy::bounded(5).with_delay(Duration::from_secs(5)),
        &log,
    );
    client.connection().await.unwrap();
    broker.set_down(true);
    broker.kill_connections("broker restart");
    // Let the worker start its episode before the caller shows up.
    tokio::time::sleep(Duration::from_millis(1)).await;
    let started = tokio::time::Instant::now();

    let (op, runs) = channel_error_op("PUBLISHER");
    let err = client.run(op).await.unwrap_err();

    match err {
        ClientError::RecoveryExhausted { attempts, .. } => assert_eq!(attempts, 5),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(broker.attempts(), 6);
    assert_eq!(log.count("reconnect_attempt"), 5);
    assert_eq!(log.count("recovery_exhausted"), 1);
    assert!(started.elapsed() < Duration::from_secs(30));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(broker.attempts(), 6);
    assert_eq!(log.count("recovery_exhausted"), 1);
}

#[tokio::test(start_paused = true)]
async fn caller_exhaustion_covers_pending_remote_shutdown() {
    let broker = MemoryBroker::new();
    let log = EventLog::new();
    let client = client(
        &broker,
        RetryPolicy::bounded(5).with_delay(Duration::from_secs(5)),
        &log,
    );
    client.connection().await.unwrap();
    broker.set_down(true);
    broker.kill_connections("broker restart");

    let (op, _) = channel_error_op("PUBLISHER");
    let err = client.run(op).await.unwrap_err();
    assert!(err.is_recovery_exhausted());

    tokio::time::sleep(Duration::from_secs(60)).await;
    // Initial connect, the caller's own connect, then one episode.
    assert_eq!(broker.attempts(), 7);
    assert_eq!(log.count("reconnect_attempt"), 5);
    assert_eq!(log.count("recovery_exhausted"), 1);
    assert_eq!(client.state().exhaustions(), 1);
}

#[tokio::test(start_paused = true)]
async fn caller_after_exhaustion_starts_new_episode() {
    let broker = MemoryBroker::new();
    let log = EventLog::new();
    let client = client(
        &broker,
        RetryPolicy::bounded(2).with_delay(Duration::from_secs(5)),
        &log,
    );
    client.connection().await.unwrap();
    broker.set_down(true);
    broker.kill_connections("broker restart");
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(log.count("recovery_exhausted"), 1);

    broker.set_down(false);
    let (op, runs) = counting_op("PUBLISHER");
    assert_eq!(client.run(op).await.unwrap(), RunOutcome::Completed);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(client.state().state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn unbounded_policy_outlasts_outage() {
    let broker = MemoryBroker::new();
    let log = EventLog::new();
    let client = client(
        &broker,
        RetryPolicy::unbounded().with_delay(Duration::from_secs(5)),
        &log,
    );
    client.connection().await.unwrap();
    broker.kill_connections("broker restart");
    broker.fail_next(20);

    tokio::time::sleep(Duration::from_secs(5 * 21 + 1)).await;

    assert_eq!(client.state().state(), ConnectionState::Connected);
    assert_eq!(client.state().recoveries(), 1);
    assert_eq!(broker.attempts(), 22);
    assert_eq!(log.count("recovered"), 1);
}

#[tokio::test(start_paused = true)]
async fn remote_shutdown_is_recovered_without_any_caller() {
    let broker = MemoryBroker::new();
    let log = EventLog::new();
    let client = client(
        &broker,
        RetryPolicy::bounded(3).with_delay(Duration::from_secs(1)),
        &log,
    );
    client.connection().await.unwrap();

    broker.kill_connections("CONNECTION_FORCED - broker forced connection closure");
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(client.is_connected().await);
    assert_eq!(client.state().generation(), 2);
    assert_eq!(broker.open_count(), 1);
    assert_eq!(log.count("remote_shutdown"), 1);

    let reasons: Vec<String> = log
        .events()
        .into_iter()
        .filter_map(|event| match event {
            ClientEvent::RemoteShutdown { reason, .. } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(
        reasons,
        ["CONNECTION_FORCED - broker forced connection closure"]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_operation_reruns_after_recovery() {
    let broker = MemoryBroker::new();
    let log = EventLog::new();
    let client = client(
        &broker,
        RetryPolicy::bounded(3).with_delay(Duration::from_secs(1)),
        &log,
    );

    let (op, runs) = flaky_op("PUBLISHER", 2);
    assert_eq!(client.run(op).await.unwrap(), RunOutcome::Completed);

    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(client.state().recoveries(), 2);
    assert_eq!(log.count("operation_failed"), 2);
    assert_eq!(broker.max_open(), 1);
}

#[tokio::test(start_paused = true)]
async fn exponential_backoff_delays_grow() {
    let broker = MemoryBroker::new();
    let delays = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&delays);
    let client = ResilientClient::new(
        broker.connector(),
        settings(&["localhost"]),
        ClientConfig::builder()
            .policy(
                RetryPolicy::bounded(4)
                    .with_exponential_backoff(Duration::from_millis(100), Duration::from_secs(10)),
            )
            .on_reconnect_attempt(move |_, delay| recorded.lock().unwrap().push(delay))
            .build(),
    );
    broker.set_down(true);

    let (op, _) = counting_op("PUBLISHER");
    assert!(client.run(op).await.unwrap_err().is_recovery_exhausted());

    assert_eq!(
        *delays.lock().unwrap(),
        [
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
            Duration::from_millis(800),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn fail_fast_failure_triggers_no_recovery() {
    let broker = MemoryBroker::new();
    let log = EventLog::new();
    let client = client(&broker, RetryPolicy::bounded(5), &log);

    let (op, runs) = channel_error_op("PUBLISHER");
    let outcome = client
        .run_with(op, RunOptions::new().fail_fast(true))
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Abandoned);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(broker.attempts(), 1);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(broker.attempts(), 1);
    assert_eq!(log.count("reconnect_attempt"), 0);
    assert_eq!(log.count("operation_failed"), 1);
}

#[tokio::test]
async fn application_failure_is_returned_as_is() {
    let broker = MemoryBroker::new();
    let log = EventLog::new();
    let client = client(&broker, RetryPolicy::bounded(5), &log);

    let op = broker_resilience::operation_fn("DECLARE-QUEUE", |_conn| async {
        Err::<(), _>(broker_resilience::OperationError::application(
            "PRECONDITION_FAILED - inequivalent arg 'durable'",
        ))
    });
    let err = client.run(op).await.unwrap_err();

    assert!(matches!(err, ClientError::Application { ref operation_id, .. } if operation_id == "DECLARE-QUEUE"));
    assert_eq!(log.count("reconnect_attempt"), 0);
    assert!(client.is_connected().await);
}
