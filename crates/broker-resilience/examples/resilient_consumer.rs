//! A durable consumer that survives broker restarts.
//!
//! Run with: cargo run --example resilient_consumer -p broker-resilience
//!
//! The broker here is simulated in memory. A real integration implements
//! `Connector` and `BrokerConnection` on top of its AMQP client library.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use broker_resilience::{
    operation_fn, shutdown_channel, BrokerConnection, ClientConfig, ClientEvent,
    ConnectionSettings, Connector, ResilientClient, RetryPolicy, ShutdownListener,
    ShutdownNotifier, ShutdownSignal, TransportError,
};
use futures::future::BoxFuture;

/// Session handle to the simulated broker.
struct SimulatedConnection {
    id: u32,
    open: AtomicBool,
    notifier: ShutdownNotifier,
    listener: Mutex<Option<ShutdownListener>>,
}

impl SimulatedConnection {
    fn new(id: u32) -> Self {
        let (notifier, listener) = shutdown_channel();
        Self {
            id,
            open: AtomicBool::new(true),
            notifier,
            listener: Mutex::new(Some(listener)),
        }
    }

    fn kill(&self, reason: &str) {
        self.open.store(false, Ordering::SeqCst);
        self.notifier.notify(ShutdownSignal::remote(reason));
    }

    fn basic_consume(&self, queue: &str) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::closed("connection is closed"));
        }
        println!("  [conn {}] consuming from {queue}", self.id);
        Ok(())
    }
}

impl BrokerConnection for SimulatedConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.open.store(false, Ordering::SeqCst);
            self.notifier
                .notify(ShutdownSignal::application("closed by application"));
            Ok(())
        })
    }

    fn shutdown_listener(&self) -> ShutdownListener {
        let taken = self.listener.lock().ok().and_then(|mut slot| slot.take());
        taken.unwrap_or_else(|| self.notifier.subscribe())
    }
}

/// Connector that refuses connections while the broker is "restarting".
#[derive(Default)]
struct SimulatedBroker {
    restarting: AtomicBool,
    opened: AtomicU32,
    current: Mutex<Option<Arc<SimulatedConnection>>>,
}

struct SharedConnection(Arc<SimulatedConnection>);

impl BrokerConnection for SharedConnection {
    fn is_open(&self) -> bool {
        self.0.is_open()
    }

    fn close(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        self.0.close()
    }

    fn shutdown_listener(&self) -> ShutdownListener {
        self.0.shutdown_listener()
    }
}

impl Connector for SimulatedBroker {
    type Connection = SharedConnection;

    fn connect<'a>(
        &'a self,
        settings: &'a ConnectionSettings,
    ) -> BoxFuture<'a, Result<SharedConnection, TransportError>> {
        Box::pin(async move {
            if self.restarting.load(Ordering::SeqCst) {
                return Err(TransportError::connection_refused(format!(
                    "{} is restarting",
                    settings.addresses()[0]
                )));
            }
            let id = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
            let connection = Arc::new(SimulatedConnection::new(id));
            if let Ok(mut current) = self.current.lock() {
                *current = Some(Arc::clone(&connection));
            }
            Ok(SharedConnection(connection))
        })
    }
}

impl SimulatedBroker {
    fn restart(&self) {
        self.restarting.store(true, Ordering::SeqCst);
        if let Some(connection) = self.current.lock().ok().and_then(|c| c.clone()) {
            connection.kill("CONNECTION_FORCED - broker forced connection closure");
        }
    }

    fn finish_restart(&self) {
        self.restarting.store(false, Ordering::SeqCst);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Resilient Client - Durable Consumer Example\n");

    let broker = Arc::new(SimulatedBroker::default());
    let settings = ConnectionSettings::builder()
        .address("localhost:5672".parse()?)
        .build()?;

    let config = ClientConfig::builder()
        .name("orders")
        .policy(RetryPolicy::unbounded().with_delay(Duration::from_millis(200)))
        .on_event(|event: &ClientEvent| println!("  event: {event:?}"))
        .build();

    println!("Configuration:");
    println!("  Policy: unbounded, 200ms between attempts");
    println!("  Mode: blocking\n");

    let client = ResilientClient::new(Arc::clone(&broker), settings, config);

    let consumer = operation_fn("CONSUMER-orders", |conn: Arc<SharedConnection>| async move {
        conn.0.basic_consume("orders")?;
        Ok(())
    });
    client.run_durable(consumer).await?;

    println!("\nBroker restarting...");
    broker.restart();
    tokio::time::sleep(Duration::from_millis(700)).await;

    println!("\nBroker back online");
    broker.finish_restart();
    tokio::time::sleep(Duration::from_millis(400)).await;

    println!(
        "\nConnected: {}, recoveries: {}",
        client.is_connected().await,
        client.state().recoveries()
    );

    client.shutdown().await;
    Ok(())
}
