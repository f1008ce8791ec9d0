//! Operations: units of work executed against a broker connection.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use broker_resilience_core::OperationError;

/// A unit of work run against the shared broker connection.
///
/// `operation_id` is only used in logs and events; two operations with the
/// same id are still distinct. Durable registration is keyed by the identity of
/// the `Arc` holding the operation.
///
/// Return [`OperationError::Transport`] when the connection is the problem (it
/// triggers recovery) and [`OperationError::Application`] otherwise.
///
/// Durable operations are replayed while recovery still holds the connection,
/// so an operation must not call back into its own client.
pub trait Operation<C>: Send + Sync + 'static {
    /// Diagnostic identifier.
    fn operation_id(&self) -> &str;

    /// Runs the operation on `connection`.
    fn execute(&self, connection: Arc<C>) -> BoxFuture<'_, Result<(), OperationError>>;
}

/// Shared handle to an operation, as accepted by the client.
pub type OperationRef<C> = Arc<dyn Operation<C>>;

/// Operation built from a closure. See [`operation_fn`].
pub struct FnOperation<F> {
    id: String,
    f: F,
}

impl<F> fmt::Debug for FnOperation<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnOperation").field("id", &self.id).finish()
    }
}

impl<C, F, Fut> Operation<C> for FnOperation<F>
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), OperationError>> + Send + 'static,
{
    fn operation_id(&self) -> &str {
        &self.id
    }

    fn execute(&self, connection: Arc<C>) -> BoxFuture<'_, Result<(), OperationError>> {
        Box::pin((self.f)(connection))
    }
}

/// Wraps a closure as a shareable operation.
///
/// ```
/// use broker_resilience::{operation_fn, OperationRef};
/// use std::sync::Arc;
///
/// struct Conn;
///
/// let consumer: OperationRef<Conn> = operation_fn("CONSUMER-ORDERS", |_conn: Arc<Conn>| async {
///     // declare the consumer on a fresh channel
///     Ok(())
/// });
/// assert_eq!(consumer.operation_id(), "CONSUMER-ORDERS");
/// ```
pub fn operation_fn<C, F, Fut>(id: impl Into<String>, f: F) -> OperationRef<C>
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), OperationError>> + Send + 'static,
{
    Arc::new(FnOperation { id: id.into(), f })
}

/// Identity of an operation handle, ignoring the vtable.
pub(crate) fn same_operation<C>(a: &OperationRef<C>, b: &OperationRef<C>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// How [`ResilientClient::run_with`](crate::ResilientClient::run_with) treats an operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub(crate) durable: bool,
    pub(crate) fail_fast: bool,
}

impl RunOptions {
    /// Neither durable nor fail-fast.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the operation for replay after every recovery.
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Skips recovery if the operation hits a transport failure.
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Whether the operation is durable.
    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Whether the operation is fail-fast.
    pub fn is_fail_fast(&self) -> bool {
        self.fail_fast
    }
}

/// How a `run` call ended when it did not return an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The operation executed successfully, possibly after recovery.
    Completed,
    /// The operation hit a transport failure and was handed to the background
    /// recovery worker, which re-runs it once the connection is back.
    Recovering,
    /// The operation hit a transport failure and was fail-fast; it was dropped.
    Abandoned,
}
