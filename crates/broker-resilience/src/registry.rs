//! Registry of durable operations replayed after every recovery.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::operation::{same_operation, OperationRef};

/// Insertion-ordered set of durable operations, keyed by handle identity.
///
/// Closing the registry (on shutdown) empties it and rejects later
/// registrations.
pub(crate) struct DurableRegistry<C> {
    inner: Mutex<Entries<C>>,
}

struct Entries<C> {
    operations: Vec<Entry<C>>,
    closed: bool,
}

struct Entry<C> {
    operation: OperationRef<C>,
    /// Generation of the connection it last completed on.
    last_run: Option<u64>,
}

impl<C> Entries<C> {
    fn find(&mut self, operation: &OperationRef<C>) -> Option<&mut Entry<C>> {
        self.operations
            .iter_mut()
            .find(|entry| same_operation(&entry.operation, operation))
    }
}

impl<C> DurableRegistry<C> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Entries {
                operations: Vec::new(),
                closed: false,
            }),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Entries<C>> {
        // Entries stay consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `operation`. Returns `false` if it was already registered or the
    /// registry is closed.
    pub(crate) fn register(&self, operation: &OperationRef<C>) -> bool {
        let mut entries = self.entries();
        if entries.closed || entries.find(operation).is_some() {
            return false;
        }
        entries.operations.push(Entry {
            operation: operation.clone(),
            last_run: None,
        });
        true
    }

    /// Removes `operation`. Returns `false` if it was not registered.
    pub(crate) fn deregister(&self, operation: &OperationRef<C>) -> bool {
        let mut entries = self.entries();
        let before = entries.operations.len();
        entries
            .operations
            .retain(|entry| !same_operation(&entry.operation, operation));
        entries.operations.len() != before
    }

    pub(crate) fn contains(&self, operation: &OperationRef<C>) -> bool {
        self.entries().find(operation).is_some()
    }

    /// Copy of the current members, so replay runs without holding the lock.
    pub(crate) fn snapshot(&self) -> Vec<OperationRef<C>> {
        self.entries()
            .operations
            .iter()
            .map(|entry| entry.operation.clone())
            .collect()
    }

    /// Notes that `operation` completed on the connection of `generation`.
    /// Ignored for operations that are not registered.
    pub(crate) fn record_run(&self, operation: &OperationRef<C>, generation: u64) {
        if let Some(entry) = self.entries().find(operation) {
            entry.last_run = Some(generation);
        }
    }

    /// `operation` is registered and already completed on `generation`.
    pub(crate) fn ran_on(&self, operation: &OperationRef<C>, generation: u64) -> bool {
        self.entries()
            .find(operation)
            .is_some_and(|entry| entry.last_run == Some(generation))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries().operations.len()
    }

    /// Empties the registry for good.
    pub(crate) fn close(&self) {
        let mut entries = self.entries();
        entries.closed = true;
        entries.operations.clear();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.entries().closed
    }
}

impl<C> fmt::Debug for DurableRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries();
        f.debug_struct("DurableRegistry")
            .field("len", &entries.operations.len())
            .field("closed", &entries.closed)
            .finish()
    }
}
