//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read while a memo or effect is evaluating, the signal
//!    registers that computation as a subscriber and the computation records
//!    the signal as one of its sources.
//!
//! 2. Every write is a change: there is no equality check. Writing bumps the
//!    signal's version and hands the current subscribers to the runtime,
//!    which notifies them immediately or, inside a batch, once at the end.
//!
//! 3. Subscribers detach themselves before they re-run, so the subscriber
//!    set only ever holds computations whose latest run read this signal.
//!
//! # Thread Safety
//!
//! The value sits behind a `RwLock` and the subscriber set behind a `Mutex`,
//! so a signal may be moved and shared across threads. Dependency tracking
//! itself assumes a single evaluator; see
//! [`Runtime::dispatcher`](super::Runtime::dispatcher) for submitting writes
//! from other threads.

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::Tracker;
use super::node::{Listener, NodeId, Subscribable, SubscriberSet};
use super::Scope;
use crate::error::Result;

struct SignalInner<T> {
    id: NodeId,
    value: RwLock<T>,
    version: AtomicU64,
    subscribers: SubscriberSet,
    tracker: Arc<Tracker>,
}

impl<T: Send + Sync + 'static> Subscribable for SignalInner<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn subscribe(&self, listener: Listener) {
        self.subscribers.insert(listener);
    }

    fn unsubscribe(&self, id: NodeId) {
        self.subscribers.remove(id);
    }

    fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

/// A reactive signal holding a value of type T.
///
/// Cloning a signal creates another handle to the same value.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(&scope, 0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (notifies subscribers)
/// count.set(5)?;
/// ```
pub struct Signal<T>
where
    T: Send + Sync + 'static,
{
    inner: Arc<SignalInner<T>>,
}

impl<T> Signal<T>
where
    T: Send + Sync + 'static,
{
    /// Create a new signal with the given initial value.
    pub fn new(scope: &Scope, value: T) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                id: NodeId::new(),
                value: RwLock::new(value),
                version: AtomicU64::new(0),
                subscribers: SubscriberSet::default(),
                tracker: Arc::clone(scope.tracker()),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    fn track(&self) {
        self.inner
            .tracker
            .track(Arc::clone(&self.inner) as Arc<dyn Subscribable>);
    }

    /// Borrow the current value.
    ///
    /// Registers a dependency exactly like [`get`](Self::get). `f` runs under
    /// the value's read lock and must not write this signal, directly or
    /// through a write that re-runs a dependent. Return what the write needs
    /// and write after `with` returns.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.inner.value.read())
    }

    /// Set a new value and notify subscribers.
    ///
    /// Returns the first error raised by a notified computation.
    pub fn set(&self, value: T) -> Result<()> {
        *self.inner.value.write() = value;
        self.publish()
    }

    /// Modify the value in place and notify subscribers.
    ///
    /// `f` runs under the value's write lock and must not read this signal.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut T),
    {
        f(&mut self.inner.value.write());
        self.publish()
    }

    fn publish(&self) -> Result<()> {
        self.inner.version.fetch_add(1, Ordering::SeqCst);
        let subscribers = self.inner.subscribers.snapshot();
        if subscribers.is_empty() {
            return Ok(());
        }
        tracing::trace!(signal = %self.inner.id, subscribers = subscribers.len(), "signal changed");
        self.inner.tracker.dispatch(subscribers)
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Get the current value.
    ///
    /// If called while a memo or effect is evaluating, this also registers
    /// that computation as a subscriber.
    pub fn get(&self) -> T {
        self.track();
        self.inner.value.read().clone()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }
}

impl<T> Clone for Signal<T>
where
    T: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.read())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
