//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when it is read
//! after one of its dependencies changed.
//!
//! # How Memos Work
//!
//! 1. A memo starts dirty and computes nothing until first read.
//!
//! 2. Reading a dirty memo detaches it from its previous sources, runs the
//!    computation as the current listener (so every read inside it becomes a
//!    fresh edge), caches the result and marks the memo clean.
//!
//! 3. When a source notifies it, a clean memo becomes dirty and passes the
//!    notification on to its own subscribers, right away or, while a batch
//!    is flushing, through the batch's pending set. A memo that is already
//!    dirty swallows the notification: that is what keeps a diamond from
//!    fanning out twice downstream.
//!
//! 4. Recomputation happens only on demand, at the next read.
//!
//! # Equality
//!
//! With a comparator (see [`MemoOptions`]) a recompute that produces an equal
//! value leaves the memo's version unchanged. A downstream memo that was
//! dirtied through it checks its sources' versions before recomputing and,
//! finding none changed, just marks itself clean. The shortcut is never taken
//! after a failed compute or a detach, since the recorded sources then no
//! longer describe the cached value. Effects still re-run on every
//! notification they receive.

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::computation::Tracked;
use super::context::Tracker;
use super::node::{Cleanup, Computation, Listener, NodeId, Subscribable, SubscriberSet};
use super::Scope;
use crate::error::{self, Result};

/// Dirty state for a memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency changed since the last computation, or the memo has
    /// never been computed.
    Dirty,
}

type Equals<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Options for [`Memo::with_options`].
pub struct MemoOptions<T> {
    equals: Option<Equals<T>>,
}

impl<T> MemoOptions<T> {
    /// Options with no comparator: every recompute counts as a change.
    pub fn new() -> Self {
        Self { equals: None }
    }

    /// Treat a recomputed value as unchanged when `equals(old, new)` holds.
    pub fn equals<F>(mut self, equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        self.equals = Some(Arc::new(equals));
        self
    }
}

impl<T: PartialEq> MemoOptions<T> {
    /// Compare recomputed values with `PartialEq`.
    pub fn partial_eq() -> Self {
        Self::new().equals(|a: &T, b: &T| a == b)
    }
}

impl<T> Default for MemoOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoInner<T> {
    id: NodeId,
    this: Weak<MemoInner<T>>,
    compute: Box<dyn Fn() -> T + Send + Sync>,
    equals: Option<Equals<T>>,
    value: RwLock<Option<T>>,
    dirty: AtomicBool,
    /// Set when the recorded sources no longer explain the cached value: the
    /// last compute failed partway, or the memo was detached.
    stale_sources: AtomicBool,
    version: AtomicU64,
    tracked: Tracked,
    subscribers: SubscriberSet,
    tracker: Arc<Tracker>,
}

impl<T> MemoInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn listener(&self) -> Listener {
        Listener::Derived {
            id: self.id,
            node: self.this.clone(),
        }
    }

    /// Return the current value, recomputing first if it may be stale.
    fn evaluate(&self) -> Result<T> {
        self.tracker.check_reentry(self.id)?;

        if self.dirty.load(Ordering::SeqCst) {
            let must_recompute =
                self.value.read().is_none() || self.stale_sources.load(Ordering::SeqCst);
            if must_recompute || !self.tracked.sources_unchanged()? {
                return self.recompute();
            }
            tracing::trace!(memo = %self.id, "sources unchanged, skipping recompute");
            self.dirty.store(false, Ordering::SeqCst);
        }

        match &*self.value.read() {
            Some(value) => Ok(value.clone()),
            None => self.recompute(),
        }
    }

    fn recompute(&self) -> Result<T> {
        let _eval = self.tracker.begin(self.listener())?;
        self.tracked.cleanup(&self.tracker, self.id);
        tracing::trace!(memo = %self.id, "recomputing");

        // Cleared up front so a notification arriving mid-compute is kept.
        self.dirty.store(false, Ordering::SeqCst);
        let restore = RedirtyOnUnwind {
            dirty: &self.dirty,
            stale_sources: &self.stale_sources,
        };
        let next = (self.compute)();
        std::mem::forget(restore);
        self.stale_sources.store(false, Ordering::SeqCst);

        let changed = {
            let mut slot = self.value.write();
            let changed = match (slot.as_ref(), &self.equals) {
                (Some(prev), Some(equals)) => !equals(prev, &next),
                _ => true,
            };
            *slot = Some(next.clone());
            changed
        };
        if changed {
            self.version.fetch_add(1, Ordering::SeqCst);
        }

        Ok(next)
    }
}

/// Marks a memo dirty again if its computation unwinds, and forces the next
/// read to recompute rather than trust the partial source set.
struct RedirtyOnUnwind<'a> {
    dirty: &'a AtomicBool,
    stale_sources: &'a AtomicBool,
}

impl Drop for RedirtyOnUnwind<'_> {
    fn drop(&mut self) {
        self.stale_sources.store(true, Ordering::SeqCst);
        self.dirty.store(true, Ordering::SeqCst);
    }
}

impl<T> Subscribable for MemoInner<T>
where
    T: Clone + Send + Sync + 'static,
{
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
        error::catch(|| self.evaluate())?.map(drop)
    }
}

impl<T> Computation for MemoInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn notify(&self) -> Result<()> {
        if self.dirty.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::trace!(memo = %self.id, "marked dirty");
        self.tracker.dispatch(self.subscribers.snapshot())
    }

    fn add_source(&self, source: Arc<dyn Subscribable>) {
        self.tracked.add_source(source);
    }

    fn adopt_cleanup(&self, cleanup: Cleanup) {
        self.tracked.add_cleanup(cleanup);
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// Cloning a memo creates another handle to the same cached value.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(&scope, 2);
/// let doubled = Memo::new(&scope, {
///     let count = count.clone();
///     move || count.get() * 2
/// });
///
/// assert_eq!(doubled.get(), 4);
/// ```
pub struct Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<MemoInner<T>>,
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new memo with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(scope: &Scope, compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_options(scope, compute, MemoOptions::new())
    }

    /// Create a new memo with an equality comparator or other options.
    pub fn with_options<F>(scope: &Scope, compute: F, options: MemoOptions<T>) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let inner = Arc::new_cyclic(|this| MemoInner {
            id: NodeId::new(),
            this: this.clone(),
            compute: Box::new(compute),
            equals: options.equals,
            value: RwLock::new(None),
            dirty: AtomicBool::new(true),
            stale_sources: AtomicBool::new(false),
            version: AtomicU64::new(0),
            tracked: Tracked::default(),
            subscribers: SubscriberSet::default(),
            tracker: Arc::clone(scope.tracker()),
        });

        // Disposal detaches the memo. The scope does not keep it alive.
        let weak = Arc::downgrade(&inner);
        scope.on_cleanup(move || {
            if let Some(inner) = weak.upgrade() {
                inner.tracked.cleanup(&inner.tracker, inner.id);
                inner.stale_sources.store(true, Ordering::SeqCst);
                inner.dirty.store(true, Ordering::SeqCst);
            }
        });

        Self { inner }
    }

    /// Get the memo's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// If called while another memo or effect is evaluating, this registers
    /// that computation as a subscriber.
    ///
    /// # Panics
    ///
    /// Unwinds with [`Error::Cycle`](crate::Error::Cycle) if the memo depends
    /// on itself. Inside a memo or effect the unwind is turned back into an
    /// error at the nearest [`try_get`](Self::try_get), effect run or batch.
    /// Use `try_get` to handle it directly.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => err.raise(),
        }
    }

    /// Get the current value, reporting cycles as errors.
    pub fn try_get(&self) -> Result<T> {
        let value = error::catch(|| self.inner.evaluate())??;

        // Tracked after evaluating so the edge records the fresh version.
        self.inner
            .tracker
            .track(Arc::clone(&self.inner) as Arc<dyn Subscribable>);
        Ok(value)
    }

    /// Get the current dirty state.
    pub fn state(&self) -> MemoState {
        if self.inner.dirty.load(Ordering::SeqCst) {
            MemoState::Dirty
        } else {
            MemoState::Clean
        }
    }

    /// Number of times the memo's value has changed.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    /// Get the number of dependents.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Get the number of sources read by the last computation.
    pub fn source_count(&self) -> usize {
        self.inner.tracked.source_count()
    }

    /// Check if the memo has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }
}

impl<T> Clone for Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("value", &*self.inner.value.read())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Runtime, Signal};
    use crate::Error;
    use std::sync::atomic::AtomicI32;

    fn counter() -> (Arc<AtomicI32>, Arc<AtomicI32>) {
        let count = Arc::new(AtomicI32::new(0));
        (count.clone(), count)
    }

    #[test]
    fn memo_computes_on_first_access() {
        let runtime = Runtime::new();
        let (calls, calls_clone) = counter();

        let memo = Memo::new(&runtime.root_scope(), move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        // Not computed yet
        assert!(!memo.has_value());
        assert_eq!(memo.state(), MemoState::Dirty);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // First access triggers computation
        assert_eq!(memo.get(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(memo.state(), MemoState::Clean);
    }

    #[test]
    fn memo_caches_value_when_clean() {
        let runtime = Runtime::new();
        let (calls, calls_clone) = counter();

        let memo = Memo::new(&runtime.root_scope(), move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert_eq!(memo.get(), 42);
        assert_eq!(memo.get(), 42);
        assert_eq!(memo.get(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn memo_is_dirtied_by_source_write() {
        let runtime = Runtime::new();
        let scope = runtime.root_scope();
        let count = Signal::new(&scope, 10);
        let (calls, calls_clone) = counter();

        let memo = Memo::new(&scope, {
            let count = count.clone();
            move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                count.get() * 2
            }
        });

        assert_eq!(memo.get(), 20);
        assert_eq!(count.subscriber_count(), 1);
        assert_eq!(memo.source_count(), 1);

        count.set(30).unwrap();
        assert_eq!(memo.state(), MemoState::Dirty);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(memo.get(), 60);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(count.subscriber_count(), 1);
    }

    #[test]
    fn equal_recompute_keeps_version() {
        let runtime = Runtime::new();
        let scope = runtime.root_scope();
        let n = Signal::new(&scope, 3);

        let parity = Memo::with_options(
            &scope,
            {
                let n = n.clone();
                move || n.get() % 2
            },
            MemoOptions::partial_eq(),
        );

        assert_eq!(parity.get(), 1);
        let version = parity.version();

        n.set(5).unwrap();
        assert_eq!(parity.get(), 1);
        assert_eq!(parity.version(), version);

        n.set(6).unwrap();
        assert_eq!(parity.get(), 0);
        assert_eq!(parity.version(), version + 1);
    }

    #[test]
    fn downstream_skips_recompute_when_upstream_is_equal() {
        let runtime = Runtime::new();
        let scope = runtime.root_scope();
        let n = Signal::new(&scope, 3);
        let (label_calls, label_calls_clone) = counter();

        let parity = Memo::with_options(
            &scope,
            {
                let n = n.clone();
                move || n.get() % 2
            },
            MemoOptions::partial_eq(),
        );
        let label = Memo::new(&scope, {
            let parity = parity.clone();
            move || {
                label_calls_clone.fetch_add(1, Ordering::SeqCst);
                if parity.get() == 0 { "even" } else { "odd" }
            }
        });

        assert_eq!(label.get(), "odd");
        n.set(7).unwrap();
        assert_eq!(label.state(), MemoState::Dirty);

        assert_eq!(label.get(), "odd");
        assert_eq!(label_calls.load(Ordering::SeqCst), 1);
        assert_eq!(label.state(), MemoState::Clean);
    }

    #[test]
    fn panicking_compute_stays_dirty() {
        let runtime = Runtime::new();
        let scope = runtime.root_scope();
        let fail = Signal::new(&scope, true);

        let memo = Memo::new(&scope, {
            let fail = fail.clone();
            move || {
                if fail.get() {
                    panic!("compute failed");
                }
                1
            }
        });

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| memo.get()));
        assert!(outcome.is_err());
        assert_eq!(memo.state(), MemoState::Dirty);
        assert_eq!(fail.subscriber_count(), 1);

        fail.set(false).unwrap();
        assert_eq!(memo.get(), 1);
    }

    #[test]
    fn self_reading_memo_reports_cycle() {
        let runtime = Runtime::new();
        let slot: Arc<std::sync::OnceLock<Memo<i32>>> = Arc::new(std::sync::OnceLock::new());

        let memo = Memo::new(&runtime.root_scope(), {
            let slot = slot.clone();
            move || slot.get().map_or(0, |m| m.get()) + 1
        });
        let _ = slot.set(memo.clone());

        match memo.try_get() {
            Err(Error::Cycle { node, .. }) => assert_eq!(node, memo.id()),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn memo_clone_shares_state() {
        let runtime = Runtime::new();
        let memo1 = Memo::new(&runtime.root_scope(), || 42);
        assert_eq!(memo1.get(), 42);

        let memo2 = memo1.clone();
        assert_eq!(memo1.id(), memo2.id());
        assert!(memo2.has_value());
        assert_eq!(memo2.get(), 42);
    }

    #[test]
    fn disposal_detaches_memo() {
        let runtime = Runtime::new();
        let scope = runtime.root_scope().child();
        let count = Signal::new(&scope, 1);
        let memo = Memo::new(&scope, {
            let count = count.clone();
            move || count.get()
        });

        assert_eq!(memo.get(), 1);
        assert_eq!(count.subscriber_count(), 1);

        scope.dispose();
        assert_eq!(count.subscriber_count(), 0);
        assert_eq!(memo.state(), MemoState::Dirty);

        // No recorded sources left to compare: the next read recomputes.
        count.set(5).unwrap();
        assert_eq!(memo.get(), 5);
    }

    #[test]
    fn failed_recompute_is_retried_on_next_read() {
        let runtime = Runtime::new();
        let scope = runtime.root_scope();
        let a = Signal::new(&scope, 1);
        let b = Signal::new(&scope, 1);
        let (calls, calls_clone) = counter();

        let sum = Memo::new(&scope, {
            let (a, b) = (a.clone(), b.clone());
            move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                let total = a.get() + b.get();
                if b.get_untracked() > 5 {
                    panic!("b out of range");
                }
                total
            }
        });

        assert_eq!(sum.get(), 2);
        b.set(10).unwrap();

        let first = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sum.get()));
        assert!(first.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(sum.state(), MemoState::Dirty);

        // Both sources were read before the panic and are unchanged since,
        // yet the cached 2 must not be served.
        let second = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sum.get()));
        assert!(second.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sum.state(), MemoState::Dirty);

        b.set(3).unwrap();
        assert_eq!(sum.get(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(sum.state(), MemoState::Clean);
    }
}
