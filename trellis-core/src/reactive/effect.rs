//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. Every notification re-runs it. There is no dirty flag and no equality
//!    check: an effect is always stale once notified.
//!
//! 3. Before re-running, the effect tears down its previous run: it detaches
//!    from every source and runs the cleanups registered during that run (see
//!    [`Scope::on_cleanup`]). The new run then records a fresh source set.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not.
//! - Memos are lazy (compute on access); effects are eager (run when deps change).
//! - Memos cache results; effects just run their side effect.
//!
//! # Stopping
//!
//! [`Effect::stop`] tears down the current run and makes the effect inert.
//! Effects are stopped automatically when the scope (or computation) that
//! created them is disposed.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use super::computation::Tracked;
use super::context::Tracker;
use super::node::{Cleanup, Computation, Listener, NodeId, Subscribable};
use super::Scope;
use crate::error::{self, Result};

pub(crate) struct EffectNode {
    id: NodeId,
    this: Weak<EffectNode>,
    run: Box<dyn Fn() + Send + Sync>,
    tracked: Tracked,
    stopped: AtomicBool,
    run_count: AtomicUsize,
    tracker: Arc<Tracker>,
}

impl EffectNode {
    fn listener(&self) -> Listener {
        Listener::Effect {
            id: self.id,
            node: self.this.clone(),
        }
    }

    fn execute(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(());
        }

        let _eval = self.tracker.begin(self.listener())?;
        self.tracked.cleanup(&self.tracker, self.id);

        let result = error::catch(|| (self.run)());
        self.run_count.fetch_add(1, Ordering::SeqCst);

        // Stopped from inside its own run: drop whatever the run re-subscribed.
        if self.stopped.load(Ordering::SeqCst) {
            self.tracked.cleanup(&self.tracker, self.id);
        }
        result
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(effect = %self.id, "effect stopped");
        self.tracked.cleanup(&self.tracker, self.id);
    }
}

impl Computation for EffectNode {
    fn notify(&self) -> Result<()> {
        tracing::trace!(effect = %self.id, "effect notified");
        self.execute()
    }

    fn add_source(&self, source: Arc<dyn Subscribable>) {
        self.tracked.add_source(source);
    }

    fn adopt_cleanup(&self, cleanup: Cleanup) {
        self.tracked.add_cleanup(cleanup);
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// The value returned by [`Effect::new`] is the effect's stop handle.
/// Dropping it does not stop the effect; the owning scope keeps it running
/// until the scope is disposed or [`stop`](Self::stop) is called.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(&scope, 0);
///
/// let effect = Effect::new(&scope, {
///     let count = count.clone();
///     move || println!("Count is: {}", count.get())
/// })?;
///
/// count.set(5)?;  // Prints: "Count is: 5"
/// effect.stop();
/// ```
#[derive(Clone)]
pub struct Effect {
    node: Arc<EffectNode>,
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies. If
    /// that first run fails, the effect is stopped and the error returned.
    pub fn new<F>(scope: &Scope, run: F) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let tracker = Arc::clone(scope.tracker());
        let node = Arc::new_cyclic(|this| EffectNode {
            id: NodeId::new(),
            this: this.clone(),
            run: Box::new(run),
            tracked: Tracked::default(),
            stopped: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
            tracker,
        });
        let effect = Self { node };

        let handle = effect.clone();
        scope.on_cleanup(move || handle.stop());

        if let Err(err) = effect.node.execute() {
            effect.stop();
            return Err(err);
        }
        Ok(effect)
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> NodeId {
        self.node.id
    }

    /// Stop the effect.
    ///
    /// Detaches it from every source, runs its pending cleanups, and makes
    /// every later notification a no-op. Calling it again does nothing.
    pub fn stop(&self) {
        self.node.stop();
    }

    /// Check if the effect has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.node.stopped.load(Ordering::SeqCst)
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.node.run_count.load(Ordering::SeqCst)
    }

    /// Get the number of sources read by the last run.
    pub fn source_count(&self) -> usize {
        self.node.tracked.source_count()
    }
}

impl PartialEq for Effect {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

impl Eq for Effect {}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.node.id)
            .field("run_count", &self.run_count())
            .field("source_count", &self.source_count())
            .field("stopped", &self.is_stopped())
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
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn effect_runs_on_creation() {
        let runtime = Runtime::new();
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let effect = Effect::new(&runtime.root_scope(), move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_reruns_on_dependency_change() {
        let runtime = Runtime::new();
        let scope = runtime.root_scope();
        let count = Signal::new(&scope, 0);
        let seen = Arc::new(AtomicI32::new(-1));

        let effect = Effect::new(&scope, {
            let count = count.clone();
            let seen = seen.clone();
            move || seen.store(count.get(), Ordering::SeqCst)
        })
        .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 0);
        count.set(42).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 42);
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn effect_does_not_run_after_stop() {
        let runtime = Runtime::new();
        let scope = runtime.root_scope();
        let count = Signal::new(&scope, 0);

        let effect = Effect::new(&scope, {
            let count = count.clone();
            move || {
                count.get();
            }
        })
        .unwrap();

        effect.stop();
        assert!(effect.is_stopped());
        assert_eq!(count.subscriber_count(), 0);

        count.set(1).unwrap();
        assert_eq!(effect.run_count(), 1);

        // Notifications still in flight are no-ops.
        effect.node.notify().unwrap();
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn cleanup_runs_before_each_rerun() {
        let runtime = Runtime::new();
        let scope = runtime.root_scope();
        let count = Signal::new(&scope, 0);
        let log = Arc::new(Mutex::new(Vec::new()));

        let _effect = Effect::new(&scope, {
            let count = count.clone();
            let log = log.clone();
            let scope = scope.clone();
            move || {
                let value = count.get();
                log.lock().push(format!("run {value}"));
                let log = log.clone();
                scope.on_cleanup(move || log.lock().push(format!("cleanup {value}")));
            }
        })
        .unwrap();

        count.set(1).unwrap();
        count.set(2).unwrap();

        assert_eq!(
            *log.lock(),
            vec!["run 0", "cleanup 0", "run 1", "cleanup 1", "run 2"]
        );
    }

    #[test]
    fn conditional_dependencies_are_replaced() {
        let runtime = Runtime::new();
        let scope = runtime.root_scope();
        let use_a = Signal::new(&scope, true);
        let a = Signal::new(&scope, 1);
        let b = Signal::new(&scope, 2);

        let effect = Effect::new(&scope, {
            let (use_a, a, b) = (use_a.clone(), a.clone(), b.clone());
            move || {
                if use_a.get() {
                    a.get();
                } else {
                    b.get();
                }
            }
        })
        .unwrap();

        assert_eq!(a.subscriber_count(), 1);
        assert_eq!(b.subscriber_count(), 0);

        use_a.set(false).unwrap();
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 1);
        assert_eq!(effect.source_count(), 2);

        a.set(10).unwrap();
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn self_write_reports_cycle() {
        let runtime = Runtime::new();
        let scope = runtime.root_scope();
        let count = Signal::new(&scope, 0);
        let failure = Arc::new(Mutex::new(None));

        let effect = Effect::new(&scope, {
            let count = count.clone();
            let failure = failure.clone();
            move || {
                let value = count.get();
                if let Err(err) = count.set(value + 1) {
                    *failure.lock() = Some(err);
                }
            }
        })
        .unwrap();

        assert!(matches!(
            *failure.lock(),
            Some(Error::Cycle { node, .. }) if node == effect.id()
        ));
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_clone_shares_state() {
        let runtime = Runtime::new();
        let effect1 = Effect::new(&runtime.root_scope(), || {}).unwrap();
        let effect2 = effect1.clone();

        assert_eq!(effect1, effect2);
        assert_eq!(effect1.id(), effect2.id());

        effect1.stop();
        assert!(effect2.is_stopped());
    }
}
