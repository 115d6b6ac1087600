//! Reactive Context
//!
//! The tracker knows which computation is currently running. This enables
//! automatic dependency tracking: when a signal or memo is read, the current
//! computation is registered as a dependent.
//!
//! # Implementation
//!
//! Each runtime owns one [`Tracker`], shared by every scope descended from
//! it. It holds:
//!
//! - a stack of listeners. Entering a computation pushes it, leaving pops it.
//!   An untracked block pushes `None`, so nesting restores each previous
//!   state exactly.
//! - the set of nodes currently evaluating, used to report cycles.
//! - the batch depth and the pending set of computations to notify when the
//!   outermost batch closes.
//!
//! All of it sits behind one short-lived lock that is never held while user
//! code or a notification runs.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;

use super::node::{Listener, Listeners, NodeId, Subscribable};
use crate::error::{Error, Result};

/// Shared tracking and batching state for one runtime.
pub(crate) struct Tracker {
    label: String,
    detect_cycles: bool,
    state: Mutex<TrackerState>,
}

#[derive(Default)]
struct TrackerState {
    listeners: Vec<Option<Listener>>,
    evaluating: IndexSet<NodeId>,
    batch_depth: usize,
    pending: IndexMap<NodeId, Listener>,
}

impl Tracker {
    pub(crate) fn new(label: impl Into<String>, detect_cycles: bool) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            detect_cycles,
            state: Mutex::new(TrackerState::default()),
        })
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    /// The computation that should capture reads right now, if any.
    pub(crate) fn listener(&self) -> Option<Listener> {
        self.state.lock().listeners.last().cloned().flatten()
    }

    /// Push `listener` for the lifetime of the returned guard.
    pub(crate) fn enter(&self, listener: Option<Listener>) -> ListenerGuard<'_> {
        self.state.lock().listeners.push(listener);
        ListenerGuard { tracker: self }
    }

    /// Run `f` with dependency capture switched off.
    pub(crate) fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter(None);
        f()
    }

    /// Fail with a cycle error if `id` is mid-evaluation.
    pub(crate) fn check_reentry(&self, id: NodeId) -> Result<()> {
        if !self.detect_cycles {
            return Ok(());
        }
        let state = self.state.lock();
        match state.evaluating.get_index_of(&id) {
            Some(start) => Err(Error::Cycle {
                node: id,
                path: state.evaluating.iter().skip(start).copied().collect(),
            }),
            None => Ok(()),
        }
    }

    /// Mark `listener` as evaluating and make it the current listener.
    pub(crate) fn begin(&self, listener: Listener) -> Result<EvaluationGuard<'_>> {
        let id = listener.id();
        self.check_reentry(id)?;
        {
            let mut state = self.state.lock();
            state.evaluating.insert(id);
            state.listeners.push(Some(listener));
        }
        Ok(EvaluationGuard { tracker: self, id })
    }

    /// Register a bidirectional edge between `source` and the current listener.
    pub(crate) fn track(&self, source: Arc<dyn Subscribable>) {
        let Some(listener) = self.listener() else {
            return;
        };
        source.subscribe(listener.clone());
        listener.add_source(source);
    }

    pub(crate) fn is_batching(&self) -> bool {
        self.state.lock().batch_depth > 0
    }

    pub(crate) fn open_batch(&self) {
        let mut state = self.state.lock();
        state.batch_depth += 1;
        tracing::trace!(runtime = %self.label, depth = state.batch_depth, "batch opened");
    }

    /// Close one batch level. The outermost close flushes the pending set.
    ///
    /// The flush runs in two phases. While the batch is still open, pending
    /// memos are notified repeatedly, so dirtiness spreads through every
    /// derived path and the computations it reaches collect in the pending
    /// set. Then the batch closes and the remaining effects are notified
    /// once each, by which point every memo they read is already dirty.
    pub(crate) fn close_batch(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.batch_depth > 1 {
                state.batch_depth -= 1;
                return Ok(());
            }
            if state.batch_depth == 0 {
                return Ok(());
            }
        }

        let mut first = None;
        loop {
            let derived: Listeners = {
                let mut state = self.state.lock();
                let pending = std::mem::take(&mut state.pending);
                let (derived, rest): (IndexMap<_, _>, IndexMap<_, _>) = pending
                    .into_iter()
                    .partition(|(_, listener)| matches!(listener, Listener::Derived { .. }));
                state.pending = rest;
                derived.into_values().collect()
            };
            if derived.is_empty() {
                break;
            }
            if let Err(err) = notify_all(derived) {
                first.get_or_insert(err);
            }
        }

        let effects: Listeners = {
            let mut state = self.state.lock();
            state.batch_depth = 0;
            std::mem::take(&mut state.pending).into_values().collect()
        };
        tracing::trace!(runtime = %self.label, pending = effects.len(), "batch flushing");
        if let Err(err) = notify_all(effects) {
            first.get_or_insert(err);
        }
        first.map_or(Ok(()), Err)
    }

    /// Deliver a write's fan-out: defer it into the pending set while a batch
    /// is open, otherwise notify every listener now.
    pub(crate) fn dispatch(&self, listeners: Listeners) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.batch_depth > 0 {
                for listener in listeners {
                    state.pending.insert(listener.id(), listener);
                }
                return Ok(());
            }
        }
        notify_all(listeners)
    }
}

/// Notify each listener in turn.
///
/// A failure does not stop the rest of the fan-out; the first error is
/// returned.
pub(crate) fn notify_all(listeners: impl IntoIterator<Item = Listener>) -> Result<()> {
    let mut first = None;
    for listener in listeners {
        if let Err(err) = listener.notify() {
            tracing::debug!(node = %listener.id(), error = %err, "computation failed during propagation");
            first.get_or_insert(err);
        }
    }
    first.map_or(Ok(()), Err)
}

/// Pops the listener pushed by [`Tracker::enter`] when dropped.
pub(crate) struct ListenerGuard<'a> {
    tracker: &'a Tracker,
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        self.tracker.state.lock().listeners.pop();
    }
}

/// Ends an evaluation started by [`Tracker::begin`] when dropped, including
/// when the computation unwinds.
pub(crate) struct EvaluationGuard<'a> {
    tracker: &'a Tracker,
    id: NodeId,
}

impl Drop for EvaluationGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.tracker.state.lock();
        let popped = state.listeners.pop().flatten();

        // Verify we're popping the right context.
        debug_assert_eq!(
            popped.as_ref().map(Listener::id),
            Some(self.id),
            "listener stack mismatch"
        );

        state.evaluating.shift_remove(&self.id);
    }
}
