//! Scopes
//!
//! A scope is a lifetime boundary. Nodes created against a scope register
//! their teardown with it, and disposing the scope runs every registered
//! cleanup in reverse order, so resources registered later (usually nested
//! inside earlier ones) go first.
//!
//! Scopes also own write coalescing: see [`Scope::batch`].

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::context::Tracker;
use super::node::Cleanup;
use crate::error::{Error, Result};

struct ScopeInner {
    live: AtomicBool,
    cleanups: Mutex<Vec<Cleanup>>,
    tracker: Arc<Tracker>,
}

/// An ownership and lifetime boundary for reactive nodes.
///
/// Cloning a `Scope` creates another handle to the same scope.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    pub(crate) fn new(tracker: Arc<Tracker>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                live: AtomicBool::new(true),
                cleanups: Mutex::new(Vec::new()),
                tracker,
            }),
        }
    }

    pub(crate) fn tracker(&self) -> &Arc<Tracker> {
        &self.inner.tracker
    }

    /// Whether the scope has not been disposed yet.
    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Whether a batch is open on this scope's runtime.
    pub fn is_batching(&self) -> bool {
        self.inner.tracker.is_batching()
    }

    /// Create a child scope that is disposed along with this one.
    pub fn child(&self) -> Scope {
        let child = Scope::new(Arc::clone(&self.inner.tracker));
        let handle = child.clone();
        self.on_cleanup(move || handle.dispose());
        child
    }

    /// Register `f` to run at teardown.
    ///
    /// If an effect or memo is evaluating, `f` belongs to that evaluation and
    /// runs before its next run, or when it is stopped or disposed. Otherwise
    /// it runs when this scope is disposed. On a scope that is already
    /// disposed it runs immediately.
    pub fn on_cleanup<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut cleanup: Cleanup = Box::new(f);

        if let Some(listener) = self.inner.tracker.listener() {
            match listener.adopt_cleanup(cleanup) {
                None => return,
                Some(returned) => cleanup = returned,
            }
        }

        if self.is_live() {
            self.inner.cleanups.lock().push(cleanup);
        } else {
            self.inner.tracker.untracked(cleanup);
        }
    }

    /// Run `f` without registering any dependency for the reads inside it.
    ///
    /// Nest-safe: each untracked block restores whatever was tracking before.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.tracker.untracked(f)
    }

    /// Coalesce the notifications of every write made inside `f`.
    ///
    /// Each computation affected by any number of writes is notified once
    /// when the outermost batch ends. The flush happens even if `f` panics,
    /// after which the panic resumes, unless it carried an engine error
    /// (such as a cycle raised by [`Memo::get`](super::Memo::get)), which is
    /// returned instead. On a disposed scope this does nothing
    /// and `f` is not called.
    ///
    /// Returns the first error raised by a notified computation.
    pub fn batch<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(),
    {
        if !self.is_live() {
            return Ok(());
        }

        let tracker = &self.inner.tracker;
        tracker.open_batch();
        let outcome = panic::catch_unwind(AssertUnwindSafe(f));

        let flushed = tracker.close_batch();

        match outcome {
            Ok(()) => flushed,
            Err(payload) => match payload.downcast::<Error>() {
                Ok(err) => Err(*err),
                Err(payload) => panic::resume_unwind(payload),
            },
        }
    }

    /// Dispose the scope, running its cleanups in reverse registration order.
    ///
    /// Only the first call has any effect.
    pub fn dispose(&self) {
        if !self.inner.live.swap(false, Ordering::SeqCst) {
            return;
        }

        let cleanups = std::mem::take(&mut *self.inner.cleanups.lock());
        tracing::debug!(
            runtime = %self.inner.tracker.label(),
            cleanups = cleanups.len(),
            "disposing scope"
        );

        self.inner.tracker.untracked(|| {
            for cleanup in cleanups.into_iter().rev() {
                cleanup();
            }
        });
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("live", &self.is_live())
            .field("cleanup_count", &self.inner.cleanups.lock().len())
            .finish()
    }
}
