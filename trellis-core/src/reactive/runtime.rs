//! Reactive Runtime
//!
//! The runtime is the shared state every scope descended from it works
//! against: the listener stack used for dependency capture, the pending set
//! of a batch, and the root scope.
//!
//! # Lifecycle
//!
//! A runtime is created open by [`Runtime::start`] and closed exactly once.
//! Closing disposes the root scope, which transitively stops every effect
//! and detaches every memo registered beneath it. A second close reports
//! [`Error::Closed`].
//!
//! # Thread Safety
//!
//! Dependency tracking assumes one logical evaluator: all reads, writes and
//! computation runs happen on one thread at a time. Other threads submit
//! work through a [`Dispatcher`], and the owning thread runs it with
//! [`Runtime::drain`] or [`Runtime::run_queue`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;

use super::context::Tracker;
use super::Scope;
use crate::error::{Error, Result};

/// Configuration for [`Runtime::start`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Name attached to the runtime's log events.
    pub label: String,

    /// Report re-entrant evaluation as [`Error::Cycle`].
    ///
    /// With this off, a true dependency cycle recurses until the stack
    /// overflows.
    pub detect_cycles: bool,
}

impl RuntimeOptions {
    /// Set the log label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Enable or disable cycle detection.
    pub fn detect_cycles(mut self, detect: bool) -> Self {
        self.detect_cycles = detect;
        self
    }
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            label: String::from("trellis"),
            detect_cycles: true,
        }
    }
}

/// A unit of work submitted from another thread.
type Job = Box<dyn FnOnce() -> Result<()> + Send>;

/// Handle for submitting work to a runtime from any thread.
#[derive(Clone)]
pub struct Dispatcher {
    sender: UnboundedSender<Job>,
    closed: Arc<AtomicBool>,
}

impl Dispatcher {
    /// Queue `job` to run on the runtime's evaluator.
    ///
    /// This is the only safe way to write reactive state from a thread that
    /// does not own the runtime.
    pub fn enqueue<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        self.sender.send(Box::new(job)).map_err(|_| Error::Closed)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// The reactive engine: shared tracking state plus the root scope.
pub struct Runtime {
    options: RuntimeOptions,
    closed: Arc<AtomicBool>,
    tracker: Arc<Tracker>,
    root: Scope,
    sender: UnboundedSender<Job>,
    receiver: Mutex<Option<UnboundedReceiver<Job>>>,
    shutdown: Notify,
}

impl Runtime {
    /// Start a runtime with default options.
    pub fn new() -> Self {
        Self::start(RuntimeOptions::default())
    }

    /// Start a runtime with a live root scope.
    pub fn start(options: RuntimeOptions) -> Self {
        let tracker = Tracker::new(options.label.clone(), options.detect_cycles);
        let root = Scope::new(Arc::clone(&tracker));
        let (sender, receiver) = mpsc::unbounded_channel();

        tracing::debug!(runtime = %options.label, "runtime started");

        Self {
            options,
            closed: Arc::new(AtomicBool::new(false)),
            tracker,
            root,
            sender,
            receiver: Mutex::new(Some(receiver)),
            shutdown: Notify::new(),
        }
    }

    /// The options the runtime was started with.
    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// The root scope.
    pub fn root_scope(&self) -> Scope {
        self.root.clone()
    }

    /// The scope new nodes should be created against.
    ///
    /// This is the root scope; narrower scopes come from [`Scope::child`].
    pub fn current_scope(&self) -> Scope {
        self.root_scope()
    }

    /// Check if the runtime has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the runtime, disposing the root scope.
    ///
    /// Only the first call does anything; later calls return
    /// [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        self.root.dispose();
        self.shutdown.notify_one();
        tracing::debug!(runtime = %self.options.label, "runtime closed");
        Ok(())
    }

    /// A handle other threads can use to submit work.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            sender: self.sender.clone(),
            closed: Arc::clone(&self.closed),
        }
    }

    /// Run every job queued so far on the calling thread.
    ///
    /// Returns how many jobs ran, or the first error a job returned. Jobs
    /// after a failing one still run.
    pub fn drain(&self) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let mut ran = 0;
        let mut first = None;
        while let Some(job) = self.next_job() {
            ran += 1;
            if let Err(err) = self.tracker.untracked(job) {
                first.get_or_insert(err);
            }
        }

        if ran > 0 {
            tracing::trace!(runtime = %self.options.label, jobs = ran, "drained queue");
        }
        first.map_or(Ok(ran), Err)
    }

    fn next_job(&self) -> Option<Job> {
        self.receiver.lock().as_mut()?.try_recv().ok()
    }

    /// Run queued jobs as they arrive until the runtime is closed.
    ///
    /// Job errors are logged and do not stop the loop.
    pub async fn run_queue(&self) -> Result<()> {
        let Some(mut receiver) = self.receiver.lock().take() else {
            return Err(Error::Closed);
        };

        while !self.is_closed() {
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => break,
                job = receiver.recv() => {
                    let Some(job) = job else { break };
                    if let Err(err) = self.tracker.untracked(job) {
                        tracing::debug!(runtime = %self.options.label, error = %err, "queued job failed");
                    }
                }
            }
        }

        *self.receiver.lock() = Some(receiver);
        Ok(())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("label", &self.options.label)
            .field("closed", &self.is_closed())
            .field("root", &self.root)
            .finish()
    }
}
