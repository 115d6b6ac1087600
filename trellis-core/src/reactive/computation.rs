//! Source and cleanup bookkeeping shared by effects and memos.
//!
//! A computation's source set must equal exactly what its most recent
//! evaluation read. Both kinds therefore detach from every recorded source
//! before re-running and let the run rebuild the set from scratch.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::context::Tracker;
use super::node::{Cleanup, NodeId, Subscribable};
use crate::error::Result;

/// A source read during the last evaluation, and its version at the time.
struct SourceEdge {
    source: Arc<dyn Subscribable>,
    seen: u64,
}

/// Sources and run-scoped cleanups of one computation.
#[derive(Default)]
pub(crate) struct Tracked {
    /// Keyed by source identity, in first-read order.
    sources: Mutex<IndexMap<NodeId, SourceEdge>>,
    cleanups: Mutex<Vec<Cleanup>>,
}

impl Tracked {
    pub(crate) fn add_source(&self, source: Arc<dyn Subscribable>) {
        let seen = source.version();
        self.sources
            .lock()
            .insert(source.node_id(), SourceEdge { source, seen });
    }

    pub(crate) fn add_cleanup(&self, cleanup: Cleanup) {
        self.cleanups.lock().push(cleanup);
    }

    pub(crate) fn source_count(&self) -> usize {
        self.sources.lock().len()
    }

    /// Unsubscribe `id` from every recorded source and forget them.
    pub(crate) fn detach(&self, id: NodeId) {
        let sources = std::mem::take(&mut *self.sources.lock());
        for edge in sources.into_values() {
            edge.source.unsubscribe(id);
        }
    }

    /// Run the cleanups registered during the last evaluation, newest first.
    ///
    /// Reads inside a cleanup never become dependencies of whatever is
    /// currently evaluating.
    pub(crate) fn run_cleanups(&self, tracker: &Tracker) {
        let cleanups = std::mem::take(&mut *self.cleanups.lock());
        if cleanups.is_empty() {
            return;
        }
        tracker.untracked(|| {
            for cleanup in cleanups.into_iter().rev() {
                cleanup();
            }
        });
    }

    /// Full teardown of the last evaluation.
    pub(crate) fn cleanup(&self, tracker: &Tracker, id: NodeId) {
        self.detach(id);
        self.run_cleanups(tracker);
    }

    /// Whether every recorded source still has the version it had when read.
    ///
    /// Sources are refreshed in read order and the check stops at the first
    /// change, so a source that only an earlier branch led to is never
    /// brought up to date needlessly.
    pub(crate) fn sources_unchanged(&self) -> Result<bool> {
        let edges: Vec<(Arc<dyn Subscribable>, u64)> = self
            .sources
            .lock()
            .values()
            .map(|edge| (Arc::clone(&edge.source), edge.seen))
            .collect();

        for (source, seen) in edges {
            source.refresh()?;
            if source.version() != seen {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
