//! Node identity and the two capabilities nodes offer each other.
//!
//! Every reactive node (signal, memo, effect) gets a [`NodeId`]. The graph
//! is bipartite between:
//!
//! - [`Subscribable`]s: things that can be read and depended upon (signals
//!   and memos).
//! - [`Computation`]s: things that read and get notified (effects and memos).
//!
//! A memo is both. Edges from a source to its subscribers are held through
//! [`Listener`], which carries only a weak reference: the scope that created
//! a node owns it, the edge never does.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use super::effect::EffectNode;
use crate::error::Result;

/// Unique identifier for a reactive node.
///
/// Each signal, memo and effect gets a unique ID when created. Subscriber and
/// source sets are keyed by it, which makes edges identity-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A deferred teardown callback.
pub(crate) type Cleanup = Box<dyn FnOnce() + Send>;

/// Something a computation can depend on.
pub(crate) trait Subscribable: Send + Sync {
    fn node_id(&self) -> NodeId;

    /// Change counter, bumped whenever the readable value changes.
    fn version(&self) -> u64;

    fn subscribe(&self, listener: Listener);

    fn unsubscribe(&self, id: NodeId);

    /// Bring the value up to date without registering a dependency.
    fn refresh(&self) -> Result<()>;
}

/// Something that depends on subscribables and gets notified when they change.
pub(crate) trait Computation: Send + Sync {
    fn notify(&self) -> Result<()>;

    /// Record that the current evaluation read `source`.
    fn add_source(&self, source: Arc<dyn Subscribable>);

    /// Take ownership of a cleanup scoped to the current evaluation.
    fn adopt_cleanup(&self, cleanup: Cleanup);
}

/// A memo seen through its two capabilities.
pub(crate) trait DerivedNode: Subscribable + Computation {}

impl<N: Subscribable + Computation> DerivedNode for N {}

/// A weak, identity-carrying handle to a computation.
///
/// The set of computation kinds is closed: effects and memos.
#[derive(Clone)]
pub(crate) enum Listener {
    Effect { id: NodeId, node: Weak<EffectNode> },
    Derived { id: NodeId, node: Weak<dyn DerivedNode> },
}

impl Listener {
    pub(crate) fn id(&self) -> NodeId {
        match self {
            Self::Effect { id, .. } | Self::Derived { id, .. } => *id,
        }
    }

    /// Notify the computation. A computation that has been dropped is skipped.
    pub(crate) fn notify(&self) -> Result<()> {
        match self {
            Self::Effect { node, .. } => node.upgrade().map_or(Ok(()), |n| n.notify()),
            Self::Derived { node, .. } => node.upgrade().map_or(Ok(()), |n| n.notify()),
        }
    }

    pub(crate) fn add_source(&self, source: Arc<dyn Subscribable>) {
        match self {
            Self::Effect { node, .. } => {
                if let Some(node) = node.upgrade() {
                    node.add_source(source);
                }
            }
            Self::Derived { node, .. } => {
                if let Some(node) = node.upgrade() {
                    node.add_source(source);
                }
            }
        }
    }

    /// Hand `cleanup` to the computation, or give it back if it is gone.
    pub(crate) fn adopt_cleanup(&self, cleanup: Cleanup) -> Option<Cleanup> {
        match self {
            Self::Effect { node, .. } => match node.upgrade() {
                Some(node) => {
                    node.adopt_cleanup(cleanup);
                    None
                }
                None => Some(cleanup),
            },
            Self::Derived { node, .. } => match node.upgrade() {
                Some(node) => {
                    node.adopt_cleanup(cleanup);
                    None
                }
                None => Some(cleanup),
            },
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Effect { id, .. } => write!(f, "Effect({id})"),
            Self::Derived { id, .. } => write!(f, "Derived({id})"),
        }
    }
}

/// A snapshot of subscribers taken before fan-out.
pub(crate) type Listeners = SmallVec<[Listener; 4]>;

/// The subscriber side of a subscribable, keyed by node identity.
#[derive(Default)]
pub(crate) struct SubscriberSet {
    inner: Mutex<IndexMap<NodeId, Listener>>,
}

impl SubscriberSet {
    pub(crate) fn insert(&self, listener: Listener) {
        self.inner.lock().insert(listener.id(), listener);
    }

    pub(crate) fn remove(&self, id: NodeId) {
        self.inner.lock().shift_remove(&id);
    }

    /// Copy the current subscribers so none of them is notified under the lock.
    pub(crate) fn snapshot(&self) -> Listeners {
        self.inner.lock().values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        let id3 = NodeId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn node_id_displays_with_hash() {
        let id = NodeId::new();
        assert_eq!(id.to_string(), format!("#{}", id.raw()));
    }

    #[test]
    fn subscriber_set_dedupes_by_identity() {
        let set = SubscriberSet::default();
        let id = NodeId::new();
        let listener = Listener::Effect {
            id,
            node: Weak::new(),
        };

        set.insert(listener.clone());
        set.insert(listener);
        assert_eq!(set.len(), 1);

        set.remove(id);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn dropped_listener_is_skipped() {
        let listener = Listener::Effect {
            id: NodeId::new(),
            node: Weak::new(),
        };
        assert!(listener.notify().is_ok());
        assert!(listener.adopt_cleanup(Box::new(|| {})).is_some());
    }
}
