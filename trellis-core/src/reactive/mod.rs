//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, memos, effects,
//! scopes and the runtime that ties them together.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! while a memo or effect is evaluating, the signal registers that
//! computation as a dependent. When the signal is written, all dependents
//! are notified.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It is marked dirty when
//! a dependency changes and re-evaluates only when read.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that re-runs whenever its
//! dependencies change, to synchronize reactive state with the outside world.
//!
//! ## Scopes
//!
//! A Scope owns the nodes created against it. Disposing it stops effects,
//! detaches memos and runs user cleanups, newest first. Scopes also batch
//! writes so a burst of changes notifies each dependent once.
//!
//! # Implementation Notes
//!
//! Dependency capture goes through a per-runtime listener stack rather than
//! per-call parameters: whichever computation is on top of the stack when a
//! signal or memo is read becomes its subscriber. Edges from sources to
//! subscribers are weak; scopes own node lifetimes.

mod computation;
mod context;
mod effect;
mod memo;
mod node;
mod runtime;
mod scope;
mod signal;

pub use effect::Effect;
pub use memo::{Memo, MemoOptions, MemoState};
pub use node::NodeId;
pub use runtime::{Dispatcher, Runtime, RuntimeOptions};
pub use scope::Scope;
pub use signal::Signal;
