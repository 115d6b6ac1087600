//! Trellis Core
//!
//! This crate provides a fine-grained reactive dependency-tracking engine.
//! It implements:
//!
//! - Reactive primitives (signals, memos, effects)
//! - Automatic dependency capture during evaluation
//! - Lazy, cached derived values and eager effects
//! - Write batching and scope-based cleanup
//!
//! # Architecture
//!
//! - `reactive`: the primitives, scopes and the runtime
//! - `error`: error types shared by every fallible operation
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::reactive::{Effect, Memo, Runtime, Signal};
//!
//! let runtime = Runtime::new();
//! let scope = runtime.root_scope();
//!
//! // Create a signal
//! let count = Signal::new(&scope, 0);
//!
//! // Create a derived value
//! let doubled = Memo::new(&scope, {
//!     let count = count.clone();
//!     move || count.get() * 2
//! });
//!
//! // Create an effect
//! Effect::new(&scope, {
//!     let (count, doubled) = (count.clone(), doubled.clone());
//!     move || println!("Count: {}, Doubled: {}", count.get(), doubled.get())
//! })?;
//!
//! // Update the signal
//! count.set(5)?;
//! // Effect automatically runs, prints: "Count: 5, Doubled: 10"
//!
//! runtime.close()?;
//! ```

pub mod error;
pub mod reactive;

pub use error::{Error, Result};
