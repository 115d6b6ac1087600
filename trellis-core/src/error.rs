//! Error types for trellis-core.
//!
//! Engine errors are reported synchronously to whoever triggered them. Most
//! operations return [`Result`] directly. The one exception is
//! [`Memo::get`](crate::reactive::Memo::get), which has no way to return an
//! error from inside a user computation: it raises the error as an unwinding
//! payload instead, and the nearest fallible boundary turns it back into an
//! `Err` with [`catch`].

use std::fmt::Write as _;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;

use crate::reactive::NodeId;

/// Result type for trellis-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in trellis-core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The runtime has already been closed.
    #[error("runtime is already closed")]
    Closed,

    /// A node was read or notified while it was still evaluating.
    #[error("cycle detected: {node} re-entered while evaluating{}", format_path(path))]
    Cycle {
        /// The node that was re-entered.
        node: NodeId,
        /// Nodes under evaluation, from `node` to the innermost one.
        path: Vec<NodeId>,
    },
}

fn format_path(path: &[NodeId]) -> String {
    let mut out = String::new();
    if path.len() > 1 {
        out.push_str(" (");
        for (i, id) in path.iter().enumerate() {
            if i > 0 {
                out.push_str(" -> ");
            }
            let _ = write!(out, "{id}");
        }
        out.push(')');
    }
    out
}

impl Error {
    /// Unwind with this error as the payload.
    ///
    /// Does not invoke the panic hook. Pair with [`catch`].
    pub(crate) fn raise(self) -> ! {
        panic::resume_unwind(Box::new(self))
    }
}

/// Run `f`, converting an [`Error`] raised inside it back into `Err`.
///
/// Any other panic keeps unwinding.
pub(crate) fn catch<R>(f: impl FnOnce() -> R) -> Result<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => match payload.downcast::<Error>() {
            Ok(err) => Err(*err),
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catch_returns_raised_error() {
        let result = catch(|| -> i32 { Error::Closed.raise() });
        assert_eq!(result, Err(Error::Closed));
    }

    #[test]
    fn catch_passes_through_values() {
        assert_eq!(catch(|| 7), Ok(7));
    }

    #[test]
    fn catch_does_not_swallow_foreign_panics() {
        let outcome = panic::catch_unwind(|| catch(|| panic!("boom")));
        assert!(outcome.is_err());
    }

    #[test]
    fn cycle_display_lists_path() {
        let a = NodeId::new();
        let b = NodeId::new();
        let err = Error::Cycle {
            node: a,
            path: vec![a, b],
        };
        let message = err.to_string();
        assert!(message.starts_with(&format!("cycle detected: {a}")));
        assert!(message.contains(&format!("({a} -> {b})")));
    }
}
