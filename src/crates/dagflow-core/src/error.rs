//! Error types for graph construction and execution
//!
//! All errors surfaced by the engine are variants of [`EngineError`], which
//! implements `std::error::Error` via the `thiserror` crate.
//!
//! # Propagation policy
//!
//! - [`EngineError::Node`] and [`EngineError::Construction`] leave the engine
//!   through the output tick stream, followed by an orderly shutdown.
//! - [`EngineError::Cycle`] is returned only to the node (or caller) that
//!   attempted the commit; the engine keeps running.
//! - [`EngineError::RefInvariant`] signals that the refcount store and the
//!   graph disagree. This is a programming bug; the engine logs it and aborts
//!   the process.
//! - [`EngineError::CantSpeculate`] is returned to the caller of a
//!   speculative call and is never fatal.
//! - [`EngineError::Cancelled`] is not a failure. A streaming body returns it
//!   (or plain `Ok(())`) when it stops because its context was cancelled.

use thiserror::Error;

/// Convenience result type using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

/// Comprehensive error type for all engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Graph did not pass static validation.
    ///
    /// Raised at `Engine::new` time (unknown arg names, duplicate arg
    /// sources, type mismatches, duplicate vertices) and by commits whose
    /// buffered operations would leave the graph structurally invalid.
    #[error("Graph construction failed: {0}")]
    Construction(String),

    /// A running node returned a non-cancellation failure.
    #[error("Node '{node}' failed: {error}")]
    Node {
        /// Name of the node that failed
        node: String,
        /// Error message from the streaming body
        error: String,
    },

    /// A transaction would introduce a cycle.
    ///
    /// The commit is rejected and the graph is untouched; the caller may
    /// retry, fall back, or shut down.
    #[error("Commit rejected, the operation would introduce a cycle: {0}")]
    Cycle(String),

    /// The refcount store and the graph disagree.
    ///
    /// Unrecoverable. The commit path logs this and aborts the process.
    #[error("Refcount invariant violated: {0}")]
    RefInvariant(String),

    /// A synchronous call was attempted on a node that cannot service it,
    /// either because the node does not support speculation or because its
    /// streaming body currently owns it.
    #[error("Node is not ready for speculative call")]
    CantSpeculate,

    /// Clean termination of a streaming body after context cancellation.
    ///
    /// Not a failure; the body wrapper treats it exactly like `Ok(())`.
    #[error("Cancelled")]
    Cancelled,

    /// A value or type level misuse, such as building a struct with a field
    /// value that does not match the declared field type.
    #[error("Value error: {0}")]
    Value(String),
}

impl EngineError {
    /// Create a node failure with context.
    pub fn node(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Node {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Create a construction error.
    pub fn construction(msg: impl Into<String>) -> Self {
        Self::Construction(msg.into())
    }

    /// Create a value error.
    pub fn value(msg: impl Into<String>) -> Self {
        Self::Value(msg.into())
    }

    /// True for the clean-shutdown sentinel.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_error_display() {
        let err = EngineError::node("clock", "timer wedged");
        assert_eq!(format!("{}", err), "Node 'clock' failed: timer wedged");
    }

    #[test]
    fn test_cancelled_is_not_a_failure() {
        assert!(EngineError::Cancelled.is_cancelled());
        assert!(!EngineError::CantSpeculate.is_cancelled());
    }
}
