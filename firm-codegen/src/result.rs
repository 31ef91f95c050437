//! Result and error types for the firm-codegen crate.
//!
//! Analyses and optimizations work in place and report progress as `bool`
//! "changed" flags; structural corruption is a programming error and panics.
//! The errors below are the conditions a well-behaved caller can run into
//! and is expected to handle.

use crate::ir::entities::Node;
use thiserror::Error;

/// An error produced by the firm library.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FirmError {
    /// Misuse of the construction protocol, e.g. maturing a block twice or
    /// adding a predecessor to a matured block. Not recoverable within the
    /// current graph.
    #[error("construction protocol violation: {0}")]
    Construction(String),

    /// A structural invariant violation found by the verifier.
    #[error("verification failed at {node}: {message}")]
    Verifier {
        /// The offending node.
        node: Node,
        /// What the verifier objected to.
        message: String,
    },

    /// Nested reservation of a per-graph resource.
    #[error("graph resource already in use: {0}")]
    ResourceInUse(&'static str),

    /// A backend transform received an opcode it does not handle.
    #[error("unsupported pattern at {node}: {op}")]
    UnsupportedPattern {
        /// The offending node.
        node: Node,
        /// Its opcode name.
        op: &'static str,
    },

    /// The register allocator could not color and no spill handler was
    /// installed.
    #[error("register allocation failed: {0} uncolorable values")]
    AllocationFailure(usize),

    /// A tarval operation under the bad overflow policy failed. Callers
    /// treat this as "cannot fold".
    #[error("tarval arithmetic overflowed")]
    ArithmeticOverflow,

    /// Two members of the same scope share a name.
    #[error("duplicate identifier in scope: {0}")]
    DuplicateIdent(String),

    /// An operation was applied to an object of the wrong kind, e.g. asking
    /// for the frame type of a non-method entity.
    #[error("wrong kind of object: {0}")]
    Kind(&'static str),
}

/// A convenient alias for a `Result` using `FirmError`.
pub type FirmResult<T> = Result<T, FirmError>;
