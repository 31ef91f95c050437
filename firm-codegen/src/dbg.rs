//! Optimization-kind tags for debug-info merging.
//!
//! Every replacement the optimizer performs reports what kind of rewrite it
//! was. A debugger-support layer would merge source locations based on the
//! tag; here the tags feed the trace log so a rewritten graph can be
//! explained after the fact.

use crate::ir::entities::Node;

/// What kind of rewrite replaced a node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DbgAction {
    /// Merged with a structural twin found in the value table.
    Cse,
    /// Global value numbering across blocks.
    Gvn,
    /// An algebraic identity (x+0, x&x, …).
    Algebraic,
    /// Evaluated to a constant.
    ConstEval,
    /// Control-flow straightening.
    Straightening,
    /// A conditional branch decided at compile time.
    IfSimplification,
    /// A Phi collapsed to its single distinct input.
    PhiOpt,
    /// Dead code removal.
    DeadCode,
    /// A load satisfied by a preceding store.
    ReadAfterWrite,
    /// A load satisfied by a preceding load.
    ReadAfterRead,
    /// A store made redundant by a following store.
    WriteAfterWrite,
    /// A store of the value just loaded from the same address.
    WriteAfterRead,
    /// Operator strength reduction.
    Osr,
    /// Linear function test replacement.
    Lftr,
}

/// Report a completed rewrite of `old` into `new`.
pub fn opt_applied(action: DbgAction, old: Node, new: Node) {
    log::trace!("{:?}: {} -> {}", action, old, new);
}

/// Report a rewrite that removed `old` without a replacement value.
pub fn opt_removed(action: DbgAction, old: Node) {
    log::trace!("{:?}: {} removed", action, old);
}
