//! Node payloads: attributes and projection numbers.
//!
//! Every node carries an opcode-specific attribute payload. The payload is a
//! tagged union of fixed-layout variants; each variant carries exactly the
//! attributes the opcode schema requires, and accessing the wrong variant is
//! a programming error, not a runtime lookup.

use crate::ir::entities::{Entity, Node, Type};
use crate::ir::mode::Mode;
use crate::ir::opcode::Op;
use crate::ir::tarval::{Relation, Tarval};
use smallvec::SmallVec;

/// Attributes of a `Block` node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockAttr {
    /// Set once the block's predecessor list is final.
    pub matured: bool,
    /// One bit per predecessor edge: is it a loop back-edge?
    /// Filled in by the loop tree analysis.
    pub backedges: Vec<bool>,
}

/// The payload of a `SymConst` node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SymConst {
    /// The address of an entity.
    Addr(Entity),
    /// The size of a type, in bytes.
    TypeSize(Type),
    /// The alignment of a type, in bytes.
    TypeAlign(Type),
}

/// One resolved callee of a `Call`, as computed by callee analysis.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Callee {
    /// A concrete method entity.
    Entity(Entity),
    /// The call may reach code we cannot name.
    Unknown,
}

/// Attributes of a `Call` node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallAttr {
    /// The method type of the callee.
    pub ty: Type,
    /// Possible callees; `None` until callee analysis ran.
    pub callees: Option<Vec<Callee>>,
}

/// The opcode-specific attribute payload of a node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Attr {
    /// No attributes.
    None,
    /// Block bookkeeping.
    Block(BlockAttr),
    /// The constant's value.
    Const(Tarval),
    /// The symbolic constant's subject.
    SymConst(SymConst),
    /// The projection number.
    Proj(u32),
    /// The relation a `Cmp` tests for.
    Cmp(Relation),
    /// The mode a `Load` produces.
    Load(Mode),
    /// The type a `Alloc` allocates.
    Alloc(Type),
    /// The type a `Free` releases.
    Free(Type),
    /// The type a `CopyB` copies.
    CopyB(Type),
    /// The member entity a `Sel` addresses.
    Sel(Entity),
    /// Call attributes.
    Call(CallAttr),
}

impl Attr {
    /// The relation of a `Cmp`.
    pub fn relation(&self) -> Relation {
        match self {
            Attr::Cmp(r) => *r,
            _ => panic!("relation() on non-Cmp attribute"),
        }
    }

    /// The projection number of a `Proj`.
    pub fn proj(&self) -> u32 {
        match self {
            Attr::Proj(pn) => *pn,
            _ => panic!("proj() on non-Proj attribute"),
        }
    }

    /// The tarval of a `Const`.
    pub fn tarval(&self) -> Tarval {
        match self {
            Attr::Const(tv) => *tv,
            _ => panic!("tarval() on non-Const attribute"),
        }
    }

    /// The load result mode of a `Load`.
    pub fn load_mode(&self) -> Mode {
        match self {
            Attr::Load(m) => *m,
            _ => panic!("load_mode() on non-Load attribute"),
        }
    }

    /// The block bookkeeping of a `Block`.
    pub fn block(&self) -> &BlockAttr {
        match self {
            Attr::Block(b) => b,
            _ => panic!("block() on non-Block attribute"),
        }
    }

    /// The block bookkeeping of a `Block`, mutable edition.
    pub fn block_mut(&mut self) -> &mut BlockAttr {
        match self {
            Attr::Block(b) => b,
            _ => panic!("block_mut() on non-Block attribute"),
        }
    }
}

/// The record stored per node in the graph arena.
#[derive(Clone, Debug)]
pub struct NodeData {
    /// The opcode.
    pub op: Op,
    /// The node's mode.
    pub mode: Mode,
    /// The containing block. `None` for `Block` nodes themselves.
    pub block: firm_entity::PackedOption<Node>,
    /// Operand edges. For blocks: the control-flow predecessors.
    pub ins: SmallVec<[Node; 4]>,
    /// The opcode-specific payload.
    pub attr: Attr,
    /// Visited generation, compared against the graph's counter.
    pub visited: u64,
    /// Stable index, preserved across dead-node elimination.
    pub idx: u32,
}

/// Projection numbers of the opcodes with tuple results.
pub mod pn {
    /// Projections of `Start`.
    pub mod start {
        /// The initial memory state.
        pub const M: u32 = 0;
        /// The frame pointer.
        pub const FRAME: u32 = 1;
        /// The tuple of procedure arguments.
        pub const ARGS: u32 = 2;
    }
    /// Projections of `Load`.
    pub mod load {
        /// Memory after the load.
        pub const M: u32 = 0;
        /// The loaded value.
        pub const RES: u32 = 1;
        /// Control on exception.
        pub const X_EXCEPT: u32 = 2;
        /// Control on regular completion.
        pub const X_REGULAR: u32 = 3;
    }
    /// Projections of `Store`.
    pub mod store {
        /// Memory after the store.
        pub const M: u32 = 0;
        /// Control on exception.
        pub const X_EXCEPT: u32 = 1;
        /// Control on regular completion.
        pub const X_REGULAR: u32 = 2;
    }
    /// Projections of `Div` and `Mod`.
    pub mod divmod {
        /// Memory after the operation.
        pub const M: u32 = 0;
        /// The result value.
        pub const RES: u32 = 1;
        /// Control on exception.
        pub const X_EXCEPT: u32 = 2;
        /// Control on regular completion.
        pub const X_REGULAR: u32 = 3;
    }
    /// Projections of `Call`.
    pub mod call {
        /// Memory after the call.
        pub const M: u32 = 0;
        /// The tuple of results.
        pub const RESULTS: u32 = 1;
        /// Control on exception.
        pub const X_EXCEPT: u32 = 2;
        /// Control on regular completion.
        pub const X_REGULAR: u32 = 3;
    }
    /// Projections of `Alloc`.
    pub mod alloc {
        /// Memory after the allocation.
        pub const M: u32 = 0;
        /// The allocated address.
        pub const RES: u32 = 1;
        /// Control on exception.
        pub const X_EXCEPT: u32 = 2;
    }
    /// Projections of `Cond`.
    pub mod cond {
        /// Taken when the selector is false.
        pub const FALSE: u32 = 0;
        /// Taken when the selector is true.
        pub const TRUE: u32 = 1;
    }
}
