//! The intermediate representation: modes, tarvals, types, nodes, graphs.

pub mod entities;
pub mod graph;
pub mod mode;
pub mod node;
pub mod opcode;
pub mod program;
pub mod tarval;
pub mod types;
pub mod verify;

pub use self::entities::{Entity, GraphRef, Ident, LoopRef, Node, Type};
pub use self::graph::{AnalysisState, Graph, GraphState, Resources};
pub use self::mode::Mode;
pub use self::node::{Attr, NodeData};
pub use self::opcode::Op;
pub use self::program::Program;
pub use self::tarval::{OverflowMode, Relation, Tarval};
pub use self::types::{TypeKind, TypeRegistry};
