//! Firm IR entity references.
//!
//! IR objects reference each other constantly: nodes reference operand nodes
//! and their containing block, entities reference their owner type, graphs
//! reference their procedure entity. These references are not Rust references
//! but `u32` indices into tables owned by the graph or the program — a graph
//! of nodes is full of cycles (nodes ↔ blocks ↔ keep-alives), and indices
//! sidestep ownership while keeping an 8-byte edge down to 4.
//!
//! There is a separate index type per table so we don't lose type safety.
//! All of them implement `Display` in the form used by the IR printers.

use firm_entity::entity_impl;

/// An opaque reference to an IR node. Blocks are nodes too (opcode `Block`).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node(u32);
entity_impl!(Node, "n");

/// An opaque reference to a type in the program-wide type repository.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Type(u32);
entity_impl!(Type, "T");

/// An opaque reference to an entity: a named storage location or function.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity(u32);
entity_impl!(Entity, "ent");

/// An opaque reference to an interned identifier.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(u32);
entity_impl!(Ident, "id");

/// An opaque reference to a graph (one procedure) in the program.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphRef(u32);
entity_impl!(GraphRef, "irg");

/// An opaque reference to a loop in the loop tree.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopRef(u32);
entity_impl!(LoopRef, "loop");

#[cfg(test)]
mod tests {
    use super::*;
    use firm_entity::packed_option::PackedOption;
    use std::string::ToString;

    #[test]
    fn display() {
        assert_eq!(Node::from_u32(0).to_string(), "n0");
        assert_eq!(Type::from_u32(12).to_string(), "T12");
        assert_eq!(Entity::from_u32(3).to_string(), "ent3");
    }

    #[test]
    fn memory() {
        use core::mem;
        // This is the whole point of `PackedOption`.
        assert_eq!(
            mem::size_of::<Node>(),
            mem::size_of::<PackedOption<Node>>()
        );
    }
}
