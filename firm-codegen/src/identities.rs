//! The value table: hash-consing over pure nodes.
//!
//! Structurally identical pure nodes are merged: the table is keyed by
//! (opcode, mode, normalized input tuple, attribute payload) and maps to the
//! canonical node. Impure opcodes (memory operations, calls, Phis, blocks)
//! keep their identity and never enter the table.
//!
//! The key deliberately excludes the block: pure nodes float, and merging
//! them across blocks is exactly the global value numbering the code
//! placement pass later legalizes by recomputing block assignments.
//!
//! After bulk mutation (dead-node elimination) the table is rebuilt from
//! scratch with [`Graph::new_identities`].

use crate::ir::entities::Node;
use crate::ir::graph::Graph;
use crate::ir::mode::Mode;
use crate::ir::node::Attr;
use crate::ir::opcode::Op;
use smallvec::SmallVec;
use std::collections::HashMap;

#[derive(Clone, PartialEq, Eq, Hash)]
struct NodeKey {
    op: Op,
    mode: Mode,
    ins: SmallVec<[Node; 4]>,
    attr: Attr,
}

/// Hash-consing table over the pure nodes of one graph.
pub struct ValueTable {
    map: HashMap<NodeKey, Node>,
}

impl ValueTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Number of canonical nodes currently registered.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Is the table empty?
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn clear(&mut self) {
        self.map.clear();
    }
}

impl Default for ValueTable {
    fn default() -> Self {
        Self::new()
    }
}

fn key_of(g: &Graph, n: Node) -> NodeKey {
    NodeKey {
        op: g.op(n),
        mode: g.mode(n),
        ins: g.ins_normalized(n),
        attr: g.node(n).attr.clone(),
    }
}

impl Graph {
    /// Look `n` up in the value table. If a structural twin exists, the twin
    /// is returned and `n` is left for dead-node elimination; otherwise `n`
    /// becomes the canonical node for its key.
    pub fn identify(&mut self, n: Node) -> Node {
        if !self.op(n).is_cseable() {
            return n;
        }
        let key = key_of(self, n);
        match self.values.map.get(&key) {
            // A canonical entry may have been exchanged away since; only a
            // live twin counts.
            Some(&twin) if twin != n && self.op(twin) == key.op => {
                log::trace!("identify: {} is a twin of {}", n, twin);
                twin
            }
            Some(&twin) if twin == n => n,
            _ => {
                self.values.map.insert(key, n);
                n
            }
        }
    }

    /// Drop `n` from the value table (its inputs or attributes are about to
    /// change).
    pub fn remove_identity(&mut self, n: Node) {
        if !self.op(n).is_cseable() {
            return;
        }
        let key = key_of(self, n);
        if self.values.map.get(&key) == Some(&n) {
            self.values.map.remove(&key);
        }
    }

    /// Rebuild the value table from the reachable pure nodes.
    ///
    /// Used after bulk mutation. Reinsertion keeps the first node seen per
    /// key as canonical; callers that want twins actually merged run the
    /// local optimizer afterwards.
    pub fn new_identities(&mut self) {
        self.values.clear();
        let reachable = self.reachable_postorder();
        for n in reachable {
            if self.op(n).is_cseable() {
                let key = key_of(self, n);
                self.values.map.entry(key).or_insert(n);
            }
        }
    }

    /// Number of entries in the value table.
    pub fn identities_len(&self) -> usize {
        self.values.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::graph::Graph;
    use crate::ir::mode;
    use crate::ir::tarval::Tarval;

    #[test]
    fn twin_constants_merge() {
        let mut g = Graph::new(None);
        let a = g.new_const(Tarval::new_int(mode::IS, 3));
        let b = g.new_const(Tarval::new_int(mode::IS, 3));
        assert_eq!(a, b);
        let c = g.new_const(Tarval::new_int(mode::IS, 4));
        assert_ne!(a, c);
    }

    #[test]
    fn twin_adds_merge() {
        let mut g = Graph::new(None);
        let x = g.new_const(Tarval::new_int(mode::IS, 10));
        let y = g.new_const(Tarval::new_int(mode::IS, 20));
        let block = g.start_block();
        let a1 = g.new_add(block, x, y, mode::IS);
        let a2 = g.new_add(block, x, y, mode::IS);
        assert_eq!(a1, a2);
    }

    #[test]
    fn rebuild_keeps_canonical() {
        let mut g = Graph::new(None);
        let x = g.new_const(Tarval::new_int(mode::IS, 10));
        g.keep_alive(x);
        // Unreachable garbage falls out of the table on rebuild.
        let dead = g.new_const(Tarval::new_int(mode::IS, 99));
        g.new_identities();
        // x is reachable via the keep-alive, so it stays canonical.
        let x2 = g.new_const(Tarval::new_int(mode::IS, 10));
        assert_eq!(x, x2);
        // The dead constant was dropped; asking again makes a fresh node.
        let dead2 = g.new_const(Tarval::new_int(mode::IS, 99));
        assert_ne!(dead, dead2);
    }
}
