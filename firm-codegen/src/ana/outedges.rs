//! Reverse edges: a cached map from each node to its users.
//!
//! Input edges are explicit in the IR; the reverse direction is an analysis.
//! The cache is either absent, consistent, or inconsistent (the graph's
//! `outs_state`); mutating passes are responsible for invalidating it, and
//! consumers recompute when the flag says so.

use crate::ir::entities::Node;
use crate::ir::graph::{AnalysisState, Graph};
use crate::ir::opcode::Op;
use firm_entity::SecondaryMap;

/// The out-edge cache of one graph.
pub struct OutEdges {
    /// For each node: its users as (user, input position) pairs.
    outs: SecondaryMap<Node, Vec<(Node, usize)>>,
    /// For each block: the reachable non-block nodes placed in it.
    contents: SecondaryMap<Node, Vec<Node>>,
}

impl OutEdges {
    /// Compute the out edges of all reachable nodes.
    pub fn compute(g: &mut Graph) -> OutEdges {
        let mut outs: SecondaryMap<Node, Vec<(Node, usize)>> = SecondaryMap::new();
        let mut contents: SecondaryMap<Node, Vec<Node>> = SecondaryMap::new();
        let order = g.reachable_postorder();
        for &n in &order {
            if g.op(n) == Op::Id {
                continue;
            }
            for i in 0..g.arity(n) {
                let input = g.in_at(n, i);
                outs[input].push((n, i));
            }
            if g.op(n) != Op::Block && g.op(n) != Op::Anchor {
                contents[g.block_of(n)].push(n);
            }
        }
        g.outs_state = AnalysisState::Consistent;
        OutEdges { outs, contents }
    }

    /// The users of `n`.
    pub fn outs(&self, n: Node) -> &[(Node, usize)] {
        match self.outs.get(n) {
            Some(v) => v,
            None => &[],
        }
    }

    /// Number of users of `n`.
    pub fn n_outs(&self, n: Node) -> usize {
        self.outs(n).len()
    }

    /// The reachable non-block nodes placed in `block`.
    pub fn block_contents(&self, block: Node) -> &[Node] {
        match self.contents.get(block) {
            Some(v) => v,
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::mode;
    use crate::ir::tarval::Tarval;

    #[test]
    fn users_are_found() {
        let mut g = Graph::new(None);
        let block = g.start_block();
        let x = g.new_unknown(mode::IS);
        let one = g.new_const(Tarval::new_int(mode::IS, 1));
        let a = g.new_add(block, x, one, mode::IS);
        let b = g.new_mul(block, a, a, mode::IS);
        g.keep_alive(b);

        let outs = OutEdges::compute(&mut g);
        assert_eq!(outs.n_outs(b), 1); // the End keep-alive
        let a_users: Vec<Node> = outs.outs(a).iter().map(|&(u, _)| u).collect();
        assert_eq!(a_users, vec![b, b]);
        assert!(outs.block_contents(block).contains(&a));
        assert_eq!(g.outs_state, AnalysisState::Consistent);
    }
}
