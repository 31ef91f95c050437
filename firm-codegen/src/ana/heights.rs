//! Node heights: longest dependency chains within a block.
//!
//! For each node, the length of the longest chain of same-block operands
//! below it. Used by the scheduler's priority function and by the
//! delay-slot filler's range reachability queries.

use crate::ir::entities::Node;
use crate::ir::graph::Graph;
use crate::ir::opcode::Op;
use firm_entity::SecondaryMap;

/// Heights of all reachable nodes of one graph.
pub struct Heights {
    h: SecondaryMap<Node, u32>,
}

impl Heights {
    /// Compute heights. A node with no same-block operands has height 1;
    /// blocks have height 0.
    pub fn compute(g: &mut Graph) -> Heights {
        let mut h: SecondaryMap<Node, u32> = SecondaryMap::new();
        // Postorder puts operands before users, so one pass suffices.
        let order = g.reachable_postorder();
        for n in order {
            if g.op(n) == Op::Block || g.op(n) == Op::Id {
                continue;
            }
            let block = g.block_of(n);
            let mut best = 0;
            for i in 0..g.arity(n) {
                let input = g.in_at(n, i);
                if g.op(input) != Op::Block && g.node(input).block.expand().map(|b| g.skip_id(b))
                    == Some(block)
                {
                    best = best.max(h[input]);
                }
            }
            h[n] = best + 1;
        }
        Heights { h }
    }

    /// The height of `n`.
    pub fn height(&self, n: Node) -> u32 {
        self.h[n]
    }
}

/// Is `to` reachable from `from` following operand edges within one block?
pub fn reachable_in_block(g: &Graph, from: Node, to: Node) -> bool {
    if from == to {
        return true;
    }
    let block = g.block_of(from);
    let mut work = vec![from];
    let mut seen = Vec::new();
    while let Some(n) = work.pop() {
        for i in 0..g.arity(n) {
            let input = g.in_at(n, i);
            if input == to {
                return true;
            }
            if g.op(input) != Op::Block
                && g.node(input).block.expand().map(|b| g.skip_id(b)) == Some(block)
                && !seen.contains(&input)
            {
                seen.push(input);
                work.push(input);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::mode;
    use crate::ir::tarval::Tarval;

    #[test]
    fn chain_heights() {
        let mut g = Graph::new(None);
        let block = g.start_block();
        let x = g.new_unknown(mode::IS);
        let y = g.new_unknown(mode::IS);
        let a = g.new_add(block, x, y, mode::IS);
        let two = g.new_const(Tarval::new_int(mode::IS, 2));
        let b = g.new_mul(block, a, two, mode::IS);
        g.keep_alive(b);

        let heights = Heights::compute(&mut g);
        assert!(heights.height(b) > heights.height(a));
        assert!(heights.height(a) > heights.height(x));
        assert!(reachable_in_block(&g, b, x));
        assert!(!reachable_in_block(&g, a, b));
    }
}
