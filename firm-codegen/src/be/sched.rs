//! List scheduling: linearize each block's nodes.
//!
//! A priority-driven topological walk over the data and ordering
//! dependencies within a block. Memory edges are operand edges, so the
//! memory chain's total order is respected for free. Phis come first (they
//! are parallel copies at the block head), control-flow operations come
//! last, and among ready nodes the one with the greatest height (the
//! longest dependency chain hanging below it) is scheduled first, keeping
//! the critical path moving.

use crate::ana::heights::Heights;
use crate::ana::outedges::OutEdges;
use crate::ir::entities::Node;
use crate::ir::graph::Graph;
use crate::ir::opcode::Op;
use firm_entity::EntityRef;
use std::collections::HashMap;

/// The per-block instruction order of one graph.
pub struct Schedule {
    per_block: HashMap<Node, Vec<Node>>,
}

impl Schedule {
    /// Compute a schedule for all reachable blocks.
    pub fn compute(g: &mut Graph) -> Schedule {
        let outs = OutEdges::compute(g);
        let heights = Heights::compute(g);
        let blocks = g.reachable_blocks();
        let mut per_block = HashMap::new();
        for b in blocks {
            let order = schedule_block(g, &outs, &heights, b);
            per_block.insert(b, order);
        }
        Schedule { per_block }
    }

    /// The scheduled nodes of `block`, in order.
    pub fn of(&self, block: Node) -> &[Node] {
        self.per_block.get(&block).map_or(&[], |v| v.as_slice())
    }
}

fn is_cfop_like(g: &Graph, n: Node) -> bool {
    g.op(n).is_cfop() || g.op(n) == Op::End
}

fn schedule_block(g: &Graph, outs: &OutEdges, heights: &Heights, block: Node) -> Vec<Node> {
    let members: Vec<Node> = outs.block_contents(block).to_vec();
    let member_set: HashMap<Node, usize> = members
        .iter()
        .enumerate()
        .map(|(i, &n)| (n, i))
        .collect();

    // Count unscheduled same-block dependencies. Phi operands are read at
    // the predecessors' ends and impose no intra-block order.
    let mut pending: HashMap<Node, usize> = HashMap::new();
    for &n in &members {
        let deps = if g.op(n) == Op::Phi {
            0
        } else {
            (0..g.arity(n))
                .filter(|&i| member_set.contains_key(&g.in_at(n, i)))
                .count()
        };
        pending.insert(n, deps);
    }

    let mut scheduled = Vec::with_capacity(members.len());
    let mut done: HashMap<Node, bool> = HashMap::new();
    loop {
        // Ready nodes, control flow held back until nothing else remains.
        let mut best: Option<Node> = None;
        let mut best_cf: Option<Node> = None;
        for &n in &members {
            if done.get(&n).copied().unwrap_or(false) || pending[&n] > 0 {
                continue;
            }
            if is_cfop_like(g, n) {
                if best_cf.is_none() {
                    best_cf = Some(n);
                }
                continue;
            }
            let better = match best {
                None => true,
                Some(b) => {
                    let (hn, hb) = (heights.height(n), heights.height(b));
                    // Phis always lead; otherwise deepest chain first.
                    (g.op(n) == Op::Phi && g.op(b) != Op::Phi)
                        || (g.op(n) == Op::Phi) == (g.op(b) == Op::Phi)
                            && (hn > hb || (hn == hb && n.index() < b.index()))
                }
            };
            if better {
                best = Some(n);
            }
        }
        let Some(pick) = best.or(best_cf) else {
            break;
        };
        done.insert(pick, true);
        scheduled.push(pick);
        // Unblock users in this block.
        for &(user, _) in outs.outs(pick) {
            if member_set.contains_key(&user) && g.op(user) != Op::Phi {
                if let Some(p) = pending.get_mut(&user) {
                    *p = p.saturating_sub(1);
                }
            }
        }
    }
    debug_assert_eq!(scheduled.len(), members.len(), "schedule lost nodes");
    scheduled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::mode;
    use crate::ir::node::pn;
    use crate::ir::tarval::Tarval;

    #[test]
    fn dependencies_respected() {
        let mut g = Graph::new(None);
        let block = g.start_block();
        let x = g.new_unknown(mode::IS);
        let one = g.new_const(Tarval::new_int(mode::IS, 1));
        let a = g.new_add(block, x, one, mode::IS);
        let b = g.new_mul(block, a, a, mode::IS);
        let p = g.new_unknown(mode::P);
        let st = g.new_store(block, g.initial_mem(), p, b);
        let st_m = g.new_proj(st, pn::store::M, mode::M);
        let ret = g.new_return(g.end_block(), st_m, &[]);
        g.keep_alive(ret);

        let sched = Schedule::compute(&mut g);
        let order = sched.of(block);
        let pos =
            |n: Node| order.iter().position(|&m| m == n).expect("node scheduled");
        assert!(pos(a) < pos(b));
        assert!(pos(b) < pos(st));
        assert!(pos(st) < pos(st_m));
    }

    #[test]
    fn memory_chain_is_ordered() {
        let mut g = Graph::new(None);
        let block = g.start_block();
        let p = g.new_unknown(mode::P);
        let v1 = g.new_const(Tarval::new_int(mode::IS, 1));
        let s1 = g.new_store(block, g.initial_mem(), p, v1);
        let s1_m = g.new_proj(s1, pn::store::M, mode::M);
        let v2 = g.new_const(Tarval::new_int(mode::IS, 2));
        let s2 = g.new_store(block, s1_m, p, v2);
        let s2_m = g.new_proj(s2, pn::store::M, mode::M);
        let ret = g.new_return(g.end_block(), s2_m, &[]);
        g.keep_alive(ret);

        // Dead-store removal would elide s1; scheduling is about order, so
        // disable it by scheduling the raw graph.
        let sched = Schedule::compute(&mut g);
        let order = sched.of(block);
        let pos =
            |n: Node| order.iter().position(|&m| m == n).expect("node scheduled");
        assert!(pos(s1) < pos(s1_m));
        assert!(pos(s1_m) < pos(s2));
    }
}
