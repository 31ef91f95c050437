//! Floating code placement: GCSE legalization and loop-invariant sinking.
//!
//! The value table merges pure nodes without regard to blocks; this pass
//! gives every floating node a legal and profitable block again. Two walks:
//!
//! 1. *Early*: the deepest-dominated block in which all the node's data
//!    inputs are available. This is the legality frontier.
//! 2. *Late*: from the common dominator of all users, walk up the dominator
//!    tree towards the early block and pick the block with the smallest
//!    loop depth. For Phi users, the effective use sits in the predecessor
//!    block corresponding to the input.

use crate::ana::domtree::DomTree;
use crate::ana::looptree::LoopTree;
use crate::ana::outedges::OutEdges;
use crate::ir::entities::Node;
use crate::ir::graph::Graph;
use crate::ir::opcode::Op;
use firm_entity::packed_option::PackedOption;
use firm_entity::SecondaryMap;

fn is_floating(g: &Graph, n: Node) -> bool {
    !g.is_pinned(n)
        && g.op(n) != Op::Block
        && !matches!(g.op(n), Op::Bad | Op::Unknown | Op::NoMem | Op::Id)
}

/// Assign every floating node its earliest legal block.
fn place_early(
    g: &mut Graph,
    doms: &DomTree,
    order: &[Node],
    early: &mut SecondaryMap<Node, PackedOption<Node>>,
) {
    // Postorder: operands first.
    for &n in order {
        if !is_floating(g, n) {
            continue;
        }
        let mut best = g.start_block();
        for i in 0..g.arity(n) {
            let input = g.in_at(n, i);
            let b = if g.op(input) == Op::Block {
                input
            } else if is_floating(g, input) {
                early[input].expand().unwrap_or_else(|| g.block_of(input))
            } else {
                g.block_of(input)
            };
            if doms.is_reachable(b) && doms.depth(b) > doms.depth(best) {
                best = b;
            }
        }
        early[n] = PackedOption::from(best);
    }
}

/// The block where user `u` actually needs its operand at position `pos`.
fn use_block(g: &Graph, u: Node, pos: usize) -> Node {
    if g.op(u) == Op::Phi {
        // The value must be available at the end of the matching
        // predecessor.
        let block = g.block_of(u);
        let pred = g.cfg_pred_block(block, pos);
        if g.op(pred) == Op::Block {
            return pred;
        }
        return block;
    }
    if g.op(u) == Op::Block {
        return u;
    }
    g.block_of(u)
}

/// Move floating nodes down to their cheapest legal block.
fn place_late(
    g: &mut Graph,
    doms: &DomTree,
    loops: &LoopTree,
    outs: &OutEdges,
    order: &[Node],
    early: &SecondaryMap<Node, PackedOption<Node>>,
) -> bool {
    let mut changed = false;
    // Reverse postorder on the operand graph visits users before their
    // operands, so a user's final block is known when its operand asks.
    for &n in order.iter().rev() {
        if !is_floating(g, n) {
            continue;
        }
        let Some(earliest) = early[n].expand() else {
            continue;
        };
        // Common dominator of all uses.
        let mut lca: Option<Node> = None;
        for &(u, pos) in outs.outs(n) {
            if g.op(u) == Op::End || g.op(u) == Op::Anchor {
                continue;
            }
            let ub = use_block(g, u, pos);
            if !doms.is_reachable(ub) {
                continue;
            }
            lca = Some(match lca {
                None => ub,
                Some(prev) => doms.deepest_common_dominator(prev, ub),
            });
        }
        let Some(mut best) = lca else {
            continue;
        };
        if !doms.dominates(earliest, best) {
            // Users vanished into unreachable code; stay early.
            best = earliest;
        }
        // Walk up towards the early block, preferring shallow loop depth.
        let mut cursor = best;
        loop {
            if loops.depth(cursor) < loops.depth(best) {
                best = cursor;
            }
            if cursor == earliest {
                break;
            }
            match doms.idom(cursor) {
                Some(d) if doms.dominates(earliest, d) || d == earliest => cursor = d,
                _ => break,
            }
        }
        if g.block_of(n) != best {
            g.set_block(n, best);
            changed = true;
        }
    }
    changed
}

/// Run both placement walks. Returns whether any node moved.
pub fn place_code(g: &mut Graph) -> bool {
    let doms = DomTree::compute(g);
    let loops = LoopTree::compute(g, &doms);
    let outs = OutEdges::compute(g);
    let order = g.reachable_postorder();

    let mut early: SecondaryMap<Node, PackedOption<Node>> = SecondaryMap::new();
    place_early(g, &doms, &order, &mut early);
    let changed = place_late(g, &doms, &loops, &outs, &order, &early);
    if changed {
        log::debug!("code placement moved nodes");
        g.invalidate_all();
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::mode;
    use crate::ir::node::pn;
    use crate::ir::tarval::Tarval;

    /// A loop-invariant computation placed in the loop body moves out.
    #[test]
    fn invariant_hoisted_out_of_loop() {
        let mut g = Graph::new(None);
        let entry = g.start_block();
        let j0 = g.new_jmp(entry);
        let header = g.new_block_immature();
        g.add_block_pred(header, j0).unwrap();
        let sel = g.new_unknown(mode::B);
        let cond = g.new_cond(header, sel);
        let pt = g.new_proj(cond, pn::cond::TRUE, mode::X);
        let pf = g.new_proj(cond, pn::cond::FALSE, mode::X);
        let body = g.new_block(&[pt]);

        // x + 1 uses only loop-invariant operands but sits in the body.
        let x = g.new_unknown(mode::IS);
        let one = g.new_const(Tarval::new_int(mode::IS, 1));
        let inv = g.new_add(body, x, one, mode::IS);
        // A pinned consumer keeps it in the body's control region.
        let ptr = g.new_unknown(mode::P);
        let st = g.new_store(body, g.initial_mem(), ptr, inv);
        let stm = g.new_proj(st, pn::store::M, mode::M);
        let jb = g.new_jmp(body);
        g.add_block_pred(header, jb).unwrap();
        g.set_block_matured(header).unwrap();
        let exit = g.new_block(&[pf]);
        let ret = g.new_return(exit, stm, &[]);
        g.keep_alive(ret);

        place_code(&mut g);

        // The invariant Add now sits outside the loop.
        let placed = g.block_of(inv);
        assert!(placed == entry || placed == g.start_block());
    }
}
