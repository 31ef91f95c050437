//! Dead-node elimination: copy the live subset to a fresh arena.
//!
//! A tri-color walk from `End` (including keep-alives) and the anchor marks
//! the reachable nodes; those are copied record-wise into a new arena, their
//! inputs rewired to the copies, and the graph's anchor points and value
//! table rebuilt. Stable indices are preserved for easier debugging. `Id`
//! forwardings are resolved away by the copy, so the new arena contains no
//! dead nodes and no forwarding chains.

use crate::dbg::{self, DbgAction};
use crate::ir::entities::Node;
use crate::ir::graph::{AnalysisState, Graph};
use crate::ir::node::NodeData;
use crate::ir::opcode::Op;
use firm_entity::packed_option::PackedOption;
use firm_entity::{PrimaryMap, SecondaryMap};

/// Copy the reachable part of `g` into a fresh arena.
pub fn dead_node_elimination(g: &mut Graph) {
    let order = g.reachable_postorder();
    let old_count = g.node_count();

    // First pass: allocate a copy of every reachable node. The link map
    // takes the role the per-node link field has in a pointer-based arena.
    let mut arena: PrimaryMap<Node, NodeData> = PrimaryMap::with_capacity(order.len());
    let mut link: SecondaryMap<Node, PackedOption<Node>> = SecondaryMap::new();
    for &n in &order {
        debug_assert!(g.op(n) != Op::Id, "Ids are never reachable");
        let mut data = g.node(n).clone();
        data.visited = 0;
        let copy = arena.push(data);
        link[n] = PackedOption::from(copy);
    }

    // Second pass: rewire inputs and block edges to the copies.
    let map = |link: &SecondaryMap<Node, PackedOption<Node>>, g: &Graph, n: Node| -> Node {
        link[g.skip_id(n)].expect("reachable node has a copy")
    };
    for &n in &order {
        let copy = link[n].unwrap();
        for pos in 0..arena[copy].ins.len() {
            let old = arena[copy].ins[pos];
            arena[copy].ins[pos] = map(&link, g, old);
        }
        if let Some(b) = arena[copy].block.expand() {
            arena[copy].block = PackedOption::from(map(&link, g, b));
        }
    }

    // Swap in the new arena and rebuild the anchor points.
    g.nodes = arena;
    g.remap_anchors(|n| link[n].expect("anchor is always reachable"));
    g.dom_state = AnalysisState::None;
    g.outs_state = AnalysisState::None;
    g.loop_state = AnalysisState::None;
    g.new_identities();

    dbg::opt_removed(DbgAction::DeadCode, Node::from_u32(0));
    log::debug!(
        "dead node elimination: {} of {} nodes survive",
        g.node_count(),
        old_count
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::mode;
    use crate::ir::tarval::Tarval;

    #[test]
    fn garbage_is_dropped() {
        let mut g = Graph::new(None);
        let block = g.start_block();
        let x = g.new_unknown(mode::IS);
        let one = g.new_const(Tarval::new_int(mode::IS, 1));
        let live = g.new_add(block, x, one, mode::IS);
        g.keep_alive(live);
        // Unreferenced garbage.
        let two = g.new_const(Tarval::new_int(mode::IS, 2));
        let _dead = g.new_mul(block, x, two, mode::IS);

        let before = g.node_count();
        dead_node_elimination(&mut g);
        assert!(g.node_count() < before);

        // The kept value is still reachable through End.
        let end = g.end();
        let kept = g.in_at(end, 0);
        assert_eq!(g.op(kept), crate::ir::opcode::Op::Add);
    }

    #[test]
    fn idempotent() {
        let mut g = Graph::new(None);
        let block = g.start_block();
        let x = g.new_unknown(mode::IS);
        let one = g.new_const(Tarval::new_int(mode::IS, 1));
        let live = g.new_add(block, x, one, mode::IS);
        g.keep_alive(live);

        dead_node_elimination(&mut g);
        let first: Vec<_> = g
            .all_nodes()
            .map(|n| (g.op(n), g.mode(n), g.ins(n).to_vec()))
            .collect();
        dead_node_elimination(&mut g);
        let second: Vec<_> = g
            .all_nodes()
            .map(|n| (g.op(n), g.mode(n), g.ins(n).to_vec()))
            .collect();
        assert_eq!(first, second);
    }
}
