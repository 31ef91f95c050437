//! The loop tree: nesting of natural loops, back-edge marking.
//!
//! A depth-first search over the control flow finds the back edges; each
//! back edge's natural loop is collected backwards from its source, loops
//! sharing a header are merged, and containment gives the nesting. Back
//! edges are recorded as per-edge bits on the header block's predecessor
//! array; Phi predecessor edges follow their block's bits.

use crate::ana::domtree::DomTree;
use crate::ir::entities::{LoopRef, Node};
use crate::ir::graph::{AnalysisState, Graph};
use crate::ir::opcode::Op;
use firm_entity::packed_option::PackedOption;
use firm_entity::{PrimaryMap, SecondaryMap};
use std::collections::{HashMap, HashSet};

/// One loop in the loop tree.
pub struct LoopData {
    /// The enclosing loop, if any.
    pub parent: PackedOption<LoopRef>,
    /// The loop header block.
    pub head: Node,
    /// Nesting depth; outermost loops have depth 1.
    pub depth: u32,
    /// The blocks belonging to this loop (including inner loops' blocks).
    pub blocks: Vec<Node>,
}

/// The loop forest of one graph.
pub struct LoopTree {
    loops: PrimaryMap<LoopRef, LoopData>,
    innermost: SecondaryMap<Node, PackedOption<LoopRef>>,
}

impl LoopTree {
    /// Compute the loop tree and mark back-edge bits on the blocks.
    pub fn compute(g: &mut Graph, doms: &DomTree) -> LoopTree {
        let blocks = g.reachable_blocks();

        // Find back edges: pred edge i of block b is a back edge iff b
        // dominates the edge's source block.
        let mut back_edges: Vec<(Node, usize, Node)> = Vec::new();
        for &b in &blocks {
            let arity = g.arity(b);
            let mut bits = vec![false; arity];
            for i in 0..arity {
                let src = g.cfg_pred_block(b, i);
                if g.op(src) == Op::Block && doms.is_reachable(src) && doms.dominates(b, src) {
                    bits[i] = true;
                    back_edges.push((b, i, src));
                }
            }
            g.node_mut(b).attr.block_mut().backedges = bits;
        }

        // Collect each header's natural loop body.
        let mut bodies: HashMap<Node, HashSet<Node>> = HashMap::new();
        for &(head, _i, src) in &back_edges {
            let body = bodies.entry(head).or_default();
            body.insert(head);
            let mut work = vec![src];
            while let Some(b) = work.pop() {
                if !body.insert(b) {
                    continue;
                }
                for j in 0..g.arity(b) {
                    let p = g.cfg_pred_block(b, j);
                    if g.op(p) == Op::Block && doms.is_reachable(p) && p != head {
                        work.push(p);
                    }
                }
            }
        }

        // Materialize loops, outermost (largest) first, then nest by
        // containment.
        let mut headers: Vec<Node> = bodies.keys().copied().collect();
        headers.sort_by_key(|h| std::cmp::Reverse(bodies[h].len()));
        let mut tree = LoopTree {
            loops: PrimaryMap::new(),
            innermost: SecondaryMap::new(),
        };
        for head in headers {
            let body = &bodies[&head];
            let parent = tree.innermost[head].expand();
            let depth = parent.map_or(1, |p| tree.loops[p].depth + 1);
            let mut blocks: Vec<Node> = body.iter().copied().collect();
            blocks.sort();
            let l = tree.loops.push(LoopData {
                parent: parent.into(),
                head,
                depth,
                blocks: blocks.clone(),
            });
            for b in blocks {
                tree.innermost[b] = PackedOption::from(l);
            }
        }

        g.loop_state = AnalysisState::Consistent;
        tree
    }

    /// The innermost loop containing `block`, if any.
    pub fn loop_of(&self, block: Node) -> Option<LoopRef> {
        self.innermost.get(block).and_then(|p| p.expand())
    }

    /// Loop nesting depth of `block`; 0 outside any loop.
    pub fn depth(&self, block: Node) -> u32 {
        self.loop_of(block).map_or(0, |l| self.loops[l].depth)
    }

    /// Data of a loop.
    pub fn data(&self, l: LoopRef) -> &LoopData {
        &self.loops[l]
    }

    /// Number of loops found.
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// Were any loops found at all?
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::mode;
    use crate::ir::node::pn;

    /// entry -> header <-> body, header -> exit
    fn build_loop(g: &mut Graph) -> (Node, Node, Node) {
        let entry = g.start_block();
        let j0 = g.new_jmp(entry);
        let header = g.new_block_immature();
        g.add_block_pred(header, j0).unwrap();
        let sel = g.new_unknown(mode::B);
        let cond = g.new_cond(header, sel);
        let pt = g.new_proj(cond, pn::cond::TRUE, mode::X);
        let pf = g.new_proj(cond, pn::cond::FALSE, mode::X);
        let body = g.new_block(&[pt]);
        let jb = g.new_jmp(body);
        g.add_block_pred(header, jb).unwrap();
        g.set_block_matured(header).unwrap();
        let exit = g.new_block(&[pf]);
        let je = g.new_jmp(exit);
        g.keep_alive(je);
        (header, body, exit)
    }

    #[test]
    fn single_loop_found() {
        let mut g = Graph::new(None);
        let (header, body, exit) = build_loop(&mut g);
        let doms = DomTree::compute(&mut g);
        let tree = LoopTree::compute(&mut g, &doms);

        assert_eq!(tree.len(), 1);
        assert_eq!(tree.depth(header), 1);
        assert_eq!(tree.depth(body), 1);
        assert_eq!(tree.depth(exit), 0);
        assert_eq!(tree.depth(g.start_block()), 0);

        // The edge from the body back to the header is marked.
        let bits = &g.node(header).attr.block().backedges;
        assert_eq!(bits.len(), 2);
        assert!(!bits[0]);
        assert!(bits[1]);
        assert_eq!(g.loop_state, AnalysisState::Consistent);
    }
}
