//! Dominator tree construction.
//!
//! Lengauer–Tarjan over the control-flow subgraph. Yields the immediate
//! dominator and dominator-tree depth per block. Blocks unreachable from
//! `Start` get no idom and depth -1. The graph records a validity flag
//! (`dom_state`) invalidated by control-flow edits; consumers recompute when
//! they find it inconsistent.

use crate::ir::entities::Node;
use crate::ir::graph::{AnalysisState, Graph};
use crate::ir::opcode::Op;
use firm_entity::packed_option::PackedOption;
use firm_entity::SecondaryMap;
use std::collections::HashMap;

/// The dominator tree of one graph.
pub struct DomTree {
    idom: SecondaryMap<Node, PackedOption<Node>>,
    depth: SecondaryMap<Node, i32>,
    pre_num: SecondaryMap<Node, u32>,
    entry: Node,
}

struct LtState {
    /// DFS number per block; usize::MAX for unreached.
    dfnum: HashMap<Node, usize>,
    vertex: Vec<Node>,
    parent: Vec<usize>,
    semi: Vec<usize>,
    ancestor: Vec<Option<usize>>,
    label: Vec<usize>,
    idom: Vec<Option<usize>>,
    samedom: Vec<Option<usize>>,
    bucket: Vec<Vec<usize>>,
}

impl LtState {
    fn ancestor_with_lowest_semi(&mut self, v: usize) -> usize {
        // Path compression.
        let mut path = Vec::new();
        let mut u = v;
        while let Some(a) = self.ancestor[u] {
            path.push(u);
            u = a;
        }
        // `u` is the tree root of the path; fold labels downward.
        let mut best = self.label[u];
        for &w in path.iter().rev() {
            if self.semi[self.label[w]] > self.semi[best] {
                self.label[w] = best;
            } else {
                best = self.label[w];
            }
            self.ancestor[w] = self.ancestor[u];
        }
        self.label[v]
    }

    fn link(&mut self, parent: usize, child: usize) {
        self.ancestor[child] = Some(parent);
    }
}

impl DomTree {
    /// Compute the dominator tree of `g` and mark its dom state consistent.
    pub fn compute(g: &mut Graph) -> DomTree {
        let blocks = g.reachable_blocks();
        let entry = g.start_block();

        // Successor lists from the predecessor arrays.
        let mut succs: HashMap<Node, Vec<Node>> = HashMap::new();
        for &b in &blocks {
            for i in 0..g.arity(b) {
                let p = g.cfg_pred_block(b, i);
                if g.op(p) == Op::Block {
                    succs.entry(p).or_default().push(b);
                }
            }
        }

        // DFS numbering from the entry.
        let mut st = LtState {
            dfnum: HashMap::new(),
            vertex: Vec::new(),
            parent: Vec::new(),
            semi: Vec::new(),
            ancestor: Vec::new(),
            label: Vec::new(),
            idom: Vec::new(),
            samedom: Vec::new(),
            bucket: Vec::new(),
        };
        let mut stack = vec![(entry, usize::MAX)];
        while let Some((b, parent)) = stack.pop() {
            if st.dfnum.contains_key(&b) {
                continue;
            }
            let n = st.vertex.len();
            st.dfnum.insert(b, n);
            st.vertex.push(b);
            st.parent.push(parent);
            st.semi.push(n);
            st.ancestor.push(None);
            st.label.push(n);
            st.idom.push(None);
            st.samedom.push(None);
            st.bucket.push(Vec::new());
            if let Some(ss) = succs.get(&b) {
                for &s in ss.iter().rev() {
                    if !st.dfnum.contains_key(&s) {
                        stack.push((s, n));
                    }
                }
            }
        }

        let count = st.vertex.len();
        // Semidominators and implicit idoms, highest DFS number first.
        for i in (1..count).rev() {
            let p = st.parent[i];
            let block = st.vertex[i];
            let mut s = p;
            for j in 0..g.arity(block) {
                let pred = g.cfg_pred_block(block, j);
                let Some(&v) = st.dfnum.get(&pred) else {
                    continue;
                };
                let s2 = if v <= i {
                    v
                } else {
                    let u = st.ancestor_with_lowest_semi(v);
                    st.semi[u]
                };
                if s2 < s {
                    s = s2;
                }
            }
            st.semi[i] = s;
            st.bucket[s].push(i);
            st.link(p, i);
            // Deferred idom computation for nodes whose semidominator is p.
            let pending = std::mem::take(&mut st.bucket[p]);
            for v in pending {
                let y = st.ancestor_with_lowest_semi(v);
                if st.semi[y] == st.semi[v] {
                    st.idom[v] = Some(st.semi[v]);
                } else {
                    st.samedom[v] = Some(y);
                }
            }
        }
        for i in 1..count {
            if let Some(s) = st.samedom[i] {
                st.idom[i] = st.idom[s];
            }
        }

        let mut tree = DomTree {
            idom: SecondaryMap::new(),
            depth: SecondaryMap::with_default(-1),
            pre_num: SecondaryMap::new(),
            entry,
        };
        tree.depth[entry] = 0;
        tree.pre_num[entry] = 0;
        for i in 1..count {
            let b = st.vertex[i];
            tree.pre_num[b] = i as u32;
            if let Some(d) = st.idom[i] {
                tree.idom[b] = PackedOption::from(st.vertex[d]);
            } else {
                tree.idom[b] = PackedOption::from(entry);
            }
        }
        // Depths top-down; DFS numbers increase along tree paths only for
        // the spanning tree, so iterate until settled.
        let mut changed = true;
        while changed {
            changed = false;
            for i in 1..count {
                let b = st.vertex[i];
                if let Some(d) = tree.idom[b].expand() {
                    let dd = tree.depth[d];
                    if dd >= 0 && tree.depth[b] != dd + 1 {
                        tree.depth[b] = dd + 1;
                        changed = true;
                    }
                }
            }
        }

        g.dom_state = AnalysisState::Consistent;
        tree
    }

    /// The entry block.
    pub fn entry(&self) -> Node {
        self.entry
    }

    /// The immediate dominator of `b`, or `None` for the entry and
    /// unreachable blocks.
    pub fn idom(&self, b: Node) -> Option<Node> {
        if b == self.entry {
            return None;
        }
        self.idom[b].expand()
    }

    /// Dominator-tree depth of `b`; -1 for unreachable blocks.
    pub fn depth(&self, b: Node) -> i32 {
        self.depth[b]
    }

    /// Is `b` reachable from the entry?
    pub fn is_reachable(&self, b: Node) -> bool {
        self.depth[b] >= 0
    }

    /// DFS pre-order number of `b`.
    pub fn pre_num(&self, b: Node) -> u32 {
        self.pre_num[b]
    }

    /// Does `a` dominate `b`? Every block dominates itself.
    pub fn dominates(&self, a: Node, b: Node) -> bool {
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.idom(cur) {
                Some(d) => cur = d,
                None => return false,
            }
        }
    }

    /// The deepest block dominating both `a` and `b`.
    pub fn deepest_common_dominator(&self, a: Node, b: Node) -> Node {
        let (mut a, mut b) = (a, b);
        while a != b {
            while self.depth(a) > self.depth(b) {
                a = self.idom(a).expect("no common dominator");
            }
            while self.depth(b) > self.depth(a) {
                b = self.idom(b).expect("no common dominator");
            }
            if a != b {
                a = self.idom(a).expect("no common dominator");
                b = self.idom(b).expect("no common dominator");
            }
        }
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::mode;
    use crate::ir::node::pn;

    /// Build a diamond: entry -> (then | else) -> join.
    fn diamond(g: &mut Graph) -> (Node, Node, Node, Node) {
        let entry = g.start_block();
        let sel = g.new_unknown(mode::B);
        let cond = g.new_cond(entry, sel);
        let pt = g.new_proj(cond, pn::cond::TRUE, mode::X);
        let pf = g.new_proj(cond, pn::cond::FALSE, mode::X);
        let then_b = g.new_block(&[pt]);
        let else_b = g.new_block(&[pf]);
        let jt = g.new_jmp(then_b);
        let je = g.new_jmp(else_b);
        let join = g.new_block(&[jt, je]);
        let jmp_end = g.new_jmp(join);
        g.keep_alive(jmp_end);
        (entry, then_b, else_b, join)
    }

    #[test]
    fn diamond_dominators() {
        let mut g = Graph::new(None);
        let (entry, then_b, else_b, join) = diamond(&mut g);
        let tree = DomTree::compute(&mut g);

        assert_eq!(tree.idom(entry), None);
        assert_eq!(tree.idom(then_b), Some(entry));
        assert_eq!(tree.idom(else_b), Some(entry));
        assert_eq!(tree.idom(join), Some(entry));

        assert!(tree.dominates(entry, join));
        assert!(!tree.dominates(then_b, join));
        assert!(tree.dominates(join, join));

        // idom strictly dominates, depth decreases by one.
        for b in [then_b, else_b, join] {
            let d = tree.idom(b).unwrap();
            assert!(tree.dominates(d, b));
            assert_eq!(tree.depth(d), tree.depth(b) - 1);
        }
        assert_eq!(g.dom_state, AnalysisState::Consistent);
    }

    #[test]
    fn loop_dominators() {
        let mut g = Graph::new(None);
        let entry = g.start_block();
        let j0 = g.new_jmp(entry);
        let header = g.new_block_immature(); // header: entry + backedge
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

        let tree = DomTree::compute(&mut g);
        assert_eq!(tree.idom(header), Some(entry));
        assert_eq!(tree.idom(body), Some(header));
        assert_eq!(tree.idom(exit), Some(header));
        assert_eq!(tree.deepest_common_dominator(body, exit), header);
        // The back edge does not disturb the tree: the header still
        // strictly dominates the body it receives the edge from.
        assert!(tree.dominates(header, body));
        assert_eq!(tree.depth(body), tree.depth(header) + 1);
    }

    #[test]
    fn unreachable_blocks_have_no_depth() {
        let mut g = Graph::new(None);
        let dead = g.new_block(&[]);
        let tree = DomTree::compute(&mut g);
        assert_eq!(tree.depth(dead), -1);
        assert!(!tree.is_reachable(dead));
    }
}
