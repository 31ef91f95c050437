//! The graph builder: SSA construction during translation.
//!
//! The protocol: the frontend keeps a cursor block, defines variables with
//! [`GraphBuilder::set_value`] and reads them with
//! [`GraphBuilder::get_value`]. Reading in a block with several
//! predecessors creates a Phi whose inputs are resolved by reading
//! recursively in the predecessors; reading in an immature block creates a
//! placeholder Phi completed at [`GraphBuilder::mature_block`] time. A Phi
//! whose inputs all coincide is replaced by that value, and the removal is
//! retried on every Phi that used it, so no Phi with all-identical inputs
//! survives construction.
//!
//! Memory is threaded through the same machinery as a hidden slot, read and
//! written with [`GraphBuilder::get_store`] / [`GraphBuilder::set_store`].

use crate::variable::Variable;
use firm_codegen::ir::graph::Graph;
use firm_codegen::ir::mode::{self, Mode};
use firm_codegen::ir::node::Attr;
use firm_codegen::ir::opcode::Op;
use firm_codegen::ir::Node;
use firm_codegen::FirmResult;
use std::collections::HashMap;

/// The hidden slot carrying the memory state.
const STORE_SLOT: u32 = u32::MAX - 1;

#[derive(Default)]
struct BlockInfo {
    /// Placeholder Phis awaiting the block's maturation.
    incomplete: Vec<(Variable, Node)>,
}

/// Builds one graph in SSA form.
pub struct GraphBuilder<'a> {
    graph: &'a mut Graph,
    /// The value dictionary: (block, slot) to current value.
    defs: HashMap<(Node, Variable), Node>,
    info: HashMap<Node, BlockInfo>,
    /// Phi nodes using a given Phi as input; consulted when a trivial Phi
    /// collapses so its users can be retried.
    phi_users: HashMap<Node, Vec<Node>>,
    cur: Node,
    next_var: u32,
}

impl<'a> GraphBuilder<'a> {
    /// Start building into `graph`. The cursor begins at the start block
    /// with the initial memory in the store slot.
    pub fn new(graph: &'a mut Graph) -> Self {
        let start_block = graph.start_block();
        let initial_mem = graph.initial_mem();
        let mut b = GraphBuilder {
            graph,
            defs: HashMap::new(),
            info: HashMap::new(),
            phi_users: HashMap::new(),
            cur: start_block,
            next_var: 0,
        };
        b.defs
            .insert((start_block, Variable::from_u32(STORE_SLOT)), initial_mem);
        b
    }

    /// The graph being built.
    pub fn graph(&mut self) -> &mut Graph {
        self.graph
    }

    /// Allocate a fresh variable slot.
    pub fn new_var(&mut self) -> Variable {
        let v = Variable::from_u32(self.next_var);
        self.next_var += 1;
        v
    }

    /// The cursor block.
    pub fn cur_block(&self) -> Node {
        self.cur
    }

    /// Move the cursor to `block`.
    pub fn set_cur_block(&mut self, block: Node) {
        self.cur = block;
    }

    /// Create an immature block; predecessors arrive via
    /// [`GraphBuilder::add_pred`].
    pub fn new_block(&mut self) -> Node {
        let b = self.graph.new_block_immature();
        self.info.insert(b, BlockInfo::default());
        b
    }

    /// Add a control predecessor to an immature block.
    pub fn add_pred(&mut self, block: Node, jmp: Node) -> FirmResult<()> {
        self.graph.add_block_pred(block, jmp)
    }

    /// Set the current value of `var` in the cursor block.
    pub fn set_value(&mut self, var: Variable, value: Node) {
        self.defs.insert((self.cur, var), value);
    }

    /// The value of `var` at the cursor, synthesizing Phis as needed.
    pub fn get_value(&mut self, var: Variable, m: Mode) -> Node {
        let block = self.cur;
        self.get_value_in(block, var, m)
    }

    /// The memory state at the cursor.
    pub fn get_store(&mut self) -> Node {
        self.get_value(Variable::from_u32(STORE_SLOT), mode::M)
    }

    /// Set the memory state at the cursor.
    pub fn set_store(&mut self, mem: Node) {
        self.set_value(Variable::from_u32(STORE_SLOT), mem);
    }

    fn get_value_in(&mut self, block: Node, var: Variable, m: Mode) -> Node {
        if let Some(&v) = self.defs.get(&(block, var)) {
            return self.graph.skip_id(v);
        }
        if !self.graph.is_matured(block) {
            // The predecessors are unknown: a placeholder Phi, patched when
            // the block matures.
            let phi = self.graph.add_raw(Op::Phi, m, Some(block), &[], Attr::None);
            log::trace!("deferred {} for {} in immature {}", phi, var, block);
            self.info
                .entry(block)
                .or_default()
                .incomplete
                .push((var, phi));
            self.defs.insert((block, var), phi);
            return phi;
        }
        let arity = self.graph.arity(block);
        let value = match arity {
            0 => self.graph.new_unknown(m),
            1 => {
                let pred = self.graph.cfg_pred_block(block, 0);
                if self.graph.op(pred) == Op::Block {
                    self.get_value_in(pred, var, m)
                } else {
                    self.graph.new_unknown(m)
                }
            }
            _ => {
                // Insert the Phi into the dictionary before recursing, so a
                // loop around this block reads the Phi itself.
                let phi = self.graph.add_raw(Op::Phi, m, Some(block), &[], Attr::None);
                self.defs.insert((block, var), phi);
                for i in 0..arity {
                    let pred = self.graph.cfg_pred_block(block, i);
                    let input = if self.graph.op(pred) == Op::Block {
                        self.get_value_in(pred, var, m)
                    } else {
                        self.graph.new_unknown(m)
                    };
                    self.graph.node_mut(phi).ins.push(input);
                    if self.graph.op(input) == Op::Phi {
                        self.phi_users.entry(input).or_default().push(phi);
                    }
                }
                self.try_remove_trivial_phi(phi)
            }
        };
        self.defs.insert((block, var), value);
        value
    }

    /// If every input of `phi` coincides with `phi` or one distinct value,
    /// replace the Phi by that value and retry its Phi users.
    fn try_remove_trivial_phi(&mut self, phi: Node) -> Node {
        if self.graph.op(phi) != Op::Phi {
            return self.graph.skip_id(phi);
        }
        let mut same: Option<Node> = None;
        for i in 0..self.graph.arity(phi) {
            let input = self.graph.in_at(phi, i);
            if input == phi {
                continue;
            }
            match same {
                None => same = Some(input),
                Some(v) if v == input => {}
                Some(_) => return phi,
            }
        }
        let m = self.graph.mode(phi);
        let value = match same {
            Some(v) => v,
            None => self.graph.new_unknown(m),
        };
        log::trace!("trivial {} collapsed to {}", phi, value);
        self.graph.exchange(phi, value);
        if let Some(users) = self.phi_users.remove(&phi) {
            for user in users {
                self.try_remove_trivial_phi(user);
            }
        }
        self.graph.skip_id(value)
    }

    /// Declare a block's predecessor list final and complete its deferred
    /// Phis.
    pub fn mature_block(&mut self, block: Node) -> FirmResult<()> {
        self.graph.set_block_matured(block)?;
        let incomplete = self
            .info
            .get_mut(&block)
            .map(|i| std::mem::take(&mut i.incomplete))
            .unwrap_or_default();
        log::trace!(
            "maturing {} with {} deferred Phis",
            block,
            incomplete.len()
        );
        let arity = self.graph.arity(block);
        for (var, phi) in incomplete {
            let m = self.graph.mode(phi);
            for i in 0..arity {
                let pred = self.graph.cfg_pred_block(block, i);
                let input = if self.graph.op(pred) == Op::Block {
                    self.get_value_in(pred, var, m)
                } else {
                    self.graph.new_unknown(m)
                };
                self.graph.node_mut(phi).ins.push(input);
                if self.graph.op(input) == Op::Phi {
                    self.phi_users.entry(input).or_default().push(phi);
                }
            }
            self.try_remove_trivial_phi(phi);
        }
        Ok(())
    }

    /// Finish construction of the graph.
    pub fn finalize(self) -> FirmResult<()> {
        self.graph.finalize_construction()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use firm_codegen::ir::node::pn;
    use firm_codegen::ir::tarval::{Relation, Tarval};
    use firm_codegen::ir::verify::verify_graph;

    fn int_const(g: &mut Graph, v: i64) -> Node {
        g.new_const(Tarval::new_int(mode::IS, v))
    }

    /// Straight-line redefinition needs no Phis at all.
    #[test]
    fn straight_line_values() {
        let mut g = Graph::new(None);
        let mut b = GraphBuilder::new(&mut g);
        let x = b.new_var();
        let c1 = int_const(b.graph(), 1);
        b.set_value(x, c1);
        assert_eq!(b.get_value(x, mode::IS), c1);
        let c2 = int_const(b.graph(), 2);
        b.set_value(x, c2);
        assert_eq!(b.get_value(x, mode::IS), c2);
        b.finalize().unwrap();
    }

    /// A diamond merges two definitions into one Phi.
    #[test]
    fn diamond_inserts_phi() {
        let mut g = Graph::new(None);
        let mut b = GraphBuilder::new(&mut g);
        let x = b.new_var();

        let entry = b.cur_block();
        let sel = b.graph().new_unknown(mode::B);
        let cond = b.graph().new_cond(entry, sel);
        let pt = b.graph().new_proj(cond, pn::cond::TRUE, mode::X);
        let pf = b.graph().new_proj(cond, pn::cond::FALSE, mode::X);

        let then_b = b.new_block();
        b.add_pred(then_b, pt).unwrap();
        b.mature_block(then_b).unwrap();
        b.set_cur_block(then_b);
        let c1 = int_const(b.graph(), 1);
        b.set_value(x, c1);
        let jt = b.graph().new_jmp(then_b);

        let else_b = b.new_block();
        b.add_pred(else_b, pf).unwrap();
        b.mature_block(else_b).unwrap();
        b.set_cur_block(else_b);
        let c2 = int_const(b.graph(), 2);
        b.set_value(x, c2);
        let je = b.graph().new_jmp(else_b);

        let join = b.new_block();
        b.add_pred(join, jt).unwrap();
        b.add_pred(join, je).unwrap();
        b.mature_block(join).unwrap();
        b.set_cur_block(join);

        let merged = b.get_value(x, mode::IS);
        assert_eq!(b.graph().op(merged), Op::Phi);
        assert_eq!(b.graph().arity(merged), 2);
        assert_eq!(b.graph().in_at(merged, 0), c1);
        assert_eq!(b.graph().in_at(merged, 1), c2);

        b.graph().keep_alive(merged);
        b.finalize().unwrap();
        assert!(verify_graph(&mut g).is_ok());
    }

    /// Equal definitions on both sides produce no Phi.
    #[test]
    fn trivial_phi_removed() {
        let mut g = Graph::new(None);
        let mut b = GraphBuilder::new(&mut g);
        let x = b.new_var();

        let entry = b.cur_block();
        let c = int_const(b.graph(), 7);
        b.set_value(x, c);
        let sel = b.graph().new_unknown(mode::B);
        let cond = b.graph().new_cond(entry, sel);
        let pt = b.graph().new_proj(cond, pn::cond::TRUE, mode::X);
        let pf = b.graph().new_proj(cond, pn::cond::FALSE, mode::X);

        let then_b = b.new_block();
        b.add_pred(then_b, pt).unwrap();
        b.mature_block(then_b).unwrap();
        b.set_cur_block(then_b);
        let jt = b.graph().new_jmp(then_b);

        let join = b.new_block();
        b.add_pred(join, jt).unwrap();
        b.add_pred(join, pf).unwrap();
        b.mature_block(join).unwrap();
        b.set_cur_block(join);

        // Both paths carry the same definition: no Phi survives.
        assert_eq!(b.get_value(x, mode::IS), c);
    }

    /// A while-loop: the placeholder Phi in the immature header is
    /// completed at maturation, and the loop variable ties back to it.
    #[test]
    fn loop_phis_resolved_at_maturation() {
        let mut g = Graph::new(None);
        let mut b = GraphBuilder::new(&mut g);
        let i_var = b.new_var();

        let entry = b.cur_block();
        let zero = int_const(b.graph(), 0);
        b.set_value(i_var, zero);
        let j0 = b.graph().new_jmp(entry);

        let header = b.new_block();
        b.add_pred(header, j0).unwrap();
        b.set_cur_block(header);

        // Read in the immature header: a placeholder Phi.
        let i_in_header = b.get_value(i_var, mode::IS);
        assert_eq!(b.graph().op(i_in_header), Op::Phi);

        let ten = int_const(b.graph(), 10);
        let cmp = b.graph().new_cmp(header, i_in_header, ten, Relation::LESS);
        let cond = b.graph().new_cond(header, cmp);
        let pt = b.graph().new_proj(cond, pn::cond::TRUE, mode::X);
        let pf = b.graph().new_proj(cond, pn::cond::FALSE, mode::X);

        let body = b.new_block();
        b.add_pred(body, pt).unwrap();
        b.mature_block(body).unwrap();
        b.set_cur_block(body);
        let one = int_const(b.graph(), 1);
        let i_cur = b.get_value(i_var, mode::IS);
        let next = b.graph().new_add(body, i_cur, one, mode::IS);
        b.set_value(i_var, next);
        let jb = b.graph().new_jmp(body);

        b.add_pred(header, jb).unwrap();
        b.mature_block(header).unwrap();

        let exit = b.new_block();
        b.add_pred(exit, pf).unwrap();
        b.mature_block(exit).unwrap();
        b.set_cur_block(exit);
        let result = b.get_value(i_var, mode::IS);
        b.graph().keep_alive(result);
        b.finalize().unwrap();

        // The header Phi now has both inputs: init and the incremented
        // value flowing around the loop.
        let phi = g.skip_id(i_in_header);
        assert_eq!(g.op(phi), Op::Phi);
        assert_eq!(g.arity(phi), 2);
        assert_eq!(g.in_at(phi, 0), zero);
        assert_eq!(g.skip_id(g.in_at(phi, 1)), g.skip_id(next));
        assert!(verify_graph(&mut g).is_ok());
    }
}
