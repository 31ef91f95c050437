//! The retarget pass: rewrite generic IR into target instructions.
//!
//! A pre-order walk over the scheduled blocks dispatches every node to the
//! target's transform function, which appends machine instructions to the
//! current block and records which virtual register now holds each value.
//! Calling-convention lowering materializes register parameters and returns
//! through explicit `Copy` instructions to color-constrained virtual
//! registers, and brackets calls with stack adjustment.
//!
//! Critical edges are split before anything else: later passes (the x87
//! shuffle in particular) need a unique insertion point per control-flow
//! edge.

use crate::ana::outedges::OutEdges;
use crate::be::sched::Schedule;
use crate::be::{
    ia32, sparc, MBlock, MInst, MInstData, MachFunction, MachOp, RegClass, Target, VReg,
};
use crate::ir::entities::Node;
use crate::ir::graph::Graph;
use crate::ir::mode;
use crate::ir::opcode::Op;
use crate::ir::types::TypeRegistry;
use crate::result::{FirmError, FirmResult};
use firm_entity::packed_option::PackedOption;
use firm_entity::SecondaryMap;
use std::collections::HashSet;

/// Split critical edges: an edge from a multi-successor block into a
/// multi-predecessor block gets an intermediate block holding one `Jmp`.
pub fn split_critical_edges(g: &mut Graph) -> bool {
    // Successor counts per block.
    let blocks = g.reachable_blocks();
    let mut n_succs: SecondaryMap<Node, u32> = SecondaryMap::new();
    for &b in &blocks {
        for i in 0..g.arity(b) {
            let src = g.cfg_pred_block(b, i);
            if g.op(src) == Op::Block {
                n_succs[src] += 1;
            }
        }
    }
    let mut changed = false;
    for &b in &blocks {
        if g.arity(b) < 2 {
            continue;
        }
        for i in 0..g.arity(b) {
            let pred = g.in_at(b, i);
            if g.op(pred) == Op::Bad {
                continue;
            }
            let src = g.cfg_pred_block(b, i);
            if g.op(src) != Op::Block || n_succs[src] < 2 {
                continue;
            }
            let nb = g.new_block(&[pred]);
            let jmp = g.new_jmp(nb);
            g.set_in(b, i, jmp);
            changed = true;
        }
    }
    if changed {
        g.invalidate_all();
        log::debug!("split critical edges");
    }
    changed
}

/// Shared state of one transform run.
pub struct TransformCtx<'a> {
    /// The source graph.
    pub g: &'a Graph,
    /// The type repository, for entity names and offsets.
    pub types: &'a TypeRegistry,
    /// The function being built.
    pub f: MachFunction,
    /// Reverse edges of the source graph.
    pub outs: &'a OutEdges,
    /// IR block to machine block.
    pub block_map: SecondaryMap<Node, PackedOption<MBlock>>,
    /// IR value to virtual register.
    pub vreg_map: SecondaryMap<Node, PackedOption<VReg>>,
    /// IR node to the instruction that produced its value.
    pub inst_map: SecondaryMap<Node, PackedOption<MInst>>,
    /// Nodes folded into another instruction (address modes); skipped when
    /// their own turn comes.
    pub matched: HashSet<Node>,
    /// The block currently being filled.
    pub cur: MBlock,
}

impl<'a> TransformCtx<'a> {
    /// The virtual register holding `n`'s value, allocating one for
    /// placeholder values.
    pub fn vreg(&mut self, n: Node) -> FirmResult<VReg> {
        let n = self.g.skip_id(n);
        if let Some(v) = self.vreg_map[n].expand() {
            return Ok(v);
        }
        if self.g.op(n) == Op::Unknown {
            let class = class_of_mode(self.g, n);
            let v = self.f.new_vreg(class);
            self.vreg_map[n] = PackedOption::from(v);
            return Ok(v);
        }
        Err(FirmError::UnsupportedPattern {
            node: n,
            op: self.g.op(n).name(),
        })
    }

    /// Allocate the result register of `n`.
    pub fn def(&mut self, n: Node, class: RegClass) -> VReg {
        let v = self.f.new_vreg(class);
        self.vreg_map[n] = PackedOption::from(v);
        v
    }

    /// Record that `n`'s value lives in an existing register.
    pub fn alias(&mut self, n: Node, v: VReg) {
        self.vreg_map[n] = PackedOption::from(v);
    }

    /// Append an instruction to the current block and remember it as `n`'s
    /// definition site.
    pub fn emit_for(&mut self, n: Node, data: MInstData) -> MInst {
        let i = self.f.push_inst(self.cur, data);
        self.inst_map[n] = PackedOption::from(i);
        i
    }

    /// Append an instruction to the current block.
    pub fn emit(&mut self, data: MInstData) -> MInst {
        self.f.push_inst(self.cur, data)
    }

    /// The machine block of an IR block.
    pub fn mblock(&self, ir_block: Node) -> MBlock {
        self.block_map[ir_block].expect("IR block has a machine block")
    }

    /// The block a control-flow node `c` jumps to: the unique block listing
    /// `c` as predecessor.
    pub fn control_target(&self, c: Node) -> FirmResult<MBlock> {
        for &(user, _) in self.outs.outs(c) {
            if self.g.op(user) == Op::Block {
                return Ok(self.mblock(user));
            }
        }
        Err(FirmError::UnsupportedPattern {
            node: c,
            op: "dangling control edge",
        })
    }

    /// Retract a previously emitted instruction: its node got folded into
    /// an address mode or a combined memory-destination form after the
    /// fact.
    pub fn unemit(&mut self, n: Node) {
        if let Some(i) = self.inst_map[n].take() {
            for bd in self.f.blocks.values_mut() {
                if let Some(p) = bd.insts.iter().position(|&x| x == i) {
                    bd.insts.remove(p);
                    break;
                }
            }
        }
    }

    /// Does `n` have exactly one user besides keep-alive edges?
    pub fn single_user(&self, n: Node) -> bool {
        self.outs
            .outs(n)
            .iter()
            .filter(|&&(u, _)| self.g.op(u) != Op::End && self.g.op(u) != Op::Anchor)
            .count()
            == 1
    }
}

/// The register class a node's mode maps to.
pub fn class_of_mode(g: &Graph, n: Node) -> RegClass {
    let m = g.mode(n);
    if m.is_float() {
        RegClass::Fp
    } else if m == mode::B {
        RegClass::Flags
    } else {
        RegClass::Gp
    }
}

/// Blocks in reverse postorder over the control flow, entry first.
fn block_order(g: &mut Graph) -> Vec<Node> {
    let blocks = g.reachable_blocks();
    let mut succs: SecondaryMap<Node, Vec<Node>> = SecondaryMap::new();
    for &b in &blocks {
        for i in 0..g.arity(b) {
            let src = g.cfg_pred_block(b, i);
            if g.op(src) == Op::Block {
                succs[src].push(b);
            }
        }
    }
    let mut post = Vec::new();
    let mut seen: HashSet<Node> = HashSet::new();
    let entry = g.start_block();
    let mut stack: Vec<(Node, usize)> = vec![(entry, 0)];
    seen.insert(entry);
    while let Some(&(b, i)) = stack.last() {
        let ss = &succs[b];
        if i < ss.len() {
            stack.last_mut().unwrap().1 += 1;
            let s = ss[i];
            if seen.insert(s) {
                stack.push((s, 0));
            }
        } else {
            stack.pop();
            post.push(b);
        }
    }
    post.reverse();
    post
}

/// Transform `g` into a machine function for `target`.
///
/// The graph must be finalized; critical edges are split and a schedule is
/// computed here.
pub fn transform_graph(
    g: &mut Graph,
    types: &TypeRegistry,
    name: &str,
    target: Target,
) -> FirmResult<MachFunction> {
    if target == Target::Arm {
        return Err(FirmError::Kind("the arm backend is not built in"));
    }
    split_critical_edges(g);
    let schedule = Schedule::compute(g);
    let order = block_order(g);
    let outs = OutEdges::compute(g);

    let mut ctx = TransformCtx {
        g,
        types,
        f: MachFunction::new(name, target),
        outs: &outs,
        block_map: SecondaryMap::new(),
        vreg_map: SecondaryMap::new(),
        inst_map: SecondaryMap::new(),
        matched: HashSet::new(),
        cur: MBlock::from_u32(0),
    };

    for &b in &order {
        let mb = ctx.f.new_block();
        ctx.block_map[b] = PackedOption::from(mb);
    }
    // Machine CFG edges mirror the IR ones.
    for &b in &order {
        for i in 0..ctx.g.arity(b) {
            let src = ctx.g.cfg_pred_block(b, i);
            if ctx.g.op(src) == Op::Block {
                let (from, to) = (ctx.mblock(src), ctx.mblock(b));
                ctx.f.add_edge(from, to);
            }
        }
    }

    // Pre-order over the blocks, nodes in schedule order.
    let mut phis: Vec<Node> = Vec::new();
    for &b in &order {
        ctx.cur = ctx.mblock(b);
        for &n in schedule.of(b) {
            if ctx.matched.contains(&n) {
                continue;
            }
            if ctx.g.op(n) == Op::Phi {
                if ctx.g.mode(n).is_datab() {
                    let class = class_of_mode(ctx.g, n);
                    ctx.def(n, class);
                    phis.push(n);
                }
                continue;
            }
            match target {
                Target::Ia32 => ia32::transform::gen_node(&mut ctx, n)?,
                Target::Sparc => sparc::gen_node(&mut ctx, n)?,
                Target::Arm => unreachable!(),
            }
        }
    }

    // Phi operands become copies at the end of each predecessor.
    for phi in phis {
        let dst = ctx.vreg_map[phi].expect("phi got a register");
        let block = ctx.g.block_of(phi);
        for i in 0..ctx.g.arity(phi) {
            let pred = ctx.g.cfg_pred_block(block, i);
            if ctx.g.op(pred) != Op::Block {
                continue;
            }
            let src = ctx.vreg(ctx.g.in_at(phi, i))?;
            let mb = ctx.mblock(pred);
            ctx.f.insert_before_terminator(
                mb,
                MInstData::new(MachOp::Copy).with_ins(&[src]).with_outs(&[dst]),
            );
        }
    }

    Ok(ctx.f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::pn;

    #[test]
    fn critical_edges_get_split() {
        let mut g = Graph::new(None);
        let entry = g.start_block();
        let sel = g.new_unknown(mode::B);
        let cond = g.new_cond(entry, sel);
        let pt = g.new_proj(cond, pn::cond::TRUE, mode::X);
        let pf = g.new_proj(cond, pn::cond::FALSE, mode::X);
        // pf goes straight into a merge block: entry has two successors,
        // the merge has two predecessors, so this edge is critical.
        let then_b = g.new_block(&[pt]);
        let jt = g.new_jmp(then_b);
        let merge = g.new_block(&[jt, pf]);
        let jm = g.new_jmp(merge);
        g.keep_alive(jm);

        assert!(split_critical_edges(&mut g));
        // The critical edge now runs through a fresh block ending in a Jmp.
        let fixed_pred = g.in_at(merge, 1);
        assert_eq!(g.op(fixed_pred), Op::Jmp);
        let via = g.block_of(fixed_pred);
        assert_eq!(g.op(g.in_at(via, 0)), Op::Proj);
    }
}
