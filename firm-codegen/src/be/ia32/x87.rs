//! The x87 stack simulation.
//!
//! Rewrites virtual floating-point instructions (over 8 virtual registers)
//! into concrete x87 stack-machine instructions with exact stack effects.
//! An abstract stack of (virtual register, producing value) pairs is
//! simulated through each block; `fxch`/`fld`/`fstp`/`ffreep` are inserted
//! as needed, binops pick one of their four concrete variants (normal /
//! reverse / popping / reverse-popping) from the operands' liveness, and
//! block boundaries are reconciled by minimal exchange sequences derived
//! from the permutation's cycle decomposition.
//!
//! Invariants: the stack depth stays within 0..=8, every call site sees an
//! empty stack, and a return sees exactly the function's float results.
//! Violations are compiler bugs and panic.

use crate::be::liveness::Liveness;
use crate::be::{FConst, MBlock, MInstData, MachFunction, MachOp, RegClass, VReg, X87Attr};
use firm_entity::{EntityRef, SecondaryMap};
use std::collections::HashMap;

/// One abstract stack slot.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
struct StEntry {
    /// The virtual x87 register index (the allocator's color).
    reg: u8,
    /// The value currently producing it.
    vreg: VReg,
}

/// The abstract stack; index 0 is st(0).
#[derive(Clone, Default, PartialEq, Eq, Debug)]
struct X87State {
    st: Vec<StEntry>,
}

impl X87State {
    fn depth(&self) -> usize {
        self.st.len()
    }

    fn index_of(&self, reg: u8) -> Option<usize> {
        self.st.iter().position(|e| e.reg == reg)
    }

    fn push(&mut self, reg: u8, vreg: VReg) {
        assert!(self.depth() < 8, "x87 stack overflow");
        self.st.insert(0, StEntry { reg, vreg });
    }

    fn pop(&mut self) -> StEntry {
        assert!(!self.st.is_empty(), "x87 stack underflow");
        self.st.remove(0)
    }

    fn fxch(&mut self, pos: usize) {
        self.st.swap(0, pos);
    }

    fn set_tos(&mut self, reg: u8, vreg: VReg) {
        self.st[0] = StEntry { reg, vreg };
    }
}

struct Sim<'a> {
    f: &'a mut MachFunction,
    live: Liveness,
    /// Opcode that defined each fp vreg, for constant recreation.
    def_op: HashMap<VReg, MachOp>,
    begin: SecondaryMap<MBlock, Option<X87State>>,
    n_float_results: u8,
}

/// Run the stack simulation over an ia32 function whose virtual registers
/// have been colored.
pub fn run(f: &mut MachFunction, unsafe_float: bool) {
    let live = Liveness::compute(f);
    let mut def_op = HashMap::new();
    for data in f.insts.values() {
        for &o in &data.outs {
            def_op.insert(o, data.op);
        }
    }
    let n_float_results = f.n_float_results;

    if unsafe_float {
        // Control-word stores are hoisted to the entry as placeholder
        // stubs; mode switches reload from the shared rounding entities.
        if let Some(&entry) = f.order.first() {
            f.insert_inst(entry, 0, MInstData::new(MachOp::FnstCwNop));
        }
    }

    let mut sim = Sim {
        f,
        live,
        def_op,
        begin: SecondaryMap::new(),
        n_float_results,
    };
    for bi in 0..sim.f.order.len() {
        let b = sim.f.order[bi];
        sim.simulate_block(b);
    }
}

impl<'a> Sim<'a> {
    fn color(&self, v: VReg) -> u8 {
        self.f.vregs[v].reg.expect("fp vreg is colored")
    }

    fn is_fp(&self, v: VReg) -> bool {
        self.f.vregs[v].class == RegClass::Fp
    }

    /// Is the value of `v` needed after position `pos` of `block`?
    fn live_after(&self, block: MBlock, pos: usize, v: VReg) -> bool {
        self.live.live_after(self.f, block, pos, v)
    }

    fn new_inst(&mut self, data: MInstData) -> crate::be::MInst {
        self.f.insts.push(data)
    }

    fn fxch_inst(&mut self, state: &mut X87State, pos: usize) -> crate::be::MInst {
        state.fxch(pos);
        let mut d = MInstData::new(MachOp::FXch);
        d.x87 = Some(X87Attr {
            pos: [pos as u8, 0, 0],
            pops: 0,
        });
        self.new_inst(d)
    }

    /// Duplicate st(pos) onto the top of the stack.
    fn fpush_inst(&mut self, state: &mut X87State, pos: usize) -> crate::be::MInst {
        let e = state.st[pos];
        state.push(e.reg, e.vreg);
        let mut d = MInstData::new(MachOp::FPushSt);
        d.x87 = Some(X87Attr {
            // The source slipped one position deeper by the push.
            pos: [(pos + 1) as u8, 0, 0],
            pops: 0,
        });
        self.new_inst(d)
    }

    fn fpop_inst(&mut self, state: &mut X87State) -> crate::be::MInst {
        state.pop();
        let mut d = MInstData::new(MachOp::FPop);
        d.x87 = Some(X87Attr {
            pos: [0, 0, 0],
            pops: 1,
        });
        self.new_inst(d)
    }

    /// The concrete form of a virtual binop.
    fn concrete_binop(op: MachOp, rev: bool, pop: bool) -> MachOp {
        match (op, rev, pop) {
            (MachOp::FvAdd, _, false) => MachOp::FAdd,
            (MachOp::FvAdd, _, true) => MachOp::FAddP,
            (MachOp::FvMul, _, false) => MachOp::FMul,
            (MachOp::FvMul, _, true) => MachOp::FMulP,
            (MachOp::FvSub, false, false) => MachOp::FSub,
            (MachOp::FvSub, true, false) => MachOp::FSubR,
            (MachOp::FvSub, false, true) => MachOp::FSubP,
            (MachOp::FvSub, true, true) => MachOp::FSubRP,
            (MachOp::FvDiv, false, false) => MachOp::FDiv,
            (MachOp::FvDiv, true, false) => MachOp::FDivR,
            (MachOp::FvDiv, false, true) => MachOp::FDivP,
            (MachOp::FvDiv, true, true) => MachOp::FDivRP,
            _ => panic!("not a virtual binop: {:?}", op),
        }
    }

    /// Reconcile `state` into `want` with exchanges. Entries are matched by
    /// virtual register index; surplus entries are popped first.
    fn shuffle(&mut self, state: &mut X87State, want: &X87State, out: &mut Vec<crate::be::MInst>) {
        // Pop values the successor does not expect.
        loop {
            let surplus = state
                .st
                .iter()
                .position(|e| want.index_of(e.reg).is_none());
            match surplus {
                Some(pos) => {
                    if pos != 0 {
                        let i = self.fxch_inst(state, pos);
                        out.push(i);
                    }
                    let i = self.fpop_inst(state);
                    out.push(i);
                }
                None => break,
            }
        }
        assert_eq!(
            state.depth(),
            want.depth(),
            "block boundary states disagree on live values"
        );
        // Cycle-wise exchange: put st(0) where it belongs, or break the
        // next unfinished cycle by bringing a misplaced entry up. A cycle
        // through the top costs |cycle|-1 exchanges, any other |cycle|+1.
        loop {
            let tos_reg = match state.st.first() {
                Some(e) => e.reg,
                None => break,
            };
            let tos_want = want.index_of(tos_reg).unwrap();
            if state.st[tos_want].reg != want.st[tos_want].reg || tos_want == 0 {
                if tos_want != 0 {
                    let i = self.fxch_inst(state, tos_want);
                    out.push(i);
                    continue;
                }
            }
            // Top is home; find any misplaced entry to start the next
            // cycle.
            match (1..state.depth()).find(|&i| state.st[i].reg != want.st[i].reg) {
                Some(pos) => {
                    let i = self.fxch_inst(state, pos);
                    out.push(i);
                }
                None => break,
            }
        }
        // Adopt the successor's value identities.
        for (e, w) in state.st.iter_mut().zip(&want.st) {
            debug_assert_eq!(e.reg, w.reg);
            e.vreg = w.vreg;
        }
    }

    fn simulate_block(&mut self, b: MBlock) {
        let mut state = self.begin[b].clone().unwrap_or_default();
        log::trace!("x87: block {} begin depth {}", b, state.depth());
        self.begin[b] = Some(state.clone());

        let old: Vec<crate::be::MInst> = self.f.blocks[b].insts.clone();
        let mut new: Vec<crate::be::MInst> = Vec::with_capacity(old.len());

        // Kill values dead on entry.
        loop {
            let dead = state.st.iter().position(|e| {
                !self.live.live_in(b).contains(e.vreg.index())
                    && !old.iter().any(|&i| self.f.insts[i].ins.contains(&e.vreg))
            });
            match dead {
                Some(pos) => {
                    if pos != 0 {
                        let i = self.fxch_inst(&mut state, pos);
                        new.push(i);
                    }
                    let mut d = MInstData::new(MachOp::FFreeP);
                    d.x87 = Some(X87Attr {
                        pos: [0, 0, 0],
                        pops: 1,
                    });
                    state.pop();
                    let i = self.new_inst(d);
                    new.push(i);
                }
                None => break,
            }
        }

        for (pos, &inst) in old.iter().enumerate() {
            self.simulate_inst(b, pos, inst, &mut state, &mut new);
            assert!(state.depth() <= 8, "x87 stack grew past 8 entries");
        }

        // Hand the end state to the successors; reconcile where a state is
        // already committed. Critical edges were split, so a block with a
        // committed successor has exactly that successor.
        let succs = self.f.blocks[b].succs.clone();
        for s in succs {
            match self.begin[s].clone() {
                None => self.begin[s] = Some(state.clone()),
                Some(want) => {
                    let mut fixes = Vec::new();
                    let mut st = state.clone();
                    self.shuffle(&mut st, &want, &mut fixes);
                    // Insert the exchanges before the terminator.
                    let term = new
                        .iter()
                        .position(|&i| self.f.insts[i].is_terminator())
                        .unwrap_or(new.len());
                    for (k, i) in fixes.into_iter().enumerate() {
                        new.insert(term + k, i);
                    }
                    state = st;
                }
            }
        }

        self.f.blocks[b].insts = new;
    }

    fn simulate_inst(
        &mut self,
        b: MBlock,
        pos: usize,
        inst: crate::be::MInst,
        state: &mut X87State,
        new: &mut Vec<crate::be::MInst>,
    ) {
        let data = self.f.insts[inst].clone();
        match data.op {
            MachOp::FvAdd | MachOp::FvSub | MachOp::FvMul | MachOp::FvDiv => {
                self.sim_binop(b, pos, inst, &data, state, new);
            }
            MachOp::FvLoad => {
                let out = data.outs[0];
                state.push(self.color(out), out);
                self.f.insts[inst].op = MachOp::FLd;
                new.push(inst);
            }
            MachOp::FvConst(fc) => {
                let out = data.outs[0];
                state.push(self.color(out), out);
                self.f.insts[inst].op = MachOp::FLdConst(fc);
                new.push(inst);
            }
            MachOp::FvStore => {
                let v = data.ins[0];
                let vpos = state.index_of(self.color(v)).expect("stored value on stack");
                if vpos != 0 {
                    let i = self.fxch_inst(state, vpos);
                    new.push(i);
                }
                let live = self.live_after(b, pos, v);
                // 80-bit stores have no non-popping form: store-and-pop,
                // then reload.
                if live && data.width == 80 {
                    self.f.insts[inst].op = MachOp::FStP;
                    self.f.insts[inst].x87 = Some(X87Attr { pos: [0, 0, 0], pops: 1 });
                    state.pop();
                    new.push(inst);
                    let mut reload = MInstData::new(MachOp::FLd);
                    reload.am = data.am.clone();
                    reload.width = data.width;
                    state.push(self.color(v), v);
                    let i = self.new_inst(reload);
                    new.push(i);
                } else if live {
                    self.f.insts[inst].op = MachOp::FSt;
                    self.f.insts[inst].x87 = Some(X87Attr { pos: [0, 0, 0], pops: 0 });
                    new.push(inst);
                } else {
                    self.f.insts[inst].op = MachOp::FStP;
                    self.f.insts[inst].x87 = Some(X87Attr { pos: [0, 0, 0], pops: 1 });
                    state.pop();
                    new.push(inst);
                }
            }
            MachOp::FvCmp => {
                let l = data.ins[0];
                let r = data.ins[1];
                let lpos = state.index_of(self.color(l)).expect("compare operand on stack");
                if lpos != 0 {
                    let i = self.fxch_inst(state, lpos);
                    new.push(i);
                }
                let rpos = state.index_of(self.color(r)).expect("compare operand on stack");
                let l_live = self.live_after(b, pos, l);
                let r_live = self.live_after(b, pos, r);
                // The flag-producing forms; pop what dies here.
                let op = if l_live { MachOp::FUcomI } else { MachOp::FUcomIP };
                self.f.insts[inst].op = op;
                self.f.insts[inst].x87 = Some(X87Attr {
                    pos: [rpos as u8, 0, 0],
                    pops: u8::from(!l_live),
                });
                if !l_live {
                    state.pop();
                }
                new.push(inst);
                if !r_live && l != r {
                    if let Some(rp) = state.index_of(self.color(r)) {
                        if rp != 0 {
                            let i = self.fxch_inst(state, rp);
                            new.push(i);
                        }
                        let i = self.fpop_inst(state);
                        new.push(i);
                    }
                }
            }
            MachOp::Copy if !data.ins.is_empty() && self.is_fp(data.ins[0]) => {
                let src = data.ins[0];
                let dst = data.outs[0];
                let spos = match state.index_of(self.color(src)) {
                    Some(p) => p,
                    None => panic!("x87 copy from a value not on the stack"),
                };
                if self.live_after(b, pos, src) {
                    // Recreate constants instead of duplicating the slot.
                    if let Some(MachOp::FvConst(fc) | MachOp::FLdConst(fc)) =
                        self.def_op.get(&src).copied()
                    {
                        state.push(self.color(dst), dst);
                        self.f.insts[inst].op = MachOp::FLdConst(fc);
                        new.push(inst);
                    } else {
                        let i = self.fpush_inst(state, spos);
                        new.push(i);
                        state.set_tos(self.color(dst), dst);
                        // The copy itself vanishes.
                    }
                } else {
                    // Rename in place, no code.
                    state.st[spos] = StEntry {
                        reg: self.color(dst),
                        vreg: dst,
                    };
                }
            }
            MachOp::Call => {
                assert_eq!(
                    state.depth(),
                    0,
                    "x87 stack must be empty at a call site"
                );
                new.push(inst);
                if let Some(&out) = data.outs.first() {
                    if self.is_fp(out) {
                        state.push(self.color(out), out);
                    }
                }
            }
            MachOp::Ret => {
                assert_eq!(
                    state.depth() as u8,
                    self.n_float_results,
                    "return expects exactly the float results on the stack"
                );
                if state.depth() > 0 {
                    let i = self.new_inst(MInstData::new(MachOp::Emms));
                    new.push(i);
                }
                state.st.clear();
                new.push(inst);
            }
            MachOp::Perm => {
                // Register permutations of other classes pass through; fp
                // perms are expressed as boundary shuffles instead.
                new.push(inst);
            }
            _ => {
                new.push(inst);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn sim_binop(
        &mut self,
        b: MBlock,
        pos: usize,
        inst: crate::be::MInst,
        data: &MInstData,
        state: &mut X87State,
        new: &mut Vec<crate::be::MInst>,
    ) {
        let (l, r) = (data.ins[0], data.ins[1]);
        let out = data.outs[0];
        let l_live = self.live_after(b, pos, l);
        let r_live = self.live_after(b, pos, r);

        let lpos = state.index_of(self.color(l)).expect("left operand on stack");
        let rpos = state.index_of(self.color(r)).expect("right operand on stack");

        if l_live && r_live {
            // Both survive: duplicate the left operand into a fresh slot.
            let i = self.fpush_inst(state, lpos);
            new.push(i);
            let other = state.index_of(self.color(r)).unwrap();
            self.f.insts[inst].op = Self::concrete_binop(data.op, false, false);
            self.f.insts[inst].x87 = Some(X87Attr {
                pos: [other as u8, 0, 0],
                pops: 0,
            });
            state.set_tos(self.color(out), out);
            new.push(inst);
        } else if !l_live && r_live {
            // The left operand dies: overwrite it in place at the top.
            if lpos != 0 {
                let i = self.fxch_inst(state, lpos);
                new.push(i);
            }
            let other = state.index_of(self.color(r)).unwrap();
            self.f.insts[inst].op = Self::concrete_binop(data.op, false, false);
            self.f.insts[inst].x87 = Some(X87Attr {
                pos: [other as u8, 0, 0],
                pops: 0,
            });
            state.set_tos(self.color(out), out);
            new.push(inst);
        } else if l_live && !r_live {
            // The right operand dies: compute into its slot at the top,
            // reversing the non-commutative forms.
            if rpos != 0 {
                let i = self.fxch_inst(state, rpos);
                new.push(i);
            }
            let other = state.index_of(self.color(l)).unwrap();
            self.f.insts[inst].op = Self::concrete_binop(data.op, true, false);
            self.f.insts[inst].x87 = Some(X87Attr {
                pos: [other as u8, 0, 0],
                pops: 0,
            });
            state.set_tos(self.color(out), out);
            new.push(inst);
        } else {
            // Both die: pop form computing into the remaining slot.
            if l == r {
                // Squaring a dead value: duplicate, popping form folds one.
                let i = self.fpush_inst(state, lpos);
                new.push(i);
            } else if lpos != 0 {
                let i = self.fxch_inst(state, lpos);
                new.push(i);
            }
            let other = state.index_of(self.color(r)).unwrap().max(1);
            self.f.insts[inst].op = Self::concrete_binop(data.op, true, true);
            self.f.insts[inst].x87 = Some(X87Attr {
                pos: [other as u8, 0, 0],
                pops: 1,
            });
            state.pop();
            let slot = state.index_of(self.color(if l == r { l } else { r })).unwrap();
            state.st[slot] = StEntry {
                reg: self.color(out),
                vreg: out,
            };
            new.push(inst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::be::{MachFunction, Target};

    fn fp(f: &mut MachFunction, color: u8) -> VReg {
        let v = f.new_vreg(RegClass::Fp);
        f.vregs[v].reg = Some(color);
        v
    }

    /// Scenario: stack [vf1, vf0] (vf1 on top), `vf2 = vfadd vf1, vf0`,
    /// both operands live after. Expected: a push of vf1, a non-popping
    /// fadd against st(2), and the result renamed at the top.
    #[test]
    fn binop_both_live_pushes() {
        let mut f = MachFunction::new("f", Target::Ia32);
        let b = f.new_block();
        let vf0 = fp(&mut f, 0);
        let vf1 = fp(&mut f, 1);
        let vf2 = fp(&mut f, 2);

        // Materialize the stack: vf0 then vf1 (vf1 at st(0)).
        f.push_inst(b, MInstData::new(MachOp::FvConst(FConst::Zero)).with_outs(&[vf0]));
        f.push_inst(b, MInstData::new(MachOp::FvConst(FConst::One)).with_outs(&[vf1]));
        f.push_inst(b, MInstData::new(MachOp::FvAdd).with_ins(&[vf1, vf0]).with_outs(&[vf2]));
        // Keep everything live past the add.
        f.push_inst(
            b,
            MInstData::new(MachOp::Keep).with_ins(&[vf0, vf1, vf2]),
        );
        f.n_float_results = 0;

        run(&mut f, false);

        let ops: Vec<MachOp> = f.blocks[b].insts.iter().map(|&i| f.insts[i].op).collect();
        let add_at = ops.iter().position(|&o| o == MachOp::FAdd).expect("fadd emitted");
        assert_eq!(ops[add_at - 1], MachOp::FPushSt, "operand duplicated first");
        let add_inst = f.blocks[b].insts[add_at];
        let attr = f.insts[add_inst].x87.unwrap();
        assert_eq!(attr.pos, [2, 0, 0]);
        assert_eq!(attr.pops, 0);
    }

    #[test]
    fn store_pops_dead_value() {
        let mut f = MachFunction::new("f", Target::Ia32);
        let b = f.new_block();
        let v = fp(&mut f, 0);
        f.push_inst(b, MInstData::new(MachOp::FvConst(FConst::One)).with_outs(&[v]));
        let mut st = MInstData::new(MachOp::FvStore).with_ins(&[v]);
        st.width = 64;
        f.push_inst(b, st);

        run(&mut f, false);
        let ops: Vec<MachOp> = f.blocks[b].insts.iter().map(|&i| f.insts[i].op).collect();
        assert!(ops.contains(&MachOp::FStP), "dead store pops");
    }

    #[test]
    #[should_panic(expected = "empty at a call site")]
    fn call_with_occupied_stack_panics() {
        let mut f = MachFunction::new("f", Target::Ia32);
        let b = f.new_block();
        let v = fp(&mut f, 0);
        f.push_inst(b, MInstData::new(MachOp::FvConst(FConst::One)).with_outs(&[v]));
        let mut call = MInstData::new(MachOp::Call);
        call.sym = Some("g".to_string());
        f.push_inst(b, call);
        f.push_inst(b, MInstData::new(MachOp::Keep).with_ins(&[v]));

        run(&mut f, false);
    }
}
