//! The SPARC backend: a leaf-procedure V8 subset with delay-slot filling.
//!
//! Arguments arrive in `%o0`–`%o5`, results leave in `%o0`, locals use the
//! `%l` registers; no register window is allocated. The interesting part
//! lives in [`fill_delay_slots`]: every control transfer has a delay slot,
//! and the filler hunts the schedule for an instruction that can legally
//! move into it before falling back to a `nop`.

pub mod emit;

use crate::be::transform::TransformCtx;
use crate::be::{AmAttr, CondCode, MInst, MInstData, MachFunction, MachOp, RegClass, VReg};
use crate::ir::entities::Node;
use crate::ir::node::{pn, Attr, SymConst};
use crate::ir::opcode::Op;
use crate::ir::tarval::Relation;
use crate::result::{FirmError, FirmResult};
use firm_entity::packed_option::PackedOption;
use firm_entity::SecondaryMap;
use smallvec::SmallVec;
use std::collections::HashSet;

/// The processor variants selectable with `-mcpu=`.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum SparcCpu {
    /// Plain SPARC V8.
    #[default]
    V8,
    /// LEON: conservative scheduling, no annulled fillers.
    Leon,
    /// HyperSPARC.
    HyperSparc,
    /// SuperSPARC.
    SuperSparc,
}

impl SparcCpu {
    /// Parse a `-mcpu=` argument.
    pub fn parse(s: &str) -> Option<SparcCpu> {
        match s {
            "v8" => Some(SparcCpu::V8),
            "leon" => Some(SparcCpu::Leon),
            "hypersparc" => Some(SparcCpu::HyperSparc),
            "supersparc" => Some(SparcCpu::SuperSparc),
            _ => None,
        }
    }

    /// May the filler steal from a branch target with the annul bit set?
    pub fn annul_filler(self) -> bool {
        matches!(self, SparcCpu::HyperSparc | SparcCpu::SuperSparc)
    }
}

/// Register names per color: `%o0`-`%o5`, then `%l0`-`%l7`.
pub fn gp_name(color: u8) -> String {
    if color < 6 {
        format!("o{}", color)
    } else {
        format!("l{}", color - 6)
    }
}

fn unsupported(ctx: &TransformCtx, n: Node) -> FirmError {
    FirmError::UnsupportedPattern {
        node: n,
        op: ctx.g.op(n).name(),
    }
}

fn const_i64(ctx: &TransformCtx, n: Node) -> Option<i64> {
    if ctx.g.op(n) == Op::Const {
        Some(ctx.g.node(n).attr.tarval().as_i64())
    } else {
        None
    }
}

fn cc_of(relation: Relation, signed: bool) -> Option<CondCode> {
    if relation == Relation::EQUAL {
        Some(CondCode::Eq)
    } else if relation == Relation::LESS_GREATER {
        Some(CondCode::Ne)
    } else if relation == Relation::LESS {
        Some(if signed { CondCode::Lt } else { CondCode::B })
    } else if relation == Relation::LESS_EQUAL {
        Some(if signed { CondCode::Le } else { CondCode::Be })
    } else if relation == Relation::GREATER {
        Some(if signed { CondCode::Gt } else { CondCode::A })
    } else if relation == Relation::GREATER_EQUAL {
        Some(if signed { CondCode::Ge } else { CondCode::Ae })
    } else {
        None
    }
}

/// SPARC addressing is register plus a 13-bit displacement.
fn make_am(ctx: &mut TransformCtx, ptr: Node) -> FirmResult<(AmAttr, SmallVec<[VReg; 2]>)> {
    let g = ctx.g;
    let mut am = AmAttr {
        scale: 1,
        ..AmAttr::default()
    };
    let mut base = ptr;
    loop {
        match g.op(base) {
            Op::Add => {
                if let Some(c) = const_i64(ctx, g.in_at(base, 1)) {
                    am.disp += c as i32;
                    if ctx.single_user(base) {
                        ctx.matched.insert(base);
                        ctx.unemit(base);
                    }
                    base = g.in_at(base, 0);
                } else {
                    break;
                }
            }
            Op::Sel => {
                let ent = match &g.node(base).attr {
                    Attr::Sel(e) => *e,
                    _ => break,
                };
                am.disp += ctx.types.entity(ent).offset.max(0);
                if ctx.single_user(base) {
                    ctx.matched.insert(base);
                    ctx.unemit(base);
                }
                base = g.in_at(base, 0);
            }
            _ => break,
        }
    }
    let mut regs: SmallVec<[VReg; 2]> = SmallVec::new();
    am.base = true;
    regs.push(ctx.vreg(base)?);
    Ok((am, regs))
}

fn binop_op(op: Op) -> Option<MachOp> {
    match op {
        Op::Add => Some(MachOp::Add),
        Op::Sub => Some(MachOp::Sub),
        Op::Mul => Some(MachOp::Mul),
        Op::And => Some(MachOp::And),
        Op::Or => Some(MachOp::Or),
        Op::Eor => Some(MachOp::Xor),
        Op::Shl => Some(MachOp::Shl),
        Op::Shr => Some(MachOp::Shr),
        Op::Shrs => Some(MachOp::Sar),
        _ => None,
    }
}

/// Transform one node into SPARC instructions.
pub fn gen_node(ctx: &mut TransformCtx, n: Node) -> FirmResult<()> {
    let g = ctx.g;
    match g.op(n) {
        Op::Start | Op::End | Op::Bad | Op::Unknown | Op::NoMem | Op::Sync | Op::Tuple
        | Op::Id | Op::Anchor => Ok(()),
        Op::Const => {
            if g.mode(n).is_float() {
                return Err(unsupported(ctx, n));
            }
            let out = ctx.def(n, RegClass::Gp);
            ctx.emit_for(
                n,
                MInstData::new(MachOp::MovImm)
                    .with_outs(&[out])
                    .with_imm(g.node(n).attr.tarval().as_i64()),
            );
            Ok(())
        }
        Op::SymConst => {
            if let Attr::SymConst(SymConst::Addr(e)) = g.node(n).attr.clone() {
                let out = ctx.def(n, RegClass::Gp);
                let mut data = MInstData::new(MachOp::MovImm).with_outs(&[out]);
                data.sym = Some(ctx.types.entity_name(e).to_string());
                ctx.emit_for(n, data);
                Ok(())
            } else {
                Err(unsupported(ctx, n))
            }
        }
        Op::Add | Op::Sub | Op::Mul | Op::And | Op::Or | Op::Eor | Op::Shl | Op::Shr
        | Op::Shrs => {
            if g.mode(n).is_float() {
                return Err(unsupported(ctx, n));
            }
            let mach = binop_op(g.op(n)).ok_or_else(|| unsupported(ctx, n))?;
            let l = ctx.vreg(g.in_at(n, 0))?;
            let out = ctx.def(n, RegClass::Gp);
            let mut data = MInstData::new(mach).with_outs(&[out]);
            if let Some(c) = const_i64(ctx, g.in_at(n, 1)) {
                data.ins = SmallVec::from_slice(&[l]);
                data.imm = Some(c);
            } else {
                let r = ctx.vreg(g.in_at(n, 1))?;
                data.ins = SmallVec::from_slice(&[l, r]);
            }
            ctx.emit_for(n, data);
            Ok(())
        }
        Op::Minus => {
            let v = ctx.vreg(g.in_at(n, 0))?;
            let out = ctx.def(n, RegClass::Gp);
            ctx.emit_for(n, MInstData::new(MachOp::Neg).with_ins(&[v]).with_outs(&[out]));
            Ok(())
        }
        Op::Not => {
            let v = ctx.vreg(g.in_at(n, 0))?;
            let out = ctx.def(n, RegClass::Gp);
            ctx.emit_for(n, MInstData::new(MachOp::Not).with_ins(&[v]).with_outs(&[out]));
            Ok(())
        }
        Op::Conv => {
            let src = g.in_at(n, 0);
            let (from, to) = (g.mode(src), g.mode(n));
            if from.is_int() && to.is_int() {
                if to.bits() <= from.bits() {
                    let v = ctx.vreg(src)?;
                    ctx.alias(n, v);
                } else if from.is_signed() {
                    // sll/sra pair sign-extends.
                    let v = ctx.vreg(src)?;
                    let t = ctx.f.new_vreg(RegClass::Gp);
                    let sh = (32 - from.bits()) as i64;
                    ctx.emit(MInstData::new(MachOp::Shl).with_ins(&[v]).with_outs(&[t]).with_imm(sh));
                    let out = ctx.def(n, RegClass::Gp);
                    ctx.emit_for(
                        n,
                        MInstData::new(MachOp::Sar).with_ins(&[t]).with_outs(&[out]).with_imm(sh),
                    );
                } else {
                    let v = ctx.vreg(src)?;
                    let out = ctx.def(n, RegClass::Gp);
                    let mask = (1i64 << from.bits()) - 1;
                    ctx.emit_for(
                        n,
                        MInstData::new(MachOp::And).with_ins(&[v]).with_outs(&[out]).with_imm(mask),
                    );
                }
                Ok(())
            } else {
                Err(unsupported(ctx, n))
            }
        }
        Op::Cmp => {
            let l = ctx.vreg(g.in_at(n, 0))?;
            let out = ctx.def(n, RegClass::Flags);
            let mut data = MInstData::new(MachOp::Cmp).with_outs(&[out]);
            if let Some(c) = const_i64(ctx, g.in_at(n, 1)) {
                data.ins = SmallVec::from_slice(&[l]);
                data.imm = Some(c);
            } else {
                let r = ctx.vreg(g.in_at(n, 1))?;
                data.ins = SmallVec::from_slice(&[l, r]);
            }
            ctx.emit_for(n, data);
            Ok(())
        }
        Op::Cond => {
            let sel = g.in_at(n, 0);
            if g.op(sel) != Op::Cmp {
                return Err(unsupported(ctx, n));
            }
            let signed = g.mode(g.in_at(sel, 0)).is_signed();
            let cc =
                cc_of(g.node(sel).attr.relation(), signed).ok_or_else(|| unsupported(ctx, sel))?;
            let flags = ctx.vreg(sel)?;
            let mut tp = None;
            let mut fp = None;
            for &(u, _) in ctx.outs.outs(n) {
                if g.op(u) == Op::Proj {
                    match g.node(u).attr.proj() {
                        pn::cond::TRUE => tp = Some(u),
                        pn::cond::FALSE => fp = Some(u),
                        _ => {}
                    }
                }
            }
            let (tp, fp) = match (tp, fp) {
                (Some(t), Some(f)) => (t, f),
                _ => return Err(unsupported(ctx, n)),
            };
            let t_block = ctx.control_target(tp)?;
            let f_block = ctx.control_target(fp)?;
            let mut bcc = MInstData::new(MachOp::Bcc).with_ins(&[flags]);
            bcc.cond = Some(cc);
            bcc.target = Some(t_block);
            ctx.emit_for(n, bcc);
            let mut jmp = MInstData::new(MachOp::Jmp);
            jmp.target = Some(f_block);
            ctx.emit(jmp);
            Ok(())
        }
        Op::Jmp => {
            let target = ctx.control_target(n)?;
            let mut data = MInstData::new(MachOp::Jmp);
            data.target = Some(target);
            ctx.emit_for(n, data);
            Ok(())
        }
        Op::Load => {
            let load_mode = g.node(n).attr.load_mode();
            if load_mode.is_float() {
                return Err(unsupported(ctx, n));
            }
            let (am, am_regs) = make_am(ctx, g.in_at(n, 1))?;
            let out = ctx.def(n, RegClass::Gp);
            let mut data = MInstData::new(MachOp::Load).with_outs(&[out]);
            data.ins = SmallVec::from_slice(&am_regs);
            data.am = Some(am);
            data.width = load_mode.bits() as u8;
            data.sext = load_mode.is_signed();
            ctx.emit_for(n, data);
            Ok(())
        }
        Op::Store => {
            let value = g.in_at(n, 2);
            if g.mode(value).is_float() {
                return Err(unsupported(ctx, n));
            }
            let (am, am_regs) = make_am(ctx, g.in_at(n, 1))?;
            let v = ctx.vreg(value)?;
            let mut ins: SmallVec<[VReg; 4]> = SmallVec::new();
            ins.push(v);
            ins.extend_from_slice(&am_regs);
            let mut data = MInstData::new(MachOp::Store);
            data.ins = ins;
            data.am = Some(am);
            data.width = g.mode(value).bits() as u8;
            ctx.emit_for(n, data);
            Ok(())
        }
        Op::Proj => {
            let pred = g.in_at(n, 0);
            if pred == g.args() {
                // Incoming arguments sit in %o0-%o5.
                let idx = g.node(n).attr.proj();
                if idx >= 6 {
                    return Err(unsupported(ctx, n));
                }
                let arg = ctx.f.new_fixed_vreg(RegClass::Gp, idx as u8);
                let out = ctx.def(n, RegClass::Gp);
                ctx.emit_for(
                    n,
                    MInstData::new(MachOp::Copy).with_ins(&[arg]).with_outs(&[out]),
                );
                return Ok(());
            }
            match g.op(pred) {
                Op::Load if g.node(n).attr.proj() == pn::load::RES => {
                    let v = ctx.vreg(pred)?;
                    ctx.alias(n, v);
                }
                Op::Proj => {
                    let call = g.in_at(pred, 0);
                    if g.op(call) == Op::Call
                        && g.node(pred).attr.proj() == pn::call::RESULTS
                    {
                        let v = ctx.vreg(call)?;
                        ctx.alias(n, v);
                    }
                }
                _ => {}
            }
            Ok(())
        }
        Op::Call => {
            let ptr = g.in_at(n, 1);
            let n_args = g.arity(n) - 2;
            if n_args > 6 {
                return Err(unsupported(ctx, n));
            }
            let mut arg_regs: SmallVec<[VReg; 4]> = SmallVec::new();
            for i in 0..n_args {
                let v = ctx.vreg(g.in_at(n, 2 + i))?;
                let fixed = ctx.f.new_fixed_vreg(RegClass::Gp, i as u8);
                ctx.emit(MInstData::new(MachOp::Copy).with_ins(&[v]).with_outs(&[fixed]));
                arg_regs.push(fixed);
            }
            let mut data = MInstData::new(MachOp::Call);
            data.ins = arg_regs;
            if g.op(ptr) == Op::SymConst {
                if let Attr::SymConst(SymConst::Addr(e)) = g.node(ptr).attr.clone() {
                    data.sym = Some(ctx.types.entity_name(e).to_string());
                    if ctx.single_user(ptr) {
                        ctx.matched.insert(ptr);
                        ctx.unemit(ptr);
                    }
                }
            }
            if data.sym.is_none() {
                let v = ctx.vreg(ptr)?;
                data.ins.insert(0, v);
            }
            let wants_result = ctx.outs.outs(n).iter().any(|&(u, _)| {
                g.op(u) == Op::Proj && g.node(u).attr.proj() == pn::call::RESULTS
            });
            if wants_result {
                let ret = ctx.f.new_fixed_vreg(RegClass::Gp, 0);
                data.outs = SmallVec::from_slice(&[ret]);
                ctx.emit_for(n, data);
                let out = ctx.f.new_vreg(RegClass::Gp);
                ctx.emit(MInstData::new(MachOp::Copy).with_ins(&[ret]).with_outs(&[out]));
                ctx.alias(n, out);
            } else {
                ctx.emit_for(n, data);
            }
            Ok(())
        }
        Op::Return => {
            let mut ret_ins: SmallVec<[VReg; 4]> = SmallVec::new();
            for i in 1..g.arity(n) {
                let value = g.in_at(n, i);
                if g.mode(value).is_float() {
                    return Err(unsupported(ctx, n));
                }
                let v = ctx.vreg(value)?;
                let o0 = ctx.f.new_fixed_vreg(RegClass::Gp, 0);
                ctx.emit(MInstData::new(MachOp::Copy).with_ins(&[v]).with_outs(&[o0]));
                ret_ins.push(o0);
            }
            let mut data = MInstData::new(MachOp::Ret);
            data.ins = ret_ins;
            ctx.emit_for(n, data);
            Ok(())
        }
        Op::Sel => {
            let (am, regs) = make_am(ctx, n)?;
            let base = regs.first().copied().ok_or_else(|| unsupported(ctx, n))?;
            let out = ctx.def(n, RegClass::Gp);
            ctx.emit_for(
                n,
                MInstData::new(MachOp::Add)
                    .with_ins(&[base])
                    .with_outs(&[out])
                    .with_imm(am.disp as i64),
            );
            Ok(())
        }
        _ => Err(unsupported(ctx, n)),
    }
}

/// Distance limit of the delay-slot search.
const DELAY_SEARCH_RANGE: usize = 10;

/// The delay-slot assignment of a function.
pub struct DelaySlots {
    /// Branch instruction to its filler.
    pub filler: SecondaryMap<MInst, PackedOption<MInst>>,
    /// Instructions emitted inside a delay slot; skipped at their original
    /// position.
    pub moved: HashSet<MInst>,
}

fn colors_of(f: &MachFunction, regs: &[VReg]) -> Vec<(RegClass, u8)> {
    regs.iter()
        .map(|&v| (f.vregs[v].class, f.vregs[v].reg.unwrap_or(0)))
        .collect()
}

fn disjoint(a: &[(RegClass, u8)], b: &[(RegClass, u8)]) -> bool {
    !a.iter().any(|x| b.contains(x))
}

fn touches_memory(op: MachOp) -> bool {
    matches!(
        op,
        MachOp::Load | MachOp::Store | MachOp::Push | MachOp::Call | MachOp::IncSp
    )
}

/// Can `cand` (at `cpos`) legally move down into the slot of the branch at
/// `bpos`?
fn movable_down(f: &MachFunction, insts: &[MInst], cpos: usize, bpos: usize) -> bool {
    let cand = &f.insts[insts[cpos]];
    let c_outs = colors_of(f, &cand.outs);
    let c_ins = colors_of(f, &cand.ins);
    for &mid in &insts[cpos + 1..bpos] {
        let m = &f.insts[mid];
        let m_ins = colors_of(f, &m.ins);
        let m_outs = colors_of(f, &m.outs);
        // The candidate's result must stay unread and unclobbered, and its
        // operands must keep their values.
        if !disjoint(&c_outs, &m_ins)
            || !disjoint(&c_outs, &m_outs)
            || !disjoint(&c_ins, &m_outs)
        {
            return false;
        }
        if touches_memory(cand.op) && touches_memory(m.op) {
            return false;
        }
    }
    true
}

/// Pick delay-slot fillers for every branch of `f`.
///
/// Same-block instructions above the branch are preferred; as a fallback, a
/// single-predecessor successor block may donate its first instruction,
/// with the annul bit set on conditional branches when the processor
/// supports it.
pub fn fill_delay_slots(f: &mut MachFunction, cpu: SparcCpu) -> DelaySlots {
    let mut slots = DelaySlots {
        filler: SecondaryMap::new(),
        moved: HashSet::new(),
    };
    for &b in &f.order.clone() {
        let insts = f.blocks[b].insts.clone();
        for (bpos, &branch) in insts.iter().enumerate() {
            if !f.insts[branch].has_delay_slot() {
                continue;
            }
            let b_ins = colors_of(f, &f.insts[branch].ins);
            let b_outs = colors_of(f, &f.insts[branch].outs);

            // Candidates above the branch, closest first.
            let low = bpos.saturating_sub(DELAY_SEARCH_RANGE);
            let mut chosen: Option<MInst> = None;
            for cpos in (low..bpos).rev() {
                let c = insts[cpos];
                let cd = &f.insts[c];
                if cd.has_delay_slot()
                    || slots.moved.contains(&c)
                    || matches!(cd.op, MachOp::Keep | MachOp::Perm)
                {
                    continue;
                }
                let c_outs = colors_of(f, &cd.outs);
                let c_ins = colors_of(f, &cd.ins);
                // Must not feed the branch nor clobber what it reads.
                if !disjoint(&c_outs, &b_ins) || !disjoint(&c_ins, &b_outs) {
                    continue;
                }
                if movable_down(f, &insts, cpos, bpos) {
                    chosen = Some(c);
                    break;
                }
            }

            // Fallback: steal from a single-predecessor successor.
            if chosen.is_none() {
                let annul_ok = f.insts[branch].op != MachOp::Bcc || cpu.annul_filler();
                if annul_ok {
                    if let Some(target) = f.insts[branch].target {
                        if f.blocks[target].preds.len() == 1 {
                            let first = f.blocks[target]
                                .insts
                                .first()
                                .copied()
                                .filter(|&c| {
                                    !f.insts[c].has_delay_slot()
                                        && !matches!(
                                            f.insts[c].op,
                                            MachOp::Keep | MachOp::Perm
                                        )
                                });
                            if let Some(c) = first {
                                f.blocks[target].insts.remove(0);
                                if f.insts[branch].op == MachOp::Bcc {
                                    f.insts[branch].annul = true;
                                }
                                chosen = Some(c);
                            }
                        }
                    }
                }
            }

            if let Some(c) = chosen {
                log::trace!("delay slot of {} filled with {}", branch, c);
                slots.filler[branch] = PackedOption::from(c);
                slots.moved.insert(c);
            }
        }
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::be::Target;

    /// Scenario: an `add` whose registers are disjoint from the branch
    /// moves into the delay slot.
    #[test]
    fn independent_add_fills_slot() {
        let mut f = MachFunction::new("f", Target::Sparc);
        let b0 = f.new_block();
        let b1 = f.new_block();
        f.add_edge(b0, b1);

        let g1 = f.new_vreg(RegClass::Gp);
        let g2 = f.new_vreg(RegClass::Gp);
        let g3 = f.new_vreg(RegClass::Gp);
        let flags = f.new_vreg(RegClass::Flags);
        for (v, c) in [(g1, 1u8), (g2, 2), (g3, 3)] {
            f.vregs[v].reg = Some(c);
        }
        f.vregs[flags].reg = Some(0);

        f.push_inst(b0, MInstData::new(MachOp::Cmp).with_ins(&[g1]).with_outs(&[flags]));
        let add = f.push_inst(
            b0,
            MInstData::new(MachOp::Add).with_ins(&[g1, g2]).with_outs(&[g3]),
        );
        let mut bcc = MInstData::new(MachOp::Bcc).with_ins(&[flags]);
        bcc.cond = Some(CondCode::Ne);
        bcc.target = Some(b1);
        let branch = f.push_inst(b0, bcc);

        let slots = fill_delay_slots(&mut f, SparcCpu::V8);
        assert_eq!(slots.filler[branch].expand(), Some(add));
        assert!(slots.moved.contains(&add));
    }

    /// A candidate writing a register the comparison/branch depends on is
    /// rejected.
    #[test]
    fn dependent_candidate_rejected() {
        let mut f = MachFunction::new("f", Target::Sparc);
        let b0 = f.new_block();
        let b1 = f.new_block();
        f.add_edge(b0, b1);

        let g1 = f.new_vreg(RegClass::Gp);
        let flags = f.new_vreg(RegClass::Flags);
        f.vregs[g1].reg = Some(1);
        f.vregs[flags].reg = Some(0);

        // The add defines the flags' source *after* the compare would need
        // it; moving it below the branch is illegal because the branch
        // reads the flags it would clobber.
        let add = f.push_inst(
            b0,
            MInstData::new(MachOp::Add).with_ins(&[g1, g1]).with_outs(&[flags]),
        );
        let mut bcc = MInstData::new(MachOp::Bcc).with_ins(&[flags]);
        bcc.cond = Some(CondCode::Ne);
        bcc.target = Some(b1);
        let branch = f.push_inst(b0, bcc);
        let _ = add;

        let slots = fill_delay_slots(&mut f, SparcCpu::V8);
        assert_eq!(slots.filler[branch].expand(), None);
    }
}
