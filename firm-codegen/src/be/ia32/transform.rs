//! ia32 instruction selection.
//!
//! Rewrites generic nodes into ia32 instructions, matching small trees for
//! addressing: LEA formation for address arithmetic, source address modes
//! folding a single-use load into its consumer, destination address modes
//! collapsing load/op/store of one address into a memory-destination
//! instruction, and widening conversions folded back into the feeding
//! load's width.

use crate::be::ia32::{EAX, ECX};
use crate::be::transform::TransformCtx;
use crate::be::{AmAttr, CondCode, FConst, MInstData, MachOp, PoolEntry, RegClass, VReg};
use crate::ir::entities::Node;
use crate::ir::mode::{self, Mode};
use crate::ir::node::{pn, Attr, SymConst};
use crate::ir::opcode::Op;
use crate::ir::tarval::{Relation, Tarval};
use crate::result::{FirmError, FirmResult};
use smallvec::SmallVec;

fn unsupported(ctx: &TransformCtx, n: Node) -> FirmError {
    FirmError::UnsupportedPattern {
        node: n,
        op: ctx.g.op(n).name(),
    }
}

fn float_width(m: Mode) -> u8 {
    m.bits() as u8
}

/// The x87-resident constants.
fn fconst_of(tv: Tarval) -> Option<FConst> {
    let v = tv.as_f64();
    if v == 0.0 {
        Some(FConst::Zero)
    } else if v == 1.0 {
        Some(FConst::One)
    } else if v == std::f64::consts::PI {
        Some(FConst::Pi)
    } else if v == std::f64::consts::LN_2 {
        Some(FConst::Ln2)
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

fn const_i64(ctx: &TransformCtx, n: Node) -> Option<i64> {
    if ctx.g.op(n) == Op::Const {
        Some(ctx.g.node(n).attr.tarval().as_i64())
    } else {
        None
    }
}

/// Build an address mode for `ptr`, consuming single-use address
/// arithmetic. Returns the attribute and the registers it reads (base
/// first, then index).
pub fn make_am(ctx: &mut TransformCtx, ptr: Node) -> FirmResult<(AmAttr, SmallVec<[VReg; 2]>)> {
    let mut am = AmAttr {
        scale: 1,
        ..AmAttr::default()
    };
    let mut regs: SmallVec<[VReg; 2]> = SmallVec::new();
    let g = ctx.g;

    let mut base = ptr;
    // Peel displacement and member offsets.
    loop {
        match g.op(base) {
            Op::Sel => {
                let ent = match &g.node(base).attr {
                    Attr::Sel(e) => *e,
                    _ => break,
                };
                let off = ctx.types.entity(ent).offset.max(0);
                am.disp += off;
                let inner = g.in_at(base, 0);
                if ctx.single_user(base) {
                    ctx.matched.insert(base);
                    ctx.unemit(base);
                }
                base = inner;
            }
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
            _ => break,
        }
    }

    // Base + scaled index.
    if g.op(base) == Op::Add {
        let l = g.in_at(base, 0);
        let r = g.in_at(base, 1);
        // index*scale on the right?
        let scaled = if g.op(r) == Op::Shl {
            const_i64(ctx, g.in_at(r, 1))
                .filter(|&k| (0..=3).contains(&k))
                .map(|k| (g.in_at(r, 0), 1u8 << k, Some(r)))
        } else {
            None
        };
        if let Some((index, scale, shl)) = scaled {
            if ctx.single_user(base) {
                ctx.matched.insert(base);
                if let Some(s) = shl {
                    if ctx.single_user(s) {
                        ctx.matched.insert(s);
                        ctx.unemit(s);
                    }
                }
                am.base = true;
                regs.push(ctx.vreg(l)?);
                am.index = true;
                am.scale = scale;
                regs.push(ctx.vreg(index)?);
                ctx.unemit(base);
                return Ok((am, regs));
            }
        }
    }

    match g.op(base) {
        Op::SymConst => {
            if let Attr::SymConst(SymConst::Addr(e)) = g.node(base).attr.clone() {
                am.symbol = Some(ctx.types.entity_name(e).to_string());
                if ctx.single_user(base) {
                    ctx.matched.insert(base);
                    ctx.unemit(base);
                }
                return Ok((am, regs));
            }
            Err(unsupported(ctx, base))
        }
        Op::Proj if base == ctx.g.frame() => {
            am.frame_rel = true;
            Ok((am, regs))
        }
        _ => {
            am.base = true;
            regs.push(ctx.vreg(base)?);
            Ok((am, regs))
        }
    }
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

fn fbinop_op(op: Op) -> Option<MachOp> {
    match op {
        Op::Add => Some(MachOp::FvAdd),
        Op::Sub => Some(MachOp::FvSub),
        Op::Mul => Some(MachOp::FvMul),
        Op::Div => Some(MachOp::FvDiv),
        _ => None,
    }
}

/// Is `n` the result projection of a single-use load in the same block?
fn foldable_load(ctx: &TransformCtx, n: Node, user_block: Node) -> Option<Node> {
    let g = ctx.g;
    if g.op(n) != Op::Proj || g.node(n).attr.proj() != pn::load::RES {
        return None;
    }
    let load = g.in_at(n, 0);
    if g.op(load) != Op::Load || !g.node(load).attr.load_mode().is_int() {
        return None;
    }
    if !ctx.single_user(n) || g.block_of(load) != user_block {
        return None;
    }
    Some(load)
}

fn gen_int_binop(ctx: &mut TransformCtx, n: Node) -> FirmResult<()> {
    let g = ctx.g;
    let op = g.op(n);
    let mach = binop_op(op).ok_or_else(|| unsupported(ctx, n))?;

    // Address arithmetic folds into a single lea.
    let lea_shape = op == Op::Add
        && g.mode(n) == mode::P
        && (const_i64(ctx, g.in_at(n, 1)).is_some() || g.op(g.in_at(n, 1)) == Op::Shl);
    if lea_shape {
        let (am, regs) = make_am(ctx, n)?;
        let out = ctx.def(n, RegClass::Gp);
        let mut data = MInstData::new(MachOp::Lea).with_outs(&[out]);
        data.ins = SmallVec::from_slice(&regs);
        data.am = Some(am);
        ctx.emit_for(n, data);
        return Ok(());
    }

    // Shift with constant or %cl count.
    if matches!(op, Op::Shl | Op::Shr | Op::Shrs) {
        let x = ctx.vreg(g.in_at(n, 0))?;
        let out = ctx.def(n, RegClass::Gp);
        let mut data = MInstData::new(mach).with_outs(&[out]);
        if let Some(c) = const_i64(ctx, g.in_at(n, 1)) {
            data.ins = SmallVec::from_slice(&[x]);
            data.imm = Some(c);
        } else {
            let count = ctx.vreg(g.in_at(n, 1))?;
            let cl = ctx.f.new_fixed_vreg(RegClass::Gp, ECX);
            ctx.emit(MInstData::new(MachOp::Copy).with_ins(&[count]).with_outs(&[cl]));
            data.ins = SmallVec::from_slice(&[x, cl]);
        }
        ctx.emit_for(n, data);
        return Ok(());
    }

    let l = g.in_at(n, 0);
    let r = g.in_at(n, 1);

    // Source address mode: fold a single-use load into this operation.
    let block = g.block_of(n);
    for (mem_side, reg_side) in [(r, l), (l, r)] {
        let foldable = foldable_load(ctx, mem_side, block);
        if let Some(load) = foldable {
            // Subtraction is not symmetric; only the right side may fold.
            if op == Op::Sub && mem_side == l {
                continue;
            }
            let (am, am_regs) = make_am(ctx, g.in_at(load, 1))?;
            ctx.unemit(load);
            ctx.matched.insert(mem_side);
            let x = ctx.vreg(reg_side)?;
            let out = ctx.def(n, RegClass::Gp);
            let mut ins: SmallVec<[VReg; 4]> = SmallVec::new();
            ins.push(x);
            ins.extend_from_slice(&am_regs);
            let mut data = MInstData::new(mach).with_outs(&[out]);
            data.ins = ins;
            data.am = Some(am);
            ctx.emit_for(n, data);
            return Ok(());
        }
    }

    // Constant on the right becomes an immediate.
    if let Some(c) = const_i64(ctx, r) {
        let x = ctx.vreg(l)?;
        let out = ctx.def(n, RegClass::Gp);
        ctx.emit_for(n, MInstData::new(mach).with_ins(&[x]).with_outs(&[out]).with_imm(c));
        return Ok(());
    }

    let lv = ctx.vreg(l)?;
    let rv = ctx.vreg(r)?;
    let out = ctx.def(n, RegClass::Gp);
    ctx.emit_for(n, MInstData::new(mach).with_ins(&[lv, rv]).with_outs(&[out]));
    Ok(())
}

fn gen_store(ctx: &mut TransformCtx, n: Node) -> FirmResult<()> {
    let g = ctx.g;
    let ptr = g.in_at(n, 1);
    let value = g.in_at(n, 2);

    if g.mode(value).is_float() {
        let (am, am_regs) = make_am(ctx, ptr)?;
        let v = ctx.vreg(value)?;
        let mut ins: SmallVec<[VReg; 4]> = SmallVec::new();
        ins.push(v);
        ins.extend_from_slice(&am_regs);
        let mut data = MInstData::new(MachOp::FvStore);
        data.ins = ins;
        data.am = Some(am);
        data.width = float_width(g.mode(value));
        ctx.emit_for(n, data);
        return Ok(());
    }

    // Destination address mode: store(p, op(load(p), y)) in one
    // instruction.
    let block = g.block_of(n);
    if g.op(value).is_binop() && ctx.single_user(value) && g.block_of(value) == block {
        let vl = g.in_at(value, 0);
        if let Some(load) = foldable_load(ctx, vl, block) {
            if g.in_at(load, 1) == ptr {
                if let Some(mach) = binop_op(g.op(value)) {
                    let (am, am_regs) = make_am(ctx, ptr)?;
                    ctx.unemit(load);
                    ctx.unemit(value);
                    ctx.matched.insert(value);
                    ctx.matched.insert(vl);
                    let y = ctx.vreg(g.in_at(value, 1))?;
                    let mut ins: SmallVec<[VReg; 4]> = SmallVec::new();
                    ins.push(y);
                    ins.extend_from_slice(&am_regs);
                    let mut data = MInstData::new(mach);
                    data.ins = ins;
                    data.am = Some(am);
                    data.width = g.mode(g.in_at(value, 1)).bits() as u8;
                    ctx.emit_for(n, data);
                    return Ok(());
                }
            }
        }
    }

    let (am, am_regs) = make_am(ctx, ptr)?;
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

fn gen_load(ctx: &mut TransformCtx, n: Node) -> FirmResult<()> {
    let load_mode = ctx.g.node(n).attr.load_mode();
    let (am, am_regs) = make_am(ctx, ctx.g.in_at(n, 1))?;
    if load_mode.is_float() {
        let out = ctx.def(n, RegClass::Fp);
        let mut data = MInstData::new(MachOp::FvLoad).with_outs(&[out]);
        data.ins = SmallVec::from_slice(&am_regs);
        data.am = Some(am);
        data.width = float_width(load_mode);
        ctx.emit_for(n, data);
    } else {
        let out = ctx.def(n, RegClass::Gp);
        let mut data = MInstData::new(MachOp::Load).with_outs(&[out]);
        data.ins = SmallVec::from_slice(&am_regs);
        data.am = Some(am);
        data.width = load_mode.bits() as u8;
        data.sext = load_mode.is_signed();
        ctx.emit_for(n, data);
    }
    Ok(())
}

fn gen_proj(ctx: &mut TransformCtx, n: Node) -> FirmResult<()> {
    let g = ctx.g;
    let pred = g.in_at(n, 0);
    let pn_ = g.node(n).attr.proj();

    // Parameters: projections of the argument tuple.
    if pred == g.args() {
        let m = g.mode(n);
        let am = AmAttr {
            frame_rel: true,
            disp: 8 + 4 * pn_ as i32,
            scale: 1,
            ..AmAttr::default()
        };
        if m.is_float() {
            let out = ctx.def(n, RegClass::Fp);
            let mut data = MInstData::new(MachOp::FvLoad).with_outs(&[out]);
            data.am = Some(am);
            data.width = float_width(m);
            ctx.emit_for(n, data);
        } else {
            let out = ctx.def(n, RegClass::Gp);
            let mut data = MInstData::new(MachOp::LoadParam).with_outs(&[out]);
            data.am = Some(am);
            ctx.emit_for(n, data);
        }
        return Ok(());
    }

    match g.op(pred) {
        Op::Start | Op::Cond | Op::Tuple => Ok(()),
        Op::Load => {
            if pn_ == pn::load::RES {
                let v = ctx.vreg(pred)?;
                ctx.alias(n, v);
            }
            Ok(())
        }
        Op::Proj => {
            // Call results: Proj(Proj(call, RESULTS), i).
            let call = g.in_at(pred, 0);
            if g.op(call) == Op::Call && g.node(pred).attr.proj() == pn::call::RESULTS {
                let v = ctx.vreg(call)?;
                ctx.alias(n, v);
            }
            Ok(())
        }
        Op::Call | Op::Store => Ok(()),
        _ => Ok(()),
    }
}

fn gen_call(ctx: &mut TransformCtx, n: Node) -> FirmResult<()> {
    let g = ctx.g;
    let ptr = g.in_at(n, 1);
    let n_args = g.arity(n) - 2;

    // cdecl: arguments pushed right to left, caller cleans up.
    for i in (0..n_args).rev() {
        let arg = g.in_at(n, 2 + i);
        if g.mode(arg).is_float() {
            return Err(unsupported(ctx, n));
        }
        let v = ctx.vreg(arg)?;
        ctx.emit(MInstData::new(MachOp::Push).with_ins(&[v]));
    }

    let mut data = MInstData::new(MachOp::Call);
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
        data.ins = SmallVec::from_slice(&[v]);
    }

    // The integer result arrives in %eax.
    let wants_result = ctx.outs.outs(n).iter().any(|&(u, _)| {
        g.op(u) == Op::Proj && g.node(u).attr.proj() == pn::call::RESULTS
    });
    if wants_result {
        let ret = ctx.f.new_fixed_vreg(RegClass::Gp, EAX);
        data.outs = SmallVec::from_slice(&[ret]);
        ctx.emit_for(n, data);
        let out = ctx.f.new_vreg(RegClass::Gp);
        ctx.emit(MInstData::new(MachOp::Copy).with_ins(&[ret]).with_outs(&[out]));
        ctx.alias(n, out);
    } else {
        ctx.emit_for(n, data);
    }

    if n_args > 0 {
        ctx.emit(MInstData::new(MachOp::IncSp).with_imm(4 * n_args as i64));
    }
    Ok(())
}

fn gen_return(ctx: &mut TransformCtx, n: Node) -> FirmResult<()> {
    let g = ctx.g;
    let mut ret_ins: SmallVec<[VReg; 4]> = SmallVec::new();
    let mut floats = 0u8;
    for i in 1..g.arity(n) {
        let value = g.in_at(n, i);
        if g.mode(value).is_float() {
            let v = ctx.vreg(value)?;
            ret_ins.push(v);
            floats += 1;
        } else {
            let v = ctx.vreg(value)?;
            let eax = ctx.f.new_fixed_vreg(RegClass::Gp, EAX);
            ctx.emit(MInstData::new(MachOp::Copy).with_ins(&[v]).with_outs(&[eax]));
            ret_ins.push(eax);
        }
    }
    ctx.f.n_float_results = ctx.f.n_float_results.max(floats);
    let mut data = MInstData::new(MachOp::Ret);
    data.ins = ret_ins;
    ctx.emit_for(n, data);
    Ok(())
}

fn gen_cond(ctx: &mut TransformCtx, n: Node) -> FirmResult<()> {
    let g = ctx.g;
    let sel = g.in_at(n, 0);
    if g.op(sel) != Op::Cmp {
        return Err(unsupported(ctx, n));
    }
    let signed = g.mode(g.in_at(sel, 0)).is_signed();
    let cc = cc_of(g.node(sel).attr.relation(), signed).ok_or_else(|| unsupported(ctx, sel))?;
    let flags = ctx.vreg(sel)?;

    let mut true_proj = None;
    let mut false_proj = None;
    for &(u, _) in ctx.outs.outs(n) {
        if g.op(u) == Op::Proj {
            match g.node(u).attr.proj() {
                pn::cond::TRUE => true_proj = Some(u),
                pn::cond::FALSE => false_proj = Some(u),
                _ => {}
            }
        }
    }
    let (tp, fp) = match (true_proj, false_proj) {
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

/// Transform one node into ia32 instructions.
pub fn gen_node(ctx: &mut TransformCtx, n: Node) -> FirmResult<()> {
    let g = ctx.g;
    match g.op(n) {
        Op::Start | Op::End | Op::Bad | Op::Unknown | Op::NoMem | Op::Sync | Op::Tuple
        | Op::Id | Op::Anchor => Ok(()),
        Op::Const => {
            let tv = g.node(n).attr.tarval();
            if tv.mode().is_float() {
                let out = ctx.def(n, RegClass::Fp);
                if let Some(fc) = fconst_of(tv) {
                    let mut data = MInstData::new(MachOp::FvConst(fc)).with_outs(&[out]);
                    data.width = float_width(tv.mode());
                    ctx.emit_for(n, data);
                } else {
                    let label = format!(".LC{}", ctx.f.literal_pool.len());
                    let width = float_width(tv.mode()).min(64);
                    ctx.f.literal_pool.push(PoolEntry {
                        label: label.clone(),
                        bits: tv.as_f64().to_bits(),
                        width,
                    });
                    let mut data = MInstData::new(MachOp::FvLoad).with_outs(&[out]);
                    data.am = Some(AmAttr {
                        symbol: Some(label),
                        scale: 1,
                        ..AmAttr::default()
                    });
                    data.width = width;
                    ctx.emit_for(n, data);
                }
            } else {
                let out = ctx.def(n, RegClass::Gp);
                ctx.emit_for(
                    n,
                    MInstData::new(MachOp::MovImm).with_outs(&[out]).with_imm(tv.as_i64()),
                );
            }
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
                let mach = fbinop_op(g.op(n)).ok_or_else(|| unsupported(ctx, n))?;
                let l = ctx.vreg(g.in_at(n, 0))?;
                let r = ctx.vreg(g.in_at(n, 1))?;
                let out = ctx.def(n, RegClass::Fp);
                let mut data = MInstData::new(mach).with_ins(&[l, r]).with_outs(&[out]);
                data.width = float_width(g.mode(n));
                ctx.emit_for(n, data);
                Ok(())
            } else {
                gen_int_binop(ctx, n)
            }
        }
        Op::Minus => {
            let v = ctx.vreg(g.in_at(n, 0))?;
            if g.mode(n).is_float() {
                // -x as 0 - x keeps the virtual form uniform.
                let zero = ctx.f.new_vreg(RegClass::Fp);
                let mut c = MInstData::new(MachOp::FvConst(FConst::Zero)).with_outs(&[zero]);
                c.width = float_width(g.mode(n));
                ctx.emit(c);
                let out = ctx.def(n, RegClass::Fp);
                let mut data = MInstData::new(MachOp::FvSub).with_ins(&[zero, v]).with_outs(&[out]);
                data.width = float_width(g.mode(n));
                ctx.emit_for(n, data);
            } else {
                let out = ctx.def(n, RegClass::Gp);
                ctx.emit_for(n, MInstData::new(MachOp::Neg).with_ins(&[v]).with_outs(&[out]));
            }
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
            let from = g.mode(src);
            let to = g.mode(n);
            if from.is_int() && to.is_int() {
                if to.bits() > from.bits() {
                    // Fold widening back into the feeding load.
                    if let Some(load) = foldable_load(ctx, src, g.block_of(n)) {
                        if let Some(i) = ctx.inst_map[load].expand() {
                            let inst = &mut ctx.f.insts[i];
                            inst.width = from.bits() as u8;
                            inst.sext = from.is_signed();
                            let v = inst.outs[0];
                            ctx.matched.insert(src);
                            ctx.alias(n, v);
                            return Ok(());
                        }
                    }
                    let v = ctx.vreg(src)?;
                    let out = ctx.def(n, RegClass::Gp);
                    let mut data = MInstData::new(MachOp::Movx).with_ins(&[v]).with_outs(&[out]);
                    data.width = from.bits() as u8;
                    data.sext = from.is_signed();
                    ctx.emit_for(n, data);
                } else {
                    // Narrowing is a rename; the low bits are in place.
                    let v = ctx.vreg(src)?;
                    ctx.alias(n, v);
                }
                Ok(())
            } else {
                Err(unsupported(ctx, n))
            }
        }
        Op::Cmp => {
            let l = g.in_at(n, 0);
            let r = g.in_at(n, 1);
            if g.mode(l).is_float() {
                let lv = ctx.vreg(l)?;
                let rv = ctx.vreg(r)?;
                let out = ctx.def(n, RegClass::Flags);
                let mut data = MInstData::new(MachOp::FvCmp).with_ins(&[lv, rv]).with_outs(&[out]);
                data.width = float_width(g.mode(l));
                ctx.emit_for(n, data);
            } else {
                let lv = ctx.vreg(l)?;
                let out = ctx.def(n, RegClass::Flags);
                let mut data = MInstData::new(MachOp::Cmp).with_outs(&[out]);
                if let Some(c) = const_i64(ctx, r) {
                    data.ins = SmallVec::from_slice(&[lv]);
                    data.imm = Some(c);
                } else {
                    let rv = ctx.vreg(r)?;
                    data.ins = SmallVec::from_slice(&[lv, rv]);
                }
                ctx.emit_for(n, data);
            }
            Ok(())
        }
        Op::Load => gen_load(ctx, n),
        Op::Store => gen_store(ctx, n),
        Op::Proj => gen_proj(ctx, n),
        Op::Call => gen_call(ctx, n),
        Op::Return => gen_return(ctx, n),
        Op::Cond => gen_cond(ctx, n),
        Op::Jmp => {
            let target = ctx.control_target(n)?;
            let mut data = MInstData::new(MachOp::Jmp);
            data.target = Some(target);
            ctx.emit_for(n, data);
            Ok(())
        }
        Op::Sel => {
            let (am, regs) = make_am(ctx, n)?;
            let out = ctx.def(n, RegClass::Gp);
            let mut data = MInstData::new(MachOp::Lea).with_outs(&[out]);
            data.ins = SmallVec::from_slice(&regs);
            data.am = Some(am);
            ctx.emit_for(n, data);
            Ok(())
        }
        _ => Err(unsupported(ctx, n)),
    }
}
