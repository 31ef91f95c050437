//! ia32 assembly emission (GNU assembler, AT&T syntax).

use crate::be::emitter::{block_label, format_inst};
use crate::be::ia32::{gp_name, gp_name8};
use crate::be::{CondCode, MBlock, MInst, MachFunction, MachOp, RegClass, VReg};
use std::fmt::Write;

fn reg_name(f: &MachFunction, v: VReg) -> String {
    match f.vregs[v].class {
        RegClass::Gp => format!("%{}", gp_name(f.vregs[v].reg.unwrap_or(0))),
        RegClass::Fp => format!("%st({})", f.vregs[v].reg.unwrap_or(0)),
        RegClass::Flags => "%eflags".to_string(),
    }
}

fn cc_suffix(cc: CondCode) -> &'static str {
    match cc {
        CondCode::Eq => "e",
        CondCode::Ne => "ne",
        CondCode::Lt => "l",
        CondCode::Le => "le",
        CondCode::Gt => "g",
        CondCode::Ge => "ge",
        CondCode::B => "b",
        CondCode::Be => "be",
        CondCode::A => "a",
        CondCode::Ae => "ae",
    }
}

/// `mov` the first source into the destination when the two-address form
/// requires it.
fn two_address_fix(f: &MachFunction, i: MInst, out: &mut String) {
    let data = &f.insts[i];
    let (Some(&src), Some(&dst)) = (data.ins.first(), data.outs.first()) else {
        return;
    };
    if f.vregs[src].class != RegClass::Gp || f.vregs[dst].class != RegClass::Gp {
        return;
    }
    if f.vregs[src].reg != f.vregs[dst].reg {
        let _ = writeln!(
            out,
            "\tmovl\t{}, {}",
            reg_name(f, src),
            reg_name(f, dst)
        );
    }
}

fn binop_mnemonic(op: MachOp) -> Option<&'static str> {
    match op {
        MachOp::Add => Some("addl"),
        MachOp::Sub => Some("subl"),
        MachOp::Mul => Some("imull"),
        MachOp::And => Some("andl"),
        MachOp::Or => Some("orl"),
        MachOp::Xor => Some("xorl"),
        MachOp::Shl => Some("shll"),
        MachOp::Shr => Some("shrl"),
        MachOp::Sar => Some("sarl"),
        _ => None,
    }
}

fn x87_binop_fmt(op: MachOp) -> Option<&'static str> {
    match op {
        MachOp::FAdd => Some("\tfadd\t%R0, %st\n"),
        MachOp::FAddP => Some("\tfaddp\t%st, %R0\n"),
        MachOp::FMul => Some("\tfmul\t%R0, %st\n"),
        MachOp::FMulP => Some("\tfmulp\t%st, %R0\n"),
        MachOp::FSub => Some("\tfsub\t%R0, %st\n"),
        MachOp::FSubP => Some("\tfsubp\t%st, %R0\n"),
        MachOp::FSubR => Some("\tfsubr\t%R0, %st\n"),
        MachOp::FSubRP => Some("\tfsubrp\t%st, %R0\n"),
        MachOp::FDiv => Some("\tfdiv\t%R0, %st\n"),
        MachOp::FDivP => Some("\tfdivp\t%st, %R0\n"),
        MachOp::FDivR => Some("\tfdivr\t%R0, %st\n"),
        MachOp::FDivRP => Some("\tfdivrp\t%st, %R0\n"),
        _ => None,
    }
}

fn fconst_mnemonic(fc: crate::be::FConst) -> &'static str {
    use crate::be::FConst::*;
    match fc {
        One => "fld1",
        Zero => "fldz",
        Pi => "fldpi",
        Ln2 => "fldln2",
        Lg2 => "fldlg2",
        L2e => "fldl2e",
        L2t => "fldl2t",
    }
}

fn emit_inst(f: &MachFunction, b: MBlock, i: MInst, next_block: Option<MBlock>, out: &mut String) {
    let data = &f.insts[i];
    let namer = &reg_name;
    let mut line = |s: String, out: &mut String| {
        let _ = write!(out, "{}", s);
    };
    match data.op {
        MachOp::Keep | MachOp::Perm | MachOp::FnstCwNop => {}
        MachOp::Copy => {
            let (src, dst) = (data.ins[0], data.outs[0]);
            if f.vregs[src].reg != f.vregs[dst].reg {
                line(format_inst(f, i, "\tmovl\t%S0, %D0\n", namer), out);
            }
        }
        MachOp::MovImm => match &data.sym {
            Some(s) => line(format!("\tmovl\t${}, {}\n", s, reg_name(f, data.outs[0])), out),
            None => line(format_inst(f, i, "\tmovl\t%E, %D0\n", namer), out),
        },
        MachOp::Load => {
            if data.width < 32 {
                let mn = if data.sext { "movs" } else { "movz" };
                let suffix = if data.width == 8 { "bl" } else { "wl" };
                line(
                    format_inst(f, i, &format!("\t{}{}\t%A, %D0\n", mn, suffix), namer),
                    out,
                );
            } else {
                line(format_inst(f, i, "\tmovl\t%A, %D0\n", namer), out);
            }
        }
        MachOp::LoadParam => line(format_inst(f, i, "\tmovl\t%A, %D0\n", namer), out),
        MachOp::Store => line(format_inst(f, i, "\tmov%M\t%S0, %A\n", namer), out),
        MachOp::Lea => line(format_inst(f, i, "\tleal\t%A, %D0\n", namer), out),
        MachOp::Movx => {
            let mn = if data.sext { "movs" } else { "movz" };
            let suffix = if data.width == 8 { "bl" } else { "wl" };
            let src = data.ins[0];
            let short = if data.width == 8 {
                gp_name8(f.vregs[src].reg.unwrap_or(0)).to_string()
            } else {
                ["ax", "cx", "dx", "bx", "si", "di"][f.vregs[src].reg.unwrap_or(0) as usize]
                    .to_string()
            };
            line(
                format!(
                    "\t{}{}\t%{}, {}\n",
                    mn,
                    suffix,
                    short,
                    reg_name(f, data.outs[0])
                ),
                out,
            );
        }
        MachOp::Neg => {
            two_address_fix(f, i, out);
            line(format_inst(f, i, "\tnegl\t%D0\n", namer), out);
        }
        MachOp::Not => {
            two_address_fix(f, i, out);
            line(format_inst(f, i, "\tnotl\t%D0\n", namer), out);
        }
        op if binop_mnemonic(op).is_some() => {
            let mn = binop_mnemonic(op).unwrap();
            if data.outs.is_empty() {
                // Memory-destination form.
                line(format_inst(f, i, &format!("\t{}\t%S0, %A\n", mn), namer), out);
            } else if data.am.is_some() {
                two_address_fix(f, i, out);
                line(format_inst(f, i, &format!("\t{}\t%A, %D0\n", mn), namer), out);
            } else if let Some(imm) = data.imm {
                two_address_fix(f, i, out);
                line(format!("\t{}\t${}, {}\n", mn, imm, reg_name(f, data.outs[0])), out);
            } else if matches!(op, MachOp::Shl | MachOp::Shr | MachOp::Sar) {
                two_address_fix(f, i, out);
                line(format_inst(f, i, &format!("\t{}\t%cl, %D0\n", mn), namer), out);
            } else {
                two_address_fix(f, i, out);
                line(format_inst(f, i, &format!("\t{}\t%S1, %D0\n", mn), namer), out);
            }
        }
        MachOp::Cmp => {
            if let Some(imm) = data.imm {
                line(format!("\tcmpl\t${}, {}\n", imm, reg_name(f, data.ins[0])), out);
            } else {
                line(format_inst(f, i, "\tcmpl\t%S1, %S0\n", namer), out);
            }
        }
        MachOp::Setcc => {
            let cc = data.cond.expect("setcc without a condition");
            let dst = gp_name8(f.vregs[data.outs[0]].reg.unwrap_or(0));
            line(format!("\tset{}\t%{}\n", cc_suffix(cc), dst), out);
        }
        MachOp::Push => line(format_inst(f, i, "\tpushl\t%S0\n", namer), out),
        MachOp::IncSp => {
            if let Some(v) = data.imm {
                line(format!("\taddl\t${}, %esp\n", v), out);
            }
        }
        MachOp::Call => match &data.sym {
            Some(s) => line(format!("\tcall\t{}\n", s), out),
            None => line(format_inst(f, i, "\tcall\t*%S0\n", namer), out),
        },
        MachOp::Ret => {
            line("\tleave\n".to_string(), out);
            line("\tret\n".to_string(), out);
        }
        MachOp::Jmp => {
            // Fall through to the next block in the layout.
            if data.target != next_block {
                line(format_inst(f, i, "\tjmp\t%L\n", namer), out);
            }
        }
        MachOp::Bcc => {
            let cc = data.cond.expect("branch without a condition");
            line(
                format_inst(f, i, &format!("\tj{}\t%L\n", cc_suffix(cc)), namer),
                out,
            );
        }
        MachOp::Nop => line("\tnop\n".to_string(), out),
        // x87 concrete forms.
        MachOp::FLd => line(format_inst(f, i, "\tfld%M\t%A\n", namer), out),
        MachOp::FLdConst(fc) | MachOp::FvConst(fc) => {
            line(format!("\t{}\n", fconst_mnemonic(fc)), out)
        }
        MachOp::FPushSt => line(format_inst(f, i, "\tfld\t%R0\n", namer), out),
        MachOp::FSt => line(format_inst(f, i, "\tfst%M\t%A\n", namer), out),
        MachOp::FStP => line(format_inst(f, i, "\tfstp%M\t%A\n", namer), out),
        MachOp::FXch => line(format_inst(f, i, "\tfxch\t%R0\n", namer), out),
        MachOp::FPop => line("\tfstp\t%st(0)\n".to_string(), out),
        MachOp::FFreeP => line("\tffreep\t%st(0)\n".to_string(), out),
        MachOp::FUcom => line(format_inst(f, i, "\tfucom\t%R0\n", namer), out),
        MachOp::FUcomP => line(format_inst(f, i, "\tfucomp\t%R0\n", namer), out),
        MachOp::FUcomPP => line("\tfucompp\n".to_string(), out),
        MachOp::FUcomI => line(format_inst(f, i, "\tfucomi\t%R0, %st\n", namer), out),
        MachOp::FUcomIP => line(format_inst(f, i, "\tfucomip\t%R0, %st\n", namer), out),
        MachOp::Emms => line("\temms\n".to_string(), out),
        MachOp::FnstCw => line(format_inst(f, i, "\tfnstcw\t%A\n", namer), out),
        MachOp::FldCw => line(format_inst(f, i, "\tfldcw\t%A\n", namer), out),
        op if x87_binop_fmt(op).is_some() => {
            line(format_inst(f, i, x87_binop_fmt(op).unwrap(), namer), out)
        }
        other => {
            // A virtual op survived to emission: the pipeline is broken.
            panic!("cannot emit {:?} in block {}", other, b);
        }
    }
}

/// Emit the whole function as GNU assembler text.
pub fn emit_function(f: &MachFunction, verbose: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\t.text");
    let _ = writeln!(out, "\t.globl\t{}", f.name);
    let _ = writeln!(out, "\t.type\t{}, @function", f.name);
    let _ = writeln!(out, "{}:", f.name);
    let _ = writeln!(out, "\tpushl\t%ebp");
    let _ = writeln!(out, "\tmovl\t%esp, %ebp");

    for (pos, &b) in f.order.iter().enumerate() {
        let next = f.order.get(pos + 1).copied();
        if pos > 0 {
            let _ = writeln!(out, "{}:", block_label(f, b));
        }
        for &i in &f.blocks[b].insts {
            if verbose {
                let _ = writeln!(out, "\t/* %+F {} */", i);
            }
            emit_inst(f, b, i, next, &mut out);
        }
    }

    if !f.literal_pool.is_empty() {
        let _ = writeln!(out, "\t.section\t.rodata");
        for entry in &f.literal_pool {
            let _ = writeln!(out, "{}:", entry.label);
            if entry.width == 32 {
                let _ = writeln!(out, "\t.long\t{}", (f64::from_bits(entry.bits) as f32).to_bits());
            } else {
                let _ = writeln!(out, "\t.quad\t0x{:016x}", entry.bits);
            }
        }
    }
    let _ = writeln!(out, "\t.size\t{}, .-{}", f.name, f.name);
    out
}
