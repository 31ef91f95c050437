//! SPARC assembly emission (GNU assembler syntax).
//!
//! Every control transfer is followed by its delay slot: the chosen filler
//! indented by two tabs, or a `nop` when no filler was found.

use crate::be::emitter::{block_label, format_inst};
use crate::be::sparc::{fill_delay_slots, gp_name, DelaySlots, SparcCpu};
use crate::be::{CondCode, MInst, MachFunction, MachOp, RegClass, VReg};
use std::fmt::Write;

fn reg_name(f: &MachFunction, v: VReg) -> String {
    match f.vregs[v].class {
        RegClass::Gp => format!("%{}", gp_name(f.vregs[v].reg.unwrap_or(0))),
        RegClass::Fp => format!("%f{}", f.vregs[v].reg.unwrap_or(0)),
        RegClass::Flags => "%icc".to_string(),
    }
}

fn cond_mnemonic(cc: CondCode) -> &'static str {
    match cc {
        CondCode::Eq => "be",
        CondCode::Ne => "bne",
        CondCode::Lt => "bl",
        CondCode::Le => "ble",
        CondCode::Gt => "bg",
        CondCode::Ge => "bge",
        CondCode::B => "blu",
        CondCode::Be => "bleu",
        CondCode::A => "bgu",
        CondCode::Ae => "bgeu",
    }
}

fn load_mnemonic(width: u8, sext: bool) -> &'static str {
    match (width, sext) {
        (8, true) => "ldsb",
        (8, false) => "ldub",
        (16, true) => "ldsh",
        (16, false) => "lduh",
        _ => "ld",
    }
}

fn store_mnemonic(width: u8) -> &'static str {
    match width {
        8 => "stb",
        16 => "sth",
        _ => "st",
    }
}

fn three_reg(f: &MachFunction, i: MInst, mn: &str) -> String {
    let data = &f.insts[i];
    match data.imm {
        Some(v) => format!(
            "\t{}\t{}, {}, {}\n",
            mn,
            reg_name(f, data.ins[0]),
            v,
            reg_name(f, data.outs[0])
        ),
        None => format_inst(f, i, &format!("\t{}\t%S0, %S1, %D0\n", mn), &reg_name),
    }
}

fn format_one(f: &MachFunction, i: MInst, indent: &str) -> String {
    let data = &f.insts[i];
    let namer = &reg_name;
    let body = match data.op {
        MachOp::Keep | MachOp::Perm | MachOp::Nop => "\tnop\n".to_string(),
        MachOp::Copy => {
            let (src, dst) = (data.ins[0], data.outs[0]);
            if f.vregs[src].reg == f.vregs[dst].reg {
                return String::new();
            }
            format_inst(f, i, "\tmov\t%S0, %D0\n", namer)
        }
        MachOp::MovImm => match &data.sym {
            Some(s) => format!("\tset\t{}, {}\n", s, reg_name(f, data.outs[0])),
            None => format!(
                "\tset\t{}, {}\n",
                data.imm.unwrap_or(0),
                reg_name(f, data.outs[0])
            ),
        },
        MachOp::Add => three_reg(f, i, "add"),
        MachOp::Sub => three_reg(f, i, "sub"),
        MachOp::Mul => three_reg(f, i, "smul"),
        MachOp::And => three_reg(f, i, "and"),
        MachOp::Or => three_reg(f, i, "or"),
        MachOp::Xor => three_reg(f, i, "xor"),
        MachOp::Shl => three_reg(f, i, "sll"),
        MachOp::Shr => three_reg(f, i, "srl"),
        MachOp::Sar => three_reg(f, i, "sra"),
        MachOp::Neg => format_inst(f, i, "\tneg\t%S0, %D0\n", namer),
        MachOp::Not => format_inst(f, i, "\tnot\t%S0, %D0\n", namer),
        MachOp::Load => format_inst(
            f,
            i,
            &format!("\t{}\t%A, %D0\n", load_mnemonic(data.width, data.sext)),
            namer,
        ),
        MachOp::Store => format_inst(
            f,
            i,
            &format!("\t{}\t%S0, %A\n", store_mnemonic(data.width)),
            namer,
        ),
        MachOp::Cmp => match data.imm {
            Some(v) => format!("\tcmp\t{}, {}\n", reg_name(f, data.ins[0]), v),
            None => format_inst(f, i, "\tcmp\t%S0, %S1\n", namer),
        },
        MachOp::Bcc => {
            let cc = data.cond.expect("branch without a condition");
            format_inst(f, i, &format!("\t{}%H\t%L\n", cond_mnemonic(cc)), namer)
        }
        MachOp::Jmp => format_inst(f, i, "\tba\t%L\n", namer),
        MachOp::Call => match &data.sym {
            Some(s) => format!("\tcall\t{}\n", s),
            None => format_inst(f, i, "\tcall\t%S0\n", namer),
        },
        MachOp::Ret => "\tretl\n".to_string(),
        other => panic!("cannot emit {:?} on sparc", other),
    };
    // Delay-slot instructions are indented one tab further.
    if indent.is_empty() {
        body
    } else {
        format!("\t{}", body)
    }
}

/// Emit the whole function, filling delay slots on the way.
pub fn emit_function(f: &mut MachFunction, cpu: SparcCpu, verbose: bool) -> String {
    let slots: DelaySlots = fill_delay_slots(f, cpu);
    let mut out = String::new();
    let _ = writeln!(out, "\t.text");
    let _ = writeln!(out, "\t.globl\t{}", f.name);
    let _ = writeln!(out, "\t.type\t{}, @function", f.name);
    let _ = writeln!(out, "{}:", f.name);

    for (pos, &b) in f.order.iter().enumerate() {
        if pos > 0 {
            let _ = writeln!(out, "{}:", block_label(f, b));
        }
        for &i in &f.blocks[b].insts {
            if slots.moved.contains(&i) {
                continue;
            }
            if verbose {
                let _ = writeln!(out, "\t/* %+F {} */", i);
            }
            out.push_str(&format_one(f, i, ""));
            if f.insts[i].has_delay_slot() {
                match slots.filler[i].expand() {
                    Some(filler) => out.push_str(&format_one(f, filler, "\t")),
                    None => out.push_str("\t\tnop\n"),
                }
            }
        }
    }
    let _ = writeln!(out, "\t.size\t{}, .-{}", f.name, f.name);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::be::{MInstData, Target};

    /// Scenario: a branch with an independent `add` above it prints the
    /// branch followed by the add, indented, in the delay slot.
    #[test]
    fn delay_slot_prints_indented() {
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
        f.push_inst(
            b0,
            MInstData::new(MachOp::Add).with_ins(&[g1, g2]).with_outs(&[g3]),
        );
        let mut bcc = MInstData::new(MachOp::Bcc).with_ins(&[flags]);
        bcc.cond = Some(CondCode::Ne);
        bcc.target = Some(b1);
        f.push_inst(b0, bcc);
        f.push_inst(b1, MInstData::new(MachOp::Ret));

        let asm = emit_function(&mut f, SparcCpu::V8, false);
        let bne_at = asm.find("bne").expect("branch emitted");
        let add_at = asm.find("\t\tadd").expect("delay-slot add indented");
        assert!(add_at > bne_at, "the add sits under the branch");
        // The add is gone from its original position: exactly one add.
        assert_eq!(asm.matches("add\t").count(), 1);
    }
}
