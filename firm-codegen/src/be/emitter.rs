//! Assembly emission support: the format-directive interpreter.
//!
//! Per-opcode emit functions describe an instruction as a small format
//! string; the interpreter pulls operand registers, stack positions,
//! address modes, labels and immediates out of the instruction's
//! attributes:
//!
//! - `%D<n>` — destination register n
//! - `%S<n>` — source register n
//! - `%R<n>` — x87 stack slot n from the patched attributes
//! - `%O` — the address mode's displacement or symbol
//! - `%M` — operand width suffix
//! - `%E` — symbol or immediate expression
//! - `%L` — branch target label
//! - `%A` — the full address mode
//! - `%H` — branch annul hint
//! - `%%` — a literal percent sign

use crate::be::{MInst, MachFunction, MachOp, Target, VReg};

/// Register naming for one target.
pub type RegNamer<'a> = &'a dyn Fn(&MachFunction, VReg) -> String;

/// The label of a machine block.
pub fn block_label(f: &MachFunction, b: crate::be::MBlock) -> String {
    format!(".L{}_{}", f.name, b.as_u32())
}

fn is_fp_op(op: MachOp) -> bool {
    matches!(
        op,
        MachOp::FLd
            | MachOp::FSt
            | MachOp::FStP
            | MachOp::FvLoad
            | MachOp::FvStore
            | MachOp::FnstCw
            | MachOp::FldCw
    )
}

fn width_suffix(op: MachOp, width: u8) -> &'static str {
    if is_fp_op(op) {
        match width {
            32 => "s",
            64 => "l",
            _ => "t",
        }
    } else {
        match width {
            8 => "b",
            16 => "w",
            _ => "l",
        }
    }
}

fn am_string(f: &MachFunction, i: MInst, reg_name: RegNamer) -> String {
    let data = &f.insts[i];
    let Some(am) = &data.am else {
        return String::new();
    };
    // Address-mode registers are the leading inputs, after any value
    // operand for stores and read-modify-write forms.
    let value_operands = match data.op {
        MachOp::Store | MachOp::FvStore | MachOp::FSt | MachOp::FStP => 1,
        MachOp::Load | MachOp::LoadParam | MachOp::Lea | MachOp::FLd | MachOp::FvLoad
        | MachOp::FnstCw | MachOp::FldCw => 0,
        // Anything else with an address mode folded a memory operand; its
        // register operand comes first.
        _ if am.base || am.index => 1,
        _ => 0,
    };
    let mut regs = data.ins.iter().skip(value_operands);
    let base = if am.frame_rel {
        Some("%ebp".to_string())
    } else if am.base {
        regs.next().map(|&v| reg_name(f, v))
    } else {
        None
    };
    let index = if am.index {
        regs.next().map(|&v| reg_name(f, v))
    } else {
        None
    };

    match f.target {
        Target::Sparc => {
            let mut s = String::from("[");
            if let Some(b) = &base {
                s.push_str(b);
            }
            if am.disp != 0 {
                s.push_str(&format!("{:+}", am.disp));
            }
            s.push(']');
            s
        }
        _ => {
            let mut s = String::new();
            if let Some(sym) = &am.symbol {
                s.push_str(sym);
                if am.disp != 0 {
                    s.push_str(&format!("{:+}", am.disp));
                }
            } else if am.disp != 0 || base.is_none() {
                s.push_str(&format!("{}", am.disp));
            }
            if base.is_some() || index.is_some() {
                s.push('(');
                if let Some(b) = &base {
                    s.push_str(b);
                }
                if let Some(ix) = &index {
                    s.push(',');
                    s.push_str(ix);
                    s.push_str(&format!(",{}", am.scale.max(1)));
                }
                s.push(')');
            }
            s
        }
    }
}

/// Interpret a format string against one instruction.
pub fn format_inst(f: &MachFunction, i: MInst, fmt: &str, reg_name: RegNamer) -> String {
    let data = &f.insts[i];
    let mut out = String::new();
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('D') => {
                let n = chars.next().and_then(|d| d.to_digit(10)).unwrap_or(0) as usize;
                out.push_str(&reg_name(f, data.outs[n]));
            }
            Some('S') => {
                let n = chars.next().and_then(|d| d.to_digit(10)).unwrap_or(0) as usize;
                out.push_str(&reg_name(f, data.ins[n]));
            }
            Some('R') => {
                let n = chars.next().and_then(|d| d.to_digit(10)).unwrap_or(0) as usize;
                let pos = data.x87.map(|a| a.pos[n]).unwrap_or(0);
                out.push_str(&format!("%st({})", pos));
            }
            Some('O') => {
                if let Some(am) = &data.am {
                    match &am.symbol {
                        Some(s) => out.push_str(s),
                        None => out.push_str(&format!("{}", am.disp)),
                    }
                }
            }
            Some('M') => out.push_str(width_suffix(data.op, data.width)),
            Some('E') => match (&data.sym, data.imm) {
                (Some(s), _) => out.push_str(s),
                (None, Some(v)) => out.push_str(&format!("${}", v)),
                _ => {}
            },
            Some('L') => {
                if let Some(t) = data.target {
                    out.push_str(&block_label(f, t));
                }
            }
            Some('A') => out.push_str(&am_string(f, i, reg_name)),
            Some('H') => {
                if data.annul {
                    out.push_str(",a");
                }
            }
            Some('%') => out.push('%'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::be::{AmAttr, MInstData, RegClass};

    fn namer(f: &MachFunction, v: VReg) -> String {
        format!("%r{}", f.vregs[v].reg.unwrap_or(9))
    }

    #[test]
    fn directives_expand() {
        let mut f = MachFunction::new("f", Target::Ia32);
        let b = f.new_block();
        let x = f.new_vreg(RegClass::Gp);
        let y = f.new_vreg(RegClass::Gp);
        f.vregs[x].reg = Some(0);
        f.vregs[y].reg = Some(1);
        let mut data = MInstData::new(MachOp::Load).with_ins(&[x]).with_outs(&[y]);
        data.am = Some(AmAttr {
            base: true,
            disp: 8,
            scale: 1,
            ..AmAttr::default()
        });
        let i = f.push_inst(b, data);

        let s = format_inst(&f, i, "mov%M %A, %D0", &namer);
        assert_eq!(s, "movl 8(%r0), %r1");
    }

    #[test]
    fn symbol_address() {
        let mut f = MachFunction::new("f", Target::Ia32);
        let b = f.new_block();
        let y = f.new_vreg(RegClass::Gp);
        f.vregs[y].reg = Some(2);
        let mut data = MInstData::new(MachOp::Load).with_outs(&[y]);
        data.am = Some(AmAttr {
            symbol: Some("counter".to_string()),
            scale: 1,
            ..AmAttr::default()
        });
        let i = f.push_inst(b, data);
        assert_eq!(format_inst(&f, i, "movl %A, %D0", &namer), "movl counter, %r2");
    }
}
