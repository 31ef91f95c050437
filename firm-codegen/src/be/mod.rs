//! The backend: machine functions, transforms, allocation, emission.
//!
//! The backend transform rewrites a generic IR graph into a
//! [`MachFunction`]: an explicit per-block schedule of target instructions
//! over virtual registers. Register allocation colors the virtual
//! registers, the x87 pass (ia32 only) rewrites virtual floating-point
//! instructions into stack-machine form, and the emitters print GNU
//! assembler syntax.

pub mod emitter;
pub mod ia32;
pub mod liveness;
pub mod regalloc;
pub mod sched;
pub mod sparc;
pub mod transform;

use firm_entity::{entity_impl, PrimaryMap};
use smallvec::SmallVec;

/// A virtual register.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(u32);
entity_impl!(VReg, "v");

/// A machine instruction.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MInst(u32);
entity_impl!(MInst, "i");

/// A machine basic block.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MBlock(u32);
entity_impl!(MBlock, "bb");

/// The compilation target.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Target {
    /// 32-bit x86 with the x87 floating-point stack.
    Ia32,
    /// SPARC V8 with branch delay slots.
    Sparc,
    /// ARM; accepted on the command line, not implemented here.
    Arm,
}

/// The register class of a virtual register.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum RegClass {
    /// General purpose integer registers.
    Gp,
    /// Floating point registers (the virtual x87 registers on ia32).
    Fp,
    /// Condition flags.
    Flags,
}

impl RegClass {
    /// Number of allocatable registers in this class per target.
    pub fn colors(self, target: Target) -> u8 {
        match (self, target) {
            // eax, ebx, ecx, edx, esi, edi; esp/ebp are reserved.
            (RegClass::Gp, Target::Ia32) => 6,
            (RegClass::Fp, Target::Ia32) => 8,
            (RegClass::Flags, _) => 1,
            // %o0-%o5, %l0-%l7, %i0-%i5 would be 20; keep the out/local set.
            (RegClass::Gp, Target::Sparc) => 14,
            (RegClass::Fp, Target::Sparc) => 16,
            (_, Target::Arm) => 0,
        }
    }
}

/// Data stored per virtual register.
#[derive(Clone, Debug)]
pub struct VRegData {
    /// The register class.
    pub class: RegClass,
    /// Bitmask of admissible colors within the class.
    pub admissible: u32,
    /// Estimated cost of spilling this value.
    pub spill_cost: f32,
    /// The color assigned by register allocation.
    pub reg: Option<u8>,
}

/// Floating-point constants the x87 can materialize directly.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FConst {
    /// 1.0 (`fld1`)
    One,
    /// 0.0 (`fldz`)
    Zero,
    /// Pi (`fldpi`)
    Pi,
    /// ln 2 (`fldln2`)
    Ln2,
    /// log10 2 (`fldlg2`)
    Lg2,
    /// log2 e (`fldl2e`)
    L2e,
    /// log2 10 (`fldl2t`)
    L2t,
}

/// Condition codes for conditional branches and sets.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CondCode {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Signed less.
    Lt,
    /// Signed less or equal.
    Le,
    /// Signed greater.
    Gt,
    /// Signed greater or equal.
    Ge,
    /// Unsigned below.
    B,
    /// Unsigned below or equal.
    Be,
    /// Unsigned above.
    A,
    /// Unsigned above or equal.
    Ae,
}

impl CondCode {
    /// The code with operands swapped.
    pub fn reversed(self) -> CondCode {
        match self {
            CondCode::Eq => CondCode::Eq,
            CondCode::Ne => CondCode::Ne,
            CondCode::Lt => CondCode::Gt,
            CondCode::Le => CondCode::Ge,
            CondCode::Gt => CondCode::Lt,
            CondCode::Ge => CondCode::Le,
            CondCode::B => CondCode::A,
            CondCode::Be => CondCode::Ae,
            CondCode::A => CondCode::B,
            CondCode::Ae => CondCode::Be,
        }
    }
}

/// Machine opcodes. One flat namespace; the target field of the function
/// decides which subset is in play and how it prints.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MachOp {
    // ---- target independent ----
    /// Register-to-register copy; source of affinity edges.
    Copy,
    /// Parallel permutation of registers (Phi shuffles).
    Perm,
    /// Keeps operands alive without emitting code.
    Keep,
    /// Adjust the stack pointer by `imm`.
    IncSp,
    /// Unconditional jump to `target`.
    Jmp,
    /// Conditional branch on flags to `target`.
    Bcc,
    /// Call the symbol in `sym`.
    Call,
    /// Return.
    Ret,
    /// No operation (delay slot filler of last resort).
    Nop,

    // ---- integer ----
    /// Integer add.
    Add,
    /// Integer subtract.
    Sub,
    /// Integer multiply.
    Mul,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise exclusive or.
    Xor,
    /// Shift left.
    Shl,
    /// Logical shift right.
    Shr,
    /// Arithmetic shift right.
    Sar,
    /// Bitwise complement.
    Not,
    /// Arithmetic negation.
    Neg,
    /// Load an immediate into a register.
    MovImm,
    /// Memory load through the address mode.
    Load,
    /// Memory store through the address mode.
    Store,
    /// Address computation (ia32 `lea`).
    Lea,
    /// Integer compare, sets flags.
    Cmp,
    /// Zero/sign extending register move (`movzx`/`movsx`).
    Movx,
    /// Set a byte register from flags.
    Setcc,
    /// Push an argument (ia32 calling convention).
    Push,
    /// Load a parameter from the frame.
    LoadParam,

    // ---- x87, virtual forms (before the stack simulation) ----
    /// Virtual floating-point add.
    FvAdd,
    /// Virtual floating-point subtract.
    FvSub,
    /// Virtual floating-point multiply.
    FvMul,
    /// Virtual floating-point divide.
    FvDiv,
    /// Virtual floating-point load.
    FvLoad,
    /// Virtual floating-point store.
    FvStore,
    /// Virtual floating-point constant.
    FvConst(FConst),
    /// Virtual floating-point compare.
    FvCmp,

    // ---- x87, concrete forms (after the stack simulation) ----
    /// `fadd st(i), st` or `fadd st, st(i)`.
    FAdd,
    /// `faddp st(i), st`.
    FAddP,
    /// `fsub` normal form.
    FSub,
    /// `fsubp`.
    FSubP,
    /// `fsubr` reversed form.
    FSubR,
    /// `fsubrp`.
    FSubRP,
    /// `fmul`.
    FMul,
    /// `fmulp`.
    FMulP,
    /// `fdiv`.
    FDiv,
    /// `fdivp`.
    FDivP,
    /// `fdivr`.
    FDivR,
    /// `fdivrp`.
    FDivRP,
    /// Memory load onto the stack (`fld`).
    FLd,
    /// Duplicate a stack slot (`fld st(i)`).
    FPushSt,
    /// Store the top of stack, keeping it (`fst`).
    FSt,
    /// Store and pop (`fstp`).
    FStP,
    /// Exchange st(0) with st(i).
    FXch,
    /// Pop the top of stack (`fstp st(0)`).
    FPop,
    /// Free and pop (`ffreep st(0)`).
    FFreeP,
    /// Materialize a constant (`fld1`, `fldz`, …).
    FLdConst(FConst),
    /// Unordered compare.
    FUcom,
    /// Unordered compare and pop.
    FUcomP,
    /// Unordered compare and pop twice.
    FUcomPP,
    /// Unordered compare into eflags.
    FUcomI,
    /// Unordered compare into eflags and pop.
    FUcomIP,
    /// Clear the floating-point state.
    Emms,
    /// Store the FPU control word.
    FnstCw,
    /// Reload the FPU control word.
    FldCw,
    /// Placeholder control-word store hoisted to the entry.
    FnstCwNop,
}

/// The x87 attributes patched onto a rewritten instruction: stack positions
/// of up to three operands, and how many pops the instruction performs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct X87Attr {
    /// Stack positions per operand slot.
    pub pos: [u8; 3],
    /// Number of `p` suffixes (0, 1 or 2).
    pub pops: u8,
}

/// An address mode: `disp(base, index, scale)` or a symbol.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AmAttr {
    /// The first input is the base register.
    pub base: bool,
    /// The input after the base is the index register.
    pub index: bool,
    /// Scale applied to the index (1, 2, 4, 8).
    pub scale: u8,
    /// Constant displacement.
    pub disp: i32,
    /// Frame-pointer relative (parameter access).
    pub frame_rel: bool,
    /// Symbolic base (a global entity's name).
    pub symbol: Option<String>,
}

/// One machine instruction.
#[derive(Clone, Debug)]
pub struct MInstData {
    /// The opcode.
    pub op: MachOp,
    /// Input virtual registers. Address-mode operands come first.
    pub ins: SmallVec<[VReg; 4]>,
    /// Output virtual registers.
    pub outs: SmallVec<[VReg; 2]>,
    /// Immediate operand.
    pub imm: Option<i64>,
    /// Operand width in bits (8/16/32/64/80).
    pub width: u8,
    /// Sign-extend on load.
    pub sext: bool,
    /// Address mode, if the instruction touches memory.
    pub am: Option<AmAttr>,
    /// Branch target.
    pub target: Option<MBlock>,
    /// Condition code for `Bcc`/`Setcc`.
    pub cond: Option<CondCode>,
    /// Call target or referenced symbol.
    pub sym: Option<String>,
    /// x87 attributes, patched by the stack simulation.
    pub x87: Option<X87Attr>,
    /// SPARC branch annul bit.
    pub annul: bool,
}

impl MInstData {
    /// A blank instruction of the given opcode.
    pub fn new(op: MachOp) -> Self {
        Self {
            op,
            ins: SmallVec::new(),
            outs: SmallVec::new(),
            imm: None,
            width: 32,
            sext: false,
            am: None,
            target: None,
            cond: None,
            sym: None,
            x87: None,
            annul: false,
        }
    }

    /// Builder: set inputs.
    pub fn with_ins(mut self, ins: &[VReg]) -> Self {
        self.ins = SmallVec::from_slice(ins);
        self
    }

    /// Builder: set outputs.
    pub fn with_outs(mut self, outs: &[VReg]) -> Self {
        self.outs = SmallVec::from_slice(outs);
        self
    }

    /// Builder: set the immediate.
    pub fn with_imm(mut self, imm: i64) -> Self {
        self.imm = Some(imm);
        self
    }

    /// Is this a control transfer ending a block?
    pub fn is_terminator(&self) -> bool {
        matches!(self.op, MachOp::Jmp | MachOp::Bcc | MachOp::Ret)
    }

    /// Does this instruction occupy a delay slot of its own or have one?
    pub fn has_delay_slot(&self) -> bool {
        matches!(self.op, MachOp::Jmp | MachOp::Bcc | MachOp::Call | MachOp::Ret)
    }
}

/// One machine basic block.
#[derive(Clone, Debug, Default)]
pub struct MBlockData {
    /// The scheduled instructions.
    pub insts: Vec<MInst>,
    /// Predecessor blocks.
    pub preds: Vec<MBlock>,
    /// Successor blocks.
    pub succs: Vec<MBlock>,
    /// Loop nesting depth, for spill cost estimates.
    pub loop_depth: u32,
}

/// A function in machine form.
pub struct MachFunction {
    /// The function's symbol name.
    pub name: String,
    /// The target this function was transformed for.
    pub target: Target,
    /// All blocks.
    pub blocks: PrimaryMap<MBlock, MBlockData>,
    /// All instructions.
    pub insts: PrimaryMap<MInst, MInstData>,
    /// All virtual registers.
    pub vregs: PrimaryMap<VReg, VRegData>,
    /// Emission order of the blocks.
    pub order: Vec<MBlock>,
    /// Number of floating-point results (x87 return-depth invariant).
    pub n_float_results: u8,
    /// Floating-point literals referenced by label.
    pub literal_pool: Vec<PoolEntry>,
}

/// A floating-point literal emitted into the read-only data section.
#[derive(Clone, Debug)]
pub struct PoolEntry {
    /// The local label of the literal.
    pub label: String,
    /// The raw bit pattern.
    pub bits: u64,
    /// Width in bits (32 or 64).
    pub width: u8,
}

impl MachFunction {
    /// Create an empty function.
    pub fn new(name: &str, target: Target) -> Self {
        Self {
            name: name.to_string(),
            target,
            blocks: PrimaryMap::new(),
            insts: PrimaryMap::new(),
            vregs: PrimaryMap::new(),
            order: Vec::new(),
            n_float_results: 0,
            literal_pool: Vec::new(),
        }
    }

    /// Allocate a virtual register with every color admissible.
    pub fn new_vreg(&mut self, class: RegClass) -> VReg {
        let colors = class.colors(self.target);
        let admissible = if colors >= 32 {
            u32::MAX
        } else {
            (1u32 << colors) - 1
        };
        self.vregs.push(VRegData {
            class,
            admissible,
            spill_cost: 1.0,
            reg: None,
        })
    }

    /// Allocate a virtual register constrained to one color.
    pub fn new_fixed_vreg(&mut self, class: RegClass, color: u8) -> VReg {
        self.vregs.push(VRegData {
            class,
            admissible: 1 << color,
            spill_cost: 1.0,
            reg: None,
        })
    }

    /// Create a block.
    pub fn new_block(&mut self) -> MBlock {
        let b = self.blocks.push(MBlockData::default());
        self.order.push(b);
        b
    }

    /// Append an instruction to a block.
    pub fn push_inst(&mut self, block: MBlock, data: MInstData) -> MInst {
        let i = self.insts.push(data);
        self.blocks[block].insts.push(i);
        i
    }

    /// Insert an instruction at a position within a block.
    pub fn insert_inst(&mut self, block: MBlock, pos: usize, data: MInstData) -> MInst {
        let i = self.insts.push(data);
        self.blocks[block].insts.insert(pos, i);
        i
    }

    /// Insert an instruction before the block's terminator.
    pub fn insert_before_terminator(&mut self, block: MBlock, data: MInstData) -> MInst {
        let pos = self.blocks[block]
            .insts
            .iter()
            .position(|&i| self.insts[i].is_terminator())
            .unwrap_or(self.blocks[block].insts.len());
        self.insert_inst(block, pos, data)
    }

    /// Add a control-flow edge.
    pub fn add_edge(&mut self, from: MBlock, to: MBlock) {
        if !self.blocks[from].succs.contains(&to) {
            self.blocks[from].succs.push(to);
        }
        if !self.blocks[to].preds.contains(&from) {
            self.blocks[to].preds.push(from);
        }
    }

    /// The assigned register of a vreg, after allocation.
    pub fn reg_of(&self, v: VReg) -> u8 {
        self.vregs[v].reg.expect("vreg has no register yet")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vreg_admissibility() {
        let mut f = MachFunction::new("f", Target::Ia32);
        let v = f.new_vreg(RegClass::Gp);
        assert_eq!(f.vregs[v].admissible, 0b11_1111);
        let fixed = f.new_fixed_vreg(RegClass::Gp, 0);
        assert_eq!(f.vregs[fixed].admissible, 1);
    }

    #[test]
    fn insert_before_terminator_lands_before_jmp() {
        let mut f = MachFunction::new("f", Target::Ia32);
        let b = f.new_block();
        f.push_inst(b, MInstData::new(MachOp::Nop));
        f.push_inst(b, MInstData::new(MachOp::Jmp));
        f.insert_before_terminator(b, MInstData::new(MachOp::Copy));
        let ops: Vec<MachOp> = f.blocks[b]
            .insts
            .iter()
            .map(|&i| f.insts[i].op)
            .collect();
        assert_eq!(ops, vec![MachOp::Nop, MachOp::Copy, MachOp::Jmp]);
    }
}
