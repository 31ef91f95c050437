//! Liveness of virtual registers at block boundaries.
//!
//! A backward data-flow over the machine schedule. The per-block sets are
//! bitsets over virtual register indices; interference construction and the
//! x87 simulation both consume them, the latter additionally updating its
//! own block-local set per instruction during simulation.

use crate::be::{MBlock, MInst, MachFunction, VReg};
use crate::bitset::BitSet;
use firm_entity::{EntityRef, SecondaryMap};

/// Live-in/live-out sets per block.
pub struct Liveness {
    live_in: SecondaryMap<MBlock, BitSet>,
    live_out: SecondaryMap<MBlock, BitSet>,
}

impl Liveness {
    /// Compute liveness for `f`.
    pub fn compute(f: &MachFunction) -> Liveness {
        let mut live_in: SecondaryMap<MBlock, BitSet> = SecondaryMap::new();
        let mut live_out: SecondaryMap<MBlock, BitSet> = SecondaryMap::new();

        let mut changed = true;
        while changed {
            changed = false;
            for &b in f.order.iter().rev() {
                // out = union of successors' in
                let mut out = BitSet::new();
                for &s in &f.blocks[b].succs {
                    out.union_with(&live_in[s]);
                }
                // in = gen + (out - kill), walking backwards
                let mut live = out.clone();
                for &i in f.blocks[b].insts.iter().rev() {
                    let inst = &f.insts[i];
                    for &d in &inst.outs {
                        live.remove(d.index());
                    }
                    for &u in &inst.ins {
                        live.insert(u.index());
                    }
                }
                if live_out[b] != out {
                    live_out[b] = out;
                    changed = true;
                }
                if live_in[b] != live {
                    live_in[b] = live;
                    changed = true;
                }
            }
        }
        Liveness { live_in, live_out }
    }

    /// Values live at the entry of `b`.
    pub fn live_in(&self, b: MBlock) -> &BitSet {
        &self.live_in[b]
    }

    /// Values live at the exit of `b`.
    pub fn live_out(&self, b: MBlock) -> &BitSet {
        &self.live_out[b]
    }

    /// Is `v` live after instruction `at` (position `pos` in `block`)?
    ///
    /// Scans forward through the remaining schedule; used where the
    /// instruction-granular answer matters (x87 simulation, allocator
    /// affinity costs).
    pub fn live_after(&self, f: &MachFunction, block: MBlock, pos: usize, v: VReg) -> bool {
        for &i in &f.blocks[block].insts[pos + 1..] {
            if f.insts[i].ins.contains(&v) {
                return true;
            }
            if f.insts[i].outs.contains(&v) {
                // Redefinition kills the old value.
                return false;
            }
        }
        self.live_out[block].contains(v.index())
    }

    /// The instruction after which `v` dies within `block`, if it does.
    pub fn last_use_in(&self, f: &MachFunction, block: MBlock, v: VReg) -> Option<MInst> {
        f.blocks[block]
            .insts
            .iter()
            .rev()
            .copied()
            .find(|&i| f.insts[i].ins.contains(&v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::be::{MInstData, MachOp, RegClass, Target};

    #[test]
    fn straight_line_liveness() {
        let mut f = MachFunction::new("f", Target::Ia32);
        let b0 = f.new_block();
        let b1 = f.new_block();
        f.add_edge(b0, b1);

        let x = f.new_vreg(RegClass::Gp);
        let y = f.new_vreg(RegClass::Gp);
        f.push_inst(b0, MInstData::new(MachOp::MovImm).with_outs(&[x]).with_imm(1));
        f.push_inst(b0, MInstData::new(MachOp::Jmp));
        f.push_inst(b1, MInstData::new(MachOp::Copy).with_ins(&[x]).with_outs(&[y]));
        f.push_inst(b1, MInstData::new(MachOp::Ret).with_ins(&[y]));

        let live = Liveness::compute(&f);
        assert!(live.live_out(b0).contains(x.index()));
        assert!(live.live_in(b1).contains(x.index()));
        assert!(!live.live_in(b0).contains(x.index()));
        assert!(!live.live_out(b1).contains(y.index()));
        assert!(live.live_after(&f, b1, 0, y));
        assert!(!live.live_after(&f, b1, 1, y));
    }
}
