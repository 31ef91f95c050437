//! Optimization control flags.
//!
//! A bitset selecting which optimizations run, both the folds applied during
//! construction and the standalone passes. The default enables everything;
//! the CLI's `-O` levels carve subsets out of it.

use bitflags::bitflags;

bitflags! {
    /// Which optimizations are enabled for a graph.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct OptFlags: u32 {
        /// Evaluate operations on constant operands.
        const CONST_FOLD = 1 << 0;
        /// Algebraic simplification (x+0, x*1, …).
        const ALGEBRAIC = 1 << 1;
        /// Common subexpression elimination via the value table.
        const CSE = 1 << 2;
        /// Control flow straightening and if-simplification.
        const CONTROL_FLOW = 1 << 3;
        /// Load/store forwarding and dead store removal.
        const LDST = 1 << 4;
        /// Hoist stores common to all predecessors of a merge point.
        /// Off by default.
        const LDST_PHI_STORE = 1 << 5;
        /// Operator strength reduction with test replacement.
        const OSR = 1 << 6;
        /// Dead node elimination.
        const DEAD_CODE = 1 << 7;
        /// Floating code placement (GCSE and loop-invariant sinking).
        const PLACEMENT = 1 << 8;
    }
}

impl Default for OptFlags {
    fn default() -> Self {
        Self::all() & !Self::LDST_PHI_STORE
    }
}

impl OptFlags {
    /// The flag set for an optimization level.
    pub fn for_level(level: u8) -> Self {
        match level {
            0 => Self::empty(),
            1 => Self::CONST_FOLD | Self::ALGEBRAIC | Self::CSE | Self::DEAD_CODE,
            _ => Self::default(),
        }
    }
}
