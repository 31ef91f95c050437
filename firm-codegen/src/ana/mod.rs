//! Analyses computed on demand: dominators, out-edges, loops, heights,
//! call-graph information.

pub mod cgana;
pub mod domtree;
pub mod heights;
pub mod looptree;
pub mod outedges;
