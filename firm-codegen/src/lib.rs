//! Firm code generation library.
//!
//! A retargetable SSA middle-end and backend: a graph-based intermediate
//! representation constructed in SSA form directly by the frontend, local
//! and global optimizations driven by IR invariants, and a backend pipeline
//! (instruction selection, chunk-coalescing register allocation, the x87
//! stack transformation, scheduling and assembly emission).

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub use firm_entity as entity;

pub mod ana;
pub mod be;
pub mod dbg;
pub mod flags;
pub mod identities;
pub mod ir;
pub mod opt;

mod bitset;
mod result;

pub use crate::result::{FirmError, FirmResult};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
