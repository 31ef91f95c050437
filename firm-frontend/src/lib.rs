//! A frontend helper for building firm IR in SSA form on the fly.
//!
//! Frontends map each source variable to a numbered slot and write straight-
//! line code block by block; the builder maintains per-block value
//! dictionaries and inserts Phis lazily, so the graph is in SSA form from
//! the first instruction without a separate conversion pass. Blocks whose
//! predecessors are not all known yet are *immature*: reads synthesize
//! placeholder Phis that are completed when the block matures.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub mod builder;
pub mod variable;

pub use crate::builder::GraphBuilder;
pub use crate::variable::Variable;
