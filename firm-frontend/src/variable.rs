//! Variable slots: the frontend's names for mutable source variables.

use firm_entity::entity_impl;

/// An opaque reference to a frontend variable.
///
/// The builder maps each variable to the SSA value holding it per block.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable(u32);
entity_impl!(Variable, "var");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(Variable::from_u32(3).to_string(), "var3");
    }
}
