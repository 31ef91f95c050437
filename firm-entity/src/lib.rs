//! Data structures using entity references as mapping keys.
//!
//! IR objects in firm need to reference other IR objects: nodes reference
//! their operands, entities reference their owning types, loops reference
//! their parents. These references are not implemented as Rust references,
//! both because Rust's ownership and mutability rules make graph-shaped data
//! painful, and because 64-bit pointers take up a lot of space. Instead, an
//! entity reference is a struct wrapping a `u32` index into a table owned by
//! the graph or the program. There is a separate index type for each entity
//! type, so we don't lose type safety.
//!
//! The `entity_impl!` macro defines the boilerplate for an entity reference
//! type; `PrimaryMap` allocates them and `SecondaryMap` attaches side
//! information to them. `PackedOption` stores an optional reference in the
//! space of the reference itself by sacrificing the all-ones index.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub mod packed_option;

mod iter;
mod keys;
mod map;
mod primary;
mod set;

pub use self::iter::{Iter, IterMut};
pub use self::keys::Keys;
pub use self::map::SecondaryMap;
pub use self::packed_option::PackedOption;
pub use self::primary::PrimaryMap;
pub use self::set::EntitySet;

/// A type wrapping a small integer index should implement `EntityRef` so it
/// can be used as the key of a `PrimaryMap` or `SecondaryMap`.
pub trait EntityRef: Copy + Eq {
    /// Create a new entity reference from a small integer.
    /// This should crash if the requested index is not representable.
    fn new(index: usize) -> Self;

    /// Get the index that was used to create this entity reference.
    fn index(self) -> usize;
}

/// Macro which provides the common implementation of a 32-bit entity
/// reference: the `EntityRef` trait, a reserved-value `PackedOption`
/// encoding, and `Display`/`Debug` using the given prefix.
#[macro_export]
macro_rules! entity_impl {
    // Basic traits.
    ($entity:ident) => {
        impl $crate::EntityRef for $entity {
            #[inline]
            fn new(index: usize) -> Self {
                debug_assert!(index < (u32::MAX as usize));
                $entity(index as u32)
            }

            #[inline]
            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl $crate::packed_option::ReservedValue for $entity {
            #[inline]
            fn reserved_value() -> $entity {
                $entity(u32::MAX)
            }

            #[inline]
            fn is_reserved_value(&self) -> bool {
                self.0 == u32::MAX
            }
        }

        impl $entity {
            /// Create a new instance from a `u32`.
            #[allow(dead_code)]
            #[inline]
            pub fn from_u32(x: u32) -> Self {
                debug_assert!(x < u32::MAX);
                $entity(x)
            }

            /// Return the underlying index value as a `u32`.
            #[allow(dead_code)]
            #[inline]
            pub fn as_u32(self) -> u32 {
                self.0
            }
        }
    };

    // Include basic traits plus a textual display format.
    ($entity:ident, $display_prefix:expr) => {
        $crate::entity_impl!($entity);

        impl core::fmt::Display for $entity {
            fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
                write!(f, concat!($display_prefix, "{}"), self.0)
            }
        }

        impl core::fmt::Debug for $entity {
            fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
                (self as &dyn core::fmt::Display).fmt(f)
            }
        }
    };
}
