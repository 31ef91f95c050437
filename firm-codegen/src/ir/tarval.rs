//! Target values: compile-time constants tagged with a mode.
//!
//! A `Tarval` is an opaque scalar the constant folder computes with. All
//! arithmetic obeys the laws of the tarval's mode: two's-complement modulo
//! arithmetic for integers, IEEE 754 for floats. Integer operations take an
//! overflow policy; under `OverflowMode::Bad` an overflowing operation
//! yields the `bad` tarval, which callers (the constant folder, OSR's test
//! replacement) treat as "cannot fold" and leave the IR unchanged.
//!
//! Integer values are stored as masked bit patterns in a `u64`; floats are
//! stored as `f64` bits (the 80-bit x87 mode `E` is computed in double
//! precision, which is the only loss this representation accepts).

use crate::ir::mode::{self, Mode};
use bitflags::bitflags;
use core::fmt;

bitflags! {
    /// The possible outcomes of a comparison, as a bitset.
    ///
    /// A `Cmp` node tests whether the actual outcome is contained in its
    /// relation attribute. `UNORDERED` covers NaN comparisons.
    #[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
    pub struct Relation: u8 {
        /// Operands compare equal.
        const EQUAL = 1;
        /// Left operand is less.
        const LESS = 2;
        /// Left operand is greater.
        const GREATER = 4;
        /// Operands are unordered (float NaN).
        const UNORDERED = 8;
    }
}

impl Relation {
    /// Less or equal.
    pub const LESS_EQUAL: Relation = Relation::LESS.union(Relation::EQUAL);
    /// Greater or equal.
    pub const GREATER_EQUAL: Relation = Relation::GREATER.union(Relation::EQUAL);
    /// Less or greater ("not equal" on ordered values).
    pub const LESS_GREATER: Relation = Relation::LESS.union(Relation::GREATER);
    /// Any ordered outcome.
    pub const ORDERED: Relation =
        Relation::LESS.union(Relation::EQUAL).union(Relation::GREATER);

    /// The relation with left and right operand exchanged.
    pub fn reversed(self) -> Relation {
        let mut r = self & (Relation::EQUAL | Relation::UNORDERED);
        if self.contains(Relation::LESS) {
            r |= Relation::GREATER;
        }
        if self.contains(Relation::GREATER) {
            r |= Relation::LESS;
        }
        r
    }

    /// The complementary relation.
    pub fn negated(self) -> Relation {
        self.complement()
    }
}

/// How integer overflow is treated by tarval arithmetic.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum OverflowMode {
    /// Overflowing operations produce the bad tarval.
    Bad,
    /// Results wrap modulo 2^width.
    #[default]
    Wrap,
    /// Results saturate at the mode's min/max.
    Saturate,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
enum TvKind {
    /// Masked value bits of an integer or reference mode.
    Int(u64),
    /// Bit pattern of an `f64`.
    Float(u64),
    /// Internal boolean.
    Bool(bool),
    /// Result of an undefined operation.
    Bad,
    /// A value whose identity does not matter.
    Unknown,
}

/// A compile-time constant tagged with a mode.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Tarval {
    mode: Mode,
    kind: TvKind,
}

impl Tarval {
    /// The bad tarval: result of undefined or overflowing operations.
    pub fn bad() -> Tarval {
        Tarval {
            mode: mode::BAD,
            kind: TvKind::Bad,
        }
    }

    /// The unknown tarval.
    pub fn unknown() -> Tarval {
        Tarval {
            mode: mode::ANY,
            kind: TvKind::Unknown,
        }
    }

    /// Create an integer (or reference) tarval, wrapping into the mode.
    pub fn new_int(m: Mode, value: i64) -> Tarval {
        debug_assert!(m.is_int() || m.is_reference());
        Tarval {
            mode: m,
            kind: TvKind::Int((value as u64) & m.modulo_mask()),
        }
    }

    /// Create a float tarval.
    pub fn new_float(m: Mode, value: f64) -> Tarval {
        debug_assert!(m.is_float());
        let rounded = if m == mode::F { f64::from(value as f32) } else { value };
        Tarval {
            mode: m,
            kind: TvKind::Float(rounded.to_bits()),
        }
    }

    /// The internal-boolean true tarval.
    pub fn b_true() -> Tarval {
        Tarval {
            mode: mode::B,
            kind: TvKind::Bool(true),
        }
    }

    /// The internal-boolean false tarval.
    pub fn b_false() -> Tarval {
        Tarval {
            mode: mode::B,
            kind: TvKind::Bool(false),
        }
    }

    /// Boolean tarval from a Rust bool.
    pub fn b_val(v: bool) -> Tarval {
        if v {
            Tarval::b_true()
        } else {
            Tarval::b_false()
        }
    }

    /// The null (all zeroes) tarval of a mode.
    pub fn null(m: Mode) -> Tarval {
        if m.is_float() {
            Tarval::new_float(m, 0.0)
        } else if m == mode::B {
            Tarval::b_false()
        } else {
            Tarval::new_int(m, 0)
        }
    }

    /// The one tarval of a mode.
    pub fn one(m: Mode) -> Tarval {
        if m.is_float() {
            Tarval::new_float(m, 1.0)
        } else {
            Tarval::new_int(m, 1)
        }
    }

    /// The all-ones tarval of an integer mode.
    pub fn all_one(m: Mode) -> Tarval {
        Tarval::new_int(m, -1)
    }

    /// The smallest value of an integer mode.
    pub fn min(m: Mode) -> Tarval {
        debug_assert!(m.is_int());
        if m.is_signed() {
            Tarval::new_int(m, -(1i64 << (m.bits() - 1)))
        } else {
            Tarval::new_int(m, 0)
        }
    }

    /// The largest value of an integer mode.
    pub fn max(m: Mode) -> Tarval {
        debug_assert!(m.is_int());
        if m.is_signed() {
            Tarval::new_int(m, (1i64 << (m.bits() - 1)) - 1)
        } else {
            Tarval {
                mode: m,
                kind: TvKind::Int(m.modulo_mask()),
            }
        }
    }

    /// The mode of this tarval.
    pub fn mode(self) -> Mode {
        self.mode
    }

    /// Is this the bad tarval?
    pub fn is_bad(self) -> bool {
        matches!(self.kind, TvKind::Bad)
    }

    /// Is this a usable constant (neither bad nor unknown)?
    pub fn is_constant(self) -> bool {
        !matches!(self.kind, TvKind::Bad | TvKind::Unknown)
    }

    /// Is this the null value of its mode?
    pub fn is_null(self) -> bool {
        match self.kind {
            TvKind::Int(v) => v == 0,
            TvKind::Float(bits) => f64::from_bits(bits) == 0.0,
            TvKind::Bool(b) => !b,
            _ => false,
        }
    }

    /// Is this the one value of its mode?
    pub fn is_one(self) -> bool {
        match self.kind {
            TvKind::Int(v) => v == 1,
            TvKind::Float(bits) => f64::from_bits(bits) == 1.0,
            TvKind::Bool(b) => b,
            _ => false,
        }
    }

    /// Is this the all-bits-one value of its integer mode?
    pub fn is_all_one(self) -> bool {
        match self.kind {
            TvKind::Int(v) => v == self.mode.modulo_mask(),
            TvKind::Bool(b) => b,
            _ => false,
        }
    }

    /// Is this a negative value under its mode's signedness?
    pub fn is_negative(self) -> bool {
        match self.kind {
            TvKind::Int(_) => self.mode.is_signed() && self.as_i64() < 0,
            TvKind::Float(bits) => f64::from_bits(bits) < 0.0,
            _ => false,
        }
    }

    /// The value interpreted under the mode's signedness.
    pub fn as_i64(self) -> i64 {
        match self.kind {
            TvKind::Int(v) => {
                let bits = self.mode.bits();
                if self.mode.is_signed() && bits < 64 {
                    // Sign extend from the mode's width.
                    let shift = 64 - bits;
                    ((v << shift) as i64) >> shift
                } else {
                    v as i64
                }
            }
            TvKind::Bool(b) => b as i64,
            _ => panic!("as_i64 on non-integer tarval"),
        }
    }

    /// The raw masked value bits.
    pub fn as_u64(self) -> u64 {
        match self.kind {
            TvKind::Int(v) => v,
            TvKind::Bool(b) => b as u64,
            _ => panic!("as_u64 on non-integer tarval"),
        }
    }

    /// The float value.
    pub fn as_f64(self) -> f64 {
        match self.kind {
            TvKind::Float(bits) => f64::from_bits(bits),
            _ => panic!("as_f64 on non-float tarval"),
        }
    }

    /// The boolean value.
    pub fn as_bool(self) -> bool {
        match self.kind {
            TvKind::Bool(b) => b,
            _ => panic!("as_bool on non-boolean tarval"),
        }
    }

    /// If this is an integer power of two, its exponent.
    pub fn is_power_of_2(self) -> Option<u32> {
        match self.kind {
            TvKind::Int(v) if v != 0 && (v & (v - 1)) == 0 => Some(v.trailing_zeros()),
            _ => None,
        }
    }

    fn from_wide(m: Mode, wide: i128, ovf: OverflowMode) -> Tarval {
        let (lo, hi): (i128, i128) = if m.is_signed() {
            (
                -(1i128 << (m.bits() - 1)),
                (1i128 << (m.bits() - 1)) - 1,
            )
        } else {
            (0, m.modulo_mask() as i128)
        };
        if wide < lo || wide > hi {
            match ovf {
                OverflowMode::Bad => return Tarval::bad(),
                OverflowMode::Wrap => {}
                OverflowMode::Saturate => {
                    return Tarval::new_int(m, if wide < lo { lo as i64 } else { hi as i64 });
                }
            }
        }
        Tarval::new_int(m, wide as i64)
    }

    fn wide(self) -> i128 {
        if self.mode.is_signed() {
            self.as_i64() as i128
        } else {
            self.as_u64() as i128
        }
    }

    fn binop(
        self,
        other: Tarval,
        ovf: OverflowMode,
        int_op: impl Fn(i128, i128) -> Option<i128>,
        float_op: impl Fn(f64, f64) -> f64,
    ) -> Tarval {
        if !self.is_constant() || !other.is_constant() || self.mode != other.mode {
            return Tarval::bad();
        }
        match self.kind {
            TvKind::Int(_) => match int_op(self.wide(), other.wide()) {
                Some(wide) => Tarval::from_wide(self.mode, wide, ovf),
                None => Tarval::bad(),
            },
            TvKind::Float(_) => Tarval::new_float(self.mode, float_op(self.as_f64(), other.as_f64())),
            _ => Tarval::bad(),
        }
    }

    /// Addition under the mode's laws.
    pub fn add(self, other: Tarval, ovf: OverflowMode) -> Tarval {
        self.binop(other, ovf, |a, b| Some(a + b), |a, b| a + b)
    }

    /// Subtraction.
    pub fn sub(self, other: Tarval, ovf: OverflowMode) -> Tarval {
        self.binop(other, ovf, |a, b| Some(a - b), |a, b| a - b)
    }

    /// Multiplication.
    pub fn mul(self, other: Tarval, ovf: OverflowMode) -> Tarval {
        self.binop(other, ovf, |a, b| Some(a * b), |a, b| a * b)
    }

    /// Division. Integer division by zero yields bad.
    pub fn div(self, other: Tarval, ovf: OverflowMode) -> Tarval {
        self.binop(
            other,
            ovf,
            |a, b| if b == 0 { None } else { Some(a / b) },
            |a, b| a / b,
        )
    }

    /// Remainder. Division by zero yields bad.
    pub fn rem(self, other: Tarval, ovf: OverflowMode) -> Tarval {
        self.binop(
            other,
            ovf,
            |a, b| if b == 0 { None } else { Some(a % b) },
            |a, b| a % b,
        )
    }

    /// Arithmetic negation.
    pub fn neg(self, ovf: OverflowMode) -> Tarval {
        match self.kind {
            TvKind::Int(_) => Tarval::from_wide(self.mode, -self.wide(), ovf),
            TvKind::Float(_) => Tarval::new_float(self.mode, -self.as_f64()),
            _ => Tarval::bad(),
        }
    }

    /// Absolute value.
    pub fn abs(self, ovf: OverflowMode) -> Tarval {
        if self.is_negative() {
            self.neg(ovf)
        } else if self.is_constant() {
            self
        } else {
            Tarval::bad()
        }
    }

    fn bitop(self, other: Tarval, f: impl Fn(u64, u64) -> u64) -> Tarval {
        if !self.is_constant() || !other.is_constant() || self.mode != other.mode {
            return Tarval::bad();
        }
        match (self.kind, other.kind) {
            (TvKind::Int(a), TvKind::Int(b)) => Tarval {
                mode: self.mode,
                kind: TvKind::Int(f(a, b) & self.mode.modulo_mask()),
            },
            (TvKind::Bool(a), TvKind::Bool(b)) => Tarval::b_val(f(a as u64, b as u64) != 0),
            _ => Tarval::bad(),
        }
    }

    /// Bitwise and.
    pub fn and(self, other: Tarval) -> Tarval {
        self.bitop(other, |a, b| a & b)
    }

    /// Bitwise or.
    pub fn or(self, other: Tarval) -> Tarval {
        self.bitop(other, |a, b| a | b)
    }

    /// Bitwise exclusive or.
    pub fn eor(self, other: Tarval) -> Tarval {
        self.bitop(other, |a, b| a ^ b)
    }

    /// Bitwise complement.
    pub fn not(self) -> Tarval {
        match self.kind {
            TvKind::Int(v) => Tarval {
                mode: self.mode,
                kind: TvKind::Int(!v & self.mode.modulo_mask()),
            },
            TvKind::Bool(b) => Tarval::b_val(!b),
            _ => Tarval::bad(),
        }
    }

    fn shift_count(count: Tarval) -> Option<u32> {
        match count.kind {
            TvKind::Int(v) => Some(v as u32),
            _ => None,
        }
    }

    /// Shift left. Shifting by the width or more yields bad.
    pub fn shl(self, count: Tarval) -> Tarval {
        match (self.kind, Tarval::shift_count(count)) {
            (TvKind::Int(v), Some(c)) if c < self.mode.bits() => Tarval {
                mode: self.mode,
                kind: TvKind::Int((v << c) & self.mode.modulo_mask()),
            },
            _ => Tarval::bad(),
        }
    }

    /// Logical shift right.
    pub fn shr(self, count: Tarval) -> Tarval {
        match (self.kind, Tarval::shift_count(count)) {
            (TvKind::Int(v), Some(c)) if c < self.mode.bits() => Tarval {
                mode: self.mode,
                kind: TvKind::Int(v >> c),
            },
            _ => Tarval::bad(),
        }
    }

    /// Arithmetic shift right (sign bit replicates).
    pub fn shrs(self, count: Tarval) -> Tarval {
        match (self.kind, Tarval::shift_count(count)) {
            (TvKind::Int(_), Some(c)) if c < self.mode.bits() => {
                Tarval::new_int(self.mode, self.as_i64() >> c)
            }
            _ => Tarval::bad(),
        }
    }

    /// Rotate left within the mode's width.
    pub fn rotl(self, count: Tarval) -> Tarval {
        match (self.kind, Tarval::shift_count(count)) {
            (TvKind::Int(v), Some(c)) => {
                let bits = self.mode.bits();
                let c = c % bits;
                let rotated = ((v << c) | (v >> (bits - c).min(63))) & self.mode.modulo_mask();
                Tarval {
                    mode: self.mode,
                    kind: TvKind::Int(if c == 0 { v } else { rotated }),
                }
            }
            _ => Tarval::bad(),
        }
    }

    /// Convert this tarval to another mode. May lose information when
    /// narrowing; an unrepresentable float-to-int conversion yields bad.
    pub fn convert_to(self, m: Mode) -> Tarval {
        if !self.is_constant() {
            return Tarval::bad();
        }
        match self.kind {
            TvKind::Int(_) => {
                if m.is_int() || m.is_reference() {
                    Tarval::new_int(m, self.as_i64())
                } else if m.is_float() {
                    let v = if self.mode.is_signed() {
                        self.as_i64() as f64
                    } else {
                        self.as_u64() as f64
                    };
                    Tarval::new_float(m, v)
                } else {
                    Tarval::bad()
                }
            }
            TvKind::Float(_) => {
                if m.is_float() {
                    Tarval::new_float(m, self.as_f64())
                } else if m.is_int() {
                    let v = self.as_f64().trunc();
                    if v.is_nan() || v < -(2f64.powi(63)) || v >= 2f64.powi(63) {
                        Tarval::bad()
                    } else {
                        Tarval::from_wide(m, v as i64 as i128, OverflowMode::Bad)
                    }
                } else {
                    Tarval::bad()
                }
            }
            TvKind::Bool(b) => {
                if m.is_int() {
                    Tarval::new_int(m, b as i64)
                } else {
                    Tarval::bad()
                }
            }
            _ => Tarval::bad(),
        }
    }

    /// Compare two tarvals; the result is a single relation bit
    /// (or `UNORDERED` for NaN operands, or empty for incomparable ones).
    pub fn compare(self, other: Tarval) -> Relation {
        if !self.is_constant() || !other.is_constant() || self.mode != other.mode {
            return Relation::empty();
        }
        match (self.kind, other.kind) {
            (TvKind::Int(_), TvKind::Int(_)) => {
                let (a, b) = (self.wide(), other.wide());
                if a == b {
                    Relation::EQUAL
                } else if a < b {
                    Relation::LESS
                } else {
                    Relation::GREATER
                }
            }
            (TvKind::Float(_), TvKind::Float(_)) => {
                let (a, b) = (self.as_f64(), other.as_f64());
                if a.is_nan() || b.is_nan() {
                    Relation::UNORDERED
                } else if a == b {
                    Relation::EQUAL
                } else if a < b {
                    Relation::LESS
                } else {
                    Relation::GREATER
                }
            }
            (TvKind::Bool(a), TvKind::Bool(b)) => {
                if a == b {
                    Relation::EQUAL
                } else if !a {
                    Relation::LESS
                } else {
                    Relation::GREATER
                }
            }
            _ => Relation::empty(),
        }
    }
}

impl fmt::Display for Tarval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            TvKind::Int(_) => {
                if self.mode.is_signed() {
                    write!(f, "{}{}", self.as_i64(), self.mode)
                } else {
                    write!(f, "{}{}", self.as_u64(), self.mode)
                }
            }
            TvKind::Float(bits) => write!(f, "{}{}", f64::from_bits(bits), self.mode),
            TvKind::Bool(b) => write!(f, "{}", b),
            TvKind::Bad => write!(f, "<BAD>"),
            TvKind::Unknown => write!(f, "<UNKNOWN>"),
        }
    }
}

impl fmt::Debug for Tarval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        (self as &dyn fmt::Display).fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::mode;

    #[test]
    fn wrap_and_bad_overflow() {
        let max = Tarval::max(mode::BS);
        let one = Tarval::one(mode::BS);
        assert_eq!(max.add(one, OverflowMode::Wrap), Tarval::min(mode::BS));
        assert!(max.add(one, OverflowMode::Bad).is_bad());
        assert_eq!(
            max.add(one, OverflowMode::Saturate),
            Tarval::max(mode::BS)
        );
    }

    #[test]
    fn unsigned_wraps() {
        let a = Tarval::new_int(mode::BU, 200);
        let b = Tarval::new_int(mode::BU, 100);
        assert_eq!(a.add(b, OverflowMode::Wrap).as_u64(), 44);
        assert!(a.add(b, OverflowMode::Bad).is_bad());
    }

    #[test]
    fn division() {
        let a = Tarval::new_int(mode::IS, -7);
        let b = Tarval::new_int(mode::IS, 2);
        assert_eq!(a.div(b, OverflowMode::Wrap).as_i64(), -3);
        assert_eq!(a.rem(b, OverflowMode::Wrap).as_i64(), -1);
        assert!(a.div(Tarval::null(mode::IS), OverflowMode::Wrap).is_bad());
    }

    #[test]
    fn shifts() {
        let v = Tarval::new_int(mode::IU, 5);
        let two = Tarval::new_int(mode::IU, 2);
        assert_eq!(v.shl(two).as_u64(), 20);
        assert_eq!(v.shr(two).as_u64(), 1);
        let neg = Tarval::new_int(mode::IS, -8);
        assert_eq!(neg.shrs(two).as_i64(), -2);
        let wide = Tarval::new_int(mode::IU, 40);
        assert!(v.shl(wide).is_bad());
    }

    #[test]
    fn power_of_two() {
        assert_eq!(Tarval::new_int(mode::IS, 8).is_power_of_2(), Some(3));
        assert_eq!(Tarval::new_int(mode::IS, 5).is_power_of_2(), None);
        assert_eq!(Tarval::new_int(mode::IS, 0).is_power_of_2(), None);
    }

    #[test]
    fn comparisons() {
        let a = Tarval::new_int(mode::IS, -1);
        let b = Tarval::new_int(mode::IS, 1);
        assert_eq!(a.compare(b), Relation::LESS);
        // The same bits compare differently in unsigned mode.
        let au = Tarval::new_int(mode::IU, -1);
        let bu = Tarval::new_int(mode::IU, 1);
        assert_eq!(au.compare(bu), Relation::GREATER);

        let nan = Tarval::new_float(mode::D, f64::NAN);
        assert_eq!(nan.compare(nan), Relation::UNORDERED);
    }

    #[test]
    fn conversions() {
        let v = Tarval::new_int(mode::IS, -1);
        assert_eq!(v.convert_to(mode::BS).as_i64(), -1);
        assert_eq!(v.convert_to(mode::BU).as_u64(), 255);
        assert_eq!(v.convert_to(mode::D).as_f64(), -1.0);
        let f = Tarval::new_float(mode::D, 3.9);
        assert_eq!(f.convert_to(mode::IS).as_i64(), 3);
        let huge = Tarval::new_float(mode::D, 1e30);
        assert!(huge.convert_to(mode::IS).is_bad());
    }

    #[test]
    fn relation_ops() {
        assert_eq!(Relation::LESS.reversed(), Relation::GREATER);
        assert_eq!(Relation::LESS_EQUAL.reversed(), Relation::GREATER_EQUAL);
        assert!(Relation::LESS_EQUAL.contains(Relation::EQUAL));
    }
}
