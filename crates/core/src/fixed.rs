//! Signed 64-bit fixed-point arithmetic with 32 fractional bits.
//!
//! All clock-domain accumulators and ratios use this representation. Values
//! are stored as raw `i64` bits; arithmetic wraps on overflow so the result
//! is identical across builds with and without overflow checks.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Number of fractional bits in a [`Fixed32`] value.
pub const FRAC_BITS: u32 = 32;

/// Mask selecting the integer part of the raw representation.
const INT_MASK: i64 = !0xFFFF_FFFF;

/// A signed fixed-point number with 32 integer and 32 fractional bits.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fixed32(i64);

impl Fixed32 {
    pub const ZERO: Fixed32 = Fixed32(0);
    pub const ONE: Fixed32 = Fixed32(1 << FRAC_BITS);

    /// Construct from raw bits.
    pub const fn from_bits(bits: i64) -> Self {
        Fixed32(bits)
    }

    /// Raw two's complement representation.
    pub const fn to_bits(self) -> i64 {
        self.0
    }

    /// Construct from a whole number of units.
    pub const fn from_int(value: i64) -> Self {
        Fixed32(value.wrapping_shl(FRAC_BITS))
    }

    /// `numerator / denominator` rounded toward zero.
    ///
    /// The intermediate product is computed in 128 bits so that frequency
    /// ratios up to the full `u32` range cannot overflow.
    pub fn ratio(numerator: u64, denominator: u64) -> Self {
        debug_assert!(denominator != 0);
        let bits = ((numerator as i128) << FRAC_BITS) / denominator.max(1) as i128;
        Fixed32(bits as i64)
    }

    /// Returns true if the value is strictly greater than zero.
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Round toward negative infinity to a whole number of units.
    pub const fn floor(self) -> Self {
        Fixed32(self.0 & INT_MASK)
    }

    /// Integer part, rounded toward negative infinity.
    pub const fn whole(self) -> i64 {
        self.0 >> FRAC_BITS
    }

    /// Split into the high and low 32-bit words of the raw value.
    pub const fn to_words(self) -> (u32, u32) {
        ((self.0 as u64 >> 32) as u32, self.0 as u32)
    }

    /// Rebuild from the high and low 32-bit words of the raw value.
    pub const fn from_words(hi: u32, lo: u32) -> Self {
        Fixed32((((hi as u64) << 32) | lo as u64) as i64)
    }
}

impl Add for Fixed32 {
    type Output = Fixed32;

    fn add(self, rhs: Fixed32) -> Fixed32 {
        Fixed32(self.0.wrapping_add(rhs.0))
    }
}

impl AddAssign for Fixed32 {
    fn add_assign(&mut self, rhs: Fixed32) {
        self.0 = self.0.wrapping_add(rhs.0);
    }
}

impl Sub for Fixed32 {
    type Output = Fixed32;

    fn sub(self, rhs: Fixed32) -> Fixed32 {
        Fixed32(self.0.wrapping_sub(rhs.0))
    }
}

impl SubAssign for Fixed32 {
    fn sub_assign(&mut self, rhs: Fixed32) {
        self.0 = self.0.wrapping_sub(rhs.0);
    }
}

impl Neg for Fixed32 {
    type Output = Fixed32;

    fn neg(self) -> Fixed32 {
        Fixed32(self.0.wrapping_neg())
    }
}

impl fmt::Debug for Fixed32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fixed32({:.6})", self.0 as f64 / (1u64 << FRAC_BITS) as f64)
    }
}
