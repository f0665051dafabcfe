//! The Q1.31 saturating scalar.
//!
//! A [`Q31`] is a signed 32-bit integer interpreted as a real value in
//! `[-1, 1 - 2^-31]` with implicit scale `2^-31`. All arithmetic saturates:
//! results outside the representable range clamp to the nearest endpoint
//! instead of wrapping. Multiplication widens to 64 bits and shifts right
//! arithmetically by 31; that shift is the fixed rounding rule shared by
//! every node.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of fractional bits in the Q1.31 format
pub const FRAC_BITS: u32 = 31;

/// A Q1.31 fixed-point scalar.
///
/// The in-memory and wire representation is the raw `i32`; conversions to and
/// from the integer representation are bitwise transparent. Float conversions
/// exist for bootstrap and diagnostics only and never appear on the hot path.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Q31(i32);

impl Q31 {
    /// The largest representable value, `1 - 2^-31`.
    pub const MAX: Self = Self(i32::MAX);

    /// The smallest representable value, `-1`.
    pub const MIN: Self = Self(i32::MIN);

    /// Zero.
    pub const ZERO: Self = Self(0);

    /// Creates a scalar from its raw two's-complement bits.
    #[inline]
    pub const fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    /// Returns the raw two's-complement bits.
    #[inline]
    pub const fn to_bits(self) -> i32 {
        self.0
    }

    /// Saturating addition.
    #[inline]
    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction.
    #[inline]
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Saturating addition that also reports whether the result clamped.
    #[inline]
    pub fn add_detect(self, rhs: Self) -> (Self, bool) {
        let wide = i64::from(self.0) + i64::from(rhs.0);
        clamp_i64(wide)
    }

    /// Saturating multiplication.
    ///
    /// The product is formed in 64 bits, shifted right arithmetically by 31,
    /// and saturated into the 32-bit range. The arithmetic shift is the fixed
    /// rounding rule: it must be bit-identical across all nodes, which
    /// forbids FMA, extended-precision intermediates, and reassociation.
    #[inline]
    pub fn saturating_mul(self, rhs: Self) -> Self {
        self.mul_detect(rhs).0
    }

    /// Saturating multiplication that also reports whether the result clamped.
    #[inline]
    pub fn mul_detect(self, rhs: Self) -> (Self, bool) {
        let wide = (i64::from(self.0) * i64::from(rhs.0)) >> FRAC_BITS;
        clamp_i64(wide)
    }

    /// Converts a float into the nearest representable Q1.31 value.
    ///
    /// Bootstrap/diagnostic path only: the control loop itself never touches
    /// floats. Values outside `[-1, 1 - 2^-31]` clamp.
    pub fn from_f64(value: f64) -> Self {
        let scaled = value * f64::from(1u32 << FRAC_BITS);
        if scaled >= f64::from(i32::MAX) {
            Self::MAX
        } else if scaled <= f64::from(i32::MIN) {
            Self::MIN
        } else {
            Self(scaled as i32)
        }
    }

    /// Converts to a float for diagnostics and logging.
    pub fn to_f64(self) -> f64 {
        f64::from(self.0) / f64::from(1u32 << FRAC_BITS)
    }
}

/// Clamps a 64-bit intermediate into Q1.31, reporting whether it clamped.
#[inline]
fn clamp_i64(wide: i64) -> (Q31, bool) {
    if wide > i64::from(i32::MAX) {
        (Q31::MAX, true)
    } else if wide < i64::from(i32::MIN) {
        (Q31::MIN, true)
    } else {
        (Q31(wide as i32), false)
    }
}

impl fmt::Debug for Q31 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q31({:#010x} ~{:.9})", self.0 as u32, self.to_f64())
    }
}

impl fmt::Display for Q31 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9}", self.to_f64())
    }
}

impl From<i32> for Q31 {
    fn from(bits: i32) -> Self {
        Self(bits)
    }
}

impl From<Q31> for i32 {
    fn from(q: Q31) -> Self {
        q.0
    }
}

/// Diagnostic counter of saturation events.
///
/// Saturation is silent in the arithmetic itself but observable here. The
/// counter feeds metrics only; no control decision may read it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SatCounter(u64);

impl SatCounter {
    /// Creates a zeroed counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the saturation flag of one operation.
    #[inline]
    pub fn record(&mut self, saturated: bool) {
        if saturated {
            self.0 += 1;
        }
    }

    /// Total saturation events recorded.
    pub fn count(&self) -> u64 {
        self.0
    }
}
