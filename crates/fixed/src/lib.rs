//! # Fabriq Fixed-Point Engine
//!
//! Deterministic Q1.31 saturating arithmetic for the fabriq control fabric.
//!
//! Every participant in the fabric — primary, backup, and every worker —
//! evaluates the same arithmetic on heterogeneous hardware and must produce
//! bit-identical results, because the rateless decoder assumes a worker's
//! coded equation value equals the primary's reference combination exactly.
//! This crate therefore provides integer-only scalar and dense linear-algebra
//! operations with a single, fixed rounding rule and no floating point on the
//! hot path.
//!
//! - [`Q31`] - saturating Q1.31 scalar in `[-1, 1 - 2^-31]`
//! - [`QVector`] / [`QMatrix`] - dense, row-major containers
//! - [`dot`] / [`matvec`] - 64-bit-accumulator reductions, saturated once
//! - [`SatCounter`] - diagnostic saturation counter (never a control input)
//!
//! ## Example
//!
//! ```rust
//! use fabriq_fixed::{QMatrix, QVector, matvec};
//!
//! let m = QMatrix::identity(2);
//! let x = QVector::from_bits(&[1 << 30, -(1 << 29)]); // [0.5, -0.25]
//! let y = matvec(&m, x.as_slice()).unwrap();
//! assert_eq!(y.len(), 2);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod linalg;
pub mod q31;

pub use linalg::{dot, dot_detect, matvec, QMatrix, QVector};
pub use q31::{Q31, SatCounter};

/// Result type alias for fixed-point operations
pub type Result<T> = std::result::Result<T, FixedError>;

/// Errors that can occur in fixed-point linear algebra
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FixedError {
    /// Operand dimensions do not agree. This is an invariant violation at
    /// the call site: dimensions are cycle-stable and renegotiated only
    /// through a committed reconfiguration.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Length the operation required
        expected: usize,
        /// Length it was given
        actual: usize,
    },
}
