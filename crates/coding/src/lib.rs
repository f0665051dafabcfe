//! # Fabriq Coded Computing
//!
//! The rateless (fountain-style) codec that distributes a dense Q1.31
//! matrix-vector product across an unreliable worker pool and reconstructs
//! it from any sufficient subset of responses.
//!
//! For cycle `c` the primary plans `K = ceil(m * (1 + rho))` coded blocks.
//! Block `k` is described entirely by its seed, derived as a keyed hash of
//! `(c, k)`: from the seed a reproducible PRNG selects a subset of the `m`
//! matrix rows (LT-style degree, expected density on the order of
//! `ln m / m`). The worker regenerates the same subset from `(c, k)`,
//! combines the selected rows by componentwise saturating addition, and
//! returns the single dot product of the combined row with `x` — the
//! combine-then-dot order is mandatory because saturating addition does not
//! distribute over the saturating dot.
//!
//! The decoder accumulates indicator vectors, tracks their GF(2) rank, and
//! once rank reaches `m` solves for the original per-row dot products by
//! peeling (with an exact integer elimination fallback). Decoding is
//! bit-exact against the single-node `matvec` oracle whenever no block in
//! the selected basis saturated.
//!
//! - [`seed`] - seed derivation and row-selector regeneration
//! - [`RowSet`] - indicator vector over matrix rows
//! - [`Encoder`] / [`evaluate_block`] - block planning and worker evaluation
//! - [`Decoder`] - rank tracking and reconstruction

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod decoder;
pub mod encoder;
pub mod rowset;
pub mod seed;

pub use decoder::{Decoded, Decoder, Ingest};
pub use encoder::{evaluate_block, combine_rows, BlockSpec, Encoder};
pub use rowset::RowSet;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodingError>;

/// Errors from encoding, evaluation, or decoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodingError {
    /// Underlying fixed-point dimension error
    #[error(transparent)]
    Fixed(#[from] fabriq_fixed::FixedError),

    /// A row index is outside the matrix
    #[error("row {row} out of range for {rows}-row matrix")]
    RowOutOfRange {
        /// Offending row index
        row: usize,
        /// Matrix row count
        rows: usize,
    },

    /// Decode requested before the coefficient rank reached `m`
    #[error("insufficient rank: have {rank}, need {needed}")]
    InsufficientRank {
        /// Current GF(2) rank
        rank: usize,
        /// Required rank (`m`)
        needed: usize,
    },

    /// The accumulated equations contradict each other.
    /// A saturated block slipped into the basis, or a worker diverged from
    /// the reference arithmetic.
    #[error("inconsistent equation system")]
    Inconsistent,

    /// Exact integer elimination overflowed its 128-bit intermediates
    #[error("decode arithmetic overflow")]
    ArithmeticOverflow,
}
