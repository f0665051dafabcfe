//! Block planning and worker-side evaluation.

use fabriq_fixed::{dot_detect, QMatrix, Q31};

use crate::rowset::RowSet;
use crate::seed;
use crate::{CodingError, Result};

/// One planned coded block of a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSpec {
    /// Block index within the cycle
    pub block_id: u32,
    /// Derived combiner seed
    pub seed: u64,
    /// Row selector regenerable from `(cycle, block_id)`
    pub rows: RowSet,
}

/// Plans the coded blocks of each cycle.
///
/// The redundancy factor is carried as an exact rational so the primary and
/// the backup always agree on the block count; a float here could round
/// differently after a reconfiguration computed on another node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoder {
    m: usize,
    redundancy_num: u32,
    redundancy_den: u32,
}

impl Encoder {
    /// Creates an encoder for an `m`-row matrix with redundancy
    /// `rho = num / den` (default deployment uses 1/2).
    pub fn new(m: usize, redundancy_num: u32, redundancy_den: u32) -> Self {
        debug_assert!(redundancy_den > 0, "redundancy denominator must be nonzero");
        Self { m, redundancy_num, redundancy_den }
    }

    /// Number of matrix rows.
    pub fn m(&self) -> usize {
        self.m
    }

    /// The redundancy factor as `(numerator, denominator)`.
    pub fn redundancy(&self) -> (u32, u32) {
        (self.redundancy_num, self.redundancy_den)
    }

    /// `K = ceil(m * (1 + rho))`, computed exactly in integers.
    pub fn block_count(&self) -> u32 {
        let m = self.m as u64;
        let num = u64::from(self.redundancy_num);
        let den = u64::from(self.redundancy_den);
        // m * (1 + num/den) = m * (den + num) / den, rounded up
        ((m * (den + num)).div_ceil(den)) as u32
    }

    /// Plans the `K` block specs for a cycle.
    pub fn plan_cycle(&self, cycle: u64) -> Vec<BlockSpec> {
        (0..self.block_count())
            .map(|block_id| {
                let seed = seed::derive_seed(cycle, block_id);
                BlockSpec { block_id, seed, rows: seed::derive_rows(seed, self.m) }
            })
            .collect()
    }
}

/// Combines the selected matrix rows by componentwise saturating addition.
///
/// Returns the combined row and whether any component saturated. A
/// saturated combination is still a valid coded block on the wire, but the
/// decoder will avoid building its basis on it when it has a choice.
pub fn combine_rows(matrix: &QMatrix, rows: &RowSet) -> Result<(Vec<Q31>, bool)> {
    let mut combined = vec![Q31::ZERO; matrix.cols()];
    let mut saturated = false;
    for row in rows.iter() {
        if row >= matrix.rows() {
            return Err(CodingError::RowOutOfRange { row, rows: matrix.rows() });
        }
        for (acc, &value) in combined.iter_mut().zip(matrix.row(row)) {
            let (sum, sat) = acc.add_detect(value);
            *acc = sum;
            saturated |= sat;
        }
    }
    Ok((combined, saturated))
}

/// Worker evaluation of one block: combine-then-dot.
///
/// The dot-then-combine order is forbidden — saturating addition is not
/// distributive over the saturating dot, and the decoder assumes every node
/// evaluated in this order.
pub fn evaluate_block(matrix: &QMatrix, rows: &RowSet, x: &[Q31]) -> Result<(Q31, bool)> {
    let (combined, combine_sat) = combine_rows(matrix, rows)?;
    let (y, dot_sat) = dot_detect(&combined, x)?;
    Ok((y, combine_sat || dot_sat))
}
