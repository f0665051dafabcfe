//! Rank-tracking reconstruction of `y = M * x` from coded equations.
//!
//! Every accepted result frame contributes one equation
//! `sum_{i in S_k} z_i = y_k` over the unknown per-row dot products `z`.
//! The decoder keeps an incremental GF(2) echelon over the indicator
//! vectors to know the moment the accumulated rank reaches `m`, then picks
//! a basis honoring the tie-break order (lower block id, then non-saturated,
//! then earliest arrival — with a whole non-saturated basis preferred when
//! one exists) and solves the integer system: LT peeling first, exact
//! fraction-free elimination when peeling stalls.

use tracing::{debug, trace};

use fabriq_fixed::{Q31, QVector};

use crate::rowset::RowSet;
use crate::{CodingError, Result};

/// Outcome of ingesting one result frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// The equation increased the accumulated rank
    Innovative,
    /// Linearly dependent on what was already held (kept as a basis
    /// alternative for saturation avoidance)
    Redundant,
    /// A block id already ingested this cycle; dropped
    Duplicate,
}

/// A successfully reconstructed cycle output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// The per-row dot products `y = M * x`
    pub y: QVector,
    /// Whether the selected basis contained any saturated block.
    /// A tainted basis decodes, but the output is not bit-exact against
    /// the single-node oracle.
    pub used_saturated: bool,
}

#[derive(Debug, Clone)]
struct ReceivedBlock {
    block_id: u32,
    rows: RowSet,
    y: i64,
    saturated: bool,
    arrival: u64,
}

/// The per-cycle decoder.
#[derive(Debug, Clone)]
pub struct Decoder {
    m: usize,
    blocks: Vec<ReceivedBlock>,
    echelon: Vec<RowSet>,
    arrivals: u64,
}

impl Decoder {
    /// Creates a decoder for an `m`-row system.
    pub fn new(m: usize) -> Self {
        Self { m, blocks: Vec::new(), echelon: Vec::new(), arrivals: 0 }
    }

    /// Number of unknowns (`m`).
    pub fn m(&self) -> usize {
        self.m
    }

    /// Current GF(2) rank of the accumulated indicator vectors.
    pub fn rank(&self) -> usize {
        self.echelon.len()
    }

    /// Whether the accumulated rank suffices to decode.
    pub fn is_decodable(&self) -> bool {
        self.rank() >= self.m
    }

    /// Number of equations held (including redundant ones).
    pub fn received(&self) -> usize {
        self.blocks.len()
    }

    /// Ingests one coded equation.
    ///
    /// Deliveries are in arrival order; the decoder is commutative with
    /// respect to linearly independent blocks, so ordering only matters for
    /// the arrival-time tie-break.
    pub fn ingest(&mut self, block_id: u32, rows: RowSet, y: Q31, saturated: bool) -> Ingest {
        if self.blocks.iter().any(|b| b.block_id == block_id) {
            return Ingest::Duplicate;
        }
        let arrival = self.arrivals;
        self.arrivals += 1;

        let innovative = match self.reduce(&rows) {
            Some(reduced) => {
                self.echelon.push(reduced);
                true
            }
            None => false,
        };
        self.blocks.push(ReceivedBlock {
            block_id,
            rows,
            y: i64::from(y.to_bits()),
            saturated,
            arrival,
        });

        trace!(
            block_id,
            rank = self.rank(),
            needed = self.m,
            saturated,
            "Ingested coded block"
        );
        if innovative {
            Ingest::Innovative
        } else {
            Ingest::Redundant
        }
    }

    /// Reduces a selector against the echelon; `Some(residual)` if it is
    /// linearly independent of everything held so far.
    fn reduce(&self, rows: &RowSet) -> Option<RowSet> {
        let mut residual = rows.clone();
        for pivot_row in &self.echelon {
            let pivot = pivot_row.first().expect("echelon rows are nonzero");
            if residual.contains(pivot) {
                residual.xor_assign(pivot_row);
            }
        }
        if residual.is_empty() {
            None
        } else {
            Some(residual)
        }
    }

    /// Solves the accumulated system.
    ///
    /// Fails with [`CodingError::InsufficientRank`] before rank `m`, and
    /// with [`CodingError::Inconsistent`] if the basis equations contradict
    /// each other (a saturated block forced into the basis, or a worker that
    /// diverged from the reference arithmetic).
    pub fn decode(&self) -> Result<Decoded> {
        if !self.is_decodable() {
            return Err(CodingError::InsufficientRank { rank: self.rank(), needed: self.m });
        }

        // Prefer a basis drawn from non-saturated blocks alone; fall back to
        // the full pool only when clean blocks cannot span the space.
        let clean = self.select_basis(false);
        let (basis, used_saturated) = if clean.len() == self.m {
            (clean, false)
        } else {
            let mixed = self.select_basis(true);
            debug_assert_eq!(mixed.len(), self.m);
            let tainted = mixed.iter().any(|&i| self.blocks[i].saturated);
            (mixed, tainted)
        };

        let eqs: Vec<(RowSet, i64)> = basis
            .iter()
            .map(|&i| (self.blocks[i].rows.clone(), self.blocks[i].y))
            .collect();

        let z = match solve_by_peeling(self.m, &eqs)? {
            Some(z) => z,
            None => solve_by_elimination(self.m, &eqs)?,
        };

        let mut y = Vec::with_capacity(self.m);
        for value in z {
            if value > i64::from(i32::MAX) || value < i64::from(i32::MIN) {
                // The true per-row dot products are clamped 32-bit values;
                // anything outside that range means the system lied.
                return Err(CodingError::Inconsistent);
            }
            y.push(Q31::from_bits(value as i32));
        }

        debug!(rank = self.rank(), used_saturated, "Cycle decoded");
        Ok(Decoded { y: QVector::new(y), used_saturated })
    }

    /// Greedy basis selection in tie-break order.
    ///
    /// Candidates sort by `(block_id, saturated, arrival)`; a candidate
    /// joins the basis iff it is independent of those already chosen.
    fn select_basis(&self, allow_saturated: bool) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.blocks.len())
            .filter(|&i| allow_saturated || !self.blocks[i].saturated)
            .collect();
        order.sort_by_key(|&i| {
            let b = &self.blocks[i];
            (b.block_id, b.saturated, b.arrival)
        });

        let mut chosen = Vec::with_capacity(self.m);
        let mut echelon: Vec<RowSet> = Vec::with_capacity(self.m);
        for i in order {
            let mut residual = self.blocks[i].rows.clone();
            for pivot_row in &echelon {
                let pivot = pivot_row.first().expect("echelon rows are nonzero");
                if residual.contains(pivot) {
                    residual.xor_assign(pivot_row);
                }
            }
            if !residual.is_empty() {
                echelon.push(residual);
                chosen.push(i);
                if chosen.len() == self.m {
                    break;
                }
            }
        }
        chosen
    }
}

/// LT peeling: repeatedly substitute degree-1 equations.
///
/// Returns `Ok(None)` when peeling stalls with every remaining equation at
/// degree two or more; the caller then falls back to full elimination.
fn solve_by_peeling(m: usize, eqs: &[(RowSet, i64)]) -> Result<Option<Vec<i64>>> {
    let mut work: Vec<(RowSet, i64)> = eqs.to_vec();
    let mut solved: Vec<Option<i64>> = vec![None; m];
    let mut remaining = m;

    while remaining > 0 {
        let Some(idx) = work.iter().position(|(rows, _)| rows.degree() == 1) else {
            return Ok(None); // stalled
        };
        let (rows, y) = work.swap_remove(idx);
        let row = rows.first().expect("degree-1 selector has a row");

        match solved[row] {
            Some(existing) if existing != y => return Err(CodingError::Inconsistent),
            Some(_) => continue,
            None => {
                solved[row] = Some(y);
                remaining -= 1;
            }
        }

        // Substitute the solved unknown out of every remaining equation.
        let mut i = 0;
        while i < work.len() {
            if work[i].0.contains(row) {
                work[i].0.remove(row);
                work[i].1 -= y;
                if work[i].0.is_empty() {
                    if work[i].1 != 0 {
                        return Err(CodingError::Inconsistent);
                    }
                    work.swap_remove(i);
                    continue;
                }
            }
            i += 1;
        }
    }

    Ok(Some(solved.into_iter().map(|v| v.expect("all unknowns solved")).collect()))
}

/// Fraction-free Gaussian elimination (Bareiss) over 128-bit integers.
///
/// The basis is GF(2)-invertible, so its integer determinant is odd and in
/// particular nonzero; every division below is exact by construction of the
/// Bareiss recurrence. Checked arithmetic turns an (astronomically sized)
/// intermediate into a decode error instead of silent wraparound.
fn solve_by_elimination(m: usize, eqs: &[(RowSet, i64)]) -> Result<Vec<i64>> {
    let mul = |a: i128, b: i128| a.checked_mul(b).ok_or(CodingError::ArithmeticOverflow);

    // Augmented matrix, coefficients 0/1, y in the last column.
    let mut a: Vec<Vec<i128>> = eqs
        .iter()
        .map(|(rows, y)| {
            let mut row: Vec<i128> = (0..m).map(|j| i128::from(rows.contains(j))).collect();
            row.push(i128::from(*y));
            row
        })
        .collect();

    let mut prev: i128 = 1;
    for k in 0..m {
        let pivot = (k..m)
            .find(|&r| a[r][k] != 0)
            .ok_or(CodingError::InsufficientRank { rank: k, needed: m })?;
        a.swap(k, pivot);

        for i in (k + 1)..m {
            for j in (k + 1)..=m {
                let num = mul(a[i][j], a[k][k])? - mul(a[i][k], a[k][j])?;
                a[i][j] = num / prev; // exact by the Bareiss identity
            }
            a[i][k] = 0;
        }
        prev = a[k][k];
    }

    // Back substitution; every division must be exact or the system has no
    // integer solution.
    let mut z = vec![0i64; m];
    for i in (0..m).rev() {
        let mut rhs = a[i][m];
        for j in (i + 1)..m {
            rhs -= mul(a[i][j], i128::from(z[j]))?;
        }
        if a[i][i] == 0 || rhs % a[i][i] != 0 {
            return Err(CodingError::Inconsistent);
        }
        let value = rhs / a[i][i];
        if value > i128::from(i64::MAX) || value < i128::from(i64::MIN) {
            return Err(CodingError::Inconsistent);
        }
        z[i] = value as i64;
    }
    Ok(z)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(bits: i32) -> Q31 {
        Q31::from_bits(bits)
    }

    /// Builds equations for known z values and the given selectors.
    fn equations(m: usize, z: &[i64], selectors: &[&[usize]]) -> Vec<(u32, RowSet, Q31)> {
        selectors
            .iter()
            .enumerate()
            .map(|(k, sel)| {
                let rows = RowSet::from_indices(m, sel);
                let y: i64 = sel.iter().map(|&i| z[i]).sum();
                (k as u32, rows, q(y as i32))
            })
            .collect()
    }

    #[test]
    fn test_rank_accumulates() {
        let mut dec = Decoder::new(3);
        assert_eq!(dec.ingest(0, RowSet::from_indices(3, &[0]), q(1), false), Ingest::Innovative);
        assert_eq!(dec.ingest(1, RowSet::from_indices(3, &[0]), q(1), false), Ingest::Redundant);
        assert_eq!(dec.ingest(0, RowSet::from_indices(3, &[1]), q(2), false), Ingest::Duplicate);
        assert_eq!(dec.rank(), 1);
        assert!(!dec.is_decodable());
    }

    #[test]
    fn test_decode_before_rank_fails() {
        let dec = Decoder::new(2);
        assert!(matches!(
            dec.decode(),
            Err(CodingError::InsufficientRank { rank: 0, needed: 2 })
        ));
    }

    #[test]
    fn test_peeling_decode() {
        // Singletons plus overlaps; peeling resolves everything.
        let z = [100, -200, 300, -400];
        let eqs = equations(4, &z, &[&[0], &[3], &[0, 1], &[2, 3], &[1, 2, 3]]);

        let mut dec = Decoder::new(4);
        for (id, rows, y) in eqs {
            dec.ingest(id, rows, y, false);
        }
        assert!(dec.is_decodable());

        let decoded = dec.decode().unwrap();
        assert!(!decoded.used_saturated);
        assert_eq!(decoded.y.to_bits(), vec![100, -200, 300, -400]);
    }

    #[test]
    fn test_elimination_fallback_no_singletons() {
        // No degree-1 equation anywhere: peeling stalls immediately and the
        // exact elimination must take over.
        let z = [7, -9, 11];
        let eqs = equations(3, &z, &[&[0, 1], &[1, 2], &[0, 2]]);
        // GF(2) rank of {011,110,101} is 2, so add a spanning overlap.
        let extra = equations(3, &z, &[&[0, 1, 2]]);

        let mut dec = Decoder::new(3);
        for (id, rows, y) in eqs {
            dec.ingest(id, rows, y, false);
        }
        for (_, rows, y) in extra {
            dec.ingest(9, rows, y, false);
        }
        assert!(dec.is_decodable());
        assert_eq!(dec.decode().unwrap().y.to_bits(), vec![7, -9, 11]);
    }

    #[test]
    fn test_saturated_basis_avoided() {
        let z = [10, 20];
        // Block 0 covers row 0 but is saturated; block 2 covers row 0 clean.
        let mut dec = Decoder::new(2);
        dec.ingest(0, RowSet::from_indices(2, &[0]), q(99), true); // wrong y, saturated
        dec.ingest(1, RowSet::from_indices(2, &[1]), q(z[1] as i32), false);
        dec.ingest(2, RowSet::from_indices(2, &[0]), q(z[0] as i32), false);

        let decoded = dec.decode().unwrap();
        assert!(!decoded.used_saturated);
        assert_eq!(decoded.y.to_bits(), vec![10, 20]);
    }

    #[test]
    fn test_saturated_blocks_are_rank_eligible() {
        // Only saturated coverage of row 0 exists: decode proceeds but the
        // output is flagged as tainted.
        let mut dec = Decoder::new(2);
        dec.ingest(0, RowSet::from_indices(2, &[0]), q(5), true);
        dec.ingest(1, RowSet::from_indices(2, &[1]), q(6), false);
        assert!(dec.is_decodable());

        let decoded = dec.decode().unwrap();
        assert!(decoded.used_saturated);
        assert_eq!(decoded.y.to_bits(), vec![5, 6]);
    }

    #[test]
    fn test_lower_block_id_preferred() {
        // Two clean singletons for row 0 with different values; the lower
        // block id must win the basis slot.
        let mut dec = Decoder::new(1);
        dec.ingest(5, RowSet::from_indices(1, &[0]), q(55), false);
        dec.ingest(2, RowSet::from_indices(1, &[0]), q(22), false);
        assert_eq!(dec.decode().unwrap().y.to_bits(), vec![22]);
    }

    #[test]
    fn test_redundant_contradiction_stays_out_of_basis() {
        // x0 = 1, x1 = 2, but the redundant overlap claims x0 + x1 = 99.
        // Lower block ids win the basis, so the contradiction never enters.
        let mut dec = Decoder::new(2);
        dec.ingest(0, RowSet::from_indices(2, &[0]), q(1), false);
        dec.ingest(1, RowSet::from_indices(2, &[1]), q(2), false);
        dec.ingest(2, RowSet::from_indices(2, &[0, 1]), q(99), false);
        assert_eq!(dec.decode().unwrap().y.to_bits(), vec![1, 2]);
    }

    #[test]
    fn test_out_of_range_solution_is_inconsistent() {
        // The overlap implies z1 = i32::MAX + 10, which no clamped per-row
        // dot product can be; the decoder must refuse rather than wrap.
        let mut dec = Decoder::new(2);
        dec.ingest(0, RowSet::from_indices(2, &[0]), q(-10), false);
        dec.ingest(1, RowSet::from_indices(2, &[0, 1]), q(i32::MAX), false);
        assert_eq!(dec.decode(), Err(CodingError::Inconsistent));
    }

    #[test]
    fn test_decode_is_commutative_for_independent_blocks() {
        let z = [3, 1, 4, 1];
        let selectors: &[&[usize]] = &[&[0], &[1], &[2], &[3]];
        let eqs = equations(4, &z, selectors);

        let mut forward = Decoder::new(4);
        for (id, rows, y) in eqs.clone() {
            forward.ingest(id, rows, y, false);
        }
        let mut reverse = Decoder::new(4);
        for (id, rows, y) in eqs.into_iter().rev() {
            reverse.ingest(id, rows, y, false);
        }
        assert_eq!(forward.decode().unwrap(), reverse.decode().unwrap());
    }
}
