//! Seed derivation and row-selector regeneration.
//!
//! The selector of block `k` in cycle `c` is a pure function of `(c, k)`:
//! the primary derives `seed_k` from the keyed hash of the pair, and the
//! worker re-derives it independently, so the coefficient vector never
//! travels on the wire.
//!
//! Everything here is integer-only. In particular the target density
//! `(floor(log2 m) + 1) / m` stands in for `ln m / m`: same order, no libm,
//! and therefore bit-identical selectors on every CPU the fabric runs on.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha3::{Digest, Keccak256};

use fabriq_wire::canonical;

use crate::rowset::RowSet;

/// Derives the block seed: the first 8 bytes (little-endian) of
/// `Keccak256(domain || cycle || block_id)`.
pub fn derive_seed(cycle: u64, block_id: u32) -> u64 {
    let mut hasher = Keccak256::new();
    hasher.update(canonical::block_seed_bytes(cycle, block_id));
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Regenerates the row selector for a seed over an `m`-row matrix.
///
/// Each row is selected with probability `(floor(log2 m) + 1) / m` by an
/// integer comparison against a ChaCha8 draw; a degenerate empty draw falls
/// back to one PRNG-chosen row so every block carries at least one equation.
pub fn derive_rows(seed: u64, m: usize) -> RowSet {
    debug_assert!(m > 0, "matrix must have at least one row");
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let density_num = u64::from(m.ilog2()) + 1;
    let mut rows = RowSet::new(m);
    for i in 0..m {
        if rng.gen_range(0..m as u64) < density_num {
            rows.insert(i);
        }
    }
    if rows.is_empty() {
        rows.insert(rng.gen_range(0..m));
    }
    rows
}
