//! Canonical byte strings for signing and digesting.
//!
//! Signatures and state digests never cover a tagged datagram: they cover
//! the untagged concatenation of the relevant fields in declared order, with
//! no lengths and no padding. Domain separators keep a signature from one
//! context from verifying in another.

use fabriq_fixed::QVector;

/// Domain separators for signature and digest contexts.
pub mod domains {
    /// Seed derivation for coded row-combiners
    pub const BLOCK_SEED: &[u8] = b"FABRIQ_BLOCK_SEED_V1";
    /// Operator commit tokens
    pub const COMMIT: &[u8] = b"FABRIQ_COMMIT_V1";
    /// Primary-signed resync snapshots
    pub const RESYNC: &[u8] = b"FABRIQ_RESYNC_V1";
    /// Shadow divergence digests
    pub const STATE_DIGEST: &[u8] = b"FABRIQ_STATE_V1";
}

/// Signing bytes for a commit token: `domain || state_hash || sequence`.
pub fn commit_signing_bytes(state_hash: &[u8; 32], sequence: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(domains::COMMIT.len() + 40);
    bytes.extend_from_slice(domains::COMMIT);
    bytes.extend_from_slice(state_hash);
    bytes.extend_from_slice(&sequence.to_le_bytes());
    bytes
}

/// Signing bytes for a resync snapshot:
/// `domain || cycle || committed_epoch || x`.
pub fn resync_signing_bytes(cycle: u64, committed_epoch: u64, x: &QVector) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(domains::RESYNC.len() + 16 + x.len() * 4);
    bytes.extend_from_slice(domains::RESYNC);
    bytes.extend_from_slice(&cycle.to_le_bytes());
    bytes.extend_from_slice(&committed_epoch.to_le_bytes());
    put_vector(&mut bytes, x);
    bytes
}

/// Digest input for shadow divergence detection:
/// `domain || cycle || x || committed_epoch`.
pub fn state_digest_bytes(cycle: u64, x: &QVector, committed_epoch: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(domains::STATE_DIGEST.len() + 16 + x.len() * 4);
    bytes.extend_from_slice(domains::STATE_DIGEST);
    bytes.extend_from_slice(&cycle.to_le_bytes());
    put_vector(&mut bytes, x);
    bytes.extend_from_slice(&committed_epoch.to_le_bytes());
    bytes
}

/// Hash input for block-seed derivation: `domain || cycle || block_id`.
pub fn block_seed_bytes(cycle: u64, block_id: u32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(domains::BLOCK_SEED.len() + 12);
    bytes.extend_from_slice(domains::BLOCK_SEED);
    bytes.extend_from_slice(&cycle.to_le_bytes());
    bytes.extend_from_slice(&block_id.to_le_bytes());
    bytes
}

fn put_vector(bytes: &mut Vec<u8>, x: &QVector) {
    for q in x.iter() {
        bytes.extend_from_slice(&q.to_bits().to_le_bytes());
    }
}
