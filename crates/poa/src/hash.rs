//! Keccak256 digests for state hashing and divergence detection.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// Size of a digest in bytes
pub const DIGEST_SIZE: usize = 32;

/// A 32-byte Keccak256 digest.
///
/// Used for proposed-state hashes in commit tokens and for the shadow
/// divergence check over the canonical encoding of
/// `(cycle, x, committed_epoch)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Digest32([u8; DIGEST_SIZE]);

impl Digest32 {
    /// The all-zero digest.
    pub const ZERO: Self = Self([0u8; DIGEST_SIZE]);

    /// Wraps a 32-byte array.
    pub const fn new(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    /// Digests the given data.
    pub fn of(data: &[u8]) -> Self {
        Self(keccak256(data))
    }

    /// The digest as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The digest as a fixed-size array.
    pub const fn to_array(self) -> [u8; DIGEST_SIZE] {
        self.0
    }

    /// Hex representation for logs.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Digest32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest32({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for Digest32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; DIGEST_SIZE]> for Digest32 {
    fn from(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }
}

impl From<Digest32> for [u8; DIGEST_SIZE] {
    fn from(digest: Digest32) -> Self {
        digest.0
    }
}

/// Computes the Keccak256 hash of the given data.
pub fn keccak256(data: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut bytes = [0u8; DIGEST_SIZE];
    bytes.copy_from_slice(&result);
    bytes
}
