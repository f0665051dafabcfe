//! # Fabriq Proof-of-Authority
//!
//! The commit path: how a signed operator token mutates the fabric's
//! committed state.
//!
//! A state transition is authoritative iff it bears a valid Ed25519
//! signature from a pre-provisioned operator key, carries a strictly
//! monotonic sequence for that key, and references a proposed-state blob the
//! aggregator already holds. Verification is pure, so the primary and the
//! backup converge on identical accept/reject decisions for identical
//! inputs.
//!
//! - [`AuthorizedKeys`] - the pre-provisioned operator key set
//! - [`CommitGate`] - the four-step verification pipeline with replay defense
//! - [`ProposedState`] / [`ProposalStore`] - preparatory state blobs
//! - [`Digest32`] / [`keccak256`] - state hashing and divergence digests
//! - [`NodeKeypair`] - the aggregator's own signing identity
//!
//! ## Example
//!
//! ```rust
//! use fabriq_poa::{AuthorizedKeys, CommitGate, NodeKeypair, ProposalStore, ProposedState};
//!
//! let operator = NodeKeypair::generate();
//! let keys = AuthorizedKeys::from_keys(vec![operator.verify_key_bytes()]);
//! let mut gate = CommitGate::new(keys, 5);
//! let mut store = ProposalStore::new();
//!
//! let proposal = ProposedState::Halt;
//! store.insert(proposal.clone());
//! let token = operator.issue_commit(&proposal, 1);
//! let verified = gate.verify(&token, &store).unwrap();
//! assert_eq!(verified.state, ProposedState::Halt);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod gate;
pub mod hash;
pub mod keys;
pub mod proposal;

pub use gate::{CommitGate, CommitToken, VerifiedCommit};
pub use hash::{keccak256, Digest32};
pub use keys::{AuthorizedKeys, NodeKeypair};
pub use proposal::{ProposalStore, ProposedState};

/// Result type alias for PoA operations
pub type Result<T> = std::result::Result<T, PoaError>;

/// Errors on the commit path, each mapped to a defined local policy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoaError {
    /// The verify key is not in the pre-provisioned authorized set.
    /// Policy: reject, log, rate-limit the sender for 10 cycles.
    #[error("verify key {0} is not an authorized operator")]
    UnauthorizedOperator(String),

    /// The sequence does not strictly advance the per-key counter.
    /// Policy: silent reject (indistinguishable from network replay).
    #[error("sequence {got} does not advance last accepted {last}")]
    ReplayedOrStale {
        /// Sequence carried by the token
        got: u64,
        /// Last accepted sequence for this key
        last: u64,
    },

    /// The Ed25519 signature does not verify over the canonical payload.
    /// Policy: reject and count toward the tamper threshold.
    #[error("signature verification failed")]
    BadSignature,

    /// The referenced state hash matches no delivered proposal.
    /// Policy: reject, request retransmission of the preparatory state once.
    #[error("unknown proposed state {0}")]
    UnknownState(String),

    /// A key or signature field failed structural validation
    #[error("malformed key material: {0}")]
    MalformedKey(String),

    /// A proposed-state payload failed to decode
    #[error("malformed proposal payload: {0}")]
    MalformedProposal(String),

    /// Authorized-key file could not be read or parsed
    #[error("authorized key set unavailable: {0}")]
    KeySetUnavailable(String),
}
