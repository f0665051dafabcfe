//! The commit gate: four-step verification with replay defense.
//!
//! Verification order is fixed and observable through the returned error:
//! authorization, then sequence monotonicity, then the signature, then the
//! referenced proposed state. The gate itself is transport-agnostic; the
//! aggregator feeds it tokens and applies the verified state at the next
//! cycle boundary.

use std::collections::HashMap;
use tracing::{debug, warn};

use fabriq_wire::canonical;

use crate::keys::{verify_signature, AuthorizedKeys};
use crate::proposal::{ProposalStore, ProposedState};
use crate::{PoaError, Result};

/// A commit token as received from the operator channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitToken {
    /// Digest of the proposed-state blob being committed
    pub state_hash: [u8; 32],
    /// Strictly monotonic sequence per verify key
    pub sequence: u64,
    /// Operator's Ed25519 verify key
    pub verify_key: [u8; 32],
    /// Signature over `canonical(state_hash || sequence)`
    pub signature: [u8; 64],
}

/// A token that passed all four verification steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCommit {
    /// The proposed state the token commits
    pub state: ProposedState,
    /// The accepted sequence
    pub sequence: u64,
    /// The operator key that authorized it
    pub verify_key: [u8; 32],
}

/// The PoA verification pipeline.
///
/// Holds the per-key last-accepted sequence for the lifetime of the
/// aggregator (commit tokens are the one durable concept in the core) and
/// the tamper counter that escalates repeated bad signatures to operator
/// attention.
#[derive(Debug, Clone)]
pub struct CommitGate {
    authorized: AuthorizedKeys,
    last_sequence: HashMap<[u8; 32], u64>,
    tamper_count: u64,
    tamper_threshold: u64,
}

impl CommitGate {
    /// Creates a gate over the authorized key set.
    pub fn new(authorized: AuthorizedKeys, tamper_threshold: u64) -> Self {
        Self {
            authorized,
            last_sequence: HashMap::new(),
            tamper_count: 0,
            tamper_threshold,
        }
    }

    /// Verifies a token against the store of delivered proposals.
    ///
    /// Pure with respect to accepted state: a successful verification does
    /// not advance the sequence counter until [`CommitGate::accept`] records
    /// it, so the same token verifies identically on primary and backup.
    /// The tamper counter does advance on a bad signature.
    pub fn verify(&mut self, token: &CommitToken, proposals: &ProposalStore) -> Result<VerifiedCommit> {
        if !self.authorized.contains(&token.verify_key) {
            return Err(PoaError::UnauthorizedOperator(hex::encode(token.verify_key)));
        }

        let last = self.last_accepted(&token.verify_key);
        if token.sequence <= last {
            // Indistinguishable from a network replay; the caller stays silent.
            return Err(PoaError::ReplayedOrStale { got: token.sequence, last });
        }

        let signing_bytes = canonical::commit_signing_bytes(&token.state_hash, token.sequence);
        if !verify_signature(&token.verify_key, &signing_bytes, &token.signature) {
            self.tamper_count += 1;
            warn!(
                tamper_count = self.tamper_count,
                key = %hex::encode(&token.verify_key[..8]),
                "Commit token signature verification failed"
            );
            return Err(PoaError::BadSignature);
        }

        let Some(state) = proposals.get(&token.state_hash) else {
            return Err(PoaError::UnknownState(hex::encode(token.state_hash)));
        };

        debug!(
            sequence = token.sequence,
            state_hash = %hex::encode(&token.state_hash[..8]),
            "Commit token verified"
        );
        Ok(VerifiedCommit {
            state: state.clone(),
            sequence: token.sequence,
            verify_key: token.verify_key,
        })
    }

    /// Records an accepted sequence for a key.
    ///
    /// Called when the verified commit is queued for boundary application;
    /// a replayed token then fails step two on both replicas.
    pub fn accept(&mut self, verify_key: &[u8; 32], sequence: u64) {
        let entry = self.last_sequence.entry(*verify_key).or_insert(0);
        if sequence > *entry {
            *entry = sequence;
        }
    }

    /// Last accepted sequence for a key (0 if none).
    pub fn last_accepted(&self, verify_key: &[u8; 32]) -> u64 {
        self.last_sequence.get(verify_key).copied().unwrap_or(0)
    }

    /// Bad signatures observed so far.
    pub fn tamper_count(&self) -> u64 {
        self.tamper_count
    }

    /// Whether the tamper threshold has been crossed and operator
    /// intervention is demanded.
    pub fn tamper_exceeded(&self) -> bool {
        self.tamper_count >= self.tamper_threshold
    }

    /// The authorized key set.
    pub fn authorized(&self) -> &AuthorizedKeys {
        &self.authorized
    }
}
