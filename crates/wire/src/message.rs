//! Message variants and shared identities.

use fabriq_fixed::{Q31, QVector};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::WireError;

/// Unique identifier of a fabric node (aggregator or worker).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Aggregator replication role.
///
/// Exactly one node is intended to believe it is `Primary` at any instant;
/// zero is tolerated for at most one cycle while an election runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Emits tasks, decodes, owns the committed-epoch register
    Primary,
    /// Mirrors the primary's state and stands by for promotion
    Backup,
    /// Backup that has detected heartbeat loss and is running an election
    Candidate,
}

impl Role {
    /// The wire byte for this role.
    pub fn to_wire(self) -> u8 {
        match self {
            Role::Primary => 0,
            Role::Backup => 1,
            Role::Candidate => 2,
        }
    }

    /// Parses the wire byte.
    pub fn from_wire(byte: u8) -> Result<Self, WireError> {
        match byte {
            0 => Ok(Role::Primary),
            1 => Ok(Role::Backup),
            2 => Ok(Role::Candidate),
            other => Err(WireError::InvalidRole(other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => write!(f, "Primary"),
            Role::Backup => write!(f, "Backup"),
            Role::Candidate => write!(f, "Candidate"),
        }
    }
}

/// The closed set of wire messages.
///
/// One variant per tag; decoding is exhaustive and anything outside this set
/// is rejected at the datagram boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `0x01` primary -> worker: one coded block of the cycle's computation.
    Task {
        /// Cycle id the block belongs to
        cycle: u64,
        /// Block index within the cycle, also the in-cycle sequence number
        block_id: u32,
        /// Row-combiner PRNG seed; workers regenerate and cross-check it
        seed: u64,
        /// Current input vector
        x: QVector,
    },

    /// `0x02` worker -> primary and worker -> backup: one coded equation.
    Result {
        /// Cycle id the block belongs to
        cycle: u64,
        /// Block index within the cycle
        block_id: u32,
        /// Seed the worker evaluated under
        seed: u64,
        /// The coded equation value `dot(combined_row, x)`
        y: Q31,
        /// Whether any saturation occurred while combining or reducing
        saturated: bool,
    },

    /// `0x03` primary -> backup: start-of-cycle liveness beacon.
    Heartbeat {
        /// Cycle being opened
        cycle: u64,
        /// Sender's committed epoch
        committed_epoch: u64,
        /// Sender's current role
        role: Role,
        /// Sender identity
        sender_id: NodeId,
    },

    /// `0x04` candidate broadcast during a promotion election.
    ClaimPrimary {
        /// Highest cycle the claimant has observed
        cycle: u64,
        /// Claimant's committed epoch
        committed_epoch: u64,
        /// Claimant identity
        node_id: NodeId,
    },

    /// `0x05` operator -> aggregators: a signed state transition.
    CommitToken {
        /// Keccak256 digest of the proposed-state blob being committed
        state_hash: [u8; 32],
        /// Strictly monotonic sequence per verify key
        sequence: u64,
        /// Operator's Ed25519 verifying key
        verify_key: [u8; 32],
        /// Ed25519 signature over `canonical(state_hash || sequence)`
        signature: [u8; 64],
    },

    /// `0x06` primary -> backup: authoritative state snapshot after
    /// divergence.
    Resync {
        /// Cycle the snapshot was taken at
        cycle: u64,
        /// Committed epoch of the snapshot
        committed_epoch: u64,
        /// The authoritative input vector
        x: QVector,
        /// Primary node-key signature over `canonical(cycle || epoch || x)`
        signature: [u8; 64],
    },

    /// `0x07` operator -> aggregators: preparatory proposed-state blob.
    ///
    /// Delivered ahead of the commit token that references its digest.
    Proposal {
        /// Operator sequence this proposal is intended for
        sequence: u64,
        /// Canonical encoding of the proposed state
        payload: Vec<u8>,
    },

    /// `0x08` backup -> primary: shadow divergence report.
    ResyncRequest {
        /// Cycle the backup computed its digest at
        cycle: u64,
        /// Backup's committed epoch
        committed_epoch: u64,
        /// Backup's state digest over `(cycle, x, committed_epoch)`
        digest: [u8; 32],
        /// Requesting node identity
        node_id: NodeId,
    },
}

impl Message {
    /// The wire tag of this message.
    pub fn tag(&self) -> u8 {
        match self {
            Message::Task { .. } => 0x01,
            Message::Result { .. } => 0x02,
            Message::Heartbeat { .. } => 0x03,
            Message::ClaimPrimary { .. } => 0x04,
            Message::CommitToken { .. } => 0x05,
            Message::Resync { .. } => 0x06,
            Message::Proposal { .. } => 0x07,
            Message::ResyncRequest { .. } => 0x08,
        }
    }

    /// Short name for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Task { .. } => "task",
            Message::Result { .. } => "result",
            Message::Heartbeat { .. } => "heartbeat",
            Message::ClaimPrimary { .. } => "claim_primary",
            Message::CommitToken { .. } => "commit_token",
            Message::Resync { .. } => "resync",
            Message::Proposal { .. } => "proposal",
            Message::ResyncRequest { .. } => "resync_request",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_wire_mapping() {
        for role in [Role::Primary, Role::Backup, Role::Candidate] {
            assert_eq!(Role::from_wire(role.to_wire()).unwrap(), role);
        }
        assert_eq!(Role::from_wire(3), Err(WireError::InvalidRole(3)));
    }

    #[test]
    fn test_tags_match_protocol_table() {
        let msg = Message::Heartbeat {
            cycle: 1,
            committed_epoch: 0,
            role: Role::Primary,
            sender_id: NodeId(7),
        };
        assert_eq!(msg.tag(), 0x03);
        assert_eq!(msg.kind(), "heartbeat");
    }
}
