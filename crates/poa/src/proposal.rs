//! Proposed-state blobs and their store.
//!
//! A commit token never carries the new state itself, only its digest. The
//! state travels ahead of the token in a preparatory `Proposal` frame and is
//! parked here until a verified commit references it. The canonical encoding
//! below is what gets digested, so both replicas derive identical hashes
//! from identical proposals.

use self::bytes_ext::{get_u16, get_u32, get_u64, get_u8};
use fabriq_fixed::{Q31, QVector};
use fabriq_wire::{NodeId, Role};
use std::collections::{HashMap, HashSet};

use crate::hash::Digest32;
use crate::{PoaError, Result};

/// The closed set of state mutations an operator commit can carry.
///
/// Applied atomically at a cycle boundary; mid-cycle application would
/// invalidate in-flight task frames whose workers have already begun
/// computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposedState {
    /// Replace the input vector
    SetState {
        /// The new input vector
        x: QVector,
    },
    /// Renegotiate coding and timing parameters
    Reconfigure {
        /// Redundancy numerator (K = ceil(m * (1 + num/den)))
        redundancy_num: u32,
        /// Redundancy denominator
        redundancy_den: u32,
        /// Control cycle period in milliseconds
        cycle_period_ms: u64,
    },
    /// Assign a role to a node unconditionally
    ForceRole {
        /// Target node
        node_id: NodeId,
        /// Role it must assume
        role: Role,
    },
    /// Graceful shutdown of the fabric
    Halt,
    /// Leave the halt state after an undecodable-cycle escalation
    Resume,
}

impl ProposedState {
    const TAG_SET_STATE: u8 = 0x01;
    const TAG_RECONFIGURE: u8 = 0x02;
    const TAG_FORCE_ROLE: u8 = 0x03;
    const TAG_HALT: u8 = 0x04;
    const TAG_RESUME: u8 = 0x05;

    /// Canonical binary encoding: the digest preimage and the `Proposal`
    /// frame payload.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(32);
        match self {
            ProposedState::SetState { x } => {
                bytes.push(Self::TAG_SET_STATE);
                bytes.extend_from_slice(&(x.len() as u16).to_le_bytes());
                for q in x.iter() {
                    bytes.extend_from_slice(&q.to_bits().to_le_bytes());
                }
            }
            ProposedState::Reconfigure { redundancy_num, redundancy_den, cycle_period_ms } => {
                bytes.push(Self::TAG_RECONFIGURE);
                bytes.extend_from_slice(&redundancy_num.to_le_bytes());
                bytes.extend_from_slice(&redundancy_den.to_le_bytes());
                bytes.extend_from_slice(&cycle_period_ms.to_le_bytes());
            }
            ProposedState::ForceRole { node_id, role } => {
                bytes.push(Self::TAG_FORCE_ROLE);
                bytes.extend_from_slice(&node_id.0.to_le_bytes());
                bytes.push(role.to_wire());
            }
            ProposedState::Halt => bytes.push(Self::TAG_HALT),
            ProposedState::Resume => bytes.push(Self::TAG_RESUME),
        }
        bytes
    }

    /// Decodes the canonical encoding.
    pub fn from_canonical_bytes(payload: &[u8]) -> Result<Self> {
        let mut buf = payload;
        let tag = get_u8(&mut buf)?;
        let state = match tag {
            Self::TAG_SET_STATE => {
                let len = get_u16(&mut buf)? as usize;
                let mut values = Vec::with_capacity(len);
                for _ in 0..len {
                    let bits = get_u32(&mut buf)? as i32;
                    values.push(Q31::from_bits(bits));
                }
                ProposedState::SetState { x: QVector::new(values) }
            }
            Self::TAG_RECONFIGURE => ProposedState::Reconfigure {
                redundancy_num: get_u32(&mut buf)?,
                redundancy_den: get_u32(&mut buf)?,
                cycle_period_ms: get_u64(&mut buf)?,
            },
            Self::TAG_FORCE_ROLE => ProposedState::ForceRole {
                node_id: NodeId(get_u64(&mut buf)?),
                role: Role::from_wire(get_u8(&mut buf)?)
                    .map_err(|e| PoaError::MalformedProposal(e.to_string()))?,
            },
            Self::TAG_HALT => ProposedState::Halt,
            Self::TAG_RESUME => ProposedState::Resume,
            other => {
                return Err(PoaError::MalformedProposal(format!("unknown state tag {other:#04x}")))
            }
        };
        if !buf.is_empty() {
            return Err(PoaError::MalformedProposal(format!("{} trailing bytes", buf.len())));
        }
        Ok(state)
    }

    /// The Keccak256 digest of the canonical encoding.
    pub fn digest(&self) -> Digest32 {
        Digest32::of(&self.canonical_bytes())
    }
}

/// Proposed-state blobs keyed by digest, awaiting their commit tokens.
///
/// Entries are durable for the life of the aggregator; the replay rule on
/// sequences already prevents a digest from committing twice with effect.
#[derive(Debug, Clone, Default)]
pub struct ProposalStore {
    proposals: HashMap<[u8; 32], ProposedState>,
    retransmit_requested: HashSet<[u8; 32]>,
}

impl ProposalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a proposed state, returning its digest.
    pub fn insert(&mut self, state: ProposedState) -> Digest32 {
        let digest = state.digest();
        self.proposals.insert(digest.to_array(), state);
        digest
    }

    /// Decodes and inserts a raw `Proposal` frame payload.
    pub fn insert_payload(&mut self, payload: &[u8]) -> Result<Digest32> {
        let state = ProposedState::from_canonical_bytes(payload)?;
        Ok(self.insert(state))
    }

    /// Looks up a proposal by the digest a commit token references.
    pub fn get(&self, state_hash: &[u8; 32]) -> Option<&ProposedState> {
        self.proposals.get(state_hash)
    }

    /// Records a retransmission request for an unknown digest.
    ///
    /// Returns `true` the first time, `false` afterwards: the unknown-state
    /// policy allows exactly one retransmission request per digest.
    pub fn request_retransmit_once(&mut self, state_hash: &[u8; 32]) -> bool {
        self.retransmit_requested.insert(*state_hash)
    }

    /// Number of parked proposals.
    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }
}

/// Minimal checked little-endian readers over a shrinking slice.
mod bytes_ext {
    use crate::{PoaError, Result};

    fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
        if buf.len() < n {
            return Err(PoaError::MalformedProposal(format!(
                "payload truncated: needed {n} bytes, had {}",
                buf.len()
            )));
        }
        let (head, tail) = buf.split_at(n);
        *buf = tail;
        Ok(head)
    }

    pub fn get_u8(buf: &mut &[u8]) -> Result<u8> {
        Ok(take(buf, 1)?[0])
    }

    pub fn get_u16(buf: &mut &[u8]) -> Result<u16> {
        let b = take(buf, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn get_u32(buf: &mut &[u8]) -> Result<u32> {
        let b = take(buf, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(buf: &mut &[u8]) -> Result<u64> {
        let b = take(buf, 8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }
}
