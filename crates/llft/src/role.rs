//! The role state machine.
//!
//! Each aggregator is `Primary`, `Backup`, or `Candidate`. Transitions are
//! driven by observed heartbeats, missed heartbeat periods, claim frames,
//! election expiry, and operator `ForceRole` commits. Claims are totally
//! ordered by `(committed_epoch, cycle, node_id)`; the highest claim wins,
//! and a primary that sees a strictly higher claim yields immediately so
//! that at most one node believes it is primary after one heartbeat period
//! of convergence.
//!
//! The machine holds only the role; the caller passes its own current
//! `(cycle, epoch)` position with each event, keeping the machine free of
//! duplicated aggregator state.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fabriq_wire::{NodeId, Role};

/// The election ordering tuple.
///
/// Comparison is lexicographic over `(committed_epoch, cycle, node_id)` —
/// the derived `Ord` on the field order below is exactly the promotion rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClaimTuple {
    /// Claimant's committed epoch (most authoritative state wins)
    pub committed_epoch: u64,
    /// Highest cycle the claimant has observed
    pub cycle: u64,
    /// Claimant identity (deterministic final tie-break)
    pub node_id: NodeId,
}

/// Events fed into the role machine by the aggregator loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleEvent {
    /// A heartbeat arrived from a node claiming to be primary
    HeartbeatObserved {
        /// The sender's position
        claim: ClaimTuple,
        /// Our own position
        local: ClaimTuple,
    },
    /// One heartbeat period elapsed without a heartbeat
    HeartbeatMissed {
        /// Our own position, used to build a claim on the F-th miss
        local: ClaimTuple,
    },
    /// A `ClaimPrimary` frame arrived
    ClaimObserved {
        /// The received claim
        claim: ClaimTuple,
        /// Our own position
        local: ClaimTuple,
    },
    /// The election window (`T_cycle / 2`) expired while we were candidate
    ElectionExpired,
    /// An operator `ForceRole` commit named this node
    Forced {
        /// The mandated role
        role: Role,
    },
}

/// What the aggregator loop must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleAction {
    /// Nothing externally visible
    None,
    /// Broadcast our claim and start the election timer
    BroadcastClaim(ClaimTuple),
    /// Begin emitting tasks: we are now primary
    StartTasking,
    /// Stop emitting tasks immediately: we yielded
    StopTasking,
}

/// The Primary/Backup/Candidate state machine of one aggregator.
#[derive(Debug, Clone)]
pub struct RoleMachine {
    node_id: NodeId,
    role: Role,
    /// Consecutive missed heartbeat periods while backup
    missed: u32,
    /// Missed periods that trigger candidacy (`F`)
    failover_threshold: u32,
    /// Our claim while the election runs
    pending_claim: Option<ClaimTuple>,
}

impl RoleMachine {
    /// `F`: consecutive missed heartbeats before a backup stands.
    pub const DEFAULT_FAILOVER_THRESHOLD: u32 = 3;

    /// Creates a machine starting in the given role.
    pub fn new(node_id: NodeId, initial_role: Role) -> Self {
        Self {
            node_id,
            role: initial_role,
            missed: 0,
            failover_threshold: Self::DEFAULT_FAILOVER_THRESHOLD,
            pending_claim: None,
        }
    }

    /// Overrides the failover threshold (tests and degraded deployments).
    pub fn with_failover_threshold(mut self, threshold: u32) -> Self {
        self.failover_threshold = threshold;
        self
    }

    /// Current role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// This node's identity.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Consecutive missed heartbeat periods.
    pub fn missed_heartbeats(&self) -> u32 {
        self.missed
    }

    /// Whether this node should be emitting tasks.
    pub fn is_primary(&self) -> bool {
        self.role == Role::Primary
    }

    /// Applies one event and returns the action the loop must take.
    pub fn apply(&mut self, event: RoleEvent) -> RoleAction {
        match event {
            RoleEvent::HeartbeatObserved { claim, local } => self.on_heartbeat(claim, local),
            RoleEvent::HeartbeatMissed { local } => self.on_missed(local),
            RoleEvent::ClaimObserved { claim, local } => self.on_claim(claim, local),
            RoleEvent::ElectionExpired => self.on_election_expired(),
            RoleEvent::Forced { role } => self.on_forced(role),
        }
    }

    fn on_heartbeat(&mut self, claim: ClaimTuple, local: ClaimTuple) -> RoleAction {
        self.missed = 0;
        match self.role {
            Role::Backup => RoleAction::None,
            Role::Candidate => {
                // The primary is alive after all; stand down.
                debug!(from = %claim.node_id, "Heartbeat during candidacy, standing down");
                self.role = Role::Backup;
                self.pending_claim = None;
                RoleAction::None
            }
            Role::Primary => {
                // Another node heartbeating as primary: the higher tuple
                // keeps the role, the lower yields at once.
                if claim > local {
                    warn!(other = %claim.node_id, "Yielding primary to higher heartbeat");
                    self.role = Role::Backup;
                    RoleAction::StopTasking
                } else {
                    RoleAction::None
                }
            }
        }
    }

    fn on_missed(&mut self, local: ClaimTuple) -> RoleAction {
        if self.role != Role::Backup {
            return RoleAction::None;
        }
        self.missed += 1;
        debug!(missed = self.missed, threshold = self.failover_threshold, "Heartbeat missed");
        if self.missed < self.failover_threshold {
            return RoleAction::None;
        }
        // F consecutive misses: stand as candidate and broadcast our claim.
        info!(cycle = local.cycle, epoch = local.committed_epoch, "Promoting to candidate");
        self.role = Role::Candidate;
        self.missed = 0;
        self.pending_claim = Some(local);
        RoleAction::BroadcastClaim(local)
    }

    fn on_claim(&mut self, claim: ClaimTuple, local: ClaimTuple) -> RoleAction {
        match self.role {
            Role::Backup => {
                // An election is running elsewhere; the winner will start
                // heartbeating. Give it a fresh detection window.
                self.missed = 0;
                RoleAction::None
            }
            Role::Candidate => {
                let own = self.pending_claim.unwrap_or(local);
                if claim > own {
                    debug!(winner = %claim.node_id, "Higher claim observed, standing down");
                    self.role = Role::Backup;
                    self.pending_claim = None;
                    self.missed = 0;
                }
                RoleAction::None
            }
            Role::Primary => {
                if claim > local {
                    warn!(winner = %claim.node_id, "Yielding primary to higher claim");
                    self.role = Role::Backup;
                    RoleAction::StopTasking
                } else {
                    RoleAction::None
                }
            }
        }
    }

    fn on_election_expired(&mut self) -> RoleAction {
        if self.role != Role::Candidate {
            return RoleAction::None;
        }
        // Our claim stood highest for T_cycle / 2: take over.
        info!(node = %self.node_id, "Election won, promoting to primary");
        self.role = Role::Primary;
        self.pending_claim = None;
        RoleAction::StartTasking
    }

    fn on_forced(&mut self, role: Role) -> RoleAction {
        let was_primary = self.is_primary();
        info!(%role, "Role forced by operator commit");
        self.role = role;
        self.missed = 0;
        self.pending_claim = None;
        match (was_primary, self.is_primary()) {
            (false, true) => RoleAction::StartTasking,
            (true, false) => RoleAction::StopTasking,
            _ => RoleAction::None,
        }
    }
}
