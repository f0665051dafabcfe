//! The aggregator's state, threaded explicitly through every operation.
//!
//! There are no process-wide singletons: the committed state, the role
//! machine, the commit gate, the decode ledger, and the escalation ladder
//! all live in one [`AggregatorContext`] value owned by the event loop. The
//! methods here are pure with respect to the outside world — they consume
//! observations and return the datagrams to send — which is what makes the
//! failover and commit semantics testable without a socket.

use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::{debug, info, warn};

use fabriq_coding::{seed, Decoder, Encoder};
use fabriq_config::Config;
use fabriq_fixed::{QMatrix, QVector, Q31};
use fabriq_llft::{
    ClaimTuple, DeliveryWindow, HeartbeatMonitor, Push, RoleAction, RoleEvent, RoleMachine,
    ShadowState,
};
use fabriq_poa::{
    AuthorizedKeys, CommitGate, CommitToken, NodeKeypair, ProposalStore, ProposedState, PoaError,
    VerifiedCommit,
};
use fabriq_wire::{Message, NodeId, Role};

use crate::cycle::{CycleLedger, Escalation, Route, RunMode};
use crate::metrics::Metrics;
use crate::{NodeError, Result};

/// Cycles an unauthorized sender stays rate-limited.
const RATE_LIMIT_CYCLES: u64 = 10;

/// Everything the primary must do at a cycle open.
#[derive(Debug, Default)]
pub struct CycleOpen {
    /// Datagrams to send, in order
    pub outbound: Vec<(SocketAddr, Message)>,
}

/// Boundary effects of applied commits that the event loop must act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitEffect {
    /// A `Halt` commit was applied: exit gracefully after this boundary
    Halt,
    /// The cycle period changed: re-arm the timer
    PeriodChanged(u64),
}

/// The aggregator node's complete state.
pub struct AggregatorContext {
    node_id: NodeId,
    matrix: QMatrix,
    /// The replicated `(cycle, x, committed_epoch)` core. The primary
    /// advances it by decoding; the backup mirrors and resyncs it.
    replica: ShadowState,
    encoder: Encoder,
    ledger: CycleLedger,
    role: RoleMachine,
    monitor: HeartbeatMonitor,
    gate: CommitGate,
    proposals: ProposalStore,
    pending_commits: Vec<VerifiedCommit>,
    escalation: Escalation,
    /// Ordered-delivery window for the backup's mirrored result stream,
    /// re-created at every cycle open
    mirror_window: DeliveryWindow<MirroredResult>,
    node_key: NodeKeypair,
    /// Senders rejected as unauthorized, with the cycle their limit expires
    rate_limited: HashMap<SocketAddr, u64>,
    cycle_period_ms: u64,
    halt_requested: bool,
    /// False until the first boundary: cycle 0 exists only as the ledger
    /// seed and is never tasked, so it must not count as undecodable
    bootstrapped: bool,
    /// Node metrics, reported each cycle
    pub metrics: Metrics,
}

#[derive(Debug, Clone)]
struct MirroredResult {
    block_id: u32,
    y: Q31,
    saturated: bool,
}

impl AggregatorContext {
    /// Builds the context from configuration and bootstrap state.
    ///
    /// Refuses to start without a non-empty authorized key set — an
    /// aggregator that cannot accept operator commits could never be halted
    /// or reconfigured.
    pub fn new(config: &Config, matrix: QMatrix, x0: QVector) -> Result<Self> {
        let authorized = AuthorizedKeys::from_file(&config.poa.authorized_keys_file)
            .map_err(|e| NodeError::MissingKeySet(e.to_string()))?;
        if authorized.is_empty() {
            return Err(NodeError::MissingKeySet(format!(
                "{} holds no usable keys",
                config.poa.authorized_keys_file.display()
            )));
        }

        let node_key = load_node_key(&config.poa.node_key_file)?;
        let peer_key = config.poa.peer_verify_key_bytes()?;

        let system = &config.system;
        Ok(Self {
            node_id: system.node_id,
            replica: ShadowState::new(x0, peer_key),
            encoder: Encoder::new(system.m, system.redundancy_num, system.redundancy_den),
            ledger: CycleLedger::new(0, system.m),
            role: RoleMachine::new(system.node_id, system.initial_role),
            monitor: HeartbeatMonitor::new(),
            gate: CommitGate::new(authorized, config.poa.tamper_threshold),
            proposals: ProposalStore::new(),
            pending_commits: Vec::new(),
            escalation: Escalation::new(),
            mirror_window: DeliveryWindow::new(),
            node_key,
            rate_limited: HashMap::new(),
            cycle_period_ms: system.cycle_period_ms,
            halt_requested: false,
            bootstrapped: false,
            matrix,
            metrics: Metrics::new(),
        })
    }

    /// Test constructor from parts (no key files on disk).
    #[doc(hidden)]
    pub fn from_parts(
        node_id: NodeId,
        initial_role: Role,
        matrix: QMatrix,
        x0: QVector,
        encoder: Encoder,
        authorized: AuthorizedKeys,
        node_key: NodeKeypair,
        peer_key: [u8; 32],
        cycle_period_ms: u64,
    ) -> Self {
        Self {
            node_id,
            replica: ShadowState::new(x0, peer_key),
            encoder,
            ledger: CycleLedger::new(0, matrix.rows()),
            role: RoleMachine::new(node_id, initial_role),
            monitor: HeartbeatMonitor::new(),
            gate: CommitGate::new(authorized, 5),
            proposals: ProposalStore::new(),
            pending_commits: Vec::new(),
            escalation: Escalation::new(),
            mirror_window: DeliveryWindow::new(),
            node_key,
            rate_limited: HashMap::new(),
            cycle_period_ms,
            halt_requested: false,
            bootstrapped: false,
            matrix,
            metrics: Metrics::new(),
        }
    }

    /// This node's identity.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Current role.
    pub fn role(&self) -> Role {
        self.role.role()
    }

    /// Whether this node currently emits tasks.
    pub fn is_primary(&self) -> bool {
        self.role.is_primary()
    }

    /// The open cycle id.
    pub fn cycle(&self) -> u64 {
        self.ledger.current().cycle_id
    }

    /// The committed epoch.
    pub fn committed_epoch(&self) -> u64 {
        self.replica.committed_epoch()
    }

    /// The current input vector.
    pub fn x(&self) -> &QVector {
        self.replica.x()
    }

    /// The current run mode.
    pub fn run_mode(&self) -> RunMode {
        self.escalation.mode()
    }

    /// The current cycle period in milliseconds, after the escalation
    /// ladder's deadline widening.
    pub fn effective_period_ms(&self) -> u64 {
        self.cycle_period_ms * u64::from(self.escalation.deadline_factor())
    }

    /// Whether a `Halt` commit has been applied.
    pub fn halt_requested(&self) -> bool {
        self.halt_requested
    }

    /// Our position as an election tuple.
    pub fn local_claim(&self) -> ClaimTuple {
        ClaimTuple {
            committed_epoch: self.committed_epoch(),
            cycle: self.cycle(),
            node_id: self.node_id,
        }
    }

    // ------------------------------------------------------------------
    // Cycle boundary
    // ------------------------------------------------------------------

    /// Closes the open cycle, applies queued commits, advances the ledger,
    /// and plans the next cycle's traffic.
    ///
    /// This is the only place committed state mutates: boundary application
    /// guarantees every block in a cycle is evaluated against one
    /// consistent `(M, x, K)`.
    ///
    /// A backup's decode ledger is advanced by observed heartbeats instead
    /// of its own timer (see [`AggregatorContext::handle_heartbeat`]), so
    /// its local boundary only applies commits and closes the heartbeat
    /// period — otherwise clock drift between the replicas would slowly
    /// desynchronize the shadow's cycle numbering from the primary's.
    pub fn cycle_boundary(
        &mut self,
        peer: SocketAddr,
        workers: &[SocketAddr],
    ) -> (CycleOpen, Vec<CommitEffect>) {
        if self.is_primary() && self.bootstrapped {
            self.close_cycle();
        }
        self.bootstrapped = true;
        let effects = self.apply_pending_commits();

        let mut open = CycleOpen::default();
        if self.is_primary() {
            let next = self.cycle() + 1;
            self.ledger.advance(next, self.matrix.rows());
            self.mirror_window = DeliveryWindow::new();
            self.metrics.report(next);

            if !self.escalation.is_halted() && !self.halt_requested {
                open.outbound.push((peer, self.heartbeat()));
                self.plan_tasks(next, workers, &mut open.outbound);
            }
        } else {
            self.metrics.report(self.cycle());
        }
        (open, effects)
    }

    /// Rolls the backup's decode ledger forward to the primary's announced
    /// cycle: the replication window flushes into the shadow decoder, an
    /// undecoded cycle holds the shadow's `x`, and a fresh ledger opens.
    fn align_to_cycle(&mut self, cycle: u64) {
        for frame in self.mirror_window.flush() {
            self.ingest_equation(frame.block_id, frame.y, frame.saturated);
        }
        let current = self.cycle();
        if self.ledger.current().decoded.is_none() {
            self.replica.apply_hold(current);
        }
        self.ledger.advance(cycle, self.matrix.rows());
        self.mirror_window = DeliveryWindow::new();
    }

    fn close_cycle(&mut self) {
        // Flush the replication window first: frames still buffered behind
        // a gap are deliverable now that the cycle is over.
        for frame in self.mirror_window.flush() {
            self.ingest_equation(frame.block_id, frame.y, frame.saturated);
        }
        let cycle = self.cycle();
        let decoded = self.ledger.current().decoded.is_some();
        if decoded {
            // x was already advanced at the decode trigger.
            self.escalation.on_decoded();
        } else {
            // Control holds: x stays, the cycle advances.
            self.replica.apply_hold(cycle);
            self.metrics.cycles_undecodable += 1;
            self.escalation.on_undecodable(cycle);
        }
    }

    fn apply_pending_commits(&mut self) -> Vec<CommitEffect> {
        let mut effects = Vec::new();
        for commit in std::mem::take(&mut self.pending_commits) {
            let epoch = self.committed_epoch() + 1;
            info!(epoch, sequence = commit.sequence, "Applying commit at cycle boundary");
            match commit.state {
                ProposedState::SetState { x } => self.replica.apply_set_state(x),
                ProposedState::Reconfigure {
                    redundancy_num,
                    redundancy_den,
                    cycle_period_ms,
                } => {
                    self.encoder =
                        Encoder::new(self.matrix.rows(), redundancy_num, redundancy_den);
                    if cycle_period_ms != self.cycle_period_ms {
                        self.cycle_period_ms = cycle_period_ms;
                        effects.push(CommitEffect::PeriodChanged(cycle_period_ms));
                    }
                }
                ProposedState::ForceRole { node_id, role } => {
                    if node_id == self.node_id {
                        let action = self.role.apply(RoleEvent::Forced { role });
                        if action == RoleAction::StartTasking {
                            self.metrics.failovers += 1;
                        }
                    }
                }
                ProposedState::Halt => {
                    self.halt_requested = true;
                    effects.push(CommitEffect::Halt);
                }
                ProposedState::Resume => self.escalation.resume(),
            }
            self.replica.apply_commit_epoch(epoch);
            self.metrics.commits_applied += 1;
        }
        effects
    }

    fn heartbeat(&self) -> Message {
        Message::Heartbeat {
            cycle: self.cycle(),
            committed_epoch: self.committed_epoch(),
            role: self.role(),
            sender_id: self.node_id,
        }
    }

    fn plan_tasks(
        &mut self,
        cycle: u64,
        workers: &[SocketAddr],
        outbound: &mut Vec<(SocketAddr, Message)>,
    ) {
        // Degraded mode falls back to the minimum decodable block count.
        let encoder = if self.escalation.reduce_block_count() {
            Encoder::new(self.matrix.rows(), 0, 1)
        } else {
            self.encoder.clone()
        };
        for spec in encoder.plan_cycle(cycle) {
            let worker = workers[spec.block_id as usize % workers.len()];
            outbound.push((
                worker,
                Message::Task {
                    cycle,
                    block_id: spec.block_id,
                    seed: spec.seed,
                    x: self.replica.x().clone(),
                },
            ));
        }
    }

    // ------------------------------------------------------------------
    // Frame handling
    // ------------------------------------------------------------------

    /// Handles a result frame. The primary feeds the decoder in arrival
    /// order; the backup routes through the ordered replication window.
    pub fn handle_result(&mut self, cycle: u64, block_id: u32, seed_value: u64, y: Q31, saturated: bool) {
        match self.ledger.route(cycle) {
            Route::Current => {}
            Route::Late => {
                self.metrics.late_results += 1;
                return;
            }
            Route::Stale | Route::Future => {
                self.metrics.stale_results += 1;
                return;
            }
        }
        if seed::derive_seed(cycle, block_id) != seed_value {
            self.metrics.seed_mismatches += 1;
            warn!(cycle, block_id, "Result frame seed mismatch, dropping");
            return;
        }

        if self.is_primary() {
            self.ingest_equation(block_id, y, saturated);
        } else {
            // The mirrored stream is delivered strictly in block order
            // within the bounded window; the flush at cycle close hands
            // over whatever survived behind gaps.
            match self.mirror_window.push(u64::from(block_id), MirroredResult { block_id, y, saturated }) {
                Push::Delivered(frames) => {
                    for frame in frames {
                        self.ingest_equation(frame.block_id, frame.y, frame.saturated);
                    }
                }
                Push::OutOfWindow => self.metrics.frames_out_of_window += 1,
                Push::Buffered | Push::Stale => {}
            }
        }
    }

    fn ingest_equation(&mut self, block_id: u32, y: Q31, saturated: bool) {
        let cycle = self.cycle();
        let m = self.matrix.rows();
        let state = self.ledger.current_mut();
        if state.frozen || state.decoded.is_some() {
            return;
        }
        if saturated {
            self.metrics.saturated_blocks += 1;
        }
        let rows = seed::derive_rows(seed::derive_seed(cycle, block_id), m);
        state.decoder.ingest(block_id, rows, y, saturated);

        if state.decoder.is_decodable() {
            match state.decoder.decode() {
                Ok(decoded) => {
                    if decoded.used_saturated {
                        self.metrics.decodes_on_saturated_basis += 1;
                    }
                    // The control law: the decoded product becomes the next
                    // input vector.
                    let y = decoded.y.clone();
                    state.decoded = Some(decoded);
                    self.metrics.cycles_decoded += 1;
                    self.replica.apply_decode(cycle, y);
                    debug!(cycle, "Cycle decoded, control output applied");
                }
                Err(err) => {
                    // Rank was reached but the equations disagree; treat as
                    // not yet decoded and let later frames improve the pool.
                    warn!(cycle, %err, "Decode attempt failed");
                }
            }
        }
    }

    /// Handles a heartbeat from the peer aggregator. Returns a resync
    /// request when the shadow has diverged.
    pub fn handle_heartbeat(
        &mut self,
        cycle: u64,
        committed_epoch: u64,
        sender_id: NodeId,
    ) -> Option<Message> {
        self.monitor.observe();
        let claim = ClaimTuple { committed_epoch, cycle, node_id: sender_id };
        let action = self.role.apply(RoleEvent::HeartbeatObserved { claim, local: self.local_claim() });
        self.react(action);

        // The heartbeat is the backup's cycle boundary: the shadow ledger
        // advances to the primary's announced cycle, never by local time.
        if !self.is_primary() && cycle > self.cycle() {
            self.align_to_cycle(cycle);
        }

        if !self.is_primary() && self.replica.diverged_from(committed_epoch) {
            warn!(
                primary_epoch = committed_epoch,
                shadow_epoch = self.replica.committed_epoch(),
                "Shadow diverged, requesting resync"
            );
            return Some(Message::ResyncRequest {
                cycle: self.replica.cycle(),
                committed_epoch: self.replica.committed_epoch(),
                digest: self.replica.digest().to_array(),
                node_id: self.node_id,
            });
        }
        None
    }

    /// Closes one heartbeat period (called at every cycle boundary by the
    /// backup). Returns the claim to broadcast if this tick triggered
    /// candidacy.
    pub fn heartbeat_tick(&mut self) -> Option<Message> {
        if self.is_primary() {
            return None;
        }
        if !self.monitor.tick() {
            return None;
        }
        let action = self.role.apply(RoleEvent::HeartbeatMissed { local: self.local_claim() });
        if let RoleAction::BroadcastClaim(claim) = action {
            return Some(Message::ClaimPrimary {
                cycle: claim.cycle,
                committed_epoch: claim.committed_epoch,
                node_id: claim.node_id,
            });
        }
        None
    }

    /// Handles a `ClaimPrimary` frame.
    pub fn handle_claim(&mut self, cycle: u64, committed_epoch: u64, node_id: NodeId) {
        if node_id == self.node_id {
            return; // our own broadcast echoed back
        }
        let claim = ClaimTuple { committed_epoch, cycle, node_id };
        let action = self.role.apply(RoleEvent::ClaimObserved { claim, local: self.local_claim() });
        self.react(action);
    }

    /// The election window expired.
    pub fn election_expired(&mut self) {
        let action = self.role.apply(RoleEvent::ElectionExpired);
        if action == RoleAction::StartTasking {
            self.metrics.failovers += 1;
        }
        self.react(action);
    }

    fn react(&mut self, action: RoleAction) {
        match action {
            RoleAction::StopTasking => {
                info!("Yielded primary role, outstanding tasks abandoned");
            }
            RoleAction::StartTasking => {
                info!(cycle = self.cycle(), "Assumed primary role");
            }
            RoleAction::BroadcastClaim(_) | RoleAction::None => {}
        }
    }

    /// Handles a commit token. Verification errors follow their §7 policy;
    /// the sender address only matters for the unauthorized rate limit.
    pub fn handle_commit_token(&mut self, token: CommitToken, sender: SocketAddr) {
        if let Some(&until) = self.rate_limited.get(&sender) {
            if self.cycle() < until {
                return;
            }
            self.rate_limited.remove(&sender);
        }

        match self.gate.verify(&token, &self.proposals) {
            Ok(verified) => {
                self.gate.accept(&verified.verify_key, verified.sequence);
                info!(sequence = verified.sequence, "Commit verified, queued for boundary");
                self.pending_commits.push(verified);
            }
            Err(PoaError::UnauthorizedOperator(key)) => {
                warn!(%key, %sender, "Unauthorized operator, rate-limiting sender");
                self.metrics.unauthorized_commits += 1;
                self.rate_limited.insert(sender, self.cycle() + RATE_LIMIT_CYCLES);
            }
            Err(PoaError::ReplayedOrStale { .. }) => {
                // Silent: indistinguishable from a network replay.
                self.metrics.replayed_commits += 1;
            }
            Err(PoaError::BadSignature) => {
                self.metrics.bad_signatures += 1;
                if self.gate.tamper_exceeded() {
                    warn!(
                        tamper_count = self.gate.tamper_count(),
                        "Tamper threshold crossed, operator intervention required"
                    );
                }
            }
            Err(PoaError::UnknownState(hash)) => {
                self.metrics.unknown_states += 1;
                let mut digest = [0u8; 32];
                if hex::decode_to_slice(&hash, &mut digest).is_ok()
                    && self.proposals.request_retransmit_once(&digest)
                {
                    warn!(state = %hash, "Unknown proposed state, requesting retransmission");
                }
            }
            Err(err) => {
                warn!(%err, "Commit token rejected");
            }
        }
    }

    /// Handles a preparatory proposal frame.
    pub fn handle_proposal(&mut self, payload: &[u8]) {
        match self.proposals.insert_payload(payload) {
            Ok(digest) => debug!(%digest, "Proposed state parked"),
            Err(err) => warn!(%err, "Malformed proposal payload"),
        }
    }

    /// Handles a backup's resync request (primary side). Answers with a
    /// signed snapshot when the digests actually differ.
    pub fn handle_resync_request(&mut self, digest: [u8; 32]) -> Option<Message> {
        if !self.is_primary() {
            return None;
        }
        if self.replica.digest().to_array() == digest {
            return None; // the backup caught up on its own
        }
        let cycle = self.replica.cycle();
        let epoch = self.replica.committed_epoch();
        let x = self.replica.x().clone();
        let signature = self.node_key.sign_resync(cycle, epoch, &x);
        self.metrics.resyncs += 1;
        info!(cycle, epoch, "Shipping resync snapshot to backup");
        Some(Message::Resync { cycle, committed_epoch: epoch, x, signature })
    }

    /// Handles a signed resync snapshot (backup side).
    pub fn handle_resync(
        &mut self,
        cycle: u64,
        committed_epoch: u64,
        x: QVector,
        signature: &[u8; 64],
    ) {
        match self.replica.apply_resync(cycle, committed_epoch, x, signature) {
            Ok(()) => self.metrics.resyncs += 1,
            Err(err) => warn!(%err, "Resync snapshot rejected"),
        }
    }

    /// Direct decoder access for the open cycle (integration tests).
    #[doc(hidden)]
    pub fn current_decoder(&self) -> &Decoder {
        &self.ledger.current().decoder
    }
}

fn load_node_key(path: &std::path::Path) -> Result<NodeKeypair> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        NodeError::InvariantViolation(format!("node key {}: {e}", path.display()))
    })?;
    let bytes = hex::decode(content.trim())
        .map_err(|e| NodeError::InvariantViolation(format!("node key hex: {e}")))?;
    let secret: [u8; 32] = bytes
        .try_into()
        .map_err(|_| NodeError::InvariantViolation("node key must be 32 bytes".into()))?;
    Ok(NodeKeypair::from_bytes(&secret))
}
