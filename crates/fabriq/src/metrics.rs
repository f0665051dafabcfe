//! Structured metrics events.
//!
//! Counters accumulate in plain fields owned by the event loop and are
//! surfaced as one structured tracing event per cycle. Nothing in the
//! control path reads them back — metrics observe, they never decide.

use tracing::info;

/// The node's counter registry.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    /// Cycles that reached rank and decoded
    pub cycles_decoded: u64,
    /// Cycles declared undecodable at the deadline
    pub cycles_undecodable: u64,
    /// Decodes that had to build on a saturated basis
    pub decodes_on_saturated_basis: u64,
    /// Result frames that arrived with the saturation flag set
    pub saturated_blocks: u64,
    /// Result frames for the immediately previous cycle (recorded, not decoded)
    pub late_results: u64,
    /// Result frames older than one cycle (dropped)
    pub stale_results: u64,
    /// Frames dropped outside the ordered-delivery window
    pub frames_out_of_window: u64,
    /// Result frames whose seed failed the cross-check
    pub seed_mismatches: u64,
    /// Datagrams that failed to decode
    pub malformed_datagrams: u64,
    /// Commit tokens rejected as replayed or stale
    pub replayed_commits: u64,
    /// Commit tokens from unauthorized keys
    pub unauthorized_commits: u64,
    /// Commit tokens with bad signatures
    pub bad_signatures: u64,
    /// Commit tokens referencing unknown proposed states
    pub unknown_states: u64,
    /// Commits applied at cycle boundaries
    pub commits_applied: u64,
    /// Role promotions this node performed
    pub failovers: u64,
    /// Resync snapshots sent (primary) or adopted (backup)
    pub resyncs: u64,
    /// Cycles whose compute overran the per-cycle CPU budget
    pub cpu_budget_overruns: u64,
}

impl Metrics {
    /// Creates a zeroed registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits the per-cycle structured metrics event.
    pub fn report(&self, cycle: u64) {
        info!(
            target: "fabriq::metrics",
            cycle,
            decoded = self.cycles_decoded,
            undecodable = self.cycles_undecodable,
            saturated_bases = self.decodes_on_saturated_basis,
            saturated_blocks = self.saturated_blocks,
            late = self.late_results,
            stale = self.stale_results,
            out_of_window = self.frames_out_of_window,
            seed_mismatches = self.seed_mismatches,
            malformed = self.malformed_datagrams,
            replayed = self.replayed_commits,
            unauthorized = self.unauthorized_commits,
            bad_signatures = self.bad_signatures,
            unknown_states = self.unknown_states,
            commits = self.commits_applied,
            failovers = self.failovers,
            resyncs = self.resyncs,
            cpu_overruns = self.cpu_budget_overruns,
            "cycle metrics"
        );
    }
}
