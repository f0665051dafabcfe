//! Per-cycle decode ledger and the escalation ladder.
//!
//! A [`CycleState`] is created at cycle open, mutated as result frames
//! arrive, frozen at decode or at the cycle deadline, and retained for
//! exactly one further cycle for late-arrival accounting before release.
//!
//! [`Escalation`] tracks consecutive undecodable cycles: three escalate to
//! degraded mode (block count reduced to the minimum, deadline doubled,
//! backup assist requested), five to a halt that only an operator commit
//! can leave.

use tracing::{info, warn};

use fabriq_coding::{Decoded, Decoder};

/// One cycle's decode bookkeeping.
#[derive(Debug, Clone)]
pub struct CycleState {
    /// The cycle this ledger belongs to
    pub cycle_id: u64,
    /// The rank-tracking decoder accumulating this cycle's result frames
    pub decoder: Decoder,
    /// The reconstruction, once rank was reached
    pub decoded: Option<Decoded>,
    /// Set when the cycle closed (decode or deadline); a frozen cycle
    /// accepts no further equations
    pub frozen: bool,
}

impl CycleState {
    /// Opens a ledger for a cycle over an `m`-row system.
    pub fn open(cycle_id: u64, m: usize) -> Self {
        Self { cycle_id, decoder: Decoder::new(m), decoded: None, frozen: false }
    }
}

/// Where a result frame landed relative to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Belongs to the open cycle
    Current,
    /// Belongs to the retained previous cycle: recorded for metrics only
    Late,
    /// Older than one cycle: dropped
    Stale,
    /// Ahead of the open cycle (clock skew or a rogue sender): dropped
    Future,
}

/// The two-deep cycle retention ledger.
#[derive(Debug, Clone)]
pub struct CycleLedger {
    current: CycleState,
    /// The frozen previous cycle, kept one cycle for late accounting
    previous: Option<CycleState>,
}

impl CycleLedger {
    /// Creates the ledger at the first cycle open.
    pub fn new(cycle_id: u64, m: usize) -> Self {
        Self { current: CycleState::open(cycle_id, m), previous: None }
    }

    /// The open cycle's ledger.
    pub fn current(&self) -> &CycleState {
        &self.current
    }

    /// Mutable access to the open cycle's ledger.
    pub fn current_mut(&mut self) -> &mut CycleState {
        &mut self.current
    }

    /// The retained previous cycle, if still within its retention window.
    pub fn previous(&self) -> Option<&CycleState> {
        self.previous.as_ref()
    }

    /// Classifies a result frame's cycle id against the ledger.
    pub fn route(&self, cycle: u64) -> Route {
        if cycle == self.current.cycle_id {
            Route::Current
        } else if cycle + 1 == self.current.cycle_id {
            Route::Late
        } else if cycle < self.current.cycle_id {
            Route::Stale
        } else {
            Route::Future
        }
    }

    /// Freezes the open cycle and rolls the ledger forward to `next_cycle`.
    /// The old current is retained one cycle; the old previous is released.
    pub fn advance(&mut self, next_cycle: u64, m: usize) {
        self.current.frozen = true;
        self.previous = Some(std::mem::replace(
            &mut self.current,
            CycleState::open(next_cycle, m),
        ));
    }
}

/// Degradation level of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Full block count, nominal deadline
    #[default]
    Normal,
    /// Block count reduced to `m`, deadline doubled, backup assist requested
    Degraded,
    /// Control holds; only an operator `Resume` (or `ForceRole`) commit
    /// leaves this state
    Halted,
}

/// Consecutive-undecodable-cycle escalation.
#[derive(Debug, Clone, Default)]
pub struct Escalation {
    consecutive_undecodable: u32,
    mode: RunMode,
}

/// Undecodable cycles before degraded mode.
pub const DEGRADE_AFTER: u32 = 3;
/// Undecodable cycles before the halt state.
pub const HALT_AFTER: u32 = 5;

impl Escalation {
    /// Creates the ladder in normal mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current mode.
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Consecutive undecodable cycles so far.
    pub fn consecutive_undecodable(&self) -> u32 {
        self.consecutive_undecodable
    }

    /// Deadline multiplier for the current mode.
    pub fn deadline_factor(&self) -> u32 {
        match self.mode {
            RunMode::Degraded => 2,
            _ => 1,
        }
    }

    /// Whether the encoder should fall back to the minimum block count.
    pub fn reduce_block_count(&self) -> bool {
        self.mode == RunMode::Degraded
    }

    /// Whether the loop may emit tasks at all.
    pub fn is_halted(&self) -> bool {
        self.mode == RunMode::Halted
    }

    /// Records an undecodable cycle. Returns the new mode if it changed.
    pub fn on_undecodable(&mut self, cycle: u64) -> Option<RunMode> {
        self.consecutive_undecodable += 1;
        warn!(
            cycle,
            consecutive = self.consecutive_undecodable,
            "Cycle undecodable, holding control output"
        );
        let next = match self.consecutive_undecodable {
            n if n >= HALT_AFTER => RunMode::Halted,
            n if n >= DEGRADE_AFTER => RunMode::Degraded,
            _ => return None,
        };
        if next != self.mode {
            warn!(cycle, ?next, "Escalating run mode");
            self.mode = next;
            Some(next)
        } else {
            None
        }
    }

    /// Records a decoded cycle: the run of failures is broken and degraded
    /// mode recovers. A halted loop stays halted until an operator commit.
    pub fn on_decoded(&mut self) -> Option<RunMode> {
        self.consecutive_undecodable = 0;
        if self.mode == RunMode::Degraded {
            info!("Decode succeeded, leaving degraded mode");
            self.mode = RunMode::Normal;
            return Some(RunMode::Normal);
        }
        None
    }

    /// Operator `Resume` commit: leaves the halt state.
    pub fn resume(&mut self) {
        info!("Operator resume, returning to normal mode");
        self.consecutive_undecodable = 0;
        self.mode = RunMode::Normal;
    }
}
