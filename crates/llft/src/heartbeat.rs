//! Heartbeat expectation bookkeeping.
//!
//! The primary emits one heartbeat at the start of every cycle; the backup
//! expects one per period `T_cycle`. The monitor is clockless — the
//! aggregator loop calls [`HeartbeatMonitor::tick`] once per period and
//! [`HeartbeatMonitor::observe`] on every heartbeat — so the same logic runs
//! identically under the real timer and under simulated cycles in tests.

use tracing::trace;

/// Per-period heartbeat expectation tracker.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatMonitor {
    /// Whether a heartbeat arrived since the last tick
    seen_this_period: bool,
    /// Total heartbeats observed
    observed: u64,
    /// Total periods that elapsed without a heartbeat
    missed_total: u64,
}

impl HeartbeatMonitor {
    /// Creates a monitor with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an observed heartbeat.
    pub fn observe(&mut self) {
        self.seen_this_period = true;
        self.observed += 1;
    }

    /// Closes one heartbeat period. Returns `true` if the period passed
    /// without a heartbeat — the caller then feeds a `HeartbeatMissed`
    /// event into the role machine.
    pub fn tick(&mut self) -> bool {
        let missed = !self.seen_this_period;
        if missed {
            self.missed_total += 1;
            trace!(missed_total = self.missed_total, "Heartbeat period elapsed unserved");
        }
        self.seen_this_period = false;
        missed
    }

    /// Total heartbeats observed.
    pub fn observed(&self) -> u64 {
        self.observed
    }

    /// Total missed periods (metrics).
    pub fn missed_total(&self) -> u64 {
        self.missed_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_without_heartbeat_is_a_miss() {
        let mut monitor = HeartbeatMonitor::new();
        assert!(monitor.tick());
        assert!(monitor.tick());
        assert_eq!(monitor.missed_total(), 2);
    }

    #[test]
    fn test_observation_covers_the_period() {
        let mut monitor = HeartbeatMonitor::new();
        monitor.observe();
        assert!(!monitor.tick());
        // The observation does not carry into the next period.
        assert!(monitor.tick());
    }

    #[test]
    fn test_multiple_observations_one_period() {
        let mut monitor = HeartbeatMonitor::new();
        monitor.observe();
        monitor.observe();
        assert!(!monitor.tick());
        assert_eq!(monitor.observed(), 2);
    }
}
