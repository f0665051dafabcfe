//! # Fabriq LLFT Replication Core
//!
//! Leader/backup Fast Failover: the discipline that keeps exactly one
//! aggregator emitting tasks while a shadow replica stands one cycle behind,
//! ready to take over within a bounded window.
//!
//! The core is pure state-machine logic with no clock and no socket of its
//! own: the aggregator event loop feeds it heartbeat observations, claim
//! frames, and cycle ticks, and acts on the transitions it returns. A single
//! primary failure costs at most `F * T_cycle + T_cycle / 2` of control-loop
//! time — `F` missed heartbeat periods to detect, half a cycle to elect.
//!
//! - [`RoleMachine`] - Primary/Backup/Candidate transitions and elections
//! - [`HeartbeatMonitor`] - missed-period bookkeeping that drives detection
//! - [`DeliveryWindow`] - strictly ordered in-cycle frame delivery
//! - [`ShadowState`] - the backup's mirror and its divergence detector

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod heartbeat;
pub mod role;
pub mod shadow;
pub mod window;

pub use heartbeat::HeartbeatMonitor;
pub use role::{ClaimTuple, RoleAction, RoleEvent, RoleMachine};
pub use shadow::ShadowState;
pub use window::{DeliveryWindow, Push, DELIVERY_WINDOW};

/// Result type alias for replication operations
pub type Result<T> = std::result::Result<T, LlftError>;

/// Errors in the replication core
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlftError {
    /// A resync frame failed signature verification against the primary's
    /// node key and must not be applied
    #[error("resync frame rejected: {0}")]
    ResyncRejected(String),

    /// A resync frame would move the shadow backwards
    #[error("stale resync: frame cycle {frame_cycle} behind shadow cycle {shadow_cycle}")]
    StaleResync {
        /// Cycle carried by the frame
        frame_cycle: u64,
        /// Cycle the shadow already reached
        shadow_cycle: u64,
    },
}
