//! # Fabriq Node
//!
//! The runnable fabric node: the aggregator (primary or backup) and the
//! worker, sharing one binary.
//!
//! The aggregator is a single-threaded cooperative event loop over one
//! datagram socket and a monotonic cycle timer. Each cycle boundary applies
//! queued operator commits atomically, closes the previous cycle's decode
//! ledger, and — on the primary — emits the heartbeat and the cycle's coded
//! task frames. Workers are stateless request/response processes that
//! discover obsolescence when a newer cycle's task arrives.
//!
//! - [`context::AggregatorContext`] - all aggregator state, explicitly threaded
//! - [`cycle`] - per-cycle decode ledger and the escalation ladder
//! - [`aggregator`] - the event loop
//! - [`worker`] - the worker loop
//! - [`metrics`] - structured per-cycle metrics events

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod aggregator;
pub mod context;
pub mod cycle;
pub mod metrics;
pub mod worker;

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, NodeError>;

/// Fatal node errors, each mapped to an exit code
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The authorized-key set is missing or empty at startup (exit code 2)
    #[error("authorized operator key set unavailable: {0}")]
    MissingKeySet(String),

    /// An internal invariant was violated (exit code 1)
    #[error("internal invariant violation: {0}")]
    InvariantViolation(String),

    /// Configuration or bootstrap could not be loaded (exit code 1)
    #[error(transparent)]
    Config(#[from] fabriq_config::ConfigError),

    /// The datagram socket failed (exit code 1)
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),
}

impl NodeError {
    /// The process exit code this error maps to.
    pub fn exit_code(&self) -> u8 {
        match self {
            NodeError::MissingKeySet(_) => 2,
            _ => 1,
        }
    }
}
