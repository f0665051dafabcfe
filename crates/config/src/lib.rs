//! # Fabriq Configuration
//!
//! Single-file TOML configuration plus the JSON bootstrap state.
//!
//! Everything a node needs lives in one `fabriq.toml`: identity, dimensions,
//! redundancy, timing, transport addresses, the PoA key material paths, and
//! logging. The bootstrap state (the system matrix and the initial input
//! vector) is a separate JSON document read once at startup and converted to
//! Q1.31 on the spot — the only place floats touch the fabric.
//!
//! Validation happens at load: a configuration that parses but cannot run
//! (zero-period cycle, non-square control matrix, empty worker pool) is
//! rejected before any socket binds.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod bootstrap;
pub mod config;
pub mod error;

pub use bootstrap::BootstrapState;
pub use config::{Config, LoggingConfig, PoaConfig, SystemConfig, TransportConfig};
pub use error::{ConfigError, ConfigResult};
