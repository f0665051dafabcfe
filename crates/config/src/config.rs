//! The single-file node configuration.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use fabriq_wire::{NodeId, Role};

use crate::error::{ConfigError, ConfigResult};

/// Complete configuration of one fabric node, loaded from `fabriq.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity, dimensions, and timing
    pub system: SystemConfig,
    /// Socket addresses of this node and its peers
    pub transport: TransportConfig,
    /// PoA key material
    pub poa: PoaConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        info!(path = %path.display(), "Loading configuration");
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        debug!(node_id = %config.system.node_id, "Configuration validated");
        Ok(config)
    }

    /// Parses and validates a configuration from a TOML string.
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    pub fn validate(&self) -> ConfigResult<()> {
        self.system.validate()?;
        self.transport.validate()?;
        self.poa.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Identity, dimensions, redundancy, and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// This node's identity
    pub node_id: NodeId,
    /// Role at startup (failover may change it)
    pub initial_role: Role,
    /// Input vector width `n`
    pub n: usize,
    /// Output width `m` (rows of the system matrix)
    pub m: usize,
    /// Redundancy factor numerator (default 1)
    #[serde(default = "default_redundancy_num")]
    pub redundancy_num: u32,
    /// Redundancy factor denominator (default 2; rho = num / den)
    #[serde(default = "default_redundancy_den")]
    pub redundancy_den: u32,
    /// Control cycle period `T_cycle` in milliseconds
    pub cycle_period_ms: u64,
    /// JSON bootstrap document holding the system matrix and `x0`
    pub bootstrap_file: PathBuf,
}

fn default_redundancy_num() -> u32 {
    1
}

fn default_redundancy_den() -> u32 {
    2
}

impl SystemConfig {
    /// The cycle period as a [`Duration`].
    pub fn cycle_period(&self) -> Duration {
        Duration::from_millis(self.cycle_period_ms)
    }

    /// The promotion election window, `T_cycle / 2`.
    pub fn election_window(&self) -> Duration {
        Duration::from_millis(self.cycle_period_ms / 2)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.n == 0 || self.m == 0 {
            return Err(ConfigError::Invalid("dimensions n and m must be nonzero".into()));
        }
        if self.m != self.n {
            // The control law feeds the decoded product back as the next
            // input vector, which needs a square system matrix.
            return Err(ConfigError::Invalid(format!(
                "control law requires a square system matrix, got {}x{}",
                self.m, self.n
            )));
        }
        if self.redundancy_den == 0 {
            return Err(ConfigError::Invalid("redundancy denominator must be nonzero".into()));
        }
        // Target band is 10-20 Hz; anything in [1 ms, 1 s] is accepted for
        // bench and degraded deployments.
        if self.cycle_period_ms == 0 || self.cycle_period_ms > 1000 {
            return Err(ConfigError::Invalid(format!(
                "cycle period {} ms outside [1, 1000]",
                self.cycle_period_ms
            )));
        }
        Ok(())
    }
}

/// Socket addresses of this node and its peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Address this node binds its datagram socket to
    pub bind: SocketAddr,
    /// The peer aggregator (primary's backup, or backup's primary)
    pub peer: SocketAddr,
    /// The worker pool, tasked round-robin by block id
    pub workers: Vec<SocketAddr>,
}

impl TransportConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.workers.is_empty() {
            return Err(ConfigError::Invalid("worker pool must not be empty".into()));
        }
        Ok(())
    }
}

/// PoA key material locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoaConfig {
    /// Newline-separated hex file of authorized operator verify keys
    pub authorized_keys_file: PathBuf,
    /// This node's Ed25519 secret key, 32 bytes hex
    pub node_key_file: PathBuf,
    /// The peer aggregator's verify key, 64 hex chars (verifies resync
    /// snapshots across failover)
    pub peer_verify_key: String,
    /// Bad signatures tolerated before demanding operator intervention
    #[serde(default = "default_tamper_threshold")]
    pub tamper_threshold: u64,
}

fn default_tamper_threshold() -> u64 {
    5
}

impl PoaConfig {
    /// Decodes the peer verify key.
    pub fn peer_verify_key_bytes(&self) -> ConfigResult<[u8; 32]> {
        let bytes = hex::decode(&self.peer_verify_key)
            .map_err(|e| ConfigError::Invalid(format!("peer_verify_key: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| ConfigError::Invalid("peer_verify_key must be 32 bytes".into()))
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.tamper_threshold == 0 {
            return Err(ConfigError::Invalid("tamper threshold must be nonzero".into()));
        }
        self.peer_verify_key_bytes()?;
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by `RUST_LOG`)
    pub level: String,
    /// Output format: `text`, `json`, or `compact`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into(), format: "text".into() }
    }
}

impl LoggingConfig {
    fn validate(&self) -> ConfigResult<()> {
        match self.format.as_str() {
            "text" | "json" | "compact" => Ok(()),
            other => Err(ConfigError::Invalid(format!("unknown log format {other:?}"))),
        }
    }
}
