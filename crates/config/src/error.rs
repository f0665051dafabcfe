//! Configuration error types.

use std::path::PathBuf;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Errors while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A configuration or bootstrap file could not be read
    #[error("failed to read {path}: {source}")]
    FileRead {
        /// The file that failed
        path: PathBuf,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax or schema error
    #[error("configuration parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Bootstrap JSON syntax or schema error
    #[error("bootstrap parse error: {0}")]
    Bootstrap(#[from] serde_json::Error),

    /// A value is outside its acceptable range or internally inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
