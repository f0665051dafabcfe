//! Bootstrap state: the system matrix and initial input vector.
//!
//! Distributed out of band before the fabric starts (the core mandates no
//! persistence of its own) and read once at startup. Values are floats in
//! the JSON document and are converted to Q1.31 here, after which no float
//! exists anywhere on the control path.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use fabriq_fixed::{QMatrix, QVector};

use crate::config::SystemConfig;
use crate::error::{ConfigError, ConfigResult};

/// The JSON bootstrap document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapState {
    /// The dense system matrix `M`, row-major, values in `[-1, 1)`
    pub matrix: Vec<Vec<f64>>,
    /// The initial input vector `x0`
    pub x0: Vec<f64>,
}

impl BootstrapState {
    /// Loads the bootstrap document from a JSON file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        info!(path = %path.display(), "Loading bootstrap state");
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Converts to Q1.31, checking dimensions against the configuration.
    pub fn into_fixed(self, system: &SystemConfig) -> ConfigResult<(QMatrix, QVector)> {
        if self.matrix.len() != system.m {
            return Err(ConfigError::Invalid(format!(
                "bootstrap matrix has {} rows, configuration says m = {}",
                self.matrix.len(),
                system.m
            )));
        }
        if self.x0.len() != system.n {
            return Err(ConfigError::Invalid(format!(
                "bootstrap x0 has {} entries, configuration says n = {}",
                self.x0.len(),
                system.n
            )));
        }
        let matrix = QMatrix::from_f64_rows(&self.matrix)
            .map_err(|e| ConfigError::Invalid(format!("bootstrap matrix: {e}")))?;
        if matrix.cols() != system.n {
            return Err(ConfigError::Invalid(format!(
                "bootstrap matrix has {} columns, configuration says n = {}",
                matrix.cols(),
                system.n
            )));
        }
        Ok((matrix, QVector::from_f64s(&self.x0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabriq_wire::{NodeId, Role};

    fn system(n: usize, m: usize) -> SystemConfig {
        SystemConfig {
            node_id: NodeId(1),
            initial_role: Role::Primary,
            n,
            m,
            redundancy_num: 1,
            redundancy_den: 2,
            cycle_period_ms: 50,
            bootstrap_file: "bootstrap.json".into(),
        }
    }

    #[test]
    fn test_bootstrap_conversion() {
        let state = BootstrapState {
            matrix: vec![vec![0.5, 0.0], vec![0.0, 0.5]],
            x0: vec![0.25, -0.25],
        };
        let (matrix, x0) = state.into_fixed(&system(2, 2)).unwrap();
        assert_eq!(matrix.rows(), 2);
        assert_eq!(matrix.cols(), 2);
        assert_eq!(x0.len(), 2);
        assert_eq!(x0[0].to_bits(), 1 << 29);
    }

    #[test]
    fn test_row_count_mismatch_rejected() {
        let state = BootstrapState {
            matrix: vec![vec![0.5, 0.0]],
            x0: vec![0.25, -0.25],
        };
        assert!(state.into_fixed(&system(2, 2)).is_err());
    }

    #[test]
    fn test_x0_length_mismatch_rejected() {
        let state = BootstrapState {
            matrix: vec![vec![0.5, 0.0], vec![0.0, 0.5]],
            x0: vec![0.25],
        };
        assert!(state.into_fixed(&system(2, 2)).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let json = r#"{"matrix": [[0.5]], "x0": [0.125]}"#;
        let state: BootstrapState = serde_json::from_str(json).unwrap();
        let (matrix, x0) = state.into_fixed(&system(1, 1)).unwrap();
        assert_eq!(matrix.rows(), 1);
        assert_eq!(x0[0].to_bits(), 1 << 28);
    }
}
