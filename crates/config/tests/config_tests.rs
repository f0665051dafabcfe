//! File-based configuration loading tests.

use std::io::Write;

use fabriq_config::{BootstrapState, Config};
use fabriq_wire::NodeId;

fn write_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_from_file() {
    let key = "bb".repeat(32);
    let toml = format!(
        r#"
        [system]
        node_id = 7
        initial_role = "Backup"
        n = 8
        m = 8
        redundancy_num = 1
        redundancy_den = 4
        cycle_period_ms = 100
        bootstrap_file = "/etc/fabriq/bootstrap.json"

        [transport]
        bind = "10.0.0.2:6000"
        peer = "10.0.0.1:6000"
        workers = ["10.0.0.10:7000"]

        [poa]
        authorized_keys_file = "/etc/fabriq/authorized_keys.txt"
        node_key_file = "/etc/fabriq/node.key"
        peer_verify_key = "{key}"
        tamper_threshold = 3

        [logging]
        level = "debug"
        format = "json"
        "#
    );
    let file = write_file(&toml);

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.system.node_id, NodeId(7));
    assert_eq!(config.system.redundancy_den, 4);
    assert_eq!(config.poa.tamper_threshold, 3);
    assert_eq!(config.poa.peer_verify_key_bytes().unwrap(), [0xbb; 32]);
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_missing_file_is_an_error() {
    let err = Config::load(std::path::Path::new("/nonexistent/fabriq.toml")).unwrap_err();
    assert!(err.to_string().contains("failed to read"));
}

#[test]
fn test_malformed_toml_is_an_error() {
    let file = write_file("this is not toml = [");
    assert!(Config::load(file.path()).is_err());
}

#[test]
fn test_bootstrap_load_from_file() {
    let file = write_file(r#"{"matrix": [[0.5, 0.0], [0.0, -0.5]], "x0": [0.25, 0.75]}"#);
    let state = BootstrapState::load(file.path()).unwrap();
    assert_eq!(state.matrix.len(), 2);
    assert_eq!(state.x0, vec![0.25, 0.75]);
}
