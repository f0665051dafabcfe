//! Commit-path integration tests: the full operator flow from key file to
//! applied sequence, including the replay and tamper scenarios.

use std::io::Write;

use fabriq_fixed::QVector;
use fabriq_poa::{
    AuthorizedKeys, CommitGate, NodeKeypair, PoaError, ProposalStore, ProposedState,
};

fn provisioned_gate(operator: &NodeKeypair) -> CommitGate {
    // Provision through the file format the deployment actually uses.
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{}", hex::encode(operator.verify_key_bytes())).unwrap();
    let keys = AuthorizedKeys::from_file(file.path()).unwrap();
    CommitGate::new(keys, 5)
}

#[test]
fn test_full_commit_flow_from_key_file() {
    let operator = NodeKeypair::generate();
    let mut gate = provisioned_gate(&operator);
    let mut store = ProposalStore::new();

    // The proposal travels ahead of the token, as a payload blob.
    let state = ProposedState::SetState { x: QVector::from_bits(&[1, 2, 3]) };
    let digest = store.insert_payload(&state.canonical_bytes()).unwrap();
    assert_eq!(digest, state.digest());

    let token = operator.issue_commit(&state, 1);
    let verified = gate.verify(&token, &store).unwrap();
    assert_eq!(verified.state, state);
    gate.accept(&verified.verify_key, verified.sequence);
    assert_eq!(gate.last_accepted(&operator.verify_key_bytes()), 1);
}

#[test]
fn test_replay_scenario() {
    // Submit sequence 5, then the identical token again: the second
    // submission is ReplayedOrStale and nothing advances.
    let operator = NodeKeypair::generate();
    let mut gate = provisioned_gate(&operator);
    let mut store = ProposalStore::new();
    store.insert(ProposedState::Halt);

    let token = operator.issue_commit(&ProposedState::Halt, 5);
    let verified = gate.verify(&token, &store).unwrap();
    gate.accept(&verified.verify_key, verified.sequence);

    assert!(matches!(
        gate.verify(&token, &store),
        Err(PoaError::ReplayedOrStale { got: 5, last: 5 })
    ));
    assert_eq!(gate.last_accepted(&operator.verify_key_bytes()), 5);
}

#[test]
fn test_tamper_scenario() {
    // One flipped signature bit: BadSignature on every replica, commit
    // applied on none.
    let operator = NodeKeypair::generate();
    let mut gate_primary = provisioned_gate(&operator);
    let mut gate_backup = provisioned_gate(&operator);
    let mut store = ProposalStore::new();
    store.insert(ProposedState::Halt);

    let mut token = operator.issue_commit(&ProposedState::Halt, 1);
    token.signature[0] ^= 0x80;

    assert_eq!(gate_primary.verify(&token, &store), Err(PoaError::BadSignature));
    assert_eq!(gate_backup.verify(&token, &store), Err(PoaError::BadSignature));
    assert_eq!(gate_primary.last_accepted(&operator.verify_key_bytes()), 0);
    assert_eq!(gate_backup.last_accepted(&operator.verify_key_bytes()), 0);
}

#[test]
fn test_sequences_are_tracked_per_key() {
    let alice = NodeKeypair::generate();
    let bob = NodeKeypair::generate();
    let keys = AuthorizedKeys::from_keys(vec![alice.verify_key_bytes(), bob.verify_key_bytes()]);
    let mut gate = CommitGate::new(keys, 5);
    let mut store = ProposalStore::new();
    store.insert(ProposedState::Halt);

    let a5 = alice.issue_commit(&ProposedState::Halt, 5);
    let verified = gate.verify(&a5, &store).unwrap();
    gate.accept(&verified.verify_key, verified.sequence);

    // Bob's counter is independent of Alice's.
    let b1 = bob.issue_commit(&ProposedState::Halt, 1);
    let verified = gate.verify(&b1, &store).unwrap();
    gate.accept(&verified.verify_key, verified.sequence);

    assert_eq!(gate.last_accepted(&alice.verify_key_bytes()), 5);
    assert_eq!(gate.last_accepted(&bob.verify_key_bytes()), 1);
}

#[test]
fn test_unknown_state_requests_retransmit_once() {
    let operator = NodeKeypair::generate();
    let mut gate = provisioned_gate(&operator);
    let mut store = ProposalStore::new();

    let token = operator.issue_commit(&ProposedState::Halt, 1);
    assert!(matches!(gate.verify(&token, &store), Err(PoaError::UnknownState(_))));

    // The retransmission request fires once per digest.
    assert!(store.request_retransmit_once(&token.state_hash));
    assert!(!store.request_retransmit_once(&token.state_hash));

    // Once the proposal lands, the same token verifies.
    store.insert(ProposedState::Halt);
    assert!(gate.verify(&token, &store).is_ok());
}
