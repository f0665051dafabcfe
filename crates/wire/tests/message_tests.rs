//! Wire-format integration tests: every message type survives the wire,
//! and the canonical signing bytes stay stable across versions.

use fabriq_fixed::{Q31, QVector};
use fabriq_wire::{canonical, codec, Message, NodeId, Role};

fn all_messages() -> Vec<Message> {
    vec![
        Message::Task {
            cycle: 1,
            block_id: 2,
            seed: 3,
            x: QVector::from_bits(&[4, -5]),
        },
        Message::Result {
            cycle: 1,
            block_id: 2,
            seed: 3,
            y: Q31::from_bits(-6),
            saturated: false,
        },
        Message::Heartbeat {
            cycle: 1,
            committed_epoch: 2,
            role: Role::Primary,
            sender_id: NodeId(3),
        },
        Message::ClaimPrimary { cycle: 1, committed_epoch: 2, node_id: NodeId(3) },
        Message::CommitToken {
            state_hash: [1; 32],
            sequence: 2,
            verify_key: [3; 32],
            signature: [4; 64],
        },
        Message::Resync {
            cycle: 1,
            committed_epoch: 2,
            x: QVector::from_bits(&[7]),
            signature: [8; 64],
        },
        Message::Proposal { sequence: 1, payload: vec![0xaa, 0xbb] },
        Message::ResyncRequest {
            cycle: 1,
            committed_epoch: 2,
            digest: [9; 32],
            node_id: NodeId(3),
        },
    ]
}

#[test]
fn test_every_message_round_trips() {
    for msg in all_messages() {
        let bytes = codec::encode(&msg).unwrap();
        assert!(bytes.len() <= codec::MAX_DATAGRAM);
        assert_eq!(codec::decode(&bytes).unwrap(), msg, "tag {:#04x}", msg.tag());
    }
}

#[test]
fn test_tags_are_unique_and_match_the_table() {
    let tags: Vec<u8> = all_messages().iter().map(Message::tag).collect();
    assert_eq!(tags, vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
}

#[test]
fn test_every_truncation_is_rejected() {
    for msg in all_messages() {
        let bytes = codec::encode(&msg).unwrap();
        for len in 0..bytes.len() {
            assert!(
                codec::decode(&bytes[..len]).is_err(),
                "tag {:#04x} decoded from {len} of {} bytes",
                msg.tag(),
                bytes.len()
            );
        }
    }
}

#[test]
fn test_commit_signing_bytes_are_pinned() {
    // The canonical layout is a protocol constant; a change here breaks
    // every deployed operator key.
    let bytes = canonical::commit_signing_bytes(&[0u8; 32], 0x0102030405060708);
    let domain_len = canonical::domains::COMMIT.len();
    assert_eq!(bytes.len(), domain_len + 32 + 8);
    assert_eq!(
        &bytes[domain_len + 32..],
        &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
    );
}

#[test]
fn test_signing_domains_are_distinct() {
    let x = QVector::from_bits(&[1]);
    // A resync snapshot and a state digest over the same fields must not
    // produce the same preimage.
    let resync = canonical::resync_signing_bytes(1, 2, &x);
    let digest = canonical::state_digest_bytes(1, &x, 2);
    assert_ne!(resync, digest);
}

#[test]
fn test_largest_task_frame_fits_the_datagram() {
    // 294 scalars is the widest x that fits 1200 bytes with the task
    // header; the next scalar must push it over.
    let fits = Message::Task {
        cycle: u64::MAX,
        block_id: u32::MAX,
        seed: u64::MAX,
        x: QVector::from_bits(&vec![i32::MIN; 294]),
    };
    assert!(codec::encode(&fits).is_ok());

    let too_wide = Message::Task {
        cycle: u64::MAX,
        block_id: u32::MAX,
        seed: u64::MAX,
        x: QVector::from_bits(&vec![i32::MIN; 295]),
    };
    assert!(codec::encode(&too_wide).is_err());
}
