//! End-to-end codec tests: plan blocks from seeds, evaluate them the way a
//! worker would, and reconstruct through the decoder.
//!
//! The code is rateless: a specific cycle's draw can be rank-deficient by
//! design (the aggregator then declares the cycle undecodable and moves on).
//! These tests therefore scan a small cycle range and assert that decodable
//! draws exist and reconstruct bit-exactly — the property the fabric
//! actually relies on.

use fabriq_coding::{evaluate_block, Decoder, Encoder};
use fabriq_fixed::{matvec, QMatrix, QVector};

/// Pure decode, 4x4: identity matrix, x = [0.5, -0.25, 0.125, -0.0625],
/// redundancy 1/2 so K = 6, two blocks lost. The decoded output must equal
/// the single-node oracle bit-for-bit.
#[test]
fn test_pure_decode_4x4_with_two_drops() {
    let m = QMatrix::identity(4);
    let x = QVector::from_bits(&[1 << 30, -(1 << 29), 1 << 28, -(1 << 27)]);
    let oracle = matvec(&m, x.as_slice()).unwrap();

    let encoder = Encoder::new(4, 1, 2);
    assert_eq!(encoder.block_count(), 6);

    let mut decoded_somewhere = false;
    'cycles: for cycle in 0..50u64 {
        let plan = encoder.plan_cycle(cycle);

        // Try every way of losing two of the six blocks; any draw that
        // leaves full rank must reconstruct the oracle exactly.
        for drop_a in 0..plan.len() {
            for drop_b in (drop_a + 1)..plan.len() {
                let mut decoder = Decoder::new(4);
                for (i, spec) in plan.iter().enumerate() {
                    if i == drop_a || i == drop_b {
                        continue;
                    }
                    let (y, saturated) =
                        evaluate_block(&m, &spec.rows, x.as_slice()).unwrap();
                    decoder.ingest(spec.block_id, spec.rows.clone(), y, saturated);
                }
                if decoder.is_decodable() {
                    let decoded = decoder.decode().unwrap();
                    assert!(!decoded.used_saturated);
                    assert_eq!(decoded.y, oracle, "cycle {cycle} drops ({drop_a},{drop_b})");
                    decoded_somewhere = true;
                    break 'cycles;
                }
            }
        }
    }
    assert!(decoded_somewhere, "no cycle in range survived two drops");
}

/// Straggler tolerance: m = 16, K = 24, eight workers served round-robin,
/// one worker's responses never arrive. The cycle must decode from the
/// seven prompt workers' 21 blocks.
#[test]
fn test_straggler_tolerance_16_rows() {
    const WORKERS: u32 = 8;
    const STRAGGLER: u32 = 3;

    let m = QMatrix::identity(16);
    let x = QVector::from_bits(&(1..=16).map(|i| i << 22).collect::<Vec<_>>());
    let oracle = matvec(&m, x.as_slice()).unwrap();

    let encoder = Encoder::new(16, 1, 2);
    assert_eq!(encoder.block_count(), 24);

    let mut decoded_somewhere = false;
    for cycle in 0..100u64 {
        let plan = encoder.plan_cycle(cycle);
        let mut decoder = Decoder::new(16);
        for spec in &plan {
            if spec.block_id % WORKERS == STRAGGLER {
                continue; // the straggler's replies miss the deadline
            }
            let (y, saturated) = evaluate_block(&m, &spec.rows, x.as_slice()).unwrap();
            decoder.ingest(spec.block_id, spec.rows.clone(), y, saturated);
        }
        assert_eq!(decoder.received(), 21);

        if decoder.is_decodable() {
            let decoded = decoder.decode().unwrap();
            assert_eq!(decoded.y, oracle, "cycle {cycle}");
            decoded_somewhere = true;
            break;
        }
    }
    assert!(decoded_somewhere, "no cycle in range decoded from 7 workers");
}

/// The decoder needs only linear independence, not completeness: feeding
/// every planned block always reproduces the oracle once rank is reached,
/// and extra blocks past rank change nothing.
#[test]
fn test_full_reception_is_stable_under_redundancy() {
    let m = QMatrix::identity(8);
    let x = QVector::from_bits(&[5 << 20, -6 << 20, 7 << 20, -8 << 20, 9, -10, 11, -12]);
    let oracle = matvec(&m, x.as_slice()).unwrap();

    let encoder = Encoder::new(8, 1, 2);
    for cycle in 0..100u64 {
        let mut decoder = Decoder::new(8);
        for spec in encoder.plan_cycle(cycle) {
            let (y, saturated) = evaluate_block(&m, &spec.rows, x.as_slice()).unwrap();
            decoder.ingest(spec.block_id, spec.rows, y, saturated);
        }
        if decoder.is_decodable() {
            assert_eq!(decoder.decode().unwrap().y, oracle, "cycle {cycle}");
            return;
        }
    }
    panic!("no cycle in range reached full rank");
}
