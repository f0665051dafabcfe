//! The worker loop.
//!
//! Workers are request/response processes: receive a task frame, regenerate
//! the row selector from `(cycle, block_id)`, combine-then-dot against the
//! startup-distributed matrix, and reply with the coded equation value. A
//! worker has no cancellation channel — it discovers obsolescence when a
//! newer cycle's task arrives — and mirrors every result to the backup
//! aggregator so the shadow can decode in parallel.

use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use fabriq_coding::{evaluate_block, seed};
use fabriq_config::BootstrapState;
use fabriq_fixed::QMatrix;
use fabriq_wire::{codec, Message};

use crate::{NodeError, Result};

/// Worker startup options (the worker needs no aggregator configuration,
/// only its socket, the matrix, and where to mirror results).
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Address to bind the datagram socket to
    pub bind: SocketAddr,
    /// JSON bootstrap document holding the system matrix
    pub bootstrap_file: PathBuf,
    /// Backup aggregator to mirror results to
    pub mirror: Option<SocketAddr>,
}

/// Runs the worker until an external signal.
pub async fn run(options: WorkerOptions) -> Result<()> {
    let bootstrap = BootstrapState::load(&options.bootstrap_file)?;
    let matrix = QMatrix::from_f64_rows(&bootstrap.matrix)
        .map_err(|e| NodeError::InvariantViolation(format!("bootstrap matrix: {e}")))?;

    let socket = UdpSocket::bind(options.bind).await?;
    info!(
        bind = %options.bind,
        rows = matrix.rows(),
        cols = matrix.cols(),
        "Worker up"
    );

    let mut buf = vec![0u8; codec::MAX_DATAGRAM];
    let mut last_seen_cycle: u64 = 0;
    let mut obsolete_tasks: u64 = 0;

    loop {
        let (len, from) = tokio::select! {
            recv = socket.recv_from(&mut buf) => match recv {
                Ok(pair) => pair,
                Err(err) => {
                    debug!(%err, "Socket receive error");
                    continue;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("External signal, shutting down");
                return Ok(());
            }
        };

        let msg = match codec::decode(&buf[..len]) {
            Ok(msg) => msg,
            Err(err) => {
                debug!(%err, %from, "Dropping malformed datagram");
                continue;
            }
        };
        let Message::Task { cycle, block_id, seed: frame_seed, x } = msg else {
            continue; // workers speak only the task/result exchange
        };

        // Tasks never go backwards: an older cycle's frame is a replay or a
        // demoted primary still flushing.
        if cycle < last_seen_cycle {
            obsolete_tasks += 1;
            debug!(cycle, last_seen_cycle, obsolete_tasks, "Dropping obsolete task");
            continue;
        }
        last_seen_cycle = cycle;

        // The selector is a pure function of (cycle, block_id); a frame
        // whose seed disagrees did not come from a sane primary.
        let expected_seed = seed::derive_seed(cycle, block_id);
        if frame_seed != expected_seed {
            warn!(cycle, block_id, "Task frame seed mismatch, dropping");
            continue;
        }

        let rows = seed::derive_rows(expected_seed, matrix.rows());
        let (y, saturated) = match evaluate_block(&matrix, &rows, x.as_slice()) {
            Ok(result) => result,
            Err(err) => {
                // Dimensions are cycle-stable; a mismatch here means the
                // fabric is misconfigured beyond local recovery.
                return Err(NodeError::InvariantViolation(format!(
                    "task evaluation failed: {err}"
                )));
            }
        };

        let reply = Message::Result { cycle, block_id, seed: expected_seed, y, saturated };
        let bytes = match codec::encode(&reply) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, "Result frame unencodable");
                continue;
            }
        };
        if let Err(err) = socket.send_to(&bytes, from).await {
            debug!(%err, %from, "Result send failed");
        }
        if let Some(mirror) = options.mirror {
            if let Err(err) = socket.send_to(&bytes, mirror).await {
                debug!(%err, %mirror, "Result mirror failed");
            }
        }
    }
}
