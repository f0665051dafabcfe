//! The aggregator event loop.
//!
//! One single-threaded cooperative loop over one datagram socket and a
//! monotonic cycle timer, the systems equivalent of the original design's
//! async datagram protocol. The loop suspends in exactly two places —
//! awaiting a datagram up to the cycle deadline, and awaiting the cycle
//! tick — and every decision lives in [`AggregatorContext`], which makes the
//! loop itself a thin dispatcher.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use fabriq_config::{BootstrapState, Config};
use fabriq_poa::CommitToken;
use fabriq_wire::{codec, Message};

use crate::context::{AggregatorContext, CommitEffect};
use crate::Result;

/// Fraction of the cycle period the boundary computation may use
/// (`B_cpu <= 0.3 * T_cycle`); overruns are a design bug and flagged.
const CPU_BUDGET_NUM: u32 = 3;
const CPU_BUDGET_DEN: u32 = 10;

/// Runs the aggregator until a `Halt` commit or an external signal.
pub async fn run(config: Config) -> Result<()> {
    let bootstrap = BootstrapState::load(&config.system.bootstrap_file)?;
    let (matrix, x0) = bootstrap.into_fixed(&config.system)?;
    let mut ctx = AggregatorContext::new(&config, matrix, x0)?;

    let socket = UdpSocket::bind(config.transport.bind).await?;
    let peer = config.transport.peer;
    let workers = config.transport.workers.clone();
    info!(
        bind = %config.transport.bind,
        role = %ctx.role(),
        workers = workers.len(),
        "Aggregator up"
    );

    let mut buf = vec![0u8; codec::MAX_DATAGRAM];
    let mut next_boundary = Instant::now() + Duration::from_millis(ctx.effective_period_ms());
    let mut election_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = sleep_until(next_boundary) => {
                let opened_at = Instant::now();
                let (open, effects) = ctx.cycle_boundary(peer, &workers);
                for (addr, msg) in open.outbound {
                    send(&socket, addr, &msg).await;
                }
                if let Some(claim) = ctx.heartbeat_tick() {
                    send(&socket, peer, &claim).await;
                    election_deadline = Some(Instant::now() + config.system.election_window());
                }
                for effect in effects {
                    match effect {
                        CommitEffect::Halt => {
                            info!(cycle = ctx.cycle(), "Halt commit applied, shutting down");
                            return Ok(());
                        }
                        CommitEffect::PeriodChanged(ms) => {
                            info!(period_ms = ms, "Cycle period reconfigured");
                        }
                    }
                }
                let period = Duration::from_millis(ctx.effective_period_ms());
                let budget = period * CPU_BUDGET_NUM / CPU_BUDGET_DEN;
                if opened_at.elapsed() > budget {
                    ctx.metrics.cpu_budget_overruns += 1;
                    warn!(
                        elapsed_us = opened_at.elapsed().as_micros() as u64,
                        budget_us = budget.as_micros() as u64,
                        "Cycle boundary exceeded its CPU budget"
                    );
                }
                next_boundary += period;
            }

            _ = election_sleep(election_deadline), if election_deadline.is_some() => {
                election_deadline = None;
                ctx.election_expired();
            }

            recv = socket.recv_from(&mut buf) => {
                match recv {
                    Ok((len, from)) => {
                        if let Some((to, reply)) = handle_datagram(&mut ctx, &buf[..len], from, peer) {
                            send(&socket, to, &reply).await;
                        }
                    }
                    Err(err) => {
                        // Datagram errors (ICMP-backed refusals and the
                        // like) are transient on a lossy subnet.
                        debug!(%err, "Socket receive error");
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("External signal, shutting down");
                return Ok(());
            }
        }
    }
}

async fn election_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Decodes and dispatches one datagram, returning any reply to send.
fn handle_datagram(
    ctx: &mut AggregatorContext,
    datagram: &[u8],
    from: SocketAddr,
    peer: SocketAddr,
) -> Option<(SocketAddr, Message)> {
    let msg = match codec::decode(datagram) {
        Ok(msg) => msg,
        Err(err) => {
            ctx.metrics.malformed_datagrams += 1;
            debug!(%err, %from, "Dropping malformed datagram");
            return None;
        }
    };

    match msg {
        Message::Result { cycle, block_id, seed, y, saturated } => {
            ctx.handle_result(cycle, block_id, seed, y, saturated);
            None
        }
        Message::Heartbeat { cycle, committed_epoch, role: _, sender_id } => ctx
            .handle_heartbeat(cycle, committed_epoch, sender_id)
            .map(|request| (peer, request)),
        Message::ClaimPrimary { cycle, committed_epoch, node_id } => {
            ctx.handle_claim(cycle, committed_epoch, node_id);
            None
        }
        Message::CommitToken { state_hash, sequence, verify_key, signature } => {
            ctx.handle_commit_token(
                CommitToken { state_hash, sequence, verify_key, signature },
                from,
            );
            None
        }
        Message::Proposal { sequence: _, payload } => {
            ctx.handle_proposal(&payload);
            None
        }
        Message::Resync { cycle, committed_epoch, x, signature } => {
            ctx.handle_resync(cycle, committed_epoch, x, &signature);
            None
        }
        Message::ResyncRequest { cycle: _, committed_epoch: _, digest, node_id: _ } => {
            ctx.handle_resync_request(digest).map(|snapshot| (peer, snapshot))
        }
        Message::Task { .. } => {
            // Aggregators never evaluate tasks; a task frame here is a
            // misdirected datagram.
            debug!(%from, "Ignoring task frame addressed to an aggregator");
            None
        }
    }
}

async fn send(socket: &UdpSocket, addr: SocketAddr, msg: &Message) {
    match codec::encode(msg) {
        Ok(bytes) => {
            if let Err(err) = socket.send_to(&bytes, addr).await {
                // Lossy by design: the rateless code and the heartbeat
                // machinery absorb individual losses.
                debug!(%err, %addr, kind = msg.kind(), "Datagram send failed");
            }
        }
        Err(err) => warn!(%err, kind = msg.kind(), "Refusing to send unencodable message"),
    }
}
