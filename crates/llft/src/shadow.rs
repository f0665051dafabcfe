//! The backup's shadow state and divergence detection.
//!
//! The backup applies every verified commit and every decoded cycle output
//! exactly as the primary does, so its `x` should track the primary's within
//! one cycle of lag. Each heartbeat carries the primary's committed epoch —
//! the fast divergence signal. When the epochs disagree, the backup sends a
//! resync request carrying its full 256-bit state digest; if the primary's
//! digest differs too, it answers with a signed snapshot that the backup
//! verifies against the primary's node key before adopting.

use tracing::{info, warn};

use fabriq_fixed::QVector;
use fabriq_poa::{keys::verify_signature, Digest32};
use fabriq_wire::canonical;

use crate::{LlftError, Result};

/// The backup's mirror of the primary's replicated state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowState {
    cycle: u64,
    x: QVector,
    committed_epoch: u64,
    /// The primary's node verify key, provisioned at startup
    primary_key: [u8; 32],
    resyncs_applied: u64,
}

impl ShadowState {
    /// Creates a shadow from the bootstrap state.
    pub fn new(x: QVector, primary_key: [u8; 32]) -> Self {
        Self { cycle: 0, x, committed_epoch: 0, primary_key, resyncs_applied: 0 }
    }

    /// Current shadow cycle.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Current shadow input vector.
    pub fn x(&self) -> &QVector {
        &self.x
    }

    /// Current shadow committed epoch.
    pub fn committed_epoch(&self) -> u64 {
        self.committed_epoch
    }

    /// Resync snapshots adopted so far (metrics).
    pub fn resyncs_applied(&self) -> u64 {
        self.resyncs_applied
    }

    /// Mirrors a decoded cycle output: the shadow advances exactly as the
    /// primary's control law does.
    pub fn apply_decode(&mut self, cycle: u64, y: QVector) {
        self.cycle = cycle;
        self.x = y;
    }

    /// Mirrors an undecodable cycle: `x` holds, the cycle advances.
    pub fn apply_hold(&mut self, cycle: u64) {
        self.cycle = cycle;
    }

    /// Mirrors an applied commit epoch.
    pub fn apply_commit_epoch(&mut self, committed_epoch: u64) {
        self.committed_epoch = committed_epoch;
    }

    /// Replaces the shadow input vector (a committed `SetState`).
    pub fn apply_set_state(&mut self, x: QVector) {
        self.x = x;
    }

    /// The 256-bit divergence digest over `(cycle, x, committed_epoch)`.
    pub fn digest(&self) -> Digest32 {
        Digest32::of(&canonical::state_digest_bytes(self.cycle, &self.x, self.committed_epoch))
    }

    /// Heartbeat-time divergence check.
    ///
    /// The backup's epoch may trail the primary's by the one commit applied
    /// at the boundary the heartbeat announces, so only a lag greater than
    /// one (or a shadow ahead of its primary) counts as divergence.
    pub fn diverged_from(&self, primary_epoch: u64) -> bool {
        primary_epoch > self.committed_epoch + 1 || primary_epoch < self.committed_epoch
    }

    /// Verifies and adopts a signed resync snapshot from the primary.
    pub fn apply_resync(
        &mut self,
        cycle: u64,
        committed_epoch: u64,
        x: QVector,
        signature: &[u8; 64],
    ) -> Result<()> {
        let signing_bytes = canonical::resync_signing_bytes(cycle, committed_epoch, &x);
        if !verify_signature(&self.primary_key, &signing_bytes, signature) {
            warn!(cycle, "Resync frame signature invalid");
            return Err(LlftError::ResyncRejected("bad signature".into()));
        }
        if cycle < self.cycle {
            return Err(LlftError::StaleResync { frame_cycle: cycle, shadow_cycle: self.cycle });
        }
        info!(cycle, committed_epoch, "Adopting resync snapshot");
        self.cycle = cycle;
        self.committed_epoch = committed_epoch;
        self.x = x;
        self.resyncs_applied += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabriq_poa::NodeKeypair;

    fn vec4(bits: [i32; 4]) -> QVector {
        QVector::from_bits(&bits)
    }

    fn shadow_with_key() -> (ShadowState, NodeKeypair) {
        let primary = NodeKeypair::generate();
        let shadow = ShadowState::new(vec4([1, 2, 3, 4]), primary.verify_key_bytes());
        (shadow, primary)
    }

    #[test]
    fn test_decode_advances_shadow() {
        let (mut shadow, _) = shadow_with_key();
        shadow.apply_decode(5, vec4([9, 9, 9, 9]));
        assert_eq!(shadow.cycle(), 5);
        assert_eq!(shadow.x(), &vec4([9, 9, 9, 9]));
    }

    #[test]
    fn test_hold_keeps_x() {
        let (mut shadow, _) = shadow_with_key();
        shadow.apply_hold(7);
        assert_eq!(shadow.cycle(), 7);
        assert_eq!(shadow.x(), &vec4([1, 2, 3, 4]));
    }

    #[test]
    fn test_digest_tracks_every_field() {
        let (mut shadow, _) = shadow_with_key();
        let d0 = shadow.digest();
        shadow.apply_hold(1);
        let d1 = shadow.digest();
        shadow.apply_commit_epoch(1);
        let d2 = shadow.digest();
        shadow.apply_set_state(vec4([0, 0, 0, 0]));
        let d3 = shadow.digest();
        assert!(d0 != d1 && d1 != d2 && d2 != d3);
    }

    #[test]
    fn test_epoch_lag_of_one_is_not_divergence() {
        let (mut shadow, _) = shadow_with_key();
        shadow.apply_commit_epoch(4);
        assert!(!shadow.diverged_from(4));
        assert!(!shadow.diverged_from(5));
        assert!(shadow.diverged_from(6));
        assert!(shadow.diverged_from(3));
    }

    #[test]
    fn test_resync_round_trip() {
        let (mut shadow, primary) = shadow_with_key();
        let x = vec4([7, 7, 7, 7]);
        let sig = primary.sign_resync(10, 3, &x);

        shadow.apply_resync(10, 3, x.clone(), &sig).unwrap();
        assert_eq!(shadow.cycle(), 10);
        assert_eq!(shadow.committed_epoch(), 3);
        assert_eq!(shadow.x(), &x);
        assert_eq!(shadow.resyncs_applied(), 1);
    }

    #[test]
    fn test_resync_from_wrong_key_rejected() {
        let (mut shadow, _) = shadow_with_key();
        let impostor = NodeKeypair::generate();
        let x = vec4([7, 7, 7, 7]);
        let sig = impostor.sign_resync(10, 3, &x);

        assert!(matches!(
            shadow.apply_resync(10, 3, x, &sig),
            Err(LlftError::ResyncRejected(_))
        ));
        // The shadow is untouched.
        assert_eq!(shadow.cycle(), 0);
    }

    #[test]
    fn test_tampered_resync_rejected() {
        let (mut shadow, primary) = shadow_with_key();
        let x = vec4([7, 7, 7, 7]);
        let sig = primary.sign_resync(10, 3, &x);
        // The snapshot content no longer matches the signature.
        assert!(shadow.apply_resync(10, 4, x, &sig).is_err());
    }

    #[test]
    fn test_stale_resync_rejected() {
        let (mut shadow, primary) = shadow_with_key();
        shadow.apply_hold(20);
        let x = vec4([7, 7, 7, 7]);
        let sig = primary.sign_resync(10, 3, &x);
        assert_eq!(
            shadow.apply_resync(10, 3, x, &sig),
            Err(LlftError::StaleResync { frame_cycle: 10, shadow_cycle: 20 })
        );
    }
}
