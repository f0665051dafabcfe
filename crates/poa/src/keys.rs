//! Ed25519 key material: operator verify keys and the node signing identity.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use fabriq_fixed::QVector;
use fabriq_wire::canonical;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

use crate::gate::CommitToken;
use crate::proposal::ProposedState;
use crate::{PoaError, Result};

/// The pre-provisioned set of authorized operator keys.
///
/// Loaded once at startup from a newline-separated hex file and read-only
/// afterwards; changing the set requires a committed reconfiguration and a
/// restart. An aggregator without a key set cannot accept any state
/// transition and refuses to start.
#[derive(Debug, Clone, Default)]
pub struct AuthorizedKeys {
    keys: HashMap<[u8; 32], VerifyingKey>,
}

impl AuthorizedKeys {
    /// Builds a set from raw key bytes, skipping any that are not valid
    /// curve points (each skip is logged).
    pub fn from_keys(raw: Vec<[u8; 32]>) -> Self {
        let mut keys = HashMap::with_capacity(raw.len());
        for bytes in raw {
            match VerifyingKey::from_bytes(&bytes) {
                Ok(vk) => {
                    keys.insert(bytes, vk);
                }
                Err(err) => {
                    warn!(key = %hex::encode(bytes), %err, "Skipping malformed authorized key");
                }
            }
        }
        Self { keys }
    }

    /// Loads the set from a file of newline-separated hex keys.
    ///
    /// Blank lines and `#` comments are ignored.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PoaError::KeySetUnavailable(format!("{}: {e}", path.display())))?;
        let mut raw = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let bytes = hex::decode(line)
                .map_err(|e| PoaError::MalformedKey(format!("bad hex in key file: {e}")))?;
            let arr: [u8; 32] = bytes
                .try_into()
                .map_err(|_| PoaError::MalformedKey("key is not 32 bytes".into()))?;
            raw.push(arr);
        }
        Ok(Self::from_keys(raw))
    }

    /// Whether the set contains this key.
    pub fn contains(&self, key: &[u8; 32]) -> bool {
        self.keys.contains_key(key)
    }

    /// Looks up the parsed verifying key.
    pub fn get(&self, key: &[u8; 32]) -> Option<&VerifyingKey> {
        self.keys.get(key)
    }

    /// Number of authorized keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set is empty (an aggregator must refuse to start).
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Verifies an Ed25519 signature against raw key bytes.
///
/// Returns `false` for malformed keys as well as failed verification; the
/// caller cannot distinguish the two and must not try.
pub fn verify_signature(key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let Ok(vk) = VerifyingKey::from_bytes(key) else {
        return false;
    };
    let sig = Signature::from_bytes(signature);
    vk.verify(message, &sig).is_ok()
}

/// An Ed25519 signing identity.
///
/// Aggregators hold one as their node key (signing `Resync` snapshots);
/// tests and the operator tooling use it to issue commit tokens.
#[derive(Clone)]
pub struct NodeKeypair {
    inner: SigningKey,
}

impl NodeKeypair {
    /// Generates a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self { inner: SigningKey::generate(&mut rng) }
    }

    /// Restores a keypair from its 32-byte secret.
    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        Self { inner: SigningKey::from_bytes(secret) }
    }

    /// The public verify-key bytes.
    pub fn verify_key_bytes(&self) -> [u8; 32] {
        self.inner.verifying_key().to_bytes()
    }

    /// Signs an arbitrary canonical byte string.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.inner.sign(message).to_bytes()
    }

    /// Issues a commit token for a proposed state at the given sequence.
    pub fn issue_commit(&self, state: &ProposedState, sequence: u64) -> CommitToken {
        let state_hash = state.digest().to_array();
        let signature = self.sign(&canonical::commit_signing_bytes(&state_hash, sequence));
        CommitToken {
            state_hash,
            sequence,
            verify_key: self.verify_key_bytes(),
            signature,
        }
    }

    /// Signs a resync snapshot of `(cycle, committed_epoch, x)`.
    pub fn sign_resync(&self, cycle: u64, committed_epoch: u64, x: &QVector) -> [u8; 64] {
        self.sign(&canonical::resync_signing_bytes(cycle, committed_epoch, x))
    }
}

impl std::fmt::Debug for NodeKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret half.
        write!(f, "NodeKeypair({})", hex::encode(&self.verify_key_bytes()[..8]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sign_verify_round_trip() {
        let kp = NodeKeypair::generate();
        let sig = kp.sign(b"payload");
        assert!(verify_signature(&kp.verify_key_bytes(), b"payload", &sig));
        assert!(!verify_signature(&kp.verify_key_bytes(), b"other", &sig));
    }

    #[test]
    fn test_keypair_restore_deterministic() {
        let kp = NodeKeypair::generate();
        let restored = NodeKeypair::from_bytes(&kp.inner.to_bytes());
        assert_eq!(kp.verify_key_bytes(), restored.verify_key_bytes());
    }

    #[test]
    fn test_key_file_parsing() {
        let kp = NodeKeypair::generate();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# operators").unwrap();
        writeln!(file, "{}", hex::encode(kp.verify_key_bytes())).unwrap();
        writeln!(file).unwrap();

        let keys = AuthorizedKeys::from_file(file.path()).unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys.contains(&kp.verify_key_bytes()));
    }

    #[test]
    fn test_missing_key_file() {
        let err = AuthorizedKeys::from_file(Path::new("/nonexistent/keys.txt")).unwrap_err();
        assert!(matches!(err, PoaError::KeySetUnavailable(_)));
    }

    #[test]
    fn test_bad_hex_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not-hex").unwrap();
        let err = AuthorizedKeys::from_file(file.path()).unwrap_err();
        assert!(matches!(err, PoaError::MalformedKey(_)));
    }
}
