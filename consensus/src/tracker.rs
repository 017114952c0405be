//! Validator liveness tracker: records the last time each validator was
//! heard from (a block at the expected height, or a signed heartbeat) and
//! answers `is_online` against the spec's 60-second freshness window.
//! Grounded on the old DPoS `ValidatorPerformance` bookkeeping idea
//! (per-validator record keyed by pubkey/identity), repurposed from a
//! slashing scorecard into a pure liveness window.

use serde::{Deserialize, Serialize};
use shared::Signature;
use std::collections::HashMap;

/// Off-chain signed liveness ping, per spec §4.5. Not part of the canonical
/// chain; gossiped on the `/klingnet/heartbeat/1.0.0` topic and consumed
/// only by the tracker and the PoA backup-election check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub pubkey: [u8; 32],
    pub height: u64,
    pub timestamp: i64,
    /// Schnorr signature over `pubkey || height_le8 || timestamp_le8`
    /// hashed with BLAKE3.
    pub signature: Vec<u8>,
}

impl Heartbeat {
    #[must_use]
    pub fn signing_bytes(pubkey: &[u8; 32], height: u64, timestamp: i64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + 8 + 8);
        buf.extend_from_slice(pubkey);
        buf.extend_from_slice(&height.to_le_bytes());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf
    }

    /// Builds and signs a heartbeat for `pubkey` at `height`/`timestamp`.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn sign(keypair: &shared::KeyPair, height: u64, timestamp: i64) -> shared::Result<Self> {
        let pubkey = *keypair.public_key.as_bytes();
        let digest = shared::Hash256::blake3(&Self::signing_bytes(&pubkey, height, timestamp));
        let signature = keypair.sign(digest.as_bytes())?;
        Ok(Self {
            pubkey,
            height,
            timestamp,
            signature: signature.as_bytes().to_vec(),
        })
    }

    /// Verifies the embedded signature against `pubkey`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pubkey/signature bytes are malformed.
    pub fn verify(&self) -> shared::Result<bool> {
        let public_key = shared::public_key_from_bytes(&self.pubkey)?;
        let signature = Signature::from_parts(&self.signature, public_key)?;
        let digest = shared::Hash256::blake3(&Self::signing_bytes(&self.pubkey, self.height, self.timestamp));
        signature.verify(digest.as_bytes())
    }
}

/// Tracks last-seen time per validator pubkey. Serialized under its own
/// lock at the call site (spec §5); reads return the last committed
/// record.
#[derive(Debug, Clone, Default)]
pub struct ValidatorTracker {
    last_seen: HashMap<[u8; 32], i64>,
    freshness_window_seconds: i64,
}

impl ValidatorTracker {
    #[must_use]
    pub fn new(freshness_window_seconds: i64) -> Self {
        Self {
            last_seen: HashMap::new(),
            freshness_window_seconds,
        }
    }

    /// Records that `pubkey` produced a block at the expected height, or
    /// sent a verified heartbeat, at `now`.
    pub fn record_seen(&mut self, pubkey: [u8; 32], now: i64) {
        self.last_seen
            .entry(pubkey)
            .and_modify(|t| *t = (*t).max(now))
            .or_insert(now);
    }

    /// Ingests a heartbeat: verifies its signature, then records the
    /// sender as seen at its embedded timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the heartbeat's signature does not verify.
    pub fn record_heartbeat(&mut self, heartbeat: &Heartbeat) -> shared::Result<()> {
        if !heartbeat.verify()? {
            return Err(shared::BlockchainError::InvalidSignature);
        }
        self.record_seen(heartbeat.pubkey, heartbeat.timestamp);
        Ok(())
    }

    #[must_use]
    pub fn is_online(&self, pubkey: &[u8; 32], now: i64) -> bool {
        self.last_seen
            .get(pubkey)
            .is_some_and(|last| now - *last <= self.freshness_window_seconds)
    }

    #[must_use]
    pub fn last_seen(&self, pubkey: &[u8; 32]) -> Option<i64> {
        self.last_seen.get(pubkey).copied()
    }

    pub fn forget(&mut self, pubkey: &[u8; 32]) {
        self.last_seen.remove(pubkey);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_within_freshness_window() {
        let mut tracker = ValidatorTracker::new(60);
        let pubkey = [7u8; 32];
        tracker.record_seen(pubkey, 1000);
        assert!(tracker.is_online(&pubkey, 1050));
        assert!(!tracker.is_online(&pubkey, 1061));
    }

    #[test]
    fn unknown_validator_is_offline() {
        let tracker = ValidatorTracker::new(60);
        assert!(!tracker.is_online(&[1u8; 32], 100));
    }

    #[test]
    fn heartbeat_round_trip_verifies() {
        let keypair = shared::KeyPair::generate();
        let heartbeat = Heartbeat::sign(&keypair, 10, 5000).unwrap();
        assert!(heartbeat.verify().unwrap());
    }

    #[test]
    fn tampered_heartbeat_fails_verification() {
        let keypair = shared::KeyPair::generate();
        let mut heartbeat = Heartbeat::sign(&keypair, 10, 5000).unwrap();
        heartbeat.height = 11;
        assert!(!heartbeat.verify().unwrap());
    }

    #[test]
    fn record_heartbeat_updates_last_seen() {
        let mut tracker = ValidatorTracker::new(60);
        let keypair = shared::KeyPair::generate();
        let pubkey = *keypair.public_key.as_bytes();
        let heartbeat = Heartbeat::sign(&keypair, 1, 2000).unwrap();
        tracker.record_heartbeat(&heartbeat).unwrap();
        assert!(tracker.is_online(&pubkey, 2030));
    }
}
