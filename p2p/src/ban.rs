//! Ban score accounting and the persisted ban store, per spec §4.7 and
//! §4.4's shared-resource policy ("ban store... guarded by its own
//! lock"). Grounded on `storage::Database`'s prefix-namespace design
//! (`banstore/ban/<id>`, per spec §8's storage layout) plus the teacher's
//! `P2PConfig`/ban-adjacent fields in the old `src/network.rs` (superseded
//! here, kept only for naming continuity).

use libp2p::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use storage::Database;

const PREFIX: &str = "banstore/ban";
const BAN_DURATION_SECONDS: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanRecord {
    pub id: String,
    pub reason: String,
    pub score: u32,
    pub banned_at: i64,
    /// 0 = permanent.
    pub expires_at: i64,
}

impl BanRecord {
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at != 0 && now >= self.expires_at
    }
}

/// Per-peer misbehavior score plus the persisted set of active bans.
/// Scores live in memory only (spec §4.7: "score cleared" on ban, nothing
/// says scores below threshold survive a restart); bans persist.
pub struct BanStore {
    db: Database,
    scores: Mutex<HashMap<PeerId, u32>>,
    ban_threshold: u32,
}

impl BanStore {
    #[must_use]
    pub fn new(db: Database, ban_threshold: u32) -> Self {
        Self {
            db,
            scores: Mutex::new(HashMap::new()),
            ban_threshold,
        }
    }

    fn key(peer: &PeerId) -> Vec<u8> {
        storage::namespaced_key(PREFIX, peer.to_string().as_bytes())
    }

    /// Adds `penalty` to `peer`'s score. Returns `true` if this crossed
    /// the ban threshold and a ban record was persisted (score cleared).
    ///
    /// # Errors
    ///
    /// Returns an error if persisting the resulting ban record fails.
    pub fn penalize(&self, peer: PeerId, penalty: u32, reason: &str, now: i64) -> storage::Result<bool> {
        let mut scores = self.scores.lock().expect("ban score lock poisoned");
        let score = scores.entry(peer).or_insert(0);
        *score += penalty;
        if *score >= self.ban_threshold {
            *score = 0;
            drop(scores);
            self.ban(peer, reason, now, BAN_DURATION_SECONDS)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Persists an immediate ban, bypassing score accumulation (used for
    /// handshake failures, per spec §4.7: "instant ban").
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn ban(&self, peer: PeerId, reason: &str, now: i64, duration_seconds: i64) -> storage::Result<()> {
        let record = BanRecord {
            id: peer.to_string(),
            reason: reason.to_string(),
            score: 0,
            banned_at: now,
            expires_at: if duration_seconds == 0 { 0 } else { now + duration_seconds },
        };
        let mut batch = storage::Batch::new();
        batch.put(Self::key(&peer), serde_json::to_vec(&record).expect("ban record serializes"));
        self.db.commit(batch)
    }

    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn is_banned(&self, peer: &PeerId, now: i64) -> storage::Result<bool> {
        match self.db.get(Self::key(peer))? {
            None => Ok(false),
            Some(bytes) => {
                let record: BanRecord = serde_json::from_slice(&bytes).unwrap_or(BanRecord {
                    id: peer.to_string(),
                    reason: String::new(),
                    score: 0,
                    banned_at: now,
                    expires_at: now,
                });
                Ok(!record.is_expired(now))
            }
        }
    }

    /// Deletes every ban record whose `expires_at` has passed. Called
    /// every 10 minutes per spec §4.7.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn prune_expired(&self, now: i64) -> storage::Result<usize> {
        let mut pruned = 0;
        let mut batch = storage::Batch::new();
        for (key, value) in self.db.scan_prefix(PREFIX.as_bytes())? {
            if let Ok(record) = serde_json::from_slice::<BanRecord>(&value) {
                if record.is_expired(now) {
                    batch.delete(key);
                    pruned += 1;
                }
            }
        }
        if pruned > 0 {
            self.db.commit(batch)?;
        }
        Ok(pruned)
    }
}

#[must_use]
pub fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(threshold: u32) -> BanStore {
        BanStore::new(Database::open_temporary().unwrap(), threshold)
    }

    #[test]
    fn penalize_below_threshold_does_not_ban() {
        let store = temp_store(100);
        let peer = PeerId::random();
        let banned = store.penalize(peer, 50, "bad block", 1000).unwrap();
        assert!(!banned);
        assert!(!store.is_banned(&peer, 1000).unwrap());
    }

    #[test]
    fn penalize_crossing_threshold_bans() {
        let store = temp_store(100);
        let peer = PeerId::random();
        store.penalize(peer, 60, "invalid tx", 1000).unwrap();
        let banned = store.penalize(peer, 60, "invalid block", 1000).unwrap();
        assert!(banned);
        assert!(store.is_banned(&peer, 1000).unwrap());
    }

    #[test]
    fn instant_ban_on_handshake_failure() {
        let store = temp_store(100);
        let peer = PeerId::random();
        store.ban(peer, "genesis mismatch", 1000, 24 * 60 * 60).unwrap();
        assert!(store.is_banned(&peer, 1000).unwrap());
    }

    #[test]
    fn expired_ban_is_not_banned() {
        let store = temp_store(100);
        let peer = PeerId::random();
        store.ban(peer, "stale", 0, 100).unwrap();
        assert!(store.is_banned(&peer, 50).unwrap());
        assert!(!store.is_banned(&peer, 200).unwrap());
    }

    #[test]
    fn prune_expired_removes_only_expired_records() {
        let store = temp_store(100);
        let stale = PeerId::random();
        let fresh = PeerId::random();
        store.ban(stale, "stale", 0, 100).unwrap();
        store.ban(fresh, "fresh", 0, 0).unwrap();
        let pruned = store.prune_expired(200).unwrap();
        assert_eq!(pruned, 1);
        assert!(!store.is_banned(&stale, 200).unwrap());
        assert!(store.is_banned(&fresh, 200).unwrap());
    }
}
