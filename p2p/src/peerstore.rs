//! Persisted peer address book, per spec §4.7: multiaddrs, last-seen
//! timestamp and discovery source, capped and pruned. Same prefix-namespace
//! approach as [`crate::ban::BanStore`], over `peerstore/peer/<id>`.

use libp2p::{Multiaddr, PeerId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use storage::Database;

const PREFIX: &str = "peerstore/peer";
const MAX_ENTRIES: usize = 500;
const STALE_SECONDS: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerSource {
    Dht,
    Mdns,
    Seed,
    Gossip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub id: String,
    pub addrs: Vec<String>,
    pub last_seen: i64,
    pub source: PeerSource,
}

/// In-memory working set, periodically flushed to `storage`. Keeping the
/// hot set in memory avoids a storage round-trip on every connection
/// event; persistence only matters for restart bootstrap, per spec §4.7.
pub struct PeerStore {
    db: Database,
    live: Mutex<HashMap<PeerId, PeerRecord>>,
}

impl PeerStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db,
            live: Mutex::new(HashMap::new()),
        }
    }

    fn key(peer: &PeerId) -> Vec<u8> {
        storage::namespaced_key(PREFIX, peer.to_string().as_bytes())
    }

    pub fn record_seen(&self, peer: PeerId, addr: Option<Multiaddr>, source: PeerSource, now: i64) {
        let mut live = self.live.lock().expect("peer store lock poisoned");
        let entry = live.entry(peer).or_insert_with(|| PeerRecord {
            id: peer.to_string(),
            addrs: Vec::new(),
            last_seen: now,
            source,
        });
        entry.last_seen = now;
        if let Some(addr) = addr {
            let addr = addr.to_string();
            if !entry.addrs.contains(&addr) {
                entry.addrs.push(addr);
            }
        }
    }

    #[must_use]
    pub fn known_peers(&self) -> Vec<PeerRecord> {
        self.live.lock().expect("peer store lock poisoned").values().cloned().collect()
    }

    /// Persists the current in-memory working set, pruning stale entries
    /// and capping the total. Called every 5 minutes and on shutdown, per
    /// spec §4.7. When already at capacity, peers not already persisted
    /// are skipped rather than evicting existing ones.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn persist(&self, now: i64) -> storage::Result<()> {
        let existing = self.db.scan_prefix(PREFIX.as_bytes())?;
        let mut persisted_ids: std::collections::HashSet<String> = existing
            .iter()
            .filter_map(|(_, v)| serde_json::from_slice::<PeerRecord>(v).ok())
            .map(|r| r.id)
            .collect();

        let mut batch = storage::Batch::new();
        for (key, value) in &existing {
            if let Ok(record) = serde_json::from_slice::<PeerRecord>(value) {
                if now - record.last_seen > STALE_SECONDS {
                    batch.delete(key.clone());
                    persisted_ids.remove(&record.id);
                }
            }
        }

        let live = self.live.lock().expect("peer store lock poisoned");
        for record in live.values() {
            let already_persisted = persisted_ids.contains(&record.id);
            if !already_persisted && persisted_ids.len() >= MAX_ENTRIES {
                continue;
            }
            let peer: PeerId = record.id.parse().expect("stored peer id is valid");
            batch.put(Self::key(&peer), serde_json::to_vec(record).expect("peer record serializes"));
            persisted_ids.insert(record.id.clone());
        }
        drop(live);
        self.db.commit(batch)
    }

    /// Peers loaded from disk at startup, to dial best-effort.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn load_persisted(&self) -> storage::Result<Vec<PeerRecord>> {
        let mut out = Vec::new();
        for (_, value) in self.db.scan_prefix(PREFIX.as_bytes())? {
            if let Ok(record) = serde_json::from_slice::<PeerRecord>(&value) {
                out.push(record);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_persist_round_trips() {
        let store = PeerStore::new(Database::open_temporary().unwrap());
        let peer = PeerId::random();
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
        store.record_seen(peer, Some(addr), PeerSource::Mdns, 1000);
        store.persist(1000).unwrap();

        let loaded = store.load_persisted().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, peer.to_string());
        assert_eq!(loaded[0].addrs.len(), 1);
    }

    #[test]
    fn stale_records_are_pruned_on_persist() {
        let store = PeerStore::new(Database::open_temporary().unwrap());
        let peer = PeerId::random();
        store.record_seen(peer, None, PeerSource::Gossip, 0);
        store.persist(0).unwrap();
        assert_eq!(store.load_persisted().unwrap().len(), 1);

        // simulate a restart: fresh in-memory set, persist again much later
        let reopened = PeerStore::new(store.db.clone());
        reopened.persist(STALE_SECONDS + 100).unwrap();
        assert!(reopened.load_persisted().unwrap().is_empty());
    }

    #[test]
    fn cap_blocks_new_peers_once_full() {
        let store = PeerStore::new(Database::open_temporary().unwrap());
        for i in 0..MAX_ENTRIES {
            let peer = PeerId::random();
            store.record_seen(peer, None, PeerSource::Seed, i as i64);
        }
        store.persist(1_000_000).unwrap();
        assert_eq!(store.load_persisted().unwrap().len(), MAX_ENTRIES);

        let overflow = PeerId::random();
        store.record_seen(overflow, None, PeerSource::Seed, 1_000_000);
        store.persist(1_000_000).unwrap();
        assert_eq!(store.load_persisted().unwrap().len(), MAX_ENTRIES);
    }
}
