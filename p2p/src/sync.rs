//! Request/response sync protocols and peer-selection/fork-resolution
//! decision logic, per spec §4.8. The wire behaviours mirror
//! [`crate::handshake`]'s `request_response::json` shape; the selection
//! and fork-walk logic is pure so it can be unit tested without a live
//! swarm.

use bond_core::block::Block;
use libp2p::request_response::{self, ProtocolSupport};
use libp2p::{PeerId, StreamProtocol};
use serde::{Deserialize, Serialize};
use shared::Hash256;
use std::time::Duration;

pub const SYNC_PROTOCOL: StreamProtocol = StreamProtocol::new("/klingnet/sync/1.0.0");
pub const HEIGHT_PROTOCOL: StreamProtocol = StreamProtocol::new("/klingnet/height/1.0.0");
pub const MAX_BLOCKS_PER_BATCH: u64 = 500;
pub const SYNC_RESPONSE_MAX_BYTES: usize = 10 * 1024 * 1024;
pub const HEIGHT_TIMEOUT_SECONDS: u64 = 5;
pub const POLL_INTERVAL_SECONDS: u64 = 10;
pub const POLL_PEER_COUNT: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub from_height: u64,
    pub max_blocks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeightRequest;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeightResponse {
    pub height: u64,
    pub tip_hash: Hash256,
}

pub type SyncBehaviour = request_response::json::Behaviour<SyncRequest, SyncResponse>;
pub type HeightBehaviour = request_response::json::Behaviour<HeightRequest, HeightResponse>;

#[must_use]
pub fn new_sync_behaviour() -> SyncBehaviour {
    request_response::json::Behaviour::new(
        [(SYNC_PROTOCOL, ProtocolSupport::Full)],
        request_response::Config::default(),
    )
}

#[must_use]
pub fn new_height_behaviour() -> HeightBehaviour {
    request_response::json::Behaviour::new(
        [(HEIGHT_PROTOCOL, ProtocolSupport::Full)],
        request_response::Config::default().with_request_timeout(Duration::from_secs(HEIGHT_TIMEOUT_SECONDS)),
    )
}

/// Clamps a requested batch size to `MaxBlocksPerBatch`, per spec §4.8.
#[must_use]
pub fn clamp_batch(requested: u64) -> u64 {
    requested.min(MAX_BLOCKS_PER_BATCH)
}

/// Picks which polled peer to sync from, per spec §4.8: the peer with
/// strictly greater height, or on a height tie, a peer whose tip differs
/// from the local tip.
#[must_use]
pub fn select_sync_peer(
    local_height: u64,
    local_tip: Hash256,
    candidates: &[(PeerId, HeightResponse)],
) -> Option<PeerId> {
    candidates
        .iter()
        .filter(|(_, resp)| resp.height > local_height || (resp.height == local_height && resp.tip_hash != local_tip))
        .max_by_key(|(_, resp)| resp.height)
        .map(|(peer, _)| *peer)
}

/// The next height to probe while walking backward to find a common
/// ancestor during fork resolution, per spec §4.8. Returns `None` once
/// height 0 has already been checked (abandon).
#[must_use]
pub fn next_fork_probe_height(last_checked: u64) -> Option<u64> {
    last_checked.checked_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_batch_caps_at_500() {
        assert_eq!(clamp_batch(10_000), MAX_BLOCKS_PER_BATCH);
        assert_eq!(clamp_batch(10), 10);
    }

    #[test]
    fn selects_strictly_taller_peer() {
        let local_tip = Hash256::blake3(b"local");
        let peer_a = PeerId::random();
        let peer_b = PeerId::random();
        let candidates = vec![
            (peer_a, HeightResponse { height: 10, tip_hash: local_tip }),
            (peer_b, HeightResponse { height: 20, tip_hash: Hash256::blake3(b"other") }),
        ];
        assert_eq!(select_sync_peer(10, local_tip, &candidates), Some(peer_b));
    }

    #[test]
    fn selects_peer_with_different_tip_on_height_tie() {
        let local_tip = Hash256::blake3(b"local");
        let peer = PeerId::random();
        let candidates = vec![(peer, HeightResponse { height: 10, tip_hash: Hash256::blake3(b"other") })];
        assert_eq!(select_sync_peer(10, local_tip, &candidates), Some(peer));
    }

    #[test]
    fn ignores_peer_matching_local_tip_at_same_height() {
        let local_tip = Hash256::blake3(b"local");
        let peer = PeerId::random();
        let candidates = vec![(peer, HeightResponse { height: 10, tip_hash: local_tip })];
        assert_eq!(select_sync_peer(10, local_tip, &candidates), None);
    }

    #[test]
    fn fork_probe_walks_down_to_genesis_then_stops() {
        assert_eq!(next_fork_probe_height(1), Some(0));
        assert_eq!(next_fork_probe_height(0), None);
    }
}
