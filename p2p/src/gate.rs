//! Connection gating: consults the ban store on outbound dial and
//! authenticated inbound, per spec §4.7 ("A gater consults the ban store
//! on both outbound dial and authenticated inbound... Banned peers cannot
//! establish secure connections"). libp2p 0.53 folds dial/inbound gating
//! into the `allow_block_list` behaviour rather than a standalone trait;
//! `ConnectionGate` is the policy layer that keeps that behaviour's block
//! list synchronized with [`crate::ban::BanStore`].

use crate::ban::{self, BanStore};
use libp2p::allow_block_list::{self, BlockedPeers};
use libp2p::PeerId;
use std::sync::Arc;

pub struct ConnectionGate {
    bans: Arc<BanStore>,
}

impl ConnectionGate {
    #[must_use]
    pub fn new(bans: Arc<BanStore>) -> Self {
        Self { bans }
    }

    /// Consulted before dialing a peer and immediately after a secure
    /// channel is authenticated (post-noise-handshake), per spec §4.7.
    #[must_use]
    pub fn should_allow(&self, peer: &PeerId) -> bool {
        !self.bans.is_banned(peer, ban::now_unix()).unwrap_or(false)
    }

    /// Blocks `peer` in the swarm's block-list behaviour immediately,
    /// without waiting for the next gate check. Called right after
    /// [`BanStore::penalize`]/[`BanStore::ban`] crosses the threshold so an
    /// already-established connection is also torn down.
    pub fn enforce(&self, behaviour: &mut allow_block_list::Behaviour<BlockedPeers>, peer: PeerId) {
        behaviour.block_peer(peer);
    }
}
