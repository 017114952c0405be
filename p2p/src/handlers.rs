//! Callback surface the node runtime implements so [`crate::node::P2pNode`]
//! never depends on `Chain`/`Mempool` internals directly — mirroring the
//! handler-injection style `bond_core::chain::ChainHandlers` already uses
//! for commit-time callbacks, applied here to inbound network events.

use bond_core::block::Block;
use bond_core::transaction::Transaction;
use consensus::Heartbeat;
use shared::Hash256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GossipOutcome {
    Accepted,
    /// Known-already / idempotent drop; never penalized.
    Known,
    /// Invalid per context-free or contextual rules; penalizes the
    /// origin peer.
    Invalid,
    /// Parent not found; triggers sync, never penalized.
    OrphanParent,
}

/// Implemented by the node runtime (root `src/`) to route gossip and sync
/// traffic into the chain/mempool/sub-chain manager without this crate
/// taking a hard dependency on their mutable state.
pub trait NodeHandlers: Send + Sync {
    fn local_height(&self) -> u64;
    fn local_tip(&self) -> Hash256;
    fn genesis_hash(&self) -> Hash256;
    fn get_block(&self, height: u64) -> Option<Block>;
    fn get_block_range(&self, from_height: u64, max_blocks: u64) -> Vec<Block>;

    fn on_gossip_transaction(&self, tx: Transaction) -> GossipOutcome;
    fn on_gossip_block(&self, block: Block) -> GossipOutcome;
    fn on_gossip_heartbeat(&self, heartbeat: Heartbeat) -> GossipOutcome;

    /// Same as the three `on_gossip_*` methods but scoped to a running
    /// sub-chain, per spec §4.7's per-sub-chain topic variants.
    fn on_sub_chain_gossip_block(&self, chain_id: Hash256, block: Block) -> GossipOutcome;
}
