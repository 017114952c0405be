//! Node runtime: the `NodeRuntime` that owns the chain, mempool, sub-chain
//! manager and validator bookkeeping, wires `bond_core::chain::ChainHandlers`
//! into the sub-chain registry and PoA validator set, implements
//! `p2p::NodeHandlers` for the gossip/sync event loop, and drives the
//! mining and heartbeat loops for validator nodes.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bond_core::block::{Block, BlockHeader};
use bond_core::chain::{
    AcceptOutcome, Chain, DeregistrationHandler, RegistrationHandler, RevertedTxHandler,
    StakeHandler, UnstakeHandler,
};
use bond_core::error::{BondError, BondResult};
use bond_core::mempool::Mempool;
use bond_core::script::Script;
use bond_core::transaction::{Transaction, TxOutput};
use bond_core::utxo::OutPoint;
use bond_core::ConsensusEngine;
use consensus::{Heartbeat, PoaEngine, ValidatorSet, ValidatorTracker};
use libp2p::PeerId;
use p2p::{GossipOutcome, NodeHandle, NodeHandlers, PeerStore};
use shared::{Hash256, KeyPair, ProtocolParams};
use subchain::manager::SubChainManager;
use subchain::registry::SubChainRecord;
use subchain::SubChainError;
use tokio::sync::watch;
use tracing::{info, warn};

/// Seconds since the Unix epoch, clock going backwards clamps to zero.
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Wraps a shared `PoaEngine` so both the `Chain`'s internal engine slot and
/// the node runtime's mining loop/stake handlers mutate the same validator
/// list, without the chain and the runtime fighting over a single lock: the
/// chain's own `Mutex` is never held while this one is taken.
pub struct SharedPoaEngine(pub Arc<Mutex<PoaEngine>>);

impl ConsensusEngine for SharedPoaEngine {
    fn validate_header(&self, parent: &BlockHeader, header: &BlockHeader) -> BondResult<()> {
        self.0
            .lock()
            .expect("poa engine lock poisoned")
            .validate_header(parent, header)
    }

    fn produce_header(
        &self,
        parent: &BlockHeader,
        now: i64,
        merkle_root: Hash256,
        signer_pubkey: &[u8],
    ) -> BondResult<BlockHeader> {
        self.0
            .lock()
            .expect("poa engine lock poisoned")
            .produce_header(parent, now, merkle_root, signer_pubkey)
    }

    fn identify_signer(&self, header: &BlockHeader) -> Option<Vec<u8>> {
        self.0
            .lock()
            .expect("poa engine lock poisoned")
            .identify_signer(header)
    }

    fn is_validator(&self, pubkey: &[u8]) -> bool {
        self.0.lock().expect("poa engine lock poisoned").is_validator(pubkey)
    }

    fn add_validator(&mut self, pubkey: Vec<u8>) {
        self.0.lock().expect("poa engine lock poisoned").add_validator(pubkey);
    }

    fn remove_validator(&mut self, pubkey: &[u8]) {
        self.0.lock().expect("poa engine lock poisoned").remove_validator(pubkey);
    }
}

/// Routes confirmed registration outputs into the sub-chain manager.
/// Constructed before the `Chain` exists, so it only holds the pieces of
/// runtime state the chain's commit path needs, never the chain itself.
pub struct SubChainRegistrationHandler {
    pub sub_chains: Arc<Mutex<SubChainManager>>,
    /// Used to subscribe the P2P swarm to the new sub-chain's topics once
    /// it spawns, per spec §4.6's "per-chain P2P topics" spawn semantics.
    pub node_handle: NodeHandle,
}

impl RegistrationHandler for SubChainRegistrationHandler {
    fn on_registration(&self, height: u64, outpoint: OutPoint, registration_data: &[u8]) {
        let mut manager = self.sub_chains.lock().expect("sub-chain manager lock poisoned");
        match manager.spawn(Hash256::zero(), height, outpoint.txid, outpoint.vout, registration_data) {
            Ok(id) => self.node_handle.subscribe_sub_chain(id),
            Err(e) => warn!(error = %e, height, "sub-chain registration rejected"),
        }
    }
}

/// Routes spent registration outputs into recursive sub-chain teardown.
pub struct SubChainDeregistrationHandler {
    pub sub_chains: Arc<Mutex<SubChainManager>>,
    pub node_handle: NodeHandle,
}

impl DeregistrationHandler for SubChainDeregistrationHandler {
    fn on_deregistration(&self, _height: u64, outpoint: OutPoint) {
        let id = SubChainRecord::derive_id(outpoint.txid, outpoint.vout);
        let mut manager = self.sub_chains.lock().expect("sub-chain manager lock poisoned");
        match manager.deregister(&id) {
            Ok(()) => self.node_handle.unsubscribe_sub_chain(id),
            Err(e) => warn!(error = %e, %id, "sub-chain deregistration failed"),
        }
    }
}

/// Forwards `Chain`'s stake/unstake commits into a shared `consensus::StakeBridge`.
/// Two thin wrappers exist because `ChainHandlers` takes `stake`/`unstake` as
/// separately-owned trait objects; both point at the same bridge instance.
pub struct StakeHandlerRef(pub Arc<consensus::StakeBridge>);

impl StakeHandler for StakeHandlerRef {
    fn on_stake(&self, height: u64, validator_pubkey: [u8; 32], amount: u64) {
        self.0.on_stake(height, validator_pubkey, amount);
    }
}

pub struct UnstakeHandlerRef(pub Arc<consensus::StakeBridge>);

impl UnstakeHandler for UnstakeHandlerRef {
    fn on_unstake(&self, height: u64, validator_pubkey: [u8; 32], amount: u64) {
        self.0.on_unstake(height, validator_pubkey, amount);
    }
}

/// Collects transactions reverted by a reorg so they can be re-admitted to
/// the mempool after `accept_block` releases the chain lock, instead of
/// from inside the handler callback (which would need to re-lock the chain
/// it is already being called from).
pub struct RevertedTxBuffer(pub Arc<Mutex<Vec<Transaction>>>);

impl RevertedTxHandler for RevertedTxBuffer {
    fn on_reverted(&self, txs: Vec<Transaction>) {
        self.0.lock().expect("reverted tx buffer lock poisoned").extend(txs);
    }
}

/// Everything `src/rpc.rs`'s method table and the P2P/mining/heartbeat
/// loops need to drive the node. Lives behind a single `Arc` so every task
/// spawned in `main.rs` shares one instance.
pub struct NodeRuntime {
    pub chain: Mutex<Chain>,
    pub mempool: Arc<Mutex<Mempool>>,
    pub bech32_hrp: &'static str,
    pub params: ProtocolParams,
    pub local_peer_id: PeerId,
    pub genesis_hash: Hash256,
    pub peers: Arc<PeerStore>,
    pub validator_set: ValidatorSet,
    pub validator_tracker: Mutex<ValidatorTracker>,
    pub sub_chains: Arc<Mutex<SubChainManager>>,
    pub poa_engine: Arc<Mutex<PoaEngine>>,
    pub reverted_tx_buffer: Arc<Mutex<Vec<Transaction>>>,
}

impl NodeRuntime {
    /// Applies a block to the root chain and runs the post-commit
    /// housekeeping (mempool pruning/re-admission) that cannot safely run
    /// from inside `ChainHandlers` callbacks.
    pub fn submit_block(&self, block: Block) -> BondResult<AcceptOutcome> {
        let outcome = {
            let mut chain = self.chain.lock().expect("chain lock poisoned");
            chain.accept_block(block, now_unix())?
        };
        self.run_post_commit(&outcome);
        Ok(outcome)
    }

    fn run_post_commit(&self, outcome: &AcceptOutcome) {
        let reverted = {
            let mut buffer = self.reverted_tx_buffer.lock().expect("reverted tx buffer lock poisoned");
            std::mem::take(&mut *buffer)
        };

        let chain = self.chain.lock().expect("chain lock poisoned");
        let mut mempool = self.mempool.lock().expect("mempool lock poisoned");
        let now = now_unix();

        if !reverted.is_empty() {
            mempool.readmit_reverted(reverted, chain.utxo_set(), now);
        }

        if matches!(outcome, AcceptOutcome::Applied | AcceptOutcome::Reorged { .. }) {
            if let Some(tip) = chain.block_at_height(chain.height()) {
                let confirmed: Vec<Hash256> = tip.transactions.iter().map(Transaction::hash).collect();
                mempool.remove_confirmed(&confirmed);
            }
            mempool.purge_invalid(chain.utxo_set());
        }
    }

    /// Attempts to produce and apply the next block if `keypair` is this
    /// slot's in-turn or (past the backup deadline) backup validator.
    /// Silently returns otherwise: missing a turn is routine, not an error.
    fn try_produce_block(&self, keypair: &KeyPair, handle: &NodeHandle) {
        let pubkey = *keypair.public_key.as_bytes();
        if !self.poa_engine.lock().expect("poa engine lock poisoned").is_validator(&pubkey) {
            return;
        }

        let (parent_header, height) = {
            let chain = self.chain.lock().expect("chain lock poisoned");
            (chain.tip_header().clone(), chain.height() + 1)
        };

        let txs = {
            let mempool = self.mempool.lock().expect("mempool lock poisoned");
            mempool.select(self.params.max_block_signing_bytes)
        };

        let fee_total: u64 = {
            let chain = self.chain.lock().expect("chain lock poisoned");
            let mempool = self.mempool.lock().expect("mempool lock poisoned");
            txs.iter()
                .filter_map(|tx| mempool.compute_fee(tx, chain.utxo_set()).ok())
                .map(|(fee, _rate)| fee)
                .sum()
        };

        let reward = {
            let chain = self.chain.lock().expect("chain lock poisoned");
            chain.block_reward(height)
        };

        let address = keypair.public_key.to_address();
        let coinbase = Transaction::coinbase(
            height,
            vec![TxOutput::new(reward.saturating_add(fee_total), Script::p2pkh(&address))],
        );
        let mut transactions = Vec::with_capacity(txs.len() + 1);
        transactions.push(coinbase);
        transactions.extend(txs);
        let merkle_root = Block::compute_merkle_root(&transactions);

        let now = now_unix();
        let mut header = match self
            .poa_engine
            .lock()
            .expect("poa engine lock poisoned")
            .produce_header(&parent_header, now, merkle_root, &pubkey)
        {
            Ok(header) => header,
            Err(_) => return,
        };

        let signature = match keypair.sign(header.hash().as_bytes()) {
            Ok(sig) => sig,
            Err(e) => {
                warn!(error = %e, "failed to sign produced block header");
                return;
            }
        };
        header.validator_sig = Some(signature.as_bytes().to_vec());

        let block = Block { header, transactions };
        match self.submit_block(block.clone()) {
            Ok(outcome) => {
                info!(height, ?outcome, "produced block");
                handle.publish_block(block);
            }
            Err(e) => warn!(error = %e, height, "failed to apply self-produced block"),
        }
    }
}

impl NodeHandlers for NodeRuntime {
    fn local_height(&self) -> u64 {
        self.chain.lock().expect("chain lock poisoned").height()
    }

    fn local_tip(&self) -> Hash256 {
        self.chain.lock().expect("chain lock poisoned").tip_hash()
    }

    fn genesis_hash(&self) -> Hash256 {
        self.genesis_hash
    }

    fn get_block(&self, height: u64) -> Option<Block> {
        self.chain
            .lock()
            .expect("chain lock poisoned")
            .block_at_height(height)
            .cloned()
    }

    fn get_block_range(&self, from_height: u64, max_blocks: u64) -> Vec<Block> {
        let chain = self.chain.lock().expect("chain lock poisoned");
        let end = from_height.saturating_add(max_blocks).min(chain.height() + 1);
        (from_height..end)
            .filter_map(|h| chain.block_at_height(h).cloned())
            .collect()
    }

    fn on_gossip_transaction(&self, tx: Transaction) -> GossipOutcome {
        if tx.validate_context_free(self.params.max_script_data_bytes).is_err() {
            return GossipOutcome::Invalid;
        }
        let chain = self.chain.lock().expect("chain lock poisoned");
        let mut mempool = self.mempool.lock().expect("mempool lock poisoned");
        if mempool.contains(&tx.hash()) {
            return GossipOutcome::Known;
        }
        match mempool.add(tx, chain.utxo_set(), now_unix()) {
            Ok(_) => GossipOutcome::Accepted,
            Err(_) => GossipOutcome::Invalid,
        }
    }

    fn on_gossip_block(&self, block: Block) -> GossipOutcome {
        match self.submit_block(block) {
            Ok(AcceptOutcome::Known) => GossipOutcome::Known,
            Ok(_) => GossipOutcome::Accepted,
            Err(BondError::PrevNotFound) => GossipOutcome::OrphanParent,
            Err(_) => GossipOutcome::Invalid,
        }
    }

    fn on_gossip_heartbeat(&self, heartbeat: Heartbeat) -> GossipOutcome {
        let mut tracker = self.validator_tracker.lock().expect("tracker lock poisoned");
        match tracker.record_heartbeat(&heartbeat) {
            Ok(()) => GossipOutcome::Accepted,
            Err(_) => GossipOutcome::Invalid,
        }
    }

    fn on_sub_chain_gossip_block(&self, chain_id: Hash256, block: Block) -> GossipOutcome {
        let manager = self.sub_chains.lock().expect("sub-chain manager lock poisoned");
        match manager.process_block(&chain_id, block, now_unix()) {
            Ok(AcceptOutcome::Known) => GossipOutcome::Known,
            Ok(_) => GossipOutcome::Accepted,
            Err(SubChainError::Chain(BondError::PrevNotFound)) => GossipOutcome::OrphanParent,
            Err(SubChainError::NotFound(_)) => GossipOutcome::Invalid,
            Err(_) => GossipOutcome::Invalid,
        }
    }
}

/// Ticks once per block interval, producing a block whenever `keypair`
/// holds the slot. Exits when `shutdown` is set.
pub async fn mining_loop(
    runtime: Arc<NodeRuntime>,
    keypair: KeyPair,
    handle: NodeHandle,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(runtime.params.block_time_seconds.max(1)));
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                runtime.try_produce_block(&keypair, &handle);
            }
        }
    }
}

/// Periodically signs and gossips a liveness heartbeat for `keypair`, at
/// twice the freshness window's frequency so a single dropped gossip
/// message doesn't flip the validator offline.
pub async fn heartbeat_loop(
    runtime: Arc<NodeRuntime>,
    keypair: KeyPair,
    handle: NodeHandle,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = (runtime.params.heartbeat_freshness_seconds / 2).max(1) as u64;
    let mut ticker = tokio::time::interval(Duration::from_secs(period));
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let now = now_unix();
                let height = runtime.chain.lock().expect("chain lock poisoned").height();
                match Heartbeat::sign(&keypair, height, now) {
                    Ok(heartbeat) => {
                        runtime
                            .validator_tracker
                            .lock()
                            .expect("tracker lock poisoned")
                            .record_seen(*keypair.public_key.as_bytes(), now);
                        handle.publish_heartbeat(heartbeat);
                    }
                    Err(e) => warn!(error = %e, "failed to sign heartbeat"),
                }
            }
        }
    }
}
