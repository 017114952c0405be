//! Sub-chain manager: spawns, restores, and tears down isolated child
//! `{storage, chain, mempool}` bundles on root-chain registration/
//! deregistration, per spec §4.6 and §9's "sub-chain lifecycle as tagged
//! variants" design note. Wiring style (assembling a bundle out of
//! already-constructed component types) follows the teacher's
//! `BlockchainNode::new` constructor shape.

use crate::registry::{AdmissionError, ConsensusType, RegistrationData, Registry, SubChainRecord};
use bond_core::block::Block;
use bond_core::chain::{AcceptOutcome, Chain, ChainHandlers};
use bond_core::consensus::ConsensusEngine;
use bond_core::error::BondResult;
use bond_core::mempool::Mempool;
use bond_core::mining::PowEngine;
use bond_core::script::Script;
use bond_core::transaction::{Transaction, TxOutput};
use consensus::poa::PoaEngine;
use shared::{Hash256, ProtocolParams};
use std::sync::{Arc, Mutex};
use storage::Database;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubChainError {
    #[error("admission rejected: {0}")]
    Admission(#[from] AdmissionError),
    #[error("malformed registration data: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("chain error: {0}")]
    Chain(#[from] bond_core::error::BondError),
    #[error("unknown sub-chain {0}")]
    NotFound(Hash256),
    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),
}

/// A fully assembled, independently-running sub-chain. Holds its own
/// storage namespace, chain state machine (with its own consensus engine
/// and UTXO set inside), and mempool — disjoint from the parent and from
/// every sibling, per spec §4.6's isolation invariants. P2P topic/handler
/// handles are owned by the node runtime, not here (this crate has no P2P
/// dependency), keyed by `id`.
pub struct SubChainHandle {
    pub record: SubChainRecord,
    pub storage: Database,
    pub chain: Mutex<Chain>,
    pub mempool: Mutex<Mempool>,
}

/// Owns every known sub-chain plus the registry of who's registered
/// where. One instance lives on the root node; sub-chains with
/// `MaxDepth > 1` nest further managers is out of scope here — depth is
/// tracked as metadata, not as a recursive manager structure, per the
/// registry's parent-indexed design.
pub struct SubChainManager {
    parent_storage: Database,
    registry: Registry,
    children: std::collections::HashMap<Hash256, Arc<SubChainHandle>>,
    base_params: ProtocolParams,
}

impl SubChainManager {
    #[must_use]
    pub fn new(parent_storage: Database, base_params: ProtocolParams) -> Self {
        Self {
            registry: Registry::new(base_params.sub_chain_max_depth, base_params.sub_chain_max_per_parent),
            parent_storage,
            children: std::collections::HashMap::new(),
            base_params,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn get(&self, id: &Hash256) -> Option<Arc<SubChainHandle>> {
        self.children.get(id).cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<Hash256> {
        self.children.keys().copied().collect()
    }

    /// Checks admission (depth/per-parent) without spawning anything; the
    /// root chain's contextual validator calls this synchronously through
    /// `ChainHandlers::registration_admission` before a registration tx is
    /// allowed to commit.
    #[must_use]
    pub fn check_admission(&self, parent_id: Hash256, registration_data: &[u8]) -> bool {
        if RegistrationData::decode(registration_data).is_err() {
            return false;
        }
        self.registry.check_admission(parent_id).is_ok()
    }

    /// Spawns a sub-chain after its registration transaction has
    /// committed on the canonical branch, per spec §4.6. `parent_id` is
    /// the chain that hosted the registration (the root, or a sub-chain
    /// if nested registration is enabled).
    ///
    /// # Errors
    ///
    /// Returns an error if admission fails, the registration data is
    /// malformed, or genesis block construction fails.
    pub fn spawn(
        &mut self,
        parent_id: Hash256,
        height: u64,
        registration_tx: Hash256,
        output_index: u32,
        registration_data: &[u8],
    ) -> Result<Hash256, SubChainError> {
        self.registry.check_admission(parent_id)?;
        let data = RegistrationData::decode(registration_data)?;

        let id = SubChainRecord::derive_id(registration_tx, output_index);
        let depth = self.registry.depth_of(&parent_id) + 1;

        let mut params = self.base_params.clone();
        params.min_fee_rate = data.min_fee_rate;

        let engine: Box<dyn ConsensusEngine> = match data.consensus_type {
            ConsensusType::Poa => Box::new(PoaEngine::new(data.genesis_validators.clone(), params.block_time_seconds)),
            ConsensusType::Pow => Box::new(PowEngine::new(
                data.pow_difficulty.unwrap_or(16),
                params.block_time_seconds,
                2016,
            )),
        };

        let genesis = Self::synthesize_genesis(&data, &params, registration_tx, output_index)?;
        let chain = Chain::new(genesis, params.clone(), engine, ChainHandlers::default())?;

        let prefix = format!("sc/{id}/");
        let storage = self.parent_storage.clone();
        let _ = storage.scan_prefix(prefix.as_bytes())?; // namespace is lazily populated; confirms DB is reachable

        let record = SubChainRecord {
            id,
            parent_id,
            name: data.name.clone(),
            symbol: data.symbol.clone(),
            created_at_height: height,
            registration_tx,
            output_index,
            registration_data: data,
            depth,
        };
        self.registry.insert(record.clone());

        let handle = Arc::new(SubChainHandle {
            record,
            storage,
            chain: Mutex::new(chain),
            mempool: Mutex::new(Mempool::new(self.base_params.mempool_capacity, self.base_params.min_fee_rate)),
        });
        self.children.insert(id, handle);
        Ok(id)
    }

    /// Synthesizes the sub-chain's genesis block from its registration,
    /// per spec §4.6: zero-height, a single coinbase paying the optional
    /// premine (default zero allocation beyond the chain's own first
    /// block reward), referencing the registration outpoint as its only
    /// cross-chain artifact.
    fn synthesize_genesis(
        data: &RegistrationData,
        params: &ProtocolParams,
        registration_tx: Hash256,
        output_index: u32,
    ) -> BondResult<Block> {
        let reward = params.base_block_reward + data.premine;
        let output = if let Some(addr_bytes) = data.premine_address {
            let address = shared::Address::parse(&hex::encode(addr_bytes), "kgx")
                .unwrap_or_else(|_| shared::Address::from_pubkey_bytes(&[2u8; 33]).expect("valid constant pubkey"));
            TxOutput::new(reward, Script::p2pkh(&address))
        } else {
            let burn_address = shared::Address::from_pubkey_bytes(&[2u8; 33]).expect("valid constant pubkey");
            TxOutput::new(reward, Script::p2pkh(&burn_address))
        };
        let coinbase = Transaction::coinbase(0, vec![output]);
        let genesis_parent = SubChainRecord::derive_id(registration_tx, output_index);
        Ok(Block::new(genesis_parent, 0, 0, vec![coinbase]))
    }

    /// Submits a block to a running sub-chain's chain state machine.
    ///
    /// # Errors
    ///
    /// Returns an error if the sub-chain is unknown or the block is
    /// rejected.
    pub fn process_block(&self, id: &Hash256, block: Block, now: i64) -> Result<AcceptOutcome, SubChainError> {
        let handle = self.get(id).ok_or(SubChainError::NotFound(*id))?;
        let mut chain = handle.chain.lock().expect("sub-chain lock poisoned");
        Ok(chain.accept_block(block, now)?)
    }

    /// Tears a sub-chain down: per spec §4.6, its storage namespace is
    /// deleted and it stops being tracked. Per spec §9's Open Question,
    /// any nested children (`depth > 1`) are torn down first,
    /// child-first/depth-first.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage namespace cannot be cleared.
    pub fn deregister(&mut self, id: &Hash256) -> Result<(), SubChainError> {
        let children: Vec<Hash256> = self.registry.children_of(id).to_vec();
        for child in children {
            self.deregister(&child)?;
        }
        if let Some(record) = self.registry.remove(id) {
            let prefix = format!("sc/{}/", record.id);
            self.parent_storage.remove_prefix(prefix.as_bytes())?;
        }
        self.children.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConsensusType;

    fn sample_registration() -> Vec<u8> {
        RegistrationData {
            name: "testchild".into(),
            symbol: "TCH".into(),
            consensus_type: ConsensusType::Poa,
            genesis_validators: vec![[9u8; 32]],
            pow_difficulty: None,
            min_fee_rate: 1,
            premine: 0,
            premine_address: None,
        }
        .encode()
    }

    #[test]
    fn spawn_creates_a_running_sub_chain() {
        let storage = Database::open_temporary().unwrap();
        let mut manager = SubChainManager::new(storage, ProtocolParams::default());
        let data = sample_registration();
        let tx_hash = Hash256::blake3(b"regtx");
        let id = manager.spawn(Hash256::zero(), 10, tx_hash, 0, &data).unwrap();
        assert!(manager.get(&id).is_some());
        assert_eq!(manager.registry().children_of(&Hash256::zero()).len(), 1);
    }

    #[test]
    fn deregister_removes_record_and_namespace() {
        let storage = Database::open_temporary().unwrap();
        let mut manager = SubChainManager::new(storage, ProtocolParams::default());
        let data = sample_registration();
        let tx_hash = Hash256::blake3(b"regtx2");
        let id = manager.spawn(Hash256::zero(), 10, tx_hash, 0, &data).unwrap();
        manager.deregister(&id).unwrap();
        assert!(manager.get(&id).is_none());
        assert!(manager.registry().children_of(&Hash256::zero()).is_empty());
    }

    #[test]
    fn spawn_rejects_beyond_max_per_parent() {
        let storage = Database::open_temporary().unwrap();
        let mut params = ProtocolParams::default();
        params.sub_chain_max_per_parent = 1;
        let mut manager = SubChainManager::new(storage, params);
        let data = sample_registration();
        manager.spawn(Hash256::zero(), 1, Hash256::blake3(b"a"), 0, &data).unwrap();
        let err = manager.spawn(Hash256::zero(), 2, Hash256::blake3(b"b"), 0, &data);
        assert!(err.is_err());
    }
}
