//! Proof-of-Work consensus engine variant (used by sub-chains registered
//! with `consensus_type = "pow"`), plus the multi-threaded block miner.

use crate::block::{Block, BlockHeader};
use crate::consensus::ConsensusEngine;
use crate::error::{BondError, BondResult};
use crate::transaction::Transaction;
use shared::Hash256;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Clone)]
pub struct MinerConfig {
    pub threads: usize,
    pub difficulty: u32,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            threads: std::thread::available_parallelism()
                .map(std::num::NonZero::get)
                .unwrap_or(1),
            difficulty: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MiningResult {
    pub block: Block,
    pub hash: Hash256,
    pub nonce: u64,
    pub attempts: u64,
}

/// Multi-threaded nonce search over a fixed header template.
pub struct Miner {
    config: MinerConfig,
    is_mining: Arc<AtomicBool>,
}

impl Miner {
    #[must_use]
    pub fn new(config: MinerConfig) -> Self {
        Self {
            config,
            is_mining: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mines a block extending `previous_hash`, with `difficulty` leading
    /// zero bits required of the header hash.
    ///
    /// # Errors
    ///
    /// Returns an error if no thread finds a solution (should not happen in
    /// practice since nonce space is exhausted only at `u64::MAX`).
    pub fn mine_block(
        &self,
        previous_hash: Hash256,
        height: u64,
        timestamp: i64,
        transactions: Vec<Transaction>,
        difficulty: u32,
    ) -> BondResult<MiningResult> {
        let merkle_root = Block::compute_merkle_root(&transactions);
        let mut header = BlockHeader::new(previous_hash, merkle_root, timestamp, height);
        header.difficulty = Some(difficulty);
        header.nonce = Some(0);
        self.mine_header_parallel(&header, transactions)
    }

    fn mine_header_parallel(&self, header: &BlockHeader, transactions: Vec<Transaction>) -> BondResult<MiningResult> {
        self.is_mining.store(true, Ordering::SeqCst);
        let result: Arc<Mutex<Option<MiningResult>>> = Arc::new(Mutex::new(None));
        let mut handles = Vec::new();

        let threads = self.config.threads.max(1);
        let nonce_per_thread = u64::MAX / threads as u64;

        for thread_id in 0..threads {
            let header_clone = header.clone();
            let txs_clone = transactions.clone();
            let is_mining = Arc::clone(&self.is_mining);
            let result_clone = Arc::clone(&result);
            let start_nonce = thread_id as u64 * nonce_per_thread;
            let end_nonce = if thread_id == threads - 1 {
                u64::MAX
            } else {
                (thread_id as u64 + 1) * nonce_per_thread
            };

            handles.push(thread::spawn(move || {
                Self::mine_header_range(header_clone, txs_clone, start_nonce, end_nonce, &is_mining, &result_clone);
            }));
        }

        for handle in handles {
            let _ = handle.join();
        }

        result
            .lock()
            .expect("mining result mutex poisoned")
            .take()
            .ok_or(BondError::Validation("no nonce found in range".into()))
    }

    fn mine_header_range(
        mut header: BlockHeader,
        transactions: Vec<Transaction>,
        start_nonce: u64,
        end_nonce: u64,
        is_mining: &Arc<AtomicBool>,
        result: &Arc<Mutex<Option<MiningResult>>>,
    ) {
        let difficulty = header.difficulty.unwrap_or(0);
        let mut attempts = 0u64;
        for nonce in start_nonce..end_nonce {
            if !is_mining.load(Ordering::SeqCst) {
                return;
            }
            header.nonce = Some(nonce);
            attempts += 1;
            let hash = header.hash();
            if hash.meets_difficulty(difficulty) {
                is_mining.store(false, Ordering::SeqCst);
                let mut guard = result.lock().expect("mining result mutex poisoned");
                if guard.is_none() {
                    *guard = Some(MiningResult {
                        block: Block {
                            header: header.clone(),
                            transactions: transactions.clone(),
                        },
                        hash,
                        nonce,
                        attempts,
                    });
                }
                return;
            }
            if result.lock().expect("mining result mutex poisoned").is_some() {
                return;
            }
        }
    }

    pub fn stop_mining(&self) {
        self.is_mining.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_mining(&self) -> bool {
        self.is_mining.load(Ordering::SeqCst)
    }
}

/// Clamped difficulty retarget over a fixed block window, adjustment capped
/// at 4x in either direction per block window (same clamp as the teacher's
/// `DifficultyAdjuster`, generalized to the spec's `block_time_seconds`).
pub struct DifficultyAdjuster {
    pub target_block_time: u64,
    pub adjustment_period: u64,
}

impl DifficultyAdjuster {
    #[must_use]
    pub const fn new(target_block_time: u64, adjustment_period: u64) -> Self {
        Self {
            target_block_time,
            adjustment_period,
        }
    }

    #[must_use]
    pub fn calculate_new_difficulty(&self, current_difficulty: u32, headers: &[BlockHeader]) -> u32 {
        let period = self.adjustment_period as usize;
        if headers.len() < period || period < 2 {
            return current_difficulty;
        }
        let window = &headers[headers.len() - period..];
        let first = window.first().expect("non-empty window").timestamp;
        let last = window.last().expect("non-empty window").timestamp;
        let actual_time = (last - first).max(1) as u64;
        let expected_time = self.target_block_time * (self.adjustment_period - 1);

        let factor = (actual_time as f64 / expected_time as f64).clamp(0.25, 4.0);
        let new_difficulty = if factor > 1.0 {
            current_difficulty.saturating_sub((factor - 1.0) as u32).max(1)
        } else {
            current_difficulty.saturating_add(((1.0 / factor) - 1.0) as u32)
        };
        new_difficulty.min(63)
    }
}

/// PoW [`ConsensusEngine`]: header validity is purely proof-of-work against
/// the header's declared difficulty; there is no validator set.
pub struct PowEngine {
    pub difficulty: u32,
    pub adjuster: DifficultyAdjuster,
}

impl PowEngine {
    #[must_use]
    pub fn new(difficulty: u32, target_block_time: u64, adjustment_period: u64) -> Self {
        Self {
            difficulty,
            adjuster: DifficultyAdjuster::new(target_block_time, adjustment_period),
        }
    }
}

impl ConsensusEngine for PowEngine {
    fn validate_header(&self, parent: &BlockHeader, header: &BlockHeader) -> BondResult<()> {
        let difficulty = header
            .difficulty
            .ok_or_else(|| BondError::Validation("PoW header missing difficulty".into()))?;
        if header.nonce.is_none() {
            return Err(BondError::Validation("PoW header missing nonce".into()));
        }
        if header.height != parent.height + 1 {
            return Err(BondError::Validation("non-sequential height".into()));
        }
        if !header.hash().meets_difficulty(difficulty) {
            return Err(BondError::Validation("hash does not meet declared difficulty".into()));
        }
        Ok(())
    }

    fn produce_header(
        &self,
        parent: &BlockHeader,
        now: i64,
        merkle_root: Hash256,
        _signer_pubkey: &[u8],
    ) -> BondResult<BlockHeader> {
        let mut header = BlockHeader::new(parent.hash(), merkle_root, now, parent.height + 1);
        header.difficulty = Some(self.difficulty);
        header.nonce = Some(0);
        Ok(header)
    }

    fn identify_signer(&self, _header: &BlockHeader) -> Option<Vec<u8>> {
        None
    }

    fn is_validator(&self, _pubkey: &[u8]) -> bool {
        // PoW has no validator set; anyone who finds a valid nonce may produce.
        true
    }

    fn add_validator(&mut self, _pubkey: Vec<u8>) {}

    fn remove_validator(&mut self, _pubkey: &[u8]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mines_low_difficulty_block() {
        let miner = Miner::new(MinerConfig {
            threads: 1,
            difficulty: 1,
        });
        let result = miner.mine_block(Hash256::zero(), 1, 1000, vec![], 1).unwrap();
        assert!(result.hash.meets_difficulty(1));
        assert_eq!(result.block.header.height, 1);
    }

    #[test]
    fn pow_engine_validates_own_mined_header() {
        let engine = PowEngine::new(1, 3, 10);
        let genesis = BlockHeader::new(Hash256::zero(), Hash256::zero(), 0, 0);
        let miner = Miner::new(MinerConfig {
            threads: 1,
            difficulty: 1,
        });
        let result = miner.mine_block(genesis.hash(), 1, 1000, vec![], 1).unwrap();
        assert!(engine.validate_header(&genesis, &result.block.header).is_ok());
    }

    #[test]
    fn pow_engine_rejects_wrong_height() {
        let engine = PowEngine::new(1, 3, 10);
        let genesis = BlockHeader::new(Hash256::zero(), Hash256::zero(), 0, 0);
        let mut bad_header = BlockHeader::new(genesis.hash(), Hash256::zero(), 1000, 5);
        bad_header.difficulty = Some(1);
        bad_header.nonce = Some(0);
        assert!(engine.validate_header(&genesis, &bad_header).is_err());
    }

    #[test]
    fn difficulty_increases_when_blocks_too_fast() {
        let adjuster = DifficultyAdjuster::new(600, 10);
        let mut headers = Vec::new();
        let mut timestamp = 0i64;
        for i in 0..10 {
            headers.push(BlockHeader::new(Hash256::zero(), Hash256::zero(), timestamp, i));
            timestamp += 300;
        }
        let new_difficulty = adjuster.calculate_new_difficulty(20, &headers);
        assert!(new_difficulty > 20);
    }
}
