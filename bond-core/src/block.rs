//! Block and header types.

use crate::error::{BondError, BondResult};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use shared::Hash256;

pub const MAX_BLOCK_TXS: usize = 500;
pub const MAX_BLOCK_SIGNING_BYTES: usize = 2 * 1024 * 1024;
/// 2-second clock-skew allowance, per spec §4.2 contextual check 3.
pub const MAX_FUTURE_DRIFT_SECONDS: i64 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: i64,
    pub height: u64,
    /// PoA: Schnorr signature over `signing_bytes(header)`.
    pub validator_sig: Option<Vec<u8>>,
    /// PoW: target difficulty (leading zero bits required).
    pub difficulty: Option<u32>,
    /// PoW: nonce found by mining.
    pub nonce: Option<u64>,
}

impl BlockHeader {
    #[must_use]
    pub fn new(prev_hash: Hash256, merkle_root: Hash256, timestamp: i64, height: u64) -> Self {
        Self {
            version: 1,
            prev_hash,
            merkle_root,
            timestamp,
            height,
            validator_sig: None,
            difficulty: None,
            nonce: None,
        }
    }

    /// Canonical signing bytes: excludes `validator_sig`. Nonce/difficulty
    /// (when present, i.e. PoW headers) are part of the signed commitment.
    #[must_use]
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(self.prev_hash.as_bytes());
        buf.extend_from_slice(self.merkle_root.as_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        if let Some(difficulty) = self.difficulty {
            buf.extend_from_slice(&difficulty.to_le_bytes());
        }
        if let Some(nonce) = self.nonce {
            buf.extend_from_slice(&nonce.to_le_bytes());
        }
        buf
    }

    #[must_use]
    pub fn hash(&self) -> Hash256 {
        Hash256::blake3(&self.signing_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    #[must_use]
    pub fn new(prev_hash: Hash256, timestamp: i64, height: u64, transactions: Vec<Transaction>) -> Self {
        let merkle_root = Self::compute_merkle_root(&transactions);
        Self {
            header: BlockHeader::new(prev_hash, merkle_root, timestamp, height),
            transactions,
        }
    }

    #[must_use]
    pub fn compute_merkle_root(transactions: &[Transaction]) -> Hash256 {
        let leaves: Vec<Hash256> = transactions.iter().map(Transaction::hash).collect();
        Hash256::merkle_root(&leaves)
    }

    #[must_use]
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    #[must_use]
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }

    /// Context-free block checks, per spec §4.2.
    ///
    /// # Errors
    ///
    /// Returns the first failed check.
    pub fn validate_context_free(&self, max_script_data: usize) -> BondResult<()> {
        let coinbase = self
            .transactions
            .first()
            .ok_or_else(|| BondError::InvalidBlock("empty block".into()))?;
        if !coinbase.is_coinbase() {
            return Err(BondError::InvalidBlock("transactions[0] is not coinbase".into()));
        }
        for tx in self.transactions.iter().skip(1) {
            if tx.is_coinbase() {
                return Err(BondError::InvalidBlock("second coinbase found".into()));
            }
        }
        if self.transactions.len() > MAX_BLOCK_TXS {
            return Err(BondError::InvalidBlock("too many transactions".into()));
        }
        let signing_size: usize = self
            .transactions
            .iter()
            .map(|tx| tx.signing_bytes().len())
            .sum();
        if signing_size > MAX_BLOCK_SIGNING_BYTES {
            return Err(BondError::InvalidBlock("block exceeds signing size limit".into()));
        }
        if Self::compute_merkle_root(&self.transactions) != self.header.merkle_root {
            return Err(BondError::InvalidBlock("merkle root mismatch".into()));
        }
        for tx in &self.transactions {
            tx.validate_context_free(max_script_data)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Script;
    use crate::transaction::TxOutput;

    fn coinbase_tx() -> Transaction {
        let keypair = shared::KeyPair::generate();
        let addr = keypair.public_key.to_address();
        Transaction::coinbase(1, vec![TxOutput::new(5_000_000_000_000, Script::p2pkh(&addr))])
    }

    #[test]
    fn merkle_root_matches_on_construction() {
        let block = Block::new(Hash256::zero(), 1000, 1, vec![coinbase_tx()]);
        assert!(block.validate_context_free(65536).is_ok());
    }

    #[test]
    fn rejects_block_without_coinbase_first() {
        let keypair = shared::KeyPair::generate();
        let addr = keypair.public_key.to_address();
        let non_coinbase = Transaction::new(
            1,
            vec![crate::transaction::TxInput::new(crate::utxo::OutPoint::new(
                Hash256::blake3(b"x"),
                0,
            ))],
            vec![TxOutput::new(1000, Script::p2pkh(&addr))],
            0,
        );
        let merkle_root = Block::compute_merkle_root(&[non_coinbase.clone()]);
        let mut header = BlockHeader::new(Hash256::zero(), merkle_root, 1000, 1);
        header.height = 1;
        let block = Block {
            header,
            transactions: vec![non_coinbase],
        };
        assert!(block.validate_context_free(65536).is_err());
    }

    #[test]
    fn rejects_too_many_transactions() {
        let mut txs = vec![coinbase_tx()];
        let keypair = shared::KeyPair::generate();
        let addr = keypair.public_key.to_address();
        for i in 0..MAX_BLOCK_TXS {
            txs.push(Transaction::new(
                1,
                vec![crate::transaction::TxInput::new(crate::utxo::OutPoint::new(
                    Hash256::blake3(format!("tx{i}").as_bytes()),
                    0,
                ))],
                vec![TxOutput::new(100, Script::p2pkh(&addr))],
                0,
            ));
        }
        let block = Block::new(Hash256::zero(), 1000, 1, txs);
        assert!(block.validate_context_free(65536).is_err());
    }

    #[test]
    fn header_hash_excludes_validator_sig() {
        let mut header = BlockHeader::new(Hash256::zero(), Hash256::zero(), 1, 1);
        let before = header.hash();
        header.validator_sig = Some(vec![1, 2, 3]);
        assert_eq!(before, header.hash());
    }
}
