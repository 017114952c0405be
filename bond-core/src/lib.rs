pub mod block;
pub mod chain;
pub mod consensus;
pub mod error;
pub mod mempool;
pub mod mining;
pub mod script;
pub mod transaction;
pub mod utxo;

// Re-exports principais
pub use block::{Block, BlockHeader};
pub use chain::{AcceptOutcome, Chain, ChainHandlers};
pub use consensus::ConsensusEngine;
pub use error::{BondError, BondResult};
pub use mempool::{Mempool, MempoolEntry, MempoolStats};
pub use mining::{DifficultyAdjuster, Miner, MinerConfig, MiningResult, PowEngine};
pub use script::{Script, ScriptBuilder, ScriptType};
pub use transaction::{TokenAmount, Transaction, TxInput, TxOutput};
pub use utxo::{Balance, OutPoint, Utxo, UtxoBatch, UtxoSet};

// Re-exports de tipos compartilhados
pub use shared::{BlockchainError, Hash256, ProtocolParams, Result};
