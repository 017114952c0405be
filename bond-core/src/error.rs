use shared::BlockchainError;
use thiserror::Error;

/// Domain errors for the ledger/chain crate. Each variant maps onto the
/// taxonomy in `shared::BlockchainError` at the point where a result
/// crosses into a component that needs to decide peer-ban semantics.
#[derive(Error, Debug)]
pub enum BondError {
    #[error("script error: {0}")]
    Script(String),
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("invalid block: {0}")]
    InvalidBlock(String),
    #[error("crypto error: {0}")]
    Crypto(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("block already known")]
    BlockKnown,
    #[error("parent block not found")]
    PrevNotFound,
    #[error("fork detected, not applied")]
    ForkDetected,
    #[error("coinbase not mature")]
    CoinbaseNotMature,
    #[error(transparent)]
    Chain(#[from] BlockchainError),
}

impl BondError {
    #[must_use]
    pub const fn is_expected_control_flow(&self) -> bool {
        matches!(self, Self::BlockKnown | Self::PrevNotFound | Self::ForkDetected)
    }
}

pub type BondResult<T> = std::result::Result<T, BondError>;

impl From<BondError> for BlockchainError {
    fn from(err: BondError) -> Self {
        match err {
            BondError::InvalidTransaction(msg) => Self::InvalidTransaction(msg),
            BondError::InvalidBlock(msg) => Self::InvalidBlock(msg),
            BondError::Crypto(msg) => Self::CryptographicError(msg),
            BondError::Script(msg) | BondError::Validation(msg) => Self::Consensus(msg),
            BondError::BlockKnown => Self::BlockKnown,
            BondError::PrevNotFound => Self::PrevNotFound,
            BondError::ForkDetected => Self::ForkDetected,
            BondError::CoinbaseNotMature => Self::Consensus("coinbase not mature".to_string()),
            BondError::TransactionNotFound(msg) => Self::InvalidTransaction(msg),
            BondError::Chain(e) => e,
        }
    }
}
