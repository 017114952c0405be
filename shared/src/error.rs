use thiserror::Error;

/// Erros relacionados à blockchain, organizados pela taxonomia de tratamento
/// de erros: context-free/contextual violations, chain-state control flow,
/// resource failures and transient network conditions each get their own
/// reporting and ban-score semantics at the call site.
#[derive(Error, Debug)]
pub enum BlockchainError {
    #[error("Transação inválida: {0}")]
    InvalidTransaction(String),

    #[error("Bloco inválido: {0}")]
    InvalidBlock(String),

    #[error("Hash inválido")]
    InvalidHash,

    #[error("Endereço inválido: {0}")]
    InvalidAddress(String),

    #[error("Dificuldade insuficiente")]
    InsufficientDifficulty,

    #[error("Nonce não encontrado")]
    NonceNotFound,

    #[error("UTXO não encontrado")]
    UtxoNotFound,

    #[error("Fundos insuficientes")]
    InsufficientFunds,

    #[error("Assinatura inválida")]
    InvalidSignature,

    #[error("Tamanho de chave inválido: esperado {expected}, recebido {actual}")]
    InvalidKeySize { expected: usize, actual: usize },

    #[error("Erro criptográfico: {0}")]
    CryptographicError(String),

    #[error("Erro de serialização: {0}")]
    SerializationError(String),

    #[error("Erro de I/O: {0}")]
    IoError(String),

    #[error("Erro de rede: {0}")]
    NetworkError(String),

    /// Contextual consensus-rule violation (bad header, bad fee, immature
    /// coinbase, stake insufficient). Penalizes the originating peer.
    #[error("Erro de consenso: {0}")]
    Consensus(String),

    /// Block/tx already known; idempotent no-op, never penalizes a peer.
    #[error("bloco já conhecido")]
    BlockKnown,

    /// Parent of an incoming block is not present locally; triggers sync,
    /// never penalizes a peer.
    #[error("bloco pai não encontrado")]
    PrevNotFound,

    /// Incoming block forms a side branch that does not (yet) overtake the
    /// canonical tip; stored, not applied, never penalizes a peer.
    #[error("fork detectado")]
    ForkDetected,

    /// Storage or other resource failure. Never swallowed.
    #[error("erro de recurso: {0}")]
    Resource(String),

    /// Network timeout / peer unavailable; retried by the enclosing loop.
    #[error("erro transitório: {0}")]
    Transient(String),
}

impl BlockchainError {
    /// True for the chain-state control-flow variants that spec §7 says must
    /// never raise a peer's ban score.
    #[must_use]
    pub const fn is_expected_control_flow(&self) -> bool {
        matches!(self, Self::BlockKnown | Self::PrevNotFound | Self::ForkDetected)
    }
}
