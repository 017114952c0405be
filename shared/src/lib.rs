pub mod address;
pub mod crypto;
pub mod error;
pub mod hash;
pub mod types;

pub use address::Address;
pub use crypto::{
    public_key_from_bytes, sign_hash, verify_hash_signature, KeyPair, PrivateKey, PublicKey,
    Signature, SignatureAlgorithm,
};
pub use error::BlockchainError;
pub use hash::Hash256;
pub use types::{NetworkType, ProtocolParams};

pub type Result<T> = std::result::Result<T, BlockchainError>;
