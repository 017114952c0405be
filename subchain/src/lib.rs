//! Sub-chain registry and manager, per spec §4.6: spawns, restores, and
//! tears down isolated child ledgers on root-chain registration
//! transactions, each with its own `Storage`/`UtxoSet`/`ConsensusEngine`/
//! `Mempool`, disjoint from the parent and from its siblings.

pub mod manager;
pub mod registry;

pub use manager::{SubChainError, SubChainHandle, SubChainManager};
pub use registry::{AdmissionError, ConsensusType, RegistrationData, Registry, SubChainRecord};
