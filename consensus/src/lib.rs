//! Proof-of-Authority consensus for the klingnet node: time-slot election
//! over a validator set that mixes a fixed genesis list with dynamic
//! stake-based membership, plus the off-chain heartbeat liveness tracker
//! that backs backup-producer elections, per spec §4.5.
//!
//! `PoaEngine` is the `bond_core::consensus::ConsensusEngine` implementor
//! the chain holds by value; `ValidatorSet`/`StakeBridge` keep it in sync
//! with on-chain stake transactions via the chain's handler injection
//! points (spec §4.4); `ValidatorTracker` backs `IsOnline` for the mining
//! loop's backup-delay decision (spec §4.8).

pub mod poa;
pub mod tracker;
pub mod validators;

pub use poa::PoaEngine;
pub use tracker::{Heartbeat, ValidatorTracker};
pub use validators::{StakeBridge, ValidatorSet};
