//! Sub-chain record bookkeeping: the parent-indexed registry that the
//! manager consults both to admit new registrations (depth/per-parent
//! caps, spec §4.6) and to enumerate/restore existing children on
//! startup. Grounded on the indexed-lookup-by-owner style already used by
//! `bond_core::utxo::UtxoSet`'s address/staker indexes, applied here to
//! parent chain ID instead.

use serde::{Deserialize, Serialize};
use shared::Hash256;
use std::collections::HashMap;

/// Registration payload carried in a `Registration` script's data, per
/// spec §4.6. Decoded from the JSON the spec's wire format uses
/// everywhere else (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationData {
    pub name: String,
    pub symbol: String,
    pub consensus_type: ConsensusType,
    /// Genesis validator pubkeys, for `consensus_type = "poa"`.
    #[serde(default)]
    pub genesis_validators: Vec<[u8; 32]>,
    /// PoW target difficulty, for `consensus_type = "pow"`.
    #[serde(default)]
    pub pow_difficulty: Option<u32>,
    pub min_fee_rate: u64,
    /// Optional genesis premine, in base units; default zero per spec
    /// §4.6 ("coin allocation = zero by default").
    #[serde(default)]
    pub premine: u64,
    /// Premine recipient address bytes, required iff `premine > 0`.
    #[serde(default)]
    pub premine_address: Option<[u8; 20]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusType {
    Poa,
    Pow,
}

impl RegistrationData {
    /// # Errors
    ///
    /// Returns an error if `data` is not valid registration JSON.
    pub fn decode(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("registration data is always serializable")
    }
}

/// `{id, parent_id, name, symbol, created_at_height, registration_tx,
/// output_index, registration_data}`, per spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubChainRecord {
    pub id: Hash256,
    pub parent_id: Hash256,
    pub name: String,
    pub symbol: String,
    pub created_at_height: u64,
    pub registration_tx: Hash256,
    pub output_index: u32,
    pub registration_data: RegistrationData,
    pub depth: u32,
}

impl SubChainRecord {
    /// Sub-chain ID = `BLAKE3(registration_tx_hash ∥ output_index_le4)`,
    /// per spec §3.
    #[must_use]
    pub fn derive_id(registration_tx: Hash256, output_index: u32) -> Hash256 {
        let mut buf = Vec::with_capacity(36);
        buf.extend_from_slice(registration_tx.as_bytes());
        buf.extend_from_slice(&output_index.to_le_bytes());
        Hash256::blake3(&buf)
    }
}

/// Errors an admission check can surface; the caller (the chain's
/// `registration_admission` hook) only needs a boolean, but the manager's
/// own callers want to know why.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("sub-chain depth {depth} exceeds MaxDepth {max_depth}")]
    TooDeep { depth: u32, max_depth: u32 },
    #[error("parent {parent:?} already has {count} sub-chains, at MaxPerParent {max}")]
    TooManyChildren { parent: Hash256, count: usize, max: usize },
    #[error("malformed registration data: {0}")]
    Malformed(String),
}

/// Parent-indexed registry of every sub-chain the node knows about
/// (whether currently running or torn down — torn-down records are
/// removed entirely, per spec §4.6's "deregistration" semantics).
#[derive(Debug, Default)]
pub struct Registry {
    records: HashMap<Hash256, SubChainRecord>,
    by_parent: HashMap<Hash256, Vec<Hash256>>,
    max_depth: u32,
    max_per_parent: usize,
}

impl Registry {
    #[must_use]
    pub fn new(max_depth: u32, max_per_parent: usize) -> Self {
        Self {
            records: HashMap::new(),
            by_parent: HashMap::new(),
            max_depth,
            max_per_parent,
        }
    }

    #[must_use]
    pub fn depth_of(&self, chain_id: &Hash256) -> u32 {
        if *chain_id == Hash256::zero() {
            return 0;
        }
        self.records.get(chain_id).map_or(0, |r| r.depth)
    }

    #[must_use]
    pub fn children_of(&self, parent_id: &Hash256) -> &[Hash256] {
        self.by_parent.get(parent_id).map_or(&[], |v| v.as_slice())
    }

    #[must_use]
    pub fn get(&self, chain_id: &Hash256) -> Option<&SubChainRecord> {
        self.records.get(chain_id)
    }

    #[must_use]
    pub fn all(&self) -> Vec<&SubChainRecord> {
        self.records.values().collect()
    }

    /// Checks `MaxDepth`/`MaxPerParent` admission for a would-be child of
    /// `parent_id`, per spec §4.6, without registering anything.
    ///
    /// # Errors
    ///
    /// Returns the first violated limit.
    pub fn check_admission(&self, parent_id: Hash256) -> Result<(), AdmissionError> {
        let depth = self.depth_of(&parent_id) + 1;
        if depth > self.max_depth {
            return Err(AdmissionError::TooDeep {
                depth,
                max_depth: self.max_depth,
            });
        }
        let count = self.children_of(&parent_id).len();
        if count >= self.max_per_parent {
            return Err(AdmissionError::TooManyChildren {
                parent: parent_id,
                count,
                max: self.max_per_parent,
            });
        }
        Ok(())
    }

    /// Registers a new sub-chain record, already admission-checked.
    pub fn insert(&mut self, record: SubChainRecord) {
        self.by_parent.entry(record.parent_id).or_default().push(record.id);
        self.records.insert(record.id, record);
    }

    /// Removes a sub-chain record (deregistration). Returns the removed
    /// record, if any, so the caller can recurse into its children.
    pub fn remove(&mut self, chain_id: &Hash256) -> Option<SubChainRecord> {
        let record = self.records.remove(chain_id)?;
        if let Some(siblings) = self.by_parent.get_mut(&record.parent_id) {
            siblings.retain(|id| id != chain_id);
        }
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(id: Hash256, parent_id: Hash256, depth: u32) -> SubChainRecord {
        SubChainRecord {
            id,
            parent_id,
            name: "child".into(),
            symbol: "CHD".into(),
            created_at_height: 10,
            registration_tx: Hash256::blake3(b"tx"),
            output_index: 0,
            registration_data: RegistrationData {
                name: "child".into(),
                symbol: "CHD".into(),
                consensus_type: ConsensusType::Poa,
                genesis_validators: vec![],
                pow_difficulty: None,
                min_fee_rate: 1,
                premine: 0,
                premine_address: None,
            },
            depth,
        }
    }

    #[test]
    fn derives_deterministic_id() {
        let tx = Hash256::blake3(b"regtx");
        assert_eq!(SubChainRecord::derive_id(tx, 0), SubChainRecord::derive_id(tx, 0));
        assert_ne!(SubChainRecord::derive_id(tx, 0), SubChainRecord::derive_id(tx, 1));
    }

    #[test]
    fn rejects_registration_beyond_max_depth() {
        let registry = Registry::new(1, 16);
        let parent = Hash256::blake3(b"root-child");
        // simulate a depth-1 parent already registered under the root
        let mut registry = registry;
        registry.insert(sample_record(parent, Hash256::zero(), 1));
        assert!(matches!(
            registry.check_admission(parent),
            Err(AdmissionError::TooDeep { .. })
        ));
    }

    #[test]
    fn rejects_beyond_max_per_parent() {
        let mut registry = Registry::new(4, 1);
        let parent = Hash256::zero();
        registry.insert(sample_record(Hash256::blake3(b"a"), parent, 1));
        assert!(matches!(
            registry.check_admission(parent),
            Err(AdmissionError::TooManyChildren { .. })
        ));
    }

    #[test]
    fn removal_drops_from_parent_index() {
        let mut registry = Registry::new(4, 16);
        let parent = Hash256::zero();
        let child = Hash256::blake3(b"child");
        registry.insert(sample_record(child, parent, 1));
        assert_eq!(registry.children_of(&parent).len(), 1);
        registry.remove(&child);
        assert!(registry.children_of(&parent).is_empty());
    }
}
