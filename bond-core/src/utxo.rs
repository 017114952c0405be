//! UTXO set: authoritative record of unspent outputs, keyed by outpoint,
//! with secondary indexes by owner address and staked-validator pubkey.

use crate::error::{BondError, BondResult};
use crate::script::ScriptType;
use crate::transaction::{TokenAmount, TxOutput};
use serde::{Deserialize, Serialize};
use shared::Hash256;
use std::collections::{HashMap, HashSet};

/// Identifies a UTXO uniquely: the transaction that created it and the
/// output index within that transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    #[must_use]
    pub const fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// The all-zero outpoint that marks a coinbase input.
    #[must_use]
    pub const fn coinbase_marker() -> Self {
        Self {
            txid: Hash256::zero(),
            vout: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub value: u64,
    pub script: crate::script::Script,
    pub token: Option<TokenAmount>,
    pub created_height: u64,
    pub is_coinbase: bool,
    pub unlock_height: u64,
}

impl Utxo {
    #[must_use]
    pub fn from_output(outpoint: OutPoint, output: &TxOutput, created_height: u64, is_coinbase: bool) -> Self {
        let unlock_height = output
            .script
            .unwrap_time_lock()
            .map(|(h, _)| h)
            .unwrap_or(0);
        Self {
            outpoint,
            value: output.value,
            script: output.script.clone(),
            token: output.token,
            created_height,
            is_coinbase,
            unlock_height,
        }
    }

    /// Owner address for P2PKH (and `TimeLock`ed P2PKH) outputs, if any.
    #[must_use]
    pub fn owner_address(&self) -> Option<[u8; 20]> {
        match self.script.script_type {
            ScriptType::P2pkh => self.script.p2pkh_address().ok(),
            ScriptType::TimeLock => {
                let (_, inner) = self.script.unwrap_time_lock().ok()?;
                (inner.script_type == ScriptType::P2pkh)
                    .then(|| inner.p2pkh_address().ok())
                    .flatten()
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn staker_pubkey(&self) -> Option<[u8; 32]> {
        (self.script.script_type == ScriptType::Stake)
            .then(|| self.script.stake_pubkey().ok())
            .flatten()
    }

    #[must_use]
    pub fn is_immature(&self, current_height: u64, coinbase_maturity: u64) -> bool {
        self.is_coinbase && (current_height.saturating_sub(self.created_height)) < coinbase_maturity
    }

    #[must_use]
    pub fn is_staked(&self) -> bool {
        self.script.script_type == ScriptType::Stake
    }

    #[must_use]
    pub fn is_locked(&self, current_height: u64) -> bool {
        self.unlock_height > current_height
    }

    #[must_use]
    pub fn is_spendable(&self, current_height: u64, coinbase_maturity: u64) -> bool {
        !self.is_immature(current_height, coinbase_maturity)
            && !self.is_staked()
            && !self.is_locked(current_height)
    }
}

/// Balance broken down per spec §4.1's four-way classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub total: u64,
    pub spendable: u64,
    pub immature: u64,
    pub staked: u64,
    pub locked: u64,
}

/// A batch of UTXO mutations applied atomically across all three indexes.
#[derive(Debug, Default)]
pub struct UtxoBatch {
    adds: Vec<Utxo>,
    spends: Vec<OutPoint>,
}

impl UtxoBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, utxo: Utxo) {
        self.adds.push(utxo);
    }

    pub fn spend(&mut self, outpoint: OutPoint) {
        self.spends.push(outpoint);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UtxoSet {
    primary: HashMap<OutPoint, Utxo>,
    by_address: HashMap<[u8; 20], HashSet<OutPoint>>,
    by_staker: HashMap<[u8; 32], HashSet<OutPoint>>,
}

impl UtxoSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn index_add(&mut self, utxo: &Utxo) {
        if let Some(addr) = utxo.owner_address() {
            self.by_address.entry(addr).or_default().insert(utxo.outpoint);
        }
        if let Some(pk) = utxo.staker_pubkey() {
            self.by_staker.entry(pk).or_default().insert(utxo.outpoint);
        }
    }

    fn index_remove(&mut self, utxo: &Utxo) {
        if let Some(addr) = utxo.owner_address() {
            if let Some(set) = self.by_address.get_mut(&addr) {
                set.remove(&utxo.outpoint);
                if set.is_empty() {
                    self.by_address.remove(&addr);
                }
            }
        }
        if let Some(pk) = utxo.staker_pubkey() {
            if let Some(set) = self.by_staker.get_mut(&pk) {
                set.remove(&utxo.outpoint);
                if set.is_empty() {
                    self.by_staker.remove(&pk);
                }
            }
        }
    }

    /// # Errors
    ///
    /// Returns an error if the outpoint is already present.
    pub fn add(&mut self, utxo: Utxo) -> BondResult<()> {
        if self.primary.contains_key(&utxo.outpoint) {
            return Err(BondError::InvalidTransaction("outpoint already exists".into()));
        }
        self.index_add(&utxo);
        self.primary.insert(utxo.outpoint, utxo);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the outpoint does not exist.
    pub fn spend(&mut self, outpoint: OutPoint) -> BondResult<Utxo> {
        let utxo = self
            .primary
            .remove(&outpoint)
            .ok_or(BondError::TransactionNotFound("utxo not found".into()))?;
        self.index_remove(&utxo);
        Ok(utxo)
    }

    /// Read ordering per spec §4.1: resolve primary first; a stale index
    /// entry pointing at an absent primary record is simply skipped.
    #[must_use]
    pub fn get(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.primary.get(outpoint)
    }

    #[must_use]
    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.primary.contains_key(outpoint)
    }

    pub fn by_address(&self, address: &[u8; 20]) -> impl Iterator<Item = &Utxo> {
        self.by_address
            .get(address)
            .into_iter()
            .flatten()
            .filter_map(move |op| self.primary.get(op))
    }

    pub fn by_staker(&self, pubkey: &[u8; 32]) -> impl Iterator<Item = &Utxo> {
        self.by_staker
            .get(pubkey)
            .into_iter()
            .flatten()
            .filter_map(move |op| self.primary.get(op))
    }

    #[must_use]
    pub fn all_staked_validators(&self) -> Vec<[u8; 32]> {
        self.by_staker.keys().copied().collect()
    }

    #[must_use]
    pub fn balance(&self, address: &[u8; 20], current_height: u64, coinbase_maturity: u64) -> Balance {
        let mut balance = Balance::default();
        for utxo in self.by_address(address) {
            balance.total += utxo.value;
            if utxo.is_immature(current_height, coinbase_maturity) {
                balance.immature += utxo.value;
            } else if utxo.is_staked() {
                balance.staked += utxo.value;
            } else if utxo.is_locked(current_height) {
                balance.locked += utxo.value;
            } else {
                balance.spendable += utxo.value;
            }
        }
        balance
    }

    /// Applies a batch atomically: either every add/spend lands or (on the
    /// first error) none of the batch's effects are left applied.
    ///
    /// # Errors
    ///
    /// Returns an error (and rolls back) if any spend target is missing.
    pub fn apply_batch(&mut self, batch: UtxoBatch) -> BondResult<()> {
        let mut spent = Vec::with_capacity(batch.spends.len());
        for outpoint in batch.spends {
            match self.spend(outpoint) {
                Ok(utxo) => spent.push(utxo),
                Err(e) => {
                    for utxo in spent {
                        let _ = self.add(utxo);
                    }
                    return Err(e);
                }
            }
        }
        for utxo in batch.adds {
            if let Err(e) = self.add(utxo) {
                return Err(e);
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.primary.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Script;

    fn p2pkh_utxo(addr: [u8; 20], value: u64, height: u64, is_coinbase: bool) -> Utxo {
        let address = shared::Address::parse(&hex::encode(addr), "kgx").unwrap();
        let output = TxOutput::new(value, Script::p2pkh(&address));
        Utxo::from_output(OutPoint::new(Hash256::blake3(&addr), 0), &output, height, is_coinbase)
    }

    #[test]
    fn add_and_get() {
        let mut set = UtxoSet::new();
        let utxo = p2pkh_utxo([1u8; 20], 1000, 5, false);
        let outpoint = utxo.outpoint;
        set.add(utxo).unwrap();
        assert!(set.contains(&outpoint));
        assert_eq!(set.get(&outpoint).unwrap().value, 1000);
    }

    #[test]
    fn spend_removes_from_all_indexes() {
        let mut set = UtxoSet::new();
        let utxo = p2pkh_utxo([2u8; 20], 500, 1, false);
        let outpoint = utxo.outpoint;
        set.add(utxo).unwrap();
        set.spend(outpoint).unwrap();
        assert!(!set.contains(&outpoint));
        assert_eq!(set.by_address(&[2u8; 20]).count(), 0);
    }

    #[test]
    fn balance_classifies_immature_coinbase() {
        let mut set = UtxoSet::new();
        let utxo = p2pkh_utxo([3u8; 20], 1000, 10, true);
        set.add(utxo).unwrap();

        let balance_early = set.balance(&[3u8; 20], 25, 20);
        assert_eq!(balance_early.immature, 1000);
        assert_eq!(balance_early.spendable, 0);

        let balance_mature = set.balance(&[3u8; 20], 30, 20);
        assert_eq!(balance_mature.spendable, 1000);
        assert_eq!(balance_mature.immature, 0);
    }

    #[test]
    fn balance_total_equals_sum_of_classes() {
        let mut set = UtxoSet::new();
        set.add(p2pkh_utxo([4u8; 20], 100, 1, false)).unwrap();
        set.add(p2pkh_utxo([4u8; 20], 200, 50, true)).unwrap();
        let balance = set.balance(&[4u8; 20], 52, 20);
        assert_eq!(
            balance.total,
            balance.spendable + balance.immature + balance.staked + balance.locked
        );
    }

    #[test]
    fn staker_index_tracks_stake_scripts() {
        let mut set = UtxoSet::new();
        let pubkey = [9u8; 32];
        let output = TxOutput::new(10_000, Script::stake(&pubkey));
        let utxo = Utxo::from_output(OutPoint::new(Hash256::blake3(b"stake"), 0), &output, 1, false);
        set.add(utxo).unwrap();
        assert_eq!(set.all_staked_validators(), vec![pubkey]);
        assert_eq!(set.by_staker(&pubkey).count(), 1);
    }

    #[test]
    fn batch_rolls_back_on_missing_spend() {
        let mut set = UtxoSet::new();
        let utxo = p2pkh_utxo([5u8; 20], 100, 1, false);
        let outpoint = utxo.outpoint;
        set.add(utxo).unwrap();

        let mut batch = UtxoBatch::new();
        batch.spend(outpoint);
        batch.spend(OutPoint::new(Hash256::blake3(b"missing"), 0));

        assert!(set.apply_batch(batch).is_err());
        // the valid spend should have been rolled back
        assert!(set.contains(&outpoint));
    }
}
