//! Fee-rate-priority mempool of unconfirmed transactions.

use crate::error::{BondError, BondResult};
use crate::transaction::Transaction;
use crate::utxo::{OutPoint, UtxoSet};
use serde::{Deserialize, Serialize};
use shared::Hash256;
use std::collections::HashMap;

/// An unconfirmed transaction plus its computed fee economics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub fee: u64,
    pub fee_rate: u64,
    pub inserted_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct MempoolStats {
    pub count: usize,
    pub total_fees: u64,
}

/// Fee-rate-ordered unconfirmed pool, capacity-bounded with RBF-by-fee-rate
/// eviction. Admission/eviction/selection are all serialized under the
/// mempool's own lock at the call site (spec §5); this type itself is plain
/// data manipulated under that external lock.
#[derive(Debug, Clone, Default)]
pub struct Mempool {
    entries: HashMap<Hash256, MempoolEntry>,
    capacity: usize,
    min_fee_rate: u64,
}

impl Mempool {
    #[must_use]
    pub fn new(capacity: usize, min_fee_rate: u64) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            min_fee_rate,
        }
    }

    #[must_use]
    pub fn contains(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(txid)
    }

    #[must_use]
    pub fn get(&self, txid: &Hash256) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    /// Computes `(fee, fee_rate)` for `tx` against a UTXO snapshot, without
    /// admitting it.
    ///
    /// # Errors
    ///
    /// Returns an error if any input is missing/spent or if outputs exceed
    /// inputs.
    pub fn compute_fee(&self, tx: &Transaction, utxos: &UtxoSet) -> BondResult<(u64, u64)> {
        let mut input_total = 0u64;
        for input in &tx.inputs {
            let utxo = utxos
                .get(&input.prev_outpoint)
                .ok_or_else(|| BondError::InvalidTransaction("input not in utxo set".into()))?;
            input_total = input_total
                .checked_add(utxo.value)
                .ok_or_else(|| BondError::InvalidTransaction("input value overflow".into()))?;
        }
        let output_total: u64 = tx.outputs.iter().map(|o| o.value).sum();
        let fee = input_total
            .checked_sub(output_total)
            .ok_or_else(|| BondError::InvalidTransaction("outputs exceed inputs".into()))?;
        let size = tx.signing_bytes().len().max(1) as u64;
        Ok((fee, fee / size))
    }

    /// Admission per spec §4.3: context-free checks (left to the caller,
    /// which already validated the tx before reaching the mempool),
    /// existence/unspent of every input, min fee rate, and capacity-bound
    /// RBF-by-fee-rate eviction.
    ///
    /// # Errors
    ///
    /// Returns an error if the tx is already present, fee rate is below the
    /// minimum, or the pool is full and no lower-fee-rate victim exists.
    pub fn add(&mut self, tx: Transaction, utxos: &UtxoSet, now: i64) -> BondResult<u64> {
        let txid = tx.hash();
        if self.entries.contains_key(&txid) {
            return Err(BondError::InvalidTransaction("already in mempool".into()));
        }
        let (fee, fee_rate) = self.compute_fee(&tx, utxos)?;
        if fee_rate < self.min_fee_rate {
            return Err(BondError::InvalidTransaction("fee rate below minimum".into()));
        }

        if self.entries.len() >= self.capacity {
            self.evict_for(fee_rate)?;
        }

        self.entries.insert(
            txid,
            MempoolEntry {
                tx,
                fee,
                fee_rate,
                inserted_at: now,
            },
        );
        Ok(fee)
    }

    /// Evicts the lowest fee-rate entry (oldest-first on ties) if
    /// `incoming_fee_rate` is strictly higher; otherwise rejects admission.
    fn evict_for(&mut self, incoming_fee_rate: u64) -> BondResult<()> {
        let victim = self
            .entries
            .iter()
            .min_by(|a, b| {
                a.1.fee_rate
                    .cmp(&b.1.fee_rate)
                    .then(a.1.inserted_at.cmp(&b.1.inserted_at))
            })
            .map(|(txid, entry)| (*txid, entry.fee_rate));

        match victim {
            Some((txid, victim_rate)) if incoming_fee_rate > victim_rate => {
                self.entries.remove(&txid);
                Ok(())
            }
            _ => Err(BondError::InvalidTransaction(
                "mempool full and incoming fee rate does not exceed lowest entry".into(),
            )),
        }
    }

    pub fn remove(&mut self, txid: &Hash256) -> Option<MempoolEntry> {
        self.entries.remove(txid)
    }

    /// Removes every entry whose inputs are now consumed on the canonical
    /// branch (called after a block confirms).
    pub fn remove_confirmed(&mut self, confirmed_txids: &[Hash256]) {
        for txid in confirmed_txids {
            self.entries.remove(txid);
        }
    }

    /// Drops entries that spend a now-nonexistent UTXO (used after reorg
    /// undo leaves dangling inputs, and after a confirmed coinbase becomes
    /// immature again).
    pub fn purge_invalid(&mut self, utxos: &UtxoSet) {
        self.entries
            .retain(|_, entry| entry.tx.inputs.iter().all(|i| utxos.contains(&i.prev_outpoint)));
    }

    /// Re-admits transactions from an undone branch, best-effort: failures
    /// (e.g. an input is gone) are silently dropped per spec §4.3.
    pub fn readmit_reverted(&mut self, txs: Vec<Transaction>, utxos: &UtxoSet, now: i64) {
        for tx in txs {
            let _ = self.add(tx, utxos, now);
        }
    }

    /// `select(max_block_signing_bytes)`: descending fee rate, ties by
    /// tx-hash lexicographic order, stopping once the next tx would exceed
    /// the budget.
    #[must_use]
    pub fn select(&self, max_block_signing_bytes: usize) -> Vec<Transaction> {
        let mut candidates: Vec<(&Hash256, &MempoolEntry)> = self.entries.iter().collect();
        candidates.sort_by(|a, b| {
            b.1.fee_rate
                .cmp(&a.1.fee_rate)
                .then_with(|| a.0.to_string().cmp(&b.0.to_string()))
        });

        let mut selected = Vec::new();
        let mut used = 0usize;
        for (_, entry) in candidates {
            let size = entry.tx.signing_bytes().len();
            if used + size > max_block_signing_bytes {
                break;
            }
            used += size;
            selected.push(entry.tx.clone());
        }
        selected
    }

    #[must_use]
    pub fn stats(&self) -> MempoolStats {
        MempoolStats {
            count: self.entries.len(),
            total_fees: self.entries.values().map(|e| e.fee).sum(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn all_outpoints(&self) -> impl Iterator<Item = OutPoint> + '_ {
        self.entries.values().flat_map(|e| e.tx.inputs.iter().map(|i| i.prev_outpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Script;
    use crate::transaction::TxOutput;
    use crate::utxo::Utxo;

    fn funded_utxo_set(value: u64) -> (UtxoSet, OutPoint, shared::KeyPair) {
        let keypair = shared::KeyPair::generate();
        let addr = keypair.public_key.to_address();
        let outpoint = OutPoint::new(Hash256::blake3(b"seed"), 0);
        let output = TxOutput::new(value, Script::p2pkh(&addr));
        let utxo = Utxo::from_output(outpoint, &output, 0, false);
        let mut set = UtxoSet::new();
        set.add(utxo).unwrap();
        (set, outpoint, keypair)
    }

    fn spending_tx(outpoint: OutPoint, output_value: u64, addr: &shared::Address) -> Transaction {
        Transaction::new(
            1,
            vec![crate::transaction::TxInput::new(outpoint)],
            vec![TxOutput::new(output_value, Script::p2pkh(addr))],
            0,
        )
    }

    #[test]
    fn admits_tx_meeting_min_fee_rate() {
        let (utxos, outpoint, keypair) = funded_utxo_set(1000);
        let addr = keypair.public_key.to_address();
        let tx = spending_tx(outpoint, 500, &addr);
        let mut mempool = Mempool::new(10, 0);
        assert!(mempool.add(tx, &utxos, 0).is_ok());
    }

    #[test]
    fn rejects_below_min_fee_rate() {
        let (utxos, outpoint, keypair) = funded_utxo_set(1000);
        let addr = keypair.public_key.to_address();
        let tx = spending_tx(outpoint, 1000, &addr); // zero fee
        let mut mempool = Mempool::new(10, 1);
        assert!(mempool.add(tx, &utxos, 0).is_err());
    }

    #[test]
    fn evicts_lowest_fee_rate_when_full() {
        let keypair = shared::KeyPair::generate();
        let addr = keypair.public_key.to_address();
        let mut utxos = UtxoSet::new();
        let mut mempool = Mempool::new(1, 0);

        let outpoint_low = OutPoint::new(Hash256::blake3(b"low"), 0);
        utxos
            .add(Utxo::from_output(
                outpoint_low,
                &TxOutput::new(1000, Script::p2pkh(&addr)),
                0,
                false,
            ))
            .unwrap();
        let low_fee_tx = spending_tx(outpoint_low, 999, &addr); // fee=1
        mempool.add(low_fee_tx, &utxos, 0).unwrap();

        let outpoint_high = OutPoint::new(Hash256::blake3(b"high"), 0);
        utxos
            .add(Utxo::from_output(
                outpoint_high,
                &TxOutput::new(1000, Script::p2pkh(&addr)),
                0,
                false,
            ))
            .unwrap();
        let high_fee_tx = spending_tx(outpoint_high, 1, &addr); // fee=999
        assert!(mempool.add(high_fee_tx, &utxos, 1).is_ok());
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn select_orders_by_descending_fee_rate() {
        let keypair = shared::KeyPair::generate();
        let addr = keypair.public_key.to_address();
        let mut utxos = UtxoSet::new();
        let mut mempool = Mempool::new(10, 0);

        for (i, fee) in [(0, 100u64), (1, 50), (2, 10)] {
            let outpoint = OutPoint::new(Hash256::blake3(format!("tx{i}").as_bytes()), 0);
            utxos
                .add(Utxo::from_output(
                    outpoint,
                    &TxOutput::new(1000, Script::p2pkh(&addr)),
                    0,
                    false,
                ))
                .unwrap();
            let tx = spending_tx(outpoint, 1000 - fee, &addr);
            mempool.add(tx, &utxos, i).unwrap();
        }

        let selected = mempool.select(usize::MAX);
        assert_eq!(selected.len(), 3);
        let (fee0, _) = mempool.compute_fee(&selected[0], &utxos).unwrap();
        let (fee1, _) = mempool.compute_fee(&selected[1], &utxos).unwrap();
        assert!(fee0 >= fee1);
    }

    /// Spec scenario: three equal-size txs at fee rates 100/50/10; a block
    /// budget that admits exactly two non-coinbase txs takes the 100 and 50
    /// rate txs, in that order.
    #[test]
    fn budget_constrained_select_packs_highest_fee_rates_first() {
        let keypair = shared::KeyPair::generate();
        let addr = keypair.public_key.to_address();
        let mut utxos = UtxoSet::new();
        let mut mempool = Mempool::new(10, 0);

        let mut one_tx_size = 0usize;
        for (i, fee) in [(0, 100u64), (1, 50), (2, 10)] {
            let outpoint = OutPoint::new(Hash256::blake3(format!("budget-tx{i}").as_bytes()), 0);
            utxos
                .add(Utxo::from_output(
                    outpoint,
                    &TxOutput::new(1000, Script::p2pkh(&addr)),
                    0,
                    false,
                ))
                .unwrap();
            let tx = spending_tx(outpoint, 1000 - fee, &addr);
            one_tx_size = tx.signing_bytes().len();
            mempool.add(tx, &utxos, i).unwrap();
        }

        let budget = one_tx_size * 2;
        let selected = mempool.select(budget);
        assert_eq!(selected.len(), 2);
        let (fee0, _) = mempool.compute_fee(&selected[0], &utxos).unwrap();
        let (fee1, _) = mempool.compute_fee(&selected[1], &utxos).unwrap();
        assert_eq!(fee0, 100);
        assert_eq!(fee1, 50);
    }
}
