//! Genesis + dynamic-stake validator set, per spec §4.5.
//!
//! A pubkey is a validator if it was named in the genesis set (always
//! valid, never removed by stake bookkeeping) or if, when
//! `ValidatorStake > 0`, the UTXO set currently holds at least one `Stake`
//! output for that pubkey whose cumulative value meets the threshold.
//! `PoaEngine` itself only knows "is this pubkey currently a validator";
//! this type is what keeps that answer in sync with on-chain stake state,
//! wired up via `bond_core::chain::{StakeHandler, UnstakeHandler}`.

use bond_core::chain::{StakeHandler, UnstakeHandler};
use bond_core::utxo::UtxoSet;
use std::collections::HashSet;
use std::sync::Mutex;

/// Tracks which pubkeys are validators by virtue of genesis membership vs.
/// live stake, and recomputes eligibility against a `UtxoSet` snapshot.
#[derive(Debug, Default)]
pub struct ValidatorSet {
    genesis: HashSet<[u8; 32]>,
    validator_stake: u64,
}

impl ValidatorSet {
    #[must_use]
    pub fn new(genesis: Vec<[u8; 32]>, validator_stake: u64) -> Self {
        Self {
            genesis: genesis.into_iter().collect(),
            validator_stake,
        }
    }

    #[must_use]
    pub fn is_genesis(&self, pubkey: &[u8; 32]) -> bool {
        self.genesis.contains(pubkey)
    }

    /// A pubkey with live stake ≥ `ValidatorStake`, summed across every
    /// `Stake` UTXO it owns (a validator may split stake across multiple
    /// outputs).
    #[must_use]
    pub fn has_sufficient_stake(&self, pubkey: &[u8; 32], utxos: &UtxoSet) -> bool {
        if self.validator_stake == 0 {
            return false;
        }
        let total: u64 = utxos.by_staker(pubkey).map(|u| u.value).sum();
        total >= self.validator_stake
    }

    /// Full current eligibility: genesis membership OR sufficient live
    /// stake.
    #[must_use]
    pub fn is_eligible(&self, pubkey: &[u8; 32], utxos: &UtxoSet) -> bool {
        self.is_genesis(pubkey) || self.has_sufficient_stake(pubkey, utxos)
    }

    /// Every pubkey currently eligible: the genesis set unioned with every
    /// staked pubkey meeting the threshold.
    #[must_use]
    pub fn current_validators(&self, utxos: &UtxoSet) -> Vec<[u8; 32]> {
        let mut set: HashSet<[u8; 32]> = self.genesis.clone();
        if self.validator_stake > 0 {
            for pubkey in utxos.all_staked_validators() {
                if self.has_sufficient_stake(&pubkey, utxos) {
                    set.insert(pubkey);
                }
            }
        }
        let mut out: Vec<_> = set.into_iter().collect();
        out.sort_unstable();
        out
    }
}

/// Bridges chain-fired stake/unstake handlers into a live `PoaEngine`'s
/// validator set. Stake changes take effect at the block that commits
/// them; genesis validators are never removed here, per spec §4.5.
/// Implements the `Send + Sync` handler traits required by
/// `bond_core::chain::ChainHandlers`; the engine itself is guarded by its
/// own mutex so these callbacks never re-enter the chain writer.
pub struct StakeBridge {
    engine: Mutex<Box<dyn FnMut(bool, [u8; 32]) + Send>>,
    genesis: HashSet<[u8; 32]>,
}

impl StakeBridge {
    /// `on_change(is_stake, pubkey)` is invoked with `true` on stake
    /// confirmation and `false` on unstake confirmation; typical wiring
    /// calls `PoaEngine::add_validator`/`remove_validator` there.
    #[must_use]
    pub fn new(genesis: Vec<[u8; 32]>, on_change: impl FnMut(bool, [u8; 32]) + Send + 'static) -> Self {
        Self {
            engine: Mutex::new(Box::new(on_change)),
            genesis: genesis.into_iter().collect(),
        }
    }
}

impl StakeHandler for StakeBridge {
    fn on_stake(&self, _height: u64, validator_pubkey: [u8; 32], _amount: u64) {
        if let Ok(mut cb) = self.engine.lock() {
            cb(true, validator_pubkey);
        }
    }
}

impl UnstakeHandler for StakeBridge {
    fn on_unstake(&self, _height: u64, validator_pubkey: [u8; 32], _amount: u64) {
        if self.genesis.contains(&validator_pubkey) {
            return;
        }
        if let Ok(mut cb) = self.engine.lock() {
            cb(false, validator_pubkey);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bond_core::script::Script;
    use bond_core::transaction::TxOutput;
    use bond_core::utxo::{OutPoint, Utxo};
    use shared::Hash256;

    #[test]
    fn genesis_validator_eligible_without_stake() {
        let set = ValidatorSet::new(vec![[1u8; 32]], 1000);
        let utxos = UtxoSet::new();
        assert!(set.is_eligible(&[1u8; 32], &utxos));
    }

    #[test]
    fn non_genesis_needs_sufficient_stake() {
        let set = ValidatorSet::new(vec![], 1000);
        let mut utxos = UtxoSet::new();
        let pubkey = [2u8; 32];
        let output = TxOutput::new(500, Script::stake(&pubkey));
        utxos
            .add(Utxo::from_output(OutPoint::new(Hash256::blake3(b"s"), 0), &output, 1, false))
            .unwrap();
        assert!(!set.is_eligible(&pubkey, &utxos));

        let output2 = TxOutput::new(600, Script::stake(&pubkey));
        utxos
            .add(Utxo::from_output(OutPoint::new(Hash256::blake3(b"s2"), 0), &output2, 1, false))
            .unwrap();
        assert!(set.is_eligible(&pubkey, &utxos));
    }

    #[test]
    fn stake_disabled_when_validator_stake_zero() {
        let set = ValidatorSet::new(vec![], 0);
        let utxos = UtxoSet::new();
        assert!(!set.has_sufficient_stake(&[3u8; 32], &utxos));
    }
}
