//! Proof-of-Authority consensus engine: time-slot election among a known
//! validator set, with a backup producer window when the in-turn validator
//! misses its slot. Grounded on the round-robin slot scheduling in
//! `DposEngine::generate_schedule`/`get_current_producer`, stripped of
//! DPoS-specific stake-weighted election, epochs, and slashing (the spec's
//! validator set changes only via explicit stake/unstake transactions, not
//! epoch-boundary re-election).

use bond_core::block::BlockHeader;
use bond_core::consensus::ConsensusEngine;
use bond_core::error::{BondError, BondResult};
use shared::{Hash256, Signature};

/// Time-slot PoA engine over a fixed, explicitly-managed validator set.
/// Validators are ordered deterministically (ascending pubkey bytes) so
/// every node computes the same in-turn producer for a given height without
/// needing to gossip the schedule.
pub struct PoaEngine {
    validators: Vec<[u8; 32]>,
    block_time_seconds: u64,
}

impl PoaEngine {
    #[must_use]
    pub fn new(mut validators: Vec<[u8; 32]>, block_time_seconds: u64) -> Self {
        validators.sort_unstable();
        validators.dedup();
        Self {
            validators,
            block_time_seconds,
        }
    }

    #[must_use]
    pub fn validator_count(&self) -> usize {
        self.validators.len()
    }

    /// Slot number for a unix timestamp, per spec §4.5: `t /
    /// block_time_seconds`.
    #[must_use]
    fn slot_for(&self, timestamp: i64) -> i64 {
        timestamp.div_euclid(self.block_time_seconds as i64)
    }

    /// The validator whose turn it is to produce at `slot`:
    /// `validators_sorted_by_pubkey[slot mod N]`.
    #[must_use]
    pub fn in_turn_validator_for_slot(&self, slot: i64) -> Option<[u8; 32]> {
        if self.validators.is_empty() {
            return None;
        }
        let n = self.validators.len() as i64;
        Some(self.validators[slot.rem_euclid(n) as usize])
    }

    /// `staggered_delay(distance) = min(block_time, distance * block_time /
    /// N)`, per spec §4.5: validators nearer in the ring to the in-turn
    /// producer become eligible as backup strictly earlier.
    fn staggered_delay(&self, distance: i64) -> i64 {
        let n = self.validators.len() as i64;
        let block_time = self.block_time_seconds as i64;
        std::cmp::min(block_time, distance * block_time / n)
    }

    /// The unix timestamp at which `signer` may produce for `slot`: exactly
    /// the slot start if in-turn, or the slot start plus its ring-distance
    /// staggered delay otherwise. `None` if `signer` is not a known
    /// validator.
    fn eligible_at(&self, slot: i64, signer: &[u8; 32]) -> Option<i64> {
        let n = self.validators.len() as i64;
        if n == 0 {
            return None;
        }
        let signer_index = self.validators.binary_search(signer).ok()? as i64;
        let in_turn_index = slot.rem_euclid(n);
        let distance = (signer_index - in_turn_index).rem_euclid(n);
        let slot_start = slot * self.block_time_seconds as i64;
        Some(slot_start + self.staggered_delay(distance))
    }

    fn pubkey_matches_signature(pubkey: &[u8; 32], header: &BlockHeader, sig_bytes: &[u8]) -> bool {
        let Ok(public_key) = shared::public_key_from_bytes(pubkey) else {
            return false;
        };
        let Ok(signature) = Signature::from_parts(sig_bytes, public_key) else {
            return false;
        };
        signature.verify(header.hash().as_bytes()).unwrap_or(false)
    }
}

impl ConsensusEngine for PoaEngine {
    fn validate_header(&self, parent: &BlockHeader, header: &BlockHeader) -> BondResult<()> {
        if header.height != parent.height + 1 {
            return Err(BondError::Validation("non-sequential height".into()));
        }
        if header.timestamp <= parent.timestamp {
            return Err(BondError::Validation("header timestamp does not advance".into()));
        }

        let Some(signer) = self.identify_signer(header) else {
            return Err(BondError::Validation("header signature does not match any known validator".into()));
        };
        let Ok(signer) = <[u8; 32]>::try_from(signer.as_slice()) else {
            return Err(BondError::Validation("header signature does not match any known validator".into()));
        };

        let slot = self.slot_for(header.timestamp);
        let Some(eligible_at) = self.eligible_at(slot, &signer) else {
            return Err(BondError::Validation("no validators registered".into()));
        };

        if header.timestamp >= eligible_at {
            return Ok(());
        }

        Err(BondError::Validation(
            "header signed out of turn before its staggered backup delay elapsed".into(),
        ))
    }

    fn produce_header(&self, parent: &BlockHeader, now: i64, merkle_root: Hash256, signer_pubkey: &[u8]) -> BondResult<BlockHeader> {
        if signer_pubkey.len() != 32 {
            return Err(BondError::Validation("signer pubkey must be 32 bytes".into()));
        }
        let mut pubkey = [0u8; 32];
        pubkey.copy_from_slice(signer_pubkey);

        if !self.is_validator(&pubkey) {
            return Err(BondError::Validation("signer is not a registered validator".into()));
        }

        let height = parent.height + 1;
        let slot = self.slot_for(now);
        let Some(eligible_at) = self.eligible_at(slot, &pubkey) else {
            return Err(BondError::Validation("signer is not a registered validator".into()));
        };
        if now < eligible_at {
            return Err(BondError::Validation("not this validator's turn yet".into()));
        }

        Ok(BlockHeader::new(parent.hash(), merkle_root, now, height))
    }

    fn identify_signer(&self, header: &BlockHeader) -> Option<Vec<u8>> {
        let sig_bytes = header.validator_sig.as_ref()?;
        self.validators
            .iter()
            .find(|pubkey| Self::pubkey_matches_signature(pubkey, header, sig_bytes))
            .map(|pubkey| pubkey.to_vec())
    }

    fn is_validator(&self, pubkey: &[u8]) -> bool {
        <[u8; 32]>::try_from(pubkey)
            .map(|pk| self.validators.binary_search(&pk).is_ok())
            .unwrap_or(false)
    }

    fn add_validator(&mut self, pubkey: Vec<u8>) {
        if let Ok(pk) = <[u8; 32]>::try_from(pubkey.as_slice()) {
            if let Err(index) = self.validators.binary_search(&pk) {
                self.validators.insert(index, pk);
            }
        }
    }

    fn remove_validator(&mut self, pubkey: &[u8]) {
        if let Ok(pk) = <[u8; 32]>::try_from(pubkey) {
            if let Ok(index) = self.validators.binary_search(&pk) {
                self.validators.remove(index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair_pubkey() -> (shared::KeyPair, [u8; 32]) {
        let keypair = shared::KeyPair::generate();
        let pubkey = *keypair.public_key.as_bytes();
        (keypair, pubkey)
    }

    fn sign_header(header: &mut BlockHeader, keypair: &shared::KeyPair) {
        let sig = keypair.sign(header.hash().as_bytes()).unwrap();
        header.validator_sig = Some(sig.as_bytes().to_vec());
    }

    #[test]
    fn in_turn_validator_round_robins_by_slot() {
        let (_, pk_a) = keypair_pubkey();
        let (_, pk_b) = keypair_pubkey();
        let mut validators = vec![pk_a, pk_b];
        validators.sort_unstable();
        let engine = PoaEngine::new(validators.clone(), 3);
        assert_eq!(engine.in_turn_validator_for_slot(0), Some(validators[0]));
        assert_eq!(engine.in_turn_validator_for_slot(1), Some(validators[1]));
        assert_eq!(engine.in_turn_validator_for_slot(2), Some(validators[0]));
    }

    #[test]
    fn validates_in_turn_signed_header() {
        let (keypair, pubkey) = keypair_pubkey();
        let engine = PoaEngine::new(vec![pubkey], 3);
        let parent = BlockHeader::new(Hash256::zero(), Hash256::zero(), 1000, 0);
        let mut header = BlockHeader::new(parent.hash(), Hash256::zero(), 1003, 1);
        sign_header(&mut header, &keypair);
        assert!(engine.validate_header(&parent, &header).is_ok());
    }

    /// After a missed slot, height and slot diverge (height advances by one
    /// per block, slot tracks wall-clock time); in-turn election must still
    /// key off the header's own timestamp, not its height.
    #[test]
    fn in_turn_election_survives_a_skipped_slot() {
        let (keypair_a, pubkey_a) = keypair_pubkey();
        let (keypair_b, pubkey_b) = keypair_pubkey();
        let mut validators = vec![pubkey_a, pubkey_b];
        validators.sort_unstable();
        let engine = PoaEngine::new(validators.clone(), 3);

        // Parent is at height 5 but slot 100 (validator-1 missed slots
        // 101..103; the next block lands at slot 104, three slots later,
        // yet only one height later).
        let parent = BlockHeader::new(Hash256::zero(), Hash256::zero(), 100 * 3, 5);
        let next_slot = 104i64;
        let in_turn = engine.in_turn_validator_for_slot(next_slot).unwrap();
        let signer = if in_turn == pubkey_a { &keypair_a } else { &keypair_b };
        let mut header = BlockHeader::new(parent.hash(), Hash256::zero(), next_slot * 3, 6);
        sign_header(&mut header, signer);
        assert!(engine.validate_header(&parent, &header).is_ok());
    }

    #[test]
    fn rejects_out_of_turn_header_before_staggered_delay() {
        let (keypair_a, pubkey_a) = keypair_pubkey();
        let (keypair_b, pubkey_b) = keypair_pubkey();
        let mut validators = vec![pubkey_a, pubkey_b];
        validators.sort_unstable();
        let engine = PoaEngine::new(validators.clone(), 3);

        let slot = 400i64;
        let slot_start = slot * 3;
        let parent = BlockHeader::new(Hash256::zero(), Hash256::zero(), slot_start - 100, 0);
        let in_turn = engine.in_turn_validator_for_slot(slot).unwrap();
        let wrong_signer = if in_turn == pubkey_a { &keypair_b } else { &keypair_a };

        // Right at slot start: the backup's staggered delay (> 0 for a
        // non-in-turn signer) has not elapsed yet.
        let mut header = BlockHeader::new(parent.hash(), Hash256::zero(), slot_start, 1);
        sign_header(&mut header, wrong_signer);
        assert!(engine.validate_header(&parent, &header).is_err());
    }

    #[test]
    fn accepts_backup_signer_after_staggered_delay() {
        let (keypair_a, pubkey_a) = keypair_pubkey();
        let (keypair_b, pubkey_b) = keypair_pubkey();
        let mut validators = vec![pubkey_a, pubkey_b];
        validators.sort_unstable();
        let engine = PoaEngine::new(validators.clone(), 3);

        let slot = 400i64;
        let slot_start = slot * 3;
        let parent = BlockHeader::new(Hash256::zero(), Hash256::zero(), slot_start - 100, 0);
        let in_turn = engine.in_turn_validator_for_slot(slot).unwrap();
        let wrong_signer = if in_turn == pubkey_a { &keypair_b } else { &keypair_a };

        // N=2, distance=1: staggered_delay = min(3, 1*3/2) = 1.
        let mut header = BlockHeader::new(parent.hash(), Hash256::zero(), slot_start + 1, 1);
        sign_header(&mut header, wrong_signer);
        assert!(engine.validate_header(&parent, &header).is_ok());
    }

    /// Spec scenario 5: with 3 validators, a nearer backup (distance 1)
    /// becomes eligible strictly before a farther one (distance 2), so the
    /// farther backup must not produce while the nearer one's window is
    /// still the only one open.
    #[test]
    fn farther_ring_backup_waits_longer_than_nearer_one() {
        let (keypair_a, pubkey_a) = keypair_pubkey();
        let (keypair_b, pubkey_b) = keypair_pubkey();
        let (keypair_c, pubkey_c) = keypair_pubkey();
        let mut validators = vec![pubkey_a, pubkey_b, pubkey_c];
        validators.sort_unstable();
        let engine = PoaEngine::new(validators.clone(), 3);
        let keypair_of = |pk: [u8; 32]| -> &shared::KeyPair {
            if pk == pubkey_a {
                &keypair_a
            } else if pk == pubkey_b {
                &keypair_b
            } else {
                &keypair_c
            }
        };

        let slot = 1000i64;
        let slot_start = slot * 3;
        let parent = BlockHeader::new(Hash256::zero(), Hash256::zero(), slot_start - 100, 0);
        let in_turn_index = validators.iter().position(|v| *v == engine.in_turn_validator_for_slot(slot).unwrap()).unwrap();
        let near = validators[(in_turn_index + 1) % 3]; // distance 1
        let far = validators[(in_turn_index + 2) % 3]; // distance 2

        // distance 1: min(3, 1*3/3) = 1. distance 2: min(3, 2*3/3) = 2.
        let mut near_header = BlockHeader::new(parent.hash(), Hash256::zero(), slot_start + 1, 1);
        sign_header(&mut near_header, keypair_of(near));
        assert!(engine.validate_header(&parent, &near_header).is_ok());

        let mut far_header = BlockHeader::new(parent.hash(), Hash256::zero(), slot_start + 1, 1);
        sign_header(&mut far_header, keypair_of(far));
        assert!(engine.validate_header(&parent, &far_header).is_err());

        let mut far_header_later = BlockHeader::new(parent.hash(), Hash256::zero(), slot_start + 2, 1);
        sign_header(&mut far_header_later, keypair_of(far));
        assert!(engine.validate_header(&parent, &far_header_later).is_ok());
    }

    #[test]
    fn add_and_remove_validator_round_trip() {
        let (_, pubkey) = keypair_pubkey();
        let mut engine = PoaEngine::new(vec![], 3);
        assert!(!engine.is_validator(&pubkey));
        engine.add_validator(pubkey.to_vec());
        assert!(engine.is_validator(&pubkey));
        engine.remove_validator(&pubkey);
        assert!(!engine.is_validator(&pubkey));
    }
}
