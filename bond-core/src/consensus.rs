//! Consensus engine capability set, per spec §9 ("consensus as capability
//! set"). `PoaEngine` (in the `consensus` crate) and [`crate::mining::PowEngine`]
//! both implement this trait; the chain holds one by value and defers every
//! header-level decision to it.

use crate::block::BlockHeader;
use crate::error::BondResult;

pub trait ConsensusEngine: Send + Sync {
    /// Validates `header` against `parent` (signature/PoW, proposer
    /// eligibility, difficulty). Does not touch chain state beyond what's
    /// passed in.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first failed consensus rule.
    fn validate_header(&self, parent: &BlockHeader, header: &BlockHeader) -> BondResult<()>;

    /// Produces a new header extending `parent` at `now`, signed/mined by
    /// `signer_pubkey`.
    ///
    /// # Errors
    ///
    /// Returns an error if this engine/signer cannot currently produce
    /// (e.g. not in-turn and no backup window elapsed, for PoA).
    fn produce_header(
        &self,
        parent: &BlockHeader,
        now: i64,
        merkle_root: shared::Hash256,
        signer_pubkey: &[u8],
    ) -> BondResult<BlockHeader>;

    /// Recovers the signer/proposer pubkey from a validated header, if the
    /// engine variant supports signer identification (PoA does, PoW does
    /// not).
    fn identify_signer(&self, header: &BlockHeader) -> Option<Vec<u8>>;

    fn is_validator(&self, pubkey: &[u8]) -> bool;

    fn add_validator(&mut self, pubkey: Vec<u8>);

    fn remove_validator(&mut self, pubkey: &[u8]);
}
