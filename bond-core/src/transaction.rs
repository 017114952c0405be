//! Transactions: inputs spending existing UTXOs, outputs creating new ones.

use crate::error::{BondError, BondResult};
use crate::script::Script;
use crate::utxo::OutPoint;
use serde::{Deserialize, Serialize};
use shared::Hash256;

pub const MAX_TX_INPUTS: usize = 2500;
pub const MAX_TX_OUTPUTS: usize = 2500;

/// Token amount carried by an output, per spec §3 `UTXO.token?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    pub token_id: u64,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub prev_outpoint: OutPoint,
    /// Schnorr signature over the transaction's signing bytes (64 bytes once signed).
    pub signature_script: Vec<u8>,
    /// x-only public key (32 bytes) claimed to authorize this input.
    pub witness_pubkey: Vec<u8>,
}

impl TxInput {
    #[must_use]
    pub fn new(prev_outpoint: OutPoint) -> Self {
        Self {
            prev_outpoint,
            signature_script: Vec::new(),
            witness_pubkey: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_coinbase_input(&self) -> bool {
        self.prev_outpoint == OutPoint::coinbase_marker()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub script: Script,
    pub token: Option<TokenAmount>,
}

impl TxOutput {
    #[must_use]
    pub fn new(value: u64, script: Script) -> Self {
        Self {
            value,
            script,
            token: None,
        }
    }

    #[must_use]
    pub fn with_token(value: u64, script: Script, token: TokenAmount) -> Self {
        Self {
            value,
            script,
            token: Some(token),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub locktime: u64,
}

impl Transaction {
    #[must_use]
    pub fn new(version: u32, inputs: Vec<TxInput>, outputs: Vec<TxOutput>, locktime: u64) -> Self {
        Self {
            version,
            inputs,
            outputs,
            locktime,
        }
    }

    /// Builds a coinbase transaction: a single all-zero-outpoint input and
    /// the reward+fees outputs.
    #[must_use]
    pub fn coinbase(height: u64, outputs: Vec<TxOutput>) -> Self {
        let mut input = TxInput::new(OutPoint::coinbase_marker());
        // height is embedded in the otherwise-unused signature_script field,
        // the way BIP-34 embeds height to keep coinbase tx hashes unique.
        input.signature_script = height.to_le_bytes().to_vec();
        Self {
            version: 1,
            inputs: vec![input],
            outputs,
            locktime: 0,
        }
    }

    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase_input()
    }

    /// Canonical signing bytes: excludes `signature_script`/`witness_pubkey`
    /// so the hash (and thus `TxId`) is stable across signing, per spec §3
    /// and the `signing_bytes(tx) == signing_bytes(sign(tx))` law in §8.
    #[must_use]
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            buf.extend_from_slice(input.prev_outpoint.txid.as_bytes());
            buf.extend_from_slice(&input.prev_outpoint.vout.to_le_bytes());
        }
        buf.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            buf.extend_from_slice(&output.value.to_le_bytes());
            if let Some(token) = output.token {
                buf.push(1);
                buf.extend_from_slice(&token.token_id.to_le_bytes());
                buf.extend_from_slice(&token.amount.to_le_bytes());
            } else {
                buf.push(0);
            }
            buf.push(output.script.script_type.as_u8());
            buf.extend_from_slice(&(output.script.data.len() as u32).to_le_bytes());
            buf.extend_from_slice(&output.script.data);
        }
        buf.extend_from_slice(&self.locktime.to_le_bytes());
        buf
    }

    #[must_use]
    pub fn hash(&self) -> Hash256 {
        Hash256::blake3(&self.signing_bytes())
    }

    /// Signs every non-coinbase input with the same keypair (single-owner
    /// convenience; multi-key signing composes this per input).
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn sign_all(&mut self, keypair: &shared::KeyPair) -> BondResult<()> {
        let digest = self.hash();
        let signature = keypair
            .sign(digest.as_bytes())
            .map_err(|e| BondError::Crypto(e.to_string()))?;
        for input in &mut self.inputs {
            if input.is_coinbase_input() {
                continue;
            }
            input.signature_script = signature.as_bytes().to_vec();
            input.witness_pubkey = keypair.public_key.as_bytes().to_vec();
        }
        Ok(())
    }

    /// Context-free structural validation, per spec §4.2. Does not touch
    /// chain state.
    ///
    /// # Errors
    ///
    /// Returns the first failed check.
    pub fn validate_context_free(&self, max_script_data: usize) -> BondResult<()> {
        if self.version == 0 {
            return Err(BondError::InvalidTransaction("unrecognized version".into()));
        }
        if self.inputs.is_empty() {
            return Err(BondError::InvalidTransaction("no inputs".into()));
        }
        if self.outputs.is_empty() {
            return Err(BondError::InvalidTransaction("no outputs".into()));
        }
        if self.inputs.len() > MAX_TX_INPUTS {
            return Err(BondError::InvalidTransaction("too many inputs".into()));
        }
        if self.outputs.len() > MAX_TX_OUTPUTS {
            return Err(BondError::InvalidTransaction("too many outputs".into()));
        }

        let is_coinbase = self.is_coinbase();
        if !is_coinbase {
            let mut seen = std::collections::HashSet::new();
            for input in &self.inputs {
                if input.is_coinbase_input() {
                    return Err(BondError::InvalidTransaction(
                        "coinbase marker input in non-coinbase tx".into(),
                    ));
                }
                if !seen.insert(input.prev_outpoint) {
                    return Err(BondError::InvalidTransaction("duplicate input".into()));
                }
            }
        }

        for output in &self.outputs {
            if output.value == 0 && output.token.is_none() {
                return Err(BondError::InvalidTransaction(
                    "zero-value output without token amount".into(),
                ));
            }
            if output.script.data.len() > max_script_data {
                return Err(BondError::InvalidTransaction("script data too large".into()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Script;

    fn sample_output() -> TxOutput {
        let keypair = shared::KeyPair::generate();
        let addr = keypair.public_key.to_address();
        TxOutput::new(1000, Script::p2pkh(&addr))
    }

    #[test]
    fn signing_bytes_stable_across_signing() {
        let mut tx = Transaction::new(
            1,
            vec![TxInput::new(OutPoint::new(Hash256::blake3(b"prev"), 0))],
            vec![sample_output()],
            0,
        );
        let before = tx.signing_bytes();
        let keypair = shared::KeyPair::generate();
        tx.sign_all(&keypair).unwrap();
        let after = tx.signing_bytes();
        assert_eq!(before, after);
    }

    #[test]
    fn coinbase_detection() {
        let tx = Transaction::coinbase(10, vec![sample_output()]);
        assert!(tx.is_coinbase());
    }

    #[test]
    fn rejects_duplicate_inputs() {
        let outpoint = OutPoint::new(Hash256::blake3(b"prev"), 0);
        let tx = Transaction::new(
            1,
            vec![TxInput::new(outpoint), TxInput::new(outpoint)],
            vec![sample_output()],
            0,
        );
        assert!(tx.validate_context_free(65536).is_err());
    }

    #[test]
    fn rejects_zero_value_output_without_token() {
        let keypair = shared::KeyPair::generate();
        let addr = keypair.public_key.to_address();
        let tx = Transaction::new(
            1,
            vec![TxInput::new(OutPoint::new(Hash256::blake3(b"prev"), 0))],
            vec![TxOutput::new(0, Script::p2pkh(&addr))],
            0,
        );
        assert!(tx.validate_context_free(65536).is_err());
    }

    #[test]
    fn zero_value_with_token_is_allowed() {
        let keypair = shared::KeyPair::generate();
        let addr = keypair.public_key.to_address();
        let tx = Transaction::new(
            1,
            vec![TxInput::new(OutPoint::new(Hash256::blake3(b"prev"), 0))],
            vec![TxOutput::with_token(
                0,
                Script::p2pkh(&addr),
                TokenAmount {
                    token_id: 1,
                    amount: 500,
                },
            )],
            0,
        );
        assert!(tx.validate_context_free(65536).is_ok());
    }
}
