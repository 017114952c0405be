//! Typed output scripts.
//!
//! Smart-contract execution is explicitly out of scope, so scripts here are
//! a closed, tagged set rather than a general-purpose program: `{type, data}`
//! per spec §3, with a small builder for ergonomics matching the rest of
//! this crate's construction style.

use crate::error::{BondError, BondResult};
use serde::{Deserialize, Serialize};

/// Maximum script payload size (64 KiB), per spec §3.
pub const MAX_SCRIPT_DATA_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ScriptType {
    P2pkh = 0,
    Stake = 1,
    Registration = 2,
    TokenMint = 3,
    TokenTransfer = 4,
    TimeLock = 5,
}

impl ScriptType {
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::P2pkh),
            1 => Some(Self::Stake),
            2 => Some(Self::Registration),
            3 => Some(Self::TokenMint),
            4 => Some(Self::TokenTransfer),
            5 => Some(Self::TimeLock),
            _ => None,
        }
    }
}

/// `{type, data}` output script. `data` carries type-specific payload:
/// 20-byte address for `P2pkh`, 32-byte validator pubkey for `Stake`,
/// registration JSON for `Registration`, token metadata for the token
/// variants, and `unlock_height_le8 ∥ inner script bytes` for `TimeLock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub script_type: ScriptType,
    pub data: Vec<u8>,
}

impl Script {
    /// # Errors
    ///
    /// Returns an error if `data` exceeds [`MAX_SCRIPT_DATA_BYTES`].
    pub fn new(script_type: ScriptType, data: Vec<u8>) -> BondResult<Self> {
        if data.len() > MAX_SCRIPT_DATA_BYTES {
            return Err(BondError::Script(format!(
                "script data {} bytes exceeds max {}",
                data.len(),
                MAX_SCRIPT_DATA_BYTES
            )));
        }
        Ok(Self { script_type, data })
    }

    #[must_use]
    pub fn p2pkh(address: &shared::Address) -> Self {
        Self {
            script_type: ScriptType::P2pkh,
            data: address.as_bytes().to_vec(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if this is not a well-formed `P2pkh` script.
    pub fn p2pkh_address(&self) -> BondResult<[u8; 20]> {
        if self.script_type != ScriptType::P2pkh || self.data.len() != 20 {
            return Err(BondError::Script("not a well-formed P2PKH script".into()));
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&self.data);
        Ok(out)
    }

    #[must_use]
    pub fn stake(validator_pubkey: &[u8; 32]) -> Self {
        Self {
            script_type: ScriptType::Stake,
            data: validator_pubkey.to_vec(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if this is not a `Stake` script with a 32-byte payload.
    pub fn stake_pubkey(&self) -> BondResult<[u8; 32]> {
        if self.script_type != ScriptType::Stake || self.data.len() != 32 {
            return Err(BondError::Script("not a well-formed Stake script".into()));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.data);
        Ok(out)
    }

    #[must_use]
    pub fn registration(data_json: &[u8]) -> Self {
        Self {
            script_type: ScriptType::Registration,
            data: data_json.to_vec(),
        }
    }

    #[must_use]
    pub fn time_lock(unlock_height: u64, inner: &Script) -> Self {
        let mut data = unlock_height.to_le_bytes().to_vec();
        data.push(inner.script_type.as_u8());
        data.extend_from_slice(&inner.data);
        Self {
            script_type: ScriptType::TimeLock,
            data,
        }
    }

    /// Unpacks a `TimeLock` script into `(unlock_height, inner)`.
    ///
    /// # Errors
    ///
    /// Returns an error if this is not a well-formed `TimeLock` script.
    pub fn unwrap_time_lock(&self) -> BondResult<(u64, Script)> {
        if self.script_type != ScriptType::TimeLock || self.data.len() < 9 {
            return Err(BondError::Script("not a well-formed TimeLock script".into()));
        }
        let mut height_bytes = [0u8; 8];
        height_bytes.copy_from_slice(&self.data[..8]);
        let unlock_height = u64::from_le_bytes(height_bytes);
        let inner_type = ScriptType::from_u8(self.data[8])
            .ok_or_else(|| BondError::Script("unknown inner script type".into()))?;
        let inner = Script {
            script_type: inner_type,
            data: self.data[9..].to_vec(),
        };
        Ok((unlock_height, inner))
    }

    #[must_use]
    pub fn is_spendable_output(&self) -> bool {
        self.script_type != ScriptType::Registration
    }
}

/// Builder for the less trivially-constructed script variants.
#[derive(Debug, Default)]
pub struct ScriptBuilder {
    script_type: Option<ScriptType>,
    data: Vec<u8>,
}

impl ScriptBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn script_type(mut self, script_type: ScriptType) -> Self {
        self.script_type = Some(script_type);
        self
    }

    #[must_use]
    pub fn token(mut self, token_id: u64, amount: u64) -> Self {
        self.data.extend_from_slice(&token_id.to_le_bytes());
        self.data.extend_from_slice(&amount.to_le_bytes());
        self
    }

    #[must_use]
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.data.extend_from_slice(bytes);
        self
    }

    /// # Errors
    ///
    /// Returns an error if no `script_type` was set or the data exceeds the
    /// size limit.
    pub fn build(self) -> BondResult<Script> {
        let script_type = self
            .script_type
            .ok_or_else(|| BondError::Script("script type not set".into()))?;
        Script::new(script_type, self.data)
    }
}

/// Token metadata embedded in `TokenMint`/`TokenTransfer` script data:
/// `token_id_le8 ∥ amount_le8`.
#[must_use]
pub fn decode_token_data(data: &[u8]) -> Option<(u64, u64)> {
    if data.len() < 16 {
        return None;
    }
    let mut id_bytes = [0u8; 8];
    let mut amount_bytes = [0u8; 8];
    id_bytes.copy_from_slice(&data[..8]);
    amount_bytes.copy_from_slice(&data[8..16]);
    Some((u64::from_le_bytes(id_bytes), u64::from_le_bytes(amount_bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p2pkh_round_trip() {
        let keypair = shared::KeyPair::generate();
        let addr = keypair.public_key.to_address();
        let script = Script::p2pkh(&addr);
        assert_eq!(script.p2pkh_address().unwrap(), *addr.as_bytes());
    }

    #[test]
    fn rejects_oversized_script_data() {
        let data = vec![0u8; MAX_SCRIPT_DATA_BYTES + 1];
        assert!(Script::new(ScriptType::Registration, data).is_err());
    }

    #[test]
    fn time_lock_round_trip() {
        let keypair = shared::KeyPair::generate();
        let addr = keypair.public_key.to_address();
        let inner = Script::p2pkh(&addr);
        let locked = Script::time_lock(500, &inner);
        let (height, unwrapped) = locked.unwrap_time_lock().unwrap();
        assert_eq!(height, 500);
        assert_eq!(unwrapped, inner);
    }

    #[test]
    fn registration_is_not_spendable() {
        let script = Script::registration(b"{}");
        assert!(!script.is_spendable_output());
    }

    #[test]
    fn token_builder_round_trip() {
        let script = ScriptBuilder::new()
            .script_type(ScriptType::TokenMint)
            .token(7, 5000)
            .build()
            .unwrap();
        assert_eq!(decode_token_data(&script.data), Some((7, 5000)));
    }
}
