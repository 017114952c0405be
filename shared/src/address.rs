//! Endereços de conta derivados de chaves públicas secp256k1.

use crate::{BlockchainError, Result};
use bech32::{FromBase32, ToBase32, Variant};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 20-byte address: the first 20 bytes of BLAKE3(compressed 33-byte secp256k1 pubkey).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address([u8; 20]);

impl Address {
    /// Derives an address from a compressed secp256k1 public key (33 bytes).
    ///
    /// # Errors
    ///
    /// Returns an error if `pubkey` is not exactly 33 bytes.
    pub fn from_pubkey_bytes(pubkey: &[u8]) -> Result<Self> {
        if pubkey.len() != 33 {
            return Err(BlockchainError::InvalidKeySize {
                expected: 33,
                actual: pubkey.len(),
            });
        }
        let digest = blake3::hash(pubkey);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest.as_bytes()[..20]);
        Ok(Self(bytes))
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses either a 40-char hex string or a bech32 string with `hrp` prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if neither form decodes to exactly 20 bytes.
    pub fn parse(input: &str, hrp: &str) -> Result<Self> {
        if let Ok(bytes) = hex::decode(input) {
            if bytes.len() == 20 {
                let mut out = [0u8; 20];
                out.copy_from_slice(&bytes);
                return Ok(Self(out));
            }
        }
        Self::from_bech32(input, hrp)
    }

    #[must_use]
    pub fn to_bech32(&self, hrp: &str) -> String {
        bech32::encode(hrp, self.0.to_base32(), Variant::Bech32)
            .expect("hrp is always ASCII-lowercase and short enough")
    }

    fn from_bech32(input: &str, expected_hrp: &str) -> Result<Self> {
        let (hrp, data, variant) = bech32::decode(input)
            .map_err(|e| BlockchainError::SerializationError(e.to_string()))?;
        if hrp != expected_hrp || variant != Variant::Bech32 {
            return Err(BlockchainError::InvalidAddress(format!(
                "unexpected hrp {hrp}"
            )));
        }
        let bytes = Vec::<u8>::from_base32(&data)
            .map_err(|e| BlockchainError::SerializationError(e.to_string()))?;
        if bytes.len() != 20 {
            return Err(BlockchainError::InvalidAddress(
                "decoded address is not 20 bytes".to_string(),
            ));
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Bech32 human-readable prefixes per network, per spec §3/§6.
#[must_use]
pub const fn hrp_for_network(network: crate::types::NetworkType) -> &'static str {
    match network {
        crate::types::NetworkType::Mainnet => "kgx",
        _ => "tkgx",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pubkey() -> [u8; 33] {
        let mut pk = [2u8; 33];
        pk[0] = 0x02;
        pk
    }

    #[test]
    fn rejects_wrong_pubkey_length() {
        assert!(Address::from_pubkey_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn hex_round_trip() {
        let addr = Address::from_pubkey_bytes(&sample_pubkey()).unwrap();
        let hex = addr.to_hex();
        let parsed = Address::parse(&hex, "kgx").unwrap();
        assert_eq!(addr, parsed);
    }

    #[test]
    fn bech32_round_trip() {
        let addr = Address::from_pubkey_bytes(&sample_pubkey()).unwrap();
        let encoded = addr.to_bech32("kgx");
        assert!(encoded.starts_with("kgx1"));
        let parsed = Address::parse(&encoded, "kgx").unwrap();
        assert_eq!(addr, parsed);
    }

    #[test]
    fn bech32_wrong_hrp_rejected() {
        let addr = Address::from_pubkey_bytes(&sample_pubkey()).unwrap();
        let encoded = addr.to_bech32("tkgx");
        assert!(Address::parse(&encoded, "kgx").is_err());
    }
}
