//! Tipos compartilhados entre módulos do Aevum & Bond

use serde::{Deserialize, Serialize};

/// Alias para valor monetário (satoshis)
pub type Amount = u64;

/// Alias para timestamp Unix
pub type Timestamp = i64;

/// Alias para altura do bloco na blockchain
pub type BlockHeight = u64;

/// Network configurations for different environments
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkType {
    /// Main production network
    Mainnet,
    /// Test network
    Testnet,
    /// Local development network
    #[default]
    Devnet,
    /// Regression network for testing
    Regtest,
}

impl NetworkType {
    /// Rendezvous/DHT namespace suffix, e.g. `klingnet/mainnet`.
    #[must_use]
    pub const fn network_id(self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Devnet => "devnet",
            Self::Regtest => "regtest",
        }
    }
}

/// Base units per coin, per spec §6.
pub const BASE_UNITS_PER_COIN: u64 = 1_000_000_000_000;

/// Parses a decimal amount string (up to 12 fractional digits) into base units.
///
/// # Errors
///
/// Returns an error if the string has more than 12 fractional digits, is not
/// valid decimal, or overflows a `u64`.
pub fn parse_amount(input: &str) -> crate::Result<Amount> {
    let (int_part, frac_part) = match input.split_once('.') {
        Some((i, f)) => (i, f),
        None => (input, ""),
    };
    if frac_part.len() > 12 {
        return Err(crate::BlockchainError::InvalidTransaction(format!(
            "amount {input} has more than 12 fractional digits"
        )));
    }
    let int_value: u64 = int_part
        .parse()
        .map_err(|_| crate::BlockchainError::InvalidTransaction(format!("bad amount {input}")))?;
    let mut frac_digits = frac_part.to_string();
    while frac_digits.len() < 12 {
        frac_digits.push('0');
    }
    let frac_value: u64 = if frac_digits.is_empty() {
        0
    } else {
        frac_digits
            .parse()
            .map_err(|_| crate::BlockchainError::InvalidTransaction(format!("bad amount {input}")))?
    };
    int_value
        .checked_mul(BASE_UNITS_PER_COIN)
        .and_then(|whole| whole.checked_add(frac_value))
        .ok_or_else(|| crate::BlockchainError::InvalidTransaction(format!("amount {input} overflows u64")))
}

/// Formats base units as a decimal amount string with up to 12 fractional digits
/// (trailing zeros trimmed), the inverse of [`parse_amount`].
#[must_use]
pub fn format_amount(amount: Amount) -> String {
    let whole = amount / BASE_UNITS_PER_COIN;
    let frac = amount % BASE_UNITS_PER_COIN;
    if frac == 0 {
        return whole.to_string();
    }
    let frac_str = format!("{frac:012}");
    let trimmed = frac_str.trim_end_matches('0');
    format!("{whole}.{trimmed}")
}

/// Protocol-wide numeric parameters, per spec §6/§8 and the defaults named
/// throughout §4. Overridable per network for test chains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolParams {
    pub coinbase_maturity: BlockHeight,
    pub unstake_cooldown: BlockHeight,
    pub validator_stake: Amount,
    pub base_block_reward: Amount,
    pub block_time_seconds: u64,
    pub max_block_txs: usize,
    pub max_block_signing_bytes: usize,
    pub max_tx_inputs: usize,
    pub max_tx_outputs: usize,
    pub max_script_data_bytes: usize,
    pub mempool_capacity: usize,
    pub min_fee_rate: Amount,
    pub max_supply: Amount,
    pub halving_interval: BlockHeight,
    pub sub_chain_min_deposit: Amount,
    pub sub_chain_max_depth: u32,
    pub sub_chain_max_per_parent: usize,
    pub token_creation_fee: Amount,
    pub ban_threshold: u32,
    pub penalty_invalid_block: u32,
    pub penalty_invalid_tx: u32,
    pub penalty_handshake_fail: u32,
    pub heartbeat_freshness_seconds: i64,
    pub min_protocol_version: u32,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            coinbase_maturity: 20,
            unstake_cooldown: 20,
            validator_stake: 0,
            base_block_reward: 50 * BASE_UNITS_PER_COIN,
            block_time_seconds: 3,
            max_block_txs: 500,
            max_block_signing_bytes: 2 * 1024 * 1024,
            max_tx_inputs: 2500,
            max_tx_outputs: 2500,
            max_script_data_bytes: 64 * 1024,
            mempool_capacity: 5000,
            min_fee_rate: 1,
            max_supply: 21_000_000 * BASE_UNITS_PER_COIN,
            halving_interval: 0,
            sub_chain_min_deposit: 1_000 * BASE_UNITS_PER_COIN,
            sub_chain_max_depth: 1,
            sub_chain_max_per_parent: 16,
            token_creation_fee: 100 * BASE_UNITS_PER_COIN,
            ban_threshold: 100,
            penalty_invalid_block: 50,
            penalty_invalid_tx: 20,
            penalty_handshake_fail: 100,
            heartbeat_freshness_seconds: 60,
            min_protocol_version: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_amount_round_trips() {
        for n in [0u64, 1, 1_000_000_000_000, u64::MAX] {
            let formatted = format_amount(n);
            assert_eq!(parse_amount(&formatted).unwrap(), n);
        }
    }

    #[test]
    fn parse_amount_smallest_unit() {
        assert_eq!(parse_amount("0.000000000001").unwrap(), 1);
    }

    #[test]
    fn parse_amount_rejects_too_many_fractional_digits() {
        assert!(parse_amount("1.0000000000001").is_err());
    }

    #[test]
    fn parse_amount_rejects_overflow() {
        assert!(parse_amount("99999999999999999999").is_err());
    }
}
