//! Handshake protocol `/klingnet/handshake/1.0.0`, per spec §4.7: every
//! new outbound connection opens a handshake stream exchanging
//! `{protocol_version, genesis_hash, network_id, best_height}`; failure is
//! an instant ban. Built on libp2p 0.53's `request_response::json`
//! behaviour, following the teacher's serde-message-over-libp2p pattern
//! from the old `src/network.rs` gossip payloads, generalized to
//! request/response.

use libp2p::request_response::{self, ProtocolSupport};
use libp2p::StreamProtocol;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const PROTOCOL: StreamProtocol = StreamProtocol::new("/klingnet/handshake/1.0.0");
pub const MAX_MESSAGE_BYTES: usize = 4 * 1024;
pub const TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeMessage {
    pub protocol_version: u32,
    pub genesis_hash: [u8; 32],
    pub network_id: String,
    pub best_height: u64,
}

pub type Behaviour = request_response::json::Behaviour<HandshakeMessage, HandshakeMessage>;

#[must_use]
pub fn new_behaviour() -> Behaviour {
    request_response::json::Behaviour::new(
        [(PROTOCOL, ProtocolSupport::Full)],
        request_response::Config::default().with_request_timeout(Duration::from_secs(TIMEOUT_SECONDS)),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeFailure {
    GenesisMismatch,
    ProtocolTooOld,
    MessageTooLarge,
}

impl std::fmt::Display for HandshakeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GenesisMismatch => write!(f, "genesis hash mismatch"),
            Self::ProtocolTooOld => write!(f, "protocol version below minimum"),
            Self::MessageTooLarge => write!(f, "handshake message exceeds 4 KiB cap"),
        }
    }
}

/// Validates a remote's handshake message against local expectations, per
/// spec §4.7's two validation rules. Any failure is an instant-ban
/// condition for the caller (`PenaltyHandshakeFail = 100`).
///
/// # Errors
///
/// Returns the first violated rule.
pub fn validate(local: &HandshakeMessage, remote: &HandshakeMessage, min_protocol_version: u32) -> Result<(), HandshakeFailure> {
    if serde_json::to_vec(remote).map(|b| b.len()).unwrap_or(usize::MAX) > MAX_MESSAGE_BYTES {
        return Err(HandshakeFailure::MessageTooLarge);
    }
    if remote.genesis_hash != local.genesis_hash {
        return Err(HandshakeFailure::GenesisMismatch);
    }
    if remote.protocol_version < min_protocol_version {
        return Err(HandshakeFailure::ProtocolTooOld);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(genesis: [u8; 32], version: u32) -> HandshakeMessage {
        HandshakeMessage {
            protocol_version: version,
            genesis_hash: genesis,
            network_id: "testnet".into(),
            best_height: 10,
        }
    }

    #[test]
    fn matching_genesis_and_version_passes() {
        let local = message([1u8; 32], 1);
        let remote = message([1u8; 32], 1);
        assert!(validate(&local, &remote, 1).is_ok());
    }

    #[test]
    fn genesis_mismatch_fails() {
        let local = message([1u8; 32], 1);
        let remote = message([2u8; 32], 1);
        assert_eq!(validate(&local, &remote, 1), Err(HandshakeFailure::GenesisMismatch));
    }

    #[test]
    fn protocol_version_below_minimum_fails() {
        let local = message([1u8; 32], 1);
        let remote = message([1u8; 32], 0);
        assert_eq!(validate(&local, &remote, 1), Err(HandshakeFailure::ProtocolTooOld));
    }
}
