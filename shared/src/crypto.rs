//! Assinaturas Schnorr sobre secp256k1 para o núcleo da blockchain.

use crate::{BlockchainError, Hash256, Result};
use secp256k1::{rand, schnorr, Keypair, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Algoritmos de assinatura suportados
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    SchnorrSecp256k1,
}

/// Chave pública x-only (33 bytes comprimidos na fiação, 32 bytes internos Schnorr)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    key_data: [u8; 32],
}

/// Chave privada secp256k1. Zeroed on drop.
#[derive(Debug, Clone)]
pub struct PrivateKey {
    key_data: [u8; 32],
}

/// Par de chaves secp256k1
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

/// Assinatura Schnorr (64 bytes)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    data: [u8; 64],
    public_key: PublicKey,
    algorithm: SignatureAlgorithm,
}

impl PublicKey {
    /// Creates a public key from 32 raw x-only bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid curve point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(BlockchainError::InvalidKeySize {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut key_data = [0u8; 32];
        key_data.copy_from_slice(bytes);
        // validate it parses to a real point
        XOnlyPublicKey::from_slice(&key_data)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))?;
        Ok(Self { key_data })
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.key_data
    }

    #[must_use]
    pub const fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::SchnorrSecp256k1
    }

    fn to_xonly(self) -> XOnlyPublicKey {
        XOnlyPublicKey::from_slice(&self.key_data).expect("validated on construction")
    }

    /// Derives an [`crate::Address`] from this public key.
    #[must_use]
    pub fn to_address(self) -> crate::Address {
        // address derivation hashes the compressed 33-byte form; x-only keys
        // always have an even-y compressed encoding prefixed with 0x02.
        let mut compressed = [0u8; 33];
        compressed[0] = 0x02;
        compressed[1..].copy_from_slice(&self.key_data);
        crate::Address::from_pubkey_bytes(&compressed).expect("33 bytes by construction")
    }
}

impl PrivateKey {
    /// Creates a `PrivateKey` from raw bytes
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a valid scalar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(BlockchainError::InvalidKeySize {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut key_data = [0u8; 32];
        key_data.copy_from_slice(bytes);
        secp256k1::SecretKey::from_slice(&key_data)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))?;
        Ok(Self { key_data })
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.key_data
    }

    fn to_keypair(&self, secp: &Secp256k1<secp256k1::All>) -> Keypair {
        let secret = secp256k1::SecretKey::from_slice(&self.key_data).expect("validated");
        Keypair::from_secret_key(secp, &secret)
    }
}

impl KeyPair {
    /// Generates a new random keypair.
    #[must_use]
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let keypair = Keypair::new(&secp, &mut rand::thread_rng());
        let secret = keypair.secret_key();
        let (xonly, _parity) = keypair.x_only_public_key();
        Self {
            public_key: PublicKey {
                key_data: xonly.serialize(),
            },
            private_key: PrivateKey {
                key_data: secret.secret_bytes(),
            },
        }
    }

    /// Rebuilds a keypair from a raw 32-byte secp256k1 private scalar,
    /// deriving the corresponding x-only public key.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not a valid secp256k1 scalar.
    pub fn from_private_key(bytes: &[u8]) -> Result<Self> {
        let private_key = PrivateKey::from_bytes(bytes)?;
        let secp = Secp256k1::new();
        let keypair = private_key.to_keypair(&secp);
        let (xonly, _parity) = keypair.x_only_public_key();
        Ok(Self {
            public_key: PublicKey {
                key_data: xonly.serialize(),
            },
            private_key,
        })
    }

    /// Signs a message with Schnorr-secp256k1.
    ///
    /// # Errors
    ///
    /// Returns an error if `message` is not a valid 32-byte digest.
    pub fn sign(&self, message: &[u8]) -> Result<Signature> {
        let secp = Secp256k1::new();
        let keypair = self.private_key.to_keypair(&secp);
        let msg = Message::from_digest_slice(message)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))?;
        let sig = secp.sign_schnorr(&msg, &keypair);
        Ok(Signature {
            data: *sig.as_ref(),
            public_key: self.public_key,
            algorithm: SignatureAlgorithm::SchnorrSecp256k1,
        })
    }
}

impl Signature {
    /// Verifies the signature against a 32-byte message digest.
    ///
    /// # Errors
    ///
    /// Returns an error if `message` is not a valid digest.
    pub fn verify(&self, message: &[u8]) -> Result<bool> {
        let secp = Secp256k1::new();
        let msg = Message::from_digest_slice(message)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))?;
        let sig = schnorr::Signature::from_slice(&self.data)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))?;
        let xonly = self.public_key.to_xonly();
        Ok(secp.verify_schnorr(&sig, &msg, &xonly).is_ok())
    }

    #[must_use]
    pub const fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    #[must_use]
    pub const fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.data
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.data.len()
    }

    /// Rebuilds a signature from raw components (e.g. off the wire).
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is not 64 bytes.
    pub fn from_parts(data: &[u8], public_key: PublicKey) -> Result<Self> {
        if data.len() != 64 {
            return Err(BlockchainError::InvalidSignature);
        }
        let mut buf = [0u8; 64];
        buf.copy_from_slice(data);
        Ok(Self {
            data: buf,
            public_key,
            algorithm: SignatureAlgorithm::SchnorrSecp256k1,
        })
    }
}

impl Zeroize for PrivateKey {
    fn zeroize(&mut self) {
        self.key_data.zeroize();
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

/// Signs a transaction/block hash with the given keypair
///
/// # Errors
///
/// Returns error if signing fails
pub fn sign_hash(tx_hash: &Hash256, keypair: &KeyPair) -> Result<Signature> {
    keypair.sign(tx_hash.as_bytes())
}

/// Verifies a signature against a transaction/block hash
///
/// # Errors
///
/// Returns error if verification fails
pub fn verify_hash_signature(tx_hash: &Hash256, signature: &Signature) -> Result<bool> {
    signature.verify(tx_hash.as_bytes())
}

/// Creates a public key from raw bytes
///
/// # Errors
///
/// Returns error if the bytes are invalid
pub fn public_key_from_bytes(bytes: &[u8]) -> Result<PublicKey> {
    PublicKey::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let keypair = KeyPair::generate();
        let message = Hash256::blake3(b"klingnet");

        let signature = keypair.sign(message.as_bytes()).unwrap();
        assert!(signature.verify(message.as_bytes()).unwrap());
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let keypair = KeyPair::generate();
        let message = Hash256::blake3(b"klingnet");
        let other = Hash256::blake3(b"different");

        let signature = keypair.sign(message.as_bytes()).unwrap();
        assert!(!signature.verify(other.as_bytes()).unwrap());
    }

    #[test]
    fn public_key_derives_stable_address() {
        let keypair = KeyPair::generate();
        let a1 = keypair.public_key.to_address();
        let a2 = keypair.public_key.to_address();
        assert_eq!(a1, a2);
    }
}
