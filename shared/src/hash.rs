use serde::{Deserialize, Serialize};
use std::fmt;

/// Hash de 256 bits usado para identificar blocos, transações e outros dados.
///
/// Computed as BLAKE3 over the serialized input; comparison is constant-length
/// byte equality (derived `PartialEq` on a fixed-size array already gives us that).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// Creates a zeroed hash
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Creates a hash from a 32-byte array
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of the hash
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Computes the BLAKE3 hash of the provided data
    #[must_use]
    pub fn blake3(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Computes a single BLAKE3-Merkle root over leaf hashes.
    ///
    /// Pairs are concatenated and re-hashed bottom-up; an odd trailing leaf is
    /// promoted unchanged to the next level (duplication-free, unlike the
    /// classic Bitcoin merkle tree).
    #[must_use]
    pub fn merkle_root(leaves: &[Self]) -> Self {
        if leaves.is_empty() {
            return Self::zero();
        }
        let mut level: Vec<Self> = leaves.to_vec();
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            let mut iter = level.chunks(2);
            while let Some(pair) = iter.next() {
                let combined = match pair {
                    [a, b] => {
                        let mut buf = [0u8; 64];
                        buf[..32].copy_from_slice(a.as_bytes());
                        buf[32..].copy_from_slice(b.as_bytes());
                        Self::blake3(&buf)
                    }
                    [a] => *a,
                    _ => unreachable!(),
                };
                next.push(combined);
            }
            level = next;
        }
        level[0]
    }

    /// Checks if the hash satisfies the specified difficulty
    /// (number of leading zero bits)
    #[must_use]
    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        self.leading_zeros() >= difficulty
    }

    /// Counts the number of leading zero bits in the hash
    #[must_use]
    pub fn leading_zeros(&self) -> u32 {
        let mut zeros = 0;
        for &byte in &self.0 {
            if byte == 0 {
                zeros += 8;
            } else {
                zeros += byte.leading_zeros();
                break;
            }
        }
        zeros
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl TryFrom<&str> for Hash256 {
    type Error = crate::BlockchainError;

    fn try_from(hex_string: &str) -> Result<Self, Self::Error> {
        let bytes = hex::decode(hex_string)
            .map_err(|e| crate::BlockchainError::SerializationError(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(crate::BlockchainError::InvalidHash);
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);
        Ok(Self(hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_creation_and_display() {
        let hash = Hash256::zero();
        assert_eq!(hash.to_string(), "0".repeat(64));
    }

    #[test]
    fn test_blake3_hashing() {
        let data = b"hello world";
        let hash = Hash256::blake3(data);
        assert_ne!(hash, Hash256::zero());
        // deterministic
        assert_eq!(hash, Hash256::blake3(data));
    }

    #[test]
    fn test_merkle_root_single_leaf() {
        let leaf = Hash256::blake3(b"only tx");
        assert_eq!(Hash256::merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn test_merkle_root_odd_count_is_deterministic() {
        let leaves = vec![
            Hash256::blake3(b"a"),
            Hash256::blake3(b"b"),
            Hash256::blake3(b"c"),
        ];
        let root1 = Hash256::merkle_root(&leaves);
        let root2 = Hash256::merkle_root(&leaves);
        assert_eq!(root1, root2);
        assert_ne!(root1, Hash256::zero());
    }

    #[test]
    fn test_difficulty_check() {
        let easy_hash = Hash256::from_bytes([
            0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
            0, 0, 0,
        ]);
        assert!(easy_hash.meets_difficulty(20));
        assert!(!easy_hash.meets_difficulty(40));
    }

    #[test]
    fn test_leading_zeros_count() {
        let hash = Hash256::from_bytes([
            0, 0, 0, 128, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
            0, 0, 0, 0,
        ]);
        assert_eq!(hash.leading_zeros(), 24);
    }
}
