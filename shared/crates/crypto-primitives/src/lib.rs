// Shared Cryptographic Primitives
// Hashing used by the evidence vault and the chain-of-custody ledger.

//! # Crypto Primitives
//!
//! General-purpose hashing used across the compliance core: evidence
//! digests and chain-of-custody entry hashes both build on the
//! primitives in this crate.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use blake3::Hasher as Blake3Hasher;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Hash computation failed: {0}")]
    HashFailed(String),
}

/// Hash algorithms supported by the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
    Blake3,
}

/// Cryptographic hash result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hash {
    pub algorithm: HashAlgorithm,
    pub bytes: Vec<u8>,
}

impl Hash {
    /// Create a new hash
    pub fn new(algorithm: HashAlgorithm, bytes: Vec<u8>) -> Self {
        Hash { algorithm, bytes }
    }

    /// Get hash as hex string
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

/// Hash data using specified algorithm
pub fn hash_data(data: &[u8], algorithm: HashAlgorithm) -> Result<Hash, CryptoError> {
    let bytes = match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(data);
            hasher.finalize().to_vec()
        }
        HashAlgorithm::Sha512 => {
            let mut hasher = Sha512::new();
            hasher.update(data);
            hasher.finalize().to_vec()
        }
        HashAlgorithm::Blake3 => {
            let mut hasher = Blake3Hasher::new();
            hasher.update(data);
            hasher.finalize().as_bytes().to_vec()
        }
    };

    Ok(Hash::new(algorithm, bytes))
}

/// SHA-256 digest of evidence bytes, as a lowercase hex string.
///
/// Used by the evidence vault on `put`/`verify` (§4.5): the digest is
/// recomputed from stored bytes and compared against the recorded value.
pub fn evidence_digest(bytes: &[u8]) -> String {
    hash_data(bytes, HashAlgorithm::Sha256)
        .expect("sha256 hashing cannot fail")
        .to_hex()
}

/// Compute the hash a chain-of-custody entry commits to: `(actor, action,
/// location, notes, timestamp, prev_hash)`, per §4.5. The caller supplies
/// an already-formatted timestamp so the hash is reproducible independent
/// of clock representation.
pub fn custody_entry_hash(
    actor: &str,
    action: &str,
    location: &str,
    notes: &str,
    timestamp_rfc3339: &str,
    prev_hash: &str,
) -> String {
    let mut buf = Vec::new();
    for field in [actor, action, location, notes, timestamp_rfc3339, prev_hash] {
        buf.extend_from_slice(field.as_bytes());
        buf.push(0u8);
    }
    evidence_digest(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_algorithms() {
        let data = b"test data";

        let sha256_hash = hash_data(data, HashAlgorithm::Sha256).unwrap();
        assert_eq!(sha256_hash.bytes.len(), 32);

        let sha512_hash = hash_data(data, HashAlgorithm::Sha512).unwrap();
        assert_eq!(sha512_hash.bytes.len(), 64);

        let blake3_hash = hash_data(data, HashAlgorithm::Blake3).unwrap();
        assert_eq!(blake3_hash.bytes.len(), 32);
    }

    #[test]
    fn test_evidence_digest_matches_sha256() {
        let digest = evidence_digest(b"hello");
        let expected = hash_data(b"hello", HashAlgorithm::Sha256).unwrap().to_hex();
        assert_eq!(digest, expected);
    }

    #[test]
    fn test_custody_entry_hash_is_sensitive_to_prev_hash() {
        let h1 = custody_entry_hash("alice", "collected", "lab-1", "", "2026-01-01T00:00:00Z", "genesis");
        let h2 = custody_entry_hash("alice", "collected", "lab-1", "", "2026-01-01T00:00:00Z", "different");
        assert_ne!(h1, h2);
    }
}
