// reach-core/src/hashing.rs
// ============================================================================
// Module: Canonical Hasher
// Description: RFC 8785 JSON canonicalization and content hashing utilities.
// Purpose: Provide deterministic hashes for manifests, lockfiles, and evidence.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Every component that fingerprints a value — manifests, lockfiles, baselines,
//! proof hashes — goes through this module. Values are serialized with RFC 8785
//! (JCS) canonical JSON before hashing, so object key order never affects the
//! digest: two implementations serializing the same logical value always agree.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Hash Algorithm
// ============================================================================

/// Supported hash algorithms for Reach artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256 hashing (the default and only algorithm honored today).
    Sha256,
}

/// Default hash algorithm for Reach.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

// ============================================================================
// SECTION: Hash Digest
// ============================================================================

/// Deterministic content hash representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashDigest {
    /// Hash algorithm identifier.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex-encoded digest bytes.
    pub value: String,
}

impl HashDigest {
    /// Creates a new digest from raw bytes.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm, bytes: &[u8]) -> Self {
        Self {
            algorithm,
            value: hex_encode(bytes),
        }
    }

    /// Returns the digest value truncated to the given number of hex characters.
    ///
    /// Used by proof-hash generation, which stores only the first 16 hex
    /// characters of the canonical hash.
    #[must_use]
    pub fn truncated(&self, chars: usize) -> String {
        self.value.chars().take(chars).collect()
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when computing canonical hashes.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

// ============================================================================
// SECTION: Hashing Helpers
// ============================================================================

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Hashes canonical JSON using the provided algorithm.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn hash_canonical_json<T: Serialize + ?Sized>(
    algorithm: HashAlgorithm,
    value: &T,
) -> Result<HashDigest, HashError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(hash_bytes(algorithm, &bytes))
}

/// Hashes canonical JSON with the default algorithm.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn hash_canonical<T: Serialize + ?Sized>(value: &T) -> Result<HashDigest, HashError> {
    hash_canonical_json(DEFAULT_HASH_ALGORITHM, value)
}

/// Hashes raw bytes using the provided algorithm.
#[must_use]
pub fn hash_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> HashDigest {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            let digest = hasher.finalize();
            HashDigest::new(HashAlgorithm::Sha256, &digest)
        }
    }
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]
mod tests {
    use super::DEFAULT_HASH_ALGORITHM;
    use super::hash_canonical;
    use super::hash_canonical_json;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_hash() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        let hash_a = hash_canonical(&a).unwrap();
        let hash_b = hash_canonical(&b).unwrap();
        assert_eq!(hash_a, hash_b);
    }

    #[test]
    fn nested_key_order_does_not_affect_hash() {
        let a = json!({"outer": {"z": 1, "y": 2}, "list": [1, 2, 3]});
        let b = json!({"list": [1, 2, 3], "outer": {"y": 2, "z": 1}});
        assert_eq!(hash_canonical(&a).unwrap(), hash_canonical(&b).unwrap());
    }

    #[test]
    fn array_order_changes_hash() {
        let a = json!([1, 2, 3]);
        let b = json!([3, 2, 1]);
        assert_ne!(hash_canonical(&a).unwrap(), hash_canonical(&b).unwrap());
    }

    #[test]
    fn digest_is_stable_across_calls() {
        let value = json!({"k": "v", "n": 42});
        let first = hash_canonical_json(DEFAULT_HASH_ALGORITHM, &value).unwrap();
        let second = hash_canonical_json(DEFAULT_HASH_ALGORITHM, &value).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.value.len(), 64);
    }

    #[test]
    fn truncated_returns_prefix() {
        let digest = hash_canonical(&json!({"a": 1})).unwrap();
        assert_eq!(digest.truncated(16).len(), 16);
        assert!(digest.value.starts_with(&digest.truncated(16)));
    }
}
