// reach-core/src/lockfile.rs
// ============================================================================
// Module: Lockfile Manager
// Description: Serialize a resolved pack set with per-entry and aggregate
//              integrity hashes; detect tamper and drift against a live set.
// Purpose: Give a deployment a verifiable snapshot of exactly which pack
//          versions it was last known to run.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! A lockfile's `integrity_hash` covers every entry: it is computed by
//! sorting pack ids, canonically hashing each entry, and hashing the
//! concatenation of those digests. Reading a lockfile always recomputes this
//! hash and rejects the file on mismatch — a lockfile is either fully
//! trusted or not read at all.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::hashing::HashAlgorithm;
use crate::hashing::HashError;
use crate::hashing::hash_bytes;
use crate::hashing::hash_canonical;
use crate::identifiers::PackId;
use crate::loader::LoadedPack;
use crate::time::Timestamp;

/// Lockfile format version written by this implementation.
pub const LOCKFILE_FORMAT_VERSION: &str = "1";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while generating, writing, or reading a lockfile.
#[derive(Debug, Error)]
pub enum LockfileError {
    /// Canonical hashing of an entry or the aggregate failed.
    #[error(transparent)]
    Hash(#[from] HashError),
    /// The lockfile could not be read from or written to disk.
    #[error("lockfile I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The lockfile's JSON could not be parsed.
    #[error("failed to parse lockfile: {0}")]
    Parse(String),
    /// The recomputed aggregate hash did not match the stored one.
    #[error("lockfile integrity hash mismatch: expected {expected}, found {found}")]
    IntegrityMismatch {
        /// The freshly recomputed aggregate hash.
        expected: String,
        /// The hash recorded in the lockfile.
        found: String,
    },
}

// ============================================================================
// SECTION: Data model
// ============================================================================

/// Where a locked pack's content was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockSource {
    /// Resolved from a local search directory.
    Local,
    /// Resolved from an external registry.
    Registry,
}

/// A single locked pack entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    /// Locked pack id.
    pub id: PackId,
    /// Locked version string.
    pub version: String,
    /// Integrity hash of the manifest at lock time.
    pub hash: String,
    /// Ids of dependencies this entry was resolved against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<PackId>>,
    /// Where this entry's content came from.
    pub source: LockSource,
    /// Optional resolved content URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
}

/// A resolved, hash-verified snapshot of an entire pack set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lockfile {
    /// Lockfile format version.
    pub version: String,
    /// When this lockfile was generated.
    pub generated_at: Timestamp,
    /// Locked packages, keyed by pack id.
    pub packages: BTreeMap<PackId, LockEntry>,
    /// Aggregate integrity hash over every entry.
    pub integrity_hash: String,
}

/// A discrepancy between a lockfile and a live loaded-pack set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockMismatch {
    /// A loaded pack has no corresponding lockfile entry.
    PackUnlocked {
        /// The unlocked pack's id.
        id: PackId,
    },
    /// The locked and loaded versions disagree.
    VersionMismatch {
        /// Affected pack id.
        id: PackId,
        /// Version recorded in the lockfile.
        locked: String,
        /// Version currently loaded.
        loaded: String,
    },
    /// The locked and loaded integrity hashes disagree.
    HashMismatch {
        /// Affected pack id.
        id: PackId,
        /// Hash recorded in the lockfile.
        locked: String,
        /// Hash currently computed for the loaded pack.
        loaded: String,
    },
}

// ============================================================================
// SECTION: Aggregate hashing
// ============================================================================

/// Computes the aggregate integrity hash over a sorted entry map.
///
/// # Errors
///
/// Returns [`HashError`] if any entry fails to canonicalize.
fn compute_aggregate_hash(packages: &BTreeMap<PackId, LockEntry>) -> Result<String, HashError> {
    let mut concatenated = Vec::new();
    for (id, entry) in packages {
        let _ = id;
        let digest = hash_canonical(entry)?;
        concatenated.extend_from_slice(digest.value.as_bytes());
    }
    Ok(hash_bytes(HashAlgorithm::Sha256, &concatenated).value)
}

// ============================================================================
// SECTION: Operations
// ============================================================================

/// Builds a lockfile from an enabled, loaded pack set.
///
/// Disabled packs (no manifest, or excluded from the load order) are not
/// locked.
///
/// # Errors
///
/// Returns [`LockfileError::Hash`] if any entry or the aggregate fails to
/// canonicalize.
pub fn generate_from(
    loaded_packs: &[LoadedPack],
    generated_at: Timestamp,
) -> Result<Lockfile, LockfileError> {
    let mut packages = BTreeMap::new();
    for pack in loaded_packs {
        if pack.disabled {
            continue;
        }
        let Some(manifest) = &pack.manifest else { continue };
        let Some(hash) = &pack.integrity_hash else { continue };
        let dependencies = manifest.dependencies.as_ref().map(|deps| {
            let mut ids: Vec<PackId> = deps.iter().map(|d| d.id.clone()).collect();
            ids.sort();
            ids
        });
        packages.insert(
            manifest.metadata.id.clone(),
            LockEntry {
                id: manifest.metadata.id.clone(),
                version: manifest.metadata.version.clone(),
                hash: hash.clone(),
                dependencies,
                source: LockSource::Local,
                resolved: None,
            },
        );
    }
    let integrity_hash = compute_aggregate_hash(&packages)?;
    Ok(Lockfile { version: LOCKFILE_FORMAT_VERSION.to_string(), generated_at, packages, integrity_hash })
}

/// Writes a lockfile to `path` as pretty-printed JSON.
///
/// # Errors
///
/// Returns [`LockfileError::Io`] if the file cannot be written.
pub fn write(lockfile: &Lockfile, path: &Path) -> Result<(), LockfileError> {
    let json = serde_json::to_string_pretty(lockfile)
        .map_err(|err| LockfileError::Parse(err.to_string()))?;
    fs::write(path, json)?;
    Ok(())
}

/// Reads a lockfile from `path`, recomputing and verifying its integrity hash.
///
/// # Errors
///
/// Returns [`LockfileError::Io`] if the file cannot be read,
/// [`LockfileError::Parse`] if the JSON is malformed, or
/// [`LockfileError::IntegrityMismatch`] if the recomputed hash disagrees.
pub fn read(path: &Path) -> Result<Lockfile, LockfileError> {
    let bytes = fs::read(path)?;
    let lockfile: Lockfile =
        serde_json::from_slice(&bytes).map_err(|err| LockfileError::Parse(err.to_string()))?;
    let expected = compute_aggregate_hash(&lockfile.packages)?;
    if expected == lockfile.integrity_hash {
        Ok(lockfile)
    } else {
        Err(LockfileError::IntegrityMismatch { expected, found: lockfile.integrity_hash })
    }
}

/// Compares a lockfile against a live loaded-pack set, reporting every
/// discrepancy found.
#[must_use]
pub fn check_consistency(lockfile: &Lockfile, loaded_packs: &[LoadedPack]) -> Vec<LockMismatch> {
    let mut mismatches = Vec::new();
    for pack in loaded_packs {
        if pack.disabled {
            continue;
        }
        let Some(manifest) = &pack.manifest else { continue };
        let Some(hash) = &pack.integrity_hash else { continue };
        let id = &manifest.metadata.id;
        match lockfile.packages.get(id) {
            None => mismatches.push(LockMismatch::PackUnlocked { id: id.clone() }),
            Some(entry) => {
                if entry.version != manifest.metadata.version {
                    mismatches.push(LockMismatch::VersionMismatch {
                        id: id.clone(),
                        locked: entry.version.clone(),
                        loaded: manifest.metadata.version.clone(),
                    });
                }
                if &entry.hash != hash {
                    mismatches.push(LockMismatch::HashMismatch {
                        id: id.clone(),
                        locked: entry.hash.clone(),
                        loaded: hash.clone(),
                    });
                }
            }
        }
    }
    mismatches
}

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
    use super::*;
    use crate::identifiers::ToolName;
    use crate::manifest::PackManifest;
    use crate::manifest::PackMetadata;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn loaded_pack(id: &str, version: &str, hash: &str) -> LoadedPack {
        LoadedPack {
            manifest: Some(PackManifest {
                schema_version: "1.0.0".to_string(),
                metadata: PackMetadata {
                    id: PackId::new(id),
                    version: version.to_string(),
                    name: id.to_string(),
                    description: None,
                    author: None,
                    license: None,
                    created: None,
                },
                declared_tools: vec![ToolName::new("noop")],
                declared_permissions: vec![],
                model_requirements: None,
                execution_graph: None,
                deterministic: true,
                dependencies: None,
                exports: None,
                entry_point: None,
                signature_hash: None,
            }),
            source_path: PathBuf::from("/packs").join(id),
            integrity_hash: Some(hash.to_string()),
            disabled: false,
            error: None,
        }
    }

    #[test]
    fn generate_then_read_round_trips() {
        let tmp = TempDir::new().unwrap();
        let packs = vec![loaded_pack("pack-a", "1.0.0", &"a".repeat(64))];
        let lockfile = generate_from(&packs, Timestamp::from_millis(0)).unwrap();
        let path = tmp.path().join("reach-lock.json");
        write(&lockfile, &path).unwrap();
        let read_back = read(&path).unwrap();
        assert_eq!(read_back.integrity_hash, lockfile.integrity_hash);
        assert_eq!(read_back.packages.len(), 1);
    }

    #[test]
    fn tampered_hash_is_rejected_on_read() {
        let tmp = TempDir::new().unwrap();
        let packs = vec![loaded_pack("pack-a", "1.0.0", &"a".repeat(64))];
        let lockfile = generate_from(&packs, Timestamp::from_millis(0)).unwrap();
        let path = tmp.path().join("reach-lock.json");
        write(&lockfile, &path).unwrap();

        let mut raw = fs::read_to_string(&path).unwrap();
        raw = raw.replacen(&"a".repeat(64), &"b".repeat(64), 1);
        fs::write(&path, raw).unwrap();

        assert!(matches!(read(&path), Err(LockfileError::IntegrityMismatch { .. })));
    }

    #[test]
    fn unlocked_pack_is_reported() {
        let lockfile = generate_from(&[], Timestamp::from_millis(0)).unwrap();
        let packs = vec![loaded_pack("pack-a", "1.0.0", &"a".repeat(64))];
        let mismatches = check_consistency(&lockfile, &packs);
        assert_eq!(mismatches, vec![LockMismatch::PackUnlocked { id: PackId::new("pack-a") }]);
    }

    #[test]
    fn hash_drift_is_reported() {
        let packs = vec![loaded_pack("pack-a", "1.0.0", &"a".repeat(64))];
        let lockfile = generate_from(&packs, Timestamp::from_millis(0)).unwrap();
        let drifted = vec![loaded_pack("pack-a", "1.0.0", &"c".repeat(64))];
        let mismatches = check_consistency(&lockfile, &drifted);
        assert!(mismatches.iter().any(|m| matches!(m, LockMismatch::HashMismatch { .. })));
    }
}
