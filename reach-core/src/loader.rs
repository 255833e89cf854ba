// reach-core/src/loader.rs
// ============================================================================
// Module: Pack Loader
// Description: Discover pack directories, parse and validate manifests,
//              produce an ordered load list.
// Purpose: Turn a set of search directories into a deterministic,
//          never-aborting load sequence.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Discovery never fails outright on a single bad pack: a manifest that
//! fails to parse, fails validation, or fails integrity verification
//! produces a [`LoadedPack`] in the disabled state with a reason, and
//! loading continues. Only a dependency-graph problem (missing required
//! dependency, cycle) fails the whole call, since there is no single pack to
//! blame for it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

use crate::depgraph::DependencyError;
use crate::depgraph::resolve_order;
use crate::identifiers::PackId;
use crate::manifest::ManifestError;
use crate::manifest::PackManifest;
use crate::manifest::parse as parse_manifest;
use crate::manifest::verify_integrity;

/// Filename expected inside each pack directory.
pub const MANIFEST_FILE_NAME: &str = "pack.json";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while discovering or ordering packs.
///
/// Per-pack parse/validation/integrity problems do not appear here; they are
/// captured in the pack's own [`LoadedPack::error`] instead.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// A search directory could not be read.
    #[error("failed to read search directory {path}: {source}")]
    Io {
        /// The directory that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The enabled-pack dependency graph could not be ordered.
    #[error(transparent)]
    Dependency(#[from] DependencyError),
}

// ============================================================================
// SECTION: LoadedPack
// ============================================================================

/// A pack discovered on disk, whether or not it was usable.
#[derive(Debug, Clone)]
pub struct LoadedPack {
    /// Parsed manifest, if parsing succeeded.
    pub manifest: Option<PackManifest>,
    /// Directory this pack was discovered in.
    pub source_path: PathBuf,
    /// Integrity hash computed for the manifest, if one could be computed.
    pub integrity_hash: Option<String>,
    /// True if this pack was excluded from the enabled load order.
    pub disabled: bool,
    /// Reason this pack is disabled, if any.
    pub error: Option<String>,
}

impl LoadedPack {
    /// Returns the pack's id, if its manifest parsed successfully.
    #[must_use]
    pub fn pack_id(&self) -> Option<&PackId> {
        self.manifest.as_ref().map(|m| &m.metadata.id)
    }
}

// ============================================================================
// SECTION: Discovery
// ============================================================================

/// Scans `search_dirs` for subdirectories containing a `pack.json`.
///
/// Candidate paths are sorted lexicographically before being returned, so
/// that downstream processing order is stable regardless of filesystem
/// iteration order.
///
/// # Errors
///
/// Returns [`LoaderError::Io`] if a search directory cannot be read.
pub fn discover_pack_dirs(search_dirs: &[PathBuf]) -> Result<Vec<PathBuf>, LoaderError> {
    let mut candidates = Vec::new();
    for dir in search_dirs {
        let entries = fs::read_dir(dir)
            .map_err(|source| LoaderError::Io { path: dir.clone(), source })?;
        for entry in entries {
            let entry = entry.map_err(|source| LoaderError::Io { path: dir.clone(), source })?;
            let path = entry.path();
            if path.is_dir() && path.join(MANIFEST_FILE_NAME).is_file() {
                candidates.push(path);
            }
        }
    }
    candidates.sort();
    Ok(candidates)
}

// ============================================================================
// SECTION: Loading
// ============================================================================

/// Loads a single pack directory's manifest.
///
/// Parse, validation, and integrity failures all produce a disabled
/// [`LoadedPack`] rather than an error; only an unreadable manifest file is
/// treated as `disabled` via an I/O-flavored reason string, consistent with
/// the rule that one bad pack never aborts the whole load.
#[must_use]
pub fn load_pack_dir(dir: &Path) -> LoadedPack {
    let manifest_path = dir.join(MANIFEST_FILE_NAME);
    let bytes = match fs::read(&manifest_path) {
        Ok(bytes) => bytes,
        Err(err) => {
            return LoadedPack {
                manifest: None,
                source_path: dir.to_path_buf(),
                integrity_hash: None,
                disabled: true,
                error: Some(format!("failed to read {}: {err}", manifest_path.display())),
            };
        }
    };

    match parse_manifest(&bytes) {
        Ok((manifest, validation)) if validation.valid => match verify_integrity(&manifest) {
            Ok(()) => LoadedPack {
                manifest: Some(manifest),
                source_path: dir.to_path_buf(),
                integrity_hash: Some(validation.hash),
                disabled: false,
                error: None,
            },
            Err(err) => LoadedPack {
                manifest: Some(manifest),
                source_path: dir.to_path_buf(),
                integrity_hash: Some(validation.hash),
                disabled: true,
                error: Some(err.to_string()),
            },
        },
        Ok((manifest, validation)) => LoadedPack {
            manifest: Some(manifest),
            source_path: dir.to_path_buf(),
            integrity_hash: Some(validation.hash),
            disabled: true,
            error: Some(validation.errors.join("; ")),
        },
        Err(err @ ManifestError::Parse(_)) => LoadedPack {
            manifest: None,
            source_path: dir.to_path_buf(),
            integrity_hash: None,
            disabled: true,
            error: Some(err.to_string()),
        },
        Err(err) => LoadedPack {
            manifest: None,
            source_path: dir.to_path_buf(),
            integrity_hash: None,
            disabled: true,
            error: Some(err.to_string()),
        },
    }
}

/// Discovers, loads, and orders every pack under `search_dirs`.
///
/// Enabled packs come first, in dependency-resolved topological order;
/// disabled packs are appended afterward, in their original discovery
/// order.
///
/// # Errors
///
/// Returns [`LoaderError::Io`] if a search directory cannot be read, or
/// [`LoaderError::Dependency`] if the enabled packs' dependency graph has a
/// missing required dependency or a cycle.
pub fn load_all(search_dirs: &[PathBuf]) -> Result<Vec<LoadedPack>, LoaderError> {
    let candidates = discover_pack_dirs(search_dirs)?;
    let discovered: Vec<LoadedPack> = candidates.iter().map(|dir| load_pack_dir(dir)).collect();

    let mut enabled_manifests: BTreeMap<PackId, PackManifest> = BTreeMap::new();
    for pack in &discovered {
        if !pack.disabled
            && let Some(manifest) = &pack.manifest
        {
            enabled_manifests.insert(manifest.metadata.id.clone(), manifest.clone());
        }
    }

    let order = resolve_order(&enabled_manifests)?;

    let mut by_id: BTreeMap<PackId, LoadedPack> = BTreeMap::new();
    let mut disabled_in_order: Vec<LoadedPack> = Vec::new();
    for pack in discovered {
        if pack.disabled {
            disabled_in_order.push(pack);
        } else if let Some(id) = pack.pack_id().cloned() {
            by_id.insert(id, pack);
        }
    }

    let mut result = Vec::with_capacity(order.len() + disabled_in_order.len());
    for id in order {
        if let Some(pack) = by_id.remove(&id) {
            result.push(pack);
        }
    }
    result.extend(disabled_in_order);
    Ok(result)
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
    use std::fs;
    use tempfile::TempDir;

    fn write_pack(dir: &Path, id: &str, deps: &str) {
        let pack_dir = dir.join(id);
        fs::create_dir_all(&pack_dir).unwrap();
        let manifest = format!(
            r#"{{
                "schema_version": "1.0.0",
                "metadata": {{"id": "{id}", "version": "1.0.0", "name": "{id}"}},
                "declared_tools": ["noop"],
                "declared_permissions": [],
                "deterministic": true
                {deps}
            }}"#
        );
        fs::write(pack_dir.join(MANIFEST_FILE_NAME), manifest).unwrap();
    }

    #[test]
    fn discovers_pack_directories_sorted_lexicographically() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), "zeta", "");
        write_pack(tmp.path(), "alpha", "");
        let dirs = discover_pack_dirs(&[tmp.path().to_path_buf()]).unwrap();
        let names: Vec<_> =
            dirs.iter().map(|p| p.file_name().unwrap().to_str().unwrap()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn unreadable_manifest_produces_disabled_pack_not_an_error() {
        let tmp = TempDir::new().unwrap();
        let pack_dir = tmp.path().join("broken");
        fs::create_dir_all(&pack_dir).unwrap();
        fs::write(pack_dir.join(MANIFEST_FILE_NAME), "not json").unwrap();
        let loaded = load_pack_dir(&pack_dir);
        assert!(loaded.disabled);
        assert!(loaded.error.is_some());
    }

    #[test]
    fn load_all_orders_dependency_before_dependent() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), "pack-a", "");
        write_pack(
            tmp.path(),
            "pack-b",
            r#", "dependencies": [{"id": "pack-a", "version": "1.0.0"}]"#,
        );
        let result = load_all(&[tmp.path().to_path_buf()]).unwrap();
        let ids: Vec<_> = result.iter().filter_map(LoadedPack::pack_id).map(PackId::to_string).collect();
        assert_eq!(ids, vec!["pack-a", "pack-b"]);
    }
}
