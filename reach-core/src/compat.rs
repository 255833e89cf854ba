// reach-core/src/compat.rs
// ============================================================================
// Module: Compat Layer
// Description: Orchestrates Loader -> Sandbox -> Containment -> Injector
//              bootstrap and lockfile reconciliation.
// Purpose: The one entry point that turns a set of search directories into
//          a running pack lifecycle.
// Dependencies: serde (for CompatConfig), thiserror
// ============================================================================

//! ## Overview
//! Bootstrap is sequential and single-pass: load every pack, optionally
//! reconcile against a lockfile, then register each enabled pack with the
//! sandbox, containment, and injector in one step per pack. A pack that the
//! loader already disabled never reaches registration; it is reported back
//! in [`BootstrapResult::disabled`] instead.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::cancel::CancellationToken;
use crate::containment::Containment;
use crate::containment::ContainmentPolicy;
use crate::identifiers::PackId;
use crate::injector::Injector;
use crate::loader::LoaderError;
use crate::loader::load_all;
use crate::lockfile::LockMismatch;
use crate::lockfile::LockfileError;
use crate::lockfile::check_consistency;
use crate::lockfile::read as read_lockfile;
use crate::sandbox::Sandbox;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while bootstrapping the pack lifecycle.
#[derive(Debug, Error)]
pub enum CompatError {
    /// Pack discovery or dependency resolution failed.
    #[error(transparent)]
    Loader(#[from] LoaderError),
    /// The configured lockfile exists but failed to read.
    #[error(transparent)]
    Lockfile(#[from] LockfileError),
    /// Bootstrap was cancelled before completion.
    #[error("bootstrap cancelled")]
    Cancelled,
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Which host environment the Compat Layer is bootstrapping for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Invoked from the CLI.
    Cli,
    /// Invoked from the web/API surface.
    Web,
}

/// Bootstrap configuration for the Compat Layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatConfig {
    /// Host environment bootstrap is running under.
    pub environment: Environment,
    /// Directories scanned for pack subdirectories.
    pub search_dirs: Vec<PathBuf>,
    /// Optional lockfile path to reconcile against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lockfile_path: Option<PathBuf>,
    /// Failure containment policy applied to every pack.
    pub policy: ContainmentPolicy,
}

// ============================================================================
// SECTION: Bootstrap result
// ============================================================================

/// The outcome of a single bootstrap pass.
#[derive(Debug, Default)]
pub struct BootstrapResult {
    /// Ids of packs successfully registered and injected.
    pub loaded: Vec<PackId>,
    /// Packs that could not even be identified (manifest failed to parse),
    /// paired with their source path and failure reason.
    pub failed: Vec<(PathBuf, String)>,
    /// Identified packs the loader marked disabled, paired with the reason.
    pub disabled: Vec<(PackId, String)>,
    /// Discrepancies found between the configured lockfile and the loaded set.
    pub lockfile_mismatches: Vec<LockMismatch>,
}

// ============================================================================
// SECTION: Bootstrap
// ============================================================================

/// Runs the full bootstrap sequence: load, reconcile, register.
///
/// # Errors
///
/// Returns [`CompatError::Loader`] if discovery or dependency resolution
/// fails, [`CompatError::Lockfile`] if a configured lockfile exists but
/// fails to read, or [`CompatError::Cancelled`] if `cancel` is observed
/// between packs.
pub fn bootstrap(
    config: &CompatConfig,
    sandbox: &Sandbox,
    injector: &Injector,
    containment: &Containment,
    cancel: &CancellationToken,
) -> Result<BootstrapResult, CompatError> {
    let loaded_packs = load_all(&config.search_dirs)?;

    let lockfile_mismatches = match &config.lockfile_path {
        Some(path) if path.is_file() => {
            let lockfile = read_lockfile(path)?;
            check_consistency(&lockfile, &loaded_packs)
        }
        _ => Vec::new(),
    };

    let mut result = BootstrapResult { lockfile_mismatches, ..BootstrapResult::default() };

    for pack in &loaded_packs {
        if cancel.is_cancelled() {
            return Err(CompatError::Cancelled);
        }

        let Some(manifest) = &pack.manifest else {
            result.failed.push((
                pack.source_path.clone(),
                pack.error.clone().unwrap_or_else(|| "unknown failure".to_string()),
            ));
            continue;
        };

        if pack.disabled {
            result.disabled.push((
                manifest.metadata.id.clone(),
                pack.error.clone().unwrap_or_else(|| "disabled".to_string()),
            ));
            continue;
        }

        let tools: BTreeSet<_> = manifest.declared_tools.iter().cloned().collect();
        let permissions: BTreeSet<_> = manifest.declared_permissions.iter().cloned().collect();
        let exports: BTreeSet<_> = manifest.exports.iter().flatten().cloned().collect();

        sandbox.register(manifest.metadata.id.clone(), tools.clone(), permissions.clone(), exports);
        containment.register(manifest.metadata.id.clone());
        injector.inject(manifest.metadata.id.clone(), tools, permissions);

        result.loaded.push(manifest.metadata.id.clone());
    }

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

    fn write_pack(dir: &std::path::Path, id: &str) {
        let pack_dir = dir.join(id);
        fs::create_dir_all(&pack_dir).unwrap();
        let manifest = format!(
            r#"{{
                "schema_version": "1.0.0",
                "metadata": {{"id": "{id}", "version": "1.0.0", "name": "{id}"}},
                "declared_tools": ["noop"],
                "declared_permissions": [],
                "deterministic": true
            }}"#
        );
        fs::write(pack_dir.join(crate::loader::MANIFEST_FILE_NAME), manifest).unwrap();
    }

    #[test]
    fn bootstrap_registers_every_enabled_pack() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), "pack-a");

        let config = CompatConfig {
            environment: Environment::Cli,
            search_dirs: vec![tmp.path().to_path_buf()],
            lockfile_path: None,
            policy: ContainmentPolicy::default(),
        };
        let sandbox = Sandbox::new(100);
        let injector = Injector::new();
        let containment = Containment::new(ContainmentPolicy::default());
        let cancel = CancellationToken::new();

        let result = bootstrap(&config, &sandbox, &injector, &containment, &cancel).unwrap();
        assert_eq!(result.loaded, vec![PackId::new("pack-a")]);
        assert!(result.disabled.is_empty());
        assert!(result.failed.is_empty());
    }

    #[test]
    fn cancellation_before_registration_aborts_bootstrap() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), "pack-a");

        let config = CompatConfig {
            environment: Environment::Cli,
            search_dirs: vec![tmp.path().to_path_buf()],
            lockfile_path: None,
            policy: ContainmentPolicy::default(),
        };
        let sandbox = Sandbox::new(100);
        let injector = Injector::new();
        let containment = Containment::new(ContainmentPolicy::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = bootstrap(&config, &sandbox, &injector, &containment, &cancel);
        assert!(matches!(result, Err(CompatError::Cancelled)));
    }
}
