// reach-core/src/manifest.rs
// ============================================================================
// Module: Manifest Validator
// Description: Parse, validate, and integrity-hash pack manifests.
// Purpose: Gate every pack entering the lifecycle on a single validation
//          bundle, and give every other component a stable integrity hash.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! A manifest is validated once, at load time, into a `{valid, errors,
//! warnings, hash}` bundle. Validation never panics and never throws away
//! partial results: even an invalid manifest gets a hash and a full error
//! list, so a caller can log everything wrong with a pack in one pass.
//!
//! The on-disk field is named `signature_hash`; this module also calls it
//! the manifest's integrity hash, since that is what it protects.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::hashing::HashError;
use crate::hashing::hash_canonical;
use crate::identifiers::DagNodeId;
use crate::identifiers::ExportKey;
use crate::identifiers::PackId;
use crate::identifiers::PermissionScope;
use crate::identifiers::ToolName;
use crate::semver::SemverError;
use crate::semver::VersionConstraint;
use crate::semver::parse as parse_version;
use crate::semver::parse_constraint;
use crate::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// DAGs with more nodes than this produce a warning, not an error.
pub const DAG_NODE_WARNING_THRESHOLD: usize = 500;

/// Permission prefix that always produces a warning regardless of validity.
const SENSITIVE_PERMISSION_PREFIX: &str = "sys:";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while parsing or hashing a manifest.
///
/// Schema and semantic problems (bad regex, cycles, duplicates) are *not*
/// represented here — they are accumulated into [`ValidationResult::errors`]
/// instead, since a malformed manifest is an expected, handled outcome, not
/// an exceptional one.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest bytes were not valid JSON or did not match the schema shape.
    #[error("failed to parse manifest: {0}")]
    Parse(String),
    /// Canonical hashing failed.
    #[error(transparent)]
    Hash(#[from] HashError),
    /// A dependency's version or constraint string was malformed.
    #[error(transparent)]
    Semver(#[from] SemverError),
    /// `signature_hash` was present but did not match the recomputed hash.
    #[error("manifest integrity hash mismatch: expected {expected}, found {found}")]
    IntegrityMismatch {
        /// The freshly computed hash.
        expected: String,
        /// The hash recorded in the manifest.
        found: String,
    },
}

// ============================================================================
// SECTION: Manifest data model
// ============================================================================

/// Identity and descriptive fields of a pack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackMetadata {
    /// Pack identifier.
    pub id: PackId,
    /// Raw semver string, validated during [`validate`].
    pub version: String,
    /// Human-readable pack name.
    pub name: String,
    /// Optional free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional author string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Optional SPDX license identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Optional creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<Timestamp>,
}

/// Model tier/context-window hints, advisory only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequirements {
    /// Optional model tier name (e.g. `"large"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    /// Optional minimum context window size, in tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u64>,
}

/// A single node in a pack's execution DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagNode {
    /// Node identifier, unique within the graph.
    pub id: DagNodeId,
    /// Node type (opaque to the manifest validator).
    #[serde(rename = "type")]
    pub node_type: String,
    /// Human-readable node name.
    pub name: String,
    /// Optional opaque node configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    /// Whether this node's execution is deterministic.
    pub deterministic: bool,
}

/// A directed edge between two DAG nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagEdge {
    /// Source node id.
    pub from: DagNodeId,
    /// Destination node id.
    pub to: DagNodeId,
    /// Edge type (opaque to the manifest validator).
    #[serde(rename = "type")]
    pub edge_type: String,
    /// Optional guard condition, evaluated by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// A pack's optional execution DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionGraph {
    /// Nodes keyed by id; a `BTreeMap` keeps serialization order stable.
    pub nodes: BTreeMap<DagNodeId, DagNode>,
    /// Directed edges between nodes.
    pub edges: Vec<DagEdge>,
    /// Id of the node execution begins at.
    pub start_node_id: DagNodeId,
}

/// A declared dependency on another pack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackDependency {
    /// Identifier of the depended-upon pack.
    pub id: PackId,
    /// Exact version constraint, if given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Minimum version (inclusive), if given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,
    /// Maximum version, treated as an exclusive upper bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_version: Option<String>,
    /// Whether the dependency is optional; missing counts as `false`.
    #[serde(default)]
    pub optional: bool,
}

impl PackDependency {
    /// Derives this dependency's effective version constraint.
    ///
    /// `version` takes priority as an exact-match constraint. Otherwise
    /// `min_version`/`max_version` are combined into a range, with
    /// `max_version` treated as an exclusive upper bound.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Semver`] if any version string is malformed.
    pub fn version_constraint(&self) -> Result<VersionConstraint, ManifestError> {
        if let Some(exact) = &self.version {
            return Ok(parse_constraint(exact)?);
        }
        let min = self.min_version.as_deref().map(parse_version).transpose()?;
        let max_exclusive = self.max_version.as_deref().map(parse_version).transpose()?;
        Ok(VersionConstraint { min, max_exclusive, exact: None })
    }
}

/// A pack manifest, as declared by `pack.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackManifest {
    /// Schema version this manifest was authored against.
    pub schema_version: String,
    /// Identity and descriptive metadata.
    pub metadata: PackMetadata,
    /// Tool names this pack is permitted to invoke.
    pub declared_tools: Vec<ToolName>,
    /// Permission scopes this pack requires.
    pub declared_permissions: Vec<PermissionScope>,
    /// Optional model-tier hints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_requirements: Option<ModelRequirements>,
    /// Optional execution DAG.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_graph: Option<ExecutionGraph>,
    /// Whether this pack's execution is deterministic overall.
    pub deterministic: bool,
    /// Declared dependencies on other packs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<PackDependency>>,
    /// Named capabilities this pack publishes for other packs to read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exports: Option<Vec<ExportKey>>,
    /// Optional entry-point identifier, opaque to this module.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    /// Integrity hash, computed over every other field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_hash: Option<String>,
}

// ============================================================================
// SECTION: Validation result
// ============================================================================

/// Outcome of validating a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// True iff `errors` is empty.
    pub valid: bool,
    /// Fatal problems; a manifest with any of these is rejected.
    pub errors: Vec<String>,
    /// Non-fatal observations that do not block loading.
    pub warnings: Vec<String>,
    /// The manifest's integrity hash, computed regardless of validity.
    pub hash: String,
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Parses manifest bytes and validates the result in one call.
///
/// # Errors
///
/// Returns [`ManifestError::Parse`] if `bytes` is not valid JSON matching the
/// manifest shape, or a hashing error from the embedded [`validate`] call.
pub fn parse(bytes: &[u8]) -> Result<(PackManifest, ValidationResult), ManifestError> {
    let manifest: PackManifest =
        serde_json::from_slice(bytes).map_err(|err| ManifestError::Parse(err.to_string()))?;
    let result = validate(&manifest)?;
    Ok((manifest, result))
}

// ============================================================================
// SECTION: Hashing
// ============================================================================

/// Computes a manifest's integrity hash with `signature_hash` cleared.
///
/// # Errors
///
/// Returns [`ManifestError::Hash`] if canonicalization fails.
pub fn compute_hash(manifest: &PackManifest) -> Result<String, ManifestError> {
    let mut cleared = manifest.clone();
    cleared.signature_hash = None;
    let digest = hash_canonical(&cleared)?;
    Ok(digest.value)
}

/// Verifies `manifest.signature_hash` against a freshly computed hash.
///
/// A manifest with no `signature_hash` set is considered verified: nothing
/// was asserted, so nothing can mismatch.
///
/// # Errors
///
/// Returns [`ManifestError::Hash`] if canonicalization fails, or
/// [`ManifestError::IntegrityMismatch`] if a present hash does not match.
pub fn verify_integrity(manifest: &PackManifest) -> Result<(), ManifestError> {
    let Some(found) = &manifest.signature_hash else {
        return Ok(());
    };
    let expected = compute_hash(manifest)?;
    if &expected == found {
        Ok(())
    } else {
        Err(ManifestError::IntegrityMismatch { expected, found: found.clone() })
    }
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates a manifest's structural and semantic rules.
///
/// Regex mismatches, duplicate entries, and DAG cycles are accumulated into
/// `errors` rather than short-circuiting, so a caller sees every problem with
/// a pack in one pass.
///
/// # Errors
///
/// Returns [`ManifestError::Hash`] only if canonical hashing itself fails;
/// all schema/semantic problems are reported via the returned
/// [`ValidationResult`], not as an `Err`.
pub fn validate(manifest: &PackManifest) -> Result<ValidationResult, ManifestError> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if !is_valid_pack_id(manifest.metadata.id.as_str()) {
        errors.push(format!("invalid pack id: {}", manifest.metadata.id));
    }
    if parse_version(&manifest.metadata.version).is_err() {
        errors.push(format!("invalid semver version: {}", manifest.metadata.version));
    }

    validate_unique_tools(manifest, &mut errors);
    validate_unique_permissions(manifest, &mut errors, &mut warnings);
    validate_dependencies(manifest, &mut errors);
    if let Some(graph) = &manifest.execution_graph {
        validate_execution_graph(graph, &mut errors, &mut warnings);
    }

    let hash = compute_hash(manifest)?;
    Ok(ValidationResult { valid: errors.is_empty(), errors, warnings, hash })
}

/// Checks declared tool names for regex validity and uniqueness.
fn validate_unique_tools(manifest: &PackManifest, errors: &mut Vec<String>) {
    let mut seen = BTreeSet::new();
    for tool in &manifest.declared_tools {
        if !is_valid_tool_name(tool.as_str()) {
            errors.push(format!("invalid tool name: {tool}"));
        }
        if !seen.insert(tool.as_str()) {
            errors.push(format!("duplicate declared tool: {tool}"));
        }
    }
}

/// Checks declared permissions for regex validity, uniqueness, and the
/// `sys:*` sensitivity warning.
fn validate_unique_permissions(
    manifest: &PackManifest,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    let mut seen = BTreeSet::new();
    for perm in &manifest.declared_permissions {
        if !is_valid_permission(perm.as_str()) {
            errors.push(format!("invalid permission scope: {perm}"));
        }
        if !seen.insert(perm.as_str()) {
            errors.push(format!("duplicate declared permission: {perm}"));
        }
        if perm.as_str().starts_with(SENSITIVE_PERMISSION_PREFIX) {
            warnings.push(format!("sensitive permission requested: {perm}"));
        }
    }
}

/// Checks declared dependencies for duplicate ids and parseable constraints.
fn validate_dependencies(manifest: &PackManifest, errors: &mut Vec<String>) {
    let Some(dependencies) = &manifest.dependencies else {
        return;
    };
    let mut seen = BTreeSet::new();
    for dep in dependencies {
        if !seen.insert(dep.id.as_str()) {
            errors.push(format!("duplicate dependency id: {}", dep.id));
        }
        if dep.version_constraint().is_err() {
            errors.push(format!("invalid version constraint for dependency: {}", dep.id));
        }
    }
}

/// Checks the execution graph's start node, edge endpoints, size, and acyclicity.
fn validate_execution_graph(
    graph: &ExecutionGraph,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    if !graph.nodes.contains_key(&graph.start_node_id) {
        errors.push(format!(
            "execution_graph.start_node_id references missing node: {}",
            graph.start_node_id
        ));
    }
    for edge in &graph.edges {
        if !graph.nodes.contains_key(&edge.from) {
            errors.push(format!("edge references missing source node: {}", edge.from));
        }
        if !graph.nodes.contains_key(&edge.to) {
            errors.push(format!("edge references missing destination node: {}", edge.to));
        }
    }
    if graph.nodes.len() > DAG_NODE_WARNING_THRESHOLD {
        warnings.push(format!(
            "execution graph has {} nodes, exceeding the recommended {}",
            graph.nodes.len(),
            DAG_NODE_WARNING_THRESHOLD
        ));
    }
    if let Some(cycle_node) = find_cycle(graph) {
        errors.push(format!("execution graph contains cycles at node: {cycle_node}"));
    }
}

/// Three-color DFS cycle detection. Returns the id of a node found on the
/// current recursion stack when a back-edge is encountered, or `None` if the
/// graph is acyclic.
fn find_cycle(graph: &ExecutionGraph) -> Option<DagNodeId> {
    #[derive(PartialEq, Eq, Clone, Copy)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut adjacency: BTreeMap<&DagNodeId, Vec<&DagNodeId>> = BTreeMap::new();
    for edge in &graph.edges {
        adjacency.entry(&edge.from).or_default().push(&edge.to);
    }

    let mut colors: BTreeMap<&DagNodeId, Color> =
        graph.nodes.keys().map(|id| (id, Color::White)).collect();

    fn visit<'a>(
        node: &'a DagNodeId,
        adjacency: &BTreeMap<&'a DagNodeId, Vec<&'a DagNodeId>>,
        colors: &mut BTreeMap<&'a DagNodeId, Color>,
    ) -> Option<DagNodeId> {
        colors.insert(node, Color::Gray);
        if let Some(neighbors) = adjacency.get(node) {
            for &neighbor in neighbors {
                match colors.get(neighbor).copied() {
                    Some(Color::Gray) => return Some(neighbor.clone()),
                    Some(Color::White) | None => {
                        if let Some(found) = visit(neighbor, adjacency, colors) {
                            return Some(found);
                        }
                    }
                    Some(Color::Black) => {}
                }
            }
        }
        colors.insert(node, Color::Black);
        None
    }

    let node_ids: Vec<&DagNodeId> = graph.nodes.keys().collect();
    for node in node_ids {
        if colors.get(node).copied() == Some(Color::White)
            && let Some(found) = visit(node, &adjacency, &mut colors)
        {
            return Some(found);
        }
    }
    None
}

// ============================================================================
// SECTION: Regex-equivalent validators
// ============================================================================

/// Matches `^[a-z][a-z0-9._-]{2,127}$`.
#[must_use]
pub fn is_valid_pack_id(id: &str) -> bool {
    let mut chars = id.chars();
    let Some(first) = chars.next() else { return false };
    if !first.is_ascii_lowercase() {
        return false;
    }
    let rest_len = id.len() - 1;
    if !(2..=127).contains(&rest_len) {
        return false;
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '_' || c == '-')
}

/// Matches `^[a-z][a-z0-9_]{1,63}$`.
#[must_use]
pub fn is_valid_tool_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else { return false };
    if !first.is_ascii_lowercase() {
        return false;
    }
    let rest_len = name.len() - 1;
    if !(1..=63).contains(&rest_len) {
        return false;
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Matches `^[a-z][a-z0-9_]*:[a-z][a-z0-9_]*$`.
#[must_use]
pub fn is_valid_permission(scope: &str) -> bool {
    let Some((scope_part, action_part)) = scope.split_once(':') else { return false };
    is_valid_scope_segment(scope_part) && is_valid_scope_segment(action_part)
}

/// Matches a single `[a-z][a-z0-9_]*` segment of a permission scope string.
fn is_valid_scope_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    let Some(first) = chars.next() else { return false };
    first.is_ascii_lowercase() && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
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
    use super::*;

    fn sample_manifest() -> PackManifest {
        PackManifest {
            schema_version: "1.0.0".to_string(),
            metadata: PackMetadata {
                id: PackId::new("com.example.pack"),
                version: "1.0.0".to_string(),
                name: "Example Pack".to_string(),
                description: None,
                author: None,
                license: None,
                created: None,
            },
            declared_tools: vec![ToolName::new("read_file")],
            declared_permissions: vec![PermissionScope::new("fs:read")],
            model_requirements: None,
            execution_graph: None,
            deterministic: true,
            dependencies: None,
            exports: None,
            entry_point: None,
            signature_hash: None,
        }
    }

    #[test]
    fn valid_manifest_has_no_errors() {
        let manifest = sample_manifest();
        let result = validate(&manifest).unwrap();
        assert!(result.valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn invalid_pack_id_is_rejected() {
        let mut manifest = sample_manifest();
        manifest.metadata.id = PackId::new("Invalid_ID!");
        let result = validate(&manifest).unwrap();
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("invalid pack id")));
    }

    #[test]
    fn duplicate_tools_are_rejected() {
        let mut manifest = sample_manifest();
        manifest.declared_tools = vec![ToolName::new("read_file"), ToolName::new("read_file")];
        let result = validate(&manifest).unwrap();
        assert!(result.errors.iter().any(|e| e.contains("duplicate declared tool")));
    }

    #[test]
    fn sys_permission_is_a_warning_not_an_error() {
        let mut manifest = sample_manifest();
        manifest.declared_permissions = vec![PermissionScope::new("sys:admin")];
        let result = validate(&manifest).unwrap();
        assert!(result.valid);
        assert!(result.warnings.iter().any(|w| w.contains("sensitive permission")));
    }

    #[test]
    fn missing_start_node_is_an_error() {
        let mut manifest = sample_manifest();
        manifest.execution_graph = Some(ExecutionGraph {
            nodes: BTreeMap::new(),
            edges: Vec::new(),
            start_node_id: DagNodeId::new("missing"),
        });
        let result = validate(&manifest).unwrap();
        assert!(result.errors.iter().any(|e| e.contains("start_node_id")));
    }

    #[test]
    fn cyclic_dag_is_rejected_with_cycle_message() {
        let mut nodes = BTreeMap::new();
        for id in ["a", "b"] {
            nodes.insert(
                DagNodeId::new(id),
                DagNode {
                    id: DagNodeId::new(id),
                    node_type: "step".to_string(),
                    name: id.to_string(),
                    config: None,
                    deterministic: true,
                },
            );
        }
        let edges = vec![
            DagEdge { from: DagNodeId::new("a"), to: DagNodeId::new("b"), edge_type: "next".to_string(), condition: None },
            DagEdge { from: DagNodeId::new("b"), to: DagNodeId::new("a"), edge_type: "next".to_string(), condition: None },
        ];
        let mut manifest = sample_manifest();
        manifest.execution_graph =
            Some(ExecutionGraph { nodes, edges, start_node_id: DagNodeId::new("a") });
        let result = validate(&manifest).unwrap();
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("cycles")));
    }

    #[test]
    fn hash_is_stable_regardless_of_field_order_in_source_json() {
        let manifest = sample_manifest();
        let first = compute_hash(&manifest).unwrap();
        let second = compute_hash(&manifest).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn integrity_verification_passes_for_freshly_signed_manifest() {
        let mut manifest = sample_manifest();
        let hash = compute_hash(&manifest).unwrap();
        manifest.signature_hash = Some(hash);
        assert!(verify_integrity(&manifest).is_ok());
    }

    #[test]
    fn integrity_verification_fails_on_tamper() {
        let mut manifest = sample_manifest();
        manifest.signature_hash = Some("0".repeat(64));
        assert!(matches!(verify_integrity(&manifest), Err(ManifestError::IntegrityMismatch { .. })));
    }

    #[test]
    fn absent_signature_hash_verifies_trivially() {
        let manifest = sample_manifest();
        assert!(verify_integrity(&manifest).is_ok());
    }
}
