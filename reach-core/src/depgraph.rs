// reach-core/src/depgraph.rs
// ============================================================================
// Module: Dependency Resolver
// Description: Kahn's topological sort over pack dependencies, alphabetical
//              tie-break.
// Purpose: Produce a deterministic load order regardless of input ordering.
// Dependencies: none beyond reach-core's own manifest types
// ============================================================================

//! ## Overview
//! Given a set of manifests keyed by pack id, this module orders them so
//! that every pack appears after all of its required dependencies. Ties
//! (multiple packs simultaneously ready to load) are always broken
//! alphabetically by pack id, so the same input set produces the same order
//! on every run and every implementation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use thiserror::Error;

use crate::identifiers::PackId;
use crate::manifest::PackManifest;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while resolving dependencies between packs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DependencyError {
    /// A pack declared a required dependency that is not in the input set.
    #[error("pack {pack_id} has a missing required dependency: {dependency_id}")]
    MissingDependency {
        /// The pack that declared the dependency.
        pack_id: String,
        /// The dependency id that could not be found.
        dependency_id: String,
    },
    /// The dependency graph contains a cycle.
    #[error("circular dependency detected among packs: {}", .cycle.join(", "))]
    Circular {
        /// Ids of the packs still unresolved once the algorithm stalls.
        cycle: Vec<String>,
    },
}

// ============================================================================
// SECTION: Resolution
// ============================================================================

/// Computes a topological load order over `manifests`.
///
/// Required dependencies missing from `manifests` fail resolution; optional
/// dependencies missing from `manifests` are silently skipped (no edge is
/// added for them). Ties among simultaneously ready packs are broken by
/// ascending pack id.
///
/// # Errors
///
/// Returns [`DependencyError::MissingDependency`] for an unresolvable
/// required dependency, or [`DependencyError::Circular`] if the graph has a
/// cycle.
pub fn resolve_order(
    manifests: &BTreeMap<PackId, PackManifest>,
) -> Result<Vec<PackId>, DependencyError> {
    let mut in_degree: BTreeMap<PackId, usize> =
        manifests.keys().map(|id| (id.clone(), 0)).collect();
    // dependents[x] = packs that depend on x, i.e. edges x -> dependent
    let mut dependents: BTreeMap<PackId, Vec<PackId>> = BTreeMap::new();

    for (pack_id, manifest) in manifests {
        let Some(dependencies) = &manifest.dependencies else { continue };
        for dep in dependencies {
            if manifests.contains_key(&dep.id) {
                dependents.entry(dep.id.clone()).or_default().push(pack_id.clone());
                *in_degree.entry(pack_id.clone()).or_insert(0) += 1;
            } else if !dep.optional {
                return Err(DependencyError::MissingDependency {
                    pack_id: pack_id.to_string(),
                    dependency_id: dep.id.to_string(),
                });
            }
        }
    }

    let mut ready: BTreeSet<PackId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| id.clone())
        .collect();

    let mut order = Vec::with_capacity(manifests.len());
    while let Some(next) = ready.iter().next().cloned() {
        ready.remove(&next);
        order.push(next.clone());
        if let Some(children) = dependents.get(&next) {
            for child in children {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(child.clone());
                    }
                }
            }
        }
    }

    if order.len() < manifests.len() {
        let remaining: Vec<String> = manifests
            .keys()
            .filter(|id| !order.contains(id))
            .map(PackId::to_string)
            .collect();
        return Err(DependencyError::Circular { cycle: remaining });
    }

    Ok(order)
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
    use crate::manifest::PackDependency;
    use crate::manifest::PackMetadata;

    fn manifest_with_deps(id: &str, deps: Vec<(&str, bool)>) -> PackManifest {
        PackManifest {
            schema_version: "1.0.0".to_string(),
            metadata: PackMetadata {
                id: PackId::new(id),
                version: "1.0.0".to_string(),
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
            dependencies: Some(
                deps.into_iter()
                    .map(|(dep_id, optional)| PackDependency {
                        id: PackId::new(dep_id),
                        version: Some("1.0.0".to_string()),
                        min_version: None,
                        max_version: None,
                        optional,
                    })
                    .collect(),
            ),
            exports: None,
            entry_point: None,
            signature_hash: None,
        }
    }

    #[test]
    fn orders_dependency_before_dependent() {
        let mut manifests = BTreeMap::new();
        manifests.insert(PackId::new("pack-a"), manifest_with_deps("pack-a", vec![]));
        manifests.insert(PackId::new("pack-b"), manifest_with_deps("pack-b", vec![("pack-a", false)]));
        let order = resolve_order(&manifests).unwrap();
        assert_eq!(order, vec![PackId::new("pack-a"), PackId::new("pack-b")]);
    }

    #[test]
    fn reversing_the_dependency_reverses_the_order() {
        let mut manifests = BTreeMap::new();
        manifests.insert(PackId::new("pack-a"), manifest_with_deps("pack-a", vec![("pack-b", false)]));
        manifests.insert(PackId::new("pack-b"), manifest_with_deps("pack-b", vec![]));
        let order = resolve_order(&manifests).unwrap();
        assert_eq!(order, vec![PackId::new("pack-b"), PackId::new("pack-a")]);
    }

    #[test]
    fn ties_break_alphabetically() {
        let mut manifests = BTreeMap::new();
        manifests.insert(PackId::new("zeta"), manifest_with_deps("zeta", vec![]));
        manifests.insert(PackId::new("alpha"), manifest_with_deps("alpha", vec![]));
        manifests.insert(PackId::new("mu"), manifest_with_deps("mu", vec![]));
        let order = resolve_order(&manifests).unwrap();
        assert_eq!(order, vec![PackId::new("alpha"), PackId::new("mu"), PackId::new("zeta")]);
    }

    #[test]
    fn missing_required_dependency_fails() {
        let mut manifests = BTreeMap::new();
        manifests.insert(PackId::new("pack-a"), manifest_with_deps("pack-a", vec![("missing", false)]));
        assert!(matches!(resolve_order(&manifests), Err(DependencyError::MissingDependency { .. })));
    }

    #[test]
    fn missing_optional_dependency_is_skipped() {
        let mut manifests = BTreeMap::new();
        manifests.insert(PackId::new("pack-a"), manifest_with_deps("pack-a", vec![("missing", true)]));
        let order = resolve_order(&manifests).unwrap();
        assert_eq!(order, vec![PackId::new("pack-a")]);
    }

    #[test]
    fn mutual_dependency_is_circular() {
        let mut manifests = BTreeMap::new();
        manifests.insert(PackId::new("pack-a"), manifest_with_deps("pack-a", vec![("pack-b", false)]));
        manifests.insert(PackId::new("pack-b"), manifest_with_deps("pack-b", vec![("pack-a", false)]));
        assert!(matches!(resolve_order(&manifests), Err(DependencyError::Circular { .. })));
    }
}
