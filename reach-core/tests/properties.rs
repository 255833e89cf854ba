// reach-core/tests/properties.rs
// ============================================================================
// Property tests for the universal invariants in the pack lifecycle's
// canonical hashing and dependency resolution.
// ============================================================================

#![allow(
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

use std::collections::BTreeMap;

use proptest::prelude::*;
use reach_core::PackId;
use reach_core::ToolName;
use reach_core::hash_canonical;
use reach_core::manifest::PackManifest;
use reach_core::manifest::PackMetadata;
use reach_core::resolve_order;
use serde_json::Value;
use serde_json::json;

fn arbitrary_json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z]{0,8}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 16, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    /// Invariant 1: canonical hashing is stable across repeated calls on the
    /// same logical value, regardless of how that value's map keys were
    /// ordered when constructed.
    #[test]
    fn canonical_hash_is_stable_across_repeated_calls(value in arbitrary_json_value()) {
        let first = hash_canonical(&value).expect("hash");
        let second = hash_canonical(&value).expect("hash");
        prop_assert_eq!(first, second);
    }

    /// Invariant 2: dependency resolution is deterministic regardless of the
    /// order packs were inserted into the input map (a `BTreeMap` already
    /// normalizes insertion order, but this checks the resolved order itself
    /// is a fixed function of the dependency edges, not of map iteration).
    #[test]
    fn resolve_order_is_deterministic_for_a_fixed_dependency_set(
        ids in prop::collection::btree_set("[a-z]{3,8}", 1..8)
    ) {
        let ids: Vec<String> = ids.into_iter().collect();
        let mut manifests = BTreeMap::new();
        for (i, id) in ids.iter().enumerate() {
            let dependencies = if i == 0 {
                None
            } else {
                Some(vec![reach_core::manifest::PackDependency {
                    id: PackId::new(&ids[i - 1]),
                    version: Some("1.0.0".to_string()),
                    min_version: None,
                    max_version: None,
                    optional: false,
                }])
            };
            manifests.insert(
                PackId::new(id),
                PackManifest {
                    schema_version: "1.0.0".to_string(),
                    metadata: PackMetadata {
                        id: PackId::new(id),
                        version: "1.0.0".to_string(),
                        name: id.clone(),
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
                    dependencies,
                    exports: None,
                    entry_point: None,
                    signature_hash: None,
                },
            );
        }

        let first = resolve_order(&manifests).expect("resolve");
        let second = resolve_order(&manifests).expect("resolve");
        prop_assert_eq!(first, second);
    }
}
