// reach-core/tests/end_to_end.rs
// ============================================================================
// Black-box scenarios spanning loader, depgraph, sandbox, containment, and
// the Compat Layer bootstrap sequence.
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

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use reach_core::CancellationToken;
use reach_core::CompatConfig;
use reach_core::Containment;
use reach_core::ContainmentPolicy;
use reach_core::Environment;
use reach_core::Injector;
use reach_core::PackId;
use reach_core::ToolName;
use reach_core::sandbox::Sandbox;
use reach_core::{bootstrap, load_all};
use tempfile::TempDir;

fn write_pack(dir: &Path, id: &str, tools: &[&str], extra: &str) {
    let pack_dir = dir.join(id);
    fs::create_dir_all(&pack_dir).expect("create pack dir");
    let tools_json: Vec<String> = tools.iter().map(|t| format!("\"{t}\"")).collect();
    let manifest = format!(
        r#"{{
            "schema_version": "1.0.0",
            "metadata": {{"id": "{id}", "version": "1.0.0", "name": "{id}"}},
            "declared_tools": [{}],
            "declared_permissions": [],
            "deterministic": true
            {extra}
        }}"#,
        tools_json.join(", ")
    );
    fs::write(pack_dir.join("pack.json"), manifest).expect("write manifest");
}

/// Scenario (i): topological load order follows dependency order and
/// reverses when the dependency is reversed.
#[test]
fn topological_load_follows_and_reverses_dependency_order() {
    let tmp = TempDir::new().expect("tempdir");
    write_pack(tmp.path(), "pack-a", &["noop"], "");
    write_pack(
        tmp.path(),
        "pack-b",
        &["noop"],
        r#", "dependencies": [{"id": "pack-a", "version": "1.0.0"}]"#,
    );
    let loaded = load_all(&[tmp.path().to_path_buf()]).expect("load");
    let ids: Vec<String> = loaded.iter().filter_map(|p| p.pack_id()).map(PackId::to_string).collect();
    assert_eq!(ids, vec!["pack-a", "pack-b"]);

    let reversed_tmp = TempDir::new().expect("tempdir");
    write_pack(reversed_tmp.path(), "pack-b", &["noop"], "");
    write_pack(
        reversed_tmp.path(),
        "pack-a",
        &["noop"],
        r#", "dependencies": [{"id": "pack-b", "version": "1.0.0"}]"#,
    );
    let reversed = load_all(&[reversed_tmp.path().to_path_buf()]).expect("load");
    let reversed_ids: Vec<String> =
        reversed.iter().filter_map(|p| p.pack_id()).map(PackId::to_string).collect();
    assert_eq!(reversed_ids, vec!["pack-b", "pack-a"]);
}

/// Scenario (iii): a pack that declares only `read_file` is denied
/// `exec_command`, and the denial is the only audit entry recorded.
#[test]
fn sandbox_denies_undeclared_tool_and_records_one_audit_entry() {
    let sandbox = Sandbox::new(1000);
    let pack_id = PackId::new("pack-a");
    let mut tools = BTreeSet::new();
    tools.insert(ToolName::new("read_file"));
    sandbox.register(pack_id.clone(), tools, BTreeSet::new(), BTreeSet::new());

    let allowed = sandbox.check_tool_access(&pack_id, &ToolName::new("exec_command"));
    assert!(!allowed);

    let log = sandbox.audit_log();
    assert_eq!(log.len(), 1);
    assert!(!log[0].allowed);
    assert_eq!(log[0].reason.as_deref(), Some("tool not declared"));
}

/// Boundary behavior: a pack that accumulates `max_failures` within the
/// window transitions to disabled and fires `on_disable` exactly once.
#[test]
fn containment_disables_after_max_failures_and_fires_callback_once() {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    let fire_count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fire_count);
    let policy = ContainmentPolicy { max_failures: 3, failure_window_ms: 60_000, auto_recover: false, recover_after_ms: 0 };
    let containment = Containment::new(policy).with_on_disable(Arc::new(move |_id, _reason| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    let pack_id = PackId::new("pack-a");
    containment.register(pack_id.clone());

    for i in 0..3 {
        containment
            .record_failure(&pack_id, reach_core::Timestamp::from_millis(i * 1000), "boom")
            .expect("record failure");
    }

    assert_eq!(fire_count.load(Ordering::SeqCst), 1);
}

/// End-to-end bootstrap: two packs, one depending on the other, both get
/// loaded, registered with the sandbox, and injected, with no lockfile
/// configured.
#[test]
fn compat_bootstrap_loads_and_registers_dependent_packs() {
    let tmp = TempDir::new().expect("tempdir");
    write_pack(tmp.path(), "pack-a", &["noop"], "");
    write_pack(
        tmp.path(),
        "pack-b",
        &["noop"],
        r#", "dependencies": [{"id": "pack-a", "version": "1.0.0"}]"#,
    );

    let config = CompatConfig {
        environment: Environment::Cli,
        search_dirs: vec![tmp.path().to_path_buf()],
        lockfile_path: None,
        policy: ContainmentPolicy::default(),
    };
    let sandbox = Sandbox::new(1000);
    let injector = Injector::new();
    let containment = Containment::new(ContainmentPolicy::default());
    let cancel = CancellationToken::new();

    let result = bootstrap(&config, &sandbox, &injector, &containment, &cancel).expect("bootstrap");
    assert_eq!(result.loaded, vec![PackId::new("pack-a"), PackId::new("pack-b")]);
    assert!(result.failed.is_empty());
    assert!(result.disabled.is_empty());

    assert!(sandbox.check_tool_access(&PackId::new("pack-a"), &ToolName::new("noop")));
}
