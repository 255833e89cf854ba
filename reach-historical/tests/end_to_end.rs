// reach-historical/tests/end_to_end.rs
// ============================================================================
// Black-box scenarios spanning the Baseline Manager, Drift Detector, and
// Lineage Index.
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

use reach_core::identifiers::ToolName;
use reach_core::time::Timestamp;
use reach_historical::baseline::RiskLevel;
use reach_historical::baseline::RunSnapshot;
use reach_historical::baseline::compare_to_baseline;
use reach_historical::baseline::ensure_schema as ensure_baseline_schema;
use reach_historical::baseline::freeze_baseline;
use reach_historical::drift::RunMetrics;
use reach_historical::drift::analyze_drift;
use reach_historical::drift::ensure_schema as ensure_drift_schema;
use reach_historical::drift::record_run_metrics;
use reach_historical::stats::TrendDirection;
use reach_historical::lineage::RunStepInput;
use reach_historical::lineage::ensure_schema as ensure_lineage_schema;
use reach_historical::lineage::index_run;
use reach_historical::lineage::search_similar;
use rusqlite::Connection;
use serde_json::json;

fn snapshot(steps: &[(&str, &str)], artifacts: &[(&str, &str)]) -> RunSnapshot {
    RunSnapshot {
        steps: steps.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect(),
        artifacts: artifacts.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect(),
    }
}

/// Scenario (iv): comparing a run to its own baseline yields zero risk, the
/// "low" risk level, approval, and every step delta marked unchanged.
#[test]
fn baseline_identity_yields_zero_risk_and_approval() {
    let conn = Connection::open_in_memory().expect("open");
    ensure_baseline_schema(&conn).expect("schema");

    let snap = snapshot(&[("tool:e1", "hash-1"), ("tool:e2", "hash-2"), ("tool:e3", "hash-3")], &[]);
    let events = vec![json!({"step": "e1"}), json!({"step": "e2"}), json!({"step": "e3"})];
    let metrics = RunMetrics { reproducibility: 1.0, trust: 1.0, chaos_sensitivity: 0.0 };
    freeze_baseline(&conn, "pipeline-x", "run-1", snap.clone(), &events, metrics, "ci-bot", Timestamp::from_millis(0)).expect("freeze");

    let comparison = compare_to_baseline(&conn, "pipeline-x", &snap).expect("compare");
    assert_eq!(comparison.risk_score, 0.0);
    assert_eq!(comparison.level, RiskLevel::Low);
    assert!(comparison.approved);
    assert!(comparison.step_deltas.iter().all(|d| matches!(d.kind, reach_historical::baseline::ChangeKind::Unchanged)));
}

/// Scenario (v): 30 runs with reproducibility descending linearly from 0.95
/// to 0.60 are classified as a degrading trend with at least one
/// trend-degrading alert.
#[test]
fn thirty_degrading_runs_trigger_a_degrading_trend_alert() {
    let conn = Connection::open_in_memory().expect("open");
    ensure_drift_schema(&conn).expect("schema");

    let start = 0.95_f64;
    let end = 0.60_f64;
    const RUN_COUNT: i64 = 30;
    const DAY_MS: i64 = 86_400_000;
    for day in 0..RUN_COUNT {
        #[allow(clippy::cast_precision_loss, reason = "loop bound is a small fixed constant")]
        let fraction = day as f64 / (RUN_COUNT - 1) as f64;
        let reproducibility = start + (end - start) * fraction;
        let metrics = RunMetrics { reproducibility, trust: 0.9, chaos_sensitivity: 0.1 };
        record_run_metrics(&conn, "pipeline-x", &format!("run-{day}"), metrics, Timestamp::from_millis(day * DAY_MS))
            .expect("record metrics");
    }

    let report = analyze_drift(&conn, "pipeline-x", RUN_COUNT, Timestamp::from_millis(RUN_COUNT * DAY_MS)).expect("analyze");
    assert_eq!(report.reproducibility_trend.direction, TrendDirection::Degrading);
    assert!(report.alerts.iter().any(|a| a.contains("reproducibility") && a.contains("trending down")));
}

/// Scenario (vi): two runs sharing identical step keys and artifact hashes
/// are mutually similar with a score of 1.0 in both directions.
#[test]
fn identical_runs_are_mutually_similar_with_score_one() {
    let mut conn = Connection::open_in_memory().expect("open");
    ensure_lineage_schema(&conn).expect("schema");

    let steps = vec![
        RunStepInput {
            step_index: 0,
            tool: Some(ToolName::new("build")),
            step_type: None,
            name: None,
            plugin: None,
            event_type: None,
            event: json!({"ok": true}),
            artifact_hash: Some("artifact-1".to_string()),
        },
        RunStepInput {
            step_index: 1,
            tool: Some(ToolName::new("test")),
            step_type: None,
            name: None,
            plugin: None,
            event_type: None,
            event: json!({"ok": true}),
            artifact_hash: Some("artifact-2".to_string()),
        },
    ];

    index_run(&mut conn, "run-a", "pipeline-x", &steps, Timestamp::from_millis(0)).expect("index a");
    index_run(&mut conn, "run-b", "pipeline-x", &steps, Timestamp::from_millis(1000)).expect("index b");

    let similar_to_a = search_similar(&conn, "run-a", 10).expect("search a");
    assert_eq!(similar_to_a.len(), 1);
    assert_eq!(similar_to_a[0].run_id, "run-b");
    assert!((similar_to_a[0].score - 1.0).abs() < 1e-9);

    let similar_to_b = search_similar(&conn, "run-b", 10).expect("search b");
    assert_eq!(similar_to_b.len(), 1);
    assert_eq!(similar_to_b[0].run_id, "run-a");
    assert!((similar_to_b[0].score - similar_to_a[0].score).abs() < 1e-9);
}

/// `ensure_all_schemas` wires every manager's schema into one connection,
/// and the lineage and baseline managers can operate over the same
/// connection without interfering with each other's tables.
#[test]
fn ensure_all_schemas_supports_mixed_manager_use_on_one_connection() {
    let conn = Connection::open_in_memory().expect("open");
    reach_historical::ensure_all_schemas(&conn).expect("schema");

    let snap = snapshot(&[("tool:a", "h1")], &[]);
    let events = vec![json!({"step": "a"})];
    let metrics = RunMetrics { reproducibility: 1.0, trust: 1.0, chaos_sensitivity: 0.0 };
    freeze_baseline(&conn, "pipeline-y", "run-1", snap, &events, metrics, "ci-bot", Timestamp::from_millis(0)).expect("freeze");
    assert!(reach_historical::baseline::get_baseline(&conn, "pipeline-y").expect("get").is_some());
}
