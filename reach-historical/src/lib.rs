// reach-historical/src/lib.rs
// ============================================================================
// Crate: reach-historical
// Description: Historical Intelligence Core — lineage indexing, drift
//              detection, baseline comparison, trend metrics, and evidence
//              diffing, all backed by SQLite.
// ============================================================================

//! ## Overview
//! `reach-historical` is the storage-backed half of Reach: it answers
//! questions about what has happened across runs over time. It depends on
//! `reach-core` for identifiers, hashing, and timestamps, and on `rusqlite`
//! (bundled) for storage. Each manager owns its own tables and opens its own
//! connection through [`db::open_with_pragmas`]; nothing here depends on a
//! particular host's async runtime or web framework.
//!
//! Modules are listed in dependency order: each only depends on modules
//! above it in this list.

pub mod db;
pub mod stats;
pub mod lineage;
pub mod drift;
pub mod baseline;
pub mod trend;
pub mod evidence_diff;

pub use baseline::Baseline;
pub use baseline::BaselineError;
pub use baseline::ChangeKind;
pub use baseline::ComparisonResult;
pub use baseline::Delta;
pub use baseline::RiskLevel;
pub use baseline::RunSnapshot;
pub use baseline::compare_to_baseline;
pub use baseline::freeze_baseline;
pub use baseline::get_baseline;
pub use db::StoreError;
pub use db::open_with_pragmas;
pub use drift::DriftReport;
pub use drift::HealthSummary;
pub use drift::RunMetrics;
pub use drift::analyze_drift;
pub use drift::record_run_metrics;
pub use drift::record_step_proof;
pub use evidence_diff::ChangeIntensityLevel;
pub use evidence_diff::EvidenceDiff;
pub use evidence_diff::OverlayEntry;
pub use evidence_diff::RankedVolatility;
pub use evidence_diff::VisualizationGraph;
pub use evidence_diff::build_visualization;
pub use evidence_diff::classify_change_intensity;
pub use evidence_diff::compute_evidence_diff;
pub use evidence_diff::historical_overlay;
pub use evidence_diff::rank_step_volatility;
pub use lineage::EvidenceIndexRecord;
pub use lineage::RunStepInput;
pub use lineage::SimilarRun;
pub use lineage::StepFrequency;
pub use lineage::index_run;
pub use lineage::search_by_hash;
pub use lineage::search_by_plugin;
pub use lineage::search_by_step;
pub use lineage::search_similar;
pub use trend::ForecastPoint;
pub use trend::MetricSample;
pub use trend::StabilityPercentiles;
pub use trend::forecast;
pub use trend::metric_history;
pub use trend::record_metric;
pub use trend::stability_percentiles;
pub use trend::trust_volatility_index;

/// Creates every historical manager's tables on a freshly opened
/// connection.
///
/// # Errors
///
/// Returns [`StoreError::Sqlite`] if any manager's schema creation fails.
pub fn ensure_all_schemas(conn: &rusqlite::Connection) -> Result<(), StoreError> {
    lineage::ensure_schema(conn)?;
    drift::ensure_schema(conn)?;
    baseline::ensure_schema(conn)?;
    trend::ensure_schema(conn)?;
    Ok(())
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
    use reach_core::identifiers::ToolName;
    use reach_core::time::Timestamp;

    #[test]
    fn ensure_all_schemas_creates_every_table() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        ensure_all_schemas(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        for expected in ["evidence_index", "step_frequency", "run_metrics", "step_proofs", "baselines", "metric_history"] {
            assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
        }
    }

    #[test]
    fn lineage_and_drift_share_one_connection_end_to_end() {
        let mut conn = rusqlite::Connection::open_in_memory().unwrap();
        ensure_all_schemas(&conn).unwrap();

        let step = RunStepInput {
            step_index: 0,
            tool: Some(ToolName::new("read_file")),
            step_type: None,
            name: None,
            plugin: None,
            event_type: None,
            event: serde_json::json!({"ok": true}),
            artifact_hash: Some("hash-1".to_string()),
        };
        let records = index_run(&mut conn, "run-1", "pipeline-x", &[step], Timestamp::from_millis(1)).unwrap();
        record_step_proof(&conn, "pipeline-x", "run-1", &records[0].step_key, &records[0].proof_hash, Timestamp::from_millis(1)).unwrap();

        let report = analyze_drift(&conn, "pipeline-x", 30, Timestamp::from_millis(2)).unwrap();
        assert_eq!(report.summary, HealthSummary::Healthy);
    }
}
