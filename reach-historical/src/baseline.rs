// reach-historical/src/baseline.rs
// ============================================================================
// Module: Baseline Manager
// Description: Freeze immutable baselines for a pipeline; compare later runs
//              against them.
// Purpose: Give operators a fixed point of comparison for "did this pipeline
//          change in a way that matters".
// Dependencies: rusqlite, reach-core (hashing, time), serde_json
// ============================================================================

//! ## Overview
//! A baseline is frozen once per pipeline and never mutated afterward; a
//! second freeze attempt for the same pipeline fails rather than silently
//! overwriting history. Comparing a later run to a baseline classifies each
//! step and artifact as unchanged, modified, removed, or added, and rolls
//! the classification up into a single risk score and approval verdict.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use reach_core::hashing::hash_canonical;
use reach_core::time::Timestamp;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Serialize;
use serde_json::Value;

use crate::db::StoreError;
use crate::drift::RunMetrics;

/// Risk impact of a step classified as modified.
const STEP_MODIFIED_IMPACT: f64 = 0.5;
/// Risk impact of a step classified as removed.
const STEP_REMOVED_IMPACT: f64 = 0.8;
/// Risk impact of a step classified as added.
const STEP_ADDED_IMPACT: f64 = 0.3;

/// Risk impact of an artifact classified as modified.
const ARTIFACT_MODIFIED_IMPACT: f64 = 0.4;
/// Risk impact of an artifact classified as removed.
const ARTIFACT_REMOVED_IMPACT: f64 = 0.7;
/// Risk impact of an artifact classified as added.
const ARTIFACT_ADDED_IMPACT: f64 = 0.2;

/// Overall risk score below which a comparison is auto-approved.
const APPROVAL_THRESHOLD: f64 = 50.0;

/// Risk level band boundaries.
const LEVEL_MEDIUM_AT: f64 = 25.0;
const LEVEL_HIGH_AT: f64 = 50.0;
const LEVEL_CRITICAL_AT: f64 = 70.0;

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Creates the baseline table if it does not already exist.
///
/// # Errors
///
/// Returns [`StoreError::Sqlite`] if table creation fails.
pub fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS baselines (
            pipeline TEXT PRIMARY KEY,
            id TEXT NOT NULL,
            run_id TEXT NOT NULL,
            frozen_at INTEGER NOT NULL,
            frozen_by TEXT NOT NULL,
            metrics_json TEXT NOT NULL,
            steps_json TEXT NOT NULL,
            artifacts_json TEXT NOT NULL,
            event_log_hash TEXT NOT NULL,
            fingerprint TEXT NOT NULL
        );",
    )?;
    Ok(())
}

// ============================================================================
// SECTION: Types
// ============================================================================

/// Snapshot of a run's steps and artifacts, keyed for comparison.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSnapshot {
    /// step key -> proof hash.
    pub steps: BTreeMap<String, String>,
    /// artifact key -> artifact hash.
    pub artifacts: BTreeMap<String, String>,
}

/// An immutable, frozen baseline for a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    /// Identifier of this baseline, derived from `(pipeline, run_id, frozen_at)`.
    pub id: String,
    /// Pipeline this baseline belongs to.
    pub pipeline: String,
    /// Run the baseline was frozen from.
    pub run_id: String,
    /// When the baseline was frozen.
    pub frozen_at: Timestamp,
    /// Who or what triggered the freeze.
    pub frozen_by: String,
    /// The run's summary metrics at freeze time.
    pub metrics: RunMetrics,
    /// The frozen snapshot.
    pub snapshot: RunSnapshot,
    /// Canonical hash of the run's event array.
    pub event_log_hash: String,
    /// Canonical hash fingerprint of `{id, step_proofs, artifact_hashes}`.
    pub fingerprint: String,
}

/// Value hashed to derive a baseline's id.
#[derive(Serialize)]
struct BaselineIdInput<'a> {
    pipeline: &'a str,
    run_id: &'a str,
    frozen_at: i64,
}

/// Value hashed to derive a baseline's fingerprint.
#[derive(Serialize)]
struct FingerprintInput<'a> {
    id: &'a str,
    step_proofs: &'a BTreeMap<String, String>,
    artifact_hashes: &'a BTreeMap<String, String>,
}

/// Errors raised by the baseline manager.
#[derive(Debug, thiserror::Error)]
pub enum BaselineError {
    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The snapshot could not be serialized.
    #[error("failed to serialize snapshot: {0}")]
    Serialization(String),
    /// A baseline already exists for this pipeline and cannot be replaced.
    #[error("baseline for pipeline {0:?} is already frozen")]
    AlreadyFrozen(String),
    /// No baseline exists for this pipeline.
    #[error("no baseline frozen for pipeline {0:?}")]
    NotFrozen(String),
    /// An existing, immutable baseline cannot be deleted.
    #[error("baseline for pipeline {0:?} is immutable and cannot be deleted")]
    Immutable(String),
}

/// How a single step or artifact changed relative to the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Present in both, with the same hash.
    Unchanged,
    /// Present in both, with a different hash.
    Modified,
    /// Present in the baseline but not the compared run.
    Removed,
    /// Present in the compared run but not the baseline.
    Added,
}

/// One classified delta between a baseline and a later run.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    /// The step or artifact key.
    pub key: String,
    /// How it changed.
    pub kind: ChangeKind,
    /// Risk impact contributed by this delta.
    pub impact: f64,
}

/// Qualitative risk level for a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    /// Score below 25.
    Low,
    /// Score in `[25, 50)`.
    Medium,
    /// Score in `[50, 70)`.
    High,
    /// Score at or above 70.
    Critical,
}

/// Result of comparing a run's snapshot against a pipeline's baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonResult {
    /// Per-step deltas.
    pub step_deltas: Vec<Delta>,
    /// Per-artifact deltas.
    pub artifact_deltas: Vec<Delta>,
    /// Overall risk score in `[0, 100]`.
    pub risk_score: f64,
    /// Qualitative band derived from `risk_score`.
    pub level: RiskLevel,
    /// `true` iff `risk_score < 50`.
    pub approved: bool,
}

// ============================================================================
// SECTION: Freeze and fetch
// ============================================================================

/// Freezes `snapshot` as the immutable baseline for `pipeline`.
///
/// `events` is the run's raw event array, hashed verbatim into
/// `event_log_hash`; `metrics` is the run's summary metrics snapshot;
/// `frozen_by` identifies who or what triggered the freeze.
///
/// # Errors
///
/// Returns [`BaselineError::AlreadyFrozen`] if a baseline already exists for
/// `pipeline`. The existence check and insert happen under the same
/// connection so no interleaved freeze can race past it. Returns
/// [`BaselineError::Serialization`] if the snapshot or event array cannot be
/// serialized.
#[allow(clippy::too_many_arguments, reason = "mirrors the baseline record's required fields one-for-one")]
pub fn freeze_baseline(
    conn: &Connection,
    pipeline: &str,
    run_id: &str,
    snapshot: RunSnapshot,
    events: &[Value],
    metrics: RunMetrics,
    frozen_by: &str,
    now: Timestamp,
) -> Result<Baseline, BaselineError> {
    if get_baseline(conn, pipeline)?.is_some() {
        return Err(BaselineError::AlreadyFrozen(pipeline.to_string()));
    }

    let id = hash_canonical(&BaselineIdInput { pipeline, run_id, frozen_at: now.as_millis() })
        .map_err(|err| BaselineError::Serialization(err.to_string()))?
        .value;
    let event_log_hash = hash_canonical(events)
        .map_err(|err| BaselineError::Serialization(err.to_string()))?
        .value;
    let fingerprint = hash_canonical(&FingerprintInput {
        id: &id,
        step_proofs: &snapshot.steps,
        artifact_hashes: &snapshot.artifacts,
    })
    .map_err(|err| BaselineError::Serialization(err.to_string()))?
    .value;

    let metrics_json = serde_json::to_string(&metrics).map_err(|err| BaselineError::Serialization(err.to_string()))?;
    let steps_json =
        serde_json::to_string(&snapshot.steps).map_err(|err| BaselineError::Serialization(err.to_string()))?;
    let artifacts_json =
        serde_json::to_string(&snapshot.artifacts).map_err(|err| BaselineError::Serialization(err.to_string()))?;

    let rows = conn.execute(
        "INSERT INTO baselines
            (pipeline, id, run_id, frozen_at, frozen_by, metrics_json, steps_json, artifacts_json, event_log_hash, fingerprint)
         SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10
         WHERE NOT EXISTS (SELECT 1 FROM baselines WHERE pipeline = ?1)",
        params![
            pipeline,
            id,
            run_id,
            now.as_millis(),
            frozen_by,
            metrics_json,
            steps_json,
            artifacts_json,
            event_log_hash,
            fingerprint
        ],
    )?;
    if rows == 0 {
        return Err(BaselineError::AlreadyFrozen(pipeline.to_string()));
    }

    Ok(Baseline {
        id,
        pipeline: pipeline.to_string(),
        run_id: run_id.to_string(),
        frozen_at: now,
        frozen_by: frozen_by.to_string(),
        metrics,
        snapshot,
        event_log_hash,
        fingerprint,
    })
}

/// Returns the frozen baseline for `pipeline`, if one exists.
///
/// # Errors
///
/// Returns [`StoreError::Sqlite`] if the query fails.
pub fn get_baseline(conn: &Connection, pipeline: &str) -> Result<Option<Baseline>, StoreError> {
    conn.query_row(
        "SELECT id, run_id, frozen_at, frozen_by, metrics_json, steps_json, artifacts_json, event_log_hash, fingerprint
         FROM baselines WHERE pipeline = ?1",
        params![pipeline],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
            ))
        },
    )
    .optional()?
    .map(|(id, run_id, frozen_at, frozen_by, metrics_json, steps_json, artifacts_json, event_log_hash, fingerprint)| {
        let metrics: RunMetrics =
            serde_json::from_str(&metrics_json).map_err(|e| StoreError::NotFound(e.to_string()))?;
        let steps: BTreeMap<String, String> =
            serde_json::from_str(&steps_json).map_err(|e| StoreError::NotFound(e.to_string()))?;
        let artifacts: BTreeMap<String, String> =
            serde_json::from_str(&artifacts_json).map_err(|e| StoreError::NotFound(e.to_string()))?;
        Ok(Baseline {
            id,
            pipeline: pipeline.to_string(),
            run_id,
            frozen_at: Timestamp::from_millis(frozen_at),
            frozen_by,
            metrics,
            snapshot: RunSnapshot { steps, artifacts },
            event_log_hash,
            fingerprint,
        })
    })
    .transpose()
}

/// Deletes the baseline for `pipeline`.
///
/// Baselines are immutable by design: this always fails. It exists so
/// callers have an explicit, named error instead of silently no-op-ing
/// a `DELETE`.
///
/// # Errors
///
/// Returns [`BaselineError::Immutable`] if a baseline exists for `pipeline`.
/// Returns [`BaselineError::NotFrozen`] if none exists.
pub fn delete_baseline(conn: &Connection, pipeline: &str) -> Result<(), BaselineError> {
    if get_baseline(conn, pipeline)?.is_some() {
        return Err(BaselineError::Immutable(pipeline.to_string()));
    }
    Err(BaselineError::NotFrozen(pipeline.to_string()))
}

// ============================================================================
// SECTION: Comparison
// ============================================================================

fn diff_maps(baseline: &BTreeMap<String, String>, current: &BTreeMap<String, String>, modified_impact: f64, removed_impact: f64, added_impact: f64) -> Vec<Delta> {
    let keys: BTreeSet<&String> = baseline.keys().chain(current.keys()).collect();
    keys.into_iter()
        .map(|key| {
            let (kind, impact) = match (baseline.get(key), current.get(key)) {
                (Some(b), Some(c)) if b == c => (ChangeKind::Unchanged, 0.0),
                (Some(_), Some(_)) => (ChangeKind::Modified, modified_impact),
                (Some(_), None) => (ChangeKind::Removed, removed_impact),
                (None, Some(_)) => (ChangeKind::Added, added_impact),
                (None, None) => unreachable!("key came from one of the two maps"),
            };
            Delta { key: key.clone(), kind, impact }
        })
        .collect()
}

/// Compares two snapshots directly, without consulting a stored baseline.
///
/// Factored out of [`compare_to_baseline`] so callers that already have two
/// snapshots in hand (notably [`crate::evidence_diff::compute_evidence_diff`])
/// can reuse the same classification and scoring without a round trip
/// through the `baselines` table.
#[must_use]
pub fn diff_snapshots(reference: &RunSnapshot, current: &RunSnapshot) -> ComparisonResult {
    let step_deltas = diff_maps(&reference.steps, &current.steps, STEP_MODIFIED_IMPACT, STEP_REMOVED_IMPACT, STEP_ADDED_IMPACT);
    let artifact_deltas = diff_maps(
        &reference.artifacts,
        &current.artifacts,
        ARTIFACT_MODIFIED_IMPACT,
        ARTIFACT_REMOVED_IMPACT,
        ARTIFACT_ADDED_IMPACT,
    );

    let total = step_deltas.len() + artifact_deltas.len();
    let changed = step_deltas.iter().chain(&artifact_deltas).filter(|d| d.kind != ChangeKind::Unchanged).count();
    #[allow(clippy::cast_precision_loss, reason = "delta counts are small, bounded values")]
    let change_intensity = if total == 0 { 0.0 } else { changed as f64 / total as f64 };

    let breaking_changes = step_deltas.iter().filter(|d| d.kind == ChangeKind::Removed).count();
    let removed_artifacts = artifact_deltas.iter().filter(|d| d.kind == ChangeKind::Removed).count();
    let modified_artifacts = artifact_deltas.iter().filter(|d| d.kind == ChangeKind::Modified).count();

    #[allow(clippy::cast_precision_loss, reason = "delta counts are small, bounded values")]
    let risk_score = (40.0 * change_intensity
        + 15.0 * breaking_changes as f64
        + 10.0 * removed_artifacts as f64
        + 5.0 * modified_artifacts as f64)
        .min(100.0);

    let level = if risk_score >= LEVEL_CRITICAL_AT {
        RiskLevel::Critical
    } else if risk_score >= LEVEL_HIGH_AT {
        RiskLevel::High
    } else if risk_score >= LEVEL_MEDIUM_AT {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    ComparisonResult { step_deltas, artifact_deltas, risk_score, level, approved: risk_score < APPROVAL_THRESHOLD }
}

/// Compares `current` against `pipeline`'s frozen baseline.
///
/// # Errors
///
/// Returns [`BaselineError::NotFrozen`] if no baseline has been frozen yet.
pub fn compare_to_baseline(conn: &Connection, pipeline: &str, current: &RunSnapshot) -> Result<ComparisonResult, BaselineError> {
    let baseline = get_baseline(conn, pipeline)?.ok_or_else(|| BaselineError::NotFrozen(pipeline.to_string()))?;
    Ok(diff_snapshots(&baseline.snapshot, current))
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

    fn open_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        conn
    }

    fn snapshot(steps: &[(&str, &str)]) -> RunSnapshot {
        RunSnapshot { steps: steps.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(), artifacts: BTreeMap::new() }
    }

    fn metrics() -> RunMetrics {
        RunMetrics { reproducibility: 1.0, trust: 1.0, chaos_sensitivity: 0.0 }
    }

    fn events(n: usize) -> Vec<Value> {
        (0..n).map(|i| serde_json::json!({"index": i})).collect()
    }

    #[test]
    fn freezing_twice_for_the_same_pipeline_fails() {
        let conn = open_test_db();
        freeze_baseline(&conn, "pipeline-x", "run-1", snapshot(&[("tool:a", "hash-1")]), &events(1), metrics(), "ci-bot", Timestamp::from_millis(1))
            .unwrap();
        let second = freeze_baseline(
            &conn,
            "pipeline-x",
            "run-2",
            snapshot(&[("tool:a", "hash-2")]),
            &events(1),
            metrics(),
            "ci-bot",
            Timestamp::from_millis(2),
        );
        assert!(matches!(second, Err(BaselineError::AlreadyFrozen(_))));
    }

    #[test]
    fn compare_identifies_modified_removed_and_added_steps() {
        let conn = open_test_db();
        freeze_baseline(
            &conn,
            "pipeline-x",
            "run-1",
            snapshot(&[("tool:a", "hash-1"), ("tool:b", "hash-2")]),
            &events(2),
            metrics(),
            "ci-bot",
            Timestamp::from_millis(1),
        )
        .unwrap();

        let current = snapshot(&[("tool:a", "hash-1-changed"), ("tool:c", "hash-3")]);
        let result = compare_to_baseline(&conn, "pipeline-x", &current).unwrap();

        let a = result.step_deltas.iter().find(|d| d.key == "tool:a").unwrap();
        assert_eq!(a.kind, ChangeKind::Modified);
        let b = result.step_deltas.iter().find(|d| d.key == "tool:b").unwrap();
        assert_eq!(b.kind, ChangeKind::Removed);
        let c = result.step_deltas.iter().find(|d| d.key == "tool:c").unwrap();
        assert_eq!(c.kind, ChangeKind::Added);
    }

    #[test]
    fn unchanged_snapshot_yields_zero_risk_and_is_approved() {
        let conn = open_test_db();
        let snap = snapshot(&[("tool:a", "hash-1")]);
        freeze_baseline(&conn, "pipeline-x", "run-1", snap.clone(), &events(1), metrics(), "ci-bot", Timestamp::from_millis(1)).unwrap();
        let result = compare_to_baseline(&conn, "pipeline-x", &snap).unwrap();
        assert_eq!(result.risk_score, 0.0);
        assert!(result.approved);
        assert_eq!(result.level, RiskLevel::Low);
    }

    #[test]
    fn baseline_cannot_be_deleted_once_frozen() {
        let conn = open_test_db();
        freeze_baseline(&conn, "pipeline-x", "run-1", snapshot(&[("tool:a", "hash-1")]), &events(1), metrics(), "ci-bot", Timestamp::from_millis(1))
            .unwrap();
        let result = delete_baseline(&conn, "pipeline-x");
        assert!(matches!(result, Err(BaselineError::Immutable(_))));
    }

    #[test]
    fn frozen_baseline_records_id_frozen_by_event_log_hash_and_metrics() {
        let conn = open_test_db();
        let baseline = freeze_baseline(
            &conn,
            "pipeline-x",
            "run-1",
            snapshot(&[("tool:a", "hash-1")]),
            &events(3),
            metrics(),
            "operator@example.com",
            Timestamp::from_millis(1),
        )
        .unwrap();

        assert!(!baseline.id.is_empty());
        assert_eq!(baseline.frozen_by, "operator@example.com");
        assert_eq!(baseline.metrics, metrics());
        assert!(!baseline.event_log_hash.is_empty());

        let fetched = get_baseline(&conn, "pipeline-x").unwrap().unwrap();
        assert_eq!(fetched, baseline);
    }

    #[test]
    fn event_log_hash_changes_when_the_event_array_changes() {
        let conn = open_test_db();
        let baseline = freeze_baseline(
            &conn,
            "pipeline-x",
            "run-1",
            snapshot(&[("tool:a", "hash-1")]),
            &events(3),
            metrics(),
            "ci-bot",
            Timestamp::from_millis(1),
        )
        .unwrap();

        let other_conn = open_test_db();
        let other = freeze_baseline(
            &other_conn,
            "pipeline-x",
            "run-1",
            snapshot(&[("tool:a", "hash-1")]),
            &events(4),
            metrics(),
            "ci-bot",
            Timestamp::from_millis(1),
        )
        .unwrap();

        assert_ne!(baseline.event_log_hash, other.event_log_hash);
        assert_eq!(baseline.fingerprint, other.fingerprint, "fingerprint excludes the event log");
    }
}
