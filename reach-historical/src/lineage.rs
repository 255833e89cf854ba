// reach-historical/src/lineage.rs
// ============================================================================
// Module: Lineage Index
// Description: Index run evidence by step, plugin, and proof hash; find
//              similar prior runs.
// Purpose: Give every other historical manager a shared, queryable record of
//          what happened during a run.
// Dependencies: rusqlite, reach-core (hashing, identifiers, time), serde_json
// ============================================================================

//! ## Overview
//! A run is a sequence of steps. Each step is indexed under a derived
//! "step key" (`tool:<name>`, `<type>:<name>`, `<type>`, or `unknown`) along
//! with a proof hash derived from the run id, step index, and the step's
//! event payload. Indexing one run is transactional: either every step of
//! the run lands in the store, or none do.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use reach_core::hashing::HashDigest;
use reach_core::hashing::hash_canonical;
use reach_core::identifiers::PackId;
use reach_core::identifiers::ToolName;
use reach_core::time::Timestamp;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Serialize;
use serde_json::Value;

use crate::db::StoreError;
use crate::db::effective_limit;
use crate::stats::jaccard_similarity;

/// Default row limit applied by lineage search queries.
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

/// Length, in hex characters, of a step proof hash.
const PROOF_HASH_CHARS: usize = 16;

/// Weight given to step-key overlap when scoring run similarity.
const STEP_KEY_WEIGHT: f64 = 0.6;

/// Weight given to artifact-hash overlap when scoring run similarity.
const ARTIFACT_HASH_WEIGHT: f64 = 0.4;

/// Minimum similarity score for a run to be reported by [`search_similar`].
const SIMILARITY_THRESHOLD: f64 = 0.1;

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Creates the lineage tables if they do not already exist.
///
/// # Errors
///
/// Returns [`StoreError::Sqlite`] if table creation fails.
pub fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS evidence_index (
            run_id TEXT NOT NULL,
            pipeline TEXT NOT NULL,
            step_index INTEGER NOT NULL,
            step_key TEXT NOT NULL,
            event_type TEXT,
            proof_hash TEXT NOT NULL,
            plugin TEXT,
            artifact_hash TEXT,
            indexed_at INTEGER NOT NULL,
            PRIMARY KEY (run_id, step_index)
        );
        CREATE INDEX IF NOT EXISTS idx_evidence_proof_hash ON evidence_index (proof_hash);
        CREATE INDEX IF NOT EXISTS idx_evidence_step_key ON evidence_index (step_key);
        CREATE INDEX IF NOT EXISTS idx_evidence_plugin ON evidence_index (plugin);
        CREATE INDEX IF NOT EXISTS idx_evidence_artifact_hash ON evidence_index (artifact_hash);
        CREATE TABLE IF NOT EXISTS step_frequency (
            step_key TEXT PRIMARY KEY,
            pipeline TEXT NOT NULL,
            count INTEGER NOT NULL,
            last_seen INTEGER NOT NULL
        );",
    )?;
    Ok(())
}

// ============================================================================
// SECTION: Input and record types
// ============================================================================

/// One step of a run, as supplied to [`index_run`].
#[derive(Debug, Clone)]
pub struct RunStepInput {
    /// Position of this step within the run, starting at zero.
    pub step_index: i64,
    /// Tool the step invoked, if any.
    pub tool: Option<ToolName>,
    /// Step type, used to derive a step key when no tool is present.
    pub step_type: Option<String>,
    /// Step name, paired with `step_type` in the derived step key.
    pub name: Option<String>,
    /// Pack that produced this step, if attributable.
    pub plugin: Option<PackId>,
    /// Raw event type, stored alongside the derived step key but never used
    /// to derive it.
    pub event_type: Option<String>,
    /// Opaque event payload hashed into the step's proof hash.
    pub event: Value,
    /// Hash of any artifact this step produced, if any.
    pub artifact_hash: Option<String>,
}

/// A single indexed step, as stored and returned by lineage queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceIndexRecord {
    /// Run the step belongs to.
    pub run_id: String,
    /// Pipeline the run belongs to.
    pub pipeline: String,
    /// Position of the step within its run.
    pub step_index: i64,
    /// Derived step key.
    pub step_key: String,
    /// Raw event type, if the source event carried one.
    pub event_type: Option<String>,
    /// Proof hash of the step.
    pub proof_hash: String,
    /// Attributed pack, if any.
    pub plugin: Option<PackId>,
    /// Artifact hash, if any.
    pub artifact_hash: Option<String>,
    /// When the step was indexed.
    pub indexed_at: Timestamp,
}

/// Aggregate occurrence count for a step key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFrequency {
    /// The step key being counted.
    pub step_key: String,
    /// Pipeline the count is scoped to.
    pub pipeline: String,
    /// Number of times this step key has been indexed.
    pub count: i64,
    /// Most recent time this step key was indexed.
    pub last_seen: Timestamp,
}

/// A prior run found similar to a query run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarRun {
    /// The similar run's id.
    pub run_id: String,
    /// Weighted similarity score in `[0, 1]`.
    pub score: f64,
    /// Canonical hash fingerprint of the run's step-key and artifact-hash sets.
    pub fingerprint: String,
}

/// Value hashed to derive a similar run's fingerprint.
#[derive(Serialize)]
struct SimilarRunFingerprintInput<'a> {
    steps: &'a BTreeSet<String>,
    artifacts: &'a BTreeSet<String>,
}

/// Value hashed to derive a step's proof hash.
#[derive(Serialize)]
struct ProofHashInput<'a> {
    run_id: &'a str,
    step_index: i64,
    event: &'a Value,
}

// ============================================================================
// SECTION: Step key derivation
// ============================================================================

/// Derives the step key for a run step.
///
/// Prefers the invoked tool; falls back to `<type>:<name>`, then bare
/// `<type>`, then the literal `unknown`.
#[must_use]
pub fn derive_step_key(step: &RunStepInput) -> String {
    if let Some(tool) = &step.tool {
        return format!("tool:{tool}");
    }
    match (&step.step_type, &step.name) {
        (Some(step_type), Some(name)) => format!("{step_type}:{name}"),
        (Some(step_type), None) => step_type.clone(),
        (None, _) => "unknown".to_string(),
    }
}

/// Computes a step's proof hash: the canonical hash of
/// `{run_id, step_index, event}`, truncated to 16 hex characters.
///
/// # Errors
///
/// Returns [`StoreError::NotFound`] if the step's event payload cannot be
/// canonicalized.
pub(crate) fn proof_hash(run_id: &str, step_index: i64, event: &Value) -> Result<HashDigest, StoreError> {
    let input = ProofHashInput { run_id, step_index, event };
    hash_canonical(&input).map_err(|err| StoreError::NotFound(format!("failed to hash step: {err}")))
}

// ============================================================================
// SECTION: Indexing
// ============================================================================

/// Indexes every step of a run transactionally: either all steps are
/// recorded, or (on any failure) none are.
///
/// # Errors
///
/// Returns [`StoreError::Sqlite`] if any insert fails; the transaction is
/// rolled back before the error is returned.
pub fn index_run(
    conn: &mut Connection,
    run_id: &str,
    pipeline: &str,
    steps: &[RunStepInput],
    now: Timestamp,
) -> Result<Vec<EvidenceIndexRecord>, StoreError> {
    let tx = conn.transaction()?;
    let mut records = Vec::with_capacity(steps.len());

    for step in steps {
        let step_key = derive_step_key(step);
        let digest = proof_hash(run_id, step.step_index, &step.event)?;
        let hash = digest.truncated(PROOF_HASH_CHARS);

        tx.execute(
            "INSERT INTO evidence_index
                (run_id, pipeline, step_index, step_key, event_type, proof_hash, plugin, artifact_hash, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run_id,
                pipeline,
                step.step_index,
                step_key,
                step.event_type,
                hash,
                step.plugin.as_ref().map(PackId::as_str),
                step.artifact_hash,
                now.as_millis(),
            ],
        )?;

        tx.execute(
            "INSERT INTO step_frequency (step_key, pipeline, count, last_seen)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(step_key) DO UPDATE SET
                count = count + 1,
                last_seen = excluded.last_seen",
            params![step_key, pipeline, now.as_millis()],
        )?;

        records.push(EvidenceIndexRecord {
            run_id: run_id.to_string(),
            pipeline: pipeline.to_string(),
            step_index: step.step_index,
            step_key,
            event_type: step.event_type.clone(),
            proof_hash: hash,
            plugin: step.plugin.clone(),
            artifact_hash: step.artifact_hash.clone(),
            indexed_at: now,
        });
    }

    tx.commit()?;
    Ok(records)
}

// ============================================================================
// SECTION: Queries
// ============================================================================

/// Maps one result row into an [`EvidenceIndexRecord`].
fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<EvidenceIndexRecord> {
    let plugin: Option<String> = row.get(6)?;
    Ok(EvidenceIndexRecord {
        run_id: row.get(0)?,
        pipeline: row.get(1)?,
        step_index: row.get(2)?,
        step_key: row.get(3)?,
        event_type: row.get(4)?,
        proof_hash: row.get(5)?,
        plugin: plugin.map(PackId::new),
        artifact_hash: row.get(7)?,
        indexed_at: Timestamp::from_millis(row.get(8)?),
    })
}

const RECORD_COLUMNS: &str =
    "run_id, pipeline, step_index, step_key, event_type, proof_hash, plugin, artifact_hash, indexed_at";

/// Finds every step sharing the given proof hash.
///
/// # Errors
///
/// Returns [`StoreError::Sqlite`] if the query fails.
pub fn search_by_hash(conn: &Connection, hash: &str) -> Result<Vec<EvidenceIndexRecord>, StoreError> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM evidence_index WHERE proof_hash = ?1 ORDER BY indexed_at DESC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![hash], row_to_record)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

/// Finds the most recent steps that produced the given artifact hash.
///
/// # Errors
///
/// Returns [`StoreError::Sqlite`] if the query fails.
pub fn search_by_artifact(
    conn: &Connection,
    artifact_hash: &str,
    limit: i64,
) -> Result<Vec<EvidenceIndexRecord>, StoreError> {
    let limit = effective_limit(limit, DEFAULT_SEARCH_LIMIT);
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM evidence_index WHERE artifact_hash = ?1 ORDER BY indexed_at DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    #[allow(clippy::cast_possible_wrap, reason = "search limits are small, bounded values")]
    let rows = stmt.query_map(params![artifact_hash, limit as i64], row_to_record)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

/// Finds the most recent steps with the given step key.
///
/// # Errors
///
/// Returns [`StoreError::Sqlite`] if the query fails.
pub fn search_by_step(
    conn: &Connection,
    step_key: &str,
    limit: i64,
) -> Result<Vec<EvidenceIndexRecord>, StoreError> {
    let limit = effective_limit(limit, DEFAULT_SEARCH_LIMIT);
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM evidence_index WHERE step_key = ?1 ORDER BY indexed_at DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    #[allow(clippy::cast_possible_wrap, reason = "search limits are small, bounded values")]
    let rows = stmt.query_map(params![step_key, limit as i64], row_to_record)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

/// Finds the most recent steps attributed to the given plugin.
///
/// # Errors
///
/// Returns [`StoreError::Sqlite`] if the query fails.
pub fn search_by_plugin(
    conn: &Connection,
    plugin: &PackId,
    limit: i64,
) -> Result<Vec<EvidenceIndexRecord>, StoreError> {
    let limit = effective_limit(limit, DEFAULT_SEARCH_LIMIT);
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM evidence_index WHERE plugin = ?1 ORDER BY indexed_at DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    #[allow(clippy::cast_possible_wrap, reason = "search limits are small, bounded values")]
    let rows = stmt.query_map(params![plugin.as_str(), limit as i64], row_to_record)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

/// Returns the frequency record for a single step key, if it has ever been
/// indexed.
///
/// # Errors
///
/// Returns [`StoreError::Sqlite`] if the query fails.
pub fn get_step_frequency(conn: &Connection, step_key: &str) -> Result<Option<StepFrequency>, StoreError> {
    conn.query_row(
        "SELECT step_key, pipeline, count, last_seen FROM step_frequency WHERE step_key = ?1",
        params![step_key],
        |row| {
            Ok(StepFrequency {
                step_key: row.get(0)?,
                pipeline: row.get(1)?,
                count: row.get(2)?,
                last_seen: Timestamp::from_millis(row.get(3)?),
            })
        },
    )
    .optional()
    .map_err(StoreError::from)
}

/// Returns the most frequently indexed step keys, most frequent first.
///
/// # Errors
///
/// Returns [`StoreError::Sqlite`] if the query fails.
pub fn list_top_step_keys(conn: &Connection, limit: i64) -> Result<Vec<StepFrequency>, StoreError> {
    let limit = effective_limit(limit, DEFAULT_SEARCH_LIMIT);
    let mut stmt = conn.prepare(
        "SELECT step_key, pipeline, count, last_seen FROM step_frequency ORDER BY count DESC, step_key ASC LIMIT ?1",
    )?;
    #[allow(clippy::cast_possible_wrap, reason = "search limits are small, bounded values")]
    let rows = stmt.query_map(params![limit as i64], |row| {
        Ok(StepFrequency {
            step_key: row.get(0)?,
            pipeline: row.get(1)?,
            count: row.get(2)?,
            last_seen: Timestamp::from_millis(row.get(3)?),
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

/// Finds prior runs similar to `run_id`, scored by a weighted blend of
/// step-key overlap (weight 0.6) and artifact-hash overlap (weight 0.4).
///
/// Runs scoring below 0.1 are omitted. Results are sorted by descending
/// score, ties broken by run id, and capped at `limit`.
///
/// # Errors
///
/// Returns [`StoreError::Sqlite`] if the query fails.
pub fn search_similar(conn: &Connection, run_id: &str, limit: i64) -> Result<Vec<SimilarRun>, StoreError> {
    let limit = effective_limit(limit, DEFAULT_SEARCH_LIMIT);

    let mut stmt = conn.prepare("SELECT run_id, step_key, artifact_hash FROM evidence_index")?;
    let rows = stmt.query_map([], |row| {
        let run: String = row.get(0)?;
        let step_key: String = row.get(1)?;
        let artifact_hash: Option<String> = row.get(2)?;
        Ok((run, step_key, artifact_hash))
    })?;

    let mut step_keys_by_run: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut artifacts_by_run: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for row in rows {
        let (run, step_key, artifact_hash) = row?;
        step_keys_by_run.entry(run.clone()).or_default().insert(step_key);
        if let Some(hash) = artifact_hash {
            artifacts_by_run.entry(run).or_default().insert(hash);
        }
    }

    let Some(target_steps) = step_keys_by_run.get(run_id).cloned() else {
        return Ok(Vec::new());
    };
    let target_artifacts = artifacts_by_run.get(run_id).cloned().unwrap_or_default();

    let scored: Vec<SimilarRun> = step_keys_by_run
        .iter()
        .filter(|(candidate, _)| candidate.as_str() != run_id)
        .map(|(candidate, candidate_steps)| {
            let candidate_artifacts = artifacts_by_run.get(candidate).cloned().unwrap_or_default();
            let step_score = jaccard_similarity(&target_steps, candidate_steps);
            let artifact_score = jaccard_similarity(&target_artifacts, &candidate_artifacts);
            let score = STEP_KEY_WEIGHT * step_score + ARTIFACT_HASH_WEIGHT * artifact_score;
            let fingerprint = hash_canonical(&SimilarRunFingerprintInput { steps: candidate_steps, artifacts: &candidate_artifacts })
                .map_err(|err| StoreError::NotFound(format!("failed to hash run {candidate}: {err}")))?
                .value;
            Ok(SimilarRun { run_id: candidate.clone(), score, fingerprint })
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

    let mut scored: Vec<SimilarRun> = scored.into_iter().filter(|similar| similar.score >= SIMILARITY_THRESHOLD).collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.run_id.cmp(&b.run_id)));
    scored.truncate(limit);
    Ok(scored)
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

    fn step(index: i64, tool: Option<&str>, artifact_hash: Option<&str>) -> RunStepInput {
        RunStepInput {
            step_index: index,
            tool: tool.map(ToolName::new),
            step_type: None,
            name: None,
            plugin: Some(PackId::new("pack-a")),
            event_type: None,
            event: serde_json::json!({"index": index}),
            artifact_hash: artifact_hash.map(str::to_string),
        }
    }

    #[test]
    fn derive_step_key_prefers_tool_then_type_name_then_type_then_unknown() {
        let with_tool = RunStepInput {
            step_index: 0,
            tool: Some(ToolName::new("read_file")),
            step_type: Some("action".to_string()),
            name: Some("ignored".to_string()),
            plugin: None,
            event_type: None,
            event: Value::Null,
            artifact_hash: None,
        };
        assert_eq!(derive_step_key(&with_tool), "tool:read_file");

        let type_and_name = RunStepInput {
            step_index: 0,
            tool: None,
            step_type: Some("action".to_string()),
            name: Some("deploy".to_string()),
            plugin: None,
            event_type: None,
            event: Value::Null,
            artifact_hash: None,
        };
        assert_eq!(derive_step_key(&type_and_name), "action:deploy");

        let type_only = RunStepInput {
            step_index: 0,
            tool: None,
            step_type: Some("gate".to_string()),
            name: None,
            plugin: None,
            event_type: None,
            event: Value::Null,
            artifact_hash: None,
        };
        assert_eq!(derive_step_key(&type_only), "gate");

        let unknown = RunStepInput {
            step_index: 0,
            tool: None,
            step_type: None,
            name: None,
            plugin: None,
            event_type: None,
            event: Value::Null,
            artifact_hash: None,
        };
        assert_eq!(derive_step_key(&unknown), "unknown");
    }

    #[test]
    fn index_run_records_each_step_and_updates_frequency() {
        let mut conn = open_test_db();
        let steps = vec![step(0, Some("read_file"), Some("hash-a")), step(1, Some("write_file"), Some("hash-b"))];
        let records = index_run(&mut conn, "run-1", "pipeline-x", &steps, Timestamp::from_millis(1_000)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].proof_hash.len(), 16);

        let freq = get_step_frequency(&conn, "tool:read_file").unwrap().unwrap();
        assert_eq!(freq.count, 1);
    }

    #[test]
    fn proof_hash_differs_when_run_id_differs() {
        let mut conn = open_test_db();
        let steps = vec![step(0, Some("read_file"), None)];
        let first = index_run(&mut conn, "run-a", "pipeline-x", &steps, Timestamp::from_millis(1)).unwrap();
        let second = index_run(&mut conn, "run-b", "pipeline-x", &steps, Timestamp::from_millis(2)).unwrap();
        assert_ne!(first[0].proof_hash, second[0].proof_hash);
    }

    #[test]
    fn search_similar_ranks_shared_steps_and_artifacts_higher() {
        let mut conn = open_test_db();
        index_run(
            &mut conn,
            "run-1",
            "pipeline-x",
            &[step(0, Some("read_file"), Some("hash-a")), step(1, Some("write_file"), Some("hash-b"))],
            Timestamp::from_millis(1),
        )
        .unwrap();
        index_run(
            &mut conn,
            "run-2",
            "pipeline-x",
            &[step(0, Some("read_file"), Some("hash-a")), step(1, Some("write_file"), Some("hash-b"))],
            Timestamp::from_millis(2),
        )
        .unwrap();
        index_run(
            &mut conn,
            "run-3",
            "pipeline-x",
            &[step(0, Some("deploy_service"), Some("hash-z"))],
            Timestamp::from_millis(3),
        )
        .unwrap();

        let similar = search_similar(&conn, "run-1", 10).unwrap();
        assert_eq!(similar[0].run_id, "run-2");
        assert!((similar[0].score - 1.0).abs() < 1e-9);
        assert!(similar.iter().all(|s| s.run_id != "run-3"));
    }

    #[test]
    fn list_top_step_keys_orders_by_count_descending() {
        let mut conn = open_test_db();
        index_run(
            &mut conn,
            "run-1",
            "pipeline-x",
            &[step(0, Some("read_file"), None)],
            Timestamp::from_millis(1),
        )
        .unwrap();
        index_run(
            &mut conn,
            "run-2",
            "pipeline-x",
            &[step(0, Some("read_file"), None), step(1, Some("write_file"), None)],
            Timestamp::from_millis(2),
        )
        .unwrap();

        let top = list_top_step_keys(&conn, 10).unwrap();
        assert_eq!(top[0].step_key, "tool:read_file");
        assert_eq!(top[0].count, 2);
    }
}
