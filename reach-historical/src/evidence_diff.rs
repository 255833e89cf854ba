// reach-historical/src/evidence_diff.rs
// ============================================================================
// Module: Evidence Diff
// Description: Build a displayable diff between a run and its history: a
//              similarity overlay, change-intensity scoring, volatility
//              ranking, and a styled visualization graph.
// Purpose: The presentation layer over the Lineage Index, Drift Detector,
//          and Baseline Manager, with no SQLite access of its own.
// Dependencies: reach-core (identifiers), rusqlite (via lineage query)
// ============================================================================

//! ## Overview
//! Evidence diff composes three other historical managers rather than
//! owning storage: it calls into the Lineage Index for similar-run overlay,
//! reuses the Drift Detector's step volatility ranking, and classifies the
//! Baseline Manager's deltas into a display-ready graph. A fixed color
//! palette is assigned to nodes by position so the same step always renders
//! the same color within one diff, without needing a stable global palette
//! keyed by step identity.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use reach_core::hashing::hash_canonical;
use rusqlite::Connection;

use crate::baseline::ChangeKind;
use crate::baseline::ComparisonResult;
use crate::baseline::Delta;
use crate::baseline::RunSnapshot;
use crate::baseline::diff_snapshots;
use crate::db::StoreError;
use crate::drift::StepVolatility;
use crate::drift::VOLATILITY_SCALE;
use crate::drift::risk_band;
use crate::lineage::RunStepInput;
use crate::lineage::SimilarRun;
use crate::lineage::derive_step_key;
use crate::lineage::search_similar;

/// Fixed display palette, assigned to graph nodes by position.
const DISPLAY_PALETTE: &[&str] = &["#4C72B0", "#DD8452", "#55A868", "#C44E52", "#8172B2", "#937860", "#DA8BC3"];

/// Change-intensity band boundaries.
const LEVEL_LOW_AT: f64 = 0.1;
const LEVEL_MODERATE_AT: f64 = 0.3;
const LEVEL_HIGH_AT: f64 = 0.5;
const LEVEL_EXTREME_AT: f64 = 0.8;

/// Qualitative change-intensity band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeIntensityLevel {
    /// Score below 0.1.
    Minimal,
    /// Score in `[0.1, 0.3)`.
    Low,
    /// Score in `[0.3, 0.5)`.
    Moderate,
    /// Score in `[0.5, 0.8)`.
    High,
    /// Score at or above 0.8.
    Extreme,
}

/// Classifies a change-intensity score (fraction of deltas that are not
/// [`ChangeKind::Unchanged`]) into a [`ChangeIntensityLevel`].
#[must_use]
pub fn classify_change_intensity(score: f64) -> ChangeIntensityLevel {
    if score >= LEVEL_EXTREME_AT {
        ChangeIntensityLevel::Extreme
    } else if score >= LEVEL_HIGH_AT {
        ChangeIntensityLevel::High
    } else if score >= LEVEL_MODERATE_AT {
        ChangeIntensityLevel::Moderate
    } else if score >= LEVEL_LOW_AT {
        ChangeIntensityLevel::Low
    } else {
        ChangeIntensityLevel::Minimal
    }
}

/// A similar historical run, annotated with a display color.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayEntry {
    /// The similar run.
    pub similar: SimilarRun,
    /// Canonical hash fingerprint of the similar run's evidence, copied from
    /// [`SimilarRun::fingerprint`] for display convenience.
    pub fingerprint: String,
    /// Display color assigned by overlay position.
    pub color: &'static str,
}

/// Finds prior runs similar to `run_id` and assigns each a display color by
/// rank, brightest/first color to the closest match.
///
/// # Errors
///
/// Returns [`StoreError::Sqlite`] if the underlying query fails.
pub fn historical_overlay(conn: &Connection, run_id: &str, limit: i64) -> Result<Vec<OverlayEntry>, StoreError> {
    let similar = search_similar(conn, run_id, limit)?;
    Ok(similar
        .into_iter()
        .enumerate()
        .map(|(i, similar)| OverlayEntry {
            fingerprint: similar.fingerprint.clone(),
            similar,
            color: DISPLAY_PALETTE[i % DISPLAY_PALETTE.len()],
        })
        .collect())
}

/// A step ranked by volatility, with its rank position.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedVolatility {
    /// Rank, starting at 1 for the most volatile step.
    pub rank: usize,
    /// The underlying volatility record.
    pub volatility: StepVolatility,
}

/// Ranks a drift report's step volatilities, most volatile first.
///
/// `step_volatility` is expected to already be sorted descending by score
/// (as [`crate::drift::analyze_drift`] produces it); this only attaches
/// rank numbers.
#[must_use]
pub fn rank_step_volatility(step_volatility: &[StepVolatility]) -> Vec<RankedVolatility> {
    step_volatility
        .iter()
        .enumerate()
        .map(|(i, v)| RankedVolatility { rank: i + 1, volatility: v.clone() })
        .collect()
}

/// A node in the evidence diff visualization graph.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    /// Step or artifact key.
    pub key: String,
    /// How this node changed relative to the baseline.
    pub change_kind: ChangeKind,
    /// Assigned display color.
    pub color: &'static str,
}

/// A sequential-dependency edge between two consecutive nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    /// Source node key.
    pub from: String,
    /// Destination node key.
    pub to: String,
    /// Visual style, derived from the destination node's change kind.
    pub style: EdgeStyle,
}

/// Visual style for a graph edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeStyle {
    /// Destination is unchanged: solid, neutral.
    Solid,
    /// Destination was modified: dashed.
    Dashed,
    /// Destination was removed: dotted, typically rendered in the delta's
    /// pre-removal position.
    Dotted,
    /// Destination was newly added: bold.
    Bold,
}

fn edge_style_for(kind: ChangeKind) -> EdgeStyle {
    match kind {
        ChangeKind::Unchanged => EdgeStyle::Solid,
        ChangeKind::Modified => EdgeStyle::Dashed,
        ChangeKind::Removed => EdgeStyle::Dotted,
        ChangeKind::Added => EdgeStyle::Bold,
    }
}

/// Risk impact at or above which a delta earns a textual annotation.
const HIGH_RISK_ANNOTATION_IMPACT: f64 = 0.5;

/// A full visualization graph: nodes colored by position, edges styled by
/// the destination node's change kind, connecting consecutive steps in
/// declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VisualizationGraph {
    /// Graph nodes, in declaration order.
    pub nodes: Vec<GraphNode>,
    /// Sequential-dependency edges between consecutive nodes.
    pub edges: Vec<GraphEdge>,
    /// Textual callouts for deltas at or above [`HIGH_RISK_ANNOTATION_IMPACT`].
    pub annotations: Vec<String>,
}

fn annotation_for(delta: &Delta) -> String {
    let verb = match delta.kind {
        ChangeKind::Unchanged => "unchanged",
        ChangeKind::Modified => "modified",
        ChangeKind::Removed => "removed",
        ChangeKind::Added => "added",
    };
    format!("{} {verb} (impact {:.1})", delta.key, delta.impact)
}

/// Builds a visualization graph from a baseline comparison's step deltas, in
/// the order they were declared.
#[must_use]
pub fn build_visualization(comparison: &ComparisonResult) -> VisualizationGraph {
    let nodes: Vec<GraphNode> = comparison
        .step_deltas
        .iter()
        .enumerate()
        .map(|(i, delta)| GraphNode {
            key: delta.key.clone(),
            change_kind: delta.kind,
            color: DISPLAY_PALETTE[i % DISPLAY_PALETTE.len()],
        })
        .collect();

    let edges = nodes
        .windows(2)
        .map(|pair| GraphEdge { from: pair[0].key.clone(), to: pair[1].key.clone(), style: edge_style_for(pair[1].change_kind) })
        .collect();

    let annotations = comparison
        .step_deltas
        .iter()
        .filter(|delta| delta.impact >= HIGH_RISK_ANNOTATION_IMPACT)
        .map(annotation_for)
        .collect();

    VisualizationGraph { nodes, edges, annotations }
}

// ============================================================================
// SECTION: Evidence Diff
// ============================================================================

/// A full evidence diff between a reference run and a comparison run,
/// assembled from the Lineage Index, Baseline Manager diff scoring, and the
/// visualization builder above.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceDiff {
    /// The reference run's id.
    pub ref_run: String,
    /// The comparison run's id.
    pub cmp_run: String,
    /// Runs historically similar to the comparison run.
    pub historical_overlay: Vec<OverlayEntry>,
    /// Overall change-intensity classification between the two runs.
    pub change_intensity: ChangeIntensityLevel,
    /// Per-step deltas between the two runs.
    pub step_deltas: Vec<Delta>,
    /// Per-step volatility across the two runs' combined events, most
    /// volatile first.
    pub step_volatility: Vec<RankedVolatility>,
    /// Display-ready visualization graph.
    pub visualization: VisualizationGraph,
}

/// Content hash of a step's event payload, independent of which run it came
/// from. Deliberately does not reuse [`crate::lineage::proof_hash`], which
/// salts with `run_id` for per-run audit purposes; a snapshot used to diff
/// two different runs needs a hash that agrees when the content agrees.
fn content_hash(event: &serde_json::Value) -> Result<String, StoreError> {
    hash_canonical(event).map(|digest| digest.truncated(16)).map_err(|err| StoreError::NotFound(format!("failed to hash event: {err}")))
}

fn snapshot_from_events(steps: &[RunStepInput]) -> Result<RunSnapshot, StoreError> {
    let mut snapshot = RunSnapshot::default();
    for step in steps {
        let key = derive_step_key(step);
        let hash = content_hash(&step.event)?;
        snapshot.steps.insert(key.clone(), hash);
        if let Some(artifact_hash) = &step.artifact_hash {
            snapshot.artifacts.insert(key, artifact_hash.clone());
        }
    }
    Ok(snapshot)
}

fn change_intensity_score(comparison: &ComparisonResult) -> f64 {
    let total = comparison.step_deltas.len() + comparison.artifact_deltas.len();
    if total == 0 {
        return 0.0;
    }
    let changed = comparison.step_deltas.iter().chain(&comparison.artifact_deltas).filter(|d| d.kind != ChangeKind::Unchanged).count();
    #[allow(clippy::cast_precision_loss, reason = "delta counts are small, bounded values")]
    {
        changed as f64 / total as f64
    }
}

/// Ranks step volatility across the combined step-key -> proof-hash maps of
/// two runs: a step key with the same hash in both runs has one distinct
/// proof and scores low; a step key with different hashes has two and scores
/// higher. Uses the same scale and risk bands as [`crate::drift::analyze_drift`].
fn combined_step_volatility(reference: &RunSnapshot, current: &RunSnapshot) -> Vec<RankedVolatility> {
    let mut hashes_by_step: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (key, hash) in reference.steps.iter().chain(current.steps.iter()) {
        hashes_by_step.entry(key.clone()).or_default().insert(hash.clone());
    }

    let mut volatility: Vec<StepVolatility> = hashes_by_step
        .into_iter()
        .map(|(step_key, hashes)| {
            #[allow(clippy::cast_precision_loss, reason = "distinct-proof counts are small, bounded values")]
            let score: f64 = (hashes.len() as f64 / VOLATILITY_SCALE).min(1.0);
            StepVolatility { step_key, score, risk: risk_band(score) }
        })
        .collect();
    volatility.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    rank_step_volatility(&volatility)
}

/// Composes the Lineage Index, Baseline Manager, and visualization builder
/// into one evidence diff between `ref_run` and `cmp_run`.
///
/// # Errors
///
/// Returns [`StoreError`] if hashing either run's events fails or the
/// historical overlay query fails.
pub fn compute_evidence_diff(
    conn: &Connection,
    ref_run: &str,
    cmp_run: &str,
    ref_events: &[RunStepInput],
    cmp_events: &[RunStepInput],
    overlay_limit: i64,
) -> Result<EvidenceDiff, StoreError> {
    let ref_snapshot = snapshot_from_events(ref_events)?;
    let cmp_snapshot = snapshot_from_events(cmp_events)?;

    let comparison = diff_snapshots(&ref_snapshot, &cmp_snapshot);
    let change_intensity = classify_change_intensity(change_intensity_score(&comparison));
    let overlay = historical_overlay(conn, cmp_run, overlay_limit)?;
    let step_volatility = combined_step_volatility(&ref_snapshot, &cmp_snapshot);
    let visualization = build_visualization(&comparison);

    Ok(EvidenceDiff {
        ref_run: ref_run.to_string(),
        cmp_run: cmp_run.to_string(),
        historical_overlay: overlay,
        change_intensity,
        step_deltas: comparison.step_deltas,
        step_volatility,
        visualization,
    })
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
    use crate::baseline::Delta;
    use reach_core::time::Timestamp;

    fn comparison_with(deltas: Vec<Delta>) -> ComparisonResult {
        ComparisonResult {
            step_deltas: deltas,
            artifact_deltas: Vec::new(),
            risk_score: 0.0,
            level: crate::baseline::RiskLevel::Low,
            approved: true,
        }
    }

    #[test]
    fn classify_change_intensity_covers_all_bands() {
        assert_eq!(classify_change_intensity(0.0), ChangeIntensityLevel::Minimal);
        assert_eq!(classify_change_intensity(0.1), ChangeIntensityLevel::Low);
        assert_eq!(classify_change_intensity(0.3), ChangeIntensityLevel::Moderate);
        assert_eq!(classify_change_intensity(0.5), ChangeIntensityLevel::High);
        assert_eq!(classify_change_intensity(0.8), ChangeIntensityLevel::Extreme);
    }

    #[test]
    fn rank_step_volatility_assigns_rank_in_input_order() {
        let volatilities = vec![
            StepVolatility { step_key: "tool:a".to_string(), score: 0.9, risk: crate::drift::RiskBand::High },
            StepVolatility { step_key: "tool:b".to_string(), score: 0.2, risk: crate::drift::RiskBand::Low },
        ];
        let ranked = rank_step_volatility(&volatilities);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].rank, 2);
        assert_eq!(ranked[0].volatility.step_key, "tool:a");
    }

    #[test]
    fn build_visualization_links_consecutive_steps_with_styled_edges() {
        let comparison = comparison_with(vec![
            Delta { key: "tool:a".to_string(), kind: ChangeKind::Unchanged, impact: 0.0 },
            Delta { key: "tool:b".to_string(), kind: ChangeKind::Modified, impact: 0.5 },
            Delta { key: "tool:c".to_string(), kind: ChangeKind::Added, impact: 0.3 },
        ]);
        let graph = build_visualization(&comparison);
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.edges.len(), 2);
        assert_eq!(graph.edges[0].style, EdgeStyle::Dashed);
        assert_eq!(graph.edges[1].style, EdgeStyle::Bold);
    }

    #[test]
    fn build_visualization_annotates_only_high_impact_deltas() {
        let comparison = comparison_with(vec![
            Delta { key: "tool:a".to_string(), kind: ChangeKind::Unchanged, impact: 0.0 },
            Delta { key: "tool:b".to_string(), kind: ChangeKind::Removed, impact: 0.8 },
        ]);
        let graph = build_visualization(&comparison);
        assert_eq!(graph.annotations.len(), 1);
        assert!(graph.annotations[0].contains("tool:b"));
        assert!(graph.annotations[0].contains("removed"));
    }

    fn step(index: i64, tool: &str, event: serde_json::Value) -> RunStepInput {
        RunStepInput {
            step_index: index,
            tool: Some(reach_core::identifiers::ToolName::new(tool)),
            step_type: None,
            name: None,
            plugin: None,
            event_type: None,
            event,
            artifact_hash: None,
        }
    }

    #[test]
    fn compute_evidence_diff_assembles_overlay_deltas_and_volatility() {
        let mut conn = Connection::open_in_memory().unwrap();
        crate::lineage::ensure_schema(&conn).unwrap();

        let history = vec![step(0, "build", serde_json::json!({"v": 1})), step(1, "test", serde_json::json!({"v": 1}))];
        crate::lineage::index_run(&mut conn, "run-history", "pipeline-x", &history, Timestamp::from_millis(0)).unwrap();

        let ref_events = vec![step(0, "build", serde_json::json!({"v": 1})), step(1, "test", serde_json::json!({"v": 1}))];
        let cmp_events = vec![step(0, "build", serde_json::json!({"v": 2})), step(1, "test", serde_json::json!({"v": 1}))];
        crate::lineage::index_run(&mut conn, "run-cmp", "pipeline-x", &cmp_events, Timestamp::from_millis(1)).unwrap();

        let diff = compute_evidence_diff(&conn, "run-ref", "run-cmp", &ref_events, &cmp_events, 10).unwrap();

        assert_eq!(diff.ref_run, "run-ref");
        assert_eq!(diff.cmp_run, "run-cmp");
        assert_eq!(diff.step_deltas.len(), 2);
        let build_delta = diff.step_deltas.iter().find(|d| d.key == "tool:build").unwrap();
        assert_eq!(build_delta.kind, ChangeKind::Modified);
        assert_eq!(diff.step_volatility.len(), 2);
        assert!(diff.historical_overlay.iter().any(|entry| entry.similar.run_id == "run-history"));
        assert!(diff.historical_overlay.iter().all(|entry| !entry.fingerprint.is_empty()));
    }
}
