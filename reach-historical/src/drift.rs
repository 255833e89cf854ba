// reach-historical/src/drift.rs
// ============================================================================
// Module: Drift Detector
// Description: Track run metrics and step proofs over time; analyze drift in
//              reproducibility, trust, and chaos sensitivity.
// Purpose: Surface when a pipeline's behavior is trending away from its
//          historical baseline before it becomes a visible incident.
// Dependencies: rusqlite, reach-core (time), serde
// ============================================================================

//! ## Overview
//! Every run contributes one row of daily metrics and zero or more step
//! proof observations. [`analyze_drift`] aggregates both over a trailing
//! window: the variance of daily unique-proof counts, a linear trend per
//! tracked metric, and a per-step volatility score, then rolls all three up
//! into a bounded risk score and a small set of named alerts.

use std::collections::BTreeMap;

use reach_core::time::Timestamp;
use rusqlite::Connection;
use rusqlite::params;

use crate::db::StoreError;
use crate::stats::TrendDirection;
use crate::stats::classify_trend;
use crate::stats::linear_regression;
use crate::stats::stddev;

/// Trend slope magnitude below which a metric is considered flat.
const FLAT_BAND: f64 = 0.005;

/// Chaos-sensitivity slope above which the alert is raised as critical.
const CHAOS_CRITICAL_SLOPE: f64 = 0.01;

/// Stddev-of-daily-unique-proofs threshold above which an alert fires.
const UNIQUE_PROOF_STDDEV_ALERT: f64 = 2.0;

/// Per-step volatility above which an alert fires.
const STEP_VOLATILITY_ALERT: f64 = 0.6;

/// Divisor used to scale a step's distinct-proof count into a `[0, 1]`
/// volatility score (10 distinct proofs in the window saturates at 1.0).
pub(crate) const VOLATILITY_SCALE: f64 = 10.0;

/// Risk-score band boundaries for the overall health summary.
const HEALTH_DEGRADED_AT: f64 = 40.0;
const HEALTH_CRITICAL_AT: f64 = 70.0;

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Creates the drift tables if they do not already exist.
///
/// # Errors
///
/// Returns [`StoreError::Sqlite`] if table creation fails.
pub fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS run_metrics (
            pipeline TEXT NOT NULL,
            run_id TEXT NOT NULL,
            recorded_at INTEGER NOT NULL,
            reproducibility REAL NOT NULL,
            trust REAL NOT NULL,
            chaos_sensitivity REAL NOT NULL,
            PRIMARY KEY (pipeline, run_id)
        );
        CREATE TABLE IF NOT EXISTS step_proofs (
            pipeline TEXT NOT NULL,
            run_id TEXT NOT NULL,
            step_key TEXT NOT NULL,
            proof_hash TEXT NOT NULL,
            recorded_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_step_proofs_pipeline ON step_proofs (pipeline, recorded_at);",
    )?;
    Ok(())
}

// ============================================================================
// SECTION: Recording
// ============================================================================

/// One run's summary metrics, as recorded by [`record_run_metrics`].
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunMetrics {
    /// Fraction of steps whose proof hash matched the prior run, in `[0, 1]`.
    pub reproducibility: f64,
    /// Aggregate trust score for the run, in `[0, 1]`.
    pub trust: f64,
    /// Sensitivity of the run's outcome to nondeterministic inputs, in `[0, 1]`.
    pub chaos_sensitivity: f64,
}

/// Records one run's summary metrics.
///
/// # Errors
///
/// Returns [`StoreError::Sqlite`] if the insert fails.
pub fn record_run_metrics(
    conn: &Connection,
    pipeline: &str,
    run_id: &str,
    metrics: RunMetrics,
    now: Timestamp,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO run_metrics (pipeline, run_id, recorded_at, reproducibility, trust, chaos_sensitivity)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(pipeline, run_id) DO UPDATE SET
            recorded_at = excluded.recorded_at,
            reproducibility = excluded.reproducibility,
            trust = excluded.trust,
            chaos_sensitivity = excluded.chaos_sensitivity",
        params![pipeline, run_id, now.as_millis(), metrics.reproducibility, metrics.trust, metrics.chaos_sensitivity],
    )?;
    Ok(())
}

/// Records one step's proof hash observation for a run.
///
/// # Errors
///
/// Returns [`StoreError::Sqlite`] if the insert fails.
pub fn record_step_proof(
    conn: &Connection,
    pipeline: &str,
    run_id: &str,
    step_key: &str,
    proof_hash: &str,
    now: Timestamp,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO step_proofs (pipeline, run_id, step_key, proof_hash, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![pipeline, run_id, step_key, proof_hash, now.as_millis()],
    )?;
    Ok(())
}

// ============================================================================
// SECTION: Analysis
// ============================================================================

/// Per-metric trend classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricTrend {
    /// Fitted slope over the analysis window.
    pub slope: f64,
    /// Coefficient of determination of the fit, in `[0, 1]`.
    pub r_squared: f64,
    /// Direction classification.
    pub direction: TrendDirection,
}

/// Per-step volatility, scored `0.0` (stable) to `1.0` (highly volatile).
#[derive(Debug, Clone, PartialEq)]
pub struct StepVolatility {
    /// The step key.
    pub step_key: String,
    /// Volatility score in `[0, 1]`.
    pub score: f64,
    /// Risk band derived from `score`.
    pub risk: RiskBand,
}

/// Qualitative risk band for a volatility score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskBand {
    /// Score below 0.3.
    Low,
    /// Score in `[0.3, 0.6)`.
    Medium,
    /// Score at or above 0.6.
    High,
}

pub(crate) fn risk_band(score: f64) -> RiskBand {
    if score >= 0.6 {
        RiskBand::High
    } else if score >= 0.3 {
        RiskBand::Medium
    } else {
        RiskBand::Low
    }
}

/// Overall qualitative health summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthSummary {
    /// Risk score below 40.
    Healthy,
    /// Risk score in `[40, 70)`.
    Degraded,
    /// Risk score at or above 70.
    Critical,
}

/// Full drift analysis for a pipeline over a trailing window.
#[derive(Debug, Clone, PartialEq)]
pub struct DriftReport {
    /// Variance of the number of distinct proof hashes observed per day.
    pub daily_unique_proof_variance: f64,
    /// Trend of the reproducibility metric.
    pub reproducibility_trend: MetricTrend,
    /// Trend of the trust metric.
    pub trust_trend: MetricTrend,
    /// Trend of the chaos-sensitivity metric.
    pub chaos_sensitivity_trend: MetricTrend,
    /// Volatility per step key, most volatile first.
    pub step_volatility: Vec<StepVolatility>,
    /// Named alerts raised by this analysis.
    pub alerts: Vec<String>,
    /// Overall risk score in `[0, 100]`.
    pub risk_score: f64,
    /// Qualitative summary derived from `risk_score`.
    pub summary: HealthSummary,
}

/// Analyzes drift for `pipeline` over the trailing `window_days`.
///
/// # Errors
///
/// Returns [`StoreError::Sqlite`] if the underlying queries fail.
pub fn analyze_drift(conn: &Connection, pipeline: &str, window_days: i64, now: Timestamp) -> Result<DriftReport, StoreError> {
    let window_start = now.as_millis() - window_days.max(1) * 86_400_000;

    let mut metrics_stmt = conn.prepare(
        "SELECT reproducibility, trust, chaos_sensitivity FROM run_metrics
         WHERE pipeline = ?1 AND recorded_at >= ?2 ORDER BY recorded_at ASC",
    )?;
    let rows = metrics_stmt.query_map(params![pipeline, window_start], |row| {
        Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?, row.get::<_, f64>(2)?))
    })?;
    let (mut reproducibility, mut trust, mut chaos) = (Vec::new(), Vec::new(), Vec::new());
    for row in rows {
        let (r, t, c) = row?;
        reproducibility.push(r);
        trust.push(t);
        chaos.push(c);
    }

    let mut proof_stmt = conn.prepare(
        "SELECT recorded_at, step_key, proof_hash FROM step_proofs WHERE pipeline = ?1 AND recorded_at >= ?2",
    )?;
    let proof_rows = proof_stmt.query_map(params![pipeline, window_start], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
    })?;

    let mut proofs_by_day: BTreeMap<i64, std::collections::BTreeSet<String>> = BTreeMap::new();
    let mut proofs_by_step: BTreeMap<String, std::collections::BTreeSet<String>> = BTreeMap::new();
    for row in proof_rows {
        let (recorded_at, step_key, proof_hash) = row?;
        let day = recorded_at / 86_400_000;
        proofs_by_day.entry(day).or_default().insert(proof_hash.clone());
        proofs_by_step.entry(step_key).or_default().insert(proof_hash);
    }

    #[allow(clippy::cast_precision_loss, reason = "daily distinct-proof counts are small, bounded values")]
    let daily_counts: Vec<f64> = proofs_by_day.values().map(|set| set.len() as f64).collect();
    let daily_unique_proof_variance = crate::stats::variance(&daily_counts);

    let reproducibility_fit = linear_regression(&reproducibility);
    let trust_fit = linear_regression(&trust);
    let chaos_fit = linear_regression(&chaos);

    let reproducibility_trend = MetricTrend {
        slope: reproducibility_fit.slope,
        r_squared: reproducibility_fit.r_squared,
        direction: classify_trend(reproducibility_fit.slope, FLAT_BAND, true),
    };
    let trust_trend = MetricTrend {
        slope: trust_fit.slope,
        r_squared: trust_fit.r_squared,
        direction: classify_trend(trust_fit.slope, FLAT_BAND, true),
    };
    let chaos_sensitivity_trend = MetricTrend {
        slope: chaos_fit.slope,
        r_squared: chaos_fit.r_squared,
        direction: classify_trend(chaos_fit.slope, FLAT_BAND, false),
    };

    let mut step_volatility: Vec<StepVolatility> = proofs_by_step
        .iter()
        .map(|(step_key, hashes)| {
            #[allow(clippy::cast_precision_loss, reason = "per-step distinct-proof counts are small, bounded values")]
            let score = (hashes.len() as f64 / VOLATILITY_SCALE).min(1.0);
            StepVolatility { step_key: step_key.clone(), score, risk: risk_band(score) }
        })
        .collect();
    step_volatility.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut alerts = Vec::new();
    let unique_proof_stddev = stddev(&daily_counts);
    if unique_proof_stddev > UNIQUE_PROOF_STDDEV_ALERT {
        alerts.push(format!("daily unique proof count is unstable (stddev {unique_proof_stddev:.2})"));
    }
    if reproducibility_trend.direction == TrendDirection::Degrading {
        alerts.push("reproducibility is trending down".to_string());
    }
    if trust_trend.direction == TrendDirection::Degrading {
        alerts.push("trust is trending down".to_string());
    }
    if chaos_sensitivity_trend.direction == TrendDirection::Degrading || chaos_fit.slope > CHAOS_CRITICAL_SLOPE {
        alerts.push("chaos sensitivity is rising".to_string());
    }
    if step_volatility.iter().any(|s| s.score > STEP_VOLATILITY_ALERT) {
        alerts.push("one or more steps exceed the volatility threshold".to_string());
    }

    let chaos_critical = chaos_fit.slope > CHAOS_CRITICAL_SLOPE;
    let degrading_trends = [reproducibility_trend.direction, trust_trend.direction, chaos_sensitivity_trend.direction]
        .iter()
        .filter(|d| **d == TrendDirection::Degrading)
        .count();
    let max_volatility = step_volatility.first().map_or(0.0, |s| s.score);

    let mut risk_score = 0.0;
    risk_score += (unique_proof_stddev / UNIQUE_PROOF_STDDEV_ALERT).min(1.0) * 25.0;
    #[allow(clippy::cast_precision_loss, reason = "degrading trend count is at most 3")]
    {
        risk_score += (degrading_trends as f64 / 3.0) * 35.0;
    }
    risk_score += max_volatility * 25.0;
    if chaos_critical {
        risk_score += 15.0;
    }
    let risk_score = risk_score.min(100.0);

    let summary = if risk_score >= HEALTH_CRITICAL_AT {
        HealthSummary::Critical
    } else if risk_score >= HEALTH_DEGRADED_AT {
        HealthSummary::Degraded
    } else {
        HealthSummary::Healthy
    };

    Ok(DriftReport {
        daily_unique_proof_variance,
        reproducibility_trend,
        trust_trend,
        chaos_sensitivity_trend,
        step_volatility,
        alerts,
        risk_score,
        summary,
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

    fn open_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn analyze_drift_on_empty_pipeline_is_healthy() {
        let conn = open_test_db();
        let report = analyze_drift(&conn, "pipeline-x", 30, Timestamp::from_millis(1_000_000)).unwrap();
        assert_eq!(report.summary, HealthSummary::Healthy);
        assert!(report.alerts.is_empty());
    }

    #[test]
    fn analyze_drift_detects_degrading_reproducibility_trend() {
        let conn = open_test_db();
        let base = 10 * 86_400_000;
        let values = [0.95, 0.9, 0.8, 0.7, 0.6];
        for (day, reproducibility) in values.iter().enumerate() {
            let recorded_at = base + (day as i64) * 86_400_000;
            record_run_metrics(
                &conn,
                "pipeline-x",
                &format!("run-{day}"),
                RunMetrics { reproducibility: *reproducibility, trust: 0.9, chaos_sensitivity: 0.1 },
                Timestamp::from_millis(recorded_at),
            )
            .unwrap();
        }
        let now = Timestamp::from_millis(base + 6 * 86_400_000);
        let report = analyze_drift(&conn, "pipeline-x", 30, now).unwrap();
        assert_eq!(report.reproducibility_trend.direction, TrendDirection::Degrading);
        assert!(report.alerts.iter().any(|a| a.contains("reproducibility")));
    }

    #[test]
    fn analyze_drift_flags_volatile_step() {
        let conn = open_test_db();
        let base = 86_400_000;
        for i in 0..12 {
            record_step_proof(
                &conn,
                "pipeline-x",
                &format!("run-{i}"),
                "tool:flaky_step",
                &format!("hash-{i}"),
                Timestamp::from_millis(base),
            )
            .unwrap();
        }
        let report = analyze_drift(&conn, "pipeline-x", 30, Timestamp::from_millis(base + 1)).unwrap();
        let flaky = report.step_volatility.iter().find(|s| s.step_key == "tool:flaky_step").unwrap();
        assert_eq!(flaky.risk, RiskBand::High);
        assert!(report.alerts.iter().any(|a| a.contains("volatility")));
    }
}
