// reach-historical/src/trend.rs
// ============================================================================
// Module: Trend Metrics
// Description: Rolling metric history, trust volatility, step-stability
//              percentiles, anomaly detection, and short-horizon forecasts.
// Purpose: Turn a metric time series into the numbers an operator actually
//          reads: "is this stable", "is this an outlier", "where is this
//          headed".
// Dependencies: rusqlite, reach-core (time)
// ============================================================================

//! ## Overview
//! Metrics are recorded one value at a time under a `(pipeline,
//! metric_name)` key and read back as an ordered time series. Everything in
//! this module — volatility, percentiles, anomalies, forecasts — is a pure
//! function of that series; only [`record_metric`] and [`metric_history`]
//! touch SQLite.

use reach_core::time::Timestamp;
use rusqlite::Connection;
use rusqlite::params;

use crate::db::StoreError;
use crate::db::effective_limit;
use crate::stats::ZScoreAnomaly;
use crate::stats::coefficient_of_variation;
use crate::stats::detect_zscore_anomalies;
use crate::stats::linear_regression;
use crate::stats::stddev;

/// Default number of historical points returned by [`metric_history`].
const DEFAULT_HISTORY_LIMIT: usize = 200;

/// Days forecast ahead by [`forecast`].
pub const FORECAST_HORIZON_DAYS: usize = 7;

/// Z-score multiplier for a 95% confidence interval under a normal residual
/// distribution.
const CONFIDENCE_95_Z: f64 = 1.96;

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Creates the metric history table if it does not already exist.
///
/// # Errors
///
/// Returns [`StoreError::Sqlite`] if table creation fails.
pub fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS metric_history (
            pipeline TEXT NOT NULL,
            metric_name TEXT NOT NULL,
            recorded_at INTEGER NOT NULL,
            value REAL NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_metric_history_lookup
            ON metric_history (pipeline, metric_name, recorded_at);",
    )?;
    Ok(())
}

// ============================================================================
// SECTION: Recording and retrieval
// ============================================================================

/// One recorded metric sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSample {
    /// When the sample was recorded.
    pub recorded_at: Timestamp,
    /// The sampled value.
    pub value: f64,
}

/// Records one metric sample for `pipeline`.
///
/// # Errors
///
/// Returns [`StoreError::Sqlite`] if the insert fails.
pub fn record_metric(conn: &Connection, pipeline: &str, metric_name: &str, value: f64, now: Timestamp) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO metric_history (pipeline, metric_name, recorded_at, value) VALUES (?1, ?2, ?3, ?4)",
        params![pipeline, metric_name, now.as_millis(), value],
    )?;
    Ok(())
}

/// Returns up to `limit` of the most recent samples for `metric_name`,
/// oldest first.
///
/// # Errors
///
/// Returns [`StoreError::Sqlite`] if the query fails.
pub fn metric_history(conn: &Connection, pipeline: &str, metric_name: &str, limit: i64) -> Result<Vec<MetricSample>, StoreError> {
    let limit = effective_limit(limit, DEFAULT_HISTORY_LIMIT);
    let mut stmt = conn.prepare(
        "SELECT recorded_at, value FROM (
            SELECT recorded_at, value FROM metric_history
            WHERE pipeline = ?1 AND metric_name = ?2
            ORDER BY recorded_at DESC LIMIT ?3
         ) ORDER BY recorded_at ASC",
    )?;
    #[allow(clippy::cast_possible_wrap, reason = "history limits are small, bounded values")]
    let rows = stmt.query_map(params![pipeline, metric_name, limit as i64], |row| {
        Ok(MetricSample { recorded_at: Timestamp::from_millis(row.get(0)?), value: row.get(1)? })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

// ============================================================================
// SECTION: Volatility
// ============================================================================

/// Trust volatility index: coefficient of variation of a trust metric's
/// history. Higher means less stable.
#[must_use]
pub fn trust_volatility_index(samples: &[MetricSample]) -> f64 {
    let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    coefficient_of_variation(&values)
}

// ============================================================================
// SECTION: Percentiles
// ============================================================================

/// p50/p90/p99 of a step-stability metric's history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityPercentiles {
    /// Median.
    pub p50: f64,
    /// 90th percentile.
    pub p90: f64,
    /// 99th percentile.
    pub p99: f64,
}

/// Linear-interpolated percentile of `sorted_values` (must already be sorted
/// ascending) at `pct` in `[0, 100]`.
fn percentile(sorted_values: &[f64], pct: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }
    if sorted_values.len() == 1 {
        return sorted_values[0];
    }
    #[allow(clippy::cast_precision_loss, reason = "sample counts are small, bounded values")]
    let rank = (pct / 100.0) * (sorted_values.len() - 1) as f64;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "rank is derived from a non-negative, bounded-length slice"
    )]
    let (lower, upper) = (rank.floor() as usize, rank.ceil() as usize);
    if lower == upper {
        return sorted_values[lower];
    }
    let weight = rank - lower as f64;
    sorted_values[lower] + (sorted_values[upper] - sorted_values[lower]) * weight
}

/// Computes p50/p90/p99 of a step-stability metric's history.
#[must_use]
pub fn stability_percentiles(samples: &[MetricSample]) -> StabilityPercentiles {
    let mut values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    StabilityPercentiles { p50: percentile(&values, 50.0), p90: percentile(&values, 90.0), p99: percentile(&values, 99.0) }
}

// ============================================================================
// SECTION: Anomaly detection
// ============================================================================

/// Flags samples in `samples` whose value is a z-score outlier, returning
/// the underlying sample alongside its anomaly classification.
#[must_use]
pub fn detect_anomalies(samples: &[MetricSample]) -> Vec<(MetricSample, ZScoreAnomaly)> {
    let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    detect_zscore_anomalies(&values).into_iter().map(|a| (samples[a.index], a)).collect()
}

// ============================================================================
// SECTION: Forecast
// ============================================================================

/// A forecast point with a 95% confidence interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastPoint {
    /// Days ahead of the last observed sample.
    pub days_ahead: usize,
    /// Point prediction.
    pub predicted: f64,
    /// Lower bound of the 95% confidence interval.
    pub lower_95: f64,
    /// Upper bound of the 95% confidence interval.
    pub upper_95: f64,
}

/// Forecasts the next [`FORECAST_HORIZON_DAYS`] days of a metric using a
/// linear fit over its history, with a 95% confidence interval derived from
/// the fit's residual standard deviation.
///
/// Returns an empty forecast for fewer than two samples.
#[must_use]
pub fn forecast(samples: &[MetricSample]) -> Vec<ForecastPoint> {
    if samples.len() < 2 {
        return Vec::new();
    }
    let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    let fit = linear_regression(&values);

    #[allow(clippy::cast_precision_loss, reason = "sample counts are small, bounded values")]
    let residuals: Vec<f64> = values
        .iter()
        .enumerate()
        .map(|(i, y)| y - (fit.slope * i as f64 + fit.intercept))
        .collect();
    let residual_stddev = stddev(&residuals);
    let margin = CONFIDENCE_95_Z * residual_stddev;

    (1..=FORECAST_HORIZON_DAYS)
        .map(|days_ahead| {
            #[allow(clippy::cast_precision_loss, reason = "sample counts are small, bounded values")]
            let x = (values.len() - 1 + days_ahead) as f64;
            let predicted = fit.slope * x + fit.intercept;
            ForecastPoint { days_ahead, predicted, lower_95: predicted - margin, upper_95: predicted + margin }
        })
        .collect()
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

    fn samples(values: &[f64]) -> Vec<MetricSample> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| MetricSample { recorded_at: Timestamp::from_millis(i as i64 * 86_400_000), value: *v })
            .collect()
    }

    #[test]
    fn metric_history_returns_samples_oldest_first() {
        let conn = open_test_db();
        for (i, value) in [1.0, 2.0, 3.0].into_iter().enumerate() {
            record_metric(&conn, "pipeline-x", "trust", value, Timestamp::from_millis(i as i64 * 1000)).unwrap();
        }
        let history = metric_history(&conn, "pipeline-x", "trust", 10).unwrap();
        assert_eq!(history.iter().map(|s| s.value).collect::<Vec<_>>(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn trust_volatility_index_is_zero_for_constant_series() {
        let s = samples(&[0.9, 0.9, 0.9]);
        assert_eq!(trust_volatility_index(&s), 0.0);
    }

    #[test]
    fn stability_percentiles_match_known_distribution() {
        let s = samples(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let p = stability_percentiles(&s);
        assert!((p.p50 - 3.0).abs() < 1e-9);
    }

    #[test]
    fn detect_anomalies_flags_the_spike_sample() {
        let s = samples(&[1.0, 1.0, 1.0, 1.0, 10.0]);
        let anomalies = detect_anomalies(&s);
        assert_eq!(anomalies.len(), 1);
        assert!(anomalies[0].1.is_spike);
    }

    #[test]
    fn forecast_extrapolates_linear_trend() {
        let s = samples(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let points = forecast(&s);
        assert_eq!(points.len(), FORECAST_HORIZON_DAYS);
        assert!((points[0].predicted - 6.0).abs() < 1e-9);
        assert!(points[0].lower_95 <= points[0].predicted);
        assert!(points[0].upper_95 >= points[0].predicted);
    }

    #[test]
    fn forecast_is_empty_for_insufficient_history() {
        let s = samples(&[1.0]);
        assert!(forecast(&s).is_empty());
    }
}
