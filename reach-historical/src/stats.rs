// reach-historical/src/stats.rs
// ============================================================================
// Module: Statistics helpers
// Description: Variance, linear regression, z-score, coefficient of
//              variation, and Jaccard similarity.
// Purpose: Shared numeric primitives for Drift Detector, Baseline Manager,
//          Trend Metrics, and Evidence Diff.
// Dependencies: none (std only)
// ============================================================================

//! ## Overview
//! Plain statistical building blocks with no SQLite or domain-model
//! knowledge. Every historical analytic component composes these instead of
//! repeating the arithmetic.

use std::collections::BTreeSet;

/// Population mean of `values`; `0.0` for an empty slice.
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    #[allow(
        clippy::cast_precision_loss,
        reason = "sample counts are small enough that f64 precision loss is not observable"
    )]
    let count = values.len() as f64;
    values.iter().sum::<f64>() / count
}

/// Population variance of `values`; `0.0` for fewer than two samples.
#[must_use]
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    #[allow(
        clippy::cast_precision_loss,
        reason = "sample counts are small enough that f64 precision loss is not observable"
    )]
    let count = values.len() as f64;
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / count
}

/// Population standard deviation of `values`.
#[must_use]
pub fn stddev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Coefficient of variation (stddev / mean), `0.0` when the mean is zero.
#[must_use]
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    let m = mean(values);
    if m == 0.0 { 0.0 } else { stddev(values) / m }
}

/// Result of an ordinary least-squares fit over `(x, y)` pairs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearRegression {
    /// Fitted slope.
    pub slope: f64,
    /// Fitted intercept.
    pub intercept: f64,
    /// Coefficient of determination, in `[0, 1]`.
    pub r_squared: f64,
}

/// Fits a line to `values`, treated as `y` samples at evenly spaced integer
/// `x` positions `0..values.len()`.
///
/// Returns a zeroed regression for fewer than two points.
#[must_use]
pub fn linear_regression(values: &[f64]) -> LinearRegression {
    let n = values.len();
    if n < 2 {
        return LinearRegression { slope: 0.0, intercept: 0.0, r_squared: 0.0 };
    }
    #[allow(
        clippy::cast_precision_loss,
        reason = "sample counts are small enough that f64 precision loss is not observable"
    )]
    let xs: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let x_mean = mean(&xs);
    let y_mean = mean(values);

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (x, y) in xs.iter().zip(values) {
        numerator += (x - x_mean) * (y - y_mean);
        denominator += (x - x_mean).powi(2);
    }
    let slope = if denominator == 0.0 { 0.0 } else { numerator / denominator };
    let intercept = y_mean - slope * x_mean;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (x, y) in xs.iter().zip(values) {
        let predicted = slope * x + intercept;
        ss_res += (y - predicted).powi(2);
        ss_tot += (y - y_mean).powi(2);
    }
    let r_squared = if ss_tot == 0.0 { 1.0 } else { 1.0 - ss_res / ss_tot };

    LinearRegression { slope, intercept, r_squared }
}

/// Classification of a linear trend's direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendDirection {
    /// Slope is meaningfully positive.
    Improving,
    /// Slope is meaningfully negative.
    Degrading,
    /// Slope is within the flat band around zero.
    Stable,
}

/// Classifies a slope as improving/degrading/stable against a flat-band
/// threshold. `higher_is_better` inverts the sign interpretation for metrics
/// where a rising value is bad (e.g. chaos sensitivity).
#[must_use]
pub fn classify_trend(slope: f64, flat_band: f64, higher_is_better: bool) -> TrendDirection {
    if slope.abs() <= flat_band {
        return TrendDirection::Stable;
    }
    let rising = slope > 0.0;
    if rising == higher_is_better { TrendDirection::Improving } else { TrendDirection::Degrading }
}

/// A single anomaly flagged by z-score analysis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZScoreAnomaly {
    /// Index of the anomalous sample within the input slice.
    pub index: usize,
    /// Signed z-score of the sample.
    pub z_score: f64,
    /// `true` if the sample is above the mean, `false` if below.
    pub is_spike: bool,
    /// Severity classification derived from the magnitude of `z_score`.
    pub severity: AnomalySeverity,
}

/// Severity band for a flagged anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalySeverity {
    /// `|z| >= 2`.
    Flagged,
    /// `|z| >= 2.5`.
    Warning,
    /// `|z| >= 3`.
    Critical,
}

/// Flags samples at least two standard deviations from the mean.
#[must_use]
pub fn detect_zscore_anomalies(values: &[f64]) -> Vec<ZScoreAnomaly> {
    let m = mean(values);
    let sd = stddev(values);
    if sd == 0.0 {
        return Vec::new();
    }
    values
        .iter()
        .enumerate()
        .filter_map(|(index, value)| {
            let z = (value - m) / sd;
            let abs_z = z.abs();
            let severity = if abs_z >= 3.0 {
                AnomalySeverity::Critical
            } else if abs_z >= 2.5 {
                AnomalySeverity::Warning
            } else if abs_z >= 2.0 {
                AnomalySeverity::Flagged
            } else {
                return None;
            };
            Some(ZScoreAnomaly { index, z_score: z, is_spike: z > 0.0, severity })
        })
        .collect()
}

/// Jaccard similarity between two sets: `|intersection| / |union|`, `0.0` if
/// both sets are empty.
#[must_use]
pub fn jaccard_similarity<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    #[allow(
        clippy::cast_precision_loss,
        reason = "set sizes are small enough that f64 precision loss is not observable"
    )]
    {
        intersection as f64 / union as f64
    }
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

    #[test]
    fn variance_of_constant_series_is_zero() {
        assert_eq!(variance(&[5.0, 5.0, 5.0]), 0.0);
    }

    #[test]
    fn linear_regression_recovers_exact_line() {
        let values = vec![1.0, 3.0, 5.0, 7.0];
        let fit = linear_regression(&values);
        assert!((fit.slope - 2.0).abs() < 1e-9);
        assert!((fit.r_squared - 1.0).abs() < 1e-9);
    }

    #[test]
    fn classify_trend_detects_degrading_for_lower_is_worse_metric() {
        let fit = linear_regression(&[0.95, 0.85, 0.75, 0.65, 0.60]);
        let direction = classify_trend(fit.slope, 0.001, true);
        assert_eq!(direction, TrendDirection::Degrading);
    }

    #[test]
    fn zscore_flags_single_outlier() {
        let values = vec![1.0, 1.0, 1.0, 1.0, 10.0];
        let anomalies = detect_zscore_anomalies(&values);
        assert!(anomalies.iter().any(|a| a.index == 4 && a.is_spike));
    }

    #[test]
    fn jaccard_similarity_is_symmetric_and_one_for_identical_sets() {
        let a: BTreeSet<_> = ["x", "y", "z"].into_iter().collect();
        let b: BTreeSet<_> = ["x", "y", "z"].into_iter().collect();
        assert!((jaccard_similarity(&a, &b) - 1.0).abs() < 1e-9);
        assert_eq!(jaccard_similarity(&a, &b), jaccard_similarity(&b, &a));
    }

    #[test]
    fn jaccard_similarity_of_disjoint_sets_is_zero() {
        let a: BTreeSet<_> = ["x"].into_iter().collect();
        let b: BTreeSet<_> = ["y"].into_iter().collect();
        assert_eq!(jaccard_similarity(&a, &b), 0.0);
    }
}
