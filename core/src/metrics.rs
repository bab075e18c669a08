//! Forecast accuracy metrics.
//!
//! A metric whose denominator is structurally zero is undefined and returned
//! as `f64::NAN`. Callers render it with `format_metric`, never as 0 or 100.

use serde::{Deserialize, Serialize};

/// Mean absolute percentage error over rows with a positive actual.
pub fn mape(actual: &[f64], predicted: &[f64]) -> f64 {
    debug_assert_eq!(actual.len(), predicted.len());
    let (sum, n) = actual
        .iter()
        .zip(predicted)
        .filter(|(y, _)| **y > 0.0)
        .fold((0.0, 0usize), |(s, n), (y, p)| (s + ((y - p) / y).abs() * 100.0, n + 1));
    if n == 0 { f64::NAN } else { sum / n as f64 }
}

/// Symmetric MAPE over rows where `|y| + |ŷ| > 0`.
pub fn smape(actual: &[f64], predicted: &[f64]) -> f64 {
    debug_assert_eq!(actual.len(), predicted.len());
    let (sum, n) = actual
        .iter()
        .zip(predicted)
        .filter_map(|(y, p)| {
            let denom = y.abs() + p.abs();
            (denom > 0.0).then(|| 2.0 * (y - p).abs() / denom * 100.0)
        })
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { f64::NAN } else { sum / n as f64 }
}

/// Weighted absolute percentage error: `Σ|y−ŷ| / Σ|y|`.
pub fn wape(actual: &[f64], predicted: &[f64]) -> f64 {
    debug_assert_eq!(actual.len(), predicted.len());
    let denom: f64 = actual.iter().map(|y| y.abs()).sum();
    if denom == 0.0 {
        return f64::NAN;
    }
    let err: f64 = actual.iter().zip(predicted).map(|(y, p)| (y - p).abs()).sum();
    err / denom * 100.0
}

/// Accuracy of one slice of forecast rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub rows:  usize,
    pub mape:  f64,
    pub smape: f64,
    pub wape:  f64,
}

impl MetricSummary {
    pub fn compute(actual: &[f64], predicted: &[f64]) -> Self {
        Self {
            rows:  actual.len(),
            mape:  mape(actual, predicted),
            smape: smape(actual, predicted),
            wape:  wape(actual, predicted),
        }
    }
}

/// "12.3%" for a defined metric, "—" for an undefined one.
pub fn format_metric(value: f64) -> String {
    if value.is_finite() {
        format!("{value:.1}%")
    } else {
        "—".to_string()
    }
}
