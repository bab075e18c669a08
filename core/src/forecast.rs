//! Forecast reconstruction from fitted uplift parameters.
//!
//!   uplift_pred    = alpha · promo_feat + beta · rebate_pressure
//!   uplift_pred    ← clip(uplift_pred, floor · units, cap · units)
//!   forecast_units = max(0, baseline_units + uplift_pred)
//!
//! The clip is a fixed instability guard, not a learned bound.

use crate::{
    config::CalibConfig,
    metrics::MetricSummary,
    types::{BrandKey, CantonKey, FeatureRow, Period},
    window::TrainWindow,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bounds on the uplift relative to actual units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpliftClip {
    pub floor: f64,
    pub cap:   f64,
}

impl Default for UpliftClip {
    fn default() -> Self {
        Self { floor: -0.4, cap: 0.5 }
    }
}

impl UpliftClip {
    pub fn from_config(config: &CalibConfig) -> Self {
        Self { floor: config.uplift_floor, cap: config.uplift_cap }
    }

    /// Lower bound applied first, then the upper bound.
    pub fn apply(&self, uplift: f64, units: f64) -> f64 {
        uplift.max(self.floor * units).min(self.cap * units)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRow {
    pub period:         Period,
    pub brand:          BrandKey,
    pub canton:         CantonKey,
    pub units:          f64,
    /// `None` when the baseline or the lagged promo feature is undefined.
    pub forecast_units: Option<f64>,
    pub baseline_units: Option<f64>,
    pub uplift_pred:    Option<f64>,
}

/// Clipped uplift for one row.
#[inline]
pub fn predict_uplift(
    alpha: f64,
    beta: f64,
    promo_feat: f64,
    rebate_pressure: f64,
    units: f64,
    clip: &UpliftClip,
) -> f64 {
    clip.apply(alpha * promo_feat + beta * rebate_pressure, units)
}

/// Non-negative forecast from a baseline and an uplift.
#[inline]
pub fn forecast_value(baseline_units: f64, uplift_pred: f64) -> f64 {
    (baseline_units + uplift_pred).max(0.0)
}

/// Apply `(alpha, beta)` to every feature row. Deterministic; keeps row order.
pub fn reconstruct(
    features: &[FeatureRow],
    alpha: f64,
    beta: f64,
    clip: &UpliftClip,
) -> Vec<ForecastRow> {
    features
        .iter()
        .map(|f| {
            let uplift_pred = f
                .promo_feat
                .map(|p| predict_uplift(alpha, beta, p, f.rebate_pressure, f.units, clip));
            let forecast_units = match (f.baseline_units, uplift_pred) {
                (Some(b), Some(u)) => Some(forecast_value(b, u)),
                _ => None,
            };
            ForecastRow {
                period: f.period,
                brand: f.brand.clone(),
                canton: f.canton.clone(),
                units: f.units,
                forecast_units,
                baseline_units: f.baseline_units,
                uplift_pred,
            }
        })
        .collect()
}

/// Train and validation accuracy of a reconstructed forecast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub train:      MetricSummary,
    pub validation: MetricSummary,
}

/// Score rows with a defined forecast, split by `window`.
pub fn evaluate(rows: &[ForecastRow], window: &TrainWindow) -> Evaluation {
    let summarize = |pick: &dyn Fn(Period) -> bool| {
        let (actual, predicted): (Vec<f64>, Vec<f64>) = rows
            .iter()
            .filter(|r| pick(r.period))
            .filter_map(|r| r.forecast_units.map(|f| (r.units, f)))
            .unzip();
        MetricSummary::compute(&actual, &predicted)
    };
    Evaluation {
        train:      summarize(&|p: Period| window.in_train(p)),
        validation: summarize(&|p: Period| window.in_validation(p)),
    }
}

/// Per-period totals for the scoped forecast-vs-actual view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodTotal {
    pub period:         Period,
    pub units:          f64,
    pub forecast_units: f64,
}

/// Sum units and defined forecasts per period, ascending by period.
pub fn aggregate_by_period(rows: &[ForecastRow]) -> Vec<PeriodTotal> {
    let mut totals: BTreeMap<Period, (f64, f64)> = BTreeMap::new();
    for r in rows {
        let entry = totals.entry(r.period).or_insert((0.0, 0.0));
        entry.0 += r.units;
        entry.1 += r.forecast_units.unwrap_or(0.0);
    }
    totals
        .into_iter()
        .map(|(period, (units, forecast_units))| PeriodTotal { period, units, forecast_units })
        .collect()
}
