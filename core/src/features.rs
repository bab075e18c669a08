//! Feature builder: baseline, lagged promo and rebate pressure features.
//!
//! RULE: every feature is causal. `baseline_units` for a period only ever
//! reads `units` of strictly earlier periods in the same group.

use crate::types::{FeatureRow, TimeSeriesRow};
use std::cmp::Ordering;

/// Columns that define an independent series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupBy {
    #[default]
    BrandCanton,
    Brand,
    /// Treat the whole input as one series.
    None,
}

impl GroupBy {
    fn cmp_rows(self, a: &TimeSeriesRow, b: &TimeSeriesRow) -> Ordering {
        match self {
            GroupBy::BrandCanton => a.brand.cmp(&b.brand).then_with(|| a.canton.cmp(&b.canton)),
            GroupBy::Brand       => a.brand.cmp(&b.brand),
            GroupBy::None        => Ordering::Equal,
        }
    }

    fn same_group(self, a: &TimeSeriesRow, b: &TimeSeriesRow) -> bool {
        self.cmp_rows(a, b) == Ordering::Equal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureSpec {
    pub window:    usize,
    pub promo_lag: usize,
    pub group_by:  GroupBy,
}

impl Default for FeatureSpec {
    fn default() -> Self {
        Self { window: 4, promo_lag: 0, group_by: GroupBy::BrandCanton }
    }
}

impl FeatureSpec {
    pub fn with_lag(window: usize, promo_lag: usize) -> Self {
        Self { window, promo_lag, group_by: GroupBy::BrandCanton }
    }
}

/// Derive feature rows. Output is sorted by (group, period) and has exactly
/// one row per input row; undefined features are `None`, never dropped.
pub fn build_features(rows: &[TimeSeriesRow], spec: &FeatureSpec) -> Vec<FeatureRow> {
    let mut sorted: Vec<&TimeSeriesRow> = rows.iter().collect();
    sorted.sort_by(|a, b| spec.group_by.cmp_rows(a, b).then_with(|| a.period.cmp(&b.period)));

    let mut out = Vec::with_capacity(sorted.len());
    for group in sorted.chunk_by(|a, b| spec.group_by.same_group(a, b)) {
        let units: Vec<f64> = group.iter().map(|r| r.units).collect();
        let promo: Vec<f64> = group.iter().map(|r| r.promo_spend).collect();
        let baselines = trailing_mean(&units, spec.window);
        let promo_feats = lag_within(&promo, spec.promo_lag);

        for ((row, baseline_units), promo_feat) in group.iter().zip(baselines).zip(promo_feats) {
            out.push(FeatureRow {
                period:          row.period,
                brand:           row.brand.clone(),
                canton:          row.canton.clone(),
                units:           row.units,
                promo_spend:     row.promo_spend,
                rebate_rate:     row.rebate_rate,
                baseline_units,
                promo_feat,
                rebate_pressure: row.rebate_rate * row.units,
                uplift_actual:   baseline_units.map(|b| row.units - b),
            });
        }
    }
    log::debug!(
        "features: built {} rows (window={}, lag={})",
        out.len(), spec.window, spec.promo_lag
    );
    out
}

/// Mean of up to `window` values strictly before each index.
/// Index 0 (or a zero window) has no history and yields `None`.
pub fn trailing_mean(values: &[f64], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            let prior = &values[i.saturating_sub(window)..i];
            if prior.is_empty() {
                None
            } else {
                Some(prior.iter().sum::<f64>() / prior.len() as f64)
            }
        })
        .collect()
}

/// Shift `values` forward by `lag` positions; leading positions are `None`.
pub fn lag_within(values: &[f64], lag: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| i.checked_sub(lag).map(|j| values[j]))
        .collect()
}
