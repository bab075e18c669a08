//! Shared row types used across the calibration core.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// First-of-month date identifying one monthly observation.
pub type Period = NaiveDate;

/// Brand key as delivered by the input feed.
pub type BrandKey = String;

/// Canton key as delivered by the input feed.
pub type CantonKey = String;

/// One pre-aggregated monthly observation for a (brand, canton) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesRow {
    pub period:      Period,
    pub brand:       BrandKey,
    pub canton:      CantonKey,
    pub units:       f64,
    pub promo_spend: f64,
    /// Fraction of gross sales rebated, in [0, 1].
    pub rebate_rate: f64,
}

/// A `TimeSeriesRow` extended with the model features.
///
/// `None` marks a feature that is undefined for the row: no prior history for
/// `baseline_units`, or a lag reaching before the group's first period for
/// `promo_feat`. Such rows are kept here and filtered out by the fit routines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub period:          Period,
    pub brand:           BrandKey,
    pub canton:          CantonKey,
    pub units:           f64,
    pub promo_spend:     f64,
    pub rebate_rate:     f64,
    pub baseline_units:  Option<f64>,
    pub promo_feat:      Option<f64>,
    pub rebate_pressure: f64,
    pub uplift_actual:   Option<f64>,
}

impl FeatureRow {
    /// True when the row can take part in a fit.
    pub fn is_trainable(&self) -> bool {
        self.baseline_units.is_some() && self.promo_feat.is_some()
    }
}
