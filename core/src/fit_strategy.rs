//! Fit strategies for the two-parameter uplift model.
//!
//! RULE: every strategy shares one contract. Input is a training slice of
//! feature rows (defined baseline and promo feature) plus optional
//! non-negative weights; output is a `FitResult`. Below the strategy's row
//! threshold, or on an all-zero design, the result is the configured fallback
//! with `converged = false`. Strategies never return errors.

use crate::{
    config::{BoundedSolver, CalibConfig, GridSpec},
    forecast::{forecast_value, predict_uplift, UpliftClip},
    metrics::mape,
    solver::Gram2,
    types::FeatureRow,
    window::TrainWindow,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Entries of the design at or below this magnitude count as zero.
const ZERO_DESIGN_TOL: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMethod {
    Ols,
    BoundedLs,
    /// Unconstrained solve with post-hoc sign clamping.
    BoundedLsClamped,
    GridMape,
    /// Entered by hand; never produced by a strategy.
    Manual,
}

impl FitMethod {
    /// Stable tag written to `forecast_params.fit_method`.
    pub fn tag(self) -> &'static str {
        match self {
            FitMethod::Ols              => "OLS",
            FitMethod::BoundedLs        => "BOUNDED_LS",
            FitMethod::BoundedLsClamped => "BOUNDED_LS_CLAMPED",
            FitMethod::GridMape         => "GRID_MAPE",
            FitMethod::Manual           => "MANUAL",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "OLS"                => Some(FitMethod::Ols),
            "BOUNDED_LS"         => Some(FitMethod::BoundedLs),
            "BOUNDED_LS_CLAMPED" => Some(FitMethod::BoundedLsClamped),
            "GRID_MAPE"          => Some(FitMethod::GridMape),
            "MANUAL"             => Some(FitMethod::Manual),
            _ => None,
        }
    }
}

impl fmt::Display for FitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub alpha:     f64,
    pub beta:      f64,
    /// False when the result is the insufficient-data fallback.
    pub converged: bool,
}

impl FitResult {
    pub fn fallback((alpha, beta): (f64, f64)) -> Self {
        Self { alpha, beta, converged: false }
    }

    fn fitted(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta, converged: true }
    }
}

/// The contract every fit strategy fulfils.
pub trait FitStrategy: Send {
    /// Tag describing what actually ran, including capability fallbacks.
    fn method(&self) -> FitMethod;

    /// Fewer trainable rows than this yields the fallback.
    fn min_rows(&self) -> usize;

    fn fit(&self, rows: &[FeatureRow], weights: Option<&[f64]>) -> FitResult;
}

// ── Design extraction ──────────────────────────────────────────────────────

/// Column view of the trainable rows, with weights kept aligned.
struct Design {
    promo:    Vec<f64>,
    pressure: Vec<f64>,
    uplift:   Vec<f64>,
    baseline: Vec<f64>,
    units:    Vec<f64>,
    weights:  Option<Vec<f64>>,
}

impl Design {
    fn from_rows(rows: &[FeatureRow], weights: Option<&[f64]>) -> Self {
        let mut d = Design {
            promo:    Vec::with_capacity(rows.len()),
            pressure: Vec::with_capacity(rows.len()),
            uplift:   Vec::with_capacity(rows.len()),
            baseline: Vec::with_capacity(rows.len()),
            units:    Vec::with_capacity(rows.len()),
            weights:  weights.map(|_| Vec::with_capacity(rows.len())),
        };
        for (i, r) in rows.iter().enumerate() {
            let (Some(baseline), Some(promo), Some(uplift)) =
                (r.baseline_units, r.promo_feat, r.uplift_actual)
            else {
                continue;
            };
            d.promo.push(promo);
            d.pressure.push(r.rebate_pressure);
            d.uplift.push(uplift);
            d.baseline.push(baseline);
            d.units.push(r.units);
            if let (Some(out), Some(w)) = (d.weights.as_mut(), weights) {
                out.push(w.get(i).copied().unwrap_or(1.0).max(0.0));
            }
        }
        d
    }

    fn len(&self) -> usize {
        self.uplift.len()
    }

    /// True when every weighted design entry is numerically zero.
    fn is_degenerate(&self) -> bool {
        (0..self.len()).all(|i| {
            let s = self.weights.as_ref().map_or(1.0, |w| w[i].sqrt());
            (self.promo[i] * s).abs() <= ZERO_DESIGN_TOL
                && (self.pressure[i] * s).abs() <= ZERO_DESIGN_TOL
        })
    }

    fn gram(&self) -> Gram2 {
        Gram2::accumulate(&self.promo, &self.pressure, &self.uplift, self.weights.as_deref())
    }
}

// ── Least squares ──────────────────────────────────────────────────────────

/// Unconstrained (weighted) least squares on `[promo_feat, rebate_pressure]`.
pub struct OlsStrategy {
    min_rows: usize,
    fallback: (f64, f64),
}

impl OlsStrategy {
    pub fn new(config: &CalibConfig) -> Self {
        Self { min_rows: config.min_rows_ols, fallback: config.fallback() }
    }
}

impl FitStrategy for OlsStrategy {
    fn method(&self) -> FitMethod { FitMethod::Ols }
    fn min_rows(&self) -> usize { self.min_rows }

    fn fit(&self, rows: &[FeatureRow], weights: Option<&[f64]>) -> FitResult {
        let design = Design::from_rows(rows, weights);
        if design.len() < self.min_rows || design.is_degenerate() {
            return insufficient(self.method(), design.len(), self.fallback);
        }
        let (alpha, beta) = design.gram().solve();
        FitResult::fitted(alpha, beta)
    }
}

/// Least squares constrained to `alpha ≥ 0, beta ≤ 0`.
pub struct BoundedStrategy {
    min_rows: usize,
    fallback: (f64, f64),
}

impl BoundedStrategy {
    pub fn new(config: &CalibConfig) -> Self {
        Self { min_rows: config.min_rows_bounded, fallback: config.fallback() }
    }
}

impl FitStrategy for BoundedStrategy {
    fn method(&self) -> FitMethod { FitMethod::BoundedLs }
    fn min_rows(&self) -> usize { self.min_rows }

    fn fit(&self, rows: &[FeatureRow], weights: Option<&[f64]>) -> FitResult {
        let design = Design::from_rows(rows, weights);
        if design.len() < self.min_rows || design.is_degenerate() {
            return insufficient(self.method(), design.len(), self.fallback);
        }
        let (alpha, beta) = design.gram().solve_bounded();
        FitResult::fitted(alpha, beta)
    }
}

/// Unconstrained solve, then `alpha ← max(0, alpha)`, `beta ← min(0, beta)`.
///
/// The fallback pair is returned as-is, clamping applies to fitted values only.
pub struct ClampedOlsStrategy {
    inner: OlsStrategy,
}

impl ClampedOlsStrategy {
    pub fn new(config: &CalibConfig) -> Self {
        Self {
            inner: OlsStrategy {
                min_rows: config.min_rows_bounded,
                fallback: config.fallback(),
            },
        }
    }
}

impl FitStrategy for ClampedOlsStrategy {
    fn method(&self) -> FitMethod { FitMethod::BoundedLsClamped }
    fn min_rows(&self) -> usize { self.inner.min_rows }

    fn fit(&self, rows: &[FeatureRow], weights: Option<&[f64]>) -> FitResult {
        let r = self.inner.fit(rows, weights);
        if !r.converged {
            return r;
        }
        FitResult::fitted(r.alpha.max(0.0), r.beta.min(0.0))
    }
}

// ── Grid search ────────────────────────────────────────────────────────────

/// Exhaustive search for the `(alpha, beta)` with the lowest training MAPE.
///
/// Iterates alpha ascending (outer) and beta ascending (inner); on equal MAPE
/// the first point visited wins. Weights are not used.
pub struct GridMapeStrategy {
    grid:     GridSpec,
    clip:     UpliftClip,
    min_rows: usize,
    fallback: (f64, f64),
}

impl GridMapeStrategy {
    pub fn new(config: &CalibConfig) -> Self {
        Self::with_grid(config, config.grid)
    }

    /// Use `grid` instead of the configured one. Steps are capped at
    /// `config.max_grid_steps` and raised to at least 1. Bounds outside the
    /// sign box are replaced by the configured bounds.
    pub fn with_grid(config: &CalibConfig, grid: GridSpec) -> Self {
        let mut grid = grid;
        if let Err(e) = grid.check_domain() {
            log::warn!("grid search: {e}, using configured bounds");
            grid.a_max = config.grid.a_max.max(0.0);
            grid.b_min = config.grid.b_min.min(0.0);
        }
        let capped = grid.steps.clamp(1, config.max_grid_steps.max(1));
        if capped != grid.steps {
            log::warn!(
                "grid search: {} steps per axis out of range, using {capped}",
                grid.steps
            );
            grid.steps = capped;
        }
        Self {
            grid,
            clip:     UpliftClip::from_config(config),
            min_rows: config.min_rows_grid,
            fallback: config.fallback(),
        }
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }
}

impl FitStrategy for GridMapeStrategy {
    fn method(&self) -> FitMethod { FitMethod::GridMape }
    fn min_rows(&self) -> usize { self.min_rows }

    fn fit(&self, rows: &[FeatureRow], _weights: Option<&[f64]>) -> FitResult {
        let design = Design::from_rows(rows, None);
        if design.len() < self.min_rows {
            return insufficient(self.method(), design.len(), self.fallback);
        }

        let a_grid = linspace(0.0, self.grid.a_max, self.grid.steps);
        let b_grid = linspace(self.grid.b_min, 0.0, self.grid.steps);
        let mut forecast = vec![0.0; design.len()];
        let mut best: Option<(f64, f64, f64)> = None;

        for &a in &a_grid {
            for &b in &b_grid {
                for (i, fc) in forecast.iter_mut().enumerate() {
                    let uplift = predict_uplift(
                        a, b, design.promo[i], design.pressure[i], design.units[i], &self.clip,
                    );
                    *fc = forecast_value(design.baseline[i], uplift);
                }
                let err = mape(&design.units, &forecast);
                if err.is_nan() {
                    continue;
                }
                match best {
                    Some((_, _, e)) if err >= e => {}
                    _ => best = Some((a, b, err)),
                }
            }
        }

        match best {
            Some((alpha, beta, err)) => {
                log::debug!("grid search: best MAPE {err:.3} at alpha={alpha}, beta={beta}");
                FitResult::fitted(alpha, beta)
            }
            None => {
                log::warn!("grid search: MAPE undefined on every grid point, using fallback");
                FitResult::fallback(self.fallback)
            }
        }
    }
}

/// `n` evenly spaced values from `start` to `stop`, both included.
/// A single point is `start`.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { stop } else { start + step * i as f64 })
                .collect()
        }
    }
}

fn insufficient(method: FitMethod, rows: usize, fallback: (f64, f64)) -> FitResult {
    log::warn!(
        "{method}: insufficient data ({rows} usable rows or zero design), using fallback ({}, {})",
        fallback.0, fallback.1
    );
    FitResult::fallback(fallback)
}

// ── Selection and slicing ──────────────────────────────────────────────────

/// Bounded strategy selected by the configured solver capability.
pub fn bounded_strategy(config: &CalibConfig) -> Box<dyn FitStrategy> {
    match config.bounded_solver {
        BoundedSolver::ActiveSet  => Box::new(BoundedStrategy::new(config)),
        BoundedSolver::ClampedOls => Box::new(ClampedOlsStrategy::new(config)),
    }
}

/// Strategy implementing `method`. `Manual` has none.
pub fn strategy_for(method: FitMethod, config: &CalibConfig) -> Option<Box<dyn FitStrategy>> {
    match method {
        FitMethod::Ols              => Some(Box::new(OlsStrategy::new(config))),
        FitMethod::BoundedLs        => Some(bounded_strategy(config)),
        FitMethod::BoundedLsClamped => Some(Box::new(ClampedOlsStrategy::new(config))),
        FitMethod::GridMape         => Some(Box::new(GridMapeStrategy::new(config))),
        FitMethod::Manual           => None,
    }
}

/// Rows inside `window` with a defined baseline and promo feature.
pub fn training_slice(features: &[FeatureRow], window: &TrainWindow) -> Vec<FeatureRow> {
    features
        .iter()
        .filter(|f| window.in_train(f.period) && f.is_trainable())
        .cloned()
        .collect()
}

/// Session weighting convention: `sqrt(max(units, 1))`.
pub fn session_weights(rows: &[FeatureRow]) -> Vec<f64> {
    rows.iter().map(|r| r.units.max(1.0).sqrt()).collect()
}
