use crate::error::{CalibError, CalibResult};
use serde::{Deserialize, Serialize};

/// Grid bounds and resolution for the MAPE grid search.
///
/// The grid spans `alpha ∈ [0, a_max]` and `beta ∈ [b_min, 0]` with `steps`
/// evenly spaced points per axis, endpoints included.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    #[serde(default = "default_a_max")]
    pub a_max: f64,
    #[serde(default = "default_b_min")]
    pub b_min: f64,
    #[serde(default = "default_grid_steps")]
    pub steps: usize,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            a_max: default_a_max(),
            b_min: default_b_min(),
            steps: default_grid_steps(),
        }
    }
}

impl GridSpec {
    /// The grid must stay inside the sign box: `a_max` finite and `>= 0`,
    /// `b_min` finite and `<= 0`. NaN bounds are rejected.
    pub fn check_domain(&self) -> CalibResult<()> {
        if !(self.a_max.is_finite() && self.a_max >= 0.0) {
            return Err(CalibError::InvalidConfig {
                reason: format!("grid.a_max must be finite and >= 0, got {}", self.a_max),
            });
        }
        if !(self.b_min.is_finite() && self.b_min <= 0.0) {
            return Err(CalibError::InvalidConfig {
                reason: format!("grid.b_min must be finite and <= 0, got {}", self.b_min),
            });
        }
        Ok(())
    }
}

/// Which implementation backs the bounded least-squares strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundedSolver {
    /// Exact active-set solve over the sign box.
    ActiveSet,
    /// Unconstrained solve followed by sign clamping.
    ClampedOls,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibConfig {
    /// Number of prior periods averaged into `baseline_units`.
    #[serde(default = "default_baseline_window")]
    pub baseline_window: usize,
    #[serde(default)]
    pub promo_lag: usize,

    #[serde(default = "default_min_rows")]
    pub min_rows_ols: usize,
    #[serde(default = "default_min_rows")]
    pub min_rows_bounded: usize,
    #[serde(default = "default_min_rows")]
    pub min_rows_grid: usize,

    #[serde(default = "default_fallback_alpha")]
    pub fallback_alpha: f64,
    #[serde(default = "default_fallback_beta")]
    pub fallback_beta: f64,

    #[serde(default)]
    pub grid: GridSpec,
    /// Hard cap on grid points per axis.
    #[serde(default = "default_max_grid_steps")]
    pub max_grid_steps: usize,

    /// Lower uplift bound as a fraction of actual units.
    #[serde(default = "default_uplift_floor")]
    pub uplift_floor: f64,
    /// Upper uplift bound as a fraction of actual units.
    #[serde(default = "default_uplift_cap")]
    pub uplift_cap: f64,

    #[serde(default = "default_train_months")]
    pub default_train_months: u32,
    #[serde(default)]
    pub weighted_fit: bool,
    #[serde(default = "default_true")]
    pub auto_load_on_scope_change: bool,
    #[serde(default = "default_bounded_solver")]
    pub bounded_solver: BoundedSolver,
}

fn default_baseline_window() -> usize { 4 }
fn default_min_rows() -> usize { 6 }
fn default_fallback_alpha() -> f64 { 0.003 }
fn default_fallback_beta() -> f64 { -0.5 }
fn default_a_max() -> f64 { 0.02 }
fn default_b_min() -> f64 { -1.0 }
fn default_grid_steps() -> usize { 51 }
fn default_max_grid_steps() -> usize { 201 }
fn default_uplift_floor() -> f64 { -0.4 }
fn default_uplift_cap() -> f64 { 0.5 }
fn default_train_months() -> u32 { 12 }
fn default_true() -> bool { true }
fn default_bounded_solver() -> BoundedSolver { BoundedSolver::ActiveSet }

impl Default for CalibConfig {
    fn default() -> Self {
        Self {
            baseline_window:           default_baseline_window(),
            promo_lag:                 0,
            min_rows_ols:              default_min_rows(),
            min_rows_bounded:          default_min_rows(),
            min_rows_grid:             default_min_rows(),
            fallback_alpha:            default_fallback_alpha(),
            fallback_beta:             default_fallback_beta(),
            grid:                      GridSpec::default(),
            max_grid_steps:            default_max_grid_steps(),
            uplift_floor:              default_uplift_floor(),
            uplift_cap:                default_uplift_cap(),
            default_train_months:      default_train_months(),
            weighted_fit:              false,
            auto_load_on_scope_change: true,
            bounded_solver:            default_bounded_solver(),
        }
    }
}

impl CalibConfig {
    /// Load from `{data_dir}/calibration.json`. Missing fields take defaults.
    /// In tests, use `CalibConfig::default()`.
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/calibration.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: CalibConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CalibResult<()> {
        let fail = |reason: &str| {
            Err(CalibError::InvalidConfig { reason: reason.to_string() })
        };
        if self.baseline_window == 0 {
            return fail("baseline_window must be at least 1");
        }
        if self.grid.steps == 0 || self.max_grid_steps == 0 {
            return fail("grid steps must be at least 1");
        }
        self.grid.check_domain()?;
        if self.uplift_floor > self.uplift_cap {
            return fail("uplift_floor must not exceed uplift_cap");
        }
        Ok(())
    }

    /// The fallback pair returned on insufficient data.
    pub fn fallback(&self) -> (f64, f64) {
        (self.fallback_alpha, self.fallback_beta)
    }
}
