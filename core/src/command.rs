use crate::{
    config::GridSpec,
    fit_strategy::FitMethod,
    scope::ScopeKey,
    types::Period,
};
use serde::{Deserialize, Serialize};

/// Every transition a presentation layer may request from a session.
/// Variants are added over time, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum SessionCommand {
    RunFit {
        #[serde(flatten)]
        options: FitOptions,
    },
    SetActiveFromFit,
    SetActiveFromManual {
        alpha: f64,
        beta:  f64,
        #[serde(default)]
        promo_lag: usize,
    },
    LoadSaved,
    ResetActive,
    SaveActive,
    ChangeScope {
        scope: ScopeKey,
    },
    SetTrainWindow {
        start: Period,
        end:   Period,
    },
}

/// Options of a single fit. Unset fields take the session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOptions {
    pub method: FitMethod,
    #[serde(default)]
    pub promo_lag: Option<usize>,
    #[serde(default)]
    pub weighted: Option<bool>,
    #[serde(default)]
    pub grid: Option<GridSpec>,
}

impl FitOptions {
    pub fn new(method: FitMethod) -> Self {
        Self { method, promo_lag: None, weighted: None, grid: None }
    }

    pub fn with_lag(mut self, promo_lag: usize) -> Self {
        self.promo_lag = Some(promo_lag);
        self
    }

    pub fn weighted(mut self, weighted: bool) -> Self {
        self.weighted = Some(weighted);
        self
    }

    pub fn with_grid(mut self, grid: GridSpec) -> Self {
        self.grid = Some(grid);
        self
    }
}
