//! Session events: the outcome of every calibration transition.
//!
//! Every transition on a `CalibrationSession` returns exactly one event and
//! appends it to the session journal. Recovered no-ops are `Warning` events,
//! never errors.

use crate::{
    fit_strategy::FitMethod,
    scope::ScopeKey,
    session::Provenance,
    window::TrainWindow,
};
use serde::{Deserialize, Serialize};

/// Variants are added over time, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    // ── Scope and window ───────────────────────────
    ScopeEntered {
        scope:  ScopeKey,
        rows:   usize,
        loaded: bool,
    },
    ScopeUnchanged {
        scope: ScopeKey,
    },
    WindowChanged {
        window: TrainWindow,
    },

    // ── Fitting ────────────────────────────────────
    FitCompleted {
        method:    FitMethod,
        alpha:     f64,
        beta:      f64,
        converged: bool,
        rows:      usize,
    },

    // ── Active parameters ──────────────────────────
    ActivePromoted {
        provenance: Provenance,
        alpha:      f64,
        beta:       f64,
        promo_lag:  usize,
    },
    ActiveCleared,

    // ── Persistence ────────────────────────────────
    ParamsSaved {
        scope:      ScopeKey,
        alpha:      f64,
        beta:       f64,
        fit_method: String,
    },
    ParamsLoaded {
        scope:      ScopeKey,
        alpha:      f64,
        beta:       f64,
        fit_method: String,
    },

    // ── Recovered no-ops ───────────────────────────
    Warning {
        warning: SessionWarning,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionWarning {
    /// Promotion requested with no fit candidate.
    MissingCandidate,
    /// Save requested with no active parameters.
    MissingActive,
    /// Load requested for a scope with nothing saved.
    MissingScopeRecord,
    /// A fit returned the insufficient-data fallback.
    FallbackFit,
    /// The current scope has no rows.
    EmptyScope,
    /// The requested method has no fitting strategy.
    UnsupportedMethod,
    /// A grid override reaches outside `alpha >= 0, beta <= 0`.
    InvalidGrid,
}

impl SessionEvent {
    pub fn warning(warning: SessionWarning, message: impl Into<String>) -> Self {
        let message = message.into();
        log::warn!("session: {message}");
        SessionEvent::Warning { warning, message }
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, SessionEvent::Warning { .. })
    }
}
