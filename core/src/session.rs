//! Calibration session: the interactive state machine behind the
//! forecast-calibration view.
//!
//! STATE:
//!   - `active`:    the parameters driving the displayed forecast (or none)
//!   - `candidate`: the latest fit result, not yet promoted (or none)
//!
//! RULES:
//!   - State changes only through the transition methods below.
//!   - Forecasts read `active` only. A candidate or a saved-but-not-loaded
//!     record never changes what is displayed until explicitly promoted.
//!   - Entering a different scope resets both states, then auto-loads the
//!     scope's saved record when enabled.
//!   - Nothing is persisted implicitly. Unsaved parameters die with the session.
//!   - Only store failures are returned as errors; every other problem is a
//!     `Warning` event.

use crate::{
    command::{FitOptions, SessionCommand},
    config::CalibConfig,
    error::CalibResult,
    event::{SessionEvent, SessionWarning},
    features::{build_features, FeatureSpec},
    fit_strategy::{
        session_weights, strategy_for, training_slice, FitMethod, FitResult, FitStrategy,
        GridMapeStrategy,
    },
    forecast::{aggregate_by_period, evaluate, reconstruct, Evaluation, ForecastRow, PeriodTotal, UpliftClip},
    scope::{ScopeCatalog, ScopeKey},
    store::{CalibStore, NewParams, PersistedParams},
    types::{FeatureRow, Period, TimeSeriesRow},
    window::TrainWindow,
};
use serde::{Deserialize, Serialize};

/// Where the active parameters came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Fit,
    Manual,
    LoadedFromStore,
}

/// The single parameter set driving the forecast view.
///
/// Manual entries may carry any sign; they are representable, not rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveParameters {
    pub alpha:       f64,
    pub beta:        f64,
    pub promo_lag:   usize,
    pub fit_method:  String,
    pub train_start: Option<Period>,
    pub train_end:   Option<Period>,
    pub provenance:  Provenance,
}

impl ActiveParameters {
    fn from_record(rec: &PersistedParams) -> Self {
        Self {
            alpha:       rec.alpha,
            beta:        rec.beta,
            promo_lag:   rec.promo_lag,
            fit_method:  rec.fit_method.clone(),
            train_start: Some(rec.train_start),
            train_end:   Some(rec.train_end),
            provenance:  Provenance::LoadedFromStore,
        }
    }

    fn train_window(&self) -> Option<TrainWindow> {
        Some(TrainWindow::new(self.train_start?, self.train_end?))
    }
}

/// A computed but not yet promoted fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitCandidate {
    pub result:    FitResult,
    /// The strategy that actually ran, including capability fallbacks.
    pub method:    FitMethod,
    pub promo_lag: usize,
    pub window:    TrainWindow,
    pub weighted:  bool,
    pub rows:      usize,
}

pub struct CalibrationSession {
    config:    CalibConfig,
    store:     CalibStore,
    series:    Vec<TimeSeriesRow>,
    scope:     ScopeKey,
    scoped:    Vec<TimeSeriesRow>,
    window:    Option<TrainWindow>,
    active:    Option<ActiveParameters>,
    candidate: Option<FitCandidate>,
    journal:   Vec<SessionEvent>,
}

impl CalibrationSession {
    /// Start a session on `scope`. The initial state is empty, or the scope's
    /// saved parameters when auto-load is enabled and a record exists.
    pub fn open(
        config: CalibConfig,
        store: CalibStore,
        series: Vec<TimeSeriesRow>,
        scope: ScopeKey,
    ) -> CalibResult<Self> {
        config.validate()?;
        let mut session = Self {
            config,
            store,
            series,
            scope: scope.clone(),
            scoped: Vec::new(),
            window: None,
            active: None,
            candidate: None,
            journal: Vec::new(),
        };
        let event = session.enter_scope(scope)?;
        session.record(event);
        Ok(session)
    }

    /// Open a session whose series is read from the store itself.
    pub fn open_from_store(config: CalibConfig, store: CalibStore, scope: ScopeKey) -> CalibResult<Self> {
        let series = store.load_series()?;
        Self::open(config, store, series, scope)
    }

    // ── Read access ────────────────────────────────────────────

    pub fn scope(&self) -> &ScopeKey { &self.scope }
    pub fn active(&self) -> Option<&ActiveParameters> { self.active.as_ref() }
    pub fn candidate(&self) -> Option<&FitCandidate> { self.candidate.as_ref() }
    pub fn train_window(&self) -> Option<TrainWindow> { self.window }
    pub fn journal(&self) -> &[SessionEvent] { &self.journal }
    pub fn scoped_rows(&self) -> &[TimeSeriesRow] { &self.scoped }
    pub fn config(&self) -> &CalibConfig { &self.config }
    pub fn store(&self) -> &CalibStore { &self.store }

    pub fn catalog(&self) -> ScopeCatalog {
        ScopeCatalog::from_rows(&self.series)
    }

    /// Forecast rows for the current scope under the active parameters.
    /// `None` while no parameters are active.
    pub fn forecast(&self) -> Option<Vec<ForecastRow>> {
        let active = self.active.as_ref()?;
        let features = self.features(active.promo_lag);
        Some(reconstruct(&features, active.alpha, active.beta, &UpliftClip::from_config(&self.config)))
    }

    /// Train/validation accuracy of the active forecast.
    ///
    /// The split always follows the session's training window, also when the
    /// active parameters were loaded with their own `train_start`/`train_end`.
    /// The stored window only documents where those parameters were fitted.
    pub fn evaluation(&self) -> Option<Evaluation> {
        let window = self.window?;
        Some(evaluate(&self.forecast()?, &window))
    }

    /// Per-period totals of the active forecast for charting.
    pub fn period_totals(&self) -> Option<Vec<PeriodTotal>> {
        Some(aggregate_by_period(&self.forecast()?))
    }

    // ── Transitions ────────────────────────────────────────────

    pub fn apply(&mut self, command: SessionCommand) -> CalibResult<SessionEvent> {
        match command {
            SessionCommand::RunFit { options } => Ok(self.run_fit(&options)),
            SessionCommand::SetActiveFromFit => Ok(self.set_active_from_fit()),
            SessionCommand::SetActiveFromManual { alpha, beta, promo_lag } => {
                Ok(self.set_active_from_manual(alpha, beta, promo_lag))
            }
            SessionCommand::LoadSaved => self.load_saved_for_scope(),
            SessionCommand::ResetActive => Ok(self.reset_active()),
            SessionCommand::SaveActive => self.save_active(),
            SessionCommand::ChangeScope { scope } => self.scope_changed(scope),
            SessionCommand::SetTrainWindow { start, end } => Ok(self.set_train_window(start, end)),
        }
    }

    /// Fit over the current training slice and keep the result as the
    /// candidate. The active parameters are untouched.
    pub fn run_fit(&mut self, options: &FitOptions) -> SessionEvent {
        let Some(window) = self.window else {
            let event = SessionEvent::warning(
                SessionWarning::EmptyScope,
                format!("no rows for scope {}, nothing to fit", self.scope),
            );
            return self.record(event);
        };

        let strategy: Box<dyn FitStrategy> = match (options.method, options.grid) {
            (FitMethod::GridMape, Some(grid)) => {
                if let Err(e) = grid.check_domain() {
                    let event = SessionEvent::warning(
                        SessionWarning::InvalidGrid,
                        format!("grid rejected, nothing fitted: {e}"),
                    );
                    return self.record(event);
                }
                Box::new(GridMapeStrategy::with_grid(&self.config, grid))
            }
            (method, _) => match strategy_for(method, &self.config) {
                Some(s) => s,
                None => {
                    let event = SessionEvent::warning(
                        SessionWarning::UnsupportedMethod,
                        format!("{method} cannot be fitted"),
                    );
                    return self.record(event);
                }
            },
        };

        let promo_lag = options.promo_lag.unwrap_or(self.config.promo_lag);
        let weighted = options.weighted.unwrap_or(self.config.weighted_fit);
        let slice = training_slice(&self.features(promo_lag), &window);
        let weights = weighted.then(|| session_weights(&slice));
        let result = strategy.fit(&slice, weights.as_deref());

        log::info!(
            "session: {} fit on {} rows for {} → alpha={} beta={} converged={}",
            strategy.method(), slice.len(), self.scope, result.alpha, result.beta, result.converged
        );
        self.candidate = Some(FitCandidate {
            result,
            method: strategy.method(),
            promo_lag,
            window,
            weighted,
            rows: slice.len(),
        });

        let event = SessionEvent::FitCompleted {
            method:    strategy.method(),
            alpha:     result.alpha,
            beta:      result.beta,
            converged: result.converged,
            rows:      slice.len(),
        };
        let event = self.record(event);
        if !result.converged {
            let warning = SessionEvent::warning(
                SessionWarning::FallbackFit,
                format!(
                    "fallback alpha/beta used: not enough signal in the training window ({} rows)",
                    slice.len()
                ),
            );
            self.record(warning);
        }
        event
    }

    /// Promote the fit candidate to the active parameters.
    pub fn set_active_from_fit(&mut self) -> SessionEvent {
        let Some(c) = &self.candidate else {
            let event = SessionEvent::warning(
                SessionWarning::MissingCandidate,
                "no fit candidate to promote; run a fit first",
            );
            return self.record(event);
        };
        let active = ActiveParameters {
            alpha:       c.result.alpha,
            beta:        c.result.beta,
            promo_lag:   c.promo_lag,
            fit_method:  c.method.tag().to_string(),
            train_start: Some(c.window.start),
            train_end:   Some(c.window.end),
            provenance:  Provenance::Fit,
        };
        self.promote(active)
    }

    pub fn set_active_from_manual(&mut self, alpha: f64, beta: f64, promo_lag: usize) -> SessionEvent {
        self.promote(ActiveParameters {
            alpha,
            beta,
            promo_lag,
            fit_method:  FitMethod::Manual.tag().to_string(),
            train_start: None,
            train_end:   None,
            provenance:  Provenance::Manual,
        })
    }

    /// Adopt the scope's saved parameters, if any.
    pub fn load_saved_for_scope(&mut self) -> CalibResult<SessionEvent> {
        let record = self.store.load(&self.scope)?;
        let event = match record {
            Some(rec) => self.adopt(&rec),
            None => SessionEvent::warning(
                SessionWarning::MissingScopeRecord,
                format!("no saved parameters for scope {}", self.scope),
            ),
        };
        Ok(self.record(event))
    }

    pub fn reset_active(&mut self) -> SessionEvent {
        self.active = None;
        log::info!("session: active parameters cleared");
        self.record(SessionEvent::ActiveCleared)
    }

    /// Persist the active parameters for the current scope, replacing any
    /// previous record. Parameters without a train window (manual entry) are
    /// saved with the session's current window.
    pub fn save_active(&mut self) -> CalibResult<SessionEvent> {
        let Some(active) = &self.active else {
            let event = SessionEvent::warning(
                SessionWarning::MissingActive,
                "no active parameters to save",
            );
            return Ok(self.record(event));
        };
        let Some(window) = active.train_window().or(self.window) else {
            let event = SessionEvent::warning(
                SessionWarning::EmptyScope,
                format!("no training window for scope {}, nothing saved", self.scope),
            );
            return Ok(self.record(event));
        };

        let params = NewParams {
            alpha:       active.alpha,
            beta:        active.beta,
            train_start: window.start,
            train_end:   window.end,
            fit_method:  active.fit_method.clone(),
            promo_lag:   active.promo_lag,
        };
        self.store.upsert(&self.scope, &params)?;
        let event = SessionEvent::ParamsSaved {
            scope:      self.scope.clone(),
            alpha:      params.alpha,
            beta:       params.beta,
            fit_method: params.fit_method,
        };
        Ok(self.record(event))
    }

    /// Switch scope. A scope with the same canonical key is a no-op; any other
    /// scope starts from a clean state.
    pub fn scope_changed(&mut self, scope: ScopeKey) -> CalibResult<SessionEvent> {
        if scope.canonical() == self.scope.canonical() {
            let event = SessionEvent::ScopeUnchanged { scope };
            return Ok(self.record(event));
        }
        let event = self.enter_scope(scope)?;
        Ok(self.record(event))
    }

    /// Replace the training window, clamped to the scope's periods.
    pub fn set_train_window(&mut self, start: Period, end: Period) -> SessionEvent {
        if self.scoped.is_empty() {
            let event = SessionEvent::warning(
                SessionWarning::EmptyScope,
                format!("no rows for scope {}, window unchanged", self.scope),
            );
            return self.record(event);
        }
        let window = TrainWindow::new(start, end).clamp_to(self.scoped.iter().map(|r| r.period));
        self.window = Some(window);
        self.record(SessionEvent::WindowChanged { window })
    }

    // ── Internals ──────────────────────────────────────────────

    fn enter_scope(&mut self, scope: ScopeKey) -> CalibResult<SessionEvent> {
        self.scoped = scope.filter(&self.series);
        self.window = TrainWindow::default_for(
            self.scoped.iter().map(|r| r.period),
            self.config.default_train_months,
        );
        self.scope = scope;
        self.active = None;
        self.candidate = None;

        if self.scoped.is_empty() {
            log::warn!("session: no rows for scope {}", self.scope);
        }

        let mut loaded = false;
        if self.config.auto_load_on_scope_change {
            if let Some(rec) = self.store.load(&self.scope)? {
                let event = self.adopt(&rec);
                self.record(event);
                loaded = true;
            }
        }
        log::info!(
            "session: entered scope {} ({} rows, auto-loaded={loaded})",
            self.scope, self.scoped.len()
        );
        Ok(SessionEvent::ScopeEntered {
            scope: self.scope.clone(),
            rows: self.scoped.len(),
            loaded,
        })
    }

    fn adopt(&mut self, rec: &PersistedParams) -> SessionEvent {
        self.active = Some(ActiveParameters::from_record(rec));
        log::info!(
            "session: loaded saved parameters for {} (alpha={} beta={} method={})",
            self.scope, rec.alpha, rec.beta, rec.fit_method
        );
        SessionEvent::ParamsLoaded {
            scope:      self.scope.clone(),
            alpha:      rec.alpha,
            beta:       rec.beta,
            fit_method: rec.fit_method.clone(),
        }
    }

    fn promote(&mut self, active: ActiveParameters) -> SessionEvent {
        let event = SessionEvent::ActivePromoted {
            provenance: active.provenance,
            alpha:      active.alpha,
            beta:       active.beta,
            promo_lag:  active.promo_lag,
        };
        log::info!(
            "session: active parameters set from {:?} (alpha={} beta={})",
            active.provenance, active.alpha, active.beta
        );
        self.active = Some(active);
        self.record(event)
    }

    fn features(&self, promo_lag: usize) -> Vec<FeatureRow> {
        build_features(&self.scoped, &FeatureSpec::with_lag(self.config.baseline_window, promo_lag))
    }

    fn record(&mut self, event: SessionEvent) -> SessionEvent {
        self.journal.push(event.clone());
        event
    }
}
