//! Calibration session state machine tests.
//!
//! Verifies:
//!   - fitting sets a candidate and never changes the displayed forecast
//!   - promotion, manual entry, reset, save and load transitions
//!   - missing candidate / active / record are warnings, not errors
//!   - scope changes reset state and auto-load saved parameters

use chrono::NaiveDate;
use rps_calibration_core::{
    command::{FitOptions, SessionCommand},
    config::CalibConfig,
    event::{SessionEvent, SessionWarning},
    fit_strategy::FitMethod,
    scope::ScopeKey,
    session::{CalibrationSession, Provenance},
    store::CalibStore,
    types::TimeSeriesRow,
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn date(y: i32, m: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, 1).unwrap()
}

/// 2 brands × 2 cantons × 24 months (2023-01 .. 2024-12).
fn make_series() -> Vec<TimeSeriesRow> {
    let mut rows = Vec::new();
    for (b, brand) in ["Cardiox", "Neurova"].iter().enumerate() {
        for (c, canton) in ["BE", "ZH"].iter().enumerate() {
            for i in 0..24u32 {
                let (y, m) = (2023 + (i / 12) as i32, i % 12 + 1);
                let promo = 1000.0 + 250.0 * ((i * 7 + b as u32) % 5) as f64;
                let rebate_rate = 0.05 + 0.01 * ((i + c as u32) % 4) as f64;
                let units = 500.0 + 40.0 * ((i * 3 + b as u32 + c as u32) % 6) as f64 + 0.004 * promo;
                rows.push(TimeSeriesRow {
                    period: date(y, m),
                    brand: brand.to_string(),
                    canton: canton.to_string(),
                    units,
                    promo_spend: promo,
                    rebate_rate,
                });
            }
        }
    }
    rows
}

fn make_session(scope: ScopeKey) -> CalibrationSession {
    make_session_with(CalibConfig::default(), scope)
}

fn make_session_with(config: CalibConfig, scope: ScopeKey) -> CalibrationSession {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = CalibStore::in_memory().unwrap();
    store.migrate().unwrap();
    CalibrationSession::open(config, store, make_series(), scope).unwrap()
}

fn warning_of(event: &SessionEvent) -> Option<SessionWarning> {
    match event {
        SessionEvent::Warning { warning, .. } => Some(*warning),
        _ => None,
    }
}

// ── Initial state ────────────────────────────────────────────────────────────

#[test]
fn new_session_starts_without_parameters() {
    let session = make_session(ScopeKey::Global);

    assert!(session.active().is_none());
    assert!(session.candidate().is_none());
    assert!(session.forecast().is_none());
    assert_eq!(session.scoped_rows().len(), 96);
    assert_eq!(
        session.journal(),
        &[SessionEvent::ScopeEntered { scope: ScopeKey::Global, rows: 96, loaded: false }]
    );
    let window = session.train_window().unwrap();
    assert_eq!((window.start, window.end), (date(2023, 12), date(2024, 12)));
}

// ── Fit and promotion ────────────────────────────────────────────────────────

#[test]
fn run_fit_sets_candidate_but_not_active() {
    let mut session = make_session(ScopeKey::brand("Cardiox"));

    let event = session.run_fit(&FitOptions::new(FitMethod::Ols));

    assert!(matches!(event, SessionEvent::FitCompleted { method: FitMethod::Ols, converged: true, .. }));
    let candidate = session.candidate().expect("candidate after fit");
    assert!(candidate.result.converged);
    assert!(candidate.rows >= 6);
    assert!(session.active().is_none(), "fitting must not change active parameters");
    assert!(session.forecast().is_none());
}

#[test]
fn promote_without_candidate_is_a_warning() {
    let mut session = make_session(ScopeKey::Global);

    let event = session.set_active_from_fit();

    assert_eq!(warning_of(&event), Some(SessionWarning::MissingCandidate));
    assert!(session.active().is_none());
}

#[test]
fn promoted_fit_drives_the_forecast() {
    let mut session = make_session(ScopeKey::brand_canton("Neurova", "ZH"));
    session.run_fit(&FitOptions::new(FitMethod::BoundedLs).with_lag(1));

    let event = session.set_active_from_fit();

    let candidate = session.candidate().unwrap().clone();
    let active = session.active().expect("active after promotion");
    assert!(matches!(event, SessionEvent::ActivePromoted { provenance: Provenance::Fit, .. }));
    assert_eq!(active.alpha, candidate.result.alpha);
    assert_eq!(active.beta, candidate.result.beta);
    assert_eq!(active.promo_lag, 1);
    assert_eq!(active.fit_method, "BOUNDED_LS");
    assert_eq!(active.train_start, Some(candidate.window.start));
    assert!(active.alpha >= 0.0 && active.beta <= 0.0);

    let forecast = session.forecast().unwrap();
    assert_eq!(forecast.len(), 24);
    assert!(forecast[0].forecast_units.is_none(), "first period has no baseline");
    assert!(forecast.iter().filter_map(|r| r.forecast_units).all(|f| f >= 0.0));
}

#[test]
fn later_fit_does_not_replace_promoted_parameters() {
    let mut session = make_session(ScopeKey::brand("Cardiox"));
    session.set_active_from_manual(0.002, -0.3, 0);

    session.run_fit(&FitOptions::new(FitMethod::GridMape));

    let active = session.active().unwrap();
    assert_eq!((active.alpha, active.beta), (0.002, -0.3));
    assert_eq!(active.provenance, Provenance::Manual);
}

#[test]
fn manual_entry_accepts_any_sign() {
    let mut session = make_session(ScopeKey::Global);

    session.set_active_from_manual(-0.01, 0.7, 2);

    let active = session.active().unwrap();
    assert_eq!((active.alpha, active.beta, active.promo_lag), (-0.01, 0.7, 2));
    assert_eq!(active.fit_method, "MANUAL");
    assert_eq!(active.train_start, None);
    assert!(session.forecast().unwrap().iter().filter_map(|r| r.forecast_units).all(|f| f >= 0.0));
}

#[test]
fn insufficient_window_surfaces_fallback() {
    let mut session = make_session(ScopeKey::brand_canton("Cardiox", "ZH"));
    session.set_train_window(date(2024, 11), date(2024, 12));

    let event = session.run_fit(&FitOptions::new(FitMethod::Ols));

    assert_eq!(
        event,
        SessionEvent::FitCompleted {
            method: FitMethod::Ols,
            alpha: 0.003,
            beta: -0.5,
            converged: false,
            rows: 2,
        }
    );
    assert_eq!(
        warning_of(session.journal().last().unwrap()),
        Some(SessionWarning::FallbackFit)
    );
}

#[test]
fn manual_method_cannot_be_fitted() {
    let mut session = make_session(ScopeKey::Global);
    let event = session.run_fit(&FitOptions::new(FitMethod::Manual));
    assert_eq!(warning_of(&event), Some(SessionWarning::UnsupportedMethod));
    assert!(session.candidate().is_none());
}

#[test]
fn reset_clears_active() {
    let mut session = make_session(ScopeKey::Global);
    session.set_active_from_manual(0.003, -0.5, 0);

    assert_eq!(session.reset_active(), SessionEvent::ActiveCleared);
    assert!(session.active().is_none());
    assert!(session.forecast().is_none());
}

// ── Save and load ────────────────────────────────────────────────────────────

#[test]
fn save_without_active_is_a_warning() {
    let mut session = make_session(ScopeKey::Global);

    let event = session.save_active().unwrap();

    assert_eq!(warning_of(&event), Some(SessionWarning::MissingActive));
    assert_eq!(session.store().params_count().unwrap(), 0);
}

#[test]
fn load_without_record_is_a_warning_and_keeps_active() {
    let mut session = make_session(ScopeKey::brand("Neurova"));
    session.set_active_from_manual(0.004, -0.2, 0);

    let event = session.load_saved_for_scope().unwrap();

    assert_eq!(warning_of(&event), Some(SessionWarning::MissingScopeRecord));
    assert_eq!(session.active().unwrap().alpha, 0.004);
}

#[test]
fn manual_save_uses_session_window() {
    let mut session = make_session(ScopeKey::brand("Cardiox"));
    session.set_train_window(date(2023, 3), date(2024, 2));
    session.set_active_from_manual(0.006, -0.25, 1);

    let event = session.save_active().unwrap();

    assert!(matches!(event, SessionEvent::ParamsSaved { .. }));
    let rec = session.store().load(&ScopeKey::brand("Cardiox")).unwrap().unwrap();
    assert_eq!((rec.train_start, rec.train_end), (date(2023, 3), date(2024, 2)));
    assert_eq!(rec.fit_method, "MANUAL");
    assert_eq!(rec.promo_lag, 1);
}

#[test]
fn saved_parameters_auto_load_on_return_to_scope() {
    let mut session = make_session(ScopeKey::brand("Cardiox"));
    session.run_fit(&FitOptions::new(FitMethod::GridMape));
    session.set_active_from_fit();
    session.save_active().unwrap();
    let saved = session.active().unwrap().clone();

    let leave = session.scope_changed(ScopeKey::brand("Neurova")).unwrap();
    assert_eq!(leave, SessionEvent::ScopeEntered { scope: ScopeKey::brand("Neurova"), rows: 48, loaded: false });
    assert!(session.active().is_none(), "scope switch must not carry parameters over");
    assert!(session.candidate().is_none());

    let back = session.scope_changed(ScopeKey::brand("Cardiox")).unwrap();
    assert!(matches!(back, SessionEvent::ScopeEntered { loaded: true, .. }));
    let active = session.active().unwrap();
    assert_eq!(active.provenance, Provenance::LoadedFromStore);
    assert_eq!((active.alpha, active.beta), (saved.alpha, saved.beta));
    assert_eq!(active.fit_method, "GRID_MAPE");
    assert_eq!(active.train_start, saved.train_start);
}

#[test]
fn auto_load_disabled_requires_explicit_load() {
    let config = CalibConfig { auto_load_on_scope_change: false, ..CalibConfig::default() };
    let mut session = make_session_with(config, ScopeKey::Global);
    session.set_active_from_manual(0.005, -0.3, 0);
    session.save_active().unwrap();

    session.scope_changed(ScopeKey::brand("Cardiox")).unwrap();
    session.scope_changed(ScopeKey::Global).unwrap();
    assert!(session.active().is_none());

    let event = session.load_saved_for_scope().unwrap();
    assert!(matches!(event, SessionEvent::ParamsLoaded { .. }));
    assert_eq!(session.active().unwrap().alpha, 0.005);
}

#[test]
fn same_canonical_scope_is_not_a_change() {
    let mut session = make_session(ScopeKey::brand("Cardiox"));
    session.set_active_from_manual(0.001, -0.1, 0);

    let event = session.scope_changed(ScopeKey::brand("Cardiox")).unwrap();

    assert!(matches!(event, SessionEvent::ScopeUnchanged { .. }));
    assert_eq!(session.active().unwrap().alpha, 0.001);
}

#[test]
fn empty_scope_warns_instead_of_fitting() {
    let mut session = make_session(ScopeKey::brand("Missing"));

    let event = session.run_fit(&FitOptions::new(FitMethod::Ols));

    assert_eq!(warning_of(&event), Some(SessionWarning::EmptyScope));
    assert!(session.train_window().is_none());
}

// ── Evaluation ───────────────────────────────────────────────────────────────

#[test]
fn evaluation_splits_train_and_validation() {
    let mut session = make_session(ScopeKey::Global);
    session.set_train_window(date(2023, 6), date(2024, 6));
    session.set_active_from_manual(0.004, -0.5, 0);

    let eval = session.evaluation().unwrap();

    assert_eq!(eval.train.rows, 13 * 4);
    assert_eq!(eval.validation.rows, 6 * 4);
    assert!(eval.train.mape.is_finite() && eval.validation.wape.is_finite());

    let totals = session.period_totals().unwrap();
    assert_eq!(totals.len(), 24);
    assert!(totals.windows(2).all(|w| w[0].period < w[1].period));
}

/// Loaded parameters carry their fit window, but scoring uses the session window.
#[test]
fn evaluation_follows_session_window_not_stored_window() {
    let mut session = make_session(ScopeKey::brand("Cardiox"));
    session.set_train_window(date(2023, 3), date(2023, 8));
    session.set_active_from_manual(0.004, -0.5, 0);
    session.save_active().unwrap();
    session.set_train_window(date(2023, 6), date(2024, 6));

    session.load_saved_for_scope().unwrap();

    let active = session.active().unwrap();
    assert_eq!((active.train_start, active.train_end), (Some(date(2023, 3)), Some(date(2023, 8))));
    let eval = session.evaluation().unwrap();
    assert_eq!(eval.train.rows, 13 * 2);
    assert_eq!(eval.validation.rows, 6 * 2);
}

// ── Scope catalog ────────────────────────────────────────────────────────────

#[test]
fn catalog_lists_brands_and_cantons_of_the_series() {
    let session = make_session(ScopeKey::Global);

    let catalog = session.catalog();

    assert_eq!(catalog.brands(), vec!["Cardiox", "Neurova"]);
    assert_eq!(catalog.cantons(), vec!["BE", "ZH"]);
    assert_eq!(catalog.cantons_for("Neurova"), vec!["BE", "ZH"]);
}

// ── Command dispatch ─────────────────────────────────────────────────────────

#[test]
fn json_commands_drive_the_session() {
    let mut session = make_session(ScopeKey::Global);
    let script = [
        r#"{"cmd":"change_scope","scope":{"level":"brand","brand":"Neurova"}}"#,
        r#"{"cmd":"run_fit","method":"ols","weighted":true}"#,
        r#"{"cmd":"set_active_from_fit"}"#,
        r#"{"cmd":"save_active"}"#,
    ];
    for line in script {
        let cmd: SessionCommand = serde_json::from_str(line).unwrap();
        let event = session.apply(cmd).unwrap();
        assert!(!event.is_warning(), "unexpected warning for {line}: {event:?}");
    }

    assert!(session.candidate().unwrap().weighted);
    let rec = session.store().load(&ScopeKey::brand("Neurova")).unwrap().unwrap();
    assert_eq!(rec.fit_method, "OLS");
}

/// A grid override outside `alpha >= 0, beta <= 0` is refused, never fitted.
#[test]
fn grid_override_outside_sign_box_is_rejected() {
    let mut session = make_session(ScopeKey::brand("Cardiox"));
    let line = r#"{"cmd":"run_fit","method":"grid_mape","grid":{"a_max":-0.02,"b_min":1.0,"steps":11}}"#;

    let cmd: SessionCommand = serde_json::from_str(line).unwrap();
    let event = session.apply(cmd).unwrap();

    assert_eq!(warning_of(&event), Some(SessionWarning::InvalidGrid));
    assert!(session.candidate().is_none());

    let valid = r#"{"cmd":"run_fit","method":"grid_mape","grid":{"a_max":0.01,"b_min":-0.5,"steps":11}}"#;
    session.apply(serde_json::from_str(valid).unwrap()).unwrap();
    let fit = session.candidate().expect("candidate from valid grid").result;
    assert!(fit.converged);
    assert!((0.0..=0.01).contains(&fit.alpha) && (-0.5..=0.0).contains(&fit.beta));
}
