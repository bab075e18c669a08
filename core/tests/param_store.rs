//! Parameter store integration tests.
//!
//! Verifies against SQLite:
//!   - upsert then load returns exactly what was written, per canonical scope
//!   - a save overwrites the whole record; one row per scope key
//!   - concurrent writers to the same key: last write wins
//!   - an unreachable store is a hard error, not an empty result

use chrono::NaiveDate;
use rps_calibration_core::{
    error::CalibError,
    scope::{ScopeKey, ScopeLevel, ALL_KEY, GLOBAL_KEY},
    store::{CalibStore, NewParams},
    types::TimeSeriesRow,
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn date(y: i32, m: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, 1).unwrap()
}

fn make_store() -> CalibStore {
    let store = CalibStore::in_memory().unwrap();
    store.migrate().unwrap();
    store
}

fn params(alpha: f64, beta: f64, method: &str, lag: usize) -> NewParams {
    NewParams {
        alpha,
        beta,
        train_start: date(2024, 1),
        train_end:   date(2024, 12),
        fit_method:  method.into(),
        promo_lag:   lag,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// upsert(global, 0.005, -0.3, 2024-01..2024-12, "OLS", 0) then load(global).
#[test]
fn global_scope_round_trip() {
    let store = make_store();
    store
        .upsert_params(ScopeLevel::Global, GLOBAL_KEY, GLOBAL_KEY, &params(0.005, -0.3, "OLS", 0))
        .unwrap();

    let rec = store.load(&ScopeKey::Global).unwrap().expect("global record");
    assert_eq!(rec.alpha, 0.005);
    assert_eq!(rec.beta, -0.3);
    assert_eq!(rec.train_start, date(2024, 1));
    assert_eq!(rec.train_end, date(2024, 12));
    assert_eq!(rec.fit_method, "OLS");
    assert_eq!(rec.promo_lag, 0);
    assert_eq!(rec.scope_key(), ScopeKey::Global);
}

/// A brand scope is stored under (brand, "__ALL__").
#[test]
fn brand_scope_uses_all_placeholder() {
    let store = make_store();
    store.upsert(&ScopeKey::brand("X"), &params(0.01, -0.2, "GRID_MAPE", 2)).unwrap();

    let raw = store
        .load_params(ScopeLevel::Brand, "X", ALL_KEY)
        .unwrap()
        .expect("stored under canonical key");
    assert_eq!(raw.alpha, 0.01);
    assert_eq!(raw.promo_lag, 2);
    assert!(store.load(&ScopeKey::brand_canton("X", ALL_KEY)).unwrap().is_none());
}

/// Empty brand and canton strings are valid keys and stay distinct.
#[test]
fn empty_string_keys_round_trip() {
    let store = make_store();
    store.upsert(&ScopeKey::brand(""), &params(0.001, -0.1, "OLS", 0)).unwrap();
    store.upsert(&ScopeKey::brand_canton("", ""), &params(0.002, -0.2, "OLS", 0)).unwrap();

    assert_eq!(store.load(&ScopeKey::brand("")).unwrap().unwrap().alpha, 0.001);
    assert_eq!(store.load(&ScopeKey::brand_canton("", "")).unwrap().unwrap().alpha, 0.002);
    assert!(store.load(&ScopeKey::Global).unwrap().is_none());
    assert_eq!(store.params_count().unwrap(), 2);
}

/// A second save replaces every field and never adds a row.
#[test]
fn save_overwrites_whole_record() {
    let store = make_store();
    let scope = ScopeKey::brand_canton("Cardiox", "ZH");
    store.upsert(&scope, &params(0.004, -0.4, "OLS", 1)).unwrap();
    let first = store.load(&scope).unwrap().unwrap();

    let second = NewParams {
        alpha:       0.007,
        beta:        -0.1,
        train_start: date(2023, 6),
        train_end:   date(2024, 5),
        fit_method:  "BOUNDED_LS".into(),
        promo_lag:   0,
    };
    store.upsert(&scope, &second).unwrap();

    let rec = store.load(&scope).unwrap().unwrap();
    assert_eq!(store.params_count().unwrap(), 1);
    assert_eq!(rec.alpha, 0.007);
    assert_eq!(rec.beta, -0.1);
    assert_eq!(rec.train_start, date(2023, 6));
    assert_eq!(rec.train_end, date(2024, 5));
    assert_eq!(rec.fit_method, "BOUNDED_LS");
    assert_eq!(rec.promo_lag, 0);
    assert!(rec.updated_at >= first.updated_at);
}

/// Missing records are absent, not errors. Loading works before any migration.
#[test]
fn missing_scope_is_absent() {
    let store = CalibStore::in_memory().unwrap();
    assert!(store.load(&ScopeKey::brand("Nobody")).unwrap().is_none());
    assert_eq!(store.params_count().unwrap(), 0);
}

/// Upsert creates the table on a fresh database.
#[test]
fn upsert_creates_table_when_absent() {
    let store = CalibStore::in_memory().unwrap();
    store.upsert(&ScopeKey::Global, &params(0.003, -0.5, "MANUAL", 0)).unwrap();
    assert!(store.load(&ScopeKey::Global).unwrap().is_some());
}

/// Two connections writing the same key: the later write survives.
#[test]
fn concurrent_writers_last_write_wins() {
    let uri = "file:params_lww_test?mode=memory&cache=shared";
    let a = CalibStore::open(uri).unwrap();
    a.migrate().unwrap();
    let b = a.reopen().unwrap();

    let scope = ScopeKey::brand("Neurova");
    a.upsert(&scope, &params(0.001, -0.9, "OLS", 0)).unwrap();
    b.upsert(&scope, &params(0.009, -0.1, "GRID_MAPE", 0)).unwrap();

    let seen_by_a = a.load(&scope).unwrap().unwrap();
    assert_eq!(seen_by_a.alpha, 0.009);
    assert_eq!(seen_by_a.fit_method, "GRID_MAPE");
    assert_eq!(a.params_count().unwrap(), 1);
}

#[test]
fn list_params_is_ordered_by_scope_key() {
    let store = make_store();
    store.upsert(&ScopeKey::brand_canton("B", "ZH"), &params(0.1, -0.1, "OLS", 0)).unwrap();
    store.upsert(&ScopeKey::Global, &params(0.2, -0.2, "OLS", 0)).unwrap();
    store.upsert(&ScopeKey::brand("A"), &params(0.3, -0.3, "OLS", 0)).unwrap();

    let scopes: Vec<_> = store.list_params().unwrap().iter().map(|p| p.scope_key()).collect();
    assert_eq!(
        scopes,
        vec![ScopeKey::brand("A"), ScopeKey::brand_canton("B", "ZH"), ScopeKey::Global]
    );
}

/// A store that cannot be opened propagates a database error.
#[test]
fn unreachable_store_is_a_hard_error() {
    let result = CalibStore::open("/nonexistent-calibration-dir/sub/params.db");
    assert!(matches!(result, Err(CalibError::Database(_))));
}

#[test]
fn series_import_is_idempotent_and_ordered() {
    let store = make_store();
    let row = |brand: &str, m: u32, units: f64| TimeSeriesRow {
        period:      date(2024, m),
        brand:       brand.into(),
        canton:      "ZH".into(),
        units,
        promo_spend: 100.0,
        rebate_rate: 0.1,
    };
    store.upsert_series(&[row("B", 1, 10.0), row("A", 2, 20.0), row("A", 1, 30.0)]).unwrap();
    store.upsert_series(&[row("A", 1, 35.0)]).unwrap();

    let rows = store.load_series().unwrap();
    assert_eq!(store.series_count().unwrap(), 3);
    assert_eq!(rows[0], row("A", 1, 35.0));
    assert_eq!(rows[1], row("A", 2, 20.0));
    assert_eq!(rows[2], row("B", 1, 10.0));
}
