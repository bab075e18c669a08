use super::{format_date, parse_date, CalibStore};
use crate::{
    error::{CalibError, CalibResult},
    scope::{CanonicalScope, ScopeKey, ScopeLevel},
    types::Period,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

/// Fields written on every save. A save always replaces the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewParams {
    pub alpha:       f64,
    pub beta:        f64,
    pub train_start: Period,
    pub train_end:   Period,
    pub fit_method:  String,
    pub promo_lag:   usize,
}

/// The durable record for one canonical scope key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedParams {
    pub scope:       CanonicalScope,
    pub alpha:       f64,
    pub beta:        f64,
    pub train_start: Period,
    pub train_end:   Period,
    pub fit_method:  String,
    pub promo_lag:   usize,
    pub updated_at:  DateTime<Utc>,
}

impl PersistedParams {
    pub fn scope_key(&self) -> ScopeKey {
        ScopeKey::from_canonical(self.scope.level, &self.scope.key1, &self.scope.key2)
    }
}

/// Raw column values, parsed after the statement completes.
type RawParamsRow = (String, String, String, f64, f64, String, String, String, i64, String);

const SELECT_PARAMS: &str =
    "SELECT scope_level, scope_key1, scope_key2, alpha, beta,
            train_start, train_end, fit_method, promo_lag, updated_at
     FROM forecast_params";

impl CalibStore {
    // ── Forecast parameters ────────────────────────────────────

    /// Write the record for `scope`, replacing any previous one.
    pub fn upsert(&self, scope: &ScopeKey, p: &NewParams) -> CalibResult<()> {
        let c = scope.canonical();
        self.upsert_params(c.level, &c.key1, &c.key2, p)
    }

    /// Latest record for `scope`, `None` when nothing was saved.
    pub fn load(&self, scope: &ScopeKey) -> CalibResult<Option<PersistedParams>> {
        let c = scope.canonical();
        self.load_params(c.level, &c.key1, &c.key2)
    }

    /// Insert or overwrite the record keyed by `(level, key1, key2)`.
    /// Last write wins; no history is kept.
    pub fn upsert_params(
        &self,
        level: ScopeLevel,
        key1: &str,
        key2: &str,
        p: &NewParams,
    ) -> CalibResult<()> {
        self.ensure_params_table()?;
        let promo_lag = i64::try_from(p.promo_lag).map_err(|_| {
            CalibError::Other(anyhow::anyhow!("promo_lag {} does not fit the store", p.promo_lag))
        })?;
        let updated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        self.conn.execute(
            "INSERT INTO forecast_params (
                scope_level, scope_key1, scope_key2, alpha, beta,
                train_start, train_end, fit_method, promo_lag, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(scope_level, scope_key1, scope_key2) DO UPDATE SET
                alpha       = excluded.alpha,
                beta        = excluded.beta,
                train_start = excluded.train_start,
                train_end   = excluded.train_end,
                fit_method  = excluded.fit_method,
                promo_lag   = excluded.promo_lag,
                updated_at  = excluded.updated_at",
            params![
                level.as_str(),
                key1,
                key2,
                p.alpha,
                p.beta,
                format_date(p.train_start),
                format_date(p.train_end),
                p.fit_method,
                promo_lag,
                updated_at,
            ],
        )?;
        log::info!(
            "params: saved {}|{key1}|{key2} alpha={} beta={} method={}",
            level.as_str(), p.alpha, p.beta, p.fit_method
        );
        Ok(())
    }

    pub fn load_params(
        &self,
        level: ScopeLevel,
        key1: &str,
        key2: &str,
    ) -> CalibResult<Option<PersistedParams>> {
        self.ensure_params_table()?;
        let raw: Option<RawParamsRow> = self
            .conn
            .query_row(
                &format!(
                    "{SELECT_PARAMS}
                     WHERE scope_level = ?1 AND scope_key1 = ?2 AND scope_key2 = ?3
                     ORDER BY updated_at DESC
                     LIMIT 1"
                ),
                params![level.as_str(), key1, key2],
                read_raw,
            )
            .optional()?;
        raw.map(parse_raw).transpose()
    }

    /// Every saved record, ordered by scope key.
    pub fn list_params(&self) -> CalibResult<Vec<PersistedParams>> {
        self.ensure_params_table()?;
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_PARAMS} ORDER BY scope_level, scope_key1, scope_key2"
        ))?;
        let raws = stmt
            .query_map([], read_raw)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(parse_raw).collect()
    }

    pub fn params_count(&self) -> CalibResult<i64> {
        self.ensure_params_table()?;
        self.conn
            .query_row("SELECT COUNT(*) FROM forecast_params", [], |row| row.get(0))
            .map_err(Into::into)
    }
}

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawParamsRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn parse_raw(raw: RawParamsRow) -> CalibResult<PersistedParams> {
    let (level, key1, key2, alpha, beta, start, end, fit_method, promo_lag, updated_at) = raw;
    let level = ScopeLevel::parse(&level).ok_or_else(|| {
        CalibError::Other(anyhow::anyhow!("unknown scope level '{level}' in forecast_params"))
    })?;
    let promo_lag = usize::try_from(promo_lag).map_err(|_| {
        CalibError::Other(anyhow::anyhow!(
            "invalid promo_lag {promo_lag} for {}|{key1}|{key2} in forecast_params",
            level.as_str()
        ))
    })?;
    let updated_at = DateTime::parse_from_rfc3339(&updated_at)
        .map_err(|_| CalibError::InvalidDate { value: updated_at.clone() })?
        .with_timezone(&Utc);
    Ok(PersistedParams {
        scope: CanonicalScope { level, key1, key2 },
        alpha,
        beta,
        train_start: parse_date(&start)?,
        train_end: parse_date(&end)?,
        fit_method,
        promo_lag,
        updated_at,
    })
}
