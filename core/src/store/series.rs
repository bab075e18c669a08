use super::{format_date, parse_date, CalibStore};
use crate::{error::CalibResult, types::TimeSeriesRow};
use rusqlite::params;

impl CalibStore {
    // ── Monthly series (input feed) ────────────────────────────

    /// Import aggregated rows, overwriting any existing (brand, canton, period).
    pub fn upsert_series(&self, rows: &[TimeSeriesRow]) -> CalibResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO monthly_series (period, brand, canton, units, promo_spend, rebate_rate)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(brand, canton, period) DO UPDATE SET
                    units       = excluded.units,
                    promo_spend = excluded.promo_spend,
                    rebate_rate = excluded.rebate_rate",
            )?;
            for r in rows {
                stmt.execute(params![
                    format_date(r.period),
                    r.brand,
                    r.canton,
                    r.units,
                    r.promo_spend,
                    r.rebate_rate,
                ])?;
            }
        }
        tx.commit()?;
        log::info!("series: imported {} rows", rows.len());
        Ok(rows.len())
    }

    /// All rows ordered by brand, canton, period.
    pub fn load_series(&self) -> CalibResult<Vec<TimeSeriesRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT period, brand, canton, units, promo_spend, rebate_rate
             FROM monthly_series
             ORDER BY brand, canton, period",
        )?;
        let raws = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raws.into_iter()
            .map(|(period, brand, canton, units, promo_spend, rebate_rate)| {
                Ok(TimeSeriesRow {
                    period: parse_date(&period)?,
                    brand,
                    canton,
                    units,
                    promo_spend,
                    rebate_rate,
                })
            })
            .collect()
    }

    pub fn series_count(&self) -> CalibResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM monthly_series", [], |row| row.get(0))
            .map_err(Into::into)
    }
}
