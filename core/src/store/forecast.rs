//! Store methods for forecast records and per-country failures.

use crate::{
    aggregate::{ForecastRecord, WindowExceedance},
    error::ForecastResult,
    types::CountryId,
};
use chrono::NaiveDate;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::ForecastStore;

/// A country whose forecasts were abandoned, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryFailure {
    pub country_id: CountryId,
    pub isoab:      String,
    pub reason:     String,
}

impl ForecastStore {
    /// Persist a batch of records in one transaction.
    pub fn insert_forecasts(&self, run_id: &str, records: &[ForecastRecord]) -> ForecastResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO forecast
                 (run_id, country_id, name, isoab, outcome_n, dates, predicted,
                  cumulative_outcome_n, outcome_p, outcome_p_se, window_p_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for r in records {
                stmt.execute(params![
                    run_id,
                    r.country_id,
                    r.name,
                    r.isoab,
                    r.outcome_n,
                    r.dates.to_string(),
                    r.predicted,
                    r.cumulative_outcome_n,
                    r.outcome_p,
                    r.outcome_p_se,
                    serde_json::to_string(&r.window_p)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// All records of a run, ordered by country then month.
    pub fn forecasts_for_run(&self, run_id: &str) -> ForecastResult<Vec<ForecastRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT country_id, name, isoab, outcome_n, dates, predicted,
                    cumulative_outcome_n, outcome_p, outcome_p_se, window_p_json
             FROM forecast WHERE run_id = ?1
             ORDER BY country_id ASC, outcome_n ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, f64>(6)?,
                    row.get::<_, f64>(7)?,
                    row.get::<_, f64>(8)?,
                    row.get::<_, String>(9)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(country_id, name, isoab, outcome_n, dates, predicted, cumulative, p, se, window_json)| -> ForecastResult<ForecastRecord> {
                let dates: NaiveDate = dates
                    .parse()
                    .map_err(|e| anyhow::anyhow!("bad stored date '{dates}': {e}"))?;
                let window_p: Vec<WindowExceedance> = serde_json::from_str(&window_json)?;
                Ok(ForecastRecord {
                    country_id,
                    name,
                    isoab,
                    outcome_n,
                    dates,
                    predicted,
                    cumulative_outcome_n: cumulative,
                    outcome_p: p,
                    outcome_p_se: se,
                    window_p,
                })
            })
            .collect()
    }

    pub fn forecast_count(&self, run_id: &str) -> ForecastResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM forecast WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn insert_country_failure(&self, run_id: &str, failure: &CountryFailure) -> ForecastResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO country_failure (run_id, country_id, isoab, reason)
             VALUES (?1, ?2, ?3, ?4)",
            params![run_id, failure.country_id, failure.isoab, failure.reason],
        )?;
        Ok(())
    }

    pub fn country_failures(&self, run_id: &str) -> ForecastResult<Vec<CountryFailure>> {
        let mut stmt = self.conn.prepare(
            "SELECT country_id, isoab, reason FROM country_failure
             WHERE run_id = ?1 ORDER BY country_id ASC",
        )?;
        let failures = stmt
            .query_map(params![run_id], |row| {
                Ok(CountryFailure {
                    country_id: row.get(0)?,
                    isoab:      row.get(1)?,
                    reason:     row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(failures)
    }
}
