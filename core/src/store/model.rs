//! Store methods for fitted-model snapshots.
//!
//! A snapshot captures the complete FittedModel so a later run can
//! re-simulate without refitting.

use crate::{error::ForecastResult, fitter::FittedModel};
use rusqlite::{params, OptionalExtension};

use super::ForecastStore;

impl ForecastStore {
    pub fn save_model_snapshot(&self, run_id: &str, model: &FittedModel) -> ForecastResult<()> {
        let json = serde_json::to_string(model)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO model_snapshot (run_id, model_json) VALUES (?1, ?2)",
            params![run_id, json],
        )?;
        Ok(())
    }

    pub fn load_model_snapshot(&self, run_id: &str) -> ForecastResult<Option<FittedModel>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT model_json FROM model_snapshot WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }
}
