//! The run event log — every milestone of a forecasting run.
//!
//! RULE: Events are append-only. Variants are added, never removed or
//! reordered, so old logs stay readable.

use crate::types::{CountryId, MonthIndex, RunId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ForecastEvent {
    RunInitialized {
        run_id: RunId,
        seed: u64,
        n_simulations: usize,
        horizon_months: usize,
        threshold: u64,
    },
    ModelFitted {
        iterations: usize,
        n_observations: usize,
        dispersion: f64,
        re_variance: f64,
        log_likelihood: f64,
    },
    ModelReused {
        source_run_id: RunId,
    },
    FitFailed {
        reason: String,
    },
    CountryForecasted {
        country_id: CountryId,
        first_month: MonthIndex,
        last_month: MonthIndex,
    },
    CountryFailed {
        country_id: CountryId,
        reason: String,
    },
    RunCompleted {
        succeeded: usize,
        failed: usize,
    },
}

impl ForecastEvent {
    /// Stable name for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RunInitialized { .. }    => "run_initialized",
            Self::ModelFitted { .. }       => "model_fitted",
            Self::ModelReused { .. }       => "model_reused",
            Self::FitFailed { .. }         => "fit_failed",
            Self::CountryForecasted { .. } => "country_forecasted",
            Self::CountryFailed { .. }     => "country_failed",
            Self::RunCompleted { .. }      => "run_completed",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    /// Position of the event within its run.
    pub seq: u64,
    pub stage: String,
    pub event_type: String,
    pub payload: String, // JSON-serialized ForecastEvent
}
