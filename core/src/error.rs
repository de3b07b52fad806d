use crate::types::{CountryId, MonthIndex};
use thiserror::Error;

/// Reasons the GLMM could not be estimated. Fitting is all-or-nothing:
/// any of these aborts the whole forecasting run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitFailure {
    #[error("historical panel has no observed rows")]
    EmptyPanel,

    #[error("country {country_id} has {observed} observed rows, at least {required} needed to identify its random effect")]
    InsufficientData {
        country_id: CountryId,
        observed: usize,
        required: usize,
    },

    #[error("covariate '{covariate}' missing for country {country_id} at month {month_index}")]
    MissingCovariate {
        country_id: CountryId,
        month_index: MonthIndex,
        covariate: String,
    },

    #[error("fixed-effect design is not identifiable: '{term}' is collinear with earlier terms")]
    Collinear { term: String },

    #[error("optimizer did not converge within {iterations} iterations (last change {last_change:.3e})")]
    NonConvergence { iterations: usize, last_change: f64 },

    #[error("non-finite parameter estimate for '{parameter}'")]
    NonFinite { parameter: String },
}

/// Reasons a single country's simulation batch was abandoned.
/// Scoped to one country: other countries are unaffected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationFailure {
    #[error("simulation count must be positive")]
    NoSimulations,

    #[error("forecast horizon must be positive")]
    EmptyHorizon,

    #[error("country {country_id} has no observed history to seed the lag")]
    NoObservedHistory { country_id: CountryId },

    #[error("country {country_id} has no forecast row for horizon month {month_index}")]
    MissingHorizonMonth {
        country_id: CountryId,
        month_index: MonthIndex,
    },

    #[error("covariate '{covariate}' missing for country {country_id} at horizon month {month_index}")]
    MissingCovariate {
        country_id: CountryId,
        month_index: MonthIndex,
        covariate: String,
    },

    #[error("country {country_id} is not in the panel")]
    UnknownCountry { country_id: CountryId },
}

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("Model fit failed: {0}")]
    Fit(#[from] FitFailure),

    #[error("Simulation failed: {0}")]
    Simulation(#[from] SimulationFailure),

    #[error("Aggregation invariant violated for country {country_id}: path {path_index} has length {actual}, expected {expected}")]
    AggregationInconsistency {
        country_id: CountryId,
        path_index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid panel: {0}")]
    InvalidPanel(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ForecastResult<T> = Result<T, ForecastError>;
