//! Shared primitive types used across the forecasting engine.

/// Stable numeric country identifier from the upstream panel.
pub type CountryId = i64;

/// Month index counted from the dataset start (month 1 = first month).
pub type MonthIndex = i64;

/// A fatality count. Observed and simulated counts are both non-negative.
pub type Count = u64;

/// The canonical run identifier.
pub type RunId = String;
