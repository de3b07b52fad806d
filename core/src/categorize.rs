//! Forecast categorization for downstream reporting.
//!
//! Risk categories bin `outcome_p`, intensity bands bin `predicted`.
//! Rankings and cohorts compare countries within one forecast month.

use crate::{
    aggregate::ForecastRecord,
    types::{CountryId, MonthIndex},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    NearCertainNoConflict,
    ImprobableConflict,
    ProbableConflict,
    NearCertainConflict,
}

impl RiskCategory {
    pub fn from_probability(p: f64) -> Self {
        if p <= 0.01 {
            Self::NearCertainNoConflict
        } else if p <= 0.50 {
            Self::ImprobableConflict
        } else if p <= 0.99 {
            Self::ProbableConflict
        } else {
            Self::NearCertainConflict
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NearCertainNoConflict => "Near-certain no conflict",
            Self::ImprobableConflict    => "Improbable conflict",
            Self::ProbableConflict      => "Probable conflict",
            Self::NearCertainConflict   => "Near-certain conflict",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntensityBand {
    Zero,
    UpTo10,
    UpTo100,
    UpTo1k,
    UpTo10k,
    Above10k,
}

impl IntensityBand {
    pub fn from_predicted(predicted: f64) -> Self {
        if predicted <= 0.0 {
            Self::Zero
        } else if predicted <= 10.0 {
            Self::UpTo10
        } else if predicted <= 100.0 {
            Self::UpTo100
        } else if predicted <= 1_000.0 {
            Self::UpTo1k
        } else if predicted <= 10_000.0 {
            Self::UpTo10k
        } else {
            Self::Above10k
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Zero     => "0",
            Self::UpTo10   => "1-10",
            Self::UpTo100  => "11-100",
            Self::UpTo1k   => "101-1,000",
            Self::UpTo10k  => "1,001-10,000",
            Self::Above10k => "10,001+",
        }
    }
}

/// A country's standing among all countries in one month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyRank {
    pub country_id:            CountryId,
    pub isoab:                 String,
    pub risk:                  RiskCategory,
    pub intensity:             IntensityBand,
    /// Share of countries (in %) with `outcome_p` at or below this one.
    pub probability_percentile: f64,
    /// Share of countries (in %) with `predicted` at or below this one.
    pub predicted_percentile:   f64,
}

pub fn rank_month(records: &[ForecastRecord], outcome_n: MonthIndex) -> Vec<MonthlyRank> {
    let month: Vec<&ForecastRecord> = records.iter().filter(|r| r.outcome_n == outcome_n).collect();
    let n = month.len() as f64;

    month
        .iter()
        .map(|r| {
            let p_at_or_below = month.iter().filter(|o| o.outcome_p <= r.outcome_p).count();
            let y_at_or_below = month.iter().filter(|o| o.predicted <= r.predicted).count();
            MonthlyRank {
                country_id:             r.country_id,
                isoab:                  r.isoab.clone(),
                risk:                   RiskCategory::from_probability(r.outcome_p),
                intensity:              IntensityBand::from_predicted(r.predicted),
                probability_percentile: p_at_or_below as f64 / n * 100.0,
                predicted_percentile:   y_at_or_below as f64 / n * 100.0,
            }
        })
        .collect()
}

/// ISO codes of the countries sharing a (risk, intensity) cell in a month.
pub fn cohort(
    records: &[ForecastRecord],
    outcome_n: MonthIndex,
    risk: RiskCategory,
    intensity: IntensityBand,
) -> Vec<String> {
    records
        .iter()
        .filter(|r| r.outcome_n == outcome_n)
        .filter(|r| RiskCategory::from_probability(r.outcome_p) == risk)
        .filter(|r| IntensityBand::from_predicted(r.predicted) == intensity)
        .map(|r| r.isoab.clone())
        .collect()
}

/// Whole-horizon totals per country, as used for the world map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonSummary {
    pub country_id:      CountryId,
    pub name:            String,
    pub isoab:           String,
    pub total_predicted: f64,
    pub log_predicted:   f64,
    pub horizon_start:   MonthIndex,
    pub horizon_end:     MonthIndex,
}

pub fn horizon_summaries(records: &[ForecastRecord]) -> Vec<HorizonSummary> {
    let mut by_country: BTreeMap<CountryId, HorizonSummary> = BTreeMap::new();
    for r in records {
        let entry = by_country.entry(r.country_id).or_insert_with(|| HorizonSummary {
            country_id:      r.country_id,
            name:            r.name.clone(),
            isoab:           r.isoab.clone(),
            total_predicted: 0.0,
            log_predicted:   0.0,
            horizon_start:   r.outcome_n,
            horizon_end:     r.outcome_n,
        });
        entry.total_predicted += r.predicted;
        entry.horizon_start = entry.horizon_start.min(r.outcome_n);
        entry.horizon_end = entry.horizon_end.max(r.outcome_n);
    }
    by_country
        .into_values()
        .map(|mut s| {
            s.log_predicted = s.total_predicted.ln_1p();
            s
        })
        .collect()
}
