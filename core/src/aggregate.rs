//! Aggregator — reduce simulated paths to per-month forecast records.
//!
//! For horizon month t over N paths:
//!   predicted[t]            = mean of y_t
//!   cumulative_outcome_n[t] = mean of the per-path running sum y_1 + … + y_t
//!   outcome_p[t]            = #(y_t ≥ T) / N
//! Window exceedance: #(y_{t-w+1} + … + y_t ≥ T) / N, once t ≥ w.
//!
//! Sums are taken in integer arithmetic so the cumulative law
//! cumulative[t] = cumulative[t-1] + predicted[t] holds to rounding.

use crate::{
    error::{ForecastError, ForecastResult},
    panel::{calendar_month, Country},
    simulation::{CountrySimulation, SimulatedPath},
    types::{Count, CountryId, MonthIndex},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowExceedance {
    pub window_months: usize,
    pub probability:   f64,
}

/// Distribution summary for one horizon month, before identity and
/// calendar are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthSummary {
    pub month_index:          MonthIndex,
    pub predicted:            f64,
    pub cumulative_outcome_n: f64,
    pub outcome_p:            f64,
    pub outcome_p_se:         f64,
    pub window_p:             Vec<WindowExceedance>,
}

/// One delivered row per country-month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub country_id:           CountryId,
    pub name:                 String,
    pub isoab:                String,
    pub outcome_n:            MonthIndex,
    pub dates:                NaiveDate,
    pub predicted:            f64,
    pub cumulative_outcome_n: f64,
    pub outcome_p:            f64,
    /// Binomial standard error of `outcome_p`.
    pub outcome_p_se:         f64,
    #[serde(default)]
    pub window_p:             Vec<WindowExceedance>,
}

#[derive(Debug, Clone)]
pub struct Aggregator {
    threshold:     Count,
    windows:       Vec<usize>,
    dataset_start: NaiveDate,
}

impl Aggregator {
    pub fn new(threshold: Count, windows: Vec<usize>, dataset_start: NaiveDate) -> Self {
        Self { threshold, windows, dataset_start }
    }

    pub fn threshold(&self) -> Count {
        self.threshold
    }

    /// Consume a country's simulation and emit its forecast records.
    /// The paths are dropped once reduced.
    pub fn aggregate(&self, simulation: CountrySimulation) -> ForecastResult<Vec<ForecastRecord>> {
        let CountrySimulation { country, months, paths } = simulation;
        let summaries = self.summarize(&country, &months, &paths)?;
        drop(paths);

        summaries
            .into_iter()
            .map(|s| {
                let dates = calendar_month(self.dataset_start, s.month_index).ok_or_else(|| {
                    ForecastError::InvalidConfig(format!(
                        "month index {} has no calendar month",
                        s.month_index
                    ))
                })?;
                Ok(ForecastRecord {
                    country_id: country.country_id,
                    name: country.name.clone(),
                    isoab: country.isoab.clone(),
                    outcome_n: s.month_index,
                    dates,
                    predicted: s.predicted,
                    cumulative_outcome_n: s.cumulative_outcome_n,
                    outcome_p: s.outcome_p,
                    outcome_p_se: s.outcome_p_se,
                    window_p: s.window_p,
                })
            })
            .collect()
    }

    /// Per-month statistics across all paths.
    pub fn summarize(
        &self,
        country: &Country,
        months: &[MonthIndex],
        paths: &[SimulatedPath],
    ) -> ForecastResult<Vec<MonthSummary>> {
        let horizon = months.len();
        if let Some(bad) = paths.iter().find(|p| p.len() != horizon) {
            return Err(ForecastError::AggregationInconsistency {
                country_id: country.country_id,
                path_index: bad.path_index,
                expected:   horizon,
                actual:     bad.len(),
            });
        }
        let n = paths.len();
        if n == 0 {
            return Err(ForecastError::InvalidConfig(format!(
                "no simulated paths for country {}",
                country.country_id
            )));
        }
        let nf = n as f64;

        let mut month_sum = vec![0u128; horizon];
        let mut cumulative_sum = vec![0u128; horizon];
        let mut exceed = vec![0usize; horizon];
        let mut window_exceed = vec![vec![0usize; horizon]; self.windows.len()];

        for path in paths {
            let mut running: Vec<u128> = Vec::with_capacity(horizon + 1);
            running.push(0);
            for (t, &y) in path.counts.iter().enumerate() {
                let total = running[t] + y as u128;
                running.push(total);
                month_sum[t] += y as u128;
                cumulative_sum[t] += total;
                if y >= self.threshold {
                    exceed[t] += 1;
                }
                for (k, &w) in self.windows.iter().enumerate() {
                    if t + 1 >= w && total - running[t + 1 - w] >= self.threshold as u128 {
                        window_exceed[k][t] += 1;
                    }
                }
            }
        }

        Ok((0..horizon)
            .map(|t| {
                let p = exceed[t] as f64 / nf;
                MonthSummary {
                    month_index:          months[t],
                    predicted:            month_sum[t] as f64 / nf,
                    cumulative_outcome_n: cumulative_sum[t] as f64 / nf,
                    outcome_p:            p,
                    outcome_p_se:         (p * (1.0 - p) / nf).sqrt(),
                    window_p: self
                        .windows
                        .iter()
                        .enumerate()
                        .filter(|(_, w)| t + 1 >= **w)
                        .map(|(k, &w)| WindowExceedance {
                            window_months: w,
                            probability:   window_exceed[k][t] as f64 / nf,
                        })
                        .collect(),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn country() -> Country {
        Country { country_id: 1, name: "Atlantis".into(), isoab: "ATL".into() }
    }

    fn path(path_index: usize, counts: Vec<Count>) -> SimulatedPath {
        SimulatedPath { path_index, random_effect: 0.0, lags: vec![0; counts.len()], counts }
    }

    #[test]
    fn window_exceedance_uses_trailing_sum() {
        let agg = Aggregator::new(25, vec![2], NaiveDate::from_ymd_opt(1980, 1, 1).unwrap());
        let paths = vec![path(0, vec![10, 10, 20]), path(1, vec![0, 30, 0])];
        let out = agg.summarize(&country(), &[1, 2, 3], &paths).unwrap();

        assert!(out[0].window_p.is_empty());
        // month 2: sums 20 and 30 → one of two paths
        assert_eq!(out[1].window_p[0].probability, 0.5);
        // month 3: sums 30 and 30 → both
        assert_eq!(out[2].window_p[0].probability, 1.0);
    }

    #[test]
    fn standard_error_is_binomial() {
        let agg = Aggregator::new(1, vec![], NaiveDate::from_ymd_opt(1980, 1, 1).unwrap());
        let paths: Vec<_> = (0..4).map(|i| path(i, vec![if i < 1 { 5 } else { 0 }])).collect();
        let out = agg.summarize(&country(), &[7], &paths).unwrap();

        assert_eq!(out[0].outcome_p, 0.25);
        let expected = (0.25f64 * 0.75 / 4.0).sqrt();
        assert!((out[0].outcome_p_se - expected).abs() < 1e-15);
    }
}
