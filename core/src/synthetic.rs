//! Synthetic panels drawn from a known GLMM.
//!
//! Used by tests and by `forecast-runner --synthetic` to exercise the
//! full pipeline without upstream data. Generation is deterministic in
//! the seed.

use crate::{
    config::LagTransform,
    error::ForecastResult,
    negbin::NegativeBinomial,
    panel::{Covariates, PanelRow, PanelStore, RegionFlags},
    rng::RngBank,
    types::{CountryId, Count, MonthIndex},
};
use rand::distributions::Distribution;
use statrs::distribution::Normal;

/// True parameters of the generating process. Covariate effects apply
/// to raw covariate values; each covariate is drawn around a
/// country-specific level.
#[derive(Debug, Clone)]
pub struct SyntheticPanel {
    pub n_countries:    usize,
    pub history_months: usize,
    pub horizon_months: usize,
    pub first_month:    MonthIndex,
    pub intercept:      f64,
    /// (name, effect per unit, level range low, level range high)
    pub covariates:     Vec<(String, f64, f64, f64)>,
    pub autoregressive: f64,
    pub lag_transform:  LagTransform,
    pub dispersion:     f64,
    pub re_sd:          f64,
    pub seed:           u64,
}

impl Default for SyntheticPanel {
    fn default() -> Self {
        Self {
            n_countries:    12,
            history_months: 48,
            horizon_months: 6,
            first_month:    493, // 2021-01
            intercept:      0.2,
            covariates:     vec![
                ("infant_mortality".into(), 0.02, 5.0, 80.0),
                ("milex_share".into(), 0.15, 0.5, 5.0),
            ],
            autoregressive: 0.45,
            lag_transform:  LagTransform::Log1p,
            dispersion:     0.6,
            re_sd:          0.7,
            seed:           7,
        }
    }
}

impl SyntheticPanel {
    pub fn covariate_names(&self) -> Vec<String> {
        self.covariates.iter().map(|c| c.0.clone()).collect()
    }

    pub fn rows(&self) -> Vec<PanelRow> {
        let bank = RngBank::new(self.seed);
        let mut rows = Vec::new();

        for c in 0..self.n_countries {
            let country_id = (c + 1) as CountryId;
            let mut rng = bank.for_path(country_id, 0);
            let effect = match Normal::new(0.0, self.re_sd) {
                Ok(normal) if self.re_sd > 0.0 => normal.sample(&mut rng),
                _ => 0.0,
            };
            let levels: Vec<f64> = self
                .covariates
                .iter()
                .map(|(_, _, lo, hi)| lo + (hi - lo) * rng.next_f64())
                .collect();

            let mut lag: Count = 0;
            let total = self.history_months + self.horizon_months;
            for m in 0..total {
                let month_index = self.first_month + m as MonthIndex;
                let covariates: Covariates = self
                    .covariates
                    .iter()
                    .zip(&levels)
                    .map(|((name, _, lo, hi), level)| {
                        let jitter = 0.05 * (hi - lo) * (rng.next_f64() - 0.5);
                        (name.clone(), level + jitter)
                    })
                    .collect();

                let fatalities = if m < self.history_months {
                    let eta = self.intercept
                        + self
                            .covariates
                            .iter()
                            .map(|(name, beta, _, _)| beta * covariates[name])
                            .sum::<f64>()
                        + self.autoregressive * self.lag_transform.apply(lag)
                        + effect;
                    let y = NegativeBinomial::new(eta.exp(), self.dispersion).sample(&mut rng);
                    lag = y;
                    Some(y)
                } else {
                    None
                };

                rows.push(PanelRow {
                    country_id,
                    name: format!("Country {country_id}"),
                    isoab: format!("C{country_id:02}"),
                    month_index,
                    fatalities,
                    covariates,
                    regions: RegionFlags {
                        in_africa:      country_id % 2 == 0,
                        in_middle_east: country_id % 5 == 0,
                    },
                });
            }
        }
        rows
    }

    pub fn generate(&self) -> ForecastResult<PanelStore> {
        PanelStore::from_rows(self.rows())
    }
}
