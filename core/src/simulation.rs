//! SimulationEngine — sequential Monte Carlo forecast paths.
//!
//! Each (country, path) pair is an independent finite-state process:
//!   state = (lag, random_effect)
//! advanced one horizon month at a time. The first step's lag is the
//! last observed count; every later step's lag is the count this same
//! path drew one step earlier.
//!
//! RULES:
//!   - A path never reads another path's state.
//!   - A path's random effect is drawn once, from its country's fitted
//!     conditional distribution, and never changes.
//!   - Steps within a path run strictly in month order.
//!   - All randomness comes from the path's own PathRng.
//!
//! Paths and countries run in parallel on rayon; results are collected
//! in index order, so output never depends on scheduling.

use crate::{
    config::DEFAULT_MAX_MEAN,
    error::SimulationFailure,
    fitter::{FittedModel, RandomEffectDistribution},
    panel::{Country, PanelStore},
    rng::{PathRng, RngBank},
    types::{CountryId, Count, MonthIndex},
};
use rand::distributions::Distribution;
use rayon::prelude::*;
use statrs::distribution::Normal;

/// One complete draw for one country.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedPath {
    pub path_index:    usize,
    pub random_effect: f64,
    /// Lag fed into each step. `lags[0]` is the observed count;
    /// `lags[t]` equals `counts[t - 1]`.
    pub lags:          Vec<Count>,
    pub counts:        Vec<Count>,
}

impl SimulatedPath {
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// All paths for one country over the horizon.
#[derive(Debug, Clone)]
pub struct CountrySimulation {
    pub country: Country,
    pub months:  Vec<MonthIndex>,
    pub paths:   Vec<SimulatedPath>,
}

/// Mutable state of one path between steps.
#[derive(Debug, Clone, Copy)]
struct PathState {
    lag:           Count,
    random_effect: f64,
}

impl PathState {
    /// Draw this month's count and feed it back as the next lag.
    fn step(&mut self, model: &FittedModel, fixed: f64, max_mean: f64, rng: &mut PathRng) -> Count {
        let mean = model
            .expected_count(fixed, self.lag, self.random_effect)
            .min(max_mean);
        let drawn = model.distribution(mean).sample(rng);
        self.lag = drawn;
        drawn
    }
}

pub struct SimulationEngine<'a> {
    model:    &'a FittedModel,
    panel:    &'a PanelStore,
    rng_bank: RngBank,
    max_mean: f64,
}

impl<'a> SimulationEngine<'a> {
    pub fn new(model: &'a FittedModel, panel: &'a PanelStore, seed: u64) -> Self {
        Self {
            model,
            panel,
            rng_bank: RngBank::new(seed),
            max_mean: DEFAULT_MAX_MEAN,
        }
    }

    pub fn with_max_mean(mut self, max_mean: f64) -> Self {
        self.max_mean = max_mean;
        self
    }

    pub fn max_mean(&self) -> f64 {
        self.max_mean
    }

    /// Simulate `n_paths` paths of `horizon` months for one country.
    ///
    /// Every input is validated before any path starts, so a failure
    /// never leaves a partial path set behind.
    pub fn simulate_country(
        &self,
        country_id: CountryId,
        horizon: usize,
        n_paths: usize,
    ) -> Result<CountrySimulation, SimulationFailure> {
        if n_paths == 0 {
            return Err(SimulationFailure::NoSimulations);
        }
        if horizon == 0 {
            return Err(SimulationFailure::EmptyHorizon);
        }
        let country = self
            .panel
            .country(country_id)
            .ok_or(SimulationFailure::UnknownCountry { country_id })?;
        let (last_month, last_count) = country
            .last_observed()
            .ok_or(SimulationFailure::NoObservedHistory { country_id })?;

        let months: Vec<MonthIndex> = (1..=horizon as MonthIndex).map(|h| last_month + h).collect();
        let fixed = months
            .iter()
            .map(|&month_index| {
                let record = country
                    .horizon_month(month_index)
                    .ok_or(SimulationFailure::MissingHorizonMonth { country_id, month_index })?;
                self.model
                    .fixed_predictor(&record.covariates)
                    .map_err(|covariate| SimulationFailure::MissingCovariate {
                        country_id,
                        month_index,
                        covariate,
                    })
            })
            .collect::<Result<Vec<f64>, _>>()?;

        let effect = self.model.random_effect_for(country_id);
        let paths: Vec<SimulatedPath> = (0..n_paths)
            .into_par_iter()
            .map(|path_index| self.run_path(country_id, path_index, last_count, &fixed, effect))
            .collect();

        log::debug!(
            "simulated country={country_id} paths={n_paths} months={}..={}",
            months[0],
            months[months.len() - 1]
        );

        Ok(CountrySimulation {
            country: country.country.clone(),
            months,
            paths,
        })
    }

    /// Simulate every listed country. A failing country does not
    /// affect the others.
    pub fn simulate_all(
        &self,
        countries: &[CountryId],
        horizon: usize,
        n_paths: usize,
    ) -> Vec<(CountryId, Result<CountrySimulation, SimulationFailure>)> {
        countries
            .par_iter()
            .map(|&id| (id, self.simulate_country(id, horizon, n_paths)))
            .collect()
    }

    fn run_path(
        &self,
        country_id: CountryId,
        path_index: usize,
        observed_lag: Count,
        fixed: &[f64],
        effect: RandomEffectDistribution,
    ) -> SimulatedPath {
        let mut rng = self.rng_bank.for_path(country_id, path_index);
        let random_effect = draw_random_effect(effect, &mut rng);

        let mut state = PathState { lag: observed_lag, random_effect };
        let mut lags = Vec::with_capacity(fixed.len());
        let mut counts = Vec::with_capacity(fixed.len());
        for &f in fixed {
            lags.push(state.lag);
            counts.push(state.step(self.model, f, self.max_mean, &mut rng));
        }

        SimulatedPath { path_index, random_effect, lags, counts }
    }
}

fn draw_random_effect(effect: RandomEffectDistribution, rng: &mut PathRng) -> f64 {
    let sd = effect.std_dev();
    match Normal::new(effect.mean, sd) {
        Ok(normal) if sd > 0.0 => normal.sample(rng),
        _ => effect.mean,
    }
}
