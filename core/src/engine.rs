//! The forecasting engine — runs the whole pipeline for one run.
//!
//! EXECUTION ORDER (fixed):
//!   1. Fit the GLMM on every historical row (or reuse a stored model)
//!   2. Simulate N paths per forecast country, in parallel
//!   3. Aggregate each country's paths into ForecastRecords
//!   4. Persist records, failures and events
//!
//! RULES:
//!   - A FitFailure aborts the run for every country.
//!   - A SimulationFailure abandons only that country.
//!   - All randomness flows from the run seed through the RngBank.
//!   - Every milestone is recorded in the event log.
//!
//! The run row must exist in the store before the engine records events.

use crate::{
    aggregate::{Aggregator, ForecastRecord},
    config::ForecastConfig,
    error::{ForecastError, ForecastResult},
    event::{EventLogEntry, ForecastEvent},
    fitter::{FittedModel, ModelFitter},
    panel::PanelStore,
    simulation::SimulationEngine,
    store::{CountryFailure, ForecastStore},
    types::{CountryId, RunId},
};
use rayon::prelude::*;

/// Outcome of one run: the model used, every successful record and
/// every abandoned country.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id:    RunId,
    pub model:     FittedModel,
    pub forecasts: Vec<ForecastRecord>,
    pub failures:  Vec<CountryFailure>,
}

impl RunReport {
    pub fn succeeded_countries(&self) -> Vec<CountryId> {
        let mut ids: Vec<CountryId> = self.forecasts.iter().map(|r| r.country_id).collect();
        ids.dedup();
        ids
    }

    pub fn forecasts_for(&self, country_id: CountryId) -> Vec<&ForecastRecord> {
        self.forecasts.iter().filter(|r| r.country_id == country_id).collect()
    }
}

pub struct ForecastEngine {
    pub run_id: RunId,
    pub config: ForecastConfig,
    store:      ForecastStore,
    seq:        u64,
}

impl ForecastEngine {
    pub fn new(run_id: RunId, config: ForecastConfig, store: ForecastStore) -> ForecastResult<Self> {
        config.validate()?;
        Ok(Self { run_id, config, store, seq: 0 })
    }

    /// Engine over a fresh in-memory store with the test configuration.
    pub fn build_test(run_id: RunId, seed: u64) -> ForecastResult<Self> {
        let config = ForecastConfig { seed, ..ForecastConfig::default_test() };
        Self::build_with_config(run_id, config)
    }

    /// Engine over a fresh in-memory store with the given configuration.
    pub fn build_with_config(run_id: RunId, config: ForecastConfig) -> ForecastResult<Self> {
        let store = ForecastStore::in_memory()?;
        store.migrate()?;
        store.insert_run(
            &run_id,
            config.seed,
            "0.1.0-test",
            &serde_json::to_string(&config)?,
            "1970-01-01T00:00:00Z",
        )?;
        Self::new(run_id, config, store)
    }

    pub fn store(&self) -> &ForecastStore {
        &self.store
    }

    /// Release the store, e.g. to hand it to the next run.
    pub fn into_store(self) -> ForecastStore {
        self.store
    }

    /// Fit the model on the panel, then forecast every country that
    /// has horizon rows.
    pub fn run(&mut self, panel: &PanelStore) -> ForecastResult<RunReport> {
        self.record_run_initialized()?;

        let model = match ModelFitter::new(&self.config).fit(panel) {
            Ok(model) => model,
            Err(failure) => {
                log::error!("run {}: model fit failed: {failure}", self.run_id);
                self.record("fitter", ForecastEvent::FitFailed { reason: failure.to_string() })?;
                return Err(ForecastError::Fit(failure));
            }
        };
        self.record(
            "fitter",
            ForecastEvent::ModelFitted {
                iterations:     model.iterations,
                n_observations: model.n_observations,
                dispersion:     model.dispersion,
                re_variance:    model.random_effect.variance,
                log_likelihood: model.log_likelihood,
            },
        )?;
        self.store.save_model_snapshot(&self.run_id, &model)?;

        self.forecast_with_model(panel, model)
    }

    /// Re-simulate with the model snapshotted by an earlier run.
    pub fn rerun_from(&mut self, panel: &PanelStore, source_run_id: &str) -> ForecastResult<RunReport> {
        let model = self.store.load_model_snapshot(source_run_id)?.ok_or_else(|| {
            ForecastError::InvalidConfig(format!("run {source_run_id} has no model snapshot"))
        })?;
        self.record_run_initialized()?;
        self.record(
            "fitter",
            ForecastEvent::ModelReused { source_run_id: source_run_id.to_string() },
        )?;
        self.store.save_model_snapshot(&self.run_id, &model)?;
        self.forecast_with_model(panel, model)
    }

    /// Simulate and aggregate every forecast country with a given model.
    pub fn forecast_with_model(&mut self, panel: &PanelStore, model: FittedModel) -> ForecastResult<RunReport> {
        let countries = panel.forecast_countries();
        let horizon = self.config.horizon_months;
        let n_paths = self.config.n_simulations;
        let simulator = SimulationEngine::new(&model, panel, self.config.seed)
            .with_max_mean(self.config.max_mean);
        let aggregator = Aggregator::new(
            self.config.threshold,
            self.config.cumulative_windows.clone(),
            self.config.dataset_start,
        );

        log::info!(
            "run {}: simulating {} countries × {n_paths} paths × {horizon} months",
            self.run_id,
            countries.len()
        );

        // Paths are reduced inside the parallel map, so each country's
        // path set is dropped as soon as its records exist.
        let outcomes: Vec<_> = countries
            .par_iter()
            .map(|&id| {
                let outcome = simulator
                    .simulate_country(id, horizon, n_paths)
                    .map(|sim| aggregator.aggregate(sim));
                (id, outcome)
            })
            .collect();

        let mut forecasts = Vec::new();
        let mut failures = Vec::new();
        for (country_id, outcome) in outcomes {
            match outcome {
                Ok(records) => {
                    let records = records?;
                    if let (Some(first), Some(last)) = (records.first(), records.last()) {
                        self.record(
                            "simulation",
                            ForecastEvent::CountryForecasted {
                                country_id,
                                first_month: first.outcome_n,
                                last_month:  last.outcome_n,
                            },
                        )?;
                    }
                    self.store.insert_forecasts(&self.run_id, &records)?;
                    forecasts.extend(records);
                }
                Err(failure) => {
                    let isoab = panel
                        .country(country_id)
                        .map(|c| c.country.isoab.clone())
                        .unwrap_or_default();
                    log::warn!("run {}: country {country_id} ({isoab}) abandoned: {failure}", self.run_id);
                    let failure = CountryFailure { country_id, isoab, reason: failure.to_string() };
                    self.store.insert_country_failure(&self.run_id, &failure)?;
                    self.record(
                        "simulation",
                        ForecastEvent::CountryFailed {
                            country_id,
                            reason: failure.reason.clone(),
                        },
                    )?;
                    failures.push(failure);
                }
            }
        }

        let succeeded = countries.len() - failures.len();
        self.record(
            "engine",
            ForecastEvent::RunCompleted { succeeded, failed: failures.len() },
        )?;
        log::info!(
            "run {}: {succeeded} countries forecast, {} failed",
            self.run_id,
            failures.len()
        );

        Ok(RunReport {
            run_id: self.run_id.clone(),
            model,
            forecasts,
            failures,
        })
    }

    fn record_run_initialized(&mut self) -> ForecastResult<()> {
        let event = ForecastEvent::RunInitialized {
            run_id:         self.run_id.clone(),
            seed:           self.config.seed,
            n_simulations:  self.config.n_simulations,
            horizon_months: self.config.horizon_months,
            threshold:      self.config.threshold,
        };
        self.record("engine", event)
    }

    fn record(&mut self, stage: &str, event: ForecastEvent) -> ForecastResult<()> {
        let entry = EventLogEntry {
            id:         None,
            run_id:     self.run_id.clone(),
            seq:        self.seq,
            stage:      stage.to_string(),
            event_type: event.type_name().to_string(),
            payload:    serde_json::to_string(&event)?,
        };
        self.store.append_event(&entry)?;
        self.seq += 1;
        Ok(())
    }
}
