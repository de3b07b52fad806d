use crate::error::{ForecastError, ForecastResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// File name looked up inside the data directory by `ForecastConfig::load`.
pub const CONFIG_FILE: &str = "forecast_config.json";

/// Cap on a simulated month's conditional mean.
pub const DEFAULT_MAX_MEAN: f64 = 1e6;

/// How the previous month's count enters the linear predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LagTransform {
    /// ln(1 + lag). Keeps the log-link recursion from exploding.
    Log1p,
    /// The raw count.
    Identity,
}

impl LagTransform {
    pub fn apply(&self, lag: u64) -> f64 {
        match self {
            Self::Log1p    => (lag as f64).ln_1p(),
            Self::Identity => lag as f64,
        }
    }
}

// ── Fitter ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitterConfig {
    /// Observed rows (with a lag) a country needs for its random effect.
    #[serde(default = "default_min_obs")]
    pub min_obs_per_country:    usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations:         usize,
    /// Largest absolute parameter change accepted as converged.
    #[serde(default = "default_tolerance")]
    pub tolerance:              f64,
    /// Relative Cholesky pivot below which a term counts as collinear.
    #[serde(default = "default_collinearity_tolerance")]
    pub collinearity_tolerance: f64,
    #[serde(default = "default_initial_dispersion")]
    pub initial_dispersion:     f64,
    #[serde(default = "default_initial_re_variance")]
    pub initial_re_variance:    f64,
}

fn default_min_obs() -> usize { 3 }
fn default_max_iterations() -> usize { 200 }
fn default_tolerance() -> f64 { 1e-6 }
fn default_collinearity_tolerance() -> f64 { 1e-10 }
fn default_initial_dispersion() -> f64 { 1.0 }
fn default_initial_re_variance() -> f64 { 1.0 }

impl Default for FitterConfig {
    fn default() -> Self {
        Self {
            min_obs_per_country:    default_min_obs(),
            max_iterations:         default_max_iterations(),
            tolerance:              default_tolerance(),
            collinearity_tolerance: default_collinearity_tolerance(),
            initial_dispersion:     default_initial_dispersion(),
            initial_re_variance:    default_initial_re_variance(),
        }
    }
}

// ── Run configuration ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// Fatalities at or above this count are a severe-conflict month.
    #[serde(default = "default_threshold")]
    pub threshold:          u64,
    #[serde(default = "default_n_simulations")]
    pub n_simulations:      usize,
    #[serde(default = "default_horizon")]
    pub horizon_months:     usize,
    #[serde(default = "default_seed")]
    pub seed:               u64,
    /// Trailing windows (months) for cumulative exceedance.
    #[serde(default = "default_windows")]
    pub cumulative_windows: Vec<usize>,
    /// Calendar month of month_index 1.
    #[serde(default = "default_dataset_start")]
    pub dataset_start:      NaiveDate,
    /// Covariates entering the model, in coefficient order.
    #[serde(default = "default_covariates")]
    pub covariates:         Vec<String>,
    #[serde(default = "default_lag_transform")]
    pub lag_transform:      LagTransform,
    /// Upper bound on a simulated monthly mean.
    #[serde(default = "default_max_mean")]
    pub max_mean:           f64,
    #[serde(default)]
    pub fitter:             FitterConfig,
}

fn default_threshold() -> u64 { 25 }
fn default_n_simulations() -> usize { 1000 }
fn default_horizon() -> usize { 12 }
fn default_seed() -> u64 { 42 }
fn default_windows() -> Vec<usize> { vec![3, 6, 12] }
fn default_lag_transform() -> LagTransform { LagTransform::Log1p }
fn default_max_mean() -> f64 { DEFAULT_MAX_MEAN }

fn default_dataset_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(1980, 1, 1).unwrap_or_default()
}

fn default_covariates() -> Vec<String> {
    vec![
        "infant_mortality".into(),
        "milex_share".into(),
        "milex_abs".into(),
        "exec_military".into(),
    ]
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            threshold:          default_threshold(),
            n_simulations:      default_n_simulations(),
            horizon_months:     default_horizon(),
            seed:               default_seed(),
            cumulative_windows: default_windows(),
            dataset_start:      default_dataset_start(),
            covariates:         default_covariates(),
            lag_transform:      default_lag_transform(),
            max_mean:           default_max_mean(),
            fitter:             FitterConfig::default(),
        }
    }
}

impl ForecastConfig {
    /// Load `forecast_config.json` from `data_dir`. Missing keys take
    /// their defaults; a missing file is an error.
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/{CONFIG_FILE}");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Small, fast configuration for tests: few paths, short horizon,
    /// two covariates.
    pub fn default_test() -> Self {
        Self {
            n_simulations:  200,
            horizon_months: 6,
            covariates:     vec!["infant_mortality".into(), "milex_share".into()],
            ..Self::default()
        }
    }

    pub fn validate(&self) -> ForecastResult<()> {
        if self.n_simulations == 0 {
            return Err(ForecastError::InvalidConfig("n_simulations must be ≥ 1".into()));
        }
        if self.horizon_months == 0 {
            return Err(ForecastError::InvalidConfig("horizon_months must be ≥ 1".into()));
        }
        if self.cumulative_windows.contains(&0) {
            return Err(ForecastError::InvalidConfig("cumulative windows must be ≥ 1".into()));
        }
        if !(self.max_mean.is_finite() && self.max_mean > 0.0) {
            return Err(ForecastError::InvalidConfig("max_mean must be positive".into()));
        }
        if self.fitter.max_iterations == 0 || self.fitter.tolerance <= 0.0 {
            return Err(ForecastError::InvalidConfig(
                "fitter needs a positive iteration budget and tolerance".into(),
            ));
        }
        let mut names = self.covariates.clone();
        names.sort();
        names.dedup();
        if names.len() != self.covariates.len() {
            return Err(ForecastError::InvalidConfig("covariate names must be unique".into()));
        }
        Ok(())
    }
}
