//! ModelFitter — Negative Binomial GLMM with a country random intercept.
//!
//! Model, for country c and month t:
//!   y_ct ~ NB2(μ_ct, α)            Var = μ + α·μ²
//!   ln μ_ct = β₀ + β·z_ct + φ·g(y_c,t-1) + u_c
//!   u_c ~ N(0, σ²)
//! where z are standardized covariates and g is the configured lag transform.
//!
//! Estimation alternates, every iteration:
//!   1. one Fisher-scoring step on (β, u) jointly for the penalized
//!      likelihood, with u eliminated by its Schur complement and
//!      step-halving if the objective drops,
//!   2. α by golden-section search on ln α,
//!   3. σ² ← (Σ u_c² + Σ 1/h_c) / C, h_c the curvature at the mode.
//! Converged when every parameter moves less than the tolerance.
//!
//! RULE: fitting is all-or-nothing. Any failure returns FitFailure and
//! no FittedModel.

use crate::{
    config::{FitterConfig, ForecastConfig, LagTransform},
    error::FitFailure,
    linalg::cholesky_solve,
    negbin::{ln_gamma_ratio, NegativeBinomial},
    panel::{Covariates, PanelStore},
    types::{CountryId, Count},
};
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;
use std::collections::BTreeMap;

pub const INTERCEPT_TERM: &str = "(intercept)";
pub const LAG_TERM: &str = "lag1_fatalities";

const MIN_DISPERSION: f64 = 1e-6;
const MAX_DISPERSION: f64 = 1e3;
const MIN_RE_VARIANCE: f64 = 1e-8;
const ETA_LIMIT: f64 = 40.0;
const GOLDEN_ITERATIONS: usize = 80;
const MAX_STEP_HALVINGS: usize = 20;

// ── Fitted model ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovariateEffect {
    pub name:        String,
    /// Effect of one standard deviation of the covariate.
    pub coefficient: f64,
    pub center:      f64,
    pub scale:       f64,
}

/// Normal distribution of a country random intercept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RandomEffectDistribution {
    pub mean:     f64,
    pub variance: f64,
}

impl RandomEffectDistribution {
    pub fn std_dev(&self) -> f64 {
        self.variance.max(0.0).sqrt()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub intercept:      f64,
    pub covariates:     Vec<CovariateEffect>,
    pub autoregressive: f64,
    pub lag_transform:  LagTransform,
    pub dispersion:     f64,
    pub random_effect:  RandomEffectDistribution,
    /// Conditional distribution of u_c given each fitted country's
    /// history: N(û_c, 1/h_c) with h_c the curvature at the mode.
    pub country_effects: BTreeMap<CountryId, RandomEffectDistribution>,
    /// Laplace-approximate marginal log-likelihood.
    pub log_likelihood: f64,
    pub iterations:     usize,
    pub n_observations: usize,
}

impl FittedModel {
    /// β₀ + β·z for one month's covariates. Returns the name of the
    /// first missing covariate on failure.
    pub fn fixed_predictor(&self, covariates: &Covariates) -> Result<f64, String> {
        let mut eta = self.intercept;
        for effect in &self.covariates {
            let x = covariates
                .get(&effect.name)
                .copied()
                .ok_or_else(|| effect.name.clone())?;
            eta += effect.coefficient * (x - effect.center) / effect.scale;
        }
        Ok(eta)
    }

    /// Full linear predictor given the fixed part, the lag and the
    /// country's random effect.
    pub fn linear_predictor(&self, fixed: f64, lag: Count, random_effect: f64) -> f64 {
        fixed + self.autoregressive * self.lag_transform.apply(lag) + random_effect
    }

    pub fn expected_count(&self, fixed: f64, lag: Count, random_effect: f64) -> f64 {
        self.linear_predictor(fixed, lag, random_effect).exp()
    }

    pub fn distribution(&self, mean: f64) -> NegativeBinomial {
        NegativeBinomial::new(mean, self.dispersion)
    }

    /// Intercept distribution a country's paths draw from. Countries
    /// the model was not fitted on fall back to the pooled N(0, σ²).
    pub fn random_effect_for(&self, country_id: CountryId) -> RandomEffectDistribution {
        self.country_effects
            .get(&country_id)
            .copied()
            .unwrap_or(self.random_effect)
    }

    pub fn coefficient(&self, name: &str) -> Option<f64> {
        match name {
            INTERCEPT_TERM => Some(self.intercept),
            LAG_TERM       => Some(self.autoregressive),
            _ => self.covariates.iter().find(|c| c.name == name).map(|c| c.coefficient),
        }
    }
}

// ── Fitter ───────────────────────────────────────────────────────────────────

pub struct ModelFitter {
    config:        FitterConfig,
    covariates:    Vec<String>,
    lag_transform: LagTransform,
}

/// Prepared design: one row per usable observation.
struct Design {
    terms:   Vec<String>,
    x:       Vec<Vec<f64>>,
    y:       Vec<Count>,
    group:   Vec<usize>,
    groups:  Vec<CountryId>,
    scaling: Vec<(f64, f64)>,
}

struct Params {
    beta:   Vec<f64>,
    u:      Vec<f64>,
    alpha:  f64,
    sigma2: f64,
}

impl ModelFitter {
    pub fn new(config: &ForecastConfig) -> Self {
        Self {
            config:        config.fitter.clone(),
            covariates:    config.covariates.clone(),
            lag_transform: config.lag_transform,
        }
    }

    pub fn with_settings(config: FitterConfig, covariates: Vec<String>, lag_transform: LagTransform) -> Self {
        Self { config, covariates, lag_transform }
    }

    /// Estimate the GLMM from every historical row of the panel.
    pub fn fit(&self, panel: &PanelStore) -> Result<FittedModel, FitFailure> {
        let design = self.build_design(panel)?;
        let p = design.terms.len();
        let n_groups = design.groups.len();

        let mean_y = design.y.iter().map(|&y| y as f64).sum::<f64>() / design.y.len() as f64;
        let mut beta = vec![0.0; p];
        beta[0] = (mean_y + 0.1).ln();
        let mut params = Params {
            beta,
            u:      vec![0.0; n_groups],
            alpha:  self.config.initial_dispersion.clamp(MIN_DISPERSION, MAX_DISPERSION),
            sigma2: self.config.initial_re_variance.max(MIN_RE_VARIANCE),
        };

        let mut last_change = f64::INFINITY;
        for iteration in 1..=self.config.max_iterations {
            let (beta, u) = self.scoring_step(&design, &params)?;
            let alpha = update_dispersion(&design, &beta, &u);
            let sigma2 = update_re_variance(&design, &beta, &u, alpha, params.sigma2);

            last_change = max_abs_diff(&beta, &params.beta)
                .max(max_abs_diff(&u, &params.u))
                .max((alpha.ln() - params.alpha.ln()).abs())
                .max((sigma2.ln() - params.sigma2.ln()).abs());

            params = Params { beta, u, alpha, sigma2 };
            check_finite(&design, &params)?;

            log::debug!(
                "fit iter={iteration} change={last_change:.3e} alpha={:.4} sigma2={:.4} beta={:?}",
                params.alpha,
                params.sigma2,
                params.beta
            );

            if last_change < self.config.tolerance {
                let model = self.finish(&design, params, iteration);
                log::info!(
                    "GLMM converged in {iteration} iterations: n={} countries={} alpha={:.4} sigma2={:.4} phi={:.4} loglik={:.2}",
                    model.n_observations,
                    n_groups,
                    model.dispersion,
                    model.random_effect.variance,
                    model.autoregressive,
                    model.log_likelihood
                );
                return Ok(model);
            }
        }

        Err(FitFailure::NonConvergence {
            iterations: self.config.max_iterations,
            last_change,
        })
    }

    fn build_design(&self, panel: &PanelStore) -> Result<Design, FitFailure> {
        if panel.historical_row_count() == 0 {
            return Err(FitFailure::EmptyPanel);
        }

        let mut raw: Vec<Vec<f64>> = Vec::new();
        let mut lags = Vec::new();
        let mut y = Vec::new();
        let mut group = Vec::new();
        let mut groups = Vec::new();

        for country in panel.countries() {
            let country_id = country.country.country_id;
            let usable: Vec<_> = country
                .history()
                .iter()
                .filter_map(|r| Some((r, r.fatalities_observed?, r.lag1_fatalities?)))
                .collect();
            if usable.len() < self.config.min_obs_per_country.max(1) {
                return Err(FitFailure::InsufficientData {
                    country_id,
                    observed: usable.len(),
                    required: self.config.min_obs_per_country.max(1),
                });
            }

            let g = groups.len();
            groups.push(country_id);
            for (record, observed, lag) in usable {
                let row = self
                    .covariates
                    .iter()
                    .map(|name| {
                        record.covariates.get(name).copied().ok_or_else(|| {
                            FitFailure::MissingCovariate {
                                country_id,
                                month_index: record.month_index,
                                covariate: name.clone(),
                            }
                        })
                    })
                    .collect::<Result<Vec<f64>, _>>()?;
                raw.push(row);
                lags.push(self.lag_transform.apply(lag));
                y.push(observed);
                group.push(g);
            }
        }

        let n = y.len() as f64;
        let mut scaling = Vec::with_capacity(self.covariates.len());
        for (j, name) in self.covariates.iter().enumerate() {
            let center = raw.iter().map(|r| r[j]).sum::<f64>() / n;
            let var = raw.iter().map(|r| (r[j] - center).powi(2)).sum::<f64>() / n;
            let scale = var.sqrt();
            if !(scale > 1e-12 * center.abs().max(1.0)) {
                // Constant column: indistinguishable from the intercept.
                return Err(FitFailure::Collinear { term: name.clone() });
            }
            scaling.push((center, scale));
        }

        let x = raw
            .iter()
            .zip(&lags)
            .map(|(r, &lag)| {
                let mut row = Vec::with_capacity(r.len() + 2);
                row.push(1.0);
                row.extend(r.iter().zip(&scaling).map(|(v, (c, s))| (v - c) / s));
                row.push(lag);
                row
            })
            .collect();

        let mut terms = vec![INTERCEPT_TERM.to_string()];
        terms.extend(self.covariates.iter().cloned());
        terms.push(LAG_TERM.to_string());

        Ok(Design { terms, x, y, group, groups, scaling })
    }

    /// One penalized Fisher-scoring step for (β, u) at fixed (α, σ²).
    fn scoring_step(&self, design: &Design, params: &Params) -> Result<(Vec<f64>, Vec<f64>), FitFailure> {
        let p = design.terms.len();
        let c = design.groups.len();
        let alpha = params.alpha;
        let precision = 1.0 / params.sigma2;

        let mut a = vec![vec![0.0; p]; p];
        let mut rhs = vec![0.0; p];
        let mut b = vec![vec![0.0; p]; c];
        let mut d = vec![precision; c];
        let mut dr = vec![0.0; c];

        for (i, xi) in design.x.iter().enumerate() {
            let g = design.group[i];
            let eta = dot(xi, &params.beta) + params.u[g];
            let mu = mean_of(eta);
            let yi = design.y[i] as f64;
            let w = mu / (1.0 + alpha * mu);
            // w·z with z the working response, computed without dividing by μ.
            let wz = w * eta + (yi - mu) / (1.0 + alpha * mu);

            for j in 0..p {
                let wx = w * xi[j];
                for k in 0..=j {
                    a[j][k] += wx * xi[k];
                }
                rhs[j] += xi[j] * wz;
                b[g][j] += wx;
            }
            d[g] += w;
            dr[g] += wz;
        }

        // Schur complement eliminating u (its block is diagonal).
        for g in 0..c {
            for j in 0..p {
                for k in 0..=j {
                    a[j][k] -= b[g][j] * b[g][k] / d[g];
                }
                rhs[j] -= b[g][j] * dr[g] / d[g];
            }
        }
        for j in 0..p {
            for k in (j + 1)..p {
                a[j][k] = a[k][j];
            }
        }

        let beta_full = cholesky_solve(&a, &rhs, self.config.collinearity_tolerance).map_err(|s| {
            FitFailure::Collinear { term: design.terms[s.index].clone() }
        })?;
        let u_full: Vec<f64> = (0..c)
            .map(|g| (dr[g] - dot(&b[g], &beta_full)) / d[g])
            .collect();

        // Step-halving toward the current point if the objective drops.
        let q_old = penalized_objective(design, &params.beta, &params.u, alpha, params.sigma2);
        let mut step = 1.0;
        for _ in 0..=MAX_STEP_HALVINGS {
            let beta = lerp(&params.beta, &beta_full, step);
            let u = lerp(&params.u, &u_full, step);
            let q_new = penalized_objective(design, &beta, &u, alpha, params.sigma2);
            if q_new.is_finite() && q_new >= q_old - 1e-10 * q_old.abs().max(1.0) {
                return Ok((beta, u));
            }
            step *= 0.5;
        }
        Ok((params.beta.clone(), params.u.clone()))
    }

    fn finish(&self, design: &Design, params: Params, iterations: usize) -> FittedModel {
        let p = design.terms.len();
        let covariates = self
            .covariates
            .iter()
            .zip(&design.scaling)
            .enumerate()
            .map(|(j, (name, &(center, scale)))| CovariateEffect {
                name: name.clone(),
                coefficient: params.beta[j + 1],
                center,
                scale,
            })
            .collect();

        let curvature = group_curvature(design, &params.beta, &params.u, params.alpha, params.sigma2);
        let log_likelihood = penalized_objective(design, &params.beta, &params.u, params.alpha, params.sigma2)
            - 0.5 * curvature.iter().map(|h| (params.sigma2 * h).ln()).sum::<f64>();

        FittedModel {
            intercept: params.beta[0],
            covariates,
            autoregressive: params.beta[p - 1],
            lag_transform: self.lag_transform,
            dispersion: params.alpha,
            random_effect: RandomEffectDistribution { mean: 0.0, variance: params.sigma2 },
            country_effects: design
                .groups
                .iter()
                .zip(params.u.iter().zip(&curvature))
                .map(|(&id, (&mode, &h))| (id, RandomEffectDistribution { mean: mode, variance: 1.0 / h }))
                .collect(),
            log_likelihood,
            iterations,
            n_observations: design.y.len(),
        }
    }
}

// ── Numeric helpers ──────────────────────────────────────────────────────────

fn mean_of(eta: f64) -> f64 {
    eta.clamp(-ETA_LIMIT, ETA_LIMIT).exp()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn lerp(from: &[f64], to: &[f64], t: f64) -> Vec<f64> {
    from.iter().zip(to).map(|(a, b)| a + t * (b - a)).collect()
}

fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max)
}

fn means(design: &Design, beta: &[f64], u: &[f64]) -> Vec<f64> {
    design
        .x
        .iter()
        .zip(&design.group)
        .map(|(xi, &g)| mean_of(dot(xi, beta) + u[g]))
        .collect()
}

/// NB2 log-likelihood of every observation at the given means.
fn log_likelihood(y: &[Count], mu: &[f64], alpha: f64) -> f64 {
    let r = 1.0 / alpha;
    y.iter()
        .zip(mu)
        .map(|(&yi, &m)| {
            let yf = yi as f64;
            ln_gamma_ratio(yi, r) - ln_gamma(yf + 1.0)
                + r * (r / (r + m)).ln()
                + yf * (m / (r + m)).ln()
        })
        .sum()
}

fn penalized_objective(design: &Design, beta: &[f64], u: &[f64], alpha: f64, sigma2: f64) -> f64 {
    let mu = means(design, beta, u);
    log_likelihood(&design.y, &mu, alpha) - u.iter().map(|v| v * v).sum::<f64>() / (2.0 * sigma2)
}

/// Golden-section maximization of the likelihood over ln α.
fn update_dispersion(design: &Design, beta: &[f64], u: &[f64]) -> f64 {
    let mu = means(design, beta, u);
    let objective = |log_alpha: f64| log_likelihood(&design.y, &mu, log_alpha.exp());

    let inv_phi = (5f64.sqrt() - 1.0) / 2.0;
    let (mut lo, mut hi) = (MIN_DISPERSION.ln(), MAX_DISPERSION.ln());
    let mut x1 = hi - inv_phi * (hi - lo);
    let mut x2 = lo + inv_phi * (hi - lo);
    let mut f1 = objective(x1);
    let mut f2 = objective(x2);
    for _ in 0..GOLDEN_ITERATIONS {
        if f1 < f2 {
            lo = x1;
            x1 = x2;
            f1 = f2;
            x2 = lo + inv_phi * (hi - lo);
            f2 = objective(x2);
        } else {
            hi = x2;
            x2 = x1;
            f2 = f1;
            x1 = hi - inv_phi * (hi - lo);
            f1 = objective(x1);
        }
    }
    (0.5 * (lo + hi)).exp().clamp(MIN_DISPERSION, MAX_DISPERSION)
}

/// Expected curvature of the penalized likelihood in each u_c.
fn group_curvature(design: &Design, beta: &[f64], u: &[f64], alpha: f64, sigma2: f64) -> Vec<f64> {
    let mut h = vec![1.0 / sigma2; design.groups.len()];
    for (m, &g) in means(design, beta, u).iter().zip(&design.group) {
        h[g] += m / (1.0 + alpha * m);
    }
    h
}

fn update_re_variance(design: &Design, beta: &[f64], u: &[f64], alpha: f64, sigma2: f64) -> f64 {
    let h = group_curvature(design, beta, u, alpha, sigma2);
    let total: f64 = u.iter().zip(&h).map(|(v, hc)| v * v + 1.0 / hc).sum();
    (total / design.groups.len() as f64).max(MIN_RE_VARIANCE)
}

fn check_finite(design: &Design, params: &Params) -> Result<(), FitFailure> {
    if let Some(j) = params.beta.iter().position(|b| !b.is_finite()) {
        return Err(FitFailure::NonFinite { parameter: design.terms[j].clone() });
    }
    if let Some(g) = params.u.iter().position(|v| !v.is_finite()) {
        return Err(FitFailure::NonFinite {
            parameter: format!("random effect of country {}", design.groups[g]),
        });
    }
    if !params.alpha.is_finite() {
        return Err(FitFailure::NonFinite { parameter: "dispersion".into() });
    }
    if !params.sigma2.is_finite() {
        return Err(FitFailure::NonFinite { parameter: "random-effect variance".into() });
    }
    Ok(())
}
