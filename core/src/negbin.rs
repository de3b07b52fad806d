//! Negative Binomial (NB2) count distribution.
//!
//! Parameterized by mean μ and dispersion α with Var = μ + α·μ².
//! α → 0 recovers the Poisson. Sampling uses the Gamma–Poisson mixture:
//! λ ~ Gamma(shape = 1/α, rate = 1/(α·μ)), y ~ Poisson(λ).

use crate::types::Count;
use rand::{distributions::Distribution, Rng};
use statrs::distribution::{Gamma, Poisson};
use statrs::function::gamma::ln_gamma;

/// Below this dispersion the mixture is numerically a Poisson.
pub const POISSON_DISPERSION: f64 = 1e-9;

/// Counts above this use `ln_gamma` instead of the exact log-product.
const EXACT_LN_RATIO_LIMIT: Count = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NegativeBinomial {
    mean:       f64,
    dispersion: f64,
}

impl NegativeBinomial {
    /// Non-finite or negative inputs collapse to the degenerate
    /// zero distribution (mean) or the Poisson limit (dispersion).
    pub fn new(mean: f64, dispersion: f64) -> Self {
        let mean = if mean.is_finite() && mean > 0.0 { mean } else { 0.0 };
        let dispersion = if dispersion.is_finite() && dispersion > 0.0 { dispersion } else { 0.0 };
        Self { mean, dispersion }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn dispersion(&self) -> f64 {
        self.dispersion
    }

    pub fn variance(&self) -> f64 {
        self.mean + self.dispersion * self.mean * self.mean
    }

    /// Log probability of observing `y`.
    pub fn ln_pmf(&self, y: Count) -> f64 {
        let mu = self.mean;
        if mu == 0.0 {
            return if y == 0 { 0.0 } else { f64::NEG_INFINITY };
        }
        let yf = y as f64;
        if self.dispersion < POISSON_DISPERSION {
            return yf * mu.ln() - mu - ln_gamma(yf + 1.0);
        }
        let r = 1.0 / self.dispersion;
        ln_gamma_ratio(y, r) - ln_gamma(yf + 1.0)
            + r * (r / (r + mu)).ln()
            + yf * (mu / (r + mu)).ln()
    }

    /// Draw one count. A zero mean always yields zero.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Count {
        if self.mean == 0.0 {
            return 0;
        }
        if self.dispersion < POISSON_DISPERSION {
            return sample_poisson(self.mean, rng);
        }
        let shape = 1.0 / self.dispersion;
        let rate = 1.0 / (self.dispersion * self.mean);
        let lambda = match Gamma::new(shape, rate) {
            Ok(gamma) => gamma.sample(rng),
            Err(_) => return sample_poisson(self.mean, rng),
        };
        sample_poisson(lambda, rng)
    }
}

/// ln Γ(y + r) − ln Γ(r), exact as a log-product for small `y`.
pub fn ln_gamma_ratio(y: Count, r: f64) -> f64 {
    if y <= EXACT_LN_RATIO_LIMIT {
        (0..y).map(|k| (r + k as f64).ln()).sum()
    } else {
        ln_gamma(y as f64 + r) - ln_gamma(r)
    }
}

fn sample_poisson<R: Rng + ?Sized>(lambda: f64, rng: &mut R) -> Count {
    if !(lambda.is_finite() && lambda > 0.0) {
        return 0;
    }
    match Poisson::new(lambda) {
        Ok(poisson) => {
            let draw: f64 = poisson.sample(rng);
            draw.max(0.0).round() as Count
        }
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::RngBank;

    #[test]
    fn zero_mean_is_degenerate_at_zero() {
        let nb = NegativeBinomial::new(0.0, 2.5);
        let mut rng = RngBank::new(3).for_path(1, 0);
        for _ in 0..100 {
            assert_eq!(nb.sample(&mut rng), 0);
        }
        assert_eq!(nb.ln_pmf(0), 0.0);
        assert_eq!(nb.ln_pmf(1), f64::NEG_INFINITY);
    }

    #[test]
    fn pmf_sums_to_one() {
        for &(mu, alpha) in &[(0.7, 0.0), (3.0, 0.4), (12.0, 1.5)] {
            let nb = NegativeBinomial::new(mu, alpha);
            let total: f64 = (0..3000).map(|y| nb.ln_pmf(y).exp()).sum();
            assert!((total - 1.0).abs() < 1e-6, "mu={mu} alpha={alpha} total={total}");
        }
    }

    #[test]
    fn large_count_branch_matches_exact_product() {
        let r = 2.75;
        let exact: f64 = (0..400).map(|k| (r + k as f64).ln()).sum();
        let via_gamma = ln_gamma(400.0 + r) - ln_gamma(r);
        assert!((ln_gamma_ratio(400, r) - exact).abs() < 1e-8 * exact.abs());
        assert!((via_gamma - exact).abs() < 1e-8 * exact.abs());
    }

    #[test]
    fn sample_moments_match_parameters() {
        let nb = NegativeBinomial::new(8.0, 0.5);
        let mut rng = RngBank::new(99).for_path(4, 2);
        let n = 20_000;
        let draws: Vec<f64> = (0..n).map(|_| nb.sample(&mut rng) as f64).collect();
        let mean = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (n - 1) as f64;

        assert!((mean - 8.0).abs() < 0.3, "sample mean {mean}");
        // Var = 8 + 0.5 * 64 = 40
        assert!((var - 40.0).abs() < 5.0, "sample variance {var}");
    }
}
