//! Gaussian Hidden Markov Model fitted with Baum-Welch
//!
//! Emissions are initialized from a fitted mixture, transitions start sticky.
//! Inference is forward filtering only, so the posterior at `t` never sees
//! rows after `t`.

use super::gaussian::{CovarianceKind, Gaussian};
use super::gmm::GaussianMixture;
use crate::error::{AnalyticsError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Probability floor applied to start and transition estimates
const PROB_FLOOR: f64 = 1e-10;

#[derive(Debug, Clone)]
pub struct HmmSettings {
    pub covariance: CovarianceKind,
    pub max_iter: usize,
    /// Convergence threshold on the total log-likelihood
    pub tol: f64,
    pub reg_covar: f64,
    /// Initial self-transition probability
    pub stickiness: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianHmm {
    pub start: Array1<f64>,
    pub transitions: Array2<f64>,
    pub emissions: Vec<Gaussian>,
    pub covariance: CovarianceKind,
    /// Expected share of training steps spent in each state
    pub occupancy: Array1<f64>,
    pub log_likelihood: f64,
    pub iterations: usize,
}

/// Per-step emission likelihoods scaled by the row maximum, with the log of that maximum
struct ScaledEmissions {
    b: Array2<f64>,
    log_max: Vec<f64>,
}

impl GaussianHmm {
    pub fn n_states(&self) -> usize {
        self.emissions.len()
    }

    pub fn fit(data: &Array2<f64>, init: &GaussianMixture, settings: &HmmSettings) -> Result<Self> {
        let k = init.n_components();
        let n = data.nrows();
        if n < 2 {
            return Err(AnalyticsError::insufficient("HMM", 2, n));
        }
        let model_name = format!("HMM({})", settings.covariance.as_str());

        let mut hmm = GaussianHmm {
            start: init.weights.clone(),
            transitions: sticky_transitions(k, settings.stickiness),
            emissions: init.components.clone(),
            covariance: settings.covariance,
            occupancy: Array1::from_elem(k, 1.0 / k as f64),
            log_likelihood: f64::NEG_INFINITY,
            iterations: 0,
        };

        let mut prev = f64::NEG_INFINITY;
        for iter in 1..=settings.max_iter {
            let emissions = hmm.scaled_emissions(data);
            let (alpha, scale, log_likelihood) = hmm
                .forward(&emissions)
                .ok_or_else(|| {
                    AnalyticsError::convergence(
                        &model_name,
                        format!("forward pass underflowed at iteration {iter}"),
                    )
                })?;
            if !log_likelihood.is_finite() {
                return Err(AnalyticsError::convergence(
                    &model_name,
                    format!("log-likelihood became non-finite at iteration {iter}"),
                ));
            }
            let beta = hmm.backward(&emissions, &scale);

            let mut gamma = &alpha * &beta;
            for mut row in gamma.rows_mut() {
                let s = row.sum();
                if s > 0.0 {
                    row /= s;
                }
            }

            if (log_likelihood - prev).abs() < settings.tol {
                if let Some(occupancy) = gamma.mean_axis(Axis(0)) {
                    hmm.occupancy = occupancy;
                }
                hmm.log_likelihood = log_likelihood;
                hmm.iterations = iter;
                debug!(iterations = iter, log_likelihood, "HMM converged");
                return Ok(hmm);
            }
            prev = log_likelihood;

            // expected transition counts
            let mut xi = Array2::<f64>::zeros((k, k));
            for t in 0..n - 1 {
                for i in 0..k {
                    for j in 0..k {
                        xi[[i, j]] += alpha[[t, i]]
                            * hmm.transitions[[i, j]]
                            * emissions.b[[t + 1, j]]
                            * beta[[t + 1, j]]
                            / scale[t + 1];
                    }
                }
            }

            hmm.start = normalized_with_floor(gamma.row(0).to_owned());
            for i in 0..k {
                let row = xi.row(i).to_owned();
                if row.sum() > 0.0 {
                    hmm.transitions
                        .row_mut(i)
                        .assign(&normalized_with_floor(row));
                }
            }
            hmm.emissions = (0..k)
                .map(|j| {
                    Gaussian::estimate(data, gamma.column(j), settings.covariance, settings.reg_covar)
                })
                .collect::<Result<Vec<_>>>()?;

            if iter % 25 == 0 {
                debug!(iteration = iter, log_likelihood, "Baum-Welch progress");
            }
        }

        Err(AnalyticsError::convergence(
            model_name,
            format!("no convergence after {} iterations", settings.max_iter),
        ))
    }

    fn scaled_emissions(&self, data: &Array2<f64>) -> ScaledEmissions {
        let k = self.n_states();
        let mut b = Array2::zeros((data.nrows(), k));
        let mut log_max = Vec::with_capacity(data.nrows());
        for (t, row) in data.rows().into_iter().enumerate() {
            let logs: Vec<f64> = self.emissions.iter().map(|g| g.log_pdf(row)).collect();
            let max = logs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            for (j, l) in logs.iter().enumerate() {
                b[[t, j]] = if max.is_finite() { (l - max).exp() } else { 1.0 };
            }
            log_max.push(max);
        }
        ScaledEmissions { b, log_max }
    }

    /// Scaled forward pass; `None` when a step has no probability mass
    fn forward(&self, e: &ScaledEmissions) -> Option<(Array2<f64>, Vec<f64>, f64)> {
        let (n, k) = e.b.dim();
        let mut alpha = Array2::zeros((n, k));
        let mut scale = vec![0.0; n];
        let mut log_likelihood = 0.0;

        for t in 0..n {
            for j in 0..k {
                let prior = if t == 0 {
                    self.start[j]
                } else {
                    (0..k).map(|i| alpha[[t - 1, i]] * self.transitions[[i, j]]).sum()
                };
                alpha[[t, j]] = prior * e.b[[t, j]];
            }
            let c: f64 = alpha.row(t).sum();
            if !(c > 0.0) || !c.is_finite() {
                return None;
            }
            alpha.row_mut(t).mapv_inplace(|v| v / c);
            scale[t] = c;
            log_likelihood += c.ln() + e.log_max[t];
        }
        Some((alpha, scale, log_likelihood))
    }

    fn backward(&self, e: &ScaledEmissions, scale: &[f64]) -> Array2<f64> {
        let (n, k) = e.b.dim();
        let mut beta = Array2::zeros((n, k));
        beta.row_mut(n - 1).fill(1.0);
        for t in (0..n - 1).rev() {
            for i in 0..k {
                beta[[t, i]] = (0..k)
                    .map(|j| self.transitions[[i, j]] * e.b[[t + 1, j]] * beta[[t + 1, j]])
                    .sum::<f64>()
                    / scale[t + 1];
            }
        }
        beta
    }

    /// Filtered state probabilities P(state_t | rows <= t), rows sum to 1
    pub fn filter(&self, data: &Array2<f64>) -> Array2<f64> {
        let e = self.scaled_emissions(data);
        let (n, k) = e.b.dim();
        let mut alpha = Array2::zeros((n, k));

        for t in 0..n {
            for j in 0..k {
                let prior = if t == 0 {
                    self.start[j]
                } else {
                    (0..k).map(|i| alpha[[t - 1, i]] * self.transitions[[i, j]]).sum()
                };
                alpha[[t, j]] = prior * e.b[[t, j]];
            }
            let c: f64 = alpha.row(t).sum();
            if c > 0.0 && c.is_finite() {
                alpha.row_mut(t).mapv_inplace(|v| v / c);
            } else {
                // predicted mass vanished, restart from the emissions alone
                let emission_mass: f64 = e.b.row(t).sum();
                for j in 0..k {
                    alpha[[t, j]] = e.b[[t, j]] / emission_mass;
                }
            }
        }
        alpha
    }
}

fn sticky_transitions(k: usize, stickiness: f64) -> Array2<f64> {
    if k == 1 {
        return Array2::ones((1, 1));
    }
    let off = (1.0 - stickiness) / (k - 1) as f64;
    Array2::from_shape_fn((k, k), |(i, j)| if i == j { stickiness } else { off })
}

fn normalized_with_floor(mut v: Array1<f64>) -> Array1<f64> {
    v.mapv_inplace(|p| p.max(PROB_FLOOR));
    let s = v.sum();
    v / s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime::gmm::GmmSettings;

    fn settings() -> HmmSettings {
        HmmSettings {
            covariance: CovarianceKind::Diagonal,
            max_iter: 500,
            tol: 1e-4,
            reg_covar: 1e-6,
            stickiness: 0.9,
        }
    }

    /// Two persistent blocks of observations, each 30 long
    fn blocks() -> Array2<f64> {
        let mut data = Array2::zeros((120, 1));
        for t in 0..120 {
            let level = if (t / 30) % 2 == 0 { -2.0 } else { 2.0 };
            data[[t, 0]] = level + ((t * 17 % 9) as f64 - 4.0) * 0.05;
        }
        data
    }

    fn fitted() -> GaussianHmm {
        let data = blocks();
        let gmm = GaussianMixture::fit(
            &data,
            &GmmSettings {
                n_components: 2,
                covariance: CovarianceKind::Diagonal,
                max_iter: 300,
                tol: 1e-6,
                reg_covar: 1e-6,
                n_init: 1,
                seed: 7,
            },
        )
        .unwrap();
        GaussianHmm::fit(&data, &gmm, &settings()).unwrap()
    }

    #[test]
    fn test_sticky_initial_transitions() {
        let a = sticky_transitions(4, 0.9);
        for row in a.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
        assert_eq!(a[[2, 2]], 0.9);
        assert_eq!(sticky_transitions(1, 0.9), Array2::<f64>::ones((1, 1)));
    }

    #[test]
    fn test_learns_persistent_states() {
        let hmm = fitted();
        for row in hmm.transitions.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-6);
        }
        // four switches over 120 steps
        for i in 0..2 {
            assert!(hmm.transitions[[i, i]] > 0.9);
        }
        assert!((hmm.occupancy.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_filter_tracks_blocks() {
        let data = blocks();
        let hmm = fitted();
        let post = hmm.filter(&data);
        let state_low = if post[[10, 0]] > 0.5 { 0 } else { 1 };
        assert!(post[[20, state_low]] > 0.9);
        assert!(post[[50, 1 - state_low]] > 0.9);
        for row in post.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_filter_ignores_future_rows() {
        let data = blocks();
        let hmm = fitted();
        let full = hmm.filter(&data);
        let mut altered = data.clone();
        for t in 61..120 {
            altered[[t, 0]] = 50.0;
        }
        let changed = hmm.filter(&altered);
        for t in 0..=60 {
            assert_eq!(full.row(t), changed.row(t));
        }
    }
}
