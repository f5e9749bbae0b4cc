//! Gaussian Mixture Model fitted with EM
//!
//! Order-agnostic density model: every row is treated independently. Each
//! restart is seeded deterministically from the configured seed, so the same
//! training window always yields the same mixture.

use super::gaussian::{log_sum_exp, CovarianceKind, Gaussian};
use crate::error::{AnalyticsError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

const KMEANS_MAX_ITER: usize = 100;

/// EM settings for one mixture fit
#[derive(Debug, Clone)]
pub struct GmmSettings {
    pub n_components: usize,
    pub covariance: CovarianceKind,
    pub max_iter: usize,
    /// Convergence threshold on the per-sample log-likelihood
    pub tol: f64,
    pub reg_covar: f64,
    pub n_init: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianMixture {
    pub weights: Array1<f64>,
    pub components: Vec<Gaussian>,
    pub covariance: CovarianceKind,
    /// Mean per-sample log-likelihood at convergence
    pub lower_bound: f64,
    pub iterations: usize,
}

impl GaussianMixture {
    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    pub fn fit(data: &Array2<f64>, settings: &GmmSettings) -> Result<Self> {
        let k = settings.n_components;
        if data.nrows() < k {
            return Err(AnalyticsError::insufficient(
                format!("GMM with {k} components"),
                k,
                data.nrows(),
            ));
        }

        let mut best: Option<GaussianMixture> = None;
        let mut last_err = None;
        for init in 0..settings.n_init.max(1) {
            let seed = settings.seed.wrapping_add(init as u64);
            match fit_once(data, settings, seed) {
                Ok(model) => {
                    debug!(
                        init,
                        lower_bound = model.lower_bound,
                        iterations = model.iterations,
                        "GMM restart converged"
                    );
                    if best.as_ref().map_or(true, |b| model.lower_bound > b.lower_bound) {
                        best = Some(model);
                    }
                }
                Err(e) => {
                    debug!(init, error = %e, "GMM restart failed");
                    last_err = Some(e);
                }
            }
        }

        best.ok_or_else(|| {
            last_err.unwrap_or_else(|| AnalyticsError::convergence("GMM", "no restart was run"))
        })
    }

    /// Per-row log of weight * density, shape (n, k)
    fn weighted_log_prob(&self, data: &Array2<f64>) -> Array2<f64> {
        let mut out = Array2::zeros((data.nrows(), self.n_components()));
        for (t, row) in data.rows().into_iter().enumerate() {
            for (j, comp) in self.components.iter().enumerate() {
                out[[t, j]] = self.weights[j].ln() + comp.log_pdf(row);
            }
        }
        out
    }

    /// Posterior component probabilities, rows sum to 1
    pub fn predict_proba(&self, data: &Array2<f64>) -> Array2<f64> {
        let (resp, _) = e_step(&self.weighted_log_prob(data));
        resp
    }
}

fn fit_once(data: &Array2<f64>, settings: &GmmSettings, seed: u64) -> Result<GaussianMixture> {
    let mut rng = StdRng::seed_from_u64(seed);
    let labels = kmeans_labels(data, settings.n_components, &mut rng);

    let mut resp = Array2::zeros((data.nrows(), settings.n_components));
    for (t, label) in labels.iter().enumerate() {
        resp[[t, *label]] = 1.0;
    }
    let mut model = m_step(data, &resp, settings, f64::NEG_INFINITY, 0)?;

    let mut prev = f64::NEG_INFINITY;
    for iter in 1..=settings.max_iter {
        let (next_resp, lower_bound) = e_step(&model.weighted_log_prob(data));
        if !lower_bound.is_finite() {
            return Err(AnalyticsError::convergence(
                format!("GMM({})", settings.covariance.as_str()),
                format!("log-likelihood became non-finite at iteration {iter}"),
            ));
        }
        model = m_step(data, &next_resp, settings, lower_bound, iter)?;
        if (lower_bound - prev).abs() < settings.tol {
            return Ok(model);
        }
        prev = lower_bound;
    }

    Err(AnalyticsError::convergence(
        format!("GMM({})", settings.covariance.as_str()),
        format!("no convergence after {} iterations", settings.max_iter),
    ))
}

/// Responsibilities and mean log-likelihood from weighted log densities
fn e_step(weighted: &Array2<f64>) -> (Array2<f64>, f64) {
    let mut resp = Array2::zeros(weighted.raw_dim());
    let mut total = 0.0;
    for (t, row) in weighted.rows().into_iter().enumerate() {
        let norm = log_sum_exp(&row.to_vec());
        total += norm;
        for (j, v) in row.iter().enumerate() {
            resp[[t, j]] = (v - norm).exp();
        }
    }
    (resp, total / weighted.nrows().max(1) as f64)
}

fn m_step(
    data: &Array2<f64>,
    resp: &Array2<f64>,
    settings: &GmmSettings,
    lower_bound: f64,
    iterations: usize,
) -> Result<GaussianMixture> {
    let n = data.nrows() as f64;
    let mut weights = Array1::zeros(settings.n_components);
    let mut components = Vec::with_capacity(settings.n_components);
    for j in 0..settings.n_components {
        let col = resp.column(j);
        weights[j] = (col.sum() + 10.0 * f64::EPSILON) / n;
        components.push(Gaussian::estimate(
            data,
            col,
            settings.covariance,
            settings.reg_covar,
        )?);
    }
    let total = weights.sum();
    weights /= total;

    Ok(GaussianMixture {
        weights,
        components,
        covariance: settings.covariance,
        lower_bound,
        iterations,
    })
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// k-means++ seeding followed by Lloyd iterations; returns hard labels
fn kmeans_labels(data: &Array2<f64>, k: usize, rng: &mut StdRng) -> Vec<usize> {
    let n = data.nrows();
    let mut centers: Vec<Array1<f64>> = Vec::with_capacity(k);
    centers.push(data.row(rng.random_range(0..n)).to_owned());

    while centers.len() < k {
        let dists: Vec<f64> = data
            .rows()
            .into_iter()
            .map(|row| {
                centers
                    .iter()
                    .map(|c| squared_distance(row, c.view()))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = dists.iter().sum();
        let idx = if total > 0.0 {
            let mut target = rng.random::<f64>() * total;
            dists
                .iter()
                .position(|d| {
                    target -= d;
                    target <= 0.0
                })
                .unwrap_or(n - 1)
        } else {
            rng.random_range(0..n)
        };
        centers.push(data.row(idx).to_owned());
    }

    let mut labels = vec![0usize; n];
    for _ in 0..KMEANS_MAX_ITER {
        let mut changed = false;
        for (t, row) in data.rows().into_iter().enumerate() {
            let nearest = centers
                .iter()
                .enumerate()
                .map(|(j, c)| (j, squared_distance(row, c.view())))
                .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
                .0;
            if labels[t] != nearest {
                labels[t] = nearest;
                changed = true;
            }
        }

        for (j, center) in centers.iter_mut().enumerate() {
            let members: Vec<usize> = (0..n).filter(|t| labels[*t] == j).collect();
            if members.is_empty() {
                continue;
            }
            let mut sum = Array1::<f64>::zeros(data.ncols());
            for t in &members {
                sum += &data.row(*t);
            }
            *center = sum / members.len() as f64;
        }

        if !changed {
            break;
        }
    }
    labels
}
