//! Multivariate Gaussian components shared by the GMM and the HMM emissions

use crate::error::{AnalyticsError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Covariance structure of every component in a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceKind {
    Full,
    Diagonal,
}

impl CovarianceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CovarianceKind::Full => "full",
            CovarianceKind::Diagonal => "diagonal",
        }
    }
}

/// Gaussian with a cached Cholesky factor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gaussian {
    pub mean: Array1<f64>,
    pub covariance: Array2<f64>,
    /// Lower-triangular L with covariance = L L'
    chol: Array2<f64>,
    log_det: f64,
}

impl Gaussian {
    /// Fails when the covariance is not positive definite
    pub fn new(mean: Array1<f64>, covariance: Array2<f64>) -> Result<Self> {
        let chol = cholesky(&covariance).ok_or_else(|| {
            AnalyticsError::convergence("gaussian component", "covariance is not positive definite")
        })?;
        let log_det = 2.0 * chol.diag().iter().map(|v| v.ln()).sum::<f64>();
        Ok(Self {
            mean,
            covariance,
            chol,
            log_det,
        })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn log_pdf(&self, x: ArrayView1<f64>) -> f64 {
        let d = self.dim();
        // solve L y = (x - mean); the Mahalanobis term is |y|^2
        let mut y = vec![0.0; d];
        let mut maha = 0.0;
        for i in 0..d {
            let mut acc = x[i] - self.mean[i];
            for (k, yk) in y.iter().enumerate().take(i) {
                acc -= self.chol[[i, k]] * yk;
            }
            y[i] = acc / self.chol[[i, i]];
            maha += y[i] * y[i];
        }
        -0.5 * (d as f64 * (2.0 * PI).ln() + self.log_det + maha)
    }

    /// Weighted maximum-likelihood estimate, with `reg` added to the diagonal
    pub fn estimate(
        data: &Array2<f64>,
        weights: ArrayView1<f64>,
        kind: CovarianceKind,
        reg: f64,
    ) -> Result<Self> {
        let d = data.ncols();
        let total = weights.sum() + 10.0 * f64::EPSILON;

        let mut mean: Array1<f64> = Array1::zeros(d);
        for (row, w) in data.rows().into_iter().zip(weights.iter()) {
            mean.scaled_add(*w, &row);
        }
        mean /= total;

        let mut cov: Array2<f64> = Array2::zeros((d, d));
        for (row, w) in data.rows().into_iter().zip(weights.iter()) {
            let diff = &row - &mean;
            for i in 0..d {
                for j in 0..=i {
                    if kind == CovarianceKind::Diagonal && i != j {
                        continue;
                    }
                    cov[[i, j]] += w * diff[i] * diff[j];
                }
            }
        }
        for i in 0..d {
            for j in 0..=i {
                let v = cov[[i, j]] / total;
                cov[[i, j]] = v;
                cov[[j, i]] = v;
            }
            cov[[i, i]] += reg;
        }

        Self::new(mean, cov)
    }
}

/// Cholesky decomposition, `None` unless the matrix is symmetric positive definite
pub fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return None;
    }
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if !(sum > 0.0) || !sum.is_finite() {
                    return None;
                }
                l[[i, j]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

/// log(sum(exp(values))) without overflow
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}
