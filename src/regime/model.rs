//! Fitted, immutable regime model

use super::gaussian::CovarianceKind;
use super::gmm::GaussianMixture;
use super::hmm::GaussianHmm;
use super::labeling::LabelMap;
use super::report::TransitionMatrix;
use super::{Confidence, RegimeLabel, RegimePrediction, RegimeProbabilities};
use crate::error::{AnalyticsError, Result};
use crate::features::{FeatureMatrix, Scaler, FEATURE_NAMES};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeModel {
    pub version: Uuid,
    pub fitted_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub training_rows: usize,
    pub training_start: Option<DateTime<Utc>>,
    pub training_end: Option<DateTime<Utc>>,
    pub covariance: CovarianceKind,
    pub scaler: Scaler,
    pub gmm: GaussianMixture,
    pub hmm: GaussianHmm,
    pub gmm_labels: LabelMap,
    pub hmm_labels: LabelMap,
    pub gmm_weight: f64,
    pub hmm_weight: f64,
    pub high_confidence: f64,
    pub medium_confidence: f64,
}

impl RegimeModel {
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_until
    }

    /// Blended regime probabilities per row.
    ///
    /// The HMM part is a forward filter started at the first row passed in,
    /// so the prediction for row `t` depends on rows `..=t` only.
    pub fn predict(&self, features: &FeatureMatrix) -> Result<Vec<RegimePrediction>> {
        if features.is_empty() {
            return Err(AnalyticsError::insufficient("regime prediction", 1, 0));
        }
        if features.n_features() != FEATURE_NAMES.len() {
            return Err(AnalyticsError::InvalidParameter(format!(
                "expected {} feature columns, got {}",
                FEATURE_NAMES.len(),
                features.n_features()
            )));
        }

        let x = self.scaler.transform(&features.data);
        let gmm_post = self.gmm.predict_proba(&x);
        let hmm_post = self.hmm.filter(&x);

        let predictions = features
            .timestamps
            .iter()
            .enumerate()
            .map(|(t, ts)| {
                let g = self.gmm_labels.aggregate(gmm_post.row(t));
                let h = self.hmm_labels.aggregate(hmm_post.row(t));
                let mut blended = [0.0; 4];
                for i in 0..4 {
                    blended[i] = self.gmm_weight * g[i] + self.hmm_weight * h[i];
                }
                let total: f64 = blended.iter().sum();
                if total > 0.0 {
                    blended.iter_mut().for_each(|p| *p /= total);
                } else {
                    blended = [0.25; 4];
                }

                let probabilities = RegimeProbabilities::from_array(blended);
                let (regime, probability) = probabilities.argmax();
                RegimePrediction {
                    timestamp: *ts,
                    regime,
                    probability,
                    confidence: Confidence::from_probability(
                        probability,
                        self.high_confidence,
                        self.medium_confidence,
                    ),
                    probabilities,
                    in_sample: self.training_end.is_some_and(|end| *ts <= end),
                }
            })
            .collect();
        Ok(predictions)
    }

    /// HMM transition parameters aggregated into regime space.
    ///
    /// Each source state is weighted by its training occupancy; a regime
    /// with no states gets an identity row.
    pub fn transition_matrix(&self) -> TransitionMatrix {
        let a = &self.hmm.transitions;
        let occ = &self.hmm.occupancy;
        let mut matrix = [[0.0; 4]; 4];

        for from in RegimeLabel::ALL {
            let states = self.hmm_labels.components_of(from);
            let row = &mut matrix[from.index()];
            if states.is_empty() {
                row[from.index()] = 1.0;
                continue;
            }
            let occ_total: f64 = states.iter().map(|i| occ[*i]).sum();
            for &i in &states {
                let w = if occ_total > 0.0 {
                    occ[i] / occ_total
                } else {
                    1.0 / states.len() as f64
                };
                for (j, to) in self.hmm_labels.labels.iter().enumerate() {
                    row[to.index()] += w * a[[i, j]];
                }
            }
            let s: f64 = row.iter().sum();
            if s > 0.0 {
                row.iter_mut().for_each(|p| *p /= s);
            }
        }
        TransitionMatrix::new(matrix)
    }
}
