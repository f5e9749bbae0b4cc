//! Market Regime Classification
//!
//! Labels each step of a candle series as one of four latent regimes:
//! - **Bull**: positive drift
//! - **Bear**: negative drift
//! - **Sideways**: drift inside a narrow band around zero
//! - **HighVolatility**: the most volatile component, regardless of drift
//!
//! Two density models are fitted on standardized feature rows:
//! - a Gaussian Mixture Model, order-agnostic
//! - a Gaussian HMM, order-aware, initialized from the mixture
//!
//! Their posteriors are mapped into regime space and blended with fixed
//! weights. A fitted [`RegimeModel`] is an immutable value; inference never
//! re-estimates parameters.

pub mod gaussian;
pub mod gmm;
pub mod hmm;
pub mod labeling;
pub mod model;
pub mod report;
pub mod store;

#[cfg(test)]
mod tests;

pub use gaussian::CovarianceKind;
pub use model::RegimeModel;
pub use report::{InSampleSummary, RegimeReport, TransitionMatrix};
pub use store::{ModelStore, ServingModel};

use crate::error::{AnalyticsError, Result};
use crate::features::{FeatureConfig, FeatureMatrix, Scaler, VOLATILITY_COL};
use crate::stats::median;
use crate::types::Candle;
use chrono::{DateTime, Duration, Utc};
use gmm::{GaussianMixture, GmmSettings};
use hmm::{GaussianHmm, HmmSettings};
use labeling::{ComponentStats, LabelMap};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Market regime classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegimeLabel {
    Bull,
    Bear,
    Sideways,
    HighVolatility,
}

impl RegimeLabel {
    /// Canonical order used by probability vectors and transition matrices
    pub const ALL: [RegimeLabel; 4] = [
        RegimeLabel::Bull,
        RegimeLabel::Bear,
        RegimeLabel::Sideways,
        RegimeLabel::HighVolatility,
    ];

    pub fn index(&self) -> usize {
        match self {
            RegimeLabel::Bull => 0,
            RegimeLabel::Bear => 1,
            RegimeLabel::Sideways => 2,
            RegimeLabel::HighVolatility => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegimeLabel::Bull => "bull",
            RegimeLabel::Bear => "bear",
            RegimeLabel::Sideways => "sideways",
            RegimeLabel::HighVolatility => "high_volatility",
        }
    }

    /// Display color for charts
    pub fn color(&self) -> &'static str {
        match self {
            RegimeLabel::Bull => "#26a69a",
            RegimeLabel::Bear => "#ef5350",
            RegimeLabel::Sideways => "#9e9e9e",
            RegimeLabel::HighVolatility => "#ff9800",
        }
    }
}

impl fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn from_probability(p: f64, high: f64, medium: f64) -> Self {
        if p > high {
            Confidence::High
        } else if p > medium {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

/// Probability per regime, sums to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeProbabilities {
    pub bull: f64,
    pub bear: f64,
    pub sideways: f64,
    pub high_volatility: f64,
}

impl RegimeProbabilities {
    pub fn from_array(p: [f64; 4]) -> Self {
        Self {
            bull: p[0],
            bear: p[1],
            sideways: p[2],
            high_volatility: p[3],
        }
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.bull, self.bear, self.sideways, self.high_volatility]
    }

    pub fn get(&self, label: RegimeLabel) -> f64 {
        self.to_array()[label.index()]
    }

    /// Most likely regime; ties resolve in [`RegimeLabel::ALL`] order
    pub fn argmax(&self) -> (RegimeLabel, f64) {
        let p = self.to_array();
        let mut best = 0;
        for i in 1..4 {
            if p[i] > p[best] {
                best = i;
            }
        }
        (RegimeLabel::ALL[best], p[best])
    }

    pub fn sum(&self) -> f64 {
        self.to_array().iter().sum()
    }
}

/// Per-step classifier output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimePrediction {
    pub timestamp: DateTime<Utc>,
    pub regime: RegimeLabel,
    /// Max blended probability
    pub probability: f64,
    pub confidence: Confidence,
    pub probabilities: RegimeProbabilities,
    /// Row lies inside the training window
    pub in_sample: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub n_components: usize,
    pub covariance: CovarianceKind,
    pub gmm_max_iter: usize,
    pub gmm_tol: f64,
    pub gmm_n_init: usize,
    pub hmm_max_iter: usize,
    pub hmm_tol: f64,
    pub hmm_stickiness: f64,
    pub reg_covar: f64,
    pub seed: u64,
    pub gmm_weight: f64,
    pub hmm_weight: f64,
    pub high_confidence: f64,
    pub medium_confidence: f64,
    /// |mean return| at or below this is Sideways
    pub sideways_return_band: f64,
    pub high_vol_quantile: f64,
    pub high_vol_ratio: f64,
    pub min_train_rows: usize,
    pub validity_hours: i64,
    /// Trailing training window; `None` uses every row
    pub training_lookback_days: Option<i64>,
    /// Trailing rows kept out of a fit on the series being reported
    pub holdout_rows: usize,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            n_components: 4,
            covariance: CovarianceKind::Full,
            gmm_max_iter: 300,
            gmm_tol: 1e-3,
            gmm_n_init: 3,
            hmm_max_iter: 300,
            hmm_tol: 1e-2,
            hmm_stickiness: 0.9,
            reg_covar: 1e-6,
            seed: 42,
            gmm_weight: 0.3,
            hmm_weight: 0.7,
            high_confidence: 0.7,
            medium_confidence: 0.5,
            sideways_return_band: 2e-4,
            high_vol_quantile: 0.75,
            high_vol_ratio: 1.5,
            min_train_rows: 50,
            validity_hours: 24,
            training_lookback_days: Some(90),
            holdout_rows: 24,
        }
    }
}

impl RegimeConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(AnalyticsError::InvalidParameter(msg));
        if self.n_components == 0 {
            return fail("n_components must be positive".into());
        }
        if self.gmm_max_iter == 0 || self.hmm_max_iter == 0 || self.gmm_n_init == 0 {
            return fail("EM iteration counts must be positive".into());
        }
        if !(self.gmm_tol > 0.0) || !(self.hmm_tol > 0.0) {
            return fail("EM tolerances must be positive".into());
        }
        if !(self.reg_covar >= 0.0) {
            return fail(format!("reg_covar must be non-negative, got {}", self.reg_covar));
        }
        if !(self.hmm_stickiness > 0.0 && self.hmm_stickiness < 1.0) {
            return fail(format!(
                "hmm_stickiness must be inside (0, 1), got {}",
                self.hmm_stickiness
            ));
        }
        if self.gmm_weight < 0.0 || self.hmm_weight < 0.0 || self.gmm_weight + self.hmm_weight <= 0.0
        {
            return fail(format!(
                "ensemble weights must be non-negative with a positive sum, got {}/{}",
                self.gmm_weight, self.hmm_weight
            ));
        }
        if !(self.medium_confidence < self.high_confidence) {
            return fail("medium_confidence must be below high_confidence".into());
        }
        if !(0.0..=1.0).contains(&self.high_vol_quantile) {
            return fail(format!(
                "high_vol_quantile must be inside [0, 1], got {}",
                self.high_vol_quantile
            ));
        }
        if self.sideways_return_band < 0.0 || self.high_vol_ratio < 0.0 {
            return fail("labeling thresholds must be non-negative".into());
        }
        if self.validity_hours <= 0 {
            return fail("validity_hours must be positive".into());
        }
        if matches!(self.training_lookback_days, Some(d) if d <= 0) {
            return fail("training_lookback_days must be positive".into());
        }
        if self.holdout_rows == 0 {
            return fail("holdout_rows must be positive".into());
        }
        Ok(())
    }

    fn gmm_settings(&self, covariance: CovarianceKind) -> GmmSettings {
        GmmSettings {
            n_components: self.n_components,
            covariance,
            max_iter: self.gmm_max_iter,
            tol: self.gmm_tol,
            reg_covar: self.reg_covar,
            n_init: self.gmm_n_init,
            seed: self.seed,
        }
    }

    fn hmm_settings(&self, covariance: CovarianceKind) -> HmmSettings {
        HmmSettings {
            covariance,
            max_iter: self.hmm_max_iter,
            tol: self.hmm_tol,
            reg_covar: self.reg_covar,
            stickiness: self.hmm_stickiness,
        }
    }
}

/// Trains regime models and classifies candle series with them
pub struct RegimeClassifier {
    config: RegimeConfig,
    features: FeatureConfig,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        Self {
            config,
            features: FeatureConfig::default(),
        }
    }

    pub fn with_features(mut self, features: FeatureConfig) -> Self {
        self.features = features;
        self
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    pub fn feature_config(&self) -> &FeatureConfig {
        &self.features
    }

    /// Fit on the trailing training window, full covariance first
    pub fn train(&self, features: &FeatureMatrix) -> Result<RegimeModel> {
        self.train_at(features, Utc::now())
    }

    pub fn train_at(&self, features: &FeatureMatrix, now: DateTime<Utc>) -> Result<RegimeModel> {
        self.config.validate()?;
        let window = self.training_window(features);
        let required = self.config.min_train_rows.max(self.config.n_components);
        if window.n_samples() < required {
            return Err(AnalyticsError::insufficient(
                "regime training",
                required,
                window.n_samples(),
            ));
        }

        let model = match self.fit(&window, self.config.covariance, now) {
            Err(AnalyticsError::ModelConvergence { model, reason })
                if self.config.covariance == CovarianceKind::Full =>
            {
                warn!(%model, %reason, "full covariance fit failed, retrying with diagonal");
                self.fit(&window, CovarianceKind::Diagonal, now)?
            }
            other => other?,
        };

        info!(
            version = %model.version,
            rows = model.training_rows,
            covariance = model.covariance.as_str(),
            gmm_iterations = model.gmm.iterations,
            hmm_iterations = model.hmm.iterations,
            "regime model trained"
        );
        Ok(model)
    }

    /// Everything but the trailing `holdout_rows`, for fitting on a series
    /// that is then classified in full
    pub fn without_holdout(&self, features: &FeatureMatrix) -> FeatureMatrix {
        features.head(features.n_samples().saturating_sub(self.config.holdout_rows))
    }

    fn training_window(&self, features: &FeatureMatrix) -> FeatureMatrix {
        match (self.config.training_lookback_days, features.timestamps.last()) {
            (Some(days), Some(last)) => features.after(*last - Duration::days(days)),
            _ => features.clone(),
        }
    }

    fn fit(
        &self,
        window: &FeatureMatrix,
        covariance: CovarianceKind,
        now: DateTime<Utc>,
    ) -> Result<RegimeModel> {
        let scaler = Scaler::fit(&window.data);
        let x = scaler.transform(&window.data);

        let gmm = GaussianMixture::fit(&x, &self.config.gmm_settings(covariance))?;
        let hmm = GaussianHmm::fit(&x, &gmm, &self.config.hmm_settings(covariance))?;

        let vol_median = median(&window.column(VOLATILITY_COL));
        let gmm_stats = gmm
            .components
            .iter()
            .map(|c| ComponentStats::from_scaled_mean(&scaler, &c.mean))
            .collect();
        let hmm_stats = hmm
            .emissions
            .iter()
            .map(|c| ComponentStats::from_scaled_mean(&scaler, &c.mean))
            .collect();

        Ok(RegimeModel {
            version: uuid::Uuid::new_v4(),
            fitted_at: now,
            valid_until: now + Duration::hours(self.config.validity_hours),
            training_rows: window.n_samples(),
            training_start: window.timestamps.first().copied(),
            training_end: window.timestamps.last().copied(),
            covariance,
            gmm_labels: LabelMap::build(gmm_stats, vol_median, &self.config),
            hmm_labels: LabelMap::build(hmm_stats, vol_median, &self.config),
            scaler,
            gmm,
            hmm,
            gmm_weight: self.config.gmm_weight,
            hmm_weight: self.config.hmm_weight,
            high_confidence: self.config.high_confidence,
            medium_confidence: self.config.medium_confidence,
        })
    }

    /// Feature extraction, prediction and the aggregate report for a candle series
    pub fn classify(&self, candles: &[Candle], model: &RegimeModel) -> Result<RegimeReport> {
        self.classify_at(candles, model, Utc::now())
    }

    pub fn classify_at(
        &self,
        candles: &[Candle],
        model: &RegimeModel,
        now: DateTime<Utc>,
    ) -> Result<RegimeReport> {
        let features = FeatureMatrix::from_candles(candles, &self.features)?;
        let predictions = model.predict(&features)?;
        Ok(RegimeReport::build(predictions, &features, model, now))
    }
}

/// Train with the given config
pub fn train(features: &FeatureMatrix, config: &RegimeConfig) -> Result<RegimeModel> {
    RegimeClassifier::new(config.clone()).train(features)
}

/// Apply a fitted model to feature rows
pub fn predict(features: &FeatureMatrix, model: &RegimeModel) -> Result<Vec<RegimePrediction>> {
    model.predict(features)
}
