//! Feature Engineering
//!
//! Turns a candle series into the per-step feature vector consumed by the
//! regime classifier:
//! - return (log by default)
//! - rolling volatility (population std of trailing returns)
//! - volume ratio (volume / trailing mean volume)
//! - RSI
//!
//! Every value at index `i` is computed from candles `0..=i` only.


use crate::error::{AnalyticsError, Result};
use crate::indicators::momentum::rsi;
use crate::stats::{mean, population_std};
use crate::types::Candle;
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Column order of [`FeatureMatrix`]
pub const FEATURE_NAMES: [&str; 4] = ["returns", "volatility", "volume_ratio", "rsi"];
pub const RETURN_COL: usize = 0;
pub const VOLATILITY_COL: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnKind {
    Log,
    Simple,
}

impl ReturnKind {
    pub fn compute(&self, prev: f64, curr: f64) -> f64 {
        match self {
            ReturnKind::Log => (curr / prev).ln(),
            ReturnKind::Simple => (curr - prev) / prev,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Rolling window for volatility and volume ratio
    pub lookback: usize,
    pub rsi_period: usize,
    pub return_kind: ReturnKind,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lookback: 20,
            rsi_period: 14,
            return_kind: ReturnKind::Log,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lookback < 2 {
            return Err(AnalyticsError::InvalidParameter(format!(
                "feature lookback must be at least 2, got {}",
                self.lookback
            )));
        }
        if self.rsi_period == 0 {
            return Err(AnalyticsError::InvalidParameter(
                "feature rsi_period must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Candles needed for the first complete row: `lookback` returns need
    /// `lookback + 1` closes, RSI needs `rsi_period + 1`
    pub fn min_candles(&self) -> usize {
        self.warmup() + 1
    }

    /// Name of the window that sets [`FeatureConfig::min_candles`]
    fn binding_window(&self) -> String {
        if self.rsi_period > self.lookback {
            format!("feature RSI({})", self.rsi_period)
        } else {
            format!("feature lookback {}", self.lookback)
        }
    }

    /// Index of the first complete row
    pub fn warmup(&self) -> usize {
        self.lookback.max(self.rsi_period)
    }
}

/// Per-candle features, `None` while a window is still filling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub timestamp: DateTime<Utc>,
    pub returns: Option<f64>,
    pub volatility: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub rsi: Option<f64>,
}

impl FeatureRow {
    pub fn values(&self) -> Option<[f64; 4]> {
        Some([self.returns?, self.volatility?, self.volume_ratio?, self.rsi?])
    }

    pub fn is_complete(&self) -> bool {
        self.values().is_some()
    }
}

/// Compute one feature row per candle
pub fn compute_features(candles: &[Candle], config: &FeatureConfig) -> Result<Vec<FeatureRow>> {
    config.validate()?;
    if candles.len() < config.min_candles() {
        return Err(AnalyticsError::insufficient(
            config.binding_window(),
            config.min_candles(),
            candles.len(),
        ));
    }

    let n = candles.len();
    let lookback = config.lookback;
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
    let rsi_series = rsi(&closes, config.rsi_period);

    let mut returns: Vec<Option<f64>> = vec![None; n];
    for i in 1..n {
        returns[i] = Some(config.return_kind.compute(closes[i - 1], closes[i]));
    }

    let rows = (0..n)
        .map(|i| {
            // returns exist from index 1, so a full window ends at index `lookback`
            let volatility = (i >= lookback).then(|| {
                let window: Vec<f64> = returns[i + 1 - lookback..=i].iter().flatten().copied().collect();
                population_std(&window)
            });
            let volume_ratio = (i + 1 >= lookback).then(|| {
                let avg = mean(&volumes[i + 1 - lookback..=i]);
                if avg > 0.0 {
                    volumes[i] / avg
                } else {
                    1.0
                }
            });

            FeatureRow {
                timestamp: candles[i].timestamp,
                returns: returns[i],
                volatility,
                volume_ratio,
                rsi: rsi_series[i],
            }
        })
        .collect();

    Ok(rows)
}

/// Complete feature rows as a dense matrix
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    /// rows = observations, columns = [`FEATURE_NAMES`]
    pub data: Array2<f64>,
    pub timestamps: Vec<DateTime<Utc>>,
}

impl FeatureMatrix {
    /// Keep only complete rows, preserving order
    pub fn from_rows(rows: &[FeatureRow]) -> Self {
        let complete: Vec<(DateTime<Utc>, [f64; 4])> = rows
            .iter()
            .filter_map(|r| r.values().map(|v| (r.timestamp, v)))
            .collect();

        let mut data = Array2::zeros((complete.len(), FEATURE_NAMES.len()));
        for (i, (_, values)) in complete.iter().enumerate() {
            for (j, v) in values.iter().enumerate() {
                data[[i, j]] = *v;
            }
        }

        Self {
            data,
            timestamps: complete.into_iter().map(|(ts, _)| ts).collect(),
        }
    }

    pub fn from_candles(candles: &[Candle], config: &FeatureConfig) -> Result<Self> {
        Ok(Self::from_rows(&compute_features(candles, config)?))
    }

    pub fn n_samples(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.data.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.n_samples() == 0
    }

    pub fn column(&self, idx: usize) -> Vec<f64> {
        self.data.column(idx).to_vec()
    }

    /// Rows strictly after `cutoff`
    pub fn after(&self, cutoff: DateTime<Utc>) -> Self {
        let start = self.timestamps.partition_point(|ts| *ts <= cutoff);
        self.tail_from(start)
    }

    /// The first `n` rows
    pub fn head(&self, n: usize) -> Self {
        let end = n.min(self.n_samples());
        Self {
            data: self.data.slice(ndarray::s![..end, ..]).to_owned(),
            timestamps: self.timestamps[..end].to_vec(),
        }
    }

    /// The last `n` rows
    pub fn tail(&self, n: usize) -> Self {
        self.tail_from(self.n_samples().saturating_sub(n))
    }

    fn tail_from(&self, start: usize) -> Self {
        Self {
            data: self.data.slice(ndarray::s![start.., ..]).to_owned(),
            timestamps: self.timestamps[start..].to_vec(),
        }
    }
}

/// Z-score standardization fitted on training rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Scaler {
    pub fn fit(data: &Array2<f64>) -> Self {
        if data.nrows() == 0 {
            return Self {
                mean: vec![0.0; data.ncols()],
                scale: vec![1.0; data.ncols()],
            };
        }

        let (mean, scale) = data
            .axis_iter(Axis(1))
            .map(|col| {
                let sd = col.iter().population_std_dev();
                // constant columns are only centred
                (col.iter().mean(), if sd > 1e-10 { sd } else { 1.0 })
            })
            .unzip();

        Self { mean, scale }
    }

    pub fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        let mut out = data.clone();
        for mut row in out.rows_mut() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = (*v - self.mean[j]) / self.scale[j];
            }
        }
        out
    }

    /// Map a point from scaled space back to raw feature units
    pub fn inverse(&self, point: &Array1<f64>) -> Array1<f64> {
        Array1::from_iter(
            point
                .iter()
                .enumerate()
                .map(|(j, v)| v * self.scale[j] + self.mean[j]),
        )
    }
}
