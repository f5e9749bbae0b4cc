//! Technical Indicator Engine
//!
//! Computes a per-candle indicator table from raw OHLCV:
//! - RSI (Wilder), MACD, Bollinger Bands
//! - SMA/EMA display averages and ATR
//! - KAMA with its BULLISH/BEARISH/NEUTRAL signal
//!
//! Output is a pure function of the input series. The engine refuses to run
//! when the series is shorter than the longest indicator warm-up instead of
//! returning half-empty rows.

pub mod kama;
pub mod momentum;
pub mod moving_average;
pub mod volatility;


pub use kama::{KamaCross, KamaParams, KamaReading, KamaSignal};

use crate::error::{AnalyticsError, Result};
use crate::types::{closes, Candle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Indicator parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorParams {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bb_period: usize,
    pub bb_std_dev: f64,
    pub sma_short: usize,
    pub sma_long: usize,
    pub ema_period: usize,
    pub atr_period: usize,
    pub kama: KamaParams,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bb_period: 20,
            bb_std_dev: 2.0,
            sma_short: 20,
            sma_long: 50,
            ema_period: 20,
            atr_period: 14,
            kama: KamaParams::default(),
        }
    }
}

impl IndicatorParams {
    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("rsi_period", self.rsi_period),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
            ("bb_period", self.bb_period),
            ("sma_short", self.sma_short),
            ("sma_long", self.sma_long),
            ("ema_period", self.ema_period),
            ("atr_period", self.atr_period),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, p)| *p == 0) {
            return Err(AnalyticsError::InvalidParameter(format!(
                "{name} must be positive"
            )));
        }
        if self.macd_fast >= self.macd_slow {
            return Err(AnalyticsError::InvalidParameter(format!(
                "MACD fast period ({}) must be below slow period ({})",
                self.macd_fast, self.macd_slow
            )));
        }
        if self.bb_std_dev.is_nan() || self.bb_std_dev < 0.0 {
            return Err(AnalyticsError::InvalidParameter(
                "Bollinger std-dev multiplier must be non-negative".into(),
            ));
        }
        self.kama.validate()
    }

    /// Minimum history per gating indicator, as (label, candles)
    pub fn requirements(&self) -> Vec<(String, usize)> {
        vec![
            (format!("RSI({})", self.rsi_period), self.rsi_period + 1),
            (
                format!(
                    "MACD({},{},{})",
                    self.macd_fast, self.macd_slow, self.macd_signal
                ),
                self.macd_slow + self.macd_signal,
            ),
            (
                format!("Bollinger({},{})", self.bb_period, self.bb_std_dev),
                self.bb_period,
            ),
            (
                format!(
                    "KAMA({},{},{})",
                    self.kama.period, self.kama.fast, self.kama.slow
                ),
                self.kama.min_history(),
            ),
        ]
    }

    /// The requirement that binds, i.e. the longest warm-up
    pub fn binding_requirement(&self) -> (String, usize) {
        self.requirements()
            .into_iter()
            .fold((String::new(), 0), |best, req| if req.1 > best.1 { req } else { best })
    }
}

/// One row of the indicator table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRow {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub bb_bandwidth: Option<f64>,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub ema_20: Option<f64>,
    pub atr: Option<f64>,
    pub kama: Option<f64>,
    pub kama_signal: Option<KamaSignal>,
    pub kama_distance_pct: Option<f64>,
}

/// Compute the full indicator table for a candle series
pub fn compute_indicators(candles: &[Candle], params: &IndicatorParams) -> Result<Vec<IndicatorRow>> {
    params.validate()?;

    let (label, required) = params.binding_requirement();
    if candles.len() < required {
        return Err(AnalyticsError::insufficient(label, required, candles.len()));
    }

    let closes = closes(candles);
    let rsi = momentum::rsi(&closes, params.rsi_period);
    let macd = momentum::macd(
        &closes,
        params.macd_fast,
        params.macd_slow,
        params.macd_signal,
    );
    let bands = volatility::bollinger(&closes, params.bb_period, params.bb_std_dev);
    let sma_short = moving_average::sma(&closes, params.sma_short);
    let sma_long = moving_average::sma(&closes, params.sma_long);
    let ema = moving_average::ema(&closes, params.ema_period);
    let atr = volatility::atr(candles, params.atr_period);
    let kama_line = kama::kama(
        &closes,
        params.kama.period,
        params.kama.fast,
        params.kama.slow,
    );

    let rows: Vec<IndicatorRow> = candles
        .iter()
        .enumerate()
        .map(|(i, candle)| IndicatorRow {
            timestamp: candle.timestamp,
            close: candle.close,
            rsi: rsi[i],
            macd: macd.macd[i],
            macd_signal: macd.signal[i],
            macd_histogram: macd.histogram[i],
            bb_upper: bands.upper[i],
            bb_middle: bands.middle[i],
            bb_lower: bands.lower[i],
            bb_bandwidth: bands.bandwidth[i],
            sma_20: sma_short[i],
            sma_50: sma_long[i],
            ema_20: ema[i],
            atr: atr[i],
            kama: kama_line[i],
            kama_signal: kama_line[i]
                .map(|k| KamaSignal::classify(candle.close, k, params.kama.threshold_pct)),
            kama_distance_pct: kama_line[i].map(|k| kama::distance_pct(candle.close, k)),
        })
        .collect();

    debug!(rows = rows.len(), "indicator table computed");
    Ok(rows)
}
