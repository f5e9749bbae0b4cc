//! Kaufman Adaptive Moving Average
//!
//! KAMA follows price quickly when the move is efficient (trending) and flattens
//! out when price chops. The aggregator consumes the latest [`KamaReading`]:
//! - signal: price above/below KAMA by more than the threshold
//! - cross: the signal flipping into Bullish or Bearish on the last bar
//! - ATR-scaled stop-loss / take-profit levels for the active side

use super::volatility::atr;
use crate::error::{AnalyticsError, Result};
use crate::types::Candle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// KAMA parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KamaParams {
    /// Efficiency ratio lookback
    pub period: usize,
    /// Fast smoothing period
    pub fast: usize,
    /// Slow smoothing period
    pub slow: usize,
    /// Distance from KAMA (percent) before a side is taken
    pub threshold_pct: f64,
    pub atr_period: usize,
    /// Stop distance in ATR units
    pub atr_multiplier: f64,
    pub risk_reward: f64,
}

impl Default for KamaParams {
    fn default() -> Self {
        Self {
            period: 10,
            fast: 2,
            slow: 30,
            threshold_pct: 0.5,
            atr_period: 14,
            atr_multiplier: 2.0,
            risk_reward: 2.0,
        }
    }
}

impl KamaParams {
    pub fn validate(&self) -> Result<()> {
        if self.period == 0 || self.fast == 0 || self.slow == 0 || self.atr_period == 0 {
            return Err(AnalyticsError::InvalidParameter(
                "KAMA periods must be positive".into(),
            ));
        }
        if self.fast >= self.slow {
            return Err(AnalyticsError::InvalidParameter(format!(
                "KAMA fast period ({}) must be below slow period ({})",
                self.fast, self.slow
            )));
        }
        if self.threshold_pct < 0.0 || self.atr_multiplier <= 0.0 || self.risk_reward <= 0.0 {
            return Err(AnalyticsError::InvalidParameter(
                "KAMA threshold and ATR multipliers must be non-negative".into(),
            ));
        }
        Ok(())
    }

    /// Candles needed before the first KAMA value
    pub fn min_history(&self) -> usize {
        self.period + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KamaSignal {
    Bullish,
    Bearish,
    Neutral,
}

impl KamaSignal {
    pub fn classify(close: f64, kama: f64, threshold_pct: f64) -> Self {
        let distance = distance_pct(close, kama);
        if distance > threshold_pct {
            KamaSignal::Bullish
        } else if distance < -threshold_pct {
            KamaSignal::Bearish
        } else {
            KamaSignal::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KamaSignal::Bullish => "BULLISH",
            KamaSignal::Bearish => "BEARISH",
            KamaSignal::Neutral => "NEUTRAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KamaCross {
    /// Signal turned Bullish on the last bar
    GoldenCross,
    /// Signal turned Bearish on the last bar
    DeathCross,
}

pub fn distance_pct(close: f64, kama: f64) -> f64 {
    (close - kama) / kama * 100.0
}

/// KAMA series aligned with `closes`, first value at index `period`
pub fn kama(closes: &[f64], period: usize, fast: usize, slow: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() <= period {
        return out;
    }

    let fast_sc = 2.0 / (fast as f64 + 1.0);
    let slow_sc = 2.0 / (slow as f64 + 1.0);

    let mut current = closes[period];
    out[period] = Some(current);

    for t in (period + 1)..closes.len() {
        let change = (closes[t] - closes[t - period]).abs();
        let path: f64 = (t - period + 1..=t)
            .map(|i| (closes[i] - closes[i - 1]).abs())
            .sum();
        let er = if path > 0.0 { change / path } else { 0.0 };
        let sc = (er * (fast_sc - slow_sc) + slow_sc).powi(2);
        current += sc * (closes[t] - current);
        out[t] = Some(current);
    }
    out
}

/// Latest KAMA state of a series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KamaReading {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub kama: f64,
    pub signal: KamaSignal,
    pub distance_pct: f64,
    pub cross: Option<KamaCross>,
    pub atr: Option<f64>,
    /// ATR as a percentage of close
    pub atr_pct: Option<f64>,
    /// |close - KAMA| in ATR units
    pub distance_atr: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl KamaReading {
    pub fn latest(candles: &[Candle], params: &KamaParams) -> Result<Self> {
        params.validate()?;
        if candles.len() < params.min_history() {
            return Err(AnalyticsError::insufficient(
                format!("KAMA({},{},{})", params.period, params.fast, params.slow),
                params.min_history(),
                candles.len(),
            ));
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let series = kama(&closes, params.period, params.fast, params.slow);
        let atr_series = atr(candles, params.atr_period);

        let last = candles.len() - 1;
        let value = series[last].ok_or(AnalyticsError::MissingInput("kama"))?;
        let close = closes[last];
        let signal = KamaSignal::classify(close, value, params.threshold_pct);

        let previous = last
            .checked_sub(1)
            .and_then(|i| series[i].map(|k| KamaSignal::classify(closes[i], k, params.threshold_pct)));
        let cross = match (previous, signal) {
            (Some(prev), KamaSignal::Bullish) if prev != KamaSignal::Bullish => {
                Some(KamaCross::GoldenCross)
            }
            (Some(prev), KamaSignal::Bearish) if prev != KamaSignal::Bearish => {
                Some(KamaCross::DeathCross)
            }
            _ => None,
        };

        let atr_value = atr_series[last];
        let stop_distance = atr_value.map(|a| a * params.atr_multiplier);
        let (stop_loss, take_profit) = match (signal, stop_distance) {
            (KamaSignal::Bullish, Some(d)) => (Some(close - d), Some(close + d * params.risk_reward)),
            (KamaSignal::Bearish, Some(d)) => (Some(close + d), Some(close - d * params.risk_reward)),
            _ => (None, None),
        };

        Ok(Self {
            timestamp: candles[last].timestamp,
            close,
            kama: value,
            signal,
            distance_pct: distance_pct(close, value),
            cross,
            atr: atr_value,
            atr_pct: atr_value.map(|a| a / close * 100.0),
            distance_atr: atr_value
                .filter(|a| *a > 0.0)
                .map(|a| (close - value).abs() / a),
            stop_loss,
            take_profit,
        })
    }

    /// Reading built from already-known values, used by callers that track KAMA elsewhere
    pub fn from_values(timestamp: DateTime<Utc>, close: f64, kama: f64, threshold_pct: f64) -> Self {
        Self {
            timestamp,
            close,
            kama,
            signal: KamaSignal::classify(close, kama, threshold_pct),
            distance_pct: distance_pct(close, kama),
            cross: None,
            atr: None,
            atr_pct: None,
            distance_atr: None,
            stop_loss: None,
            take_profit: None,
        }
    }
}
