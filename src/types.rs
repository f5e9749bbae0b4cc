//! Core market data types

use crate::error::{AnalyticsError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// OHLCV candle for a single (symbol, interval) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Candle with open = high = low = close
    pub fn flat(timestamp: DateTime<Utc>, price: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }

    /// True range against the previous close
    pub fn true_range(&self, prev_close: f64) -> f64 {
        (self.high - self.low)
            .max((self.high - prev_close).abs())
            .max((self.low - prev_close).abs())
    }
}

/// Candle interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
}

impl Interval {
    pub fn minutes(&self) -> u32 {
        match self {
            Interval::OneMinute => 1,
            Interval::FiveMinutes => 5,
            Interval::FifteenMinutes => 15,
            Interval::OneHour => 60,
            Interval::FourHours => 240,
            Interval::OneDay => 1440,
            Interval::OneWeek => 10080,
        }
    }

    /// Annualization factor for a 24/7 market (hourly = 24 * 365)
    pub fn periods_per_year(&self) -> f64 {
        (365.0 * 24.0 * 60.0) / self.minutes() as f64
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::OneHour => "1h",
            Interval::FourHours => "4h",
            Interval::OneDay => "1d",
            Interval::OneWeek => "1w",
        }
    }
}

impl Default for Interval {
    fn default() -> Self {
        Interval::OneHour
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1m" => Ok(Interval::OneMinute),
            "5m" => Ok(Interval::FiveMinutes),
            "15m" => Ok(Interval::FifteenMinutes),
            "1h" => Ok(Interval::OneHour),
            "4h" => Ok(Interval::FourHours),
            "1d" => Ok(Interval::OneDay),
            "1w" => Ok(Interval::OneWeek),
            other => Err(AnalyticsError::InvalidParameter(format!(
                "unknown interval '{other}'"
            ))),
        }
    }
}

/// Check ordering and OHLC consistency of a candle series
pub fn validate_series(candles: &[Candle]) -> Result<()> {
    for (i, c) in candles.iter().enumerate() {
        if !(c.open > 0.0 && c.high > 0.0 && c.low > 0.0 && c.close > 0.0) {
            return Err(AnalyticsError::InvalidParameter(format!(
                "candle {i} at {} has a non-positive price",
                c.timestamp
            )));
        }
        if c.high < c.open.max(c.close) || c.low > c.open.min(c.close) {
            return Err(AnalyticsError::InvalidParameter(format!(
                "candle {i} at {} has inconsistent high/low",
                c.timestamp
            )));
        }
        if c.volume < 0.0 || !c.volume.is_finite() {
            return Err(AnalyticsError::InvalidParameter(format!(
                "candle {i} at {} has invalid volume",
                c.timestamp
            )));
        }
        if i > 0 && c.timestamp <= candles[i - 1].timestamp {
            return Err(AnalyticsError::InvalidParameter(format!(
                "timestamps not strictly increasing at index {i}"
            )));
        }
    }
    Ok(())
}

pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}
