//! Volatility indicators: Bollinger Bands and ATR

use super::moving_average::sma;
use crate::stats::population_std;
use crate::types::Candle;

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerSeries {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
    /// (upper - lower) / middle, in percent
    pub bandwidth: Vec<Option<f64>>,
}

pub fn bollinger(closes: &[f64], period: usize, k: f64) -> BollingerSeries {
    let middle = sma(closes, period);
    let n = closes.len();
    let mut upper = vec![None; n];
    let mut lower = vec![None; n];
    let mut bandwidth = vec![None; n];

    for i in 0..n {
        let Some(mid) = middle[i] else { continue };
        let sd = population_std(&closes[i + 1 - period..=i]);
        let up = mid + k * sd;
        let low = mid - k * sd;
        upper[i] = Some(up);
        lower[i] = Some(low);
        if mid != 0.0 {
            bandwidth[i] = Some((up - low) / mid * 100.0);
        }
    }

    BollingerSeries {
        upper,
        middle,
        lower,
        bandwidth,
    }
}

/// Average True Range with Wilder's smoothing
pub fn atr(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; candles.len()];
    if period == 0 || candles.len() < period {
        return out;
    }

    let true_ranges: Vec<f64> = candles
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if i == 0 {
                c.high - c.low
            } else {
                c.true_range(candles[i - 1].close)
            }
        })
        .collect();

    let p = period as f64;
    let mut current = true_ranges[..period].iter().sum::<f64>() / p;
    out[period - 1] = Some(current);
    for i in period..candles.len() {
        current = (current * (p - 1.0) + true_ranges[i]) / p;
        out[i] = Some(current);
    }
    out
}
