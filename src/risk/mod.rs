//! Risk Calculator
//!
//! Scalar risk metrics over a window of period returns:
//! - historical VaR and Expected Shortfall at configured confidence levels
//! - parametric (Gaussian) and Cornish-Fisher modified VaR
//! - Sharpe / Sortino, annualized by the candle interval
//! - maximum drawdown with the trough timestamp
//!
//! Percent-valued fields are scaled by 100 (`-2.35` means -2.35%);
//! `mean_return` stays a fraction.

#[cfg(test)]
mod tests;

use crate::error::{AnalyticsError, Result};
use crate::stats::{excess_kurtosis, mean, quantile_sorted, sample_std, skewness};
use crate::types::{Candle, Interval};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use statrs::statistics::Statistics;
use tracing::debug;

/// Minimum observations for the Cornish-Fisher estimate
const MODIFIED_VAR_MIN_OBS: usize = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Extra confidence levels reported in `levels` (95% and 99% are always computed)
    pub confidence_levels: Vec<f64>,
    /// Annual risk-free rate, fractional
    pub risk_free_rate: f64,
    pub rolling_window: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            confidence_levels: vec![0.95, 0.99],
            risk_free_rate: 0.0,
            rolling_window: 30,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<()> {
        validate_levels(&self.confidence_levels)?;
        if !self.risk_free_rate.is_finite() {
            return Err(AnalyticsError::InvalidParameter(
                "risk_free_rate must be finite".into(),
            ));
        }
        if self.rolling_window < 2 {
            return Err(AnalyticsError::InvalidParameter(format!(
                "rolling_window must be at least 2, got {}",
                self.rolling_window
            )));
        }
        Ok(())
    }
}

fn validate_levels(levels: &[f64]) -> Result<()> {
    match levels.iter().find(|c| !(**c > 0.0 && **c < 1.0)) {
        Some(bad) => Err(AnalyticsError::InvalidParameter(format!(
            "confidence level {bad} outside (0, 1)"
        ))),
        None => Ok(()),
    }
}

/// One period return
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReturnPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Simple (pct-change) returns, stamped with the later candle
pub fn returns_from_candles(candles: &[Candle]) -> Vec<ReturnPoint> {
    candles
        .windows(2)
        .map(|w| ReturnPoint {
            timestamp: w[1].timestamp,
            value: (w[1].close - w[0].close) / w[0].close,
        })
        .collect()
}

/// VaR / ES at one confidence level, in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VarLevel {
    pub confidence: f64,
    pub var: f64,
    pub expected_shortfall: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub var_95: f64,
    pub var_99: f64,
    pub es_95: f64,
    pub es_99: f64,
    pub parametric_var_95: f64,
    pub parametric_var_99: f64,
    pub modified_var_95: Option<f64>,
    pub modified_var_99: Option<f64>,
    pub levels: Vec<VarLevel>,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Sharpe and Sortino were forced to 0 because the window has no dispersion
    pub zero_variance: bool,
    /// Sortino was forced to 0 because there is no downside dispersion
    pub zero_downside: bool,
    /// Positive magnitude, percent
    pub max_drawdown: f64,
    pub max_drawdown_date: Option<DateTime<Utc>>,
    /// Annualized, percent
    pub volatility: f64,
    pub mean_return: f64,
    pub skewness: f64,
    pub excess_kurtosis: f64,
    pub observations: usize,
    pub periods_per_year: f64,
}

/// Rolling window risk point, `None` until the window is full
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingRiskPoint {
    pub timestamp: DateTime<Utc>,
    pub var_95: Option<f64>,
    pub volatility: Option<f64>,
    pub sharpe_ratio: Option<f64>,
}

/// Risk calculator bound to a candle interval
pub struct RiskCalculator {
    config: RiskConfig,
    interval: Interval,
}

impl RiskCalculator {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            interval: Interval::default(),
        }
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = interval;
        self
    }

    pub fn compute(&self, returns: &[ReturnPoint]) -> Result<RiskSnapshot> {
        self.config.validate()?;
        compute_risk_with(
            returns,
            &self.config.confidence_levels,
            self.interval,
            self.config.risk_free_rate,
        )
    }

    pub fn rolling(&self, returns: &[ReturnPoint]) -> Result<Vec<RollingRiskPoint>> {
        self.config.validate()?;
        rolling_risk(
            returns,
            self.config.rolling_window,
            self.interval,
            self.config.risk_free_rate,
        )
    }
}

/// Risk snapshot with a zero risk-free rate
pub fn compute_risk(
    returns: &[ReturnPoint],
    confidence_levels: &[f64],
    interval: Interval,
) -> Result<RiskSnapshot> {
    compute_risk_with(returns, confidence_levels, interval, 0.0)
}

pub fn compute_risk_with(
    returns: &[ReturnPoint],
    confidence_levels: &[f64],
    interval: Interval,
    risk_free_rate: f64,
) -> Result<RiskSnapshot> {
    validate_levels(confidence_levels)?;
    if returns.len() < 2 {
        return Err(AnalyticsError::insufficient("risk metrics", 2, returns.len()));
    }
    if let Some(bad) = returns.iter().find(|r| !r.value.is_finite()) {
        return Err(AnalyticsError::InvalidParameter(format!(
            "non-finite return at {}",
            bad.timestamp
        )));
    }

    let values: Vec<f64> = returns.iter().map(|r| r.value).collect();
    let mut sorted = values.clone();
    sorted.sort_by(f64::total_cmp);

    let ppy = interval.periods_per_year();
    let mu = values.iter().mean();
    let sigma = values.iter().std_dev();
    let skew = skewness(&values);
    let kurt = excess_kurtosis(&values);
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| AnalyticsError::InvalidParameter(e.to_string()))?;

    let level = |c: f64| {
        let (var, es) = historical_var_es(&sorted, c);
        VarLevel {
            confidence: c,
            var: var * 100.0,
            expected_shortfall: es * 100.0,
        }
    };
    let at_95 = level(0.95);
    let at_99 = level(0.99);
    let levels = confidence_levels.iter().map(|c| level(*c)).collect();

    let parametric = |c: f64| (mu + normal.inverse_cdf(1.0 - c) * sigma) * 100.0;
    let modified = |c: f64| {
        (values.len() >= MODIFIED_VAR_MIN_OBS)
            .then(|| cornish_fisher_var(mu, sigma, skew, kurt, normal.inverse_cdf(1.0 - c)) * 100.0)
    };

    let zero_variance = sigma <= f64::EPSILON;
    let excess = mu - risk_free_rate / ppy;
    let sharpe_ratio = if zero_variance {
        0.0
    } else {
        excess / sigma * ppy.sqrt()
    };

    let downside: Vec<f64> = values.iter().copied().filter(|r| *r < 0.0).collect();
    let downside_std = sample_std(&downside);
    let zero_downside = downside_std <= f64::EPSILON;
    let sortino_ratio = if zero_variance || zero_downside {
        0.0
    } else {
        excess / downside_std * ppy.sqrt()
    };

    let (max_drawdown, max_drawdown_date) = max_drawdown(returns);

    debug!(
        observations = values.len(),
        var_95 = at_95.var,
        sharpe = sharpe_ratio,
        "risk snapshot computed"
    );

    Ok(RiskSnapshot {
        var_95: at_95.var,
        var_99: at_99.var,
        es_95: at_95.expected_shortfall,
        es_99: at_99.expected_shortfall,
        parametric_var_95: parametric(0.95),
        parametric_var_99: parametric(0.99),
        modified_var_95: modified(0.95),
        modified_var_99: modified(0.99),
        levels,
        sharpe_ratio,
        sortino_ratio,
        zero_variance,
        zero_downside,
        max_drawdown: max_drawdown * 100.0,
        max_drawdown_date,
        volatility: sigma * ppy.sqrt() * 100.0,
        mean_return: mu,
        skewness: skew,
        excess_kurtosis: kurt,
        observations: values.len(),
        periods_per_year: ppy,
    })
}

/// Historical VaR and ES as fractions
fn historical_var_es(sorted: &[f64], confidence: f64) -> (f64, f64) {
    let var = quantile_sorted(sorted, 1.0 - confidence);
    let tail: Vec<f64> = sorted.iter().copied().take_while(|r| *r < var).collect();
    let es = if tail.is_empty() { var } else { mean(&tail) };
    (var, es)
}

/// VaR from the Cornish-Fisher adjusted quantile
fn cornish_fisher_var(mu: f64, sigma: f64, s: f64, k: f64, z: f64) -> f64 {
    let z_cf = z + (z.powi(2) - 1.0) * s / 6.0 + (z.powi(3) - 3.0 * z) * k / 24.0
        - (2.0 * z.powi(3) - 5.0 * z) * s.powi(2) / 36.0;
    mu + z_cf * sigma
}

/// Largest peak-to-trough decline of the compounded return path
fn max_drawdown(returns: &[ReturnPoint]) -> (f64, Option<DateTime<Utc>>) {
    let mut wealth = 1.0;
    let mut peak = 1.0;
    let mut worst = 0.0;
    let mut worst_at = None;

    for r in returns {
        wealth *= 1.0 + r.value;
        if wealth > peak {
            peak = wealth;
        }
        let drawdown = (peak - wealth) / peak;
        if drawdown > worst {
            worst = drawdown;
            worst_at = Some(r.timestamp);
        }
    }
    (worst, worst_at)
}

pub fn rolling_risk(
    returns: &[ReturnPoint],
    window: usize,
    interval: Interval,
    risk_free_rate: f64,
) -> Result<Vec<RollingRiskPoint>> {
    if window < 2 {
        return Err(AnalyticsError::InvalidParameter(format!(
            "rolling window must be at least 2, got {window}"
        )));
    }
    if returns.len() < window {
        return Err(AnalyticsError::insufficient(
            format!("rolling risk window {window}"),
            window,
            returns.len(),
        ));
    }

    let ppy = interval.periods_per_year();
    let points = returns
        .iter()
        .enumerate()
        .map(|(i, r)| {
            if i + 1 < window {
                return RollingRiskPoint {
                    timestamp: r.timestamp,
                    var_95: None,
                    volatility: None,
                    sharpe_ratio: None,
                };
            }
            let slice: Vec<f64> = returns[i + 1 - window..=i].iter().map(|p| p.value).collect();
            let mut sorted = slice.clone();
            sorted.sort_by(f64::total_cmp);
            let sigma = sample_std(&slice);
            let sharpe = if sigma > f64::EPSILON {
                (mean(&slice) - risk_free_rate / ppy) / sigma * ppy.sqrt()
            } else {
                0.0
            };
            RollingRiskPoint {
                timestamp: r.timestamp,
                var_95: Some(quantile_sorted(&sorted, 0.05) * 100.0),
                volatility: Some(sigma * ppy.sqrt() * 100.0),
                sharpe_ratio: Some(sharpe),
            }
        })
        .collect();
    Ok(points)
}
