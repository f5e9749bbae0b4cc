//! Composite Signal Aggregator
//!
//! Fuses the latest regime prediction, the KAMA reading and external
//! on-chain readings into one bounded score:
//! - every (factor, condition) pair maps to a signed weight in [`WeightTable`]
//! - the score is the clamped sum of the active weights
//! - recommendation and confidence follow from the score
//!
//! Missing on-chain readings degrade to zero-weight factors; a missing
//! regime or KAMA input is an error.


use crate::error::{AnalyticsError, Result};
use crate::indicators::{KamaCross, KamaReading, KamaSignal};
use crate::regime::{Confidence, RegimeLabel, RegimePrediction};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

pub const SCORE_BOUND: i32 = 100;

/// Condition a factor can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactorCondition {
    Regime(RegimeLabel, Confidence),
    Kama(KamaSignal),
    KamaCross(KamaCross),
    Funding(FundingSignal),
    MarketCap(MarketCapSignal),
}

/// Signed weight per (factor, condition)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightTable {
    pub regime_bull_high: i32,
    pub regime_bull_medium: i32,
    pub regime_bull_low: i32,
    pub regime_bear_high: i32,
    pub regime_bear_medium: i32,
    pub regime_bear_low: i32,
    pub regime_sideways: i32,
    pub regime_high_volatility: i32,
    pub kama_bullish: i32,
    pub kama_bearish: i32,
    pub kama_neutral: i32,
    pub kama_golden_cross: i32,
    pub kama_death_cross: i32,
    pub funding_extreme_long: i32,
    pub funding_overheated: i32,
    pub funding_neutral: i32,
    pub funding_short_squeeze_risk: i32,
    pub funding_extreme_short: i32,
    pub market_cap_overvalued: i32,
    pub market_cap_fair_value: i32,
    pub market_cap_undervalued: i32,
    pub market_cap_accumulation: i32,
}

impl Default for WeightTable {
    fn default() -> Self {
        Self {
            regime_bull_high: 30,
            regime_bull_medium: 15,
            regime_bull_low: 0,
            regime_bear_high: -30,
            regime_bear_medium: -15,
            regime_bear_low: 0,
            regime_sideways: 0,
            regime_high_volatility: 0,
            kama_bullish: 15,
            kama_bearish: -15,
            kama_neutral: 0,
            kama_golden_cross: 30,
            kama_death_cross: -30,
            funding_extreme_long: -10,
            funding_overheated: 0,
            funding_neutral: 0,
            funding_short_squeeze_risk: 0,
            funding_extreme_short: 10,
            market_cap_overvalued: -10,
            market_cap_fair_value: 0,
            market_cap_undervalued: 10,
            market_cap_accumulation: 20,
        }
    }
}

impl WeightTable {
    pub fn weight(&self, condition: FactorCondition) -> i32 {
        use crate::regime::Confidence::{High, Low, Medium};
        use FactorCondition as F;
        match condition {
            F::Regime(RegimeLabel::Bull, High) => self.regime_bull_high,
            F::Regime(RegimeLabel::Bull, Medium) => self.regime_bull_medium,
            F::Regime(RegimeLabel::Bull, Low) => self.regime_bull_low,
            F::Regime(RegimeLabel::Bear, High) => self.regime_bear_high,
            F::Regime(RegimeLabel::Bear, Medium) => self.regime_bear_medium,
            F::Regime(RegimeLabel::Bear, Low) => self.regime_bear_low,
            F::Regime(RegimeLabel::Sideways, _) => self.regime_sideways,
            F::Regime(RegimeLabel::HighVolatility, _) => self.regime_high_volatility,
            F::Kama(KamaSignal::Bullish) => self.kama_bullish,
            F::Kama(KamaSignal::Bearish) => self.kama_bearish,
            F::Kama(KamaSignal::Neutral) => self.kama_neutral,
            F::KamaCross(KamaCross::GoldenCross) => self.kama_golden_cross,
            F::KamaCross(KamaCross::DeathCross) => self.kama_death_cross,
            F::Funding(FundingSignal::ExtremeLong) => self.funding_extreme_long,
            F::Funding(FundingSignal::Overheated) => self.funding_overheated,
            F::Funding(FundingSignal::Neutral) => self.funding_neutral,
            F::Funding(FundingSignal::ShortSqueezeRisk) => self.funding_short_squeeze_risk,
            F::Funding(FundingSignal::ExtremeShort) => self.funding_extreme_short,
            F::MarketCap(MarketCapSignal::Overvalued) => self.market_cap_overvalued,
            F::MarketCap(MarketCapSignal::FairValue) => self.market_cap_fair_value,
            F::MarketCap(MarketCapSignal::Undervalued) => self.market_cap_undervalued,
            F::MarketCap(MarketCapSignal::Accumulation) => self.market_cap_accumulation,
        }
    }
}

/// Perpetual funding rate per 8h interval, classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FundingSignal {
    /// Longs paying heavily, long squeeze risk
    ExtremeLong,
    Overheated,
    Neutral,
    ShortSqueezeRisk,
    /// Shorts paying heavily, short squeeze risk
    ExtremeShort,
}

impl FundingSignal {
    pub const EXTREME: f64 = 0.001;
    pub const ELEVATED: f64 = 0.0005;

    pub fn from_rate(rate: f64) -> Self {
        Self::classify(rate, Self::EXTREME, Self::ELEVATED)
    }

    pub fn classify(rate: f64, extreme: f64, elevated: f64) -> Self {
        if rate > extreme {
            FundingSignal::ExtremeLong
        } else if rate > elevated {
            FundingSignal::Overheated
        } else if rate < -extreme {
            FundingSignal::ExtremeShort
        } else if rate < -elevated {
            FundingSignal::ShortSqueezeRisk
        } else {
            FundingSignal::Neutral
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FundingSignal::ExtremeLong => "Extreme Long (Squeeze Risk)",
            FundingSignal::Overheated => "Overheated Longs",
            FundingSignal::Neutral => "Neutral (Healthy)",
            FundingSignal::ShortSqueezeRisk => "Elevated Shorts",
            FundingSignal::ExtremeShort => "Extreme Short (Squeeze Risk)",
        }
    }
}

/// Market-cap valuation zone, a free proxy for MVRV
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketCapSignal {
    Overvalued,
    FairValue,
    Undervalued,
    Accumulation,
}

impl MarketCapSignal {
    pub const OVERVALUED_USD: f64 = 1.5e12;
    pub const FAIR_USD: f64 = 1.0e12;
    pub const UNDERVALUED_USD: f64 = 5.0e11;

    pub fn from_market_cap(usd: f64) -> Self {
        Self::classify(usd, Self::OVERVALUED_USD, Self::FAIR_USD, Self::UNDERVALUED_USD)
    }

    pub fn classify(usd: f64, overvalued: f64, fair: f64, undervalued: f64) -> Self {
        if usd > overvalued {
            MarketCapSignal::Overvalued
        } else if usd > fair {
            MarketCapSignal::FairValue
        } else if usd > undervalued {
            MarketCapSignal::Undervalued
        } else {
            MarketCapSignal::Accumulation
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MarketCapSignal::Overvalued => "Overvalued",
            MarketCapSignal::FairValue => "Fair Value",
            MarketCapSignal::Undervalued => "Undervalued",
            MarketCapSignal::Accumulation => "Accumulation Zone",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub weights: WeightTable,
    pub funding_extreme: f64,
    pub funding_elevated: f64,
    pub market_cap_overvalued: f64,
    pub market_cap_fair: f64,
    pub market_cap_undervalued: f64,
    /// |score| above this is a strong call with High confidence
    pub strong_threshold: i32,
    /// |score| above this is a directional call with Medium confidence
    pub action_threshold: i32,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            weights: WeightTable::default(),
            funding_extreme: FundingSignal::EXTREME,
            funding_elevated: FundingSignal::ELEVATED,
            market_cap_overvalued: MarketCapSignal::OVERVALUED_USD,
            market_cap_fair: MarketCapSignal::FAIR_USD,
            market_cap_undervalued: MarketCapSignal::UNDERVALUED_USD,
            strong_threshold: 60,
            action_threshold: 30,
        }
    }
}

impl SignalConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.funding_elevated > 0.0 && self.funding_elevated < self.funding_extreme) {
            return Err(AnalyticsError::InvalidParameter(format!(
                "funding thresholds must satisfy 0 < elevated < extreme, got {} / {}",
                self.funding_elevated, self.funding_extreme
            )));
        }
        if !(self.market_cap_undervalued < self.market_cap_fair
            && self.market_cap_fair < self.market_cap_overvalued)
        {
            return Err(AnalyticsError::InvalidParameter(
                "market cap thresholds must be increasing: undervalued < fair < overvalued".into(),
            ));
        }
        if !(0 < self.action_threshold && self.action_threshold < self.strong_threshold) {
            return Err(AnalyticsError::InvalidParameter(format!(
                "score thresholds must satisfy 0 < action < strong, got {} / {}",
                self.action_threshold, self.strong_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recommendation {
    #[serde(rename = "STRONG BUY")]
    StrongBuy,
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "HOLD")]
    Hold,
    #[serde(rename = "SELL")]
    Sell,
    #[serde(rename = "STRONG SELL")]
    StrongSell,
}

impl Recommendation {
    pub fn from_score(score: i32, action: i32, strong: i32) -> Self {
        if score > strong {
            Recommendation::StrongBuy
        } else if score > action {
            Recommendation::Buy
        } else if score < -strong {
            Recommendation::StrongSell
        } else if score < -action {
            Recommendation::Sell
        } else {
            Recommendation::Hold
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::StrongBuy => "STRONG BUY",
            Recommendation::Buy => "BUY",
            Recommendation::Hold => "HOLD",
            Recommendation::Sell => "SELL",
            Recommendation::StrongSell => "STRONG SELL",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn score_confidence(score: i32, action: i32, strong: i32) -> Confidence {
    let magnitude = score.abs();
    if magnitude > strong {
        Confidence::High
    } else if magnitude > action {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

/// On-chain readings as resolved by the data layer
#[derive(Debug, Clone, PartialEq)]
pub struct OnChainInputs {
    pub funding_rate: std::result::Result<f64, AnalyticsError>,
    pub market_cap_usd: std::result::Result<f64, AnalyticsError>,
}

impl OnChainInputs {
    pub fn new(funding_rate: Option<f64>, market_cap_usd: Option<f64>) -> Self {
        let missing = |name: &str| AnalyticsError::upstream(name, "no value supplied");
        Self {
            funding_rate: funding_rate.ok_or_else(|| missing("funding_rate")),
            market_cap_usd: market_cap_usd.ok_or_else(|| missing("market_cap")),
        }
    }

    pub fn unavailable() -> Self {
        Self::new(None, None)
    }
}

/// One contributing factor, in evaluation order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Factor {
    pub name: String,
    pub signal: String,
    pub weight: i32,
}

/// Factor that fell back to zero weight because its input was unavailable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedFactor {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeSummary {
    pub regime: RegimeLabel,
    pub probability: f64,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KamaSummary {
    pub value: f64,
    pub signal: KamaSignal,
    pub distance_pct: f64,
    pub cross: Option<KamaCross>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OnChainSummary {
    pub funding_rate: Option<f64>,
    pub funding_signal: Option<FundingSignal>,
    pub market_cap_usd: Option<f64>,
    pub market_cap_signal: Option<MarketCapSignal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeSignal {
    pub recommendation: Recommendation,
    pub confidence: Confidence,
    pub composite_score: i32,
    pub regime: RegimeSummary,
    pub kama: KamaSummary,
    pub onchain: OnChainSummary,
    pub factors: Vec<Factor>,
    pub degraded: Vec<DegradedFactor>,
}

/// Weighted sum of the active factors, clamped to [-100, 100]
pub fn aggregate(
    regime: Option<&RegimePrediction>,
    kama: Option<&KamaReading>,
    onchain: &OnChainInputs,
    config: &SignalConfig,
) -> Result<CompositeSignal> {
    config.validate()?;
    let regime = regime.ok_or(AnalyticsError::MissingInput("regime"))?;
    let kama = kama.ok_or(AnalyticsError::MissingInput("kama"))?;
    let weights = &config.weights;

    let mut factors = Vec::with_capacity(4);
    let mut degraded = Vec::new();

    let regime_condition = FactorCondition::Regime(regime.regime, regime.confidence);
    factors.push(Factor {
        name: "Regime".into(),
        signal: regime_description(regime),
        weight: weights.weight(regime_condition),
    });

    let (kama_signal, kama_weight) = match kama.cross {
        Some(KamaCross::GoldenCross) => (
            "Golden Cross",
            weights.weight(FactorCondition::KamaCross(KamaCross::GoldenCross)),
        ),
        Some(KamaCross::DeathCross) => (
            "Death Cross",
            weights.weight(FactorCondition::KamaCross(KamaCross::DeathCross)),
        ),
        None => (
            match kama.signal {
                KamaSignal::Bullish => "Bullish Trend",
                KamaSignal::Bearish => "Bearish Trend",
                KamaSignal::Neutral => "Neutral",
            },
            weights.weight(FactorCondition::Kama(kama.signal)),
        ),
    };
    factors.push(Factor {
        name: "KAMA".into(),
        signal: kama_signal.into(),
        weight: kama_weight,
    });

    let mut onchain_summary = OnChainSummary::default();

    match usable(&onchain.funding_rate, "funding_rate") {
        Ok(rate) => {
            let signal =
                FundingSignal::classify(rate, config.funding_extreme, config.funding_elevated);
            onchain_summary.funding_rate = Some(rate);
            onchain_summary.funding_signal = Some(signal);
            factors.push(Factor {
                name: "Funding".into(),
                signal: signal.description().into(),
                weight: weights.weight(FactorCondition::Funding(signal)),
            });
        }
        Err(e) => degrade(&mut factors, &mut degraded, "Funding", &e),
    }

    match usable(&onchain.market_cap_usd, "market_cap") {
        Ok(usd) => {
            let signal = MarketCapSignal::classify(
                usd,
                config.market_cap_overvalued,
                config.market_cap_fair,
                config.market_cap_undervalued,
            );
            onchain_summary.market_cap_usd = Some(usd);
            onchain_summary.market_cap_signal = Some(signal);
            factors.push(Factor {
                name: "Market Cap".into(),
                signal: signal.description().into(),
                weight: weights.weight(FactorCondition::MarketCap(signal)),
            });
        }
        Err(e) => degrade(&mut factors, &mut degraded, "Market Cap", &e),
    }

    let raw: i64 = factors.iter().map(|f| f.weight as i64).sum();
    let composite_score = raw.clamp(-(SCORE_BOUND as i64), SCORE_BOUND as i64) as i32;
    let recommendation =
        Recommendation::from_score(composite_score, config.action_threshold, config.strong_threshold);
    let confidence =
        score_confidence(composite_score, config.action_threshold, config.strong_threshold);

    info!(
        score = composite_score,
        recommendation = %recommendation,
        degraded = degraded.len(),
        "composite signal aggregated"
    );

    Ok(CompositeSignal {
        recommendation,
        confidence,
        composite_score,
        regime: RegimeSummary {
            regime: regime.regime,
            probability: regime.probability,
            confidence: regime.confidence,
        },
        kama: KamaSummary {
            value: kama.kama,
            signal: kama.signal,
            distance_pct: kama.distance_pct,
            cross: kama.cross,
        },
        onchain: onchain_summary,
        factors,
        degraded,
    })
}

fn regime_description(p: &RegimePrediction) -> String {
    let confidence = match p.confidence {
        Confidence::High => "High Confidence",
        Confidence::Medium => "Medium Confidence",
        Confidence::Low => "Low Confidence",
    };
    match p.regime {
        RegimeLabel::Bull => format!("Bull ({confidence})"),
        RegimeLabel::Bear => format!("Bear ({confidence})"),
        RegimeLabel::Sideways => "Sideways".to_string(),
        RegimeLabel::HighVolatility => "High Volatility".to_string(),
    }
}

fn usable(
    input: &std::result::Result<f64, AnalyticsError>,
    name: &str,
) -> std::result::Result<f64, AnalyticsError> {
    match input {
        Ok(v) if v.is_finite() => Ok(*v),
        Ok(v) => Err(AnalyticsError::upstream(name, format!("non-finite value {v}"))),
        Err(e) => Err(e.clone()),
    }
}

fn degrade(
    factors: &mut Vec<Factor>,
    degraded: &mut Vec<DegradedFactor>,
    name: &str,
    err: &AnalyticsError,
) {
    warn!(factor = name, error = %err, "on-chain factor degraded to neutral");
    factors.push(Factor {
        name: name.into(),
        signal: "Unavailable".into(),
        weight: 0,
    });
    degraded.push(DegradedFactor {
        name: name.into(),
        reason: err.to_string(),
    });
}
