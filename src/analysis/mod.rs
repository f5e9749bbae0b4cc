//! Full-series market analysis
//!
//! Runs every component over one candle series and fuses the results:
//! - indicator table
//! - risk snapshot over simple returns
//! - regime report from a supplied model, or one fitted on all but the
//!   trailing holdout rows
//! - composite signal from the latest regime, KAMA and on-chain readings


use crate::config::Config;
use crate::error::Result;
use crate::features::FeatureMatrix;
use crate::indicators::{compute_indicators, IndicatorRow, KamaReading};
use crate::regime::{RegimeClassifier, RegimeModel, RegimeReport};
use crate::risk::{returns_from_candles, RiskCalculator, RiskSnapshot};
use crate::signals::{aggregate, CompositeSignal, OnChainInputs};
use crate::types::{validate_series, Candle, Interval};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketAnalysis {
    pub generated_at: DateTime<Utc>,
    pub interval: Interval,
    pub candles: usize,
    pub latest_close: f64,
    pub indicators: Vec<IndicatorRow>,
    pub risk: RiskSnapshot,
    pub regime: RegimeReport,
    pub kama: KamaReading,
    pub signal: CompositeSignal,
}

/// Analyze `candles`; without a model, one is fitted on the series minus its holdout
pub fn analyze(
    candles: &[Candle],
    onchain: &OnChainInputs,
    config: &Config,
    model: Option<&RegimeModel>,
) -> Result<MarketAnalysis> {
    validate_series(candles)?;
    config.validate()?;

    let indicators = compute_indicators(candles, &config.indicators)?;
    let risk = RiskCalculator::new(config.risk.clone())
        .with_interval(config.interval)
        .compute(&returns_from_candles(candles))?;

    let classifier =
        RegimeClassifier::new(config.regime.clone()).with_features(config.features.clone());
    let fresh;
    let model = match model {
        Some(m) => m,
        None => {
            let features = FeatureMatrix::from_candles(candles, classifier.feature_config())?;
            fresh = classifier.train(&classifier.without_holdout(&features))?;
            info!(
                holdout = config.regime.holdout_rows,
                training_end = ?fresh.training_end,
                "regime model fitted ahead of the holdout rows"
            );
            &fresh
        }
    };
    let regime = classifier.classify(candles, model)?;

    let kama = KamaReading::latest(candles, &config.indicators.kama)?;
    let signal = aggregate(regime.current_regime.as_ref(), Some(&kama), onchain, &config.signals)?;

    let latest_close = candles.last().map(|c| c.close).unwrap_or_default();
    info!(
        candles = candles.len(),
        regime = ?regime.current_regime.as_ref().map(|p| p.regime),
        recommendation = %signal.recommendation,
        "market analysis complete"
    );

    Ok(MarketAnalysis {
        generated_at: Utc::now(),
        interval: config.interval,
        candles: candles.len(),
        latest_close,
        indicators,
        risk,
        regime,
        kama,
        signal,
    })
}
