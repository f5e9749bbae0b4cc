//! Layered configuration
//!
//! Sources, later ones win:
//! 1. built-in defaults of every section
//! 2. an optional TOML file
//! 3. `BTC_ANALYTICS__<SECTION>__<KEY>` environment variables

use crate::error::Result;
use crate::features::FeatureConfig;
use crate::indicators::IndicatorParams;
use crate::regime::RegimeConfig;
use crate::risk::RiskConfig;
use crate::signals::SignalConfig;
use crate::types::Interval;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_PREFIX: &str = "BTC_ANALYTICS";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Candle interval used for annualization
    pub interval: Interval,
    pub features: FeatureConfig,
    pub indicators: IndicatorParams,
    pub risk: RiskConfig,
    pub regime: RegimeConfig,
    pub signals: SignalConfig,
}

impl Config {
    /// Load from `path` (skipped when missing) and the environment, then validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        tracing::debug!(path = %path.as_ref().display(), "configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.features.validate()?;
        self.indicators.validate()?;
        self.risk.validate()?;
        self.regime.validate()?;
        self.signals.validate()?;
        Ok(())
    }
}
