//! BTC Regime Analytics
//!
//! Quantitative analytics over BTC OHLCV candles.
//!
//! ## Architecture
//!
//! ```text
//! Candles → Features → Regime Classifier (GMM + HMM) ─┐
//!        → Indicators (RSI, MACD, BB, KAMA) ──────────┼→ Signal Aggregator → CompositeSignal
//!        → Risk (VaR, ES, Sharpe, Drawdown)   On-chain ┘
//! ```

pub mod analysis;
pub mod config;
pub mod error;
pub mod features;
pub mod indicators;
pub mod regime;
pub mod risk;
pub mod signals;
pub mod stats;
pub mod types;

#[cfg(test)]
mod error_tests;
#[cfg(test)]
mod integration_tests;
