//! End-to-end tests across the pipeline

#[cfg(test)]
mod tests {
    use crate::analysis::analyze;
    use crate::config::Config;
    use crate::error::AnalyticsError;
    use crate::regime::{CovarianceKind, RegimeLabel};
    use crate::signals::OnChainInputs;
    use crate::types::Candle;
    use chrono::{Duration, TimeZone, Utc};
    use std::io::Write;

    fn candles(n: usize) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        let mut close = 60_000.0;
        (0..n)
            .map(|i| {
                let open = close;
                if i > 0 {
                    close *= 1.0015 + 0.0003 * (i as f64 * 1.3).sin();
                }
                Candle {
                    timestamp: start + Duration::hours(i as i64),
                    open,
                    high: open.max(close) * 1.0008,
                    low: open.min(close) * 0.9992,
                    close,
                    volume: 250.0 + 25.0 * (i as f64 * 0.7).sin(),
                }
            })
            .collect()
    }

    fn config_file(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "{body}").unwrap();
        file
    }

    fn test_config() -> Config {
        let file = config_file(
            r#"
[regime]
gmm_max_iter = 1000
hmm_max_iter = 3000
hmm_tol = 0.05
training_lookback_days = 30
"#,
        );
        Config::load(file.path()).unwrap()
    }

    #[test]
    fn test_candles_from_json_through_pipeline() {
        let json = serde_json::to_string(&candles(160)).unwrap();
        let parsed: Vec<Candle> = serde_json::from_str(&json).unwrap();

        let analysis = analyze(
            &parsed,
            &OnChainInputs::new(Some(0.0002), Some(1.2e12)),
            &test_config(),
            None,
        )
        .unwrap();

        assert_eq!(analysis.candles, 160);
        assert_eq!(
            analysis.regime.current_regime.as_ref().map(|p| p.regime),
            Some(RegimeLabel::Bull)
        );
        assert!(analysis.signal.degraded.is_empty());
        assert_eq!(analysis.signal.factors.len(), 4);
        assert!((-100..=100).contains(&analysis.signal.composite_score));
    }

    #[test]
    fn test_output_json_contract() {
        let analysis = analyze(
            &candles(160),
            &OnChainInputs::unavailable(),
            &test_config(),
            None,
        )
        .unwrap();
        let json = serde_json::to_value(&analysis).unwrap();

        let row = &json["indicators"][0];
        for key in [
            "timestamp",
            "rsi",
            "macd",
            "macd_signal",
            "macd_histogram",
            "bb_upper",
            "bb_middle",
            "bb_lower",
            "sma_20",
            "sma_50",
            "kama",
            "kama_signal",
        ] {
            assert!(row.get(key).is_some(), "indicator row missing {key}");
        }
        assert!(row["rsi"].is_null());
        assert!(json["indicators"][159]["macd"].is_number());

        for key in [
            "var_95",
            "var_99",
            "sharpe_ratio",
            "sortino_ratio",
            "max_drawdown",
            "max_drawdown_date",
            "volatility",
            "mean_return",
        ] {
            assert!(json["risk"].get(key).is_some(), "risk missing {key}");
        }

        let regime = &json["regime"];
        assert!(regime["distribution"]["bull"]["count"].is_number());
        assert!(regime["distribution"]["bull"]["percentage"].is_number());
        assert!(regime["current_regime"]["probability"].is_number());
        assert!(regime["transition_matrix"]["matrix"].is_array());
        let step = &regime["predictions"][0];
        for key in ["regime", "probability", "confidence"] {
            assert!(step.get(key).is_some(), "prediction missing {key}");
        }

        let signal = &json["signal"];
        for key in [
            "recommendation",
            "confidence",
            "composite_score",
            "regime",
            "kama",
            "onchain",
            "factors",
        ] {
            assert!(signal.get(key).is_some(), "signal missing {key}");
        }
        assert_eq!(json["interval"], "1h");
    }

    #[test]
    fn test_diagonal_covariance_from_config() {
        let file = config_file(
            r#"
interval = "4h"

[regime]
covariance = "diagonal"
n_components = 3
gmm_max_iter = 1000
hmm_max_iter = 3000
hmm_tol = 0.05
training_lookback_days = 60
"#,
        );
        let config = Config::load(file.path()).unwrap();
        let analysis = analyze(&candles(160), &OnChainInputs::unavailable(), &config, None).unwrap();

        assert_eq!(analysis.regime.model.covariance, CovarianceKind::Diagonal);
        assert_eq!(analysis.interval.as_str(), "4h");
        assert_eq!(analysis.risk.periods_per_year, 6.0 * 365.0);
    }

    #[test]
    fn test_short_series_is_a_client_error() {
        let err = analyze(
            &candles(25),
            &OnChainInputs::unavailable(),
            &Config::default(),
            None,
        )
        .unwrap_err();
        assert!(err.is_client_error());
        assert!(err.to_string().contains("MACD"));
    }

    #[test]
    fn test_unordered_candles_rejected() {
        let mut series = candles(60);
        series.swap(10, 11);
        let err = analyze(&series, &OnChainInputs::unavailable(), &Config::default(), None)
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidParameter(_)));
    }
}
