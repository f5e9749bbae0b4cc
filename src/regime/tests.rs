//! Regime classifier scenario tests

use super::*;
use chrono::TimeZone;
use std::time::Duration as StdDuration;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
}

/// Candles whose close at `i` is the previous close times `growth(i)`
fn compounding_candles(n: usize, growth: impl Fn(usize) -> f64) -> Vec<Candle> {
    let mut close = 100.0;
    (0..n)
        .map(|i| {
            let open = close;
            if i > 0 {
                close *= growth(i);
            }
            Candle {
                timestamp: start() + Duration::hours(i as i64),
                open,
                high: open.max(close) * 1.0005,
                low: open.min(close) * 0.9995,
                close,
                volume: 1000.0 + 200.0 * (i as f64 * 0.5).sin(),
            }
        })
        .collect()
}

fn uptrend(n: usize) -> Vec<Candle> {
    compounding_candles(n, |i| 1.001 + 0.0002 * (i as f64).sin())
}

fn up_then_down(n: usize) -> Vec<Candle> {
    compounding_candles(n, |i| {
        let noise = 0.0005 * (i as f64 * 1.7).sin();
        if i < n / 2 {
            1.003 + noise
        } else {
            0.997 + noise
        }
    })
}

fn test_config() -> RegimeConfig {
    RegimeConfig {
        gmm_max_iter: 1000,
        hmm_max_iter: 3000,
        hmm_tol: 0.05,
        training_lookback_days: None,
        ..Default::default()
    }
}

fn features(candles: &[Candle]) -> FeatureMatrix {
    FeatureMatrix::from_candles(candles, &FeatureConfig::default()).unwrap()
}

fn trained(candles: &[Candle]) -> (FeatureMatrix, RegimeModel) {
    let fm = features(candles);
    let model = RegimeClassifier::new(test_config())
        .train_at(&fm, start())
        .unwrap();
    (fm, model)
}

#[test]
fn test_uptrend_is_bull() {
    let (fm, model) = trained(&uptrend(100));
    let predictions = predict(&fm, &model).unwrap();
    assert_eq!(predictions.len(), fm.n_samples());

    let last_20 = &predictions[predictions.len() - 20..];
    let bull = last_20
        .iter()
        .filter(|p| p.regime == RegimeLabel::Bull && p.probability > 0.5)
        .count();
    assert!(bull > 10, "only {bull} of the last 20 rows are Bull");
}

#[test]
fn test_up_then_down_phases() {
    let candles = up_then_down(160);
    let (fm, model) = trained(&candles);
    let predictions = model.predict(&fm).unwrap();

    let at = |ts: DateTime<Utc>| predictions.iter().find(|p| p.timestamp == ts).unwrap();
    assert_eq!(at(candles[70].timestamp).regime, RegimeLabel::Bull);
    assert_eq!(at(candles[159].timestamp).regime, RegimeLabel::Bear);
}

#[test]
fn test_probabilities_normalized() {
    let (fm, model) = trained(&up_then_down(160));
    for p in model.predict(&fm).unwrap() {
        assert!((p.probabilities.sum() - 1.0).abs() < 1e-6);
        for label in RegimeLabel::ALL {
            let v = p.probabilities.get(label);
            assert!((0.0..=1.0).contains(&v));
        }
        assert_eq!(p.probabilities.get(p.regime), p.probability);
    }
}

#[test]
fn test_prediction_ignores_future_rows() {
    let (fm, model) = trained(&up_then_down(160));
    let baseline = model.predict(&fm).unwrap();

    let t = 60;
    let mut altered = fm.clone();
    for row in t + 1..altered.n_samples() {
        for col in 0..altered.n_features() {
            altered.data[[row, col]] *= -3.0;
        }
    }
    let changed = model.predict(&altered).unwrap();
    assert_eq!(&baseline[..=t], &changed[..=t]);
}

#[test]
fn test_transition_matrices_row_stochastic() {
    let candles = up_then_down(160);
    let (_, model) = trained(&candles);
    assert!(model.transition_matrix().is_row_stochastic(1e-6));

    let report = RegimeClassifier::new(test_config())
        .classify_at(&candles, &model, start())
        .unwrap();
    assert!(report.transition_matrix.is_row_stochastic(1e-6));
    assert!(report.observed_transitions.is_row_stochastic(1e-6));
}

#[test]
fn test_report_aggregates_out_of_sample_rows() {
    let candles = uptrend(140);
    let fm = features(&candles);
    let classifier = RegimeClassifier::new(test_config());
    let model = classifier
        .train_at(&classifier.without_holdout(&fm), start())
        .unwrap();
    let report = classifier.classify_at(&candles, &model, start()).unwrap();

    let holdout = test_config().holdout_rows;
    assert_eq!(report.predictions.len(), fm.n_samples());
    assert_eq!(report.in_sample.rows, fm.n_samples() - holdout);
    assert_eq!(report.model.training_rows, fm.n_samples() - holdout);

    assert_eq!(report.distribution.len(), 4);
    let counted: usize = report.distribution.values().map(|o| o.count).sum();
    assert_eq!(counted, holdout);
    let pct: f64 = report.distribution.values().map(|o| o.percentage).sum();
    assert!((pct - 100.0).abs() < 1e-9);
    let fitted: usize = report.in_sample.distribution.values().map(|o| o.count).sum();
    assert_eq!(fitted, fm.n_samples() - holdout);

    assert_eq!(report.states.len(), 4);
    assert_eq!(report.states.iter().map(|s| s.count).sum::<usize>(), holdout);
    let training_end = model.training_end.unwrap();
    assert!(report.transitions.iter().all(|t| t.timestamp > training_end));
    assert_eq!(
        report.current_regime.as_ref().map(|p| p.timestamp),
        fm.timestamps.last().copied()
    );
    assert!(!report.current_regime.unwrap().in_sample);
    assert!(!report.model.stale);
}

#[test]
fn test_report_excludes_training_rows() {
    let candles = uptrend(100);
    let (fm, model) = trained(&candles);
    let report = RegimeClassifier::new(test_config())
        .classify_at(&candles, &model, start())
        .unwrap();

    assert!(report.predictions.iter().all(|p| p.in_sample));
    assert_eq!(report.in_sample.rows, fm.n_samples());
    assert!(report.distribution.values().all(|o| o.count == 0 && o.percentage == 0.0));
    assert!(report.states.iter().all(|s| s.mean_return.is_none()));
    assert!(report.transitions.is_empty());
    for label in RegimeLabel::ALL {
        assert_eq!(report.observed_transitions.get(label, label), 1.0);
    }
}

#[test]
fn test_without_holdout() {
    let fm = features(&uptrend(100));
    let classifier = RegimeClassifier::new(RegimeConfig {
        holdout_rows: 30,
        ..test_config()
    });
    let training = classifier.without_holdout(&fm);
    assert_eq!(training.n_samples(), 50);
    assert_eq!(training.timestamps[..], fm.timestamps[..50]);
    assert_eq!(classifier.without_holdout(&fm.head(20)).n_samples(), 0);
}

#[test]
fn test_out_of_sample_rows_flagged() {
    let candles = uptrend(140);
    let fm = features(&candles);
    let train_rows = fm.n_samples() - 40;
    let training = FeatureMatrix {
        data: fm.data.slice(ndarray::s![..train_rows, ..]).to_owned(),
        timestamps: fm.timestamps[..train_rows].to_vec(),
    };
    let model = RegimeClassifier::new(test_config())
        .train_at(&training, start())
        .unwrap();
    assert_eq!(model.training_end, training.timestamps.last().copied());

    let fresh = fm.after(model.training_end.unwrap());
    assert_eq!(fresh.n_samples(), 40);
    let predictions = model.predict(&fresh).unwrap();
    assert!(predictions.iter().all(|p| !p.in_sample));
}

#[test]
fn test_stale_model() {
    let (_, model) = trained(&uptrend(100));
    assert!(!model.is_stale(start() + Duration::hours(23)));
    assert!(model.is_stale(start() + Duration::hours(25)));
}

#[test]
fn test_training_is_deterministic() {
    let fm = features(&up_then_down(160));
    let classifier = RegimeClassifier::new(test_config());
    let a = classifier.train_at(&fm, start()).unwrap();
    let b = classifier.train_at(&fm, start()).unwrap();
    assert_eq!(a.gmm, b.gmm);
    assert_eq!(a.hmm, b.hmm);
    assert_ne!(a.version, b.version);
}

#[test]
fn test_training_lookback_window() {
    let fm = features(&uptrend(200));
    let config = RegimeConfig {
        training_lookback_days: Some(3),
        min_train_rows: 20,
        ..test_config()
    };
    let model = RegimeClassifier::new(config).train_at(&fm, start()).unwrap();
    // strictly after last - 72h
    assert_eq!(model.training_rows, 72);
}

#[test]
fn test_full_covariance_falls_back_to_diagonal() {
    // a feature that is an exact multiple of another makes every full
    // covariance singular without regularization
    let mut fm = features(&up_then_down(160));
    let returns = fm.data.column(0).to_owned();
    fm.data.column_mut(2).assign(&(&returns * 3.0));

    let config = RegimeConfig {
        reg_covar: 0.0,
        ..test_config()
    };
    let model = RegimeClassifier::new(config).train_at(&fm, start()).unwrap();
    assert_eq!(model.covariance, CovarianceKind::Diagonal);
    assert_eq!(model.gmm.covariance, CovarianceKind::Diagonal);
}

#[test]
fn test_diagonal_failure_is_reported() {
    let fm = features(&uptrend(100));
    let diagonal = RegimeConfig {
        covariance: CovarianceKind::Diagonal,
        gmm_max_iter: 1,
        ..test_config()
    };
    let err = RegimeClassifier::new(diagonal)
        .train_at(&fm, start())
        .unwrap_err();
    assert!(matches!(err, AnalyticsError::ModelConvergence { .. }));

    // full fails too, and the diagonal retry's error is the one returned
    let full = RegimeConfig {
        gmm_max_iter: 1,
        ..test_config()
    };
    match RegimeClassifier::new(full).train_at(&fm, start()) {
        Err(AnalyticsError::ModelConvergence { model, .. }) => {
            assert_eq!(model, "GMM(diagonal)")
        }
        other => panic!("expected a convergence failure, got {other:?}"),
    }
}

#[test]
fn test_default_config_scenarios() {
    let classifier = RegimeClassifier::new(RegimeConfig::default());

    let fm = features(&uptrend(100));
    let model = classifier.train_at(&fm, start()).unwrap();
    let last = model.predict(&fm).unwrap().pop().unwrap();
    assert_ne!(last.regime, RegimeLabel::Bear);

    let candles = up_then_down(160);
    let fm = features(&candles);
    let model = classifier.train_at(&fm, start()).unwrap();
    let predictions = model.predict(&fm).unwrap();
    let at = |ts: DateTime<Utc>| predictions.iter().find(|p| p.timestamp == ts).unwrap();
    assert_ne!(at(candles[70].timestamp).regime, RegimeLabel::Bear);
    assert_ne!(at(candles[159].timestamp).regime, RegimeLabel::Bull);
}

#[test]
fn test_too_few_training_rows() {
    let fm = features(&uptrend(60));
    let err = RegimeClassifier::new(test_config())
        .train_at(&fm, start())
        .unwrap_err();
    assert!(matches!(
        err,
        AnalyticsError::InsufficientData {
            required: 50,
            actual: 40,
            ..
        }
    ));
}

#[test]
fn test_classify_short_series() {
    let (_, model) = trained(&uptrend(100));
    let err = RegimeClassifier::new(test_config())
        .classify(&uptrend(10), &model)
        .unwrap_err();
    assert!(matches!(err, AnalyticsError::InsufficientData { .. }));
}

#[test]
fn test_invalid_config() {
    let config = RegimeConfig {
        gmm_weight: -0.1,
        ..Default::default()
    };
    assert!(matches!(
        config.validate(),
        Err(AnalyticsError::InvalidParameter(_))
    ));
    let zero = RegimeConfig {
        gmm_weight: 0.0,
        hmm_weight: 0.0,
        ..Default::default()
    };
    assert!(zero.validate().is_err());
    let no_holdout = RegimeConfig {
        holdout_rows: 0,
        ..Default::default()
    };
    assert!(no_holdout.validate().is_err());
    assert!(RegimeConfig::default().validate().is_ok());
}

#[test]
fn test_confidence_thresholds() {
    assert_eq!(Confidence::from_probability(0.71, 0.7, 0.5), Confidence::High);
    assert_eq!(Confidence::from_probability(0.7, 0.7, 0.5), Confidence::Medium);
    assert_eq!(Confidence::from_probability(0.5, 0.7, 0.5), Confidence::Low);
}

#[test]
fn test_label_serialization() {
    assert_eq!(
        serde_json::to_string(&RegimeLabel::HighVolatility).unwrap(),
        "\"high_volatility\""
    );
    let (label, p) = RegimeProbabilities::from_array([0.3, 0.3, 0.2, 0.2]).argmax();
    assert_eq!(label, RegimeLabel::Bull);
    assert_eq!(p, 0.3);
}

#[tokio::test]
async fn test_store_starts_empty() {
    let store = ModelStore::new(test_config());
    assert!(store.current(start()).is_none());
    assert!(store.should_retrain(start()));
}

#[tokio::test]
async fn test_store_retrain_installs_model() {
    let store = ModelStore::new(test_config());
    let model = store
        .retrain(features(&uptrend(100)), StdDuration::from_secs(60))
        .await
        .unwrap();

    let serving = store.current(model.fitted_at).unwrap();
    assert_eq!(serving.model.version, model.version);
    assert!(!serving.stale);
    assert!(serving.last_failure.is_none());
    assert!(!store.should_retrain(model.fitted_at));
    assert!(store.should_retrain(model.valid_until + Duration::seconds(1)));
}

#[tokio::test]
async fn test_store_keeps_last_good_model_on_failure() {
    let store = ModelStore::new(test_config());
    let good = store
        .retrain(features(&uptrend(100)), StdDuration::from_secs(60))
        .await
        .unwrap();

    let err = store
        .retrain(features(&uptrend(40)), StdDuration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(err, AnalyticsError::InsufficientData { .. }));

    let serving = store.current(good.fitted_at).unwrap();
    assert_eq!(serving.model.version, good.version);
    assert_eq!(serving.last_failure, Some(err));
}

#[tokio::test]
async fn test_store_retrain_timeout() {
    let store = ModelStore::new(test_config());
    let err = store
        .retrain(features(&up_then_down(1500)), StdDuration::ZERO)
        .await
        .unwrap_err();
    assert_eq!(err, AnalyticsError::Timeout { secs: 0 });
    assert!(store.current(start()).is_none());
}
