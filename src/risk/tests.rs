//! Risk calculator tests

use super::*;
use chrono::{Duration, TimeZone};
use quickcheck_macros::quickcheck;

fn points(values: &[f64]) -> Vec<ReturnPoint> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    values
        .iter()
        .enumerate()
        .map(|(i, &value)| ReturnPoint {
            timestamp: start + Duration::hours(i as i64),
            value,
        })
        .collect()
}

fn repeated_pattern(n: usize) -> Vec<f64> {
    let pattern = [0.01, -0.02, 0.015, -0.01, 0.005];
    (0..n).map(|i| pattern[i % pattern.len()]).collect()
}

/// Same pattern with a small positive drift so the mean is non-zero
fn drifting_pattern(n: usize) -> Vec<f64> {
    repeated_pattern(n).into_iter().map(|v| v + 0.001).collect()
}

#[test]
fn test_repeated_pattern_var() {
    let values = repeated_pattern(300);
    let snapshot = compute_risk(&points(&values), &[0.95, 0.99], Interval::OneHour).unwrap();

    let expected = crate::stats::quantile(&values, 0.05) * 100.0;
    assert!((snapshot.var_95 - expected).abs() < 1e-12);
    assert!((snapshot.var_95 - -2.0).abs() < 1e-9);
    assert!(snapshot.var_99 <= snapshot.var_95);
    // nothing lies strictly below the minimum, ES falls back to VaR
    assert!((snapshot.es_95 - snapshot.var_95).abs() < 1e-12);
    assert_eq!(snapshot.observations, 300);
    assert_eq!(snapshot.levels.len(), 2);
    assert!(snapshot.modified_var_95.is_some());
}

#[test]
fn test_too_few_returns() {
    let err = compute_risk(&points(&[0.01]), &[0.95], Interval::OneHour).unwrap_err();
    assert!(matches!(
        err,
        AnalyticsError::InsufficientData {
            required: 2,
            actual: 1,
            ..
        }
    ));
}

#[test]
fn test_invalid_confidence_level() {
    let err = compute_risk(&points(&repeated_pattern(10)), &[1.5], Interval::OneHour).unwrap_err();
    assert!(matches!(err, AnalyticsError::InvalidParameter(_)));
    assert!(compute_risk(&points(&repeated_pattern(10)), &[0.0], Interval::OneHour).is_err());
}

#[test]
fn test_zero_variance_flagged() {
    let snapshot = compute_risk(&points(&[0.001; 50]), &[0.95], Interval::OneDay).unwrap();
    assert!(snapshot.zero_variance);
    assert_eq!(snapshot.sharpe_ratio, 0.0);
    assert_eq!(snapshot.sortino_ratio, 0.0);
    assert_eq!(snapshot.max_drawdown, 0.0);
    assert!(snapshot.max_drawdown_date.is_none());
}

#[test]
fn test_sharpe_annualization() {
    let values = drifting_pattern(100);
    let hourly = compute_risk(&points(&values), &[0.95], Interval::OneHour).unwrap();
    let daily = compute_risk(&points(&values), &[0.95], Interval::OneDay).unwrap();
    let ratio = hourly.sharpe_ratio / daily.sharpe_ratio;
    assert!((ratio - 24.0_f64.sqrt()).abs() < 1e-9);
    assert!(!hourly.zero_variance);
}

#[test]
fn test_max_drawdown_and_date() {
    // +10%, -20%, -10%, +50%: trough after the third return
    let pts = points(&[0.10, -0.20, -0.10, 0.50]);
    let snapshot = compute_risk(&pts, &[0.95], Interval::OneDay).unwrap();
    // peak 1.1, trough 1.1 * 0.8 * 0.9 = 0.792
    let expected = (1.1 - 0.792) / 1.1 * 100.0;
    assert!((snapshot.max_drawdown - expected).abs() < 1e-9);
    assert_eq!(snapshot.max_drawdown_date, Some(pts[2].timestamp));
}

#[test]
fn test_sortino_uses_downside_only() {
    let values = drifting_pattern(100);
    let snapshot = compute_risk(&points(&values), &[0.95], Interval::OneHour).unwrap();
    let downside: Vec<f64> = values.iter().copied().filter(|v| *v < 0.0).collect();
    let expected = mean(&values) / sample_std(&downside) * 8760.0_f64.sqrt();
    assert!((snapshot.sortino_ratio - expected).abs() < 1e-9);
}

#[test]
fn test_parametric_var_normal_quantile() {
    let values = drifting_pattern(100);
    let snapshot = compute_risk(&points(&values), &[0.95], Interval::OneHour).unwrap();
    let expected = (mean(&values) - 1.644_853_626_951 * sample_std(&values)) * 100.0;
    assert!((snapshot.parametric_var_95 - expected).abs() < 1e-6);
    assert!(snapshot.parametric_var_99 < snapshot.parametric_var_95);
}

#[test]
fn test_modified_var_needs_thirty_observations() {
    let snapshot = compute_risk(&points(&repeated_pattern(20)), &[0.95], Interval::OneHour).unwrap();
    assert!(snapshot.modified_var_95.is_none());
    assert!(snapshot.modified_var_99.is_none());
}

#[test]
fn test_returns_from_candles() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let candles = vec![
        Candle::flat(start, 100.0, 1.0),
        Candle::flat(start + Duration::hours(1), 110.0, 1.0),
        Candle::flat(start + Duration::hours(2), 99.0, 1.0),
    ];
    let rets = returns_from_candles(&candles);
    assert_eq!(rets.len(), 2);
    assert!((rets[0].value - 0.1).abs() < 1e-12);
    assert!((rets[1].value + 0.1).abs() < 1e-12);
    assert_eq!(rets[1].timestamp, candles[2].timestamp);
}

#[test]
fn test_rolling_risk() {
    let values = repeated_pattern(40);
    let calc = RiskCalculator::new(RiskConfig {
        rolling_window: 10,
        ..Default::default()
    })
    .with_interval(Interval::OneDay);
    let rolling = calc.rolling(&points(&values)).unwrap();
    assert_eq!(rolling.len(), 40);
    assert!(rolling[8].var_95.is_none());
    assert!(rolling[9].var_95.is_some());
    assert!(rolling[39].volatility.unwrap() > 0.0);

    let short = calc.rolling(&points(&values[..5]));
    assert!(matches!(short, Err(AnalyticsError::InsufficientData { .. })));
}

#[quickcheck]
fn prop_var_99_not_above_var_95(raw: Vec<i16>) -> bool {
    let values: Vec<f64> = raw.iter().map(|v| *v as f64 / 100_000.0).collect();
    match compute_risk(&points(&values), &[0.95, 0.99], Interval::OneHour) {
        Ok(snapshot) => snapshot.var_99 <= snapshot.var_95 && snapshot.es_99 <= snapshot.var_95,
        Err(_) => values.len() < 2,
    }
}
