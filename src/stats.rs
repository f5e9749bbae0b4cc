//! Descriptive statistics over plain `f64` slices
//!
//! Moments come from `statrs`; quantiles interpolate linearly between
//! closest ranks, matching numpy's default percentile.

use statrs::statistics::Statistics;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().mean()
}

/// Standard deviation with divisor `n`
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().population_std_dev()
}

/// Standard deviation with divisor `n - 1`
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.iter().std_dev()
}

/// Percentile with linear interpolation between closest ranks, `q` in [0, 1]
pub fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    quantile_sorted(&sorted, q)
}

pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

pub fn median(values: &[f64]) -> f64 {
    quantile(values, 0.5)
}

/// Biased sample skewness (third standardized moment)
pub fn skewness(values: &[f64]) -> f64 {
    let sd = population_std(values);
    if sd == 0.0 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| ((v - m) / sd).powi(3)).sum::<f64>() / values.len() as f64
}

/// Biased excess kurtosis (fourth standardized moment minus 3)
pub fn excess_kurtosis(values: &[f64]) -> f64 {
    let sd = population_std(values);
    if sd == 0.0 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| ((v - m) / sd).powi(4)).sum::<f64>() / values.len() as f64 - 3.0
}
