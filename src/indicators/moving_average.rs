//! Simple and exponential moving averages
//!
//! All series are aligned with their input: index `i` of the output belongs to
//! index `i` of the input, with `None` until the window is filled.

/// Simple moving average over a trailing window
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = Some(sum / period as f64);
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out[i] = Some(sum / period as f64);
    }
    out
}

/// Exponential moving average, seeded with the SMA of the first `period` values
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut current = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(current);

    for i in period..values.len() {
        current = values[i] * alpha + current * (1.0 - alpha);
        out[i] = Some(current);
    }
    out
}

/// EMA of a series whose leading entries are undefined.
///
/// The undefined prefix is skipped and the EMA is seeded on the first
/// `period` defined values. A gap after the prefix ends the series.
pub fn ema_of_defined(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    let Some(start) = values.iter().position(Option::is_some) else {
        return out;
    };

    let defined: Vec<f64> = values[start..].iter().map_while(|v| *v).collect();
    for (offset, value) in ema(&defined, period).into_iter().enumerate() {
        out[start + offset] = value;
    }
    out
}
