//! Mapping raw mixture/HMM components to semantic regimes

use super::{RegimeConfig, RegimeLabel};
use crate::features::{Scaler, RETURN_COL, VOLATILITY_COL};
use crate::stats::quantile;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// Component centre in raw feature units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentStats {
    pub mean_return: f64,
    pub mean_volatility: f64,
}

impl ComponentStats {
    /// Undo the scaling of a component mean fitted in standardized space
    pub fn from_scaled_mean(scaler: &Scaler, mean: &ndarray::Array1<f64>) -> Self {
        let raw = scaler.inverse(mean);
        Self {
            mean_return: raw[RETURN_COL],
            mean_volatility: raw[VOLATILITY_COL],
        }
    }
}

/// Regime label for each component index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelMap {
    pub labels: Vec<RegimeLabel>,
    pub stats: Vec<ComponentStats>,
}

impl LabelMap {
    pub fn build(stats: Vec<ComponentStats>, train_vol_median: f64, config: &RegimeConfig) -> Self {
        Self {
            labels: assign_labels(&stats, train_vol_median, config),
            stats,
        }
    }

    /// Sum component probabilities into regime space, indexed by [`RegimeLabel::index`]
    pub fn aggregate(&self, probs: ArrayView1<f64>) -> [f64; 4] {
        let mut out = [0.0; 4];
        for (label, p) in self.labels.iter().zip(probs.iter()) {
            out[label.index()] += p;
        }
        out
    }

    /// Component indices mapped to `label`
    pub fn components_of(&self, label: RegimeLabel) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == label)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Rank components on (volatility, return):
/// - the single most volatile component is HighVolatility when its volatility
///   is above the configured quantile of component volatilities and above
///   `high_vol_ratio` times the median training volatility
/// - every other component is Bull, Bear or Sideways by its mean return
pub fn assign_labels(
    stats: &[ComponentStats],
    train_vol_median: f64,
    config: &RegimeConfig,
) -> Vec<RegimeLabel> {
    let vols: Vec<f64> = stats.iter().map(|s| s.mean_volatility).collect();
    let vol_cut = quantile(&vols, config.high_vol_quantile);

    let high_vol = stats
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.mean_volatility.total_cmp(&b.1.mean_volatility))
        .filter(|(_, s)| {
            s.mean_volatility > vol_cut
                && s.mean_volatility > config.high_vol_ratio * train_vol_median
        })
        .map(|(i, _)| i);

    stats
        .iter()
        .enumerate()
        .map(|(i, s)| {
            if Some(i) == high_vol {
                RegimeLabel::HighVolatility
            } else if s.mean_return > config.sideways_return_band {
                RegimeLabel::Bull
            } else if s.mean_return < -config.sideways_return_band {
                RegimeLabel::Bear
            } else {
                RegimeLabel::Sideways
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};
    use quickcheck_macros::quickcheck;

    fn stats(pairs: &[(f64, f64)]) -> Vec<ComponentStats> {
        pairs
            .iter()
            .map(|&(mean_return, mean_volatility)| ComponentStats {
                mean_return,
                mean_volatility,
            })
            .collect()
    }

    #[test]
    fn test_fixed_mapping() {
        let config = RegimeConfig::default();
        let components = stats(&[
            (0.002, 0.010),
            (-0.003, 0.012),
            (0.0001, 0.006),
            (-0.001, 0.040),
        ]);
        let labels = assign_labels(&components, 0.011, &config);
        assert_eq!(
            labels,
            vec![
                RegimeLabel::Bull,
                RegimeLabel::Bear,
                RegimeLabel::Sideways,
                RegimeLabel::HighVolatility
            ]
        );
    }

    #[test]
    fn test_two_volatile_components_with_opposite_returns() {
        let config = RegimeConfig::default();
        // both sit above the volatility quantile, only the most volatile is HighVolatility
        let components = stats(&[
            (0.004, 0.050),
            (-0.004, 0.048),
            (0.0, 0.008),
            (0.0, 0.009),
        ]);
        let labels = assign_labels(&components, 0.01, &config);
        assert_eq!(labels[0], RegimeLabel::HighVolatility);
        assert_eq!(labels[1], RegimeLabel::Bear);
        assert_eq!(labels[2], RegimeLabel::Sideways);
    }

    #[test]
    fn test_homogeneous_volatility_has_no_high_vol_regime() {
        let config = RegimeConfig::default();
        let components = stats(&[
            (0.001, 0.0100),
            (0.001, 0.0101),
            (0.001, 0.0102),
            (0.001, 0.0104),
        ]);
        let labels = assign_labels(&components, 0.0101, &config);
        assert!(labels.iter().all(|l| *l == RegimeLabel::Bull));
    }

    #[test]
    fn test_aggregate_sums_into_regime_space() {
        let config = RegimeConfig::default();
        let map = LabelMap::build(
            stats(&[(0.002, 0.01), (0.003, 0.01), (-0.002, 0.01)]),
            0.01,
            &config,
        );
        let agg = map.aggregate(array![0.2, 0.5, 0.3].view());
        assert!((agg[RegimeLabel::Bull.index()] - 0.7).abs() < 1e-12);
        assert!((agg[RegimeLabel::Bear.index()] - 0.3).abs() < 1e-12);
        assert_eq!(agg[RegimeLabel::Sideways.index()], 0.0);
        assert_eq!(map.components_of(RegimeLabel::Bull), vec![0, 1]);
    }

    #[quickcheck]
    fn prop_aggregate_preserves_mass(raw: Vec<u16>, returns: Vec<i8>) -> bool {
        if raw.is_empty() {
            return true;
        }
        let total: f64 = raw.iter().map(|&w| w as f64 + 1.0).sum();
        let probs = Array1::from_iter(raw.iter().map(|&w| (w as f64 + 1.0) / total));
        let components: Vec<ComponentStats> = (0..raw.len())
            .map(|i| ComponentStats {
                mean_return: returns.get(i).copied().unwrap_or(0) as f64 * 1e-4,
                mean_volatility: 0.01 + i as f64 * 1e-3,
            })
            .collect();
        let map = LabelMap::build(components, 0.01, &RegimeConfig::default());
        let agg = map.aggregate(probs.view());
        (agg.iter().sum::<f64>() - 1.0).abs() < 1e-9 && agg.iter().all(|p| *p >= 0.0)
    }
}
