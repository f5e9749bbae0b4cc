//! Aggregate regime outputs: occupancy, transitions and per-regime stats

use super::gaussian::CovarianceKind;
use super::model::RegimeModel;
use super::{RegimeLabel, RegimePrediction};
use crate::features::{FeatureMatrix, RETURN_COL, VOLATILITY_COL};
use crate::stats::mean;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// 4x4 row-stochastic matrix in [`RegimeLabel::ALL`] order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionMatrix {
    pub labels: [RegimeLabel; 4],
    pub matrix: [[f64; 4]; 4],
}

impl TransitionMatrix {
    pub fn new(matrix: [[f64; 4]; 4]) -> Self {
        Self {
            labels: RegimeLabel::ALL,
            matrix,
        }
    }

    /// Row-normalized counts of consecutive label pairs; empty rows are identity
    pub fn from_observed(labels: &[RegimeLabel]) -> Self {
        let mut counts = [[0.0; 4]; 4];
        for pair in labels.windows(2) {
            counts[pair[0].index()][pair[1].index()] += 1.0;
        }
        for (i, row) in counts.iter_mut().enumerate() {
            let total: f64 = row.iter().sum();
            if total > 0.0 {
                row.iter_mut().for_each(|c| *c /= total);
            } else {
                row[i] = 1.0;
            }
        }
        Self::new(counts)
    }

    pub fn get(&self, from: RegimeLabel, to: RegimeLabel) -> f64 {
        self.matrix[from.index()][to.index()]
    }

    pub fn is_row_stochastic(&self, tol: f64) -> bool {
        self.matrix.iter().all(|row| {
            row.iter().all(|p| (0.0..=1.0 + tol).contains(p))
                && (row.iter().sum::<f64>() - 1.0).abs() <= tol
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Occupancy {
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeStats {
    pub regime: RegimeLabel,
    pub color: String,
    pub mean_return: Option<f64>,
    pub mean_volatility: Option<f64>,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeTransition {
    pub from: RegimeLabel,
    pub to: RegimeLabel,
    pub timestamp: DateTime<Utc>,
    /// How long the regime that ended had lasted
    pub duration_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub version: Uuid,
    pub fitted_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub training_rows: usize,
    pub covariance: CovarianceKind,
    pub stale: bool,
}

/// Occupancy of the rows the model was fitted on, kept apart from the
/// out-of-sample aggregates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InSampleSummary {
    pub rows: usize,
    pub distribution: BTreeMap<RegimeLabel, Occupancy>,
}

/// `distribution`, `states`, `transitions` and `observed_transitions` cover
/// out-of-sample rows only; `predictions` lists every row with its flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeReport {
    pub predictions: Vec<RegimePrediction>,
    pub distribution: BTreeMap<RegimeLabel, Occupancy>,
    pub current_regime: Option<RegimePrediction>,
    pub transition_matrix: TransitionMatrix,
    pub observed_transitions: TransitionMatrix,
    pub states: Vec<RegimeStats>,
    pub transitions: Vec<RegimeTransition>,
    pub in_sample: InSampleSummary,
    pub model: ModelInfo,
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

fn occupancy(predictions: &[&RegimePrediction]) -> BTreeMap<RegimeLabel, Occupancy> {
    RegimeLabel::ALL
        .into_iter()
        .map(|regime| {
            let count = predictions.iter().filter(|p| p.regime == regime).count();
            (
                regime,
                Occupancy {
                    count,
                    percentage: percentage(count, predictions.len()),
                },
            )
        })
        .collect()
}

impl RegimeReport {
    /// `predictions` must be aligned row for row with `features`
    pub fn build(
        predictions: Vec<RegimePrediction>,
        features: &FeatureMatrix,
        model: &RegimeModel,
        now: DateTime<Utc>,
    ) -> Self {
        let (fitted, fresh): (Vec<usize>, Vec<usize>) =
            (0..predictions.len()).partition(|t| predictions[*t].in_sample);
        let out_of_sample: Vec<&RegimePrediction> = fresh.iter().map(|t| &predictions[*t]).collect();
        let labels: Vec<RegimeLabel> = out_of_sample.iter().map(|p| p.regime).collect();

        let returns = features.column(RETURN_COL);
        let vols = features.column(VOLATILITY_COL);

        let distribution = occupancy(&out_of_sample);
        let states = RegimeLabel::ALL
            .into_iter()
            .map(|regime| {
                let rows: Vec<usize> = fresh
                    .iter()
                    .copied()
                    .filter(|t| predictions[*t].regime == regime)
                    .collect();
                let pick = |col: &[f64]| -> Option<f64> {
                    let values: Vec<f64> = rows.iter().filter_map(|t| col.get(*t).copied()).collect();
                    (!values.is_empty()).then(|| mean(&values))
                };
                RegimeStats {
                    regime,
                    color: regime.color().to_string(),
                    mean_return: pick(&returns),
                    mean_volatility: pick(&vols),
                    count: rows.len(),
                    percentage: percentage(rows.len(), fresh.len()),
                }
            })
            .collect();

        let mut transitions = Vec::new();
        let mut run_start = out_of_sample.first().map(|p| p.timestamp);
        for pair in out_of_sample.windows(2) {
            if pair[0].regime != pair[1].regime {
                let started = run_start.unwrap_or(pair[0].timestamp);
                transitions.push(RegimeTransition {
                    from: pair[0].regime,
                    to: pair[1].regime,
                    timestamp: pair[1].timestamp,
                    duration_hours: (pair[1].timestamp - started).num_seconds() as f64 / 3600.0,
                });
                run_start = Some(pair[1].timestamp);
            }
        }

        let in_sample_rows: Vec<&RegimePrediction> = fitted.iter().map(|t| &predictions[*t]).collect();
        let in_sample = InSampleSummary {
            rows: in_sample_rows.len(),
            distribution: occupancy(&in_sample_rows),
        };

        Self {
            current_regime: predictions.last().cloned(),
            transition_matrix: model.transition_matrix(),
            observed_transitions: TransitionMatrix::from_observed(&labels),
            distribution,
            states,
            transitions,
            in_sample,
            model: ModelInfo {
                version: model.version,
                fitted_at: model.fitted_at,
                valid_until: model.valid_until,
                training_rows: model.training_rows,
                covariance: model.covariance,
                stale: model.is_stale(now),
            },
            predictions,
        }
    }
}
