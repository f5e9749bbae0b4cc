//! Last-good model holder with bounded background retraining

use super::{RegimeClassifier, RegimeConfig, RegimeModel};
use crate::error::{AnalyticsError, Result};
use crate::features::FeatureMatrix;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Model handed to inference, with its staleness
#[derive(Debug, Clone)]
pub struct ServingModel {
    pub model: Arc<RegimeModel>,
    pub stale: bool,
    /// Error of the most recent failed retrain, if any
    pub last_failure: Option<AnalyticsError>,
}

/// Holds the current model; replaced wholesale, never mutated in place
pub struct ModelStore {
    config: RegimeConfig,
    current: RwLock<Option<Arc<RegimeModel>>>,
    last_failure: RwLock<Option<AnalyticsError>>,
}

impl ModelStore {
    pub fn new(config: RegimeConfig) -> Self {
        Self {
            config,
            current: RwLock::new(None),
            last_failure: RwLock::new(None),
        }
    }

    pub fn current(&self, now: DateTime<Utc>) -> Option<ServingModel> {
        let model = self.current.read().clone()?;
        let stale = model.is_stale(now);
        if stale {
            warn!(version = %model.version, valid_until = %model.valid_until, "serving stale regime model");
        }
        Some(ServingModel {
            model,
            stale,
            last_failure: self.last_failure.read().clone(),
        })
    }

    pub fn install(&self, model: RegimeModel) -> Arc<RegimeModel> {
        let model = Arc::new(model);
        *self.current.write() = Some(Arc::clone(&model));
        *self.last_failure.write() = None;
        model
    }

    pub fn should_retrain(&self, now: DateTime<Utc>) -> bool {
        match self.current.read().as_ref() {
            Some(model) => model.is_stale(now),
            None => true,
        }
    }

    /// Fit on a blocking thread under `limit`.
    ///
    /// On failure or timeout the previous model keeps serving and the error
    /// is recorded; on success the new model is swapped in.
    pub async fn retrain(&self, features: FeatureMatrix, limit: Duration) -> Result<Arc<RegimeModel>> {
        let config = self.config.clone();
        let task = tokio::task::spawn_blocking(move || RegimeClassifier::new(config).train(&features));

        let outcome = match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(AnalyticsError::convergence(
                "regime model",
                format!("training task aborted: {join_err}"),
            )),
            Err(_) => Err(AnalyticsError::Timeout {
                secs: limit.as_secs(),
            }),
        };

        match outcome {
            Ok(model) => {
                let model = self.install(model);
                info!(version = %model.version, "regime model swapped in");
                Ok(model)
            }
            Err(e) => {
                warn!(error = %e, "regime retrain failed, keeping last-good model");
                *self.last_failure.write() = Some(e.clone());
                Err(e)
            }
        }
    }
}
