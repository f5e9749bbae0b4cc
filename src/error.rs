//! Error types for the analytics core
//!
//! Every computation returns [`Result`]. Callers at the transport layer can use
//! [`AnalyticsError::is_client_error`] to split caller mistakes (more history,
//! different parameters) from internal failures.

use thiserror::Error;

/// Analytics errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyticsError {
    #[error("Insufficient data for {context}: need at least {required} observations, got {actual}")]
    InsufficientData {
        context: String,
        required: usize,
        actual: usize,
    },

    #[error("{model} fit failed to converge: {reason}")]
    ModelConvergence { model: String, reason: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Upstream data unavailable from {source_name}: {reason}")]
    UpstreamData { source_name: String, reason: String },

    #[error("Required input missing: {0}")]
    MissingInput(&'static str),

    #[error("Operation timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AnalyticsError {
    pub fn insufficient(context: impl Into<String>, required: usize, actual: usize) -> Self {
        Self::InsufficientData {
            context: context.into(),
            required,
            actual,
        }
    }

    pub fn convergence(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModelConvergence {
            model: model.into(),
            reason: reason.into(),
        }
    }

    pub fn upstream(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UpstreamData {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// True when the caller can fix the request (4xx at an HTTP boundary)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InsufficientData { .. } | Self::InvalidParameter(_) | Self::MissingInput(_)
        )
    }
}

impl From<config::ConfigError> for AnalyticsError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AnalyticsError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;
