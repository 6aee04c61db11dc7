//! Error taxonomy for a pipeline run.
//!
//! Fatal conditions abort the whole invocation and surface as a single
//! [`PipelineError`]. Per-building window shortfalls are not errors: they are
//! reported as [`SkippedBuilding`] markers next to the successful output.

use serde::Serialize;
use thiserror::Error;

/// Failure while talking to the remote forecast service.
#[derive(Debug, Error)]
pub enum EndpointFailure {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed JSON body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failure inside a storage adapter.
#[derive(Debug, Error)]
pub enum StoreFailure {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "db")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: missing {missing:?}, invalid {invalid:?}")]
    Configuration {
        missing: Vec<String>,
        invalid: Vec<String>,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("preprocessing error: {0}")]
    Preprocessing(String),

    #[error("forecast endpoint error: {0}")]
    Endpoint(#[from] EndpointFailure),

    #[error("mapping error: {0}")]
    Mapping(String),

    #[error("persistence error writing {target}: {source}")]
    Persistence {
        target: String,
        #[source]
        source: StoreFailure,
    },
}

impl PipelineError {
    pub fn persistence(target: impl Into<String>, source: impl Into<StoreFailure>) -> Self {
        Self::Persistence {
            target: target.into(),
            source: source.into(),
        }
    }

    /// Stage label used in logs and error bodies.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Validation(_) => "validation",
            Self::Preprocessing(_) => "preprocessing",
            Self::Endpoint(_) => "forecast",
            Self::Mapping(_) => "mapping",
            Self::Persistence { .. } => "persistence",
        }
    }

    /// Input faults the caller can fix by sending different data.
    pub fn is_client_fault(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Preprocessing(_))
    }
}

impl From<validator::ValidationErrors> for PipelineError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

/// Why a building was left out of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    InsufficientHistory { available: usize, required: usize },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientHistory {
                available,
                required,
            } => write!(
                f,
                "insufficient history: {available} hourly rows, {required} required"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedBuilding {
    pub building_id: String,
    pub reason: SkipReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_fault_classification() {
        assert!(PipelineError::Validation("empty batch".into()).is_client_fault());
        assert!(PipelineError::Preprocessing("no rows".into()).is_client_fault());
        assert!(!PipelineError::Mapping("bad index".into()).is_client_fault());
        assert!(!PipelineError::Configuration {
            missing: vec!["forecast.api_key".into()],
            invalid: vec![],
        }
        .is_client_fault());
    }

    #[test]
    fn test_configuration_error_lists_every_key() {
        let err = PipelineError::Configuration {
            missing: vec!["forecast.endpoint_url".into(), "forecast.api_key".into()],
            invalid: vec!["pipeline.min_window_length".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("forecast.endpoint_url"));
        assert!(msg.contains("forecast.api_key"));
        assert!(msg.contains("pipeline.min_window_length"));
        assert_eq!(err.stage(), "configuration");
    }

    #[test]
    fn test_skip_reason_display() {
        let reason = SkipReason::InsufficientHistory {
            available: 5,
            required: 24,
        };
        assert_eq!(
            reason.to_string(),
            "insufficient history: 5 hourly rows, 24 required"
        );
    }
}
