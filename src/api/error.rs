use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::error::PipelineError;

/// Errors returned from handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Error response that gets serialized to JSON
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub stage: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub invalid: Vec<String>,
}

impl ApiError {
    /// Input faults map to 400; configuration, endpoint, mapping and
    /// persistence failures map to 500.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Pipeline(e) if e.is_client_fault() => StatusCode::BAD_REQUEST,
            ApiError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::Pipeline(e) => match e {
                PipelineError::Configuration { .. } => "ConfigurationError",
                PipelineError::Validation(_) => "ValidationError",
                PipelineError::Preprocessing(_) => "PreprocessingError",
                PipelineError::Endpoint(_) => "EndpointError",
                PipelineError::Mapping(_) => "MappingError",
                PipelineError::Persistence { .. } => "PersistenceError",
            },
        }
    }

    fn stage(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "request",
            ApiError::Pipeline(e) => e.stage(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "API error occurred");
        } else {
            tracing::debug!(error = %self, "Client error");
        }

        let (missing, invalid) = match &self {
            ApiError::Pipeline(PipelineError::Configuration { missing, invalid }) => {
                (missing.clone(), invalid.clone())
            }
            _ => (vec![], vec![]),
        };
        let body = ErrorResponse {
            error: self.error_type().to_string(),
            stage: self.stage().to_string(),
            message: self.to_string(),
            missing,
            invalid,
        };

        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::Pipeline(errors.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EndpointFailure, StoreFailure};

    #[test]
    fn test_error_status_codes() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (
                PipelineError::Validation("empty".into()).into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                PipelineError::Preprocessing("no rows".into()).into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                PipelineError::Configuration {
                    missing: vec!["forecast.api_key".into()],
                    invalid: vec![],
                }
                .into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                PipelineError::from(EndpointFailure::Status {
                    status: 502,
                    body: String::new(),
                })
                .into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                PipelineError::Mapping("bad".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                PipelineError::persistence(
                    "predictions",
                    StoreFailure::Io(std::io::Error::other("disk full")),
                )
                .into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
        ];

        for (err, expected) in cases {
            assert_eq!(err.status_code(), expected, "{err}");
        }
    }

    #[test]
    fn test_error_types() {
        assert_eq!(
            ApiError::from(PipelineError::Mapping("x".into())).error_type(),
            "MappingError"
        );
        assert_eq!(
            ApiError::from(PipelineError::Validation("x".into())).error_type(),
            "ValidationError"
        );
    }
}
