use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::time::Duration;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::config::ForecastConfig;
use crate::domain::{ForecastBatch, ForecastEnvelope, ForecastRequest, ForecastResponse};
use crate::error::{EndpointFailure, PipelineError};

/// Submits a batch to the forecast service and returns one response per entity,
/// in the order the service sent them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ForecastClient: Send + Sync {
    async fn invoke(
        &self,
        requests: &[ForecastRequest],
    ) -> Result<Vec<ForecastResponse>, PipelineError>;
}

/// Scoring endpoint reached over HTTPS with a bearer key.
///
/// One POST per invocation: no retry, and no timeout unless configured.
#[derive(Clone)]
pub struct HttpForecastClient {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpForecastClient {
    pub fn new(cfg: &ForecastConfig) -> Result<Self, PipelineError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("building-energy-forecast/0.1"),
        );
        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(secs) = cfg.timeout_seconds {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build().map_err(EndpointFailure::from)?;

        Ok(Self {
            endpoint: cfg.endpoint_url.clone(),
            api_key: cfg.api_key.clone(),
            client,
        })
    }
}

#[async_trait]
impl ForecastClient for HttpForecastClient {
    async fn invoke(
        &self,
        requests: &[ForecastRequest],
    ) -> Result<Vec<ForecastResponse>, PipelineError> {
        if requests.is_empty() {
            return Err(PipelineError::Validation(
                "refusing to submit an empty forecast batch".to_string(),
            ));
        }
        for req in requests {
            req.validate()?;
        }

        debug!(endpoint = %self.endpoint, entities = requests.len(), "submitting forecast batch");
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&ForecastBatch { data: requests })
            .send()
            .await
            .map_err(EndpointFailure::from)?;

        let status = resp.status();
        let body = resp.bytes().await.map_err(EndpointFailure::from)?;
        if !status.is_success() {
            let body = String::from_utf8_lossy(&body).chars().take(512).collect();
            return Err(EndpointFailure::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let value: serde_json::Value =
            serde_json::from_slice(&body).map_err(EndpointFailure::from)?;
        let responses = ForecastEnvelope::from_value(value)?;
        if responses.len() != requests.len() {
            warn!(
                requested = requests.len(),
                received = responses.len(),
                "forecast service returned a different number of entities"
            );
        }
        info!(entities = responses.len(), "received forecasts");
        Ok(responses)
    }
}
