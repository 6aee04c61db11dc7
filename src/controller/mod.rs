pub mod pipeline;

use std::sync::Arc;

use crate::config::Config;
use crate::error::PipelineError;
use crate::forecast::{ForecastClient, HttpForecastClient};
use crate::repo::Repositories;

pub use pipeline::{
    ForecastOutcome, ForecastPipeline, IngestSummary, PredictionRun, RecommendationRun,
    RunSummary,
};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub pipeline: Arc<ForecastPipeline>,
}

impl AppState {
    pub async fn new(cfg: Config) -> Result<Self, PipelineError> {
        let repos = Arc::new(Repositories::new(&cfg).await?);
        let client: Arc<dyn ForecastClient> = Arc::new(HttpForecastClient::new(&cfg.forecast)?);
        Ok(Self::from_parts(cfg, client, repos))
    }

    pub fn from_parts(
        cfg: Config,
        client: Arc<dyn ForecastClient>,
        repos: Arc<Repositories>,
    ) -> Self {
        let pipeline = Arc::new(ForecastPipeline::new(
            cfg.pipeline.min_window_length,
            client,
            repos,
        ));
        Self {
            cfg: Arc::new(cfg),
            pipeline,
        }
    }
}
