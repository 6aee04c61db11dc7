use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Deserialize;
use std::time::Instant;

use super::{error::ApiError, response::ApiResponse};
use crate::controller::{AppState, IngestSummary, PredictionRun, RecommendationRun, RunSummary};
use crate::domain::PredictionRecord;
use crate::repo::{SourceRef, PREDICTION_TABLE};

#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    /// Defaults to the configured sensor file.
    #[serde(default)]
    pub source: Option<SourceRef>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PredictionInput {
    Records(Vec<PredictionRecord>),
    Source(SourceRef),
}

#[derive(Debug, Default, Deserialize)]
pub struct RecommendRequest {
    /// Defaults to the stored predictions table.
    #[serde(default)]
    pub predictions: Option<PredictionInput>,
    /// Defaults to the configured sensor file.
    #[serde(default)]
    pub sensors: Option<SourceRef>,
}

fn default_source(st: &AppState) -> SourceRef {
    SourceRef::File(st.cfg.pipeline.sensor_file.clone())
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// POST /api/v1/pipeline/run
pub async fn run(
    State(st): State<AppState>,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> Result<ApiResponse<RunSummary>, ApiError> {
    let Json(req) = body?;
    let start = Instant::now();
    let source = req.source.unwrap_or_else(|| default_source(&st));
    let summary = st.pipeline.run(&source).await?;
    Ok(ApiResponse::success(summary).with_duration(elapsed_ms(start)))
}

/// POST /api/v1/pipeline/predict
pub async fn predict(
    State(st): State<AppState>,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> Result<ApiResponse<PredictionRun>, ApiError> {
    let Json(req) = body?;
    let start = Instant::now();
    let source = req.source.unwrap_or_else(|| default_source(&st));
    let summary = st.pipeline.predict(&source).await?;
    Ok(ApiResponse::success(summary).with_duration(elapsed_ms(start)))
}

/// POST /api/v1/pipeline/recommend
pub async fn recommend(
    State(st): State<AppState>,
    body: Result<Json<RecommendRequest>, JsonRejection>,
) -> Result<ApiResponse<RecommendationRun>, ApiError> {
    let Json(req) = body?;
    let start = Instant::now();
    let sensors = req.sensors.unwrap_or_else(|| default_source(&st));
    let summary = match req.predictions {
        Some(PredictionInput::Records(records)) => {
            st.pipeline.recommend_records(&records, &sensors).await?
        }
        Some(PredictionInput::Source(source)) => st.pipeline.recommend(&source, &sensors).await?,
        None => {
            let source = SourceRef::Table(PREDICTION_TABLE.to_string());
            st.pipeline.recommend(&source, &sensors).await?
        }
    };
    Ok(ApiResponse::success(summary).with_duration(elapsed_ms(start)))
}

/// POST /api/v1/ingest/snapshot
pub async fn ingest_snapshot(
    State(st): State<AppState>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<ApiResponse<IngestSummary>, ApiError> {
    let Json(snapshot) = body?;
    let start = Instant::now();
    let summary = st.pipeline.ingest_snapshot(&snapshot).await?;
    Ok(ApiResponse::success(summary).with_duration(elapsed_ms(start)))
}
