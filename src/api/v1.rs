use axum::{routing::post, Router};

use super::pipeline;
use crate::controller::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/pipeline/run", post(pipeline::run))
        .route("/pipeline/predict", post(pipeline::predict))
        .route("/pipeline/recommend", post(pipeline::recommend))
        .route("/ingest/snapshot", post(pipeline::ingest_snapshot))
        .with_state(state)
}
