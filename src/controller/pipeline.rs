use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::domain::{PredictionRecord, RawReading, RecommendationRecord, SensorReading};
use crate::error::{PipelineError, SkippedBuilding};
use crate::forecast::{build_batch, map_responses, preprocess, ForecastClient};
use crate::ingest::flatten_snapshot;
use crate::optimizer::{generate_recommendations, merge_rows};
use crate::repo::{
    Repositories, SourceRef, PREDICTION_TABLE, RECOMMENDATION_TABLE, SENSOR_TABLE,
};
use crate::telemetry::run_span;

/// Forecasts for every eligible building, not yet persisted.
#[derive(Debug, Clone, Default)]
pub struct ForecastOutcome {
    pub predictions: Vec<PredictionRecord>,
    pub buildings: Vec<String>,
    pub skipped: Vec<SkippedBuilding>,
    pub cleaned: Vec<SensorReading>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionRun {
    pub run_id: Uuid,
    pub buildings: usize,
    pub skipped: Vec<SkippedBuilding>,
    pub predictions_stored: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendationRun {
    pub run_id: Uuid,
    pub recommendations_stored: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub buildings: usize,
    pub skipped: Vec<SkippedBuilding>,
    pub predictions_stored: usize,
    pub recommendations_stored: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub run_id: Uuid,
    pub received: usize,
    pub stored: usize,
}

fn log_failure<T>(result: Result<T, PipelineError>) -> Result<T, PipelineError> {
    if let Err(e) = &result {
        error!(stage = e.stage(), error = %e, "pipeline invocation failed");
    }
    result
}

/// Local mirror copies are best effort: the sink append already committed.
fn mirror_copy(table: &str, result: Result<usize, PipelineError>) {
    if let Err(e) = result {
        warn!(table, error = %e, "failed to refresh local mirror");
    }
}

/// Runs preprocess, batch, forecast, map, merge, recommend and persist.
///
/// Every public operation is one invocation with its own `run_id`. Nothing is
/// written until all stages that feed a store have succeeded.
pub struct ForecastPipeline {
    min_window_length: usize,
    client: Arc<dyn ForecastClient>,
    repos: Arc<Repositories>,
}

impl ForecastPipeline {
    pub fn new(
        min_window_length: usize,
        client: Arc<dyn ForecastClient>,
        repos: Arc<Repositories>,
    ) -> Self {
        Self {
            min_window_length,
            client,
            repos,
        }
    }

    pub fn repos(&self) -> &Repositories {
        &self.repos
    }

    /// Preprocesses `readings` and asks the service for one forecast per building.
    pub async fn forecast(&self, readings: &[RawReading]) -> Result<ForecastOutcome, PipelineError> {
        let prepared = preprocess(readings, self.min_window_length)?;
        let plan = build_batch(&prepared.windows)?;
        info!(
            buildings = plan.len(),
            skipped = prepared.skipped.len(),
            "submitting forecast batch"
        );

        let responses = self.client.invoke(&plan.requests).await?;
        let predictions = map_responses(&responses, &plan.index_to_building)?;
        info!(predictions = predictions.len(), "mapped forecast responses");

        Ok(ForecastOutcome {
            predictions,
            buildings: plan.index_to_building,
            skipped: prepared.skipped,
            cleaned: prepared.cleaned,
        })
    }

    /// Forecasts `source` and appends the predictions.
    pub async fn predict(&self, source: &SourceRef) -> Result<PredictionRun, PipelineError> {
        let run_id = Uuid::new_v4();
        let result = async {
            let readings = self.repos.readings.load_readings(source).await?;
            info!(source = %source.describe(), rows = readings.len(), "loaded readings");
            let outcome = self.forecast(&readings).await?;

            let predictions_stored = self
                .repos
                .sink
                .append_predictions(&outcome.predictions)
                .await?;
            if let Some(mirror) = &self.repos.mirror {
                mirror_copy(PREDICTION_TABLE, mirror.write_predictions(&outcome.predictions));
            }

            Ok::<_, PipelineError>(PredictionRun {
                run_id,
                buildings: outcome.buildings.len(),
                skipped: outcome.skipped,
                predictions_stored,
            })
        }
        .instrument(run_span(run_id, "predict"))
        .await;
        log_failure(result)
    }

    /// Joins predictions with sensor rows and applies the rule ladder.
    ///
    /// An empty join is an input fault here: there is nothing to advise on.
    pub fn recommend_from(
        &self,
        predictions: &[PredictionRecord],
        sensors: &[SensorReading],
    ) -> Result<Vec<RecommendationRecord>, PipelineError> {
        let merged = merge_rows(predictions, sensors);
        if merged.is_empty() {
            return Err(PipelineError::Validation(
                "no matching prediction and sensor rows".to_string(),
            ));
        }
        Ok(generate_recommendations(&merged))
    }

    /// Standalone recommendation pass over stored predictions and sensor rows.
    pub async fn recommend(
        &self,
        predictions: &SourceRef,
        sensors: &SourceRef,
    ) -> Result<RecommendationRun, PipelineError> {
        let run_id = Uuid::new_v4();
        let result = async {
            let predictions = self.repos.predictions.load_predictions(predictions).await?;
            self.recommend_and_store(run_id, &predictions, sensors).await
        }
        .instrument(run_span(run_id, "recommend"))
        .await;
        log_failure(result)
    }

    /// Same as [`recommend`](Self::recommend) with predictions supplied by the caller.
    pub async fn recommend_records(
        &self,
        predictions: &[PredictionRecord],
        sensors: &SourceRef,
    ) -> Result<RecommendationRun, PipelineError> {
        let run_id = Uuid::new_v4();
        let result = self
            .recommend_and_store(run_id, predictions, sensors)
            .instrument(run_span(run_id, "recommend"))
            .await;
        log_failure(result)
    }

    async fn recommend_and_store(
        &self,
        run_id: Uuid,
        predictions: &[PredictionRecord],
        sensors: &SourceRef,
    ) -> Result<RecommendationRun, PipelineError> {
        let raw = self.repos.readings.load_readings(sensors).await?;
        let sensors: Vec<SensorReading> = raw
            .iter()
            .filter_map(|r| SensorReading::clean(r).ok())
            .collect();
        info!(
            predictions = predictions.len(),
            sensors = sensors.len(),
            "loaded recommendation inputs"
        );

        let recommendations = self.recommend_from(predictions, &sensors)?;
        let recommendations_stored = self
            .repos
            .sink
            .append_recommendations(&recommendations)
            .await?;
        if let Some(mirror) = &self.repos.mirror {
            mirror_copy(
                RECOMMENDATION_TABLE,
                mirror.write_recommendations(&recommendations),
            );
        }

        Ok(RecommendationRun {
            run_id,
            recommendations_stored,
        })
    }

    /// Full invocation: forecast, recommend, then persist both tables.
    pub async fn run(&self, source: &SourceRef) -> Result<RunSummary, PipelineError> {
        let run_id = Uuid::new_v4();
        let result = async {
            let readings = self.repos.readings.load_readings(source).await?;
            info!(source = %source.describe(), rows = readings.len(), "loaded readings");
            let outcome = self.forecast(&readings).await?;

            let merged = merge_rows(&outcome.predictions, &outcome.cleaned);
            if merged.is_empty() {
                warn!(
                    predictions = outcome.predictions.len(),
                    "no sensor rows share a timestamp with the forecast, no recommendations produced"
                );
            }
            let recommendations = generate_recommendations(&merged);

            let predictions_stored = self
                .repos
                .sink
                .append_predictions(&outcome.predictions)
                .await?;
            let recommendations_stored = self
                .repos
                .sink
                .append_recommendations(&recommendations)
                .await?;
            if let Some(mirror) = &self.repos.mirror {
                mirror_copy(PREDICTION_TABLE, mirror.write_predictions(&outcome.predictions));
                mirror_copy(
                    RECOMMENDATION_TABLE,
                    mirror.write_recommendations(&recommendations),
                );
            }

            info!(
                buildings = outcome.buildings.len(),
                predictions_stored,
                recommendations_stored,
                "pipeline run complete"
            );
            Ok::<_, PipelineError>(RunSummary {
                run_id,
                buildings: outcome.buildings.len(),
                skipped: outcome.skipped,
                predictions_stored,
                recommendations_stored,
            })
        }
        .instrument(run_span(run_id, "run"))
        .await;
        log_failure(result)
    }

    /// Flattens a realtime snapshot and appends its usable readings.
    pub async fn ingest_snapshot(
        &self,
        snapshot: &serde_json::Value,
    ) -> Result<IngestSummary, PipelineError> {
        let run_id = Uuid::new_v4();
        let result = async {
            let raw = flatten_snapshot(snapshot)?;
            if raw.is_empty() {
                warn!("snapshot contained no readings");
            }
            let readings: Vec<SensorReading> = raw
                .iter()
                .filter_map(|r| SensorReading::clean(r).ok())
                .collect();
            if readings.len() < raw.len() {
                warn!(
                    dropped = raw.len() - readings.len(),
                    "dropped snapshot readings without timestamp or energy"
                );
            }

            let stored = self.repos.sink.append_sensor_readings(&readings).await?;
            if let Some(mirror) = &self.repos.mirror {
                mirror_copy(SENSOR_TABLE, mirror.write_sensor_readings(&readings));
            }
            Ok::<_, PipelineError>(IngestSummary {
                run_id,
                received: raw.len(),
                stored,
            })
        }
        .instrument(run_span(run_id, "ingest"))
        .await;
        log_failure(result)
    }
}
