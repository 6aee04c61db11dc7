use async_trait::async_trait;
use parking_lot::RwLock;

use super::{PredictionSource, ReadingSource, RecordSink, SourceRef};
use crate::domain::{
    LooseValue, PredictionRecord, RawReading, RecommendationRecord, SensorReading,
};
use crate::error::PipelineError;

/// In-process store for dry runs and tests. `Table` sources read back
/// whatever was appended so far.
#[derive(Default)]
pub struct MemoryStore {
    sensors: RwLock<Vec<SensorReading>>,
    predictions: RwLock<Vec<PredictionRecord>>,
    recommendations: RwLock<Vec<RecommendationRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sensor_readings(&self) -> Vec<SensorReading> {
        self.sensors.read().clone()
    }

    pub fn predictions(&self) -> Vec<PredictionRecord> {
        self.predictions.read().clone()
    }

    pub fn recommendations(&self) -> Vec<RecommendationRecord> {
        self.recommendations.read().clone()
    }
}

fn to_raw(r: &SensorReading) -> RawReading {
    let num = |v: Option<f64>| v.map(LooseValue::Number);
    RawReading {
        timestamp: Some(LooseValue::Text(r.timestamp.to_rfc3339())),
        building_id: Some(LooseValue::Text(r.building_id.clone())),
        temperature: num(r.temperature),
        humidity: num(r.humidity),
        occupancy: num(r.occupancy),
        energy: Some(LooseValue::Number(r.energy)),
        current: num(r.current),
        frequency: num(r.frequency),
        power: num(r.power),
        power_factor: num(r.power_factor),
        voltage: num(r.voltage),
        building_area: Some(LooseValue::Number(r.building_area)),
    }
}

#[async_trait]
impl ReadingSource for MemoryStore {
    async fn load_readings(&self, source: &SourceRef) -> Result<Vec<RawReading>, PipelineError> {
        match source {
            SourceRef::Inline(rows) => Ok(rows.clone()),
            SourceRef::Table(_) => Ok(self.sensors.read().iter().map(to_raw).collect()),
            SourceRef::File(path) => super::csv_store::read_sensor_file(path),
        }
    }
}

#[async_trait]
impl PredictionSource for MemoryStore {
    async fn load_predictions(
        &self,
        source: &SourceRef,
    ) -> Result<Vec<PredictionRecord>, PipelineError> {
        match source {
            SourceRef::Table(_) => Ok(self.predictions()),
            SourceRef::File(path) => super::csv_store::read_prediction_file(path),
            SourceRef::Inline(_) => Err(PipelineError::Validation(
                "inline sources carry sensor readings, not predictions".to_string(),
            )),
        }
    }
}

#[async_trait]
impl RecordSink for MemoryStore {
    async fn append_sensor_readings(&self, rows: &[SensorReading]) -> Result<usize, PipelineError> {
        self.sensors.write().extend_from_slice(rows);
        Ok(rows.len())
    }

    async fn append_predictions(&self, rows: &[PredictionRecord]) -> Result<usize, PipelineError> {
        self.predictions.write().extend_from_slice(rows);
        Ok(rows.len())
    }

    async fn append_recommendations(
        &self,
        rows: &[RecommendationRecord],
    ) -> Result<usize, PipelineError> {
        self.recommendations.write().extend_from_slice(rows);
        Ok(rows.len())
    }
}
