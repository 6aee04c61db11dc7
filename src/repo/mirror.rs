use std::path::{Path, PathBuf};
use tracing::info;

use super::csv_store::write_rows;
use crate::domain::{PredictionRecord, RecommendationRecord, SensorReading};
use crate::error::PipelineError;

/// Local copies of the latest run for inspection. Each write replaces the
/// previous file.
#[derive(Debug, Clone)]
pub struct LocalMirror {
    dir: PathBuf,
}

impl LocalMirror {
    pub const PREDICTIONS_FILE: &'static str = "latest_predictions.csv";
    pub const RECOMMENDATIONS_FILE: &'static str = "recommendations.csv";
    pub const SENSORS_FILE: &'static str = "sensor_data.csv";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write<T: serde::Serialize>(&self, file: &str, rows: &[T]) -> Result<usize, PipelineError> {
        let path = self.dir.join(file);
        let written = write_rows(&path, rows)
            .map_err(|e| PipelineError::persistence(path.display().to_string(), e))?;
        info!(path = %path.display(), rows = written, "mirrored rows locally");
        Ok(written)
    }

    pub fn write_predictions(&self, rows: &[PredictionRecord]) -> Result<usize, PipelineError> {
        self.write(Self::PREDICTIONS_FILE, rows)
    }

    pub fn write_recommendations(
        &self,
        rows: &[RecommendationRecord],
    ) -> Result<usize, PipelineError> {
        self.write(Self::RECOMMENDATIONS_FILE, rows)
    }

    pub fn write_sensor_readings(&self, rows: &[SensorReading]) -> Result<usize, PipelineError> {
        self.write(Self::SENSORS_FILE, rows)
    }
}
