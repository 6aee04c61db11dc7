use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{
    checked_table, PredictionSource, ReadingSource, RecordSink, SourceRef, PREDICTION_TABLE,
    RECOMMENDATION_TABLE, SENSOR_TABLE,
};
use crate::domain::{
    parse_timestamp, LooseValue, PredictionRecord, RawReading, RecommendationRecord,
    SensorReading,
};
use crate::error::{PipelineError, StoreFailure};

/// Sensor CSV row; every cell is kept as text until cleaning coerces it.
#[derive(Debug, Default, Deserialize)]
struct CsvSensorRow {
    timestamp: Option<String>,
    building_id: Option<String>,
    temperature: Option<String>,
    humidity: Option<String>,
    occupancy: Option<String>,
    energy: Option<String>,
    current: Option<String>,
    frequency: Option<String>,
    power: Option<String>,
    power_factor: Option<String>,
    voltage: Option<String>,
    building_area: Option<String>,
}

fn cell(value: Option<String>) -> Option<LooseValue> {
    value
        .filter(|s| !s.trim().is_empty())
        .map(LooseValue::Text)
}

impl From<CsvSensorRow> for RawReading {
    fn from(row: CsvSensorRow) -> Self {
        Self {
            timestamp: cell(row.timestamp),
            building_id: cell(row.building_id),
            temperature: cell(row.temperature),
            humidity: cell(row.humidity),
            occupancy: cell(row.occupancy),
            energy: cell(row.energy),
            current: cell(row.current),
            frequency: cell(row.frequency),
            power: cell(row.power),
            power_factor: cell(row.power_factor),
            voltage: cell(row.voltage),
            building_area: cell(row.building_area),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CsvPredictionRow {
    timestamp: String,
    building_id: String,
    predicted_energy: f64,
}

fn unreadable(path: &Path, err: impl std::fmt::Display) -> PipelineError {
    PipelineError::Validation(format!("cannot read {}: {err}", path.display()))
}

/// Reads a sensor export with the `sensor_data` header. Unknown columns are ignored.
pub fn read_sensor_file(path: &Path) -> Result<Vec<RawReading>, PipelineError> {
    let mut reader = ::csv::ReaderBuilder::new()
        .trim(::csv::Trim::All)
        .from_path(path)
        .map_err(|e| unreadable(path, e))?;

    let rows = reader
        .deserialize::<CsvSensorRow>()
        .map(|row| row.map(RawReading::from).map_err(|e| unreadable(path, e)))
        .collect::<Result<Vec<_>, _>>()?;
    debug!(path = %path.display(), rows = rows.len(), "read sensor file");
    Ok(rows)
}

pub fn read_prediction_file(path: &Path) -> Result<Vec<PredictionRecord>, PipelineError> {
    let mut reader = ::csv::ReaderBuilder::new()
        .trim(::csv::Trim::All)
        .from_path(path)
        .map_err(|e| unreadable(path, e))?;

    let mut records = Vec::new();
    for (line, row) in reader.deserialize::<CsvPredictionRow>().enumerate() {
        let row = row.map_err(|e| unreadable(path, e))?;
        let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| {
            unreadable(
                path,
                format!("row {}: unparsable timestamp {:?}", line + 1, row.timestamp),
            )
        })?;
        records.push(PredictionRecord {
            timestamp,
            building_id: row.building_id,
            predicted_energy: row.predicted_energy,
        });
    }
    Ok(records)
}

/// Appends rows to `path`, writing the header only when the file is new or empty.
fn append_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<usize, StoreFailure> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let needs_header = file.metadata()?.len() == 0;

    let mut writer = ::csv::WriterBuilder::new()
        .has_headers(needs_header)
        .from_writer(file);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(rows.len())
}

/// Overwrites `path` with a header and `rows`.
pub(crate) fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<usize, StoreFailure> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = ::csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(rows.len())
}

/// File-backed store: reads sensor exports and appends to one CSV per table
/// under `output_dir`.
pub struct CsvStore {
    output_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl CsvStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.output_dir.join(format!("{table}.csv"))
    }

    fn append<T: Serialize>(&self, table: &str, rows: &[T]) -> Result<usize, PipelineError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let path = self.table_path(table);
        let written = {
            let _guard = self.write_lock.lock();
            append_rows(&path, rows).map_err(|e| PipelineError::persistence(table, e))?
        };
        info!(table, rows = written, path = %path.display(), "appended rows");
        Ok(written)
    }
}

#[async_trait]
impl ReadingSource for CsvStore {
    async fn load_readings(&self, source: &SourceRef) -> Result<Vec<RawReading>, PipelineError> {
        match source {
            SourceRef::File(path) => read_sensor_file(path),
            SourceRef::Table(name) => read_sensor_file(&self.table_path(checked_table(name)?)),
            SourceRef::Inline(rows) => Ok(rows.clone()),
        }
    }
}

#[async_trait]
impl PredictionSource for CsvStore {
    async fn load_predictions(
        &self,
        source: &SourceRef,
    ) -> Result<Vec<PredictionRecord>, PipelineError> {
        match source {
            SourceRef::File(path) => read_prediction_file(path),
            SourceRef::Table(name) => {
                read_prediction_file(&self.table_path(checked_table(name)?))
            }
            SourceRef::Inline(_) => Err(PipelineError::Validation(
                "inline sources carry sensor readings, not predictions".to_string(),
            )),
        }
    }
}

#[async_trait]
impl RecordSink for CsvStore {
    async fn append_sensor_readings(&self, rows: &[SensorReading]) -> Result<usize, PipelineError> {
        self.append(SENSOR_TABLE, rows)
    }

    async fn append_predictions(&self, rows: &[PredictionRecord]) -> Result<usize, PipelineError> {
        self.append(PREDICTION_TABLE, rows)
    }

    async fn append_recommendations(
        &self,
        rows: &[RecommendationRecord],
    ) -> Result<usize, PipelineError> {
        self.append(RECOMMENDATION_TABLE, rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::io::Write;

    fn prediction(hour: u32, energy: f64) -> PredictionRecord {
        PredictionRecord {
            timestamp: Utc.with_ymd_and_hms(2025, 6, 15, hour, 0, 0).unwrap(),
            building_id: "b1".to_string(),
            predicted_energy: energy,
        }
    }

    #[tokio::test]
    async fn test_appends_keep_a_single_header() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path());

        assert_eq!(store.append_predictions(&[prediction(0, 10.0)]).await.unwrap(), 1);
        assert_eq!(
            store
                .append_predictions(&[prediction(1, 12.0), prediction(2, 9.0)])
                .await
                .unwrap(),
            2
        );

        let text = fs::read_to_string(store.table_path(PREDICTION_TABLE)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "timestamp,building_id,predicted_energy");
        assert_eq!(lines[1], "2025-06-15T00:00:00Z,b1,10.0");
    }

    #[tokio::test]
    async fn test_prediction_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path());
        store
            .append_predictions(&[prediction(0, 10.0), prediction(1, 12.0)])
            .await
            .unwrap();

        let loaded = store
            .load_predictions(&SourceRef::Table(PREDICTION_TABLE.to_string()))
            .await
            .unwrap();
        assert_eq!(loaded, vec![prediction(0, 10.0), prediction(1, 12.0)]);
    }

    #[tokio::test]
    async fn test_table_names_cannot_leave_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path().join("out"));
        fs::write(dir.path().join("x.csv"), "timestamp,building_id,predicted_energy\n").unwrap();

        let err = store
            .load_predictions(&SourceRef::Table("../x".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        let err = store
            .load_readings(&SourceRef::Table("../x".to_string()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid table name"), "{err}");
    }

    #[tokio::test]
    async fn test_sensor_file_with_blank_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensor_data.csv");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(
            f,
            "timestamp,building_id,temperature,humidity,occupancy,energy,current,frequency,power,power_factor,voltage"
        )
        .unwrap();
        writeln!(f, "2025-06-15 00:00:00,b1,22.3,,1,50.5,,,,0.95,220").unwrap();
        writeln!(f, "2025-06-15 01:00:00,b1,22.3,,1,,,,,0.95,220").unwrap();

        let store = CsvStore::new(dir.path());
        let raw = store.load_readings(&SourceRef::File(path)).await.unwrap();
        assert_eq!(raw.len(), 2);
        assert!(raw[0].humidity.is_none());
        assert!(raw[1].energy.is_none());

        let clean = SensorReading::clean(&raw[0]).unwrap();
        assert_eq!(clean.energy, 50.5);
        assert_eq!(clean.power_factor, Some(0.95));
    }

    #[tokio::test]
    async fn test_missing_file_is_a_validation_error() {
        let store = CsvStore::new("/nonexistent");
        let err = store
            .load_readings(&SourceRef::File(PathBuf::from("/nonexistent/sensor_data.csv")))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_empty_append_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path());
        assert_eq!(store.append_recommendations(&[]).await.unwrap(), 0);
        assert!(!store.table_path(RECOMMENDATION_TABLE).exists());
    }
}
