#![cfg(feature = "db")]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, QueryBuilder};
use tracing::info;

use super::csv_store::{read_prediction_file, read_sensor_file};
use super::{
    checked_table, PredictionSource, ReadingSource, RecordSink, SourceRef, PREDICTION_TABLE,
    RECOMMENDATION_TABLE, SENSOR_TABLE,
};
use crate::config::DbConfig;
use crate::domain::{
    LooseValue, PredictionRecord, RawReading, RecommendationRecord, SensorReading,
};
use crate::error::PipelineError;

// Postgres caps bind parameters at 65535 per statement.
const INSERT_CHUNK: usize = 1000;

#[derive(Debug, sqlx::FromRow)]
struct SensorRow {
    timestamp: DateTime<Utc>,
    building_id: String,
    temperature: Option<f64>,
    humidity: Option<f64>,
    occupancy: Option<f64>,
    energy: Option<f64>,
    current: Option<f64>,
    frequency: Option<f64>,
    power: Option<f64>,
    power_factor: Option<f64>,
    voltage: Option<f64>,
}

impl From<SensorRow> for RawReading {
    fn from(row: SensorRow) -> Self {
        let num = |v: Option<f64>| v.map(LooseValue::Number);
        Self {
            timestamp: Some(LooseValue::Text(row.timestamp.to_rfc3339())),
            building_id: Some(LooseValue::Text(row.building_id)),
            temperature: num(row.temperature),
            humidity: num(row.humidity),
            occupancy: num(row.occupancy),
            energy: num(row.energy),
            current: num(row.current),
            frequency: num(row.frequency),
            power: num(row.power),
            power_factor: num(row.power_factor),
            voltage: num(row.voltage),
            building_area: None,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PredictionRow {
    timestamp: DateTime<Utc>,
    building_id: String,
    predicted_energy: f64,
}

/// Table names come from requests, so only plain identifiers are interpolated.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(cfg: &DbConfig) -> Result<Self, PipelineError> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .connect(&cfg.url)
            .await
            .map_err(|e| PipelineError::persistence("database connection", e))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn select_readings(&self, table: &str) -> Result<Vec<RawReading>, PipelineError> {
        let table = checked_table(table)?;
        let sql = format!(
            "SELECT timestamp, building_id::text AS building_id, \
             temperature::float8 AS temperature, humidity::float8 AS humidity, \
             occupancy::float8 AS occupancy, energy::float8 AS energy, \
             current::float8 AS current, frequency::float8 AS frequency, \
             power::float8 AS power, power_factor::float8 AS power_factor, \
             voltage::float8 AS voltage \
             FROM {table} ORDER BY building_id, timestamp"
        );
        let rows: Vec<SensorRow> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PipelineError::persistence(table, e))?;
        Ok(rows.into_iter().map(RawReading::from).collect())
    }

    async fn select_predictions(&self, table: &str) -> Result<Vec<PredictionRecord>, PipelineError> {
        let table = checked_table(table)?;
        let sql = format!(
            "SELECT timestamp, building_id::text AS building_id, \
             predicted_energy::float8 AS predicted_energy \
             FROM {table} ORDER BY building_id, timestamp"
        );
        let rows: Vec<PredictionRow> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PipelineError::persistence(table, e))?;
        Ok(rows
            .into_iter()
            .map(|r| PredictionRecord {
                timestamp: r.timestamp,
                building_id: r.building_id,
                predicted_energy: r.predicted_energy,
            })
            .collect())
    }

    /// Inserts `rows` in chunks inside one transaction.
    async fn insert_chunked<T, F>(
        &self,
        table: &'static str,
        columns: &str,
        rows: &[T],
        bind: F,
    ) -> Result<usize, PipelineError>
    where
        T: Sync,
        F: Fn(sqlx::query_builder::Separated<'_, '_, Postgres, &'static str>, &T) + Copy,
    {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PipelineError::persistence(table, e))?;

        for chunk in rows.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO {table} ({columns}) "));
            qb.push_values(chunk, |b, row| bind(b, row));
            qb.build()
                .execute(&mut *tx)
                .await
                .map_err(|e| PipelineError::persistence(table, e))?;
        }

        tx.commit()
            .await
            .map_err(|e| PipelineError::persistence(table, e))?;
        info!(table, rows = rows.len(), "inserted rows");
        Ok(rows.len())
    }
}

#[async_trait]
impl ReadingSource for PgStore {
    async fn load_readings(&self, source: &SourceRef) -> Result<Vec<RawReading>, PipelineError> {
        match source {
            SourceRef::Table(name) => self.select_readings(name).await,
            SourceRef::File(path) => read_sensor_file(path),
            SourceRef::Inline(rows) => Ok(rows.clone()),
        }
    }
}

#[async_trait]
impl PredictionSource for PgStore {
    async fn load_predictions(
        &self,
        source: &SourceRef,
    ) -> Result<Vec<PredictionRecord>, PipelineError> {
        match source {
            SourceRef::Table(name) => self.select_predictions(name).await,
            SourceRef::File(path) => read_prediction_file(path),
            SourceRef::Inline(_) => Err(PipelineError::Validation(
                "inline sources carry sensor readings, not predictions".to_string(),
            )),
        }
    }
}

#[async_trait]
impl RecordSink for PgStore {
    async fn append_sensor_readings(&self, rows: &[SensorReading]) -> Result<usize, PipelineError> {
        self.insert_chunked(
            SENSOR_TABLE,
            "timestamp, building_id, temperature, humidity, occupancy, energy, current, \
             frequency, power, power_factor, voltage",
            rows,
            |mut b, r| {
                b.push_bind(r.timestamp)
                    .push_bind(r.building_id.clone())
                    .push_bind(r.temperature)
                    .push_bind(r.humidity)
                    .push_bind(r.occupancy)
                    .push_bind(r.energy)
                    .push_bind(r.current)
                    .push_bind(r.frequency)
                    .push_bind(r.power)
                    .push_bind(r.power_factor)
                    .push_bind(r.voltage);
            },
        )
        .await
    }

    async fn append_predictions(&self, rows: &[PredictionRecord]) -> Result<usize, PipelineError> {
        self.insert_chunked(
            PREDICTION_TABLE,
            "timestamp, building_id, predicted_energy",
            rows,
            |mut b, r| {
                b.push_bind(r.timestamp)
                    .push_bind(r.building_id.clone())
                    .push_bind(r.predicted_energy);
            },
        )
        .await
    }

    async fn append_recommendations(
        &self,
        rows: &[RecommendationRecord],
    ) -> Result<usize, PipelineError> {
        self.insert_chunked(
            RECOMMENDATION_TABLE,
            "timestamp, building_id, predicted_energy, recommendation",
            rows,
            |mut b, r| {
                b.push_bind(r.timestamp)
                    .push_bind(r.building_id.clone())
                    .push_bind(r.predicted_energy)
                    .push_bind(r.recommendation.clone());
            },
        )
        .await
    }
}
