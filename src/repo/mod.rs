use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{Config, StorageBackend};
use crate::domain::{PredictionRecord, RawReading, RecommendationRecord, SensorReading};
use crate::error::PipelineError;

pub mod csv_store;
pub mod memory;
pub mod mirror;
#[cfg(feature = "db")]
pub mod pg;

pub use csv_store::CsvStore;
pub use memory::MemoryStore;
pub use mirror::LocalMirror;

pub const SENSOR_TABLE: &str = "sensor_data";
pub const PREDICTION_TABLE: &str = "predictions";
pub const RECOMMENDATION_TABLE: &str = "recommendations";

/// Table names must be plain identifiers: they end up in SQL text and file paths.
pub(crate) fn checked_table(name: &str) -> Result<&str, PipelineError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(PipelineError::Validation(format!(
            "invalid table name {name:?}"
        )))
    }
}

/// Where a run reads its input from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SourceRef {
    File(PathBuf),
    Table(String),
    Inline(Vec<RawReading>),
}

impl SourceRef {
    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => format!("file {}", path.display()),
            Self::Table(name) => format!("table {name}"),
            Self::Inline(rows) => format!("{} inline rows", rows.len()),
        }
    }
}

#[async_trait]
pub trait ReadingSource: Send + Sync {
    async fn load_readings(&self, source: &SourceRef) -> Result<Vec<RawReading>, PipelineError>;
}

#[async_trait]
pub trait PredictionSource: Send + Sync {
    async fn load_predictions(
        &self,
        source: &SourceRef,
    ) -> Result<Vec<PredictionRecord>, PipelineError>;
}

/// Append-only destination for the three pipeline tables. Each call returns
/// the number of rows written.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn append_sensor_readings(&self, rows: &[SensorReading]) -> Result<usize, PipelineError>;

    async fn append_predictions(&self, rows: &[PredictionRecord]) -> Result<usize, PipelineError>;

    async fn append_recommendations(
        &self,
        rows: &[RecommendationRecord],
    ) -> Result<usize, PipelineError>;
}

pub struct Repositories {
    pub readings: Arc<dyn ReadingSource>,
    pub predictions: Arc<dyn PredictionSource>,
    pub sink: Arc<dyn RecordSink>,
    pub mirror: Option<LocalMirror>,
}

impl Repositories {
    pub async fn new(cfg: &Config) -> Result<Self, PipelineError> {
        let mirror = cfg.storage.mirror_dir.clone().map(LocalMirror::new);

        match cfg.storage.backend {
            StorageBackend::Csv => {
                let store = Arc::new(CsvStore::new(cfg.storage.output_dir.clone()));
                Ok(Self {
                    readings: store.clone(),
                    predictions: store.clone(),
                    sink: store,
                    mirror,
                })
            }
            #[cfg(feature = "db")]
            StorageBackend::Postgres => {
                let store = Arc::new(pg::PgStore::connect(&cfg.db).await?);
                Ok(Self {
                    readings: store.clone(),
                    predictions: store.clone(),
                    sink: store,
                    mirror,
                })
            }
            #[cfg(not(feature = "db"))]
            StorageBackend::Postgres => Err(PipelineError::Configuration {
                missing: vec![],
                invalid: vec!["storage.backend (postgres requires the `db` feature)".to_string()],
            }),
        }
    }

    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            readings: store.clone(),
            predictions: store.clone(),
            sink: store,
            mirror: None,
        }
    }

    pub fn with_mirror(mut self, mirror: LocalMirror) -> Self {
        self.mirror = Some(mirror);
        self
    }
}
