use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use crate::error::PipelineError;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub forecast: ForecastConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
    pub db: DbConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout_secs: 300,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub endpoint_url: String,
    pub api_key: String,
    /// Unset means the request may block indefinitely.
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub min_window_length: usize,
    pub sensor_file: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_window_length: 24,
            sensor_file: PathBuf::from("./data/sensor_data.csv"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Csv,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub output_dir: PathBuf,
    /// Directory for overwrite-style CSV snapshots of the latest run.
    pub mirror_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Csv,
            output_dir: PathBuf::from("./output"),
            mirror_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 5,
        }
    }
}

/// Flat variable names used by existing deployments.
const LEGACY_ENV: [(&str, &str); 3] = [
    ("ENDPOINT_URL", "forecast.endpoint_url"),
    ("API_KEY", "forecast.api_key"),
    ("DATABASE_URL", "db.url"),
];

impl Config {
    pub fn load() -> Result<Self, PipelineError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        Self::from_figment(Self::figment(path))
    }

    pub fn figment(path: impl AsRef<Path>) -> Figment {
        let legacy = Env::raw()
            .only(&LEGACY_ENV.map(|(var, _)| var))
            .map(|key| {
                let path = LEGACY_ENV
                    .iter()
                    .find(|(var, _)| key.as_str().eq_ignore_ascii_case(var))
                    .map(|(_, path)| *path)
                    .unwrap_or(key.as_str());
                path.to_string().into()
            });

        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BEF__").split("__"))
            .merge(legacy)
    }

    pub fn from_figment(figment: Figment) -> Result<Self, PipelineError> {
        let cfg: Config = figment.extract().map_err(|err| PipelineError::Configuration {
            missing: vec![],
            invalid: err
                .into_iter()
                .map(|e| format!("{}: {}", e.path.join("."), e.kind))
                .collect(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks every setting and reports all offending keys at once.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut missing = Vec::new();
        let mut invalid = Vec::new();

        let endpoint = self.forecast.endpoint_url.trim();
        if endpoint.is_empty() {
            missing.push("forecast.endpoint_url".to_string());
        } else if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            invalid.push("forecast.endpoint_url (must be an http(s) URL)".to_string());
        }
        if self.forecast.api_key.trim().is_empty() {
            missing.push("forecast.api_key".to_string());
        }
        if self.forecast.timeout_seconds == Some(0) {
            invalid.push("forecast.timeout_seconds (must be > 0 when set)".to_string());
        }
        if self.pipeline.min_window_length == 0 {
            invalid.push("pipeline.min_window_length (must be >= 1)".to_string());
        }

        match self.storage.backend {
            StorageBackend::Csv => {
                if self.storage.output_dir.as_os_str().is_empty() {
                    missing.push("storage.output_dir".to_string());
                }
            }
            StorageBackend::Postgres => {
                if self.db.url.trim().is_empty() {
                    missing.push("db.url".to_string());
                }
                if cfg!(not(feature = "db")) {
                    invalid.push("storage.backend (postgres requires the `db` feature)".to_string());
                }
            }
        }

        if missing.is_empty() && invalid.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Configuration { missing, invalid })
        }
    }
}
