//! Hourly energy forecasting for instrumented buildings.
//!
//! Raw sensor readings are cleaned and resampled into per-building windows,
//! sent as one batch to a remote forecast service, and the returned horizons
//! are stored as predictions. Predictions joined with observed conditions
//! drive a fixed rule ladder that emits operational recommendations.

pub mod api;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod forecast;
pub mod ingest;
pub mod optimizer;
pub mod repo;
pub mod telemetry;

pub use error::PipelineError;
