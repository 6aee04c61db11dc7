use anyhow::{Context, Result};
use axum::Router;
use building_energy_forecast::{api, config, controller, repo::SourceRef, telemetry};
use clap::{Parser, Subcommand};
use config::Config;
use serde::Serialize;
use std::path::PathBuf;
use telemetry::init_tracing;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "building-energy-forecast")]
#[command(about = "Forecast building energy use and derive operating recommendations", long_about = None)]
struct Args {
    /// Configuration file (TOML); environment variables override it
    #[arg(long, env = "BEF_CONFIG", default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP invocation API
    Serve,

    /// Forecast, recommend and persist in one invocation
    Run {
        /// Sensor CSV export; defaults to pipeline.sensor_file
        #[arg(long)]
        input_file: Option<PathBuf>,
    },

    /// Forecast and persist predictions only
    Predict {
        #[arg(long)]
        input_file: Option<PathBuf>,
    },

    /// Derive recommendations from a predictions CSV and a sensor CSV
    Recommend {
        #[arg(long, default_value = "./predictions/latest_predictions.csv")]
        predictions_file: PathBuf,

        #[arg(long)]
        sensor_file: Option<PathBuf>,
    },

    /// Append the readings of a realtime snapshot (JSON) to the sensor table
    Ingest {
        #[arg(long)]
        snapshot_file: PathBuf,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn serve(state: controller::AppState) -> Result<()> {
    let addr = state.cfg.server.socket_addr()?;
    if state.cfg.server.host == "0.0.0.0" {
        warn!("server binding to 0.0.0.0, the API will be reachable from the network");
    }

    let app: Router = api::router(state);
    info!(%addr, "starting building energy forecast API");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    warn!("shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e).context("failed to read .env");
        }
    }
    init_tracing();

    let args = Args::parse();
    let cfg = Config::load_from(&args.config)?;
    let default_sensors = cfg.pipeline.sensor_file.clone();
    let state = controller::AppState::new(cfg).await?;
    let pipeline = state.pipeline.clone();

    match args.command {
        Command::Serve => serve(state).await?,
        Command::Run { input_file } => {
            let source = SourceRef::File(input_file.unwrap_or(default_sensors));
            print_json(&pipeline.run(&source).await?)?;
        }
        Command::Predict { input_file } => {
            let source = SourceRef::File(input_file.unwrap_or(default_sensors));
            print_json(&pipeline.predict(&source).await?)?;
        }
        Command::Recommend {
            predictions_file,
            sensor_file,
        } => {
            let predictions = SourceRef::File(predictions_file);
            let sensors = SourceRef::File(sensor_file.unwrap_or(default_sensors));
            print_json(&pipeline.recommend(&predictions, &sensors).await?)?;
        }
        Command::Ingest { snapshot_file } => {
            let text = std::fs::read_to_string(&snapshot_file)
                .with_context(|| format!("failed to read {}", snapshot_file.display()))?;
            let snapshot: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("{} is not valid JSON", snapshot_file.display()))?;
            print_json(&pipeline.ingest_snapshot(&snapshot).await?)?;
        }
    }

    Ok(())
}
