//! Traffic Sensor Simulator - synthetic telemetry for a traffic ingestion pipeline
//!
//! This service loads a sensor catalog (or synthesizes one), generates
//! readings on a fixed tick, corrupts a configurable share of them and
//! batch-posts everything to an HTTP ingestion endpoint.
//!
//! ## Configuration
//!
//! Settings come from environment variables, optionally via a `.env` file:
//!
//! - `TRAFFIC_SIM_ENDPOINT_URL`: ingestion endpoint (default: http://localhost:9090/ingest)
//! - `TRAFFIC_SIM_SENSORS_ENDPOINT`: sensor catalog endpoint (default: http://localhost:9090/sensors)
//! - `TRAFFIC_SIM_FETCH_SENSORS`: fetch the catalog instead of synthesizing (default: true)
//! - `TRAFFIC_SIM_MAX_SENSORS`: catalog cap, 0 for none (default: 1000)
//! - `TRAFFIC_SIM_BATCH_SIZE`: readings per POST (default: 50)
//! - `TRAFFIC_SIM_SIMULATION_SPEED`: tick speed multiplier (default: 1.0)
//! - `TRAFFIC_SIM_FAULT_CHANCE`: per-reading fault probability (default: 0.05)
//! - `TRAFFIC_SIM_PERIODICITY_SECS`: reported measurement interval (default: 60)
//! - `TRAFFIC_SIM_BASE_TICK_MS`: tick period at speed 1.0 (default: 1000)
//! - `TRAFFIC_SIM_SENSOR_TYPES`: comma-separated allow-list (default: all)
//! - `TRAFFIC_SIM_RANGES_FILE`: JSON file overriding parameter ranges
//! - `TRAFFIC_SIM_REQUEST_TIMEOUT_SECS`: HTTP timeout (default: none)
//! - `TRAFFIC_SIM_SEED`: RNG seed for reproducible runs
//! - `RUST_LOG`: Logging level filter (default: info)

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::time::{interval_at, Instant};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use traffic_sensor_sim::client::HttpTransport;
use traffic_sensor_sim::config::Config;
use traffic_sensor_sim::scheduler::{SimulationHandle, Simulator};

/// Default seconds between progress reports
const DEFAULT_REPORT_INTERVAL_SECS: u64 = 30;

/// Traffic sensor telemetry simulator
#[derive(Parser, Debug)]
#[command(name = "traffic-sensor-sim", version, about)]
struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value = "compact", env = "TRAFFIC_SIM_LOG_FORMAT")]
    log_format: LogFormat,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    duration: Option<u64>,

    /// Seconds between progress reports
    #[arg(long, default_value_t = DEFAULT_REPORT_INTERVAL_SECS)]
    report_interval: u64,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    Pretty,
    /// Compact single-line format
    #[default]
    Compact,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli)?;

    info!("Starting Traffic Sensor Simulator...");

    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                endpoint_url = %config.endpoint_url,
                sensors_endpoint = %config.sensors_endpoint,
                fetch_sensors = config.fetch_sensors,
                batch_size = config.batch_size,
                simulation_speed = config.simulation_speed,
                fault_chance = config.fault_chance,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return Err(e).context("invalid configuration");
        }
    };

    let transport = HttpTransport::new(&config).context("failed to create HTTP client")?;
    info!(endpoint = %transport.endpoint(), "HTTP transport initialized");

    let simulator = Simulator::new(config, transport);
    let handle = simulator.start().await.context("failed to start simulation")?;

    match cli.duration {
        Some(secs) => info!(duration_secs = secs, "Simulator running"),
        None => info!("Simulator running. Press Ctrl+C to stop."),
    }

    wait_for_shutdown(&handle, cli.duration, cli.report_interval).await;

    info!("Initiating graceful shutdown...");
    let report = handle.stop().await.context("simulation task failed")?;
    info!(
        ticks = report.ticks,
        readings_generated = report.stats.readings_generated,
        total_sent = report.stats.total_sent,
        faults_detected = report.stats.faults_detected,
        batches_sent = report.stats.batches_sent,
        batches_failed = report.stats.batches_failed,
        status = %report.stats.status,
        "Traffic Sensor Simulator stopped"
    );

    Ok(())
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(cli: &Cli) -> Result<()> {
    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = match cli.log_format {
        LogFormat::Json => fmt::layer().json().with_target(true).boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Compact => fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

/// Log progress until Ctrl+C or the optional run duration elapses.
async fn wait_for_shutdown(handle: &SimulationHandle, duration: Option<u64>, report_secs: u64) {
    let report_every = Duration::from_secs(report_secs.max(1));
    let mut reports = interval_at(Instant::now() + report_every, report_every);
    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("Shutdown signal received, stopping..."),
                    Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
                }
                break;
            }
            _ = &mut deadline => {
                info!("Run duration elapsed, stopping...");
                break;
            }
            _ = reports.tick() => {
                let stats = handle.snapshot();
                info!(
                    readings_generated = stats.readings_generated,
                    per_minute = stats.per_minute_rate,
                    total_sent = stats.total_sent,
                    faults_detected = stats.faults_detected,
                    buffered = stats.buffered,
                    status = %stats.status,
                    "Simulator progress"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_report_interval() {
        assert!(DEFAULT_REPORT_INTERVAL_SECS > 0);
        assert!(DEFAULT_REPORT_INTERVAL_SECS <= 300);
    }

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["traffic-sensor-sim", "-vv", "--duration", "10"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.duration, Some(10));
        assert_eq!(cli.report_interval, DEFAULT_REPORT_INTERVAL_SECS);
    }

    #[test]
    fn test_cli_log_format() {
        let cli = Cli::parse_from(["traffic-sensor-sim", "--log-format", "json"]);
        assert!(matches!(cli.log_format, LogFormat::Json));
    }
}
