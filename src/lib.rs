//! Traffic Sensor Simulator Library
//!
//! This library provides the components of a synthetic traffic telemetry
//! source for testing ingestion pipelines:
//!
//! - **config**: Environment-based configuration for the simulator
//! - **catalog**: Sensor types, parameter ranges and the sensor catalog
//! - **reading**: Reading and batch wire types
//! - **generator**: Per-event-kind reading generators
//! - **fault**: Random corruption of readings
//! - **buffer**: FIFO buffering with single-flight batch cutting
//! - **stats**: Counters, per-minute rate and push status
//! - **client**: HTTP transport and sensor catalog fetching
//! - **scheduler**: The tick loop tying everything together
//!
//! # Example
//!
//! ```no_run
//! use traffic_sensor_sim::client::HttpTransport;
//! use traffic_sensor_sim::config::Config;
//! use traffic_sensor_sim::scheduler::Simulator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let transport = HttpTransport::new(&config)?;
//!
//!     let simulator = Simulator::new(config, transport);
//!     let handle = simulator.start().await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!     let report = handle.stop().await?;
//!     println!("sent {} readings", report.stats.total_sent);
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod catalog;
pub mod client;
pub mod config;
pub mod fault;
pub mod generator;
pub mod reading;
pub mod scheduler;
pub mod stats;

// Re-export commonly used types at crate root for convenience
pub use buffer::{BufferStats, ReadingBuffer};
pub use catalog::{RangeTable, Sensor, SensorCatalog, SensorType, TypeFilter};
pub use client::{ClientError, Delivery, HttpTransport, SensorSource, Transport};
pub use config::{Config, ConfigError};
pub use fault::{FaultInjector, FaultKind};
pub use reading::{Batch, EventKind, Reading};
pub use scheduler::{RunReport, SimulationError, SimulationHandle, Simulator};
pub use stats::{RunStatus, StatsSnapshot, StatusKind};
