//! HTTP client module: batch delivery and sensor catalog fetching.
//!
//! Delivery goes through the [`Transport`] trait so the simulation loop can
//! be driven against a mock in tests. The HTTP implementation reuses one
//! pooled `reqwest::Client` for every request.

use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::{Client, StatusCode, Url};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::{RangeTable, SensorCatalog, SensorRecord};
use crate::config::Config;
use crate::reading::Batch;
use crate::stats::{RunStatus, StatusKind};

/// Errors that can occur during HTTP client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// Server returned a non-2xx status code
    #[error("Server error ({code}): {message}")]
    Status { code: StatusCode, message: String },

    /// Endpoint URL is empty or malformed
    #[error("Invalid endpoint URL {0:?}")]
    InvalidUrl(String),

    /// Request timeout
    #[error("Request timed out")]
    Timeout,

    /// Failed to decode a response body
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The HTTP client could not be built
    #[error("Client configuration error: {0}")]
    Build(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Request(err)
        }
    }
}

/// Outcome of a successful delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Number of readings accepted by the sink
    pub records: usize,

    /// Wall time spent on the request
    pub duration: Duration,
}

/// Delivery of reading batches to an ingestion sink.
///
/// One call per batch. Implementations must not retry or re-queue.
#[trait_variant::make(Transport: Send)]
pub trait LocalTransport {
    /// Deliver one batch.
    ///
    /// # Errors
    /// Returns the delivery failure; the batch is dropped by the caller.
    async fn send(&self, batch: &Batch) -> Result<Delivery, ClientError>;
}

fn build_client(timeout: Option<Duration>) -> Result<Client, ClientError> {
    let mut builder = Client::builder()
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90));
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(|e| ClientError::Build(e.to_string()))
}

fn parse_endpoint(endpoint: &str) -> Result<Url, ClientError> {
    if endpoint.trim().is_empty() {
        return Err(ClientError::InvalidUrl(endpoint.to_string()));
    }
    Url::parse(endpoint).map_err(|_| ClientError::InvalidUrl(endpoint.to_string()))
}

async fn error_status(response: reqwest::Response) -> ClientError {
    let code = response.status();
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    ClientError::Status { code, message }
}

/// Posts batches as a JSON array of flattened readings.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    /// Create a transport for the configured ingestion endpoint.
    ///
    /// The endpoint is checked per request, so a bad URL shows up as a
    /// delivery failure rather than a startup error.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        Self::with_settings(config.endpoint_url.clone(), config.request_timeout)
    }

    pub fn with_settings(
        endpoint: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for HttpTransport {
    async fn send(&self, batch: &Batch) -> Result<Delivery, ClientError> {
        let url = parse_endpoint(&self.endpoint)?;

        debug!(
            batch_size = batch.len(),
            batch_id = %batch.id,
            url = %url,
            "Sending reading batch"
        );

        let started = Instant::now();
        let response = self.client.post(url).json(&batch.readings).send().await?;

        if !response.status().is_success() {
            return Err(error_status(response).await);
        }

        let delivery = Delivery {
            records: batch.len(),
            duration: started.elapsed(),
        };
        info!(
            batch_size = delivery.records,
            duration_ms = delivery.duration.as_millis() as u64,
            "Successfully sent reading batch"
        );
        Ok(delivery)
    }
}

/// Loads the sensor catalog, remotely or by local synthesis.
#[derive(Debug, Clone)]
pub struct SensorSource {
    client: Client,
    endpoint: String,
    fetch: bool,
    max_sensors: usize,
    ranges: RangeTable,
}

impl SensorSource {
    pub fn new(config: &Config, ranges: RangeTable) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_client(config.request_timeout)?,
            endpoint: config.sensors_endpoint.clone(),
            fetch: config.fetch_sensors,
            max_sensors: config.max_sensors,
            ranges,
        })
    }

    /// Fetch raw sensor records from the catalog endpoint.
    pub async fn fetch_records(&self) -> Result<Vec<SensorRecord>, ClientError> {
        let url = parse_endpoint(&self.endpoint)?;
        debug!(url = %url, "Fetching sensor catalog");

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(error_status(response).await);
        }

        let body = response.text().await?;
        let values: Vec<serde_json::Value> =
            serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(SensorRecord::parse_each(values))
    }

    /// Build the catalog for a run.
    ///
    /// Fetch failures and empty catalogs fall back to synthesized sensors
    /// and report a warning status; they never fail the run.
    pub async fn load<R: Rng>(&self, rng: &mut R) -> (SensorCatalog, RunStatus) {
        if !self.fetch {
            let catalog = self.synthesize(rng);
            info!(sensors = catalog.len(), "Using locally generated sensors");
            let status = RunStatus::new(
                StatusKind::Idle,
                format!("Generated {} local sensors", catalog.len()),
            );
            return (catalog, status);
        }

        let reason = match self.fetch_records().await {
            Ok(records) => {
                let catalog = SensorCatalog::from_records(records, self.max_sensors, &self.ranges);
                if !catalog.is_empty() {
                    info!(sensors = catalog.len(), "Loaded sensor catalog");
                    let status = RunStatus::new(
                        StatusKind::Idle,
                        format!("Loaded {} sensors", catalog.len()),
                    );
                    return (catalog, status);
                }
                "sensor catalog is empty".to_string()
            }
            Err(e) => e.to_string(),
        };

        let catalog = self.synthesize(rng);
        warn!(
            error = %reason,
            sensors = catalog.len(),
            "Sensor catalog unavailable, using generated sensors"
        );
        let status = RunStatus::warning(format!(
            "Could not fetch sensors ({}); generated {} local sensors",
            reason,
            catalog.len()
        ));
        (catalog, status)
    }

    fn synthesize<R: Rng>(&self, rng: &mut R) -> SensorCatalog {
        SensorCatalog::synthesize(self.max_sensors, &self.ranges, rng)
    }
}
