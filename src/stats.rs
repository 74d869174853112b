//! Run statistics and the user-visible push status.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::client::{ClientError, Delivery};
use crate::reading::Batch;

/// Width of the sliding window behind the per-minute rate.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Severity of the last visible status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    #[default]
    Idle,
    Sending,
    Success,
    Warning,
    Error,
}

/// Last status shown for the run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RunStatus {
    pub kind: StatusKind,
    pub message: String,
}

impl RunStatus {
    pub fn new(kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Warning, message)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Point-in-time copy of the counters, published to observers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_sent: u64,
    pub faults_detected: u64,
    pub readings_generated: u64,
    pub batches_sent: u64,
    pub batches_failed: u64,
    pub per_minute_rate: u64,
    pub last_duration_ms: Option<u64>,
    pub buffered: usize,
    pub status: RunStatus,
}

/// Counters and the rate window for one run.
#[derive(Debug, Default)]
pub struct StatsTracker {
    window: VecDeque<(Instant, usize)>,
    total_sent: u64,
    faults_detected: u64,
    readings_generated: u64,
    batches_sent: u64,
    batches_failed: u64,
    last_duration: Option<Duration>,
    last_minute_rate: u64,
    status: RunStatus,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the readings produced by one tick.
    pub fn record_generation(&mut self, now: Instant, count: usize) {
        self.readings_generated += count as u64;
        self.window.push_back((now, count));
        self.last_minute_rate = self.per_minute_rate(now);
    }

    /// Readings generated within the last [`RATE_WINDOW`] before `now`.
    ///
    /// This sums the readings of each tick rather than counting ticks, so a
    /// tick that produced 12 readings adds 12. Entries older than the window
    /// are pruned.
    pub fn per_minute_rate(&mut self, now: Instant) -> u64 {
        while let Some((at, _)) = self.window.front() {
            if now.saturating_duration_since(*at) > RATE_WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }
        self.window.iter().map(|(_, count)| *count as u64).sum()
    }

    /// Account for a batch handed to the transport.
    ///
    /// `total_sent` counts attempts, so a later failure does not roll it back.
    pub fn record_attempt(&mut self, batch: &Batch) {
        self.total_sent += batch.len() as u64;
        self.faults_detected += batch.low_confidence_count() as u64;
        self.status = RunStatus::new(
            StatusKind::Sending,
            format!("Sending {} records", batch.len()),
        );
    }

    /// Account for the outcome of a delivery attempt.
    pub fn record_delivery(&mut self, result: &Result<Delivery, ClientError>) {
        match result {
            Ok(delivery) => {
                self.batches_sent += 1;
                self.last_duration = Some(delivery.duration);
                self.status = RunStatus::new(
                    StatusKind::Success,
                    format!(
                        "Sent {} records in {}ms",
                        delivery.records,
                        delivery.duration.as_millis()
                    ),
                );
            }
            Err(e) => self.record_failure(e),
        }
    }

    /// Account for a delivery attempt that produced no result.
    pub fn record_failure(&mut self, error: impl fmt::Display) {
        self.batches_failed += 1;
        self.status = RunStatus::new(StatusKind::Error, format!("Delivery failed: {}", error));
    }

    pub fn set_status(&mut self, status: RunStatus) {
        self.status = status;
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn total_sent(&self) -> u64 {
        self.total_sent
    }

    pub fn faults_detected(&self) -> u64 {
        self.faults_detected
    }

    pub fn snapshot(&self, buffered: usize) -> StatsSnapshot {
        StatsSnapshot {
            total_sent: self.total_sent,
            faults_detected: self.faults_detected,
            readings_generated: self.readings_generated,
            batches_sent: self.batches_sent,
            batches_failed: self.batches_failed,
            per_minute_rate: self.last_minute_rate,
            last_duration_ms: self.last_duration.map(|d| d.as_millis() as u64),
            buffered,
            status: self.status.clone(),
        }
    }
}
