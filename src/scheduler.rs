//! Simulation scheduler: the tick loop, dispatch and shutdown drain.
//!
//! A single tokio task owns the run state (buffer, stats, rng) and reacts to
//! three events with `tokio::select!`: the stop signal, the tick interval and
//! completion of the in-flight send. Sends run as spawned tasks so ticks keep
//! producing readings while a delivery is outstanding.

use std::future;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::buffer::ReadingBuffer;
use crate::catalog::{RangeTable, SensorCatalog, TypeFilter};
use crate::client::{ClientError, Delivery, SensorSource, Transport};
use crate::config::{Config, ConfigError};
use crate::fault::FaultInjector;
use crate::generator::generate;
use crate::reading::Batch;
use crate::stats::{RunStatus, StatsSnapshot, StatsTracker};

/// Chance that an eligible sensor reports on a given tick.
pub const REPORT_PROBABILITY: f64 = 0.8;

type SendResult = Result<Delivery, ClientError>;

/// Errors that stop a simulation from starting or finishing cleanly.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] ClientError),

    #[error("simulation task failed: {0}")]
    Task(#[from] JoinError),
}

/// Summary returned by [`SimulationHandle::stop`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub ticks: u64,
    pub stats: StatsSnapshot,
}

/// Mutable state of one run, owned by the simulation task.
#[derive(Debug)]
pub struct RunState {
    buffer: ReadingBuffer,
    stats: StatsTracker,
    injector: FaultInjector,
    periodicity_secs: u32,
    rng: StdRng,
}

impl RunState {
    pub fn new(config: &Config, rng: StdRng) -> Self {
        Self {
            buffer: ReadingBuffer::new(config.batch_size),
            stats: StatsTracker::new(),
            injector: FaultInjector::new(config.fault_chance),
            periodicity_secs: config.periodicity_secs,
            rng,
        }
    }

    /// Generate one round of readings and append them to the buffer.
    ///
    /// Returns the number of readings produced. An empty catalog or filter
    /// yields zero readings.
    pub fn tick(&mut self, catalog: &SensorCatalog, filter: &TypeFilter, now: Instant) -> usize {
        let mut readings = Vec::new();
        for sensor in catalog.filtered(filter) {
            if !self.rng.gen_bool(REPORT_PROBABILITY) {
                continue;
            }
            let reading = generate(sensor, self.periodicity_secs, &mut self.rng);
            readings.push(self.injector.maybe_inject(reading, &mut self.rng));
        }

        let count = readings.len();
        self.buffer.enqueue(readings);
        self.stats.record_generation(now, count);
        count
    }

    /// Cut the next full batch for delivery, if dispatch is allowed.
    pub fn dispatch_ready(&mut self) -> Option<Batch> {
        let batch = self.buffer.take_ready_batch()?;
        self.stats.record_attempt(&batch);
        Some(batch)
    }

    /// Cut the next batch of the shutdown drain.
    pub fn drain_final(&mut self) -> Option<Batch> {
        let batch = self.buffer.take_final_batch()?;
        self.stats.record_attempt(&batch);
        Some(batch)
    }

    /// Record a delivery outcome and release the in-flight slot.
    pub fn finish_send(&mut self, result: SendResult) {
        if let Err(e) = &result {
            warn!(error = %e, "Batch delivery failed, dropping batch");
        }
        self.stats.record_delivery(&result);
        self.buffer.complete_in_flight();
    }

    fn finish_joined(&mut self, joined: Result<SendResult, JoinError>) {
        match joined {
            Ok(result) => self.finish_send(result),
            Err(e) => {
                warn!(error = %e, "Send task aborted");
                self.stats.record_failure(&e);
                self.buffer.complete_in_flight();
            }
        }
    }

    pub fn set_status(&mut self, status: RunStatus) {
        self.stats.set_status(status);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot(self.buffer.len())
    }
}

/// Starts simulation runs against a transport.
pub struct Simulator<T> {
    config: Config,
    transport: Arc<T>,
}

impl<T: Transport + Sync + 'static> Simulator<T> {
    pub fn new(config: Config, transport: T) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validate the config, load the sensor catalog and start ticking.
    ///
    /// # Errors
    ///
    /// Returns `SimulationError::Config` for invalid settings or ranges.
    /// An unreachable sensor source is not an error; synthesized sensors
    /// are used instead.
    pub async fn start(&self) -> Result<SimulationHandle, SimulationError> {
        self.config.validate()?;

        let ranges = match &self.config.ranges_file {
            Some(path) => RangeTable::from_file(path)?,
            None => RangeTable::defaults(),
        };
        let mut rng = self.rng();
        let source = SensorSource::new(&self.config, ranges)?;
        let (catalog, status) = source.load(&mut rng).await;

        Ok(self.spawn(catalog, status, rng))
    }

    /// Start ticking over an already loaded catalog.
    pub fn start_with_catalog(
        &self,
        catalog: SensorCatalog,
    ) -> Result<SimulationHandle, SimulationError> {
        self.config.validate()?;
        Ok(self.spawn(catalog, RunStatus::default(), self.rng()))
    }

    fn rng(&self) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    fn spawn(&self, catalog: SensorCatalog, status: RunStatus, rng: StdRng) -> SimulationHandle {
        let filter: TypeFilter = self.config.sensor_types.iter().copied().collect();
        let active = filter.restrict_to(&catalog.available_types());
        if active.is_empty() {
            warn!("No configured sensor type is present in the catalog");
        }

        let period = self.config.tick_period();
        info!(
            sensors = catalog.len(),
            active_types = ?active.types().collect::<Vec<_>>(),
            tick_ms = period.as_millis() as u64,
            batch_size = self.config.batch_size,
            fault_chance = self.config.fault_chance,
            "Starting simulation"
        );

        let mut state = RunState::new(&self.config, rng);
        state.set_status(status);

        let (stop_tx, stop_rx) = oneshot::channel();
        let (filter_tx, filter_rx) = watch::channel(filter);
        let (catalog_tx, catalog_rx) = watch::channel(Arc::new(catalog));
        let (stats_tx, stats_rx) = watch::channel(state.snapshot());

        let task = tokio::spawn(run(
            state,
            Arc::clone(&self.transport),
            period,
            Channels {
                stop: stop_rx,
                filter: filter_rx,
                catalog: catalog_rx,
                stats: stats_tx,
            },
        ));

        SimulationHandle {
            stop_tx,
            filter_tx,
            catalog_tx,
            stats_rx,
            task,
        }
    }
}

/// Control surface of a running simulation.
pub struct SimulationHandle {
    stop_tx: oneshot::Sender<()>,
    filter_tx: watch::Sender<TypeFilter>,
    catalog_tx: watch::Sender<Arc<SensorCatalog>>,
    stats_rx: watch::Receiver<StatsSnapshot>,
    task: JoinHandle<RunReport>,
}

impl SimulationHandle {
    /// Replace the set of sensor types allowed to report from the next tick.
    pub fn set_type_filter(&self, filter: TypeFilter) {
        self.filter_tx.send_replace(filter);
    }

    /// Swap in a refreshed catalog from the next tick.
    pub fn replace_catalog(&self, catalog: SensorCatalog) {
        self.catalog_tx.send_replace(Arc::new(catalog));
    }

    /// Latest published statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatsSnapshot> {
        self.stats_rx.clone()
    }

    /// Stop ticking, finish the in-flight send and drain the buffer.
    pub async fn stop(self) -> Result<RunReport, SimulationError> {
        let SimulationHandle { stop_tx, task, .. } = self;
        // The task may already be gone; the join below reports why.
        let _ = stop_tx.send(());
        Ok(task.await?)
    }
}

struct Channels {
    stop: oneshot::Receiver<()>,
    filter: watch::Receiver<TypeFilter>,
    catalog: watch::Receiver<Arc<SensorCatalog>>,
    stats: watch::Sender<StatsSnapshot>,
}

fn spawn_send<T: Transport + Sync + 'static>(
    transport: &Arc<T>,
    batch: Batch,
) -> JoinHandle<SendResult> {
    let transport = Arc::clone(transport);
    debug!(batch_id = %batch.id, batch_size = batch.len(), "Dispatching batch");
    tokio::spawn(async move { transport.send(&batch).await })
}

async fn wait_for_send(
    in_flight: &mut Option<JoinHandle<SendResult>>,
) -> Result<SendResult, JoinError> {
    match in_flight.as_mut() {
        Some(handle) => handle.await,
        None => future::pending().await,
    }
}

async fn run<T: Transport + Sync + 'static>(
    mut state: RunState,
    transport: Arc<T>,
    period: std::time::Duration,
    mut channels: Channels,
) -> RunReport {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut in_flight: Option<JoinHandle<SendResult>> = None;
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            biased;

            _ = &mut channels.stop => break,

            _ = ticker.tick() => {
                let catalog: Arc<SensorCatalog> = channels.catalog.borrow().clone();
                let filter = channels.filter.borrow().clone();
                let generated = state.tick(&catalog, &filter, Instant::now());
                ticks += 1;
                debug!(tick = ticks, generated = generated, buffered = state.buffered(), "Tick");

                if in_flight.is_none() {
                    in_flight = state.dispatch_ready().map(|batch| spawn_send(&transport, batch));
                }
            }

            joined = wait_for_send(&mut in_flight) => {
                in_flight = None;
                state.finish_joined(joined);
                in_flight = state.dispatch_ready().map(|batch| spawn_send(&transport, batch));
            }
        }

        channels.stats.send_replace(state.snapshot());
    }

    drop(ticker);
    info!(ticks = ticks, buffered = state.buffered(), "Stopping simulation, draining buffer");

    if let Some(handle) = in_flight.take() {
        let joined = handle.await;
        state.finish_joined(joined);
    }
    while let Some(batch) = state.drain_final() {
        let result = transport.send(&batch).await;
        state.finish_send(result);
    }

    let stats = state.snapshot();
    channels.stats.send_replace(stats.clone());
    info!(
        ticks = ticks,
        total_sent = stats.total_sent,
        faults_detected = stats.faults_detected,
        batches_failed = stats.batches_failed,
        "Simulation stopped"
    );
    RunReport { ticks, stats }
}
