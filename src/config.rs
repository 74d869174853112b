//! Configuration module for the traffic sensor simulator.
//!
//! Settings are read from environment variables (a `.env` file is honoured by
//! the binary) and validated before a simulation run is allowed to start.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::catalog::SensorType;

/// Default ingestion endpoint
const DEFAULT_ENDPOINT_URL: &str = "http://localhost:9090/ingest";

/// Default sensor catalog endpoint
const DEFAULT_SENSORS_ENDPOINT: &str = "http://localhost:9090/sensors";

/// Default batch size (number of readings per POST)
const DEFAULT_BATCH_SIZE: usize = 50;

/// Default cap on the number of sensors taken from the catalog
const DEFAULT_MAX_SENSORS: usize = 1000;

/// Default global periodicity reported in generated payloads
const DEFAULT_PERIODICITY_SECS: u32 = 60;

/// Default fault probability per reading
const DEFAULT_FAULT_CHANCE: f64 = 0.05;

/// Base tick period before the speed multiplier is applied
const DEFAULT_BASE_TICK_MS: u64 = 1000;

/// Maximum allowed batch size to keep payloads bounded
const MAX_BATCH_SIZE: usize = 10_000;

const MAX_SENSORS_LIMIT: usize = 100_000;

const MAX_SIMULATION_SPEED: f64 = 100.0;

const MAX_PERIODICITY_SECS: u32 = 86_400;

/// Ticks faster than this would starve the dispatcher
const MIN_BASE_TICK_MS: u64 = 10;

/// Errors raised while loading or validating configuration.
///
/// All of these are reported before a run enters the running state.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable holds an unusable value
    #[error("configuration error for {var}: {message}")]
    InvalidVar { var: &'static str, message: String },

    /// A parameter range is malformed
    #[error("invalid {field} range for {sensor_type}: {message}")]
    InvalidRange {
        sensor_type: String,
        field: &'static str,
        message: String,
    },

    /// The sensor type allow-list selects nothing
    #[error("sensor type allow-list is empty")]
    EmptyTypeFilter,

    /// The parameter ranges file could not be read
    #[error("failed to read ranges file {path}: {source}")]
    RangesIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The parameter ranges file is not valid JSON for a range table
    #[error("failed to parse ranges file: {0}")]
    RangesParse(#[from] serde_json::Error),
}

impl ConfigError {
    fn invalid(var: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidVar {
            var,
            message: message.into(),
        }
    }
}

/// Configuration for a simulation run.
///
/// Environment variables:
/// - `TRAFFIC_SIM_ENDPOINT_URL`: ingestion endpoint (default: http://localhost:9090/ingest)
/// - `TRAFFIC_SIM_SENSORS_ENDPOINT`: sensor catalog endpoint (default: http://localhost:9090/sensors)
/// - `TRAFFIC_SIM_FETCH_SENSORS`: fetch the catalog instead of synthesizing it (default: true)
/// - `TRAFFIC_SIM_MAX_SENSORS`: cap on catalog size, 0 means no cap (default: 1000)
/// - `TRAFFIC_SIM_BATCH_SIZE`: readings per batch (default: 50)
/// - `TRAFFIC_SIM_SIMULATION_SPEED`: tick rate multiplier (default: 1.0)
/// - `TRAFFIC_SIM_FAULT_CHANCE`: per-reading fault probability (default: 0.05)
/// - `TRAFFIC_SIM_PERIODICITY_SECS`: interval written into payloads (default: 60)
/// - `TRAFFIC_SIM_BASE_TICK_MS`: tick period at speed 1.0 (default: 1000)
/// - `TRAFFIC_SIM_SENSOR_TYPES`: comma separated allow-list (default: all types)
/// - `TRAFFIC_SIM_RANGES_FILE`: optional JSON file overriding type-level ranges
/// - `TRAFFIC_SIM_REQUEST_TIMEOUT_SECS`: optional HTTP timeout
/// - `TRAFFIC_SIM_SEED`: optional RNG seed for reproducible runs
#[derive(Debug, Clone)]
pub struct Config {
    /// Full URL readings are POSTed to
    pub endpoint_url: String,

    /// Full URL the sensor catalog is fetched from
    pub sensors_endpoint: String,

    /// Whether to fetch sensors or synthesize them locally
    pub fetch_sensors: bool,

    /// Maximum number of sensors used in a run (0 = unlimited)
    pub max_sensors: usize,

    /// Number of readings per delivered batch
    pub batch_size: usize,

    /// Tick rate multiplier
    pub simulation_speed: f64,

    /// Probability that a generated reading is corrupted
    pub fault_chance: f64,

    /// Measurement interval written into generated payloads
    pub periodicity_secs: u32,

    /// Tick period at simulation speed 1.0
    pub base_tick: Duration,

    /// Sensor types allowed to report
    pub sensor_types: Vec<SensorType>,

    /// Optional JSON file with per-type parameter range overrides
    pub ranges_file: Option<PathBuf>,

    /// HTTP request timeout; `None` leaves the client default in place
    pub request_timeout: Option<Duration>,

    /// Seed for the simulation RNG
    pub seed: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but cannot be parsed or
    /// falls outside its allowed range.
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint_url = env::var("TRAFFIC_SIM_ENDPOINT_URL")
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|_| DEFAULT_ENDPOINT_URL.to_string());

        let sensors_endpoint = env::var("TRAFFIC_SIM_SENSORS_ENDPOINT")
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|_| DEFAULT_SENSORS_ENDPOINT.to_string());

        let fetch_sensors = Self::parse_bool("TRAFFIC_SIM_FETCH_SENSORS", true)?;
        let max_sensors = Self::parse_max_sensors()?;
        let batch_size = Self::parse_batch_size()?;
        let simulation_speed = Self::parse_simulation_speed()?;
        let fault_chance = Self::parse_fault_chance()?;
        let periodicity_secs = Self::parse_periodicity()?;
        let base_tick = Duration::from_millis(Self::parse_base_tick()?);
        let sensor_types = Self::parse_sensor_types()?;

        let ranges_file = env::var("TRAFFIC_SIM_RANGES_FILE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let request_timeout = Self::parse_optional_u64("TRAFFIC_SIM_REQUEST_TIMEOUT_SECS")?
            .map(Duration::from_secs);

        let seed = Self::parse_optional_u64("TRAFFIC_SIM_SEED")?;

        Ok(Self {
            endpoint_url,
            sensors_endpoint,
            fetch_sensors,
            max_sensors,
            batch_size,
            simulation_speed,
            fault_chance,
            periodicity_secs,
            base_tick,
            sensor_types,
            ranges_file,
            request_timeout,
            seed,
        })
    }

    /// Tick spacing: base period divided by the speed multiplier.
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(self.base_tick.as_secs_f64() / self.simulation_speed)
    }

    /// Re-check invariants on a config that may have been built by hand.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a setting violates its bounds or the
    /// sensor type allow-list is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::invalid(
                "TRAFFIC_SIM_BATCH_SIZE",
                format!("batch size must be between 1 and {}", MAX_BATCH_SIZE),
            ));
        }
        if !self.simulation_speed.is_finite()
            || self.simulation_speed <= 0.0
            || self.simulation_speed > MAX_SIMULATION_SPEED
        {
            return Err(ConfigError::invalid(
                "TRAFFIC_SIM_SIMULATION_SPEED",
                format!(
                    "simulation speed {} must be > 0 and <= {}",
                    self.simulation_speed, MAX_SIMULATION_SPEED
                ),
            ));
        }
        if self.base_tick < Duration::from_millis(MIN_BASE_TICK_MS) {
            return Err(ConfigError::invalid(
                "TRAFFIC_SIM_BASE_TICK_MS",
                format!(
                    "base tick {}ms is below minimum ({}ms)",
                    self.base_tick.as_millis(),
                    MIN_BASE_TICK_MS
                ),
            ));
        }
        if self.periodicity_secs == 0 || self.periodicity_secs > MAX_PERIODICITY_SECS {
            return Err(ConfigError::invalid(
                "TRAFFIC_SIM_PERIODICITY_SECS",
                format!("periodicity must be between 1 and {}s", MAX_PERIODICITY_SECS),
            ));
        }
        if !(0.0..=1.0).contains(&self.fault_chance) {
            return Err(ConfigError::invalid(
                "TRAFFIC_SIM_FAULT_CHANCE",
                format!("fault chance {} must be within 0.0..=1.0", self.fault_chance),
            ));
        }
        if self.sensor_types.is_empty() {
            return Err(ConfigError::EmptyTypeFilter);
        }
        Ok(())
    }

    fn parse_bool(var: &'static str, default: bool) -> Result<bool, ConfigError> {
        match env::var(var) {
            Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => Err(ConfigError::invalid(
                    var,
                    format!("'{}' is not a valid boolean", other),
                )),
            },
            Err(_) => Ok(default),
        }
    }

    fn parse_optional_u64(var: &'static str) -> Result<Option<u64>, ConfigError> {
        match env::var(var) {
            Ok(value) if value.trim().is_empty() => Ok(None),
            Ok(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::invalid(var, format!("'{}' is not a valid number", value))),
            Err(_) => Ok(None),
        }
    }

    /// Parse batch size from environment variable with validation.
    fn parse_batch_size() -> Result<usize, ConfigError> {
        let var = "TRAFFIC_SIM_BATCH_SIZE";

        match env::var(var) {
            Ok(value) => {
                let batch_size: usize = value.trim().parse().map_err(|_| {
                    ConfigError::invalid(var, format!("'{}' is not a valid number", value))
                })?;

                if batch_size == 0 {
                    return Err(ConfigError::invalid(var, "batch size must be greater than 0"));
                }

                if batch_size > MAX_BATCH_SIZE {
                    return Err(ConfigError::invalid(
                        var,
                        format!(
                            "batch size {} exceeds maximum allowed ({})",
                            batch_size, MAX_BATCH_SIZE
                        ),
                    ));
                }

                Ok(batch_size)
            }
            Err(_) => Ok(DEFAULT_BATCH_SIZE),
        }
    }

    fn parse_max_sensors() -> Result<usize, ConfigError> {
        let var = "TRAFFIC_SIM_MAX_SENSORS";

        match env::var(var) {
            Ok(value) => {
                let max: usize = value.trim().parse().map_err(|_| {
                    ConfigError::invalid(var, format!("'{}' is not a valid number", value))
                })?;
                if max > MAX_SENSORS_LIMIT {
                    return Err(ConfigError::invalid(
                        var,
                        format!("{} exceeds maximum ({})", max, MAX_SENSORS_LIMIT),
                    ));
                }
                Ok(max)
            }
            Err(_) => Ok(DEFAULT_MAX_SENSORS),
        }
    }

    fn parse_simulation_speed() -> Result<f64, ConfigError> {
        let var = "TRAFFIC_SIM_SIMULATION_SPEED";

        match env::var(var) {
            Ok(value) => {
                let speed: f64 = value.trim().parse().map_err(|_| {
                    ConfigError::invalid(var, format!("'{}' is not a valid number", value))
                })?;
                if !speed.is_finite() || speed <= 0.0 {
                    return Err(ConfigError::invalid(var, "simulation speed must be greater than 0"));
                }
                if speed > MAX_SIMULATION_SPEED {
                    return Err(ConfigError::invalid(
                        var,
                        format!("simulation speed {} exceeds maximum ({})", speed, MAX_SIMULATION_SPEED),
                    ));
                }
                Ok(speed)
            }
            Err(_) => Ok(1.0),
        }
    }

    fn parse_fault_chance() -> Result<f64, ConfigError> {
        let var = "TRAFFIC_SIM_FAULT_CHANCE";

        match env::var(var) {
            Ok(value) => {
                let chance: f64 = value.trim().parse().map_err(|_| {
                    ConfigError::invalid(var, format!("'{}' is not a valid number", value))
                })?;
                if !(0.0..=1.0).contains(&chance) {
                    return Err(ConfigError::invalid(
                        var,
                        format!("fault chance {} must be within 0.0..=1.0", chance),
                    ));
                }
                Ok(chance)
            }
            Err(_) => Ok(DEFAULT_FAULT_CHANCE),
        }
    }

    fn parse_periodicity() -> Result<u32, ConfigError> {
        let var = "TRAFFIC_SIM_PERIODICITY_SECS";

        match env::var(var) {
            Ok(value) => {
                let secs: u32 = value.trim().parse().map_err(|_| {
                    ConfigError::invalid(var, format!("'{}' is not a valid number", value))
                })?;
                if secs == 0 || secs > MAX_PERIODICITY_SECS {
                    return Err(ConfigError::invalid(
                        var,
                        format!("periodicity must be between 1 and {}s", MAX_PERIODICITY_SECS),
                    ));
                }
                Ok(secs)
            }
            Err(_) => Ok(DEFAULT_PERIODICITY_SECS),
        }
    }

    fn parse_base_tick() -> Result<u64, ConfigError> {
        let var = "TRAFFIC_SIM_BASE_TICK_MS";

        match env::var(var) {
            Ok(value) => {
                let ms: u64 = value.trim().parse().map_err(|_| {
                    ConfigError::invalid(var, format!("'{}' is not a valid number", value))
                })?;
                if ms < MIN_BASE_TICK_MS {
                    return Err(ConfigError::invalid(
                        var,
                        format!("base tick {}ms is below minimum ({}ms)", ms, MIN_BASE_TICK_MS),
                    ));
                }
                Ok(ms)
            }
            Err(_) => Ok(DEFAULT_BASE_TICK_MS),
        }
    }

    /// Parse the comma separated sensor type allow-list.
    fn parse_sensor_types() -> Result<Vec<SensorType>, ConfigError> {
        let var = "TRAFFIC_SIM_SENSOR_TYPES";

        let value = match env::var(var) {
            Ok(value) => value,
            Err(_) => return Ok(SensorType::all().to_vec()),
        };

        let mut types = Vec::new();
        for name in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let sensor_type = SensorType::from_name(name).ok_or_else(|| {
                ConfigError::invalid(var, format!("unknown sensor type '{}'", name))
            })?;
            if !types.contains(&sensor_type) {
                types.push(sensor_type);
            }
        }

        if types.is_empty() {
            return Err(ConfigError::EmptyTypeFilter);
        }

        Ok(types)
    }
}

impl Default for Config {
    /// Configuration with every setting at its default value.
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            sensors_endpoint: DEFAULT_SENSORS_ENDPOINT.to_string(),
            fetch_sensors: true,
            max_sensors: DEFAULT_MAX_SENSORS,
            batch_size: DEFAULT_BATCH_SIZE,
            simulation_speed: 1.0,
            fault_chance: DEFAULT_FAULT_CHANCE,
            periodicity_secs: DEFAULT_PERIODICITY_SECS,
            base_tick: Duration::from_millis(DEFAULT_BASE_TICK_MS),
            sensor_types: SensorType::all().to_vec(),
            ranges_file: None,
            request_timeout: None,
            seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Tests in this module mutate process-wide environment variables.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        key: String,
        original: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let original = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                original,
            }
        }

        fn remove(key: &str) -> Self {
            let original = env::var(key).ok();
            env::remove_var(key);
            Self {
                key: key.to_string(),
                original,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.original {
                Some(val) => env::set_var(&self.key, val),
                None => env::remove_var(&self.key),
            }
        }
    }

    fn lock() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn clear_all() -> Vec<EnvGuard> {
        [
            "TRAFFIC_SIM_ENDPOINT_URL",
            "TRAFFIC_SIM_SENSORS_ENDPOINT",
            "TRAFFIC_SIM_FETCH_SENSORS",
            "TRAFFIC_SIM_MAX_SENSORS",
            "TRAFFIC_SIM_BATCH_SIZE",
            "TRAFFIC_SIM_SIMULATION_SPEED",
            "TRAFFIC_SIM_FAULT_CHANCE",
            "TRAFFIC_SIM_PERIODICITY_SECS",
            "TRAFFIC_SIM_BASE_TICK_MS",
            "TRAFFIC_SIM_SENSOR_TYPES",
            "TRAFFIC_SIM_RANGES_FILE",
            "TRAFFIC_SIM_REQUEST_TIMEOUT_SECS",
            "TRAFFIC_SIM_SEED",
        ]
        .iter()
        .map(|k| EnvGuard::remove(k))
        .collect()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.endpoint_url, "http://localhost:9090/ingest");
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_sensors, 1000);
        assert_eq!(config.sensor_types.len(), SensorType::all().len());
        assert!(config.request_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = lock();
        let _guards = clear_all();

        let config = Config::from_env().expect("Should load with defaults");
        assert_eq!(config.sensors_endpoint, "http://localhost:9090/sensors");
        assert!(config.fetch_sensors);
        assert_eq!(config.periodicity_secs, 60);
        assert_eq!(config.tick_period(), Duration::from_secs(1));
    }

    #[test]
    fn test_config_from_env_custom_values() {
        let _lock = lock();
        let _guards = clear_all();
        let _g1 = EnvGuard::set("TRAFFIC_SIM_ENDPOINT_URL", " http://sink:8080/ingest ");
        let _g2 = EnvGuard::set("TRAFFIC_SIM_BATCH_SIZE", "3");
        let _g3 = EnvGuard::set("TRAFFIC_SIM_SIMULATION_SPEED", "4");
        let _g4 = EnvGuard::set("TRAFFIC_SIM_FETCH_SENSORS", "no");
        let _g5 = EnvGuard::set("TRAFFIC_SIM_SENSOR_TYPES", "Radar, Camera,Radar");
        let _g6 = EnvGuard::set("TRAFFIC_SIM_SEED", "42");

        let config = Config::from_env().expect("Should load custom values");
        assert_eq!(config.endpoint_url, "http://sink:8080/ingest");
        assert_eq!(config.batch_size, 3);
        assert!(!config.fetch_sensors);
        assert_eq!(config.sensor_types, vec![SensorType::Radar, SensorType::Camera]);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.tick_period(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_batch_size() {
        let _lock = lock();
        let _guards = clear_all();
        let _guard = EnvGuard::set("TRAFFIC_SIM_BATCH_SIZE", "not_a_number");

        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("not a valid number"));
    }

    #[test]
    fn test_zero_batch_size() {
        let _lock = lock();
        let _guards = clear_all();
        let _guard = EnvGuard::set("TRAFFIC_SIM_BATCH_SIZE", "0");

        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("greater than 0"));
    }

    #[test]
    fn test_fault_chance_out_of_range() {
        let _lock = lock();
        let _guards = clear_all();
        let _guard = EnvGuard::set("TRAFFIC_SIM_FAULT_CHANCE", "1.5");

        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("TRAFFIC_SIM_FAULT_CHANCE"));
    }

    #[test]
    fn test_zero_simulation_speed() {
        let _lock = lock();
        let _guards = clear_all();
        let _guard = EnvGuard::set("TRAFFIC_SIM_SIMULATION_SPEED", "0");

        assert!(Config::from_env().is_err());
    }

    #[test]
    fn test_unknown_sensor_type() {
        let _lock = lock();
        let _guards = clear_all();
        let _guard = EnvGuard::set("TRAFFIC_SIM_SENSOR_TYPES", "Radar,Lidar");

        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("Lidar"));
    }

    #[test]
    fn test_empty_sensor_types() {
        let _lock = lock();
        let _guards = clear_all();
        let _guard = EnvGuard::set("TRAFFIC_SIM_SENSOR_TYPES", " , ");

        assert!(matches!(Config::from_env(), Err(ConfigError::EmptyTypeFilter)));
    }

    #[test]
    fn test_validate_rejects_hand_built_config() {
        let config = Config {
            sensor_types: Vec::new(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptyTypeFilter)));

        let config = Config {
            batch_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_hand_built_timing() {
        let config = Config {
            base_tick: Duration::ZERO,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("TRAFFIC_SIM_BASE_TICK_MS"));

        let config = Config {
            base_tick: Duration::from_millis(MIN_BASE_TICK_MS),
            ..Config::default()
        };
        assert!(config.validate().is_ok());

        for periodicity_secs in [0, MAX_PERIODICITY_SECS + 1] {
            let config = Config {
                periodicity_secs,
                ..Config::default()
            };
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("TRAFFIC_SIM_PERIODICITY_SECS"));
        }
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::invalid("TEST_VAR", "test error");
        assert_eq!(
            error.to_string(),
            "configuration error for TEST_VAR: test error"
        );
        assert_eq!(
            ConfigError::EmptyTypeFilter.to_string(),
            "sensor type allow-list is empty"
        );
    }
}
