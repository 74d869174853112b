//! Sensor catalog: sensor types, parameter ranges and the active sensor set.
//!
//! Sensors either come from the backend's sensor endpoint (see
//! [`crate::client::SensorSource`]) or are synthesized locally. In both cases
//! every sensor gets its type-level [`ParameterRange`] attached here, so
//! generation never has to look anything up or fail.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ConfigError;

/// Sensor count used for local synthesis when no cap is configured
const DEFAULT_SYNTHESIZED_SENSORS: usize = 100;

/// Road prefixes used for synthesized road segment ids
const ROAD_PREFIXES: [&str; 4] = ["TIR", "DUR", "VLOR", "KUK"];

/// Bounding box for synthesized sensor locations (lon, lat)
const SYNTH_LON: (f64, f64) = (19.7, 20.0);
const SYNTH_LAT: (f64, f64) = (41.2, 41.5);

/// Kinds of roadside sensors known to the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SensorType {
    Radar,
    Camera,
    AirQualityStation,
    RoadSensor,
    PedestrianSensor,
}

impl SensorType {
    /// Get all sensor types.
    pub fn all() -> &'static [SensorType] {
        &[
            SensorType::Radar,
            SensorType::Camera,
            SensorType::AirQualityStation,
            SensorType::RoadSensor,
            SensorType::PedestrianSensor,
        ]
    }

    /// Catalog name of the sensor type.
    pub fn name(&self) -> &'static str {
        match self {
            SensorType::Radar => "Radar",
            SensorType::Camera => "Camera",
            SensorType::AirQualityStation => "AirQualityStation",
            SensorType::RoadSensor => "RoadSensor",
            SensorType::PedestrianSensor => "PedestrianSensor",
        }
    }

    /// Look up a sensor type by its catalog name.
    pub fn from_name(name: &str) -> Option<SensorType> {
        SensorType::all().iter().copied().find(|t| t.name() == name)
    }

    /// Four-letter upper-case tag used in synthesized sensor ids.
    fn id_tag(&self) -> String {
        self.name().chars().take(4).collect::<String>().to_uppercase()
    }
}

impl std::fmt::Display for SensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// GeoJSON point, `coordinates` ordered `[lon, lat]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: [f64; 2],
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self {
            kind: "Point".to_string(),
            coordinates: [lon, lat],
        }
    }

    pub fn lon(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn lat(&self) -> f64 {
        self.coordinates[1]
    }
}

/// Inclusive numeric bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Bounds scaled by a constant factor, as used for derived sub-counts.
    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(self.min * factor, self.max * factor)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    fn check(
        &self,
        sensor_type: &str,
        field: &'static str,
        non_negative: bool,
    ) -> Result<(), ConfigError> {
        let fail = |message: String| ConfigError::InvalidRange {
            sensor_type: sensor_type.to_string(),
            field,
            message,
        };
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(fail("bounds must be finite".to_string()));
        }
        if self.min > self.max {
            return Err(fail(format!("min {} > max {}", self.min, self.max)));
        }
        if non_negative && self.min < 0.0 {
            return Err(fail(format!("min {} must not be negative", self.min)));
        }
        Ok(())
    }
}

/// Numeric bounds used by the generators of one sensor type.
///
/// Fields not used by a type's generators are still carried so a single
/// struct covers every type. Missing fields in a JSON override fall back to
/// [`ParameterRange::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParameterRange {
    pub vehicle_count: Bounds,
    pub avg_speed: Bounds,
    pub speed_limit: f64,
    pub vehicle_length: Bounds,
    pub co: Bounds,
    pub no2: Bounds,
    pub pm25: Bounds,
    pub aqi: Bounds,
    pub height: f64,
    pub surface_temp: Bounds,
    pub friction: Bounds,
    pub pedestrians: Bounds,
    pub cyclists: Bounds,
}

impl Default for ParameterRange {
    fn default() -> Self {
        Self {
            vehicle_count: Bounds::new(10.0, 200.0),
            avg_speed: Bounds::new(40.0, 90.0),
            speed_limit: 60.0,
            vehicle_length: Bounds::new(3.5, 12.0),
            co: Bounds::new(1.0, 10.0),
            no2: Bounds::new(20.0, 100.0),
            pm25: Bounds::new(5.0, 50.0),
            aqi: Bounds::new(20.0, 150.0),
            height: 2.5,
            surface_temp: Bounds::new(-5.0, 35.0),
            friction: Bounds::new(0.4, 0.9),
            pedestrians: Bounds::new(0.0, 50.0),
            cyclists: Bounds::new(0.0, 25.0),
        }
    }
}

impl ParameterRange {
    /// Type-level default ranges.
    pub fn for_type(sensor_type: SensorType) -> Self {
        match sensor_type {
            SensorType::Camera => Self {
                vehicle_count: Bounds::new(5.0, 150.0),
                ..Self::default()
            },
            _ => Self::default(),
        }
    }

    /// Reject malformed bounds before any reading is generated.
    pub fn validate(&self, sensor_type: &str) -> Result<(), ConfigError> {
        self.vehicle_count.check(sensor_type, "vehicleCount", true)?;
        self.avg_speed.check(sensor_type, "avgSpeed", true)?;
        self.vehicle_length.check(sensor_type, "vehicleLength", true)?;
        self.co.check(sensor_type, "co", false)?;
        self.no2.check(sensor_type, "no2", false)?;
        self.pm25.check(sensor_type, "pm25", false)?;
        self.aqi.check(sensor_type, "aqi", true)?;
        self.surface_temp.check(sensor_type, "surfaceTemp", false)?;
        self.friction.check(sensor_type, "friction", false)?;
        self.pedestrians.check(sensor_type, "pedestrians", true)?;
        self.cyclists.check(sensor_type, "cyclists", true)?;

        for (field, value) in [("speedLimit", self.speed_limit), ("height", self.height)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidRange {
                    sensor_type: sensor_type.to_string(),
                    field,
                    message: format!("{} must be a finite non-negative number", value),
                });
            }
        }
        Ok(())
    }
}

/// Parameter ranges for every sensor type.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeTable {
    ranges: HashMap<SensorType, ParameterRange>,
}

impl RangeTable {
    /// Built-in type-level defaults.
    pub fn defaults() -> Self {
        let ranges = SensorType::all()
            .iter()
            .map(|t| (*t, ParameterRange::for_type(*t)))
            .collect();
        Self { ranges }
    }

    /// Defaults overridden by a JSON object keyed by sensor type name.
    ///
    /// An overridden type replaces its whole range; fields it omits take the
    /// base defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let overrides: HashMap<String, ParameterRange> = serde_json::from_str(json)?;
        let mut table = Self::defaults();

        for (name, range) in overrides {
            let sensor_type = SensorType::from_name(&name).ok_or_else(|| ConfigError::InvalidRange {
                sensor_type: name.clone(),
                field: "type",
                message: "unknown sensor type".to_string(),
            })?;
            table.ranges.insert(sensor_type, range);
        }

        table.validate()?;
        Ok(table)
    }

    /// Load overrides from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::RangesIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (sensor_type, range) in &self.ranges {
            range.validate(sensor_type.name())?;
        }
        Ok(())
    }

    pub fn get(&self, sensor_type: SensorType) -> ParameterRange {
        self.ranges
            .get(&sensor_type)
            .cloned()
            .unwrap_or_else(|| ParameterRange::for_type(sensor_type))
    }
}

impl Default for RangeTable {
    fn default() -> Self {
        Self::defaults()
    }
}

/// A simulated roadside sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    pub id: String,
    pub sensor_type: SensorType,
    pub location: GeoPoint,
    pub road_segment_id: Option<String>,
    pub lane_number: Option<u8>,
    pub ranges: ParameterRange,
}

/// Raw sensor document as exposed by the sensor endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorRecord {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub sensor_type: String,
    pub location: GeoPoint,
    #[serde(default)]
    pub road_segment_id: Option<String>,
    #[serde(default)]
    pub lane_number: Option<u8>,
}

impl SensorRecord {
    /// Decode each entry of a catalog array on its own.
    ///
    /// Entries that do not decode are dropped and counted.
    pub fn parse_each(values: Vec<serde_json::Value>) -> Vec<Self> {
        let total = values.len();
        let records: Vec<Self> = values
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!(error = %e, "Skipping malformed sensor record");
                    None
                }
            })
            .collect();

        let malformed = total - records.len();
        if malformed > 0 {
            warn!(dropped = malformed, "Filtered out malformed sensor records");
        }
        records
    }
}

/// Set of sensor types currently allowed to report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeFilter(BTreeSet<SensorType>);

impl TypeFilter {
    pub fn all() -> Self {
        Self(SensorType::all().iter().copied().collect())
    }

    pub fn none() -> Self {
        Self(BTreeSet::new())
    }

    pub fn allows(&self, sensor_type: SensorType) -> bool {
        self.0.contains(&sensor_type)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn types(&self) -> impl Iterator<Item = SensorType> + '_ {
        self.0.iter().copied()
    }

    /// Keep only the types present in `available`.
    pub fn restrict_to(&self, available: &BTreeSet<SensorType>) -> Self {
        Self(self.0.intersection(available).copied().collect())
    }
}

impl FromIterator<SensorType> for TypeFilter {
    fn from_iter<I: IntoIterator<Item = SensorType>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The active sensor set for a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorCatalog {
    sensors: Vec<Sensor>,
}

impl SensorCatalog {
    pub fn new(sensors: Vec<Sensor>) -> Self {
        Self { sensors }
    }

    /// Build a catalog from fetched records.
    ///
    /// The list is capped at `max_sensors` (0 = no cap) before filtering;
    /// records with an unknown type or a duplicate id are dropped.
    pub fn from_records(records: Vec<SensorRecord>, max_sensors: usize, ranges: &RangeTable) -> Self {
        let limit = if max_sensors > 0 { max_sensors } else { records.len() };
        let mut seen = HashSet::new();
        let mut unknown = 0usize;
        let mut duplicates = 0usize;

        let sensors: Vec<Sensor> = records
            .into_iter()
            .take(limit)
            .filter_map(|record| {
                let Some(sensor_type) = SensorType::from_name(&record.sensor_type) else {
                    unknown += 1;
                    return None;
                };
                if !seen.insert(record.id.clone()) {
                    duplicates += 1;
                    return None;
                }
                Some(Sensor {
                    id: record.id,
                    sensor_type,
                    location: record.location,
                    road_segment_id: record.road_segment_id,
                    lane_number: record.lane_number,
                    ranges: ranges.get(sensor_type),
                })
            })
            .collect();

        if unknown > 0 {
            warn!(dropped = unknown, "Filtered out sensors with unknown types");
        }
        if duplicates > 0 {
            warn!(dropped = duplicates, "Filtered out sensors with duplicate ids");
        }

        Self { sensors }
    }

    /// Synthesize `count` random sensors (100 when `count` is 0).
    pub fn synthesize<R: Rng>(count: usize, ranges: &RangeTable, rng: &mut R) -> Self {
        let count = if count > 0 { count } else { DEFAULT_SYNTHESIZED_SENSORS };

        let sensors = (1..=count)
            .map(|i| {
                let sensor_type = *SensorType::all()
                    .choose(rng)
                    .unwrap_or(&SensorType::Radar);
                let lon = round_to(rng.gen_range(SYNTH_LON.0..=SYNTH_LON.1), 6);
                let lat = round_to(rng.gen_range(SYNTH_LAT.0..=SYNTH_LAT.1), 6);
                let prefix = ROAD_PREFIXES.choose(rng).unwrap_or(&ROAD_PREFIXES[0]);

                Sensor {
                    id: format!("SENSOR-{}-{:04}", sensor_type.id_tag(), i),
                    sensor_type,
                    location: GeoPoint::new(lon, lat),
                    road_segment_id: Some(format!("ROAD-{}-{:03}", prefix, rng.gen_range(1..=100))),
                    lane_number: Some(rng.gen_range(1..=4)),
                    ranges: ranges.get(sensor_type),
                }
            })
            .collect();

        debug!(count = count, "Synthesized random sensors");
        Self { sensors }
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Sensor types present in the catalog.
    pub fn available_types(&self) -> BTreeSet<SensorType> {
        self.sensors.iter().map(|s| s.sensor_type).collect()
    }

    /// Sensors whose type passes `filter`, in catalog order.
    pub fn filtered<'a>(&'a self, filter: &'a TypeFilter) -> impl Iterator<Item = &'a Sensor> + 'a {
        self.sensors.iter().filter(move |s| filter.allows(s.sensor_type))
    }
}

/// Round to a fixed number of decimal places.
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
