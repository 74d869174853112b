//! Reading and batch types sent to the ingestion endpoint.
//!
//! On the wire a reading is a single flat JSON object: base metadata,
//! kind-specific payload fields and, for corrupted readings, the fault tag.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::catalog::{GeoPoint, SensorType};
use crate::fault::FaultRecord;

/// Kind-specific reading fields, keyed by wire name.
pub type Payload = Map<String, Value>;

/// Readings below this confidence are counted as faults.
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Synthetic event families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    VehicleCount,
    VehicleSpeed,
    Incident,
    AirQuality,
    RoadCondition,
    PedestrianCount,
    VehicleClassification,
}

impl EventKind {
    /// Event kinds a sensor type can emit, in table order.
    pub fn for_sensor(sensor_type: SensorType) -> &'static [EventKind] {
        match sensor_type {
            SensorType::Radar => &[EventKind::VehicleCount, EventKind::VehicleSpeed],
            SensorType::Camera => &[
                EventKind::VehicleCount,
                EventKind::Incident,
                EventKind::VehicleClassification,
            ],
            SensorType::AirQualityStation => &[EventKind::AirQuality],
            SensorType::RoadSensor => &[EventKind::RoadCondition],
            SensorType::PedestrianSensor => &[EventKind::PedestrianCount],
        }
    }
}

/// Fields shared by every reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaseMetadata {
    pub timestamp: DateTime<Utc>,
    pub sensor_id: String,
    pub sensor_type: SensorType,
    pub location: GeoPoint,
    pub road_segment_id: String,
    pub lane_number: u8,
    pub direction: String,
    pub confidence_score: f64,
}

/// One synthetic sensor observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub reading_id: Uuid,

    #[serde(rename = "event_type")]
    pub kind: EventKind,

    #[serde(flatten)]
    pub metadata: BaseMetadata,

    #[serde(flatten)]
    pub payload: Payload,

    #[serde(flatten)]
    pub fault: Option<FaultRecord>,
}

impl Reading {
    pub fn new(kind: EventKind, metadata: BaseMetadata, payload: Payload) -> Self {
        Self {
            reading_id: Uuid::new_v4(),
            kind,
            metadata,
            payload,
            fault: None,
        }
    }

    pub fn is_faulty(&self) -> bool {
        self.fault.is_some()
    }

    pub fn is_low_confidence(&self) -> bool {
        self.metadata.confidence_score < LOW_CONFIDENCE_THRESHOLD
    }

    /// Names of top-level payload fields holding a number.
    pub fn numeric_fields(&self) -> Vec<&str> {
        self.payload
            .iter()
            .filter(|(_, value)| value.is_number())
            .map(|(key, _)| key.as_str())
            .collect()
    }
}

/// An ordered slice of buffered readings delivered in one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub id: Uuid,
    pub readings: Vec<Reading>,
}

impl Batch {
    pub fn new(readings: Vec<Reading>) -> Self {
        Self {
            id: Uuid::new_v4(),
            readings,
        }
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Number of readings below the low-confidence threshold.
    pub fn low_confidence_count(&self) -> usize {
        self.readings.iter().filter(|r| r.is_low_confidence()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultKind;
    use serde_json::json;

    fn sample_reading() -> Reading {
        let metadata = BaseMetadata {
            timestamp: Utc::now(),
            sensor_id: "SENSOR-RADA-0001".to_string(),
            sensor_type: SensorType::Radar,
            location: GeoPoint::new(19.8, 41.3),
            road_segment_id: "ROAD-TIR-001".to_string(),
            lane_number: 2,
            direction: "Northbound".to_string(),
            confidence_score: 0.9,
        };
        let mut payload = Payload::new();
        payload.insert("average_speed_kmh".to_string(), json!(72.5));
        payload.insert("vehicle_speeds".to_string(), json!([]));
        Reading::new(EventKind::VehicleSpeed, metadata, payload)
    }

    #[test]
    fn test_reading_serializes_flat() {
        let reading = sample_reading();
        let value = serde_json::to_value(&reading).unwrap();

        assert_eq!(value["event_type"], "VehicleSpeed");
        assert_eq!(value["sensor_id"], "SENSOR-RADA-0001");
        assert_eq!(value["sensor_type"], "Radar");
        assert_eq!(value["location"]["type"], "Point");
        assert_eq!(value["average_speed_kmh"], 72.5);
        assert!(value.get("fault_type").is_none());
        assert!(value.get("payload").is_none());
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn test_faulty_reading_serializes_fault_tag() {
        let mut reading = sample_reading();
        reading.fault = Some(FaultRecord {
            fault_type: FaultKind::ZeroValue,
            fault_timestamp: Utc::now(),
        });
        let value = serde_json::to_value(&reading).unwrap();

        assert_eq!(value["fault_type"], "zero_value");
        assert!(value.get("fault_timestamp").is_some());
        assert!(reading.is_faulty());
    }

    #[test]
    fn test_numeric_fields_skip_nested_values() {
        let reading = sample_reading();
        assert_eq!(reading.numeric_fields(), vec!["average_speed_kmh"]);
    }

    #[test]
    fn test_batch_counts_low_confidence() {
        let mut low = sample_reading();
        low.metadata.confidence_score = 0.2;
        let batch = Batch::new(vec![sample_reading(), low]);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.low_confidence_count(), 1);
    }

    #[test]
    fn test_event_kinds_per_sensor_type() {
        assert_eq!(
            EventKind::for_sensor(SensorType::Radar),
            &[EventKind::VehicleCount, EventKind::VehicleSpeed]
        );
        assert_eq!(EventKind::for_sensor(SensorType::Camera).len(), 3);
        for sensor_type in SensorType::all() {
            assert!(!EventKind::for_sensor(*sensor_type).is_empty());
        }
    }
}
