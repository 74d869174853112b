//! Fault injection: deliberate corruption of one reading field.
//!
//! Models malfunctioning sensors. A corrupted reading keeps its shape but one
//! numeric payload field is replaced, its confidence drops into the low band
//! and it is tagged with the fault kind and time.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use serde_json::{Number, Value};
use tracing::trace;

use crate::catalog::{round_to, Bounds};
use crate::reading::Reading;

/// Confidence band assigned to corrupted readings
const FAULT_CONFIDENCE: Bounds = Bounds::new(0.1, 0.4);

/// Multipliers used for `extreme_value` faults
const EXTREME_FACTORS: [i64; 3] = [10, 100, 1000];

/// Ways a numeric field can be corrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    ExtremeValue,
    ZeroValue,
    NullValue,
    NegativeValue,
    StuckValue,
}

impl FaultKind {
    pub fn all() -> &'static [FaultKind] {
        &[
            FaultKind::ExtremeValue,
            FaultKind::ZeroValue,
            FaultKind::NullValue,
            FaultKind::NegativeValue,
            FaultKind::StuckValue,
        ]
    }
}

/// Fault tag attached to a corrupted reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaultRecord {
    pub fault_type: FaultKind,
    pub fault_timestamp: DateTime<Utc>,
}

/// Corrupts readings with a fixed probability.
#[derive(Debug, Clone, Copy)]
pub struct FaultInjector {
    fault_chance: f64,
}

impl FaultInjector {
    /// Create an injector; the chance is clamped into `0.0..=1.0`.
    pub fn new(fault_chance: f64) -> Self {
        let fault_chance = if fault_chance.is_nan() {
            0.0
        } else {
            fault_chance.clamp(0.0, 1.0)
        };
        Self { fault_chance }
    }

    pub fn fault_chance(&self) -> f64 {
        self.fault_chance
    }

    /// Corrupt the reading with probability `fault_chance`.
    pub fn maybe_inject<R: Rng>(&self, reading: Reading, rng: &mut R) -> Reading {
        if self.fault_chance > 0.0 && rng.gen_bool(self.fault_chance) {
            self.inject(reading, rng)
        } else {
            reading
        }
    }

    /// Corrupt one numeric payload field unconditionally.
    ///
    /// Readings without numeric payload fields come back untouched and
    /// untagged. Must be applied at most once per reading.
    pub fn inject<R: Rng>(&self, mut reading: Reading, rng: &mut R) -> Reading {
        let field = reading
            .numeric_fields()
            .choose(rng)
            .map(|field| field.to_string());
        let Some(field) = field else {
            return reading;
        };
        let kind = FaultKind::all()
            .choose(rng)
            .copied()
            .unwrap_or(FaultKind::StuckValue);

        if let Some(value) = reading.payload.get_mut(&field) {
            *value = corrupt(value, kind, rng);
        }

        reading.metadata.confidence_score = round_to(
            rng.gen_range(FAULT_CONFIDENCE.min..=FAULT_CONFIDENCE.max),
            2,
        );
        reading.fault = Some(FaultRecord {
            fault_type: kind,
            fault_timestamp: Utc::now(),
        });

        trace!(
            sensor_id = %reading.metadata.sensor_id,
            field = %field,
            fault = ?kind,
            "Injected fault"
        );
        reading
    }
}

/// Apply one fault kind to a numeric JSON value.
fn corrupt<R: Rng>(value: &Value, kind: FaultKind, rng: &mut R) -> Value {
    match kind {
        FaultKind::ExtremeValue => {
            let factor = EXTREME_FACTORS.choose(rng).copied().unwrap_or(10);
            scale(value, factor)
        }
        FaultKind::ZeroValue => Value::from(0),
        FaultKind::NullValue => Value::Null,
        FaultKind::NegativeValue => scale(value, -1),
        FaultKind::StuckValue => value.clone(),
    }
}

fn scale(value: &Value, factor: i64) -> Value {
    if let Some(int) = value.as_i64() {
        return Value::from(int.saturating_mul(factor));
    }
    match value.as_f64() {
        Some(float) => Number::from_f64(float * factor as f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        None => value.clone(),
    }
}
