//! Sensor readings as they arrive and as the pipeline keeps them.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Fallback floor area (m²) for buildings that never report one.
pub const DEFAULT_BUILDING_AREA: f64 = 1000.0;

/// Dynamic covariates in the order the forecast model expects them.
pub const DYNAMIC_FEATURES: [&str; 8] = [
    "temperature",
    "humidity",
    "occupancy",
    "current",
    "frequency",
    "power",
    "power_factor",
    "voltage",
];

/// Position of occupancy inside [`DYNAMIC_FEATURES`].
pub const OCCUPANCY_INDEX: usize = 2;

/// A loosely typed cell: upstream producers send numbers, booleans or text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LooseValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl LooseValue {
    /// Numeric coercion. Anything that does not parse to a finite number is missing.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v).filter(|v| v.is_finite()),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }

    /// Identifier coercion; integral numbers print without a fractional part.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            Self::Number(v) if v.is_finite() && v.fract() == 0.0 => Some(format!("{}", *v as i64)),
            Self::Number(v) if v.is_finite() => Some(v.to_string()),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Number(v) if v.is_finite() && v.fract() == 0.0 => from_epoch(*v as i64),
            Self::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }
}

impl From<f64> for LooseValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for LooseValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
];

const NAIVE_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parses the timestamp spellings seen in sensor exports and forecast payloads.
///
/// Offsets are honoured; naive values are taken as UTC. All-digit strings are
/// epoch seconds, or milliseconds above 10^11.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse::<i64>().ok().and_then(from_epoch);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(s, fmt) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn from_epoch(v: i64) -> Option<DateTime<Utc>> {
    if v.unsigned_abs() > 100_000_000_000 {
        DateTime::from_timestamp_millis(v)
    } else {
        DateTime::from_timestamp(v, 0)
    }
}

/// One reading exactly as delivered by a source; nothing is trusted yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    #[serde(default)]
    pub timestamp: Option<LooseValue>,
    #[serde(default)]
    pub building_id: Option<LooseValue>,
    #[serde(default)]
    pub temperature: Option<LooseValue>,
    #[serde(default)]
    pub humidity: Option<LooseValue>,
    #[serde(default)]
    pub occupancy: Option<LooseValue>,
    #[serde(default)]
    pub energy: Option<LooseValue>,
    #[serde(default)]
    pub current: Option<LooseValue>,
    #[serde(default)]
    pub frequency: Option<LooseValue>,
    #[serde(default)]
    pub power: Option<LooseValue>,
    #[serde(default)]
    pub power_factor: Option<LooseValue>,
    #[serde(default)]
    pub voltage: Option<LooseValue>,
    #[serde(default)]
    pub building_area: Option<LooseValue>,
}

/// Why a raw reading was discarded during cleaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    MissingTimestamp,
    MissingBuildingId,
    MissingEnergy,
}

/// A reading that survived cleaning.
///
/// Measurement fields stay optional: imputation is a preprocessing policy, and
/// the recommendation rules apply their own defaults to absent values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub timestamp: DateTime<Utc>,
    pub building_id: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub occupancy: Option<f64>,
    pub energy: f64,
    pub current: Option<f64>,
    pub frequency: Option<f64>,
    pub power: Option<f64>,
    pub power_factor: Option<f64>,
    pub voltage: Option<f64>,
    #[serde(skip, default = "default_building_area")]
    pub building_area: f64,
}

fn default_building_area() -> f64 {
    DEFAULT_BUILDING_AREA
}

fn coerce(value: &Option<LooseValue>) -> Option<f64> {
    value.as_ref().and_then(LooseValue::as_f64)
}

impl SensorReading {
    /// Coerces a raw reading, rejecting it when timestamp, building or energy is missing.
    pub fn clean(raw: &RawReading) -> Result<Self, DropReason> {
        let timestamp = raw
            .timestamp
            .as_ref()
            .and_then(LooseValue::as_timestamp)
            .ok_or(DropReason::MissingTimestamp)?;
        let building_id = raw
            .building_id
            .as_ref()
            .and_then(LooseValue::as_text)
            .ok_or(DropReason::MissingBuildingId)?;
        let energy = coerce(&raw.energy).ok_or(DropReason::MissingEnergy)?;

        Ok(Self {
            timestamp,
            building_id,
            temperature: coerce(&raw.temperature),
            humidity: coerce(&raw.humidity),
            occupancy: coerce(&raw.occupancy),
            energy,
            current: coerce(&raw.current),
            frequency: coerce(&raw.frequency),
            power: coerce(&raw.power),
            power_factor: coerce(&raw.power_factor),
            voltage: coerce(&raw.voltage),
            building_area: coerce(&raw.building_area).unwrap_or(DEFAULT_BUILDING_AREA),
        })
    }

    /// Dynamic covariates in model order with missing values zero-filled.
    pub fn dynamic_features(&self) -> [f64; 8] {
        [
            self.temperature,
            self.humidity,
            self.occupancy,
            self.current,
            self.frequency,
            self.power,
            self.power_factor,
            self.voltage,
        ]
        .map(|v| v.unwrap_or(0.0))
    }
}

/// One resampled hour of a building's history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyRow {
    pub timestamp: DateTime<Utc>,
    pub energy: f64,
    pub features: [f64; 8],
    pub building_area: f64,
}

impl HourlyRow {
    pub fn occupancy(&self) -> f64 {
        self.features[OCCUPANCY_INDEX]
    }
}

/// The most recent contiguous hourly history of one building.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildingWindow {
    pub building_id: String,
    pub rows: Vec<HourlyRow>,
}

impl BuildingWindow {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.rows.first().map(|r| r.timestamp)
    }

    pub fn energy_series(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.energy).collect()
    }

    /// Feature-major matrix: one series per entry of [`DYNAMIC_FEATURES`].
    pub fn feature_matrix(&self) -> Vec<Vec<f64>> {
        (0..DYNAMIC_FEATURES.len())
            .map(|f| self.rows.iter().map(|r| r.features[f]).collect())
            .collect()
    }

    pub fn building_area(&self) -> f64 {
        self.rows
            .first()
            .map(|r| r.building_area)
            .unwrap_or(DEFAULT_BUILDING_AREA)
    }
}
