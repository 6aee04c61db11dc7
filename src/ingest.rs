//! Flattening of realtime-database snapshots into sensor rows.
//!
//! A snapshot is keyed by building, then by reading timestamp:
//!
//! ```json
//! { "b1": { "2025-06-15T00:00:00Z": {
//!     "temperature": 22.3, "humidity": 55, "motion": 1,
//!     "meter": { "energy": 50.5, "current": 10.5, "frequency": 60,
//!                "power": 2300, "power_factor": 0.95, "voltage": 220 } } } }
//! ```

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::domain::{LooseValue, RawReading};
use crate::error::PipelineError;

fn field(obj: &Map<String, Value>, key: &str) -> Option<LooseValue> {
    obj.get(key)
        .filter(|v| !v.is_null())
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

/// Turns a snapshot into one [`RawReading`] per building and timestamp key.
///
/// Entries whose payload is not an object are skipped. Timestamps are not
/// parsed here; cleaning drops the ones that cannot be read.
pub fn flatten_snapshot(snapshot: &Value) -> Result<Vec<RawReading>, PipelineError> {
    let buildings = snapshot.as_object().ok_or_else(|| {
        PipelineError::Validation("snapshot must be an object keyed by building id".to_string())
    })?;

    let mut rows = Vec::new();
    for (building_id, readings) in buildings {
        let Some(readings) = readings.as_object() else {
            warn!(building_id = %building_id, "snapshot entry is not an object, skipping");
            continue;
        };

        for (timestamp, values) in readings {
            let Some(values) = values.as_object() else {
                debug!(building_id = %building_id, %timestamp, "reading is not an object, skipping");
                continue;
            };
            let empty = Map::new();
            let meter = values
                .get("meter")
                .and_then(Value::as_object)
                .unwrap_or(&empty);

            rows.push(RawReading {
                timestamp: Some(LooseValue::Text(timestamp.clone())),
                building_id: Some(LooseValue::Text(building_id.clone())),
                temperature: field(values, "temperature"),
                humidity: field(values, "humidity"),
                occupancy: field(values, "motion"),
                energy: field(meter, "energy"),
                current: field(meter, "current"),
                frequency: field(meter, "frequency"),
                power: field(meter, "power"),
                power_factor: field(meter, "power_factor"),
                voltage: field(meter, "voltage"),
                building_area: field(values, "building_area"),
            });
        }
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SensorReading;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn test_nested_snapshot_is_flattened() {
        let snapshot = json!({
            "b1": {
                "2025-06-15T00:00:00Z": {
                    "temperature": 22.3,
                    "humidity": 55,
                    "motion": true,
                    "meter": {"energy": 50.5, "power_factor": 0.95, "voltage": 220}
                }
            }
        });

        let rows = flatten_snapshot(&snapshot).unwrap();
        assert_eq!(rows.len(), 1);

        let clean = SensorReading::clean(&rows[0]).unwrap();
        assert_eq!(clean.building_id, "b1");
        assert_eq!(
            clean.timestamp,
            Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap()
        );
        assert_eq!(clean.occupancy, Some(1.0));
        assert_eq!(clean.energy, 50.5);
        assert_eq!(clean.voltage, Some(220.0));
        assert_eq!(clean.current, None);
    }

    #[test]
    fn test_reading_without_meter_has_no_energy() {
        let snapshot = json!({"b1": {"1718409600": {"temperature": 20}}});
        let rows = flatten_snapshot(&snapshot).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].energy.is_none());
        assert!(SensorReading::clean(&rows[0]).is_err());
    }

    #[test]
    fn test_non_object_entries_are_skipped() {
        let snapshot = json!({
            "b1": "offline",
            "b2": {"2025-06-15T00:00:00Z": null, "2025-06-15T01:00:00Z": {"meter": {"energy": 1}}}
        });
        let rows = flatten_snapshot(&snapshot).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_non_object_snapshot_is_rejected() {
        let err = flatten_snapshot(&json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}
