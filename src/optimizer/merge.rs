use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

use super::rules::{recommend, RuleInput};
use crate::domain::{PredictionRecord, RecommendationRecord, SensorReading};

/// A prediction joined with the observed conditions of the same building-hour.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRow {
    pub timestamp: DateTime<Utc>,
    pub building_id: String,
    pub predicted_energy: f64,
    pub occupancy: Option<f64>,
    pub temperature: Option<f64>,
    pub power_factor: Option<f64>,
    pub voltage: Option<f64>,
}

impl MergedRow {
    pub fn rule_input(&self) -> RuleInput {
        RuleInput {
            predicted_energy: self.predicted_energy,
            occupancy: self.occupancy,
            temperature: self.temperature,
            power_factor: self.power_factor,
            voltage: self.voltage,
        }
    }
}

/// Inner join on `(timestamp, building_id)`. Output follows prediction order;
/// a prediction matching several sensor rows yields one row per match.
pub fn merge_rows(predictions: &[PredictionRecord], sensors: &[SensorReading]) -> Vec<MergedRow> {
    let mut by_key: HashMap<(DateTime<Utc>, &str), Vec<&SensorReading>> = HashMap::new();
    for s in sensors {
        by_key
            .entry((s.timestamp, s.building_id.as_str()))
            .or_default()
            .push(s);
    }

    let merged: Vec<MergedRow> = predictions
        .iter()
        .flat_map(|p| {
            by_key
                .get(&(p.timestamp, p.building_id.as_str()))
                .into_iter()
                .flatten()
                .map(move |s| MergedRow {
                    timestamp: p.timestamp,
                    building_id: p.building_id.clone(),
                    predicted_energy: p.predicted_energy,
                    occupancy: s.occupancy,
                    temperature: s.temperature,
                    power_factor: s.power_factor,
                    voltage: s.voltage,
                })
        })
        .collect();

    debug!(
        predictions = predictions.len(),
        sensors = sensors.len(),
        merged = merged.len(),
        "joined predictions with sensor rows"
    );
    merged
}

pub fn generate_recommendations(rows: &[MergedRow]) -> Vec<RecommendationRecord> {
    rows.iter()
        .map(|row| RecommendationRecord {
            timestamp: row.timestamp,
            building_id: row.building_id.clone(),
            predicted_energy: row.predicted_energy,
            recommendation: recommend(&row.rule_input()).to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn t(hour: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap() + TimeDelta::hours(hour)
    }

    fn prediction(building: &str, hour: i64, energy: f64) -> PredictionRecord {
        PredictionRecord {
            timestamp: t(hour),
            building_id: building.to_string(),
            predicted_energy: energy,
        }
    }

    fn sensor(building: &str, hour: i64, occupancy: f64) -> SensorReading {
        SensorReading {
            timestamp: t(hour),
            building_id: building.to_string(),
            temperature: Some(22.3),
            humidity: None,
            occupancy: Some(occupancy),
            energy: 50.5,
            current: None,
            frequency: None,
            power: None,
            power_factor: Some(0.95),
            voltage: None,
            building_area: 1000.0,
        }
    }

    #[test]
    fn test_only_matching_hours_are_joined() {
        let predictions = vec![
            prediction("b1", 0, 55.0),
            prediction("b1", 1, 55.0),
            prediction("b2", 0, 10.0),
        ];
        let sensors = vec![sensor("b2", 0, 1.0), sensor("b1", 1, 1.0), sensor("b3", 0, 1.0)];

        let merged = merge_rows(&predictions, &sensors);
        let keys: Vec<(&str, DateTime<Utc>)> = merged
            .iter()
            .map(|m| (m.building_id.as_str(), m.timestamp))
            .collect();
        assert_eq!(keys, vec![("b1", t(1)), ("b2", t(0))]);
    }

    #[test]
    fn test_duplicate_sensor_rows_fan_out() {
        let merged = merge_rows(
            &[prediction("b1", 0, 30.0)],
            &[sensor("b1", 0, 1.0), sensor("b1", 0, 0.0)],
        );
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_no_overlap_gives_empty_join() {
        assert!(merge_rows(&[prediction("b1", 5, 1.0)], &[sensor("b1", 0, 1.0)]).is_empty());
    }

    #[test]
    fn test_recommendations_carry_prediction_fields() {
        let merged = merge_rows(
            &[prediction("b1", 0, 55.0), prediction("b1", 1, 25.0)],
            &[sensor("b1", 0, 1.0), sensor("b1", 1, 0.0)],
        );
        let recs = generate_recommendations(&merged);

        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].recommendation, "Optimize equipment scheduling");
        assert_eq!(recs[0].predicted_energy, 55.0);
        assert_eq!(recs[1].recommendation, "Reduce HVAC and lighting (low occupancy)");
        assert_eq!(recs[1].timestamp, t(1));
    }
}
