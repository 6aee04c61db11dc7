//! Turns raw readings into fixed-length hourly windows per building.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use itertools::Itertools;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    BuildingWindow, DropReason, HourlyRow, RawReading, SensorReading, OCCUPANCY_INDEX,
};
use crate::error::{PipelineError, SkipReason, SkippedBuilding};

/// Result of preprocessing one batch of readings.
#[derive(Debug, Clone, Default)]
pub struct PreprocessOutcome {
    /// Eligible windows in ascending building_id order.
    pub windows: Vec<BuildingWindow>,
    pub skipped: Vec<SkippedBuilding>,
    /// Readings that passed cleaning, before resampling.
    pub cleaned: Vec<SensorReading>,
}

#[derive(Debug, Default)]
struct DropCounts {
    timestamp: usize,
    building_id: usize,
    energy: usize,
}

impl DropCounts {
    fn record(&mut self, reason: DropReason) {
        match reason {
            DropReason::MissingTimestamp => self.timestamp += 1,
            DropReason::MissingBuildingId => self.building_id += 1,
            DropReason::MissingEnergy => self.energy += 1,
        }
    }
}

/// Cleans, resamples to hourly buckets and keeps the most recent
/// `min_window_length` hours of every building.
///
/// Buildings with less history are skipped, not padded. Fails only when no
/// reading at all survives cleaning.
#[instrument(skip_all, fields(raw_rows = readings.len(), min_window_length = min_window_length))]
pub fn preprocess(
    readings: &[RawReading],
    min_window_length: usize,
) -> Result<PreprocessOutcome, PipelineError> {
    if min_window_length == 0 {
        return Err(PipelineError::Validation(
            "min_window_length must be at least 1".to_string(),
        ));
    }

    let mut dropped = DropCounts::default();
    let cleaned: Vec<SensorReading> = readings
        .iter()
        .filter_map(|raw| {
            SensorReading::clean(raw)
                .map_err(|reason| dropped.record(reason))
                .ok()
        })
        .collect();
    debug!(
        kept = cleaned.len(),
        dropped_timestamp = dropped.timestamp,
        dropped_building_id = dropped.building_id,
        dropped_energy = dropped.energy,
        "cleaned raw readings"
    );

    if cleaned.is_empty() {
        return Err(PipelineError::Preprocessing(format!(
            "no usable readings among {} raw rows (timestamp, building_id and energy are required)",
            readings.len()
        )));
    }

    let mut by_building: BTreeMap<&str, Vec<&SensorReading>> = BTreeMap::new();
    for reading in &cleaned {
        by_building
            .entry(reading.building_id.as_str())
            .or_default()
            .push(reading);
    }

    let mut windows = Vec::with_capacity(by_building.len());
    let mut skipped = Vec::new();
    for (building_id, mut rows) in by_building {
        rows.sort_by_key(|r| r.timestamp);
        let populated = aggregate_hourly(&rows);

        match trailing_window(&populated, min_window_length) {
            Ok(hourly) => windows.push(BuildingWindow {
                building_id: building_id.to_string(),
                rows: hourly,
            }),
            Err(available) => {
                warn!(
                    building_id,
                    available,
                    required = min_window_length,
                    "skipping building: insufficient history"
                );
                skipped.push(SkippedBuilding {
                    building_id: building_id.to_string(),
                    reason: SkipReason::InsufficientHistory {
                        available,
                        required: min_window_length,
                    },
                });
            }
        }
    }

    info!(
        buildings = windows.len(),
        skipped = skipped.len(),
        "preprocessed sensor readings"
    );
    Ok(PreprocessOutcome {
        windows,
        skipped,
        cleaned,
    })
}

fn hour_bucket(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::hours(1)).unwrap_or(ts)
}

/// Aggregates one building's time-sorted readings into one row per populated hour.
///
/// Energy and covariates are averaged, occupancy takes the maximum, area the
/// first value seen.
fn aggregate_hourly(rows: &[&SensorReading]) -> Vec<HourlyRow> {
    let mut out: Vec<HourlyRow> = Vec::new();

    for (bucket, group) in &rows.iter().chunk_by(|r| hour_bucket(r.timestamp)) {
        let group: Vec<&SensorReading> = group.copied().collect();

        let n = group.len() as f64;
        let energy = group.iter().map(|r| r.energy).sum::<f64>() / n;
        let mut features = [0.0; 8];
        let mut occupancy = f64::NEG_INFINITY;
        for reading in &group {
            let values = reading.dynamic_features();
            for (i, value) in values.iter().enumerate() {
                if i == OCCUPANCY_INDEX {
                    occupancy = occupancy.max(*value);
                } else {
                    features[i] += value;
                }
            }
        }
        for (i, feature) in features.iter_mut().enumerate() {
            if i != OCCUPANCY_INDEX {
                *feature /= n;
            }
        }
        features[OCCUPANCY_INDEX] = occupancy;

        out.push(HourlyRow {
            timestamp: bucket,
            energy,
            features,
            building_area: group[0].building_area,
        });
    }
    out
}

/// Lays the last `len` hours of the contiguous grid spanned by `populated`,
/// zero-filling hours without readings.
///
/// Only the window itself is materialized. When the grid is shorter than
/// `len`, returns its length instead.
fn trailing_window(populated: &[HourlyRow], len: usize) -> Result<Vec<HourlyRow>, usize> {
    let (Some(first), Some(last)) = (populated.first(), populated.last()) else {
        return Err(0);
    };
    let available = usize::try_from((last.timestamp - first.timestamp).num_hours())
        .map_or(0, |span| span.saturating_add(1));
    if available < len {
        return Err(available);
    }

    let window_start = i64::try_from(len - 1)
        .ok()
        .and_then(TimeDelta::try_hours)
        .and_then(|span| last.timestamp.checked_sub_signed(span))
        .unwrap_or(first.timestamp);
    let split = populated.partition_point(|r| r.timestamp < window_start);
    let mut area = match split.checked_sub(1) {
        Some(prev) => populated[prev].building_area,
        None => first.building_area,
    };

    let mut out = Vec::with_capacity(len);
    let mut gap_hours = 0usize;
    let mut next = window_start;
    for row in &populated[split..] {
        while next < row.timestamp {
            out.push(HourlyRow {
                timestamp: next,
                energy: 0.0,
                features: [0.0; 8],
                building_area: area,
            });
            gap_hours += 1;
            next += TimeDelta::hours(1);
        }
        out.push(row.clone());
        area = row.building_area;
        match row.timestamp.checked_add_signed(TimeDelta::hours(1)) {
            Some(following) => next = following,
            None => break,
        }
    }

    if gap_hours > 0 {
        debug!(gap_hours, "zero-filled hours without readings");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LooseValue, DEFAULT_BUILDING_AREA};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap()
    }

    fn reading(building: &str, ts: DateTime<Utc>, energy: f64) -> RawReading {
        RawReading {
            timestamp: Some(LooseValue::Text(ts.to_rfc3339())),
            building_id: Some(building.into()),
            energy: Some(LooseValue::Number(energy)),
            temperature: Some(LooseValue::Number(22.0)),
            occupancy: Some(LooseValue::Number(1.0)),
            ..Default::default()
        }
    }

    fn hourly(building: &str, hours: i64) -> Vec<RawReading> {
        (0..hours)
            .map(|h| reading(building, base() + TimeDelta::hours(h), h as f64))
            .collect()
    }

    #[test]
    fn test_duplicate_hour_readings_are_aggregated() {
        let mut a = reading("b1", base() + TimeDelta::minutes(5), 10.0);
        a.temperature = Some(LooseValue::Number(20.0));
        a.occupancy = Some(LooseValue::Number(0.0));
        let mut b = reading("b1", base() + TimeDelta::minutes(40), 20.0);
        b.temperature = Some(LooseValue::Number(24.0));
        b.occupancy = Some(LooseValue::Number(1.0));

        let outcome = preprocess(&[a, b], 1).unwrap();
        let row = &outcome.windows[0].rows[0];
        assert_eq!(outcome.windows[0].len(), 1);
        assert_eq!(row.timestamp, base());
        assert_eq!(row.energy, 15.0);
        assert_eq!(row.features[0], 22.0);
        assert_eq!(row.occupancy(), 1.0);
    }

    #[test]
    fn test_missing_features_are_zero_filled() {
        let mut r = reading("b1", base(), 5.0);
        r.temperature = None;
        r.voltage = Some(LooseValue::Text("bad".into()));

        let outcome = preprocess(&[r], 1).unwrap();
        let row = &outcome.windows[0].rows[0];
        assert_eq!(row.features[0], 0.0);
        assert_eq!(row.features[7], 0.0);
        assert_eq!(row.building_area, DEFAULT_BUILDING_AREA);
    }

    #[test]
    fn test_short_buildings_are_skipped_not_padded() {
        let mut readings = hourly("b1", 24);
        readings.extend(hourly("b2", 10));

        let outcome = preprocess(&readings, 24).unwrap();
        assert_eq!(outcome.windows.len(), 1);
        assert_eq!(outcome.windows[0].building_id, "b1");
        assert_eq!(
            outcome.skipped,
            vec![SkippedBuilding {
                building_id: "b2".into(),
                reason: SkipReason::InsufficientHistory {
                    available: 10,
                    required: 24
                },
            }]
        );
    }

    #[test]
    fn test_window_keeps_most_recent_hours() {
        let outcome = preprocess(&hourly("b1", 30), 24).unwrap();
        let window = &outcome.windows[0];
        assert_eq!(window.len(), 24);
        assert_eq!(window.start(), Some(base() + TimeDelta::hours(6)));
        assert_eq!(window.rows.last().unwrap().energy, 29.0);
    }

    #[test]
    fn test_gap_hours_are_materialized() {
        let readings = vec![
            reading("b1", base(), 1.0),
            reading("b1", base() + TimeDelta::hours(3), 4.0),
        ];
        let outcome = preprocess(&readings, 4).unwrap();
        let rows = &outcome.windows[0].rows;
        assert_eq!(rows.len(), 4);
        assert!(rows
            .windows(2)
            .all(|w| w[1].timestamp - w[0].timestamp == TimeDelta::hours(1)));
        assert_eq!(rows[1].energy, 0.0);
        assert_eq!(rows[2].occupancy(), 0.0);
    }

    #[test]
    fn test_stray_early_reading_only_extends_the_count() {
        let mut readings = hourly("b1", 3);
        readings.push(RawReading {
            timestamp: Some(LooseValue::Text("0".into())),
            ..reading("b1", base(), 7.0)
        });
        readings.push(RawReading {
            timestamp: Some(LooseValue::Text("0001-01-01T00:00:00Z".into())),
            ..reading("b1", base(), 7.0)
        });

        let outcome = preprocess(&readings, 5).unwrap();
        let rows = &outcome.windows[0].rows;
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].timestamp, base() - TimeDelta::hours(2));
        assert_eq!(rows[0].energy, 0.0);
        assert_eq!(rows[4].energy, 2.0);
    }

    #[test]
    fn test_extreme_span_is_counted_not_built() {
        let readings = vec![
            RawReading {
                timestamp: Some(LooseValue::Text("0001-01-01T00:00:00Z".into())),
                ..reading("b1", base(), 1.0)
            },
            RawReading {
                timestamp: Some(LooseValue::Text("9999-01-01T00:00:00Z".into())),
                ..reading("b1", base(), 2.0)
            },
        ];

        let outcome = preprocess(&readings, 24).unwrap();
        let rows = &outcome.windows[0].rows;
        assert_eq!(rows.len(), 24);
        assert_eq!(rows[23].energy, 2.0);
        assert!(rows[..23].iter().all(|r| r.energy == 0.0));
    }

    #[test]
    fn test_buildings_are_ordered_by_id() {
        let mut readings = hourly("zeta", 2);
        readings.extend(hourly("alpha", 2));
        let outcome = preprocess(&readings, 2).unwrap();
        let ids: Vec<_> = outcome.windows.iter().map(|w| w.building_id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_no_usable_rows_is_fatal() {
        let mut r = reading("b1", base(), 1.0);
        r.energy = None;
        let err = preprocess(&[r], 24).unwrap_err();
        assert!(matches!(err, PipelineError::Preprocessing(_)));
    }

    #[test]
    fn test_all_buildings_short_is_not_fatal() {
        let outcome = preprocess(&hourly("b1", 3), 24).unwrap();
        assert!(outcome.windows.is_empty());
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.cleaned.len(), 3);
    }

    #[test]
    fn test_zero_window_length_is_rejected() {
        assert!(matches!(
            preprocess(&hourly("b1", 3), 0),
            Err(PipelineError::Validation(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_resampling_means_and_max(
            samples in prop::collection::vec(
                (0i64..6, 0i64..60, 0.0f64..100.0, -10.0f64..40.0, 0u8..=1),
                1..40,
            )
        ) {
            let readings: Vec<RawReading> = samples
                .iter()
                .map(|(h, m, energy, temp, occ)| {
                    let mut r = reading("b1", base() + TimeDelta::hours(*h) + TimeDelta::minutes(*m), *energy);
                    r.temperature = Some(LooseValue::Number(*temp));
                    r.occupancy = Some(LooseValue::Number(f64::from(*occ)));
                    r
                })
                .collect();

            let first = samples.iter().map(|s| s.0).min().unwrap();
            let last = samples.iter().map(|s| s.0).max().unwrap();
            let span = (last - first + 1) as usize;
            let outcome = preprocess(&readings, span).unwrap();
            let rows = &outcome.windows[0].rows;
            prop_assert_eq!(rows.len(), span);

            for row in rows {
                let hour = (row.timestamp - base()).num_hours();
                let members: Vec<_> = samples.iter().filter(|s| s.0 == hour).collect();
                if members.is_empty() {
                    prop_assert_eq!(row.energy, 0.0);
                    continue;
                }
                let n = members.len() as f64;
                let energy = members.iter().map(|s| s.2).sum::<f64>() / n;
                let temp = members.iter().map(|s| s.3).sum::<f64>() / n;
                let occ = members.iter().map(|s| f64::from(s.4)).fold(0.0, f64::max);
                prop_assert!((row.energy - energy).abs() < 1e-9);
                prop_assert!((row.features[0] - temp).abs() < 1e-9);
                prop_assert_eq!(row.occupancy(), occ);
            }
        }
    }
}
