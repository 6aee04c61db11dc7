use chrono::SecondsFormat;
use tracing::debug;
use validator::Validate;

use crate::domain::{BuildingWindow, ForecastRequest};
use crate::error::PipelineError;

/// Requests ready for submission plus the lookup that turns a
/// `feat_static_cat` index back into its building.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastBatchPlan {
    pub requests: Vec<ForecastRequest>,
    pub index_to_building: Vec<String>,
}

impl ForecastBatchPlan {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Builds one request per window; the window's position is its category index.
pub fn build_batch(windows: &[BuildingWindow]) -> Result<ForecastBatchPlan, PipelineError> {
    if windows.is_empty() {
        return Err(PipelineError::Validation(
            "no building has enough history to forecast".to_string(),
        ));
    }

    let mut requests = Vec::with_capacity(windows.len());
    let mut index_to_building = Vec::with_capacity(windows.len());

    for (index, window) in windows.iter().enumerate() {
        let start = window.start().ok_or_else(|| {
            PipelineError::Validation(format!("building {} has an empty window", window.building_id))
        })?;

        let request = ForecastRequest {
            start: start.to_rfc3339_opts(SecondsFormat::Secs, true),
            target: window.energy_series(),
            feat_dynamic_real: window.feature_matrix(),
            feat_static_cat: vec![index],
            feat_static_real: vec![window.building_area()],
        };
        request.validate().map_err(|e| {
            PipelineError::Validation(format!("building {}: {e}", window.building_id))
        })?;

        debug!(
            building_id = %window.building_id,
            index,
            width = request.target.len(),
            "prepared forecast request"
        );
        requests.push(request);
        index_to_building.push(window.building_id.clone());
    }

    Ok(ForecastBatchPlan {
        requests,
        index_to_building,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HourlyRow;
    use chrono::{TimeDelta, TimeZone, Utc};

    fn window(building: &str, hours: i64) -> BuildingWindow {
        let start = Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap();
        BuildingWindow {
            building_id: building.to_string(),
            rows: (0..hours)
                .map(|h| HourlyRow {
                    timestamp: start + TimeDelta::hours(h),
                    energy: 50.5,
                    features: [22.3, 55.0, 1.0, 10.5, 60.0, 2300.0, 0.95, 220.0],
                    building_area: 1000.0,
                })
                .collect(),
        }
    }

    #[test]
    fn test_one_request_per_building_with_matching_index() {
        let plan = build_batch(&[window("b1", 24), window("b2", 24)]).unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(plan.index_to_building, vec!["b1", "b2"]);
        for (i, req) in plan.requests.iter().enumerate() {
            assert_eq!(req.feat_static_cat, vec![i]);
            assert_eq!(req.start, "2025-06-15T00:00:00Z");
            assert_eq!(req.target.len(), 24);
            assert_eq!(req.feat_dynamic_real.len(), 8);
            assert!(req.feat_dynamic_real.iter().all(|s| s.len() == 24));
            assert_eq!(req.feat_static_real, vec![1000.0]);
        }
    }

    #[test]
    fn test_dynamic_features_follow_model_order() {
        let plan = build_batch(&[window("b1", 2)]).unwrap();
        let firsts: Vec<f64> = plan.requests[0]
            .feat_dynamic_real
            .iter()
            .map(|s| s[0])
            .collect();
        assert_eq!(firsts, vec![22.3, 55.0, 1.0, 10.5, 60.0, 2300.0, 0.95, 220.0]);
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        assert!(matches!(build_batch(&[]), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn test_empty_window_is_rejected() {
        let err = build_batch(&[window("b1", 0)]).unwrap_err();
        assert!(err.to_string().contains("b1"));
    }
}
